//! End-to-end tests of the blocking read protocol over a shared channel.

use bytes::BytesMut;
use lunix_core::{CachedState, ChannelError, HardwareChannel, Interrupt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Renders milli-units as `<int>.<3 digits>\n`.
fn milli_render(value: &i64, out: &mut BytesMut) {
    let sign = if *value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    out.extend_from_slice(format!("{sign}{}.{:03}\n", abs / 1000, abs % 1000).as_bytes());
}

fn milli_state(channel: &Arc<HardwareChannel<i64>>) -> CachedState<i64> {
    CachedState::new(channel.clone(), Arc::new(milli_render), 20)
}

async fn read_string(state: &CachedState<i64>, chunk: usize, interrupt: &Interrupt) -> String {
    let mut buf = vec![0u8; chunk];
    let n = state.read(&mut buf[..], interrupt).await.unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

async fn wait_for_waiters<S>(channel: &HardwareChannel<S>, count: usize) {
    tokio::time::timeout(WAIT, async {
        while channel.waiters() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("readers never went to sleep");
}

#[tokio::test]
async fn test_first_read_on_never_updated_channel_completes() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let state = milli_state(&channel);

    let text = tokio::time::timeout(WAIT, read_string(&state, 100, &Interrupt::new()))
        .await
        .expect("first read blocked on a never-updated channel");
    assert_eq!(text, "0.000\n");
}

#[tokio::test]
async fn test_temperature_value_formats_with_three_decimals() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    channel.publish(23_456);
    let state = milli_state(&channel);

    let text = read_string(&state, 100, &Interrupt::new()).await;
    assert_eq!(text, "23.456\n");
    assert_eq!(text.len(), 7);
}

#[tokio::test]
async fn test_partial_reads_then_rewind() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    channel.publish(23_456);
    let state = milli_state(&channel);
    let interrupt = Interrupt::new();

    assert_eq!(read_string(&state, 3, &interrupt).await, "23.");
    assert_eq!(state.try_lock().unwrap().position(), 3);

    assert_eq!(read_string(&state, 10, &interrupt).await, "456\n");
    assert_eq!(state.try_lock().unwrap().position(), 0);
}

#[tokio::test]
async fn test_drained_cache_waits_for_fresh_value() {
    let channel = Arc::new(HardwareChannel::new("s0-light", 0i64));
    channel.publish(1_000);
    let state = Arc::new(milli_state(&channel));

    assert_eq!(read_string(&state, 100, &Interrupt::new()).await, "1.000\n");

    // Nothing new: the next read must not complete on its own.
    let pending = tokio::time::timeout(
        Duration::from_millis(50),
        read_string(&state, 100, &Interrupt::new()),
    )
    .await;
    assert!(pending.is_err(), "read returned a value it had already served");

    channel.publish(2_000);
    let text = tokio::time::timeout(WAIT, read_string(&state, 100, &Interrupt::new()))
        .await
        .expect("reader did not see the new value");
    assert_eq!(text, "2.000\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_timestamps_never_go_backwards() {
    let channel = Arc::new(HardwareChannel::new("s0-batt", 0i64));
    let state = Arc::new(milli_state(&channel));

    let producer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            for value in 1..=200i64 {
                channel.publish(value * 1000);
                tokio::task::yield_now().await;
            }
        })
    };

    let interrupt = Interrupt::new();
    let mut last_seen = None;
    let mut last_value = -1i64;
    for _ in 0..50 {
        let text = tokio::time::timeout(WAIT, read_string(&state, 100, &interrupt))
            .await
            .expect("reader starved");
        let whole: i64 = text.trim_end().split('.').next().unwrap().parse().unwrap();
        assert!(whole >= last_value, "value went backwards: {whole} < {last_value}");
        last_value = whole;

        let stamp = state.try_lock().unwrap().timestamp();
        assert!(stamp >= last_seen);
        last_seen = stamp;

        if whole == 200 {
            break;
        }
    }
    producer.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chunked_stream_is_never_torn() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let state = Arc::new(milli_state(&channel));
    let stop = Interrupt::new();

    let producer = {
        let channel = channel.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut value = 0i64;
            while !stop.is_raised() {
                value += 111_111;
                channel.publish(value);
                tokio::task::yield_now().await;
            }
        })
    };

    let interrupt = Interrupt::new();
    for _ in 0..20 {
        let mut line = String::new();
        while !line.ends_with('\n') {
            line.push_str(&read_string(&state, 2, &interrupt).await);
        }
        let (whole, frac) = line.trim_end().split_once('.').expect("no decimal point");
        let value = whole.parse::<i64>().unwrap() * 1000 + frac.parse::<i64>().unwrap();
        assert_eq!(value % 111_111, 0, "torn rendering {line:?}");
    }

    stop.raise();
    producer.await.unwrap();
}

#[tokio::test]
async fn test_rendering_runs_outside_fast_lock() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let probe = channel.clone();
    let render = move |value: &i64, out: &mut BytesMut| {
        assert!(!probe.fast_lock_held(), "renderer ran under the fast lock");
        milli_render(value, out);
    };
    let state = CachedState::new(channel.clone(), Arc::new(render), 20);

    channel.publish(5);
    let mut buf = [0u8; 20];
    let n = state.read(&mut buf[..], &Interrupt::new()).await.unwrap();
    assert_eq!(&buf[..n], b"0.005\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_reader_releases_everything() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let state = Arc::new(milli_state(&channel));
    read_string(&state, 100, &Interrupt::new()).await;

    let interrupt = Interrupt::new();
    let reader = {
        let state = state.clone();
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 20];
            state.read(&mut buf[..], &interrupt).await
        })
    };

    wait_for_waiters(&channel, 1).await;
    interrupt.raise();

    let out = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap();
    assert_eq!(out, Err(ChannelError::Interrupted));
    assert_eq!(channel.waiters(), 0);

    let guard = state.try_lock().expect("slow lock still held after interruption");
    assert_eq!(guard.timestamp(), Some(0));
    assert_eq!(guard.position(), 0);
    drop(guard);

    channel.publish(7_000);
    assert_eq!(read_string(&state, 100, &Interrupt::new()).await, "7.000\n");
}

#[tokio::test]
async fn test_interrupt_while_waiting_for_slow_lock() {
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let state = milli_state(&channel);
    let held = state.lock(&Interrupt::new()).await.unwrap();

    let interrupt = Interrupt::new();
    interrupt.raise();
    let mut buf = [0u8; 20];
    let out = state.read(&mut buf[..], &interrupt).await;
    assert_eq!(out, Err(ChannelError::Interrupted));

    drop(held);
    assert!(state.try_lock().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_share_one_refresh() {
    let renders = Arc::new(AtomicUsize::new(0));
    let channel = Arc::new(HardwareChannel::new("s0-temp", 0i64));
    let counter = renders.clone();
    let render = move |value: &i64, out: &mut BytesMut| {
        counter.fetch_add(1, Ordering::SeqCst);
        milli_render(value, out);
    };
    let state = Arc::new(CachedState::new(channel.clone(), Arc::new(render), 20));

    let mut buf = [0u8; 20];
    state.read(&mut buf[..], &Interrupt::new()).await.unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 20];
                let n = state.read(&mut buf[..], &Interrupt::new()).await?;
                Ok::<_, ChannelError>(buf[..n].to_vec())
            })
        })
        .collect();

    wait_for_waiters(&channel, 2).await;
    channel.publish(42_000);

    for reader in readers {
        let bytes = tokio::time::timeout(WAIT, reader)
            .await
            .expect("reader did not wake")
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"42.000\n");
    }
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}
