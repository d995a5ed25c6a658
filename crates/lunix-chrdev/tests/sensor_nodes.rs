//! Sensor nodes driven by a producer, read the way user space reads them.

use lunix_chrdev::{
    encode_minor, LookupTables, LunixDevice, LunixError, Measurement, RegionTable, SensorSimulator,
    LUNIX_CHRDEV_MAJOR,
};
use lunix_core::{ChannelError, Interrupt};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn device(sensors: u32) -> LunixDevice {
    LunixDevice::init(
        sensors,
        LUNIX_CHRDEV_MAJOR,
        Arc::new(RegionTable::new()),
        Arc::new(LookupTables::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_read_temperature_line() {
    let dev = device(2);
    dev.channel(1, Measurement::Temperature).unwrap().publish(6_306);

    let file = dev.open_node("lunix1-temp").unwrap();
    let mut buf = [0u8; 64];
    let n = file.read(&mut buf[..], &Interrupt::new()).await.unwrap();
    assert_eq!(&buf[..n], b"23.460\n");
}

#[tokio::test]
async fn test_small_reads_walk_the_line_then_block() {
    let dev = device(1);
    let channel = dev.channel(0, Measurement::Battery).unwrap().clone();
    channel.publish(400);

    let file = dev.open(encode_minor(0, Measurement::Battery).unwrap()).unwrap();
    let interrupt = Interrupt::new();
    let mut line = Vec::new();
    loop {
        let mut chunk = [0u8; 2];
        let n = file.read(&mut chunk[..], &interrupt).await.unwrap();
        line.extend_from_slice(&chunk[..n]);
        if line.ends_with(b"\n") {
            break;
        }
    }
    assert_eq!(line, b"3.130\n");

    let mut buf = [0u8; 16];
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), file.read(&mut buf[..], &interrupt)).await;
    assert!(blocked.is_err());

    channel.publish(430);
    let n = tokio::time::timeout(WAIT, file.read(&mut buf[..], &interrupt))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"2.912\n");
}

#[tokio::test]
async fn test_negative_temperature() {
    let dev = device(1);
    dev.channel(0, Measurement::Temperature).unwrap().publish(0);
    let file = dev.open_node("/dev/lunix0-temp").unwrap();

    let mut buf = [0u8; 32];
    let n = file.read(&mut buf[..], &Interrupt::new()).await.unwrap();
    assert_eq!(&buf[..n], b"-39.600\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulator_feeds_open_nodes() {
    let dev = device(3);
    let sim = SensorSimulator::spawn(dev.channels(), Duration::from_millis(2), Some(11));
    let interrupt = Interrupt::new();
    let channel = dev.channel(2, Measurement::Temperature).unwrap();
    tokio::time::timeout(WAIT, channel.wait_newer_than(0, &interrupt))
        .await
        .unwrap()
        .unwrap();
    let file = dev.open_node("lunix2-temp").unwrap();

    let mut values = Vec::new();
    for _ in 0..3 {
        let mut buf = [0u8; 32];
        let n = tokio::time::timeout(WAIT, file.read(&mut buf[..], &interrupt))
            .await
            .unwrap()
            .unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        values.push(text.trim_end().parse::<f64>().unwrap());
    }
    sim.shutdown().await.unwrap();

    assert!(values.iter().all(|v| (15.0..=30.0).contains(v)), "{values:?}");
    let stamp = file.state().try_lock().unwrap().timestamp();
    assert!(stamp >= Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_read_reports_eintr() {
    let dev = Arc::new(device(1));
    let file = Arc::new(dev.open_node("lunix0-light").unwrap());
    let interrupt = Interrupt::new();

    let mut buf = [0u8; 32];
    file.read(&mut buf[..], &interrupt).await.unwrap();

    let reader = {
        let file = file.clone();
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            file.read(&mut buf[..], &interrupt).await
        })
    };
    let channel = dev.channel(0, Measurement::Light).unwrap().clone();
    while channel.waiters() == 0 {
        tokio::task::yield_now().await;
    }
    interrupt.raise();

    let err = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap().unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(err.errno(), libc::EINTR);
    assert!(file.state().try_lock().is_some());
}

#[test]
fn test_second_device_on_same_major_is_busy() {
    let region = Arc::new(RegionTable::new());
    let tables = Arc::new(LookupTables::new());
    let first = LunixDevice::init(4, LUNIX_CHRDEV_MAJOR, region.clone(), tables.clone()).unwrap();

    let err = LunixDevice::init(1, LUNIX_CHRDEV_MAJOR, region.clone(), tables.clone()).unwrap_err();
    assert!(err.is_busy());

    drop(first);
    assert!(LunixDevice::init(1, LUNIX_CHRDEV_MAJOR, region, tables).is_ok());
}

#[test]
fn test_open_errors() {
    let dev = device(1);
    assert!(matches!(
        dev.open_node("lunix0-humidity"),
        Err(LunixError::BadNodeName { .. })
    ));
    assert!(matches!(
        dev.open_node("lunix1-temp"),
        Err(LunixError::Channel(ChannelError::NotFound { .. }))
    ));
}

#[test]
fn test_open_sensor_past_minor_space() {
    let dev = device(1);
    // 2^29 * 8 wraps to minor 0, which must not alias sensor 0.
    for (name, unit) in [
        ("lunix536870912-temp", 536_870_912),
        ("lunix4294967295-light", 4_294_967_295),
    ] {
        assert_eq!(
            dev.open_node(name).unwrap_err(),
            LunixError::Channel(ChannelError::NotFound { unit, units: 1 }),
            "{name}"
        );
    }
}
