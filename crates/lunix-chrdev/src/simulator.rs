//! Simulated sensor network.
//!
//! Stands in for the radio line discipline that feeds real sensor boards:
//! every tick it publishes a pseudo-random raw code into each channel of a
//! device. A fixed seed makes the sequence reproducible.

use crate::error::{LunixError, Result};
use crate::measurement::Measurement;
use lunix_core::{ChannelRegistry, HardwareChannel, Interrupt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Plausible raw code for `measurement`.
///
/// Battery codes land around 2.9-3.2 V, temperatures around 15-30 °C, light
/// anywhere in range.
pub fn sample_raw<R: Rng + ?Sized>(measurement: Measurement, rng: &mut R) -> u32 {
    match measurement {
        Measurement::Battery => rng.gen_range(380..=430),
        Measurement::Temperature => rng.gen_range(5_460..=6_960),
        Measurement::Light => rng.gen_range(0..=0xFFFF),
    }
}

/// Publish one sample into every channel. Returns the number of channels fed.
pub fn publish_round<R: Rng + ?Sized>(
    channels: &[(Measurement, Arc<HardwareChannel<u32>>)],
    rng: &mut R,
) -> usize {
    for (measurement, channel) in channels {
        channel.publish(sample_raw(*measurement, rng));
    }
    channels.len()
}

/// Handle to a running simulator task.
#[derive(Debug)]
pub struct SensorSimulator {
    stop: Interrupt,
    task: JoinHandle<u64>,
}

impl SensorSimulator {
    /// Start publishing into every channel of `registry` every `interval`.
    ///
    /// `seed` fixes the raw-code sequence; `None` seeds from the OS.
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry: &ChannelRegistry<u32>, interval: Duration, seed: Option<u64>) -> Self {
        let channels: Vec<_> = registry
            .iter()
            .filter_map(|(id, channel)| {
                Measurement::from_index(id.kind)
                    .ok()
                    .map(|measurement| (measurement, channel.clone()))
            })
            .collect();
        let mut rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };

        let stop = Interrupt::new();
        let stopped = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rounds = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.raised() => break,
                    _ = ticker.tick() => {
                        let fed = publish_round(&channels, &mut rng);
                        rounds += 1;
                        debug!(round = rounds, channels = fed, "published sensor round");
                    }
                }
            }
            rounds
        });

        info!(interval_ms = interval.as_millis() as u64, ?seed, "sensor simulator started");
        Self { stop, task }
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it. Returns the number of rounds published.
    pub async fn shutdown(self) -> Result<u64> {
        self.stop.raise();
        let rounds = self.task.await.map_err(|err| LunixError::Simulator {
            message: err.to_string(),
        })?;
        info!(rounds, "sensor simulator stopped");
        Ok(rounds)
    }
}
