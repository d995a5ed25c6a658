//! Command implementations behind the `lunix-tng` binary.
//!
//! Both commands build a self-contained device stack from the configuration,
//! run one client against it, and tear it down again.

use crate::config::LunixConfig;
use anyhow::{bail, Context, Result};
use lunix_chrdev::{
    LookupTables, LunixDevice, Measurement, RegionTable, SensorFile, SensorSimulator, BUFSZ,
};
use lunix_core::Interrupt;
use std::sync::Arc;
use tracing::{debug, info};
use virtio_crypto::{
    connect, CipherAlgorithm, CryptoDriver, Direction, OpenFlags, SoftCipher, Transport,
    CRYPTO_BLOCK_LEN, CRYPTO_DATA_MAX_LEN,
};

/// Key used by the crypto demo.
pub const DEMO_KEY: &[u8; 16] = b"0123456789ABCDEF";

/// IV used by the crypto demo.
pub const DEMO_IV: &[u8; CRYPTO_BLOCK_LEN] = b"0123456789ABCDEF";

/// Read one full line from a sensor node, in as many reads as it takes.
async fn read_line(file: &SensorFile, interrupt: &Interrupt) -> Result<String> {
    let mut line = Vec::with_capacity(BUFSZ);
    let mut buf = [0u8; BUFSZ];
    while !line.ends_with(b"\n") {
        let n = file.read(&mut buf[..], interrupt).await?;
        if n == 0 {
            bail!("sensor node returned no data");
        }
        line.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8(line)?)
}

/// Sample `count` fresh values of one measurement through the device node,
/// formatted with three decimals.
pub async fn sample_sensor(
    config: &LunixConfig,
    sensor: u32,
    measurement: Measurement,
    count: usize,
    interrupt: &Interrupt,
) -> Result<Vec<String>> {
    let device = LunixDevice::init(
        config.sensors.count,
        config.sensors.major,
        Arc::new(RegionTable::new()),
        Arc::new(LookupTables::new()),
    )?;
    let name = lunix_chrdev::node_name(sensor, measurement);
    let file = device.open_node(&name)?;
    let simulator = SensorSimulator::spawn(
        device.channels(),
        config.sensors.update_interval(),
        config.sensors.seed,
    );
    info!(node = %name, count, "sampling sensor");

    let values = read_values(&device, &file, count, interrupt).await;
    let rounds = simulator.shutdown().await?;
    debug!(rounds, "simulator stopped");
    file.release();
    values
}

async fn read_values(
    device: &LunixDevice,
    file: &SensorFile,
    count: usize,
    interrupt: &Interrupt,
) -> Result<Vec<String>> {
    // Skip the power-on zero of a channel the simulator has not reached yet.
    device
        .channel(file.sensor(), file.measurement())?
        .wait_newer_than(0, interrupt)
        .await?;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let line = read_line(file, interrupt).await?;
        let value: f64 = line
            .trim_end()
            .parse()
            .with_context(|| format!("unparseable reading {line:?}"))?;
        debug!(minor = file.minor(), value, "reading");
        values.push(format!("{value:.3}"));
    }
    Ok(values)
}

/// Result of [`crypto_round_trip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoTranscript {
    /// Ciphertext produced by the device.
    pub ciphertext: Vec<u8>,
    /// Decrypted ciphertext, with the zero padding removed.
    pub plaintext: Vec<u8>,
}

/// Encrypt and decrypt `message` through a connected guest/host pair.
pub async fn crypto_round_trip(config: &LunixConfig, message: &[u8]) -> Result<CryptoTranscript> {
    let padded_len = message.len().div_ceil(CRYPTO_BLOCK_LEN).max(1) * CRYPTO_BLOCK_LEN;
    if padded_len > CRYPTO_DATA_MAX_LEN {
        bail!("message of {} bytes exceeds {CRYPTO_DATA_MAX_LEN}", message.len());
    }
    let mut padded = message.to_vec();
    padded.resize(padded_len, 0);

    let driver = CryptoDriver::new();
    let transport = Arc::new(Transport::new(
        config.crypto.control_queue_size,
        config.crypto.data_queue_size,
    ));
    let (guest, host) = connect(&driver, transport, Arc::new(SoftCipher::new()));
    let shutdown = Interrupt::new();
    let host_task = tokio::spawn(host.run(shutdown.clone()));

    let interrupt = Interrupt::new();
    let file = guest.open(OpenFlags::default(), &interrupt).await?;
    let ses = file.get_session(CipherAlgorithm::AES_CBC, DEMO_KEY, &interrupt).await?;

    let mut ciphertext = vec![0u8; padded_len];
    file.crypt(ses, Direction::Encrypt, DEMO_IV, &padded, &mut ciphertext, &interrupt)
        .await?;
    let mut plaintext = vec![0u8; padded_len];
    file.crypt(ses, Direction::Decrypt, DEMO_IV, &ciphertext, &mut plaintext, &interrupt)
        .await?;

    file.free_session(ses, &interrupt).await?;
    file.close()?;
    shutdown.raise();
    let stats = host_task.await?;
    debug!(requests = stats.requests, "crypto host stopped");

    plaintext.truncate(message.len());
    Ok(CryptoTranscript { ciphertext, plaintext })
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
