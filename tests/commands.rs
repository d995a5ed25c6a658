//! The `sensor` and `crypto` commands end to end.

use lunix_chrdev::Measurement;
use lunix_core::Interrupt;
use lunix_tng::app::{crypto_round_trip, sample_sensor, to_hex};
use lunix_tng::config::LunixConfig;

fn fast_config() -> LunixConfig {
    let mut config = LunixConfig::default();
    config.sensors.count = 2;
    config.sensors.update_interval_ms = 5;
    config.sensors.seed = Some(7);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sensor_command_reads_fresh_values() {
    let values = sample_sensor(&fast_config(), 1, Measurement::Temperature, 3, &Interrupt::new())
        .await
        .unwrap();
    assert_eq!(values.len(), 3);
    for value in &values {
        let celsius: f64 = value.parse().unwrap();
        // The simulator stays within 15-30 °C.
        assert!((15.0..=30.0).contains(&celsius), "{value}");
        assert_eq!(value.split('.').nth(1).map(str::len), Some(3));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sensor_command_rejects_unknown_sensor() {
    let err = sample_sensor(&fast_config(), 9, Measurement::Light, 1, &Interrupt::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("9"), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crypto_command_round_trips_the_message() {
    let transcript = crypto_round_trip(&LunixConfig::default(), b"hello lunix")
        .await
        .unwrap();
    assert_eq!(transcript.ciphertext.len(), 16);
    assert_eq!(transcript.plaintext, b"hello lunix");
    assert_ne!(&transcript.ciphertext[..11], b"hello lunix");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crypto_command_pads_to_whole_blocks() {
    let message = [b'x'; 17];
    let transcript = crypto_round_trip(&LunixConfig::default(), &message).await.unwrap();
    assert_eq!(transcript.ciphertext.len(), 32);
    assert_eq!(transcript.plaintext, message);
}

#[test]
fn test_hex() {
    assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
}
