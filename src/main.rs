//! CLI entry point for lunix-tng
//!
//! # Usage
//!
//! Read five temperature values from sensor 0:
//! ```bash
//! lunix-tng sensor --sensor 0 --measurement temp --count 5
//! ```
//!
//! Encrypt and decrypt a message through the paravirtual crypto device:
//! ```bash
//! lunix-tng crypto --message "hello"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lunix_chrdev::Measurement;
use lunix_core::Interrupt;
use lunix_tng::{
    app,
    config::LunixConfig,
    logging::{self, OutputFormat, TracingConfig},
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "lunix-tng")]
#[command(about = "Lunix:TNG sensor device and virtio-crypto demo", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = lunix_tng::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    /// Log span open and close events
    #[arg(long, global = true)]
    log_spans: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read values from one simulated sensor node
    Sensor {
        /// Sensor number
        #[arg(long, default_value_t = 0)]
        sensor: u32,

        /// Measurement (batt, temp, light)
        #[arg(long, default_value = "temp")]
        measurement: Measurement,

        /// Number of fresh values to read
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// Write values here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Encrypt and decrypt a message through the crypto device
    Crypto {
        /// Message to encrypt
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LunixConfig::load_from(&cli.config)?;
    config.validate()?;
    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format)
        .with_span_events(cli.log_spans)
        .with_ansi(!cli.no_color);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, "starting");

    match cli.command {
        Commands::Sensor {
            sensor,
            measurement,
            count,
            output,
        } => run_sensor(&config, sensor, measurement, count, output).await,
        Commands::Crypto { message } => run_crypto(&config, &message).await,
    }
}

async fn run_sensor(
    config: &LunixConfig,
    sensor: u32,
    measurement: Measurement,
    count: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let interrupt = Interrupt::new();
    let on_ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted");
            on_ctrl_c.raise();
        }
    });

    let values = app::sample_sensor(config, sensor, measurement, count, &interrupt).await?;

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for value in values {
        writeln!(out, "{value}")?;
    }
    out.flush()?;
    Ok(())
}

async fn run_crypto(config: &LunixConfig, message: &str) -> Result<()> {
    let transcript = app::crypto_round_trip(config, message.as_bytes()).await?;
    println!("encrypted: {}", app::to_hex(&transcript.ciphertext));
    println!("decrypted: {}", String::from_utf8_lossy(&transcript.plaintext));
    Ok(())
}
