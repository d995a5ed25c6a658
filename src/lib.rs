//! Lunix:TNG
//!
//! Binary-side glue for the cached hardware channel stack:
//!
//! - [`config`] - Figment-based configuration (`config/lunix.toml` + `LUNIX_` env)
//! - [`logging`] - tracing subscriber setup
//! - [`app`] - the `sensor` and `crypto` commands
//!
//! The devices themselves live in the `lunix-core`, `lunix-chrdev` and
//! `virtio-crypto` crates.

pub mod app;
pub mod config;
pub mod logging;

pub use config::{ConfigError, LunixConfig};
