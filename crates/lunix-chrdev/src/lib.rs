//! Lunix:TNG sensor character device.
//!
//! Exposes the measurements of a wireless sensor network as character device
//! nodes, one per `(sensor, measurement)`:
//!
//! | minor           | node                |
//! |-----------------|---------------------|
//! | `sensor * 8 + 0` | `lunix<N>-batt`  |
//! | `sensor * 8 + 1` | `lunix<N>-temp`  |
//! | `sensor * 8 + 2` | `lunix<N>-light` |
//!
//! Each read returns the latest value as text (`"23.456\n"`), blocking until
//! the sensor reports something newer than what this handle already read.
//!
//! ## Modules
//!
//! - [`device`] - region registration, open/read/ioctl/mmap/release
//! - [`measurement`] - measurement kinds, minor layout, node names
//! - [`lookup`] - raw code to milli-unit conversion tables
//! - [`render`] - fixed-point text rendering
//! - [`region`] - device-number region registry
//! - [`simulator`] - pseudo-random producer for every channel

pub mod device;
pub mod error;
pub mod lookup;
pub mod measurement;
pub mod region;
pub mod render;
pub mod simulator;

pub use device::{LunixDevice, SensorFile, DEVICE_NAME};
pub use error::{LunixError, Result};
pub use lookup::{Convert, LookupTables};
pub use measurement::{
    decode_minor, encode_minor, node_name, parse_node_name, Measurement, MINORS_PER_SENSOR,
};
pub use region::{DevRange, DeviceRegion, RegionTable, Registration, LUNIX_CHRDEV_MAJOR};
pub use render::{format_milli, MeasurementRender, BUFSZ};
pub use simulator::SensorSimulator;
