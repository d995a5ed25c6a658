//! The Lunix character device and its open files.
//!
//! [`LunixDevice::init`] claims the device-number region, builds one
//! [`HardwareChannel`] per `(sensor, measurement)` and keeps them in an
//! immutable registry. Opening a minor (or a node name) yields a
//! [`SensorFile`] with its own cached rendering; reading it follows the
//! blocking read protocol of `lunix-core`.

use crate::error::{LunixError, Result};
use crate::lookup::Convert;
use crate::measurement::{
    decode_minor, encode_minor, node_name, parse_node_name, Measurement, MINORS_PER_SENSOR,
};
use crate::region::{DevRange, DeviceRegion, Registration};
use crate::render::{MeasurementRender, BUFSZ};
use lunix_core::{
    CachedState, ChannelError, ChannelId, ChannelRegistry, HardwareChannel, Interrupt, ReadSink,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Name the device-number region is registered under.
pub const DEVICE_NAME: &str = "Lunix:TNG";

/// A registered Lunix character device.
pub struct LunixDevice {
    channels: ChannelRegistry<u32>,
    convert: Arc<dyn Convert>,
    registration: Registration,
}

impl fmt::Debug for LunixDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LunixDevice")
            .field("sensors", &self.sensor_count())
            .field("range", &self.registration.range())
            .finish_non_exhaustive()
    }
}

impl LunixDevice {
    /// Register `sensor_count * 8` minors under `major` and create the channels.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for zero sensors or a minor range that does not fit in
    /// `u32`, `RegionBusy` if the range is already claimed.
    pub fn init(
        sensor_count: u32,
        major: u32,
        region: Arc<dyn DeviceRegion>,
        convert: Arc<dyn Convert>,
    ) -> Result<Self> {
        if sensor_count == 0 {
            return Err(LunixError::InvalidConfig {
                message: "at least one sensor is required".to_string(),
            });
        }
        let minors = sensor_count
            .checked_mul(MINORS_PER_SENSOR)
            .ok_or_else(|| LunixError::InvalidConfig {
                message: format!("{sensor_count} sensors exceed the minor number space"),
            })?;

        let registration =
            Registration::acquire(region, DevRange::new(major, 0, minors), DEVICE_NAME)?;

        let channels = ChannelRegistry::build(sensor_count as usize, Measurement::COUNT, |id| {
            let label = match Measurement::from_index(id.kind) {
                Ok(measurement) => node_name(id.unit as u32, measurement),
                Err(_) => format!("lunix{}-{}", id.unit, id.kind),
            };
            HardwareChannel::new(label, 0)
        });

        info!(sensors = sensor_count, major, minors, "Lunix character device ready");
        Ok(Self {
            channels,
            convert,
            registration,
        })
    }

    pub fn sensor_count(&self) -> u32 {
        self.channels.units() as u32
    }

    /// The claimed device-number range.
    pub fn range(&self) -> DevRange {
        self.registration.range()
    }

    /// All channels, for producers.
    pub fn channels(&self) -> &ChannelRegistry<u32> {
        &self.channels
    }

    /// Channel of one measurement.
    pub fn channel(
        &self,
        sensor: u32,
        measurement: Measurement,
    ) -> Result<&Arc<HardwareChannel<u32>>> {
        Ok(self.channels.get(ChannelId::new(sensor as usize, measurement.index()))?)
    }

    /// Every node the device serves, as `(minor, name)`.
    pub fn nodes(&self) -> impl Iterator<Item = (u32, String)> + '_ {
        (0..self.sensor_count()).flat_map(|sensor| {
            Measurement::ALL
                .into_iter()
                .filter_map(move |m| Some((encode_minor(sensor, m).ok()?, node_name(sensor, m))))
        })
    }

    /// Open the node with minor number `minor`.
    ///
    /// # Errors
    ///
    /// `UnknownKind` for a reserved slot, `NotFound` for a sensor beyond the
    /// device.
    pub fn open(&self, minor: u32) -> Result<SensorFile> {
        let (sensor, measurement) = decode_minor(minor)?;
        let channel = self.channel(sensor, measurement)?.clone();
        let render = MeasurementRender::new(measurement, self.convert.clone());
        let state = CachedState::new(channel, Arc::new(render), BUFSZ);

        debug!(minor, sensor, %measurement, "opened sensor node");
        Ok(SensorFile {
            minor,
            sensor,
            measurement,
            state,
        })
    }

    /// Open a node by name, e.g. `lunix0-temp` or `/dev/lunix0-temp`.
    ///
    /// # Errors
    ///
    /// `BadNodeName` for a malformed name, `NotFound` for a sensor beyond the
    /// device.
    pub fn open_node(&self, name: &str) -> Result<SensorFile> {
        let (sensor, measurement) = parse_node_name(name)?;
        self.channel(sensor, measurement)?;
        self.open(encode_minor(sensor, measurement)?)
    }
}

/// An open sensor node. Not seekable; dropping it releases the handle.
pub struct SensorFile {
    minor: u32,
    sensor: u32,
    measurement: Measurement,
    state: CachedState<u32>,
}

impl fmt::Debug for SensorFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorFile")
            .field("minor", &self.minor)
            .field("sensor", &self.sensor)
            .field("measurement", &self.measurement)
            .finish_non_exhaustive()
    }
}

impl SensorFile {
    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn sensor(&self) -> u32 {
        self.sensor
    }

    pub fn measurement(&self) -> Measurement {
        self.measurement
    }

    /// The handle's cached state.
    pub fn state(&self) -> &CachedState<u32> {
        &self.state
    }

    /// Read the current measurement text, blocking for a fresh value at the
    /// start of every line.
    pub async fn read<W: ReadSink + ?Sized>(
        &self,
        out: &mut W,
        interrupt: &Interrupt,
    ) -> Result<usize> {
        Ok(self.state.read(out, interrupt).await?)
    }

    /// Device control. No commands are defined.
    pub fn ioctl(&self, cmd: u32, _arg: u64) -> Result<i64> {
        debug!(minor = self.minor, cmd, "rejecting ioctl");
        Err(ChannelError::InvalidOperation { op: "ioctl" }.into())
    }

    /// Memory mapping is not supported.
    pub fn mmap(&self, _len: usize) -> Result<()> {
        Err(ChannelError::InvalidOperation { op: "mmap" }.into())
    }

    /// Seeking is not supported; the stream position is driven by reads.
    pub fn seek(&self, _offset: i64) -> Result<u64> {
        Err(ChannelError::InvalidOperation { op: "llseek" }.into())
    }

    /// Close the handle. Equivalent to dropping it.
    pub fn release(self) {
        debug!(minor = self.minor, "released sensor node");
    }
}
