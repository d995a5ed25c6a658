//! Measurement kinds and the minor-number layout.
//!
//! Every sensor owns eight consecutive minors: `minor = sensor * 8 + kind`.
//! Only the first three slots carry a measurement; the rest are reserved.
//! Device nodes are named `lunix<sensor>-<batt|temp|light>`.

use crate::error::{LunixError, Result};
use lunix_core::ChannelError;
use std::fmt;
use std::str::FromStr;

/// Minors reserved per sensor.
pub const MINORS_PER_SENSOR: u32 = 8;

/// One of the quantities a Lunix sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measurement {
    /// Battery voltage.
    Battery = 0,
    /// Ambient temperature.
    Temperature = 1,
    /// Light level.
    Light = 2,
}

impl Measurement {
    /// All measurements in minor-slot order.
    pub const ALL: [Measurement; 3] = [Self::Battery, Self::Temperature, Self::Light];

    /// Number of measurement kinds per sensor.
    pub const COUNT: usize = Self::ALL.len();

    /// Minor slot within the sensor's block of eight.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Measurement stored in minor slot `index`.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            ChannelError::UnknownKind {
                kind: index,
                kinds: Self::COUNT,
            }
            .into()
        })
    }

    /// Node-name suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Battery => "batt",
            Self::Temperature => "temp",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for Measurement {
    type Err = LunixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "batt" | "battery" => Ok(Self::Battery),
            "temp" | "temperature" => Ok(Self::Temperature),
            "light" => Ok(Self::Light),
            _ => Err(LunixError::BadNodeName {
                name: s.to_string(),
            }),
        }
    }
}

/// Minor number of `measurement` on `sensor`.
///
/// A sensor whose block lies beyond the 32-bit minor space fails with
/// `NotFound`.
pub fn encode_minor(sensor: u32, measurement: Measurement) -> Result<u32> {
    sensor
        .checked_mul(MINORS_PER_SENSOR)
        .and_then(|base| base.checked_add(measurement as u32))
        .ok_or_else(|| {
            ChannelError::NotFound {
                unit: sensor as usize,
                units: (u32::MAX / MINORS_PER_SENSOR) as usize,
            }
            .into()
        })
}

/// Split a minor into `(sensor, measurement)`.
///
/// Reserved slots fail with `UnknownKind`.
pub fn decode_minor(minor: u32) -> Result<(u32, Measurement)> {
    let sensor = minor / MINORS_PER_SENSOR;
    let slot = (minor % MINORS_PER_SENSOR) as usize;
    Ok((sensor, Measurement::from_index(slot)?))
}

/// Device node name, e.g. `lunix0-temp`.
pub fn node_name(sensor: u32, measurement: Measurement) -> String {
    format!("lunix{sensor}-{measurement}")
}

/// Parse a node name, with or without a leading `/dev/`.
pub fn parse_node_name(name: &str) -> Result<(u32, Measurement)> {
    let bad = || LunixError::BadNodeName {
        name: name.to_string(),
    };
    let base = name.strip_prefix("/dev/").unwrap_or(name);
    let (sensor, kind) = base
        .strip_prefix("lunix")
        .and_then(|rest| rest.split_once('-'))
        .ok_or_else(bad)?;
    let sensor = sensor.parse::<u32>().map_err(|_| bad())?;
    let measurement = kind.parse::<Measurement>().map_err(|_| bad())?;
    Ok((sensor, measurement))
}
