//! Fixed-point text rendering of sensor values.

use crate::lookup::Convert;
use crate::measurement::Measurement;
use bytes::BytesMut;
use lunix_core::Render;
use std::fmt::Write;
use std::sync::Arc;

/// Capacity of one rendered measurement.
pub const BUFSZ: usize = 20;

/// Append `value` (milli-units) as `<int>.<3 digits>\n`.
///
/// Negative values carry a single leading sign: `-1500` renders as `-1.500`.
pub fn format_milli(value: i64, out: &mut BytesMut) {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    // BytesMut grows on demand; writing into it cannot fail.
    let _ = writeln!(out, "{sign}{}.{:03}", abs / 1000, abs % 1000);
}

/// Renders raw codes of one measurement through a [`Convert`] implementation.
#[derive(Clone)]
pub struct MeasurementRender {
    measurement: Measurement,
    convert: Arc<dyn Convert>,
}

impl std::fmt::Debug for MeasurementRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementRender")
            .field("measurement", &self.measurement)
            .finish_non_exhaustive()
    }
}

impl MeasurementRender {
    pub fn new(measurement: Measurement, convert: Arc<dyn Convert>) -> Self {
        Self {
            measurement,
            convert,
        }
    }

    pub fn measurement(&self) -> Measurement {
        self.measurement
    }
}

impl Render<u32> for MeasurementRender {
    fn render(&self, raw: &u32, out: &mut BytesMut) {
        format_milli(self.convert.convert(self.measurement, *raw), out);
    }
}
