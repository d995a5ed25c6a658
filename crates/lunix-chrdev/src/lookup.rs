//! Raw-code to physical-value conversion.
//!
//! Sensors report 16-bit ADC codes. Values are converted to milli-units
//! (mV, m°C, thousandths of a percent) so that rendering is pure integer
//! arithmetic. The default [`LookupTables`] precomputes every code once.

use crate::measurement::Measurement;

/// Number of entries per table (one per 16-bit raw code).
pub const TABLE_LEN: usize = 1 << 16;

/// Converts a raw sensor code into a physical value in milli-units.
pub trait Convert: Send + Sync {
    /// Physical value of `raw` for `measurement`, in milli-units.
    fn convert(&self, measurement: Measurement, raw: u32) -> i64;
}

/// Battery voltage in mV: `1.223 V * 1024 / raw`. Code 0 reads as 0 V.
pub fn battery_millivolts(raw: u32) -> i64 {
    match raw {
        0 => 0,
        raw => 1_223 * 1_024 / i64::from(raw),
    }
}

/// Temperature in m°C: `-39.60 °C + 0.01 °C * raw`.
pub fn temperature_millicelsius(raw: u32) -> i64 {
    -39_600 + 10 * i64::from(raw)
}

/// Light level in thousandths of a percent of full scale.
pub fn light_millipercent(raw: u32) -> i64 {
    i64::from(raw.min(0xFFFF)) * 100_000 / 0xFFFF
}

/// Precomputed conversion tables, one per measurement.
///
/// Codes beyond the table clamp to its last entry.
pub struct LookupTables {
    voltage: Box<[i32]>,
    temperature: Box<[i32]>,
    light: Box<[i32]>,
}

impl std::fmt::Debug for LookupTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupTables")
            .field("entries", &TABLE_LEN)
            .finish_non_exhaustive()
    }
}

impl Default for LookupTables {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupTables {
    /// Build all three tables.
    pub fn new() -> Self {
        Self {
            voltage: build(battery_millivolts),
            temperature: build(temperature_millicelsius),
            light: build(light_millipercent),
        }
    }

    fn table(&self, measurement: Measurement) -> &[i32] {
        match measurement {
            Measurement::Battery => &self.voltage,
            Measurement::Temperature => &self.temperature,
            Measurement::Light => &self.light,
        }
    }
}

impl Convert for LookupTables {
    fn convert(&self, measurement: Measurement, raw: u32) -> i64 {
        let table = self.table(measurement);
        let index = (raw as usize).min(TABLE_LEN - 1);
        i64::from(table[index])
    }
}

fn build(formula: fn(u32) -> i64) -> Box<[i32]> {
    (0..TABLE_LEN as u32)
        .map(|raw| {
            let value = formula(raw);
            i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formulas() {
        assert_eq!(battery_millivolts(0), 0);
        assert_eq!(battery_millivolts(400), 3130);
        assert_eq!(temperature_millicelsius(0), -39_600);
        assert_eq!(temperature_millicelsius(6_306), 23_460);
        assert_eq!(light_millipercent(0), 0);
        assert_eq!(light_millipercent(0xFFFF), 100_000);
    }

    #[test]
    fn test_tables_match_formulas() {
        let tables = LookupTables::new();
        for raw in [0u32, 1, 400, 6_306, 40_000, 0xFFFF] {
            assert_eq!(tables.convert(Measurement::Battery, raw), battery_millivolts(raw));
            assert_eq!(
                tables.convert(Measurement::Temperature, raw),
                temperature_millicelsius(raw)
            );
            assert_eq!(tables.convert(Measurement::Light, raw), light_millipercent(raw));
        }
    }

    #[test]
    fn test_out_of_range_codes_clamp() {
        let tables = LookupTables::new();
        assert_eq!(
            tables.convert(Measurement::Temperature, 1 << 20),
            tables.convert(Measurement::Temperature, 0xFFFF)
        );
    }
}
