//! Device-number region registration.
//!
//! The character device claims `sensor_count * 8` consecutive minors under
//! one major at init and gives them back when it is torn down. The claim is
//! made through a [`DeviceRegion`], so the same device code runs against the
//! in-process [`RegionTable`] or any other registry of device numbers.

use crate::error::{LunixError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Major number of the Lunix character device.
pub const LUNIX_CHRDEV_MAJOR: u32 = 60;

/// A range of device numbers `major:first_minor .. major:first_minor+count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevRange {
    pub major: u32,
    pub first_minor: u32,
    pub count: u32,
}

impl DevRange {
    pub const fn new(major: u32, first_minor: u32, count: u32) -> Self {
        Self {
            major,
            first_minor,
            count,
        }
    }

    /// One past the last minor in the range.
    pub fn end(&self) -> u32 {
        self.first_minor.saturating_add(self.count)
    }

    pub fn contains(&self, major: u32, minor: u32) -> bool {
        major == self.major && (self.first_minor..self.end()).contains(&minor)
    }

    pub fn overlaps(&self, other: &DevRange) -> bool {
        self.major == other.major
            && self.first_minor < other.end()
            && other.first_minor < self.end()
    }
}

impl fmt::Display for DevRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.major, self.first_minor, self.end())
    }
}

/// Registry of device numbers.
pub trait DeviceRegion: Send + Sync {
    /// Claim `range` for `name`.
    ///
    /// # Errors
    ///
    /// `RegionBusy` if any part of `range` is already claimed.
    fn register(&self, range: DevRange, name: &str) -> Result<()>;

    /// Release a range previously claimed with [`register`](Self::register).
    fn unregister(&self, range: DevRange);
}

/// In-process device-number table.
#[derive(Debug, Default)]
pub struct RegionTable {
    entries: Mutex<Vec<(DevRange, String)>>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently claimed ranges with their owners.
    pub fn registered(&self) -> Vec<(DevRange, String)> {
        self.entries.lock().clone()
    }
}

impl DeviceRegion for RegionTable {
    fn register(&self, range: DevRange, name: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some((held, holder)) = entries.iter().find(|(held, _)| held.overlaps(&range)) {
            return Err(LunixError::RegionBusy {
                major: held.major,
                first: held.first_minor,
                end: held.end(),
                holder: holder.clone(),
            });
        }
        entries.push((range, name.to_string()));
        Ok(())
    }

    fn unregister(&self, range: DevRange) {
        self.entries.lock().retain(|(held, _)| *held != range);
    }
}

/// A claimed range; dropping it unregisters the range.
pub struct Registration {
    region: Arc<dyn DeviceRegion>,
    range: DevRange,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Claim `range` in `region` for `name`.
    pub fn acquire(region: Arc<dyn DeviceRegion>, range: DevRange, name: &str) -> Result<Self> {
        region.register(range, name)?;
        info!(%range, name, "registered device-number region");
        Ok(Self { region, range })
    }

    pub fn range(&self) -> DevRange {
        self.range
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.region.unregister(self.range);
        debug!(range = %self.range, "unregistered device-number region");
    }
}
