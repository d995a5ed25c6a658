//! Channel registry: `(unit, kind)` to channel lookup.
//!
//! Built once, when the owning device is initialised, and read-only from then
//! on. Lookups take no lock. The registry is an ordinary value handed to
//! whoever opens handles; there is no process-wide instance.

use crate::channel::HardwareChannel;
use crate::error::{ChannelError, Result};
use std::fmt;
use std::sync::Arc;

/// Address of one channel: a unit (sensor, device) and a kind selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    /// Unit index (sensor number, device number).
    pub unit: usize,
    /// Kind selector within the unit (measurement type).
    pub kind: usize,
}

impl ChannelId {
    /// Convenience constructor.
    pub const fn new(unit: usize, kind: usize) -> Self {
        Self { unit, kind }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit, self.kind)
    }
}

/// Immutable table of channels, `units × kinds`.
pub struct ChannelRegistry<S> {
    kinds: usize,
    channels: Vec<Arc<HardwareChannel<S>>>,
}

impl<S> fmt::Debug for ChannelRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("units", &self.units())
            .field("kinds", &self.kinds)
            .finish()
    }
}

impl<S> ChannelRegistry<S> {
    /// Build `units × kinds` channels, labelling and seeding each through `make`.
    pub fn build<F>(units: usize, kinds: usize, mut make: F) -> Self
    where
        F: FnMut(ChannelId) -> HardwareChannel<S>,
    {
        let channels = (0..units)
            .flat_map(|unit| (0..kinds).map(move |kind| ChannelId::new(unit, kind)))
            .map(|id| Arc::new(make(id)))
            .collect();
        Self { kinds, channels }
    }

    /// Number of units.
    pub fn units(&self) -> usize {
        self.channels.len().checked_div(self.kinds).unwrap_or(0)
    }

    /// Number of kinds per unit.
    pub fn kinds(&self) -> usize {
        self.kinds
    }

    /// Look up a channel.
    ///
    /// # Errors
    ///
    /// `NotFound` for a unit beyond the table, `UnknownKind` for a kind the
    /// registry was not built with.
    pub fn get(&self, id: ChannelId) -> Result<&Arc<HardwareChannel<S>>> {
        let units = self.units();
        if id.unit >= units {
            return Err(ChannelError::NotFound {
                unit: id.unit,
                units,
            });
        }
        if id.kind >= self.kinds {
            return Err(ChannelError::UnknownKind {
                kind: id.kind,
                kinds: self.kinds,
            });
        }
        Ok(&self.channels[id.unit * self.kinds + id.kind])
    }

    /// All channels with their addresses, unit-major.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Arc<HardwareChannel<S>>)> + '_ {
        let kinds = self.kinds;
        self.channels
            .iter()
            .enumerate()
            .map(move |(index, channel)| (ChannelId::new(index / kinds, index % kinds), channel))
    }
}
