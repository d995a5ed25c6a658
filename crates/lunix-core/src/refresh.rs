//! Staleness test and the rendering seam of the refresh protocol.
//!
//! Refreshing a cache means: decide whether the channel has moved past the
//! cached timestamp, snapshot the raw sample under the fast lock, then
//! convert and format it with only the per-client slow lock held. The
//! snapshot/publish half lives on [`CacheGuard::update`](crate::CacheGuard::update);
//! this module holds the pieces it is parameterised by.

use bytes::BytesMut;

/// Turns a raw sample into the bytes clients read.
///
/// Implementations run outside the channel's fast lock and may take their
/// time; they must be pure with respect to the sample (same input, same
/// output) and must not block on the channel they render for.
pub trait Render<S>: Send + Sync {
    /// Append the rendering of `sample` to `out`.
    fn render(&self, sample: &S, out: &mut BytesMut);
}

impl<S, F> Render<S> for F
where
    F: Fn(&S, &mut BytesMut) + Send + Sync,
{
    fn render(&self, sample: &S, out: &mut BytesMut) {
        self(sample, out)
    }
}

/// Whether a cache computed at `cached` is older than a channel at `channel_update`.
///
/// `None` marks a cache that has never been computed; it always needs a
/// refresh, even against a channel that has not published anything yet.
pub fn needs_refresh(cached: Option<u64>, channel_update: u64) -> bool {
    match cached {
        None => true,
        Some(stamp) => channel_update > stamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_computed_always_refreshes() {
        assert!(needs_refresh(None, 0));
        assert!(needs_refresh(None, 17));
    }

    #[test]
    fn test_refresh_only_when_strictly_newer() {
        assert!(!needs_refresh(Some(0), 0));
        assert!(!needs_refresh(Some(5), 5));
        assert!(needs_refresh(Some(5), 6));
    }

    #[test]
    fn test_closure_renders() {
        let render =
            |sample: &u32, out: &mut BytesMut| out.extend_from_slice(&sample.to_le_bytes());
        let mut out = BytesMut::new();
        Render::render(&render, &7u32, &mut out);
        assert_eq!(&out[..], &[7, 0, 0, 0]);
    }
}
