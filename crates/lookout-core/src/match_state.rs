//! Single-slot holder for the currently identified identity.
//!
//! The state owns the verification lock that serializes its writers, and a
//! write must present a [`VerificationGuard`] taken from that lock. Reads
//! take no lock: the slot is one
//! atomic index into the immutable gallery, so a reader always sees either
//! the old or the new value, never a torn one.

use crate::gallery::{Identity, ReferenceGallery};
use crate::worker::{VerificationGuard, VerificationLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NO_MATCH: usize = usize::MAX;

pub struct MatchState {
    slot: AtomicUsize,
    gallery: Arc<ReferenceGallery>,
    lock: VerificationLock,
}

impl MatchState {
    /// Start in the "no match" state for identities of `gallery`.
    pub fn new(gallery: Arc<ReferenceGallery>) -> Self {
        Self {
            slot: AtomicUsize::new(NO_MATCH),
            gallery,
            lock: VerificationLock::new(),
        }
    }

    /// Latest published identity, or `None` for "no match".
    pub fn current(&self) -> Option<&Identity> {
        let index = self.slot.load(Ordering::Acquire);
        if index == NO_MATCH {
            return None;
        }
        self.gallery.identity(index)
    }

    /// Gallery whose identities this state indexes into.
    pub fn gallery(&self) -> &Arc<ReferenceGallery> {
        &self.gallery
    }

    /// The lock every writer of this state must hold.
    pub fn lock(&self) -> &VerificationLock {
        &self.lock
    }

    /// Overwrite the slot with the gallery identity at `index`, or clear it.
    ///
    /// Returns `false` without writing if `guard` belongs to another lock.
    pub(crate) fn publish(&self, guard: &VerificationGuard<'_>, index: Option<usize>) -> bool {
        if !guard.is_from(&self.lock) {
            tracing::error!("publish attempted with a foreign verification guard; ignored");
            return false;
        }
        let value = match index {
            Some(i) if i < self.gallery.len() => i,
            _ => NO_MATCH,
        };
        self.slot.store(value, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::ReferenceImage;
    use image::RgbImage;
    use std::path::PathBuf;

    fn gallery(names: &[&str]) -> Arc<ReferenceGallery> {
        let entries = names
            .iter()
            .map(|n| {
                (
                    Identity::new(*n),
                    vec![ReferenceImage {
                        source: PathBuf::from(format!("{n}.png")),
                        image: RgbImage::new(1, 1),
                    }],
                )
            })
            .collect();
        Arc::new(ReferenceGallery::from_entries(entries).unwrap())
    }

    #[test]
    fn test_starts_with_no_match() {
        let state = MatchState::new(gallery(&["Alen"]));
        assert!(state.current().is_none());
    }

    #[test]
    fn test_publish_overwrites() {
        let state = MatchState::new(gallery(&["Alen", "Emil"]));

        let guard = state.lock().acquire();
        assert!(state.publish(&guard, Some(1)));
        assert_eq!(state.current().map(Identity::as_str), Some("Emil"));

        state.publish(&guard, Some(0));
        assert_eq!(state.current().map(Identity::as_str), Some("Alen"));

        state.publish(&guard, None);
        assert!(state.current().is_none());
    }

    #[test]
    fn test_out_of_range_index_clears() {
        let state = MatchState::new(gallery(&["Alen"]));
        let guard = state.lock().acquire();
        state.publish(&guard, Some(0));
        state.publish(&guard, Some(5));
        assert!(state.current().is_none());
    }

    #[test]
    fn test_guard_from_another_lock_cannot_publish() {
        let state = MatchState::new(gallery(&["Alen", "Emil"]));
        let own = state.lock().acquire();
        assert!(state.publish(&own, Some(0)));
        drop(own);

        let unrelated = VerificationLock::new();
        let foreign = unrelated.acquire();
        assert!(!state.publish(&foreign, Some(1)));
        assert!(!state.publish(&foreign, None));
        assert_eq!(state.current().map(Identity::as_str), Some("Alen"));
    }

    #[test]
    fn test_states_do_not_share_locks() {
        let g = gallery(&["Alen"]);
        let a = MatchState::new(g.clone());
        let b = MatchState::new(g);
        let guard = a.lock().acquire();
        assert!(!b.publish(&guard, Some(0)));
        assert!(b.current().is_none());
    }
}
