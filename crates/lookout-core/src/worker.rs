//! Verification worker and the single-flight lock that serializes it.

use crate::gallery::Identity;
use crate::match_state::MatchState;
use crate::matcher::{ComparisonError, Matcher};
use crate::preprocess::Snapshot;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Global lock allowing at most one verification attempt to run at a time.
///
/// Instrumented with acquisition and holder counters so the mutual
/// exclusion invariant can be observed.
#[derive(Default)]
pub struct VerificationLock {
    mutex: Mutex<()>,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
    acquisitions: AtomicU64,
}

/// Snapshot of [`VerificationLock`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub acquisitions: u64,
    pub holders: usize,
    pub peak_holders: usize,
}

/// Proof of holding the verification lock. Released on drop.
pub struct VerificationGuard<'a> {
    lock: &'a VerificationLock,
    _inner: MutexGuard<'a, ()>,
}

impl VerificationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other attempt holds the lock.
    pub fn acquire(&self) -> VerificationGuard<'_> {
        // The guarded value is (), so a poisoned lock carries no broken state.
        let inner = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_holders.fetch_max(now, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        VerificationGuard {
            lock: self,
            _inner: inner,
        }
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::SeqCst),
            holders: self.holders.load(Ordering::SeqCst),
            peak_holders: self.peak_holders.load(Ordering::SeqCst),
        }
    }
}

impl VerificationGuard<'_> {
    /// Whether this guard was taken from `lock`.
    pub(crate) fn is_from(&self, lock: &VerificationLock) -> bool {
        std::ptr::eq(self.lock, lock)
    }
}

impl Drop for VerificationGuard<'_> {
    fn drop(&mut self) {
        // Runs before the mutex guard field is dropped.
        self.lock.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of one verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Matched(Identity),
    NoMatch,
    /// A comparison failed; the state was reset to "no match".
    Failed,
}

/// Runs one identification attempt against the whole gallery and publishes
/// the result into [`MatchState`].
///
/// Workers serialize on the lock owned by their state, so every worker
/// writing one state shares one lock.
#[derive(Clone)]
pub struct VerificationWorker {
    state: Arc<MatchState>,
    matcher: Arc<dyn Matcher>,
}

impl VerificationWorker {
    pub fn new(state: Arc<MatchState>, matcher: Arc<dyn Matcher>) -> Self {
        Self { state, matcher }
    }

    pub fn lock(&self) -> &VerificationLock {
        self.state.lock()
    }

    pub fn state(&self) -> &Arc<MatchState> {
        &self.state
    }

    /// Compare `candidate` against the gallery in enumeration order.
    ///
    /// The first verified reference wins. Any comparison error aborts the
    /// attempt and clears the state. Errors are logged, never returned.
    pub fn run(&self, candidate: Snapshot) -> AttemptOutcome {
        tracing::debug!(sequence = candidate.sequence, "verification attempt queued");
        let guard = self.state.lock().acquire();
        tracing::debug!(sequence = candidate.sequence, "verification attempt started");

        let previous = self.state.current().cloned();

        let (index, outcome) = match self.first_match(&candidate) {
            Ok(Some(index)) => {
                let identity = self
                    .state
                    .gallery()
                    .identity(index)
                    .cloned()
                    .map(AttemptOutcome::Matched)
                    .unwrap_or(AttemptOutcome::NoMatch);
                (Some(index), identity)
            }
            Ok(None) => (None, AttemptOutcome::NoMatch),
            Err(err) => {
                tracing::warn!(
                    sequence = candidate.sequence,
                    error = %err,
                    "verification attempt failed; resetting to no match"
                );
                (None, AttemptOutcome::Failed)
            }
        };

        self.state.publish(&guard, index);

        let current = self.state.current();
        if current != previous.as_ref() {
            match current {
                Some(identity) => {
                    tracing::info!(sequence = candidate.sequence, identity = %identity, "identity matched")
                }
                None => tracing::info!(sequence = candidate.sequence, "no identity matched"),
            }
        } else {
            tracing::debug!(sequence = candidate.sequence, outcome = ?outcome, "verification attempt finished");
        }

        outcome
    }

    fn first_match(&self, candidate: &Snapshot) -> Result<Option<usize>, ComparisonError> {
        for (index, (identity, references)) in self.state.gallery().entries().enumerate() {
            tracing::trace!(identity = %identity, references = references.len(), "checking identity");
            for reference in references {
                let result = self.matcher.verify(candidate, reference)?;
                tracing::debug!(
                    identity = %identity,
                    reference = %reference.source.display(),
                    verified = result.verified,
                    distance = result.distance,
                    "compared against reference"
                );
                if result.verified {
                    return Ok(Some(index));
                }
            }
        }
        Ok(None)
    }
}
