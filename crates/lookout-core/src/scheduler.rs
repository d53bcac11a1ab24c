//! Fixed-period sampling of captured frames into verification attempts.

use crate::frame::Frame;
use crate::preprocess;
use crate::worker::VerificationWorker;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("sampling period must be >= 1")]
    InvalidPeriod,
}

/// What to do with a sampling trigger while an attempt is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// Skip the trigger; at most one attempt exists at any time.
    #[default]
    Coalesce,
    /// Launch anyway; the new worker queues on the verification lock.
    Queue,
}

/// What the scheduler did with one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a sampling frame.
    Skipped,
    /// A verification worker was launched.
    Launched,
    /// Sampling frame dropped because an attempt was already in flight.
    Coalesced,
    /// Sampling frame could not be preprocessed.
    PreprocessFailed,
    /// The worker thread could not be spawned.
    SpawnFailed,
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts one launched attempt until dropped.
struct InFlightTicket(Arc<InFlight>);

impl InFlightTicket {
    fn issue(tracker: &Arc<InFlight>) -> Self {
        *tracker.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Self(tracker.clone())
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Decides, per captured frame, whether to launch a verification worker.
///
/// Launches are fire-and-forget on dedicated threads; `on_frame` never
/// blocks on verification work.
pub struct SamplingScheduler {
    worker: VerificationWorker,
    period: u64,
    policy: DispatchPolicy,
    counter: u64,
    in_flight: Arc<InFlight>,
}

impl SamplingScheduler {
    pub fn new(
        worker: VerificationWorker,
        period: u64,
        policy: DispatchPolicy,
    ) -> Result<Self, SchedulerError> {
        if period < 1 {
            return Err(SchedulerError::InvalidPeriod);
        }
        Ok(Self {
            worker,
            period,
            policy,
            counter: 0,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Whether the frame with this counter value triggers an attempt.
    pub fn is_sampling_frame(&self, counter: u64) -> bool {
        counter % self.period == 0
    }

    /// Count a captured frame and launch an attempt if it is a sampling frame.
    pub fn on_frame(&mut self, frame: &Frame) -> Dispatch {
        let counter = self.counter;
        self.counter += 1;

        if !self.is_sampling_frame(counter) {
            return Dispatch::Skipped;
        }

        if self.policy == DispatchPolicy::Coalesce && self.in_flight() > 0 {
            tracing::debug!(counter, "verification in flight; coalescing sample");
            return Dispatch::Coalesced;
        }

        let snapshot = match preprocess::preprocess_frame(frame, counter) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(counter, error = %err, "frame preprocessing failed; skipping dispatch");
                return Dispatch::PreprocessFailed;
            }
        };

        let ticket = InFlightTicket::issue(&self.in_flight);
        let worker = self.worker.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("lookout-verify-{counter}"))
            .spawn(move || {
                let _ticket = ticket;
                worker.run(snapshot);
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(counter, in_flight = self.in_flight(), "verification dispatched");
                Dispatch::Launched
            }
            Err(err) => {
                tracing::warn!(counter, error = %err, "failed to spawn verification worker");
                Dispatch::SpawnFailed
            }
        }
    }

    /// Frames counted so far.
    pub fn frames_seen(&self) -> u64 {
        self.counter
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Launched attempts that have not yet finished (running or queued).
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Block until every launched attempt has finished.
    pub fn wait_idle(&self) {
        let mut count = self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .in_flight
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with an upper bound. Returns
    /// `true` if idle was reached.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let count = self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .in_flight
            .idle
            .wait_timeout_while(count, timeout, |c| *c > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count == 0
    }

    pub fn worker(&self) -> &VerificationWorker {
        &self.worker
    }
}
