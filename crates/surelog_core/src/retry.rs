//! The background retry worker.
//!
//! Each pass picks one sealed segment at random and offers every uncommitted
//! event in it to the processor again. Fully committed segments are deleted.
//! With nothing sealed, the worker sleeps until the next rotation.

use crate::manager::SegmentManager;
use crate::processing::{Attempt, TryCommit};
use crate::types::EventId;
use crate::wal::Segment;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Summary of one retry pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    /// There was nothing sealed; the worker waited for a rotation.
    Idle,
    /// A sealed segment was worked through.
    Worked {
        /// Events committed during the pass.
        committed: usize,
        /// Events still uncommitted afterwards.
        remaining: usize,
    },
}

pub(crate) struct RetryWorker<E> {
    manager: Arc<SegmentManager<E>>,
    try_commit: Arc<TryCommit<E>>,
    pause: Duration,
}

impl<E: Clone + Send + 'static> RetryWorker<E> {
    pub(crate) fn new(
        manager: Arc<SegmentManager<E>>,
        try_commit: Arc<TryCommit<E>>,
        pause: Duration,
    ) -> Self {
        Self {
            manager,
            try_commit,
            pause,
        }
    }

    pub(crate) fn run(self) {
        debug!("retry worker started");
        while !self.manager.is_stopped() {
            match self.pass() {
                Pass::Worked { committed: 0, .. } => self.manager.idle(self.pause),
                _ => thread::yield_now(),
            }
        }
        debug!("retry worker stopped");
    }

    /// Runs one pass over a randomly chosen sealed segment.
    pub(crate) fn pass(&self) -> Pass {
        let pause = self.manager.pause_rotation();
        let segment = match self.manager.random_sealed(&pause) {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                self.manager.await_next_rotation(pause);
                return Pass::Idle;
            }
            Err(e) => {
                error!(error = %e, "unable to open sealed segment");
                self.manager.await_next_rotation(pause);
                return Pass::Idle;
            }
        };

        let mut committed = 0;
        for (id, event) in segment.uncommitted_snapshot() {
            if self.manager.is_stopped() {
                break;
            }
            let settled = if self.try_commit.is_failed(id, &segment) {
                self.commit_failed(&segment, id)
            } else {
                match self.try_commit.attempt(&event, id, &segment) {
                    Ok(Attempt::Committed) => true,
                    Ok(Attempt::Deferred) => false,
                    Ok(Attempt::Failed(failure)) => {
                        failure.committed || self.commit_failed(&segment, id)
                    }
                    Err(e) => {
                        warn!(segment = %segment.location(), %id, error = %e, "unable to commit retried event");
                        false
                    }
                }
            };
            if settled {
                committed += 1;
            }
            thread::yield_now();
        }

        let remaining = segment.uncommitted_len();
        if remaining == 0 {
            if let Err(e) = self.manager.discard_sealed(&pause, segment) {
                error!(error = %e, "unable to remove committed segment");
            }
        } else if let Err(e) = segment.close() {
            warn!(segment = %segment.location(), error = %e, "unable to close sealed segment");
        }

        debug!(committed, remaining, "retry pass finished");
        Pass::Worked {
            committed,
            remaining,
        }
    }

    /// Commits an event that already failed terminally. Returns whether the
    /// COMMIT landed.
    fn commit_failed(&self, segment: &Segment<E>, id: EventId) -> bool {
        match self.try_commit.commit_failed(id, segment) {
            Ok(()) => true,
            Err(e) => {
                error!(segment = %segment.location(), %id, error = %e, "unable to commit failed event");
                false
            }
        }
    }
}
