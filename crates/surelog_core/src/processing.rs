//! Event processors and the try-then-commit step.

use crate::error::CoreResult;
use crate::handlers::FailureHandler;
use crate::types::EventId;
use crate::wal::Segment;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// A processing fault. Faults are terminal: the event is not retried.
pub type ProcessingFault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a processor did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event is done and may be committed.
    Handled,
    /// The event could not be handled yet; retry it later.
    NotYet,
}

/// Processes events.
///
/// Called from submitting threads and from the retry worker, possibly
/// concurrently and possibly more than once per event. A panic is treated
/// like a returned fault.
pub trait EventProcessor<E>: Send + Sync {
    /// Processes one event.
    ///
    /// # Errors
    ///
    /// A returned fault makes the failure terminal.
    fn process(&self, event: &E) -> Result<Disposition, ProcessingFault>;
}

impl<E, F> EventProcessor<E> for F
where
    F: Fn(&E) -> Result<Disposition, ProcessingFault> + Send + Sync,
{
    fn process(&self, event: &E) -> Result<Disposition, ProcessingFault> {
        self(event)
    }
}

/// An event that failed terminally.
///
/// The failure handler has already been told about it.
#[derive(Debug, Error)]
#[error("{id} in {segment} failed terminally: {fault}")]
pub struct TerminalFailure {
    /// Id of the failed event.
    pub id: EventId,
    /// Location of the segment holding it.
    pub segment: String,
    /// Whether the forced COMMIT reached disk. If not, the event remains
    /// uncommitted and, while this log stays open, the retry worker commits
    /// it later without processing it again. After a restart it is offered
    /// to the processor again like any other uncommitted event.
    pub committed: bool,
    /// The fault.
    #[source]
    pub fault: ProcessingFault,
}

/// Outcome of one processing attempt.
#[derive(Debug)]
pub enum Attempt {
    /// Handled and committed.
    Committed,
    /// Not handled yet; left uncommitted for retry.
    Deferred,
    /// Failed terminally.
    Failed(TerminalFailure),
}

/// Events that failed terminally but whose forced COMMIT did not reach
/// disk, by segment name.
///
/// Entries follow their segment through renames and go away with it.
#[derive(Debug, Default)]
pub(crate) struct FailedEvents {
    by_segment: Mutex<HashMap<String, BTreeSet<EventId>>>,
}

impl FailedEvents {
    pub(crate) fn record(&self, segment: &str, id: EventId) {
        self.by_segment
            .lock()
            .entry(segment.to_string())
            .or_default()
            .insert(id);
    }

    pub(crate) fn contains(&self, segment: &str, id: EventId) -> bool {
        self.by_segment
            .lock()
            .get(segment)
            .is_some_and(|ids| ids.contains(&id))
    }

    pub(crate) fn forget(&self, segment: &str, id: EventId) {
        let mut by_segment = self.by_segment.lock();
        if let Some(ids) = by_segment.get_mut(segment) {
            ids.remove(&id);
            if ids.is_empty() {
                by_segment.remove(segment);
            }
        }
    }

    pub(crate) fn renamed(&self, from: &str, to: &str) {
        let mut by_segment = self.by_segment.lock();
        if let Some(ids) = by_segment.remove(from) {
            by_segment.insert(to.to_string(), ids);
        }
    }

    pub(crate) fn discard(&self, segment: &str) {
        self.by_segment.lock().remove(segment);
    }

    pub(crate) fn len(&self) -> usize {
        self.by_segment.lock().values().map(BTreeSet::len).sum()
    }
}

/// Runs the processor on an event and commits it when appropriate.
pub(crate) struct TryCommit<E> {
    processor: Arc<dyn EventProcessor<E>>,
    failures: Arc<dyn FailureHandler<E>>,
    failed: Arc<FailedEvents>,
}

impl<E> TryCommit<E> {
    pub(crate) fn new(
        processor: Arc<dyn EventProcessor<E>>,
        failures: Arc<dyn FailureHandler<E>>,
        failed: Arc<FailedEvents>,
    ) -> Self {
        Self {
            processor,
            failures,
            failed,
        }
    }

    /// Returns `true` if `id` in `segment` already failed terminally and
    /// only its COMMIT is missing.
    pub(crate) fn is_failed(&self, id: EventId, segment: &Segment<E>) -> bool {
        self.failed.contains(segment.name(), id)
    }

    /// Commits an event that already failed terminally, without offering it
    /// to the processor or the failure handler again.
    pub(crate) fn commit_failed(&self, id: EventId, segment: &Segment<E>) -> CoreResult<()>
    where
        E: Clone,
    {
        segment.commit(id)?;
        self.failed.forget(segment.name(), id);
        Ok(())
    }

    /// Processes `event` (issued `id` in `segment`).
    ///
    /// - handled: commit, propagating a failed commit
    /// - not yet: nothing
    /// - fault: commit best-effort, then notify the failure handler once
    pub(crate) fn attempt(&self, event: &E, id: EventId, segment: &Segment<E>) -> CoreResult<Attempt>
    where
        E: Clone,
    {
        match self.run_processor(event) {
            Ok(Disposition::Handled) => {
                segment.commit(id)?;
                Ok(Attempt::Committed)
            }
            Ok(Disposition::NotYet) => Ok(Attempt::Deferred),
            Err(fault) => {
                warn!(segment = %segment.location(), %id, error = %fault, "event failed terminally");
                let committed = match segment.commit(id) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            segment = %segment.location(),
                            %id,
                            error = %e,
                            "unable to commit failed event"
                        );
                        self.failed.record(segment.name(), id);
                        false
                    }
                };
                self.failures.on_terminal_failure(event);
                Ok(Attempt::Failed(TerminalFailure {
                    id,
                    segment: segment.location().to_string(),
                    committed,
                    fault,
                }))
            }
        }
    }

    fn run_processor(&self, event: &E) -> Result<Disposition, ProcessingFault> {
        catch_unwind(AssertUnwindSafe(|| self.processor.process(event)))
            .unwrap_or_else(|panic| Err(format!("processor panicked: {}", panic_message(&*panic)).into()))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
