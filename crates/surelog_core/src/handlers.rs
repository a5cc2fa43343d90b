//! Corruption and terminal-failure callbacks.
//!
//! Both handlers run on whichever thread detected the condition: the opening
//! thread, a submitter, or the retry worker. They must not block for long
//! and must not call back into the log.

use std::any::type_name;
use std::fmt;
use tracing::error;

/// Describes an unreadable tail found while recovering a segment.
///
/// Everything from `offset` to the end of the segment was discarded; the
/// segment was truncated to `offset` so later appends stay readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    /// Location of the segment, as reported by its directory.
    pub location: String,
    /// Offset of the first byte of the first unreadable record.
    pub offset: u64,
    /// Length of the segment before truncation.
    pub length: u64,
    /// Why the record could not be read.
    pub reason: String,
}

impl CorruptionReport {
    /// Number of bytes discarded from the tail.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.length.saturating_sub(self.offset)
    }
}

impl fmt::Display for CorruptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is corrupt at offset {} of {} ({})",
            self.location, self.offset, self.length, self.reason
        )
    }
}

/// Receives corruption reports.
pub trait CorruptionHandler: Send + Sync {
    /// Called once per corrupt segment tail, before it is truncated.
    fn on_corruption(&self, report: &CorruptionReport);
}

impl<F> CorruptionHandler for F
where
    F: Fn(&CorruptionReport) + Send + Sync,
{
    fn on_corruption(&self, report: &CorruptionReport) {
        self(report);
    }
}

/// Logs corruption at `error` level. Used when no handler is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCorruption;

impl CorruptionHandler for LogCorruption {
    fn on_corruption(&self, report: &CorruptionReport) {
        error!(
            segment = %report.location,
            offset = report.offset,
            length = report.length,
            reason = %report.reason,
            "corrupt segment tail discarded"
        );
    }
}

/// Receives events whose processing failed terminally.
///
/// The forced COMMIT has been attempted when this runs. If it did not
/// reach disk, the retry worker appends it later.
pub trait FailureHandler<E>: Send + Sync {
    /// Called exactly once for each terminally failed event while the log
    /// stays open. An event whose forced commit did not reach disk may be
    /// reported again after a restart.
    fn on_terminal_failure(&self, event: &E);
}

impl<E, F> FailureHandler<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_terminal_failure(&self, event: &E) {
        self(event);
    }
}

/// Logs terminal failures at `error` level. Used when no handler is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailure;

impl<E> FailureHandler<E> for LogFailure {
    fn on_terminal_failure(&self, _event: &E) {
        error!(event_type = type_name::<E>(), "event failed terminally and was dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn report() -> CorruptionReport {
        CorruptionReport {
            location: "memory:part.current".into(),
            offset: 40,
            length: 47,
            reason: "record truncated".into(),
        }
    }

    #[test]
    fn report_display_and_discarded() {
        let report = report();
        assert_eq!(report.discarded(), 7);
        assert_eq!(
            report.to_string(),
            "memory:part.current is corrupt at offset 40 of 47 (record truncated)"
        );
    }

    #[test]
    fn closures_are_handlers() {
        let seen = Mutex::new(Vec::new());
        let handler = |r: &CorruptionReport| seen.lock().push(r.offset);
        handler.on_corruption(&report());
        assert_eq!(*seen.lock(), vec![40]);

        let failed = Mutex::new(Vec::new());
        let failures = |e: &String| failed.lock().push(e.clone());
        failures.on_terminal_failure(&"boom".to_string());
        assert_eq!(*failed.lock(), vec!["boom".to_string()]);
    }

    #[test]
    fn logging_handlers_accept_anything() {
        LogCorruption.on_corruption(&report());
        FailureHandler::<u64>::on_terminal_failure(&LogFailure, &7);
    }
}
