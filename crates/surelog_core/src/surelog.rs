//! The log facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::handlers::{CorruptionHandler, FailureHandler, LogCorruption, LogFailure};
use crate::inspect::scan_segment;
use crate::manager::{sealed_segments, SegmentManager};
use crate::processing::{
    Attempt, Disposition, EventProcessor, ProcessingFault, TerminalFailure, TryCommit,
};
use crate::retry::RetryWorker;
use crate::types::EventId;
use crate::wal::{BeginOutcome, Segment, SegmentContext};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use surelog_codec::EventCodec;
use surelog_storage::{FileDirectory, StorageDirectory, StorageError};
use tracing::{debug, info, warn};

/// Helps closures infer their signature as processors.
///
/// ```
/// use surelog_core::{processor_fn, Disposition};
///
/// let processor = processor_fn(|line: &String| {
///     println!("{line}");
///     Ok(Disposition::Handled)
/// });
/// # let _ = processor;
/// ```
pub fn processor_fn<E, F>(f: F) -> F
where
    F: Fn(&E) -> Result<Disposition, ProcessingFault> + Send + Sync,
{
    f
}

/// What happened to a submitted event.
#[derive(Debug)]
pub enum Submission {
    /// The processor handled the event and it was committed.
    Processed {
        /// Id within the current segment.
        id: EventId,
    },
    /// The processor could not handle it yet; the retry worker will offer
    /// it again after the segment is sealed.
    Deferred {
        /// Id within the current segment.
        id: EventId,
    },
    /// The processor faulted; the event was dropped and reported.
    Failed(TerminalFailure),
}

impl Submission {
    fn from_attempt(id: EventId, attempt: Attempt) -> Self {
        match attempt {
            Attempt::Committed => Self::Processed { id },
            Attempt::Deferred => Self::Deferred { id },
            Attempt::Failed(failure) => Self::Failed(failure),
        }
    }

    /// The event's id.
    pub fn id(&self) -> EventId {
        match self {
            Self::Processed { id } | Self::Deferred { id } => *id,
            Self::Failed(failure) => failure.id,
        }
    }

    /// Returns `true` if the event was handled and committed.
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed { .. })
    }

    /// Returns `true` if the event awaits retry.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }

    /// The terminal failure, if any.
    pub fn failure(&self) -> Option<&TerminalFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// An uncommitted event and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent<E> {
    /// Location of the segment holding it.
    pub segment: String,
    /// Id within that segment.
    pub id: EventId,
    /// The event.
    pub event: E,
}

enum DirectorySource {
    Shared(Arc<dyn StorageDirectory>),
    Path(PathBuf),
}

/// Configures and opens a [`SureLog`].
pub struct SureLogBuilder<E> {
    directory: DirectorySource,
    codec: Arc<dyn EventCodec<E>>,
    processor: Arc<dyn EventProcessor<E>>,
    corruption: Arc<dyn CorruptionHandler>,
    failures: Arc<dyn FailureHandler<E>>,
    config: Config,
}

impl<E: Clone + Send + 'static> SureLogBuilder<E> {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the corruption handler. Defaults to [`LogCorruption`].
    #[must_use]
    pub fn corruption_handler(mut self, handler: impl CorruptionHandler + 'static) -> Self {
        self.corruption = Arc::new(handler);
        self
    }

    /// Sets the failure handler. Defaults to [`LogFailure`].
    #[must_use]
    pub fn failure_handler(mut self, handler: impl FailureHandler<E> + 'static) -> Self {
        self.failures = Arc::new(handler);
        self
    }

    /// Opens the log and starts its background threads.
    ///
    /// Segments left by an earlier run are verified and recovered; their
    /// uncommitted events are retried in the background.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, a missing directory that
    /// may not be created, segments written for another event type or
    /// format version, or on storage failure.
    pub fn open(self) -> CoreResult<SureLog<E>> {
        self.config.validate()?;

        let directory = match self.directory {
            DirectorySource::Shared(directory) => directory,
            DirectorySource::Path(path) => {
                Arc::new(FileDirectory::open(&path, self.config.create_if_missing)?)
            }
        };

        let context = SegmentContext::new(self.codec, self.corruption, self.config.max_event_id);
        let manager = Arc::new(SegmentManager::open(directory, context)?);
        let try_commit = Arc::new(TryCommit::new(
            self.processor,
            self.failures,
            Arc::clone(manager.failed_events()),
        ));
        let log = SureLog {
            manager,
            try_commit,
            config: self.config,
        };

        let worker = RetryWorker::new(
            Arc::clone(&log.manager),
            Arc::clone(&log.try_commit),
            log.config.retry_pause,
        );
        log.manager.spawn_worker("surelog-retry", move || worker.run())?;
        log.manager.start_rotation_timer(log.config.rotation_interval)?;

        info!(
            rotation_interval = ?log.config.rotation_interval,
            max_event_id = log.config.max_event_id,
            "log opened"
        );
        Ok(log)
    }
}

/// A durable at-least-once event log.
///
/// [`SureLog::submit`] makes an event durable, offers it to the processor
/// right away and commits it if handled. Events that are not handled yet
/// stay in the log and are offered again by a background worker after the
/// next rotation, until handled or faulted.
///
/// # Opening a Log
///
/// ```rust,no_run
/// use serde::{Deserialize, Serialize};
/// use surelog_codec::CborCodec;
/// use surelog_core::{processor_fn, Disposition, SureLog};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Email {
///     to: String,
/// }
///
/// let log = SureLog::open_dir(
///     "/var/lib/mailer/log",
///     CborCodec::<Email>::with_descriptor("mailer.Email/v1"),
///     processor_fn(|email: &Email| {
///         println!("sending to {}", email.to);
///         Ok(Disposition::Handled)
///     }),
/// )?;
///
/// log.submit(&Email { to: "ops@example.com".into() })?;
/// log.close()?;
/// # Ok::<(), surelog_core::CoreError>(())
/// ```
pub struct SureLog<E> {
    manager: Arc<SegmentManager<E>>,
    try_commit: Arc<TryCommit<E>>,
    config: Config,
}

impl<E: Clone + Send + 'static> SureLog<E> {
    /// Starts building a log over any storage directory.
    pub fn builder(
        directory: impl StorageDirectory + 'static,
        codec: impl EventCodec<E> + 'static,
        processor: impl EventProcessor<E> + 'static,
    ) -> SureLogBuilder<E> {
        Self::builder_from(DirectorySource::Shared(Arc::new(directory)), codec, processor)
    }

    /// Starts building a log in a file system directory.
    ///
    /// The directory is created on open unless
    /// [`Config::create_if_missing`] is unset.
    pub fn builder_at(
        path: impl AsRef<Path>,
        codec: impl EventCodec<E> + 'static,
        processor: impl EventProcessor<E> + 'static,
    ) -> SureLogBuilder<E> {
        Self::builder_from(DirectorySource::Path(path.as_ref().to_path_buf()), codec, processor)
    }

    fn builder_from(
        directory: DirectorySource,
        codec: impl EventCodec<E> + 'static,
        processor: impl EventProcessor<E> + 'static,
    ) -> SureLogBuilder<E> {
        SureLogBuilder {
            directory,
            codec: Arc::new(codec),
            processor: Arc::new(processor),
            corruption: Arc::new(LogCorruption),
            failures: Arc::new(LogFailure),
            config: Config::default(),
        }
    }

    /// Opens a log in a file system directory with default settings.
    ///
    /// # Errors
    ///
    /// See [`SureLogBuilder::open`].
    pub fn open_dir(
        path: impl AsRef<Path>,
        codec: impl EventCodec<E> + 'static,
        processor: impl EventProcessor<E> + 'static,
    ) -> CoreResult<Self> {
        Self::builder_at(path, codec, processor).open()
    }

    /// Makes `event` durable, then offers it to the processor.
    ///
    /// When this returns `Ok`, the event has been handled, will be retried,
    /// or has been reported to the failure handler. It may be offered to
    /// the processor more than once.
    ///
    /// # Errors
    ///
    /// [`CoreError::Durability`] means the event's fate is unknown: it may
    /// or may not be processed later. [`CoreError::Closed`] means the log
    /// was shut down.
    pub fn submit(&self, event: &E) -> CoreResult<Submission> {
        loop {
            if self.manager.is_stopped() {
                return Err(CoreError::Closed);
            }

            let pause = self.manager.pause_rotation();
            let segment = Arc::clone(pause.current());
            let outcome = match segment.begin(event) {
                Ok(outcome) => outcome,
                Err(CoreError::SegmentClosed { .. }) if self.manager.is_stopped() => {
                    return Err(CoreError::Closed);
                }
                Err(e) => return Err(e),
            };

            match outcome {
                BeginOutcome::Begun(id) => {
                    let attempt = self.try_commit.attempt(event, id, &segment);
                    drop(pause);
                    if segment.needs_rotation() {
                        self.rotate_exhausted(&segment);
                    }
                    return attempt.map(|attempt| Submission::from_attempt(id, attempt));
                }
                BeginOutcome::RotationRequired => {
                    drop(pause);
                    debug!(segment = %segment.location(), "segment out of ids; rotating");
                    self.manager.rotate_if_current(&segment)?;
                }
            }
        }
    }

    fn rotate_exhausted(&self, segment: &Arc<Segment<E>>) {
        if let Err(e) = self.manager.rotate_if_current(segment) {
            warn!(segment = %segment.location(), error = %e, "unable to rotate exhausted segment");
        }
    }

    /// Seals the current segment now instead of waiting for the timer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or a storage error.
    pub fn rotate(&self) -> CoreResult<()> {
        self.manager.rotate()
    }

    /// Returns every uncommitted event, sealed segments first.
    ///
    /// Sealed segments are read without modifying them, so a segment the
    /// retry worker is committing into may be slightly out of date.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be read.
    pub fn pending(&self) -> CoreResult<Vec<PendingEvent<E>>> {
        let pause = self.manager.pause_rotation();
        let directory = self.manager.directory();
        let codec = self.manager.context().codec();

        let mut pending = Vec::new();
        for (_, name) in sealed_segments(&**directory)? {
            let scan = match scan_segment(&**directory, &name, codec, false) {
                Ok(scan) => scan,
                Err(CoreError::Storage(StorageError::NotFound { .. })) => continue,
                Err(e) => return Err(e),
            };
            pending.extend(scan.uncommitted.into_iter().map(|(id, event)| PendingEvent {
                segment: scan.location.clone(),
                id,
                event,
            }));
        }

        let current = pause.current();
        pending.extend(current.uncommitted_snapshot().into_iter().map(|(id, event)| PendingEvent {
            segment: current.location().to_string(),
            id,
            event,
        }));
        Ok(pending)
    }

    /// Number of rotations since the log opened.
    pub fn rotations(&self) -> u64 {
        self.manager.generation()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the storage directory.
    pub fn directory(&self) -> &Arc<dyn StorageDirectory> {
        self.manager.directory()
    }

    /// Returns `true` until [`SureLog::close`].
    pub fn is_open(&self) -> bool {
        !self.manager.is_stopped()
    }

    /// Stops the background threads and closes the current segment,
    /// deleting it if fully committed. Idempotent.
    ///
    /// Uncommitted events stay on disk and are retried on the next open.
    ///
    /// # Errors
    ///
    /// Returns an error if the current segment cannot be synced or removed.
    pub fn close(&self) -> CoreResult<()> {
        self.manager.shutdown()
    }
}

impl<E> fmt::Debug for SureLog<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SureLog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E> Drop for SureLog<E> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.shutdown() {
            warn!(error = %e, "shutdown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CorruptionReport;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use surelog_codec::BytesCodec;
    use surelog_storage::InMemoryDirectory;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn config() -> Config {
        Config::new()
            .rotation_interval(Duration::from_secs(3600))
            .retry_pause(Duration::from_millis(1))
    }

    #[test]
    fn handled_events_are_committed_immediately() {
        let dir = InMemoryDirectory::new();
        let log = SureLog::builder(
            dir.clone(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::Handled)),
        )
        .config(config())
        .open()
        .unwrap();

        for expected in 1..=3 {
            let submission = log.submit(&b"event".to_vec()).unwrap();
            assert!(submission.is_processed());
            assert_eq!(submission.id(), EventId::new(expected));
        }
        assert!(log.pending().unwrap().is_empty());

        log.close().unwrap();
        assert!(!log.is_open());
        assert!(dir.list().unwrap().is_empty());
    }

    #[test]
    fn deferred_events_are_retried_after_rotation() {
        let ready = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&ready);
        let log = SureLog::builder(
            InMemoryDirectory::new(),
            BytesCodec::default(),
            processor_fn(move |_: &Vec<u8>| {
                Ok(if gate.load(Ordering::SeqCst) {
                    Disposition::Handled
                } else {
                    Disposition::NotYet
                })
            }),
        )
        .config(config())
        .open()
        .unwrap();

        for _ in 0..3 {
            assert!(log.submit(&b"later".to_vec()).unwrap().is_deferred());
        }
        assert_eq!(log.pending().unwrap().len(), 3);

        ready.store(true, Ordering::SeqCst);
        log.rotate().unwrap();
        assert!(wait_until(|| log.pending().unwrap().is_empty()));
    }

    #[test]
    fn faults_are_reported_once() {
        let failed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failed);
        let log = SureLog::builder(
            InMemoryDirectory::new(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Err("rejected".into())),
        )
        .config(config())
        .failure_handler(move |event: &Vec<u8>| sink.lock().push(event.clone()))
        .open()
        .unwrap();

        let submission = log.submit(&b"bad".to_vec()).unwrap();
        let failure = submission.failure().unwrap();
        assert!(failure.committed);
        assert_eq!(*failed.lock(), vec![b"bad".to_vec()]);
        assert!(log.pending().unwrap().is_empty());
    }

    #[test]
    fn exhausted_segments_rotate() {
        let dir = InMemoryDirectory::new();
        let log = SureLog::builder(
            dir.clone(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::NotYet)),
        )
        .config(config().max_event_id(2))
        .open()
        .unwrap();

        let ids: Vec<u32> = (0..5)
            .map(|_| log.submit(&b"x".to_vec()).unwrap().id().as_u32())
            .collect();
        assert_eq!(ids, vec![1, 2, 1, 2, 1]);
        assert_eq!(log.rotations(), 2);
        assert_eq!(log.pending().unwrap().len(), 5);
    }

    #[test]
    fn submit_after_close_fails() {
        let log = SureLog::builder(
            InMemoryDirectory::new(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::Handled)),
        )
        .config(config())
        .open()
        .unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(log.submit(&vec![1]), Err(CoreError::Closed)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SureLog::builder(
            InMemoryDirectory::new(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::Handled)),
        )
        .config(config().max_event_id(0))
        .open();
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn corruption_handler_sees_torn_current_segment() {
        let dir = InMemoryDirectory::new();
        {
            let log = SureLog::builder(
                dir.clone(),
                BytesCodec::default(),
                processor_fn(|_: &Vec<u8>| Ok(Disposition::NotYet)),
            )
            .config(config())
            .open()
            .unwrap();
            log.submit(&b"kept".to_vec()).unwrap();
        }
        let mut bytes = dir.contents("part.current").unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        dir.put("part.current", bytes);

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let log = SureLog::builder(
            dir.clone(),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::NotYet)),
        )
        .config(config())
        .corruption_handler(move |r: &CorruptionReport| sink.lock().push(r.clone()))
        .open()
        .unwrap();

        assert!(wait_until(|| !reports.lock().is_empty()));
        assert_eq!(reports.lock()[0].location, "memory:part.0");
        assert_eq!(log.pending().unwrap().len(), 1);
    }

    #[test]
    fn missing_directory_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let result = SureLog::builder_at(
            dir.path().join("absent"),
            BytesCodec::default(),
            processor_fn(|_: &Vec<u8>| Ok(Disposition::Handled)),
        )
        .config(config().create_if_missing(false))
        .open();
        assert!(matches!(
            result,
            Err(CoreError::Storage(StorageError::MissingDirectory { .. }))
        ));
    }
}
