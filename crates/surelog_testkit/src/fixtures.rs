//! Test fixtures and log helpers.
//!
//! Provides a sample event type, scripted processors, recording handlers
//! and temporary logs wired up with all of them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use surelog_codec::CborCodec;
use surelog_core::{
    Config, CoreResult, CorruptionHandler, CorruptionReport, Disposition, EventProcessor,
    FailureHandler, ProcessingFault, SureLog,
};
use surelog_storage::{FileDirectory, StorageDirectory};
use tempfile::TempDir;

/// How long helpers wait for background work before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Descriptor written into segments holding [`Parcel`] events.
pub const PARCEL_DESCRIPTOR: &str = "testkit.Parcel/v1";

/// A sample event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Parcel {
    /// Tracking number.
    pub number: u64,
    /// Destination.
    pub route: String,
}

impl Parcel {
    /// Creates a parcel.
    pub fn new(number: u64, route: impl Into<String>) -> Self {
        Self {
            number,
            route: route.into(),
        }
    }
}

/// The codec used for [`Parcel`] logs.
pub fn parcel_codec() -> CborCodec<Parcel> {
    CborCodec::with_descriptor(PARCEL_DESCRIPTOR)
}

/// Settings that keep tests fast: no timer rotations during a test, and a
/// short rest between unproductive retry passes.
pub fn fast_config() -> Config {
    Config::new()
        .rotation_interval(Duration::from_secs(3600))
        .retry_pause(Duration::from_millis(2))
}

/// What a [`ScriptedProcessor`] does with the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Return [`Disposition::Handled`].
    Handle,
    /// Return [`Disposition::NotYet`].
    Defer,
    /// Return a fault.
    Fault,
    /// Panic.
    Panic,
}

struct ScriptState<E> {
    script: Mutex<Script>,
    poison: Mutex<Option<Box<dyn Fn(&E) -> bool + Send + Sync>>>,
    seen: Mutex<Vec<E>>,
    handled: Mutex<Vec<E>>,
}

/// A processor whose behavior can be switched while a log runs.
///
/// Clones share state, so a test can keep one handle and give another to
/// the log.
pub struct ScriptedProcessor<E> {
    state: Arc<ScriptState<E>>,
}

impl<E> Clone for ScriptedProcessor<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E: Clone> ScriptedProcessor<E> {
    /// Creates a processor following `script`.
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(ScriptState {
                script: Mutex::new(script),
                poison: Mutex::new(None),
                seen: Mutex::new(Vec::new()),
                handled: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Switches the script.
    pub fn set(&self, script: Script) {
        *self.state.script.lock() = script;
    }

    /// Makes every event matching `predicate` fault, whatever the script.
    pub fn poison(&self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) {
        *self.state.poison.lock() = Some(Box::new(predicate));
    }

    /// Every event offered so far, in order, including repeats.
    pub fn seen(&self) -> Vec<E> {
        self.state.seen.lock().clone()
    }

    /// Every event handled so far.
    pub fn handled(&self) -> Vec<E> {
        self.state.handled.lock().clone()
    }
}

impl<E: Clone + Send> EventProcessor<E> for ScriptedProcessor<E> {
    fn process(&self, event: &E) -> Result<Disposition, ProcessingFault> {
        self.state.seen.lock().push(event.clone());

        let poisoned = self
            .state
            .poison
            .lock()
            .as_ref()
            .is_some_and(|predicate| predicate(event));
        let script = if poisoned {
            Script::Fault
        } else {
            *self.state.script.lock()
        };

        match script {
            Script::Handle => {
                self.state.handled.lock().push(event.clone());
                Ok(Disposition::Handled)
            }
            Script::Defer => Ok(Disposition::NotYet),
            Script::Fault => Err("scripted fault".into()),
            Script::Panic => panic!("scripted panic"),
        }
    }
}

/// A failure handler that records every event it is given.
pub struct RecordingFailures<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for RecordingFailures<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E: Clone> RecordingFailures<E> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Events reported so far.
    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }
}

impl<E: Clone> Default for RecordingFailures<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send> FailureHandler<E> for RecordingFailures<E> {
    fn on_terminal_failure(&self, event: &E) {
        self.events.lock().push(event.clone());
    }
}

/// A corruption handler that records every report.
#[derive(Clone, Default)]
pub struct RecordingCorruption {
    reports: Arc<Mutex<Vec<CorruptionReport>>>,
}

impl RecordingCorruption {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far.
    pub fn reports(&self) -> Vec<CorruptionReport> {
        self.reports.lock().clone()
    }
}

impl CorruptionHandler for RecordingCorruption {
    fn on_corruption(&self, report: &CorruptionReport) {
        self.reports.lock().push(report.clone());
    }
}

/// A temporary log directory with recording collaborators.
///
/// The directory outlives any number of opened logs, so a test can close
/// and reopen to simulate restarts.
pub struct TestLog {
    temp_dir: TempDir,
    /// Processor given to every opened log.
    pub processor: ScriptedProcessor<Parcel>,
    /// Failure handler given to every opened log.
    pub failures: RecordingFailures<Parcel>,
    /// Corruption handler given to every opened log.
    pub corruption: RecordingCorruption,
}

impl TestLog {
    /// Creates an empty log directory with a processor that handles
    /// everything.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            processor: ScriptedProcessor::new(Script::Handle),
            failures: RecordingFailures::new(),
            corruption: RecordingCorruption::new(),
        }
    }

    /// Returns the log directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens the log with [`fast_config`].
    pub fn open(&self) -> SureLog<Parcel> {
        self.open_with(fast_config()).expect("Failed to open log")
    }

    /// Opens the log with `config`.
    pub fn open_with(&self, config: Config) -> CoreResult<SureLog<Parcel>> {
        SureLog::builder_at(self.path(), parcel_codec(), self.processor.clone())
            .config(config)
            .failure_handler(self.failures.clone())
            .corruption_handler(self.corruption.clone())
            .open()
    }

    /// Opens the log over another directory, such as a
    /// [`FailingDirectory`](crate::crash::FailingDirectory) wrapped around
    /// this one.
    pub fn open_over(
        &self,
        directory: impl StorageDirectory + 'static,
        config: Config,
    ) -> CoreResult<SureLog<Parcel>> {
        SureLog::builder(directory, parcel_codec(), self.processor.clone())
            .config(config)
            .failure_handler(self.failures.clone())
            .corruption_handler(self.corruption.clone())
            .open()
    }

    /// Opens the directory for direct file access.
    pub fn directory(&self) -> FileDirectory {
        FileDirectory::open(self.path(), false).expect("Failed to open log directory")
    }

    /// Segment file names, sorted.
    pub fn segment_names(&self) -> Vec<String> {
        let mut names = self.directory().list().expect("Failed to list log directory");
        names.sort();
        names
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds or `timeout` passes.
///
/// Returns whether the condition held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
