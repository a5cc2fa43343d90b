//! Segment rotation and the sealed-segment set.
//!
//! The manager owns the current segment and renames it into the sealed set
//! on rotation. Sealed segments are numbered densely from zero, oldest
//! first; removing one leaves a gap that the next rotation closes.
//!
//! Rotation is exclusive with [`RotationPause`]: a submitter holds a pause
//! while it appends to the current segment, and the retry worker holds one
//! for a whole pass over a sealed segment, so neither ever sees a segment
//! renamed or replaced underneath it.

use crate::error::{CoreError, CoreResult};
use crate::processing::FailedEvents;
use crate::wal::{Header, Segment, SegmentContext};
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use surelog_storage::{StorageDirectory, StorageError};
use tracing::{debug, error, info, warn};

/// Name of the segment taking new appends.
pub const CURRENT_SEGMENT: &str = "part.current";

const SEALED_PREFIX: &str = "part.";

/// Largest header the manager reads when verifying segments.
const MAX_HEADER_LEN: u64 = 6 + u16::MAX as u64;

/// Name of the sealed segment with the given index.
#[must_use]
pub fn sealed_name(index: u64) -> String {
    format!("{SEALED_PREFIX}{index}")
}

/// Parses a sealed segment name, returning its index.
#[must_use]
pub fn parse_sealed(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SEALED_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists sealed segments in numeric index order.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn sealed_segments(directory: &dyn StorageDirectory) -> CoreResult<Vec<(u64, String)>> {
    let mut sealed: Vec<_> = directory
        .list()?
        .into_iter()
        .filter_map(|name| parse_sealed(&name).map(|index| (index, name)))
        .collect();
    sealed.sort_unstable();
    Ok(sealed)
}

/// Renames sealed segments to `part.0`..`part.k-1`, keeping their order.
///
/// Ascending renames never collide: each target index is at most the
/// source index and every lower index is already taken by its final owner.
fn renumber_sealed(directory: &dyn StorageDirectory, failed: &FailedEvents) -> CoreResult<u64> {
    let sealed = sealed_segments(directory)?;
    for (target, (index, name)) in (0u64..).zip(&sealed) {
        if *index != target {
            let renamed = sealed_name(target);
            directory.rename(name, &renamed)?;
            failed.renamed(name, &renamed);
        }
    }
    Ok(sealed.len() as u64)
}

/// Moves `part.current` (if present) into the sealed set and opens a fresh
/// current segment.
fn seal_and_open<E: Clone>(
    directory: &dyn StorageDirectory,
    context: &SegmentContext<E>,
    failed: &FailedEvents,
) -> CoreResult<Arc<Segment<E>>> {
    let sealed = renumber_sealed(directory, failed)?;
    if directory.exists(CURRENT_SEGMENT)? {
        let name = sealed_name(sealed);
        directory.rename(CURRENT_SEGMENT, &name)?;
        failed.renamed(CURRENT_SEGMENT, &name);
        debug!(segment = %directory.locate(&name), "sealed segment");
    }
    Ok(Arc::new(Segment::open(directory, CURRENT_SEGMENT, context)?))
}

/// Checks the header of every existing segment against the codec.
///
/// Torn headers pass; they are repaired when the segment is opened.
fn verify_headers<E>(
    directory: &dyn StorageDirectory,
    context: &SegmentContext<E>,
) -> CoreResult<usize> {
    let mut names: Vec<String> = sealed_segments(directory)?
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    if directory.exists(CURRENT_SEGMENT)? {
        names.push(CURRENT_SEGMENT.to_string());
    }

    for name in &names {
        let location = directory.locate(name);
        let backend = directory.open(name)?;
        let len = backend.size()?.min(MAX_HEADER_LEN);
        let bytes = backend.read_at(0, len as usize)?;
        if let Some((header, _)) = Header::decode(&bytes, &location)? {
            header.verify(context.codec().type_descriptor(), &location)?;
        }
    }
    Ok(names.len())
}

struct RotationSignal {
    generation: u64,
    stopped: bool,
}

/// Shared access to the current segment that holds off rotation.
///
/// Dropping the pause lets rotation proceed.
pub struct RotationPause<'a, E> {
    current: RwLockReadGuard<'a, Arc<Segment<E>>>,
    generation: u64,
}

impl<E> RotationPause<'_, E> {
    /// The current segment, which stays current while the pause is held.
    pub fn current(&self) -> &Arc<Segment<E>> {
        &self.current
    }
}

/// Owns the current segment and the sealed segment set.
pub struct SegmentManager<E> {
    directory: Arc<dyn StorageDirectory>,
    context: SegmentContext<E>,
    current: RwLock<Arc<Segment<E>>>,
    failed: Arc<FailedEvents>,
    signal: Mutex<RotationSignal>,
    wake: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: Clone + Send + 'static> SegmentManager<E> {
    /// Opens the manager over a log directory.
    ///
    /// Every existing segment header is verified first. A leftover
    /// `part.current` from an earlier run is sealed, so its uncommitted
    /// events are picked up by the retry worker, and a fresh current
    /// segment is created.
    ///
    /// # Errors
    ///
    /// Returns an error if any segment was written with another format
    /// version or event type, or on storage failure.
    pub fn open(directory: Arc<dyn StorageDirectory>, context: SegmentContext<E>) -> CoreResult<Self> {
        let existing = verify_headers(&*directory, &context)?;
        let failed = Arc::new(FailedEvents::default());
        let current = seal_and_open(&*directory, &context, &failed)?;
        info!(
            segment = %current.location(),
            existing,
            "segment manager opened"
        );

        Ok(Self {
            directory,
            context,
            current: RwLock::new(current),
            failed,
            signal: Mutex::new(RotationSignal {
                generation: 0,
                stopped: false,
            }),
            wake: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Seals the current segment and opens a new one.
    ///
    /// A fully committed segment is deleted instead of sealed. Waits for
    /// outstanding pauses to be released.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after shutdown, or a storage error.
    pub fn rotate(&self) -> CoreResult<()> {
        let mut current = self.current.write();
        self.rotate_locked(&mut current)
    }

    /// Rotates only if `segment` is still the current segment.
    ///
    /// Returns whether a rotation happened. Several submitters that saw
    /// the same full segment rotate it once.
    ///
    /// # Errors
    ///
    /// See [`SegmentManager::rotate`].
    pub fn rotate_if_current(&self, segment: &Arc<Segment<E>>) -> CoreResult<bool> {
        let mut current = self.current.write();
        if !Arc::ptr_eq(&current, segment) {
            return Ok(false);
        }
        self.rotate_locked(&mut current).map(|()| true)
    }

    fn rotate_locked(&self, current: &mut Arc<Segment<E>>) -> CoreResult<()> {
        if self.is_stopped() {
            return Err(CoreError::Closed);
        }

        let previous = Arc::clone(current);
        if let Err(e) = previous.close() {
            warn!(segment = %previous.location(), error = %e, "unable to sync segment before sealing");
        }

        let result = self
            .retire_if_committed(&previous)
            .and_then(|()| seal_and_open(&*self.directory, &self.context, &self.failed));
        match result {
            Ok(next) => {
                debug!(
                    sealed = %previous.location(),
                    uncommitted = previous.uncommitted_len(),
                    "rotated segments"
                );
                *current = next;
            }
            Err(e) => {
                error!(error = %e, "rotation failed; reopening current segment");
                if let Ok(reopened) = Segment::open(&*self.directory, CURRENT_SEGMENT, &self.context) {
                    *current = Arc::new(reopened);
                }
                return Err(e);
            }
        }

        self.signal.lock().generation += 1;
        self.wake.notify_all();
        Ok(())
    }

    /// Opens a uniformly chosen sealed segment, or returns `None` when
    /// there are none.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or the segment
    /// cannot be opened.
    pub fn random_sealed(&self, _pause: &RotationPause<'_, E>) -> CoreResult<Option<Segment<E>>> {
        let sealed = sealed_segments(&*self.directory)?;
        let Some((_, name)) = sealed.choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };
        Segment::open(&*self.directory, name, &self.context).map(Some)
    }

    /// Starts the thread that rotates at a fixed rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_rotation_timer(self: &Arc<Self>, interval: Duration) -> CoreResult<()> {
        let manager = Arc::clone(self);
        self.spawn_worker("surelog-rotation", move || manager.run_rotation_timer(interval))
    }

    fn run_rotation_timer(&self, interval: Duration) {
        debug!(?interval, "rotation timer started");
        let mut deadline = Instant::now() + interval;
        loop {
            {
                let mut signal = self.signal.lock();
                while !signal.stopped {
                    if self.wake.wait_until(&mut signal, deadline).timed_out() {
                        break;
                    }
                }
                if signal.stopped {
                    break;
                }
            }

            if let Err(e) = self.rotate() {
                error!(error = %e, "scheduled rotation failed");
            }

            deadline += interval;
            let now = Instant::now();
            if deadline < now {
                deadline = now + interval;
            }
        }
        debug!("rotation timer stopped");
    }
}

impl<E> SegmentManager<E> {
    /// Holds off rotation and returns access to the current segment.
    pub fn pause_rotation(&self) -> RotationPause<'_, E> {
        let current = self.current.read();
        let generation = self.signal.lock().generation;
        RotationPause {
            current,
            generation,
        }
    }

    fn retire_if_committed(&self, segment: &Segment<E>) -> CoreResult<()> {
        if !segment.is_fully_committed() {
            return Ok(());
        }
        match self.directory.remove(segment.name()) {
            Ok(()) | Err(StorageError::NotFound { .. }) => {
                self.failed.discard(segment.name());
                debug!(segment = %segment.location(), "removed fully committed segment");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Closes and deletes a sealed segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn discard_sealed(&self, _pause: &RotationPause<'_, E>, segment: Segment<E>) -> CoreResult<()> {
        if let Err(e) = segment.close() {
            warn!(segment = %segment.location(), error = %e, "unable to sync segment before removal");
        }
        self.directory.remove(segment.name())?;
        self.failed.discard(segment.name());
        debug!(segment = %segment.location(), "removed fully committed segment");
        Ok(())
    }

    /// Releases `pause` and blocks until the next rotation or shutdown.
    ///
    /// A rotation that completes between the release and the wait is not
    /// missed.
    pub fn await_next_rotation(&self, pause: RotationPause<'_, E>) {
        let seen = pause.generation;
        drop(pause);

        let mut signal = self.signal.lock();
        while !signal.stopped && signal.generation == seen {
            self.wake.wait(&mut signal);
        }
    }

    /// Sleeps for up to `timeout`, waking early on rotation or shutdown.
    pub fn idle(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut signal = self.signal.lock();
        let seen = signal.generation;
        while !signal.stopped && signal.generation == seen {
            if self.wake.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_stopped(&self) -> bool {
        self.signal.lock().stopped
    }

    /// Number of rotations since the manager opened.
    pub fn generation(&self) -> u64 {
        self.signal.lock().generation
    }

    /// The current segment at the time of the call.
    pub fn current(&self) -> Arc<Segment<E>> {
        Arc::clone(&self.current.read())
    }

    /// The log directory.
    pub fn directory(&self) -> &Arc<dyn StorageDirectory> {
        &self.directory
    }

    /// The segment context.
    pub fn context(&self) -> &SegmentContext<E> {
        &self.context
    }

    /// Terminally failed events still waiting for their COMMIT.
    pub(crate) fn failed_events(&self) -> &Arc<FailedEvents> {
        &self.failed
    }

    /// Runs `work` on a named background thread that
    /// [`SegmentManager::shutdown`] joins.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_worker<F>(&self, name: &str, work: F) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(work)?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// Stops background threads, waits for them to exit, then closes the
    /// current segment and deletes it if fully committed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the current segment cannot be synced or removed.
    pub fn shutdown(&self) -> CoreResult<()> {
        let first = {
            let mut signal = self.signal.lock();
            let first = !signal.stopped;
            signal.stopped = true;
            first
        };
        self.wake.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == thread::current().id() {
                continue;
            }
            let name = worker.thread().name().map(str::to_string);
            if worker.join().is_err() {
                warn!(thread = ?name, "background thread panicked");
            }
        }

        if !first {
            return Ok(());
        }

        let current = self.current.write();
        current.close()?;
        self.retire_if_committed(&current)?;
        info!(
            segment = %current.location(),
            uncommitted = current.uncommitted_len(),
            failed_uncommitted = self.failed.len(),
            "segment manager shut down"
        );
        Ok(())
    }
}
