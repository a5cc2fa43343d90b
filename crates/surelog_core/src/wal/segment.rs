//! A single segment file and its in-memory index of uncommitted events.

use super::header::Header;
use super::record::{encode_begin, encode_commit};
use super::resolver::resolve;
use crate::error::{CoreError, CoreResult};
use crate::handlers::{CorruptionHandler, CorruptionReport};
use crate::types::EventId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use surelog_codec::EventCodec;
use surelog_storage::{StorageBackend, StorageDirectory, StorageResult};
use tracing::{debug, trace, warn};

/// What every segment of one log shares.
pub struct SegmentContext<E> {
    pub(crate) codec: Arc<dyn EventCodec<E>>,
    pub(crate) corruption: Arc<dyn CorruptionHandler>,
    pub(crate) max_event_id: u32,
}

impl<E> SegmentContext<E> {
    /// Creates a segment context.
    pub fn new(
        codec: Arc<dyn EventCodec<E>>,
        corruption: Arc<dyn CorruptionHandler>,
        max_event_id: u32,
    ) -> Self {
        Self {
            codec,
            corruption,
            max_event_id,
        }
    }

    /// Returns the event codec.
    pub fn codec(&self) -> &dyn EventCodec<E> {
        &*self.codec
    }
}

impl<E> Clone for SegmentContext<E> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            corruption: Arc::clone(&self.corruption),
            max_event_id: self.max_event_id,
        }
    }
}

/// Result of [`Segment::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The BEGIN record is durable and the event has this id.
    Begun(EventId),
    /// The segment has issued its last id; nothing was written.
    RotationRequired,
}

struct SegmentState<E> {
    backend: Option<Box<dyn StorageBackend>>,
    counter: u32,
    uncommitted: BTreeMap<EventId, E>,
}

/// An open segment.
///
/// All operations serialize on one internal lock, so ids are issued and
/// records appended in a single order.
pub struct Segment<E> {
    name: String,
    location: String,
    max_event_id: u32,
    codec: Arc<dyn EventCodec<E>>,
    state: Mutex<SegmentState<E>>,
}

impl<E: Clone> Segment<E> {
    /// Opens the named segment, creating it with a fresh header if absent.
    ///
    /// An existing segment is replayed: its uncommitted events and counter
    /// are rebuilt and a damaged tail is reported to the corruption handler
    /// and truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the header carries another version or event
    /// type, or on storage failure.
    pub fn open(
        directory: &dyn StorageDirectory,
        name: &str,
        context: &SegmentContext<E>,
    ) -> CoreResult<Self> {
        let location = directory.locate(name);
        let mut backend = directory.open(name)?;
        let bytes = backend.read_all()?;
        let descriptor = context.codec.type_descriptor();

        let mut uncommitted = BTreeMap::new();
        let mut counter = 0;

        match Header::decode(&bytes, &location)? {
            Some((header, start)) => {
                header.verify(descriptor, &location)?;
                let resolution = resolve(&bytes, start, &*context.codec, &mut uncommitted, &location);
                counter = resolution.max_id;
                if let Some(report) = resolution.corruption {
                    discard_tail(&mut *backend, &report, context)?;
                }
            }
            None => {
                if !bytes.is_empty() {
                    let report = CorruptionReport {
                        location: location.clone(),
                        offset: 0,
                        length: bytes.len() as u64,
                        reason: "segment header truncated".to_string(),
                    };
                    discard_tail(&mut *backend, &report, context)?;
                }
                let mut header = Vec::new();
                Header::new(descriptor).encode(&mut header)?;
                backend.append(&header)?;
                backend.sync()?;
            }
        }

        debug!(
            segment = %location,
            counter,
            uncommitted = uncommitted.len(),
            "opened segment"
        );

        Ok(Self {
            name: name.to_string(),
            location,
            max_event_id: context.max_event_id,
            codec: Arc::clone(&context.codec),
            state: Mutex::new(SegmentState {
                backend: Some(backend),
                counter,
                uncommitted,
            }),
        })
    }

    /// Issues the next id for `event` and makes its BEGIN record durable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Durability`] if the record could not be synced,
    /// [`CoreError::Codec`] if the event cannot be encoded and
    /// [`CoreError::SegmentClosed`] after [`Segment::close`].
    pub fn begin(&self, event: &E) -> CoreResult<BeginOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let backend = state.backend.as_mut().ok_or_else(|| self.closed())?;

        if state.counter >= self.max_event_id {
            return Ok(BeginOutcome::RotationRequired);
        }

        let id = EventId::new(state.counter + 1);
        let mut record = Vec::new();
        encode_begin(id, event, &*self.codec, &mut record)?;

        // The id is spent even if the append fails: its BEGIN may be on disk.
        state.counter = id.as_u32();
        let next_id = state.counter.saturating_add(1);
        append_durably(&mut **backend, &record).map_err(|source| CoreError::Durability {
            segment: self.location.clone(),
            next_id,
            source,
        })?;

        state.uncommitted.insert(id, event.clone());
        trace!(segment = %self.location, %id, "begin");
        Ok(BeginOutcome::Begun(id))
    }

    /// Makes a COMMIT record for `id` durable and forgets the event.
    ///
    /// Committing an id twice writes a second COMMIT and is otherwise
    /// harmless.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEvent`] for an id this segment never
    /// issued, [`CoreError::Durability`] if the record could not be synced
    /// and [`CoreError::SegmentClosed`] after [`Segment::close`].
    pub fn commit(&self, id: EventId) -> CoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let backend = state.backend.as_mut().ok_or_else(|| self.closed())?;

        if id.as_u32() == 0 || id.as_u32() > state.counter {
            return Err(CoreError::UnknownEvent {
                id,
                counter: state.counter,
            });
        }

        let mut record = Vec::with_capacity(8);
        encode_commit(id, &mut record);
        let next_id = state.counter.saturating_add(1);
        append_durably(&mut **backend, &record).map_err(|source| CoreError::Durability {
            segment: self.location.clone(),
            next_id,
            source,
        })?;

        state.uncommitted.remove(&id);
        trace!(segment = %self.location, %id, "commit");
        Ok(())
    }

    /// Returns the uncommitted events in id order.
    pub fn uncommitted_snapshot(&self) -> Vec<(EventId, E)> {
        self.state
            .lock()
            .uncommitted
            .iter()
            .map(|(id, event)| (*id, event.clone()))
            .collect()
    }
}

impl<E> Segment<E> {
    /// Returns `true` once the segment has issued its last id.
    pub fn needs_rotation(&self) -> bool {
        self.state.lock().counter >= self.max_event_id
    }

    /// Returns `true` when every issued id has been committed.
    pub fn is_fully_committed(&self) -> bool {
        self.state.lock().uncommitted.is_empty()
    }

    /// Number of uncommitted events.
    pub fn uncommitted_len(&self) -> usize {
        self.state.lock().uncommitted.len()
    }

    /// The last id issued, or 0 if none.
    pub fn counter(&self) -> u32 {
        self.state.lock().counter
    }

    /// Name of the segment within its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of the segment, for diagnostics.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns `true` after [`Segment::close`].
    pub fn is_closed(&self) -> bool {
        self.state.lock().backend.is_none()
    }

    /// Syncs and releases the underlying file. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the file is released
    /// regardless.
    pub fn close(&self) -> CoreResult<()> {
        let backend = self.state.lock().backend.take();
        if let Some(mut backend) = backend {
            backend.sync()?;
            debug!(segment = %self.location, "closed segment");
        }
        Ok(())
    }

    fn closed(&self) -> CoreError {
        CoreError::SegmentClosed {
            location: self.location.clone(),
        }
    }
}

impl<E> fmt::Debug for Segment<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Segment")
            .field("location", &self.location)
            .field("counter", &state.counter)
            .field("uncommitted", &state.uncommitted.len())
            .field("closed", &state.backend.is_none())
            .finish()
    }
}

fn discard_tail<E>(
    backend: &mut dyn StorageBackend,
    report: &CorruptionReport,
    context: &SegmentContext<E>,
) -> CoreResult<()> {
    warn!(
        segment = %report.location,
        offset = report.offset,
        length = report.length,
        "discarding corrupt segment tail"
    );
    context.corruption.on_corruption(report);
    backend.truncate(report.offset)?;
    Ok(())
}

/// Appends and syncs, truncating back to the previous end on failure.
fn append_durably(backend: &mut dyn StorageBackend, bytes: &[u8]) -> StorageResult<()> {
    let rollback_to = backend.size()?;
    if let Err(e) = backend.append(bytes).and_then(|_| backend.sync()) {
        if let Err(rollback) = backend.truncate(rollback_to) {
            warn!(error = %rollback, "unable to roll back failed append");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surelog_codec::BytesCodec;
    use surelog_storage::InMemoryDirectory;

    struct Fixture {
        dir: InMemoryDirectory,
        reports: Arc<Mutex<Vec<CorruptionReport>>>,
        context: SegmentContext<Vec<u8>>,
    }

    fn fixture(max_event_id: u32) -> Fixture {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let context = SegmentContext::<Vec<u8>>::new(
            Arc::new(BytesCodec::default()),
            Arc::new(move |r: &CorruptionReport| sink.lock().push(r.clone())),
            max_event_id,
        );
        Fixture {
            dir: InMemoryDirectory::new(),
            reports,
            context,
        }
    }

    impl Fixture {
        fn open(&self) -> Segment<Vec<u8>> {
            Segment::open(&self.dir, "part.current", &self.context).unwrap()
        }
    }

    fn begun(outcome: BeginOutcome) -> EventId {
        match outcome {
            BeginOutcome::Begun(id) => id,
            BeginOutcome::RotationRequired => panic!("unexpected rotation"),
        }
    }

    #[test]
    fn new_segment_starts_with_header() {
        let fx = fixture(100);
        let segment = fx.open();
        assert_eq!(segment.counter(), 0);
        assert!(segment.is_fully_committed());

        let bytes = fx.dir.contents("part.current").unwrap();
        let (header, _) = Header::decode(&bytes, "t").unwrap().unwrap();
        assert_eq!(header.type_descriptor, "bytes");
        assert_eq!(segment.location(), "memory:part.current");
    }

    #[test]
    fn ids_increase_from_one() {
        let fx = fixture(100);
        let segment = fx.open();
        for expected in 1..=5 {
            let id = begun(segment.begin(&vec![expected as u8]).unwrap());
            assert_eq!(id, EventId::new(expected));
        }
        assert_eq!(segment.uncommitted_len(), 5);
    }

    #[test]
    fn commit_forgets_event() {
        let fx = fixture(100);
        let segment = fx.open();
        let a = begun(segment.begin(&b"a".to_vec()).unwrap());
        let b = begun(segment.begin(&b"b".to_vec()).unwrap());

        segment.commit(a).unwrap();
        assert_eq!(segment.uncommitted_snapshot(), vec![(b, b"b".to_vec())]);
        segment.commit(b).unwrap();
        assert!(segment.is_fully_committed());
    }

    #[test]
    fn double_commit_is_tolerated() {
        let fx = fixture(100);
        let segment = fx.open();
        let id = begun(segment.begin(&b"a".to_vec()).unwrap());
        segment.commit(id).unwrap();
        segment.commit(id).unwrap();
        assert!(segment.is_fully_committed());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let fx = fixture(100);
        let segment = fx.open();
        begun(segment.begin(&b"a".to_vec()).unwrap());

        assert!(matches!(
            segment.commit(EventId::new(0)),
            Err(CoreError::UnknownEvent { counter: 1, .. })
        ));
        assert!(matches!(
            segment.commit(EventId::new(2)),
            Err(CoreError::UnknownEvent { .. })
        ));
    }

    #[test]
    fn rotation_required_at_ceiling() {
        let fx = fixture(2);
        let segment = fx.open();
        begun(segment.begin(&b"a".to_vec()).unwrap());
        assert!(!segment.needs_rotation());
        begun(segment.begin(&b"b".to_vec()).unwrap());
        assert!(segment.needs_rotation());

        let before = fx.dir.contents("part.current").unwrap();
        assert_eq!(
            segment.begin(&b"c".to_vec()).unwrap(),
            BeginOutcome::RotationRequired
        );
        assert_eq!(fx.dir.contents("part.current").unwrap(), before);
        assert_eq!(segment.counter(), 2);
    }

    #[test]
    fn reopen_rebuilds_state() {
        let fx = fixture(100);
        {
            let segment = fx.open();
            for payload in [b"a", b"b", b"c"] {
                begun(segment.begin(&payload.to_vec()).unwrap());
            }
            segment.commit(EventId::new(2)).unwrap();
            segment.close().unwrap();
        }

        let segment = fx.open();
        assert_eq!(segment.counter(), 3);
        assert_eq!(
            segment.uncommitted_snapshot(),
            vec![(EventId::new(1), b"a".to_vec()), (EventId::new(3), b"c".to_vec())]
        );
        assert_eq!(begun(segment.begin(&b"d".to_vec()).unwrap()), EventId::new(4));
        assert!(fx.reports.lock().is_empty());
    }

    #[test]
    fn torn_tail_is_reported_and_truncated() {
        let fx = fixture(100);
        let intact = {
            let segment = fx.open();
            begun(segment.begin(&b"kept".to_vec()).unwrap());
            fx.dir.contents("part.current").unwrap()
        };
        let mut torn = intact.clone();
        torn.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 2, 0, 0]);
        fx.dir.put("part.current", torn.clone());

        let segment = fx.open();
        {
            let reports = fx.reports.lock();
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].offset, intact.len() as u64);
            assert_eq!(reports[0].length, torn.len() as u64);
        }
        assert_eq!(fx.dir.contents("part.current").unwrap(), intact);
        assert_eq!(segment.counter(), 1);

        let id = begun(segment.begin(&b"next".to_vec()).unwrap());
        assert_eq!(id, EventId::new(2));
        segment.close().unwrap();

        let reopened = fx.open();
        assert_eq!(fx.reports.lock().len(), 1);
        assert_eq!(reopened.uncommitted_len(), 2);
    }

    #[test]
    fn torn_header_is_rewritten() {
        let fx = fixture(100);
        fx.dir.put("part.current", vec![0, 0, 0]);

        let segment = fx.open();
        assert_eq!(fx.reports.lock()[0].offset, 0);
        let bytes = fx.dir.contents("part.current").unwrap();
        assert_eq!(bytes, [0, 0, 0, 0, 0, 5, b'b', b'y', b't', b'e', b's']);
        assert_eq!(segment.counter(), 0);
    }

    #[test]
    fn type_mismatch_refuses_to_open() {
        let fx = fixture(100);
        let mut bytes = Vec::new();
        Header::new("other").encode(&mut bytes).unwrap();
        fx.dir.put("part.current", bytes);

        assert!(matches!(
            Segment::open(&fx.dir, "part.current", &fx.context),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn closed_segment_rejects_writes() {
        let fx = fixture(100);
        let segment = fx.open();
        segment.close().unwrap();
        segment.close().unwrap();
        assert!(segment.is_closed());
        assert!(matches!(
            segment.begin(&b"a".to_vec()),
            Err(CoreError::SegmentClosed { .. })
        ));
        assert!(matches!(
            segment.commit(EventId::new(1)),
            Err(CoreError::SegmentClosed { .. })
        ));
    }
}
