use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, span, trace, warn, Level};

use crate::blob;
use crate::blob_reader::{BlobReader, RawBlob};
use crate::decode::block_entities;
use crate::entity::{Entity, FileHeader};
use crate::error::{Error, Result};
use crate::header::decode_header;

pub const OSM_HEADER: &str = "OSMHeader";
pub const OSM_DATA: &str = "OSMData";

// --------------------------------------------------------------------------
// ScanOptions

/// Pipeline sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    workers: usize,
    blob_queue: usize,
    entity_queue: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            blob_queue: 0,
            entity_queue: 0,
        }
    }
}

impl ScanOptions {
    /// Number of decode threads. A single worker delivers entities in file order.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Blobs that may wait between the reader and the workers. Zero is a rendezvous.
    pub fn blob_queue(mut self, capacity: usize) -> Self {
        self.blob_queue = capacity;
        self
    }

    /// Entities that may wait between the workers and the consumer. Zero is a rendezvous.
    pub fn entity_queue(mut self, capacity: usize) -> Self {
        self.entity_queue = capacity;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

// --------------------------------------------------------------------------
// Shared state

/// Counters and flags owned by one scanner and its threads.
#[derive(Debug, Default)]
struct Shared {
    bytes: AtomicU64,
    failed: AtomicBool,
    error: Mutex<Option<Error>>,
    cancelled: AtomicBool,
}

impl Shared {
    fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records `err` unless an earlier error was already latched.
    fn latch(&self, err: Error) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            warn!("Scan aborted: {}", err);
            *slot = Some(err);
            self.failed.store(true, Ordering::Release);
        } else {
            debug!("Dropping error after the first: {}", err);
        }
    }

    fn error(&self) -> Option<Error> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn should_stop(&self) -> bool {
        self.failed.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire)
    }
}

/// Cloneable view of a running scan that other threads can hold, e.g. to
/// report progress or to cancel.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    shared: Arc<Shared>,
}

impl ScanHandle {
    /// Wire bytes of every blob decoded so far, header included.
    pub fn bytes(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> Option<Error> {
        self.shared.error()
    }

    /// Asks the reader and workers to stop. The consumer sees the end of the stream.
    pub fn cancel(&self) {
        debug!("Scan cancelled");
        self.shared.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

// --------------------------------------------------------------------------
// Scanner

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Unstarted,
    HeaderLoaded,
    Scanning,
    /// No more entities; check [`Scanner::error`] to tell success from failure.
    Drained,
}

/// Decodes a PBF stream into entities on a pool of worker threads.
///
/// One reader thread pulls blobs off the stream and hands them to the
/// workers; each worker decodes a whole blob and publishes its entities in wire
/// order. Entities of different blobs may interleave when there is more than
/// one worker. All queues are bounded, so a slow consumer stalls the workers,
/// which stall the reader.
///
/// ```no_run
/// use pbf_scanner::{Entity, Scanner};
///
/// let mut scanner = Scanner::from_file(std::path::Path::new("map.osm.pbf"))?;
/// let nodes = scanner.by_ref().filter(|e| matches!(e, Entity::Node(_))).count();
/// if let Some(err) = scanner.error() {
///     return Err(err);
/// }
/// println!("{} nodes", nodes);
/// # Ok::<(), pbf_scanner::Error>(())
/// ```
#[derive(Debug)]
pub struct Scanner<R: Read> {
    reader: Option<BlobReader<R>>,
    options: ScanOptions,
    header: Option<Result<FileHeader>>,
    state: ScanState,
    shared: Arc<Shared>,
    entities: Option<Receiver<Entity>>,
    threads: Vec<JoinHandle<()>>,
}

impl Scanner<std::io::BufReader<std::fs::File>> {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(Self::new(file))
    }
}

impl<R: Read + Send + 'static> Scanner<R> {
    pub fn new(stream: R) -> Self {
        Self::with_options(stream, ScanOptions::default())
    }

    pub fn with_options(stream: R, options: ScanOptions) -> Self {
        Self {
            reader: Some(BlobReader::new(stream)),
            options,
            header: None,
            state: ScanState::Unstarted,
            shared: Arc::default(),
            entities: None,
            threads: Vec::new(),
        }
    }

    /// Reads the header blob on first use; later calls return the same result.
    pub fn header(&mut self) -> Result<&FileHeader> {
        let header = self.header.get_or_insert_with(|| {
            let header = read_header(self.reader.as_mut(), &self.shared);
            if let Err(err) = &header {
                self.shared.latch(err.clone());
            }
            header
        });
        if self.state == ScanState::Unstarted {
            self.state = if header.is_ok() { ScanState::HeaderLoaded } else { ScanState::Drained };
        }
        header.as_ref().map_err(Clone::clone)
    }

    /// Starts the reader and worker threads. Does nothing if already started.
    pub fn scan(&mut self) -> Result<()> {
        self.header()?;
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        let workers = self.options.workers;
        debug!("Starting scan with {} decode workers", workers);
        let (blob_tx, blob_rx) = mpsc::sync_channel::<RawBlob>(self.options.blob_queue);
        let (entity_tx, entity_rx) = mpsc::sync_channel::<Entity>(self.options.entity_queue);
        let blob_rx = Arc::new(Mutex::new(blob_rx));
        self.entities = Some(entity_rx);
        self.state = ScanState::Scanning;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("pbf-reader".to_string())
            .spawn(move || read_blobs(reader, blob_tx, &shared));
        self.track(spawned)?;

        for worker in 0..workers {
            let blobs = Arc::clone(&blob_rx);
            let entities = entity_tx.clone();
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("pbf-decode-{}", worker))
                .spawn(move || decode_blobs(worker, &blobs, &entities, &shared));
            self.track(spawned)?;
        }
        Ok(())
    }

    /// Blocks until the next entity is available. Returns `None` once the
    /// stream is drained, the scan failed or it was cancelled.
    pub fn next_entity(&mut self) -> Option<Entity> {
        if self.scan().is_err() {
            return None;
        }
        if self.shared.cancelled.load(Ordering::Acquire) {
            self.finish();
            return None;
        }
        let received = self.entities.as_ref()?.recv();
        match received {
            Ok(entity) => Some(entity),
            Err(_) => {
                self.finish();
                None
            }
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Wire bytes of every blob decoded so far, header included.
    pub fn bytes(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }

    /// The first fatal error, if any. `None` after a drain means the whole stream was decoded.
    pub fn error(&self) -> Option<Error> {
        self.shared.error()
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn track(&mut self, spawned: std::io::Result<JoinHandle<()>>) -> Result<()> {
        match spawned {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(err) => {
                // Threads already running see the latched error and wind down
                // once this call drops its ends of the queues.
                let err = Error::from(err);
                self.shared.latch(err.clone());
                Err(err)
            }
        }
    }

    fn finish(&mut self) {
        self.entities = None;
        self.join_threads();
        self.state = ScanState::Drained;
        debug!("Scan drained after {} bytes", self.bytes());
    }
}

impl<R: Read> Scanner<R> {
    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                self.shared.latch(Error::ThreadPanicked);
            }
        }
    }
}

impl<R: Read> Drop for Scanner<R> {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.cancelled.store(true, Ordering::Release);
        self.entities = None;
        self.join_threads();
    }
}

impl<R: Read + Send + 'static> Iterator for Scanner<R> {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entity()
    }
}

// --------------------------------------------------------------------------
// Pipeline stages

fn read_header<R: Read>(reader: Option<&mut BlobReader<R>>, shared: &Shared) -> Result<FileHeader> {
    let reader = reader.ok_or_else(|| Error::Framing("stream was already handed to the reader".to_string()))?;
    let raw = reader
        .next_blob()?
        .ok_or_else(|| Error::Framing(format!("stream is empty; expected an '{}' blob", OSM_HEADER)))?;
    if raw.kind() != OSM_HEADER {
        return Err(Error::BlobType {
            expected: OSM_HEADER,
            found: raw.kind().to_string(),
        });
    }
    let header = decode_header(&raw.blob)?;
    shared.add_bytes(raw.bytes);
    Ok(header)
}

/// Reader thread: pulls `OSMData` blobs off the stream until it ends. Dropping
/// `blobs` on return tells the workers there is nothing more to come.
fn read_blobs<R: Read>(mut reader: BlobReader<R>, blobs: SyncSender<RawBlob>, shared: &Shared) {
    let _span = span!(Level::DEBUG, "read_blobs").entered();

    while !shared.should_stop() {
        match reader.next_blob() {
            Ok(None) => {
                debug!("End of stream at offset {}", reader.offset());
                return;
            }
            Ok(Some(raw)) if raw.kind() != OSM_DATA => {
                shared.latch(Error::BlobType {
                    expected: OSM_DATA,
                    found: raw.kind().to_string(),
                });
                return;
            }
            Ok(Some(raw)) => {
                if blobs.send(raw).is_err() {
                    trace!("All workers exited; reader stopping");
                    return;
                }
            }
            Err(err) => {
                shared.latch(err);
                return;
            }
        }
    }
}

/// Worker thread: decodes blobs until the reader is done or the scan stops.
fn decode_blobs(worker: usize, blobs: &Mutex<Receiver<RawBlob>>, entities: &SyncSender<Entity>, shared: &Shared) {
    let _span = span!(Level::DEBUG, "decode_blobs", worker).entered();

    loop {
        let next = blobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(raw) = next else {
            trace!("Reader finished; worker exiting");
            return;
        };
        if shared.should_stop() {
            return;
        }
        match publish_blob(&raw, entities, shared) {
            Ok(true) => shared.add_bytes(raw.bytes),
            Ok(false) => return,
            Err(err) => {
                shared.latch(err);
                return;
            }
        }
    }
}

/// Decodes one blob and sends its entities in order. Returns `false` if the
/// blob was abandoned because the scan stopped or the consumer went away.
fn publish_blob(raw: &RawBlob, entities: &SyncSender<Entity>, shared: &Shared) -> Result<bool> {
    let _span = span!(Level::TRACE, "publish_blob", bytes = raw.bytes).entered();

    let block = blob::block(&raw.blob)?;
    trace!("Decoded PrimitiveBlock with {} groups", block.primitivegroup.len());
    for entity in block_entities(&block) {
        let entity = entity?;
        if shared.should_stop() || entities.send(entity).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_reader::encode_frame;
    use crate::osm_pbf::{self, blob::Data};
    use prost::Message;
    use std::io::Cursor;

    fn raw(payload: Vec<u8>) -> osm_pbf::Blob {
        osm_pbf::Blob {
            raw_size: None,
            data: Some(Data::Raw(payload)),
        }
    }

    fn header_frame() -> Vec<u8> {
        encode_frame(OSM_HEADER, &raw(osm_pbf::HeaderBlock::default().encode_to_vec()))
    }

    fn dense_frame(ids: Vec<i64>) -> Vec<u8> {
        let n = ids.len();
        let block = osm_pbf::PrimitiveBlock {
            stringtable: Some(osm_pbf::StringTable { s: vec![Vec::new()] }),
            primitivegroup: vec![osm_pbf::PrimitiveGroup {
                dense: Some(osm_pbf::DenseNodes {
                    id: ids,
                    lat: vec![0; n],
                    lon: vec![0; n],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        encode_frame(OSM_DATA, &raw(block.encode_to_vec()))
    }

    #[test]
    fn options_clamp_workers() {
        let options = ScanOptions::default().workers(0).blob_queue(2).entity_queue(8);
        assert_eq!(options.worker_count(), 1);
        assert!(ScanOptions::default().worker_count() >= 1);
    }

    #[test]
    fn header_is_memoized() {
        let mut stream = header_frame();
        let header_len = stream.len() as u64;
        stream.extend(dense_frame(vec![1]));
        let mut scanner = Scanner::new(Cursor::new(stream));
        assert_eq!(scanner.state(), ScanState::Unstarted);

        assert_eq!(scanner.header().unwrap(), &FileHeader::default());
        assert_eq!(scanner.bytes(), header_len);
        assert_eq!(scanner.state(), ScanState::HeaderLoaded);

        scanner.header().unwrap();
        assert_eq!(scanner.bytes(), header_len);
    }

    #[test]
    fn data_blob_first_is_a_type_error() {
        let mut scanner = Scanner::new(Cursor::new(dense_frame(vec![1])));
        let err = scanner.header().unwrap_err();
        assert!(matches!(err, Error::BlobType { expected: OSM_HEADER, ref found } if found == OSM_DATA));
        assert!(scanner.header().is_err());
        assert!(scanner.next_entity().is_none());
        assert!(matches!(scanner.error(), Some(Error::BlobType { .. })));
        assert_eq!(scanner.state(), ScanState::Drained);
    }

    #[test]
    fn empty_stream_has_no_header() {
        let mut scanner = Scanner::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(Scanner::scan(&mut scanner), Err(Error::Framing(_))));
    }

    #[test]
    fn scan_is_idempotent() {
        let mut stream = header_frame();
        stream.extend(dense_frame(vec![1, 1]));
        let mut scanner = Scanner::with_options(Cursor::new(stream), ScanOptions::default().workers(2));
        Scanner::scan(&mut scanner).unwrap();
        Scanner::scan(&mut scanner).unwrap();
        assert_eq!(scanner.state(), ScanState::Scanning);
        let ids: Vec<i64> = scanner.by_ref().map(|e| e.id()).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(scanner.state(), ScanState::Drained);
        Scanner::scan(&mut scanner).unwrap();
        assert!(scanner.next_entity().is_none());
        assert!(scanner.error().is_none());
    }

    #[test]
    fn second_header_blob_is_a_type_error() {
        let mut stream = header_frame();
        stream.extend(header_frame());
        let mut scanner = Scanner::new(Cursor::new(stream));
        assert!(scanner.next_entity().is_none());
        assert!(matches!(scanner.error(), Some(Error::BlobType { expected: OSM_DATA, .. })));
    }

    #[test]
    fn first_error_wins() {
        let shared = Shared::default();
        shared.latch(Error::MissingStringTable);
        shared.latch(Error::UnknownMemberType(4));
        assert!(matches!(shared.error(), Some(Error::MissingStringTable)));
        assert!(shared.should_stop());
    }

    #[test]
    fn cancel_ends_the_stream() {
        let mut stream = header_frame();
        for _ in 0..8 {
            stream.extend(dense_frame(vec![1; 100]));
        }
        let mut scanner = Scanner::with_options(Cursor::new(stream), ScanOptions::default().workers(2));
        assert!(scanner.next_entity().is_some());
        let handle = scanner.handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(scanner.next_entity().is_none());
        assert_eq!(scanner.state(), ScanState::Drained);
        assert!(scanner.error().is_none());
    }

    #[test]
    fn dropping_a_running_scanner_joins_its_threads() {
        let mut stream = header_frame();
        for _ in 0..4 {
            stream.extend(dense_frame(vec![1; 50]));
        }
        let mut scanner = Scanner::with_options(Cursor::new(stream), ScanOptions::default().workers(3));
        assert!(scanner.next_entity().is_some());
        drop(scanner);
    }
}
