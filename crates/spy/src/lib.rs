//! Kernel lifecycle tracing with pluggable backends.
//!
//! The kernel reports scheduling events as small binary *records*: a record
//! identifier from [`records`], a payload and an optional simulated-tick
//! timestamp. A [`Tracer`] sequences the records and hands them to a
//! [`TraceBackend`]. Tracing is informational only; the kernel ignores every
//! error returned by the hook.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub mod records;

/// Maximum payload length for a single record.
const DEFAULT_MAX_RECORD_LEN: usize = 32;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct SpyConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyRecord {
    pub seq: u32,
    pub record_type: u8,
    pub timestamp: Option<u64>,
    pub payload: Vec<u8>,
}

impl SpyRecord {
    pub fn name(&self) -> &'static str {
        records::name(self.record_type)
    }

    /// Thread id carried in the first four payload bytes.
    pub fn thread_id(&self) -> Option<u32> {
        let bytes = self.payload.get(0..4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Optional 64-bit argument following the thread id.
    pub fn argument(&self) -> Option<u64> {
        let bytes = self.payload.get(4..12)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl fmt::Display for SpyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}", self.seq)?;
        match self.timestamp {
            Some(tick) => write!(f, " @{tick:<8}")?,
            None => write!(f, " {:<9}", "")?,
        }
        write!(f, " {:<11}", self.name())?;
        if let Some(id) = self.thread_id() {
            write!(f, " thread=#{id}")?;
        }
        if let Some(argument) = self.argument() {
            write!(f, " arg={argument}")?;
        }
        Ok(())
    }
}

/// Encodes the payload of a thread record.
pub fn thread_payload(thread: u32, argument: Option<u64>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&thread.to_le_bytes());
    if let Some(argument) = argument {
        payload.extend_from_slice(&argument.to_le_bytes());
    }
    payload
}

/// Errors that can occur while emitting trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes sequenced records.
pub trait TraceBackend: Send + Sync {
    fn write_record(&self, record: &SpyRecord) -> Result<(), TraceError>;
}

/// Backend that writes one text line per record to any `Write`
/// implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_record(&self, record: &SpyRecord) -> Result<(), TraceError> {
        let mut guard = self.writer.lock();
        writeln!(guard, "{record}").map_err(TraceError::from)
    }
}

/// Backend that keeps every record in memory, for inspection in tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<Vec<SpyRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SpyRecord> {
        self.records.lock().clone()
    }

    /// Records of one type, in emission order.
    pub fn records_of(&self, record_type: u8) -> Vec<SpyRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.record_type == record_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl TraceBackend for MemoryBackend {
    fn write_record(&self, record: &SpyRecord) -> Result<(), TraceError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Record sequencer.
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: SpyConfig,
    seq: u32,
}

#[derive(Clone)]
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: SpyConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        timestamp: Option<u64>,
    ) -> Result<SpyRecord, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        self.seq = self.seq.wrapping_add(1);
        let record = SpyRecord {
            seq: self.seq,
            record_type,
            timestamp: timestamp.filter(|_| self.cfg.include_timestamp),
            payload: payload.to_vec(),
        };
        self.backend.write_record(&record)?;
        Ok(record)
    }
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<SpyRecord, TraceError> {
        self.inner.lock().record(record_type, payload, None)
    }

    pub fn emit_at(
        &self,
        record_type: u8,
        payload: &[u8],
        tick: u64,
    ) -> Result<SpyRecord, TraceError> {
        self.inner.lock().record(record_type, payload, Some(tick))
    }

    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, timestamp| {
            inner
                .lock()
                .record(record_type, payload, timestamp)
                .map(|_| ())
        })
    }
}

/// Callback through which the kernel reports records.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], Option<u64>) -> Result<(), TraceError> + Send + Sync>;

/// Convenience backend that writes records to stdout.
pub fn stdout_backend() -> WriterBackend<io::Stdout> {
    WriterBackend::new(io::stdout())
}

/// Tracer with an in-memory backend; returns the hook and the backend.
pub fn memory_tracer() -> (TraceHook, MemoryBackend) {
    let backend = MemoryBackend::new();
    let handle = Tracer::new(SpyConfig::default(), backend.clone()).into_handle();
    (handle.hook(), backend)
}
