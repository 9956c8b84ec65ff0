// SPDX-License-Identifier: AGPL-3.0-or-later
// Toro - Transaction Status Oracle for Wide-Column Stores
// Copyright (C) 2026 Toro Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! State journal
//!
//! Append-only log of TSO state mutations. The state machine enqueues a
//! record and receives a [`Completion`]; the client reply tied to that
//! record is released only once the completion resolves, which happens when
//! the batch holding the record is on disk. Batches close at `batch_size`
//! bytes or after `flush_timeout`, whichever comes first.
//!
//! ## Record types
//!
//! - `0x01 | Ts:u64 | Tc:u64 | n:u32 | n x cell:u64` - COMMIT (the write
//!   set rides along so replay can rebuild the commit hash map)
//! - `0x02 | Ts:u64` - ABORT
//! - `0x03 | L:u64` - LOW_WATERMARK_ADVANCE checkpoint
//!
//! All integers big-endian. The journal frames each record as
//! `len:u32 | payload | crc32:u32`; a truncated trailing frame is a torn
//! write and tolerated on replay, a damaged interior frame is not.
//!
//! ## Failure model
//!
//! A write or fsync error poisons the journal: the failed batch and every
//! later append complete with [`TsoError::JournalUnavailable`], and the
//! state machine stops releasing replies. There is no retry - the epoch is
//! over.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ReadBytesExt};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use toro_core::{CellId, Result, Timestamp, TsoConfig, TsoError};

const REC_COMMIT: u8 = 0x01;
const REC_ABORT: u8 = 0x02;
const REC_LOW_WATERMARK: u8 = 0x03;

/// Frame overhead: length prefix + trailing checksum.
const FRAME_OVERHEAD: usize = 8;

/// Upper bound on a single record payload; a frame claiming more is
/// corruption, not a big write set.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Records the writer thread will buffer before producers block.
const QUEUE_DEPTH: usize = 1024;

/// A single TSO state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRecord {
    Commit {
        start_ts: Timestamp,
        commit_ts: Timestamp,
        write_set: Vec<CellId>,
    },
    Abort {
        start_ts: Timestamp,
    },
    LowWatermark {
        watermark: Timestamp,
    },
}

impl StateRecord {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            StateRecord::Commit {
                start_ts,
                commit_ts,
                write_set,
            } => {
                let mut buf = Vec::with_capacity(21 + 8 * write_set.len());
                buf.push(REC_COMMIT);
                buf.extend_from_slice(&start_ts.to_be_bytes());
                buf.extend_from_slice(&commit_ts.to_be_bytes());
                buf.extend_from_slice(&(write_set.len() as u32).to_be_bytes());
                for cell in write_set {
                    buf.extend_from_slice(&cell.raw().to_be_bytes());
                }
                buf
            }
            StateRecord::Abort { start_ts } => {
                let mut buf = Vec::with_capacity(9);
                buf.push(REC_ABORT);
                buf.extend_from_slice(&start_ts.to_be_bytes());
                buf
            }
            StateRecord::LowWatermark { watermark } => {
                let mut buf = Vec::with_capacity(9);
                buf.push(REC_LOW_WATERMARK);
                buf.extend_from_slice(&watermark.to_be_bytes());
                buf
            }
        }
    }

    /// Decode a record payload (without framing).
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = payload;
        let tag = cursor
            .read_u8()
            .map_err(|_| "empty record payload".to_string())?;
        let record = match tag {
            REC_COMMIT => {
                let start_ts = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| "commit record truncated at start_ts".to_string())?;
                let commit_ts = cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| "commit record truncated at commit_ts".to_string())?;
                let count = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| "commit record truncated at write-set count".to_string())?
                    as usize;
                if cursor.len() != count * 8 {
                    return Err(format!(
                        "commit record write set claims {count} cells, {} bytes remain",
                        cursor.len()
                    ));
                }
                let mut write_set = Vec::with_capacity(count);
                for _ in 0..count {
                    let raw = cursor
                        .read_u64::<BigEndian>()
                        .map_err(|_| "commit record truncated in write set".to_string())?;
                    write_set.push(CellId::new(raw));
                }
                StateRecord::Commit {
                    start_ts,
                    commit_ts,
                    write_set,
                }
            }
            REC_ABORT => StateRecord::Abort {
                start_ts: cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| "abort record truncated".to_string())?,
            },
            REC_LOW_WATERMARK => StateRecord::LowWatermark {
                watermark: cursor
                    .read_u64::<BigEndian>()
                    .map_err(|_| "low-watermark record truncated".to_string())?,
            },
            other => return Err(format!("unknown record type: {other:#04x}")),
        };
        if !cursor.is_empty() {
            return Err(format!("{} trailing bytes after record", cursor.len()));
        }
        Ok(record)
    }
}

enum CompletionState {
    Pending,
    Done,
    Failed(String),
}

/// Durability handle for one enqueued record.
///
/// Resolves when the batch containing the record has been written and
/// fsynced (or has failed). Journal implementations construct one per
/// append and call [`Completion::complete`] exactly once.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<(Mutex<CompletionState>, Condvar)>,
}

impl Completion {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(CompletionState::Pending), Condvar::new())),
        }
    }

    /// An already-durable completion (no-op journals).
    pub fn ready() -> Self {
        Self {
            inner: Arc::new((Mutex::new(CompletionState::Done), Condvar::new())),
        }
    }

    /// Block until the record is durable.
    pub fn wait(&self) -> Result<()> {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();
        while matches!(*state, CompletionState::Pending) {
            condvar.wait(&mut state);
        }
        match &*state {
            CompletionState::Done => Ok(()),
            CompletionState::Failed(reason) => Err(TsoError::JournalUnavailable(reason.clone())),
            CompletionState::Pending => unreachable!("completion still pending after wait"),
        }
    }

    /// Non-blocking check, mostly for tests.
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.inner.0.lock(), CompletionState::Pending)
    }

    /// Resolve the handle. Called by journal implementations only.
    pub fn complete(&self, result: std::result::Result<(), String>) {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();
        *state = match result {
            Ok(()) => CompletionState::Done,
            Err(reason) => CompletionState::Failed(reason),
        };
        condvar.notify_all();
    }
}

/// The journal contract: persist mutation records, acknowledge durability
/// through completions, never acknowledge out of order.
pub trait StateJournal: Send + Sync {
    /// Enqueue a record. Blocks when the in-flight budget is full
    /// (backpressure); fails fast once the journal is poisoned.
    fn append(&self, record: &StateRecord) -> Result<Completion>;

    /// Force out any partial batch and wait for it.
    fn flush(&self) -> Result<()>;

    /// Flush and close. Idempotent.
    fn shutdown(&self);
}

/// Journal that acknowledges immediately and persists nothing. Useful for
/// tests and for running the TSO as a pure in-memory arbiter.
#[derive(Debug, Default)]
pub struct NullJournal;

impl NullJournal {
    pub fn new() -> Self {
        Self
    }
}

impl StateJournal for NullJournal {
    fn append(&self, _record: &StateRecord) -> Result<Completion> {
        Ok(Completion::ready())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {}
}

#[derive(Debug, Default)]
struct JournalCounters {
    records: AtomicU64,
    batches: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time journal statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalStats {
    pub records: u64,
    pub batches: u64,
    pub bytes_written: u64,
}

impl JournalStats {
    pub fn avg_batch_records(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.records as f64 / self.batches as f64
        }
    }
}

enum WriterMessage {
    Record {
        payload: Vec<u8>,
        completion: Completion,
    },
    Flush(Completion),
    Shutdown,
}

/// File-backed journal with a dedicated writer thread.
///
/// Producers push framed records through a bounded channel; the writer
/// groups them into batches and issues one write + fsync per batch.
pub struct FileJournal {
    sender: Sender<WriterMessage>,
    poisoned: Arc<AtomicBool>,
    counters: Arc<JournalCounters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FileJournal {
    /// Open (creating if needed) the journal at `path` and start the writer
    /// thread. Replay existing records with [`read_records`] *before*
    /// opening. A torn trailing frame left by a crash is truncated away so
    /// new records are never appended behind unreadable bytes.
    pub fn open(path: impl AsRef<Path>, config: &TsoConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let (_, valid_len) = scan_records(path)?;
            let on_disk = std::fs::metadata(path)?.len();
            if on_disk > valid_len {
                warn!(valid_len, on_disk, "truncating torn journal tail");
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_data()?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = bounded(QUEUE_DEPTH);
        let poisoned = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(JournalCounters::default());
        let writer = JournalWriter {
            file,
            receiver,
            batch_size: config.batch_size,
            flush_timeout: config.flush_timeout,
            poisoned: poisoned.clone(),
            counters: counters.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("toro-journal".into())
            .spawn(move || writer.run())?;
        Ok(Self {
            sender,
            poisoned,
            counters,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats {
            records: self.counters.records.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl StateJournal for FileJournal {
    fn append(&self, record: &StateRecord) -> Result<Completion> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(TsoError::JournalUnavailable(
                "journal writer failed".into(),
            ));
        }
        let completion = Completion::new();
        self.sender
            .send(WriterMessage::Record {
                payload: record.encode(),
                completion: completion.clone(),
            })
            .map_err(|_| TsoError::JournalUnavailable("journal writer exited".into()))?;
        Ok(completion)
    }

    fn flush(&self) -> Result<()> {
        let completion = Completion::new();
        self.sender
            .send(WriterMessage::Flush(completion.clone()))
            .map_err(|_| TsoError::JournalUnavailable("journal writer exited".into()))?;
        completion.wait()
    }

    fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            // The writer drains, flushes, and exits; a disconnected channel
            // means it already died, which join() surfaces anyway.
            let _ = self.sender.send(WriterMessage::Shutdown);
            if handle.join().is_err() {
                error!("journal writer thread panicked");
            }
        }
    }
}

impl Drop for FileJournal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct JournalWriter {
    file: File,
    receiver: Receiver<WriterMessage>,
    batch_size: usize,
    flush_timeout: Duration,
    poisoned: Arc<AtomicBool>,
    counters: Arc<JournalCounters>,
}

impl JournalWriter {
    fn run(mut self) {
        let mut pending: Vec<(Vec<u8>, Completion)> = Vec::new();
        let mut pending_bytes = 0usize;
        let mut batch_opened_at = Instant::now();

        loop {
            let message = if pending.is_empty() {
                match self.receiver.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                }
            } else {
                let deadline = batch_opened_at + self.flush_timeout;
                let timeout = deadline.saturating_duration_since(Instant::now());
                match self.receiver.recv_timeout(timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        self.flush_batch(&mut pending, &mut pending_bytes);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            match message {
                WriterMessage::Record {
                    payload,
                    completion,
                } => {
                    if self.poisoned.load(Ordering::Acquire) {
                        completion.complete(Err("journal writer failed".into()));
                        continue;
                    }
                    if pending.is_empty() {
                        batch_opened_at = Instant::now();
                    }
                    pending_bytes += payload.len() + FRAME_OVERHEAD;
                    pending.push((payload, completion));
                    if pending_bytes >= self.batch_size {
                        self.flush_batch(&mut pending, &mut pending_bytes);
                    }
                }
                WriterMessage::Flush(completion) => {
                    self.flush_batch(&mut pending, &mut pending_bytes);
                    if self.poisoned.load(Ordering::Acquire) {
                        completion.complete(Err("journal writer failed".into()));
                    } else {
                        completion.complete(Ok(()));
                    }
                }
                WriterMessage::Shutdown => break,
            }
        }

        self.flush_batch(&mut pending, &mut pending_bytes);
        // Fail anything still queued behind the shutdown message.
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                WriterMessage::Record { completion, .. } | WriterMessage::Flush(completion) => {
                    completion.complete(Err("journal shut down".into()))
                }
                WriterMessage::Shutdown => {}
            }
        }
    }

    fn flush_batch(&mut self, pending: &mut Vec<(Vec<u8>, Completion)>, pending_bytes: &mut usize) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);
        let batch_bytes = std::mem::take(pending_bytes);

        if self.poisoned.load(Ordering::Acquire) {
            for (_, completion) in batch {
                completion.complete(Err("journal writer failed".into()));
            }
            return;
        }

        let mut buf = Vec::with_capacity(batch_bytes);
        for (payload, _) in &batch {
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(payload);
            buf.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        }

        let result = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());

        match result {
            Ok(()) => {
                self.counters
                    .records
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_written
                    .fetch_add(buf.len() as u64, Ordering::Relaxed);
                debug!(records = batch.len(), bytes = buf.len(), "journal batch synced");
                for (_, completion) in batch {
                    completion.complete(Ok(()));
                }
            }
            Err(e) => {
                error!(error = %e, "journal write failed; poisoning journal");
                self.poisoned.store(true, Ordering::Release);
                let reason = e.to_string();
                for (_, completion) in batch {
                    completion.complete(Err(reason.clone()));
                }
            }
        }
    }
}

/// Read every complete record from a journal file, in order.
///
/// A torn tail (truncated final frame, or a final frame failing its
/// checksum) ends replay cleanly; damage before the tail is an error.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<StateRecord>> {
    Ok(scan_records(path)?.0)
}

/// Walk the journal, returning the decoded records and the byte length of
/// the valid prefix (everything before a torn tail).
fn scan_records(path: impl AsRef<Path>) -> Result<(Vec<StateRecord>, u64)> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut offset = 0u64;

    loop {
        if reader.fill_buf()?.is_empty() {
            break;
        }
        let len = match reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(offset, "torn frame length at journal tail; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if len == 0 || len > MAX_RECORD_LEN {
            return Err(TsoError::CorruptRecord {
                offset,
                reason: format!("implausible record length {len}"),
            });
        }
        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload) {
            if e.kind() == ErrorKind::UnexpectedEof {
                warn!(offset, "torn record at journal tail; stopping replay");
                break;
            }
            return Err(e.into());
        }
        let crc = match reader.read_u32::<BigEndian>() {
            Ok(crc) => crc,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(offset, "torn checksum at journal tail; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if crc32fast::hash(&payload) != crc {
            if reader.fill_buf()?.is_empty() {
                warn!(offset, "checksum mismatch on final record; stopping replay");
                break;
            }
            return Err(TsoError::CorruptRecord {
                offset,
                reason: "checksum mismatch before journal tail".into(),
            });
        }
        let record = StateRecord::decode(&payload).map_err(|reason| TsoError::CorruptRecord {
            offset,
            reason,
        })?;
        records.push(record);
        offset += (FRAME_OVERHEAD + len) as u64;
    }
    Ok((records, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn commit(start_ts: u64, commit_ts: u64, cells: &[u64]) -> StateRecord {
        StateRecord::Commit {
            start_ts,
            commit_ts,
            write_set: cells.iter().copied().map(CellId::new).collect(),
        }
    }

    #[test]
    fn test_record_codec_roundtrip() {
        let records = [
            commit(5, 6, &[1, 2, 3]),
            commit(9, 10, &[]),
            StateRecord::Abort { start_ts: 7 },
            StateRecord::LowWatermark { watermark: 6 },
        ];
        for record in &records {
            let decoded = StateRecord::decode(&record.encode()).unwrap();
            assert_eq!(&decoded, record);
        }
    }

    #[test]
    fn test_commit_layout_is_big_endian() {
        let bytes = commit(5, 6, &[0x0102_0304_0506_0708]).encode();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..9], &5u64.to_be_bytes());
        assert_eq!(&bytes[9..17], &6u64.to_be_bytes());
        assert_eq!(&bytes[17..21], &1u32.to_be_bytes());
        assert_eq!(&bytes[21..29], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(StateRecord::decode(&[]).is_err());
        assert!(StateRecord::decode(&[0x7f, 0, 0]).is_err());
        // Abort with trailing junk.
        let mut bytes = StateRecord::Abort { start_ts: 7 }.encode();
        bytes.push(0);
        assert!(StateRecord::decode(&bytes).is_err());
        // Commit whose write-set count overstates the payload.
        let mut bytes = commit(5, 6, &[1]).encode();
        bytes[17..21].copy_from_slice(&9u32.to_be_bytes());
        assert!(StateRecord::decode(&bytes).is_err());
    }

    #[test]
    fn test_null_journal_acks_immediately() {
        let journal = NullJournal::new();
        let completion = journal.append(&StateRecord::Abort { start_ts: 1 }).unwrap();
        assert!(completion.is_resolved());
        completion.wait().unwrap();
    }

    #[test]
    fn test_file_journal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig::default();
        let written = vec![
            commit(1, 2, &[10, 20]),
            StateRecord::Abort { start_ts: 3 },
            StateRecord::LowWatermark { watermark: 2 },
        ];
        {
            let journal = FileJournal::open(&path, &config).unwrap();
            let completions: Vec<_> = written
                .iter()
                .map(|record| journal.append(record).unwrap())
                .collect();
            journal.flush().unwrap();
            for completion in completions {
                completion.wait().unwrap();
            }
            assert_eq!(journal.stats().records, 3);
            journal.shutdown();
        }
        assert_eq!(read_records(&path).unwrap(), written);
    }

    #[test]
    fn test_flush_timeout_releases_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig {
            // Batch budget far above one record: only the timer can flush.
            batch_size: 1 << 20,
            flush_timeout: Duration::from_millis(5),
            ..TsoConfig::default()
        };
        let journal = FileJournal::open(&path, &config).unwrap();
        let completion = journal.append(&commit(1, 2, &[1])).unwrap();
        completion.wait().unwrap();
        journal.shutdown();
        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig {
            batch_size: 1,
            flush_timeout: Duration::from_secs(3600),
            ..TsoConfig::default()
        };
        let journal = FileJournal::open(&path, &config).unwrap();
        for i in 0..10 {
            journal
                .append(&commit(2 * i + 1, 2 * i + 2, &[i]))
                .unwrap()
                .wait()
                .unwrap();
        }
        assert_eq!(journal.stats().records, 10);
        journal.shutdown();
        assert_eq!(read_records(&path).unwrap().len(), 10);
    }

    #[test]
    fn test_replay_tolerates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig::default();
        {
            let journal = FileJournal::open(&path, &config).unwrap();
            journal.append(&commit(1, 2, &[1])).unwrap();
            journal.append(&commit(3, 4, &[2])).unwrap();
            journal.flush().unwrap();
            journal.shutdown();
        }
        // Tear the final frame.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![commit(1, 2, &[1])]);
    }

    #[test]
    fn test_reopen_truncates_torn_tail_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig::default();
        {
            let journal = FileJournal::open(&path, &config).unwrap();
            journal.append(&commit(1, 2, &[1])).unwrap();
            journal.append(&commit(3, 4, &[2])).unwrap();
            journal.flush().unwrap();
            journal.shutdown();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        // Reopening must clear the torn frame so the new record is not
        // appended behind unreadable bytes.
        {
            let journal = FileJournal::open(&path, &config).unwrap();
            journal.append(&commit(5, 6, &[3])).unwrap();
            journal.flush().unwrap();
            journal.shutdown();
        }
        assert_eq!(
            read_records(&path).unwrap(),
            vec![commit(1, 2, &[1]), commit(5, 6, &[3])]
        );
    }

    #[test]
    fn test_replay_rejects_interior_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.journal");
        let config = TsoConfig::default();
        {
            let journal = FileJournal::open(&path, &config).unwrap();
            journal.append(&commit(1, 2, &[1])).unwrap();
            journal.append(&commit(3, 4, &[2])).unwrap();
            journal.flush().unwrap();
            journal.shutdown();
        }
        // Flip a payload byte inside the first frame.
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(std::io::SeekFrom::Start(6)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xff;
        file.seek(std::io::SeekFrom::Start(6)).unwrap();
        file.write_all(&byte).unwrap();
        drop(file);

        assert!(matches!(
            read_records(&path),
            Err(TsoError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_empty_replay() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(dir.path().join("nope.journal"))
            .unwrap()
            .is_empty());
    }
}
