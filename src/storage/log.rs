//! Collection log - the durable form of a collection
//!
//! Every collection is one append-only log file. Each write is persisted
//! here before it is acknowledged; on open the log is replayed to rebuild
//! the in-memory documents and their indexes.
//!
//! Format per entry:
//! - length: u32 (4 bytes)
//! - data: [u8; length] (bincode `LogRecord`)
//! - crc: u32 (4 bytes, CRC32 of length + data)
//!
//! A batch of documents is written as one entry, so it is recovered
//! entirely or not at all.

use crate::storage::document::DocumentId;
use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest accepted entry (16MB)
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Sync strategy for log writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fsync after every write (safest, slowest)
    EveryWrite,
    /// Fsync in batches (balanced)
    #[default]
    Batched,
    /// No fsync, rely on OS (fastest, risk of loss)
    None,
}

/// One document version: id plus the JSON body bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: DocumentId,
    pub body: Vec<u8>,
}

/// A single framed record in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Insert or replace one document
    Put(LogEntry),
    /// Insert several documents atomically
    Batch(Vec<LogEntry>),
}

impl LogRecord {
    pub fn entries(&self) -> &[LogEntry] {
        match self {
            LogRecord::Put(entry) => std::slice::from_ref(entry),
            LogRecord::Batch(entries) => entries,
        }
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        match self {
            LogRecord::Put(entry) => vec![entry],
            LogRecord::Batch(entries) => entries,
        }
    }
}

/// Append-only, CRC-framed log of one collection
pub struct CollectionLog {
    /// File handle for writing
    writer: BufWriter<File>,
    /// Path to log file
    path: PathBuf,
    /// Number of records written
    record_count: u64,
    /// Bytes written since last sync
    bytes_since_sync: usize,
    /// Sync mode
    sync_mode: SyncMode,
    /// Batch sync threshold (bytes)
    sync_threshold: usize,
}

impl CollectionLog {
    /// Open or create a log file.
    ///
    /// Returns the log positioned for appending plus every intact record.
    /// A torn or corrupt tail is cut off so new records follow the last
    /// good one.
    pub fn open(
        path: impl AsRef<Path>,
        sync_mode: SyncMode,
    ) -> StorageResult<(Self, Vec<LogRecord>)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (records, valid_len) = Self::replay(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "Truncating {} trailing bytes of {:?} after last intact record",
                file_len - valid_len,
                path
            );
            file.set_len(valid_len)?;
        }

        let log = Self {
            writer: BufWriter::new(file),
            path,
            record_count: records.len() as u64,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024, // 64KB default batch
        };

        Ok((log, records))
    }

    /// Read every intact record and the byte length they cover
    fn replay(path: &Path) -> StorageResult<(Vec<LogRecord>, u64)> {
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match Self::read_record_from(&mut reader) {
                Ok(Some((record, frame_len))) => {
                    records.push(record);
                    valid_len += frame_len;
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::warn!(
                        "Log replay of {:?} stopped at record {}: {}",
                        path,
                        records.len(),
                        e
                    );
                    break;
                }
            }
        }

        Ok((records, valid_len))
    }

    fn encode(record: &LogRecord) -> StorageResult<Vec<u8>> {
        let data = bincode::serialize(record)?;
        if data.len() > MAX_ENTRY_LEN {
            return Err(StorageError::Corruption(format!(
                "Record too large: {} bytes",
                data.len()
            )));
        }

        let len_bytes = (data.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(&data);
        let crc = hasher.finalize();

        // length (4) + data (N) + crc (4)
        let mut frame = Vec::with_capacity(8 + data.len());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Append a record to the log
    pub fn append(&mut self, record: &LogRecord) -> StorageResult<()> {
        let frame = Self::encode(record)?;
        self.writer.write_all(&frame)?;

        self.record_count += 1;
        self.bytes_since_sync += frame.len();

        self.maybe_sync()
    }

    /// Conditionally sync based on mode and threshold
    fn maybe_sync(&mut self) -> StorageResult<()> {
        match self.sync_mode {
            SyncMode::EveryWrite => {
                self.sync()?;
            }
            SyncMode::Batched => {
                self.writer.flush()?;
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()?;
                }
            }
            SyncMode::None => {
                // Just flush the buffer, no fsync
                self.writer.flush()?;
            }
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Check if there are bytes written but not yet fsynced
    pub fn has_unsynced(&self) -> bool {
        self.bytes_since_sync > 0
    }

    /// Read a single record from a reader, with its frame length
    fn read_record_from<R: Read>(reader: &mut R) -> StorageResult<Option<(LogRecord, u64)>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(StorageError::Corruption(format!(
                "Record length too large: {}",
                len
            )));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(StorageError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        let record: LogRecord = bincode::deserialize(&data)?;
        Ok(Some((record, 8 + len as u64)))
    }

    /// Replace the log with the given entries, one `Put` record each.
    ///
    /// Written to a temporary file first and renamed over the log, so a
    /// crash leaves either the old or the new log in place.
    pub fn rewrite(&mut self, entries: &[LogEntry]) -> StorageResult<()> {
        self.sync()?;

        let tmp_path = self.path.with_extension("log.compact");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for entry in entries {
                tmp.write_all(&Self::encode(&LogRecord::Put(entry.clone()))?)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        );
        self.record_count = entries.len() as u64;
        self.bytes_since_sync = 0;

        Ok(())
    }

    /// Get the number of records in the log
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Get the file size
    pub fn file_size(&self) -> StorageResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    fn entry(id: u64, body: &str) -> LogEntry {
        LogEntry {
            id: DocumentId(id),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_log_basic_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voyages.log");

        {
            let (mut log, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
            assert!(records.is_empty());

            log.append(&LogRecord::Put(entry(1, r#"{"a":1}"#))).unwrap();
            log.append(&LogRecord::Put(entry(2, r#"{"a":2}"#))).unwrap();
            assert_eq!(log.record_count(), 2);
        }

        let (log, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(log.record_count(), 2);
        assert_eq!(records[0], LogRecord::Put(entry(1, r#"{"a":1}"#)));
        assert_eq!(records[1].entries()[0].id, DocumentId(2));
    }

    #[test]
    fn test_batch_is_one_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gps_tracks.log");

        {
            let (mut log, _) = CollectionLog::open(&path, SyncMode::Batched).unwrap();
            let batch: Vec<LogEntry> = (0..50).map(|i| entry(i, "{}")).collect();
            log.append(&LogRecord::Batch(batch)).unwrap();
            log.sync().unwrap();
        }

        let (_, records) = CollectionLog::open(&path, SyncMode::Batched).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entries().len(), 50);
    }

    #[test]
    fn test_crc_corruption_detection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.log");

        {
            let (mut log, _) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
            log.append(&LogRecord::Put(entry(1, r#"{"ok":true}"#))).unwrap();
            log.append(&LogRecord::Put(entry(2, r#"{"ok":false}"#))).unwrap();
        }

        // Corrupt the tail of the second record
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            let len = file.metadata().unwrap().len();
            file.seek(SeekFrom::Start(len - 6)).unwrap();
            file.write_all(&[0xFF, 0xFF]).unwrap();
        }

        let (mut log, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(records.len(), 1);

        // New records follow the last intact one
        log.append(&LogRecord::Put(entry(3, "{}"))).unwrap();
        drop(log);

        let (_, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].entries()[0].id, DocumentId(3));
    }

    #[test]
    fn test_torn_write_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voyages.log");

        {
            let (mut log, _) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
            log.append(&LogRecord::Put(entry(1, "{}"))).unwrap();
        }

        // Half a length prefix
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x10, 0x00]).unwrap();
        }

        let (_, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voyages.log");

        let (mut log, _) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        for i in 0..10 {
            log.append(&LogRecord::Put(entry(1, &format!(r#"{{"v":{}}}"#, i))))
                .unwrap();
        }
        let before = log.file_size().unwrap();

        log.rewrite(&[entry(1, r#"{"v":9}"#)]).unwrap();
        assert_eq!(log.record_count(), 1);
        assert!(log.file_size().unwrap() < before);

        log.append(&LogRecord::Put(entry(2, "{}"))).unwrap();
        drop(log);

        let (_, records) = CollectionLog::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], LogRecord::Put(entry(1, r#"{"v":9}"#)));
    }
}
