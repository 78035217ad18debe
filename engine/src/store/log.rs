//! Append-only, per-collection on-disk log (component C6 persistence).
//!
//! Each collection owns one log file of length-prefixed, bincode-encoded
//! [`VersionRecord`]s, written only at commit time. On open the log is
//! replayed front to back to rebuild in-memory chain heads; an incomplete
//! trailing entry (a crash mid-write) is truncated away rather than treated
//! as corruption, the same recovery story as a bitcask-style log.
//!
//! Framing: a big-endian `u32` record length, followed by that many bytes of
//! bincode-encoded [`VersionRecord`].

use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde_derive::{Deserialize, Serialize};

use crate::clock::{Timestamp, TxnId};
use crate::document::Document;
use crate::error::{CResult, Error};
use crate::version::Payload;

/// The on-disk shape of one version: enough to reconstruct a `Version` node
/// and which document id it belongs to.
#[derive(Serialize, Deserialize)]
pub struct VersionRecord {
    pub doc_id: String,
    pub timestamp: Timestamp,
    pub txn_id: TxnId,
    pub tombstone: bool,
    pub document: Option<Document>,
}

impl VersionRecord {
    pub fn new(doc_id: String, timestamp: Timestamp, txn_id: TxnId, payload: &Payload) -> Self {
        match payload {
            Payload::Live(doc) => Self { doc_id, timestamp, txn_id, tombstone: false, document: Some(doc.clone()) },
            Payload::Tombstone => Self { doc_id, timestamp, txn_id, tombstone: true, document: None },
        }
    }

    pub fn into_payload(self) -> Payload {
        if self.tombstone {
            Payload::Tombstone
        } else {
            Payload::Live(self.document.expect("non-tombstone record always carries a document"))
        }
    }
}

/// An append-only, exclusively-locked log file for one collection.
pub struct CollectionLog {
    path: PathBuf,
    file: std::fs::File,
}

impl CollectionLog {
    /// Opens (creating if absent) and exclusively locks the log file,
    /// erroring if another process already holds the lock.
    pub fn open(path: impl AsRef<Path>) -> CResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive()?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the whole log, calling `apply` with each record in file
    /// order. Truncates an incomplete trailing entry rather than failing.
    pub fn replay<F: FnMut(VersionRecord)>(&mut self, mut apply: F) -> CResult<()> {
        let file_len = self.file.metadata()?.len();
        let mut len_buf = [0u8; 4];
        let mut reader = BufReader::new(&mut self.file);
        let mut pos = reader.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            let mut read_one = || -> Result<VersionRecord, std::io::Error> {
                reader.read_exact(&mut len_buf)?;
                let record_len = u32::from_be_bytes(len_buf) as usize;
                let mut buf = vec![0u8; record_len];
                reader.read_exact(&mut buf)?;
                bincode::deserialize(&buf)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))
            };

            match read_one() {
                Ok(record) => {
                    pos = reader.stream_position()?;
                    apply(record);
                }
                Err(err) if is_truncation(&err) => {
                    log::error!("collection log {:?}: incomplete entry at offset {pos}, truncating", self.path);
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(Error::Internal(err.to_string())),
            }
        }

        Ok(())
    }

    /// Appends one record, flushing but not necessarily fsyncing (see
    /// [`CollectionLog::sync`]). Returns the byte offset it was written at.
    pub fn append(&mut self, record: &VersionRecord) -> CResult<u64> {
        let mut encoded = crate::buffer_pool::get();
        let encode_result = bincode::serialize_into(&mut encoded, record);
        if let Err(err) = encode_result {
            crate::buffer_pool::put(encoded);
            return Err(err.into());
        }
        let len = encoded.len() as u32;

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::with_capacity(4 + encoded.len(), &mut self.file);
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&encoded)?;
        let flush_result = writer.flush();
        crate::buffer_pool::put(encoded);
        flush_result?;
        Ok(pos)
    }

    /// Fsyncs the log file to disk. Called at commit time when the database
    /// is configured for durable commits (see `config::EngineConfig`).
    pub fn sync(&mut self) -> CResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for CollectionLog {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            log::warn!("failed to unlock collection log {:?}: {err}", self.path);
        }
    }
}

fn is_truncation(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::UnexpectedEof || err.kind() == std::io::ErrorKind::InvalidData
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample(doc_id: &str, ts: u64) -> VersionRecord {
        let doc = Document::from_value(json!({"_id": doc_id, "v": ts})).unwrap();
        VersionRecord::new(doc_id.to_string(), ts, ts, &Payload::Live(doc))
    }

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.log");

        {
            let mut log = CollectionLog::open(&path).unwrap();
            log.append(&sample("a", 1)).unwrap();
            log.append(&sample("b", 2)).unwrap();
        }

        let mut log = CollectionLog::open(&path).unwrap();
        let mut seen = Vec::new();
        log.replay(|record| seen.push(record.doc_id)).unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn truncated_trailing_entry_is_recovered_from() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.log");

        {
            let mut log = CollectionLog::open(&path).unwrap();
            log.append(&sample("a", 1)).unwrap();
        }

        // Corrupt: append a length prefix claiming more bytes than follow.
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_be_bytes()).unwrap();
            file.write_all(b"short").unwrap();
        }

        let mut log = CollectionLog::open(&path).unwrap();
        let mut seen = Vec::new();
        log.replay(|record| seen.push(record.doc_id)).unwrap();
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn second_open_while_locked_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.log");
        let _log = CollectionLog::open(&path).unwrap();
        assert!(CollectionLog::open(&path).is_err());
    }
}
