// SPDX-License-Identifier: MIT

//! JSONL write-ahead log for state operations, with group commit.
//!
//! Each entry is a single line of JSON: `{"seq":N,"op":{...}}\n`.
//! Operations are buffered and flushed in batches (~10 ms window) with a
//! single fsync; `flush()` is the durability point. On open, a corrupt
//! tail is rotated to `.bak` and the valid prefix preserved.

use crate::snapshot::rotate_bak_path;
use crate::state::StateOp;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum buffered entries before a flush is forced.
const FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    op: &'a StateOp,
}

#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    op: StateOp,
}

/// A parsed WAL entry.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub op: StateOp,
}

pub struct Wal {
    file: File,
    path: PathBuf,
    /// Highest sequence number written (buffered or flushed).
    write_seq: u64,
    /// Buffered JSON lines awaiting flush (without trailing newline).
    write_buffer: Vec<Vec<u8>>,
    last_flush: Instant,
}

impl Wal {
    /// Open or create a WAL, scanning it for the highest sequence number.
    ///
    /// A corrupt tail rotates the file to `.bak`, keeping the valid
    /// prefix in a fresh file.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = open_append(path)?;
        let (mut write_seq, corrupt) = scan(&file)?;

        if corrupt {
            let valid_lines = valid_prefix(&file)?;
            drop(file);

            let bak_path = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "corrupt WAL tail, rotating to .bak and keeping valid prefix",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut fresh = File::create(path)?;
                for line in &valid_lines {
                    fresh.write_all(line.as_bytes())?;
                    fresh.write_all(b"\n")?;
                }
                fresh.sync_all()?;
            }

            file = open_append(path)?;
            write_seq = scan(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Append an operation to the write buffer. Returns the assigned
    /// sequence number. Not durable until [`Wal::flush`].
    pub fn append(&mut self, op: &StateOp) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let bytes = serde_json::to_vec(&WalRecordRef { seq, op })?;
        self.write_buffer.push(bytes);
        Ok(seq)
    }

    /// Whether the group-commit window has elapsed or the buffer is full.
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Write all buffered entries with a single fsync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        for mut bytes in self.write_buffer.drain(..) {
            bytes.push(b'\n');
            self.file.write_all(&bytes)?;
        }
        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// All entries with sequence greater than `seq` (replay after a
    /// snapshot). Stops at the first corrupt entry.
    pub fn entries_after(&mut self, seq: u64) -> Result<Vec<WalEntry>, WalError> {
        self.flush()?;

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "corrupt WAL entry during replay, stopping");
                    break;
                }
            };
            if record.seq > seq {
                entries.push(WalEntry {
                    seq: record.seq,
                    op: record.op,
                });
            }
        }
        Ok(entries)
    }

    /// Drop entries with sequence below `seq` (after a durable
    /// checkpoint). Rewrites the file atomically.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;

        let kept: Vec<String> = {
            let mut reader = BufReader::new(self.file.try_clone()?);
            reader.seek(SeekFrom::Start(0))?;
            let mut kept = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                    Err(e) => return Err(e.into()),
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let record: WalRecord = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(_) => break,
                };
                if record.seq >= seq {
                    kept.push(trimmed.to_string());
                }
            }
            kept
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for line in &kept {
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, io::Error> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
}

/// Scan for `(max_seq, corrupt)`.
fn scan(file: &File) -> Result<(u64, bool), WalError> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut max_seq = 0u64;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok((max_seq, true)),
            Err(e) => return Err(e.into()),
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalRecord>(trimmed) {
            Ok(record) => max_seq = max_seq.max(record.seq),
            Err(_) => return Ok((max_seq, true)),
        }
    }
    Ok((max_seq, false))
}

/// All parseable lines before the first corrupt entry.
fn valid_prefix(file: &File) -> Result<Vec<String>, WalError> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if serde_json::from_str::<WalRecord>(trimmed).is_err() {
            break;
        }
        lines.push(trimmed.to_string());
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
