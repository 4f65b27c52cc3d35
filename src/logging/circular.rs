//! Bounded circular log file with crash recovery.
//!
//! The store is a single file with a hard byte cap. Writes append until the
//! cap would be exceeded, then wrap to offset 0 and overwrite older content.
//! A 20-byte sentinel marker sits immediately after the most recent line
//! whenever the file has wrapped; on reopen the marker pinpoints where
//! writing should resume. Invariant after every write: exactly one marker
//! exists iff the file has wrapped.
//!
//! Each write seeks, writes, and flushes under one mutex, and mirrors the
//! line to stderr inside the same critical section so interleaved lines stay
//! whole. The level gate is a relaxed atomic checked before any formatting.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Utc;
use thiserror::Error;

use super::LogLevel;

/// Sentinel written at the wrap point.
pub const MARKER: &[u8] = b"---^-OVERWRITE-^---\n";
const MARKER_LEN: usize = MARKER.len();

/// Smallest permissible file cap in bytes.
const MIN_FILE_CAP: u64 = 256;

/// Errors from the circular log store.
#[derive(Debug, Error)]
pub enum LogError {
    /// The configured cap is below the minimum.
    #[error("log cap {0} below minimum {MIN_FILE_CAP} bytes")]
    CapTooSmall(u64),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// File watch failure in `follow`.
    #[error("log watch failed: {0}")]
    Watch(#[from] notify::Error),
}

struct LogFile {
    file: File,
    cap: u64,
    write_pos: u64,
    overwriting: bool,
}

/// Append handle for the circular store.
pub struct CircularLog {
    state: Mutex<LogFile>,
    min_level: AtomicU8,
}

impl CircularLog {
    /// Opens (or creates) the store at `path` with the given byte cap and
    /// recovers the write position: resume at the marker when one exists,
    /// wrap to the top when the file is full without one, append otherwise.
    pub fn init(path: &Path, cap: u64) -> Result<CircularLog, LogError> {
        if cap < MIN_FILE_CAP {
            return Err(LogError::CapTooSmall(cap));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let (write_pos, overwriting) = if file_size == 0 {
            (0, false)
        } else {
            let mut contents = Vec::with_capacity(file_size as usize);
            file.read_to_end(&mut contents)?;
            match find_marker(&contents) {
                Some(offset) => (offset as u64, true),
                None if file_size >= cap => (0, true),
                None => (file_size, false),
            }
        };

        Ok(CircularLog {
            state: Mutex::new(LogFile {
                file,
                cap,
                write_pos,
                overwriting,
            }),
            min_level: AtomicU8::new(LogLevel::Info as u8),
        })
    }

    /// Sets the minimum level below which lines are dropped.
    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Current minimum level.
    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    /// Formats and writes one line, mirroring it to stderr. Lines below the
    /// minimum level are dropped before formatting. Write failures are
    /// swallowed: the log writer has nowhere else to report.
    pub fn write(&self, level: LogLevel, message: &str) {
        if (level as u8) < self.min_level.load(Ordering::Relaxed) {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let mut line = format!("[{timestamp}] [{}] {message}", level.tag());
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        eprint!("{line}");
        let _ = state.write_line(line.as_bytes());
    }
}

impl LogFile {
    /// Writes one formatted line at the cursor, wrapping first when it would
    /// not fit, and refreshes the marker. Call sites hold the state mutex.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        // A single line can never exceed the space left over for the marker.
        let usable = (self.cap - MARKER_LEN as u64) as usize;
        let line = &line[..line.len().min(usable)];

        let marker_len = if self.overwriting { MARKER_LEN as u64 } else { 0 };
        if self.write_pos + line.len() as u64 + marker_len > self.cap {
            self.blank_stale_marker()?;
            self.write_pos = 0;
            self.overwriting = true;
        }

        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(line)?;
        self.write_pos += line.len() as u64;

        if self.overwriting {
            // The fresh marker goes right after the line. The cursor stays
            // put so the next line overwrites the marker.
            self.file.seek(SeekFrom::Start(self.write_pos))?;
            self.file.write_all(MARKER)?;
        }
        self.file.flush()
    }

    /// Blanks the previous marker with spaces before wrapping so only one
    /// marker ever exists.
    fn blank_stale_marker(&mut self) -> io::Result<()> {
        if self.overwriting && self.write_pos + MARKER_LEN as u64 <= self.cap {
            let mut blanks = [b' '; MARKER_LEN];
            blanks[MARKER_LEN - 1] = b'\n';
            self.file.seek(SeekFrom::Start(self.write_pos))?;
            self.file.write_all(&blanks)?;
        }
        Ok(())
    }
}

/// Scans for the marker at line boundaries. Returns its byte offset.
pub(super) fn find_marker(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos + MARKER_LEN <= buf.len() {
        if &buf[pos..pos + MARKER_LEN] == MARKER {
            return Some(pos);
        }
        match buf[pos..].iter().position(|&b| b == b'\n') {
            Some(newline) => pos += newline + 1,
            None => return None,
        }
    }
    None
}
