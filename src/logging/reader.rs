//! Read-side access to the circular store: tail and follow.
//!
//! Readers open the file independently of the writer. `tail` reconstructs
//! logical line order around the wrap marker; `follow` streams appended
//! content as the writer produces it, resetting when the writer wraps.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};

use super::circular::{LogError, MARKER, find_marker};

/// Returns the last `n` lines of the store in logical order.
///
/// When the file has wrapped, physical order differs from logical order: the
/// oldest surviving content sits just after the marker and the newest just
/// before it, so the logical buffer is `[marker_end..EOF] ++ [0..marker)`.
pub fn tail(path: &Path, n: usize) -> Result<Vec<String>, LogError> {
    let contents = std::fs::read(path)?;

    let logical = match find_marker(&contents) {
        Some(offset) => {
            let mut buf = Vec::with_capacity(contents.len());
            buf.extend_from_slice(&contents[offset + MARKER.len()..]);
            buf.extend_from_slice(&contents[..offset]);
            buf
        }
        None => contents,
    };

    let text = String::from_utf8_lossy(&logical);
    let lines: Vec<String> = text
        .lines()
        .filter(|line| !line.trim_matches(['\0', ' ']).is_empty())
        .map(str::to_string)
        .collect();

    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}

/// Streams new content from the store to `out` until `stop` is raised.
///
/// Watches the file for modifications and copies everything between the
/// remembered offset and the current end on each event. A file that shrank
/// below the remembered offset means the writer wrapped; the reader resets
/// to the top. SIGINT/SIGTERM raise `stop` through the registered signal
/// flag, which the wait loop observes within its poll interval.
pub fn follow(path: &Path, stop: &AtomicBool, out: &mut impl Write) -> Result<(), LogError> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let _ = tx.send(event);
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    let mut file = File::open(path)?;
    // Only content appearing after attach is printed.
    let mut last_pos = file.seek(SeekFrom::End(0))?;

    while !stop.load(Ordering::Relaxed) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(_event) => {
                last_pos = copy_new_content(&mut file, last_pos, out)?;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

/// Copies bytes in `[last_pos, EOF)` to `out` and returns the new offset.
/// Detects wrap (current size below the remembered offset) and restarts from
/// the top of the file.
fn copy_new_content(file: &mut File, last_pos: u64, out: &mut impl Write) -> io::Result<u64> {
    let end = file.seek(SeekFrom::End(0))?;
    let mut pos = last_pos;
    if end < pos {
        pos = 0;
    }
    if end > pos {
        file.seek(SeekFrom::Start(pos))?;
        let mut remaining = end - pos;
        let mut chunk = [0u8; 8192];
        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            let got = file.read(&mut chunk[..want])?;
            if got == 0 {
                break;
            }
            out.write_all(&chunk[..got])?;
            remaining -= got as u64;
        }
        out.flush()?;
    }
    Ok(end)
}
