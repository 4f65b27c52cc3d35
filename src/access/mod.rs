//! Persisted access control list.
//!
//! A sorted set of sender identifiers backed by a plain text file, one
//! decimal id per line. The list is consulted on every inbound update and
//! mutated only by admin commands, so reads take a shared lock and writes an
//! exclusive one. Mutations persist before the write lock is released: two
//! observers can never disagree about whether a change was durable.
//!
//! Saves are atomic: the new contents go to a sibling `.tmp` file which is
//! renamed over the target, so a reader opening the file mid-save sees either
//! the old or the new list, never a torn one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use crate::types::SenderId;

/// Maximum number of retained entries.
pub const MAX_ACCESS: usize = 256;

/// Errors from loading or persisting the list.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Filesystem failure reading or writing the backing file.
    #[error("access list I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of [`AccessList::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The id was inserted and persisted.
    Added,
    /// The id was already present; nothing changed.
    AlreadyPresent,
    /// The list is at [`MAX_ACCESS`] entries.
    Full,
}

/// Outcome of [`AccessList::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The id was removed and the change persisted.
    Removed,
    /// The id was not in the list.
    NotPresent,
}

/// Sorted, file-persisted set of authorized senders.
pub struct AccessList {
    ids: RwLock<Vec<i64>>,
    path: PathBuf,
}

impl AccessList {
    /// Loads the list from `path`, creating an empty file with mode 0600 on
    /// first run. Non-numeric lines are skipped; entries beyond
    /// [`MAX_ACCESS`] are dropped; the result is sorted ascending.
    pub fn load(path: impl Into<PathBuf>) -> Result<AccessList, AccessError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                create_private(&path).map_err(|source| AccessError::Io {
                    path: path.clone(),
                    source,
                })?;
                String::new()
            }
            Err(source) => return Err(AccessError::Io { path, source }),
        };

        let mut ids: Vec<i64> = contents
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .take(MAX_ACCESS)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        Ok(AccessList {
            ids: RwLock::new(ids),
            path,
        })
    }

    /// Whether `sender` is authorized. Read-locked binary search.
    pub fn contains(&self, sender: SenderId) -> bool {
        self.read().binary_search(&sender.0).is_ok()
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Inserts `sender` at its sorted position and persists the list.
    pub fn add(&self, sender: SenderId) -> Result<AddOutcome, AccessError> {
        let mut ids = self.write();
        let pos = match ids.binary_search(&sender.0) {
            Ok(_) => return Ok(AddOutcome::AlreadyPresent),
            Err(pos) => pos,
        };
        if ids.len() >= MAX_ACCESS {
            tracing::warn!(limit = MAX_ACCESS, "access list full");
            return Ok(AddOutcome::Full);
        }
        ids.insert(pos, sender.0);
        self.save(&ids)?;
        Ok(AddOutcome::Added)
    }

    /// Removes `sender` and persists the list.
    pub fn remove(&self, sender: SenderId) -> Result<RemoveOutcome, AccessError> {
        let mut ids = self.write();
        let pos = match ids.binary_search(&sender.0) {
            Ok(pos) => pos,
            Err(_) => return Ok(RemoveOutcome::NotPresent),
        };
        ids.remove(pos);
        self.save(&ids)?;
        Ok(RemoveOutcome::Removed)
    }

    /// Writes the list to a sibling `.tmp` (mode 0600) and renames it over
    /// the target. Callers hold the write lock.
    fn save(&self, ids: &[i64]) -> Result<(), AccessError> {
        let tmp_path = self.path.with_extension("tmp");
        let io_err = |source| AccessError::Io {
            path: self.path.clone(),
            source,
        };

        let mut out = String::with_capacity(ids.len() * 12);
        for id in ids {
            out.push_str(&id.to_string());
            out.push('\n');
        }

        let mut file = create_private(&tmp_path).map_err(io_err)?;
        file.write_all(out.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            io_err(source)
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<i64>> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<i64>> {
        self.ids.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates (truncating) a file readable and writable by the owner only.
fn create_private(path: &Path) -> io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
