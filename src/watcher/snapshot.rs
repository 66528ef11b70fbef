use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::WatchError;

/// A visible regular file observed during one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// The set of visible regular files in one directory at one instant.
///
/// Entries are keyed by absolute path; two snapshots are only meaningfully
/// comparable when they were taken of the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    dir: PathBuf,
    entries: BTreeMap<PathBuf, DirectoryEntry>,
}

impl Snapshot {
    /// List `dir` non-recursively.
    ///
    /// Hidden names (leading `.`) and anything that is not a regular file after
    /// following symlinks are left out. Entries that disappear between the
    /// listing and the stat are skipped; a failure to read the directory
    /// itself is reported as [`WatchError::DirectoryUnavailable`].
    ///
    /// A relative `dir` is resolved against the working directory, so entry
    /// paths are always absolute.
    pub fn take(dir: &Path) -> Result<Self, WatchError> {
        let unavailable = |source| WatchError::DirectoryUnavailable {
            path: dir.to_path_buf(),
            source,
        };
        let dir = std::path::absolute(dir).map_err(unavailable)?;
        let dir = dir.as_path();

        let mut entries = BTreeMap::new();
        for entry in fs::read_dir(dir).map_err(unavailable)? {
            let entry = entry.map_err(unavailable)?;
            if is_hidden(&entry.file_name()) {
                continue;
            }

            let path = entry.path();
            // Follows symlinks; a dangling link or a racing delete just drops out.
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }

            entries.insert(
                path.clone(),
                DirectoryEntry {
                    path,
                    size: metadata.len(),
                },
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    /// An empty snapshot of `dir`, as if nothing had been seen yet.
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    /// Entries present in `newer` but not in `self`. Removals are never reported.
    pub fn added_in<'a>(&self, newer: &'a Snapshot) -> Vec<&'a DirectoryEntry> {
        diff(self, newer)
    }
}

/// Entries of `new` whose path is absent from `old`.
///
/// The result order is not part of the contract; callers treat it as a set.
pub fn diff<'a>(old: &Snapshot, new: &'a Snapshot) -> Vec<&'a DirectoryEntry> {
    debug_assert_eq!(old.dir, new.dir, "snapshots of different directories");
    new.entries
        .iter()
        .filter(|(path, _)| !old.entries.contains_key(*path))
        .map(|(_, entry)| entry)
        .collect()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}
