//! Delayed removal of served artifacts.
//!
//! Every served file is scheduled for deletion once the retention window has
//! elapsed. The task is fire-and-forget: it never blocks the response and a
//! failed removal is only logged. At start-up, leftovers from a previous run
//! are swept with the same retention rule.

use std::{
    collections::HashSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Janitor {
    retention: Duration,
    pending: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Janitor {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of paths waiting for their deletion task.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Schedules `path` for deletion after the retention window.
    ///
    /// Returns `false` when the path is already scheduled; it is then left to
    /// the earlier task. Must be called from within a tokio runtime.
    pub fn schedule(&self, path: PathBuf) -> bool {
        if !self.pending.lock().insert(path.clone()) {
            debug!(path = %path.display(), "deletion already scheduled");
            return false;
        }

        let pending = self.pending.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            purge(&path);
            pending.lock().remove(&path);
        });
        true
    }
}

/// Removes `path` if it still exists. Returns whether a file was removed;
/// a path that is already gone is not an error.
pub fn purge(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "cleaned up artifact");
            true
        }
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), "error cleaning up artifact: {err}");
            false
        }
    }
}

/// Deletes files directly inside `dir` that were last modified at least
/// `max_age` ago. Returns how many were removed.
pub fn sweep(dir: &Path, max_age: Duration) -> usize {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= max_age)
        })
        .map(|entry| purge(entry.path()))
        .filter(|removed| *removed)
        .count()
}
