//! Per-launch cache files.
//!
//! Generated configs and trust material are written to
//! `<no_backup>/<prefix>_<stamp>.<ext>`, where `stamp` is strictly increasing
//! and anchored to wall-clock time, so a restarted process does not reuse
//! names left behind by an earlier run. Every path handed out is recorded so the
//! owning instance can delete it on close.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// Strictly increasing nanoseconds since the Unix epoch. The epoch offset is
/// read once; later stamps advance with the monotonic clock.
#[must_use]
pub fn monotonic_stamp() -> u64 {
    static ANCHOR: OnceLock<(Instant, u64)> = OnceLock::new();
    static LAST: AtomicU64 = AtomicU64::new(0);

    let (instant, epoch_nanos) = ANCHOR.get_or_init(|| {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        (Instant::now(), since_epoch)
    });
    let elapsed = u64::try_from(instant.elapsed().as_nanos()).unwrap_or(u64::MAX);
    let now = epoch_nanos.saturating_add(elapsed);
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

/// Hands out cache file paths under one directory and remembers them.
#[derive(Debug, Clone)]
pub struct CacheFileFactory {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl CacheFileFactory {
    /// Factory writing under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    /// Directory cache files are created in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a fresh path and register it. Nothing is written.
    pub fn create(&mut self, prefix: &str, extension: &str) -> PathBuf {
        let path = self
            .dir
            .join(format!("{prefix}_{}.{extension}", monotonic_stamp()));
        self.files.push(path.clone());
        path
    }

    /// Reserve a fresh path, register it and write `contents` to it.
    ///
    /// The path is registered before writing, so a partial write is still
    /// cleaned up.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&mut self, prefix: &str, extension: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.create(prefix, extension);
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote cache file");
        Ok(path)
    }

    /// Registered paths, oldest first.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Delete every registered file, best effort, and forget them.
    /// Returns how many deletions were attempted.
    pub async fn delete_all(&mut self) -> usize {
        let files = std::mem::take(&mut self.files);
        for path in &files {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Deleted cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cache file"),
            }
        }
        files.len()
    }

    /// Synchronous [`delete_all`](Self::delete_all) for teardown paths that
    /// cannot await.
    pub fn delete_all_blocking(&mut self) -> usize {
        let files = std::mem::take(&mut self.files);
        for path in &files {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Deleted cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cache file"),
            }
        }
        files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_strictly_increase() {
        let a = monotonic_stamp();
        let b = monotonic_stamp();
        let c = monotonic_stamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn stamps_are_anchored_to_wall_clock() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        // One day of slack either side.
        let day = 86_400_000_000_000_u128;
        let stamp = u128::from(monotonic_stamp());
        assert!(stamp + day > before);
        assert!(stamp < before + day);
    }

    #[test]
    fn create_uses_prefix_and_extension() {
        let mut factory = CacheFileFactory::new("/nb");
        let first = factory.create("naive", "json");
        let second = factory.create("naive", "json");
        assert_ne!(first, second);

        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("naive_"));
        assert!(name.ends_with(".json"));
        assert_eq!(factory.files(), &[first, second]);
    }

    #[tokio::test]
    async fn delete_all_removes_and_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = CacheFileFactory::new(dir.path().join("no_backup"));
        let written = factory.write("shadowquic", "yaml", "inbound: {}\n").unwrap();
        let reserved = factory.create("naive", "ca");
        assert!(written.exists());

        assert_eq!(factory.delete_all().await, 2);
        assert!(!written.exists());
        assert!(!reserved.exists());
        assert_eq!(factory.delete_all().await, 0);
    }

    #[test]
    fn delete_all_blocking_removes_and_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = CacheFileFactory::new(dir.path());
        let written = factory.write("naive", "json", "{}").unwrap();

        assert_eq!(factory.delete_all_blocking(), 1);
        assert!(!written.exists());
        assert!(factory.files().is_empty());
    }
}
