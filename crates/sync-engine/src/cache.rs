// crates/sync-engine/src/cache.rs
//
// C2: content-addressed, session-scoped, LRU-evicted on-disk cache for
// decoded analysis and full-resolution artifacts. One SessionCache owns one
// session's lock file and cache namespace.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use sync_core::error::{EngineError, EngineResult};

const DEFAULT_CEILING_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const ANALYSIS_RESERVATION_BYTES: u64 = 50 * 1024 * 1024;
const FULL_RES_RESERVATION_BYTES: u64 = 200 * 1024 * 1024;
const LOCK_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Kind of artifact being written, selecting the eviction headroom
/// reserved before the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Analysis,
    FullResolution,
}

impl ArtifactKind {
    fn reservation_bytes(self) -> u64 {
        match self {
            ArtifactKind::Analysis => ANALYSIS_RESERVATION_BYTES,
            ArtifactKind::FullResolution => FULL_RES_RESERVATION_BYTES,
        }
    }
}

pub struct SessionCache {
    root: PathBuf,
    session_id: String,
    ceiling_bytes: u64,
    eviction_lock: Mutex<()>,
}

impl SessionCache {
    /// Open (creating if needed) a cache rooted at the OS-appropriate user
    /// cache directory, start a new session, and sweep stale lock files
    /// left behind by crashed prior sessions.
    pub fn open() -> EngineResult<Self> {
        let dirs = ProjectDirs::from("", "", "audiosync")
            .ok_or_else(|| EngineError::internal("could not determine cache directory"))?;
        Self::open_at(dirs.cache_dir().to_path_buf())
    }

    /// Open a cache rooted at an explicit directory (used by tests and by
    /// callers that want an isolated cache root).
    pub fn open_at(root: PathBuf) -> EngineResult<Self> {
        fs::create_dir_all(&root)?;
        let cache = SessionCache {
            root,
            session_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            ceiling_bytes: DEFAULT_CEILING_BYTES,
            eviction_lock: Mutex::new(()),
        };
        cache.sweep_stale_locks()?;
        cache.write_lock()?;
        eprintln!("[cache] session {} opened at {}", cache.session_id, cache.root.display());
        Ok(cache)
    }

    pub fn with_ceiling_bytes(mut self, ceiling_bytes: u64) -> Self {
        self.ceiling_bytes = ceiling_bytes;
        self
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(format!("{}.lock", self.session_id))
    }

    fn write_lock(&self) -> EngineResult<()> {
        let pid = std::process::id();
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        fs::write(self.lock_path(), format!("{pid}\n{started}\n"))?;
        Ok(())
    }

    fn sweep_stale_locks(&self) -> EngineResult<()> {
        let now = SystemTime::now();
        for entry in fs::read_dir(&self.root).into_iter().flatten().flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(age) = now.duration_since(meta.modified().unwrap_or(now)) {
                    if age > LOCK_STALE_AFTER {
                        let _ = fs::remove_file(&path);
                        eprintln!("[cache] removed stale lock: {}", path.display());
                    }
                }
            }
        }
        Ok(())
    }

    /// Derive a content-address key for `path`, prefixed with this
    /// session's id to avoid collisions with concurrent processes.
    pub fn content_key(&self, path: &Path) -> EngineResult<String> {
        let meta = fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let size = meta.len();

        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(mtime.to_le_bytes());
        hasher.update(size.to_le_bytes());
        let digest = hasher.finalize();
        let short: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        Ok(format!("{}-{short}", self.session_id))
    }

    fn artifact_path(&self, key: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{key}.{suffix}"))
    }

    /// Fetch a cached artifact's path if present on disk.
    pub fn get(&self, key: &str, suffix: &str) -> Option<PathBuf> {
        let path = self.artifact_path(key, suffix);
        path.exists().then_some(path)
    }

    /// Reserve headroom for a new artifact of the given kind, evicting
    /// least-recently-modified files (skipping other active sessions' and
    /// lock files) until the ceiling is respected, then return the path the
    /// caller should write to.
    pub fn reserve(&self, key: &str, suffix: &str, kind: ArtifactKind) -> EngineResult<PathBuf> {
        let _guard = self.eviction_lock.lock().unwrap();
        self.evict_to_fit(kind.reservation_bytes())?;
        Ok(self.artifact_path(key, suffix))
    }

    fn evict_to_fit(&self, reservation: u64) -> EngineResult<()> {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut total: u64 = 0;
        for entry in fs::read_dir(&self.root).into_iter().flatten().flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("lock") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            total += meta.len();
            entries.push((path, meta.len(), meta.modified().unwrap_or(UNIX_EPOCH)));
        }

        if total + reservation <= self.ceiling_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, mtime)| *mtime);
        for (path, size, _) in entries {
            if total + reservation <= self.ceiling_bytes {
                break;
            }
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if self.is_other_active_session(&name) {
                continue;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(size);
                eprintln!("[cache] evicted {}", path.display());
            }
        }
        Ok(())
    }

    /// Delete a single-use artifact immediately after the stitcher consumes
    /// it, as full-resolution buffers are never reused across clips.
    pub fn release(&self, path: &Path) {
        if path.starts_with(&self.root) {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    eprintln!("[cache] release failed for {}: {e}", path.display());
                }
            }
        }
    }

    /// An artifact belongs to another session's active namespace only if
    /// that session's lock file still exists and isn't stale; a crashed
    /// session's lock either never existed or has already aged past
    /// `LOCK_STALE_AFTER`, so its artifacts are evictable like any other.
    fn is_other_active_session(&self, filename: &str) -> bool {
        let Some(other_id) = filename.split('-').next() else {
            return false;
        };
        if other_id == self.session_id || other_id.is_empty() {
            return false;
        }
        let lock_path = self.root.join(format!("{other_id}.lock"));
        let Ok(meta) = fs::metadata(&lock_path) else {
            return false;
        };
        let now = SystemTime::now();
        match now.duration_since(meta.modified().unwrap_or(now)) {
            Ok(age) => age <= LOCK_STALE_AFTER,
            Err(_) => true,
        }
    }

    /// Remove this session's files and lock, preserving any other active
    /// session's artifacts.
    pub fn close(&self) {
        for entry in fs::read_dir(&self.root).into_iter().flatten().flatten() {
            let path = entry.path();
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.starts_with(&self.session_id) {
                let _ = fs::remove_file(&path);
            }
        }
        eprintln!("[cache] session {} closed", self.session_id);
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_root() -> PathBuf {
        tempfile::tempdir().unwrap().into_path()
    }

    #[test]
    fn content_key_is_stable_for_unchanged_file() {
        let cache = SessionCache::open_at(temp_root()).unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        let k1 = cache.content_key(f.path()).unwrap();
        let k2 = cache.content_key(f.path()).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn reserve_then_get_round_trips_a_path() {
        let cache = SessionCache::open_at(temp_root()).unwrap();
        let path = cache.reserve("mykey", "wav", ArtifactKind::Analysis).unwrap();
        fs::write(&path, b"fake wav data").unwrap();
        let found = cache.get("mykey", "wav").unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn release_removes_artifact() {
        let cache = SessionCache::open_at(temp_root()).unwrap();
        let path = cache.reserve("key2", "wav", ArtifactKind::FullResolution).unwrap();
        fs::write(&path, b"data").unwrap();
        cache.release(&path);
        assert!(!path.exists());
    }

    #[test]
    fn eviction_keeps_total_under_ceiling() {
        let root = temp_root();
        let cache = SessionCache::open_at(root.clone())
            .unwrap()
            .with_ceiling_bytes(10);
        for i in 0..5 {
            let path = cache
                .reserve(&format!("k{i}"), "bin", ArtifactKind::Analysis)
                .unwrap();
            fs::write(&path, vec![0u8; 4]).unwrap();
        }
        let total: u64 = fs::read_dir(&root)
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) != Some("lock"))
            .map(|e| e.metadata().unwrap().len())
            .sum();
        assert!(total <= 10 + 4);
    }

    #[test]
    fn crashed_other_session_without_a_lock_file_is_evicted() {
        let root = temp_root();
        fs::write(root.join("deadsession-aaaaaaaa.wav"), vec![0u8; 8]).unwrap();
        let cache = SessionCache::open_at(root.clone()).unwrap().with_ceiling_bytes(4);
        let path = cache.reserve("mine", "bin", ArtifactKind::Analysis).unwrap();
        fs::write(&path, vec![0u8; 4]).unwrap();
        assert!(!root.join("deadsession-aaaaaaaa.wav").exists());
    }

    #[test]
    fn live_other_session_with_a_fresh_lock_is_preserved() {
        let root = temp_root();
        fs::write(root.join("livesession-bbbbbbbb.wav"), vec![0u8; 8]).unwrap();
        fs::write(root.join("livesession.lock"), b"1\n1\n").unwrap();
        let cache = SessionCache::open_at(root.clone()).unwrap().with_ceiling_bytes(4);
        let path = cache.reserve("mine", "bin", ArtifactKind::Analysis).unwrap();
        fs::write(&path, vec![0u8; 4]).unwrap();
        assert!(root.join("livesession-bbbbbbbb.wav").exists());
    }
}
