//! Persistent checksum cache keyed by path, inner entry, and modification time
//!
//! The whole cache is a single JSON object mapping a flattened key to an
//! 8-digit hex checksum. It is loaded on every resolution and rewritten in
//! full on every miss. There is no locking: two processes resolving at the
//! same time can lose each other's rows (last writer wins).
//!
//! Rows are never deleted. When a file's mtime changes its key changes with
//! it, so the old row simply stops being read.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::Checksum;
use crate::error::{Error, Result};

/// Identity of one checksummed payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintKey {
    pub container_path: PathBuf,
    pub inner_entry: Option<String>,
    /// Nanoseconds since the UNIX epoch
    pub modified_time: i64,
}

impl FingerprintKey {
    pub fn new(container_path: impl Into<PathBuf>, inner_entry: Option<String>, modified_time: i64) -> Self {
        Self {
            container_path: container_path.into(),
            inner_entry,
            modified_time,
        }
    }

    /// Build a key from the file's current modification time
    pub fn for_file(path: &Path, inner_entry: Option<String>) -> Result<Self> {
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(path, e))?;
        Ok(Self::new(path, inner_entry, mtime_nanos(modified)))
    }

    /// `path:entry:mtime` for archive entries, `path:mtime` for plain files
    pub fn flatten(&self) -> String {
        match &self.inner_entry {
            Some(entry) => format!(
                "{}:{}:{}",
                self.container_path.display(),
                entry,
                self.modified_time
            ),
            None => format!("{}:{}", self.container_path.display(), self.modified_time),
        }
    }
}

fn mtime_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos()).map(|n| -n).unwrap_or(i64::MIN),
    }
}

/// JSON-file backed checksum cache
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    path: PathBuf,
}

impl FingerprintCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the cached checksum for `key`, or compute, store, and persist it
    pub fn resolve<F>(&self, key: &FingerprintKey, compute: F) -> Result<Checksum>
    where
        F: FnOnce() -> Result<Checksum>,
    {
        let mut entries = self.load()?;
        let flat = key.flatten();

        if let Some(cached) = entries.get(&flat) {
            tracing::debug!("Checksum cache hit: {}", flat);
            return Ok(*cached);
        }

        tracing::debug!("Checksum cache miss: {}", flat);
        let checksum = compute()?;
        entries.insert(flat, checksum);
        self.save(&entries)?;
        Ok(checksum)
    }

    /// Read every row; a missing file is an empty cache
    pub fn load(&self) -> Result<BTreeMap<String, Checksum>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&data).map_err(|e| Error::Cache {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Rewrite the whole cache: temp file first, then rename over the original
    fn save(&self, entries: &BTreeMap<String, Checksum>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let temp_path = self.path.with_extension("tmp");
        let file = File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, entries).map_err(|e| Error::Cache {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        writer.flush().map_err(|e| Error::io(&temp_path, e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| Error::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    #[test]
    fn test_flatten() {
        let plain = FingerprintKey::new("/roms/nes/game.nes", None, 42);
        assert_eq!(plain.flatten(), "/roms/nes/game.nes:42");

        let entry = FingerprintKey::new("/roms/nes/game.zip", Some("game.nes".into()), 42);
        assert_eq!(entry.flatten(), "/roms/nes/game.zip:game.nes:42");
    }

    #[test]
    fn test_hit_skips_compute() {
        let dir = tempdir().unwrap();
        let cache = FingerprintCache::new(dir.path().join("crc_cache.json"));
        let key = FingerprintKey::new("/roms/a.nes", None, 1);
        let calls = Cell::new(0);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(Checksum::new(0xDEADBEEF))
        };
        assert_eq!(cache.resolve(&key, compute).unwrap().to_string(), "DEADBEEF");
        assert_eq!(cache.resolve(&key, compute).unwrap().to_string(), "DEADBEEF");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_mtime_change_is_a_new_key() {
        let dir = tempdir().unwrap();
        let cache = FingerprintCache::new(dir.path().join("crc_cache.json"));

        let old = FingerprintKey::new("/roms/a.nes", None, 1);
        let new = FingerprintKey::new("/roms/a.nes", None, 2);
        cache.resolve(&old, || Ok(Checksum::new(1))).unwrap();
        let value = cache.resolve(&new, || Ok(Checksum::new(2))).unwrap();

        assert_eq!(value, Checksum::new(2));
        // Stale row stays on disk
        assert_eq!(cache.load().unwrap().len(), 2);
    }

    #[test]
    fn test_persisted_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crc_cache.json");
        let cache = FingerprintCache::new(&path);
        let key = FingerprintKey::new("/roms/a.zip", Some("a.nes".into()), 7);
        cache.resolve(&key, || Ok(Checksum::new(0x0000BEEF))).unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.get("/roms/a.zip:a.nes:7").map(String::as_str), Some("0000BEEF"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_compute_error_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = FingerprintCache::new(dir.path().join("crc_cache.json"));
        let key = FingerprintKey::new("/roms/a.nes", None, 1);

        let err = cache.resolve(&key, || Err(Error::archive("/roms/a.nes", "boom")));
        assert!(err.is_err());
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_cache_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crc_cache.json");
        fs::write(&path, "{ not json").unwrap();
        let cache = FingerprintCache::new(&path);

        let result = cache.resolve(&FingerprintKey::new("/x", None, 1), || Ok(Checksum::new(1)));
        assert!(matches!(result, Err(Error::Cache { .. })));
    }
}
