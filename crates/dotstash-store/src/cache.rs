// ABOUTME: Process-local cache keyed by a file's modification time.
// ABOUTME: Empty -> Loaded(stamp, value); reloads on a changed stamp, updates write-through, clears on demand.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// What the filesystem reported about a backing file when it was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Missing,
    Modified(SystemTime),
}

impl Stamp {
    /// Observe the current stamp of `path`.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Stamp::Modified(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Stamp::Missing),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
enum CacheSlot<T> {
    Empty,
    Loaded { stamp: Stamp, value: Arc<T> },
}

/// One cache slot for one logical store.
#[derive(Debug)]
pub struct MtimeCache<T> {
    slot: Mutex<CacheSlot<T>>,
}

impl<T> Default for MtimeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MtimeCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(CacheSlot::Empty),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheSlot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value when `path` still carries the stamp it was
    /// loaded with; otherwise run `load` and cache its result.
    pub fn get_or_load<E, F>(&self, path: &Path, load: F) -> Result<Arc<T>, E>
    where
        E: From<std::io::Error>,
        F: FnOnce() -> Result<T, E>,
    {
        let current = Stamp::of(path)?;
        let mut slot = self.lock();
        if let CacheSlot::Loaded { stamp, value } = &*slot
            && *stamp == current
        {
            return Ok(Arc::clone(value));
        }

        tracing::debug!("loading {} from disk", path.display());
        let value = Arc::new(load()?);
        *slot = CacheSlot::Loaded {
            stamp: current,
            value: Arc::clone(&value),
        };
        Ok(value)
    }

    /// Record a value that was just written to `path`, so the next read does
    /// not re-parse what this process already holds.
    pub fn store(&self, path: &Path, value: T) -> std::io::Result<Arc<T>> {
        let stamp = Stamp::of(path)?;
        let value = Arc::new(value);
        *self.lock() = CacheSlot::Loaded {
            stamp,
            value: Arc::clone(&value),
        };
        Ok(value)
    }

    pub fn clear(&self) {
        *self.lock() = CacheSlot::Empty;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(&*self.lock(), CacheSlot::Loaded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;
    use tempfile::TempDir;

    fn read(path: &Path, loads: &Cell<u32>) -> std::io::Result<String> {
        loads.set(loads.get() + 1);
        match fs::read_to_string(path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    #[test]
    fn repeated_reads_hit_the_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.json");
        fs::write(&path, "one").unwrap();
        let cache = MtimeCache::new();
        let loads = Cell::new(0);

        let a = cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        let b = cache.get_or_load(&path, || read(&path, &loads)).unwrap();

        assert_eq!(*a, "one");
        assert_eq!(*b, "one");
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn changed_mtime_triggers_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.json");
        fs::write(&path, "one").unwrap();
        let cache = MtimeCache::new();
        let loads = Cell::new(0);

        cache.get_or_load(&path, || read(&path, &loads)).unwrap();

        fs::write(&path, "two").unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let value = cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert_eq!(*value, "two");
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn missing_file_is_cached_until_it_appears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        let cache = MtimeCache::new();
        let loads = Cell::new(0);

        cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert_eq!(loads.get(), 1);

        fs::write(&path, "now").unwrap();
        let value = cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert_eq!(*value, "now");
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn store_is_write_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.json");
        let cache = MtimeCache::new();
        let loads = Cell::new(0);

        fs::write(&path, "written").unwrap();
        cache.store(&path, "written".to_string()).unwrap();

        let value = cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert_eq!(*value, "written");
        assert_eq!(loads.get(), 0);
    }

    #[test]
    fn clear_returns_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.json");
        let cache = MtimeCache::new();
        let loads = Cell::new(0);

        cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert!(cache.is_loaded());

        cache.clear();
        assert!(!cache.is_loaded());

        cache.get_or_load(&path, || read(&path, &loads)).unwrap();
        assert_eq!(loads.get(), 2);
    }
}
