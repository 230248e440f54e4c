//! Cache files on stable storage.
//!
//! A fetched image lives in one file whose name is derived from the request
//! parameters. The existence of that file is the only cache-hit signal the
//! pipeline uses, so files are only ever created complete: writers go through
//! [`CacheDirectory::persist_atomically`].

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extension used for every cache file.
pub const CACHE_FILE_EXTENSION: &str = "img";

/// Identity of one fetch/decode unit of work.
///
/// Derived from the cache file name, so it is stable for identical source
/// URL and dimension constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key for a cache file: its file name.
    pub fn from_cache_file(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheDirError {
    #[error("cache path {0} exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("cache file {0} has no parent directory")]
    NoParent(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Compute the cache file name for a request.
///
/// Lowercase hex SHA-256 of the URL and the requested dimensions.
pub fn cache_file_name(url: &str, width: u32, height: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(format!("{width}x{height}").as_bytes());
    let digest = hasher.finalize();

    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64 + 1 + CACHE_FILE_EXTENSION.len());
    for &b in digest.iter() {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out.push('.');
    out.push_str(CACHE_FILE_EXTENSION);
    out
}

/// Directory holding fetched image files.
#[derive(Debug, Clone)]
pub struct CacheDirectory {
    root: PathBuf,
}

impl CacheDirectory {
    /// Open (creating if needed) a cache directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, CacheDirError> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(CacheDirError::NotADirectory(root));
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for a request. The file may not exist yet.
    pub fn cache_file(&self, url: &str, width: u32, height: u32) -> PathBuf {
        self.root.join(cache_file_name(url, width, height))
    }

    /// Path of the cache file for an already known key.
    pub fn path_for_key(&self, key: &RequestKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.path_for_key(key).is_file()
    }

    /// Remove one cache file. Returns `false` if it did not exist.
    pub fn remove(&self, key: &RequestKey) -> Result<bool, CacheDirError> {
        match fs::remove_file(self.path_for_key(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All cache files currently present.
    pub fn entries(&self) -> Result<Vec<RequestKey>, CacheDirError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !is_cache_file(&path) {
                continue;
            }
            if let Some(key) = RequestKey::from_cache_file(&path) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Total size of all cache files in bytes.
    pub fn disk_used(&self) -> Result<u64, CacheDirError> {
        let mut total = 0;
        for key in self.entries()? {
            if let Ok(metadata) = fs::metadata(self.path_for_key(&key)) {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Delete cache files last modified more than `max_age` ago.
    ///
    /// Returns the number of files removed.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize, CacheDirError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for key in self.entries()? {
            let path = self.path_for_key(&key);
            let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age && self.remove(&key)? {
                log::debug!("pruned {key} (age {}s)", age.as_secs());
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every cache file. Returns the number removed.
    pub fn clear(&self) -> Result<usize, CacheDirError> {
        let mut removed = 0;
        for key in self.entries()? {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Write a file so that `dest` only ever appears complete.
    ///
    /// `write` fills a temporary file created beside `dest`; if it fails the
    /// temporary file is discarded and `dest` is left untouched.
    pub fn persist_atomically<F>(dest: &Path, write: F) -> Result<u64, CacheDirError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let parent = dest
            .parent()
            .ok_or_else(|| CacheDirError::NoParent(dest.to_path_buf()))?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        write(tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        let len = tmp.as_file().metadata()?.len();

        tmp.persist(dest).map_err(|e| CacheDirError::Io(e.error))?;
        Ok(len)
    }
}

/// Returns the age of a file since its last modification.
pub fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or_default())
}

fn is_cache_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(CACHE_FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_cache() -> (tempfile::TempDir, CacheDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDirectory::new(dir.path().join("images")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_file_name_is_deterministic() {
        let a = cache_file_name("https://example.com/a.png", 100, 80);
        let b = cache_file_name("https://example.com/a.png", 100, 80);
        assert_eq!(a, b);
        assert!(a.ends_with(".img"));
        assert_eq!(a.len(), 64 + 4);
    }

    #[test]
    fn test_file_name_depends_on_dimensions() {
        let url = "https://example.com/a.png";
        assert_ne!(cache_file_name(url, 100, 80), cache_file_name(url, 80, 100));
        assert_ne!(
            cache_file_name(url, 100, 80),
            cache_file_name("https://example.com/b.png", 100, 80)
        );
    }

    #[test]
    fn test_key_from_cache_file() {
        let (_dir, cache) = temp_cache();
        let path = cache.cache_file("https://example.com/a.png", 10, 10);
        let key = RequestKey::from_cache_file(&path).unwrap();
        assert_eq!(cache.path_for_key(&key), path);
    }

    #[test]
    fn test_new_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            CacheDirectory::new(&file),
            Err(CacheDirError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_persist_atomically_writes_complete_file() {
        let (_dir, cache) = temp_cache();
        let dest = cache.cache_file("https://example.com/a.png", 1, 1);

        let written =
            CacheDirectory::persist_atomically(&dest, |file| file.write_all(b"hello")).unwrap();
        assert_eq!(written, 5);

        let mut contents = String::new();
        fs::File::open(&dest).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn test_persist_atomically_failure_leaves_nothing() {
        let (_dir, cache) = temp_cache();
        let dest = cache.cache_file("https://example.com/a.png", 1, 1);

        let result = CacheDirectory::persist_atomically(&dest, |file| {
            file.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        });

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(cache.entries().unwrap().is_empty());
        assert_eq!(fs::read_dir(cache.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_entries_remove_and_clear() {
        let (_dir, cache) = temp_cache();
        for url in ["a", "b", "c"] {
            let dest = cache.cache_file(url, 5, 5);
            CacheDirectory::persist_atomically(&dest, |f| f.write_all(url.as_bytes())).unwrap();
        }
        fs::write(cache.root().join("notes.txt"), b"ignored").unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(cache.disk_used().unwrap(), 3);

        assert!(cache.remove(&entries[0]).unwrap());
        assert!(!cache.remove(&entries[0]).unwrap());
        assert!(!cache.contains(&entries[0]));

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_young_files() {
        let (_dir, cache) = temp_cache();
        let dest = cache.cache_file("a", 5, 5);
        CacheDirectory::persist_atomically(&dest, |f| f.write_all(b"a")).unwrap();

        assert_eq!(cache.prune_older_than(Duration::from_secs(3600)).unwrap(), 0);
        assert!(dest.exists());
        assert!(file_age(&dest).unwrap() < Duration::from_secs(3600));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.prune_older_than(Duration::from_millis(1)).unwrap(), 1);
        assert!(!dest.exists());
    }
}
