//! Image requests
//!
//! An [`ImageRequest`] names a remote image and the cache file it lands in.
//! Requests are built per bind by a caller-supplied [`RequestFactory`], since
//! only the caller knows how its data maps to a URL.

use std::path::PathBuf;
use thumbgrid_cache::{cache_file_name, CacheDirectory, RequestKey};

/// A remote image at given dimension constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Source URL
    pub url: String,

    /// Requested width in pixels, 0 if unconstrained
    pub width: u32,

    /// Requested height in pixels, 0 if unconstrained
    pub height: u32,

    /// Where the fetched file is stored
    pub cache_file: PathBuf,
}

impl ImageRequest {
    /// Build a request whose cache file lives in `cache`.
    pub fn new(url: impl Into<String>, width: u32, height: u32, cache: &CacheDirectory) -> Self {
        let url = url.into();
        let cache_file = cache.cache_file(&url, width, height);
        Self {
            url,
            width,
            height,
            cache_file,
        }
    }

    /// Identity of this request: the cache file's name.
    pub fn key(&self) -> RequestKey {
        RequestKey::from_cache_file(&self.cache_file).unwrap_or_else(|| {
            RequestKey::new(cache_file_name(&self.url, self.width, self.height))
        })
    }

    pub fn is_cached(&self) -> bool {
        self.cache_file.is_file()
    }
}

/// Maps a data item and target dimensions to an image request.
///
/// Implemented for any `Fn(&D, u32, u32) -> ImageRequest`.
pub trait RequestFactory<D>: Send + Sync {
    fn create_request(&self, data: &D, width: u32, height: u32) -> ImageRequest;
}

impl<D, F> RequestFactory<D> for F
where
    F: Fn(&D, u32, u32) -> ImageRequest + Send + Sync,
{
    fn create_request(&self, data: &D, width: u32, height: u32) -> ImageRequest {
        self(data, width, height)
    }
}

/// Factory for data items that know their own URL.
///
/// # Example
///
/// ```
/// use thumbgrid_cache::CacheDirectory;
/// use thumbgrid_core::{RequestFactory, UrlRequestFactory};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = CacheDirectory::new(dir.path()).unwrap();
/// let factory = UrlRequestFactory::new(cache, |url: &String| url.clone());
///
/// let request = factory.create_request(&"https://example.com/a.png".to_string(), 64, 64);
/// assert!(request.cache_file.starts_with(dir.path()));
/// assert!(!request.is_cached());
/// ```
pub struct UrlRequestFactory<F> {
    cache: CacheDirectory,
    url_of: F,
}

impl<F> UrlRequestFactory<F> {
    pub fn new(cache: CacheDirectory, url_of: F) -> Self {
        Self { cache, url_of }
    }

    pub fn cache(&self) -> &CacheDirectory {
        &self.cache
    }
}

impl<D, F> RequestFactory<D> for UrlRequestFactory<F>
where
    F: Fn(&D) -> String + Send + Sync,
{
    fn create_request(&self, data: &D, width: u32, height: u32) -> ImageRequest {
        ImageRequest::new((self.url_of)(data), width, height, &self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_cache_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDirectory::new(dir.path()).unwrap();
        let request = ImageRequest::new("https://example.com/a.png", 100, 50, &cache);

        assert_eq!(
            request.key().as_str(),
            cache_file_name("https://example.com/a.png", 100, 50)
        );
    }

    #[test]
    fn test_key_stable_for_same_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDirectory::new(dir.path()).unwrap();
        let a = ImageRequest::new("https://example.com/a.png", 100, 50, &cache);
        let b = ImageRequest::new("https://example.com/a.png", 100, 50, &cache);
        let c = ImageRequest::new("https://example.com/a.png", 100, 51, &cache);

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_closure_factory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDirectory::new(dir.path()).unwrap();
        let factory = move |id: &u32, w: u32, h: u32| {
            ImageRequest::new(format!("https://example.com/{id}.png"), w, h, &cache)
        };

        let request = factory.create_request(&7u32, 10, 20);
        assert_eq!(request.url, "https://example.com/7.png");
        assert_eq!((request.width, request.height), (10, 20));
    }

    #[test]
    fn test_is_cached_follows_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDirectory::new(dir.path()).unwrap();
        let factory = UrlRequestFactory::new(cache, |url: &&str| url.to_string());
        let request = factory.create_request(&"https://example.com/x.png", 0, 0);

        assert!(!request.is_cached());
        std::fs::write(&request.cache_file, b"bytes").unwrap();
        assert!(request.is_cached());
    }
}
