//! In-memory image cache with LRU eviction
//!
//! Holds decoded images keyed by [`RequestKey`]. The cost of an entry is the
//! byte footprint of its decoded pixels, and the total cost never exceeds the
//! configured budget once a `put` returns.

use crate::disk::RequestKey;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A decoded image ready to be shown by an image holder.
///
/// Pixels are tightly packed RGBA8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Raw pixel data (RGBA format)
    pub pixels: Vec<u8>,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

impl DecodedImage {
    /// Create a new decoded image
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Create an image filled with a single RGBA colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(pixels, width, height)
    }

    /// Get the memory size of this image in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of images currently in cache
    pub entry_count: usize,

    /// Total memory used by cached images (bytes)
    pub memory_used: usize,

    /// Maximum memory allowed (bytes)
    pub memory_limit: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of images evicted due to memory pressure
    pub evictions: u64,

    /// Number of inserts dropped because the image alone exceeds the budget
    pub rejected: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

struct CacheState {
    entries: HashMap<RequestKey, Arc<DecodedImage>>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<RequestKey>,

    memory_used: usize,
    memory_limit: usize,
    stats: CacheStats,
}

impl CacheState {
    fn new(memory_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            memory_used: 0,
            memory_limit,
            stats: CacheStats {
                memory_limit,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &RequestKey) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(pos);
        }
        self.lru_queue.push_back(key.clone());
    }

    fn detach(&mut self, key: &RequestKey) -> Option<Arc<DecodedImage>> {
        let image = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(image.byte_size());
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(pos);
        }
        Some(image)
    }

    fn evict_lru(&mut self) -> Option<Arc<DecodedImage>> {
        let key = self.lru_queue.pop_front()?;
        let image = self.entries.remove(&key)?;
        self.memory_used = self.memory_used.saturating_sub(image.byte_size());
        self.stats.evictions += 1;
        log::trace!("evicted {key} ({} bytes)", image.byte_size());
        Some(image)
    }

    /// Evict images until `required_size` more bytes fit under the limit
    fn evict_to_fit(&mut self, required_size: usize) {
        while self.memory_used + required_size > self.memory_limit && !self.entries.is_empty() {
            if self.evict_lru().is_none() {
                break;
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.memory_used = self.memory_used;
        self.stats.memory_limit = self.memory_limit;
    }
}

/// Byte-budgeted LRU cache of decoded images
///
/// Thread-safe: decode completions may insert from any thread while the
/// interactive thread reads.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use thumbgrid_cache::{DecodedImage, MemoryCache, RequestKey};
///
/// let cache = MemoryCache::new(1024 * 1024);
/// let key = RequestKey::new("a1b2.img");
/// cache.put(key.clone(), Arc::new(DecodedImage::solid(16, 16, [0, 0, 0, 255])));
///
/// assert!(cache.get(&key).is_some());
/// assert_eq!(cache.memory_used(), 16 * 16 * 4);
/// ```
#[derive(Clone)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    /// Create a new cache with the given budget in bytes
    pub fn new(memory_limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(memory_limit))),
        }
    }

    /// Create a new cache with a budget in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Store an image
    ///
    /// Least recently used images are evicted until the new image fits. An
    /// image larger than the whole budget is not kept at all, so the budget
    /// holds even right after this call. Returns `true` if the image was kept.
    pub fn put(&self, key: RequestKey, image: Arc<DecodedImage>) -> bool {
        let mut state = self.state.lock().unwrap();
        let size = image.byte_size();

        state.detach(&key);

        if size > state.memory_limit {
            state.stats.rejected += 1;
            state.sync_stats();
            log::debug!(
                "image {key} ({size} bytes) exceeds the {} byte budget, not cached",
                state.memory_limit
            );
            return false;
        }

        state.evict_to_fit(size);

        state.memory_used += size;
        state.entries.insert(key.clone(), image);
        state.touch(&key);
        state.sync_stats();
        true
    }

    /// Retrieve an image, refreshing its recency
    pub fn get(&self, key: &RequestKey) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock().unwrap();

        if let Some(image) = state.entries.get(key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(image)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Check for an image without updating LRU order or statistics
    pub fn contains(&self, key: &RequestKey) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.contains_key(key)
    }

    /// Remove an image
    pub fn remove(&self, key: &RequestKey) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock().unwrap();
        let removed = state.detach(key);
        state.sync_stats();
        removed
    }

    /// Drop every cached image
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.lru_queue.clear();
        state.memory_used = 0;
        state.sync_stats();
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        state.stats
    }

    /// Change the budget, evicting down to it if needed
    pub fn set_memory_limit(&self, new_limit: usize) {
        let mut state = self.state.lock().unwrap();
        state.memory_limit = new_limit;

        if state.memory_used > new_limit {
            state.evict_to_fit(0);
        }
        state.sync_stats();
    }

    /// Get the current budget in bytes
    pub fn memory_limit(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.memory_limit
    }

    /// Get the current memory usage in bytes
    pub fn memory_used(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.memory_used
    }

    /// Number of images currently cached
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.entries.len()
    }

    /// Whether the cache holds no images
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    /// A cache with a 32MB budget
    fn default() -> Self {
        Self::with_mb_limit(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const SIDE: u32 = 64;
    const IMAGE_BYTES: usize = (SIDE * SIDE * 4) as usize;

    fn key(n: u32) -> RequestKey {
        RequestKey::new(format!("{n:04}.img"))
    }

    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::solid(SIDE, SIDE, [10, 20, 30, 255]))
    }

    #[test]
    fn test_basic_put_get() {
        let cache = MemoryCache::new(1024 * 1024);
        let stored = image();
        assert!(cache.put(key(1), stored.clone()));

        let fetched = cache.get(&key(1)).expect("image should be cached");
        assert!(Arc::ptr_eq(&fetched, &stored));
        assert_eq!(fetched.width, SIDE);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryCache::new(1024 * 1024);
        assert!(cache.get(&key(9)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = MemoryCache::new(IMAGE_BYTES * 2);

        cache.put(key(1), image());
        cache.put(key(2), image());
        cache.put(key(3), image());

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryCache::new(IMAGE_BYTES * 2);
        cache.put(key(1), image());
        cache.put(key(2), image());

        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), image());

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_contains_does_not_refresh_recency() {
        let cache = MemoryCache::new(IMAGE_BYTES * 2);
        cache.put(key(1), image());
        cache.put(key(2), image());

        assert!(cache.contains(&key(1)));
        cache.put(key(3), image());

        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let cache = MemoryCache::new(IMAGE_BYTES * 2);
        cache.put(key(1), image());

        let huge = Arc::new(DecodedImage::solid(SIDE * 2, SIDE * 2, [0; 4]));
        assert!(!cache.put(key(2), huge));

        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(1)));
        assert!(cache.memory_used() <= cache.memory_limit());
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_oversized_replacement_drops_previous_entry() {
        let cache = MemoryCache::new(IMAGE_BYTES);
        cache.put(key(1), image());

        let huge = Arc::new(DecodedImage::solid(SIDE * 2, SIDE, [0; 4]));
        assert!(!cache.put(key(1), huge));

        assert!(cache.is_empty());
        assert_eq!(cache.memory_used(), 0);
    }

    #[test]
    fn test_update_existing_entry() {
        let cache = MemoryCache::new(1024 * 1024);
        cache.put(key(1), image());

        let replacement = Arc::new(DecodedImage::solid(8, 8, [1, 2, 3, 4]));
        cache.put(key(1), replacement.clone());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_used(), 8 * 8 * 4);
        assert!(Arc::ptr_eq(&cache.get(&key(1)).unwrap(), &replacement));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = MemoryCache::new(1024 * 1024);
        cache.put(key(1), image());
        cache.put(key(2), image());

        assert!(cache.remove(&key(1)).is_some());
        assert!(cache.remove(&key(1)).is_none());
        assert_eq!(cache.memory_used(), IMAGE_BYTES);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_used(), 0);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_set_memory_limit() {
        let cache = MemoryCache::new(IMAGE_BYTES * 3);
        cache.put(key(1), image());
        cache.put(key(2), image());
        cache.put(key(3), image());

        cache.set_memory_limit(IMAGE_BYTES * 2);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.stats().memory_limit, IMAGE_BYTES * 2);
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = MemoryCache::new(1024 * 1024);
        cache.put(key(1), image());

        let _ = cache.get(&key(1));
        let _ = cache.get(&key(2));
        let _ = cache.get(&key(3));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 0.333).abs() < 0.01);
        assert!(stats.memory_utilization() > 0.0);
    }

    #[test]
    fn test_default_cache() {
        let cache = MemoryCache::default();
        assert_eq!(cache.memory_limit(), 32 * 1024 * 1024);
    }

    #[test]
    fn test_budget_holds_after_every_put() {
        let mut rng = rand::thread_rng();
        let budget = 200_000;
        let cache = MemoryCache::new(budget);

        for n in 0..500 {
            let side = rng.gen_range(1..=260);
            let k = key(rng.gen_range(0..64));
            cache.put(k, Arc::new(DecodedImage::solid(side, side, [0; 4])));

            let stats = cache.stats();
            assert!(
                stats.memory_used <= budget,
                "put #{n} left {} bytes resident, budget {budget}",
                stats.memory_used
            );
        }
    }
}
