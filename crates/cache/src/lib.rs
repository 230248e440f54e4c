//! thumbgrid cache library
//!
//! Decoded-image memory cache with LRU eviction, fetched-image files on
//! stable storage, and pipeline configuration.

pub mod config;
pub mod disk;
pub mod ram;

pub use config::{ConfigError, PipelineConfig};
pub use disk::{cache_file_name, file_age, CacheDirError, CacheDirectory, RequestKey};
pub use ram::{CacheStats, DecodedImage, MemoryCache};
