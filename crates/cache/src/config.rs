//! Pipeline configuration.
//!
//! Covers the memory-cache budget, the cache directory, the freshness
//! duration handed to the fetch service, the fallback image and worker
//! counts. Configuration can be loaded from a JSON file, environment
//! variables, or created programmatically.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MB: usize = 1024 * 1024;

/// Configuration for the image pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Memory cache budget in bytes
    pub memory_cache_size: usize,
    /// Directory holding fetched image files
    pub cache_dir: PathBuf,
    /// Freshness duration passed through to the fetch service.
    /// `None` means a cached file is always considered expired by the service.
    pub cache_expiry: Option<Duration>,
    /// Image shown when a fetch or decode fails
    pub fallback_image: Option<PathBuf>,
    /// Number of fetch worker threads
    pub fetch_workers: usize,
    /// Number of decode worker threads
    pub decode_workers: usize,
    /// Largest width or height a decoded image may have
    pub max_bitmap_dimension: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: 32 * MB,
            cache_dir: Self::default_cache_dir(),
            cache_expiry: None,
            fallback_image: None,
            fetch_workers: 4,
            decode_workers: default_decode_workers(),
            max_bitmap_dimension: 2000,
        }
    }
}

impl PipelineConfig {
    /// Sets the memory cache budget in megabytes.
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.memory_cache_size = mb * MB;
        self
    }

    /// Sets the cache directory.
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_cache_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.cache_expiry = expiry;
        self
    }

    pub fn with_fallback_image<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.fallback_image = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets fetch and decode worker counts. Zero is raised to one.
    pub fn with_workers(mut self, fetch: usize, decode: usize) -> Self {
        self.fetch_workers = fetch.max(1);
        self.decode_workers = decode.max(1);
        self
    }

    pub fn with_max_bitmap_dimension(mut self, max: u32) -> Self {
        self.max_bitmap_dimension = max;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/thumbgrid/images
    /// - Linux: ~/.cache/thumbgrid/images
    /// - Windows: %LOCALAPPDATA%\thumbgrid\images
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("thumbgrid").join("images")
        } else {
            PathBuf::from("cache/images")
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// - `THUMBGRID_MEMORY_CACHE_MB`: memory cache budget in MB (default: 32)
    /// - `THUMBGRID_CACHE_DIR`: cache directory path
    /// - `THUMBGRID_CACHE_EXPIRY_SECS`: freshness duration in seconds
    /// - `THUMBGRID_FALLBACK_IMAGE`: path of the fallback image
    /// - `THUMBGRID_FETCH_WORKERS`: fetch worker count (default: 4)
    /// - `THUMBGRID_DECODE_WORKERS`: decode worker count
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mb) = env_number("THUMBGRID_MEMORY_CACHE_MB")? {
            config.memory_cache_size = mb as usize * MB;
        }
        if let Ok(val) = std::env::var("THUMBGRID_CACHE_DIR") {
            config.cache_dir = PathBuf::from(val);
        }
        if let Some(secs) = env_number("THUMBGRID_CACHE_EXPIRY_SECS")? {
            config.cache_expiry = Some(Duration::from_secs(secs));
        }
        if let Ok(val) = std::env::var("THUMBGRID_FALLBACK_IMAGE") {
            config.fallback_image = Some(PathBuf::from(val));
        }
        if let Some(n) = env_number("THUMBGRID_FETCH_WORKERS")? {
            config.fetch_workers = (n as usize).max(1);
        }
        if let Some(n) = env_number("THUMBGRID_DECODE_WORKERS")? {
            config.decode_workers = (n as usize).max(1);
        }

        Ok(config)
    }

    /// Loads configuration from a JSON file. Missing keys keep their defaults.
    ///
    /// ```json
    /// {
    ///   "memory_cache_mb": 64,
    ///   "cache_dir": "/var/cache/thumbgrid",
    ///   "cache_expiry_secs": 86400,
    ///   "fallback_image": "/usr/share/thumbgrid/placeholder.png",
    ///   "fetch_workers": 4,
    ///   "decode_workers": 2,
    ///   "max_bitmap_dimension": 2000
    /// }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();

        if let Some(mb) = file.memory_cache_mb {
            config.memory_cache_size = mb * MB;
        }
        if let Some(dir) = file.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(secs) = file.cache_expiry_secs {
            config.cache_expiry = Some(Duration::from_secs(secs));
        }
        config.fallback_image = file.fallback_image.or(config.fallback_image);
        if let Some(n) = file.fetch_workers {
            config.fetch_workers = n.max(1);
        }
        if let Some(n) = file.decode_workers {
            config.decode_workers = n.max(1);
        }
        if let Some(max) = file.max_bitmap_dimension {
            if max == 0 {
                return Err(ConfigError::InvalidValue("max_bitmap_dimension".to_string()));
            }
            config.max_bitmap_dimension = max;
        }

        Ok(config)
    }

    /// Saves configuration to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&self.to_file())?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    fn to_file(&self) -> ConfigFile {
        ConfigFile {
            memory_cache_mb: Some(self.memory_cache_size / MB),
            cache_dir: Some(self.cache_dir.clone()),
            cache_expiry_secs: self.cache_expiry.map(|d| d.as_secs()),
            fallback_image: self.fallback_image.clone(),
            fetch_workers: Some(self.fetch_workers),
            decode_workers: Some(self.decode_workers),
            max_bitmap_dimension: Some(self.max_bitmap_dimension),
        }
    }

    /// Returns the memory cache budget in megabytes.
    pub fn memory_cache_mb(&self) -> usize {
        self.memory_cache_size / MB
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_cache_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_expiry_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_image: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetch_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decode_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_bitmap_dimension: Option<u32>,
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

fn env_number(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

fn default_decode_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 4)
}
