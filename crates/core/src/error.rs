//! Error types for the fetch and decode stages.
//!
//! Neither is fatal to the pipeline: both end with the fallback image being
//! assigned to the affected holder.

use std::io;
use std::path::PathBuf;
use thumbgrid_cache::CacheDirError;

/// Failure of the network stage.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("malformed source url: {0}")]
    MalformedUrl(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("cannot write cache file: {0}")]
    Cache(#[from] CacheDirError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of the decode stage.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cache file {0} does not exist")]
    Missing(PathBuf),

    #[error("image in {0} has no pixels")]
    Empty(PathBuf),

    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to build an [`crate::ImagePipeline`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot start worker threads: {0}")]
    Workers(#[from] io::Error),

    #[error("cannot load fallback image {path}: {source}")]
    Fallback {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}
