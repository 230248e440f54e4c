//! thumbgrid core library
//!
//! Asynchronous image acquisition for scrollable lists and grids: for each
//! visible row, fetch a remote image or reuse the cached file, decode it off
//! the interactive thread, keep decoded images in a byte-budgeted memory
//! cache, and make sure a recycled row only ever shows the image for the
//! data it is currently bound to.
//!
//! Network activity is gated on scroll state. While the list scrolls no new
//! transfer starts; when it settles, every row that was held back is resolved
//! again.

pub mod decode;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod slot;

pub use decode::{
    sample_factor, DecodeScheduler, DecodeStart, Decoder, ImageCrateDecoder, TargetSize,
};
pub use error::{DecodeError, FetchError, PipelineError};
pub use fetch::{FetchCoordinator, FetchRequest, FetchService, ResolveOutcome};
pub use gate::{ScrollGate, ScrollListener, ScrollState};
pub use http::HttpFetchService;
pub use pipeline::{ImagePipeline, ImagePipelineBuilder};
pub use registry::SlotRegistry;
pub use request::{ImageRequest, RequestFactory, UrlRequestFactory};
pub use slot::{DisplaySlot, HolderChange, HolderContent, HolderUpdate, ImageHolder, SlotId};
