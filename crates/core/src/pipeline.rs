//! Image pipeline facade
//!
//! Wires the scroll gate, slot registry, fetch coordinator, decode scheduler
//! and memory cache together behind the calls a list view makes: bind a slot,
//! report scroll events, and pump completions on its own thread.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use thumbgrid_cache::{CacheDirectory, PipelineConfig};
//! use thumbgrid_core::{DisplaySlot, ImagePipeline, ScrollState, UrlRequestFactory};
//!
//! let config = PipelineConfig::default();
//! let cache = CacheDirectory::new(&config.cache_dir).unwrap();
//! let factory = UrlRequestFactory::new(cache, |url: &String| url.clone());
//! let pipeline = ImagePipeline::builder(config, factory).build().unwrap();
//!
//! let row = DisplaySlot::with_size(96, 96);
//! pipeline.bind(&row, "https://example.com/a.png".to_string());
//!
//! pipeline.on_scroll_state_changed(ScrollState::Fling);
//! pipeline.on_scroll_state_changed(ScrollState::Idle);
//!
//! for update in pipeline.pump_timeout(Duration::from_millis(16)) {
//!     println!("slot {} -> {:?}", update.slot, update.change);
//! }
//! ```

use crate::decode::{DecodeScheduler, Decoder, ImageCrateDecoder, TargetSize};
use crate::error::{DecodeError, FetchError, PipelineError};
use crate::fetch::{FetchCoordinator, FetchService, ResolveOutcome};
use crate::gate::{ScrollListener, ScrollState};
use crate::http::HttpFetchService;
use crate::request::RequestFactory;
use crate::slot::{DisplaySlot, HolderUpdate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thumbgrid_cache::{DecodedImage, MemoryCache, PipelineConfig, RequestKey};
use thumbgrid_scheduler::{Mailbox, TaskId};

/// Result posted by a worker for the interactive thread.
pub(crate) enum Completion {
    Fetched {
        key: RequestKey,
        result: Result<(), FetchError>,
    },
    Decoded {
        task: TaskId,
        result: Result<DecodedImage, DecodeError>,
    },
}

/// Builder for [`ImagePipeline`].
pub struct ImagePipelineBuilder<D> {
    config: PipelineConfig,
    factory: Box<dyn RequestFactory<D>>,
    fetch_service: Option<Arc<dyn FetchService>>,
    decoder: Option<Arc<dyn Decoder>>,
}

impl<D> ImagePipelineBuilder<D>
where
    D: Clone + PartialEq + Send + Sync + 'static,
{
    /// Replace the default HTTP fetch service.
    pub fn fetch_service(mut self, service: Arc<dyn FetchService>) -> Self {
        self.fetch_service = Some(service);
        self
    }

    /// Replace the default `image` crate decoder.
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Start the worker pools and load the fallback image.
    pub fn build(self) -> Result<ImagePipeline<D>, PipelineError> {
        let config = self.config;
        let mailbox = Mailbox::new();

        let decoder: Arc<dyn Decoder> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(ImageCrateDecoder::new(config.max_bitmap_dimension)),
        };
        let fallback = match &config.fallback_image {
            Some(path) => {
                let image = decoder
                    .decode(path, TargetSize::unconstrained())
                    .map_err(|source| PipelineError::Fallback {
                        path: path.clone(),
                        source,
                    })?;
                Some(Arc::new(image))
            }
            None => None,
        };

        let decodes = DecodeScheduler::new(
            decoder,
            config.decode_workers,
            MemoryCache::new(config.memory_cache_size),
            mailbox.sender(),
        )?;
        decodes.set_fallback(fallback);

        let service: Arc<dyn FetchService> = match self.fetch_service {
            Some(service) => service,
            None => Arc::new(HttpFetchService::new()),
        };
        let coordinator = FetchCoordinator::new(
            self.factory,
            service,
            config.fetch_workers,
            mailbox.sender(),
            config.cache_expiry,
        )?;

        log::debug!(
            "image pipeline started: {} fetch / {} decode workers, {} MB memory cache",
            config.fetch_workers,
            config.decode_workers,
            config.memory_cache_mb()
        );

        Ok(ImagePipeline {
            coordinator,
            decodes,
            mailbox,
        })
    }
}

/// Asynchronous image pipeline for a scrollable list.
///
/// All methods are meant to be called from the interactive thread; workers
/// only ever post into the pipeline's mailbox, and results reach holders
/// when [`ImagePipeline::pump`] is called.
pub struct ImagePipeline<D> {
    coordinator: FetchCoordinator<D>,
    decodes: DecodeScheduler,
    mailbox: Mailbox<Completion>,
}

impl<D> ImagePipeline<D>
where
    D: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn builder(
        config: PipelineConfig,
        factory: impl RequestFactory<D> + 'static,
    ) -> ImagePipelineBuilder<D> {
        ImagePipelineBuilder {
            config,
            factory: Box::new(factory),
            fetch_service: None,
            decoder: None,
        }
    }

    /// Rebind `slot` to `data` and start resolving its image.
    pub fn bind(&self, slot: &Arc<DisplaySlot<D>>, data: D) -> ResolveOutcome {
        slot.set_data(data.clone());
        self.coordinator.resolve(&data, slot, &self.decodes)
    }

    /// Apply every completion posted so far.
    ///
    /// Returns the holder updates applied since the previous pump, including
    /// synchronous memory-cache deliveries made by `bind`.
    pub fn pump(&self) -> Vec<HolderUpdate> {
        for completion in self.mailbox.drain() {
            self.apply(completion);
        }
        self.decodes.take_updates()
    }

    /// Wait up to `timeout` for a completion, then pump.
    pub fn pump_timeout(&self, timeout: Duration) -> Vec<HolderUpdate> {
        if let Some(completion) = self.mailbox.recv_timeout(timeout) {
            self.apply(completion);
        }
        self.pump()
    }

    /// Pump until nothing is outstanding or `timeout` elapses.
    pub fn run_until_idle(&self, timeout: Duration) -> Vec<HolderUpdate> {
        let deadline = Instant::now() + timeout;
        let mut updates = self.pump();
        while !self.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                log::warn!("pipeline still busy after {timeout:?}");
                break;
            }
            updates.extend(self.pump_timeout((deadline - now).min(Duration::from_millis(50))));
        }
        updates
    }

    fn apply(&self, completion: Completion) {
        match completion {
            Completion::Fetched { key, result } => {
                self.coordinator.complete(key, result, &self.decodes)
            }
            Completion::Decoded { task, result } => self.decodes.complete(task, result),
        }
    }

    /// No fetch or decode is outstanding.
    pub fn is_idle(&self) -> bool {
        self.coordinator.in_flight() == 0 && self.decodes.pending() == 0
    }

    pub fn on_scroll(&self, first_visible: usize, visible_count: usize, total_count: usize) {
        self.coordinator
            .gate()
            .forward_scroll(first_visible, visible_count, total_count);
    }

    /// Gate network fetching on the scroll state, then forward the event.
    ///
    /// Returns how many held-back slots were resumed.
    pub fn on_scroll_state_changed(&self, state: ScrollState) -> usize {
        let gate = self.coordinator.gate();
        let resumed = if gate.apply_scroll_state(state) {
            self.coordinator.resume_pending(&self.decodes)
        } else {
            0
        };
        gate.forward_scroll_state(state);
        resumed
    }

    /// Chain the caller's own scroll listener behind the gate.
    pub fn set_next_scroll_listener(
        &self,
        listener: Option<Box<dyn ScrollListener + Send>>,
    ) -> Option<Box<dyn ScrollListener + Send>> {
        self.coordinator.gate().set_next_listener(listener)
    }

    /// Returns how many held-back slots were resumed.
    pub fn set_network_fetching_allowed(&self, allowed: bool) -> usize {
        if self.coordinator.gate().set_network_fetching_allowed(allowed) {
            self.coordinator.resume_pending(&self.decodes)
        } else {
            0
        }
    }

    pub fn is_network_fetching_allowed(&self) -> bool {
        self.coordinator.gate().is_network_fetching_allowed()
    }

    pub fn set_fallback_image(&self, image: Option<Arc<DecodedImage>>) {
        self.decodes.set_fallback(image);
    }

    pub fn fallback_image(&self) -> Option<Arc<DecodedImage>> {
        self.decodes.fallback()
    }

    /// Freshness duration handed to the fetch service with each transfer.
    pub fn set_cache_expiry(&self, expiry: Option<Duration>) {
        self.coordinator.set_cache_expiry(expiry);
    }

    pub fn cache_expiry(&self) -> Option<Duration> {
        self.coordinator.cache_expiry()
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        self.decodes.memory_cache()
    }

    /// Entries in the slot registry, dead ones included.
    pub fn registry_len(&self) -> usize {
        self.coordinator.registry().len()
    }

    pub fn max_dimensions(&self) -> (u32, u32) {
        self.coordinator.max_dimensions()
    }

    /// Cancel pending decodes and join the worker threads.
    ///
    /// Blocks until running transfers finish.
    pub fn shutdown(self) {
        self.decodes.shutdown();
        self.coordinator.shutdown();
    }
}

impl<D> ScrollListener for ImagePipeline<D>
where
    D: Clone + PartialEq + Send + Sync + 'static,
{
    fn on_scroll(&mut self, first_visible: usize, visible_count: usize, total_count: usize) {
        ImagePipeline::on_scroll(self, first_visible, visible_count, total_count);
    }

    fn on_scroll_state_changed(&mut self, state: ScrollState) {
        ImagePipeline::on_scroll_state_changed(self, state);
    }
}
