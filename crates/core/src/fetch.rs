//! Network stage
//!
//! [`FetchCoordinator`] decides, for each bind, whether the image is already
//! on stable storage, must be fetched now, or has to wait for the scroll
//! gate. The existence of the cache file is the only cache-hit signal.
//!
//! Concurrent binds for the same request share one transfer: the first
//! starts it and later ones join as waiters. When the transfer finishes each
//! waiter whose slot was not resolved to another key since moves on to the
//! decode stage.

use crate::decode::{DecodeScheduler, TargetSize};
use crate::error::FetchError;
use crate::gate::ScrollGate;
use crate::pipeline::Completion;
use crate::registry::SlotRegistry;
use crate::request::{ImageRequest, RequestFactory};
use crate::slot::DisplaySlot;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thumbgrid_cache::RequestKey;
use thumbgrid_scheduler::{CancellationToken, MailSender, WorkerPool, WorkerPoolConfig};

/// One transfer handed to a [`FetchService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Where the complete file must end up.
    pub destination: PathBuf,
    /// A destination younger than this may be kept as is.
    pub cache_expiry: Option<Duration>,
}

/// Executes transfers. Called on fetch workers.
///
/// On success `destination` holds the complete file; on failure it must not
/// have been created or modified.
pub trait FetchService: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<(), FetchError>;
}

/// Result of [`FetchCoordinator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The cache file exists; handed to the decode stage.
    CacheHit,
    /// A transfer was started or joined.
    FetchStarted,
    /// Network fetching is paused; the slot waits for the gate.
    FetchSkipped,
}

struct Waiter<D> {
    slot: Weak<DisplaySlot<D>>,
    key: RequestKey,
}

struct InFlight<D> {
    file: PathBuf,
    target: TargetSize,
    waiters: Vec<Waiter<D>>,
}

/// Resolves slot binds against the cache directory and the network.
pub struct FetchCoordinator<D> {
    factory: Box<dyn RequestFactory<D>>,
    service: Arc<dyn FetchService>,
    pool: WorkerPool,
    mailbox: MailSender<Completion>,
    gate: ScrollGate,
    registry: SlotRegistry<D>,
    in_flight: Mutex<HashMap<RequestKey, InFlight<D>>>,
    max_width: AtomicU32,
    max_height: AtomicU32,
    cache_expiry: Mutex<Option<Duration>>,
}

impl<D> FetchCoordinator<D>
where
    D: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(
        factory: Box<dyn RequestFactory<D>>,
        service: Arc<dyn FetchService>,
        workers: usize,
        mailbox: MailSender<Completion>,
        cache_expiry: Option<Duration>,
    ) -> io::Result<Self> {
        let pool = WorkerPool::new(WorkerPoolConfig::new("thumbgrid-fetch", workers))?;
        Ok(Self {
            factory,
            service,
            pool,
            mailbox,
            gate: ScrollGate::new(),
            registry: SlotRegistry::new(),
            in_flight: Mutex::new(HashMap::new()),
            max_width: AtomicU32::new(0),
            max_height: AtomicU32::new(0),
            cache_expiry: Mutex::new(cache_expiry),
        })
    }

    /// Resolve the image for `data` shown in `slot`.
    pub fn resolve(
        &self,
        data: &D,
        slot: &Arc<DisplaySlot<D>>,
        decodes: &DecodeScheduler,
    ) -> ResolveOutcome {
        let (width, height) = self.track_size(slot.size());
        let request = self.factory.create_request(data, width, height);
        let key = request.key();
        let target = TargetSize::new(request.width, request.height);
        slot.holder().set_intended_key(key.clone());

        if request.is_cached() {
            decodes.decode(key, request.cache_file, target, slot.holder());
            return ResolveOutcome::CacheHit;
        }

        decodes.reset_to_placeholder(slot.holder());
        if !self.gate.is_network_fetching_allowed() {
            if self.registry.register(slot) {
                log::trace!("slot {} waits for the gate", slot.id());
            }
            return ResolveOutcome::FetchSkipped;
        }

        self.start_fetch(request, key, target, slot);
        ResolveOutcome::FetchStarted
    }

    /// Resolve every registered slot again. Returns how many were resumed.
    pub fn resume_pending(&self, decodes: &DecodeScheduler) -> usize {
        let resumed = self.registry.broadcast(|slot| {
            if let Some(data) = slot.data() {
                self.resolve(&data, slot, decodes);
            }
        });
        log::debug!("resumed {resumed} slots");
        resumed
    }

    fn start_fetch(
        &self,
        request: ImageRequest,
        key: RequestKey,
        target: TargetSize,
        slot: &Arc<DisplaySlot<D>>,
    ) {
        let waiter = Waiter {
            slot: Arc::downgrade(slot),
            key: key.clone(),
        };

        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(entry) = in_flight.get_mut(&key) {
            let known = entry
                .waiters
                .iter()
                .any(|w| w.slot.as_ptr() == Arc::as_ptr(slot));
            if !known {
                entry.waiters.push(waiter);
            }
            log::debug!("slot {} joined in-flight fetch of {key}", slot.id());
            return;
        }
        in_flight.insert(
            key.clone(),
            InFlight {
                file: request.cache_file.clone(),
                target,
                waiters: vec![waiter],
            },
        );
        drop(in_flight);

        let fetch = FetchRequest {
            url: request.url,
            destination: request.cache_file,
            cache_expiry: self.cache_expiry(),
        };
        log::debug!("fetching {} as {key}", fetch.url);

        let service = self.service.clone();
        let mailbox = self.mailbox.clone();
        self.pool.submit(
            CancellationToken::new(),
            Box::new(move |_: &CancellationToken| {
                let mut progress = |received: u64, total: Option<u64>| match total {
                    Some(total) => log::trace!("{key}: {received}/{total} bytes"),
                    None => log::trace!("{key}: {received} bytes"),
                };
                let result = service.fetch(&fetch, &mut progress);
                mailbox.post(Completion::Fetched { key, result });
            }),
        );
    }

    /// Apply a finished transfer on the interactive thread.
    pub(crate) fn complete(
        &self,
        key: RequestKey,
        result: Result<(), FetchError>,
        decodes: &DecodeScheduler,
    ) {
        let Some(entry) = self.in_flight.lock().unwrap().remove(&key) else {
            log::debug!("no waiters for finished fetch of {key}");
            return;
        };

        if let Err(err) = &result {
            log::warn!("fetch of {key} failed: {err}");
        }

        for waiter in entry.waiters {
            let Some(slot) = waiter.slot.upgrade() else {
                continue;
            };
            // The slot may have been resolved again since, to other data or
            // to the same data at another size.
            if !slot.holder().intends(&waiter.key) {
                log::debug!("dropping fetch of {key}: slot {} was rebound", slot.id());
                continue;
            }
            match &result {
                Ok(()) => {
                    decodes.decode_fetched(
                        waiter.key,
                        entry.file.clone(),
                        entry.target,
                        slot.holder(),
                    );
                }
                Err(_) => decodes.deliver_fallback(slot.holder(), waiter.key),
            }
        }
    }

    fn track_size(&self, (width, height): (u32, u32)) -> (u32, u32) {
        let width = self.max_width.fetch_max(width, Ordering::AcqRel).max(width);
        let height = self.max_height.fetch_max(height, Ordering::AcqRel).max(height);
        (width, height)
    }

    /// Largest slot size seen so far; used as the request dimensions.
    pub fn max_dimensions(&self) -> (u32, u32) {
        (
            self.max_width.load(Ordering::Acquire),
            self.max_height.load(Ordering::Acquire),
        )
    }

    pub fn gate(&self) -> &ScrollGate {
        &self.gate
    }

    pub fn registry(&self) -> &SlotRegistry<D> {
        &self.registry
    }

    pub fn cache_expiry(&self) -> Option<Duration> {
        *self.cache_expiry.lock().unwrap()
    }

    pub fn set_cache_expiry(&self, expiry: Option<Duration>) {
        *self.cache_expiry.lock().unwrap() = expiry;
    }

    /// Transfers started and not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub(crate) fn shutdown(self) {
        self.pool.shutdown();
    }
}
