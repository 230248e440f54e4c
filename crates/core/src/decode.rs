//! Decode stage
//!
//! [`DecodeScheduler`] turns a cache file into a [`DecodedImage`] on a decode
//! worker and hands it to the image holder that asked for it, unless that
//! holder has since moved on. Each holder has at most one active decode; a
//! new request for a different key cancels the old one, and a result is only
//! delivered if the holder's active task id still matches.

use crate::error::DecodeError;
use crate::pipeline::Completion;
use crate::slot::{HolderChange, HolderContent, HolderUpdate, ImageHolder};
use image::imageops::FilterType;
use image::ImageReader;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use thumbgrid_cache::{DecodedImage, MemoryCache, RequestKey};
use thumbgrid_scheduler::{
    CancellationRegistry, CancellationToken, MailSender, TaskId, WorkerPool, WorkerPoolConfig,
};

/// Target dimensions for a decode. Zero on an axis means unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn unconstrained() -> Self {
        Self::default()
    }
}

/// Integer down-sampling factor for a source decoded at a target size.
///
/// Per constrained axis the factor is `max(1, src / target)`; the smaller of
/// the two is used so neither axis drops below its target. Unconstrained
/// axes do not take part.
///
/// ```
/// use thumbgrid_core::sample_factor;
///
/// assert_eq!(sample_factor(2000, 1000, 500, 500), 2);
/// assert_eq!(sample_factor(400, 300, 500, 500), 1);
/// ```
pub fn sample_factor(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> u32 {
    let axis = |src: u32, target: u32| (target > 0).then(|| (src / target).max(1));
    match (axis(src_width, target_width), axis(src_height, target_height)) {
        (Some(w), Some(h)) => w.min(h),
        (Some(factor), None) | (None, Some(factor)) => factor,
        (None, None) => 1,
    }
}

/// Decodes cache files into RGBA images.
pub trait Decoder: Send + Sync {
    /// Read only the image dimensions.
    fn dimensions(&self, file: &Path) -> Result<(u32, u32), DecodeError>;

    /// Decode, down-sampled toward `target`.
    fn decode(&self, file: &Path, target: TargetSize) -> Result<DecodedImage, DecodeError>;
}

/// [`Decoder`] backed by the `image` crate.
///
/// The format is sniffed from the file contents, since cache files carry no
/// meaningful extension.
#[derive(Debug, Clone)]
pub struct ImageCrateDecoder {
    max_dimension: u32,
}

impl ImageCrateDecoder {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn bound(&self, target: u32) -> u32 {
        if target == 0 {
            self.max_dimension
        } else {
            target.min(self.max_dimension)
        }
    }
}

impl Default for ImageCrateDecoder {
    fn default() -> Self {
        Self::new(2000)
    }
}

fn open_reader(file: &Path) -> Result<ImageReader<io::BufReader<std::fs::File>>, DecodeError> {
    if !file.is_file() {
        return Err(DecodeError::Missing(file.to_path_buf()));
    }
    Ok(ImageReader::open(file)?.with_guessed_format()?)
}

impl Decoder for ImageCrateDecoder {
    fn dimensions(&self, file: &Path) -> Result<(u32, u32), DecodeError> {
        Ok(open_reader(file)?.into_dimensions()?)
    }

    fn decode(&self, file: &Path, target: TargetSize) -> Result<DecodedImage, DecodeError> {
        let mut img = open_reader(file)?.decode()?;
        let (src_width, src_height) = (img.width(), img.height());
        if src_width == 0 || src_height == 0 {
            return Err(DecodeError::Empty(file.to_path_buf()));
        }

        let factor = sample_factor(src_width, src_height, target.width, target.height);
        if factor > 1 {
            img = img.resize_exact(
                (src_width / factor).max(1),
                (src_height / factor).max(1),
                FilterType::Triangle,
            );
        }

        let (max_width, max_height) = (self.bound(target.width), self.bound(target.height));
        if img.width() > max_width || img.height() > max_height {
            img = img.thumbnail(max_width, max_height);
        }

        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        log::trace!(
            "decoded {} {src_width}x{src_height} -> {width}x{height} (factor {factor})",
            file.display()
        );
        Ok(DecodedImage::new(rgba.into_raw(), width, height))
    }
}

/// How a call to [`DecodeScheduler::decode`] was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStart {
    /// The holder already shows, or is decoding, this key.
    AlreadyCurrent,
    /// A decode for this key is already running for the holder.
    AlreadyInFlight,
    /// Delivered from the memory cache without a worker round-trip.
    MemoryHit,
    /// A decode task was queued.
    Started(TaskId),
}

struct PendingTask {
    holder: Weak<ImageHolder>,
    key: RequestKey,
    /// Started for a just-fetched file; delivery animates in.
    fresh: bool,
}

/// Schedules decodes and delivers their results to image holders.
pub struct DecodeScheduler {
    decoder: Arc<dyn Decoder>,
    pool: WorkerPool,
    tasks: CancellationRegistry<PendingTask>,
    memory: MemoryCache,
    mailbox: MailSender<Completion>,
    fallback: Mutex<Option<Arc<DecodedImage>>>,
    updates: Mutex<Vec<HolderUpdate>>,
}

impl DecodeScheduler {
    pub(crate) fn new(
        decoder: Arc<dyn Decoder>,
        workers: usize,
        memory: MemoryCache,
        mailbox: MailSender<Completion>,
    ) -> io::Result<Self> {
        let pool = WorkerPool::new(WorkerPoolConfig::new("thumbgrid-decode", workers))?;
        Ok(Self {
            decoder,
            pool,
            tasks: CancellationRegistry::new(),
            memory,
            mailbox,
            fallback: Mutex::new(None),
            updates: Mutex::new(Vec::new()),
        })
    }

    /// Show the image for `key` in `holder`, decoding `file` if needed.
    ///
    /// Must be called on the interactive thread. The holder is tagged with
    /// `key` before this returns.
    pub fn decode(
        &self,
        key: RequestKey,
        file: PathBuf,
        target: TargetSize,
        holder: &Arc<ImageHolder>,
    ) -> DecodeStart {
        self.start(key, file, target, holder, false)
    }

    /// Like [`decode`](Self::decode) for a file that was just fetched: the
    /// image requests the entrance animation when it is delivered.
    pub fn decode_fetched(
        &self,
        key: RequestKey,
        file: PathBuf,
        target: TargetSize,
        holder: &Arc<ImageHolder>,
    ) -> DecodeStart {
        self.start(key, file, target, holder, true)
    }

    fn start(
        &self,
        key: RequestKey,
        file: PathBuf,
        target: TargetSize,
        holder: &Arc<ImageHolder>,
        fresh: bool,
    ) -> DecodeStart {
        if holder.has_tag(&key) {
            return DecodeStart::AlreadyCurrent;
        }

        if let Some(active) = holder.active_task() {
            match self.tasks.with(active, |task| task.key == key) {
                Some(true) => return DecodeStart::AlreadyInFlight,
                Some(false) => {
                    if let Some(task) = self.tasks.cancel(active) {
                        log::debug!(
                            "slot {}: cancelled decode {active} of {} for {key}",
                            holder.slot(),
                            task.key
                        );
                    }
                }
                None => {}
            }
            holder.finish_task(active);
        }

        if let Some(image) = self.memory.get(&key) {
            holder.set_tag(Some(key.clone()));
            self.deliver(holder, key, image, fresh);
            return DecodeStart::MemoryHit;
        }

        let (id, token) = self.tasks.register(PendingTask {
            holder: Arc::downgrade(holder),
            key: key.clone(),
            fresh,
        });
        holder.set_tag(Some(key));
        holder.set_active_task(id);
        holder.set_content(HolderContent::Decoding);

        let decoder = self.decoder.clone();
        let mailbox = self.mailbox.clone();
        self.pool.submit(
            token,
            Box::new(move |token: &CancellationToken| {
                let result = decoder.decode(&file, target);
                if token.is_cancelled() {
                    log::trace!("decode {id} finished after cancellation");
                    return;
                }
                mailbox.post(Completion::Decoded { task: id, result });
            }),
        );
        DecodeStart::Started(id)
    }

    /// Apply a finished decode. Stale results are dropped.
    pub(crate) fn complete(&self, task: TaskId, result: Result<DecodedImage, DecodeError>) {
        let Some((_, pending)) = self.tasks.take(task) else {
            log::debug!("dropping result of cancelled decode {task}");
            return;
        };
        let Some(holder) = pending.holder.upgrade() else {
            log::debug!("dropping decode {task} of {}: slot is gone", pending.key);
            return;
        };
        if !holder.finish_task(task) {
            log::debug!(
                "dropping decode {task} of {}: slot {} moved on",
                pending.key,
                holder.slot()
            );
            return;
        }

        match result {
            Ok(image) => {
                let image = Arc::new(image);
                if !self.memory.put(pending.key.clone(), image.clone()) {
                    log::debug!("{} does not fit in the memory cache", pending.key);
                }
                self.deliver(&holder, pending.key, image, pending.fresh);
            }
            Err(err) => {
                log::warn!("decode of {} failed: {err}", pending.key);
                self.deliver_fallback(&holder, pending.key);
            }
        }
    }

    /// Cancel any decode bound to `holder`, clear its tag and show the
    /// placeholder.
    pub fn reset_to_placeholder(&self, holder: &ImageHolder) {
        if let Some(active) = holder.clear_active_task() {
            if self.tasks.cancel(active).is_some() {
                log::debug!("slot {}: cancelled decode {active}", holder.slot());
            }
        }
        holder.set_tag(None);
        holder.set_content(HolderContent::Placeholder);
    }

    /// Assign the fallback image to `holder`.
    pub fn deliver_fallback(&self, holder: &ImageHolder, key: RequestKey) {
        holder.set_content(HolderContent::Fallback(self.fallback()));
        self.record(HolderUpdate {
            slot: holder.slot(),
            key,
            change: HolderChange::Fallback,
        });
    }

    fn deliver(
        &self,
        holder: &ImageHolder,
        key: RequestKey,
        image: Arc<DecodedImage>,
        animate: bool,
    ) {
        if animate {
            holder.request_entrance_animation();
        }
        let (width, height) = (image.width, image.height);
        holder.set_content(HolderContent::Image(image));
        self.record(HolderUpdate {
            slot: holder.slot(),
            key,
            change: HolderChange::Image {
                width,
                height,
                animate,
            },
        });
    }

    fn record(&self, update: HolderUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    /// Updates applied since the last call, oldest first.
    pub(crate) fn take_updates(&self) -> Vec<HolderUpdate> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }

    pub fn set_fallback(&self, image: Option<Arc<DecodedImage>>) {
        *self.fallback.lock().unwrap() = image;
    }

    pub fn fallback(&self) -> Option<Arc<DecodedImage>> {
        self.fallback.lock().unwrap().clone()
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn decoder(&self) -> &Arc<dyn Decoder> {
        &self.decoder
    }

    /// Decodes started and not yet delivered, cancelled or dropped.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn shutdown(self) {
        let cancelled = self.tasks.cancel_all();
        if cancelled > 0 {
            log::debug!("cancelled {cancelled} pending decodes at shutdown");
        }
        self.pool.shutdown();
    }
}
