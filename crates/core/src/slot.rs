//! Display slots and their image holders
//!
//! A [`DisplaySlot`] is one on-screen row or cell. The view layer owns it as
//! an `Arc` and rebinds it to new data as rows recycle; the pipeline only
//! keeps `Weak` handles, so a slot disappears as soon as the view drops it.
//!
//! Each slot has an [`ImageHolder`]: what the slot currently shows, the
//! request key it is meant to show (its tag) and the decode task allowed to
//! deliver into it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thumbgrid_cache::{DecodedImage, RequestKey};
use thumbgrid_scheduler::TaskId;

/// Identifier of a display slot, unique within the process.
pub type SlotId = u64;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// What an image holder currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HolderContent {
    /// Never bound.
    #[default]
    Empty,
    /// Waiting on the network, or held back while scrolling.
    Placeholder,
    /// A decode is running for the holder's tag.
    Decoding,
    /// A decoded image.
    Image(Arc<DecodedImage>),
    /// Fetch or decode failed; carries the configured fallback image if any.
    Fallback(Option<Arc<DecodedImage>>),
}

impl HolderContent {
    pub fn is_image(&self) -> bool {
        matches!(self, HolderContent::Image(_))
    }

    /// Short lowercase name, used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            HolderContent::Empty => "empty",
            HolderContent::Placeholder => "placeholder",
            HolderContent::Decoding => "decoding",
            HolderContent::Image(_) => "image",
            HolderContent::Fallback(_) => "fallback",
        }
    }
}

/// A change applied to a holder on the interactive thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderUpdate {
    pub slot: SlotId,
    pub key: RequestKey,
    pub change: HolderChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderChange {
    /// A decoded image was delivered. `animate` is set for freshly fetched
    /// images.
    Image { width: u32, height: u32, animate: bool },
    /// The fallback image was assigned.
    Fallback,
}

/// Image side of a display slot.
///
/// The tag is the single source of truth for what the holder should show.
/// `active_task` is zero when no decode may deliver; a decode result is only
/// accepted if its task id still matches. `intended` is the key of the most
/// recent resolve and is what a finished fetch is checked against.
#[derive(Debug)]
pub struct ImageHolder {
    slot: SlotId,
    tag: Mutex<Option<RequestKey>>,
    intended: Mutex<Option<RequestKey>>,
    active_task: AtomicU64,
    content: Mutex<HolderContent>,
    animate: AtomicBool,
}

impl ImageHolder {
    pub fn new(slot: SlotId) -> Self {
        Self {
            slot,
            tag: Mutex::new(None),
            intended: Mutex::new(None),
            active_task: AtomicU64::new(0),
            content: Mutex::new(HolderContent::Empty),
            animate: AtomicBool::new(false),
        }
    }

    /// Id of the slot this holder belongs to
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn tag(&self) -> Option<RequestKey> {
        self.tag.lock().unwrap().clone()
    }

    pub fn has_tag(&self, key: &RequestKey) -> bool {
        self.tag.lock().unwrap().as_ref() == Some(key)
    }

    pub(crate) fn set_tag(&self, key: Option<RequestKey>) {
        *self.tag.lock().unwrap() = key;
    }

    /// Key the holder was last resolved for, possibly still being fetched.
    pub fn intended_key(&self) -> Option<RequestKey> {
        self.intended.lock().unwrap().clone()
    }

    pub fn intends(&self, key: &RequestKey) -> bool {
        self.intended.lock().unwrap().as_ref() == Some(key)
    }

    pub(crate) fn set_intended_key(&self, key: RequestKey) {
        *self.intended.lock().unwrap() = Some(key);
    }

    pub fn active_task(&self) -> Option<TaskId> {
        match self.active_task.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_active_task(&self, id: TaskId) {
        self.active_task.store(id, Ordering::Release);
    }

    /// Release the holder from task `id`. Fails if another task took over.
    pub(crate) fn finish_task(&self, id: TaskId) -> bool {
        self.active_task
            .compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Detach whatever task is active, returning its id.
    pub(crate) fn clear_active_task(&self) -> Option<TaskId> {
        match self.active_task.swap(0, Ordering::AcqRel) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn content(&self) -> HolderContent {
        self.content.lock().unwrap().clone()
    }

    pub(crate) fn set_content(&self, content: HolderContent) {
        *self.content.lock().unwrap() = content;
    }

    /// The decoded image currently shown, if any.
    pub fn image(&self) -> Option<Arc<DecodedImage>> {
        match &*self.content.lock().unwrap() {
            HolderContent::Image(image) => Some(image.clone()),
            _ => None,
        }
    }

    pub(crate) fn request_entrance_animation(&self) {
        self.animate.store(true, Ordering::Release);
    }

    /// Returns `true` once after a freshly fetched image was delivered.
    ///
    /// The view layer calls this when it draws the holder and fades the
    /// image in if it returns `true`.
    pub fn take_entrance_animation(&self) -> bool {
        self.animate.swap(false, Ordering::AcqRel)
    }
}

/// One on-screen visual unit bound to one data item.
pub struct DisplaySlot<D> {
    id: SlotId,
    data: Mutex<Option<D>>,
    holder: Arc<ImageHolder>,
    width: AtomicU32,
    height: AtomicU32,
}

impl<D: Clone> DisplaySlot<D> {
    /// Create an unbound slot. The caller keeps the `Arc` alive for as long
    /// as the row exists.
    pub fn new() -> Arc<Self> {
        let id = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            data: Mutex::new(None),
            holder: Arc::new(ImageHolder::new(id)),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
        })
    }

    /// Create a slot with a known laid-out size.
    pub fn with_size(width: u32, height: u32) -> Arc<Self> {
        let slot = Self::new();
        slot.set_size(width, height);
        slot
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Data the slot is currently bound to.
    pub fn data(&self) -> Option<D> {
        self.data.lock().unwrap().clone()
    }

    /// Rebind the slot, returning the previous data.
    pub(crate) fn set_data(&self, data: D) -> Option<D> {
        self.data.lock().unwrap().replace(data)
    }

    pub fn holder(&self) -> &Arc<ImageHolder> {
        &self.holder
    }

    /// Record the slot's laid-out pixel size.
    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn size(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }
}

impl<D> std::fmt::Debug for DisplaySlot<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySlot")
            .field("id", &self.id)
            .field("tag", &self.holder.tag())
            .finish()
    }
}
