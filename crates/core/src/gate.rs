//! Scroll gate
//!
//! Network fetching is allowed only while the list is settled. Entering a
//! scroll state closes the gate at once and silently: slots simply stop
//! starting fetches. Settling reopens it, and that transition alone asks the
//! caller to run a resume pass over the slots that were held back.
//!
//! The gate sits in front of a caller's own scroll listener and forwards
//! every event to it after running its own logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Scroll state reported by a list or grid widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollState {
    /// Not scrolling.
    Idle,
    /// Scrolling under the user's finger.
    TouchScroll,
    /// Coasting after the user let go.
    Fling,
}

impl ScrollState {
    pub fn is_idle(self) -> bool {
        self == ScrollState::Idle
    }
}

/// Receives scroll events from the view layer.
pub trait ScrollListener {
    fn on_scroll(&mut self, _first_visible: usize, _visible_count: usize, _total_count: usize) {}

    fn on_scroll_state_changed(&mut self, _state: ScrollState) {}
}

/// Owns the "network fetching allowed" flag.
pub struct ScrollGate {
    allowed: AtomicBool,
    next: Mutex<Option<Box<dyn ScrollListener + Send>>>,
}

impl ScrollGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self {
            allowed: AtomicBool::new(true),
            next: Mutex::new(None),
        }
    }

    pub fn is_network_fetching_allowed(&self) -> bool {
        self.allowed.load(Ordering::Acquire)
    }

    /// Set the flag. Returns `true` only when it flipped from closed to
    /// open, which is when the caller must resume held-back slots.
    pub fn set_network_fetching_allowed(&self, allowed: bool) -> bool {
        let previous = self.allowed.swap(allowed, Ordering::AcqRel);
        if previous != allowed {
            log::debug!(
                "network fetching {}",
                if allowed { "resumed" } else { "paused" }
            );
        }
        allowed && !previous
    }

    /// Apply a scroll-state change to the flag. Does not forward it.
    ///
    /// Returns `true` when a resume pass is due.
    pub fn apply_scroll_state(&self, state: ScrollState) -> bool {
        self.set_network_fetching_allowed(state.is_idle())
    }

    /// Chain a listener that sees every event after the gate. Returns the
    /// listener it replaces.
    pub fn set_next_listener(
        &self,
        listener: Option<Box<dyn ScrollListener + Send>>,
    ) -> Option<Box<dyn ScrollListener + Send>> {
        std::mem::replace(&mut *self.next.lock().unwrap(), listener)
    }

    pub fn has_next_listener(&self) -> bool {
        self.next.lock().unwrap().is_some()
    }

    pub fn forward_scroll(&self, first_visible: usize, visible_count: usize, total_count: usize) {
        self.with_next(|next| next.on_scroll(first_visible, visible_count, total_count));
    }

    pub fn forward_scroll_state(&self, state: ScrollState) {
        self.with_next(|next| next.on_scroll_state_changed(state));
    }

    // The listener runs outside the lock so it may re-enter the gate.
    fn with_next(&self, f: impl FnOnce(&mut Box<dyn ScrollListener + Send>)) {
        let taken = self.next.lock().unwrap().take();
        if let Some(mut next) = taken {
            f(&mut next);
            let mut slot = self.next.lock().unwrap();
            if slot.is_none() {
                *slot = Some(next);
            }
        }
    }
}

impl Default for ScrollGate {
    fn default() -> Self {
        Self::new()
    }
}
