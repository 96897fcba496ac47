//! At-most-one-subscriber callback slots.
//!
//! The protocol model is one subscriber per event per session server:
//! installing a new callback supersedes the old one instead of silently
//! shadowing it, and the superseded [`Subscription`] handle becomes
//! inert.

use std::sync::Arc;

use parking_lot::Mutex;

/// A single replaceable callback slot.
pub struct Slot<T> {
    inner: Arc<Mutex<SlotInner<T>>>,
}

struct SlotInner<T> {
    generation: u64,
    value: Option<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                generation: 0,
                value: None,
            })),
        }
    }

    /// Installs `value`, superseding any current callback.
    pub fn install(&self, value: T) -> Subscription {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.value = Some(value);
            inner.generation
        };
        let inner = Arc::clone(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                let mut slot = inner.lock();
                if slot.generation == generation {
                    slot.value = None;
                }
            })),
        }
    }

    /// Takes the current callback out for invocation.
    ///
    /// The caller invokes it without the slot lock held (so the
    /// callback may install a replacement from inside itself) and then
    /// hands it back via [`restore`](Self::restore).
    pub(crate) fn take(&self) -> Option<(u64, T)> {
        let mut inner = self.inner.lock();
        let value = inner.value.take()?;
        Some((inner.generation, value))
    }

    /// Puts a taken callback back, unless it was superseded or
    /// cancelled while out.
    pub(crate) fn restore(&self, generation: u64, value: T) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.value.is_none() {
            inner.value = Some(value);
        }
    }
}

/// Handle to an installed callback. `cancel` removes the callback; it
/// is a no-op once a newer callback has taken the slot. Dropping the
/// handle leaves the callback installed.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
