//! One-shot poll notification handles.
//!
//! A shim registers a handle with [`Pipe::poll`](crate::Pipe::poll); the
//! engine fires it at most once on the next state change and then forgets
//! it. Re-arming requires another `poll` call.

/// Data may be read without blocking.
pub const POLL_IN: u16 = 0x001;
/// Data may be written without blocking.
pub const POLL_OUT: u16 = 0x004;
/// The pipe has no readers; writes would fail.
pub const POLL_ERR: u16 = 0x008;
/// The write side is gone and no data remains.
pub const POLL_HUP: u16 = 0x010;

/// An opaque edge-notification token.
pub struct PollHandle {
    notify: Box<dyn FnOnce() + Send>,
}

impl PollHandle {
    /// Wrap a notification callback. The engine consumes it exactly once.
    pub fn new(notify: impl FnOnce() + Send + 'static) -> Self {
        Self {
            notify: Box::new(notify),
        }
    }

    pub(crate) fn fire(self) {
        (self.notify)();
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fires_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = PollHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_without_firing_is_silent() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = PollHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
