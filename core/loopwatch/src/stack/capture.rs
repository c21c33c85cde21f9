//! Stack capture seam used by the monitor thread.

use std::sync::{Arc, Weak};
use std::thread;

use super::{ShadowStack, StackSnapshot};

/// Number of `try_lock` attempts before a capture gives up.
const CAPTURE_ATTEMPTS: usize = 16;

/// Captures the monitored thread's stack from the monitor thread.
///
/// Implementations must not block the target and must return quickly;
/// `None` means the stack could not be read and the episode is reported with
/// an empty stack.
pub trait StackCapturer: Send {
    fn capture(&self, max_frames: usize) -> Option<StackSnapshot>;
}

impl<F> StackCapturer for F
where
    F: Fn(usize) -> Option<StackSnapshot> + Send,
{
    fn capture(&self, max_frames: usize) -> Option<StackSnapshot> {
        self(max_frames)
    }
}

/// Reads the target thread's [`ShadowStack`].
#[derive(Debug, Clone)]
pub struct ShadowStackCapturer {
    target: Weak<ShadowStack>,
}

impl ShadowStackCapturer {
    pub fn new(target: &Arc<ShadowStack>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }

    /// Captures the calling thread's stack.
    pub fn current_thread() -> Self {
        Self::new(&ShadowStack::current())
    }
}

impl StackCapturer for ShadowStackCapturer {
    fn capture(&self, max_frames: usize) -> Option<StackSnapshot> {
        let stack = self.target.upgrade()?;
        for _ in 0..CAPTURE_ATTEMPTS {
            if let Some(snapshot) = stack.try_snapshot(max_frames) {
                return Some(snapshot);
            }
            thread::yield_now();
        }
        tracing::debug!(
            thread = stack.thread_name().unwrap_or("<unnamed>"),
            "Shadow stack busy; capture skipped"
        );
        None
    }
}
