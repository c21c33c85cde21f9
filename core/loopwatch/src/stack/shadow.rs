//! Per-thread shadow stack of labelled frames.
//!
//! A thread cannot safely walk another thread's native stack, so the
//! monitored thread records its own call path: each [`enter`] pushes a frame
//! and the returned [`FrameGuard`] pops it again. The monitor thread only ever
//! reads the registry, with `try_lock`, so a capture can never make the
//! monitored thread wait.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread;

use super::{Frame, StackSnapshot};

thread_local! {
    static CURRENT: Arc<ShadowStack> = Arc::new(ShadowStack::for_current_thread());
}

#[derive(Debug)]
pub struct ShadowStack {
    thread_name: Option<String>,
    frames: Mutex<Vec<Frame>>,
}

impl ShadowStack {
    fn for_current_thread() -> Self {
        Self {
            thread_name: thread::current().name().map(str::to_string),
            frames: Mutex::new(Vec::new()),
        }
    }

    /// The calling thread's stack. The thread-local holds the only strong
    /// reference besides clones handed out here, so a `Weak` taken from it
    /// stops upgrading once the thread has exited and all clones are gone.
    pub fn current() -> Arc<ShadowStack> {
        CURRENT.with(Arc::clone)
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn push(&self, frame: Frame) -> usize {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let depth = frames.len();
        frames.push(frame);
        depth
    }

    fn truncate(&self, depth: usize) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .truncate(depth);
    }

    /// Reads the stack without blocking. Returns `None` if the owning thread
    /// holds the registry lock at this instant.
    pub fn try_snapshot(&self, max_frames: usize) -> Option<StackSnapshot> {
        let frames = match self.frames.try_lock() {
            Ok(frames) => frames,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(StackSnapshot::from_outermost(&frames, max_frames))
    }
}

/// Pops its frame (and anything pushed after it) when dropped. Not `Send`:
/// a guard must be dropped on the thread that created it.
#[must_use = "the frame is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FrameGuard {
    depth: Option<usize>,
    _not_send: PhantomData<*const ()>,
}

/// Pushes a frame labelled `label`, located at the caller, onto the calling
/// thread's shadow stack.
#[track_caller]
pub fn enter(label: impl Into<Cow<'static, str>>) -> FrameGuard {
    let frame = Frame::at_location(label, Location::caller());
    // During thread teardown the thread-local may already be gone.
    let depth = CURRENT.try_with(|stack| stack.push(frame)).ok();
    FrameGuard {
        depth,
        _not_send: PhantomData,
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(depth) = self.depth {
            let _ = CURRENT.try_with(|stack| stack.truncate(depth));
        }
    }
}
