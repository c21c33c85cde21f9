//! Stack snapshots of the monitored thread.
//!
//! # Module Structure
//!
//! - [`shadow`]: per-thread registry of labelled frames, maintained by the
//!   monitored thread through [`enter`] / [`frame!`](crate::frame)
//! - [`capture`]: the [`StackCapturer`] seam used by the monitor thread
//!
//! # Text Format
//!
//! Snapshots render innermost frame first, one frame per line:
//!
//! ```text
//!     at block_sync (tests/basic.rs:14:5)
//!     at handle_request (src/server.rs:88:9)
//! ```

mod capture;
mod shadow;

pub use capture::{ShadowStackCapturer, StackCapturer};
pub use shadow::{enter, FrameGuard, ShadowStack};

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;

/// Maximum number of frames kept in a snapshot.
pub const MAX_FRAMES: usize = 32;

/// Prefix of every rendered frame line.
pub const LINE_PREFIX: &str = "    at ";

const UNKNOWN: &str = "(unknown)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    label: Cow<'static, str>,
    file: Cow<'static, str>,
    line: Option<u32>,
    column: Option<u32>,
}

impl Frame {
    pub fn new(
        label: impl Into<Cow<'static, str>>,
        file: impl Into<Cow<'static, str>>,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            label: label.into(),
            file: file.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    /// A frame whose line and column are not known.
    pub fn without_position(
        label: impl Into<Cow<'static, str>>,
        file: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            label: label.into(),
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub(crate) fn at_location(
        label: impl Into<Cow<'static, str>>,
        location: &'static Location<'static>,
    ) -> Self {
        Self::new(label, location.file(), location.line(), location.column())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn column(&self) -> Option<u32> {
        self.column
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.label.is_empty() {
            UNKNOWN
        } else {
            &self.label
        };
        let file = if self.file.is_empty() {
            UNKNOWN
        } else {
            &self.file
        };
        write!(f, "{} ({}:", label, file)?;
        match self.line {
            Some(line) => write!(f, "{}", line)?,
            None => f.write_str(UNKNOWN)?,
        }
        f.write_str(":")?;
        match self.column {
            Some(column) => write!(f, "{}", column)?,
            None => f.write_str(UNKNOWN)?,
        }
        f.write_str(")")
    }
}

/// An immutable, bounded snapshot of a call stack, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackSnapshot {
    frames: Vec<Frame>,
    depth: usize,
}

impl StackSnapshot {
    /// Builds a snapshot from frames ordered innermost first, keeping at most
    /// `max_frames` of them.
    pub fn from_innermost(mut frames: Vec<Frame>, max_frames: usize) -> Self {
        let depth = frames.len();
        frames.truncate(max_frames);
        Self { frames, depth }
    }

    /// Builds a snapshot from frames ordered outermost first (call order),
    /// keeping the innermost `max_frames`.
    pub fn from_outermost(frames: &[Frame], max_frames: usize) -> Self {
        let depth = frames.len();
        let frames = frames.iter().rev().take(max_frames).cloned().collect();
        Self { frames, depth }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Depth of the stack before truncation.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_truncated(&self) -> bool {
        self.depth > self.frames.len()
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, frame) in self.frames.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}{}", LINE_PREFIX, frame)?;
        }
        Ok(())
    }
}

/// Reduces a `type_name` path such as `app::server::handle::{{closure}}` to
/// the enclosing function's name (`handle`).
pub fn trim_function_path(path: &str) -> &str {
    let mut path = path;
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    path.rsplit("::").next().unwrap_or(path)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __function_name {
    () => {{
        fn __loopwatch_here() {}
        fn __loopwatch_type_name<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __loopwatch_type_name(__loopwatch_here);
        $crate::stack::trim_function_path(name.strip_suffix("::__loopwatch_here").unwrap_or(name))
    }};
}

/// Enters a shadow-stack frame that lasts until the end of the current block.
///
/// `frame!()` labels the frame with the enclosing function's name;
/// `frame!("label")` uses an explicit label. The recorded location is the
/// macro invocation site.
///
/// ```
/// fn handle_request() {
///     loopwatch::frame!();
///     // ... work that may block ...
/// }
/// # handle_request();
/// ```
#[macro_export]
macro_rules! frame {
    () => {
        let _loopwatch_frame = $crate::stack::enter($crate::__function_name!());
    };
    ($label:expr) => {
        let _loopwatch_frame = $crate::stack::enter($label);
    };
}
