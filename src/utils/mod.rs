//! Shared helpers
//!
//! Byte formatting, cache/URL path helpers, progress tracking and hashing.

mod format;
mod hash;
mod path;
mod progress;

pub use format::*;
pub use hash::*;
pub use path::*;
pub use progress::*;
