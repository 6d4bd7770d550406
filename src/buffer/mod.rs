//! Buffer module: the append-only stream text and its fence state.
//!
//! This module contains:
//! - [`StreamBuffer`]: rope-like accumulator with O(new data) delta reads
//! - [`FenceParser`]: chunk-boundary tolerant code fence scanner

mod fence;
mod stream;

pub use fence::{CustomFence, FenceContainer, FenceKind, FenceParser, FenceState, FenceStep};
pub(crate) use fence::{fence_body, fence_opener, is_closing_run, is_custom_closer, strip_container};
pub(crate) use stream::floor_char_boundary;
pub use stream::{BufferMemoryStats, StreamBuffer, DEFAULT_MATERIALIZE_THRESHOLD};
