//! Function interception: breakpoint-based hooking of already-loaded code.

pub mod engine;
pub mod patcher;

pub use engine::{Disposition, Frame, Handler, InterceptEngine, PrologueKind, MAX_INT_ARGS};
