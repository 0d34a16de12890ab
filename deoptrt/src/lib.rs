//! Runtime support for a trace-based optimizer's deoptimization path: decoding the side table
//! the compiler emitted, walking the call stack a guard failed in, and jumping into the
//! unoptimized twin of whatever was running.

mod error;
mod image;
mod inline;
mod restore;
mod state;
mod walker;
mod x64;

pub mod handler;
pub mod testutil;

pub use error::DeoptError;
pub use image::{image, Image};
pub use inline::synthesize_inlined_frames;
pub use restore::{place_in_place, restore_unopt_stack, RestoredStack};
pub use state::{collect, CallStackState, Frame, MAX_CALL_STACK_DEPTH};
pub use walker::{FramePointerCursor, UnwindCursor};
