//! Decoder and query index for the binary side table a trace-based optimizer's compiler emits
//! alongside optimized code, plus the location resolver that turns a decoded [`Location`] into
//! a concrete value given a frame and register file.

mod error;
mod location;
mod record;
mod resolver;
mod table;

pub use error::{LookupError, SideTableError};
pub use location::{LiveOut, Location, LocationKind};
pub use record::{StackMapRecord, StackSizeRecord};
pub use resolver::{resolve, resolve_pairs, RegisterFile, ResolvedValue};
pub use table::{SideTable, MAX_LIVE_OBJECT_SIZE};
