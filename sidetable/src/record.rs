use crate::location::{LiveOut, Location};
use deku::prelude::*;

/// One function's worth of prologue/epilogue bookkeeping (spec.md §3, §6 — 24 bytes on the wire).
#[derive(DekuRead, Clone, Copy, Debug)]
pub struct StackSizeRecordWire {
    pub function_start_address: u64,
    pub function_frame_size: u64,
    pub record_count: u64,
}

/// Owned, indexed form of a [`StackSizeRecordWire`].
///
/// `first_record_index` is not present on the wire; it is the prefix sum spec.md §9 recommends
/// precomputing so that [`crate::SideTable::size_record_for_map_index`] is O(1) rather than a
/// linear scan.
#[derive(Clone, Copy, Debug)]
pub struct StackSizeRecord {
    pub function_start_address: u64,
    pub function_frame_size: u64,
    pub record_count: u64,
    pub function_index: usize,
    pub first_record_index: usize,
}

impl StackSizeRecord {
    /// Exclusive end address of the function, as bounded by the host's `symbol_end` collaborator
    /// (spec.md §6). Callers that have a real binary loaded should prefer that collaborator;
    /// this is only an approximation used where no ELF image is available (e.g. unit tests).
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.function_start_address
    }
}

/// Fixed-size header that precedes a record's variable-length location/liveout arrays
/// (spec.md §6 — 16 bytes: u64 id, u32 offset, u16 reserved, u16 num_locations).
#[derive(DekuRead, Clone, Copy, Debug)]
pub struct StackMapRecordHeader {
    pub patchpoint_id: i64,
    pub instr_offset: u32,
    reserved: u16,
    pub num_locations: u16,
}

/// Owned, fully decoded stack map record (spec.md §3).
#[derive(Clone, Debug)]
pub struct StackMapRecord {
    pub patchpoint_id: i64,
    pub instr_offset: u32,
    pub locations: Vec<Location>,
    pub liveouts: Vec<LiveOut>,
    pub record_index: usize,
}

impl StackMapRecord {
    /// Number of live-location *pairs* (spec.md §3's pairing invariant: locations are always
    /// emitted in even/odd pairs).
    pub fn num_pairs(&self) -> usize {
        self.locations.len() / 2
    }

    /// Iterate live-location pairs as `(value_location, size_location)`.
    pub fn pairs(&self) -> impl Iterator<Item = (&Location, &Location)> {
        self.locations.chunks_exact(2).map(|pair| (&pair[0], &pair[1]))
    }
}
