use thiserror::Error;

/// Errors raised while decoding a `.llvm_stackmaps`-shaped binary side table.
///
/// Every variant here is fatal in the sense spec'd by the deoptimization handler: there is no
/// recovery from a corrupt side table, only a diagnostic. Callers in the handler crate convert
/// these into a process abort; callers in tests and the `dump-stackmap` tool surface them as
/// ordinary errors.
#[derive(Debug, Error)]
pub enum SideTableError {
    #[error("side table truncated: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("unsupported side table version {0} (only version 3 is understood)")]
    UnsupportedVersion(u8),

    #[error("stack map record {record_index} has an odd number of live locations ({num_locations})")]
    OddLocationCount {
        record_index: usize,
        num_locations: usize,
    },

    #[error(
        "live-location pair at record {record_index}, index {pair_index}: decoded size {size} exceeds the largest tracked live object size (64 bytes)"
    )]
    OversizedPair {
        record_index: usize,
        pair_index: usize,
        size: u64,
    },

    #[error("deku decode error: {0}")]
    Deku(#[from] deku::DekuError),
}

/// Errors raised when indexing into an already-decoded [`crate::SideTable`].
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no stack map record found for patchpoint id {0}")]
    NoRecordForId(i64),

    #[error("no stack size record contains map record index {0}")]
    NoSizeRecordForIndex(usize),

    #[error("no stack size record starts at function address {0:#x}")]
    NoSizeRecordForFunction(u64),

    #[error("no stack map record found after address {0:#x}")]
    NoRecordAfterAddress(u64),

    #[error("no stack map record exists in function at {0:#x}")]
    NoRecordInFunction(u64),

    #[error("twin lookup failed: no patchpoint spans return address {0:#x}")]
    NoTwinForReturnAddress(u64),
}
