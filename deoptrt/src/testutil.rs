//! Fixture builders for hand-constructing side tables and images without an optimizing compiler
//! or a running ELF binary to load one from (spec.md §8's testable properties and concrete
//! scenarios; SPEC_FULL.md §8's `testutil` scaffolding note).
//!
//! Every method call here is infallible: a builder is meant to let a test describe "a function
//! at this address with these records" directly, skipping the byte-level wire format entirely.
//! The wire format itself is exercised by `sidetable`'s own decoder tests.

use crate::image::Image;
use sidetable::{Location, SideTable, StackMapRecord, StackSizeRecord};

/// Builds an in-memory [`SideTable`] (and, optionally, the [`Image`] symbol table that goes with
/// it) one function at a time.
#[derive(Default)]
pub struct SideTableBuilder {
    constants: Vec<u64>,
    size_records: Vec<StackSizeRecord>,
    map_records: Vec<StackMapRecord>,
    symbols: Vec<(String, u64, u64)>,
    current_function: Option<usize>,
}

impl SideTableBuilder {
    pub fn new() -> SideTableBuilder {
        SideTableBuilder::default()
    }

    /// Register a constant pool entry, returning its index for use in a `ConstIndex` location.
    pub fn constant(&mut self, value: u64) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Start a new function. Every [`Self::record`] call that follows belongs to this function
    /// until the next [`Self::function`] call.
    pub fn function(&mut self, name: &str, start: u64, end: u64, frame_size: u64) -> &mut Self {
        let function_index = self.size_records.len();
        self.size_records.push(StackSizeRecord {
            function_start_address: start,
            function_frame_size: frame_size,
            record_count: 0,
            function_index,
            first_record_index: self.map_records.len(),
        });
        self.symbols.push((name.to_string(), start, end));
        self.current_function = Some(function_index);
        self
    }

    /// Add a stack map record to the function most recently started with [`Self::function`].
    /// `pairs` alternates value/size locations, matching spec.md §3's pairing law.
    pub fn record(&mut self, id: i64, instr_offset: u32, pairs: &[(Location, Location)]) -> &mut Self {
        let function_index = self
            .current_function
            .expect("record() called before function()");

        let mut locations = Vec::with_capacity(pairs.len() * 2);
        for (value, size) in pairs {
            locations.push(*value);
            locations.push(*size);
        }

        self.map_records.push(StackMapRecord {
            patchpoint_id: id,
            instr_offset,
            locations,
            liveouts: Vec::new(),
            record_index: self.map_records.len(),
        });
        self.size_records[function_index].record_count += 1;
        self
    }

    pub fn build(self) -> SideTable {
        SideTable {
            version: 3,
            constants: self.constants,
            size_records: self.size_records,
            map_records: self.map_records,
        }
    }

    pub fn build_image(self) -> Image {
        let symbols = self.symbols.clone();
        Image::from_parts(self.build(), symbols)
    }
}
