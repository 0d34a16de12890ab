use crate::{
    error::{LookupError, SideTableError},
    location::{LiveOut, Location},
    record::{StackMapRecord, StackMapRecordHeader, StackSizeRecord, StackSizeRecordWire},
};
use deku::prelude::*;

/// The maximum live-object size this system tracks (spec.md §8, "Pairing law").
pub const MAX_LIVE_OBJECT_SIZE: u64 = 64;

const HEADER_SIZE: usize = 16;
const SIZE_RECORD_SIZE: usize = 24;
const MAP_RECORD_HEADER_SIZE: usize = 16;

/// The decoded, owned in-memory form of a compiler-emitted side table (spec.md §3, §4.1, §6).
///
/// Immutable after [`SideTable::parse`]. Every lookup method is either O(1) (thanks to the
/// prefix-sum index built during parsing) or a bounded linear scan over a single function's
/// records, never over the whole table.
#[derive(Debug)]
pub struct SideTable {
    pub version: u8,
    pub constants: Vec<u64>,
    pub size_records: Vec<StackSizeRecord>,
    pub map_records: Vec<StackMapRecord>,
}

impl SideTable {
    /// Decode a side table from a byte slice laid out exactly as spec.md §6 describes (the
    /// contents of a `.llvm_stackmaps` section).
    pub fn parse(bytes: &[u8]) -> Result<SideTable, SideTableError> {
        let mut off = 0usize;

        let version = read_u8(bytes, off)?;
        off += 1;
        let _reserved = read_u8(bytes, off)?;
        off += 1;
        let _reserved2 = read_u16(bytes, off)?;
        off += 2;
        let num_func = read_u32(bytes, off)? as usize;
        off += 4;
        let num_const = read_u32(bytes, off)? as usize;
        off += 4;
        let num_rec = read_u32(bytes, off)? as usize;
        off += 4;
        debug_assert_eq!(off, HEADER_SIZE);

        if version != 3 {
            return Err(SideTableError::UnsupportedVersion(version));
        }

        let mut size_wires = Vec::with_capacity(num_func);
        for _ in 0..num_func {
            let slice = slice_at(bytes, off, SIZE_RECORD_SIZE)?;
            let ((rest, _), wire) = StackSizeRecordWire::from_bytes((slice, 0))?;
            debug_assert!(rest.is_empty());
            size_wires.push(wire);
            off += SIZE_RECORD_SIZE;
        }

        let mut constants = Vec::with_capacity(num_const);
        for _ in 0..num_const {
            constants.push(read_u64(bytes, off)?);
            off += 8;
        }

        let mut map_records = Vec::with_capacity(num_rec);
        for record_index in 0..num_rec {
            let hdr_slice = slice_at(bytes, off, MAP_RECORD_HEADER_SIZE)?;
            let ((rest, _), hdr): (_, StackMapRecordHeader) =
                StackMapRecordHeader::from_bytes((hdr_slice, 0))?;
            debug_assert!(rest.is_empty());
            off += MAP_RECORD_HEADER_SIZE;

            if hdr.num_locations % 2 != 0 {
                return Err(SideTableError::OddLocationCount {
                    record_index,
                    num_locations: hdr.num_locations as usize,
                });
            }

            let mut locations = Vec::with_capacity(hdr.num_locations as usize);
            for _ in 0..hdr.num_locations {
                let slice = slice_at(bytes, off, Location::WIRE_SIZE)?;
                let ((rest, _), loc) = Location::from_bytes((slice, 0))?;
                debug_assert!(rest.is_empty());
                locations.push(loc);
                off += Location::WIRE_SIZE;
            }
            let locations_bytes = locations.len() * Location::WIRE_SIZE;
            if locations_bytes % 8 != 0 {
                off += 4;
            }

            // 2-byte reserved pad, then num_liveouts.
            off += 2;
            let num_liveouts = read_u16(bytes, off)? as usize;
            off += 2;

            let mut liveouts = Vec::with_capacity(num_liveouts);
            for _ in 0..num_liveouts {
                let slice = slice_at(bytes, off, LiveOut::WIRE_SIZE)?;
                let ((rest, _), lo) = LiveOut::from_bytes((slice, 0))?;
                debug_assert!(rest.is_empty());
                liveouts.push(lo);
                off += LiveOut::WIRE_SIZE;
            }
            let tail_bytes = 2 * 2 + liveouts.len() * LiveOut::WIRE_SIZE;
            if tail_bytes % 8 != 0 {
                off += 4;
            }

            // Pairing law (spec.md §8): the size half of every pair must be small.
            for (pair_index, pair) in locations.chunks_exact(2).enumerate() {
                if let Ok(size) = decode_inline_u64(&pair[1]) {
                    if size > MAX_LIVE_OBJECT_SIZE {
                        return Err(SideTableError::OversizedPair {
                            record_index,
                            pair_index,
                            size,
                        });
                    }
                }
            }

            map_records.push(StackMapRecord {
                patchpoint_id: hdr.patchpoint_id,
                instr_offset: hdr.instr_offset,
                locations,
                liveouts,
                record_index,
            });
        }

        let mut size_records = Vec::with_capacity(size_wires.len());
        let mut first_record_index = 0usize;
        for (function_index, wire) in size_wires.into_iter().enumerate() {
            size_records.push(StackSizeRecord {
                function_start_address: wire.function_start_address,
                function_frame_size: wire.function_frame_size,
                record_count: wire.record_count,
                function_index,
                first_record_index,
            });
            first_record_index += wire.record_count as usize;
        }
        if first_record_index != map_records.len() {
            log::warn!(
                "side table: size records claim {first_record_index} map records but {} were decoded",
                map_records.len()
            );
        }

        Ok(SideTable {
            version,
            constants,
            size_records,
            map_records,
        })
    }

    /// `record_for_id` (spec.md §4.1): linear search by `patchpoint_id`; returns the first match.
    pub fn record_for_id(&self, id: i64) -> Result<&StackMapRecord, LookupError> {
        self.map_records
            .iter()
            .find(|r| r.patchpoint_id == id)
            .ok_or(LookupError::NoRecordForId(id))
    }

    /// `size_record_for_map_index` (spec.md §4.1): O(1) via the record-count prefix sum computed
    /// at parse time.
    pub fn size_record_for_map_index(&self, map_idx: usize) -> Result<&StackSizeRecord, LookupError> {
        self.size_records
            .iter()
            .find(|s| {
                map_idx >= s.first_record_index
                    && map_idx < s.first_record_index + s.record_count as usize
            })
            .ok_or(LookupError::NoSizeRecordForIndex(map_idx))
    }

    /// `size_record_for_function_start` (spec.md §4.1).
    pub fn size_record_for_function_start(&self, addr: u64) -> Result<&StackSizeRecord, LookupError> {
        self.size_records
            .iter()
            .find(|s| s.function_start_address == addr)
            .ok_or(LookupError::NoSizeRecordForFunction(addr))
    }

    /// `last_record_in` (spec.md §4.1): the record with the largest `instr_offset` belonging to
    /// `size_record`. Records are contiguous and ordered ascending by `instr_offset` within a
    /// function (spec.md §3), so this is simply the last record of the owned range.
    pub fn last_record_in(&self, size_record: &StackSizeRecord) -> Result<&StackMapRecord, LookupError> {
        if size_record.record_count == 0 {
            return Err(LookupError::NoRecordInFunction(size_record.function_start_address));
        }
        let idx = size_record.first_record_index + size_record.record_count as usize - 1;
        self.map_records
            .get(idx)
            .ok_or(LookupError::NoRecordInFunction(size_record.function_start_address))
    }

    /// `first_record_strictly_after` (spec.md §4.1): the smallest record whose
    /// `function_start + instr_offset ≥ addr` and whose enclosing function contains `addr`.
    ///
    /// Mirrors the original decoder's linear scan (`stmap_first_rec_after_addr`): records are
    /// laid out function-by-function in ascending `instr_offset` order, so the first match found
    /// while scanning in record order is the smallest qualifying record.
    pub fn first_record_strictly_after(&self, addr: u64) -> Result<&StackMapRecord, LookupError> {
        for rec in &self.map_records {
            let size_rec = self.size_record_for_map_index(rec.record_index)?;
            let last_rec = self.last_record_in(size_rec)?;
            let last_addr = size_rec.function_start_address + last_rec.instr_offset as u64;
            if addr > last_addr {
                continue;
            }
            let candidate_addr = size_rec.function_start_address + rec.instr_offset as u64;
            if candidate_addr >= addr && addr > size_rec.function_start_address {
                return Ok(rec);
            }
        }
        Err(LookupError::NoRecordAfterAddress(addr))
    }

    /// `twin_lookup` (spec.md §4.1): given an optimized call's return address, find the
    /// patchpoint the call belongs to, complement its id to find the twin, and return the
    /// (size-record-index, map-record-index) pair identifying the twin's position.
    pub fn twin_lookup(&self, return_address: u64) -> Result<(usize, usize), LookupError> {
        let call_rec = self
            .first_record_strictly_after(return_address)
            .map_err(|_| LookupError::NoTwinForReturnAddress(return_address))?;
        let twin_rec = self.record_for_id(!call_rec.patchpoint_id)?;
        let twin_size_rec = self.size_record_for_map_index(twin_rec.record_index)?;
        Ok((twin_size_rec.function_index, twin_rec.record_index))
    }
}

/// Best-effort decode of an inline `Constant`/`ConstIndex`-free size payload, used only to check
/// the pairing-law invariant at parse time (spec.md §8). Register/Direct locations can't be
/// decoded without a live register file, so those are skipped (checked instead at resolve time).
fn decode_inline_u64(loc: &Location) -> Result<u64, ()> {
    use crate::location::LocationKind::*;
    match loc.kind {
        Constant => Ok(loc.offset as i64 as u64),
        _ => Err(()),
    }
}

fn slice_at<'a>(bytes: &'a [u8], off: usize, len: usize) -> Result<&'a [u8], SideTableError> {
    bytes
        .get(off..off + len)
        .ok_or(SideTableError::Truncated { offset: off, needed: len })
}

fn read_u8(bytes: &[u8], off: usize) -> Result<u8, SideTableError> {
    bytes
        .get(off)
        .copied()
        .ok_or(SideTableError::Truncated { offset: off, needed: 1 })
}

fn read_u16(bytes: &[u8], off: usize) -> Result<u16, SideTableError> {
    let s = slice_at(bytes, off, 2)?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(bytes: &[u8], off: usize) -> Result<u32, SideTableError> {
    let s = slice_at(bytes, off, 4)?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn read_u64(bytes: &[u8], off: usize) -> Result<u64, SideTableError> {
    let s = slice_at(bytes, off, 8)?;
    Ok(u64::from_le_bytes(s.try_into().unwrap()))
}
