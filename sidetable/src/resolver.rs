use crate::{error::LookupError, location::Location, location::LocationKind, table::SideTable};

/// A snapshot of the general-purpose registers at a guard site, indexed by DWARF register
/// number (spec.md §3, §4.2). The handler crate is responsible for populating one of these from
/// a trapped CPU context; this crate only consumes it.
#[derive(Clone, Debug, Default)]
pub struct RegisterFile {
    regs: [u64; 17],
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile { regs: [0; 17] }
    }

    pub fn set(&mut self, dwarf_reg_num: u16, value: u64) {
        self.regs[dwarf_reg_num as usize] = value;
    }

    pub fn get(&self, dwarf_reg_num: u16) -> u64 {
        self.regs[dwarf_reg_num as usize]
    }
}

/// The outcome of resolving a [`Location`] against a frame (spec.md §4.2).
///
/// `Direct` locations resolve to the address of a stack slot, not its contents: the caller reads
/// or writes through that address itself, since the slot may be wider than 8 bytes.
#[derive(Clone, Debug)]
pub enum ResolvedValue {
    Value(u64),
    Address(u64),
}

/// Resolve a [`Location`] to a concrete value or address (spec.md §4.2 Location Resolver).
///
/// `frame_base` is the value of the frame base register (RBP in the System V convention this
/// system targets) for the frame the location was recorded against. `regs` supplies register
/// contents for `Register` locations, which only ever occur at the outermost (innermost, i.e.
/// not-yet-unwound) frame of a guard site.
///
/// `Indirect` is recognised on the wire but not resolved: spec.md §9 leaves it unimplemented,
/// and no instrumentation pass this system performs ever emits one, so encountering one at
/// resolve time indicates a side table this system did not produce.
pub fn resolve(
    loc: &Location,
    frame_base: u64,
    regs: &RegisterFile,
    constants: &[u64],
) -> Result<ResolvedValue, LookupError> {
    match loc.kind {
        LocationKind::Register => Ok(ResolvedValue::Value(regs.get(loc.dwarf_reg_num))),
        LocationKind::Direct => {
            let addr = (frame_base as i64 + loc.offset as i64) as u64;
            Ok(ResolvedValue::Address(addr))
        }
        LocationKind::Constant => Ok(ResolvedValue::Value(loc.offset as i64 as u64)),
        LocationKind::ConstIndex => {
            let idx = loc.offset as usize;
            constants
                .get(idx)
                .copied()
                .map(ResolvedValue::Value)
                .ok_or(LookupError::NoSizeRecordForIndex(idx))
        }
        LocationKind::Indirect => {
            panic!("indirect locations are not produced or resolved by this implementation")
        }
    }
}

/// Resolve every pair in a record's location list against a single frame, pairing the value
/// location with the decoded size of its companion location (spec.md §3's pairing law).
pub fn resolve_pairs(
    table: &SideTable,
    record: &crate::record::StackMapRecord,
    frame_base: u64,
    regs: &RegisterFile,
) -> Result<Vec<(ResolvedValue, u64)>, LookupError> {
    let mut out = Vec::with_capacity(record.num_pairs());
    for (value_loc, size_loc) in record.pairs() {
        let value = resolve(value_loc, frame_base, regs, &table.constants)?;
        let size = match resolve(size_loc, frame_base, regs, &table.constants)? {
            ResolvedValue::Value(v) => v,
            ResolvedValue::Address(_) => {
                return Err(LookupError::NoSizeRecordForIndex(size_loc.offset as usize))
            }
        };
        out.push((value, size));
    }
    Ok(out)
}
