use deku::prelude::*;

/// The five location kinds the side-table format defines (spec.md §3, §6).
///
/// `Indirect` is recognised here but rejected by both the resolver and the handler's placement
/// logic (spec.md §4.2, §9 "Open questions").
#[derive(DekuRead, Clone, Copy, Debug, PartialEq, Eq)]
#[deku(type = "u8")]
pub enum LocationKind {
    #[deku(id = "0x1")]
    Register,
    #[deku(id = "0x2")]
    Direct,
    #[deku(id = "0x3")]
    Indirect,
    #[deku(id = "0x4")]
    Constant,
    #[deku(id = "0x5")]
    ConstIndex,
}

/// A single live-location entry, exactly as laid out on the wire (12 bytes, spec.md §6).
#[derive(DekuRead, Clone, Copy, Debug)]
pub struct Location {
    pub kind: LocationKind,
    reserved: u8,
    pub size: u16,
    pub dwarf_reg_num: u16,
    reserved2: u16,
    pub offset: i32,
}

impl Location {
    /// Byte size of one wire-format `Location` entry.
    pub const WIRE_SIZE: usize = 12;

    /// Construct a `Location` directly, bypassing the wire decoder. Used by
    /// [`crate`]'s own decoder tests and by `deoptrt`'s fixture builder, both of which need to
    /// build side tables without an actual `.llvm_stackmaps` section to decode.
    pub fn new(kind: LocationKind, size: u16, dwarf_reg_num: u16, offset: i32) -> Location {
        Location {
            kind,
            reserved: 0,
            size,
            dwarf_reg_num,
            reserved2: 0,
            offset,
        }
    }
}

/// A callee-saved register that a record's enclosing patchpoint also wants preserved
/// (spec.md §3, §6 — 4-byte wire format).
#[derive(DekuRead, Clone, Copy, Debug)]
pub struct LiveOut {
    pub dwarf_reg_num: u16,
    reserved: u8,
    pub size: u8,
}

impl LiveOut {
    pub const WIRE_SIZE: usize = 4;

    pub fn new(dwarf_reg_num: u16, size: u8) -> LiveOut {
        LiveOut { dwarf_reg_num, reserved: 0, size }
    }
}
