use crate::{error::DeoptError, image::Image, walker::{FramePointerCursor, UnwindCursor}};
use sidetable::{RegisterFile, SideTable};

/// Bound on how deep a call stack this system will walk, matching the original decoder's
/// `MAX_CALL_STACK_DEPTH`. A guard failure this deep indicates runaway recursion rather than a
/// stack this system should try to reconstruct.
pub const MAX_CALL_STACK_DEPTH: usize = 256;

/// One frame of the call stack the guard failed in (spec.md §3 "Frame").
///
/// `real_bp` differs from `bp` only for a synthetic frame created by inlined-frame synthesis
/// (spec.md §4.5): such a frame's live locations were recorded relative to the base pointer of
/// the function it was inlined into, not a base pointer of its own.
#[derive(Clone, Debug)]
pub struct Frame {
    pub patchpoint_id: i64,
    pub record_index: usize,
    pub size_index: usize,
    pub return_address: u64,
    pub bp: u64,
    pub real_bp: u64,
    pub registers: RegisterFile,
    pub inlined: bool,
}

/// The full reconstructed call stack at the moment a guard failed (spec.md §3
/// "CallStackState").
#[derive(Clone, Debug, Default)]
pub struct CallStackState {
    pub frames: Vec<Frame>,
}

/// Walk the call stack starting from the patchpoint that just failed its guard, stopping once a
/// frame inside `main` is reached (spec.md §4.4).
///
/// `initial_bp` is the base pointer of the frame that failed the guard; `registers` is the
/// register file captured at the trap (only meaningful for that innermost frame — outer frames
/// only ever need their stack-resident live locations, since a frame's registers are not live
/// once it has made a call).
pub fn collect(
    table: &SideTable,
    img: &Image,
    initial_ppid: i64,
    initial_bp: u64,
    registers: RegisterFile,
) -> Result<CallStackState, DeoptError> {
    let mut frames = Vec::new();

    let mut record = table.record_for_id(initial_ppid)?;
    let mut size_rec = table.size_record_for_map_index(record.record_index)?;
    let mut bp = initial_bp;
    let mut regs = registers;

    loop {
        frames.push(Frame {
            patchpoint_id: record.patchpoint_id,
            record_index: record.record_index,
            size_index: size_rec.function_index,
            return_address: size_rec.function_start_address + record.instr_offset as u64,
            bp,
            real_bp: bp,
            registers: regs.clone(),
            inlined: false,
        });

        if frames.len() >= MAX_CALL_STACK_DEPTH {
            return Err(DeoptError::StackTooDeep(MAX_CALL_STACK_DEPTH));
        }
        if img.is_in_main(size_rec.function_start_address) {
            break;
        }

        let mut cursor = FramePointerCursor::new(0, bp);
        if !cursor.step() {
            break;
        }
        let caller_ret_addr = cursor.pc();
        bp = cursor.bp();

        // Capture whatever this cursor's unwind strategy can recover at the caller's frame,
        // rather than assuming it's all zero. A frame-pointer walk only ever recovers RBP/RSP
        // (see `FramePointerCursor::read_register`); any Register-kind live location this system
        // needs to resolve at an outer frame beyond those two is out of reach without CFI.
        regs = RegisterFile::new();
        for dwarf_num in 0..16u16 {
            if let Some(value) = cursor.read_register(dwarf_num) {
                regs.set(dwarf_num, value);
            }
        }

        record = match table.first_record_strictly_after(caller_ret_addr) {
            Ok(r) => r,
            Err(_) => break,
        };
        size_rec = table.size_record_for_map_index(record.record_index)?;
    }

    Ok(CallStackState { frames })
}
