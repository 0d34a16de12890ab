use crate::{
    error::DeoptError,
    image::Image,
    state::{CallStackState, Frame},
};
use sidetable::SideTable;

/// Length, in bytes, of the `call rel32` instruction this system's checkpoint insertion pass
/// emits after every call site. Used only to step past a call instruction's own bytes when
/// looking for the next patchpoint that follows it.
pub(crate) const CALL_INSTRUCTION_SIZE: u64 = 5;

/// Detect frames whose return address doesn't land back inside their own function, and splice
/// in the synthetic frames needed to represent the inlined calls the optimizer collapsed away
/// (spec.md §4.5).
///
/// Grounded on the original decoder's `collect_inlined_frames`: a frame is inlined exactly when
/// its stored return address falls outside `[function_start, symbol_end)` of the function its
/// own record belongs to.
pub fn synthesize_inlined_frames(
    table: &SideTable,
    img: &Image,
    state: &mut CallStackState,
) -> Result<bool, DeoptError> {
    let mut found_any = false;
    let mut i = 0;
    while i + 1 < state.frames.len() {
        let outer = state.frames[i].clone();
        let size_rec = table.size_record_for_map_index(outer.record_index)?;
        let end_addr = img
            .symbol_end(size_rec.function_start_address)
            .unwrap_or(u64::MAX);

        if outer.return_address >= size_rec.function_start_address && outer.return_address < end_addr {
            i += 1;
            continue;
        }

        found_any = true;
        let enclosing = state.frames[i + 1].clone();
        let synthesized = synthesize_chain(table, &outer, &enclosing)?;
        let inserted = synthesized.len();
        for (k, frame) in synthesized.into_iter().enumerate() {
            state.frames.insert(i + 1 + k, frame);
        }
        i += 1 + inserted;
    }
    Ok(found_any)
}

/// Walk forward through the side table from `outer.return_address`, collecting one synthetic
/// frame for every patchpoint record that was re-attributed to the enclosing physical function
/// by inlining, stopping at the record that is `enclosing`'s own (spec.md §4.5's "next patchpoint
/// that authentically belongs to the enclosing physical function").
///
/// Several distinct functions can be inlined, one after another, into the same physical frame;
/// each needs its own synthetic frame (its own twin, frame size, and live variables), so this
/// collects all of them in one pass rather than assuming exactly one.
///
/// Grounded on the original decoder's `get_restored_state`, which runs the same
/// `stmap_first_rec_after_addr`-driven `do...while` loop, advancing past each found record in
/// turn until it reaches the one whose id matches the enclosing frame's.
fn synthesize_chain(
    table: &SideTable,
    outer: &Frame,
    enclosing: &Frame,
) -> Result<Vec<Frame>, DeoptError> {
    let mut frames = Vec::new();
    let mut addr = outer.return_address + CALL_INSTRUCTION_SIZE;

    loop {
        let record = table.first_record_strictly_after(addr)?;
        if record.patchpoint_id == enclosing.patchpoint_id {
            break;
        }

        let size_rec = table.size_record_for_map_index(record.record_index)?;
        let return_address = size_rec.function_start_address + record.instr_offset as u64;

        log::debug!(
            "synthesized inlined frame for patchpoint {} in function at {:#x}",
            record.patchpoint_id,
            size_rec.function_start_address
        );

        frames.push(Frame {
            patchpoint_id: record.patchpoint_id,
            record_index: record.record_index,
            size_index: size_rec.function_index,
            return_address: outer.return_address,
            bp: outer.bp,
            real_bp: enclosing.real_bp,
            registers: enclosing.registers.clone(),
            inlined: true,
        });

        addr = return_address + 1;
    }

    if frames.is_empty() {
        return Err(DeoptError::NoSymbolForAddress(outer.return_address));
    }

    Ok(frames)
}
