use crate::{error::DeoptError, state::CallStackState};
use sidetable::{resolve_pairs, Location, LocationKind, RegisterFile, ResolvedValue, SideTable};

/// Word size on the only target this system supports.
const WORD_SIZE: usize = 8;

/// One frame's worth of freshly allocated, filled-in stack memory (spec.md §4.6, §4.7).
///
/// `bytes` holds the twin frame's local variables at the offsets its own stack map records,
/// followed by the 16-byte linkage area (saved base pointer, then return address) that
/// [`assemble`] rewrites once every frame's final address is known.
pub struct RestoredFrame {
    pub bytes: Vec<u8>,
    pub twin_size_index: usize,
    pub twin_record_index: usize,
}

/// The fully assembled replacement stack, heap-allocated and ready for the jump trampoline to
/// copy into place (spec.md §4.7).
pub struct RestoredStack {
    pub buf: Vec<u8>,
    /// Byte offset of each frame's base within `buf`, outermost (of the reconstructed frames,
    /// not counting the untouched `main` anchor) first.
    pub frame_offsets: Vec<usize>,
    /// Offset of the innermost frame's linkage area; the trampoline sets RBP here.
    pub entry_bp_offset: usize,
}

/// Extract every live value the optimized frame recorded and place it into the shape the twin
/// frame expects (spec.md §4.6's pairing law: each pair's value goes where the twin's matching
/// pair's location says, sized by the pair's own size operand), building the replacement stack
/// in a fresh heap buffer rather than in place (spec.md §4.7 "Inlining slow path").
///
/// The outermost entry in `state.frames` is never a frame this runtime reconstructs: it is the
/// real frame inside `main` that `state::collect` walks up to and stops at, serving only as the
/// anchor the deepest reconstructed frame links back into. It is excluded here whenever more than
/// one frame is present; a lone frame (the degenerate case where the guard fired inside `main`
/// itself, or a test fixture with no anchor at all) is restored as-is.
///
/// Returns the assembled stack along with the register file resolved for the innermost frame,
/// since that is the one the slow-path trampoline must hand off to the CPU (spec.md §4.8 step 9).
pub fn restore_unopt_stack(
    table: &SideTable,
    state: &CallStackState,
) -> Result<(RestoredStack, RegisterFile), DeoptError> {
    let content_len = if state.frames.len() > 1 {
        state.frames.len() - 1
    } else {
        state.frames.len()
    };

    let mut frames = Vec::with_capacity(content_len);
    let mut entry_registers = RegisterFile::new();

    for (i, frame) in state.frames[..content_len].iter().enumerate() {
        let opt_record = table
            .map_records
            .get(frame.record_index)
            .ok_or(DeoptError::NoSymbolForAddress(frame.return_address))?;

        let (twin_size_idx, twin_rec_idx) = table.twin_lookup(frame.return_address)?;
        let twin_size_rec = &table.size_records[twin_size_idx];
        let twin_record = &table.map_records[twin_rec_idx];

        let values = resolve_pairs(table, opt_record, frame.real_bp, &frame.registers)?;

        // The new frame is laid out according to the twin's own frame size (spec.md §4.8 step
        // 6), not the optimized frame's: the twin's locals occupy different offsets and the twin
        // frame can be a different size entirely. +16 for the linkage area every frame carries.
        let mut bytes = vec![0u8; twin_size_rec.function_frame_size as usize + 16];
        let mut regs_out = if i == 0 { Some(&mut entry_registers) } else { None };

        for ((value, size), twin_loc) in values.iter().zip(twin_record.pairs().map(|(v, _)| v)) {
            place(&mut bytes, twin_loc, value, *size, regs_out.as_deref_mut())?;
        }

        frames.push(RestoredFrame {
            bytes,
            twin_size_index: twin_size_idx,
            twin_record_index: twin_rec_idx,
        });
    }

    let anchor = (content_len < state.frames.len()).then(|| &state.frames[content_len]);
    Ok((assemble(table, frames, anchor), entry_registers))
}

/// The no-inlining fast path (spec.md §4.7): apply §4.6 placement directly onto the live stack's
/// existing frames rather than a fresh buffer, and rewrite each frame's return-address slot (save
/// for the anchor frame, which is never touched) to resume in the twin.
///
/// Only `frame.bp`/`frame.real_bp` are used as destinations here, since by construction of this
/// path the physical stack already has exactly the right shape and size for the twins; there is
/// nothing to grow or relocate.
pub fn place_in_place(table: &SideTable, state: &CallStackState) -> Result<RegisterFile, DeoptError> {
    let content_len = if state.frames.len() > 1 {
        state.frames.len() - 1
    } else {
        state.frames.len()
    };

    let mut entry_registers = RegisterFile::new();
    let mut continuations = Vec::with_capacity(content_len);

    for (i, frame) in state.frames[..content_len].iter().enumerate() {
        let opt_record = table
            .map_records
            .get(frame.record_index)
            .ok_or(DeoptError::NoSymbolForAddress(frame.return_address))?;

        let (twin_size_idx, twin_rec_idx) = table.twin_lookup(frame.return_address)?;
        let twin_size_rec = &table.size_records[twin_size_idx];
        let twin_record = &table.map_records[twin_rec_idx];

        let values = resolve_pairs(table, opt_record, frame.real_bp, &frame.registers)?;
        let mut regs_out = if i == 0 { Some(&mut entry_registers) } else { None };

        for ((value, size), twin_loc) in values.iter().zip(twin_record.pairs().map(|(v, _)| v)) {
            place_live(frame.real_bp, twin_loc, value, *size, regs_out.as_deref_mut())?;
        }

        // Past the patchpoint's own call-site bytes, so execution resumes just after the point
        // that diverged.
        continuations.push(
            twin_size_rec.function_start_address
                + twin_record.instr_offset as u64
                + crate::inline::CALL_INSTRUCTION_SIZE,
        );
    }

    // A frame's own return-address slot belongs to its caller: it is where control goes once this
    // frame returns, so it must point into whichever frame called it, not into this frame's own
    // twin (spec.md §4.8 step 8). The outermost content frame's caller is the untouched frame
    // inside `main`, which has no twin and is left alone.
    for i in 0..content_len {
        if i + 1 >= content_len {
            continue;
        }
        let frame = &state.frames[i];
        // SAFETY: `frame.bp` is a real, live base pointer on the current thread's stack (this is
        // the fast path: the physical stack was never resized), and the return-address slot sits
        // at the conventional `bp + word_size` offset under the System V frame-pointer convention.
        unsafe {
            let slot = (frame.bp + WORD_SIZE as u64) as *mut u64;
            *slot = continuations[i + 1];
        }
    }

    Ok(entry_registers)
}

/// Write a resolved value into a twin frame's buffer at the slot `twin_loc` describes.
///
/// `registers`, when present, receives `Register`-kind destinations; only the innermost frame's
/// register file is ever consumed downstream (spec.md §4.8 step 9 restores registers from
/// `frame_0` alone), so callers pass `None` for every other frame.
fn place(
    bytes: &mut [u8],
    twin_loc: &Location,
    value: &ResolvedValue,
    size: u64,
    registers: Option<&mut RegisterFile>,
) -> Result<(), DeoptError> {
    match twin_loc.kind {
        LocationKind::Direct => {
            let offset = twin_loc.offset as isize;
            let start = (bytes.len() as isize + offset) as usize;
            let end = start + size as usize;
            if end > bytes.len() {
                return Ok(());
            }
            match value {
                ResolvedValue::Value(v) => {
                    let n = (size as usize).min(8);
                    bytes[start..start + n].copy_from_slice(&v.to_ne_bytes()[..n]);
                }
                ResolvedValue::Address(addr) => {
                    // SAFETY: `addr` was resolved from a live `Direct` location in the
                    // optimized frame that is still on the real stack at this point.
                    let src = unsafe {
                        std::slice::from_raw_parts(*addr as *const u8, size as usize)
                    };
                    bytes[start..end].copy_from_slice(src);
                }
            }
            Ok(())
        }
        LocationKind::Register => {
            if let Some(regs) = registers {
                let v = match value {
                    ResolvedValue::Value(v) => *v,
                    ResolvedValue::Address(addr) => unsafe { *(*addr as *const u64) },
                };
                regs.set(twin_loc.dwarf_reg_num, v);
            }
            Ok(())
        }
        LocationKind::Indirect => Err(DeoptError::IndirectLocation),
        LocationKind::Constant | LocationKind::ConstIndex => Ok(()),
    }
}

/// The in-place sibling of [`place`]: writes directly into the live stack at `frame_base`-relative
/// addresses instead of into a scratch buffer.
fn place_live(
    frame_base: u64,
    twin_loc: &Location,
    value: &ResolvedValue,
    size: u64,
    registers: Option<&mut RegisterFile>,
) -> Result<(), DeoptError> {
    match twin_loc.kind {
        LocationKind::Direct => {
            let addr = (frame_base as i64 + twin_loc.offset as i64) as u64;
            match value {
                ResolvedValue::Value(v) => {
                    let n = (size as usize).min(8);
                    // SAFETY: `addr` is a live stack slot within the current frame the fast path
                    // is restoring in place; its twin occupies the same physical memory the
                    // optimized frame did.
                    unsafe {
                        std::ptr::copy_nonoverlapping(v.to_ne_bytes().as_ptr(), addr as *mut u8, n)
                    };
                }
                ResolvedValue::Address(src) => unsafe {
                    std::ptr::copy_nonoverlapping(*src as *const u8, addr as *mut u8, size as usize)
                },
            }
            Ok(())
        }
        LocationKind::Register => {
            if let Some(regs) = registers {
                let v = match value {
                    ResolvedValue::Value(v) => *v,
                    ResolvedValue::Address(addr) => unsafe { *(*addr as *const u64) },
                };
                regs.set(twin_loc.dwarf_reg_num, v);
            }
            Ok(())
        }
        LocationKind::Indirect => Err(DeoptError::IndirectLocation),
        LocationKind::Constant | LocationKind::ConstIndex => Ok(()),
    }
}

/// Glue every frame's buffer into one contiguous allocation and record where each frame landed,
/// mirroring `insert_real_addresses`/`get_total_stack_size` from the original decoder.
///
/// `anchor`, when present, is the untouched real frame inside `main` that the deepest frame here
/// links back into: its real base pointer and whatever return address already sits above it on
/// the native stack become the last reconstructed frame's linkage, exactly as they would have
/// been found by a normal, unoptimized call chain.
fn assemble(
    table: &SideTable,
    frames: Vec<RestoredFrame>,
    anchor: Option<&crate::state::Frame>,
) -> RestoredStack {
    let total: usize = frames.iter().map(|f| f.bytes.len()).sum();
    let mut buf = Vec::with_capacity(total);
    let mut offsets = Vec::with_capacity(frames.len());

    for frame in &frames {
        offsets.push(buf.len());
        buf.extend_from_slice(&frame.bytes);
    }

    // Stitch the linkage areas: frame i's saved rbp points at frame i+1's base, and frame i's
    // return address is frame i+1's own twin resumption point — "returning" from frame i is
    // exactly resuming frame i+1 where its guard diverged (spec.md §4.8 step 8).
    for i in 0..frames.len().saturating_sub(1) {
        let here = offsets[i];
        let next = offsets[i + 1];
        let here_len = frames[i].bytes.len();

        let caller = &frames[i + 1];
        let caller_size_rec = &table.size_records[caller.twin_size_index];
        let caller_record = &table.map_records[caller.twin_record_index];
        let continuation = caller_size_rec.function_start_address
            + caller_record.instr_offset as u64
            + crate::inline::CALL_INSTRUCTION_SIZE;

        buf[here + here_len - 16..here + here_len - 8].copy_from_slice(&(next as u64).to_ne_bytes());
        buf[here + here_len - 8..here + here_len].copy_from_slice(&continuation.to_ne_bytes());
    }

    if let (Some(last), Some(anchor)) = (frames.last(), anchor) {
        let here = *offsets.last().unwrap();
        let here_len = last.bytes.len();
        // SAFETY: `anchor.bp` is `main`'s real, still-live base pointer; the return address
        // sitting just above it has not been touched by anything this runtime has done.
        let anchor_ret = unsafe { *((anchor.bp + WORD_SIZE as u64) as *const u64) };
        buf[here + here_len - 16..here + here_len - 8].copy_from_slice(&anchor.bp.to_ne_bytes());
        buf[here + here_len - 8..here + here_len].copy_from_slice(&anchor_ret.to_ne_bytes());
    }

    let entry_bp_offset = offsets.first().copied().unwrap_or(0);

    RestoredStack { buf, frame_offsets: offsets, entry_bp_offset }
}
