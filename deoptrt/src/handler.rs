use crate::{
    error::DeoptError,
    image::{image, Image},
    inline::synthesize_inlined_frames,
    restore::{place_in_place, restore_unopt_stack},
    state::{collect, CallStackState},
    x64,
};
use sidetable::{RegisterFile, SideTable};

/// The guard-failure entry point (spec.md §4.8): called directly from a failed patchpoint, with
/// the patchpoint's own identifier as its argument.
///
/// `bp` is the base pointer of the frame that hosts the failing guard; `registers` points at a
/// snapshot of the sixteen general-purpose DWARF-numbered registers taken at the trap, or is
/// null if no register-kind location could possibly be live there.
///
/// Does not return: either it replaces the current stack with the reconstructed unoptimized one
/// and jumps into it, or it aborts the process. There is no third outcome — a guard failure this
/// system can't service is not a recoverable error (spec.md §5, §7).
#[no_mangle]
pub extern "C" fn guard_failure(ppid: i64, bp: u64, registers: *const u64) -> ! {
    let img = image();
    let regs = unsafe { read_registers(registers) };

    match run(img, ppid, bp, regs) {
        Ok(Dispatch::InPlace) => unsafe { x64::jmp_to_addr() },
        Ok(Dispatch::Inlined) => unsafe { x64::restore_inlined() },
        Err(e) => {
            log::error!("deoptimization could not be completed: {e}");
            std::process::abort();
        }
    }
}

enum Dispatch {
    InPlace,
    Inlined,
}

fn run(img: &'static Image, ppid: i64, bp: u64, registers: RegisterFile) -> Result<Dispatch, DeoptError> {
    let table = &img.side_table;

    let mut state = collect(table, img, ppid, bp, registers)?;
    let inlined = synthesize_inlined_frames(table, img, &mut state)?;
    if inlined {
        log::debug!("reconstructed {} inlined frame(s)", state.frames.len());
    }

    let jump_target = twin_continuation(table, &state)?;
    x64::set_jump_target(jump_target);

    if !inlined {
        let entry_registers = place_in_place(table, &state)?;
        x64::set_register_snapshot(&entry_registers);
        Ok(Dispatch::InPlace)
    } else {
        let (stack, entry_registers) = restore_unopt_stack(table, &state)?;
        x64::set_register_snapshot(&entry_registers);
        grow_and_place(state.frames.last().unwrap().bp, stack);
        Ok(Dispatch::Inlined)
    }
}

/// The address execution should resume at in the failing guard's twin: just past the patchpoint
/// call site that diverged (spec.md §4.8 step 8).
fn twin_continuation(table: &SideTable, state: &CallStackState) -> Result<u64, DeoptError> {
    let fail_frame = &state.frames[0];
    let (twin_size_idx, twin_rec_idx) = table.twin_lookup(fail_frame.return_address)?;
    let twin_size_rec = &table.size_records[twin_size_idx];
    let twin_record = &table.map_records[twin_rec_idx];
    Ok(twin_size_rec.function_start_address + twin_record.instr_offset as u64)
}

/// Grow the native stack below `main_bp` to make room for the reconstructed frames, copy them
/// into place, and hand the relocated top-of-stack and base pointer to `restore_inlined`
/// (spec.md §4.7 "Inlining slow path").
///
/// Neither the compiler's own trampoline nor the original decoder ever implements this dance —
/// the compiler's always fits the optimized and unoptimized stacks in the same space, and the
/// decoder's own inlined-frame handling stops at a `// XXX WIP` stub — so this is built directly
/// from spec.md's description: recurse until the real stack pointer has been pushed below the
/// target address, then `memcpy` the scratch buffer into the space that recursion proved exists.
fn grow_and_place(main_bp: u64, stack: crate::restore::RestoredStack) {
    let total_size = stack.buf.len() as u64;
    let dst = main_bp - total_size;

    grow_stack_below(dst);

    // SAFETY: `grow_stack_below` returned only once the real stack pointer was observed below
    // `dst`, so the `total_size` bytes starting at `dst` are backed, writable stack memory that
    // nothing else on this thread is using.
    unsafe {
        std::ptr::copy_nonoverlapping(stack.buf.as_ptr(), dst as *mut u8, total_size as usize);
    }

    let mut buf = stack.buf;
    buf.fill(0);
    drop(buf);

    let restored_sp = dst;
    let restored_bp = dst + stack.entry_bp_offset as u64;
    x64::set_restored_stack(restored_sp, restored_bp);
}

/// Force the native stack to extend below `target_rsp` by recursing, since the reconstructed
/// frames may be deeper than whatever headroom the kernel has already mapped below `main`'s base
/// pointer (spec.md §4.7).
#[inline(never)]
fn grow_stack_below(target_rsp: u64) {
    let probe: u8 = 0;
    let current_rsp = &probe as *const u8 as u64;
    if current_rsp > target_rsp {
        grow_stack_below(target_rsp);
    }
    std::hint::black_box(&probe);
}

unsafe fn read_registers(ptr: *const u64) -> RegisterFile {
    let mut regs = RegisterFile::new();
    if ptr.is_null() {
        return regs;
    }
    for dwarf_num in 0..16u16 {
        regs.set(dwarf_num, *ptr.add(dwarf_num as usize));
    }
    regs
}
