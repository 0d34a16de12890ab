use sidetable::RegisterFile;

/// Process-wide handoff state between the guard handler and the two jump trampolines below
/// (spec.md §5, §6). Written once by the handler, read once by whichever trampoline it dispatches
/// to; the handler never runs concurrently with itself (spec.md §5), so these are plain statics,
/// not atomics.
static mut JUMP_TARGET: u64 = 0;
static mut REGISTER_SNAPSHOT: [u64; 16] = [0; 16];
static mut RESTORED_BP: u64 = 0;
static mut RESTORED_SP: u64 = 0;

/// Stash `frame_0`'s resolved registers where [`jmp_to_addr`] and [`restore_inlined`] will find
/// them (spec.md §4.8 step 9).
pub fn set_register_snapshot(regs: &RegisterFile) {
    // SAFETY: called only from the handler, never concurrently with a trampoline reading this
    // same state (spec.md §5).
    unsafe {
        for (i, slot) in REGISTER_SNAPSHOT.iter_mut().enumerate() {
            *slot = regs.get(i as u16);
        }
    }
}

/// Stash the address the failing guard's twin resumes at (spec.md §4.8 step 8).
pub fn set_jump_target(addr: u64) {
    unsafe { JUMP_TARGET = addr };
}

/// Stash the relocated stack's new top-of-stack and base pointer for [`restore_inlined`]
/// (spec.md §4.7's `restored_bp`/`restored_stack_size` globals).
pub fn set_restored_stack(sp: u64, bp: u64) {
    unsafe {
        RESTORED_SP = sp;
        RESTORED_BP = bp;
    }
}

/// The no-inlining fast path (spec.md §4.7, §6): reload the 16 general-purpose registers from the
/// snapshot the handler just populated and `jmp` to `jump_target`. The physical stack is left
/// exactly where it is — this never allocates, frees, or copies anything.
///
/// Grounded on the compiler's own `replace_stack` trampoline's register pop/jmp idiom, trimmed to
/// the general-purpose registers this system's `RegisterFile` models (no floating point, since no
/// location in the side table format this system decodes can describe one), and with the
/// stack-growth half of that trampoline split out into `restore_inlined` below.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub unsafe extern "C" fn jmp_to_addr() -> ! {
    std::arch::naked_asm!(
        "lea r10, [rip + {snapshot}]",
        "mov rax, [r10 + 0*8]",
        "mov rdx, [r10 + 1*8]",
        "mov rcx, [r10 + 2*8]",
        "mov rbx, [r10 + 3*8]",
        "mov rsi, [r10 + 4*8]",
        "mov rdi, [r10 + 5*8]",
        "mov rbp, [r10 + 6*8]",
        "mov rsp, [r10 + 7*8]",
        "mov r8,  [r10 + 8*8]",
        "mov r9,  [r10 + 9*8]",
        "mov r11, [r10 + 11*8]",
        "mov r12, [r10 + 12*8]",
        "mov r13, [r10 + 13*8]",
        "mov r14, [r10 + 14*8]",
        "mov r15, [r10 + 15*8]",
        "mov r10, [r10 + 10*8]",
        "jmp qword ptr [rip + {target}]",
        snapshot = sym REGISTER_SNAPSHOT,
        target = sym JUMP_TARGET,
    )
}

/// The inlining slow path (spec.md §4.7, §6): set `rsp`/`rbp` to the relocated stack's top and
/// base, then dispatch to `jump_target`. The handler has already grown the native stack and
/// memcpy'd the reconstructed frames into place by the time this runs; there is nothing left to
/// do here but re-point the two frame-defining registers.
///
/// The original decoder's own inlined-frame handling never got past a `// XXX WIP` stub, so this
/// has no literal source to trim from; it is built directly from spec.md §4.7's description of
/// the dance, in the same bare register-juggling style as [`jmp_to_addr`] and the compiler's
/// `replace_stack`.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
pub unsafe extern "C" fn restore_inlined() -> ! {
    std::arch::naked_asm!(
        "mov rsp, [rip + {sp}]",
        "mov rbp, [rip + {bp}]",
        "jmp qword ptr [rip + {target}]",
        sp = sym RESTORED_SP,
        bp = sym RESTORED_BP,
        target = sym JUMP_TARGET,
    )
}
