/// A cursor over the call stack, one frame at a time. Abstracted behind a trait so the
/// frame-pointer walker used in production can be swapped for a synthetic cursor in tests
/// (spec.md §4.4).
pub trait UnwindCursor {
    /// Program counter of the current frame (its return address, for every frame but the
    /// innermost).
    fn pc(&self) -> u64;
    /// Base pointer (RBP) of the current frame.
    fn bp(&self) -> u64;
    /// Advance to the caller's frame. Returns `false` once there is no caller left to walk to.
    fn step(&mut self) -> bool;
    /// Value of the named DWARF general-purpose register in the current frame, if this cursor's
    /// unwind strategy can recover it (spec.md §4.4, §6 "Stack-unwind collaborator").
    fn read_register(&self, dwarf_reg_num: u16) -> Option<u64>;
}

/// Walks the call stack by following the x86-64 System V frame-pointer chain: `[rbp]` holds the
/// caller's saved `rbp`, and `[rbp + 8]` holds the return address into the caller.
///
/// This system targets only that ABI (spec.md §1 non-goals exclude other architectures and
/// calling conventions), so a DWARF/CFI-based unwinder such as libunwind buys nothing a direct
/// frame-pointer walk doesn't already give for free.
pub struct FramePointerCursor {
    pc: u64,
    bp: u64,
}

impl FramePointerCursor {
    /// `pc` is the current instruction pointer (the address a guard failed at), `bp` the value
    /// of RBP in the frame that failed the guard.
    pub fn new(pc: u64, bp: u64) -> FramePointerCursor {
        FramePointerCursor { pc, bp }
    }
}

/// DWARF register numbers this walker can recover without CFI: the frame pointer itself and the
/// stack pointer it implies. x86-64 DWARF numbering (System V ABI): 6 = RBP, 7 = RSP.
const DWARF_RBP: u16 = 6;
const DWARF_RSP: u16 = 7;

impl UnwindCursor for FramePointerCursor {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn bp(&self) -> u64 {
        self.bp
    }

    /// A bare frame-pointer walk has no CFI to trace a register's value back through intervening
    /// frames, so only the two registers the chain itself defines are ever recoverable. Every
    /// other register's value at a non-innermost frame is genuinely unknowable this way — this
    /// system doesn't link a CFI/DWARF-unwind library to reconstruct the rest (spec.md §1
    /// non-goals: this ABI, this architecture, no general unwinder).
    fn read_register(&self, dwarf_reg_num: u16) -> Option<u64> {
        match dwarf_reg_num {
            DWARF_RBP => Some(self.bp),
            DWARF_RSP => Some(self.bp + 16),
            _ => None,
        }
    }

    fn step(&mut self) -> bool {
        if self.bp == 0 {
            return false;
        }
        // SAFETY: `self.bp` is trusted to be a valid frame-pointer-chain link, per the ABI
        // convention this system requires every instrumented function to honour.
        let (saved_bp, return_addr) = unsafe {
            let saved_bp = *(self.bp as *const u64);
            let return_addr = *((self.bp + 8) as *const u64);
            (saved_bp, return_addr)
        };
        if saved_bp == 0 || return_addr == 0 {
            return false;
        }
        self.bp = saved_bp;
        self.pc = return_addr;
        true
    }
}
