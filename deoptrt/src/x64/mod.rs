pub mod trampoline;

pub use trampoline::{jmp_to_addr, restore_inlined, set_jump_target, set_register_snapshot, set_restored_stack};
