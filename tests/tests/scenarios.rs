//! The concrete end-to-end scenarios a trace-based optimizer's deoptimization path must get
//! right, built against hand-constructed side tables since no optimizing compiler is available
//! to produce real `.llvm_stackmaps` sections from source.

use deoptrt::testutil::SideTableBuilder;
use deoptrt::{restore_unopt_stack, synthesize_inlined_frames, CallStackState, Frame};
use instrument::ir::{BasicBlock, Function, Statement};
use instrument::passes::checkpoint::insert_checkpoints;
use instrument::passes::twin::clone_twins;
use instrument::Module;
use sidetable::{Location, LocationKind, RegisterFile};

fn direct(offset: i32, size: u16) -> Location {
    Location::new(LocationKind::Direct, size, 0, offset)
}

fn register(dwarf_reg_num: u16, size: u16) -> Location {
    Location::new(LocationKind::Register, size, dwarf_reg_num, 0)
}

fn constant(value: i32) -> Location {
    Location::new(LocationKind::Constant, 0, 0, value)
}

/// Scenario 1: a guard with no inlining involved. The optimized call's return address should
/// lead straight to its twin's record via `twin_lookup`.
#[test]
fn simple_guard_resolves_to_its_twin_without_inlining() {
    let mut builder = SideTableBuilder::new();
    builder
        .function("more_indirection", 0x4000, 0x4100, 16)
        .record(4, 0x20, &[])
        .function("__unopt_more_indirection", 0x5000, 0x5100, 32)
        .record(!4, 0x8, &[]);
    let table = builder.build();

    // The return address of the optimized call into `more_indirection`, just past its guard.
    let return_address = 0x4001u64;
    let (twin_size_idx, twin_rec_idx) = table.twin_lookup(return_address).unwrap();

    let twin_size = &table.size_records[twin_size_idx];
    let twin_rec = &table.map_records[twin_rec_idx];
    assert_eq!(twin_size.function_start_address, 0x5000);
    assert_eq!(twin_rec.patchpoint_id, !4);
}

/// Scenario 2: a guard inside a callee the optimizer inlined into its caller. The physical stack
/// only has a frame for the caller; `synthesize_inlined_frames` must recover the callee's own
/// frame before deoptimization can proceed.
#[test]
fn guard_inside_an_inlined_callee_is_reconstructed() {
    let mut builder = SideTableBuilder::new();
    builder
        .function("get_number", 0x1000, 0x1040, 16)
        .record(6, 0x8, &[])
        .function("trace", 0x9000, 0x9400, 64)
        .record(30, 0x100, &[])
        // The record for `get_number`'s guard is re-attributed to `trace` once `get_number` is
        // inlined into it.
        .record(6, 0x104, &[]);
    let image = builder.build_image();
    let table = &image.side_table;

    let mut state = CallStackState {
        frames: vec![
            Frame {
                patchpoint_id: 6,
                record_index: 0,
                size_index: 0,
                return_address: 0x9108, // physically inside `trace`, not `get_number`
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
            Frame {
                patchpoint_id: 30,
                record_index: 1,
                size_index: 1,
                return_address: 0x9380,
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
        ],
    };

    let found = synthesize_inlined_frames(table, &image, &mut state).unwrap();
    assert!(found);
    assert_eq!(state.frames.len(), 3);
    assert!(state.frames[1].inlined, "the synthesized frame must be marked as such");
    assert_eq!(state.frames[1].patchpoint_id, 6);
}

/// Scenario 3: a live, stack-allocated 24-byte struct survives a guard failure bytewise.
#[test]
fn large_stack_allocated_value_round_trips_through_deoptimization() {
    let payload: [u8; 24] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
    ];
    let frame_base = payload.as_ptr() as i64;

    let mut builder = SideTableBuilder::new();
    builder
        .function("holder", 0x1000, 0x1100, 64)
        .record(11, 0x20, &[(direct(0, 24), constant(24))])
        .function("__unopt_holder", 0x2000, 0x2200, 64)
        .record(!11, 0x10, &[(direct(-40, 24), constant(24))]);
    let table = builder.build();

    let state = CallStackState {
        frames: vec![Frame {
            patchpoint_id: 11,
            record_index: 0,
            size_index: 0,
            return_address: 0x1001,
            bp: frame_base as u64,
            real_bp: frame_base as u64,
            registers: RegisterFile::new(),
            inlined: false,
        }],
    };

    let (restored, _) = restore_unopt_stack(&table, &state).unwrap();
    // `__unopt_holder`'s frame is 80 bytes (64 + 16-byte linkage); offset -40 lands at 40.
    assert_eq!(&restored.buf[40..64], &payload[..]);
}

/// Scenario 4: a value the optimizer kept live in a callee-saved register is spilled to the
/// twin's stack slot.
#[test]
fn register_resident_value_is_spilled_to_the_twins_stack_slot() {
    const R12: u16 = 12;
    const VALUE: u64 = 249_238_493_223;

    let mut builder = SideTableBuilder::new();
    builder
        .function("holder", 0x1000, 0x1100, 32)
        .record(13, 0x18, &[(register(R12, 8), constant(8))])
        .function("__unopt_holder", 0x2000, 0x2200, 32)
        .record(!13, 0x10, &[(direct(-16, 8), constant(8))]);
    let table = builder.build();

    let mut regs = RegisterFile::new();
    regs.set(R12, VALUE);

    let state = CallStackState {
        frames: vec![Frame {
            patchpoint_id: 13,
            record_index: 0,
            size_index: 0,
            return_address: 0x1001,
            bp: 0,
            real_bp: 0,
            registers: regs,
            inlined: false,
        }],
    };

    let (restored, _) = restore_unopt_stack(&table, &state).unwrap();
    // 32-byte frame + 16-byte linkage = 48 bytes; offset -16 lands at 32.
    let bytes = &restored.buf[32..40];
    assert_eq!(u64::from_ne_bytes(bytes.try_into().unwrap()), VALUE);
}

/// Scenario 5: processing a function and its twin in either order yields the same pairing of
/// consecutive, complementary patchpoint ids.
#[test]
fn consecutive_patchpoint_ids_pair_up_across_twins() {
    let mut module = Module::new();
    let mut trace = Function::new("trace");
    trace.blocks.push(BasicBlock {
        statements: vec![
            Statement::GuardPoint { checkpoint: None },
            Statement::GuardPoint { checkpoint: None },
            Statement::GuardPoint { checkpoint: None },
        ],
    });
    module.functions.push(trace);

    clone_twins(&mut module);
    insert_checkpoints(&mut module);

    let opt_ids: Vec<i64> = module
        .function("trace")
        .unwrap()
        .blocks[0]
        .statements
        .iter()
        .map(|s| match s {
            Statement::GuardPoint { checkpoint: Some(cp) } => cp.id,
            _ => panic!("expected a checkpointed guard point"),
        })
        .collect();
    let twin_ids: Vec<i64> = module
        .function("__unopt_trace")
        .unwrap()
        .blocks[0]
        .statements
        .iter()
        .map(|s| match s {
            Statement::GuardPoint { checkpoint: Some(cp) } => cp.id,
            _ => panic!("expected a checkpointed guard point"),
        })
        .collect();

    assert_eq!(opt_ids.len(), 3);
    assert_eq!(opt_ids[1], opt_ids[0] + 1);
    assert_eq!(opt_ids[2], opt_ids[1] + 1);
    for (opt_id, twin_id) in opt_ids.iter().zip(twin_ids.iter()) {
        assert_eq!(*twin_id, !opt_id);
    }
}

/// Scenario 6: two distinct functions (`level_a`, `level_b`) both inlined into the same
/// enclosing function (`get_number`). Each needs its own synthetic frame — its own twin,
/// frame size and live variables — so one synthesis pass over the gap must splice in two
/// frames, not one.
#[test]
fn two_functions_inlined_into_one_frame_each_get_their_own_synthetic_frame() {
    let mut builder = SideTableBuilder::new();
    builder
        .function("level_a", 0x1000, 0x1010, 16)
        .record(7, 0x4, &[])
        .function("level_b", 0x2000, 0x2010, 16)
        .record(8, 0x4, &[])
        .function("get_number", 0x6000, 0x6400, 96)
        // `level_a`'s and `level_b`'s checkpoints get re-attributed here, ahead of
        // `get_number`'s own authentic record, in the order their inlined code was laid out.
        .record(7, 0x50, &[])
        .record(8, 0x60, &[])
        .record(20, 0x100, &[]);
    let image = builder.build_image();
    let table = &image.side_table;

    let mut state = CallStackState {
        frames: vec![
            Frame {
                patchpoint_id: 7,
                record_index: 0,
                size_index: 0,
                return_address: 0x6001, // inside get_number, outside level_a's own range
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
            Frame {
                patchpoint_id: 20,
                record_index: 4,
                size_index: 2,
                return_address: 0x6380,
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
        ],
    };

    let found = synthesize_inlined_frames(table, &image, &mut state).unwrap();
    assert!(found, "an inlined gap should have been detected");
    assert_eq!(state.frames.len(), 4, "both inlined calls need their own synthesized frame");
    assert!(state.frames[1].inlined);
    assert!(state.frames[2].inlined);
    assert_eq!(state.frames[1].patchpoint_id, 7);
    assert_eq!(state.frames[2].patchpoint_id, 8);

    for pair in state.frames.windows(2) {
        let enclosing_size = table.size_record_for_map_index(pair[1].record_index).unwrap();
        let end = image.symbol_end(enclosing_size.function_start_address).unwrap();
        assert!(pair[0].return_address >= enclosing_size.function_start_address);
        assert!(pair[0].return_address < end);
    }
}
