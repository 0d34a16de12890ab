//! Cross-crate checks of the invariants a side table and its instrumentation are supposed to
//! uphold, independent of any one concrete program.

use deoptrt::testutil::SideTableBuilder;
use deoptrt::{synthesize_inlined_frames, CallStackState, Frame};
use instrument::passes::twin::clone_twins;
use instrument::Module;
use sidetable::{LocationKind, RegisterFile};

fn direct(offset: i32, size: u16) -> sidetable::Location {
    sidetable::Location::new(LocationKind::Direct, size, 0, offset)
}

fn constant(value: i32) -> sidetable::Location {
    sidetable::Location::new(LocationKind::Constant, 0, 0, value)
}

#[test]
fn patchpoint_ids_are_self_inverse() {
    let id: i64 = 41;
    assert_eq!(!(!id), id);
}

#[test]
fn twin_location_arrays_match_the_optimized_records_length() {
    let mut builder = SideTableBuilder::new();
    builder
        .function("holder", 0x1000, 0x1100, 32)
        .record(3, 0x10, &[(direct(-8, 8), constant(8)), (direct(-16, 4), constant(4))])
        .function("__unopt_holder", 0x2000, 0x2200, 64)
        .record(!3, 0x10, &[(direct(-8, 8), constant(8)), (direct(-24, 4), constant(4))]);
    let table = builder.build();

    let opt = table.record_for_id(3).unwrap();
    let twin = table.record_for_id(!3).unwrap();
    assert_eq!(opt.locations.len(), twin.locations.len());
    assert_eq!(opt.num_pairs(), twin.num_pairs());
}

#[test]
fn running_twin_cloning_twice_produces_no_additional_clones() {
    let mut module = Module::new();
    module.functions.push(instrument::ir::Function::new("step"));

    clone_twins(&mut module);
    assert_eq!(module.functions.len(), 2);

    clone_twins(&mut module);
    assert_eq!(module.functions.len(), 2, "a second pass must not clone the twin itself");
}

#[test]
fn inlined_frame_invariant_holds_after_synthesis() {
    // `more_indirection`'s own record was collected at a real call into its caller, but that
    // caller's compiled code got inlined into `get_number`: the stored return address physically
    // lives inside `get_number`, far outside the declared range of `more_indirection` itself.
    let mut builder = SideTableBuilder::new();
    builder
        .function("more_indirection", 0x1000, 0x1010, 16)
        .record(9, 0x4, &[])
        .function("get_number", 0x5000, 0x5200, 96)
        // The compiler re-attributes the inlined patchpoint's record to its new enclosing
        // function once inlining happens, physically ahead of `get_number`'s own record.
        .record(9, 0x30, &[])
        .record(20, 0x34, &[]);
    let image = builder.build_image();
    let table = &image.side_table;

    let outer_return_address = 0x5001u64; // inside get_number, outside more_indirection
    let mut state = CallStackState {
        frames: vec![
            Frame {
                patchpoint_id: 9,
                record_index: 0,
                size_index: 0,
                return_address: outer_return_address,
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
            Frame {
                patchpoint_id: 20,
                record_index: 2,
                size_index: 1,
                return_address: 0x5180,
                bp: 0,
                real_bp: 0,
                registers: RegisterFile::new(),
                inlined: false,
            },
        ],
    };

    let found = synthesize_inlined_frames(table, &image, &mut state).unwrap();
    assert!(found, "an inlined gap should have been detected");
    assert_eq!(state.frames.len(), 3, "one synthetic frame is spliced in for the inlined call");

    // The inlined-frame invariant (spec §4.5): every adjacent pair's stored return address falls
    // within the next frame's declared range.
    for pair in state.frames.windows(2) {
        let enclosing_size = table.size_record_for_map_index(pair[1].record_index).unwrap();
        let end = image.symbol_end(enclosing_size.function_start_address).unwrap();
        assert!(pair[0].return_address >= enclosing_size.function_start_address);
        assert!(pair[0].return_address < end);
    }
}
