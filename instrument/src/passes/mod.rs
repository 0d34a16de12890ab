pub mod barrier;
pub mod call_rewrite;
pub mod checkpoint;
pub mod live_vars;
pub mod twin;

use crate::ir::Module;

/// Run the five instrumentation passes in the order the pipeline requires: twins must exist
/// before calls inside them can be rewritten, checkpoints must exist before their live sets can
/// be recorded, and barriers must bracket the final checkpoint call sites.
pub fn run_pipeline(module: &mut Module) {
    twin::clone_twins(module);
    call_rewrite::rewrite_calls(module);
    checkpoint::insert_checkpoints(module);
    live_vars::record_live_vars(module);
    barrier::insert_barriers(module);
}
