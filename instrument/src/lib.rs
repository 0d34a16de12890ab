//! Instrumentation passes that turn each function of a module into a guarded optimized/twin
//! pair, ready for the side table a downstream codegen stage would emit to describe them.

pub mod ir;
pub mod passes;

pub use ir::{Module, TWIN_PREFIX};
pub use passes::run_pipeline;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, Statement};

    #[test]
    fn pipeline_produces_a_twin_with_a_complementary_guard_id() {
        let mut module = Module::new();
        let mut function = Function::new("step");
        function.blocks.push(BasicBlock {
            statements: vec![Statement::GuardPoint { checkpoint: None }],
        });
        module.functions.push(function);

        run_pipeline(&mut module);

        assert_eq!(module.functions.len(), 2);
        let opt = module.function("step").unwrap();
        let twin = module.function("__unopt_step").unwrap();

        // Barriers bracket the guard point: Barrier, GuardPoint, Barrier.
        assert_eq!(opt.blocks[0].statements.len(), 3);
        assert_eq!(twin.blocks[0].statements.len(), 3);

        let opt_id = match &opt.blocks[0].statements[1] {
            Statement::GuardPoint { checkpoint: Some(cp) } => cp.id,
            _ => panic!("expected a checkpointed guard point"),
        };
        let twin_id = match &twin.blocks[0].statements[1] {
            Statement::GuardPoint { checkpoint: Some(cp) } => cp.id,
            _ => panic!("expected a checkpointed guard point"),
        };
        assert_eq!(twin_id, !opt_id);
        assert!(twin.optimize_none);
        assert!(twin.no_inline);
        assert!(opt.no_inline);
    }
}
