use crate::ir::{Module, Statement};

/// Insert an empty optimization-barrier call immediately before and after every checkpointed
/// call site, so the optimizer can't hoist or sink a load across the checkpoint and leave it
/// looking at the wrong value when a guard fails.
///
/// Grounded on the original compiler pass's `runOnBasicBlock`.
pub fn insert_barriers(module: &mut Module) {
    for function in &mut module.functions {
        for block in &mut function.blocks {
            let checkpointed: Vec<usize> = block
                .statements
                .iter()
                .enumerate()
                .filter(|(_, s)| is_checkpointed(s))
                .map(|(i, _)| i)
                .collect();

            // Insert from the back so earlier indices in `checkpointed` stay valid.
            for &idx in checkpointed.iter().rev() {
                block.statements.insert(idx + 1, Statement::Barrier);
                block.statements.insert(idx, Statement::Barrier);
            }
        }
    }
}

fn is_checkpointed(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Call { checkpoint: Some(_), .. } | Statement::GuardPoint { checkpoint: Some(_) }
    )
}
