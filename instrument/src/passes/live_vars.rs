use crate::ir::{Function, LocalId, Module, Operand, Statement};

/// Record, at every checkpointed call or guard point, the (value, size) pairs for every local
/// that is live across it: defined strictly before it and used strictly after it.
///
/// This system's IR has no branches, so "dominates" reduces to straight-line program order
/// across the function's blocks; the original pass's dominator-tree query becomes a simple
/// before/after position comparison.
///
/// Grounded on the original compiler pass's `getLiveRegisters`.
pub fn record_live_vars(module: &mut Module) {
    for function in &mut module.functions {
        record_in_function(function);
    }
}

fn record_in_function(function: &mut Function) {
    let order: Vec<(usize, usize)> = function
        .blocks
        .iter()
        .enumerate()
        .flat_map(|(bi, bb)| (0..bb.statements.len()).map(move |si| (bi, si)))
        .collect();

    let checkpoint_positions: Vec<usize> = order
        .iter()
        .enumerate()
        .filter(|(_, &(bi, si))| is_checkpointed(&function.blocks[bi].statements[si]))
        .map(|(pos, _)| pos)
        .collect();

    let constant_returns: Vec<i64> = order
        .iter()
        .filter_map(|&(bi, si)| match &function.blocks[bi].statements[si] {
            Statement::Return(Some(Operand::Constant(c))) => Some(*c),
            _ => None,
        })
        .collect();

    for pos in checkpoint_positions {
        let mut live = Vec::new();
        for before in &order[..pos] {
            let (bi, si) = *before;
            if let Some(def) = def_of(&function.blocks[bi].statements[si]) {
                let used_after = order[pos + 1..]
                    .iter()
                    .any(|&(bi2, si2)| uses(&function.blocks[bi2].statements[si2], def));
                if used_after {
                    let size = function.local_size(def);
                    live.push((Operand::Local(def), Operand::Constant(size as i64)));
                }
            }
        }
        for constant in &constant_returns {
            live.push((Operand::Constant(*constant), Operand::Constant(8)));
        }

        let (bi, si) = order[pos];
        attach_live(&mut function.blocks[bi].statements[si], live);
    }
}

fn is_checkpointed(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Call { checkpoint: Some(_), .. } | Statement::GuardPoint { checkpoint: Some(_) }
    )
}

fn attach_live(stmt: &mut Statement, live: Vec<(Operand, Operand)>) {
    match stmt {
        Statement::Call { checkpoint: Some(cp), .. } => cp.live = live,
        Statement::GuardPoint { checkpoint: Some(cp) } => cp.live = live,
        _ => {}
    }
}

fn def_of(stmt: &Statement) -> Option<LocalId> {
    match stmt {
        Statement::Assign { dest, .. } => Some(*dest),
        Statement::Call { dest: Some(dest), .. } => Some(*dest),
        _ => None,
    }
}

fn uses(stmt: &Statement, local: LocalId) -> bool {
    let is_local = |op: &Operand| matches!(op, Operand::Local(id) if *id == local);
    match stmt {
        Statement::Assign { rvalue, .. } => is_local(rvalue),
        Statement::Call { args, .. } => args.iter().any(is_local),
        Statement::Return(Some(op)) => is_local(op),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Checkpoint};

    #[test]
    fn local_defined_before_and_used_after_checkpoint_is_live() {
        let mut function = Function::new("f");
        let x = function.new_local(8);
        function.blocks.push(BasicBlock {
            statements: vec![
                Statement::Assign { dest: x, rvalue: Operand::Constant(1) },
                Statement::GuardPoint {
                    checkpoint: Some(Checkpoint { id: 1, shadow_bytes: 13, callback: None, live: vec![] }),
                },
                Statement::Return(Some(Operand::Local(x))),
            ],
        });

        record_in_function(&mut function);

        match &function.blocks[0].statements[1] {
            Statement::GuardPoint { checkpoint: Some(cp) } => {
                assert_eq!(cp.live.len(), 1);
                match cp.live[0].0 {
                    Operand::Local(id) => assert_eq!(id, x),
                    _ => panic!("expected a local"),
                }
            }
            _ => panic!("expected a guard point"),
        }
    }

    #[test]
    fn local_only_used_before_checkpoint_is_not_live() {
        let mut function = Function::new("f");
        let x = function.new_local(8);
        function.blocks.push(BasicBlock {
            statements: vec![
                Statement::Assign { dest: x, rvalue: Operand::Constant(1) },
                Statement::Return(Some(Operand::Local(x))),
                Statement::GuardPoint {
                    checkpoint: Some(Checkpoint { id: 1, shadow_bytes: 13, callback: None, live: vec![] }),
                },
            ],
        });

        record_in_function(&mut function);

        match &function.blocks[0].statements[2] {
            Statement::GuardPoint { checkpoint: Some(cp) } => assert!(cp.live.is_empty()),
            _ => panic!("expected a guard point"),
        }
    }
}
