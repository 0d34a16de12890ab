use crate::ir::{is_twin_name, twin_name, Module, Statement};

/// Mark every function `noinline` (inlining must be disabled everywhere so that patchpoint
/// callsites keep stable addresses), then rewrite every call inside a twin function so it calls
/// the twin of whatever it used to call.
///
/// Grounded on the original compiler pass's `runOnFunction`.
pub fn rewrite_calls(module: &mut Module) {
    let twin_names: Vec<String> = module
        .functions
        .iter()
        .filter(|f| is_twin_name(&f.name))
        .map(|f| f.name.clone())
        .collect();

    for function in &mut module.functions {
        function.no_inline = true;
    }

    for name in twin_names {
        let available: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
        let function = module.function_mut(&name).unwrap();
        for block in &mut function.blocks {
            for stmt in &mut block.statements {
                if let Statement::Call { callee, .. } = stmt {
                    if !is_twin_name(callee) {
                        let twin = twin_name(callee);
                        if available.contains(&twin) {
                            log::debug!("rewrote call '{callee}' to '{twin}' inside '{name}'");
                            *callee = twin;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Operand};

    #[test]
    fn calls_inside_twins_target_other_twins() {
        let mut module = Module::new();
        let mut caller = Function::new("outer");
        caller.is_twin = false;
        let mut callee = Function::new("inner");
        callee.is_twin = false;
        module.functions.push(caller);
        module.functions.push(callee);

        super::super::twin::clone_twins(&mut module);

        let twin_caller = module.function_mut("__unopt_outer").unwrap();
        twin_caller.blocks.push(crate::ir::BasicBlock {
            statements: vec![Statement::Call {
                dest: None,
                callee: "inner".to_string(),
                args: vec![Operand::Constant(1)],
                checkpoint: None,
            }],
        });

        rewrite_calls(&mut module);

        let twin_caller = module.function("__unopt_outer").unwrap();
        match &twin_caller.blocks[0].statements[0] {
            Statement::Call { callee, .. } => assert_eq!(callee, "__unopt_inner"),
            _ => panic!("expected a call"),
        }
        assert!(module.function("outer").unwrap().no_inline);
    }
}
