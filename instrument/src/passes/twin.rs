use crate::ir::{is_twin_name, twin_name, Function, Module};

/// Clone every function not already a twin, prefixing the clone's name and marking it
/// `noinline`/`optnone` so later codegen never folds it back into the optimized original.
///
/// Grounded on the original compiler pass's `doInitialization`: a whole-module pre-pass that
/// runs once, before any function-local pass sees the module.
pub fn clone_twins(module: &mut Module) {
    let originals: Vec<Function> = module
        .functions
        .iter()
        .filter(|f| !is_twin_name(&f.name))
        .cloned()
        .collect();

    for original in originals {
        let twin = twin_name(&original.name);
        if module.function(&twin).is_some() {
            continue;
        }
        let mut clone = original.clone();
        clone.name = twin;
        clone.is_twin = true;
        clone.no_inline = true;
        clone.optimize_none = true;
        log::debug!("cloned twin '{}' of '{}'", clone.name, original.name);
        module.functions.push(clone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TWIN_PREFIX;

    #[test]
    fn every_function_gets_a_twin() {
        let mut module = Module::new();
        module.functions.push(Function::new("compute"));
        clone_twins(&mut module);

        assert_eq!(module.functions.len(), 2);
        let twin = module.function(&format!("{TWIN_PREFIX}compute")).unwrap();
        assert!(twin.is_twin);
        assert!(twin.no_inline);
        assert!(twin.optimize_none);
    }

    #[test]
    fn is_idempotent() {
        let mut module = Module::new();
        module.functions.push(Function::new("compute"));
        clone_twins(&mut module);
        clone_twins(&mut module);
        assert_eq!(module.functions.len(), 2);
    }
}
