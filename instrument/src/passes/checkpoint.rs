use crate::ir::{is_twin_name, twin_name, Checkpoint, Module, Statement};
use std::collections::HashMap;

/// Shadow byte count reserved after every checkpoint call, fixed by the calling convention this
/// system targets (spec.md §9, open question: left as a constant, not configurable).
const SHADOW_BYTES: u32 = 13;

const GUARD_HANDLER_NAME: &str = "__guard_failure";

/// Allocates patchpoint identifiers so that a function's twin gets the bitwise complement of
/// each ID, and IDs within one function are consecutive (spec.md §3 "Patchpoint Identifier
/// Convention").
///
/// Grounded on the original compiler pass's `getNextPatchpointID`/`stackMaps` bookkeeping map,
/// replicated faithfully including its exact id-numbering behaviour.
#[derive(Default)]
pub struct PatchpointAllocator {
    ids: HashMap<String, Vec<i64>>,
}

impl PatchpointAllocator {
    pub fn new() -> PatchpointAllocator {
        PatchpointAllocator::default()
    }

    pub fn next_id(&mut self, fun_name: &str) -> i64 {
        let twin = twin_name(fun_name);
        let mut next_id: i64 = 0;

        if !self.ids.is_empty() {
            if !self.ids.contains_key(&twin) {
                let max_last = self.ids.values().filter_map(|v| v.last()).max().copied().unwrap_or(0);
                next_id = max_last + 1;
            } else {
                let last_index = self.ids.get(fun_name).map(|v| v.len()).unwrap_or(0);
                next_id = !self.ids[&twin][last_index];
            }
        }

        if !self.ids.contains_key(fun_name) && !self.ids.contains_key(&twin) {
            next_id += 1;
        }

        self.ids.entry(fun_name.to_string()).or_default().push(next_id);
        next_id
    }
}

/// Turn every [`crate::ir::Statement::GuardPoint`] and every internal call into a checkpointed
/// one: a guard point becomes a patchpoint guarding on `__guard_failure`, and a call gets either
/// a trailing stackmap (in an optimized function) or becomes the patchpoint itself (in a twin,
/// where the patchpoint's callback *is* the call).
///
/// Grounded on the original compiler pass's `runOnFunction`.
pub fn insert_checkpoints(module: &mut Module) {
    let mut allocator = PatchpointAllocator::new();
    let defined: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();

    for function in &mut module.functions {
        let fun_name = function.name.clone();
        let is_twin = is_twin_name(&fun_name);

        for block in &mut function.blocks {
            for stmt in &mut block.statements {
                match stmt {
                    Statement::GuardPoint { checkpoint } => {
                        let id = allocator.next_id(&fun_name);
                        let callback = if is_twin {
                            None
                        } else {
                            Some((GUARD_HANDLER_NAME.to_string(), id))
                        };
                        *checkpoint = Some(Checkpoint {
                            id,
                            shadow_bytes: SHADOW_BYTES,
                            callback,
                            live: Vec::new(),
                        });
                    }
                    Statement::Call { callee, args, checkpoint, .. } => {
                        if !defined.contains(callee) {
                            // Calls to undefined (external) functions aren't checkpointed: a
                            // guard can't fail inside code this system never instrumented.
                            continue;
                        }
                        let callback = if is_twin {
                            let resolved = if is_twin_name(callee) {
                                callee.clone()
                            } else {
                                twin_name(callee)
                            };
                            if !defined.contains(&resolved) {
                                // Call redirection couldn't find a twin for this callee (it was
                                // never cloned). Refuse to transform this call rather than wire
                                // a callback to a function that doesn't exist (spec.md §7): the
                                // call is left plain, which costs a checkpoint but not
                                // correctness.
                                log::warn!(
                                    "'{fun_name}': no twin for callee '{callee}', leaving call unchecked"
                                );
                                continue;
                            }
                            Some((resolved, args.len() as i64))
                        } else {
                            None
                        };
                        let id = allocator.next_id(&fun_name);
                        *checkpoint = Some(Checkpoint {
                            id,
                            shadow_bytes: SHADOW_BYTES,
                            callback,
                            live: Vec::new(),
                        });
                    }
                    _ => {}
                }
            }
        }
    }
}
