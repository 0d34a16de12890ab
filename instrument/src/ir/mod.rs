//! A small mid-level IR standing in for the compiler's own intermediate representation.
//!
//! The front end and optimizer that produce and transform this IR are out of scope: this crate
//! only consumes an already-optimized [`Module`] and mutates it in place. The shapes here mirror
//! the kind of block/statement/operand IR the rest of the toolchain passes around internally.

pub type LocalId = u32;

/// A whole translation unit: every function the instrumentation passes may need to clone,
/// rewrite, or cross-reference by name.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Module {
        Module { functions: Vec::new() }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

/// Prefix a twin function's name carries (spec.md GLOSSARY: "Twin").
pub const TWIN_PREFIX: &str = "__unopt_";

pub fn twin_name(name: &str) -> String {
    if let Some(stripped) = name.strip_prefix(TWIN_PREFIX) {
        stripped.to_string()
    } else {
        format!("{TWIN_PREFIX}{name}")
    }
}

pub fn is_twin_name(name: &str) -> bool {
    name.starts_with(TWIN_PREFIX)
}

/// A single function definition.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub locals: Vec<Local>,
    pub blocks: Vec<BasicBlock>,
    /// Set once this function is a twin produced by [`crate::passes::twin::clone_twins`].
    pub is_twin: bool,
    pub no_inline: bool,
    pub optimize_none: bool,
    pub returns_void: bool,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Function {
        Function {
            name: name.into(),
            locals: Vec::new(),
            blocks: Vec::new(),
            is_twin: false,
            no_inline: false,
            optimize_none: false,
            returns_void: true,
        }
    }

    pub fn statements(&self) -> impl Iterator<Item = (usize, usize, &Statement)> {
        self.blocks.iter().enumerate().flat_map(|(bi, bb)| {
            bb.statements
                .iter()
                .enumerate()
                .map(move |(si, s)| (bi, si, s))
        })
    }

    /// Defines a local with the given allocation size and returns its id.
    pub fn new_local(&mut self, size: u64) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(Local { id, size });
        id
    }

    pub fn local_size(&self, id: LocalId) -> u64 {
        self.locals
            .iter()
            .find(|l| l.id == id)
            .map(|l| l.size)
            .unwrap_or(8)
    }
}

/// A local variable or temporary. `size` is the allocation size in bytes, used by the
/// live-variable pass exactly like the original pass uses `DataLayout::getTypeAllocSize`
/// (8 bytes for anything that isn't an explicit stack allocation).
#[derive(Clone, Copy, Debug)]
pub struct Local {
    pub id: LocalId,
    pub size: u64,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub statements: Vec<Statement>,
}

/// A potential guard site the front end marked before handing the IR to this system. Checkpoint
/// insertion expands each one into a concrete stackmap/patchpoint call (spec.md §4.3.3's
/// generality requirement: a guard may sit at any instruction, not just before a `return`).
#[derive(Clone, Debug)]
pub enum Statement {
    Assign {
        dest: LocalId,
        rvalue: Operand,
    },
    /// A call, optionally checkpointed by [`crate::passes::checkpoint::insert_checkpoints`].
    ///
    /// In an optimized function a checkpointed call keeps its own callee and gains a
    /// `stackmap`-style [`Checkpoint`] recording its return address. In a twin function the call
    /// itself becomes the checkpoint: `callee` is rewritten to the twin of whatever it pointed
    /// at, and `checkpoint.callback` carries that same name again so the runtime can recover it.
    Call {
        dest: Option<LocalId>,
        callee: String,
        args: Vec<Operand>,
        checkpoint: Option<Checkpoint>,
    },
    /// Placeholder left by the front end marking somewhere a guard may need to be checked.
    /// Generalised per the spec's guard-site requirement: this can sit anywhere in a block, not
    /// only immediately before a `return`.
    GuardPoint { checkpoint: Option<Checkpoint> },
    /// An empty `asm sideeffect` call inserted by optimization-barrier insertion.
    Barrier,
    Return(Option<Operand>),
}

#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub id: i64,
    pub shadow_bytes: u32,
    /// The guard-failure handler (at a [`Statement::GuardPoint`]) or the original callee being
    /// proxied (at a twin's [`Statement::Call`]), paired with its argument count.
    pub callback: Option<(String, i64)>,
    /// Live (value, size) pairs recorded by the live-variable pass. Empty until that pass runs.
    pub live: Vec<(Operand, Operand)>,
}

#[derive(Clone, Copy, Debug)]
pub enum Operand {
    Local(LocalId),
    Constant(i64),
}
