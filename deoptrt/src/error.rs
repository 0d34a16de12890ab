use thiserror::Error;

/// Every way the deoptimization handler can fail to restore an unoptimized stack.
///
/// The handler's own top-level entry point (spec.md §4.8) has nowhere to propagate these:
/// a guard check that can't be serviced leaves the process in a state no one can trust, so
/// the handler aborts instead. This type exists so that everything *below* the top level
/// stays ordinary, testable `Result`-returning code.
#[derive(Debug, Error)]
pub enum DeoptError {
    #[error("failed to open the running binary: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse the running binary as an object file: {0}")]
    Object(#[from] object::Error),

    #[error("binary has no '.llvm_stackmaps' section")]
    MissingSideTable,

    #[error("side table decode error: {0}")]
    SideTable(#[from] sidetable::SideTableError),

    #[error("side table lookup error: {0}")]
    Lookup(#[from] sidetable::LookupError),

    #[error("stack walk exceeded the maximum supported call depth ({0})")]
    StackTooDeep(usize),

    #[error("encountered an indirect live location, which this runtime cannot resolve")]
    IndirectLocation,

    #[error("could not find a symbol covering address {0:#x}")]
    NoSymbolForAddress(u64),
}
