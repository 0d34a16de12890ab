use crate::error::DeoptError;
use object::{Object, ObjectSection, ObjectSymbol};
use sidetable::SideTable;
use std::{env, fs, slice, sync::OnceLock};

/// The side table and symbol index of the currently running binary, loaded once and kept for
/// the lifetime of the process.
///
/// Grounded on the same `LazyLock<Vec<SMEntry>>` pattern the compiler's own deoptimization path
/// uses to find its stackmaps: memory-map the running executable, parse it with `object`, pull
/// the known section out by name. This system additionally keeps the symbol table, needed to
/// find where a function's machine code ends (spec.md §6, the `symbol_end` collaborator) and to
/// recognise the entry point frame that terminates a stack walk (spec.md §4.4).
pub struct Image {
    pub side_table: SideTable,
    symbols: Vec<Symbol>,
}

struct Symbol {
    name: String,
    start: u64,
    end: u64,
}

static IMAGE: OnceLock<Image> = OnceLock::new();

/// Returns the process-wide [`Image`], loading it from the running executable on first access.
///
/// # Panics
/// Panics if the running binary cannot be opened, isn't a valid object file, or has no
/// `.llvm_stackmaps` section. There is no sensible fallback: without a side table the handler
/// cannot service any guard, so failing fast at first use is preferable to a half-working state.
pub fn image() -> &'static Image {
    IMAGE.get_or_init(|| load_current_exe().expect("failed to load side table from running binary"))
}

fn load_current_exe() -> Result<Image, DeoptError> {
    let path = env::current_exe()?;
    let file = fs::File::open(&path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let object = object::File::parse(&*mmap)?;

    let section = object
        .section_by_name(".llvm_stackmaps")
        .ok_or(DeoptError::MissingSideTable)?;
    let bytes = unsafe {
        slice::from_raw_parts(section.address() as *const u8, section.size() as usize)
    };
    let side_table = SideTable::parse(bytes)?;

    let symbols = object
        .symbols()
        .filter(|s| s.is_definition())
        .map(|s| Symbol {
            name: s.name().unwrap_or("").to_string(),
            start: s.address(),
            end: s.address() + s.size(),
        })
        .collect();

    Ok(Image { side_table, symbols })
}

impl Image {
    /// `symbol_end` (spec.md §6): the exclusive end address of the function symbol that starts
    /// at `start`.
    pub fn symbol_end(&self, start: u64) -> Option<u64> {
        self.symbols.iter().find(|s| s.start == start).map(|s| s.end)
    }

    /// The symbol (if any) whose `[start, end)` range contains `addr`.
    pub fn symbol_containing(&self, addr: u64) -> Option<(&str, u64, u64)> {
        self.symbols
            .iter()
            .find(|s| addr >= s.start && addr < s.end)
            .map(|s| (s.name.as_str(), s.start, s.end))
    }

    /// Whether `addr` lies inside the entry point function. The stack walker stops here rather
    /// than walking into libc's startup code (spec.md §4.4).
    pub fn is_in_main(&self, addr: u64) -> bool {
        self.symbol_containing(addr)
            .map(|(name, ..)| name == "main")
            .unwrap_or(false)
    }

    /// Build an `Image` directly from a side table and a symbol list, bypassing ELF loading
    /// entirely. Used by [`crate::testutil`] to exercise the inlined-frame synthesizer and
    /// handler logic without a running binary that actually carries a side table.
    pub fn from_parts(side_table: SideTable, symbols: Vec<(String, u64, u64)>) -> Image {
        Image {
            side_table,
            symbols: symbols
                .into_iter()
                .map(|(name, start, end)| Symbol { name, start, end })
                .collect(),
        }
    }
}
