//! Developer tool for inspecting the side table embedded in a compiled binary.

use clap::{Parser, Subcommand};
use sidetable::SideTable;
use std::{fs, path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "xtask", about = "Developer tools for this workspace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode and print the `.llvm_stackmaps` section of a binary.
    DumpStackmap {
        /// Path to the compiled binary to inspect.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::DumpStackmap { path } => dump_stackmap(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("xtask: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dump_stackmap(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let object = object::File::parse(&*bytes)?;
    let section = object::Object::section_by_name(&object, ".llvm_stackmaps")
        .ok_or("binary has no '.llvm_stackmaps' section")?;
    let data = object::ObjectSection::data(&section)?;

    let table = SideTable::parse(data)?;
    println!("version: {}", table.version);
    println!("functions: {}", table.size_records.len());
    println!("constants: {:?}", table.constants);
    println!("records: {}", table.map_records.len());

    for size_rec in &table.size_records {
        println!(
            "fn @ {:#x} (frame size {}, {} record(s)):",
            size_rec.function_start_address, size_rec.function_frame_size, size_rec.record_count
        );
        let start = size_rec.first_record_index;
        let end = start + size_rec.record_count as usize;
        for record in &table.map_records[start..end.min(table.map_records.len())] {
            println!(
                "  id={:<6} offset={:<6} pairs={}",
                record.patchpoint_id,
                record.instr_offset,
                record.num_pairs()
            );
        }
    }

    Ok(())
}
