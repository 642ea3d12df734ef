use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "el2", about = "The evanlang2 compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .el2 file and print the C translation unit to stdout
    Compile {
        /// Path to the .el2 source file
        file: PathBuf,
    },
    /// Type-check a .el2 file without emitting C
    Check {
        /// Path to the .el2 source file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Compile { file } => {
            let comp = check_or_exit(&file);
            // The unit is fully built before anything is written, so a
            // failing compilation never produces partial output.
            let unit = el2_emit::emit_translation_unit(&comp);
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(unit.as_bytes()) {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        }
        Command::Check { file } => {
            check_or_exit(&file);
            println!("OK");
        }
    }
}

fn check_or_exit(file: &Path) -> el2_typeck::Compiler {
    match el2_typeck::compile_file(file) {
        Ok(comp) => comp,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
