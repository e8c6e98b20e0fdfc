//! Command-line driver: reads one `.np` source file and runs it.

use std::io::Read;
use std::process::ExitCode;

use nanolox::prelude::*;

/// Conventional BSD sysexits.h codes for the outcomes this CLI can produce.
mod sysexits {
    /// The command was used incorrectly (wrong number of arguments).
    pub const USAGE: u8 = 64;
    /// Input data was incorrect (source file failed to compile).
    pub const DATAERR: u8 = 65;
    /// An internal software error was detected (a Lox runtime error).
    pub const SOFTWARE: u8 = 70;
    /// An input file could not be opened, or had the wrong extension.
    pub const IOERR: u8 = 74;
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <path>", args.first().map(String::as_str).unwrap_or("nanolox"));
        return ExitCode::from(sysexits::USAGE);
    }

    let path = &args[1];
    if !path.ends_with(".np") {
        eprintln!("Error: source file must have a '.np' extension");
        return ExitCode::from(sysexits::IOERR);
    }

    let source = match read_source(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: could not read '{path}': {e}");
            return ExitCode::from(sysexits::IOERR);
        }
    };

    let mut vm = VM::new();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretationError::CompileError) => ExitCode::from(sysexits::DATAERR),
        Err(InterpretationError::RuntimeError) => ExitCode::from(sysexits::SOFTWARE),
    }
}

fn read_source(path: &str) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut source = String::new();
    file.read_to_string(&mut source)?;
    Ok(source)
}
