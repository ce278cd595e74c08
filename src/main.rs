//! # Brisket command-line entry point
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Initialize logging (console + rotating files, console only as fallback)
//!   ├─> Load settings (config file, env overrides, --home)
//!   └─> Dispatch the command and map its outcome to an exit code
//! ```
//!
//! Exit codes: 0 success, 2 validation failure, 3 execution failure,
//! 4 aborted, 5 dataset busy, 1 anything else.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout, clippy::print_stderr)] // a CLI talks to the terminal

mod cli;

use clap::Parser as _;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    if let Err(e) = brisket::logging::init()
        && let Err(console) = brisket::logging::init_console()
    {
        eprintln!("warning: logging unavailable ({e}; {console})");
    }

    match cli::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(cli::exit_code(&e))
        }
    }
}
