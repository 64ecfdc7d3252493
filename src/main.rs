//! Provides the main entry point to the program.
use human_panic::{metadata, setup_panic};
use std::process::ExitCode;

fn main() -> ExitCode {
    setup_panic!(metadata!().support("Please report the crash along with the generated report."));

    match enopt::cli::run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The logger may not be set up yet, so errors go straight to stderr
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
