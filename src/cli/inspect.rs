//! Inspect command implementation.

use super::regress::{Report, palette};
use super::{CliError, OutputFormat};
use stgp::{Program, ProgramConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Execute the inspect command: load a regression state and print its
/// history and best trees.
///
/// # Errors
///
/// Returns an error if the file cannot be read or was written by a
/// different operator palette.
pub(crate) fn execute(state: &Path, top: usize, format: OutputFormat) -> Result<(), CliError> {
    let config = ProgramConfig {
        threads: 1,
        ..ProgramConfig::default()
    };
    let mut program = Program::new(palette()?, config)?;
    let file = File::open(state).map_err(|e| CliError::new(format!("Failed to open {}: {e}", state.display())))?;
    program
        .load_state(&mut BufReader::new(file))
        .map_err(|e| CliError::new(format!("Failed to load {}: {e}", state.display())))?;
    Report::from_program(&program, top).print(format)
}
