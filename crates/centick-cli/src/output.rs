use serde::Serialize;

use crate::error::CliError;

/// Render a machine-readable report on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
