pub mod config;
pub mod migrate;

use guild_store::OutputFormat;
use serde::Serialize;

/// Print a serializable value as JSON, reporting serialization errors on stderr
pub(crate) fn print_json<T: Serialize>(value: &T, output_format: OutputFormat) {
    match output_format.to_json(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("ERROR: Failed to serialize to JSON: {}", e),
    }
}
