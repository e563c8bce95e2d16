//! Columns command implementation

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_session};
use crate::cli::error::CliError;
use crate::database::{OutputFormat, QueryResult, SchemaSynchronizer, format_query_result};

/// Columns command arguments
#[derive(Debug, Clone)]
pub struct ColumnsArgs {
    /// Path to writeback.toml
    pub config: PathBuf,
    /// Output format (table, json)
    pub format: String,
    /// Inspect the staging table instead of the target
    pub staging: bool,
}

/// Print the live columns of the configured target (or staging) table
pub fn handle_columns(args: &ColumnsArgs) -> Result<(), CliError> {
    let (config, dir) = load_config(&args.config)?;
    let output_format: OutputFormat = args
        .format
        .parse()
        .map_err(|e: String| CliError::InvalidArgument(e))?;

    let table = if args.staging {
        config.staging_table().ok_or_else(|| {
            CliError::InvalidArgument("No [staging] table configured".to_string())
        })?
    } else {
        config.target_table()
    };

    let mut session = open_session(&config, &dir)?;
    let columns = SchemaSynchronizer::new(session.dialect()).live_columns(&mut session, &table)?;

    let rows = columns
        .iter()
        .map(|name| serde_json::json!({ "column_name": name }))
        .collect();
    let result = QueryResult::new(vec!["column_name".to_string()], rows);
    println!("{}", format_query_result(&result, output_format));
    Ok(())
}
