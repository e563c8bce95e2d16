//! Load command implementation
//!
//! Reads JSON-lines records, groups them into batches and merges every batch
//! into the configured target table.

use std::io::Read;
use std::path::PathBuf;

use tracing::info;

use crate::batch::Batch;
use crate::cli::commands::{load_config, open_session};
use crate::cli::error::CliError;
use crate::database::{
    BatchWriter, OutputFormat, QueryResult, SqlSession, WriteConfig, WriterConfig,
    format_query_result,
};
use crate::instrumentation::InstrumentedSession;
use crate::metrics::WriteMetrics;

/// Load command arguments
#[derive(Debug, Clone)]
pub struct LoadArgs {
    /// Path to writeback.toml
    pub config: PathBuf,
    /// JSON-lines file, or '-' for stdin
    pub input: String,
    /// Records per batch (defaults to the configured page size)
    pub batch_size: Option<usize>,
    /// Output format (table, json)
    pub format: String,
    /// Record every statement and print a summary
    pub instrument: bool,
}

/// Load input content from file or stdin
fn load_input(input: &str) -> Result<String, CliError> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| CliError::InvalidArgument(format!("Failed to read stdin: {}", e)))?;
        Ok(content)
    } else {
        let path = PathBuf::from(input);
        if !path.exists() {
            return Err(CliError::FileNotFound(path));
        }
        std::fs::read_to_string(&path).map_err(|e| CliError::FileReadError(path, e.to_string()))
    }
}

/// Parse JSON-lines content into batches of at most `batch_size` records
///
/// Blank lines are skipped; line numbers in errors are 1-based.
pub fn parse_batches(content: &str, batch_size: usize) -> Result<Vec<Batch>, CliError> {
    if batch_size == 0 {
        return Err(CliError::InvalidArgument(
            "batch size must be greater than zero".to_string(),
        ));
    }

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: serde_json::Value =
            serde_json::from_str(line).map_err(|e| CliError::InvalidRecord {
                line: index + 1,
                message: e.to_string(),
            })?;
        records.push(record);
    }

    records
        .chunks(batch_size)
        .map(|chunk| Batch::from_json_rows(chunk).map_err(CliError::from))
        .collect()
}

/// Render accumulated metrics as a two-column result set
pub fn metrics_result(metrics: &WriteMetrics) -> QueryResult {
    let rows = metrics
        .entries()
        .iter()
        .map(|(name, value)| serde_json::json!({ "metric": name, "value": value }))
        .collect();
    QueryResult::new(vec!["metric".to_string(), "value".to_string()], rows)
}

fn write_batches<S: SqlSession>(
    session: S,
    config: &WriterConfig,
    write_config: &WriteConfig,
    batches: &[Batch],
) -> Result<(WriteMetrics, S), CliError> {
    let mut writer = match config.staging_table() {
        Some(staging) => BatchWriter::with_staging(session, staging),
        None => BatchWriter::new(session)?,
    }
    .page_size(config.write.page_size);

    let outcome = writer.write_all(batches, write_config);
    writer.report_metrics();
    outcome?;

    Ok((writer.metrics_snapshot(), writer.into_session()))
}

/// Handle the load command
pub fn handle_load(args: &LoadArgs) -> Result<(), CliError> {
    let (config, dir) = load_config(&args.config)?;
    let output_format: OutputFormat = args
        .format
        .parse()
        .map_err(|e: String| CliError::InvalidArgument(e))?;

    let content = load_input(&args.input)?;
    let batch_size = args.batch_size.unwrap_or(config.write.page_size);
    let batches = parse_batches(&content, batch_size)?;
    let write_config = config.write_config()?;

    info!(
        "Loading {} batch(es) into {}",
        batches.len(),
        write_config.target
    );

    let session = open_session(&config, &dir)?;
    let metrics = if args.instrument || config.write.instrument {
        let instrumented = InstrumentedSession::new(session)
            .with_call_context(config.write.capture_call_context);
        let (metrics, instrumented) =
            write_batches(instrumented, &config, &write_config, &batches)?;
        eprintln!("{}", instrumented.stats());
        metrics
    } else {
        write_batches(session, &config, &write_config, &batches)?.0
    };

    println!("{}", format_query_result(&metrics_result(&metrics), output_format));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batches_chunks_records() {
        let content = "{\"id\": 1}\n\n{\"id\": 2}\n{\"id\": 3}\n";
        let batches = parse_batches(content, 2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn test_parse_batches_reports_line() {
        let content = "{\"id\": 1}\nnot json\n";
        match parse_batches(content, 10) {
            Err(CliError::InvalidRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected invalid record, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_batches_rejects_zero_size() {
        assert!(matches!(
            parse_batches("{}", 0),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_metrics_result_lists_every_counter() {
        let result = metrics_result(&WriteMetrics::new());
        assert_eq!(result.row_count(), 5);
        assert_eq!(result.rows[0]["metric"], "processed_rows");
        assert_eq!(result.rows[0]["value"], 0);
    }
}
