//! CLI command implementations

pub mod columns;
pub mod init;
pub mod load;

use std::path::{Path, PathBuf};

use crate::cli::error::CliError;
use crate::database::{Dialect, SqlSession, WriterConfig};

/// Load and validate the configuration named on the command line
///
/// Returns the configuration together with the directory relative paths in
/// it resolve against.
pub(crate) fn load_config(path: &Path) -> Result<(WriterConfig, PathBuf), CliError> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.to_path_buf()));
    }
    let config = WriterConfig::load_file(path)?;
    config.validate()?;

    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, dir))
}

/// Open a session for the configured backend
pub(crate) fn open_session(
    config: &WriterConfig,
    dir: &Path,
) -> Result<Box<dyn SqlSession>, CliError> {
    match config.database.backend {
        Dialect::DuckDb => {
            #[cfg(feature = "duckdb-backend")]
            {
                let db_path = config.get_duckdb_path(dir);
                let session = crate::database::DuckDbSession::new(&db_path)?;
                Ok(Box::new(session))
            }
            #[cfg(not(feature = "duckdb-backend"))]
            {
                let _ = dir;
                Err(CliError::InvalidArgument(
                    "DuckDB backend not enabled. Build with --features duckdb-backend".to_string(),
                ))
            }
        }
        dialect @ (Dialect::Postgres | Dialect::Redshift) => {
            #[cfg(feature = "postgres-backend")]
            {
                let conn_str = config.database.connection_string.as_deref().ok_or_else(|| {
                    CliError::InvalidArgument(format!("{} connection string not configured", dialect))
                })?;
                let session =
                    crate::database::PostgresSession::connect_with_dialect(conn_str, dialect)?;
                Ok(Box::new(session))
            }
            #[cfg(not(feature = "postgres-backend"))]
            {
                Err(CliError::InvalidArgument(format!(
                    "{} backend not enabled. Build with --features postgres-backend",
                    dialect
                )))
            }
        }
    }
}
