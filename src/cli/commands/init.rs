//! Init command implementation

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::database::config::{CONFIG_FILENAME, sample_config};

/// Init command arguments
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Directory to write writeback.toml into
    pub dir: PathBuf,
    /// Overwrite an existing file
    pub force: bool,
}

/// Write a commented sample configuration
pub fn handle_init(args: &InitArgs) -> Result<(), CliError> {
    let path = args.dir.join(CONFIG_FILENAME);
    if path.exists() && !args.force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    std::fs::write(&path, sample_config())
        .map_err(|e| CliError::FileWriteError(path.clone(), e.to_string()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::WriterConfig;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempdir().unwrap();
        let args = InitArgs {
            dir: dir.path().to_path_buf(),
            force: false,
        };
        handle_init(&args).unwrap();

        let config = WriterConfig::load_file(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config.target.table, "users");

        assert!(matches!(
            handle_init(&args),
            Err(CliError::InvalidArgument(_))
        ));
    }
}
