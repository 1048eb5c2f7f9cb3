use std::path::PathBuf;

use libtally_core::config::{default_data_dir, require_config, DB_FILE, LOCK_FILE};
use libtally_core::{Config, EventStore, TallyError};

use crate::cli::Cli;

/// Resolved locations for a tally command
pub struct TallyContext {
    pub data_dir: PathBuf,
}

impl TallyContext {
    /// `--data-dir` wins over `TALLY_HOME` and the home directory default
    pub fn resolve(cli: &Cli) -> Result<Self, TallyError> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        Ok(Self { data_dir })
    }

    /// Load the config; errors if `tally init` has not run
    pub fn config(&self) -> Result<Config, TallyError> {
        require_config(&self.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }

    pub fn open_store(&self) -> Result<EventStore, TallyError> {
        EventStore::open(&self.db_path())
    }
}
