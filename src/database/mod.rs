// storagetool/src/database/mod.rs
pub(crate) mod dump;
pub(crate) mod restore;

use anyhow::Result;
use std::path::Path;

use crate::config::{CliProjectConfig, DbRestoreConfig};

/// Subdirectory of the backup root holding SQL dumps.
pub const DATABASE_SUBDIR: &str = "database";

pub fn run_database_backup(config: &CliProjectConfig, backup_root: &Path) -> Result<()> {
    dump::dump_database(config, backup_root)
}

pub fn run_database_restore(config: &DbRestoreConfig, backup_root: &Path) -> Result<()> {
    restore::restore_database(config, backup_root)
}
