// storagetool/src/database/restore.rs
use anyhow::Result;
use std::path::Path;

use crate::config::DbRestoreConfig;
use crate::database::DATABASE_SUBDIR;
use crate::utils::{censor_db_url, find_tool, run_tool};

const PSQL_HINT: &str = "Please ensure PostgreSQL client tools are installed and in your PATH.";

/// Restore order matters: roles before schema before data.
const RESTORE_FILES: [&str; 3] = ["roles.sql", "schema.sql", "data.sql"];

/// Replays the SQL dump files against the target database with `psql`.
///
/// A missing source directory is fatal; a failing individual file is only a
/// warning, because roles and grants routinely already exist on the target.
pub fn restore_database(config: &DbRestoreConfig, backup_root: &Path) -> Result<()> {
    println!("🗄 Starting database restore to {}", censor_db_url(&config.db_url));

    let source_dir = backup_root.join(DATABASE_SUBDIR);
    if !source_dir.is_dir() {
        anyhow::bail!("Database dump directory {} does not exist", source_dir.display());
    }

    let psql = find_tool("psql", PSQL_HINT)?;

    for file_name in RESTORE_FILES {
        let file_path = source_dir.join(file_name);
        if !file_path.is_file() {
            println!("Warning: File {} not found. Skipping.", file_path.display());
            continue;
        }

        println!("Restoring {}...", file_name);
        let file_arg = file_path.to_string_lossy();
        match run_tool(&psql, &[&config.db_url, "-f", &file_arg], &[]) {
            Ok(_) => println!("✓ {} restored.", file_name),
            // Duplicate roles/objects on the target are expected; keep going.
            Err(e) => eprintln!("Warning: Restore of {} had errors: {:#}", file_name, e),
        }
    }

    println!("✅ Database restore completed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbRestoreConfig;

    #[test]
    fn test_missing_dump_directory_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DbRestoreConfig {
            db_url: "postgresql://postgres:pw@localhost:5432/postgres".into(),
        };
        let result = restore_database(&config, &dir.path().join("no-backups"));
        assert!(result.is_err());
    }
}
