// storagetool/src/restore.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::archive;
use crate::config::RestoreConfig;
use crate::database;
use crate::functions;
use crate::storage;

/// Runs the whole restore pipeline against the target project. The source is
/// either an extracted backup directory or a tar.gz archive from a previous
/// backup run.
pub async fn run_restore_flow(config: &RestoreConfig) -> Result<()> {
    let backup_root = resolve_backup_root(config)?;
    println!("🚀 Starting restore from {}", backup_root.display());

    if let Some(db_config) = &config.database {
        database::run_database_restore(db_config, &backup_root)?;
    } else {
        println!("Skipping database restore (disabled in config).");
    }

    if let Some(storage_config) = &config.storage {
        storage::run_storage_restore(storage_config, &backup_root).await?;
    } else {
        println!("Skipping storage restore (disabled in config).");
    }

    if let Some(functions_config) = &config.edge_functions {
        functions::run_functions_restore(functions_config, &backup_root)?;
    } else {
        println!("Skipping edge functions restore (disabled in config).");
    }

    println!("🎉 Restore completed from {}", backup_root.display());
    Ok(())
}

/// Picks the directory to restore from. An explicit archive path wins and is
/// extracted under the local backup dir first.
fn resolve_backup_root(config: &RestoreConfig) -> Result<PathBuf> {
    if let Some(archive_path) = &config.archive_source_path {
        let archive_path = Path::new(archive_path);
        let extract_dir = config.local_backup_dir.join("restore_staging");
        return archive::extract_archive(archive_path, &extract_dir);
    }

    let backup_root = latest_backup_dir(&config.local_backup_dir)?
        .with_context(|| {
            format!(
                "No backup directories found under {}",
                config.local_backup_dir.display()
            )
        })?;
    Ok(backup_root)
}

/// Returns the lexicographically newest `supabase_backup_*` directory, which
/// is also the chronologically newest thanks to the timestamp format.
fn latest_backup_dir(local_backup_dir: &Path) -> Result<Option<PathBuf>> {
    if !local_backup_dir.is_dir() {
        return Ok(None);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(local_backup_dir)
        .with_context(|| format!("Failed to read {}", local_backup_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("supabase_backup_"))
        })
        .collect();
    candidates.sort();
    Ok(candidates.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_backup_dir_picks_newest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("supabase_backup_20250101_000000"))?;
        std::fs::create_dir(dir.path().join("supabase_backup_20250601_120000"))?;
        std::fs::create_dir(dir.path().join("unrelated"))?;
        std::fs::write(dir.path().join("supabase_backup_20991231_235959"), "")?;

        let latest = latest_backup_dir(dir.path())?;
        assert_eq!(
            latest,
            Some(dir.path().join("supabase_backup_20250601_120000"))
        );
        Ok(())
    }

    #[test]
    fn test_latest_backup_dir_missing_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(latest_backup_dir(&dir.path().join("absent"))?, None);
        Ok(())
    }
}
