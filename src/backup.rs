// storagetool/src/backup.rs
use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;

use crate::archive;
use crate::config::BackupConfig;
use crate::database;
use crate::functions;
use crate::storage;

/// Runs the whole backup pipeline: database dump, storage snapshot and edge
/// functions download into a fresh timestamped directory, then an optional
/// tar.gz archive of the result.
pub async fn run_backup_flow(config: &BackupConfig) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_root = config
        .local_backup_dir
        .join(format!("supabase_backup_{}", timestamp));
    std::fs::create_dir_all(&backup_root)
        .with_context(|| format!("Failed to create {}", backup_root.display()))?;
    println!("🚀 Starting backup into {}", backup_root.display());

    if let Some(db_config) = &config.database {
        database::run_database_backup(db_config, &backup_root)?;
    } else {
        println!("Skipping database backup (disabled in config).");
    }

    if let Some(storage_config) = &config.storage {
        storage::run_storage_backup(storage_config, &backup_root).await?;
    } else {
        println!("Skipping storage backup (disabled in config).");
    }

    if let Some(functions_config) = &config.edge_functions {
        functions::run_functions_backup(functions_config, &backup_root)?;
    } else {
        println!("Skipping edge functions backup (disabled in config).");
    }

    let marker = backup_root.join(".timestamp");
    std::fs::write(&marker, Local::now().to_rfc3339())
        .with_context(|| format!("Failed to write {}", marker.display()))?;

    if config.create_archive {
        let archive_path = archive::create_archive(&backup_root)?;
        println!("Backup archived at {}", archive_path.display());
    }

    println!("🎉 Backup completed: {}", backup_root.display());
    Ok(backup_root)
}
