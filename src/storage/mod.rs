// storagetool/src/storage/mod.rs
pub mod list;
pub mod migrator;
pub mod model;
pub mod redact;
pub mod transfer;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::StorageTaskConfig;
use migrator::StorageMigrator;
use model::Bucket;

/// Subdirectory of the backup root holding bucket snapshots.
pub const STORAGE_SUBDIR: &str = "storage";
/// Bucket descriptor manifest written at backup time, so restore can
/// recreate buckets with their original public/size/MIME settings.
pub const BUCKET_MANIFEST: &str = "buckets.json";

/// Backs up every bucket of the source project into
/// `<backup_root>/storage/`.
pub async fn run_storage_backup(config: &StorageTaskConfig, backup_root: &Path) -> Result<()> {
    println!("📦 Starting storage backup from {}", config.api.base_url);

    let migrator = Arc::new(StorageMigrator::new(&config.api)?);
    let target_dir = backup_root.join(STORAGE_SUBDIR);
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create storage backup directory {}", target_dir.display()))?;

    let buckets = migrator
        .list_buckets()
        .await
        .context("Failed to list buckets on the source project")?;
    println!("Found {} buckets.", buckets.len());

    let manifest_path = target_dir.join(BUCKET_MANIFEST);
    let manifest_json = serde_json::to_string_pretty(&buckets)?;
    std::fs::write(&manifest_path, manifest_json)
        .with_context(|| format!("Failed to write bucket manifest {}", manifest_path.display()))?;

    let mut failed_objects = 0;
    for bucket in &buckets {
        println!("Backing up bucket: {}", bucket.name);
        let batch = transfer::backup_bucket(&migrator, &bucket.name, &target_dir, config.concurrency)
            .await
            .with_context(|| format!("Backup of bucket {} could not run", bucket.name))?;
        failed_objects += batch.failed.len();
    }

    if failed_objects > 0 {
        eprintln!("⚠ Storage backup finished with {} failed objects.", failed_objects);
    } else {
        println!("✅ Storage backup completed.");
    }
    Ok(())
}

/// Restores every locally-backed-up bucket into the target project: create
/// the bucket if missing, reconcile (delete stale remote objects), then
/// upload the snapshot.
pub async fn run_storage_restore(config: &StorageTaskConfig, backup_root: &Path) -> Result<()> {
    println!("📦 Starting storage restore to {}", config.api.base_url);

    let source_dir = backup_root.join(STORAGE_SUBDIR);
    if !source_dir.is_dir() {
        anyhow::bail!("Storage snapshot directory {} does not exist", source_dir.display());
    }

    let migrator = Arc::new(StorageMigrator::new(&config.api)?);
    let manifest = load_bucket_manifest(&source_dir)?;

    let mut failed_objects = 0;
    for bucket_name in snapshot_bucket_names(&source_dir)? {
        println!("Restoring bucket: {}", bucket_name);
        let descriptor = manifest
            .get(&bucket_name)
            .cloned()
            .unwrap_or_else(|| Bucket::with_defaults(&bucket_name));

        migrator
            .create_bucket_if_missing(&descriptor)
            .await
            .with_context(|| format!("Failed to ensure bucket {} exists", bucket_name))?;

        let wiped = transfer::wipe_bucket(
            &migrator,
            &bucket_name,
            &source_dir,
            config.concurrency,
            config.allow_full_wipe,
        )
        .await
        .with_context(|| format!("Reconciliation of bucket {} could not run", bucket_name))?;
        failed_objects += wiped.failed.len();

        let restored = transfer::restore_bucket(&migrator, &bucket_name, &source_dir, config.concurrency)
            .await
            .with_context(|| format!("Restore of bucket {} could not run", bucket_name))?;
        failed_objects += restored.failed.len();
    }

    if failed_objects > 0 {
        eprintln!("⚠ Storage restore finished with {} failed objects.", failed_objects);
    } else {
        println!("✅ Storage restore completed.");
    }
    Ok(())
}

/// Reads the bucket manifest if one was captured at backup time. Older
/// snapshots without a manifest restore buckets with default settings.
fn load_bucket_manifest(source_dir: &Path) -> Result<HashMap<String, Bucket>> {
    let manifest_path = source_dir.join(BUCKET_MANIFEST);
    if !manifest_path.is_file() {
        println!("No bucket manifest found at {}; buckets will be created with defaults.", manifest_path.display());
        return Ok(HashMap::new());
    }
    let text = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read bucket manifest {}", manifest_path.display()))?;
    let buckets: Vec<Bucket> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse bucket manifest {}", manifest_path.display()))?;
    Ok(buckets.into_iter().map(|b| (b.name.clone(), b)).collect())
}

/// Bucket snapshots are the directories directly under the storage root.
fn snapshot_bucket_names(source_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(source_dir)
        .with_context(|| format!("Failed to read snapshot directory {}", source_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_snapshot_bucket_names_only_lists_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("avatars"))?;
        fs::create_dir(dir.path().join("documents"))?;
        fs::write(dir.path().join(BUCKET_MANIFEST), "[]")?;

        let names = snapshot_bucket_names(dir.path())?;
        assert_eq!(names, vec!["avatars".to_string(), "documents".to_string()]);
        Ok(())
    }

    #[test]
    fn test_bucket_manifest_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let buckets = vec![Bucket {
            id: "avatars".into(),
            name: "avatars".into(),
            public: true,
            file_size_limit: Some(5_242_880),
            allowed_mime_types: Some(vec!["image/png".into(), "image/jpeg".into()]),
        }];
        fs::write(
            dir.path().join(BUCKET_MANIFEST),
            serde_json::to_string_pretty(&buckets)?,
        )?;

        let manifest = load_bucket_manifest(dir.path())?;
        let bucket = manifest.get("avatars").expect("manifest entry should exist");
        assert!(bucket.public);
        assert_eq!(bucket.file_size_limit, Some(5_242_880));
        Ok(())
    }

    #[test]
    fn test_missing_manifest_falls_back_to_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(load_bucket_manifest(dir.path())?.is_empty());
        Ok(())
    }
}
