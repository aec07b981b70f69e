// storagetool/src/storage/transfer.rs
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::errors::{AppError, Result};
use crate::storage::list;
use crate::storage::migrator::StorageMigrator;
use crate::storage::model::{BatchResult, ObjectEntry, METADATA_SUFFIX};

/// A content file in a local bucket snapshot, paired with its optional
/// sidecar record.
#[derive(Debug)]
pub struct LocalObject {
    pub rel_path: String,
    pub content_path: PathBuf,
    pub entry: Option<ObjectEntry>,
}

/// Sidecar path for a content file: same path with `.__metadata.json`
/// appended.
pub fn sidecar_path(content_path: &Path) -> PathBuf {
    let mut os = content_path.as_os_str().to_os_string();
    os.push(METADATA_SUFFIX);
    PathBuf::from(os)
}

/// Walks a bucket snapshot directory and pairs every content file with its
/// sidecar. Sidecar files themselves are excluded. A missing directory is an
/// empty snapshot; a corrupt sidecar is a decode error, not a silent default.
pub fn collect_local_objects(bucket_dir: &Path) -> Result<Vec<LocalObject>> {
    let mut objects = Vec::new();
    if !bucket_dir.is_dir() {
        return Ok(objects);
    }

    for dir_entry in WalkDir::new(bucket_dir) {
        let dir_entry = dir_entry.map_err(|e| AppError::Io(e.into()))?;
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let path = dir_entry.path();
        if path.as_os_str().to_string_lossy().ends_with(METADATA_SUFFIX) {
            continue;
        }

        let rel = path
            .strip_prefix(bucket_dir)
            .map_err(|_| AppError::InvalidInput(format!("{} escapes the snapshot root", path.display())))?;
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let sidecar = sidecar_path(path);
        let entry = if sidecar.is_file() {
            let text = std::fs::read_to_string(&sidecar)?;
            Some(
                serde_json::from_str(&text)
                    .map_err(|e| AppError::Decode(format!("sidecar {}: {}", sidecar.display(), e)))?,
            )
        } else {
            None
        };

        objects.push(LocalObject {
            rel_path,
            content_path: path.to_path_buf(),
            entry,
        });
    }
    Ok(objects)
}

/// Remote paths with no local counterpart: the exact set reconciliation has
/// to delete.
pub fn paths_to_delete(remote: Vec<String>, local: &HashSet<String>) -> Vec<String> {
    remote.into_iter().filter(|p| !local.contains(p)).collect()
}

async fn acquire(semaphore: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
    semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| AppError::InvalidInput("concurrency semaphore was closed".into()))
}

fn record_joined(
    joined: std::result::Result<(String, Result<()>), tokio::task::JoinError>,
    batch: &mut BatchResult,
    bucket: &str,
    verb: &str,
) {
    match joined {
        Ok((path, Ok(()))) => {
            batch.record_success();
            println!("  [{}] {} {}/{}", batch.total(), verb, bucket, path);
        }
        Ok((path, Err(e))) => {
            // Error text is sanitized at the point the error is built.
            eprintln!("  Failed to {} {}/{}: {}", verb, bucket, path, e);
            batch.record_failure(path, e.to_string());
        }
        Err(join_error) => {
            eprintln!("  A {} task for bucket {} aborted: {}", verb, bucket, join_error);
            batch.record_failure("<task>".to_string(), join_error.to_string());
        }
    }
}

fn drain_completed(tasks: &mut JoinSet<(String, Result<()>)>, batch: &mut BatchResult, bucket: &str, verb: &str) {
    while let Some(joined) = tasks.try_join_next() {
        record_joined(joined, batch, bucket, verb);
    }
}

/// Downloads every object in `bucket` into `<target_root>/<bucket>`, at most
/// `concurrency` downloads in flight. Objects are scheduled as the listing
/// stream discovers them; per-object failures are collected, not fatal.
pub async fn backup_bucket(
    migrator: &Arc<StorageMigrator>,
    bucket: &str,
    target_root: &Path,
    concurrency: usize,
) -> Result<BatchResult> {
    let bucket_dir = target_root.join(bucket);
    tokio::fs::create_dir_all(&bucket_dir).await?;

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
    let mut batch = BatchResult::default();

    let stream = list::list_objects(migrator.clone(), bucket, "");
    futures::pin_mut!(stream);

    while let Some(item) = stream.next().await {
        let entry = match item {
            Ok(entry) => entry,
            Err(failure) => {
                eprintln!("  {}", failure);
                batch.record_failure(format!("{}/", failure.prefix), failure.error.to_string());
                continue;
            }
        };

        // The permit is taken before spawning, so discovery can never race
        // ahead of the concurrency limit.
        let permit = acquire(&semaphore).await?;
        let migrator = migrator.clone();
        let bucket_name = bucket.to_string();
        let bucket_dir = bucket_dir.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let path = entry.full_path.clone();
            let result = download_one(&migrator, &bucket_name, &bucket_dir, &entry).await;
            (path, result)
        });
        drain_completed(&mut tasks, &mut batch, bucket, "downloaded");
    }

    while let Some(joined) = tasks.join_next().await {
        record_joined(joined, &mut batch, bucket, "downloaded");
    }

    println!(
        "Bucket {}: {} objects backed up, {} failed",
        bucket,
        batch.succeeded,
        batch.failed.len()
    );
    Ok(batch)
}

async fn download_one(
    migrator: &StorageMigrator,
    bucket: &str,
    bucket_dir: &Path,
    entry: &ObjectEntry,
) -> Result<()> {
    let local_path = bucket_dir.join(&entry.full_path);
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Sidecar first: a content file without its metadata record would
    // restore with the wrong Content-Type.
    let sidecar = sidecar_path(&local_path);
    let json = serde_json::to_string_pretty(entry)?;
    tokio::fs::write(&sidecar, json).await?;

    migrator
        .download_object(bucket, &entry.full_path, &local_path)
        .await?;
    Ok(())
}

/// Uploads every content file under `<source_root>/<bucket>` with upsert
/// semantics, at most `concurrency` uploads in flight.
pub async fn restore_bucket(
    migrator: &Arc<StorageMigrator>,
    bucket: &str,
    source_root: &Path,
    concurrency: usize,
) -> Result<BatchResult> {
    let mut batch = BatchResult::default();
    let bucket_dir = source_root.join(bucket);
    if !bucket_dir.is_dir() {
        println!("  Source directory {} not found, nothing to upload", bucket_dir.display());
        return Ok(batch);
    }

    let files = collect_local_objects(&bucket_dir)?;
    if files.is_empty() {
        return Ok(batch);
    }
    println!("  Found {} files to restore in {}", files.len(), bucket);

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

    for file in files {
        let permit = acquire(&semaphore).await?;
        let migrator = migrator.clone();
        let bucket_name = bucket.to_string();
        tasks.spawn(async move {
            let _permit = permit;
            let result = migrator
                .upload_object(&bucket_name, &file.rel_path, &file.content_path, file.entry.as_ref())
                .await;
            (file.rel_path, result)
        });
        drain_completed(&mut tasks, &mut batch, bucket, "uploaded");
    }

    while let Some(joined) = tasks.join_next().await {
        record_joined(joined, &mut batch, bucket, "uploaded");
    }

    println!(
        "Bucket {}: {} objects restored, {} failed",
        bucket,
        batch.succeeded,
        batch.failed.len()
    );
    Ok(batch)
}

/// Reconciles a remote bucket against its local snapshot: deletes every
/// remote object with no local counterpart, making the subsequent restore a
/// mirror instead of an additive merge.
///
/// A bucket with no snapshot directory means "local set empty", which would
/// empty the whole remote bucket; that destructive case only runs when
/// `allow_full_wipe` is set.
pub async fn wipe_bucket(
    migrator: &Arc<StorageMigrator>,
    bucket: &str,
    source_root: &Path,
    concurrency: usize,
    allow_full_wipe: bool,
) -> Result<BatchResult> {
    let mut batch = BatchResult::default();
    let bucket_dir = source_root.join(bucket);
    if !bucket_dir.is_dir() && !allow_full_wipe {
        eprintln!(
            "  ⚠ Bucket {} has no local snapshot and allow_full_wipe is disabled; skipping reconcile.",
            bucket
        );
        return Ok(batch);
    }

    let local: HashSet<String> = collect_local_objects(&bucket_dir)?
        .into_iter()
        .map(|o| o.rel_path)
        .collect();

    // Remote and local listings are materialized here; on-disk and deployed
    // bucket sizes are assumed bounded, unlike the backup path.
    let mut remote = Vec::new();
    let stream = list::list_objects(migrator.clone(), bucket, "");
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(entry) => remote.push(entry.full_path),
            Err(failure) => {
                eprintln!("  {}", failure);
                batch.record_failure(format!("{}/", failure.prefix), failure.error.to_string());
            }
        }
    }

    let stale = paths_to_delete(remote, &local);
    if stale.is_empty() {
        return Ok(batch);
    }
    println!("  Deleting {} stale objects from bucket {}", stale.len(), bucket);

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

    for path in stale {
        let permit = acquire(&semaphore).await?;
        let migrator = migrator.clone();
        let bucket_name = bucket.to_string();
        tasks.spawn(async move {
            let _permit = permit;
            let result = migrator.delete_object(&bucket_name, &path).await;
            (path, result)
        });
        drain_completed(&mut tasks, &mut batch, bucket, "deleted");
    }

    while let Some(joined) = tasks.join_next().await {
        record_joined(joined, &mut batch, bucket, "deleted");
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::ObjectMetadata;
    use std::fs;

    #[test]
    fn test_sidecar_path_appends_suffix() {
        let path = Path::new("/snap/avatars/img.png");
        assert_eq!(
            sidecar_path(path),
            PathBuf::from("/snap/avatars/img.png.__metadata.json")
        );
    }

    #[test]
    fn test_collect_local_objects_pairs_sidecars() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket_dir = dir.path().join("avatars");
        fs::create_dir_all(bucket_dir.join("users/alice"))?;

        fs::write(bucket_dir.join("logo.png"), b"logo-bytes")?;
        fs::write(bucket_dir.join("users/alice/pic.jpg"), b"pic-bytes")?;
        let entry = ObjectEntry {
            name: "pic.jpg".into(),
            id: Some("obj-1".into()),
            updated_at: None,
            created_at: None,
            last_accessed_at: None,
            metadata: Some(ObjectMetadata {
                mimetype: Some("image/jpg".into()),
                cache_control: Some("600".into()),
                ..Default::default()
            }),
            full_path: "users/alice/pic.jpg".into(),
        };
        fs::write(
            bucket_dir.join("users/alice/pic.jpg.__metadata.json"),
            serde_json::to_string_pretty(&entry)?,
        )?;

        let mut objects = collect_local_objects(&bucket_dir)?;
        objects.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].rel_path, "logo.png");
        assert!(objects[0].entry.is_none());
        assert_eq!(objects[1].rel_path, "users/alice/pic.jpg");
        let meta = objects[1].entry.as_ref().expect("sidecar should be parsed");
        assert_eq!(meta.mime_type(), "image/jpeg");
        assert_eq!(meta.cache_seconds(), "600");
        Ok(())
    }

    #[test]
    fn test_collect_local_objects_missing_dir_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let objects = collect_local_objects(&dir.path().join("no-such-bucket"))?;
        assert!(objects.is_empty());
        Ok(())
    }

    #[test]
    fn test_corrupt_sidecar_is_a_decode_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let bucket_dir = dir.path().join("docs");
        fs::create_dir_all(&bucket_dir)?;
        fs::write(bucket_dir.join("a.txt"), b"text")?;
        fs::write(bucket_dir.join("a.txt.__metadata.json"), b"{not json")?;

        let err = collect_local_objects(&bucket_dir).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
        Ok(())
    }

    #[test]
    fn test_paths_to_delete_is_a_set_difference() {
        let remote = vec![
            "kept.txt".to_string(),
            "stale/old.txt".to_string(),
            "stale/older.txt".to_string(),
        ];
        let local: HashSet<String> = ["kept.txt".to_string(), "local-only.txt".to_string()]
            .into_iter()
            .collect();

        let stale = paths_to_delete(remote, &local);
        assert_eq!(stale, vec!["stale/old.txt".to_string(), "stale/older.txt".to_string()]);
    }
}
