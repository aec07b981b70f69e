// storagetool/src/archive/mod.rs
use anyhow::{Context, Result};
use chrono::Local;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

/// Packs a finished backup directory into `<name>_<timestamp>.tar.gz` next to
/// it and returns the archive path. Entry paths inside the archive are rooted
/// at the backup directory's name so extraction recreates it.
pub fn create_archive(backup_dir: &Path) -> Result<PathBuf> {
    let dir_name = backup_dir
        .file_name()
        .and_then(|n| n.to_str())
        .context("Backup directory has no usable name")?;
    let parent = backup_dir.parent().unwrap_or_else(|| Path::new("."));

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let archive_path = parent.join(format!("{}_{}.tar.gz", dir_name, timestamp));

    println!("📦 Creating archive {}...", archive_path.display());

    let file = File::create(&archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    builder
        .append_dir_all(dir_name, backup_dir)
        .with_context(|| format!("Failed to archive {}", backup_dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    println!("✅ Archive created: {}", archive_path.display());
    Ok(archive_path)
}

/// Extracts a `.tar.gz` backup archive into `target_dir` and returns the
/// directory it unpacked into (the archive's single top-level directory,
/// or `target_dir` itself when the archive has none).
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        anyhow::bail!("Archive not found: {}", archive_path.display());
    }
    std::fs::create_dir_all(target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    println!("📦 Extracting {}...", archive_path.display());

    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(target_dir)
        .with_context(|| format!("Failed to extract into {}", target_dir.display()))?;

    let root = top_level_dir(archive_path, target_dir)?;
    println!("✅ Extracted to: {}", root.display());
    Ok(root)
}

/// Re-reads the archive's entry list to find its top-level directory. The
/// member list is small compared to the payload, so a second pass is cheap.
fn top_level_dir(archive_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        if let Some(first) = path.components().next() {
            let candidate = target_dir.join(first.as_os_str());
            if candidate.is_dir() {
                return Ok(candidate);
            }
        }
    }
    Ok(target_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backup = dir.path().join("snapshot");
        std::fs::create_dir_all(backup.join("storage/avatars"))?;
        std::fs::write(backup.join("storage/avatars/pic.png"), b"png bytes")?;
        std::fs::write(backup.join("buckets.json"), "[]")?;

        let archive = create_archive(&backup)?;
        assert!(archive.is_file());
        assert!(archive
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("snapshot_") && n.ends_with(".tar.gz")));

        let out = dir.path().join("restored");
        let root = extract_archive(&archive, &out)?;
        assert_eq!(root, out.join("snapshot"));
        assert_eq!(
            std::fs::read(root.join("storage/avatars/pic.png"))?,
            b"png bytes"
        );
        assert_eq!(std::fs::read_to_string(root.join("buckets.json"))?, "[]");
        Ok(())
    }

    #[test]
    fn test_extract_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract_archive(&dir.path().join("nope.tar.gz"), dir.path());
        assert!(result.is_err());
    }
}
