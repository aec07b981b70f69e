// storagetool/src/storage/model.rs
use serde::{Deserialize, Serialize};

/// MIME type used when an object carries no usable sidecar metadata.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
/// Cache duration (seconds) used when the sidecar has no cacheControl value.
pub const DEFAULT_CACHE_SECONDS: &str = "3600";
/// Suffix of the sidecar file written next to each downloaded object.
pub const METADATA_SUFFIX: &str = ".__metadata.json";

/// A bucket descriptor as returned by `GET /storage/v1/bucket`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub file_size_limit: Option<u64>,
    #[serde(default)]
    pub allowed_mime_types: Option<Vec<String>>,
}

impl Bucket {
    /// Descriptor for a bucket only known by name, e.g. when restoring a
    /// snapshot directory without a bucket manifest.
    pub fn with_defaults(name: &str) -> Self {
        Bucket {
            id: name.to_string(),
            name: name.to_string(),
            public: false,
            file_size_limit: None,
            allowed_mime_types: None,
        }
    }
}

/// The `metadata` sub-record of a listing entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// One entry from `POST /storage/v1/object/list/{bucket}`.
///
/// Entries without an `id` are virtual directory markers; they only exist to
/// drive traversal and are never persisted. Leaf entries get their
/// `full_path` (relative to the bucket root) filled in during listing and the
/// whole record is written as the object's sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<ObjectMetadata>,
    #[serde(default)]
    pub full_path: String,
}

impl ObjectEntry {
    pub fn is_directory(&self) -> bool {
        self.id.is_none()
    }

    /// MIME type to restore this object with, normalizing the historical
    /// `image/jpg` alias.
    pub fn mime_type(&self) -> String {
        let mime = self
            .metadata
            .as_ref()
            .and_then(|m| m.mimetype.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE);
        normalize_mime(mime)
    }

    /// Cache duration in seconds to restore this object with.
    pub fn cache_seconds(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.cache_control.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CACHE_SECONDS)
            .to_string()
    }
}

/// Normalizes a MIME type for upload. `image/jpg` was never a registered
/// type but appears in older object metadata.
pub fn normalize_mime(mime: &str) -> String {
    if mime.eq_ignore_ascii_case("image/jpg") {
        "image/jpeg".to_string()
    } else {
        mime.to_string()
    }
}

/// Joins a listing prefix and an entry name into a bucket-relative path.
pub fn join_object_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Outcome of a bounded-concurrency batch (download/upload/delete).
///
/// Per-object failures are collected here instead of aborting the batch, so
/// callers can report and tests can assert on exact failure counts.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

impl BatchResult {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.failed.push((path.into(), message.into()));
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directory_entries_have_no_id() -> anyhow::Result<()> {
        let entry: ObjectEntry = serde_json::from_value(json!({
            "name": "avatars",
            "id": null,
            "updated_at": null,
            "created_at": null,
            "last_accessed_at": null,
            "metadata": null
        }))?;
        assert!(entry.is_directory());
        assert_eq!(entry.full_path, "");
        Ok(())
    }

    #[test]
    fn test_leaf_entry_decodes_metadata() -> anyhow::Result<()> {
        let entry: ObjectEntry = serde_json::from_value(json!({
            "name": "logo.png",
            "id": "c2a7e3a0-1111-4222-8333-444455556666",
            "metadata": {
                "mimetype": "image/png",
                "cacheControl": "86400",
                "size": 1024
            }
        }))?;
        assert!(!entry.is_directory());
        assert_eq!(entry.mime_type(), "image/png");
        assert_eq!(entry.cache_seconds(), "86400");
        Ok(())
    }

    #[test]
    fn test_mime_defaults_and_jpg_normalization() {
        let mut entry = ObjectEntry {
            name: "photo".into(),
            id: Some("id".into()),
            updated_at: None,
            created_at: None,
            last_accessed_at: None,
            metadata: None,
            full_path: "photo".into(),
        };
        assert_eq!(entry.mime_type(), DEFAULT_MIME_TYPE);
        assert_eq!(entry.cache_seconds(), DEFAULT_CACHE_SECONDS);

        entry.metadata = Some(ObjectMetadata {
            mimetype: Some("image/jpg".into()),
            ..Default::default()
        });
        assert_eq!(entry.mime_type(), "image/jpeg");

        assert_eq!(normalize_mime("IMAGE/JPG"), "image/jpeg");
        assert_eq!(normalize_mime("text/html"), "text/html");
    }

    #[test]
    fn test_join_object_path() {
        assert_eq!(join_object_path("", "logo.png"), "logo.png");
        assert_eq!(join_object_path("avatars", "a.png"), "avatars/a.png");
        assert_eq!(join_object_path("a/b", "c.txt"), "a/b/c.txt");
    }

    #[test]
    fn test_batch_result_counts() {
        let mut batch = BatchResult::default();
        batch.record_success();
        batch.record_success();
        batch.record_failure("a/b.txt", "download failed: 500");
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.total(), 3);
        assert!(!batch.is_clean());
    }
}
