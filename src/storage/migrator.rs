// storagetool/src/storage/migrator.rs
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::StorageApiConfig;
use crate::errors::{AppError, Result};
use crate::storage::model::{Bucket, ObjectEntry};
use crate::storage::redact;

/// Retry budget for every storage API call.
pub const RETRY_ATTEMPTS: u32 = 3;
/// Base delay for the linear backoff between retries.
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Client for the storage HTTP API of one project.
///
/// Owns a single `reqwest::Client`; the client is built once in the
/// constructor and shared across concurrent tasks as a connection pool, so no
/// re-creation guard (and no re-creation race) exists.
pub struct StorageMigrator {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
    retry_base_delay: Duration,
}

impl StorageMigrator {
    pub fn new(api: &StorageApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api.service_key))
            .map_err(|_| AppError::Config("service key contains invalid header characters".into()))?;
        let apikey = HeaderValue::from_str(&api.service_key)
            .map_err(|_| AppError::Config("service key contains invalid header characters".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("apikey", apikey);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(StorageMigrator {
            base_url: api.base_url.trim_end_matches('/').to_string(),
            service_key: api.service_key.clone(),
            client,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    /// Overrides the backoff base delay. Tests shrink this to keep the retry
    /// paths fast; the policy itself (3 attempts, linear) is unchanged.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Scrubs the service key and JWT-shaped strings from text that is about
    /// to be logged or embedded in an error.
    pub fn sanitize(&self, text: &str) -> String {
        redact::sanitize(text, &[&self.service_key])
    }

    fn bucket_endpoint(&self) -> String {
        format!("{}/storage/v1/bucket", self.base_url)
    }

    fn object_endpoint(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            bucket,
            encode_object_path(path)
        )
    }

    fn list_endpoint(&self, bucket: &str) -> String {
        format!("{}/storage/v1/object/list/{}", self.base_url, bucket)
    }

    /// Sends a request with up to [`RETRY_ATTEMPTS`] attempts. A response
    /// with status >= 500 or 429 is retried after a linearly increasing
    /// backoff, except on the last attempt where it is returned as-is for
    /// normal error handling. Network errors are retried the same way and
    /// the last one is surfaced when the budget is exhausted.
    async fn request_with_retry(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut last_error: Option<reqwest::Error> = None;
        for attempt in 0..RETRY_ATTEMPTS {
            let builder = request
                .try_clone()
                .ok_or_else(|| AppError::InvalidInput("request body is not replayable".into()))?;
            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let retriable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if retriable && attempt + 1 < RETRY_ATTEMPTS {
                        tokio::time::sleep(self.retry_base_delay * (attempt + 1)).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < RETRY_ATTEMPTS {
                        tokio::time::sleep(self.retry_base_delay * (attempt + 1)).await;
                    }
                }
            }
        }
        match last_error {
            Some(e) => Err(AppError::Reqwest(e)),
            None => Err(AppError::InvalidInput("retry budget exhausted without a response".into())),
        }
    }

    /// Turns a non-success response into a [`AppError::StorageApi`] carrying
    /// the sanitized body.
    async fn api_error(&self, resp: reqwest::Response) -> AppError {
        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(text) => self.sanitize(&text),
            Err(e) => self.sanitize(&e.to_string()),
        };
        AppError::StorageApi { status, body }
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let resp = self
            .request_with_retry(self.client.get(self.bucket_endpoint()))
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(self.api_error(resp).await);
        }
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::Decode(format!("bucket list: {}", e)))
    }

    /// Creates the bucket unless one with the same name already exists.
    ///
    /// Idempotent: 200/201 (created) and 400/409 (already exists) all count
    /// as success. Returns `true` when a create request was actually issued.
    pub async fn create_bucket_if_missing(&self, bucket: &Bucket) -> Result<bool> {
        let current = self.list_buckets().await?;
        if current.iter().any(|b| b.name == bucket.name) {
            return Ok(false);
        }

        let payload = json!({
            "id": bucket.name,
            "name": bucket.name,
            "public": bucket.public,
            "file_size_limit": bucket.file_size_limit,
            "allowed_mime_types": bucket.allowed_mime_types,
        });
        let resp = self
            .request_with_retry(self.client.post(self.bucket_endpoint()).json(&payload))
            .await?;
        let status = resp.status().as_u16();
        if !matches!(status, 200 | 201 | 400 | 409) {
            return Err(self.api_error(resp).await);
        }
        println!("Ensured bucket exists: {}", bucket.name);
        Ok(true)
    }

    /// Fetches one page of the listing for `prefix`, sorted by name
    /// ascending.
    pub(crate) async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ObjectEntry>> {
        let payload = json!({
            "prefix": prefix,
            "limit": limit,
            "offset": offset,
            "sortBy": { "column": "name", "order": "asc" },
        });
        let resp = self
            .request_with_retry(self.client.post(self.list_endpoint(bucket)).json(&payload))
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(self.api_error(resp).await);
        }
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::Decode(format!("object listing for {}/{}: {}", bucket, prefix, e)))
    }

    /// Streams an object's content to `dest`, chunk by chunk, so large
    /// objects never sit in memory whole. Returns the byte count.
    pub async fn download_object(&self, bucket: &str, path: &str, dest: &Path) -> Result<u64> {
        use futures::TryStreamExt;

        let resp = self
            .request_with_retry(self.client.get(self.object_endpoint(bucket, path)))
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(self.api_error(resp).await);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut total: u64 = 0;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(total)
    }

    /// Uploads a local file with upsert semantics, restoring Content-Type and
    /// cache duration from the sidecar entry when present.
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        local_path: &Path,
        entry: Option<&ObjectEntry>,
    ) -> Result<()> {
        let (mime, cache_seconds) = match entry {
            Some(e) => (e.mime_type(), e.cache_seconds()),
            None => (
                crate::storage::model::DEFAULT_MIME_TYPE.to_string(),
                crate::storage::model::DEFAULT_CACHE_SECONDS.to_string(),
            ),
        };

        // The whole file is read up front so the request body stays
        // replayable across retry attempts.
        let content = tokio::fs::read(local_path).await?;

        let resp = self
            .request_with_retry(
                self.client
                    .post(self.object_endpoint(bucket, path))
                    .header("x-upsert", "true")
                    .header(CONTENT_TYPE, mime)
                    .header(CACHE_CONTROL, format!("max-age={}", cache_seconds))
                    .body(content),
            )
            .await?;
        let status = resp.status().as_u16();
        if !matches!(status, 200 | 201) {
            return Err(self.api_error(resp).await);
        }
        Ok(())
    }

    pub async fn delete_object(&self, bucket: &str, path: &str) -> Result<()> {
        let resp = self
            .request_with_retry(self.client.delete(self.object_endpoint(bucket, path)))
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(self.api_error(resp).await);
        }
        Ok(())
    }
}

/// Percent-encodes an object path for use in a URL, keeping `/` separators.
fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_object_path_keeps_separators() {
        assert_eq!(encode_object_path("a/b/c.txt"), "a/b/c.txt");
        assert_eq!(encode_object_path("dir name/fi le.png"), "dir%20name/fi%20le.png");
        assert_eq!(encode_object_path("umlaut/ä.txt"), "umlaut/%C3%A4.txt");
        assert_eq!(encode_object_path("100%/sure"), "100%25/sure");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = StorageApiConfig {
            base_url: "https://ref.supabase.co/".into(),
            service_key: "key".into(),
        };
        let migrator = StorageMigrator::new(&api).expect("client should build");
        assert_eq!(migrator.bucket_endpoint(), "https://ref.supabase.co/storage/v1/bucket");
        assert_eq!(
            migrator.object_endpoint("avatars", "a b.png"),
            "https://ref.supabase.co/storage/v1/object/avatars/a%20b.png"
        );
        assert_eq!(
            migrator.list_endpoint("avatars"),
            "https://ref.supabase.co/storage/v1/object/list/avatars"
        );
    }
}
