// storagetool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_BACKUP_DIR: &str = "./backups";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonProjectConfig {
    pub project_ref: Option<String>,
    pub project_url: Option<String>,
    pub service_role_key: Option<String>,
    pub access_token: Option<String>,
    pub db_password: Option<String>,
    pub db_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonStorageOptions {
    pub concurrency: Option<usize>,
    pub allow_full_wipe: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonComponents {
    pub database: Option<bool>,
    pub storage: Option<bool>,
    pub edge_functions: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonArchiveOptions {
    pub create_archive: Option<bool>,
    pub archive_file_path_for_restore: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub local_backup_dir: Option<PathBuf>,
    pub source: Option<JsonProjectConfig>,
    pub target: Option<JsonProjectConfig>,
    pub storage: Option<JsonStorageOptions>,
    pub components: Option<JsonComponents>,
    pub archive: Option<JsonArchiveOptions>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct StorageApiConfig {
    pub base_url: String,
    pub service_key: String,
}

#[derive(Debug, Clone)]
pub struct StorageTaskConfig {
    pub api: StorageApiConfig,
    pub concurrency: usize,
    pub allow_full_wipe: bool,
}

#[derive(Debug, Clone)]
pub struct CliProjectConfig {
    pub project_ref: String,
    pub access_token: Option<String>,
    pub db_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DbRestoreConfig {
    pub db_url: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub local_backup_dir: PathBuf,
    pub storage: Option<StorageTaskConfig>,
    pub database: Option<CliProjectConfig>,
    pub edge_functions: Option<CliProjectConfig>,
    pub create_archive: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub local_backup_dir: PathBuf,
    pub storage: Option<StorageTaskConfig>,
    pub database: Option<DbRestoreConfig>,
    pub edge_functions: Option<CliProjectConfig>,
    pub archive_source_path: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Backup(BackupConfig),
    Restore(RestoreConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub raw_json_config: RawJsonConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Ok(AppConfig {
            operation: None, // To be filled by main after parsing CLI args
            raw_json_config,
        })
    }
}

/// Resolves the storage API base URL for a project: an explicit `project_url`
/// wins, otherwise it is derived from the project ref.
fn project_base_url(project: &JsonProjectConfig, side: &str) -> Result<String> {
    if let Some(url) = project.project_url.as_ref().filter(|s| !s.is_empty()) {
        let parsed = Url::parse(url)
            .with_context(|| format!("{}.project_url is not a valid URL: {}", side, url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("{}.project_url must use http or https, got {}", side, parsed.scheme());
        }
        return Ok(url.trim_end_matches('/').to_string());
    }
    let project_ref = project
        .project_ref
        .as_ref()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{}.project_ref (or {}.project_url) must be set in config.json", side, side))?;
    Ok(format!("https://{}.supabase.co", project_ref))
}

fn storage_api_config(project: &JsonProjectConfig, side: &str) -> Result<StorageApiConfig> {
    let base_url = project_base_url(project, side)?;
    let service_key = project
        .service_role_key
        .as_ref()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{}.service_role_key must be set in config.json for storage operations", side))?
        .clone();
    Ok(StorageApiConfig {
        base_url,
        service_key,
    })
}

fn cli_project_config(project: &JsonProjectConfig, side: &str) -> Result<CliProjectConfig> {
    let project_ref = project
        .project_ref
        .as_ref()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{}.project_ref must be set in config.json for CLI-based operations", side))?
        .clone();
    Ok(CliProjectConfig {
        project_ref,
        access_token: project.access_token.clone().filter(|s| !s.is_empty()),
        db_password: project.db_password.clone().filter(|s| !s.is_empty()),
    })
}

fn component_enabled(components: &Option<JsonComponents>, pick: fn(&JsonComponents) -> Option<bool>) -> bool {
    components.as_ref().and_then(pick).unwrap_or(true)
}

fn local_backup_dir(raw_config: &RawJsonConfig) -> PathBuf {
    raw_config
        .local_backup_dir
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR))
}

fn storage_task_config(raw_config: &RawJsonConfig, project: &JsonProjectConfig, side: &str) -> Result<StorageTaskConfig> {
    let opts = raw_config.storage.as_ref();
    Ok(StorageTaskConfig {
        api: storage_api_config(project, side)?,
        concurrency: opts
            .and_then(|o| o.concurrency)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY),
        allow_full_wipe: opts.and_then(|o| o.allow_full_wipe).unwrap_or(false),
    })
}

pub fn load_backup_config_from_json(raw_config: &RawJsonConfig) -> Result<BackupConfig> {
    let source = raw_config
        .source
        .as_ref()
        .context("source project must be configured in config.json for backup")?;

    let storage = if component_enabled(&raw_config.components, |c| c.storage) {
        Some(storage_task_config(raw_config, source, "source")?)
    } else {
        None
    };
    let database = if component_enabled(&raw_config.components, |c| c.database) {
        Some(cli_project_config(source, "source")?)
    } else {
        None
    };
    let edge_functions = if component_enabled(&raw_config.components, |c| c.edge_functions) {
        Some(cli_project_config(source, "source")?)
    } else {
        None
    };

    if storage.is_none() && database.is_none() && edge_functions.is_none() {
        anyhow::bail!("All components are disabled in config.json; nothing to back up.");
    }

    Ok(BackupConfig {
        local_backup_dir: local_backup_dir(raw_config),
        storage,
        database,
        edge_functions,
        create_archive: raw_config
            .archive
            .as_ref()
            .and_then(|a| a.create_archive)
            .unwrap_or(false),
    })
}

pub fn load_restore_config_from_json(raw_config: &RawJsonConfig) -> Result<RestoreConfig> {
    let target = raw_config
        .target
        .as_ref()
        .context("target project must be configured in config.json for restore")?;

    let storage = if component_enabled(&raw_config.components, |c| c.storage) {
        Some(storage_task_config(raw_config, target, "target")?)
    } else {
        None
    };
    let database = if component_enabled(&raw_config.components, |c| c.database) {
        let db_url = target
            .db_url
            .as_ref()
            .filter(|s| !s.is_empty())
            .context("target.db_url must be set in config.json for database restore")?
            .clone();
        Some(DbRestoreConfig { db_url })
    } else {
        None
    };
    let edge_functions = if component_enabled(&raw_config.components, |c| c.edge_functions) {
        Some(cli_project_config(target, "target")?)
    } else {
        None
    };

    if storage.is_none() && database.is_none() && edge_functions.is_none() {
        anyhow::bail!("All components are disabled in config.json; nothing to restore.");
    }

    Ok(RestoreConfig {
        local_backup_dir: local_backup_dir(raw_config),
        storage,
        database,
        edge_functions,
        archive_source_path: raw_config
            .archive
            .as_ref()
            .and_then(|a| a.archive_file_path_for_restore.clone())
            .filter(|s| !s.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_from(value: serde_json::Value) -> RawJsonConfig {
        serde_json::from_value(value).expect("test config should deserialize")
    }

    #[test]
    fn test_backup_config_with_full_source() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "local_backup_dir": "/var/backups/prod",
            "source": {
                "project_ref": "abcd1234",
                "service_role_key": "svc-key",
                "access_token": "sbp_token",
            }
        }));
        let config = load_backup_config_from_json(&raw)?;

        assert_eq!(config.local_backup_dir, PathBuf::from("/var/backups/prod"));
        let storage = config.storage.expect("storage component should be enabled");
        assert_eq!(storage.api.base_url, "https://abcd1234.supabase.co");
        assert_eq!(storage.api.service_key, "svc-key");
        assert_eq!(storage.concurrency, DEFAULT_CONCURRENCY);
        assert!(!storage.allow_full_wipe);
        assert!(config.database.is_some());
        assert!(config.edge_functions.is_some());
        assert!(!config.create_archive);
        Ok(())
    }

    #[test]
    fn test_project_url_overrides_ref_derivation() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "source": {
                "project_ref": "abcd1234",
                "project_url": "http://localhost:54321/",
                "service_role_key": "svc-key",
            },
            "components": { "database": false, "edge_functions": false }
        }));
        let config = load_backup_config_from_json(&raw)?;
        let storage = config.storage.unwrap();
        // Trailing slash is trimmed so path joining stays predictable.
        assert_eq!(storage.api.base_url, "http://localhost:54321");
        Ok(())
    }

    #[test]
    fn test_invalid_project_url_is_rejected() {
        let raw = raw_from(json!({
            "source": {
                "project_url": "not a url",
                "service_role_key": "svc-key",
            },
            "components": { "database": false, "edge_functions": false }
        }));
        assert!(load_backup_config_from_json(&raw).is_err());
    }

    #[test]
    fn test_storage_options_are_applied() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "source": { "project_ref": "abcd1234", "service_role_key": "k" },
            "storage": { "concurrency": 4, "allow_full_wipe": true },
            "components": { "database": false, "edge_functions": false }
        }));
        let config = load_backup_config_from_json(&raw)?;
        let storage = config.storage.unwrap();
        assert_eq!(storage.concurrency, 4);
        assert!(storage.allow_full_wipe);
        Ok(())
    }

    #[test]
    fn test_disabled_components_are_skipped() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "source": { "project_ref": "abcd1234", "service_role_key": "k" },
            "components": { "database": false, "edge_functions": false }
        }));
        let config = load_backup_config_from_json(&raw)?;
        assert!(config.storage.is_some());
        assert!(config.database.is_none());
        assert!(config.edge_functions.is_none());
        Ok(())
    }

    #[test]
    fn test_all_components_disabled_is_an_error() {
        let raw = raw_from(json!({
            "source": { "project_ref": "abcd1234" },
            "components": { "database": false, "storage": false, "edge_functions": false }
        }));
        assert!(load_backup_config_from_json(&raw).is_err());
    }

    #[test]
    fn test_backup_requires_source() {
        let raw = raw_from(json!({ "target": { "project_ref": "x" } }));
        assert!(load_backup_config_from_json(&raw).is_err());
    }

    #[test]
    fn test_storage_backup_requires_service_key() {
        let raw = raw_from(json!({
            "source": { "project_ref": "abcd1234" },
            "components": { "database": false, "edge_functions": false }
        }));
        assert!(load_backup_config_from_json(&raw).is_err());
    }

    #[test]
    fn test_restore_config_targets_test_project() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "target": {
                "project_ref": "testref",
                "service_role_key": "test-key",
                "db_url": "postgresql://postgres:pw@db.testref.supabase.co:5432/postgres"
            },
            "archive": { "archive_file_path_for_restore": "./backups/snap.tar.gz" }
        }));
        let config = load_restore_config_from_json(&raw)?;
        assert_eq!(config.local_backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));
        assert_eq!(config.storage.unwrap().api.base_url, "https://testref.supabase.co");
        assert!(config.database.unwrap().db_url.starts_with("postgresql://"));
        assert_eq!(config.archive_source_path.as_deref(), Some("./backups/snap.tar.gz"));
        Ok(())
    }

    #[test]
    fn test_restore_database_requires_db_url() {
        let raw = raw_from(json!({
            "target": { "project_ref": "testref", "service_role_key": "test-key" },
            "components": { "storage": false, "edge_functions": false }
        }));
        assert!(load_restore_config_from_json(&raw).is_err());
    }

    #[test]
    fn test_zero_concurrency_falls_back_to_default() -> anyhow::Result<()> {
        let raw = raw_from(json!({
            "source": { "project_ref": "abcd1234", "service_role_key": "k" },
            "storage": { "concurrency": 0 },
            "components": { "database": false, "edge_functions": false }
        }));
        let config = load_backup_config_from_json(&raw)?;
        assert_eq!(config.storage.unwrap().concurrency, DEFAULT_CONCURRENCY);
        Ok(())
    }
}
