// storagetool/src/functions/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CliProjectConfig;
use crate::utils::{find_tool, run_tool};

/// Subdirectory of the backup root holding edge function sources.
pub const FUNCTIONS_SUBDIR: &str = "edge_functions";
/// Manifest preserving per-function settings (notably `verify_jwt`).
const METADATA_FILE: &str = "functions_metadata.json";
/// Where the platform CLI downloads to / deploys from.
const CLI_FUNCTIONS_DIR: &str = "supabase/functions";
/// Shared config files deployed alongside the functions.
const SHARED_CONFIG_FILES: [&str; 3] = ["import_map.json", "deno.json", "deno.jsonc"];

const SUPABASE_CLI_HINT: &str =
    "Run 'npm install supabase' or ensure the Supabase CLI is on your PATH.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    #[serde(default = "default_verify_jwt")]
    pub verify_jwt: bool,
}

fn default_verify_jwt() -> bool {
    true
}

/// One entry of `supabase functions list --output json`. Older CLI versions
/// emit `name`, newer ones `slug`.
#[derive(Debug, Deserialize)]
struct CliFunction {
    slug: Option<String>,
    name: Option<String>,
    verify_jwt: Option<bool>,
}

fn parse_function_list(json: &str) -> Result<Vec<FunctionRecord>> {
    let raw: Vec<CliFunction> =
        serde_json::from_str(json).context("Failed to parse 'supabase functions list' output")?;
    Ok(raw
        .into_iter()
        .filter_map(|f| {
            f.slug.or(f.name).map(|name| FunctionRecord {
                name,
                verify_jwt: f.verify_jwt.unwrap_or(true),
            })
        })
        .collect())
}

/// Downloads every edge function of the source project into
/// `<backup_root>/edge_functions/`, along with a metadata manifest.
pub fn run_functions_backup(config: &CliProjectConfig, backup_root: &Path) -> Result<()> {
    println!("⚡ Starting edge functions backup for project {}...", config.project_ref);

    let supabase = find_tool("supabase", SUPABASE_CLI_HINT)?;
    let envs = cli_envs(config);
    let env_refs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();

    link_project(&supabase, config, &env_refs)?;

    let list_output = run_tool(
        &supabase,
        &[
            "functions",
            "list",
            "--project-ref",
            &config.project_ref,
            "--output",
            "json",
        ],
        &env_refs,
    )
    .context("Failed to list edge functions")?;
    let functions = parse_function_list(&String::from_utf8_lossy(&list_output.stdout))?;

    if functions.is_empty() {
        println!("No edge functions found to backup.");
        return Ok(());
    }
    println!("Found {} edge functions to backup", functions.len());

    let target_dir = backup_root.join(FUNCTIONS_SUBDIR);
    if target_dir.exists() {
        std::fs::remove_dir_all(&target_dir)
            .with_context(|| format!("Failed to clean {}", target_dir.display()))?;
    }
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let metadata_path = target_dir.join(METADATA_FILE);
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&functions)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    // `supabase functions download` always lands in ./supabase/functions/.
    let cli_dir = PathBuf::from(CLI_FUNCTIONS_DIR);
    for function in &functions {
        println!("Downloading function: {}", function.name);
        if let Err(e) = run_tool(&supabase, &["functions", "download", &function.name], &env_refs) {
            eprintln!("Warning: Failed to download function {}: {:#}", function.name, e);
            continue;
        }

        let src = cli_dir.join(&function.name);
        let dst = target_dir.join(&function.name);
        if src.is_dir() {
            move_dir(&src, &dst)
                .with_context(|| format!("Failed to move {} into the backup", function.name))?;
            println!("  Backed up to {}", dst.display());
        } else {
            eprintln!("  Warning: Downloaded function not found at {}", src.display());
        }
    }

    for config_file in SHARED_CONFIG_FILES {
        let src = cli_dir.join(config_file);
        if src.is_file() {
            std::fs::copy(&src, target_dir.join(config_file))
                .with_context(|| format!("Failed to back up {}", config_file))?;
            println!("Backed up {}", config_file);
        }
    }

    println!("✅ Edge functions backup completed. Files in: {}", target_dir.display());
    Ok(())
}

/// Deploys every backed-up edge function to the target project, restoring
/// each function's original `verify_jwt` setting from the manifest.
pub fn run_functions_restore(config: &CliProjectConfig, backup_root: &Path) -> Result<()> {
    let source_dir = backup_root.join(FUNCTIONS_SUBDIR);
    if !source_dir.is_dir() {
        println!("No edge functions backup found at {}. Skipping.", source_dir.display());
        return Ok(());
    }

    println!("⚡ Starting edge functions restore to project {}...", config.project_ref);

    let supabase = find_tool("supabase", SUPABASE_CLI_HINT)?;
    let envs = cli_envs(config);
    let env_refs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();

    link_project(&supabase, config, &env_refs)?;

    let metadata = load_metadata(&source_dir)?;

    let cli_dir = PathBuf::from(CLI_FUNCTIONS_DIR);
    std::fs::create_dir_all(&cli_dir)
        .with_context(|| format!("Failed to create {}", cli_dir.display()))?;

    for config_file in SHARED_CONFIG_FILES {
        let src = source_dir.join(config_file);
        if src.is_file() {
            std::fs::copy(&src, cli_dir.join(config_file))
                .with_context(|| format!("Failed to restore {}", config_file))?;
            println!("Restored {}", config_file);
        }
    }
    let import_map = cli_dir.join("import_map.json");

    for entry in std::fs::read_dir(&source_dir)
        .with_context(|| format!("Failed to read {}", source_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        println!("Deploying function: {}", name);

        let staged = cli_dir.join(&name);
        if staged.exists() {
            std::fs::remove_dir_all(&staged)
                .with_context(|| format!("Failed to clean {}", staged.display()))?;
        }
        copy_dir(&entry.path(), &staged)
            .with_context(|| format!("Failed to stage function {}", name))?;

        let mut args = vec!["functions", "deploy", name.as_str()];
        let verify_jwt = metadata
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.verify_jwt)
            .unwrap_or(true);
        if !verify_jwt {
            args.push("--no-verify-jwt");
        }
        let import_map_arg = import_map.to_string_lossy();
        if import_map.is_file() {
            args.push("--import-map");
            args.push(&import_map_arg);
        }

        match run_tool(&supabase, &args, &env_refs) {
            Ok(_) => println!("  Deployed {}", name),
            Err(e) => eprintln!("Warning: Failed to deploy function {}: {:#}", name, e),
        }
    }

    println!("✅ Edge functions restore completed.");
    println!("[!] REMINDER: Edge function secrets are not backed up.");
    println!("    Set them manually with: supabase secrets set KEY=VALUE");
    Ok(())
}

fn load_metadata(source_dir: &Path) -> Result<Vec<FunctionRecord>> {
    let metadata_path = source_dir.join(METADATA_FILE);
    if !metadata_path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&metadata_path)
        .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", metadata_path.display()))
}

fn cli_envs(config: &CliProjectConfig) -> Vec<(&'static str, String)> {
    let mut envs = Vec::new();
    if let Some(token) = &config.access_token {
        envs.push(("SUPABASE_ACCESS_TOKEN", token.clone()));
    }
    if let Some(password) = &config.db_password {
        envs.push(("SUPABASE_DB_PASSWORD", password.clone()));
    }
    envs
}

fn link_project(supabase: &Path, config: &CliProjectConfig, envs: &[(&str, &str)]) -> Result<()> {
    let args = vec!["link", "--project-ref", config.project_ref.as_str()];
    run_tool(supabase, &args, envs)
        .with_context(|| format!("Failed to link project {}", config.project_ref))?;
    Ok(())
}

/// Moves a directory, falling back to copy-and-delete across filesystems.
fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_dir(src, dst)?;
    std::fs::remove_dir_all(src)?;
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("walked path escapes its root")?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_list_prefers_slug() -> anyhow::Result<()> {
        let json = r#"[
            {"slug": "send-email", "name": "Send Email", "verify_jwt": false},
            {"name": "resize-image"},
            {"verify_jwt": true}
        ]"#;
        let functions = parse_function_list(json)?;
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].name, "send-email");
        assert!(!functions[0].verify_jwt);
        assert_eq!(functions[1].name, "resize-image");
        assert!(functions[1].verify_jwt);
        Ok(())
    }

    #[test]
    fn test_parse_function_list_rejects_invalid_json() {
        assert!(parse_function_list("not json").is_err());
    }

    #[test]
    fn test_copy_dir_preserves_tree() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("fn");
        std::fs::create_dir_all(src.join("lib"))?;
        std::fs::write(src.join("index.ts"), "export default () => {}")?;
        std::fs::write(src.join("lib/util.ts"), "// helper")?;

        let dst = dir.path().join("staged");
        copy_dir(&src, &dst)?;

        assert!(dst.join("index.ts").is_file());
        assert!(dst.join("lib/util.ts").is_file());
        Ok(())
    }
}
