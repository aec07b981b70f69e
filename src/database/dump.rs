// storagetool/src/database/dump.rs
use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;

use crate::config::CliProjectConfig;
use crate::database::DATABASE_SUBDIR;
use crate::utils::{find_tool, run_tool};

const SUPABASE_CLI_HINT: &str =
    "Run 'npm install supabase' or ensure the Supabase CLI is on your PATH.";

/// Dumps roles, schema and data of the source project via the platform CLI
/// into `<backup_root>/database/`, and stamps the dump with a `.timestamp`
/// marker so later runs can tell which snapshot they are looking at.
pub fn dump_database(config: &CliProjectConfig, backup_root: &Path) -> Result<()> {
    println!("🗄 Starting database dump for project {}...", config.project_ref);

    let target_dir = backup_root.join(DATABASE_SUBDIR);
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create database dump directory {}", target_dir.display()))?;

    let supabase = find_tool("supabase", SUPABASE_CLI_HINT)?;
    let envs = cli_envs(config);
    let env_refs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();

    link_project(&supabase, config, &env_refs)?;

    let roles_path = target_dir.join("roles.sql");
    let roles_file = roles_path.to_string_lossy();
    run_tool(
        &supabase,
        &["db", "dump", "-f", &roles_file, "--role-only"],
        &env_refs,
    )
    .context("Role dump failed")?;

    let schema_path = target_dir.join("schema.sql");
    let schema_file = schema_path.to_string_lossy();
    run_tool(&supabase, &["db", "dump", "-f", &schema_file], &env_refs)
        .context("Schema dump failed")?;

    let data_path = target_dir.join("data.sql");
    let data_file = data_path.to_string_lossy();
    run_tool(
        &supabase,
        &["db", "dump", "-f", &data_file, "--data-only", "--use-copy"],
        &env_refs,
    )
    .context("Data dump failed")?;

    let timestamp_path = target_dir.join(".timestamp");
    std::fs::write(&timestamp_path, Local::now().to_rfc3339())
        .with_context(|| format!("Failed to write {}", timestamp_path.display()))?;

    println!("✅ Database dump completed. Files located in: {}", target_dir.display());
    Ok(())
}

fn cli_envs(config: &CliProjectConfig) -> Vec<(&'static str, String)> {
    let mut envs = Vec::new();
    if let Some(token) = &config.access_token {
        envs.push(("SUPABASE_ACCESS_TOKEN", token.clone()));
    }
    envs
}

fn link_project(supabase: &Path, config: &CliProjectConfig, envs: &[(&str, &str)]) -> Result<()> {
    let mut args = vec!["link", "--project-ref", config.project_ref.as_str()];
    if let Some(password) = &config.db_password {
        args.push("--password");
        args.push(password);
    }
    run_tool(supabase, &args, envs)
        .with_context(|| format!("Failed to link project {}", config.project_ref))?;
    Ok(())
}
