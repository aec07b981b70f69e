// storagetool/src/main.rs
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use storagetool::config::{
    load_backup_config_from_json, load_restore_config_from_json, AppConfig, OperationConfig,
};
use storagetool::{backup, restore};

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json next to the executable, or in the project root
    // when running with `cargo run`.
    let config_path = PathBuf::from("config.json");
    let mut app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let backup_config = load_backup_config_from_json(&app_config.raw_json_config)
                .context("Failed to load backup configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Backup(backup_config.clone()));
            backup::run_backup_flow(&backup_config)
                .await
                .context("Backup process failed")?;
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let restore_config = load_restore_config_from_json(&app_config.raw_json_config)
                .context("Failed to load restore configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Restore(restore_config.clone()));
            restore::run_restore_flow(&restore_config)
                .await
                .context("Restore process failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup) or '2' (restore).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts the user to select an operation when none was given on the
/// command line.
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
