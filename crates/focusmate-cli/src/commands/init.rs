//! First-time setup: default config and the session database

use anyhow::{Context, Result};
use focusmate_core::{
    config::{config_path, get_data_dir},
    AppConfig,
};
use focusmate_storage::SqliteStore;

/// Initialize focusmate
///
/// # Errors
///
/// Returns an error if the config file or database cannot be created
pub fn init_command(force: bool) -> Result<()> {
    println!("Initializing focusmate...\n");

    println!("Step 1/2: Configuration");
    println!("{}", "-".repeat(40));
    setup_config(force)?;

    println!("\nStep 2/2: Database Setup");
    println!("{}", "-".repeat(40));
    setup_database()?;

    println!("\n========================================");
    println!("  Setup Complete!");
    println!("========================================");
    println!("\nRun the assistant with: focusmate daemon");
    println!("Then start a session:   focusmate start <keywords>");

    Ok(())
}

fn setup_config(force: bool) -> Result<()> {
    let path = config_path()?;
    if path.exists() && !force {
        println!("Config already exists at: {}", path.display());
        AppConfig::load(&path)?;
        println!("Config is valid. Use --force to reset it to defaults.");
        return Ok(());
    }

    AppConfig::default().save(&path)?;
    println!("Default config written to: {}", path.display());
    println!("Tip: set [ai] enabled = true and an api_key to use the AI judge.");
    Ok(())
}

fn setup_database() -> Result<()> {
    let db_path = get_data_dir()?.join("focusmate.db");
    let store = SqliteStore::new(Some(db_path.clone()))
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    drop(store);
    println!("Database ready at: {}", db_path.display());
    Ok(())
}
