// Workspace status display: datasets, their sizes and rule state.

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::db::DatasetStore;
use crate::output::terminal;

/// Show one dataset's status, or a one-line summary of every dataset.
pub fn show(config: &Config, dataset: Option<&str>) -> Result<()> {
    if let Some(name) = dataset {
        let path = config.dataset_path(name)?;
        let store = DatasetStore::open(&path)?;
        terminal::display_status(&store.status()?);

        let file_size = std::fs::metadata(&path)
            .map(|m| format_bytes(m.len()))
            .unwrap_or_else(|_| "unknown".to_string());
        println!("  Store: {} ({})", path.display(), file_size);
        return Ok(());
    }

    println!("Workspace: {}", config.workspace.display());
    let names = config.list_datasets()?;
    if names.is_empty() {
        println!("No datasets yet.");
        println!("\nRun `tokensieve init <name>` to create one.");
        return Ok(());
    }

    for name in &names {
        let status = DatasetStore::open(&config.dataset_path(name)?)?.status()?;
        println!(
            "  {:<24} {:<6} {:>8} tokens {:>8} included  {} rules{}",
            name,
            status.dataset.token_type,
            status.tokens,
            status.included,
            status.rules,
            if status.apply_pending() {
                " (apply pending)".yellow().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// Human-readable file size.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
