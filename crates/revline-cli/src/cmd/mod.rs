pub mod dedup;
pub mod search;
pub mod status;

use std::process::ExitCode;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

/// `revline config` — print the effective configuration.
pub fn show_config(config: &Config) -> anyhow::Result<ExitCode> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Cache directory".to_string(),
        config.cache.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Workers".to_string(),
        format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);
    for (name, entry) in [
        ("openalex", &config.sources.openalex),
        ("semantic_scholar", &config.sources.semantic_scholar),
        ("crossref", &config.sources.crossref),
        ("arxiv", &config.sources.arxiv),
    ] {
        table.add_row(vec![
            format!("{name} polite email"),
            entry
                .polite_email
                .clone()
                .unwrap_or_else(|| "not set".to_string()),
        ]);
        table.add_row(vec![
            format!("{name} API key"),
            if entry.api_key.is_some() {
                "configured".to_string()
            } else {
                "not set".to_string()
            },
        ]);
    }

    eprintln!("\n{table}");
    Ok(ExitCode::SUCCESS)
}
