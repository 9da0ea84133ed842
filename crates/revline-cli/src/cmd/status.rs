//! `revline status` — inspect the task journal

use std::process::ExitCode;

use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use revline_core::fmt_num;
use revline_queue::TaskQueue;

use crate::config::Config;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Cache directory holding the journal (defaults to the config value)
    #[arg(long)]
    pub cache_dir: Option<std::path::PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let dir = args.cache_dir.unwrap_or_else(|| config.cache.dir.clone());
    let queue = TaskQueue::open(&dir)?;
    let mut tasks = queue.all_tasks();
    if tasks.is_empty() {
        eprintln!("no tasks recorded in {}", dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Source").fg(Color::Cyan),
            Cell::new("Query").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Papers").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
        ]);
    for task in &tasks {
        let query: String = task.query.chars().take(40).collect();
        table.add_row(vec![
            task.short_id().to_string(),
            task.source.clone(),
            query,
            task.status.to_string(),
            fmt_num(task.papers_fetched),
            task.error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        ]);
    }
    eprintln!("\n{table}");
    Ok(ExitCode::SUCCESS)
}
