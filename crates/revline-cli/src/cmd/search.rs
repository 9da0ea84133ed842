//! `revline search` — enqueue searches and drain the queue

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use revline_core::{DateRange, SharedProgress, fmt_num, ids};
use revline_dedup::Deduplicator;
use revline_queue::{ManagerConfig, SearchQueueManager, SearchSpec, TaskStatus};

use crate::config::Config;

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Sources to search (repeatable)
    #[arg(short, long, default_values_t = [String::from("openalex")])]
    pub source: Vec<String>,

    /// Maximum papers per source
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Only papers published on or after this date (YYYY-MM-DD, YYYY-MM, YYYY)
    #[arg(long)]
    pub from: Option<String>,

    /// Only papers published on or before this date
    #[arg(long)]
    pub to: Option<String>,

    /// Task priority (lower runs earlier)
    #[arg(short, long, default_value_t = 0)]
    pub priority: i32,

    /// Worker pool size (defaults to the config file value)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Deduplicate the combined corpus after fetching
    #[arg(long)]
    pub dedup: bool,

    /// Write result JSON files into this directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Seconds between progress updates
    #[arg(long, default_value_t = 2.0)]
    pub progress_interval: f64,
}

pub fn run(
    args: SearchArgs,
    config: &Config,
    progress: &SharedProgress,
) -> anyhow::Result<ExitCode> {
    let date_range = parse_range(args.from.as_deref(), args.to.as_deref())?;
    let workers = args
        .workers
        .unwrap_or(config.workers.default)
        .min(config.workers.max);

    let manager = SearchQueueManager::new(ManagerConfig {
        workers,
        cache_dir: config.cache.dir.clone(),
        ..ManagerConfig::default()
    })?;

    let specs: Vec<SearchSpec> = args
        .source
        .iter()
        .map(|source| SearchSpec {
            source: source.clone(),
            query: args.query.clone(),
            date_range,
            limit: args.limit,
            priority: args.priority,
            config: config.sources.task_config(source),
        })
        .collect();
    let task_ids = manager.add_multiple(specs);

    manager.run_all(true, Duration::from_secs_f64(args.progress_interval));

    // Per-task summary
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Source").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Papers").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
        ]);
    let mut corpus = Vec::new();
    let mut failures = 0usize;
    for task_id in &task_ids {
        let Some(task) = manager.all_tasks().into_iter().find(|t| &t.task_id == task_id)
        else {
            continue;
        };
        let papers = manager.get_results(task_id).unwrap_or_default();
        let error = task
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        if task.status == TaskStatus::Failed {
            failures += 1;
        }
        table.add_row(vec![
            task.source.clone(),
            task.status.to_string(),
            fmt_num(papers.len()),
            error,
        ]);
        corpus.extend(papers);
    }
    progress.println(format!("\n{table}"));

    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("cannot create output directory {}", out.display()))?;
        write_json(&out.join("papers.json"), &corpus)?;
    }

    if args.dedup {
        let total = corpus.len();
        let outcome = Deduplicator::default()
            .deduplicate(corpus)
            .context("deduplication failed")?;
        progress.println(format!(
            "dedup: {} -> {} papers ({} clusters)",
            fmt_num(total),
            fmt_num(outcome.canonical.len()),
            fmt_num(outcome.clusters.len())
        ));
        if let Some(out) = &args.out {
            write_json(&out.join("canonical.json"), &outcome.canonical)?;
            write_json(&out.join("clusters.json"), &outcome.clusters)?;
            write_json(&out.join("duplicate_map.json"), &outcome.duplicate_map)?;
        }
    }

    manager.close()?;
    Ok(if failures > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> anyhow::Result<Option<DateRange>> {
    let parse = |raw: &str| {
        ids::parse_date(raw).ok_or_else(|| anyhow::anyhow!("unrecognized date: {raw:?}"))
    };
    let start = from.map(parse).transpose()?;
    let end = to.map(parse).transpose()?;
    Ok(if start.is_none() && end.is_none() {
        None
    } else {
        Some(DateRange { start, end })
    })
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)
        .with_context(|| format!("cannot write {}", path.display()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing() {
        assert!(parse_range(None, None).unwrap().is_none());
        let range = parse_range(Some("2020-01-01"), Some("2021")).unwrap().unwrap();
        assert_eq!(range.start.unwrap().to_string(), "2020-01-01");
        assert_eq!(range.end.unwrap().to_string(), "2021-01-01");
        assert!(parse_range(Some("last tuesday"), None).is_err());
    }
}
