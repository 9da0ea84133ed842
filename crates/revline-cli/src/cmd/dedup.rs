//! `revline dedup` — offline deduplication of an exported corpus

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;

use revline_core::{Paper, fmt_num};
use revline_dedup::Deduplicator;

#[derive(Debug, Args)]
pub struct DedupArgs {
    /// JSON file holding an array of paper records
    pub input: PathBuf,

    /// Directory for canonical.json, clusters.json, duplicate_map.json
    /// (defaults to the input's directory)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Fuzzy title similarity threshold
    #[arg(long, default_value_t = 0.90)]
    pub threshold: f64,
}

pub fn run(args: DedupArgs) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let papers: Vec<Paper> = serde_json::from_str(&content)
        .with_context(|| format!("invalid paper records in {}", args.input.display()))?;
    let total = papers.len();

    let outcome = Deduplicator::new(args.threshold)
        .deduplicate(papers)
        .context("deduplication failed")?;
    log::info!(
        "dedup: {} -> {} papers ({} clusters)",
        fmt_num(total),
        fmt_num(outcome.canonical.len()),
        fmt_num(outcome.clusters.len())
    );

    let out_dir = match args.out {
        Some(dir) => dir,
        None => args
            .input
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    for (name, json) in [
        ("canonical.json", serde_json::to_string_pretty(&outcome.canonical)?),
        ("clusters.json", serde_json::to_string_pretty(&outcome.clusters)?),
        (
            "duplicate_map.json",
            serde_json::to_string_pretty(&outcome.duplicate_map)?,
        ),
    ] {
        let path = out_dir.join(name);
        std::fs::write(&path, json)
            .with_context(|| format!("cannot write {}", path.display()))?;
        log::info!("wrote {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}
