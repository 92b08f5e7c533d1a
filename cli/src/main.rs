use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mc_core::{CatalogSummary, Config, FileRecord, MediaCatalog, Ranked};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mc", version, about = "Catalog, search and summarize media files")]
struct Cli {
    /// Config file (default: <config_dir>/mc/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a directory and add every new file to the catalog
    Crawl { dir: PathBuf },
    /// Rebuild the search index from the catalog
    Index,
    /// Fuzzy search file names
    Search {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Storage totals and top directories
    Summary,
    /// Per-extension breakdown
    Extensions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let _guard = init_logging(&config)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "config resolved");

    let mc = MediaCatalog::open(config)
        .await
        .context("opening media catalog")?;

    match cli.command {
        Command::Crawl { dir } => {
            let pb = spinner(&format!("crawling {}", dir.display()), cli.json);
            let report = mc.crawl(&dir).await;
            pb.finish_and_clear();
            let report = report.with_context(|| format!("crawling {}", dir.display()))?;

            if cli.json {
                return print_json(&report);
            }
            println!(
                "{} {} files seen, {} new, {} already cataloged",
                style("crawl").green().bold(),
                report.files_seen,
                style(report.inserted).bold(),
                report.duplicates
            );
            if report.skipped_entries > 0 {
                println!("  {} entries skipped (symlinks or unreadable)", report.skipped_entries);
            }
            for failure in &report.failures {
                println!("  {} {}: {}", style("failed").red(), failure.path, failure.error);
            }
        }
        Command::Index => {
            let pb = spinner("rebuilding index", cli.json);
            let report = mc.rebuild_index().await;
            pb.finish_and_clear();
            let report = report.context("rebuilding search index")?;

            if cli.json {
                return print_json(&report);
            }
            println!(
                "{} {} documents in {} batches",
                style("indexed").green().bold(),
                report.documents,
                report.batches
            );
        }
        Command::Search { text } => {
            let text = text.join(" ");
            let records = mc
                .search(&text)
                .await
                .with_context(|| format!("searching for {text:?}"))?;

            if cli.json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("{}", style("no matches").dim());
            }
            for record in &records {
                print_record(record);
            }
        }
        Command::Summary => {
            let summary = mc.summarize().await.context("summarizing catalog")?;
            if cli.json {
                return print_json(&summary);
            }
            print_summary(&summary);
        }
        Command::Extensions => {
            let summary = mc.summarize().await.context("summarizing catalog")?;
            if cli.json {
                #[derive(Serialize)]
                struct Extensions<'a> {
                    by_count: &'a [Ranked<Option<String>>],
                    by_size: &'a [Ranked<Option<String>>],
                }
                return print_json(&Extensions {
                    by_count: &summary.extension_breakdown_by_count,
                    by_size: &summary.extension_breakdown_by_size,
                });
            }
            print_extension_ranking("by count", &summary.extension_breakdown_by_count, false);
            print_extension_ranking("by size", &summary.extension_breakdown_by_size, true);
        }
    }

    Ok(())
}

/// stderr plus `<data_dir>/mc.log`, both filtered by RUST_LOG (default info).
fn init_logging(config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&config.data_dir, "mc.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

fn spinner(message: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_record(record: &FileRecord) {
    let size = record.size_bytes.map(human_bytes).unwrap_or_else(|| "-".into());
    println!(
        "{:>10}  {}",
        style(size).dim(),
        record.full_path().display()
    );
}

fn print_summary(summary: &CatalogSummary) {
    if summary.is_empty() {
        println!("{}", style("catalog is empty").dim());
        return;
    }

    println!(
        "{} files, {}",
        style(summary.total_files).bold(),
        style(human_bytes(summary.total_bytes)).bold()
    );
    if let Some(largest) = &summary.largest_file {
        println!("largest: {}", largest.full_path().display());
    }

    println!("\n{}", style("directories by size").underlined());
    for r in &summary.top_dirs_by_size {
        println!("{:>10}  {}", human_bytes(r.value), r.key);
    }

    println!("\n{}", style("directories by file count").underlined());
    for r in &summary.top_dirs_by_count {
        println!("{:>10}  {}", r.value, r.key);
    }

    print_extension_ranking("extensions by file count", &summary.top_extensions_by_count, false);
    print_extension_ranking("extensions by size", &summary.top_extensions_by_size, true);
}

fn print_extension_ranking(title: &str, ranking: &[Ranked<Option<String>>], bytes: bool) {
    println!("\n{}", style(title).underlined());
    for r in ranking {
        let value = if bytes { human_bytes(r.value) } else { r.value.to_string() };
        println!("{:>10}  {}", value, r.key.as_deref().unwrap_or("(none)"));
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
