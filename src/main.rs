mod aggregate;
mod catalog;
mod datasets;
mod db;
mod dedup;
mod error;
mod fetch;
mod parser;
mod pipeline;
mod settings;
mod value;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use fetch::HttpSource;
use pipeline::{Outcome, Pipeline};
use settings::Settings;

#[derive(Parser)]
#[command(name = "esports_ingest", about = "Scrape esports earnings tables into SQLite")]
struct Cli {
    /// SQLite file (overrides ESPORTS_DB_PATH / ingest.toml)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every target relation if missing
    Init,
    /// Scrape, clean, dedup and load all datasets
    Run {
        /// Only these datasets (countries, players, tournaments, teams)
        #[arg(long)]
        only: Vec<String>,
        /// Print per-dataset reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load pre-cleaned CSV catalogs (the default set when no file is given)
    Import {
        #[arg(short, long, requires = "table")]
        file: Option<PathBuf>,
        #[arg(short, long, requires = "file")]
        table: Option<String>,
    },
    /// Row counts per relation
    Stats,
    /// First rows of a dataset's relation
    Show {
        dataset: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Recent pipeline runs
    Runs {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    info!(db = ?settings.db_path, "settings loaded");

    let conn = db::connect(&settings.db_path)?;
    db::init_ledger(&conn)?;

    let result = match cli.command {
        Commands::Init => {
            for spec in datasets::all() {
                let columns: Vec<_> = spec.fields.iter().map(|f| (f.name, f.ty)).collect();
                let ensured = db::ensure_relation(&conn, spec.relation, &columns)?;
                println!("{:<12} {:?}", spec.relation, ensured);
            }
            Ok(())
        }
        Commands::Run { only, json } => {
            let specs = select_datasets(&only)?;
            let source = Arc::new(HttpSource::new(&settings)?);
            let pipeline = Pipeline::new(&settings, &conn, source);
            println!("Pipeline {}: {} datasets", pipeline.run_id(), specs.len());

            let reports = pipeline.run(&specs).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for r in &reports {
                    println!("{}", r);
                }
            }

            let incomplete = reports
                .iter()
                .filter(|r| !matches!(r.outcome, Outcome::Loaded { .. }))
                .count();
            if incomplete > 0 {
                warn!("{} of {} datasets did not load", incomplete, reports.len());
            }
            Ok(())
        }
        Commands::Import { file, table } => {
            let jobs: Vec<(PathBuf, String)> = match (file, table) {
                (Some(f), Some(t)) => vec![(f, t)],
                _ => datasets::CATALOGS
                    .iter()
                    .map(|c| (settings.catalog_dir.join(c.file), c.relation.to_string()))
                    .collect(),
            };
            for (path, relation) in jobs {
                if !path.exists() {
                    warn!("catalog {:?} not found, skipping", path);
                    println!("{:<12} skipped: {} not found", relation, path.display());
                    continue;
                }
                match catalog::import_csv(&conn, &path, &relation, settings.batch_size) {
                    Ok(s) => println!(
                        "{:<12} imported {} rows ({} columns)",
                        s.relation, s.rows, s.columns
                    ),
                    Err(e) => println!("{:<12} failed: {}", relation, e),
                }
            }
            Ok(())
        }
        Commands::Stats => {
            for spec in datasets::all() {
                match db::count_rows(&conn, spec.relation)? {
                    Some(n) => println!("{:<12} {}", spec.relation, n),
                    None => println!("{:<12} (missing)", spec.relation),
                }
            }
            for c in datasets::CATALOGS {
                if let Some(n) = db::count_rows(&conn, c.relation)? {
                    println!("{:<12} {}", c.relation, n);
                }
            }
            Ok(())
        }
        Commands::Show { dataset, limit } => {
            let Some(spec) = datasets::by_name(&dataset) else {
                bail!("unknown dataset {:?}", dataset);
            };
            if db::count_rows(&conn, spec.relation)?.is_none() {
                println!("`{}` does not exist yet. Run 'init' or 'run' first.", spec.relation);
                return Ok(());
            }
            let names = spec.field_names();
            let rows = db::preview(&conn, spec.relation, &names, limit)?;
            print_table(&names, &rows);
            println!("\n{} rows shown", rows.len());
            Ok(())
        }
        Commands::Runs { limit } => {
            let runs = db::recent_runs(&conn, limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
                return Ok(());
            }
            for r in &runs {
                println!(
                    "{} | {} | {:<12} | {:<7} | {:>6} | {}",
                    r.finished_at,
                    r.run_id,
                    r.dataset,
                    r.outcome,
                    r.rows,
                    truncate(&r.detail, 60)
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn select_datasets(only: &[String]) -> Result<Vec<datasets::DatasetSpec>> {
    if only.is_empty() {
        return Ok(datasets::all());
    }
    // keep the fixed run order regardless of flag order
    let mut picked = Vec::new();
    for name in only {
        if datasets::by_name(name).is_none() {
            bail!("unknown dataset {:?}", name);
        }
    }
    for spec in datasets::all() {
        if only.iter().any(|n| n.eq_ignore_ascii_case(spec.name)) {
            picked.push(spec);
        }
    }
    Ok(picked)
}

fn print_table(header: &[&str], rows: &[Vec<String>]) {
    const WIDTH: usize = 24;
    let line: Vec<String> = header.iter().map(|h| format!("{:<WIDTH$}", truncate(h, WIDTH))).collect();
    println!("{}", line.join(" | "));
    println!("{}", "-".repeat((WIDTH + 3) * header.len()));
    for row in rows {
        let line: Vec<String> = row.iter().map(|c| format!("{:<WIDTH$}", truncate(c, WIDTH))).collect();
        println!("{}", line.join(" | "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
