mod db;
mod error;
mod fetch;
mod import;
mod parser;
mod pipeline;
mod record;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use fetch::{Fetcher, RawPage};
use pipeline::Pipeline;
use settings::Settings;

#[derive(Parser)]
#[command(name = "departures", about = "Warsaw departures board scraper")]
struct Cli {
    /// Schedule page to fetch (overrides FLIGHTS_SOURCE_URL)
    #[arg(long, global = true)]
    source_url: Option<String>,
    /// Where the last fetched page is kept (overrides FLIGHTS_PAGE_CACHE)
    #[arg(long, global = true)]
    page_cache: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract, clean and store the current departures
    Run,
    /// Fetch the page into the cache without storing anything
    Fetch,
    /// Extract records from the cached page and print them as JSON
    Extract {
        /// Page to read instead of the cache
        #[arg(long)]
        page: Option<PathBuf>,
    },
    /// Print stored departures
    List {
        /// Print a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete every stored departure
    Purge,
    /// Load a CSV file into the csv_data collection
    Import {
        /// Path to a .csv file with a header row
        file: PathBuf,
    },
    /// Show document counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = cli.source_url {
        settings.source_url = url;
    }
    if let Some(path) = cli.page_cache {
        settings.page_cache = path;
    }

    let result = match cli.command {
        Commands::Run => {
            let uri = settings.db_uri()?;
            let fetcher = fetcher(&settings)?;
            let summary = Pipeline::new(fetcher, uri).run().await?;
            println!("Data successfully retrieved and saved.");
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Commands::Fetch => {
            let page = fetcher(&settings)?.fetch().await?;
            println!(
                "Fetched {} bytes at {} into {}",
                page.body.len(),
                page.fetched_at.to_rfc3339(),
                settings.page_cache.display()
            );
            Ok(())
        }
        Commands::Extract { page } => {
            let path = page.unwrap_or_else(|| settings.page_cache.clone());
            let page = RawPage::from_cache(&path)?;
            let records = parser::normalize::normalize(parser::extract(page)?);
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Commands::List { json } => {
            let rows = db::list_departures(settings.db_uri()?)?;
            if json {
                println!("{}", serde_json::to_string(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No departures stored. Run 'run' first.");
                return Ok(());
            }
            print_departures(&rows);
            Ok(())
        }
        Commands::Purge => {
            let deleted = db::purge_departures(settings.db_uri()?)?;
            println!("All records deleted successfully.");
            println!("{}", serde_json::json!({ "deleted_count": deleted }));
            Ok(())
        }
        Commands::Import { file } => {
            let inserted = import::import_csv(settings.db_uri()?, &file)
                .with_context(|| format!("Import of {} failed", file.display()))?;
            println!("Data successfully loaded from CSV.");
            println!("{}", serde_json::json!({ "inserted_count": inserted }));
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(settings.db_uri()?)?;
            println!("Departures: {}", s.departures);
            println!("CSV rows:   {}", s.csv_rows);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn fetcher(settings: &Settings) -> anyhow::Result<Fetcher> {
    Ok(Fetcher::new(settings.source_url.as_str(), settings.timeout())?
        .with_cache(settings.page_cache.clone()))
}

fn print_departures(rows: &[record::CleanFlightRecord]) {
    println!(
        "{:>3} | {:<5} | {:<24} | {:<8} | {:<20} | {:<12} | {:<16}",
        "#", "Time", "Destination", "Flight", "Carrier", "Status", "Remarks"
    );
    println!("{}", "-".repeat(106));

    for (i, r) in rows.iter().enumerate() {
        println!(
            "{:>3} | {:<5} | {:<24} | {:<8} | {:<20} | {:<12} | {:<16}",
            i + 1,
            r.time().unwrap_or("-"),
            truncate(r.destination().unwrap_or("-"), 24),
            r.flight_number().unwrap_or("-"),
            truncate(r.carrier().unwrap_or("-"), 20),
            truncate(r.status().unwrap_or("-"), 12),
            truncate(r.remarks().unwrap_or(""), 16),
        );
    }

    println!("\n{} departures", rows.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
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
