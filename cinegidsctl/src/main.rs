//! Command-line front end for the cinegids lookup pipeline.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cinegids_config::Settings;
use cinegids_core::build_pipeline;
use cinegids_model::{CacheStatus, LookupQuery, MediaType};

#[derive(Parser, Debug)]
#[command(name = "cinegidsctl", about = "VPRO Cinema metadata lookups")]
struct Cli {
    /// Raise log verbosity (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a title through cache, API, alternates, and web fallback
    Lookup {
        /// Title to resolve
        title: String,
        /// Release year
        #[arg(short, long)]
        year: Option<i32>,
        /// Known IMDb id (e.g. tt0363163)
        #[arg(long)]
        imdb: Option<String>,
        /// film or series
        #[arg(long, default_value = "film")]
        media_type: MediaType,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Force a credential scrape now
    RefreshCredentials,
    /// Inspect or clean the lookup cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry counts, sizes, and configured ceilings
    Stats,
    /// Delete every cached lookup (credential files are kept)
    Clear,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::from_env();
    settings
        .ensure_directories()
        .context("creating cache directories")?;
    let pipeline =
        build_pipeline(&settings).context("building lookup pipeline")?;

    match cli.command {
        Command::Lookup {
            title,
            year,
            imdb,
            media_type,
            json,
        } => {
            let query = LookupQuery {
                title,
                year,
                imdb_id: imdb,
                media_type,
            };
            let record = pipeline.lookups.resolve(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            match record.status {
                CacheStatus::Found => {
                    println!(
                        "{} ({})",
                        record.title,
                        record
                            .year
                            .map(|y| y.to_string())
                            .unwrap_or_else(|| "year unknown".into())
                    );
                    if let Some(method) = record.lookup_method {
                        println!("  via:       {method}");
                    }
                    if let Some(director) = &record.director {
                        println!("  director:  {director}");
                    }
                    if !record.genres.is_empty() {
                        println!("  genres:    {}", record.genres.join(", "));
                    }
                    if let Some(rating) = &record.content_rating {
                        println!("  rating:    {rating}");
                    }
                    if let Some(appreciation) = record.appreciation {
                        println!("  score:     {appreciation:.1}/10");
                    }
                    if let Some(imdb) = &record.imdb_id {
                        println!("  imdb:      {imdb}");
                    }
                    if let Some(url) = &record.source_url {
                        println!("  source:    {url}");
                    }
                    if let Some(description) = &record.description {
                        println!("\n{description}");
                    }
                }
                CacheStatus::NotFound => {
                    println!("No match found for \"{}\"", record.title);
                }
            }
        }
        Command::RefreshCredentials => {
            if pipeline.credentials.force_refresh().await {
                let creds = pipeline.credentials.current();
                println!("Credentials ready (source: {})", creds.source);
            } else {
                anyhow::bail!("credential refresh left no usable pair");
            }
        }
        Command::Cache(CacheCommand::Stats) => {
            let stats = pipeline.cache.stats();
            println!("entries:   {} / {}", stats.total_entries, stats.max_entries);
            println!("  found:     {}", stats.found);
            println!("  not found: {}", stats.not_found);
            println!("  expired:   {}", stats.expired);
            println!(
                "size:      {:.1} MiB / {:.1} MiB",
                stats.total_bytes as f64 / (1024.0 * 1024.0),
                stats.max_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        Command::Cache(CacheCommand::Clear) => {
            let removed = pipeline.cache.clear(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().contains("credentials"))
                    .unwrap_or(false)
            });
            println!("Removed {removed} cached lookups");
        }
    }

    Ok(())
}
