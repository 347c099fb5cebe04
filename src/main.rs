//! CLI entry point for the Italian COVID-19 data digest.
//!
//! Loads the civil-protection national and regional feeds, prepares the
//! derived datasets, and prints or exports the views of the dashboard.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use covid_italy::config::{FeedConfig, FeedSource};
use covid_italy::fetch::{BasicClient, FeedLoader};
use covid_italy::model::Scope;
use covid_italy::{Dataset, Pipeline, output, regions};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "covid_italy")]
#[command(about = "Italian COVID-19 figures from the civil-protection feeds", long_about = None)]
struct Cli {
    #[command(flatten)]
    feeds: FeedArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FeedArgs {
    /// JSON config file (defaults and COVID_* environment variables otherwise)
    #[arg(long, global = true)]
    config: Option<String>,

    /// National feed URL or local CSV path
    #[arg(long, global = true)]
    national: Option<String>,

    /// Regional feed URL or local CSV path
    #[arg(long, global = true)]
    regional: Option<String>,

    /// Per-request fetch timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Skip the cases-per-swab column
    #[arg(long, global = true, default_value_t = false)]
    no_cases_per_swab: bool,

    /// Drop region codes and feed coordinates
    #[arg(long, global = true, default_value_t = false)]
    no_coordinates: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the overview panel for Italy or one region
    Summary {
        /// Region name, or "Italia" for the whole country
        #[arg(short, long, default_value = regions::NATIONAL_LABEL)]
        region: String,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the day-by-day series for Italy or one region
    Series {
        /// Region name, or "Italia" for the whole country
        #[arg(short, long, default_value = regions::NATIONAL_LABEL)]
        region: String,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the regions ranked by total cases
    Ranking {
        /// Only show the first N regions
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the selectable scopes
    Regions,
    /// Write every derived dataset to a directory
    Export {
        /// Directory to write the CSV and JSON files to
        #[arg(short, long, default_value = "export")]
        output_dir: PathBuf,

        /// Gzip compress the written files
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/covid_italy.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("covid_italy.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Static list, nothing to load.
        Commands::Regions => print_regions(),
        command => {
            let config = resolve_config(&cli.feeds)?;
            let dataset = match load_dataset(&config).await {
                Ok(dataset) => dataset,
                Err(e) => {
                    error!(error = %e, "Could not prepare datasets");
                    anyhow::bail!("data temporarily unavailable: {e}");
                }
            };
            show(command, &dataset)?;
        }
    }

    Ok(())
}

fn print_regions() {
    for option in regions::selection_options() {
        println!("{option}");
    }
}

/// Prints the view selected by `command`.
fn show(command: Commands, dataset: &Dataset) -> Result<()> {
    match command {
        Commands::Summary { region, json } => {
            let summary = dataset.summary(&Scope::parse(&region))?;
            if json {
                output::print_json(&summary)?;
            } else {
                print!("{}", output::render_summary(&summary));
            }
        }
        Commands::Series { region, json } => {
            let series = dataset.series(&Scope::parse(&region))?;
            if json {
                output::print_json(&series)?;
            } else {
                print!("{}", output::render_series(&series));
            }
        }
        Commands::Ranking { limit, json } => {
            let ranking = dataset.ranking();
            if json {
                let shown = limit.unwrap_or(ranking.len()).min(ranking.len());
                let entries = &ranking.entries()[..shown];
                output::print_json(&entries)?;
            } else {
                println!("Ultimo aggiornamento: {}", dataset.last_updated()?);
                print!("{}", output::render_ranking(ranking, limit));
            }
        }
        Commands::Export { output_dir, gzip } => {
            let written = output::export_dataset(dataset, &output_dir, gzip)?;
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Regions => print_regions(),
    }

    Ok(())
}

/// Layers CLI flags over the JSON config file or the environment.
fn resolve_config(args: &FeedArgs) -> Result<FeedConfig> {
    let mut config = match &args.config {
        Some(path) => FeedConfig::load(path)?,
        None => FeedConfig::from_env()?,
    };

    if let Some(national) = &args.national {
        config.national = FeedSource::from(national.as_str());
    }
    if let Some(regional) = &args.regional {
        config.regional = FeedSource::from(regional.as_str());
    }
    if let Some(secs) = args.timeout_secs {
        config.timeout_secs = secs;
    }
    if args.no_cases_per_swab {
        config.options.cases_per_swab = false;
    }
    if args.no_coordinates {
        config.options.keep_coordinates = false;
    }
    Ok(config)
}

/// Loads both feeds and runs the preparation pipeline.
#[tracing::instrument(skip(config), fields(timeout_secs = config.timeout_secs))]
async fn load_dataset(config: &FeedConfig) -> Result<Dataset> {
    let client = BasicClient::with_timeout(Duration::from_secs(config.timeout_secs))
        .context("building HTTP client")?;
    let feeds = FeedLoader::new(client, config).load().await?;
    let dataset = Pipeline::new(config.options).run(feeds.national, feeds.regional)?;
    info!(
        last_updated = %dataset.last_updated().unwrap_or_default(),
        "Datasets ready"
    );
    Ok(dataset)
}
