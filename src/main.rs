use clap::Parser;
use sparkcost::batch;
use sparkcost::config::AnalyzerConfig;
use sparkcost::pricing::{self, PricingMode, PricingSource, RateTable, SqlitePricing};
use sparkcost::report::format_report;
use sparkcost::storage::{LocalStore, LogStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Estimate what Spark pipelines cost from their event logs and report
/// per-run scores with weekly, monthly, quarterly and yearly totals.
#[derive(Parser, Debug)]
#[command(name = "sparkcost", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "sparkcost.toml")]
    config: PathBuf,

    /// Root directory of the event-log store (overrides config)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Location prefix under the root (overrides config)
    #[arg(short, long)]
    location: Option<String>,

    /// Pipeline name to report on (default: every pipeline found)
    #[arg(short, long)]
    app: Option<String>,

    /// Use live rates from the rates database
    #[arg(long)]
    live: bool,

    /// SQLite rates database (overrides config)
    #[arg(long)]
    rates_db: Option<PathBuf>,

    /// Write the embedded rate table to a SQLite database and exit
    #[arg(long, value_name = "FILE")]
    export_rates: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AnalyzerConfig) {
        if let Some(root) = &self.root {
            config.logs.root = root.clone();
        }
        if let Some(location) = &self.location {
            config.logs.location = location.clone();
        }
        if let Some(app) = &self.app {
            config.logs.app_name = Some(app.clone());
        }
        if self.live {
            config.pricing.mode = PricingMode::Live;
        }
        if let Some(db) = &self.rates_db {
            config.pricing.rates_db = Some(db.clone());
        }
    }

    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "sparkcost=debug"
        } else if self.quiet {
            "sparkcost=warn"
        } else {
            "sparkcost=info"
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Some(path) = &cli.export_rates {
        let table = RateTable::embedded();
        if let Err(e) = pricing::write_rates_db(path, table.classes()) {
            tracing::error!(error = %e, path = %path.display(), "failed to write rates database");
            std::process::exit(1);
        }
        println!("Wrote {} rate classes to {}", table.classes().len(), path.display());
        return;
    }

    let mut config = match AnalyzerConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(2);
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid settings");
        std::process::exit(2);
    }

    if cli.dry_run {
        println!("{config:#?}");
        return;
    }

    let store: Arc<dyn LogStore> = Arc::new(LocalStore::new(&config.logs.root));
    let pricing: Option<Arc<dyn PricingSource>> = config
        .pricing
        .rates_db
        .as_ref()
        .map(|p| Arc::new(SqlitePricing::new(p)) as Arc<dyn PricingSource>);

    let outcome = match batch::run_batch(store, &config, pricing).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "batch failed");
            std::process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&outcome.report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize report");
                std::process::exit(1);
            }
        }
    } else {
        println!("{}", format_report(&outcome.report));
    }
}
