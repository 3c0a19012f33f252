use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ims_backend::finance::{Amount, BillableEvent, ReportService, RollupEngine, parse_timestamp};
use ims_backend::{ServerConfig, StoreConfig};
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(name = "ims-finance", version, about = "Operate on financial rollups directly")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct StoreArgs {
    /// Use the finance store from a server config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    sqlite: Option<PathBuf>,

    #[arg(long)]
    redis: Option<String>,

    #[arg(long)]
    postgres: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record one billable event into its monthly and daily buckets.
    Apply {
        #[arg(long)]
        consultation_type: String,
        #[arg(long)]
        price: Amount,
        /// RFC 3339 or YYYY-MM-DD; defaults to now.
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<OffsetDateTime>,
    },
    /// Print the rollup summary for a duration as JSON.
    Report {
        /// MM-YYYY or DD-MM-YYYY.
        #[arg(long)]
        duration: String,
        #[arg(long)]
        consultation_type: Option<String>,
    },
}

impl StoreArgs {
    fn store_config(&self) -> Result<StoreConfig, Box<dyn std::error::Error>> {
        if let Some(path) = &self.config {
            return Ok(ServerConfig::load(path)?.finance_store);
        }
        if let Some(path) = &self.sqlite {
            return Ok(StoreConfig::Sqlite { path: path.clone() });
        }
        if let Some(url) = &self.redis {
            return Ok(StoreConfig::Redis {
                url: url.clone(),
                prefix: None,
            });
        }
        if let Some(url) = &self.postgres {
            return Ok(StoreConfig::Postgres {
                url: url.clone(),
                max_connections: Some(1),
            });
        }
        Err("one of --config, --sqlite, --redis or --postgres is required".into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    ims_backend::telemetry::init_tracing(cli.json_logs).map_err(|err| err.to_string())?;

    let store = ims_backend::server::open_finance_store(&cli.store.store_config()?).await?;

    match cli.command {
        Command::Apply {
            consultation_type,
            price,
            timestamp,
        } => {
            let occurred_at = timestamp.unwrap_or_else(OffsetDateTime::now_utc);
            let event = BillableEvent::new(consultation_type, price, occurred_at);
            let outcome = RollupEngine::new(store).record(&event).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Report {
            duration,
            consultation_type,
        } => {
            let summary = ReportService::new(store)
                .summary(&duration, consultation_type.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
