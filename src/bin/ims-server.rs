use std::path::PathBuf;

use clap::Parser;
use ims_backend::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "ims-server", version, about = "Clinical task and finance API server")]
struct Args {
    /// Config file (.json, .toml, .yaml). Defaults to an in-memory setup.
    config: Option<PathBuf>,

    /// Overrides `listen` from the config.
    #[arg(long, alias = "addr")]
    listen: Option<String>,

    #[arg(long)]
    json_logs: bool,

    /// Export spans over OTLP/HTTP (needs the `otel` feature).
    #[arg(long)]
    otel: bool,

    #[arg(long, requires = "otel")]
    otel_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.json_logs {
        config.json_logs = true;
    }

    let _otel_guard = attach_tracing(args.otel, args.otel_endpoint.as_deref(), config.json_logs)?;

    ims_backend::server::run(&config).await?;
    Ok(())
}

#[cfg(feature = "otel")]
fn attach_tracing(
    otel: bool,
    endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<ims_backend::telemetry::otel::OtelGuard>, Box<dyn std::error::Error>> {
    if !otel {
        ims_backend::telemetry::init_tracing(json_logs).map_err(|err| err.to_string())?;
        return Ok(None);
    }
    let guard = ims_backend::telemetry::otel::init_tracing("ims-server", endpoint, json_logs)
        .map_err(|err| err.to_string())?;
    Ok(Some(guard))
}

#[cfg(not(feature = "otel"))]
fn attach_tracing(
    otel: bool,
    _endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<()>, Box<dyn std::error::Error>> {
    if otel {
        return Err("otel requires `--features otel`".into());
    }
    ims_backend::telemetry::init_tracing(json_logs).map_err(|err| err.to_string())?;
    Ok(None)
}
