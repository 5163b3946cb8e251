use clap::{Parser, Subcommand};
use slipwatch::config::AppConfig;
use slipwatch::server::{self, AppState};
use slipwatch::session::{Session, SessionSettings};
use slipwatch::source::HttpSource;
use slipwatch::storage::FileStore;
use slipwatch::types::Priority;
use slipwatch::{export, series};
use anyhow::Context;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the monitoring map API and front end
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load the points the way the map would and write them as CSV
    Export {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE", default_value = export::FILE_NAME)]
        output: PathBuf,
    },
    /// Print the synthetic displacement series for a point
    Series {
        #[arg(long, default_value = "custom")]
        category: String,
        #[arg(long)]
        id: u32,
    },
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_file(path)
    } else {
        warn!("Config file {:?} not found, using defaults", path);
        Ok(AppConfig::default())
    }
}

async fn open_session(config: &AppConfig) -> anyhow::Result<Session<HttpSource>> {
    let source = HttpSource::new(&config.source).context("Failed to build HTTP client")?;
    let storage = FileStore::new(&config.storage.dir);
    let mut session = Session::new(Arc::new(source), Box::new(storage), SessionSettings::from(config));

    let report = session.load_initial(Utc::now().timestamp_millis()).await;
    if let Some(notice) = &report.notice {
        warn!("{}", notice);
    }
    info!(origin = ?report.origin, points = report.points, "Initial load complete");
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = load_config(config)?;
            let session = open_session(&app_config).await?;
            server::start_server(&app_config, AppState::new(session)).await?;
        }
        Commands::Export { config, output } => {
            let app_config = load_config(config)?;
            let session = open_session(&app_config).await?;
            let csv = session.export_csv(Utc::now())?;
            std::fs::write(output, csv)
                .with_context(|| format!("Failed to write export: {:?}", output))?;
            info!("Exported {} points to {:?}", session.store().len(), output);
        }
        Commands::Series { category, id } => {
            let points = series::generate(&Priority::parse(category), *id);
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
    }

    Ok(())
}
