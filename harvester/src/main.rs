#[macro_use]
extern crate rocket;

mod api;
mod config;
mod error;
mod models;
mod services;
mod utils;

use crate::models::UpdateType;
use crate::services::harvest::Harvester;
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

pub struct AppState {
    pub harvester: Arc<Harvester>,
    pub scheduler: Mutex<JobScheduler>,
}

#[derive(Parser)]
#[command(name = "harvester", about = "Harvests YouTube channel, video, caption and recommendation snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one update and exit
    Update {
        #[arg(long, value_enum, default_value_t = UpdateType::All)]
        mode: UpdateType,
    },
    /// Write the trending videos CSV and exit
    Trending,
    /// Serve the HTTP API and run scheduled updates
    Serve,
}

#[rocket::main]
async fn main() -> Result<()> {
    config::load_environment();
    config::init_logger();

    let cli = Cli::parse();
    match cli.command {
        Command::Update { mode } => {
            let es_client = config::create_elasticsearch_client()?;
            let harvester = config::create_harvester(&es_client).await?;
            let summary = harvester.run(mode).await?;
            info!("Run summary: {}", serde_json::to_string(&summary)?);
        }
        Command::Trending => {
            let es_client = config::create_elasticsearch_client()?;
            let harvester = config::create_harvester(&es_client).await?;
            harvester.save_trending().await?;
        }
        Command::Serve => {
            let app_state = config::create_app_state().await?;

            rocket::build()
                .manage(app_state)
                .mount("/api/runs", routes![api::latest_run, api::start_run])
                .mount("/api", routes![api::credentials, api::save_trending])
                .launch()
                .await
                .map_err(|e| anyhow::anyhow!("Rocket failed: {e}"))?;

            info!("Harvester stopped.");
        }
    }

    Ok(())
}
