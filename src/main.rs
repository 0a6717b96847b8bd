//! Youtubingest command-line entry point.
//!
//! Runs the ingestion core directly from a terminal: `ingest` processes one
//! URL or search term end to end and prints the digest; `stats` shows the
//! engine's state after a run.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use youtubingest::config::Config;
use youtubingest::engine::IngestionEngine;
use youtubingest::error::ErrorResponse;
use youtubingest::models::IngestRequest;

/// Youtubingest - YouTube content to LLM-ready text digests
#[derive(Parser, Debug)]
#[command(name = "youtubingest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turns a YouTube video, playlist, channel, or search into a text digest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one URL or search term and print the digest
    Ingest {
        /// YouTube URL (video, playlist, channel) or search term
        url: String,

        /// Skip transcripts
        #[arg(long)]
        no_transcript: bool,

        /// Skip descriptions
        #[arg(long)]
        no_description: bool,

        /// Transcript grouping interval in seconds (0, 10, 20, 30, 60)
        #[arg(short, long, default_value = "10")]
        interval: u32,

        /// Only include videos published on or after this date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Only include videos published on or before this date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Print the structured result as JSON instead of the raw digest
        #[arg(long)]
        json: bool,
    },

    /// Print engine statistics (runs against a fresh engine)
    Stats,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("youtubingest={level}")));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let config = Arc::new(Config::load().context("failed to load configuration")?);

    match cli.command {
        Commands::Ingest {
            url,
            no_transcript,
            no_description,
            interval,
            start_date,
            end_date,
            json,
        } => {
            let engine = IngestionEngine::new(config).map_err(|e| {
                error!(error = %e, "Engine initialization failed");
                anyhow::anyhow!(e.to_string())
            })?;

            let request = IngestRequest {
                url,
                include_transcript: !no_transcript,
                include_description: !no_description,
                transcript_interval: interval,
                start_date,
                end_date,
            };

            match engine.ingest(request).await {
                Ok(result) => {
                    info!(
                        source = %result.source_name,
                        videos = result.video_count,
                        tokens = result.token_count,
                        quota = result.api_quota_used,
                        "Ingest succeeded"
                    );
                    if json {
                        println!("{}", serde_json::to_string_pretty(result.as_ref())?);
                    } else {
                        print!("{}", result.digest_text);
                    }
                    engine.shutdown().await;
                }
                Err(e) => {
                    let response = ErrorResponse::from(&e);
                    engine.shutdown().await;
                    eprintln!("{}", serde_json::to_string_pretty(&response)?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Stats => {
            let engine = IngestionEngine::new(config)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&engine.global_stats())?);
            engine.shutdown().await;
        }
    }

    Ok(())
}
