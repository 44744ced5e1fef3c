use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_discovery::candidates::CandidateQuery;
use pezzottify_discovery::config::{CliConfig, DiscoveryConfig, FileConfig};
use pezzottify_discovery::stats::metrics;
use pezzottify_discovery::DiscoveryPipeline;

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding discovery.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Base URL of the upstream catalog API.
    #[clap(long)]
    pub catalog_api_url: Option<String>,

    /// Bearer token for the upstream catalog API.
    #[clap(long)]
    pub catalog_api_token: Option<String>,

    /// Timeout in seconds for upstream catalog requests.
    #[clap(long, default_value_t = 30)]
    pub catalog_timeout_sec: u64,

    /// User agent sent to MusicBrainz.
    #[clap(long)]
    pub musicbrainz_user_agent: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints store row counts, rate budget and accounting state.
    Stats,

    /// Samples random candidates from the local store.
    Candidates {
        /// Number of distinct artists wanted.
        #[clap(long, default_value_t = 5)]
        needed: usize,

        /// Tracks kept per artist.
        #[clap(long, default_value_t = 1)]
        tracks_per_artist: usize,
    },

    /// Prints the cached relationship edges of an artist.
    Graph {
        artist_id: String,

        #[clap(long, default_value_t = 0.0)]
        min_strength: f64,

        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Backfills tracks missing release year or genre.
    Backfill {
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            catalog_api_url: self.catalog_api_url.clone(),
            catalog_api_token: self.catalog_api_token.clone(),
            catalog_timeout_sec: self.catalog_timeout_sec,
            musicbrainz_user_agent: self.musicbrainz_user_agent.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = DiscoveryConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    metrics::init_metrics();
    info!("Opening discovery store at {:?}...", config.discovery_db_path());
    let pipeline = DiscoveryPipeline::open(&config)?;

    match cli_args.command {
        Command::Stats => {
            let counts = pipeline.store().get_counts()?;
            let budget = pipeline.budget().status();
            println!("artist profiles: {}", counts.artist_profiles);
            println!("tracks:          {}", counts.tracks);
            println!("relationships:   {}", counts.relationships);
            println!(
                "rate budget:     {:.1}/{:.1} tokens (+{:.2}/s)",
                budget.remaining, budget.capacity, budget.refill_per_sec
            );
            let mismatches = pipeline.validate_statistics();
            if mismatches.is_empty() {
                println!("accounting:      consistent");
            } else {
                for mismatch in mismatches {
                    println!(
                        "accounting:      {} drifted by {} (requested {}, cached {}, upstream {})",
                        mismatch.operation,
                        mismatch.drift,
                        mismatch.requested,
                        mismatch.cached,
                        mismatch.from_upstream
                    );
                }
            }
        }
        Command::Candidates {
            needed,
            tracks_per_artist,
        } => {
            let query = CandidateQuery::new(needed).tracks_per_artist(tracks_per_artist);
            let mut candidates = pipeline.candidates().fetch_random_tracks(&query).await;
            if candidates.is_empty() {
                info!("No profiled candidates, using absolute fallback");
                candidates = pipeline.candidates().fetch_absolute_fallback(&query).await;
            }
            if candidates.is_empty() {
                println!("No candidates available");
            }
            for candidate in candidates {
                println!(
                    "{}\t{}\t{}\t{}",
                    candidate.track.track_id,
                    candidate.artist_name,
                    candidate.track.name,
                    candidate.track.popularity.unwrap_or(0)
                );
            }
        }
        Command::Graph {
            artist_id,
            min_strength,
            limit,
        } => {
            let edges = pipeline.graph().get(&artist_id, min_strength, limit)?;
            if edges.is_empty() {
                println!("No cached relationships for {}", artist_id);
            }
            for edge in edges {
                println!(
                    "{:.3}\t{}\t{}\t{}",
                    edge.strength,
                    edge.relationship_type.as_str(),
                    edge.related_artist_id,
                    edge.related_artist_name
                );
            }
        }
        Command::Backfill { limit } => {
            let report = pipeline.backfill().backfill_missing_tracks(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
