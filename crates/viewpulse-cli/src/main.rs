//! viewpulse — collect view-count snapshots, rebuild the percentile envelope
//! and rank items by temporal performance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use viewpulse_collect::{CollectParams, YouTubeDataSource};
use viewpulse_core::EngineConfig;
use viewpulse_jobs::{JobKind, JobStatus};
use viewpulse_runtime::Engine;
use viewpulse_store::NewTrackedItem;

#[derive(Parser)]
#[command(name = "viewpulse", version, about = "Temporal performance normalization engine")]
struct Cli {
    /// Data directory (defaults to $VIEWPULSE_DATA_DIR or ./data).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start tracking an item.
    Track {
        id: String,
        /// Publish time, RFC 3339 (e.g. 2024-03-01T17:00:00Z).
        #[arg(long)]
        published: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Refresh stale items from the upstream API.
    Collect {
        #[arg(long)]
        max_calls: Option<u32>,
        #[arg(long)]
        stale_hours: Option<u64>,
        /// Print the job id and exit instead of waiting.
        #[arg(long)]
        detach: bool,
    },
    /// Recompute the percentile envelope and rescore every item.
    Rebuild {
        #[arg(long)]
        detach: bool,
    },
    /// Show one job.
    Job { id: String },
    /// Show the most recent job of a kind (collect | rebuild).
    Latest { kind: String },
    /// Ask a running job to stop.
    Stop { id: String },
    /// Show today's quota usage.
    Quota,
    /// List the best-scoring items.
    Top {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 1.0)]
        min_score: f64,
    },
    /// Score one item now.
    Score { id: String },
}

fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("VIEWPULSE_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn open_engine(config: EngineConfig, needs_upstream: bool) -> anyhow::Result<Engine> {
    if needs_upstream {
        return Engine::with_youtube(config).context("failed to start engine");
    }
    // Local commands never reach the upstream, so no key is needed.
    let source = YouTubeDataSource::new(&config.api_base_url, String::new())?;
    Ok(Engine::open(config, Arc::new(source))?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll a job to completion, echoing each new progress payload.
async fn follow_job(engine: &Engine, job_id: &str) -> anyhow::Result<()> {
    let mut last_progress = None;
    loop {
        let job = engine
            .job_status(job_id)?
            .with_context(|| format!("job {} disappeared", job_id))?;
        if job.progress != last_progress {
            if let Some(progress) = &job.progress {
                println!("{}", progress);
            }
            last_progress = job.progress.clone();
        }
        if job.status.is_terminal() {
            print_json(&job)?;
            if job.status == JobStatus::Failed {
                bail!("job {} failed", job_id);
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    info!("Data directory: {}", data_dir.display());

    let config = EngineConfig::from_env(&data_dir)?;
    let needs_upstream = matches!(cli.command, Command::Collect { .. });
    let engine = open_engine(config, needs_upstream)?;

    match cli.command {
        Command::Track {
            id,
            published,
            title,
            channel,
        } => {
            let published_at = chrono::DateTime::parse_from_rfc3339(&published)
                .with_context(|| format!("invalid --published value: {}", published))?
                .timestamp_millis();
            engine.track_item(&NewTrackedItem {
                id: id.clone(),
                published_at,
                title,
                channel_id: channel,
            })?;
            println!("Tracking {}", id);
        }
        Command::Collect {
            max_calls,
            stale_hours,
            detach,
        } => {
            let defaults = engine.default_collect_params();
            let params = CollectParams {
                max_external_calls: max_calls.unwrap_or(defaults.max_external_calls),
                staleness: stale_hours
                    .map(|h| Duration::from_secs(h * 3600))
                    .unwrap_or(defaults.staleness),
            };
            let job_id = engine.start_collection(params)?;
            println!("Collection job {}", job_id);
            if !detach {
                follow_job(&engine, &job_id).await?;
            }
        }
        Command::Rebuild { detach } => {
            let job_id = engine.start_envelope_rebuild()?;
            println!("Rebuild job {}", job_id);
            if !detach {
                follow_job(&engine, &job_id).await?;
            }
        }
        Command::Job { id } => match engine.job_status(&id)? {
            Some(job) => print_json(&job)?,
            None => bail!("no job {}", id),
        },
        Command::Latest { kind } => {
            let kind = JobKind::parse(&kind)
                .with_context(|| format!("unknown job kind: {} (collect | rebuild)", kind))?;
            match engine.latest_job(kind)? {
                Some(job) => print_json(&job)?,
                None => println!("No {} jobs yet", kind),
            }
        }
        Command::Stop { id } => {
            if engine.request_stop(&id)? {
                println!("Stop requested for {}", id);
            } else {
                bail!("job {} is not running", id);
            }
        }
        Command::Quota => print_json(&engine.quota_status()?)?,
        Command::Top { limit, min_score } => {
            for item in engine.top_performers(limit, min_score)? {
                println!(
                    "{:>8.2}  {:>12}  {}  {}",
                    item.temporal_performance_score.unwrap_or_default(),
                    item.view_count,
                    item.id,
                    item.title.as_deref().unwrap_or("")
                );
            }
        }
        Command::Score { id } => match engine.score_item(&id)? {
            Some(score) => print_json(&score)?,
            None => println!("{} is unscored: no envelope yet", id),
        },
    }

    Ok(())
}
