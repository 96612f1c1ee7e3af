mod bus;
mod config;
mod dead_letters;
mod domain;
mod logging;
mod orchestrator;
mod protocol;
mod publisher;
mod stages;
mod transition_log;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use bus::{Bus, Consumer, InMemoryBus, RedisStreamBus};
use config::{BusBackend, PlannerConfig};
use domain::{ContextId, WorkflowServices};
use orchestrator::{spawn_orchestrator, Orchestrator, OrchestratorHandle};
use protocol::{Message, Role};
use publisher::ReliablePublisher;
use transition_log::TransitionLog;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TRAVEL_PLANNER_GIT_SHA"),
    ")"
);

/// Extra time `plan` waits beyond the workflow deadline for the outcome.
const REPLY_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "travel-planner")]
#[command(about = "Coordinates travel-plan stages over a shared message bus")]
#[command(version = VERSION)]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and the built-in stage workers until Ctrl-C
    Serve {
        /// Keep records already on the pipeline topics
        #[arg(long)]
        keep_streams: bool,
    },
    /// Submit one travel request and print its outcome
    Plan {
        #[arg(long)]
        destination: String,
        #[arg(long)]
        budget: f64,
        #[arg(long)]
        travelers: u32,
        /// Trip length in days
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long)]
        vibe: Option<String>,
        #[arg(long)]
        origin: Option<String>,
    },
    /// Show the most recent dead letters
    DeadLetters {
        #[arg(long, default_value_t = dead_letters::DEFAULT_COUNT)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PlannerConfig::load_or_default(cli.config.as_deref())?;
    logging::init(&config.logging.level);

    match cli.command {
        Command::Serve { keep_streams } => serve(config, !keep_streams).await,
        Command::Plan {
            destination,
            budget,
            travelers,
            duration,
            vibe,
            origin,
        } => {
            let mut payload = Map::new();
            payload.insert("destination".into(), json!(destination));
            payload.insert("budget".into(), json!(budget));
            payload.insert("travelers".into(), json!(travelers));
            if let Some(duration) = duration {
                payload.insert("duration".into(), json!(duration));
            }
            if let Some(vibe) = vibe {
                payload.insert("vibe".into(), json!(vibe));
            }
            if let Some(origin) = origin {
                payload.insert("origin".into(), json!(origin));
            }
            plan(config, payload).await
        }
        Command::DeadLetters { count } => inspect_dead_letters(config, count).await,
    }
}

async fn open_bus(config: &PlannerConfig) -> Result<Arc<dyn Bus>> {
    match config.bus.backend {
        BusBackend::Memory => Ok(Arc::new(InMemoryBus::new())),
        BusBackend::Redis => {
            let bus = RedisStreamBus::open(&config.bus.redis_url)
                .with_context(|| format!("Invalid redis url: {}", config.bus.redis_url))?;
            bus.ping()
                .await
                .with_context(|| format!("Redis not reachable at {}", config.bus.redis_url))?;
            Ok(Arc::new(bus))
        }
    }
}

/// Orchestrator plus stage workers sharing one bus.
struct Pipeline {
    orchestrator: OrchestratorHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    async fn start(
        config: &PlannerConfig,
        bus: Arc<dyn Bus>,
        clear: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let publisher = ReliablePublisher::new(
            bus,
            config.topics(),
            config.retry.clone(),
            Role::Orchestrator,
        );
        let mut orchestrator = Orchestrator::new(
            publisher.clone(),
            config.orchestrator_settings(),
            WorkflowServices::default(),
        );
        if let Some(path) = &config.orchestrator.transition_log {
            let log = TransitionLog::open(path)
                .with_context(|| format!("Failed to open transition log: {}", path.display()))?;
            tracing::info!(path = %log.path().display(), "Writing workflow transitions");
            orchestrator = orchestrator.with_transition_log(Arc::new(log));
        }
        if clear {
            orchestrator
                .reset_pipeline()
                .await
                .context("Failed to clear pipeline topics")?;
        }

        let poll = config.poll_settings();
        let workers = stages::spawn_stage_workers(
            stages::reference::reference_handlers(),
            &publisher,
            config.stages.max_concurrency,
            poll,
            shutdown.clone(),
        )
        .await
        .context("Failed to start stage workers")?;
        let orchestrator = spawn_orchestrator(orchestrator, poll, shutdown).await?;

        Ok(Self {
            orchestrator,
            workers,
        })
    }

    async fn join(self) -> Result<()> {
        self.orchestrator.join().await?;
        for worker in self.workers {
            worker.await?;
        }
        Ok(())
    }
}

async fn serve(config: PlannerConfig, clear: bool) -> Result<()> {
    let bus = open_bus(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let clear = clear && config.orchestrator.clear_on_start;
    let pipeline = Pipeline::start(&config, bus, clear, shutdown_rx).await?;
    tracing::info!(
        backend = ?config.bus.backend,
        prefix = %config.bus.topic_prefix,
        version = VERSION,
        "Travel planner running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    let active = pipeline.orchestrator.active_workflows().await?;
    if active.is_empty() {
        tracing::info!("Shutting down");
    } else {
        tracing::warn!(active = active.len(), "Shutting down with workflows in flight");
    }
    shutdown_tx.send(true).ok();
    pipeline.join().await
}

async fn plan(config: PlannerConfig, payload: Map<String, Value>) -> Result<()> {
    let bus = open_bus(&config).await?;
    let topics = config.topics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The memory bus only exists in this process, so the pipeline has to as well.
    let pipeline = match config.bus.backend {
        BusBackend::Memory => Some(Pipeline::start(&config, bus.clone(), false, shutdown_rx).await?),
        BusBackend::Redis => None,
    };

    // Subscribe before publishing so the reply cannot be missed.
    let poll = config.poll_settings();
    let replies = Consumer::from_now(bus.clone(), topics.for_role(&Role::User))
        .await?
        .into_stream(poll.max_batch, poll.block);
    let context_id = ContextId::generate("cli");
    let publisher = ReliablePublisher::new(bus, topics, config.retry.clone(), Role::User);
    publisher
        .send_with_retry(&Message::user_request(context_id.clone(), payload))
        .await
        .context("Failed to submit travel request")?;
    tracing::info!(context_id = %context_id, "Travel request submitted");

    let wait = Duration::from_secs(config.orchestrator.deadline_secs) + REPLY_GRACE;
    let outcome = tokio::time::timeout(wait, async {
        tokio::pin!(replies);
        while let Some(record) = replies.next().await {
            let Ok(message) = record?.decode::<Message>() else {
                continue;
            };
            if message.context_id == context_id {
                return anyhow::Ok(message);
            }
        }
        anyhow::bail!("Reply stream ended")
    })
    .await;

    shutdown_tx.send(true).ok();
    if let Some(pipeline) = pipeline {
        pipeline.join().await?;
    }

    let reply = outcome
        .map_err(|_| anyhow::anyhow!("No reply for {} within {:?}", context_id, wait))??;
    print_outcome(&reply.payload);
    Ok(())
}

fn print_outcome(payload: &Map<String, Value>) {
    match payload.get("status").and_then(Value::as_str) {
        Some("completed") => {
            match payload.get("itinerary") {
                Some(Value::String(text)) => println!("{}", text),
                other => println!(
                    "{}",
                    serde_json::to_string_pretty(&other).unwrap_or_default()
                ),
            }
            if let Some(secs) = payload.get("processing_time").and_then(Value::as_f64) {
                println!("Planned in {:.1}s", secs);
            }
        }
        _ => {
            let error = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            println!("Planning failed: {}", error);
        }
    }
}

async fn inspect_dead_letters(config: PlannerConfig, count: usize) -> Result<()> {
    let bus = open_bus(&config).await?;
    let entries = dead_letters::recent(bus.as_ref(), &config.topics().dead_letter(), count)
        .await
        .context("Failed to read dead letters")?;
    dead_letters::render(&entries, &mut std::io::stdout().lock())?;
    Ok(())
}
