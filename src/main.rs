use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::{AppConfig, StorageBackend};
use weft_core::event::EventBus;
use weft_core::traits::{DefinitionStore, RunStore};
use weft_core::types::{Run, RunId, RunStatus};
use weft_core::workflow::WorkflowDefinition;
use weft_engine::{Engine, RunLogger};
use weft_steps::{ReqwestHttpClient, RhaiEvaluator, StepRegistry, StepServices};
use weft_store::{
    FileDefinitionStore, HttpEmbeddingProvider, InMemoryDefinitionStore, InMemoryRunStore,
    SqliteKnowledgeBase, SqliteRunStore,
};

const DEFAULT_CONFIG: &str = "weft.toml";

#[derive(Parser)]
#[command(name = "weft", version, about = "Graph workflow execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and wait for it to finish
    Run {
        /// Workflow id in the workflows directory, or a path to a JSON definition
        workflow: String,
        /// Run input as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// Read run input from a JSON file (merged under --input)
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Recorded as the requester of the run
        #[arg(long)]
        requested_by: Option<String>,
    },
    /// Check a workflow definition without running it
    Validate {
        file: PathBuf,
    },
    /// List the available step types
    Steps,
    /// Show recent runs
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one run and its step records
    Show {
        run_id: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WEFT_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    let command = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weft", &mut std::io::stdout());
            return Ok(());
        }
        command => command,
    };

    let config = load_config(&cli.config)?;

    match command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Steps => {
            let registry = StepRegistry::with_builtins(&StepServices::unconfigured());
            for step in registry.describe() {
                println!("{:<20} {}", step.step_type, step.description);
            }
        }
        Commands::Validate { file } => {
            let definition = read_definition(&file)?;
            let registry = StepRegistry::with_builtins(&StepServices::unconfigured());
            registry.validate_definition(&definition)?;
            println!(
                "{}: ok ({} nodes, {} edges)",
                definition.id,
                definition.nodes.len(),
                definition.edges.len()
            );
        }
        Commands::History { limit } => {
            let runs = open_run_store(&config)?;
            let history = runs.list_runs(limit).await?;
            if history.is_empty() {
                println!("No runs recorded yet.");
            }
            for run in history {
                println!(
                    "{}  {:<10} {:<24} {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.status,
                    run.workflow_id,
                    run.id
                );
            }
        }
        Commands::Show { run_id } => {
            let runs = open_run_store(&config)?;
            let run_id = RunId::from_str(&run_id);
            let run = runs
                .get_run(&run_id)
                .await?
                .with_context(|| format!("run {} not found", run_id))?;
            print_run(&run);
            for step in runs.list_steps(&run_id).await? {
                let duration = step
                    .duration_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_default();
                println!("  {:<10} {:<20} {:>8}", step.status, step.name, duration);
                if let Some(error) = &step.error {
                    println!("             {}", error);
                }
            }
        }
        Commands::Run {
            workflow,
            input,
            input_file,
            requested_by,
        } => {
            let input = read_input(input.as_deref(), input_file.as_deref())?;
            let (definitions, workflow_id) = resolve_workflow(&config, &workflow)?;
            let engine = build_engine(&config, definitions)?;

            let run = engine.start(&workflow_id, input, requested_by).await?;
            info!(run_id = %run.id, workflow_id = %workflow_id, "Waiting for run");

            let finished = tokio::select! {
                result = engine.wait(&run.id) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!(run_id = %run.id, "Interrupted, cancelling run");
                    engine.cancel(&run.id).await.ok();
                    engine.wait(&run.id).await?
                }
            };

            print_run(&finished);
            if let Some(output) = &finished.output {
                println!("{}", serde_json::to_string_pretty(output)?);
            }
            if finished.status != RunStatus::Completed {
                bail!("run {} ended {}", finished.id, finished.status);
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// The default path may be absent; an explicit one must exist.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if path == Path::new(DEFAULT_CONFIG) {
        info!("No weft.toml found, using defaults");
        return Ok(AppConfig::default());
    }
    bail!("config file not found: {}", path.display())
}

fn read_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(WorkflowDefinition::from_json(&text)?)
}

/// `--input-file` first, then `--input` keys on top.
fn read_input(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Map<String, Value>> {
    let mut input = Map::new();
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        input.extend(parse_object(&text)?);
    }
    if let Some(text) = inline {
        input.extend(parse_object(text)?);
    }
    Ok(input)
}

fn parse_object(text: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(text).context("run input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("run input must be a JSON object"),
    }
}

/// A path to an existing file runs that definition; anything else is an id.
fn resolve_workflow(
    config: &AppConfig,
    workflow: &str,
) -> anyhow::Result<(Arc<dyn DefinitionStore>, String)> {
    let path = Path::new(workflow);
    if path.is_file() {
        let definition = read_definition(path)?;
        let id = definition.id.clone();
        let store = InMemoryDefinitionStore::with_definitions([definition])?;
        return Ok((Arc::new(store), id));
    }
    let store = FileDefinitionStore::new(config.workflows_dir());
    Ok((Arc::new(store), workflow.to_string()))
}

fn open_run_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RunStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteRunStore::open(&config.database_path())?),
        StorageBackend::Memory => Arc::new(InMemoryRunStore::new()),
    })
}

/// Wire boundaries, registry, stores, and engine from config.
fn build_engine(
    config: &AppConfig,
    definitions: Arc<dyn DefinitionStore>,
) -> anyhow::Result<Engine> {
    let mut services = StepServices::unconfigured()
        .with_http(Arc::new(ReqwestHttpClient::new(&config.http)?))
        .with_scripts(Arc::new(RhaiEvaluator::new(&config.script)));

    match &config.model {
        Some(model) => {
            let chat = weft_llm::build_chat_model(model, &config.fallback_models)?;
            info!(provider = %model.provider, model = %model.model_id, "Chat model configured");
            services = services.with_chat(chat);
        }
        None => info!("No [model] section, llm_chat steps are disabled"),
    }

    if let Some(embedding) = &config.embedding {
        let embedder = Arc::new(HttpEmbeddingProvider::from_config(embedding)?);
        let knowledge = match config.storage.backend {
            StorageBackend::Sqlite => SqliteKnowledgeBase::open(&config.database_path(), embedder)?,
            StorageBackend::Memory => SqliteKnowledgeBase::in_memory(embedder)?,
        };
        services = services.with_knowledge(Arc::new(knowledge));
    }

    let registry = Arc::new(StepRegistry::with_builtins(&services));
    let runs = open_run_store(config)?;
    let events = Arc::new(EventBus::new(config.engine.event_capacity));

    let mut engine = Engine::new(registry, definitions, runs).with_events(events);
    if config.log.enabled {
        engine = engine.with_run_logger(RunLogger::new(config.log_dir(), config.log.level));
    }
    Ok(engine)
}

fn print_run(run: &Run) {
    println!("Run {} ({} v{})", run.id, run.workflow_id, run.workflow_version);
    match run.duration_ms {
        Some(ms) => println!("  status: {} in {}ms", run.status, ms),
        None => println!("  status: {}", run.status),
    }
    if let Some(error) = &run.error {
        println!("  error: {}", error);
    }
}
