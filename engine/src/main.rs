//! Thin CLI binary (§6 AMBIENT CLI binary): loads the layered config, builds
//! a `Planner`/`Scheduler`/`Dispatcher`, runs the plan once, and maps the
//! outcome to an exit code. Mirrors the teacher's `engine/src/main.rs` use of
//! `clap::Parser`, but the binary itself does not serve requests or render
//! output formats — it prints the structured run result as JSON and leaves
//! `table`/`markdown`/`sarif` rendering to an external collaborator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use visor_core::{ConfigStore, Engine, EngineOptions, Planner};
use visor_memory::{Backend, FileFormat, MemoryStore};
use visor_observability::{init_process_logging, ProcessKind};
use visor_providers::{Dispatcher, ProviderRegistry};
use visor_session::SessionRegistry;
use visor_types::{Event, EventType};
use visor_workspace::WorkspaceManager;

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "lowercase")]
enum OutputFormat {
    Table,
    Json,
    Markdown,
    Sarif,
}

#[derive(Parser, Debug)]
#[command(name = "visor")]
#[command(about = "Runs the declared checks for the current event and reports the result")]
struct Cli {
    /// Run only this check (and its transitive dependencies). Repeatable.
    #[arg(long = "check")]
    check: Vec<String>,

    /// How the caller wants the result shaped; this binary always emits the
    /// structured JSON envelope and tags it with the requested format for a
    /// downstream renderer to pick up.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[arg(long, default_value = "visor.yaml")]
    config: PathBuf,

    #[arg(long)]
    max_parallelism: Option<usize>,

    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl OutputFormat {
    fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Sarif => "sarif",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    std::env::set_var("RUST_LOG", verbosity_filter(cli.verbose));

    let logs_dir = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("visor")
        .join("logs");
    let _guard = init_process_logging(ProcessKind::Engine, &logs_dir, 7).ok();

    match run(cli).await {
        Ok(exit_code) => exit_code,
        Err(err) => {
            tracing::error!(error = %err, "run aborted");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let store = ConfigStore::load(&cli.config).await?;
    let mut overlay = json!({});
    if let Some(max_parallelism) = cli.max_parallelism {
        overlay["max_parallelism"] = json!(max_parallelism);
    }
    if cli.fail_fast {
        overlay["fail_fast"] = json!(true);
    }
    let store = store.with_runtime_override(overlay);
    let effective = store.effective()?;

    let event = Event::new(EventType::Manual);
    let steps = effective.normalized_steps();
    let plan = Planner::plan(&steps, &event, &effective.tag_filter, &cli.check, &event.files_changed)
        .map_err(visor_core::SchedulerError::from)?;

    let memory = build_memory(&effective.memory).await?;
    let workspace_dir = effective
        .workspace
        .base_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("visor-runs"));
    let workspace_enabled = effective.workspace.enabled.unwrap_or(true);
    let workspace = if workspace_enabled {
        WorkspaceManager::with_base_dir(workspace_dir)
            .prepare(
                &uuid::Uuid::new_v4().to_string(),
                Some(&std::env::current_dir()?),
                effective.workspace.cleanup_on_exit.unwrap_or(true),
            )
            .await
    } else {
        WorkspaceManager::new().prepare("disabled", None, false).await
    };

    let sessions = Arc::new(SessionRegistry::new());
    let dispatcher = Dispatcher::new(Arc::new(ProviderRegistry::with_builtins()));
    let options = EngineOptions {
        max_parallelism: effective.max_parallelism(),
        max_loops: effective.max_loops(),
        fail_fast: cli.fail_fast || effective.fail_fast,
    };

    let engine = Engine::new(&plan, event, dispatcher, memory, sessions, workspace.clone(), options);
    let (groups, stats) = engine.run(&plan).await;
    workspace.cleanup().await.ok();

    let envelope = json!({
        "format": cli.output.as_str(),
        "groups": groups,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if stats.failed > 0 {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::from(0))
    }
}

async fn build_memory(config: &visor_core::MemoryConfig) -> anyhow::Result<visor_memory::MemoryHandle> {
    let backend = match config.mode.as_deref() {
        Some("file") => {
            let path = config
                .path
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".visor/memory.json"));
            let format = match config.format.as_deref() {
                Some("csv") => FileFormat::Csv,
                _ => FileFormat::Json,
            };
            Backend::File { path, format }
        }
        _ => Backend::InMemory,
    };
    Ok(MemoryStore::new(backend).await?)
}
