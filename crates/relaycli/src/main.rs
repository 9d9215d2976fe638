// crates/relaycli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{PlanningOracle, StatusSnapshot, WorkflowId, WorkflowStatus};
use relayproviders::{build_orchestrator, OrchestratorConfig};
use relayruntime::{Orchestrator, StaticPlanOracle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay workflow orchestrator CLI", long_about = None)]
struct Cli {
    /// Provider configuration file (defaults to the built-in providers)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow of a known type
    Run {
        /// Workflow type: data_processing, analysis, report_generation or analysis_pipeline
        #[arg(short = 't', long = "type")]
        workflow_type: String,

        /// Initial data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Seconds to wait for the workflow to settle
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Plan a workflow from a task description and run it
    Plan {
        /// What the workflow should accomplish
        #[arg(long)]
        task: String,

        /// Available data as a JSON object
        #[arg(short, long)]
        data: Option<String>,

        /// Read the plan from a file instead of asking the configured planner
        #[arg(long)]
        plan_file: Option<PathBuf>,

        /// Seconds to wait for the workflow to settle
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// List configured providers
    Providers,

    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "relay.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            workflow_type,
            input,
            timeout,
        } => {
            let config = load_config(cli.config)?;
            run_workflow(&config, &workflow_type, input, timeout).await?;
        }

        Commands::Plan {
            task,
            data,
            plan_file,
            timeout,
        } => {
            let config = load_config(cli.config)?;
            plan_workflow(&config, &task, data, plan_file, timeout).await?;
        }

        Commands::Providers => {
            let config = load_config(cli.config)?;
            list_providers(&config)?;
        }

        Commands::Init { output } => {
            create_example_config(output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            OrchestratorConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            debug!("No config given, using the built-in providers");
            OrchestratorConfig::default()
        }
    };
    debug!(
        "Config names {} providers, planner: {}",
        config.providers.len(),
        config.planner.is_some()
    );
    Ok(config)
}

fn parse_object(text: Option<String>, what: &str) -> Result<serde_json::Value> {
    let Some(text) = text else {
        return Ok(serde_json::json!({}));
    };
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", what))?;
    if !value.is_object() {
        bail!("{} must be a JSON object", what);
    }
    Ok(value)
}

async fn run_workflow(
    config: &OrchestratorConfig,
    workflow_type: &str,
    input: Option<String>,
    timeout: u64,
) -> Result<()> {
    let initial_data = parse_object(input, "input")?;
    let (orchestrator, _) = build_orchestrator(config)?;

    let notices = orchestrator.subscribe();
    let id = orchestrator.start_workflow(workflow_type, initial_data).await?;
    info!(workflow_id = %id, "Submitted {} workflow", workflow_type);
    println!("▶️  Started {} workflow {}", workflow_type, id);

    follow(&orchestrator, id, notices, timeout).await
}

async fn plan_workflow(
    config: &OrchestratorConfig,
    task: &str,
    data: Option<String>,
    plan_file: Option<PathBuf>,
    timeout: u64,
) -> Result<()> {
    let available_data = parse_object(data, "data")?;
    let (orchestrator, configured) = build_orchestrator(config)?;

    let oracle: Box<dyn PlanningOracle> = match (plan_file, configured) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            debug!("Using plan from {}", path.display());
            Box::new(StaticPlanOracle::new(text))
        }
        (None, Some(oracle)) => {
            debug!("Asking the configured planner");
            Box::new(oracle)
        }
        (None, None) => bail!("no planner configured; pass --plan-file or add a planner to the config"),
    };

    println!("🧭 Planning: {}", task);
    let notices = orchestrator.subscribe();
    let id = orchestrator
        .start_planned_workflow(task, available_data, oracle.as_ref())
        .await?;

    // The processor may already be under way, so rebuild the plan from all three parts
    let record = orchestrator.workflow_record(id).await?;
    let plan: Vec<String> = record
        .completed_step_labels
        .iter()
        .cloned()
        .chain(record.current_step.iter().map(|step| step.label()))
        .chain(record.pending_steps.iter().map(|step| step.label()))
        .collect();
    println!("📋 Plan accepted with {} steps:", plan.len());
    for label in &plan {
        println!("   • {}", label);
    }
    println!();

    follow(&orchestrator, id, notices, timeout).await
}

/// Print notices for `id` until it settles, then the final snapshot
async fn follow(
    orchestrator: &Arc<Orchestrator>,
    id: WorkflowId,
    mut notices: tokio::sync::broadcast::Receiver<relaycore::StatusChange>,
    timeout: u64,
) -> Result<()> {
    let printer = tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            if notice.workflow_id != id {
                continue;
            }
            let step = notice.step.unwrap_or_default();
            match notice.status {
                WorkflowStatus::Running => println!("  ⚡ Running {}", step),
                WorkflowStatus::Error => println!("  ❌ Error in {}", step),
                WorkflowStatus::Retrying => println!("  🔁 Retrying {}", step),
                WorkflowStatus::Completed => println!("  ✅ Completed"),
                WorkflowStatus::Initializing => {}
            }
        }
    });

    let snapshot = orchestrator
        .wait_for(id, Duration::from_secs(timeout))
        .await?;
    if !matches!(snapshot.status, WorkflowStatus::Completed | WorkflowStatus::Error) {
        warn!(workflow_id = %id, "Workflow not settled after {}s", timeout);
    }

    // Let the printer drain what is already queued
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    let results = orchestrator.workflow_results(id).await?;
    print_summary(&snapshot);
    if !results.is_empty() {
        println!();
        println!("📤 Results:");
        for label in &snapshot.steps_completed {
            if let Some(result) = results.get(label) {
                println!("   {}: {}", label, result);
            }
        }
    }

    orchestrator.shutdown().await;

    match snapshot.status {
        WorkflowStatus::Completed => Ok(()),
        WorkflowStatus::Error => bail!(
            "workflow halted: {}",
            snapshot.last_error.unwrap_or_else(|| "unknown error".to_string())
        ),
        other => bail!("workflow still {} after {}s", other, timeout),
    }
}

fn print_summary(snapshot: &StatusSnapshot) {
    println!();
    println!("📊 Workflow Summary:");
    println!("   ID: {}", snapshot.workflow_id);
    println!("   Type: {}", snapshot.workflow_type);
    println!("   Status: {}", snapshot.status);
    println!("   Steps completed: {}", snapshot.steps_completed.len());
    println!("   Pending: {}", snapshot.pending_count);
    println!("   Elapsed: {}ms", snapshot.elapsed_ms);
    if snapshot.retry_count > 0 {
        println!("   Retries: {}", snapshot.retry_count);
    }
}

fn list_providers(config: &OrchestratorConfig) -> Result<()> {
    println!("📦 Configured Providers:");
    println!();

    let registry = relayproviders::build_registry(config)?;
    for summary in registry.summaries() {
        match registry.get_metadata(&summary.name) {
            Some(metadata) => {
                println!("  • {} ({})", summary.name, metadata.transport);
                if !metadata.description.is_empty() {
                    println!("    {}", metadata.description);
                }
            }
            None => println!("  • {}", summary.name),
        }
        println!("    operations: {}", summary.operations.join(", "));
    }

    if let Some(planner) = &config.planner {
        println!();
        println!("🧭 Planner: {}.{}", planner.provider, planner.operation);
    }
    Ok(())
}

fn create_example_config(output: PathBuf) -> Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }

    let json = serde_json::to_string_pretty(&OrchestratorConfig::example())?;
    std::fs::write(&output, json)?;

    println!("✨ Created example config: {}", output.display());
    println!();
    println!("Run a workflow with:");
    println!(
        "  relay run --config {} --type data_processing --input '{{\"source\": \"sales.csv\"}}'",
        output.display()
    );

    Ok(())
}
