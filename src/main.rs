use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sagacore::config::CliConfig;
use sagacore::fakes::{ConservativeRepairAnalyzer, EchoToolInvoker, LoggingPublisher, NoOpCorrectionOracle};
use sagacore_common::{ExecutionState, Intent, Plan, TaskState, TaskStatus};
use sagacore_runtime::{
    CheckpointStore, DagConfig, DagExecutor, KvStore, PlanValidator, SagaCoordinator, SegmentOutcome, Sweeper,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sagacore")]
#[command(version, about = "Durable saga workflow orchestration core")]
struct Cli {
    /// Project directory; `.sagacore/` is created under it for durable state.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Override the SQLite state file (defaults to `.sagacore/state.db`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit structured JSON logs instead of the default compact format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and execute a plan from a JSON file.
    Run {
        /// Path to a JSON-encoded `Plan`.
        plan_file: PathBuf,
        /// Execution id to use; generated if omitted.
        #[arg(long)]
        execution_id: Option<String>,
        /// Free-text description of the intent being executed.
        #[arg(long, default_value = "cli-run")]
        raw_text: String,
    },
    /// Resume a previously yielded or stuck execution.
    Resume {
        execution_id: String,
    },
    /// Print the current state of an execution.
    Status {
        execution_id: String,
    },
    /// Cancel a running execution; the scheduler observes this at the top
    /// of its next loop iteration and stops dispatching new steps.
    Cancel {
        execution_id: String,
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
    /// Run one pass of the recovery sweeper over stuck tasks.
    Sweep,
}

fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    let config = CliConfig::new(&project_dir, cli.db.clone())?;

    match &cli.command {
        Commands::Run {
            plan_file,
            execution_id,
            raw_text,
        } => cmd_run(&config, plan_file, execution_id.clone(), raw_text).await,
        Commands::Resume { execution_id } => cmd_resume(&config, execution_id).await,
        Commands::Status { execution_id } => cmd_status(&config, execution_id),
        Commands::Cancel { execution_id, reason } => cmd_cancel(&config, execution_id, reason),
        Commands::Sweep => cmd_sweep(&config).await,
    }
}

fn load_plan(plan_file: &std::path::Path) -> Result<Plan> {
    let raw = std::fs::read_to_string(plan_file)
        .with_context(|| format!("failed to read plan file {}", plan_file.display()))?;
    let plan: Plan = serde_json::from_str(&raw).context("plan file is not a valid Plan document")?;
    PlanValidator::validate(&plan).with_context(|| format!("plan {} failed validation", plan.id))?;
    Ok(plan)
}

async fn cmd_run(config: &CliConfig, plan_file: &std::path::Path, execution_id: Option<String>, raw_text: &str) -> Result<()> {
    let plan = load_plan(plan_file)?;
    let execution_id = execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let runtime_config = config.runtime_config();
    let kv = KvStore::open(&config.db_path)?;
    let checkpoints = CheckpointStore::new(&kv, &runtime_config);

    let intent = Intent::new(uuid::Uuid::new_v4().to_string(), "cli_run", raw_text, 1.0);
    let plan_for_state = plan.clone();
    checkpoints.save_state_with_occ(
        &execution_id,
        || ExecutionState::new(&execution_id, intent.clone()),
        |s| s.status = sagacore_common::ExecutionStatus::Parsing,
    )?;
    checkpoints.save_state_with_occ(&execution_id, || unreachable!(), |s| s.status = sagacore_common::ExecutionStatus::Parsed)?;
    checkpoints.save_state_with_occ(&execution_id, || unreachable!(), |s| s.status = sagacore_common::ExecutionStatus::Planning)?;
    checkpoints.save_state_with_occ(&execution_id, || unreachable!(), |s| {
        s.status = sagacore_common::ExecutionStatus::Planned;
        s.plan = Some(plan_for_state.clone());
    })?;

    let task = TaskState::new(&execution_id, plan.steps.len(), checkpoints.get_execution_state(&execution_id)?.unwrap());
    checkpoints.create_task_state(&task)?;

    let invoker: Arc<dyn sagacore_runtime::ToolInvoker> = Arc::new(EchoToolInvoker);
    let oracle: Arc<dyn sagacore_runtime::CorrectionOracle> = Arc::new(NoOpCorrectionOracle);
    let executor = DagExecutor::new(&runtime_config, DagConfig::default(), &checkpoints, invoker.clone(), oracle);

    match executor.execute(&execution_id, &plan, 0).await? {
        SegmentOutcome::Finished(state) => report_finished(&checkpoints, &execution_id, &invoker, state).await,
        SegmentOutcome::Yielded { next_start_step_index, .. } => {
            checkpoints.schedule_resume(&execution_id, &plan.id, next_start_step_index, 1, &execution_id, chrono::Duration::seconds(2))?;
            println!("execution {execution_id} yielded at step {next_start_step_index}; run `sagacore resume {execution_id}` to continue");
            Ok(())
        }
    }
}

/// Transitions `TaskState` to a terminal status, tolerating a task that's
/// already terminal (e.g. cancelled out from under a run already in
/// flight) rather than erroring on the redundant transition.
fn finalize_task_state(checkpoints: &CheckpointStore<'_>, execution_id: &str, to: TaskStatus, reason: &str) -> Result<()> {
    if let Some(task) = checkpoints.get_task_state(execution_id)? {
        if !task.status.is_terminal() {
            checkpoints.transition_task_state(execution_id, to, reason)?;
        }
    }
    Ok(())
}

async fn report_finished(
    checkpoints: &CheckpointStore<'_>,
    execution_id: &str,
    invoker: &Arc<dyn sagacore_runtime::ToolInvoker>,
    state: ExecutionState,
) -> Result<()> {
    if state.status == sagacore_common::ExecutionStatus::Cancelled {
        finalize_task_state(checkpoints, execution_id, TaskStatus::Cancelled, "execution cancelled")?;
        println!("execution {execution_id} was cancelled");
        return Ok(());
    }

    let any_failed = state
        .step_states
        .iter()
        .any(|s| matches!(s.status, sagacore_common::StepStatus::Failed | sagacore_common::StepStatus::Timeout));

    if any_failed {
        checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| s.status = sagacore_common::ExecutionStatus::Failed)?;
        finalize_task_state(checkpoints, execution_id, TaskStatus::Failed, "step failure")?;
        let saga = SagaCoordinator::new(checkpoints, invoker.as_ref(), Duration::from_secs(30));
        let result = saga.compensate(execution_id).await?;
        println!("execution {execution_id} failed; compensation result: {result:?}");
    } else {
        checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| s.status = sagacore_common::ExecutionStatus::Completed)?;
        finalize_task_state(checkpoints, execution_id, TaskStatus::Completed, "all steps completed")?;
        println!("execution {execution_id} completed successfully");
    }
    Ok(())
}

async fn cmd_resume(config: &CliConfig, execution_id: &str) -> Result<()> {
    let runtime_config = config.runtime_config();
    let kv = KvStore::open(&config.db_path)?;
    let checkpoints = CheckpointStore::new(&kv, &runtime_config);

    let state = checkpoints
        .get_execution_state(execution_id)?
        .ok_or_else(|| anyhow::anyhow!("no such execution: {execution_id}"))?;
    let plan = state
        .plan
        .clone()
        .ok_or_else(|| anyhow::anyhow!("execution {execution_id} has no plan set"))?;
    let start_index = state
        .step_states
        .iter()
        .position(|s| !s.status.is_terminal())
        .unwrap_or(state.step_states.len());

    if state.status != sagacore_common::ExecutionStatus::Executing {
        checkpoints.save_state_with_occ(execution_id, || state.clone(), |s| s.status = sagacore_common::ExecutionStatus::Executing)?;
    }

    let invoker: Arc<dyn sagacore_runtime::ToolInvoker> = Arc::new(EchoToolInvoker);
    let oracle: Arc<dyn sagacore_runtime::CorrectionOracle> = Arc::new(NoOpCorrectionOracle);
    let executor = DagExecutor::new(&runtime_config, DagConfig::default(), &checkpoints, invoker.clone(), oracle);

    match executor.execute(execution_id, &plan, start_index).await? {
        SegmentOutcome::Finished(state) => report_finished(&checkpoints, execution_id, &invoker, state).await,
        SegmentOutcome::Yielded { next_start_step_index, .. } => {
            let next_segment_number = checkpoints
                .get_task_state(execution_id)?
                .map(|t| t.segment_number + 1)
                .unwrap_or(1);
            checkpoints.schedule_resume(execution_id, &plan.id, next_start_step_index, next_segment_number, execution_id, chrono::Duration::seconds(2))?;
            println!("execution {execution_id} yielded again at step {next_start_step_index}");
            Ok(())
        }
    }
}

fn cmd_cancel(config: &CliConfig, execution_id: &str, reason: &str) -> Result<()> {
    let runtime_config = config.runtime_config();
    let kv = KvStore::open(&config.db_path)?;
    let checkpoints = CheckpointStore::new(&kv, &runtime_config);

    checkpoints
        .transition_task_state(execution_id, TaskStatus::Cancelled, reason)
        .with_context(|| format!("failed to cancel execution {execution_id}"))?;
    println!("execution {execution_id} marked cancelled; the running scheduler will observe it at its next iteration");
    Ok(())
}

fn cmd_status(config: &CliConfig, execution_id: &str) -> Result<()> {
    let runtime_config = config.runtime_config();
    let kv = KvStore::open(&config.db_path)?;
    let checkpoints = CheckpointStore::new(&kv, &runtime_config);

    let Some(state) = checkpoints.get_execution_state(execution_id)? else {
        bail!("no such execution: {execution_id}");
    };

    println!("execution {execution_id}: {:?}", state.status);
    for step in &state.step_states {
        println!("  {} -> {:?}", step.step_id, step.status);
    }

    if let Some(task) = checkpoints.get_task_state(execution_id)? {
        println!("task status: {:?} (segment {})", task.status, task.segment_number);
    }
    Ok(())
}

async fn cmd_sweep(config: &CliConfig) -> Result<()> {
    let runtime_config = config.runtime_config();
    let kv = KvStore::open(&config.db_path)?;
    let checkpoints = CheckpointStore::new(&kv, &runtime_config);

    let publisher: Arc<dyn sagacore_runtime::Publisher> = Arc::new(LoggingPublisher);
    let sweeper = Sweeper::new(&checkpoints, &runtime_config, Arc::new(ConservativeRepairAnalyzer), publisher);
    let outcomes = sweeper.tick().await?;
    if outcomes.is_empty() {
        println!("no stuck executions found");
    } else {
        for (execution_id, action) in outcomes {
            println!("{execution_id}: {action:?}");
        }
    }
    Ok(())
}
