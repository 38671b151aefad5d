use anyhow::{bail, Context, Result};
use pipeworks::cli::commands::{
    DryRunCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand,
};
use pipeworks::cli::output::*;
use pipeworks::cli::{Cli, Command};
use pipeworks::core::config::DEFAULT_LLM_HANDLE;
use pipeworks::core::{ExecutionStatus, PipeLibrary, Stuff, StuffContent, WorkingMemory};
use pipeworks::execution::{EngineConfig, PipeEngine, PipeOutput};
use pipeworks::persistence::{
    create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
    SqliteExecutionStore,
};
use pipeworks::worker::{CommandLlmWorker, StaticWorkerRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config {}", path))?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Validate(cmd) => validate_library(cmd, config)?,
        Command::DryRun(cmd) => dry_run_library(cmd, config).await?,
        Command::Run(cmd) => run_pipe(cmd, config).await?,
        Command::List(cmd) => list_pipes(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_library(files: &[String]) -> Result<PipeLibrary> {
    let library = PipeLibrary::from_files(files).context("Failed to load domain files")?;
    println!(
        "{} Loaded {} pipes from {}",
        INFO,
        style(library.len()).cyan(),
        style(library.domains().join(", ")).bold()
    );
    Ok(library)
}

fn validate_library(cmd: &ValidateCommand, config: EngineConfig) -> Result<()> {
    println!("{} Validating domain files...", INFO);

    let library = match load_library(&cmd.files) {
        Ok(library) => library,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };
    let engine = PipeEngine::new(library, Arc::new(StaticWorkerRegistry::new()), config)?;

    let mut failures = Vec::new();
    for code in engine.library().codes() {
        match engine.compile(code) {
            Ok(pipe) => println!(
                "  {} {} {}",
                CHECK,
                style(code).bold(),
                style(pipe.kind_name()).dim()
            ),
            Err(e) => {
                println!("  {} {}: {}", CROSS, style(code).bold(), style(&e).red());
                failures.push(serde_json::json!({ "pipe": code, "error": e.to_string() }));
            }
        }
    }

    if cmd.json {
        let data = serde_json::json!({
            "pipes": engine.library().len(),
            "failures": failures,
        });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    if !failures.is_empty() {
        println!("{} {} pipes failed to compile", CROSS, failures.len());
        std::process::exit(1);
    }
    println!("{} All pipes compile", CHECK);
    Ok(())
}

async fn dry_run_library(cmd: &DryRunCommand, config: EngineConfig) -> Result<()> {
    let library = load_library(&cmd.files)?;
    let engine = PipeEngine::new(library, Arc::new(StaticWorkerRegistry::new()), config)?;

    let progress = create_progress_bar(engine.library().len());
    let report = engine
        .dry_run_pipes_with_progress(false, |code, output| {
            progress.set_message(code.to_string());
            progress.println(format_dry_run_result(code, output));
            progress.inc(1);
        })
        .await?;
    progress.finish_and_clear();

    let failed = report.values().filter(|o| !o.is_success()).count();
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if failed == 0 {
        println!(
            "\n{} {} pipes passed the dry run",
            CHECK,
            style(report.len()).green()
        );
    } else {
        println!(
            "\n{} {} of {} pipes {}",
            CROSS,
            style(failed).red(),
            report.len(),
            style("failed the dry run").red()
        );
        if cmd.raise {
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run_pipe(cmd: &RunCommand, config: EngineConfig) -> Result<()> {
    let library = load_library(&cmd.files)?;

    let mut workers = StaticWorkerRegistry::new();
    if let Some(command) = &cmd.llm_command {
        let Some(worker) = CommandLlmWorker::from_command_line(command) else {
            bail!("--llm-command must not be empty");
        };
        println!(
            "{} Language model worker: {}",
            INFO,
            style(worker.program()).cyan()
        );
        workers = workers.with_llm(DEFAULT_LLM_HANDLE, Arc::new(worker));
    }

    let engine = PipeEngine::new(library, Arc::new(workers), config)?;
    let pipe = engine.compile(&cmd.pipe)?;
    let memory = build_inputs(&engine, &pipe, &cmd.input)?;

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        Arc::new(SqliteExecutionStore::with_default_path().await?)
    };

    engine.add_event_handler(|event| println!("{}", format_execution_event(&event)));

    // Ctrl-C cancels the run instead of killing the process mid-write
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            on_signal.cancel();
        }
    });

    println!();
    let output = engine
        .run_pipe_with_cancel(&cmd.pipe, memory, cancel)
        .await;

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&output)?;
        store.save_execution(&summary).await?;
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    print_run_result(cmd, &output)
}

/// Build the initial memory from `name=value` pairs, typed by the pipe's inputs
fn build_inputs(
    engine: &PipeEngine,
    pipe: &pipeworks::execution::Pipe,
    inputs: &[(String, String)],
) -> Result<WorkingMemory> {
    let registry = engine.library().registry();
    let mut memory = WorkingMemory::new();

    for (name, raw) in inputs {
        let Some(requirement) = pipe.input_requirements().iter().find(|i| &i.name == name) else {
            bail!("Pipe '{}' has no input named '{}'", pipe.code(), name);
        };
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));

        let content = if requirement.multiple {
            let serde_json::Value::Array(items) = &value else {
                bail!("Input '{}' expects a JSON list", name);
            };
            let items = items
                .iter()
                .map(|item| StuffContent::from_json(item, &requirement.concept, registry))
                .collect::<Result<Vec<_>, _>>()?;
            StuffContent::list(requirement.concept.code.clone(), items)
        } else {
            StuffContent::from_json(&value, &requirement.concept, registry)?
        };

        let stuff = Stuff::new(name, &requirement.concept, content, registry)
            .with_context(|| format!("Invalid value for input '{}'", name))?;
        memory.set(name, stuff)?;
    }
    Ok(memory)
}

fn print_run_result(cmd: &RunCommand, output: &PipeOutput) -> Result<()> {
    if cmd.show_memory {
        println!("\n{}", output.working_memory.snapshot().to_json()?);
    }

    match (&output.outcome, output.main_stuff()) {
        (Ok(name), Some(stuff)) => {
            println!(
                "\n{} {} completed {} → {}",
                CHECK,
                style(&cmd.pipe).bold(),
                style("successfully").green(),
                style(name).cyan()
            );
            println!("{}", format_output(&stuff.content.render(), 40));
            Ok(())
        }
        (Ok(name), None) => bail!("Output '{}' is missing from working memory", name),
        (Err(e), _) => {
            let status = if output.state.status == ExecutionStatus::Cancelled {
                style("cancelled").yellow()
            } else {
                style("failed").red()
            };
            println!("\n{} {} {}", CROSS, style(&cmd.pipe).bold(), status);
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn list_pipes(cmd: &ListCommand) -> Result<()> {
    let library = load_library(&cmd.files)?;
    let store = if cmd.with_counts {
        Some(SqliteExecutionStore::with_default_path().await?)
    } else {
        None
    };

    let mut json_data = Vec::new();
    for blueprint in library.blueprints() {
        let inputs: Vec<String> = blueprint
            .inputs
            .iter()
            .map(|(name, concept)| format!("{}: {}", name, concept))
            .collect();
        let signature = format!("({}) -> {}", inputs.join(", "), blueprint.output);

        let runs = match &store {
            Some(store) => Some(store.list_executions(&blueprint.code).await?),
            None => None,
        };

        match &runs {
            Some(runs) => {
                let completed = runs
                    .iter()
                    .filter(|e| e.status == ExecutionStatus::Completed)
                    .count();
                println!(
                    "  {} {} {} ({} runs: {} succeeded)",
                    style(&blueprint.code).bold(),
                    style(blueprint.kind.type_name()).dim(),
                    signature,
                    style(runs.len()).cyan(),
                    style(completed).green()
                );
            }
            None => println!(
                "  {} {} {}",
                style(&blueprint.code).bold(),
                style(blueprint.kind.type_name()).dim(),
                signature
            ),
        }

        json_data.push(serde_json::json!({
            "code": blueprint.code,
            "domain": blueprint.domain,
            "type": blueprint.kind.type_name(),
            "signature": signature,
            "definition": blueprint.definition,
            "execution_count": runs.as_ref().map(Vec::len),
        }));
    }

    if cmd.json {
        let data = serde_json::json!({ "pipes": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteExecutionStore::with_default_path().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id =
            uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipe {
        Some(pipe_code) => store.list_executions(pipe_code).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipe_code in store.list_pipes().await? {
                all_execs.extend(store.list_executions(&pipe_code).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipe: {}", style(&summary.pipe_code).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    if let Some(name) = &summary.output_name {
        println!("  Output: {}", style(name).cyan());
    }
    if let Some(error) = &summary.error {
        println!("  Error: {}", style(error).red());
    }

    if verbose {
        if let Some(snapshot) = &summary.snapshot_json {
            println!("\n  {}", style("Working memory:").bold());
            for line in snapshot.lines() {
                println!("    {}", line);
            }
        }
    }

    Ok(())
}
