//! Stackwright CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stackwright::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use stackwright::config::{
    ConfigHasher, DeclarationLoader, Manifest, ManifestValidator, ValidationReport,
    find_manifest_file,
};
use stackwright::context::RunContext;
use stackwright::error::{ConfigError, Result};
use stackwright::graph::DependencyGraph;
use stackwright::provider::create_provider;
use stackwright::reconciler::{Reconciler, RunReport};
use stackwright::state::{RunLock, STATE_DIR, StateStore, create_store, generate_holder_id};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for errors that stop a run before any node is attempted.
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Installs the tracing subscriber on stderr.
///
/// `RUST_LOG` wins over the default `info` level; `--verbose` forces `debug`.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let files = cli.files;

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force, &formatter),
        Commands::Validate { warnings } => cmd_validate(&files, warnings, &formatter),
        Commands::Graph => cmd_graph(&files, &formatter),
        Commands::Plan { refresh, detailed } => {
            cmd_plan(&files, refresh, detailed, &formatter).await
        }
        Commands::Apply {
            yes,
            refresh,
            parallelism,
        } => cmd_apply(&files, yes, refresh, parallelism, &formatter).await,
        Commands::Destroy { yes, parallelism } => {
            cmd_destroy(&files, yes, parallelism, &formatter).await
        }
        Commands::Drift => cmd_drift(&files, &formatter).await,
        Commands::Outputs => cmd_outputs(&files, &formatter).await,
        Commands::State { command } => cmd_state(&files, command, &formatter).await,
    }
}

/// Writes a starter manifest.
fn cmd_init(path: &Path, force: bool, formatter: &OutputFormatter) -> Result<u8> {
    info!("Initializing new stack in: {}", path.display());

    let manifest_path = path.join("stackwright.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && manifest_path.exists() {
        eprintln!("Manifest already exists: {}", manifest_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(1);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&manifest_path, include_str!("../templates/stackwright.yaml"))?;
    eprintln!("Created: {}", manifest_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# stackwright")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    emit(&formatter.message("success", "Stack initialized"));
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set STACKWRIGHT_PROVIDER_TOKEN");
    eprintln!("  2. Edit stackwright.yaml");
    eprintln!("  3. Run 'stackwright plan' to see what will be created");
    eprintln!("  4. Run 'stackwright apply' to create it");
    Ok(0)
}

fn cmd_validate(files: &[PathBuf], show_warnings: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (manifest, graph, report) = load_workspace(files)?;
    emit(&formatter.format_validation(&manifest, &graph, &report, show_warnings));
    Ok(0)
}

fn cmd_graph(files: &[PathBuf], formatter: &OutputFormatter) -> Result<u8> {
    let (_, graph, _) = load_workspace(files)?;
    emit(&formatter.format_graph(&graph));
    Ok(0)
}

async fn cmd_plan(
    files: &[PathBuf],
    refresh: bool,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (manifest, graph, _) = load_workspace(files)?;
    let ctx = RunContext::from_manifest(&manifest);
    let ctx = if refresh { ctx.with_refresh(true) } else { ctx };
    let reconciler = open_reconciler(&manifest, ctx).await?;

    let plan = reconciler.plan(&manifest, &graph).await?;
    emit(&formatter.format_plan(&plan, detailed));
    Ok(0)
}

async fn cmd_apply(
    files: &[PathBuf],
    auto_approve: bool,
    refresh: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (manifest, graph, _) = load_workspace(files)?;
    let mut ctx = RunContext::from_manifest(&manifest);
    if refresh {
        ctx = ctx.with_refresh(true);
    }
    if let Some(parallelism) = parallelism {
        ctx = ctx.with_parallelism(parallelism);
    }
    let reconciler = open_reconciler(&manifest, ctx).await?;

    let plan = reconciler.plan(&manifest, &graph).await?;
    if plan.has_changes() {
        if !formatter.is_json() {
            emit(&formatter.format_plan(&plan, false));
        }
        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(0);
        }
    } else {
        debug!("Plan has no changes; applying to refresh records and outputs");
    }

    let report = with_lock(&reconciler, reconciler.apply(&manifest, &graph)).await?;
    emit(&formatter.format_report(&report));
    Ok(report.exit_code())
}

async fn cmd_destroy(
    files: &[PathBuf],
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (manifest, _, _) = load_workspace(files)?;
    let mut ctx = RunContext::from_manifest(&manifest);
    if let Some(parallelism) = parallelism {
        ctx = ctx.with_parallelism(parallelism);
    }
    let reconciler = open_reconciler(&manifest, ctx).await?;

    let state = reconciler.load_state().await?;
    if state.records.is_empty() {
        emit(&formatter.message("success", "Nothing to destroy"));
        return Ok(0);
    }

    if !auto_approve {
        eprintln!("The following resources will be deleted:");
        for record in state.records.values() {
            eprintln!("  - {} ({} {})", record.name, record.kind, record.provider_id);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destroy cancelled.");
            return Ok(0);
        }
    }

    let manifest_hash = ConfigHasher::new().hash_manifest(&manifest);
    let report = with_lock(&reconciler, reconciler.destroy(&manifest_hash)).await?;
    emit(&formatter.format_report(&report));
    Ok(report.exit_code())
}

async fn cmd_drift(files: &[PathBuf], formatter: &OutputFormatter) -> Result<u8> {
    let (manifest, _, _) = load_workspace(files)?;
    let reconciler = open_reconciler(&manifest, RunContext::from_manifest(&manifest)).await?;

    let report = reconciler.check_drift().await?;
    emit(&formatter.format_drift(&report));
    Ok(u8::from(report.has_drift()))
}

async fn cmd_outputs(files: &[PathBuf], formatter: &OutputFormatter) -> Result<u8> {
    let (manifest, _, _) = load_workspace(files)?;
    let store = open_store(&manifest).await?;

    let outputs = store
        .load()
        .await?
        .map(|state| state.outputs)
        .unwrap_or_default();
    emit(&formatter.format_outputs(&outputs));
    Ok(0)
}

async fn cmd_state(
    files: &[PathBuf],
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (manifest, _, _) = load_workspace(files)?;
    let store = open_store(&manifest).await?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => emit(&formatter.format_state(&state)),
            None => emit(&formatter.message("warning", "No state found")),
        },
        StateCommands::List => match store.load().await? {
            Some(state) => emit(&formatter.format_records(&state)),
            None => emit(&formatter.message("warning", "No state found")),
        },
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            emit(&formatter.message(
                "success",
                &format!("State locked: {} (holder {})", lock.lock_id, lock.holder),
            ));
        }
        StateCommands::Unlock { lock_id, force } => {
            let lock_id = if force {
                store.get_lock_info().await?.map(|info| info.lock_id)
            } else {
                Some(lock_id.ok_or_else(|| {
                    ConfigError::validation("Provide --lock-id or use --force", "lock_id")
                })?)
            };
            match lock_id {
                Some(id) => {
                    store.release_lock(&id).await?;
                    emit(&formatter.message("success", "State unlocked"));
                }
                None => emit(&formatter.message("warning", "State is not locked")),
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads, validates and builds the graph for the selected manifest files.
fn load_workspace(files: &[PathBuf]) -> Result<(Manifest, DependencyGraph, ValidationReport)> {
    let paths = if files.is_empty() {
        vec![find_manifest_file(".")?]
    } else {
        files.to_vec()
    };

    let base = paths
        .first()
        .map(|p| {
            if p.is_dir() {
                p.clone()
            } else {
                p.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
            }
        })
        .unwrap_or_else(|| PathBuf::from("."));

    let loader = DeclarationLoader::new().with_base_path(base);
    loader.load_dotenv()?;
    let manifest = loader.load_paths(&paths)?;

    let report = ManifestValidator::new().validate(&manifest)?;
    for warning in &report.warnings {
        warn!("{warning}");
    }

    let graph = DependencyGraph::build(&manifest.resources)?;
    debug!(
        nodes = graph.len(),
        edges = graph.edge_count(),
        "Dependency graph built"
    );
    Ok((manifest, graph, report))
}

async fn open_store(manifest: &Manifest) -> Result<Arc<dyn StateStore>> {
    create_store(&manifest.state, &manifest.project.name, &manifest.project.stack).await
}

async fn open_reconciler(manifest: &Manifest, ctx: RunContext) -> Result<Reconciler> {
    let provider = create_provider(&manifest.provider)?;
    let store = open_store(manifest).await?;
    Ok(Reconciler::new(ctx, provider, store))
}

/// Runs `operation` while holding the store lock. The lock is released
/// whether or not the run succeeds.
///
/// For the duration of the run the first Ctrl-C cancels it: nothing new is
/// scheduled and in-flight calls finish. A second Ctrl-C exits immediately.
async fn with_lock(
    reconciler: &Reconciler,
    operation: impl std::future::Future<Output = Result<RunReport>>,
) -> Result<RunReport> {
    let store = reconciler.store();
    let lock = RunLock::acquire(store.clone()).await?;

    let cancel = reconciler.context().cancel.clone();
    let interrupts = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received; finishing in-flight calls (Ctrl-C again to exit now)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted again; exiting without waiting. State may lag the provider.");
            std::process::exit(130);
        }
    });

    let result = operation.await;
    interrupts.abort();
    if let Err(e) = lock.release(&**store).await {
        error!("Failed to release run lock: {e}");
    }
    result
}

fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn emit(output: &str) {
    println!("{}", output.trim_end());
}
