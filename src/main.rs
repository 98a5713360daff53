//! Landing zone CLI entrypoint.
//!
//! This is the main entrypoint for the landing-zone command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use landing_zone::cli::{Cli, Commands, LedgerCommands, MessageKind, OutputFormatter};
use landing_zone::cloud::{ArmClient, CloudClient, InMemoryCloud};
use landing_zone::config::{ConfigParser, ConfigValidator, LoadedConfig, find_config_file};
use landing_zone::error::{LandingZoneError, Result};
use landing_zone::planner::Applier;
use landing_zone::provisioner::{CompiledPlan, Provisioner};
use landing_zone::state::{LEDGER_DIR, LedgerStore};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set. Logs go to stderr so JSON
/// output on stdout stays parseable.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

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

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => {
            cmd_validate(cli.config.as_ref(), warnings, &formatter).await
        }
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply {
            yes,
            simulate,
            concurrency,
        } => cmd_apply(cli.config.as_ref(), yes, simulate, concurrency, &formatter).await,
        Commands::Ledger { command } => cmd_ledger(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Writes a starter configuration.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing landing zone configuration in: {}", path.display());

    let config_path = path.join("landing-zone.yaml");
    let subscription_path = path.join("subscriptions").join("example.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(path.join("subscriptions"))?;

    std::fs::write(&config_path, include_str!("../templates/landing-zone.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(
        &subscription_path,
        include_str!("../templates/subscription.yaml"),
    )?;
    eprintln!("Created: {}", subscription_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let ledger_entry = format!("{LEDGER_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ledger_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|l| l.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Landing zone")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{ledger_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nConfiguration initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set AZURE_ACCESS_TOKEN");
    eprintln!("  2. Edit landing-zone.yaml and the files under subscriptions/");
    eprintln!("  3. Run 'landing-zone validate' to check the configuration");
    eprintln!("  4. Run 'landing-zone plan' to see the execution order");
    eprintln!("  5. Run 'landing-zone apply' to provision");

    Ok(())
}

/// Validates the configuration, including the dependency graph.
async fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;

    let result = ConfigValidator::new().check(&config);
    emit(formatter, &formatter.format_validation(&config, &result, show_warnings));
    if !result.is_valid() {
        ConfigValidator::new().validate(&config)?;
    }

    let compiled = Provisioner::new(&config).compile().await?;
    debug!("Graph check passed with {} nodes", compiled.plan.node_count());
    Ok(())
}

/// Shows the execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let provisioner = Provisioner::new(&config);
    let compiled = provisioner.compile().await?;

    let store = provisioner.ledger_store();
    let report = provisioner.resume_report(&compiled, &store).await?;

    emit(
        formatter,
        &formatter.format_plan(&compiled.plan, compiled.hub.as_ref(), Some(&report), detailed),
    );
    Ok(())
}

/// Applies the execution plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    simulate: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let provisioner = Provisioner::new(&config);
    let compiled = provisioner.compile().await?;

    if compiled.plan.is_empty() {
        emit(formatter, &formatter.message(MessageKind::Success, "Nothing to provision."));
        return Ok(());
    }

    let store = provisioner.ledger_store();
    let report = provisioner.resume_report(&compiled, &store).await?;
    if !formatter.is_json() {
        emit(
            formatter,
            &formatter.format_plan(&compiled.plan, compiled.hub.as_ref(), Some(&report), false),
        );
    }

    if !auto_approve && !confirm("Do you want to apply this plan?")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let client = if simulate {
        simulated_cloud(&config, &compiled)
    } else {
        create_arm_client()?
    };

    let mut applier = Applier::from_config(client, &config.settings.apply);
    if let Some(limit) = concurrency {
        applier = applier.with_concurrency(limit);
    }

    let token = applier.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight nodes");
            token.cancel();
        }
    });

    let result = provisioner.apply(&compiled, &store, &applier).await;
    interrupt.abort();
    let ledger = result?;

    emit(formatter, &formatter.format_apply_result(&ledger));
    ledger.ensure_success()?;
    Ok(())
}

/// Ledger commands.
async fn cmd_ledger(
    config_path: Option<&PathBuf>,
    command: LedgerCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = Provisioner::new(&config).ledger_store();

    match command {
        LedgerCommands::Show { history } => {
            if let Some(ledger) = store.load().await? {
                emit(formatter, &formatter.format_ledger(&ledger, history));
            } else {
                emit(formatter, &formatter.message(MessageKind::Warning, "No run recorded yet."));
            }
            if !formatter.is_json() {
                let lock = store.current_lock().await?;
                emit(formatter, &formatter.format_lock(lock.as_ref()));
            }
        }
        LedgerCommands::Unlock { run_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => emit(
                        formatter,
                        &formatter.message(
                            MessageKind::Success,
                            &format!("Removed lock of {}", lock.describe()),
                        ),
                    ),
                    None => emit(
                        formatter,
                        &formatter.message(MessageKind::Warning, "Ledger was not locked."),
                    ),
                }
            } else if let Some(id) = run_id {
                store.release_lock(&id).await?;
                match store.current_lock().await? {
                    Some(held) => emit(
                        formatter,
                        &formatter.message(
                            MessageKind::Warning,
                            &format!("Lock belongs to {}; left in place.", held.describe()),
                        ),
                    ),
                    None => emit(
                        formatter,
                        &formatter.message(MessageKind::Success, "Ledger unlocked."),
                    ),
                }
            } else {
                return Err(LandingZoneError::internal(
                    "Provide --run-id or use --force",
                ));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output: JSON to stdout, text to stderr.
fn emit(formatter: &OutputFormatter, output: &str) {
    if formatter.is_json() {
        println!("{output}");
    } else {
        eprintln!("{output}");
    }
}

/// Asks for confirmation on stdin.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` next to the configuration, then the configuration itself.
fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;
    parser.load(&config_file)
}

/// Creates the Resource Manager client from environment tokens.
fn create_arm_client() -> Result<Arc<dyn CloudClient>> {
    let token = ConfigParser::get_access_token()?;
    let connectivity = ConfigParser::get_connectivity_token();
    let client = ArmClient::new(&token, connectivity.as_deref())?;
    Ok(Arc::new(client))
}

/// In-memory cloud with the hub and billing-less aliases already present.
fn simulated_cloud(config: &LoadedConfig, compiled: &CompiledPlan) -> Arc<dyn CloudClient> {
    let cloud = InMemoryCloud::new();
    if let Some(hub) = &compiled.hub {
        cloud.seed(&hub.id);
    }
    for (key, spec) in &config.subscriptions {
        if spec.billing_scope.is_none() {
            cloud.seed_alias(key);
        }
    }
    info!("Simulating apply against an in-memory cloud");
    Arc::new(cloud)
}
