use crate::{
    commands::Commands,
    conn::{ConnectionPinger, PostgresConnectionPinger},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::adapter::PgConnector;
use engine_config::{
    env::EnvManager,
    settings::{DEFAULT_CONFIG_FILE, OutputKind, Settings},
};
use engine_core::state::{StateStore, sled_store::SledStateStore};
use engine_runtime::{
    discovery::{seed_backup_path, seed_sources},
    guard::InstanceGuard,
    orchestrator::Orchestrator,
    pipeline::create_engine,
    provision::{FileProvisioner, provision_tables},
};
use model::core::identifiers::SourceId;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod error;
mod output;
mod shutdown;

#[derive(Parser, Debug)]
#[command(
    name = "leftshove",
    version,
    about = "Incremental, watermark-driven extraction from Postgres sources"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Path to a .env style config file (default: ./leftshove.env when present)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            error!(error = %err, "leftshove failed");
            err.exit_code()
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::TestConn { conn_str } = &cli.command {
        return PostgresConnectionPinger {
            conn_str: conn_str.clone(),
        }
        .ping()
        .await;
    }

    let mut settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::State { source, json } => {
            let state = open_state_store(&settings)?;
            let tables = state.list_tracked(source.map(SourceId::new)).await?;
            if json {
                print!("{}", output::state_json(&tables)?);
            } else {
                print!("{}", output::state_table(&tables));
            }
        }
        Commands::Seed => {
            let _guard = InstanceGuard::acquire(settings.guard_addr).await?;
            let state = open_state_store(&settings)?;
            seed(&settings, state.as_ref()).await?;
        }
        Commands::Provision => {
            let _guard = InstanceGuard::acquire(settings.guard_addr).await?;
            let state = open_state_store(&settings)?;
            let provisioner = FileProvisioner::new(settings.output_dir.clone());
            let report = provision_tables(state.as_ref(), &provisioner, None).await?;
            print!("{}", output::provision_summary(&report));
        }
        Commands::Run { once, dry_run } => {
            let _guard = InstanceGuard::acquire(settings.guard_addr).await?;
            let state = open_state_store(&settings)?;
            if dry_run {
                settings.output = OutputKind::DryRun;
            }
            extract(&settings, state, once).await?;
        }
        Commands::TestConn { .. } => {}
    }

    Ok(())
}

fn load_settings(config: Option<&std::path::Path>) -> Result<Settings, CliError> {
    let mut env = EnvManager::new();
    match config {
        Some(path) => env.load_from_file(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default.exists() {
                env.load_from_file(&default)?;
            }
        }
    }
    Ok(Settings::from_env(&env)?)
}

fn open_state_store(settings: &Settings) -> Result<Arc<dyn StateStore>, CliError> {
    let path = &settings.state_path;
    let store = SledStateStore::open(path).map_err(|source| CliError::StateStore {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "State store opened");
    Ok(Arc::new(store))
}

fn connector(settings: &Settings) -> PgConnector {
    PgConnector::new(settings.max_concurrent_jobs, settings.statement_timeout)
}

async fn seed(settings: &Settings, state: &dyn StateStore) -> Result<(), CliError> {
    let connector = connector(settings);

    let results = seed_sources(&settings.sources, &connector, state).await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "Some sources were not seeded");
    }

    let backup = seed_backup_path(&settings.state_path);
    let written = state.export_jsonl(&backup).await?;
    info!(path = %backup.display(), tables = written, "Exported state backup");
    Ok(())
}

async fn extract(
    settings: &Settings,
    state: Arc<dyn StateStore>,
    once: bool,
) -> Result<(), CliError> {
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();
    let cancel = shutdown.cancel_token();

    let orchestrator = Orchestrator::from_settings(
        settings,
        state,
        Arc::new(connector(settings)),
        create_engine(settings),
    );

    if once {
        let report = orchestrator.run_cycle(&cancel).await;
        print!("{}", output::cycle_summary(&report));
        if shutdown.is_shutdown_requested() {
            return Err(CliError::ShutdownRequested);
        }
        return Ok(());
    }

    orchestrator
        .run_continuous(settings.cycle_interval, &cancel)
        .await?;
    Ok(())
}
