mod config;
mod error;
mod logging;
mod metrics;
mod migrations;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use crate::config::Settings;
use crate::error::MigrationError;
use crate::migrations::report::RunSummary;
use crate::migrations::runner::{run_migration, MigrationPlan};
use crate::migrations::RunMode;
use crate::store::MongoStore;

/// Move Reserva collections from tenantId to ownerId addressing
#[derive(Parser, Debug)]
#[command(name = "reserva-migrate")]
#[command(version)]
struct Cli {
    /// Read everything and log the intended changes without writing
    #[arg(long)]
    dry_run: bool,

    /// Required to mutate the database
    #[arg(long)]
    force: bool,

    /// JSON object of tenantId -> ownerId used when no admin user is found
    #[arg(long, env = "OWNER_MAP_FILE")]
    owner_map: Option<PathBuf>,

    /// Directory for pre-migration backups
    #[arg(long, env = "BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> Result<RunSummary, MigrationError> {
    let mode = RunMode::from_flags(cli.dry_run, cli.force)?;
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.backup_dir {
        settings.backup_dir = dir;
    }
    let default_owners = config::load_default_owners(cli.owner_map.as_deref())?;

    info!(database = %settings.database, "Connecting to MongoDB");
    let store = MongoStore::connect(&settings)
        .await
        .map_err(MigrationError::Connect)?;
    info!("Connected to MongoDB");

    let plan = MigrationPlan::new(mode, settings.backup_dir, default_owners);
    run_migration(&store, &plan).await
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::set_panic_hook(cli.force && !cli.dry_run);
    logging::init_logging_with_fallback(cli.verbose);

    match run(cli).await {
        Ok(summary) => {
            let totals = summary.totals();
            if totals.errors > 0 {
                info!(errors = totals.errors, "Migration finished with skipped documents; see log above");
            } else {
                info!("Migration finished");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Migration aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
