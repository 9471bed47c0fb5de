#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use fincontrol_lib::{
    apply_embedded_migrations, inspect_status_at_db_path, query_db_stats_at_db_path,
    runtime_db_health_check_at_db_path, serve, AppConfig, LedgerError, PeriodBasis,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fincontrol")]
#[command(about = "Personal finance ledger service")]
struct Cli {
    /// SQLite file; overrides FINCONTROL_DB_PATH.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
    #[arg(long, global = true)]
    bind: Option<SocketAddr>,
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    /// created_at or record_date.
    #[arg(long, global = true)]
    period_basis: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate and serve the JSON API (default).
    Serve,
    Migrate,
    Status,
    Stats,
    Health,
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn resolve_config(cli: &Cli) -> Result<AppConfig, LedgerError> {
    let mut config = AppConfig::from_env()?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(raw) = &cli.period_basis {
        config.period_basis = PeriodBasis::parse(raw).ok_or_else(|| {
            LedgerError::Config(format!("--period-basis must be created_at or record_date, got {raw}"))
        })?;
    }
    config.log_json = config.log_json || cli.log_json;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), LedgerError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LedgerError::storage(format!("failed to render output: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), LedgerError> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Migrate => print_json(&apply_embedded_migrations(&config.db_path)?),
        Commands::Status => print_json(&inspect_status_at_db_path(&config.db_path)?),
        Commands::Stats => print_json(&query_db_stats_at_db_path(&config.db_path)?),
        Commands::Health => {
            let report = runtime_db_health_check_at_db_path(&config.db_path);
            print_json(&report)?;
            if report["ok"].as_bool().unwrap_or(false) {
                Ok(())
            } else {
                Err(LedgerError::storage("database health check failed"))
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e.to_body());
            return ExitCode::from(2);
        }
    };
    init_tracing(config.log_json);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), error = %e, "fincontrol failed");
            ExitCode::FAILURE
        }
    }
}
