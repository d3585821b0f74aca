use crate::{
    commands::{Commands, WatermarkCommand},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::{env::EnvManager, job::JobConfig};
use engine_core::state::Watermark;
use engine_runtime::execution::{
    executor::{self, RunReport},
    watermark,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "Collects paginated API records for keys read from a database"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::Success.into(),
        Err(CliError::ShutdownRequested) => {
            warn!("Collection interrupted; re-run the job to complete it");
            ExitCode::ShutdownRequested.into()
        }
        Err(e) => {
            error!("{e}");
            ExitCode::GeneralError.into()
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Collect { config, env_file } => {
            let job = load_job(&config, env_file.as_deref())?;

            let shutdown = ShutdownCoordinator::default();
            shutdown.register_handlers();

            let report = match executor::run(job, shutdown.cancel_token()).await {
                Ok(report) => report,
                Err(e) if shutdown.is_shutdown_requested() => {
                    warn!(error = %e, "Job stopped after shutdown signal");
                    return Err(CliError::ShutdownRequested);
                }
                Err(e) => return Err(e.into()),
            };
            log_report(&report);
        }
        Commands::TestConn { conn_str } => {
            conn::ping_postgres(&conn_str).await?;
        }
        Commands::Watermark { command } => match command {
            WatermarkCommand::Show {
                config,
                env_file,
                json,
            } => {
                let job = load_job(&config, env_file.as_deref())?;
                let store = watermark::open_store(&job)?;
                let current = watermark::show(store.as_ref(), &job).await?;
                print_watermark(&job, current.as_ref(), json)?;
            }
            WatermarkCommand::Clear { config, env_file } => {
                let job = load_job(&config, env_file.as_deref())?;
                let store = watermark::open_store(&job)?;
                if watermark::clear(store.as_ref(), &job).await? {
                    info!(job = %job.job_key(), "Watermark cleared");
                } else {
                    info!(job = %job.job_key(), "No watermark stored");
                }
            }
        },
    }

    Ok(())
}

fn load_job(path: &str, env_file: Option<&str>) -> Result<JobConfig, CliError> {
    let mut env = EnvManager::new();
    if let Some(env_file) = env_file {
        env.load_from_file(env_file)?;
    }
    info!("Loading job: {}", path);
    Ok(JobConfig::load(path, &env)?)
}

fn log_report(report: &RunReport) {
    let summary = &report.summary;
    info!(
        job = %report.job_key,
        batches = summary.batches,
        pages = summary.pages,
        records = summary.records,
        bytes = summary.bytes,
        tasks = summary.tasks,
        peak_concurrency = summary.peak_concurrency,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Job finished"
    );
    if let Some(watermark) = &report.watermark {
        info!("Next incremental run starts at {}", watermark.since.to_rfc3339());
    }
}

fn print_watermark(
    job: &JobConfig,
    watermark: Option<&Watermark>,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&watermark)?);
        return Ok(());
    }

    println!("Watermark for job '{}':", job.job_key());
    println!("-----------------------------");
    match watermark {
        Some(w) => {
            println!("{:<16} {}", "Since", w.since.to_rfc3339());
            println!("{:<16} {}", "Records", w.records);
            println!("{:<16} {}", "Updated at", w.updated_at.to_rfc3339());
        }
        None => println!("(none)"),
    }
    Ok(())
}
