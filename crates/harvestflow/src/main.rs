//! HarvestFlow command-line entry point.
//!
//! `serve` boots the admission loop (`spec.md` §4.7) and runs until
//! SIGINT/Ctrl-C; every other subcommand is a single Control Facade
//! (`spec.md` §4.8) request against the same store, printed as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvestflow_db::{CheckpointStore, RecordStore};
use harvestflow_driver::{BrowserSession, RecordExtractor};
use harvestflow_governor::RateGovernor;
use harvestflow_ids::{JobId, ProfileId};
use harvestflow_profiles::ProfilePool;
use harvestflow_protocol::{JobState, SystemConfig, Thresholds};
use harvestflow_scheduler::{control, ControlRequest, ControlResponse, Scheduler, SchedulerError, SessionFactory, SubmitJobRequest, UploaderHandle};
use harvestflow_uploader::{transport::ReqwestTransport, Uploader, UploaderConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "harvestflow", about = "Resumable timeline scraping coordination layer")]
struct Cli {
    /// Enable verbose logging to stderr in addition to the rolling log file.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Database URL override (defaults to the built-in sqlite path).
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Comma-separated browser profile ids the pool is constructed from.
    #[arg(long, global = true, value_delimiter = ',')]
    profiles: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admission loop until interrupted.
    Serve,
    /// Submit a new scrape job.
    SubmitJob {
        name: String,
        #[arg(long, value_delimiter = ',')]
        accounts: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        #[arg(long, default_value_t = 0)]
        min_likes: u32,
        #[arg(long, default_value_t = 0)]
        min_replies: u32,
        #[arg(long, default_value_t = 0)]
        min_reposts: u32,
        #[arg(long, default_value_t = 0)]
        max_records: u32,
        #[arg(long)]
        auto_upload: bool,
    },
    /// Cancel a pending, queued, or running job.
    CancelJob { job_id: i64 },
    /// Reset a failed job back to pending.
    RestartJob { job_id: i64 },
    /// List jobs, optionally filtered by state.
    ListJobs { state: Option<String> },
    /// Print one job's full detail.
    GetJob { job_id: i64 },
    /// List records, optionally scoped to one job.
    ListRecords {
        #[arg(long)]
        job_id: Option<i64>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Set a record's heuristic category.
    SetRecordCategory { record_id: i64, category: String },
    /// Push unsynced records to the configured Bitable table.
    TriggerUpload {
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// Clear the synced flag for a job so its records are re-pushed.
    ResetSync { job_id: i64 },
    /// Export records as JSON or CSV.
    ExportRecords {
        #[arg(long)]
        job_id: Option<i64>,
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    harvestflow_logging::init_logging(harvestflow_logging::LogConfig {
        app_name: "harvestflow",
        verbose: cli.verbose,
        tui_mode: false,
    })
    .context("failed to initialize logging")?;

    // `database_url` has to come from defaults/env/CLI alone: the
    // `system_config` table it unlocks only exists once we've connected.
    let mut config = SystemConfig::default().apply_env_overrides();
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }

    let record_store = Arc::new(RecordStore::connect(&config.database_url).await.context("failed to open record store")?);
    let checkpoint_store = Arc::new(CheckpointStore::from_record_store(&record_store));

    let db_rows = record_store.load_system_config().await.context("failed to load persisted system config")?;
    config = config.apply_db_rows(&db_rows).apply_env_overrides();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if !cli.profiles.is_empty() {
        config.profile_ids = cli.profiles;
    }
    let profile_pool = Arc::new(ProfilePool::new(
        config.profile_ids.clone(),
        config.profile_cooldown,
        config.profile_switch_interval,
    ));
    let session_factory: Arc<dyn SessionFactory> = Arc::new(UnimplementedSessionFactory);

    let uploader_handle: Option<Arc<UploaderHandle>> = if config.lark_app_id.is_empty() {
        None
    } else {
        let transport = Arc::new(ReqwestTransport::new(config.lark_api_base.clone()));
        let governor = Arc::new(RateGovernor::new());
        let uploader = Uploader::new(
            record_store.clone(),
            transport,
            governor,
            config.lark_app_id.clone(),
            config.lark_app_secret.clone(),
            UploaderConfig { doc_token: String::new(), table_id: String::new(), max_retries: config.upload_max_retries },
        );
        Some(Arc::new(UploaderHandle::new(uploader)))
    };

    let mut scheduler = Scheduler::new(
        record_store.clone(),
        checkpoint_store,
        profile_pool,
        session_factory,
        config.max_concurrency,
        config.job_deadline,
    );
    if let Some(handle) = &uploader_handle {
        scheduler = scheduler.with_uploader(handle.clone());
    }
    let scheduler = Arc::new(scheduler);

    match cli.command {
        Commands::Serve => run_serve(scheduler).await,
        other => {
            let request = build_request(other)?;
            let response = control::handle(&scheduler, uploader_handle.as_deref(), request).await;
            print_response(response);
            Ok(())
        }
    }
}

async fn run_serve(scheduler: Arc<Scheduler>) -> Result<()> {
    scheduler.recover().await.context("restart recovery failed")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested, stopping admission loop");
    let _ = shutdown_tx.send(());
    run_handle.await.context("scheduler task panicked")??;
    Ok(())
}

fn build_request(command: Commands) -> Result<ControlRequest> {
    Ok(match command {
        Commands::Serve => unreachable!("handled separately"),
        Commands::SubmitJob { name, accounts, keywords, min_likes, min_replies, min_reposts, max_records, auto_upload } => {
            ControlRequest::SubmitJob(SubmitJobRequest {
                name,
                accounts,
                keywords,
                thresholds: Thresholds { min_likes, min_replies, min_reposts },
                max_records,
                auto_upload,
            })
        }
        Commands::CancelJob { job_id } => ControlRequest::CancelJob { job_id: JobId::from(job_id) },
        Commands::RestartJob { job_id } => ControlRequest::RestartJob { job_id: JobId::from(job_id) },
        Commands::ListJobs { state } => {
            let state = state.map(|s| s.parse::<JobState>()).transpose().map_err(anyhow::Error::msg)?;
            ControlRequest::ListJobs { state }
        }
        Commands::GetJob { job_id } => ControlRequest::GetJob { job_id: JobId::from(job_id) },
        Commands::ListRecords { job_id, limit, offset } => {
            ControlRequest::ListRecords { job_id: job_id.map(JobId::from), limit, offset }
        }
        Commands::SetRecordCategory { record_id, category } => ControlRequest::SetRecordCategory { record_id, category },
        Commands::TriggerUpload { job_id } => ControlRequest::TriggerUpload { job_id: job_id.map(JobId::from) },
        Commands::ResetSync { job_id } => ControlRequest::ResetSync { job_id: JobId::from(job_id) },
        Commands::ExportRecords { job_id, format } => {
            let format = match format.as_str() {
                "json" => harvestflow_scheduler::ExportFormat::Json,
                "csv" => harvestflow_scheduler::ExportFormat::Csv,
                "xlsx" => harvestflow_scheduler::ExportFormat::Xlsx,
                other => anyhow::bail!("unsupported export format: {other}"),
            };
            ControlRequest::ExportRecords { job_id: job_id.map(JobId::from), format }
        }
    })
}

fn print_response(response: ControlResponse) {
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialize response: {err}"),
    }
}

/// Browser automation is explicitly out of scope; this is the seam a real
/// deployment plugs a concrete [`SessionFactory`] into.
struct UnimplementedSessionFactory;

#[async_trait::async_trait]
impl SessionFactory for UnimplementedSessionFactory {
    async fn open(&self, profile_id: &ProfileId) -> Result<(Box<dyn BrowserSession>, Box<dyn RecordExtractor>), SchedulerError> {
        Err(SchedulerError::SessionOpenFailed(
            profile_id.to_string(),
            "no browser automation transport configured for this deployment".into(),
        ))
    }
}
