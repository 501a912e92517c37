//! Runs a pool of edit workers against the configured queue until Ctrl-C.
//!
//! Usage: `editflow-worker [CONFIG_PATH]` (default `~/.editflow/config.json`).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use editflow::adapters::HttpAdapterFactory;
use editflow::config::{load_config, QueueKind};
use editflow::db::Database;
use editflow::pipeline::{BroadcastProgress, ProgressReporter};
use editflow::queue::{ChannelQueue, SqliteTaskQueue};
use editflow::store::MokaStatusCache;
use editflow::telemetry::init_logging;
use editflow::worker::{JobResult, PoolOptions};
use editflow::{
    ConfigError, EditStatus, EditStore, EditflowError, PipelineConfig, TaskQueue, WorkerError,
    WorkerPool,
};

const RESULT_POLL: Duration = Duration::from_millis(500);
const PROGRESS_CAPACITY: usize = 256;

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".editflow").join("config.json"))
}

/// Logs stage events until every reporter is gone.
fn spawn_progress_logger(progress: &BroadcastProgress) -> std::io::Result<()> {
    let mut events = progress.subscribe();
    thread::Builder::new()
        .name("editflow-progress".into())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(event) => debug!(
                    "Edit {} {:?} {} (attempt {}/{}, {}%)",
                    event.edit_id,
                    event.kind,
                    event.stage,
                    event.attempt,
                    event.max_attempts,
                    event.progress_percent
                ),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Progress logger skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        })?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("editflow-worker failed: {}", e);
        eprintln!("editflow-worker: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), EditflowError> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "no config path given and no home directory found".to_string(),
        })?;

    let config = load_config(&config_path)?;
    init_logging(config.logging.format);
    info!(
        "Starting editflow-worker v{} with config {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let db_path = config
        .database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "could not determine the database path".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let cache = Arc::new(MokaStatusCache::new(config.cache.max_entries));
    let store = EditStore::new(
        db.clone(),
        cache,
        Duration::from_secs(config.cache.status_ttl_secs),
    )
    .with_infra_retry(config.infra_retry.to_policy());

    let queue: Arc<dyn TaskQueue> = match config.queue.kind {
        QueueKind::Durable => Arc::new(SqliteTaskQueue::new(
            db,
            Duration::from_secs(config.queue.lease_secs),
            Duration::from_millis(config.queue.poll_interval_ms),
        )),
        QueueKind::Memory => {
            warn!("Using the in-memory queue; edits submitted by other processes are not seen");
            Arc::new(ChannelQueue::new())
        }
    };

    let pending = store.count(EditStatus::Pending)?;
    let processing = store.count(EditStatus::Processing)?;
    info!(
        "{} edits pending, {} in progress from an earlier run",
        pending, processing
    );

    let progress = BroadcastProgress::new(PROGRESS_CAPACITY);
    spawn_progress_logger(&progress)
        .map_err(|e| WorkerError::SpawnFailed(format!("failed to start progress logger: {}", e)))?;

    let factory = HttpAdapterFactory::from_config(&config)?;
    let pool = WorkerPool::with_progress(
        PoolOptions::from_config(&config),
        Arc::new(PipelineConfig::from_config(&config)),
        store,
        queue,
        &factory,
        Some(Arc::new(progress) as Arc<dyn ProgressReporter>),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed))
        .map_err(|e| WorkerError::SpawnFailed(format!("failed to install signal handler: {}", e)))?;

    while !stop.load(Ordering::Relaxed) {
        if let Some(outcome) = pool.recv_result_timeout(RESULT_POLL) {
            match &outcome.result {
                JobResult::Completed { result_ref } => info!(
                    "Edit {} completed by worker {}: {}",
                    outcome.edit_id,
                    outcome.worker_id,
                    result_ref.as_deref().unwrap_or("-")
                ),
                JobResult::Failed(reason) => {
                    warn!("Edit {} failed: {}", outcome.edit_id, reason)
                }
                JobResult::Skipped(status) => {
                    info!("Edit {} was already {}", outcome.edit_id, status)
                }
                JobResult::Requeued { error } => {
                    warn!("Edit {} requeued: {}", outcome.edit_id, error)
                }
                JobResult::Dropped { error } => {
                    error!("Edit {} dropped: {}", outcome.edit_id, error)
                }
            }
        }
    }

    pool.shutdown();
    pool.wait();
    Ok(())
}
