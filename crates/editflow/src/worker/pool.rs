use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::adapters::AdapterFactory;
use crate::config::Config;
use crate::error::WorkerError;
use crate::pipeline::progress::{NoopProgress, ProgressReporter};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::queue::{Delivery, QueueError, TaskQueue};
use crate::store::EditStore;
use crate::worker::job::{JobOutcome, JobResult};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub worker_count: usize,
    /// How long one dequeue waits; bounds how late shutdown is noticed.
    pub dequeue_timeout: Duration,
    /// Deliveries allowed before an edit hitting infrastructure errors is dropped.
    pub max_deliveries: u32,
}

impl PoolOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            dequeue_timeout: Duration::from_millis(config.queue.dequeue_timeout_ms),
            max_deliveries: config.queue.max_deliveries,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            dequeue_timeout: Duration::from_millis(500),
            max_deliveries: 5,
        }
    }
}

pub struct WorkerPool {
    result_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        options: PoolOptions,
        config: Arc<PipelineConfig>,
        store: EditStore,
        queue: Arc<dyn TaskQueue>,
        factory: &dyn AdapterFactory,
    ) -> Result<Self, WorkerError> {
        Self::with_progress(options, config, store, queue, factory, None)
    }

    /// Starts the workers, each with its own adapter set from `factory`.
    ///
    /// Stage events go to `progress` when given.
    pub fn with_progress(
        options: PoolOptions,
        config: Arc<PipelineConfig>,
        store: EditStore,
        queue: Arc<dyn TaskQueue>,
        factory: &dyn AdapterFactory,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<Self, WorkerError> {
        if options.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        // All adapters are built up front so a bad factory starts nothing.
        let mut pipelines = Vec::with_capacity(options.worker_count);
        for worker_id in 0..options.worker_count {
            let adapters = factory
                .build()
                .map_err(|source| WorkerError::Adapters { worker_id, source })?;
            pipelines.push(Pipeline::new(Arc::clone(&config), store.clone(), adapters));
        }

        let (result_sender, result_receiver) = unbounded::<JobOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let progress: Arc<dyn ProgressReporter> = progress.unwrap_or_else(|| Arc::new(NoopProgress));

        let mut workers = Vec::with_capacity(options.worker_count);
        for (worker_id, pipeline) in pipelines.into_iter().enumerate() {
            let worker = Worker {
                id: worker_id,
                pipeline,
                queue: Arc::clone(&queue),
                results: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                progress: Arc::clone(&progress),
                dequeue_timeout: options.dequeue_timeout,
                max_deliveries: options.max_deliveries,
            };

            let spawned = thread::Builder::new()
                .name(format!("editflow-worker-{}", worker_id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", options.worker_count);

        Ok(Self {
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Asks workers to stop after their current edit.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    pipeline: Pipeline,
    queue: Arc<dyn TaskQueue>,
    results: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    progress: Arc<dyn ProgressReporter>,
    dequeue_timeout: Duration,
    max_deliveries: u32,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            let delivery = match self.queue.dequeue(self.dequeue_timeout) {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(QueueError::Closed) => {
                    debug!("Worker {} queue closed", self.id);
                    break;
                }
                Err(e) => {
                    error!("Worker {} failed to dequeue: {}", self.id, e);
                    thread::sleep(self.dequeue_timeout);
                    continue;
                }
            };

            debug!(
                "Worker {} processing edit {} (delivery {})",
                self.id, delivery.edit_id, delivery.attempt
            );
            let result = self.process(&delivery);
            let outcome = JobOutcome {
                edit_id: delivery.edit_id,
                worker_id: self.id,
                delivery: delivery.attempt,
                result,
            };

            if let Err(e) = self.results.send(outcome) {
                error!("Worker {} failed to send result: {}", self.id, e);
                break;
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    fn process(&self, delivery: &Delivery) -> JobResult {
        match self.pipeline.run(&delivery.edit_id, self.progress.as_ref()) {
            Ok(outcome) => {
                self.ack(delivery);
                outcome.into()
            }
            Err(e) if e.is_infrastructure() => {
                let error = e.to_string();
                if delivery.attempt >= self.max_deliveries {
                    error!(
                        "Dropping edit {} after {} deliveries: {}",
                        delivery.edit_id, delivery.attempt, error
                    );
                    self.ack(delivery);
                    return JobResult::Dropped { error };
                }
                warn!(
                    "Edit {} hit an infrastructure error, returning it to the queue: {}",
                    delivery.edit_id, error
                );
                if let Err(e) = self.queue.nack(delivery) {
                    error!("Failed to requeue edit {}: {}", delivery.edit_id, e);
                }
                JobResult::Requeued { error }
            }
            Err(e) => {
                // Unknown ids and writes rejected by the store cannot succeed later.
                warn!("Edit {} not processed: {}", delivery.edit_id, e);
                self.ack(delivery);
                JobResult::Dropped {
                    error: e.to_string(),
                }
            }
        }
    }

    fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery) {
            error!("Failed to acknowledge edit {}: {}", delivery.edit_id, e);
        }
    }
}
