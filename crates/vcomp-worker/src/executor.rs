//! Task executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vcomp_pipeline::{Backoff, ControlLoop};
use vcomp_queue::{Delivery, QueueMessage, WorkQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::{TaskOutcome, TaskProcessor};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and acked
    Acked(TaskOutcome),
    /// Left unacked; the queue will deliver it again
    Redeliver,
    /// Moved to the dead-letter stream
    DeadLettered,
}

/// Claims tasks from the queue and runs them on a bounded pool.
pub struct TaskExecutor {
    config: WorkerConfig,
    queue: Arc<dyn WorkQueue>,
    processor: Arc<TaskProcessor>,
    task_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn WorkQueue>, processor: TaskProcessor) -> Self {
        let task_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            processor: Arc::new(processor),
            task_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`shutdown`](Self::shutdown) is called, then drain
    /// in-flight tasks.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' with {} max concurrent tasks",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        let reporter = self.spawn_depth_reporter();
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut failures = 0u32;
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let result = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                    continue;
                }
                result = self.consume_tasks() => result,
            };

            match result {
                Ok(_) => failures = 0,
                Err(e) => {
                    let delay = backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    error!("Error consuming tasks, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        reporter.abort();

        info!("Waiting for in-flight tasks to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks())
            .await
            .is_err()
        {
            warn!("In-flight tasks still running after {:?}; they will be redelivered", self.config.shutdown_timeout);
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn spawn_depth_reporter(&self) -> tokio::task::JoinHandle<u64> {
        let queue = Arc::clone(&self.queue);
        let shutdown_rx = self.shutdown.subscribe();
        let control = ControlLoop::new("queue-depth", self.config.depth_report_interval)
            .with_jitter(Duration::from_secs(1));

        tokio::spawn(async move {
            control
                .run(shutdown_rx, || {
                    let queue = Arc::clone(&queue);
                    async move {
                        let depth = queue.depth().await?;
                        metrics::record_queue_depth(depth.pending, depth.in_flight);
                        Ok::<(), vcomp_queue::QueueError>(())
                    }
                })
                .await
        })
    }

    /// Receive up to the free capacity and spawn one task per delivery.
    async fn consume_tasks(&self) -> WorkerResult<usize> {
        let available = self.task_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(0);
        }

        let deliveries = self
            .queue
            .receive(&self.consumer_name, available.min(5), self.config.poll_wait)
            .await?;
        let count = deliveries.len();
        if count > 0 {
            debug!("Received {} tasks from queue", count);
        }

        for delivery in deliveries {
            let permit = Arc::clone(&self.task_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::transient("task semaphore closed"))?;
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let max_deliveries = self.config.max_deliveries;

            tokio::spawn(async move {
                let _permit = permit;
                Self::handle_delivery(queue.as_ref(), &processor, max_deliveries, delivery).await;
            });
        }

        Ok(count)
    }

    /// Receive and process tasks inline, one after another.
    ///
    /// Returns what happened to each delivery. Used by tooling and tests
    /// that need the result of a poll before moving on.
    pub async fn poll_once(&self) -> WorkerResult<Vec<DeliveryOutcome>> {
        let deliveries = self
            .queue
            .receive(&self.consumer_name, self.config.max_concurrent_jobs, self.config.poll_wait)
            .await?;

        let mut outcomes = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            outcomes.push(
                Self::handle_delivery(self.queue.as_ref(), &self.processor, self.config.max_deliveries, delivery).await,
            );
        }
        Ok(outcomes)
    }

    /// Process one delivery and decide between ack, redelivery and
    /// dead-lettering.
    pub async fn handle_delivery(
        queue: &dyn WorkQueue,
        processor: &TaskProcessor,
        max_deliveries: u32,
        delivery: Delivery,
    ) -> DeliveryOutcome {
        let QueueMessage::Composite(task) = &delivery.message;
        let logger = JobLogger::new(&task.job_id, "composite");

        if delivery.delivery_count > max_deliveries {
            logger.log_warning(&format!(
                "delivered {} times (max {}), moving to dead-letter queue",
                delivery.delivery_count, max_deliveries
            ));
            let reason = format!("exceeded {} deliveries", max_deliveries);
            if let Err(e) = queue.dead_letter(&delivery, &reason).await {
                error!(job_id = %task.job_id, "Failed to dead-letter task: {}", e);
                return DeliveryOutcome::Redeliver;
            }
            metrics::record_dead_letter();
            return DeliveryOutcome::DeadLettered;
        }

        let started = Instant::now();
        let result = processor
            .process(task)
            .instrument(logger.span())
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                metrics::record_task(outcome.as_str(), elapsed);
                if let Err(e) = queue.ack(&delivery).await {
                    // Redelivery resumes from the recorded job state
                    error!(job_id = %task.job_id, "Failed to ack task: {}", e);
                    return DeliveryOutcome::Redeliver;
                }
                DeliveryOutcome::Acked(outcome)
            }
            Err(e) if e.is_transient() => {
                metrics::record_task("transient", elapsed);
                logger.log_warning(&format!(
                    "transient failure on delivery {}, will be redelivered: {}",
                    delivery.delivery_count, e
                ));
                DeliveryOutcome::Redeliver
            }
            Err(e) => {
                metrics::record_task("error", elapsed);
                logger.log_failure(&e.to_string());
                if let Err(dlq_err) = queue.dead_letter(&delivery, &e.to_string()).await {
                    error!(job_id = %task.job_id, "Failed to dead-letter task: {}", dlq_err);
                    return DeliveryOutcome::Redeliver;
                }
                metrics::record_dead_letter();
                DeliveryOutcome::DeadLettered
            }
        }
    }

    async fn wait_for_tasks(&self) {
        loop {
            if self.task_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
