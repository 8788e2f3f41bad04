use crate::domains::export::types::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs export requests handed over by the queue.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Runs one export request to completion.
    async fn process(&self, request: ExportRequest) -> Result<ExportJob, ExportError>;
    /// Called for a request the queue accepted but will never run.
    async fn abandon(&self, request: ExportRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub active: usize,
    pub total_capacity: usize,
}

/// Export queue with a bounded number of concurrently running jobs.
pub struct ExportQueueManager {
    sender: mpsc::Sender<ExportRequest>,
    active_exports: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl ExportQueueManager {
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Spawns the dispatcher. It runs until `shutdown` is cancelled. Requests
    /// accepted but not yet started are then handed to
    /// [`JobProcessor::abandon`], and jobs already running are waited for; the
    /// returned handle completes after that.
    pub fn start(
        processor: Arc<dyn JobProcessor>,
        max_concurrent: usize,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let max_concurrent = max_concurrent.max(1);
        let (sender, mut receiver) = mpsc::channel::<ExportRequest>(capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let active_exports = Arc::new(AtomicUsize::new(0));
        let active = active_exports.clone();

        let handle = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = receiver.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                // Wait for available slot
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    permit = semaphore.clone().acquire_owned() => permit.ok(),
                };
                let permit = match permit {
                    Some(permit) => permit,
                    None => {
                        log::warn!(
                            "Shutting down before export {} could start",
                            request.export_id
                        );
                        processor.abandon(request).await;
                        break;
                    }
                };

                active.fetch_add(1, Ordering::Relaxed);
                let processor = processor.clone();
                let active = active.clone();

                tokio::spawn(async move {
                    let export_id = request.export_id.clone();
                    match processor.process(request).await {
                        Ok(job) => log::info!(
                            "Export {} of {} for {} finished as {}",
                            job.export_id,
                            job.survey_id,
                            job.user_id,
                            job.status.as_str()
                        ),
                        Err(e) => log::error!("Export job {} failed: {}", export_id, e),
                    }
                    active.fetch_sub(1, Ordering::Relaxed);
                    drop(permit);
                });
            }

            // Nothing new gets in; whatever is still buffered will never run
            receiver.close();
            let mut abandoned = 0;
            while let Some(request) = receiver.recv().await {
                processor.abandon(request).await;
                abandoned += 1;
            }
            if abandoned > 0 {
                log::warn!("Abandoned {} queued exports on shutdown", abandoned);
            }

            // Every permit back means no job is still running
            let _ = semaphore.acquire_many(max_concurrent as u32).await;
            log::info!("Export queue stopped");
        });

        (
            Self {
                sender,
                active_exports,
                max_concurrent,
            },
            handle,
        )
    }

    pub fn enqueue(&self, request: ExportRequest) -> Result<(), ExportError> {
        self.sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => ExportError::QueueFull,
            TrySendError::Closed(_) => ExportError::ChannelClosed,
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            active: self.active_exports.load(Ordering::Relaxed),
            total_capacity: self.max_concurrent,
        }
    }
}
