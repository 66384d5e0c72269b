// src/gateway/batch.rs
//! Optional request batching. Concurrently submitted requests are grouped
//! into small batches and fanned out as independent coordinator calls; the
//! only coupling between batch members is shared dispatch timing.

use crate::error::GatewayError;
use crate::gateway::coordinator::RequestCoordinator;
use crate::gateway::types::{GenerationRequest, GenerationResponse};
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_timeout: Duration::from_millis(500),
        }
    }
}

type BatchItem = (
    GenerationRequest,
    oneshot::Sender<Result<GenerationResponse, GatewayError>>,
);

pub struct BatchScheduler {
    tx: mpsc::UnboundedSender<BatchItem>,
    worker: JoinHandle<()>,
}

impl BatchScheduler {
    /// Starts the collection worker. The first queued request opens a batch
    /// window of `batch_timeout`; the batch is dispatched when it fills to
    /// `batch_size` or the window elapses, whichever comes first.
    pub fn spawn(coordinator: Arc<RequestCoordinator>, config: BatchConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchItem>();

        let worker = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                let deadline = Instant::now() + config.batch_timeout;

                while batch.len() < config.batch_size {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match tokio::time::timeout(remaining, rx.recv()).await {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) | Err(_) => break,
                    }
                }

                debug!("Dispatching batch of {} request(s)", batch.len());
                for (request, reply) in batch {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move {
                        let result = coordinator.process(request).await;
                        // Caller may have gone away; nothing to do then.
                        let _ = reply.send(result);
                    });
                }
            }
            debug!("Batch scheduler stopped");
        });

        Self { tx, worker }
    }

    /// Queues a request and waits for its individual result.
    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .map_err(|_| GatewayError::ConnectionFailed("batch scheduler stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| GatewayError::ConnectionFailed("batch dispatch dropped".to_string()))?
    }

    /// Closes the queue and waits for the worker to drain and exit.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}
