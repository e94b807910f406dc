//! Streaming executor.
//!
//! Processes a list of inputs one at a time and pushes an event per input over
//! a bounded channel, followed by a single `complete` event. The producer stops
//! as soon as the receiving side goes away.

use std::sync::Arc;

use inference_common::{input_id, progress_percent, StreamEvent};
use tokio::sync::mpsc;

use super::metrics::DeliveryMode;
use super::realtime::RealTimeExecutor;
use crate::error::Result;

/// Events buffered between the producer and the transport.
const CHANNEL_CAPACITY: usize = 16;

pub struct StreamingExecutor {
    executor: Arc<RealTimeExecutor>,
}

impl StreamingExecutor {
    pub fn new(executor: Arc<RealTimeExecutor>) -> Self {
        Self { executor }
    }

    /// Start streaming `inputs` through `model`.
    ///
    /// The model is validated before anything is produced; an unknown model
    /// fails here rather than as an event.
    pub fn stream(
        &self,
        model: &str,
        inputs: Vec<serde_json::Value>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.executor.registry().get(model)?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let executor = self.executor.clone();
        let model = model.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = produce(&executor, &model, &inputs, &tx) => {}
                _ = tx.closed() => {
                    tracing::info!(model = %model, "Stream client disconnected, abandoning remaining inputs");
                }
            }
        });

        Ok(rx)
    }
}

async fn produce(
    executor: &RealTimeExecutor,
    model: &str,
    inputs: &[serde_json::Value],
    tx: &mpsc::Sender<StreamEvent>,
) {
    let total = inputs.len();
    let mut succeeded = 0;
    let mut failed = 0;

    for (index, input) in inputs.iter().enumerate() {
        let progress = progress_percent(index + 1, total);
        let id = input_id(input);

        let event = match executor.run(model, input, false, DeliveryMode::Stream).await {
            Ok(result) => {
                succeeded += 1;
                StreamEvent::Result {
                    index,
                    total,
                    progress,
                    id,
                    result,
                }
            }
            Err(e) => {
                failed += 1;
                StreamEvent::Error {
                    index,
                    total,
                    progress,
                    id,
                    error: e.to_string(),
                }
            }
        };

        if tx.send(event).await.is_err() {
            return;
        }
    }

    tracing::debug!(model, total, succeeded, failed, "Stream complete");
    let _ = tx
        .send(StreamEvent::Complete {
            total,
            succeeded,
            failed,
        })
        .await;
}
