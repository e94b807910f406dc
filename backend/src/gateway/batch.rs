//! Batch coordinator.
//!
//! Accepts large input lists, hands them to the job queue and serves status and
//! results afterwards. Workers run [`BatchJobHandler`], which processes inputs
//! in order through the shared execution path so cached results are reused.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use inference_common::{
    input_id, progress_percent, BatchItemResult, BatchResultsResponse, BatchStatus,
    BatchStatusView, BatchSummary, InferenceOptions, ResultFormat, SubmitBatchResponse,
};
use serde::{Deserialize, Serialize};

use super::job_queue::{JobContext, JobError, JobHandler, JobQueue, JobRef, JobSnapshot, JobState};
use super::metrics::DeliveryMode;
use super::realtime::RealTimeExecutor;
use super::retry::RetryPolicy;
use crate::error::{GatewayError, Result};
use crate::store::{BatchRecord, BatchStore};

/// Job type under which batches are queued.
pub const BATCH_JOB_TYPE: &str = "batch-inference";

/// Failure reason of a batch cancelled by its owner.
pub const CANCELLED_REASON: &str = "cancelled by owner";

/// Failure reason of a batch dropped after its retention window.
const EXPIRED_REASON: &str = "expired before completion";

/// Queue payload of a batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload {
    batch_id: String,
    owner_id: String,
    model: String,
    inputs: Vec<serde_json::Value>,
    #[serde(default)]
    options: InferenceOptions,
}

/// Return value of a completed batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchOutput {
    results: Vec<BatchItemResult>,
    processing_time_ms: u64,
}

/// Results of a completed batch in the requested format.
#[derive(Debug)]
pub enum BatchResults {
    Json(BatchResultsResponse),
    Csv(String),
}

impl From<JobState> for BatchStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => BatchStatus::Queued,
            JobState::Active => BatchStatus::Active,
            JobState::Completed => BatchStatus::Completed,
            JobState::Failed => BatchStatus::Failed,
        }
    }
}

/// Worker-side handler processing one batch.
pub struct BatchJobHandler {
    executor: Arc<RealTimeExecutor>,
    store: Arc<BatchStore>,
}

impl BatchJobHandler {
    pub fn new(executor: Arc<RealTimeExecutor>, store: Arc<BatchStore>) -> Self {
        Self { executor, store }
    }
}

#[async_trait]
impl JobHandler for BatchJobHandler {
    async fn run(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, JobError> {
        let payload: BatchPayload = serde_json::from_value(ctx.payload().clone())
            .map_err(|e| JobError::Fatal(format!("invalid batch payload: {}", e)))?;

        if let Err(e) = self.store.mark_active(&payload.batch_id) {
            tracing::warn!(batch_id = %payload.batch_id, "Failed to mark batch active: {}", e);
        }

        tracing::info!(
            batch_id = %payload.batch_id,
            job_ref = %ctx.job_ref(),
            model = %payload.model,
            inputs = payload.inputs.len(),
            attempt = ctx.attempt(),
            "Processing batch"
        );

        let started = Instant::now();
        let total = payload.inputs.len();
        let mut results = Vec::with_capacity(total);

        for (index, input) in payload.inputs.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(JobError::Fatal(CANCELLED_REASON.to_string()));
            }

            // Per-item model failures become error results; anything else fails the attempt.
            let result = self
                .executor
                .run_item(&payload.model, input, payload.options.skip_cache, DeliveryMode::Batch)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))?;

            results.push(BatchItemResult {
                index,
                id: input_id(input),
                success: result.is_success(),
                output: result.output,
                error: result.error,
                latency_ms: result.latency_ms,
                cached: result.cached,
            });
            ctx.report_progress(progress_percent(index + 1, total));
        }

        let output = BatchOutput {
            results,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        serde_json::to_value(&output).map_err(|e| JobError::Fatal(e.to_string()))
    }

    async fn finished(&self, job: &JobSnapshot) {
        let Some(batch_id) = job.payload.get("batchId").and_then(|v| v.as_str()) else {
            return;
        };

        let outcome = match job.state {
            JobState::Completed => {
                match job
                    .return_value
                    .clone()
                    .map(serde_json::from_value::<BatchOutput>)
                {
                    Some(Ok(output)) => self.store.finalize_completed(
                        batch_id,
                        &output.results,
                        output.processing_time_ms,
                    ),
                    _ => self
                        .store
                        .finalize_failed(batch_id, "batch produced no results", 0),
                }
            }
            JobState::Failed => {
                let input_count = job
                    .payload
                    .get("inputs")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                let processed = job.progress as usize * input_count / 100;
                let reason = job.error.as_deref().unwrap_or("batch failed");
                self.store.finalize_failed(batch_id, reason, processed)
            }
            JobState::Queued | JobState::Active => return,
        };

        match outcome {
            Ok(_) => tracing::info!(batch_id, status = ?job.state, "Batch finished"),
            Err(e) => tracing::error!(batch_id, "Failed to persist batch outcome: {}", e),
        }
    }
}

/// Owner-facing batch operations.
pub struct BatchCoordinator {
    executor: Arc<RealTimeExecutor>,
    queue: Arc<JobQueue>,
    store: Arc<BatchStore>,
    retry: RetryPolicy,
    max_inputs: usize,
    retention: Duration,
    base_path: String,
}

impl BatchCoordinator {
    pub fn new(
        executor: Arc<RealTimeExecutor>,
        queue: Arc<JobQueue>,
        store: Arc<BatchStore>,
        retry: RetryPolicy,
        max_inputs: usize,
        retention: Duration,
        base_path: &str,
    ) -> Self {
        Self {
            executor,
            queue,
            store,
            retry,
            max_inputs,
            retention,
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    /// Handler to register on the job queue for [`BATCH_JOB_TYPE`].
    pub fn job_handler(&self) -> Arc<BatchJobHandler> {
        Arc::new(BatchJobHandler::new(self.executor.clone(), self.store.clone()))
    }

    /// Validate and enqueue a batch without waiting for it to run.
    pub async fn submit(
        &self,
        owner_id: &str,
        model: &str,
        inputs: Vec<serde_json::Value>,
        options: InferenceOptions,
    ) -> Result<SubmitBatchResponse> {
        let registry = self.executor.registry();
        registry.get(model)?;

        if inputs.is_empty() {
            return Err(GatewayError::InvalidRequest("inputs must not be empty".to_string()));
        }
        if inputs.len() > self.max_inputs {
            return Err(GatewayError::BatchTooLarge {
                count: inputs.len(),
                max: self.max_inputs,
            });
        }

        let input_count = inputs.len();
        let estimate = registry.estimate(model, input_count)?;
        let batch_id = format!("batch-{}", uuid::Uuid::new_v4());

        // Persist first so a fast worker always finds the record to finalize.
        self.store
            .insert(&BatchRecord::queued(&batch_id, owner_id, model, "", input_count))?;

        let payload = serde_json::to_value(BatchPayload {
            batch_id: batch_id.clone(),
            owner_id: owner_id.to_string(),
            model: model.to_string(),
            inputs,
            options,
        })
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let job_ref = match self
            .queue
            .enqueue(BATCH_JOB_TYPE, payload, self.retry.clone())
            .await
        {
            Ok(job_ref) => job_ref,
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&batch_id) {
                    tracing::warn!(batch_id = %batch_id, "Failed to remove rejected batch: {}", cleanup);
                }
                return Err(e);
            }
        };
        self.store.attach_job(&batch_id, job_ref.as_str())?;

        tracing::info!(batch_id = %batch_id, owner_id, model, input_count, "Batch submitted");

        Ok(SubmitBatchResponse {
            status_url: format!("{}/batch/{}", self.base_path, batch_id),
            result_url: format!("{}/batch/{}/results", self.base_path, batch_id),
            batch_id,
            job_ref: job_ref.to_string(),
            status: BatchStatus::Queued,
            input_count,
            estimated_time_secs: estimate.as_secs().max(1),
        })
    }

    /// Current status of a batch owned by `owner_id`.
    pub async fn get_status(&self, batch_id: &str, owner_id: &str) -> Result<BatchStatusView> {
        let (record, job) = self.resolve(batch_id, owner_id).await?;
        Ok(self.status_view(&record, job.as_ref()))
    }

    /// Results of a completed batch owned by `owner_id`.
    pub async fn get_results(
        &self,
        batch_id: &str,
        owner_id: &str,
        format: ResultFormat,
    ) -> Result<BatchResults> {
        let (record, job) = self.resolve(batch_id, owner_id).await?;
        let status = current_status(&record, job.as_ref());

        match status {
            BatchStatus::Queued | BatchStatus::Active => {
                return Err(GatewayError::NotReady { status });
            }
            BatchStatus::Failed => {
                let reason = job
                    .as_ref()
                    .and_then(|j| j.error.clone())
                    .or(record.error)
                    .unwrap_or_else(|| "batch failed".to_string());
                return Err(GatewayError::BatchFailed(reason));
            }
            BatchStatus::Completed => {}
        }

        // The store may lag the queue by the terminal notification.
        let (results, processing_time_ms) = match (record.results, record.processing_time_ms) {
            (Some(results), Some(ms)) => (results, ms),
            _ => {
                let output = job
                    .and_then(|j| j.return_value)
                    .map(serde_json::from_value::<BatchOutput>)
                    .transpose()
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
                    .ok_or_else(|| GatewayError::Internal("batch results missing".to_string()))?;
                (output.results, output.processing_time_ms)
            }
        };

        match format {
            ResultFormat::Json => Ok(BatchResults::Json(BatchResultsResponse {
                batch_id: record.batch_id,
                summary: BatchSummary::from_results(&results),
                results,
                processing_time_ms,
                completed_at: record.completed_at.unwrap_or_else(Utc::now),
            })),
            ResultFormat::Csv => Ok(BatchResults::Csv(results_to_csv(&results)?)),
        }
    }

    /// Request cancellation of a batch owned by `owner_id`.
    ///
    /// Terminal batches are left untouched and their status is returned.
    pub async fn cancel(&self, batch_id: &str, owner_id: &str) -> Result<BatchStatusView> {
        let (record, job) = self.resolve(batch_id, owner_id).await?;
        if current_status(&record, job.as_ref()).is_terminal() {
            return Ok(self.status_view(&record, job.as_ref()));
        }

        let job_ref = JobRef::from(record.job_ref.clone());
        if self.queue.cancel(&job_ref, CANCELLED_REASON).await.is_none() {
            // The queue no longer knows the job; settle the record directly.
            self.store
                .finalize_failed(batch_id, CANCELLED_REASON, record.processed_count)?;
        }
        tracing::info!(batch_id, owner_id, "Batch cancellation requested");

        self.get_status(batch_id, owner_id).await
    }

    /// Remove expired batches from the store and the queue.
    ///
    /// Unfinished batches past retention have their jobs cancelled so workers
    /// stop spending model calls on them.
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.store.purge_expired(self.retention)?;
        for job_ref in purged.abandoned_jobs {
            self.queue.cancel(&JobRef::from(job_ref), EXPIRED_REASON).await;
        }
        self.queue.purge_finished(self.retention).await;
        Ok(purged.deleted)
    }

    /// Load a batch, enforcing ownership and retention, with its live job state.
    async fn resolve(
        &self,
        batch_id: &str,
        owner_id: &str,
    ) -> Result<(BatchRecord, Option<JobSnapshot>)> {
        let not_found = || GatewayError::NotFound(format!("batch {}", batch_id));

        let record = self.store.get(batch_id)?.ok_or_else(not_found)?;
        if record.owner_id != owner_id {
            return Err(GatewayError::AccessDenied);
        }
        // Terminal batches age from completion, unfinished ones from creation.
        let since = record.completed_at.unwrap_or(record.created_at);
        let age = (Utc::now() - since).to_std().unwrap_or_default();
        if age > self.retention {
            return Err(not_found());
        }

        let job = if record.job_ref.is_empty() {
            None
        } else {
            self.queue.get_state(&JobRef::from(record.job_ref.clone())).await
        };
        Ok((record, job))
    }

    fn status_view(&self, record: &BatchRecord, job: Option<&JobSnapshot>) -> BatchStatusView {
        let status = current_status(record, job);

        let (progress, processed_count) = match (status, job) {
            (BatchStatus::Completed, _) => (100, record.input_count),
            (_, Some(job)) if !record.status.is_terminal() => {
                let processed = job.progress as usize * record.input_count / 100;
                (job.progress, processed)
            }
            _ => (
                progress_percent(record.processed_count, record.input_count),
                record.processed_count,
            ),
        };

        let estimated_time_remaining_secs = (!status.is_terminal())
            .then(|| {
                self.executor
                    .registry()
                    .estimate(&record.model, record.input_count - processed_count)
                    .ok()
                    .map(|d| d.as_secs())
            })
            .flatten();

        let error = match status {
            BatchStatus::Failed => job
                .and_then(|j| j.error.clone())
                .or_else(|| record.error.clone()),
            _ => None,
        };

        let completed_at = record
            .completed_at
            .or_else(|| job.filter(|j| j.state.is_terminal()).and_then(|j| j.finished_at));

        BatchStatusView {
            batch_id: record.batch_id.clone(),
            status,
            progress,
            input_count: record.input_count,
            processed_count,
            created_at: record.created_at,
            completed_at,
            estimated_time_remaining_secs,
            error,
        }
    }
}

/// Status of a batch, preferring the persisted terminal state over the queue.
fn current_status(record: &BatchRecord, job: Option<&JobSnapshot>) -> BatchStatus {
    if record.status.is_terminal() {
        return record.status;
    }
    match job {
        Some(job) => job.state.into(),
        None => record.status,
    }
}

/// Render results as CSV: fixed columns, then one column per top-level
/// output field in name order.
pub fn results_to_csv(results: &[BatchItemResult]) -> Result<String> {
    let mut fields = BTreeSet::new();
    for output in results.iter().filter_map(|r| r.output.as_ref()) {
        match output.as_object() {
            Some(map) => fields.extend(map.keys().cloned()),
            None => {
                fields.insert("output".to_string());
            }
        }
    }

    let csv_err = |e: csv::Error| GatewayError::Internal(format!("CSV export failed: {}", e));
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "index".to_string(),
        "id".to_string(),
        "success".to_string(),
        "latency_ms".to_string(),
        "error".to_string(),
    ];
    header.extend(fields.iter().cloned());
    writer.write_record(&header).map_err(csv_err)?;

    for result in results {
        let mut row = vec![
            result.index.to_string(),
            result.id.clone().unwrap_or_default(),
            result.success.to_string(),
            result.latency_ms.to_string(),
            result.error.clone().unwrap_or_default(),
        ];
        for field in &fields {
            let value = match &result.output {
                Some(serde_json::Value::Object(map)) => map.get(field),
                Some(other) if field == "output" => Some(other),
                _ => None,
            };
            row.push(value.map(csv_cell).unwrap_or_default());
        }
        writer.write_record(&row).map_err(csv_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| GatewayError::Internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn csv_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::gateway::job_queue::JobWorkerPool;
    use crate::gateway::metrics::Metrics;
    use crate::models::ModelRegistry;
    use crate::test_util::{spec, CountingModel, FailOnFlagModel, FlakyModel, SlowModel};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct Harness {
        coordinator: BatchCoordinator,
        queue: Arc<JobQueue>,
        pool: JobWorkerPool,
    }

    async fn harness_with(
        model: Arc<dyn crate::models::ModelInvoker>,
        retry: RetryPolicy,
        retention: Duration,
    ) -> Harness {
        let mut registry = ModelRegistry::new();
        registry.register(spec("skills-extraction"), model);
        let executor = Arc::new(RealTimeExecutor::new(
            Arc::new(registry),
            Arc::new(MemoryCache::new()),
            Arc::new(Metrics::new()),
            Duration::from_secs(300),
            Duration::from_secs(30),
        ));
        let queue = Arc::new(JobQueue::new(100));
        let store = Arc::new(BatchStore::in_memory().unwrap());
        let coordinator = BatchCoordinator::new(
            executor,
            queue.clone(),
            store,
            retry,
            10,
            retention,
            "/v1",
        );
        queue.register_handler(BATCH_JOB_TYPE, coordinator.job_handler()).await;
        let pool = JobWorkerPool::spawn(queue.clone(), 2, Duration::from_millis(5));
        Harness {
            coordinator,
            queue,
            pool,
        }
    }

    async fn harness(model: Arc<dyn crate::models::ModelInvoker>) -> Harness {
        harness_with(model, RetryPolicy::no_retry(), Duration::from_secs(3600)).await
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: 0.0,
        }
    }

    /// Panics on the first `n` calls, then echoes.
    struct CrashingModel {
        crashes: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CrashingModel {
        fn crashing_first(n: usize) -> Self {
            Self {
                crashes: n,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl crate::models::ModelInvoker for CrashingModel {
        async fn invoke(
            &self,
            model: &str,
            input: &serde_json::Value,
        ) -> std::result::Result<serde_json::Value, crate::error::ModelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.crashes {
                panic!("model backend crashed on call {}", call);
            }
            Ok(json!({"model": model, "echo": input}))
        }
    }

    async fn wait_terminal(coordinator: &BatchCoordinator, batch_id: &str, owner: &str) -> BatchStatusView {
        for _ in 0..300 {
            let view = coordinator.get_status(batch_id, owner).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {} did not finish", batch_id);
    }

    #[tokio::test]
    async fn test_batch_with_failing_item_completes() {
        let h = harness(Arc::new(FailOnFlagModel)).await;
        let inputs = vec![
            json!({"id": "a", "text": "rust"}),
            json!({"id": "b", "fail": true}),
            json!({"id": "c", "text": "sql"}),
        ];

        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", inputs, InferenceOptions::default())
            .await
            .unwrap();
        assert_eq!(submitted.status, BatchStatus::Queued);
        assert_eq!(submitted.input_count, 3);
        assert_eq!(submitted.status_url, format!("/v1/batch/{}", submitted.batch_id));

        let view = wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.processed_count, 3);

        let BatchResults::Json(results) = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
            .await
            .unwrap()
        else {
            panic!("expected JSON results");
        };
        let indexes: Vec<usize> = results.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(results.results[0].success);
        assert!(!results.results[1].success);
        assert!(results.results[1].error.is_some());
        assert!(results.results[2].success);
        assert_eq!(results.results[1].id.as_deref(), Some("b"));
        assert_eq!(results.summary.succeeded, 2);
        assert_eq!(results.summary.failed, 1);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let h = harness(Arc::new(CountingModel::default())).await;

        let err = h
            .coordinator
            .submit("user-1", "unknown", vec![json!(1)], InferenceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidModel(_)));

        let err = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![], InferenceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));

        let err = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!(1); 11], InferenceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BatchTooLarge { count: 11, max: 10 }));

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_owners_are_denied_in_every_state() {
        let h = harness(Arc::new(SlowModel::new(Duration::from_millis(100)))).await;
        let submitted = h
            .coordinator
            .submit("owner", "skills-extraction", vec![json!(1)], InferenceOptions::default())
            .await
            .unwrap();

        let err = h.coordinator.get_status(&submitted.batch_id, "intruder").await.unwrap_err();
        assert!(matches!(err, GatewayError::AccessDenied));

        wait_terminal(&h.coordinator, &submitted.batch_id, "owner").await;
        let err = h
            .coordinator
            .get_results(&submitted.batch_id, "intruder", ResultFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AccessDenied));
        let err = h.coordinator.cancel(&submitted.batch_id, "intruder").await.unwrap_err();
        assert!(matches!(err, GatewayError::AccessDenied));

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_results_before_completion_are_not_ready() {
        let h = harness(Arc::new(SlowModel::new(Duration::from_millis(200)))).await;
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!(1), json!(2)], InferenceOptions::default())
            .await
            .unwrap();

        let err = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotReady { .. }));

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let h = harness(Arc::new(CountingModel::default())).await;
        let err = h.coordinator.get_status("batch-missing", "user-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_ends_batch_as_failed_and_stays_terminal() {
        let h = harness(Arc::new(SlowModel::new(Duration::from_millis(50)))).await;
        let inputs: Vec<_> = (0..10).map(|i| json!({"n": i})).collect();
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", inputs, InferenceOptions::default())
            .await
            .unwrap();

        h.coordinator.cancel(&submitted.batch_id, "user-1").await.unwrap();
        let view = wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        assert_eq!(view.status, BatchStatus::Failed);
        assert_eq!(view.error.as_deref(), Some(CANCELLED_REASON));

        let err = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BatchFailed(reason) if reason == CANCELLED_REASON));

        // A second cancellation leaves the terminal batch unchanged.
        let again = h.coordinator.cancel(&submitted.batch_id, "user-1").await.unwrap();
        assert_eq!(again.status, BatchStatus::Failed);
        assert_eq!(again.error, view.error);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cached_items_are_reused_across_batches() {
        let model = Arc::new(CountingModel::default());
        let h = harness(model.clone()).await;

        for _ in 0..2 {
            let submitted = h
                .coordinator
                .submit("user-1", "skills-extraction", vec![json!({"text": "go"})], InferenceOptions::default())
                .await
                .unwrap();
            wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_csv_results() {
        let h = harness(Arc::new(FailOnFlagModel)).await;
        let submitted = h
            .coordinator
            .submit(
                "user-1",
                "skills-extraction",
                vec![json!({"id": "a"}), json!({"fail": true})],
                InferenceOptions::default(),
            )
            .await
            .unwrap();
        wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;

        let BatchResults::Csv(body) = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Csv)
            .await
            .unwrap()
        else {
            panic!("expected CSV results");
        };
        let mut lines = body.lines();
        assert_eq!(lines.next(), Some("index,id,success,latency_ms,error,echo,model"));
        assert!(lines.next().unwrap().starts_with("0,a,true,"));
        assert!(lines.next().unwrap().starts_with("1,,false,"));

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_crashed_attempt_is_retried_until_batch_completes() {
        let model = Arc::new(CrashingModel::crashing_first(1));
        let h = harness_with(model.clone(), fast_retry(3), Duration::from_secs(3600)).await;
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!({"n": 1}), json!({"n": 2})], InferenceOptions::default())
            .await
            .unwrap();

        let view = wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(view.processed_count, 2);
        let job = h.queue.get_state(&JobRef::from(submitted.job_ref)).await.unwrap();
        assert_eq!(job.attempts, 2);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_fails_once_retries_are_exhausted() {
        let model = Arc::new(CrashingModel::crashing_first(usize::MAX));
        let h = harness_with(model.clone(), fast_retry(3), Duration::from_secs(3600)).await;
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!({"n": 1})], InferenceOptions::default())
            .await
            .unwrap();

        let view = wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        assert_eq!(view.status, BatchStatus::Failed);
        assert!(view.error.as_deref().unwrap().contains("panicked"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);

        let err = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BatchFailed(_)));

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_model_failures_do_not_retry_the_batch() {
        let model = Arc::new(FlakyModel::failing_first(1));
        let h = harness_with(model.clone(), fast_retry(3), Duration::from_secs(3600)).await;
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!({"n": 1}), json!({"n": 2})], InferenceOptions::default())
            .await
            .unwrap();

        let view = wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;
        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_completed_batch_is_stable_after_queue_forgets_job() {
        let h = harness(Arc::new(FailOnFlagModel)).await;
        let submitted = h
            .coordinator
            .submit(
                "user-1",
                "skills-extraction",
                vec![json!({"id": "a"}), json!({"fail": true})],
                InferenceOptions::default(),
            )
            .await
            .unwrap();
        wait_terminal(&h.coordinator, &submitted.batch_id, "user-1").await;

        // Wait until the record is persisted, then drop the job from the queue.
        for _ in 0..100 {
            let record = h.coordinator.store.get(&submitted.batch_id).unwrap().unwrap();
            if record.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let first = h.coordinator.get_status(&submitted.batch_id, "user-1").await.unwrap();
        let BatchResults::Json(first_results) = h
            .coordinator
            .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
            .await
            .unwrap()
        else {
            panic!("expected JSON results");
        };
        assert_eq!(h.queue.purge_finished(Duration::ZERO).await, 1);
        assert!(h.queue.get_state(&JobRef::from(submitted.job_ref.clone())).await.is_none());

        for _ in 0..3 {
            let view = h.coordinator.get_status(&submitted.batch_id, "user-1").await.unwrap();
            assert_eq!(view.status, BatchStatus::Completed);
            assert_eq!(view.progress, 100);
            assert_eq!(view.processed_count, 2);
            assert_eq!(view.completed_at, first.completed_at);

            let BatchResults::Json(results) = h
                .coordinator
                .get_results(&submitted.batch_id, "user-1", ResultFormat::Json)
                .await
                .unwrap()
            else {
                panic!("expected JSON results");
            };
            assert_eq!(results.results, first_results.results);
            assert_eq!(results.summary.succeeded, 1);
            assert_eq!(results.summary.failed, 1);
        }

        // Cancelling afterwards changes nothing either.
        let view = h.coordinator.cancel(&submitted.batch_id, "user-1").await.unwrap();
        assert_eq!(view.status, BatchStatus::Completed);

        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unfinished_batch_expires_from_creation_time() {
        let model = Arc::new(SlowModel::new(Duration::from_secs(2)));
        let h = harness_with(model.clone(), RetryPolicy::no_retry(), Duration::from_millis(50)).await;
        let submitted = h
            .coordinator
            .submit("user-1", "skills-extraction", vec![json!(1), json!(2)], InferenceOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let err = h.coordinator.get_status(&submitted.batch_id, "user-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        assert_eq!(h.coordinator.purge_expired().await.unwrap(), 1);
        assert!(h.coordinator.store.get(&submitted.batch_id).unwrap().is_none());

        // The abandoned job is told to stop before its second item.
        let job_ref = JobRef::from(submitted.job_ref);
        let mut state = None;
        for _ in 0..400 {
            state = h.queue.get_state(&job_ref).await.map(|j| (j.state, j.error));
            if matches!(state, Some((JobState::Failed, _)) | None) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if let Some((job_state, error)) = state {
            assert_eq!(job_state, JobState::Failed);
            assert_eq!(error.as_deref(), Some(EXPIRED_REASON));
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        h.pool.shutdown().await;
    }

    #[test]
    fn test_csv_columns_sorted_and_nested_as_json() {
        let results = vec![
            BatchItemResult {
                index: 0,
                id: Some("x".to_string()),
                success: true,
                output: Some(json!({"skills": ["rust", "sql"], "confidence": 0.9})),
                error: None,
                latency_ms: 12,
                cached: false,
            },
            BatchItemResult {
                index: 1,
                id: None,
                success: false,
                output: None,
                error: Some("timed out".to_string()),
                latency_ms: 30,
                cached: false,
            },
        ];

        let body = results_to_csv(&results).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "index,id,success,latency_ms,error,confidence,skills");
        assert_eq!(lines[1], r#"0,x,true,12,,0.9,"[""rust"",""sql""]""#);
        assert_eq!(lines[2], "1,,false,30,timed out,,");
    }
}
