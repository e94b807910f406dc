//! Background job queue.
//!
//! Jobs are enqueued with a type, a JSON payload and a retry policy, then
//! claimed by a pool of workers that run the handler registered for the type.
//! State moves `queued -> active -> completed | failed`, returning to `queued`
//! when a failed attempt is retried after its backoff delay.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use super::retry::RetryPolicy;
use crate::error::{GatewayError, Result};

/// Opaque handle to a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobRef(String);

impl JobRef {
    fn generate() -> Self {
        Self(format!("job-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a job attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    /// The attempt failed but may succeed if retried.
    #[error("{0}")]
    Retryable(String),
    /// The job must not be retried.
    #[error("{0}")]
    Fatal(String),
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_ref: JobRef,
    pub job_type: String,
    #[serde(skip)]
    pub payload: Arc<serde_json::Value>,
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
    pub return_value: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a handler sees while running one attempt.
pub struct JobContext {
    job_ref: JobRef,
    payload: Arc<serde_json::Value>,
    attempt: u32,
    progress: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn job_ref(&self) -> &JobRef {
        &self.job_ref
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report progress as a percentage.
    ///
    /// Progress never moves backwards within an attempt; every attempt starts
    /// again from zero.
    pub fn report_progress(&self, percent: u8) {
        self.progress.fetch_max(percent.min(100), Ordering::SeqCst);
    }

    /// Whether cancellation was requested for this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt and produce the job's return value.
    async fn run(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, JobError>;

    /// Called once when the job reaches a terminal state.
    async fn finished(&self, _job: &JobSnapshot) {}
}

struct JobRecord {
    job_type: String,
    payload: Arc<serde_json::Value>,
    policy: RetryPolicy,
    state: JobState,
    progress: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
    /// Failure reason recorded by `cancel`, overriding the handler's error.
    cancel_reason: Option<String>,
    attempts: u32,
    return_value: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be claimed.
    ready_at: Instant,
}

impl JobRecord {
    fn snapshot(&self, job_ref: &JobRef) -> JobSnapshot {
        JobSnapshot {
            job_ref: job_ref.clone(),
            job_type: self.job_type.clone(),
            payload: self.payload.clone(),
            state: self.state,
            progress: self.progress.load(Ordering::SeqCst),
            attempts: self.attempts,
            return_value: self.return_value.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<JobRef, JobRecord>,
    /// Jobs waiting to be claimed, in submission order.
    pending: VecDeque<JobRef>,
}

/// A job claimed by a worker.
struct ClaimedJob {
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
}

/// Shared job queue.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    /// Notifier for when new work becomes available.
    notify: Arc<Notify>,
    max_pending: usize,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create a queue accepting up to `max_pending` unfinished jobs.
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            handlers: RwLock::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
            max_pending,
            closed: AtomicBool::new(false),
        }
    }

    /// Register the handler for a job type.
    pub async fn register_handler(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert(job_type.to_string(), handler);
    }

    /// Get a reference to the notifier for waiting on new jobs.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Stop accepting new jobs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueue a job.
    ///
    /// Fails with `QueueUnavailable` when the queue is closed, full, or has
    /// no handler for `job_type`. Jobs are never silently dropped.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        policy: RetryPolicy,
    ) -> Result<JobRef> {
        if self.is_closed() {
            return Err(GatewayError::QueueUnavailable("queue is shut down".to_string()));
        }
        if !self.handlers.read().await.contains_key(job_type) {
            return Err(GatewayError::QueueUnavailable(format!(
                "no worker handles job type '{}'",
                job_type
            )));
        }

        let job_ref = JobRef::generate();
        {
            let mut inner = self.inner.lock().await;
            let unfinished = inner.jobs.values().filter(|j| !j.state.is_terminal()).count();
            if unfinished >= self.max_pending {
                return Err(GatewayError::QueueUnavailable(format!(
                    "queue is full ({} unfinished jobs)",
                    unfinished
                )));
            }

            inner.jobs.insert(
                job_ref.clone(),
                JobRecord {
                    job_type: job_type.to_string(),
                    payload: Arc::new(payload),
                    policy,
                    state: JobState::Queued,
                    progress: Arc::new(AtomicU8::new(0)),
                    cancelled: Arc::new(AtomicBool::new(false)),
                    cancel_reason: None,
                    attempts: 0,
                    return_value: None,
                    error: None,
                    created_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                    ready_at: Instant::now(),
                },
            );
            inner.pending.push_back(job_ref.clone());
        }

        tracing::debug!(job_ref = %job_ref, job_type, "Job enqueued");
        self.notify.notify_one();

        Ok(job_ref)
    }

    /// Current state of a job, or `None` if unknown or purged.
    pub async fn get_state(&self, job_ref: &JobRef) -> Option<JobSnapshot> {
        let inner = self.inner.lock().await;
        inner.jobs.get(job_ref).map(|job| job.snapshot(job_ref))
    }

    /// Request cancellation of a job.
    ///
    /// A queued job fails immediately; an active job observes the flag between
    /// items and fails when its handler gives up. Terminal jobs are unchanged.
    pub async fn cancel(&self, job_ref: &JobRef, reason: &str) -> Option<JobSnapshot> {
        let (snapshot, newly_failed) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let job = inner.jobs.get_mut(job_ref)?;
            if job.state.is_terminal() {
                return Some(job.snapshot(job_ref));
            }
            job.cancelled.store(true, Ordering::SeqCst);
            job.cancel_reason = Some(reason.to_string());

            if job.state == JobState::Queued {
                job.error = Some(reason.to_string());
                job.finish(JobState::Failed);
                let snapshot = job.snapshot(job_ref);
                inner.pending.retain(|r| r != job_ref);
                (snapshot, true)
            } else {
                (job.snapshot(job_ref), false)
            }
        };

        if newly_failed {
            tracing::info!(job_ref = %job_ref, "Queued job cancelled");
            if let Some(handler) = self.handlers.read().await.get(&snapshot.job_type).cloned() {
                handler.finished(&snapshot).await;
            }
        }

        Some(snapshot)
    }

    /// Number of jobs waiting to be claimed.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Remove terminal jobs that finished more than `retention` ago.
    pub async fn purge_finished(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| match job.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        before - inner.jobs.len()
    }

    /// Claim the oldest job whose backoff delay has elapsed.
    async fn claim(&self) -> Option<ClaimedJob> {
        let handlers = self.handlers.read().await;
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let position = inner.pending.iter().position(|job_ref| {
            inner
                .jobs
                .get(job_ref)
                .map(|job| job.ready_at <= now)
                .unwrap_or(true)
        })?;
        let job_ref = inner.pending.remove(position)?;
        let job = inner.jobs.get_mut(&job_ref)?;

        let handler = handlers.get(&job.job_type)?.clone();
        job.state = JobState::Active;
        job.attempts += 1;
        job.progress.store(0, Ordering::SeqCst);
        job.started_at.get_or_insert_with(Utc::now);

        Some(ClaimedJob {
            handler,
            ctx: JobContext {
                job_ref,
                payload: job.payload.clone(),
                attempt: job.attempts,
                progress: job.progress.clone(),
                cancelled: job.cancelled.clone(),
            },
        })
    }

    /// Run a claimed job and record its outcome.
    async fn execute(&self, claimed: ClaimedJob) {
        let ClaimedJob { handler, ctx } = claimed;
        let job_ref = ctx.job_ref.clone();
        tracing::info!(job_ref = %job_ref, attempt = ctx.attempt, "Job started");

        // Run on its own task so a panicking handler counts as a failed attempt.
        let task_handler = handler.clone();
        let outcome = match tokio::spawn(async move {
            let result = task_handler.run(&ctx).await;
            (ctx, result)
        })
        .await
        {
            Ok((_, result)) => result,
            Err(e) => Err(JobError::Retryable(format!("job panicked: {}", e))),
        };

        let finished = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(job) = inner.jobs.get_mut(&job_ref) else {
                return;
            };

            let cancel_reason = job.cancel_reason.clone();
            match outcome {
                Ok(value) => {
                    job.progress.store(100, Ordering::SeqCst);
                    job.return_value = Some(value);
                    job.error = None;
                    job.finish(JobState::Completed);
                    tracing::info!(job_ref = %job_ref, attempts = job.attempts, "Job completed");
                    Some(job.snapshot(&job_ref))
                }
                Err(JobError::Retryable(error))
                    if cancel_reason.is_none() && job.policy.should_retry(job.attempts) =>
                {
                    let delay = job.policy.delay_after(job.attempts);
                    tracing::warn!(
                        job_ref = %job_ref,
                        attempt = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Job attempt failed, retrying: {}",
                        error
                    );
                    job.error = Some(error);
                    job.state = JobState::Queued;
                    job.ready_at = Instant::now() + delay;
                    inner.pending.push_back(job_ref.clone());
                    None
                }
                Err(JobError::Retryable(error)) | Err(JobError::Fatal(error)) => {
                    let error = cancel_reason.unwrap_or(error);
                    tracing::error!(
                        job_ref = %job_ref,
                        attempts = job.attempts,
                        "Job failed: {}",
                        error
                    );
                    job.error = Some(error);
                    job.finish(JobState::Failed);
                    Some(job.snapshot(&job_ref))
                }
            }
        };

        match finished {
            Some(snapshot) => handler.finished(&snapshot).await,
            None => self.notify.notify_one(),
        }
    }
}

/// Pool of background workers draining a [`JobQueue`].
pub struct JobWorkerPool {
    queue: Arc<JobQueue>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl JobWorkerPool {
    /// Spawn `workers` workers. Idle workers wake on new jobs or every
    /// `poll_interval` to pick up delayed retries.
    pub fn spawn(queue: Arc<JobQueue>, workers: usize, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|id| {
                let queue = queue.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(id, queue, poll_interval, shutdown_rx))
            })
            .collect();

        tracing::info!("Started {} job workers", workers.max(1));

        Self {
            queue,
            shutdown_tx,
            handles,
        }
    }

    /// Close the queue and wait for workers to finish their current job.
    pub async fn shutdown(self) {
        self.queue.close();
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Job workers stopped");
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<JobQueue>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let notify = queue.notifier();
    tracing::debug!(worker = id, "Job worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.claim().await {
            Some(claimed) => queue.execute(claimed).await,
            None => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::debug!(worker = id, "Job worker stopped");
}
