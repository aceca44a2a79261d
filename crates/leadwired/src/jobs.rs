//! C13 (ambient, per SPEC_FULL.md §2): a bounded async job pool replacing
//! the teacher-adjacent "thread-launch-and-forget" pattern named in
//! spec.md §9 for voicemail transcription dispatch and spreadsheet
//! logging. Neither transcription nor sheet export is implemented here —
//! both stay external collaborators (spec.md §1/§6) — this module only
//! owns the typed hand-off and best-effort execution so the webhook
//! response path never blocks on them.
use leadwire_runtime::spawn_named;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Job {
    Transcribe {
        recording_url: String,
        call_id: String,
        tenant_id: String,
    },
    SheetAppend {
        sheet_id: String,
        row: Vec<String>,
    },
}

#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, job: Job);
}

/// An executor that just logs — stands in for the real transcription
/// service / spreadsheet client, which are named out-of-scope external
/// collaborators (spec.md §1).
pub struct LoggingExecutor;

#[async_trait::async_trait]
impl JobExecutor for LoggingExecutor {
    async fn run(&self, job: Job) {
        match job {
            Job::Transcribe {
                recording_url,
                call_id,
                tenant_id,
            } => {
                tracing::info!(
                    call_id,
                    tenant_id,
                    recording_url,
                    "would dispatch to transcription service"
                );
            }
            Job::SheetAppend { sheet_id, row } => {
                tracing::info!(sheet_id, ?row, "would append row to spreadsheet export");
            }
        }
    }
}

#[derive(Clone)]
pub struct JobPool {
    tx: mpsc::Sender<Job>,
}

impl JobPool {
    /// Spawn `workers` consumer tasks sharing one bounded mpsc channel of
    /// capacity `capacity`. Best-effort: executor errors are logged, never
    /// retried, and never propagated to the webhook handler that
    /// submitted the job.
    pub fn spawn(workers: usize, capacity: usize, executor: std::sync::Arc<dyn JobExecutor>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let executor = executor.clone();
            spawn_named(Box::leak(format!("job-pool-{i}").into_boxed_str()), async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => executor.run(job).await,
                        None => return Ok(()),
                    }
                }
            });
        }
        Self { tx }
    }

    /// Submit a job without blocking the webhook response path. If the
    /// pool is saturated the job is dropped and logged rather than
    /// applying backpressure to the caller.
    pub fn submit(&self, job: Job) {
        if let Err(err) = self.tx.try_send(job) {
            tracing::warn!("job pool saturated, dropping job: {err}");
        }
    }
}
