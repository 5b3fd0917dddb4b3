//! Bounded-concurrency worker pool.
//!
//! Each worker loop claims one job at a time from the [`JobQueue`], runs a
//! fresh [`ResearchAgent`] whose progress is published on the job's
//! [`ProgressHub`] topic, and reports the outcome back to the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use leadscout_search::SearchProvider;
use leadscout_shared::{
    AgentConfig, EnrichmentJob, ProgressEvent, ProgressStep, Result, WorkerConfig,
};

use crate::agent::{ResearchAgent, ResearchStore};
use crate::extractor::FieldExtractor;
use crate::progress::ProgressHub;
use crate::queue::{Claim, FailureOutcome, JobQueue};

/// How often the pool drops expired jobs and progress markers.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a pool needs to run jobs.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    hub: ProgressHub,
    provider: Arc<dyn SearchProvider>,
    store: Arc<dyn ResearchStore>,
    extractor: Arc<FieldExtractor>,
    agent_config: AgentConfig,
    config: WorkerConfig,
    recover_on_start: bool,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        hub: ProgressHub,
        provider: Arc<dyn SearchProvider>,
        store: Arc<dyn ResearchStore>,
        agent_config: AgentConfig,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            hub,
            provider,
            store,
            extractor: Arc::new(FieldExtractor::new()),
            agent_config,
            config,
            recover_on_start: false,
        }
    }

    /// Use a custom extractor instead of the built-in rules.
    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Requeue every `active` job when the pool starts.
    ///
    /// Only for a pool that is the sole worker of its database. Without it,
    /// jobs of a crashed process come back once their lease expires.
    pub fn with_startup_recovery(mut self) -> Self {
        self.recover_on_start = true;
        self
    }

    /// Spawn the workers and the reaper, after startup recovery if enabled.
    pub async fn start(self) -> Result<WorkerHandle> {
        if self.recover_on_start {
            self.queue.recover_in_flight().await?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_timeout = self.config.shutdown_timeout;
        let concurrency = self.config.concurrency;
        let pool = Arc::new(self);
        let mut tasks = JoinSet::new();

        for worker_id in 0..concurrency {
            let pool = Arc::clone(&pool);
            let shutdown_rx = shutdown_tx.subscribe();
            tasks.spawn(
                async move { pool.worker_loop(shutdown_rx).await }
                    .instrument(info_span!("worker", worker_id)),
            );
        }

        let reaper = Arc::clone(&pool);
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move { reaper.reaper_loop(shutdown_rx).await });

        info!(concurrency, "worker pool started");
        Ok(WorkerHandle {
            shutdown_tx,
            tasks,
            shutdown_timeout,
        })
    }

    async fn worker_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            match self.queue.claim().await {
                Ok(Some(Claim::Ready(job))) => self.process(job).await,
                Ok(Some(Claim::Exhausted(job))) => self.close_exhausted(&job),
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = self.queue.wait_for_work() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.queue.config().poll_interval) => {}
                    }
                }
            }
        }
        debug!("worker stopped");
    }

    /// Run one claimed job to a queue outcome.
    #[instrument(skip_all, fields(job_id = %job.id, subject_id = %job.subject_id, attempt = job.attempts_made))]
    pub async fn process(&self, job: EnrichmentJob) {
        let agent = ResearchAgent::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.extractor),
            self.agent_config.clone(),
        );
        let publisher = self.hub.publisher(job.id.clone());

        match agent.run(&job.subject_id, &publisher).await {
            Ok(snippet_id) => match self.queue.complete(&job, &snippet_id).await {
                Ok(true) => self.hub.mark_finished(&job.id),
                Ok(false) => {}
                // Left active; the lease expiry re-delivers it.
                Err(e) => error!(error = %e, "could not record job completion"),
            },
            Err(cause) => match self.queue.fail(&job, &cause).await {
                Ok(FailureOutcome::Failed) => self.hub.mark_finished(&job.id),
                Ok(_) => {}
                Err(e) => error!(error = %e, "could not record job failure"),
            },
        }
    }

    /// Tell observers of a job that ran out of attempts on re-delivery.
    fn close_exhausted(&self, job: &EnrichmentJob) {
        let reason = job.last_error.clone().unwrap_or_default();
        self.hub.publish(
            &job.id,
            ProgressEvent::new(ProgressStep::Error, "Job failed after too many attempts.")
                .with("kind", "exhausted")
                .with("detail", reason),
        );
        self.hub.mark_finished(&job.id);
    }

    async fn reaper_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(REAP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.queue.reap().await {
                        warn!(error = %e, "job reaper failed");
                    }
                    self.hub.reap(self.queue.config().retention);
                }
            }
        }
    }
}

/// A running pool. Call [`shutdown`](WorkerHandle::shutdown) to stop it.
pub struct WorkerHandle {
    shutdown_tx: broadcast::Sender<()>,
    tasks: JoinSet<()>,
    shutdown_timeout: Duration,
}

impl WorkerHandle {
    /// Stop claiming, let active jobs finish within the shutdown timeout,
    /// then abort whatever is left.
    ///
    /// Aborted jobs stay `active` and are re-delivered after their lease
    /// expires or when the next pool starts.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());

        let tasks = &mut self.tasks;
        let drain = async move {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task panicked");
                }
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "active jobs did not finish in time, aborting"
            );
            self.tasks.abort_all();
        }
        info!("worker pool stopped");
    }
}
