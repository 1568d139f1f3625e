use crate::{
    archive::ExportDownload,
    catalog::CatalogClient,
    config::ExportConfig,
    export::{
        BatchResolver, ExportError, ExportJob, ExportKind, ExportSummary, IdentifierInput,
        JobState, ProgressSnapshot, ReviewDecision, Step, SuspensionToken, SuspensionView,
    },
    render::RenderClient,
};
use chrono::{TimeDelta, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info};
use uuid::Uuid;

/// In-memory registry of export jobs. Every job sits behind its own lock; the
/// background driver takes that lock for one record at a time, so a cancel
/// lands between records and never mid-render.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobHandle>>>,
    config: Arc<ExportConfig>,
    catalog: Arc<CatalogClient>,
    renderer: Arc<RenderClient>,
}

#[derive(Clone)]
struct JobHandle {
    job: Arc<Mutex<ExportJob>>,
    progress: watch::Receiver<ProgressSnapshot>,
}

impl JobRegistry {
    pub fn new(config: ExportConfig, catalog: CatalogClient, renderer: RenderClient) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            renderer: Arc::new(renderer),
        }
    }

    /// Creates a job and parses its input. Jobs whose input does not parse are
    /// not registered.
    pub async fn create(
        &self,
        kind: ExportKind,
        template_id: Option<String>,
        input: &IdentifierInput,
    ) -> Result<ProgressSnapshot, ExportError> {
        let template_id = template_id.or_else(|| self.config.default_template_id.clone());
        let mut job = ExportJob::new(kind, template_id);
        job.submit_input(input, &self.config.identifier_column_token)?;

        let id = job.id();
        let handle = JobHandle {
            progress: job.subscribe(),
            job: Arc::new(Mutex::new(job)),
        };
        let snapshot = handle.progress.borrow().clone();
        self.jobs.lock().await.insert(id, handle);
        info!(target = "export.api", job_id = %id, ?kind, "job_created");
        Ok(snapshot)
    }

    /// Latest published progress; never waits on a running step.
    pub async fn snapshot(&self, id: Uuid) -> Result<ProgressSnapshot, ExportError> {
        let handle = self.handle(id).await?;
        let snapshot = handle.progress.borrow().clone();
        Ok(snapshot)
    }

    pub async fn resolve(&self, id: Uuid) -> Result<ProgressSnapshot, ExportError> {
        let handle = self.handle(id).await?;
        let mut job = handle.job.lock().await;
        let resolver = BatchResolver::new(self.config.chunk_size);
        job.start_resolve(self.catalog.as_ref(), self.catalog.as_ref(), resolver)
            .await?;
        Ok(job.snapshot())
    }

    /// Starts generation in the background and returns immediately.
    pub async fn generate(&self, id: Uuid) -> Result<ProgressSnapshot, ExportError> {
        let handle = self.handle(id).await?;
        let snapshot = {
            let mut job = handle.job.lock().await;
            job.begin_generation()?;
            job.snapshot()
        };
        self.spawn_driver(id, handle);
        Ok(snapshot)
    }

    pub async fn suspension(&self, id: Uuid) -> Result<SuspensionView, ExportError> {
        let handle = self.handle(id).await?;
        let job = handle.job.lock().await;
        job.suspension()
            .ok_or_else(|| ExportError::invalid_state("review", "no review is pending"))
    }

    pub async fn swap(
        &self,
        id: Uuid,
        token: SuspensionToken,
        a: usize,
        b: usize,
    ) -> Result<SuspensionView, ExportError> {
        let handle = self.handle(id).await?;
        let mut job = handle.job.lock().await;
        job.swap_images(token, a, b)
    }

    /// Applies a review decision; a confirmed review hands the job back to
    /// the background driver.
    pub async fn resolve_suspension(
        &self,
        id: Uuid,
        decision: ReviewDecision,
    ) -> Result<ProgressSnapshot, ExportError> {
        let handle = self.handle(id).await?;
        let (state, snapshot) = {
            let mut job = handle.job.lock().await;
            let state = job
                .resolve_suspension(decision, self.renderer.as_ref())
                .await?;
            (state, job.snapshot())
        };
        if state == JobState::Generating {
            self.spawn_driver(id, handle);
        }
        Ok(snapshot)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<ProgressSnapshot, ExportError> {
        let handle = self.handle(id).await?;
        let mut job = handle.job.lock().await;
        job.cancel()?;
        Ok(job.snapshot())
    }

    pub async fn summary(&self, id: Uuid) -> Result<ExportSummary, ExportError> {
        let handle = self.handle(id).await?;
        let job = handle.job.lock().await;
        Ok(job.summary())
    }

    pub async fn logistics(&self, id: Uuid) -> Result<ExportDownload, ExportError> {
        let handle = self.handle(id).await?;
        let mut job = handle.job.lock().await;
        job.finalize_logistics()
    }

    pub async fn archive(&self, id: Uuid) -> Result<ExportDownload, ExportError> {
        let handle = self.handle(id).await?;
        let job = handle.job.lock().await;
        if job.state() != JobState::Completed {
            return Err(ExportError::invalid_state(
                "archive",
                "archive is available once the job has completed",
            ));
        }
        job.download()
            .cloned()
            .ok_or_else(|| ExportError::internal("archive", "completed job has no archive"))
    }

    /// Evicts jobs that have sat in a final state for longer than the
    /// retention window. Returns how many were dropped.
    pub async fn prune_expired(&self) -> usize {
        let retention = i64::try_from(self.config.job_retention_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };

        let mut guard = self.jobs.lock().await;
        let before = guard.len();
        guard.retain(|_, handle| {
            let snapshot = handle.progress.borrow();
            !(is_retired(snapshot.state) && snapshot.updated_at <= cutoff)
        });
        let evicted = before - guard.len();
        if evicted > 0 {
            info!(
                target = "export.api",
                evicted,
                remaining = guard.len(),
                "jobs_evicted"
            );
        }
        evicted
    }

    /// Runs [`JobRegistry::prune_expired`] on a fixed period.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.prune_expired().await;
            }
        })
    }

    #[cfg(test)]
    pub async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<ProgressSnapshot>, ExportError> {
        Ok(self.handle(id).await?.progress)
    }

    async fn handle(&self, id: Uuid) -> Result<JobHandle, ExportError> {
        let guard = self.jobs.lock().await;
        guard
            .get(&id)
            .cloned()
            .ok_or_else(|| ExportError::not_found("jobs", format!("job {id} not found")))
    }

    fn spawn_driver(&self, id: Uuid, handle: JobHandle) {
        let renderer = self.renderer.clone();
        tokio::spawn(async move {
            loop {
                let mut job = handle.job.lock().await;
                match job.step(renderer.as_ref()).await {
                    Ok(Step::Advanced) => {}
                    Ok(Step::Suspended) | Ok(Step::Finished(_)) => break,
                    Err(err) => {
                        // The job left `Generating` between steps, usually a cancel.
                        debug!(target = "export.job", job_id = %id, error = %err, "driver_stopped");
                        break;
                    }
                }
            }
        });
    }
}

/// Jobs that will not change again without a new request.
fn is_retired(state: JobState) -> bool {
    state.is_terminal() || state == JobState::LogisticsReady
}
