//! The export job state machine.
//!
//! ```text
//! Idle -> InputCollected -> Resolving -> LogisticsReady
//!                                     \-> Generating <-> Suspended
//!                                           \-> Completed
//! (any non-terminal) -> Cancelled | FailedPrecondition
//! ```
//!
//! A job owns its cursor, review gate, archive and failure list. Generation is
//! driven one record per [`ExportJob::step`]; a record that needs review parks
//! the job in `Suspended` and returns control to the caller until
//! [`ExportJob::resolve_suspension`] is called.

use crate::archive::{ArchiveSink, BundleArchive, ExportDownload};
use crate::catalog::{CategoryPolicy, PolicySource, PolicyTable, RecordLookup, ResolvedRecord};
use crate::export::classifier::{Decision, classify};
use crate::export::error::ExportError;
use crate::export::gate::{GateError, SuspensionGate, SuspensionToken, SuspensionView};
use crate::export::identifiers::{self, IdentifierInput, IdentifierSet};
use crate::export::report::logistics_report;
use crate::export::resolver::BatchResolver;
use crate::render::{ArtifactRenderer, RenderRequest, artifact_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    InputCollected,
    Resolving,
    LogisticsReady,
    Generating,
    Suspended,
    Completed,
    Cancelled,
    FailedPrecondition,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::FailedPrecondition
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    LogisticsReport,
    #[default]
    DocumentBatch,
}

/// Position of the generation loop. `succeeded + failed + skipped <= index <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCursor {
    pub index: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Succeeded,
    Failed,
    Skipped,
}

impl JobCursor {
    fn advance(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Succeeded => self.succeeded += 1,
            RecordOutcome::Failed => self.failed += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
        self.index += 1;
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.total
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed + self.skipped <= self.index && self.index <= self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub record_id: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub kind: ExportKind,
    pub state: JobState,
    pub current_index: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unresolved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub job_id: Uuid,
    pub state: JobState,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailureRecord>,
    pub unresolved: Vec<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ReviewDecision {
    /// Render with `ordering`, or with the gate's current draft when `None`.
    Confirm {
        token: SuspensionToken,
        ordering: Option<Vec<String>>,
    },
    Cancel {
        token: SuspensionToken,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advanced,
    Suspended,
    Finished(JobState),
}

pub struct ExportJob {
    id: Uuid,
    kind: ExportKind,
    template_id: Option<String>,
    state: JobState,
    identifiers: Option<IdentifierSet>,
    records: Vec<ResolvedRecord>,
    unresolved: Vec<String>,
    policies: PolicyTable,
    cursor: JobCursor,
    gate: SuspensionGate,
    archive: Box<dyn ArchiveSink>,
    failures: Vec<FailureRecord>,
    reason: Option<String>,
    generation_started: bool,
    download: Option<ExportDownload>,
    progress: watch::Sender<ProgressSnapshot>,
}

impl ExportJob {
    pub fn new(kind: ExportKind, template_id: Option<String>) -> Self {
        let id = Uuid::new_v4();
        let archive = BundleArchive::new(format!("export-{}", id.simple()));
        Self::with_archive(id, kind, template_id, Box::new(archive))
    }

    pub fn with_archive(
        id: Uuid,
        kind: ExportKind,
        template_id: Option<String>,
        archive: Box<dyn ArchiveSink>,
    ) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot {
            job_id: id,
            kind,
            state: JobState::Idle,
            current_index: 0,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            unresolved: 0,
            suspended_record: None,
            reason: None,
            updated_at: Utc::now(),
        });
        Self {
            id,
            kind,
            template_id,
            state: JobState::Idle,
            identifiers: None,
            records: Vec::new(),
            unresolved: Vec::new(),
            policies: PolicyTable::default(),
            cursor: JobCursor::default(),
            gate: SuspensionGate::default(),
            archive,
            failures: Vec::new(),
            reason: None,
            generation_started: false,
            download: None,
            progress,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn cursor(&self) -> JobCursor {
        self.cursor
    }

    pub fn identifiers(&self) -> Option<&IdentifierSet> {
        self.identifiers.as_ref()
    }

    pub fn records(&self) -> &[ResolvedRecord] {
        &self.records
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn archived(&self) -> Vec<String> {
        self.archive.entry_names()
    }

    /// The finalized archive or logistics report, once one exists.
    pub fn download(&self) -> Option<&ExportDownload> {
        self.download.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.id,
            kind: self.kind,
            state: self.state,
            current_index: self.cursor.index,
            total: self.cursor.total,
            succeeded: self.cursor.succeeded,
            failed: self.cursor.failed,
            skipped: self.cursor.skipped,
            unresolved: self.unresolved.len(),
            suspended_record: self.gate.pending_record_id().map(str::to_string),
            reason: self.reason.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> ExportSummary {
        ExportSummary {
            job_id: self.id,
            state: self.state,
            succeeded: self.cursor.succeeded,
            skipped: self.cursor.skipped,
            failed: self.cursor.failed,
            failures: self.failures.clone(),
            unresolved: self.unresolved.clone(),
            artifacts: self.archive.entry_names(),
        }
    }

    pub fn submit_input(
        &mut self,
        input: &IdentifierInput,
        column_token: &str,
    ) -> Result<usize, ExportError> {
        self.expect_state("submit_input", &[JobState::Idle])?;
        let identifiers = identifiers::parse(input, column_token)
            .map_err(|err| ExportError::invalid_input("submit_input", err.to_string()))?;
        let count = identifiers.len();
        self.identifiers = Some(identifiers);
        info!(target = "export.job", job_id = %self.id, identifiers = count, "input_collected");
        self.transition(JobState::InputCollected);
        Ok(count)
    }

    /// Resolves identifiers into records and, for document batches, snapshots
    /// the category policies. Any failure here is fatal to the job.
    pub async fn start_resolve<L, P>(
        &mut self,
        lookup: &L,
        policies: &P,
        resolver: BatchResolver,
    ) -> Result<JobState, ExportError>
    where
        L: RecordLookup + Sync,
        P: PolicySource + Sync,
    {
        self.expect_state("resolve", &[JobState::InputCollected])?;
        self.transition(JobState::Resolving);
        let started = Instant::now();

        let Some(identifiers) = self.identifiers.as_ref() else {
            return Err(self.fail_precondition("resolve", "no identifiers collected"));
        };
        let resolution = match resolver.resolve(lookup, identifiers).await {
            Ok(resolution) => resolution,
            Err(err) => return Err(self.fail_precondition("resolve", err.to_string())),
        };

        if self.kind == ExportKind::DocumentBatch {
            self.policies = match policies.fetch_policies().await {
                Ok(table) => table,
                Err(err) => return Err(self.fail_precondition("fetch_policies", err.to_string())),
            };
        }

        crate::metrics::stage_elapsed("resolve", started.elapsed().as_millis());
        if !resolution.unresolved.is_empty() {
            warn!(
                target = "export.job",
                job_id = %self.id,
                unresolved = resolution.unresolved.len(),
                "identifiers_unresolved"
            );
        }
        info!(
            target = "export.job",
            job_id = %self.id,
            records = resolution.records.len(),
            policies = self.policies.len(),
            "resolved"
        );

        self.cursor = JobCursor {
            total: resolution.records.len(),
            ..JobCursor::default()
        };
        self.records = resolution.records;
        self.unresolved = resolution.unresolved;
        let next = match self.kind {
            ExportKind::LogisticsReport => JobState::LogisticsReady,
            ExportKind::DocumentBatch => JobState::Generating,
        };
        self.transition(next);
        Ok(next)
    }

    /// Marks the generation loop as started. A job can only be started once;
    /// after a review it is resumed, not restarted.
    pub fn begin_generation(&mut self) -> Result<(), ExportError> {
        self.expect_state("generate", &[JobState::Generating])?;
        if self.generation_started {
            return Err(ExportError::invalid_state("generate", "generation already started"));
        }
        self.generation_started = true;
        info!(target = "export.job", job_id = %self.id, total = self.cursor.total, "generation_started");
        Ok(())
    }

    pub async fn start_generate<R>(&mut self, renderer: &R) -> Result<JobState, ExportError>
    where
        R: ArtifactRenderer + Sync,
    {
        self.begin_generation()?;
        self.run(renderer).await
    }

    /// Steps until the job suspends or finishes.
    pub async fn run<R>(&mut self, renderer: &R) -> Result<JobState, ExportError>
    where
        R: ArtifactRenderer + Sync,
    {
        loop {
            match self.step(renderer).await? {
                Step::Advanced => continue,
                Step::Suspended => return Ok(JobState::Suspended),
                Step::Finished(state) => return Ok(state),
            }
        }
    }

    /// Processes the record under the cursor, or finalizes the archive when
    /// the cursor has reached the end.
    pub async fn step<R>(&mut self, renderer: &R) -> Result<Step, ExportError>
    where
        R: ArtifactRenderer + Sync,
    {
        self.expect_state("generate", &[JobState::Generating])?;
        if self.cursor.at_end() {
            return Ok(Step::Finished(self.complete()));
        }

        let index = self.cursor.index;
        let record = self.records[index].clone();
        match classify(&record, &self.policies) {
            Decision::NoCategory => {
                warn!(
                    target = "export.job",
                    job_id = %self.id,
                    record_id = %record.id,
                    code = %record.code,
                    category = ?record.category_id,
                    "record_skipped_no_category"
                );
                self.finish_record(RecordOutcome::Skipped);
                Ok(Step::Advanced)
            }
            Decision::DirectRender(policy) => {
                let outcome = self.render_into_archive(renderer, &record, &policy).await;
                self.finish_record(outcome);
                Ok(Step::Advanced)
            }
            Decision::RequiresReview(policy) => {
                let token = self
                    .gate
                    .open(record, policy, index)
                    .map_err(|err| ExportError::internal("suspend", err.to_string()))?;
                info!(
                    target = "export.job",
                    job_id = %self.id,
                    index,
                    token = %token,
                    "suspended_for_review"
                );
                self.transition(JobState::Suspended);
                Ok(Step::Suspended)
            }
        }
    }

    pub fn suspension(&self) -> Option<SuspensionView> {
        self.gate.view()
    }

    pub fn swap_images(
        &mut self,
        token: SuspensionToken,
        a: usize,
        b: usize,
    ) -> Result<SuspensionView, ExportError> {
        self.expect_state("review", &[JobState::Suspended])?;
        self.gate.swap(token, a, b).map_err(gate_error)?;
        self.gate
            .view()
            .ok_or_else(|| ExportError::internal("review", "review vanished after swap"))
    }

    /// Applies the reviewer's decision. A confirmed review renders exactly the
    /// suspended record and leaves the job in `Generating`; the caller resumes
    /// the loop. A cancelled review cancels the whole job.
    pub async fn resolve_suspension<R>(
        &mut self,
        decision: ReviewDecision,
        renderer: &R,
    ) -> Result<JobState, ExportError>
    where
        R: ArtifactRenderer + Sync,
    {
        self.expect_state("review", &[JobState::Suspended])?;
        match decision {
            ReviewDecision::Cancel { token } => {
                self.gate.cancel(token).map_err(gate_error)?;
                self.abort("review cancelled");
                Ok(self.state)
            }
            ReviewDecision::Confirm { token, ordering } => {
                let review = self.gate.confirm(token, ordering).map_err(gate_error)?;
                debug_assert_eq!(review.index, self.cursor.index);
                self.records[review.index] = review.record.clone();
                self.state = JobState::Generating;
                let outcome = self
                    .render_into_archive(renderer, &review.record, &review.policy)
                    .await;
                self.finish_record(outcome);
                Ok(self.state)
            }
        }
    }

    /// Resolves the pending review and, unless it cancelled the job, keeps
    /// going until the next suspension or the end.
    pub async fn resume<R>(
        &mut self,
        decision: ReviewDecision,
        renderer: &R,
    ) -> Result<JobState, ExportError>
    where
        R: ArtifactRenderer + Sync,
    {
        match self.resolve_suspension(decision, renderer).await? {
            JobState::Generating => self.run(renderer).await,
            state => Ok(state),
        }
    }

    /// Cancels the job. Anything archived so far is discarded.
    pub fn cancel(&mut self) -> Result<JobState, ExportError> {
        if self.state.is_terminal() {
            return Err(ExportError::invalid_state(
                "cancel",
                format!("job already {}", state_label(self.state)),
            ));
        }
        self.abort("cancelled by operator");
        Ok(self.state)
    }

    /// Builds the logistics report. Repeated calls return the same report.
    pub fn finalize_logistics(&mut self) -> Result<ExportDownload, ExportError> {
        self.expect_state("logistics", &[JobState::LogisticsReady])?;
        if let Some(download) = &self.download {
            return Ok(download.clone());
        }
        let report = logistics_report(&format!("export-{}", self.id.simple()), &self.records);
        info!(
            target = "export.job",
            job_id = %self.id,
            rows = self.records.len(),
            "logistics_report_built"
        );
        self.download = Some(report.clone());
        self.publish();
        Ok(report)
    }

    async fn render_into_archive<R>(
        &mut self,
        renderer: &R,
        record: &ResolvedRecord,
        policy: &CategoryPolicy,
    ) -> RecordOutcome
    where
        R: ArtifactRenderer + Sync,
    {
        let started = Instant::now();
        let rendered = renderer
            .render(RenderRequest {
                record,
                policy,
                template_id: self.template_id.as_deref(),
            })
            .await;
        crate::metrics::stage_elapsed("render", started.elapsed().as_millis());

        let result = rendered.map_err(|err| err.to_string()).and_then(|artifact| {
            let name = artifact_name(record, &artifact);
            self.archive
                .append(&name, artifact.bytes)
                .map(|_| name)
                .map_err(|err| err.to_string())
        });
        match result {
            Ok(name) => {
                debug!(target = "export.job", job_id = %self.id, record_id = %record.id, artifact = %name, "artifact_appended");
                RecordOutcome::Succeeded
            }
            Err(reason) => {
                warn!(
                    target = "export.job",
                    job_id = %self.id,
                    record_id = %record.id,
                    code = %record.code,
                    error = %reason,
                    "record_failed"
                );
                self.failures.push(FailureRecord {
                    record_id: record.id.clone(),
                    code: record.code.clone(),
                    reason,
                });
                RecordOutcome::Failed
            }
        }
    }

    fn finish_record(&mut self, outcome: RecordOutcome) {
        crate::metrics::record_outcome(match outcome {
            RecordOutcome::Succeeded => "succeeded",
            RecordOutcome::Failed => "failed",
            RecordOutcome::Skipped => "skipped",
        });
        self.cursor.advance(outcome);
        self.publish();
    }

    fn complete(&mut self) -> JobState {
        match self.archive.finalize() {
            Ok(download) => {
                info!(
                    target = "export.job",
                    job_id = %self.id,
                    artifacts = self.archive.len(),
                    succeeded = self.cursor.succeeded,
                    skipped = self.cursor.skipped,
                    failed = self.cursor.failed,
                    file = %download.file_name,
                    "export_completed"
                );
                self.download = Some(download);
                self.transition(JobState::Completed);
            }
            Err(err) => {
                // Every record was processed; the cursor stays at the end.
                let message = err.to_string();
                warn!(target = "export.job", job_id = %self.id, stage = "finalize", error = %message, "precondition_failed");
                self.archive.discard();
                self.download = None;
                self.reason = Some(message);
                self.transition(JobState::FailedPrecondition);
            }
        }
        self.state
    }

    fn abort(&mut self, reason: &str) {
        if self.gate.is_open() {
            debug!(target = "export.job", job_id = %self.id, "closing pending review");
            self.gate.close();
        }
        self.archive.discard();
        self.download = None;
        self.reason = Some(reason.to_string());
        info!(
            target = "export.job",
            job_id = %self.id,
            index = self.cursor.index,
            reason,
            "export_cancelled"
        );
        self.transition(JobState::Cancelled);
    }

    fn fail_precondition(&mut self, stage: &'static str, message: impl Into<String>) -> ExportError {
        let message = message.into();
        warn!(target = "export.job", job_id = %self.id, stage, error = %message, "precondition_failed");
        self.records.clear();
        self.cursor = JobCursor::default();
        self.archive.discard();
        self.reason = Some(message.clone());
        self.transition(JobState::FailedPrecondition);
        ExportError::failed_precondition(stage, message)
    }

    fn expect_state(&self, stage: &'static str, allowed: &[JobState]) -> Result<(), ExportError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ExportError::invalid_state(
                stage,
                format!("not allowed while job is {}", state_label(self.state)),
            ))
        }
    }

    fn transition(&mut self, next: JobState) {
        debug!(target = "export.job", job_id = %self.id, from = ?self.state, to = ?next, "transition");
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        debug_assert!(self.cursor.is_consistent(), "cursor invariant broken: {:?}", self.cursor);
        self.progress.send_replace(self.snapshot());
    }
}

fn gate_error(err: GateError) -> ExportError {
    match err {
        GateError::NotAPermutation | GateError::PositionOutOfRange { .. } => {
            ExportError::invalid_input("review", err.to_string())
        }
        GateError::NotOpen | GateError::AlreadyOpen { .. } | GateError::TokenMismatch => {
            ExportError::invalid_state("review", err.to_string())
        }
    }
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Idle => "idle",
        JobState::InputCollected => "input_collected",
        JobState::Resolving => "resolving",
        JobState::LogisticsReady => "logistics_ready",
        JobState::Generating => "generating",
        JobState::Suspended => "suspended",
        JobState::Completed => "completed",
        JobState::Cancelled => "cancelled",
        JobState::FailedPrecondition => "failed_precondition",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LookupError;
    use crate::export::error::ExportErrorKind;
    use crate::export::resolver::fakes::{FakeLookup, record};
    use crate::archive::ArchiveError;
    use crate::render::{RenderError, RenderedArtifact};
    use std::sync::Mutex;

    struct FakePolicies {
        fail: bool,
    }

    impl PolicySource for FakePolicies {
        async fn fetch_policies(&self) -> Result<PolicyTable, LookupError> {
            if self.fail {
                return Err(LookupError::Request("HTTP 503".into()));
            }
            Ok([("plain", false), ("ordered", true)]
                .into_iter()
                .map(|(id, ordered)| CategoryPolicy {
                    category_id: id.into(),
                    name: None,
                    requires_ordered_layout: ordered,
                })
                .collect())
        }
    }

    /// Lookup returning a fixed record list regardless of the identifiers.
    struct FixedLookup(Vec<ResolvedRecord>);

    impl RecordLookup for FixedLookup {
        async fn lookup(
            &self,
            _identifiers: &[String],
            _page_size: usize,
        ) -> Result<Vec<ResolvedRecord>, LookupError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeRenderer {
        fail_codes: Vec<String>,
        rendered: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ArtifactRenderer for FakeRenderer {
        async fn render(
            &self,
            request: RenderRequest<'_>,
        ) -> Result<RenderedArtifact, RenderError> {
            self.rendered
                .lock()
                .unwrap()
                .push((request.record.code.clone(), request.record.images.clone()));
            if self.fail_codes.contains(&request.record.code) {
                return Err(RenderError::Rejected {
                    status: 422,
                    detail: "template overflow".into(),
                });
            }
            Ok(RenderedArtifact {
                bytes: request.record.code.as_bytes().to_vec(),
                extension: "png".into(),
            })
        }
    }

    fn policies() -> FakePolicies {
        FakePolicies { fail: false }
    }

    /// Sink that accepts entries but cannot be finalized.
    #[derive(Default)]
    struct UnfinalizableArchive {
        names: Vec<String>,
    }

    impl ArchiveSink for UnfinalizableArchive {
        fn append(&mut self, name: &str, _bytes: Vec<u8>) -> Result<(), ArchiveError> {
            self.names.push(name.to_string());
            Ok(())
        }

        fn finalize(&mut self) -> Result<ExportDownload, ArchiveError> {
            Err(ArchiveError::Encode("disk full".into()))
        }

        fn discard(&mut self) {
            self.names.clear();
        }

        fn entry_names(&self) -> Vec<String> {
            self.names.clone()
        }

        fn len(&self) -> usize {
            self.names.len()
        }

        fn retained_bytes(&self) -> usize {
            0
        }
    }

    async fn generating_job(records: Vec<ResolvedRecord>) -> ExportJob {
        let job = ExportJob::new(ExportKind::DocumentBatch, None);
        resolved(job, records).await
    }

    async fn resolved(mut job: ExportJob, records: Vec<ResolvedRecord>) -> ExportJob {
        job.submit_input(&IdentifierInput::Text("ignored".into()), "sku")
            .expect("submit");
        let state = job
            .start_resolve(&FixedLookup(records), &policies(), BatchResolver::new(100))
            .await
            .expect("resolve");
        assert_eq!(state, JobState::Generating);
        job
    }

    fn five(categories: [Option<&str>; 5]) -> Vec<ResolvedRecord> {
        ["R1", "R2", "R3", "R4", "R5"]
            .into_iter()
            .zip(categories)
            .map(|(code, category)| record(code, category))
            .collect()
    }

    #[test]
    fn invalid_input_keeps_job_idle() {
        let mut job = ExportJob::new(ExportKind::DocumentBatch, None);
        let err = job
            .submit_input(&IdentifierInput::Text("  ".into()), "sku")
            .expect_err("empty");
        assert_eq!(err.kind(), ExportErrorKind::InvalidInput);
        assert_eq!(job.state(), JobState::Idle);
        assert!(job.identifiers().is_none());
    }

    #[tokio::test]
    async fn lookup_failure_is_a_failed_precondition() {
        let mut job = ExportJob::new(ExportKind::DocumentBatch, None);
        job.submit_input(&IdentifierInput::Text("A B C".into()), "sku")
            .unwrap();
        let lookup = FakeLookup {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let err = job
            .start_resolve(&lookup, &policies(), BatchResolver::new(2))
            .await
            .expect_err("lookup fails");
        assert_eq!(err.kind(), ExportErrorKind::FailedPrecondition);
        assert_eq!(job.state(), JobState::FailedPrecondition);
        assert!(job.snapshot().reason.is_some());
    }

    #[tokio::test]
    async fn no_matching_records_is_a_failed_precondition() {
        let mut job = ExportJob::new(ExportKind::DocumentBatch, None);
        job.submit_input(&IdentifierInput::Text("A".into()), "sku")
            .unwrap();
        let lookup = FakeLookup {
            missing: vec!["A".into()],
            ..Default::default()
        };
        let err = job
            .start_resolve(&lookup, &policies(), BatchResolver::new(2))
            .await
            .expect_err("nothing matched");
        assert_eq!(err.stage(), "resolve");
        assert_eq!(job.state(), JobState::FailedPrecondition);
    }

    #[tokio::test]
    async fn policy_fetch_failure_is_a_failed_precondition() {
        let mut job = ExportJob::new(ExportKind::DocumentBatch, None);
        job.submit_input(&IdentifierInput::Text("A".into()), "sku")
            .unwrap();
        let err = job
            .start_resolve(
                &FakeLookup::default(),
                &FakePolicies { fail: true },
                BatchResolver::new(2),
            )
            .await
            .expect_err("policies fail");
        assert_eq!(err.stage(), "fetch_policies");
        assert_eq!(job.state(), JobState::FailedPrecondition);
    }

    #[tokio::test]
    async fn logistics_request_stops_at_logistics_ready() {
        let mut job = ExportJob::new(ExportKind::LogisticsReport, None);
        job.submit_input(&IdentifierInput::Text("A, B, UNKNOWN".into()), "sku")
            .unwrap();
        let lookup = FakeLookup {
            missing: vec!["UNKNOWN".into()],
            category: Some("plain".into()),
            ..Default::default()
        };
        let state = job
            .start_resolve(&lookup, &FakePolicies { fail: true }, BatchResolver::new(2))
            .await
            .expect("report jobs skip the policy fetch");
        assert_eq!(state, JobState::LogisticsReady);
        assert_eq!(job.snapshot().unresolved, 1);

        let report = job.finalize_logistics().expect("report");
        let again = job.finalize_logistics().expect("report again");
        assert_eq!(report.bytes, again.bytes);
        let text = String::from_utf8(report.bytes).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(job.start_generate(&FakeRenderer::default()).await.is_err());
    }

    #[tokio::test]
    async fn all_direct_records_complete_in_order() {
        let mut job = generating_job(five([Some("plain"); 5])).await;
        let renderer = FakeRenderer::default();
        let state = job.start_generate(&renderer).await.expect("generate");
        assert_eq!(state, JobState::Completed);
        let codes: Vec<String> = renderer
            .rendered
            .lock()
            .unwrap()
            .iter()
            .map(|(code, _)| code.clone())
            .collect();
        assert_eq!(codes, vec!["R1", "R2", "R3", "R4", "R5"]);
        assert_eq!(job.archived().len(), 5);
        assert!(job.download().is_some());
        assert_eq!(job.archive.retained_bytes(), 0, "bodies live only in the download");
    }

    #[tokio::test]
    async fn finalize_failure_keeps_cursor_at_end() {
        let job = ExportJob::with_archive(
            Uuid::new_v4(),
            ExportKind::DocumentBatch,
            None,
            Box::new(UnfinalizableArchive::default()),
        );
        let mut job = resolved(job, five([Some("plain"); 5])).await;
        let mut rx = job.subscribe();

        let state = job
            .start_generate(&FakeRenderer::default())
            .await
            .expect("generate");
        assert_eq!(state, JobState::FailedPrecondition);
        assert_eq!(job.cursor().index, 5);
        assert_eq!(job.cursor().total, 5);
        assert_eq!(job.cursor().succeeded, 5);

        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.state, JobState::FailedPrecondition);
        assert_eq!(snap.current_index, snap.total);
        assert_eq!(snap.reason.as_deref(), Some("archive encoding failed: disk full"));
        assert!(job.download().is_none());
        assert!(job.archived().is_empty());
    }

    #[tokio::test]
    async fn review_confirm_renders_once_and_continues() {
        let mut job = generating_job(five([
            Some("plain"),
            Some("ordered"),
            Some("plain"),
            Some("plain"),
            Some("plain"),
        ]))
        .await;
        let renderer = FakeRenderer::default();

        let state = job.start_generate(&renderer).await.expect("generate");
        assert_eq!(state, JobState::Suspended);
        assert_eq!(job.cursor().index, 1);
        assert_eq!(job.archived().len(), 1);
        let view = job.suspension().expect("pending review");
        assert_eq!(view.record.code, "R2");
        assert_eq!(job.snapshot().suspended_record.as_deref(), Some("id-R2"));

        job.swap_images(view.token, 0, 1).expect("swap");
        assert_eq!(job.cursor().index, 1, "swapping does not advance the cursor");

        let state = job
            .resolve_suspension(
                ReviewDecision::Confirm {
                    token: view.token,
                    ordering: None,
                },
                &renderer,
            )
            .await
            .expect("confirm");
        assert_eq!(state, JobState::Generating);
        assert_eq!(job.cursor().index, 2);
        assert_eq!(job.archived().len(), 2);
        assert_eq!(
            job.records()[1].images,
            vec!["R2-2.jpg", "R2-1.jpg", "R2-3.jpg"]
        );
        {
            let rendered = renderer.rendered.lock().unwrap();
            assert_eq!(rendered.len(), 2);
            assert_eq!(rendered[1].1, vec!["R2-2.jpg", "R2-1.jpg", "R2-3.jpg"]);
        }

        let state = job.run(&renderer).await.expect("resume");
        assert_eq!(state, JobState::Completed);
        assert_eq!(job.summary().succeeded, 5);
    }

    #[tokio::test]
    async fn review_cancel_discards_prior_artifacts() {
        let mut job = generating_job(five([
            Some("plain"),
            Some("plain"),
            Some("ordered"),
            Some("plain"),
            Some("plain"),
        ]))
        .await;
        let renderer = FakeRenderer::default();
        assert_eq!(
            job.start_generate(&renderer).await.unwrap(),
            JobState::Suspended
        );
        assert_eq!(job.archived().len(), 2);

        let token = job.suspension().unwrap().token;
        let state = job
            .resume(ReviewDecision::Cancel { token }, &renderer)
            .await
            .expect("cancel");
        assert_eq!(state, JobState::Cancelled);
        assert!(job.archived().is_empty());
        assert!(job.download().is_none());
        assert!(job.suspension().is_none());
        assert_eq!(renderer.rendered.lock().unwrap().len(), 2);
        assert!(job.run(&renderer).await.is_err());
    }

    #[tokio::test]
    async fn stale_token_leaves_review_pending() {
        let mut job = generating_job(five([Some("ordered"); 5])).await;
        let renderer = FakeRenderer::default();
        job.start_generate(&renderer).await.unwrap();
        let token = job.suspension().unwrap().token;
        let mut other = generating_job(five([Some("ordered"); 5])).await;
        other.start_generate(&renderer).await.unwrap();
        let foreign = other.suspension().unwrap().token;

        let err = job
            .resolve_suspension(
                ReviewDecision::Confirm {
                    token: foreign,
                    ordering: None,
                },
                &renderer,
            )
            .await
            .expect_err("foreign token");
        assert_eq!(err.kind(), ExportErrorKind::InvalidState);
        assert_eq!(job.state(), JobState::Suspended);
        assert_eq!(job.suspension().unwrap().token, token);
    }

    #[tokio::test]
    async fn bad_ordering_is_rejected_without_advancing() {
        let mut job = generating_job(five([Some("ordered"); 5])).await;
        let renderer = FakeRenderer::default();
        job.start_generate(&renderer).await.unwrap();
        let token = job.suspension().unwrap().token;
        let err = job
            .resolve_suspension(
                ReviewDecision::Confirm {
                    token,
                    ordering: Some(vec!["R1-1.jpg".into()]),
                },
                &renderer,
            )
            .await
            .expect_err("not a permutation");
        assert_eq!(err.kind(), ExportErrorKind::InvalidInput);
        assert_eq!(job.cursor().index, 0);
        assert!(renderer.rendered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_category_is_skipped_not_failed() {
        let mut job = generating_job(five([
            Some("plain"),
            Some("plain"),
            None,
            Some("plain"),
            Some("retired"),
        ]))
        .await;
        let state = job
            .start_generate(&FakeRenderer::default())
            .await
            .expect("generate");
        assert_eq!(state, JobState::Completed);
        let summary = job.summary();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.succeeded, 3);
        assert!(summary.failures.is_empty());
        assert_eq!(job.cursor().index, job.cursor().total);
    }

    #[tokio::test]
    async fn single_no_category_record_among_five() {
        let mut job = generating_job(five([
            Some("plain"),
            Some("plain"),
            None,
            Some("plain"),
            Some("plain"),
        ]))
        .await;
        job.start_generate(&FakeRenderer::default()).await.unwrap();
        let summary = job.summary();
        assert_eq!(summary.succeeded + summary.failed, 4);
        assert_eq!(summary.skipped, 1);
        assert_eq!(job.cursor().index, 5);
    }

    #[tokio::test]
    async fn render_failure_is_isolated() {
        let mut job = generating_job(five([Some("plain"); 5])).await;
        let renderer = FakeRenderer {
            fail_codes: vec!["R2".into()],
            ..Default::default()
        };
        let state = job.start_generate(&renderer).await.expect("generate");
        assert_eq!(state, JobState::Completed);
        assert_eq!(
            job.failures(),
            [FailureRecord {
                record_id: "id-R2".into(),
                code: "R2".into(),
                reason: "renderer rejected record (HTTP 422): template overflow".into(),
            }]
        );
        let archived = job.archived();
        assert_eq!(archived.len(), 4);
        assert!(archived.iter().all(|name| !name.starts_with("R2-")));
    }

    #[tokio::test]
    async fn every_published_snapshot_respects_cursor_bounds() {
        let mut job = generating_job(five([
            Some("plain"),
            None,
            Some("ordered"),
            Some("plain"),
            Some("plain"),
        ]))
        .await;
        let mut rx = job.subscribe();
        let renderer = FakeRenderer {
            fail_codes: vec!["R4".into()],
            ..Default::default()
        };
        job.begin_generation().unwrap();

        let mut seen = Vec::new();
        loop {
            let step = job.step(&renderer).await.expect("step");
            seen.push(rx.borrow_and_update().clone());
            match step {
                Step::Advanced => {}
                Step::Suspended => {
                    let token = job.suspension().unwrap().token;
                    let before = job.cursor().index;
                    job.resolve_suspension(
                        ReviewDecision::Confirm {
                            token,
                            ordering: None,
                        },
                        &renderer,
                    )
                    .await
                    .unwrap();
                    assert_eq!(job.cursor().index, before + 1);
                    seen.push(rx.borrow_and_update().clone());
                }
                Step::Finished(state) => {
                    assert_eq!(state, JobState::Completed);
                    break;
                }
            }
        }
        for snap in &seen {
            assert!(snap.succeeded + snap.failed + snap.skipped <= snap.current_index);
            assert!(snap.current_index <= snap.total);
        }
        let last = seen.last().unwrap();
        assert_eq!((last.succeeded, last.failed, last.skipped), (3, 1, 1));
    }

    #[tokio::test]
    async fn operator_cancel_mid_generation() {
        let mut job = generating_job(five([Some("plain"); 5])).await;
        let renderer = FakeRenderer::default();
        job.begin_generation().unwrap();
        job.step(&renderer).await.unwrap();
        job.step(&renderer).await.unwrap();
        assert_eq!(job.cancel().unwrap(), JobState::Cancelled);
        assert!(job.archived().is_empty());
        assert!(job.step(&renderer).await.is_err());
        assert!(job.cancel().is_err());
    }

    #[tokio::test]
    async fn generation_cannot_start_twice() {
        let mut job = generating_job(five([Some("ordered"); 5])).await;
        let renderer = FakeRenderer::default();
        job.start_generate(&renderer).await.unwrap();
        let err = job.start_generate(&renderer).await.expect_err("twice");
        assert_eq!(err.kind(), ExportErrorKind::InvalidState);
    }
}
