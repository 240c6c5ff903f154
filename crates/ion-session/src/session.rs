// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Synchronous session driver: feeds events through [`transition`] and
//! executes the resulting effects against the collaborators.

use std::collections::VecDeque;
use std::sync::Arc;

use ion_dataset::{DataSourceDescriptor, Dataset, DatasetId};
use ion_merge::{merge_supplement, MergeSummary};
use ion_proto::{FailureNotice, OutcomeEvent, PerformIngest, SessionMessage};
use tracing::{debug, info, warn};

use crate::error::IngestionError;
use crate::ports::{BranchKey, DatasetResource, IngestContext, Resource};
use crate::router::ChunkRouter;
use crate::state::{transition, Effect, SessionEvent, SessionState};

/// Final result of a session.
pub type Outcome = Result<MergeSummary, IngestionError>;

/// Whether an inbound message was taken by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Processed by the state machine.
    Accepted,
    /// Dropped because the session is terminating.
    Discarded,
}

/// Watchdog instruction left by the last effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watchdog {
    /// Re-arm with the full timeout.
    Reset,
    /// Disarm.
    Cancel,
}

/// One ingestion session bound to one checked-out dataset.
pub struct Session {
    ctx: IngestContext,
    dataset_id: DatasetId,
    source: DataSourceDescriptor,
    resource: Option<DatasetResource>,
    head: Dataset,
    branch: Option<BranchKey>,
    checked_out: bool,
    router: ChunkRouter,
    declared_title: Option<String>,
    declared_url: Option<String>,
    merged: Option<(Dataset, MergeSummary)>,
    state: SessionState,
    terminating: bool,
    watchdog: Option<Watchdog>,
    outcome: Option<Outcome>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dataset_id", &self.dataset_id)
            .field("state", &self.state)
            .field("terminating", &self.terminating)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Resolve the data source and dataset, take the checkout and arm the
    /// watchdog. Nothing is held when this fails.
    pub fn open(ctx: IngestContext, request: &PerformIngest) -> Result<Self, IngestionError> {
        let source = ctx.data_source(&request.datasource_id)?;
        let resource = ctx.dataset_resource(&request.dataset_id)?;
        let head = ctx.datasets.checkout(&request.dataset_id)?;
        let mut session = Self {
            ctx,
            dataset_id: request.dataset_id.clone(),
            source,
            resource,
            head,
            branch: None,
            checked_out: true,
            router: ChunkRouter::new(),
            declared_title: None,
            declared_url: None,
            merged: None,
            state: SessionState::Init,
            terminating: false,
            watchdog: None,
            outcome: None,
        };
        session.dispatch(SessionEvent::Opened);
        Ok(session)
    }

    /// Dataset this session ingests into.
    pub fn dataset_id(&self) -> &DatasetId {
        &self.dataset_id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the session failed or completed; later messages are dropped.
    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// Take the pending watchdog instruction, if any.
    pub fn take_watchdog(&mut self) -> Option<Watchdog> {
        self.watchdog.take()
    }

    /// Take the outcome once the session has finished.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// Feed one producer message.
    pub fn handle(&mut self, message: SessionMessage) -> Delivery {
        if self.terminating {
            debug!(kind = message.kind(), state = self.state.name(), "discarding message");
            return Delivery::Discarded;
        }
        let got = match &message {
            SessionMessage::Header(h) => Some(&h.dataset_id),
            SessionMessage::Chunk(c) => Some(&c.dataset_id),
            SessionMessage::Done(_) => None,
        };
        let event = match got {
            Some(got) if *got != self.dataset_id => {
                SessionEvent::Fault(IngestionError::DatasetMismatch {
                    expected: self.dataset_id.clone(),
                    got: got.clone(),
                })
            }
            _ => match message {
                SessionMessage::Header(h) => SessionEvent::Header(h),
                SessionMessage::Chunk(c) => SessionEvent::Chunk(c),
                SessionMessage::Done(d) => SessionEvent::Done {
                    status: d.status,
                    detail: d.detail,
                },
            },
        };
        self.dispatch(event);
        Delivery::Accepted
    }

    /// Watchdog fired.
    pub fn expire(&mut self) {
        if !self.terminating {
            self.dispatch(SessionEvent::WatchdogExpired);
        }
    }

    /// Fail the session from outside the message flow (e.g. the inbox closed).
    pub fn abort(&mut self, err: IngestionError) {
        if !self.terminating {
            self.dispatch(SessionEvent::Fault(err));
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let from = self.state;
            let (next, effects) = transition(from, &event);
            self.state = next;
            if from != next {
                debug!(from = from.name(), to = next.name(), event = event.kind(), "transition");
            }
            for effect in effects {
                match self.execute(effect, &event) {
                    Ok(Some(follow_up)) => queue.push_back(follow_up),
                    Ok(None) => {}
                    Err(err) => {
                        queue.push_back(SessionEvent::Fault(err));
                        break;
                    }
                }
            }
        }
    }

    fn execute(
        &mut self,
        effect: Effect,
        event: &SessionEvent,
    ) -> Result<Option<SessionEvent>, IngestionError> {
        match effect {
            Effect::ResetWatchdog => self.watchdog = Some(Watchdog::Reset),
            Effect::CancelWatchdog => self.watchdog = Some(Watchdog::Cancel),
            Effect::InstallHeader => {
                if let SessionEvent::Header(header) = event {
                    let supplement = self.router.install_header(header)?;
                    self.declared_title = supplement.declared("title").map(str::to_string);
                    self.declared_url = supplement.declared("url").map(str::to_string);
                }
            }
            Effect::OpenBranch => {
                self.branch = Some(self.ctx.datasets.create_branch(&self.dataset_id)?);
            }
            Effect::RouteChunk => {
                if let SessionEvent::Chunk(chunk) = event {
                    self.router.route(chunk)?;
                }
            }
            Effect::RunMerge => return self.run_merge().map(Some),
            Effect::Finalize => self.finalize()?,
            Effect::Abort(err) => self.rollback(err),
            Effect::Discard => {
                debug!(event = event.kind(), state = self.state.name(), "event discarded");
            }
        }
        Ok(None)
    }

    fn run_merge(&mut self) -> Result<SessionEvent, IngestionError> {
        debug!(chunks = ?self.router.chunk_counts(), "merging supplement");
        let supplement = self.router.materialize(self.ctx.blobs.as_ref())?;
        let mut merged = self.head.clone();
        let report = merge_supplement(
            &mut merged,
            &supplement,
            &self.source,
            &self.ctx.settings.merge_options(),
        )?;
        if !report.is_clean() {
            return Err(IngestionError::AttributeConflicts(report.conflicts));
        }
        let mut summary = report.summary;
        if let Some(resource) = &self.resource {
            summary.title = summary.title.or_else(|| resource.title.clone());
            summary.url = summary.url.or_else(|| resource.url.clone());
        }
        self.merged = Some((merged, summary));
        Ok(SessionEvent::MergeFinished)
    }

    fn finalize(&mut self) -> Result<(), IngestionError> {
        let (merged, summary) = self
            .merged
            .take()
            .ok_or_else(|| IngestionError::Invariant("finalize without a merge result".into()))?;
        let branch = self
            .branch
            .clone()
            .ok_or_else(|| IngestionError::Invariant("finalize without a branch".into()))?;
        let datasets = Arc::clone(&self.ctx.datasets);

        datasets.merge_branch(&self.dataset_id, &branch, merged)?;
        self.branch = None;
        let branches = datasets.branch_count(&self.dataset_id)?;
        if branches != 1 {
            return Err(IngestionError::Invariant(format!(
                "{branches} branches remain after merge"
            )));
        }
        let message = format!(
            "supplement from {} ({} steps)",
            summary.data_source_id, summary.timestep_count
        );
        let revision = datasets.commit(&self.dataset_id, &message)?;
        info!(
            dataset_id = %self.dataset_id,
            revision,
            steps = summary.timestep_count,
            "supplement committed"
        );

        self.publish(OutcomeEvent::DatasetSupplementAdded(summary.clone()));
        let resource = DatasetResource {
            id: self.dataset_id.clone(),
            title: summary.title.clone(),
            url: summary.url.clone(),
            data_source_id: self.source.id.clone(),
            revision,
        };
        if let Err(err) = self.ctx.resources.put(Resource::Dataset(resource)) {
            warn!(?err, dataset_id = %self.dataset_id, "failed to update dataset resource");
        }
        self.release();
        self.terminating = true;
        self.outcome = Some(Ok(summary));
        Ok(())
    }

    fn rollback(&mut self, err: IngestionError) {
        if let Some(branch) = self.branch.take() {
            if let Err(remove_err) = self.ctx.datasets.remove_branch(&self.dataset_id, &branch) {
                warn!(?remove_err, %branch, "failed to remove speculative branch");
            }
        }
        self.release();
        warn!(
            dataset_id = %self.dataset_id,
            reason = err.reason(),
            error = %err,
            "ingestion failed"
        );

        let title = self
            .declared_title
            .clone()
            .or_else(|| self.resource.as_ref().and_then(|r| r.title.clone()));
        let url = self
            .declared_url
            .clone()
            .or_else(|| self.resource.as_ref().and_then(|r| r.url.clone()));
        self.publish(OutcomeEvent::DatasourceUnavailable(FailureNotice {
            data_source_id: self.source.id.clone(),
            dataset_id: self.dataset_id.clone(),
            title,
            url,
            error_text: err.error_text(),
        }));
        self.merged = None;
        self.terminating = true;
        self.outcome = Some(Err(err));
    }

    fn release(&mut self) {
        if !self.checked_out {
            return;
        }
        self.checked_out = false;
        if let Err(err) = self.ctx.datasets.release(&self.dataset_id) {
            warn!(?err, dataset_id = %self.dataset_id, "failed to release checkout");
        }
    }

    fn publish(&self, event: OutcomeEvent) {
        if let Err(err) = self.ctx.events.publish(event) {
            warn!(?err, dataset_id = %self.dataset_id, "failed to publish outcome event");
        }
    }
}

/// A session dropped before it finished (its task panicked or was cancelled)
/// still removes its branch, releases the checkout and announces the failure.
impl Drop for Session {
    fn drop(&mut self) {
        if !self.terminating {
            self.rollback(IngestionError::SessionClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::config::IngestSettings;
    use crate::error::StoreError;
    use crate::ports::{BlobStore, DatasetStore, EventPublisher, ResourceStore};
    use ion_dataset::AggregationRule;
    use ion_proto::{BlobKey, IngestDone, IngestStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(entry.into());
        }
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    impl ResourceStore for Log {
        fn get(&self, id: &str) -> Result<Resource, StoreError> {
            if id == "src" {
                Ok(Resource::DataSource(DataSourceDescriptor::new(
                    "src",
                    AggregationRule::Overlap,
                )))
            } else {
                Err(StoreError::NotFound(id.to_string()))
            }
        }
        fn put(&self, _: Resource) -> Result<(), StoreError> {
            self.push("put");
            Ok(())
        }
    }

    impl DatasetStore for Log {
        fn checkout(&self, id: &DatasetId) -> Result<Dataset, StoreError> {
            self.push("checkout");
            Ok(Dataset::new(id.clone()))
        }
        fn create_branch(&self, _: &DatasetId) -> Result<BranchKey, StoreError> {
            self.push("branch");
            Ok(BranchKey("b1".into()))
        }
        fn merge_branch(&self, _: &DatasetId, _: &BranchKey, _: Dataset) -> Result<(), StoreError> {
            self.push("merge");
            Ok(())
        }
        fn branch_count(&self, _: &DatasetId) -> Result<usize, StoreError> {
            Ok(1)
        }
        fn commit(&self, _: &DatasetId, _: &str) -> Result<u64, StoreError> {
            self.push("commit");
            Ok(1)
        }
        fn remove_branch(&self, _: &DatasetId, _: &BranchKey) -> Result<(), StoreError> {
            self.push("remove");
            Ok(())
        }
        fn release(&self, _: &DatasetId) -> Result<(), StoreError> {
            self.push("release");
            Ok(())
        }
    }

    impl BlobStore for Log {
        fn fetch(&self, _: &[BlobKey]) -> Result<Vec<Vec<u8>>, StoreError> {
            Ok(Vec::new())
        }
    }

    impl EventPublisher for Log {
        fn publish(&self, event: OutcomeEvent) -> Result<(), StoreError> {
            self.push(if event.is_success() { "success" } else { "failure" });
            Ok(())
        }
    }

    fn open(log: &Arc<Log>) -> Session {
        let ctx = IngestContext {
            resources: log.clone(),
            datasets: log.clone(),
            blobs: log.clone(),
            events: log.clone(),
            settings: IngestSettings::default(),
        };
        Session::open(
            ctx,
            &PerformIngest {
                dataset_id: DatasetId::from("ds"),
                datasource_id: "src".into(),
                reply_to: "producer".into(),
                timeout_seconds: 0,
            },
        )
        .unwrap()
    }

    #[test]
    fn open_arms_watchdog() {
        let log = Arc::new(Log::default());
        let mut session = open(&log);
        assert_eq!(session.state(), SessionState::AwaitingHeader);
        assert_eq!(session.take_watchdog(), Some(Watchdog::Reset));
        assert_eq!(log.entries(), vec!["checkout"]);
    }

    #[test]
    fn producer_failure_rolls_back_and_discards_later_messages() {
        let log = Arc::new(Log::default());
        let mut session = open(&log);
        let done = SessionMessage::Done(IngestDone {
            status: IngestStatus::Unavailable,
            detail: None,
        });
        assert_eq!(session.handle(done.clone()), Delivery::Accepted);
        assert!(session.is_terminating());
        assert_eq!(session.handle(done), Delivery::Discarded);
        assert!(matches!(
            session.take_outcome(),
            Some(Err(IngestionError::ProducerStatus { .. }))
        ));
        assert_eq!(log.entries(), vec!["checkout", "release", "failure"]);
    }

    #[test]
    fn unknown_data_source_fails_open() {
        let log = Arc::new(Log::default());
        let ctx = IngestContext {
            resources: log.clone(),
            datasets: log.clone(),
            blobs: log.clone(),
            events: log.clone(),
            settings: IngestSettings::default(),
        };
        let err = Session::open(
            ctx,
            &PerformIngest {
                dataset_id: DatasetId::from("ds"),
                datasource_id: "missing".into(),
                reply_to: String::new(),
                timeout_seconds: 0,
            },
        )
        .unwrap_err();
        assert_eq!(err, IngestionError::Store(StoreError::NotFound("missing".into())));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn dropping_an_unfinished_session_rolls_back() {
        let log = Arc::new(Log::default());
        let mut session = open(&log);
        let header = SessionMessage::Header(ion_proto::DatasetHeader {
            dataset_id: DatasetId::from("ds"),
            shape_descriptor: ion_dataset::Group::default(),
        });
        assert_eq!(session.handle(header), Delivery::Accepted);
        drop(session);
        assert_eq!(
            log.entries(),
            vec!["checkout", "branch", "remove", "release", "failure"]
        );
    }

    #[test]
    fn dropping_a_finished_session_does_nothing_more() {
        let log = Arc::new(Log::default());
        let mut session = open(&log);
        session.expire();
        let before = log.entries();
        drop(session);
        assert_eq!(log.entries(), before);
    }

    #[test]
    fn expiry_times_out_and_rolls_back() {
        let log = Arc::new(Log::default());
        let mut session = open(&log);
        session.expire();
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.take_outcome(), Some(Err(IngestionError::Timeout)));
        assert_eq!(session.take_watchdog(), Some(Watchdog::Cancel));
    }
}
