// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session state machine as a pure function of (state, event).
//!
//! [`transition`] never touches collaborators; it only decides the next state
//! and the [`Effect`]s the driver must execute, in order.

use ion_proto::{DatasetHeader, IngestStatus, SupplementChunk};

use crate::error::IngestionError;

/// Lifecycle of one ingestion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, collaborators not yet resolved.
    Init,
    /// Waiting for the supplement header.
    AwaitingHeader,
    /// Header installed, no chunk received yet.
    AwaitingChunks,
    /// At least one chunk received; more chunks or the done message follow.
    AwaitingDone,
    /// Producer finished with OK; merge in progress.
    Merging,
    /// Merged and committed.
    Completed,
    /// Rolled back.
    Failed,
}

impl SessionState {
    /// Stable name used in logs and protocol errors.
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::AwaitingHeader => "awaiting_header",
            SessionState::AwaitingChunks => "awaiting_chunks",
            SessionState::AwaitingDone => "awaiting_done",
            SessionState::Merging => "merging",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    /// True for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Collaborators resolved and the dataset checked out.
    Opened,
    /// Supplement header arrived.
    Header(DatasetHeader),
    /// Chunk arrived.
    Chunk(SupplementChunk),
    /// Producer finished.
    Done {
        /// Completion status.
        status: IngestStatus,
        /// Producer detail.
        detail: Option<String>,
    },
    /// Merge produced a clean result.
    MergeFinished,
    /// An effect failed.
    Fault(IngestionError),
    /// No message arrived within the timeout.
    WatchdogExpired,
}

impl SessionEvent {
    /// Stable name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "open",
            SessionEvent::Header(_) => "dataset_header",
            SessionEvent::Chunk(_) => "supplement_chunk",
            SessionEvent::Done { .. } => "ingest_done",
            SessionEvent::MergeFinished => "merge_finished",
            SessionEvent::Fault(_) => "fault",
            SessionEvent::WatchdogExpired => "watchdog_expired",
        }
    }
}

/// Work the driver performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Restart the watchdog with the full timeout.
    ResetWatchdog,
    /// Stop the watchdog.
    CancelWatchdog,
    /// Build the supplement skeleton from the header event.
    InstallHeader,
    /// Open the speculative branch.
    OpenBranch,
    /// Route the chunk event into the supplement.
    RouteChunk,
    /// Materialize remote chunks and merge.
    RunMerge,
    /// Fold the branch into head, commit and announce.
    Finalize,
    /// Roll back and announce the failure.
    Abort(IngestionError),
    /// Drop the event.
    Discard,
}

/// Next state and effects for `event` in `state`.
pub fn transition(state: SessionState, event: &SessionEvent) -> (SessionState, Vec<Effect>) {
    use SessionState as S;

    match (state, event) {
        (S::Failed, _) => (S::Failed, vec![Effect::Discard]),
        (_, SessionEvent::Fault(err)) => fail(err.clone()),
        (S::Completed, _) => (S::Completed, vec![Effect::Discard]),
        (S::Merging, SessionEvent::WatchdogExpired) => (S::Merging, vec![Effect::Discard]),
        (_, SessionEvent::WatchdogExpired) => fail(IngestionError::Timeout),

        (S::Init, SessionEvent::Opened) => (S::AwaitingHeader, vec![Effect::ResetWatchdog]),
        (S::AwaitingHeader, SessionEvent::Header(_)) => (
            S::AwaitingChunks,
            vec![Effect::ResetWatchdog, Effect::InstallHeader, Effect::OpenBranch],
        ),
        (S::AwaitingChunks | S::AwaitingDone, SessionEvent::Chunk(_)) => (
            S::AwaitingDone,
            vec![Effect::ResetWatchdog, Effect::RouteChunk],
        ),
        (S::AwaitingChunks | S::AwaitingDone, SessionEvent::Done { status, .. })
            if status.is_ok() =>
        {
            (S::Merging, vec![Effect::CancelWatchdog, Effect::RunMerge])
        }
        (
            S::AwaitingHeader | S::AwaitingChunks | S::AwaitingDone,
            SessionEvent::Done { status, detail },
        ) if !status.is_ok() => fail(IngestionError::ProducerStatus {
            status: *status,
            detail: detail.clone(),
        }),
        (S::Merging, SessionEvent::MergeFinished) => (S::Completed, vec![Effect::Finalize]),

        (state, event) => fail(IngestionError::UnexpectedMessage {
            state: state.name(),
            kind: event.kind(),
        }),
    }
}

fn fail(err: IngestionError) -> (SessionState, Vec<Effect>) {
    (
        SessionState::Failed,
        vec![Effect::CancelWatchdog, Effect::Abort(err)],
    )
}
