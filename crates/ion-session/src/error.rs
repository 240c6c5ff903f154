// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session and collaborator error types.

use ion_dataset::{DatasetError, DatasetId};
use ion_merge::{AttributeConflict, MergeError};
use ion_proto::{BlobError, IngestStatus};
use thiserror::Error;

/// Failures reported by the external stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No resource, dataset or blob under this id.
    #[error("not found: {0}")]
    NotFound(String),
    /// The dataset is already checked out by another session.
    #[error("dataset {0} is already checked out")]
    CheckoutConflict(DatasetId),
    /// Resource exists but has a different kind than requested.
    #[error("resource {id} is not a {expected}")]
    WrongKind {
        /// Resource id.
        id: String,
        /// Kind the caller asked for.
        expected: &'static str,
    },
    /// Branch key unknown to the store.
    #[error("unknown branch {0}")]
    UnknownBranch(String),
    /// Store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    /// Message kind not valid in the current state.
    #[error("unexpected {kind} while {state}")]
    UnexpectedMessage {
        /// Session state name.
        state: &'static str,
        /// Message kind.
        kind: &'static str,
    },
    /// Message addressed to a different dataset.
    #[error("message for dataset {got} routed to session for {expected}")]
    DatasetMismatch {
        /// Session dataset.
        expected: DatasetId,
        /// Dataset named by the message.
        got: DatasetId,
    },
    /// Chunk for a variable the header did not declare.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    /// Watchdog expired before the session finished.
    #[error("ingestion timed out")]
    Timeout,
    /// Producer finished with a non-OK status.
    #[error("{}", status_text(.status, .detail))]
    ProducerStatus {
        /// Reported status.
        status: IngestStatus,
        /// Producer detail.
        detail: Option<String>,
    },
    /// Structural merge failure.
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// Chunk violated the dataset model.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Remote chunk could not be materialized.
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// Array data merged but global attributes conflicted.
    #[error("{} global attribute conflict(s): {}", .0.len(), conflict_names(.0))]
    AttributeConflicts(Vec<AttributeConflict>),
    /// Store left in a state that must not be repaired silently.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// Collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Session task ended without reporting an outcome.
    #[error("session closed")]
    SessionClosed,
}

fn status_text(status: &IngestStatus, detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!("{}: {detail}", status.failure_text()),
        None => status.failure_text().to_string(),
    }
}

fn conflict_names(conflicts: &[AttributeConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl IngestionError {
    /// Text carried by the failure notification. Infrastructure failures are
    /// reported under the agent-error classification.
    pub fn error_text(&self) -> String {
        match self {
            IngestionError::Store(_) | IngestionError::SessionClosed => {
                format!("{}: {self}", IngestStatus::AgentError.failure_text())
            }
            other => other.to_string(),
        }
    }

    /// Short reason tag for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestionError::UnexpectedMessage { .. }
            | IngestionError::DatasetMismatch { .. }
            | IngestionError::UnknownVariable(_) => "protocol",
            IngestionError::Timeout => "timeout",
            IngestionError::ProducerStatus { .. } => "producer",
            IngestionError::Merge(_)
            | IngestionError::Dataset(_)
            | IngestionError::Blob(_)
            | IngestionError::AttributeConflicts(_) => "content",
            IngestionError::Invariant(_) => "invariant",
            IngestionError::Store(_) | IngestionError::SessionClosed => "infrastructure",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn producer_status_text_includes_detail() {
        let err = IngestionError::ProducerStatus {
            status: IngestStatus::Unavailable,
            detail: Some("503 from upstream".into()),
        };
        assert_eq!(
            err.to_string(),
            "external data source unavailable: 503 from upstream"
        );
        assert_eq!(err.reason(), "producer");
    }

    #[test]
    fn store_failures_are_classified_as_agent_errors() {
        let err = IngestionError::from(StoreError::Unavailable("db down".into()));
        assert!(err.error_text().starts_with("external data agent failed"));
        assert_eq!(err.reason(), "infrastructure");
    }

    #[test]
    fn conflicts_list_attribute_names() {
        let err = IngestionError::AttributeConflicts(vec![
            AttributeConflict {
                name: "a".into(),
                reason: "x".into(),
            },
            AttributeConflict {
                name: "b".into(),
                reason: "y".into(),
            },
        ]);
        assert_eq!(err.to_string(), "2 global attribute conflict(s): a, b");
    }
}
