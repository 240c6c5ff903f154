// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ingestion session schema: control messages exchanged with a producer and
//! the outcome events published when a session ends. Transport-agnostic; every
//! type is serde-serializable.

pub mod blob;

pub use blob::{decode_values, encode_values, BlobError, BlobKey};
pub use ion_dataset::{Bound, BoundedArray, DataType, DatasetId, Group};
pub use ion_merge::MergeSummary;

use serde::{Deserialize, Serialize};

/// Request to start an ingestion session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformIngest {
    /// Dataset receiving the supplement.
    pub dataset_id: DatasetId,
    /// Data source resource selecting the merge policy.
    pub datasource_id: String,
    /// Where the producer expects [`IngestReady`].
    pub reply_to: String,
    /// Watchdog period; `0` selects the configured default.
    pub timeout_seconds: u64,
}

/// Reply to [`PerformIngest`] once the session can accept data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReady {
    /// Session channel name.
    pub channel: String,
    /// Topic chunks should be published on.
    pub chunk_topic: String,
}

/// Shape, attributes and declared metadata of the supplement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHeader {
    /// Target dataset.
    pub dataset_id: DatasetId,
    /// Dimensions, variables (without content) and global attributes.
    pub shape_descriptor: Group,
}

/// Array data for one chunk: carried inline or by blob reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkPayload {
    /// Block carried in the message.
    Resident(BoundedArray),
    /// Block whose CBOR-encoded values live in the blob store.
    Remote {
        /// Index ranges covered by the block.
        bounds: Vec<Bound>,
        /// Content key of the encoded values.
        key: BlobKey,
    },
}

/// One bounded array for one supplement variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementChunk {
    /// Target dataset.
    pub dataset_id: DatasetId,
    /// Variable the block belongs to.
    pub variable_name: String,
    /// Block data.
    pub payload: ChunkPayload,
}

/// Producer's completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    /// All chunks delivered.
    #[serde(rename = "OK")]
    Ok,
    /// Upstream source could not be reached.
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    /// Upstream source returned an error.
    #[serde(rename = "SERVER_ERROR")]
    ServerError,
    /// Upstream had nothing new.
    #[serde(rename = "NO_NEW_DATA")]
    NoNewData,
    /// The producing agent failed.
    #[serde(rename = "AGENT_ERROR")]
    AgentError,
}

impl IngestStatus {
    /// True for [`IngestStatus::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, IngestStatus::Ok)
    }

    /// Failure text reported for a non-OK status.
    pub fn failure_text(self) -> &'static str {
        match self {
            IngestStatus::Ok => "ok",
            IngestStatus::Unavailable => "external data source unavailable",
            IngestStatus::ServerError => "external data source reported a server error",
            IngestStatus::NoNewData => "external data source has no new data",
            IngestStatus::AgentError => "external data agent failed",
        }
    }
}

/// End of the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestDone {
    /// Completion status.
    pub status: IngestStatus,
    /// Optional producer detail appended to the failure text.
    pub detail: Option<String>,
}

/// Messages routed to an open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionMessage {
    /// Supplement header (op = "dataset_header").
    Header(DatasetHeader),
    /// Array chunk (op = "supplement_chunk").
    Chunk(SupplementChunk),
    /// End of stream (op = "ingest_done").
    Done(IngestDone),
}

impl SessionMessage {
    /// Canonical op string for this message variant.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Header(_) => "dataset_header",
            SessionMessage::Chunk(_) => "supplement_chunk",
            SessionMessage::Done(_) => "ingest_done",
        }
    }
}

/// Failure notice carried by [`OutcomeEvent::DatasourceUnavailable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Data source the supplement came from.
    pub data_source_id: String,
    /// Target dataset.
    pub dataset_id: DatasetId,
    /// Supplement's declared title.
    pub title: Option<String>,
    /// Supplement's declared url.
    pub url: Option<String>,
    /// Error text.
    pub error_text: String,
}

/// Events published when a session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OutcomeEvent {
    /// Supplement merged and committed.
    DatasetSupplementAdded(MergeSummary),
    /// Session failed and was rolled back.
    DatasourceUnavailable(FailureNotice),
}

impl OutcomeEvent {
    /// Dataset the event refers to.
    pub fn dataset_id(&self) -> &DatasetId {
        match self {
            OutcomeEvent::DatasetSupplementAdded(summary) => &summary.dataset_id,
            OutcomeEvent::DatasourceUnavailable(notice) => &notice.dataset_id,
        }
    }

    /// True for the success event.
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeEvent::DatasetSupplementAdded(_))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn status_uses_upper_snake_wire_names() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&IngestStatus::NoNewData, &mut bytes).unwrap();
        let text: String = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(text, "NO_NEW_DATA");
        assert!(IngestStatus::Ok.is_ok());
        assert!(!IngestStatus::AgentError.is_ok());
    }

    #[test]
    fn message_kinds_are_stable() {
        let done = SessionMessage::Done(IngestDone {
            status: IngestStatus::Ok,
            detail: None,
        });
        assert_eq!(done.kind(), "ingest_done");
    }

    #[test]
    fn outcome_event_is_tagged() {
        let event = OutcomeEvent::DatasourceUnavailable(FailureNotice {
            data_source_id: "src".into(),
            dataset_id: DatasetId::from("ds"),
            title: None,
            url: None,
            error_text: "boom".into(),
        });
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&event, &mut bytes).unwrap();
        let back: OutcomeEvent = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.dataset_id().as_str(), "ds");
        assert!(!back.is_success());
    }
}
