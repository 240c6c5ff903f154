// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Streamed supplement ingestion sessions.
//!
//! A producer asks the [`IngestionController`] to begin a session, streams a
//! header and any number of chunks, then reports completion. The session
//! checks out the target dataset, assembles the supplement in a
//! [`ChunkRouter`], merges it on a speculative branch and either commits or
//! rolls back. Exactly one outcome event is published either way.
//!
//! Collaborators (resource registry, versioned dataset store, blob store,
//! event sink) are reached only through the traits in [`ports`].

pub mod config;
pub mod controller;
pub mod error;
pub mod ports;
pub mod router;
pub mod session;
pub mod state;

pub use config::{
    FsSettingsStore, IngestSettings, SettingsError, SettingsService, SettingsStore, SETTINGS_KEY,
};
pub use controller::{IngestionController, SessionHandle};
pub use error::{IngestionError, StoreError};
pub use ports::{
    BlobStore, BranchKey, DatasetResource, DatasetStore, EventPublisher, IngestContext, Resource,
    ResourceStore,
};
pub use router::ChunkRouter;
pub use session::{Delivery, Outcome, Session, Watchdog};
pub use state::{transition, Effect, SessionEvent, SessionState};
