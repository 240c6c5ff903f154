// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Outcome event recorder.

use std::sync::{Arc, Mutex};

use ion_proto::OutcomeEvent;
use ion_session::{EventPublisher, StoreError};

/// Records every published event; can be told to refuse them.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    inner: Arc<Mutex<PublisherInner>>,
}

#[derive(Default)]
struct PublisherInner {
    events: Vec<OutcomeEvent>,
    fail: bool,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    pub fn events(&self) -> Vec<OutcomeEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .clone()
    }

    /// Make `publish` fail (the event is not recorded).
    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).fail = fail;
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: OutcomeEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail {
            return Err(StoreError::Unavailable("event bus down".into()));
        }
        inner.events.push(event);
        Ok(())
    }
}
