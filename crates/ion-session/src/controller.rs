// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Async front of the session driver: one tokio task per session, fed through
//! a bounded channel and preempted only by its watchdog.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ion_proto::{
    DatasetHeader, DatasetId, IngestDone, IngestReady, PerformIngest, SessionMessage,
    SupplementChunk,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};

use crate::config::{SettingsError, SettingsService, SettingsStore};
use crate::error::IngestionError;
use crate::ports::IngestContext;
use crate::session::{Delivery, Outcome, Session, Watchdog};

struct SessionInput {
    message: SessionMessage,
    ack: oneshot::Sender<Delivery>,
}

/// Starts ingestion sessions against a shared set of collaborators.
#[derive(Debug, Clone)]
pub struct IngestionController {
    ctx: IngestContext,
    next_session: Arc<AtomicU64>,
}

impl IngestionController {
    /// Controller over `ctx`.
    pub fn new(ctx: IngestContext) -> Self {
        Self {
            ctx,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Controller over `ctx` using the settings saved in `settings`, or the
    /// defaults when none were saved.
    pub fn from_settings<S: SettingsStore>(
        mut ctx: IngestContext,
        settings: &SettingsService<S>,
    ) -> Result<Self, SettingsError> {
        ctx.settings = settings.load_or_default()?;
        debug!(settings = ?ctx.settings, "loaded ingest settings");
        Ok(Self::new(ctx))
    }

    /// Open a session for `request` and spawn its task.
    ///
    /// Fails without side effects when the data source or dataset cannot be
    /// resolved or the dataset is already checked out.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime: the session task is
    /// started with [`tokio::spawn`].
    pub fn begin_session(&self, request: &PerformIngest) -> Result<SessionHandle, IngestionError> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let timeout = self.ctx.settings.timeout_for(request.timeout_seconds);
        let session = Session::open(self.ctx.clone(), request)?;
        info!(
            dataset_id = %request.dataset_id,
            datasource_id = %request.datasource_id,
            session = id,
            timeout_secs = timeout.as_secs(),
            "ingest session opened"
        );

        let (tx, rx) = mpsc::channel(self.ctx.settings.channel_capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let span = info_span!("ingest", dataset_id = %request.dataset_id, session = id);
        tokio::spawn(run_session(session, rx, timeout, outcome_tx).instrument(span));

        Ok(SessionHandle {
            dataset_id: request.dataset_id.clone(),
            ready: IngestReady {
                channel: format!("ingest-{id}"),
                chunk_topic: format!(
                    "{}.{}.{id}",
                    self.ctx.settings.chunk_topic_prefix, request.dataset_id
                ),
            },
            inbox: tx,
            outcome: outcome_rx,
        })
    }
}

/// Producer-facing side of one running session.
#[derive(Debug)]
pub struct SessionHandle {
    dataset_id: DatasetId,
    ready: IngestReady,
    inbox: mpsc::Sender<SessionInput>,
    outcome: oneshot::Receiver<Outcome>,
}

impl std::fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInput")
            .field("kind", &self.message.kind())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Dataset this session ingests into.
    pub fn dataset_id(&self) -> &DatasetId {
        &self.dataset_id
    }

    /// Reply for the producer: where to send chunks.
    pub fn ready(&self) -> IngestReady {
        self.ready.clone()
    }

    /// Deliver the supplement header.
    pub async fn on_header(&self, header: DatasetHeader) -> Delivery {
        self.send(SessionMessage::Header(header)).await
    }

    /// Deliver one chunk.
    pub async fn on_chunk(&self, chunk: SupplementChunk) -> Delivery {
        self.send(SessionMessage::Chunk(chunk)).await
    }

    /// Deliver the end-of-stream status.
    pub async fn on_done(&self, done: IngestDone) -> Delivery {
        self.send(SessionMessage::Done(done)).await
    }

    /// Deliver any session message.
    pub async fn send(&self, message: SessionMessage) -> Delivery {
        let (ack, ack_rx) = oneshot::channel();
        if self.inbox.send(SessionInput { message, ack }).await.is_err() {
            return Delivery::Discarded;
        }
        ack_rx.await.unwrap_or(Delivery::Discarded)
    }

    /// Wait for the session to finish. The session keeps running (and its
    /// watchdog keeps ticking) until then.
    pub async fn await_outcome(self) -> Outcome {
        let SessionHandle { inbox, outcome, .. } = self;
        let result = outcome.await.unwrap_or(Err(IngestionError::SessionClosed));
        drop(inbox);
        result
    }
}

async fn run_session(
    mut session: Session,
    mut inbox: mpsc::Receiver<SessionInput>,
    timeout: Duration,
    outcome_tx: oneshot::Sender<Outcome>,
) {
    let watchdog = tokio::time::sleep(timeout);
    tokio::pin!(watchdog);
    let mut armed = false;
    apply_watchdog(&mut session, watchdog.as_mut(), &mut armed, timeout);

    while !session.is_terminating() {
        tokio::select! {
            input = inbox.recv() => match input {
                Some(SessionInput { message, ack }) => {
                    let delivery = session.handle(message);
                    let _ = ack.send(delivery);
                }
                None => session.abort(IngestionError::SessionClosed),
            },
            () = watchdog.as_mut(), if armed => {
                armed = false;
                session.expire();
            }
        }
        apply_watchdog(&mut session, watchdog.as_mut(), &mut armed, timeout);
    }

    let outcome = session
        .take_outcome()
        .unwrap_or(Err(IngestionError::SessionClosed));
    match &outcome {
        Ok(summary) => info!(steps = summary.timestep_count, "ingest session completed"),
        Err(err) => info!(reason = err.reason(), "ingest session failed"),
    }
    let _ = outcome_tx.send(outcome);

    inbox.close();
    while let Some(SessionInput { message, ack }) = inbox.recv().await {
        debug!(kind = message.kind(), "discarding message for finished session");
        let _ = ack.send(Delivery::Discarded);
    }
}

fn apply_watchdog(
    session: &mut Session,
    watchdog: std::pin::Pin<&mut tokio::time::Sleep>,
    armed: &mut bool,
    timeout: Duration,
) {
    match session.take_watchdog() {
        Some(Watchdog::Reset) => {
            watchdog.reset(Instant::now() + timeout);
            *armed = true;
        }
        Some(Watchdog::Cancel) => *armed = false,
        None => {}
    }
}
