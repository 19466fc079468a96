//! Live sessions keyed by id. Each session owns one outbound event channel,
//! its surface documents and a close signal for its publisher.

use std::collections::HashMap;
use std::sync::Arc;

use a2ui_protocol::{
    ApplyReport, Patch, SessionError, SessionEvent, SessionId, SessionResult, SurfaceId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument};

use crate::store::SurfaceStore;

/// One subscriber connection: an outbound FIFO of events plus the surface
/// documents those events describe.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<SessionEvent>,
    /// Receiving half, parked here until a publisher claims it.
    inbound: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    /// Also serializes apply-and-notify so documents and events stay in step.
    surfaces: Mutex<SurfaceStore>,
    closed: CancellationToken,
}

impl Session {
    fn new() -> Self {
        let (outbound, inbound) = mpsc::unbounded_channel();
        Self {
            id: SessionId::generate(),
            created_at: Utc::now(),
            outbound,
            inbound: Mutex::new(Some(inbound)),
            surfaces: Mutex::new(SurfaceStore::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Take the exclusive right to drain the outbound channel. Fails if a
    /// consumer already holds it; once released the channel is gone for good.
    pub fn claim_outbound(&self) -> SessionResult<OutboundLease> {
        self.inbound
            .lock()
            .take()
            .map(|receiver| OutboundLease { receiver })
            .ok_or_else(|| SessionError::AlreadySubscribed(self.id.clone()))
    }

    pub fn enqueue(&self, event: SessionEvent) -> SessionResult<()> {
        if self.closed.is_cancelled() {
            return Err(SessionError::ChannelClosed(self.id.clone()));
        }
        debug!(session_id = %self.id, kind = event.kind(), "event enqueued");
        self.outbound
            .send(event)
            .map_err(|_| SessionError::ChannelClosed(self.id.clone()))
    }

    /// Replace a surface document and announce it with `surface/open`.
    pub fn open_surface(
        &self,
        surface_id: SurfaceId,
        title: impl Into<String>,
        data_model: Value,
    ) -> SessionResult<()> {
        let mut surfaces = self.surfaces.lock();
        self.ensure_open()?;
        surfaces.replace_document(surface_id.clone(), data_model.clone());
        self.enqueue(SessionEvent::surface_open(surface_id, title, data_model))
    }

    /// Apply `patches` to the surface and enqueue a `dataModelUpdate` carrying
    /// the same list, as one step under the surface lock.
    pub fn apply_and_notify(
        &self,
        surface_id: SurfaceId,
        patches: Vec<Patch>,
    ) -> SessionResult<ApplyReport> {
        let mut surfaces = self.surfaces.lock();
        self.ensure_open()?;
        let report = surfaces.apply_patches(&surface_id, &patches);
        self.enqueue(SessionEvent::data_model_update(surface_id, patches))?;
        Ok(report)
    }

    /// Copy of the surface document. Reads outside the apply-and-notify path
    /// may observe a document older than the last enqueued event.
    pub fn surface(&self, surface_id: &str) -> Option<Value> {
        self.surfaces.lock().snapshot(surface_id)
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.surfaces.lock().surface_ids().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session has been disposed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.is_cancelled() || self.outbound.is_closed() {
            return Err(SessionError::ChannelClosed(self.id.clone()));
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Exclusive consumer handle for a session's outbound channel.
#[derive(Debug)]
pub struct OutboundLease {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl OutboundLease {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Process-wide map of live sessions. The mutex covers the map only; session
/// state is guarded per session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        self.sessions
            .lock()
            .insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, "session created");
        session
    }

    pub fn get(&self, session_id: &SessionId) -> SessionResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Remove the session and signal its publisher to stop. Returns whether
    /// the session was still registered.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn dispose(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        match removed {
            Some(session) => {
                session.close();
                info!("session disposed");
                true
            }
            None => false,
        }
    }

    /// Best-effort enqueue. Unknown or closing sessions drop the event, since
    /// producers may race with disposal.
    pub fn push(&self, session_id: &SessionId, event: SessionEvent) {
        let result = self
            .get(session_id)
            .and_then(|session| session.enqueue(event));
        if let Err(error) = result {
            debug!(session_id = %session_id, %error, "event dropped");
        }
    }

    #[instrument(skip(self, title, data_model), fields(session_id = %session_id, surface_id = %surface_id))]
    pub fn open_surface(
        &self,
        session_id: &SessionId,
        surface_id: SurfaceId,
        title: impl Into<String>,
        data_model: Value,
    ) -> SessionResult<()> {
        self.get(session_id)?
            .open_surface(surface_id, title, data_model)
    }

    #[instrument(
        skip(self, patches),
        fields(session_id = %session_id, surface_id = %surface_id, patches = patches.len())
    )]
    pub fn push_patch_and_apply(
        &self,
        session_id: &SessionId,
        surface_id: SurfaceId,
        patches: Vec<Patch>,
    ) -> SessionResult<ApplyReport> {
        self.get(session_id)?.apply_and_notify(surface_id, patches)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
