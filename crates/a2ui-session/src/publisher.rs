//! Push stream publisher: drains one session's outbound channel onto one
//! subscriber until the subscriber goes away, the caller cancels, or the
//! session is disposed. Every exit path disposes the session, including an
//! aborted task.

use std::sync::Arc;
use std::time::Duration;

use a2ui_protocol::{SessionEvent, SessionId, SessionResult};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::registry::{OutboundLease, Session, SessionRegistry};

/// Bounded wait between disconnect checks when the channel is idle.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscriber disconnected")]
pub struct SinkClosed;

/// Transport seam between the publisher and a subscriber connection.
#[async_trait]
pub trait EventSink: Send {
    async fn deliver(&mut self, event: SessionEvent) -> Result<(), SinkClosed>;

    fn is_disconnected(&self) -> bool;
}

/// Sink over a bounded channel whose receiver backs an HTTP response body.
/// Dropping the body (client gone) closes the channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<SessionEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&mut self, event: SessionEvent) -> Result<(), SinkClosed> {
        self.sender.send(event).await.map_err(|_| SinkClosed)
    }

    fn is_disconnected(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishEnd {
    Disconnected,
    Cancelled,
    SessionClosed,
}

#[derive(Debug, Clone)]
pub struct Publisher {
    registry: SessionRegistry,
    tick: Duration,
}

impl Publisher {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Emit `session/created`, then every queued event in FIFO order.
    ///
    /// Fails only when another consumer already holds the session's channel.
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn run<S: EventSink>(
        &self,
        session: Arc<Session>,
        mut sink: S,
        cancel: CancellationToken,
    ) -> SessionResult<PublishEnd> {
        let mut lease = session.claim_outbound()?;
        let release = DisposeOnDrop {
            registry: self.registry.clone(),
            session_id: session.id().clone(),
        };
        let end = self.pump(&session, &mut lease, &mut sink, &cancel).await;
        drop(lease);
        drop(release);
        info!(?end, "publisher stopped");
        Ok(end)
    }

    async fn pump<S: EventSink>(
        &self,
        session: &Session,
        lease: &mut OutboundLease,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> PublishEnd {
        let created = SessionEvent::SessionCreated {
            session_id: session.id().clone(),
        };
        if let Some(end) = deliver(session, sink, cancel, created).await {
            return end;
        }

        loop {
            if sink.is_disconnected() {
                return PublishEnd::Disconnected;
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PublishEnd::Cancelled,
                _ = session.closed() => return PublishEnd::SessionClosed,
                next = tokio::time::timeout(self.tick, lease.recv()) => next,
            };
            match next {
                Ok(Some(event)) => {
                    let kind = event.kind();
                    if let Some(end) = deliver(session, sink, cancel, event).await {
                        return end;
                    }
                    debug!(kind, "event delivered");
                }
                Ok(None) => return PublishEnd::SessionClosed,
                // Idle tick: loop around to re-check the subscriber.
                Err(_) => continue,
            }
        }
    }
}

/// Hand one event to the sink. A subscriber that stops reading can stall
/// delivery, so cancellation and disposal are honoured here too.
async fn deliver<S: EventSink>(
    session: &Session,
    sink: &mut S,
    cancel: &CancellationToken,
    event: SessionEvent,
) -> Option<PublishEnd> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(PublishEnd::Cancelled),
        _ = session.closed() => Some(PublishEnd::SessionClosed),
        delivered = sink.deliver(event) => delivered.err().map(|_| PublishEnd::Disconnected),
    }
}

/// Disposes the session when the publisher's future is dropped, including
/// when its task is aborted mid-stream.
struct DisposeOnDrop {
    registry: SessionRegistry,
    session_id: SessionId,
}

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.registry.dispose(&self.session_id);
    }
}
