//! Exclusive lease on one SSE response stream.
//!
//! A lease is read by exactly one consumer and ends at exactly one terminal
//! condition: a matching response, end of stream, or the caller dropping it
//! on timeout. [`StreamLease::await_response`] takes the lease by value, so a
//! stream that has been consumed cannot be read again.

use std::pin::Pin;

use a2ui_protocol::{JsonRpcResponse, RequestId, StreamEndpoint};
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tracing::debug;

use crate::error::{RpcError, RpcResult};

type EventStream =
    Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

pub struct StreamLease {
    url: Url,
    events: EventStream,
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease").field("url", &self.url).finish()
    }
}

impl StreamLease {
    /// Open the stream and wait for the response headers.
    pub async fn open(http: &reqwest::Client, url: Url) -> RpcResult<Self> {
        let response = http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;
        debug!(url = %url, "event stream opened");
        Ok(Self {
            url,
            events: Box::pin(response.bytes_stream().eventsource()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Read the `endpoint` event a handshake-first server sends before
    /// anything else.
    pub async fn handshake(&mut self) -> RpcResult<StreamEndpoint> {
        let event = self.next_event().await?.ok_or_else(|| {
            RpcError::Protocol("stream ended before endpoint event".to_owned())
        })?;
        if event.event != StreamEndpoint::EVENT {
            return Err(RpcError::Protocol(format!(
                "expected '{}' event, got '{}'",
                StreamEndpoint::EVENT,
                event.event
            )));
        }
        serde_json::from_str(&event.data)
            .map_err(|error| RpcError::Protocol(format!("malformed endpoint payload: {error}")))
    }

    /// Consume the stream until the response for `id` arrives.
    pub async fn await_response(mut self, id: &RequestId) -> RpcResult<Value> {
        while let Some(event) = self.next_event().await? {
            if !is_message(&event) {
                continue;
            }
            let response: JsonRpcResponse = match serde_json::from_str(&event.data) {
                Ok(response) => response,
                Err(error) => {
                    debug!(%error, "skipping non JSON-RPC frame");
                    continue;
                }
            };
            if !response.answers(id) {
                continue;
            }
            return response.into_outcome().map_err(RpcError::RemoteTool);
        }
        Err(RpcError::Protocol(
            "stream ended without response".to_owned(),
        ))
    }

    async fn next_event(&mut self) -> RpcResult<Option<Event>> {
        match self.events.next().await {
            None => Ok(None),
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(EventStreamError::Transport(error))) => Err(RpcError::Transport(error)),
            Some(Err(error)) => Err(RpcError::Protocol(format!(
                "malformed event stream: {error}"
            ))),
        }
    }
}

/// Unnamed events dispatch as `message`.
fn is_message(event: &Event) -> bool {
    event.event.is_empty() || event.event == "message"
}
