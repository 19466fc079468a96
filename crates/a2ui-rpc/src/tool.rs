//! Tool calls over a push-stream transport.
//!
//! The tool server answers on its SSE stream, not in the POST response, so
//! each call opens its own stream, submits the request out-of-band and waits
//! for the `message` event carrying the same request id.
//!
//! One stream serves exactly one in-flight call. Sharing a stream between
//! concurrent calls would need a shared correlation table and is not
//! supported; concurrency comes from opening more streams.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use a2ui_protocol::{RequestId, StreamEndpoint, ToolCallRequest};
use reqwest::Url;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Span, debug, field, instrument, warn};

use crate::error::{RpcError, RpcResult};
use crate::lease::StreamLease;

/// How the call is submitted once the stream is open. Chosen per server;
/// there is no negotiation between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamTransport {
    /// POST to `<base>/message` as soon as `<base>/sse` is open.
    #[default]
    Direct,
    /// Wait for the `endpoint` event, then POST to its `post_url` with the
    /// connection token in `X-SSE-ID`.
    Handshake,
}

impl FromStr for StreamTransport {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "handshake" => Ok(Self::Handshake),
            other => Err(format!(
                "unknown stream transport '{other}' (expected direct or handshake)"
            )),
        }
    }
}

impl fmt::Display for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Handshake => "handshake",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ToolClient {
    http: reqwest::Client,
    stream_url: Url,
    ingress_url: Url,
    transport: StreamTransport,
}

impl ToolClient {
    /// Accepts either the server base URL or its `/sse` endpoint.
    pub fn new(url: &str) -> RpcResult<Self> {
        let (stream_url, ingress_url) = stream_endpoints(url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            stream_url,
            ingress_url,
            transport: StreamTransport::default(),
        })
    }

    pub fn with_transport(mut self, transport: StreamTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    pub fn ingress_url(&self) -> &Url {
        &self.ingress_url
    }

    pub fn transport(&self) -> StreamTransport {
        self.transport
    }

    /// Invoke `name` and wait at most `timeout` for its correlated result.
    ///
    /// The budget covers opening the stream, the handshake and the wait. On
    /// timeout the ingress POST is aborted along with the stream.
    #[instrument(
        skip(self, arguments),
        fields(tool = %name, transport = %self.transport, request_id = field::Empty)
    )]
    pub async fn call(&self, name: &str, arguments: Value, timeout: Duration) -> RpcResult<Value> {
        let request = ToolCallRequest::new(RequestId::generate(), name, arguments);
        Span::current().record("request_id", request.id.as_str());

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.exchange(request))
            .await
            .unwrap_or(Err(RpcError::Timeout(timeout)));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => debug!(elapsed_ms, "tool call answered"),
            Err(error) => warn!(elapsed_ms, %error, "tool call failed"),
        }
        outcome
    }

    async fn exchange(&self, request: ToolCallRequest) -> RpcResult<Value> {
        let mut lease = StreamLease::open(&self.http, self.stream_url.clone()).await?;

        let (ingress_url, sse_id) = match self.transport {
            StreamTransport::Direct => (self.ingress_url.clone(), None),
            StreamTransport::Handshake => {
                let endpoint = lease.handshake().await?;
                let url = lease
                    .url()
                    .join(&endpoint.post_url)
                    .map_err(|error| RpcError::invalid_url(&endpoint.post_url, error))?;
                (url, Some(endpoint.sse_id))
            }
        };

        let id = request.id.clone();
        let mut ingress = IngressTask::spawn(self.http.clone(), ingress_url, sse_id, request);
        let response = lease.await_response(&id);
        tokio::pin!(response);

        tokio::select! {
            outcome = &mut response => outcome,
            posted = ingress.join() => {
                posted?;
                response.await
            }
        }
    }
}

/// Background POST of the request. Aborted when dropped, so a call that
/// returns early (timeout, stream failure, caller cancelled) leaves nothing
/// running.
struct IngressTask {
    handle: JoinHandle<RpcResult<()>>,
}

impl IngressTask {
    fn spawn(
        http: reqwest::Client,
        url: Url,
        sse_id: Option<String>,
        request: ToolCallRequest,
    ) -> Self {
        Self::from_handle(tokio::spawn(async move {
            let mut post = http.post(url).json(&request);
            if let Some(sse_id) = sse_id {
                post = post.header(StreamEndpoint::HEADER, sse_id);
            }
            post.send().await?.error_for_status()?;
            Ok(())
        }))
    }

    fn from_handle(handle: JoinHandle<RpcResult<()>>) -> Self {
        Self { handle }
    }

    async fn join(&mut self) -> RpcResult<()> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(error) => Err(RpcError::Protocol(format!("ingress task failed: {error}"))),
        }
    }
}

impl Drop for IngressTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// `http://host:8000` and `http://host:8000/sse` both yield
/// (`.../sse`, `.../message`).
fn stream_endpoints(raw: &str) -> RpcResult<(Url, Url)> {
    let trimmed = raw.trim().trim_end_matches('/');
    let base = trimmed.strip_suffix("/sse").unwrap_or(trimmed);
    let parse = |url: String| Url::parse(&url).map_err(|error| RpcError::invalid_url(&url, error));
    Ok((parse(format!("{base}/sse"))?, parse(format!("{base}/message"))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn base_and_stream_urls_normalize_identically() -> anyhow::Result<()> {
        for raw in [
            "http://127.0.0.1:8000",
            "http://127.0.0.1:8000/",
            "http://127.0.0.1:8000/sse",
            "http://127.0.0.1:8000/sse/",
        ] {
            let client = ToolClient::new(raw)?;
            assert_eq!(client.stream_url().as_str(), "http://127.0.0.1:8000/sse");
            assert_eq!(client.ingress_url().as_str(), "http://127.0.0.1:8000/message");
        }
        Ok(())
    }

    #[test]
    fn mounted_servers_keep_their_prefix() -> anyhow::Result<()> {
        let client = ToolClient::new("https://tools.example/mcp/sse")?;
        assert_eq!(client.ingress_url().as_str(), "https://tools.example/mcp/message");
        Ok(())
    }

    #[test]
    fn rejects_unparseable_urls() {
        let err = ToolClient::new("not a url").unwrap_err();
        assert!(matches!(err, RpcError::InvalidUrl { .. }));
    }

    #[test]
    fn transport_parses_from_config_strings() {
        assert_eq!("direct".parse::<StreamTransport>(), Ok(StreamTransport::Direct));
        assert_eq!(" Handshake ".parse::<StreamTransport>(), Ok(StreamTransport::Handshake));
        assert!("websocket".parse::<StreamTransport>().is_err());
        assert_eq!(StreamTransport::Handshake.to_string(), "handshake");
    }

    #[tokio::test]
    async fn dropping_ingress_task_aborts_the_post() {
        let completed = Arc::new(AtomicBool::new(false));
        let task = IngressTask::from_handle(tokio::spawn({
            let completed = completed.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                completed.store(true, Ordering::SeqCst);
                Ok(())
            }
        }));
        drop(task);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }
}
