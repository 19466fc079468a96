//! Synchronous `message/send` calls to capability agents.

use std::time::{Duration, Instant};

use a2ui_protocol::{MessageSendRequest, RequestId};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::error::{RpcError, RpcResult};

const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// Self-description an agent publishes next to its RPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    url: Url,
}

impl AgentClient {
    pub fn new(url: &str) -> RpcResult<Self> {
        let url = Url::parse(url.trim()).map_err(|error| RpcError::invalid_url(url, error))?;
        Ok(Self {
            http: reqwest::Client::new(),
            url,
        })
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send `payload` to `capability` and return the unwrapped `result.data`.
    #[instrument(skip(self, payload), fields(capability = %capability, agent = %self.url))]
    pub async fn invoke(
        &self,
        capability: &str,
        payload: Value,
        timeout: Duration,
    ) -> RpcResult<Value> {
        let request = MessageSendRequest::new(RequestId::generate(), capability, payload);
        let started = Instant::now();
        let outcome = self.send(&request, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => debug!(elapsed_ms, "capability answered"),
            Err(error) => warn!(elapsed_ms, %error, "capability call failed"),
        }
        outcome
    }

    async fn send(&self, request: &MessageSendRequest, timeout: Duration) -> RpcResult<Value> {
        let body = self
            .http
            .post(self.url.clone())
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| classify(error, timeout))?
            .bytes()
            .await
            .map_err(|error| classify(error, timeout))?;
        unwrap_envelope(serde_json::from_slice(&body)?)
    }

    /// Fetch the agent card served at the root of the agent's origin.
    pub async fn agent_card(&self, timeout: Duration) -> RpcResult<AgentCard> {
        let url = self
            .url
            .join(AGENT_CARD_PATH)
            .map_err(|error| RpcError::invalid_url(AGENT_CARD_PATH, error))?;
        let body = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| classify(error, timeout))?
            .bytes()
            .await
            .map_err(|error| classify(error, timeout))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> RpcError {
    if error.is_timeout() {
        RpcError::Timeout(timeout)
    } else {
        RpcError::Transport(error)
    }
}

/// Any `error` key wins, even `null`. Otherwise `result.data`, with a missing
/// or `null` result or data read as `{}`.
fn unwrap_envelope(body: Value) -> RpcResult<Value> {
    let Value::Object(mut body) = body else {
        return Err(RpcError::Protocol(format!(
            "expected a JSON-RPC object, got {body}"
        )));
    };
    if let Some(error) = body.remove("error") {
        return Err(RpcError::RemoteCapability(error));
    }
    let data = match body.remove("result") {
        Some(Value::Object(mut result)) => result.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    };
    Ok(match data {
        Value::Null => Value::Object(Map::new()),
        data => data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_result_data() -> anyhow::Result<()> {
        let data = unwrap_envelope(json!({
            "jsonrpc": "2.0",
            "id": "r-1",
            "result": {"status": "ok", "data": {"explanation": "ok"}}
        }))?;
        assert_eq!(data, json!({"explanation": "ok"}));
        Ok(())
    }

    #[test]
    fn missing_or_null_result_reads_as_empty_object() -> anyhow::Result<()> {
        assert_eq!(unwrap_envelope(json!({"id": "r"}))?, json!({}));
        assert_eq!(unwrap_envelope(json!({"result": null}))?, json!({}));
        assert_eq!(unwrap_envelope(json!({"result": {"status": "ok"}}))?, json!({}));
        assert_eq!(unwrap_envelope(json!({"result": {"data": null}}))?, json!({}));
        Ok(())
    }

    #[test]
    fn error_field_wins_over_result() {
        let err = unwrap_envelope(json!({
            "error": {"code": -32601, "message": "Unknown capability"},
            "result": {"data": {"x": 1}}
        }))
        .unwrap_err();
        match err {
            RpcError::RemoteCapability(error) => assert_eq!(error["code"], -32601),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_object_body_is_a_protocol_error() {
        assert!(matches!(
            unwrap_envelope(json!([1, 2])),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn agent_card_tolerates_sparse_documents() -> anyhow::Result<()> {
        let card: AgentCard = serde_json::from_value(json!({"name": "genui"}))?;
        assert_eq!(card.name, "genui");
        assert!(card.capabilities.is_empty());
        assert_eq!(card.protocol, None);
        Ok(())
    }
}
