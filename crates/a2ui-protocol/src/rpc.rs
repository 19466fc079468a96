//! JSON-RPC envelopes exchanged with the tool server and capability agents.

use crate::ids::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// `tools/call` request posted to the tool server's ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    pub params: ToolCallParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub const METHOD: &'static str = "tools/call";

    pub fn new(id: RequestId, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: Self::METHOD.to_owned(),
            params: ToolCallParams {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// `message/send` request for a capability agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    pub params: MessageSendParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub capability: String,
    pub message: AgentMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub kind: String,
    pub message_id: String,
    pub role: String,
    pub parts: Vec<DataPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPart {
    pub kind: String,
    pub data: Value,
}

impl MessageSendRequest {
    pub const METHOD: &'static str = "message/send";

    pub fn new(id: RequestId, capability: impl Into<String>, payload: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: Self::METHOD.to_owned(),
            params: MessageSendParams {
                capability: capability.into(),
                message: AgentMessage {
                    kind: "message".to_owned(),
                    message_id: RequestId::generate().to_string(),
                    role: "user".to_owned(),
                    parts: vec![DataPart {
                        kind: "data".to_owned(),
                        data: payload,
                    }],
                },
            },
        }
    }
}

/// Generic JSON-RPC response. Servers may answer with a `null` id (parse
/// errors), so the id stays untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    pub fn answers(&self, id: &RequestId) -> bool {
        self.id.as_str() == Some(id.as_str())
    }

    /// Split into the result payload or the server-supplied error payload.
    /// A `null` error counts as absent.
    pub fn into_outcome(self) -> Result<Value, Value> {
        match self.error {
            Some(error) if !error.is_null() => Err(error),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Payload of the `endpoint` event that opens a handshake-first stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    pub sse_id: String,
    pub post_url: String,
}

impl StreamEndpoint {
    pub const EVENT: &'static str = "endpoint";
    pub const HEADER: &'static str = "X-SSE-ID";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_wire_shape() {
        let request = ToolCallRequest::new(
            RequestId::from_string("r-1"),
            "bd_search",
            json!({"k": 5, "query": "huurtoeslag"}),
        );
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"jsonrpc":"2.0","id":"r-1","method":"tools/call","params":{"name":"bd_search","arguments":{"k":5,"query":"huurtoeslag"}}}"#
        );
    }

    #[test]
    fn message_send_wire_shape() {
        let request = MessageSendRequest::new(
            RequestId::from_string("r-2"),
            "explain_toeslagen",
            json!({"items": []}),
        );
        let value = serde_json::to_value(&request).unwrap();
        let message_id = value["params"]["message"]["messageId"].as_str().unwrap();
        assert!(!message_id.is_empty());
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": "r-2",
                "method": "message/send",
                "params": {
                    "capability": "explain_toeslagen",
                    "message": {
                        "kind": "message",
                        "messageId": message_id,
                        "role": "user",
                        "parts": [{"kind": "data", "data": {"items": []}}]
                    }
                }
            })
        );
    }

    #[test]
    fn response_outcome_prefers_error() {
        let id = RequestId::from_string("r-3");
        let ok: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "r-3", "result": {"n": 1}}))
                .unwrap();
        assert!(ok.answers(&id));
        assert_eq!(ok.into_outcome(), Ok(json!({"n": 1})));

        let failed: JsonRpcResponse = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": "r-3", "error": {"code": -32000, "message": "boom"}}),
        )
        .unwrap();
        assert_eq!(
            failed.into_outcome(),
            Err(json!({"code": -32000, "message": "boom"}))
        );

        let null_error: JsonRpcResponse =
            serde_json::from_value(json!({"id": "r-3", "result": 7, "error": null})).unwrap();
        assert_eq!(null_error.into_outcome(), Ok(json!(7)));
    }

    #[test]
    fn response_with_other_id_does_not_answer() {
        let response: JsonRpcResponse =
            serde_json::from_value(json!({"id": null, "error": {"code": -32700}})).unwrap();
        assert!(!response.answers(&RequestId::from_string("r-4")));
    }
}
