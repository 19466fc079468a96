//! Session events pushed to the single subscriber of a session.
//!
//! Events carry no acknowledgement and are never replayed: a reconnecting
//! browser gets a fresh session. Each event is sent as one SSE frame,
//! `data: <json>\n\n`, with the `kind` tag first.

use crate::ids::{SessionId, SurfaceId};
use crate::patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SessionEvent {
    #[serde(rename = "session/created", rename_all = "camelCase")]
    SessionCreated { session_id: SessionId },
    #[serde(rename = "surface/open", rename_all = "camelCase")]
    SurfaceOpen {
        surface_id: SurfaceId,
        title: String,
        data_model: Value,
    },
    #[serde(rename = "dataModelUpdate", rename_all = "camelCase")]
    DataModelUpdate {
        surface_id: SurfaceId,
        patches: Vec<Patch>,
    },
}

impl SessionEvent {
    pub fn surface_open(surface_id: SurfaceId, title: impl Into<String>, data_model: Value) -> Self {
        Self::SurfaceOpen {
            surface_id,
            title: title.into(),
            data_model,
        }
    }

    pub fn data_model_update(surface_id: SurfaceId, patches: Vec<Patch>) -> Self {
        Self::DataModelUpdate {
            surface_id,
            patches,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session/created",
            Self::SurfaceOpen { .. } => "surface/open",
            Self::DataModelUpdate { .. } => "dataModelUpdate",
        }
    }

    pub fn surface_id(&self) -> Option<&SurfaceId> {
        match self {
            Self::SessionCreated { .. } => None,
            Self::SurfaceOpen { surface_id, .. } | Self::DataModelUpdate { surface_id, .. } => {
                Some(surface_id)
            }
        }
    }

    /// JSON payload of the SSE `data:` line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_created_wire_shape() {
        let event = SessionEvent::SessionCreated {
            session_id: SessionId::from_string("s-1"),
        };
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"kind":"session/created","sessionId":"s-1"}"#
        );
    }

    #[test]
    fn surface_open_wire_shape() {
        let event = SessionEvent::surface_open(
            SurfaceId::from("home"),
            "Assistants",
            json!({"status": {"loading": false}}),
        );
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"kind":"surface/open","surfaceId":"home","title":"Assistants","dataModel":{"status":{"loading":false}}}"#
        );
    }

    #[test]
    fn data_model_update_wire_shape() {
        let event = SessionEvent::data_model_update(
            SurfaceId::from("home"),
            vec![Patch::replace("/status/loading", true)],
        );
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"kind":"dataModelUpdate","surfaceId":"home","patches":[{"op":"replace","path":"/status/loading","value":true}]}"#
        );
        assert_eq!(event.kind(), "dataModelUpdate");
    }

    #[test]
    fn events_deserialize_from_wire() {
        let event: SessionEvent = serde_json::from_value(json!({
            "kind": "dataModelUpdate",
            "surfaceId": "bezwaar",
            "patches": [{"op": "add", "path": "/results", "value": []}]
        }))
        .unwrap();
        assert_eq!(event.surface_id().map(SurfaceId::as_str), Some("bezwaar"));
    }
}
