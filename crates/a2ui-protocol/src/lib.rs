//! # a2ui-protocol: A2UI wire protocol
//!
//! Shared types for the orchestrator, the session engine and the RPC clients.
//! Dependency-light (no tokio, axum, or reqwest) so every crate can use it as
//! a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (SessionId, SurfaceId, RequestId)
//! - [`patch`]: Patch operations and the pointer-addressed patch engine
//! - [`event`]: SessionEvent, the tagged union pushed to subscribers
//! - [`rpc`]: JSON-RPC envelopes for tool calls and agent messages
//! - [`error`]: SessionError

pub mod error;
pub mod event;
pub mod ids;
pub mod patch;
pub mod rpc;

pub use error::{SessionError, SessionResult};
pub use event::SessionEvent;
pub use ids::{RequestId, SessionId, SurfaceId};
pub use patch::{ApplyReport, Patch, PatchError, PatchFailure, PatchOperation, apply_patches};
pub use rpc::{
    AgentMessage, DataPart, JSONRPC_VERSION, JsonRpcResponse, MessageSendParams,
    MessageSendRequest, StreamEndpoint, ToolCallParams, ToolCallRequest,
};
