//! Clients for the two kinds of remote collaborators:
//!
//! - [`tool`]: tool server reached over a push stream; responses arrive
//!   out-of-band and are correlated by request id
//! - [`agent`]: capability agents reached with one synchronous JSON-RPC call
//! - [`lease`]: exclusive, single-pass consumption of an SSE stream

pub mod agent;
pub mod error;
pub mod lease;
pub mod tool;

pub use agent::{AgentCard, AgentClient};
pub use error::{RpcError, RpcResult};
pub use lease::StreamLease;
pub use tool::{StreamTransport, ToolClient};
