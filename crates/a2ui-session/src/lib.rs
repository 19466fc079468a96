//! Session engine: per-session surface documents kept in sync with a single
//! subscriber through ordered patch events.
//!
//! - [`store`]: one JSON document per surface, mutated through the patch engine
//! - [`registry`]: session lifecycle and the apply-and-notify path
//! - [`publisher`]: drains a session's outbound channel onto a subscriber

pub mod publisher;
pub mod registry;
pub mod store;

pub use publisher::{ChannelSink, DEFAULT_TICK, EventSink, PublishEnd, Publisher, SinkClosed};
pub use registry::{OutboundLease, Session, SessionRegistry};
pub use store::SurfaceStore;
