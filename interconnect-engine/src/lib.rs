//! The session propagation engine.
//!
//! One [`PropagationEngine`] drives one endpoint of a peer-to-peer session
//! that mirrors a subset of a local [`Table`](interconnect_table::Table)
//! over a bidirectional stream of push frames: registration of names, value
//! diffusion, sequenced-ack flow control, idle-ping keepalive, and the
//! forwarding of remote service actions with their lifecycle updates.
//!
//! The engine is single-threaded and cooperative: the owning
//! [`SessionEndpoint`] (or a test harness) calls
//! [`service`](PropagationEngine::service) repeatedly, and every pass makes
//! bounded progress. Transports deliver inbound frames from arbitrary
//! threads into the transport's own thread-safe queue; the engine drains it
//! at the start of each pass.

mod actions;
mod config;
mod engine;
mod endpoint;
mod pool;
mod tracking;
pub mod transport;

pub use actions::{
    ActionDispatcher, ActionHandle, ActionStartError, RemoteActionFacet, SingleServiceDispatcher,
};
pub use config::EndpointConfig;
pub use engine::{PropagationEngine, SessionError, SessionRole, SessionState, SessionStats};
pub use endpoint::{ClientSession, SessionConnector, SessionEndpoint};
pub use interconnect_proto::PING_SERVICE_NAME;
pub use transport::{PushTransport, TransportError, TransportStatus};
