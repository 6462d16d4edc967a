//! Peer networking: websocket sessions, the peer registry, the message router
//! and the liveness sweep.

pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use liveness::{LivenessMonitor, SweepReport};
pub use registry::{PeerInfo, PeerRegistry};
pub use router::MessageRouter;
pub use server::{accept_connection, serve};
pub use session::{ConnId, NodeEvent, Transport, WsSession};
