//! Resilient WebSocket client.
//!
//! Provides a persistent connection with automatic reconnection,
//! heartbeat liveness checks, and a hook pipeline that plugins use to
//! observe and transform traffic.

pub mod connection;
pub(crate) mod driver;
pub mod heartbeat;
pub mod hooks;
pub mod plugin;
pub mod reconnect;
pub mod transport;
pub mod types;

pub use connection::{Connection, Options, Subscription};
pub use heartbeat::HeartbeatOptions;
pub use hooks::{
    HookContext, HookEvent, HookGuard, HookRegistry, NotifyStage, TransformStage,
};
pub use plugin::Plugin;
pub use reconnect::ReconnectPolicy;
pub use transport::{Connector, Frame, Transport, TransportError, TransportEvent};
pub use types::{
    ABNORMAL_CLOSE, CloseFrame, ConnLog, ConnState, EventKind, ListenerEvent, ListenerFn, Payload,
    ReconnectInfo,
};
