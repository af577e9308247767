//! Connection configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Plain, Sasl};
use crate::protocol::Table;

/// Default heartbeat interval proposed to the server.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Default TCP connect timeout, also the initial handshake read
/// deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning parameters proposed during the open handshake.
///
/// The negotiated result (the merge of these values with the server's
/// proposal) is available from the connection afterwards.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Mechanisms to offer, in preference order.
    pub sasl: Vec<Arc<dyn Sasl>>,
    /// Namespace of permissions, exchanges, queues and bindings.
    pub vhost: String,
    /// Maximum channel count to propose; 0 means unlimited (the
    /// protocol itself caps channel IDs at 65535).
    pub channel_max: u16,
    /// Maximum frame size in bytes to propose; 0 means unlimited.
    pub frame_max: u32,
    /// Desired heartbeat interval; anything below one second disables
    /// heartbeats.
    pub heartbeat: Duration,
    /// TCP connect timeout and initial handshake read deadline.
    pub connect_timeout: Duration,
    /// Extra entries merged into the client properties table sent in
    /// `connection.start-ok`.
    pub client_properties: Table,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            sasl: vec![Arc::new(Plain::new("guest", "guest"))],
            vhost: "/".to_string(),
            channel_max: 0,
            frame_max: 0,
            heartbeat: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client_properties: Table::new(),
        }
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mechanisms: Vec<&str> = self.sasl.iter().map(|m| m.mechanism()).collect();
        f.debug_struct("ConnectionOptions")
            .field("sasl", &mechanisms)
            .field("vhost", &self.vhost)
            .field("channel_max", &self.channel_max)
            .field("frame_max", &self.frame_max)
            .field("heartbeat", &self.heartbeat)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
