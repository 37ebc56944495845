//! Tunnel configuration shared by both workers.

use std::net::SocketAddr;
use std::time::Duration;

/// Default deadline for flushing the outbound UDP buffer.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default CAN interface name.
pub const DEFAULT_CAN_INTERFACE: &str = "can0";

/// Per-subsystem debug logging toggles. Immutable once the workers start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugOptions {
    /// Log frame pool growth and shutdown buffer statistics.
    pub buffer: bool,
    /// Log flush timer expirations.
    pub timer: bool,
    /// Log received datagrams.
    pub udp: bool,
    /// Log individual CAN frames as they pass through.
    pub can: bool,
}

/// Static configuration for one tunnel endpoint.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Local UDP bind address and port.
    pub local_addr: SocketAddr,
    /// Remote peer address and port. Datagrams from any other source IP are
    /// dropped.
    pub remote_addr: SocketAddr,
    /// CAN interface to attach to.
    pub can_interface: String,
    /// Deadline after which a non-empty outbound UDP buffer is flushed.
    pub flush_timeout: Duration,
    /// Debug logging toggles.
    pub debug: DebugOptions,
}

impl TunnelConfig {
    /// Configuration with the default interface, timeout and quiet logging.
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            remote_addr,
            can_interface: DEFAULT_CAN_INTERFACE.to_string(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            debug: DebugOptions::default(),
        }
    }
}
