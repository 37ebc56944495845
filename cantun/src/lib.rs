#![warn(missing_docs)]

//! CAN-over-UDP tunnel engine.
//!
//! Two workers bridge a SocketCAN interface and a single UDP peer:
//! - [`CanWorker`] owns the raw CAN socket. It forwards frames read off the
//!   bus to the UDP side one at a time and batch-writes frames arriving from
//!   the peer back onto the bus.
//! - [`UdpWorker`] owns the datagram socket and the frame pool. It coalesces
//!   outbound frames into identifier-sorted datagrams under an MTU budget and
//!   parses inbound datagrams back into frame batches.
//!
//! Each worker runs one event loop thread multiplexing its socket and a
//! periodic deadline timer whose next expiry can be pulled forward to force
//! an early flush. Shared buffers are double-swapped under short critical
//! sections, so no I/O ever happens with a lock held.
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use cantun::config::TunnelConfig;
//! use cantun::{CanWorker, UdpWorker};
//!
//! let config = TunnelConfig::new(
//!     "0.0.0.0:20000".parse().unwrap(),
//!     "10.0.0.2:20000".parse().unwrap(),
//! );
//! let udp = Arc::new(UdpWorker::new(&config).unwrap());
//! let can = Arc::new(CanWorker::new(&config).unwrap());
//! udp.attach_can_worker(&can);
//! can.attach_udp_worker(&udp);
//! udp.start().unwrap();
//! can.start().unwrap();
//! // ... run until shutdown, then stop in reverse order:
//! can.stop();
//! udp.stop();
//! ```

pub mod config;
pub mod frame;
pub mod pool;
pub mod wire;

mod can_worker;
mod poll;
mod timer;
mod udp_worker;

pub use crate::can_worker::CanWorker;
pub use crate::udp_worker::UdpWorker;
