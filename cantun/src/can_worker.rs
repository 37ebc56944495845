//! CAN side of the tunnel.
//!
//! Owns the raw SocketCAN socket. Frames read off the bus are handed to the
//! UDP worker one at a time; frames arriving from the peer are batched in a
//! small outbound buffer and drained to the bus when the worker's timer is
//! pulled forward.

use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use socketcan::{CanSocket, Socket};

use crate::config::{DebugOptions, TunnelConfig};
use crate::frame::CanTunnelFrame;
use crate::poll;
use crate::timer::FlushTimer;
use crate::udp_worker::UdpWorker;

/// Fallback flush cadence. [`CanWorker::inject_batch`] pulls the timer
/// forward, so this period only matters when nothing arrives from the peer.
const CAN_FLUSH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Worker owning the raw CAN socket.
pub struct CanWorker {
    socket: CanSocket,
    timer: FlushTimer,
    interface: String,
    debug: DebugOptions,
    buffer: Mutex<Vec<CanTunnelFrame>>,
    // Monotonic run flag: set once by start, cleared once by stop.
    started: AtomicBool,
    tx_count: AtomicU64,
    rx_count: AtomicU64,
    udp_worker: Mutex<Weak<UdpWorker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CanWorker {
    /// Open the CAN interface and create the flush timer.
    pub fn new(config: &TunnelConfig) -> Result<Self, socketcan::Error> {
        let socket = CanSocket::open(&config.can_interface)?;
        socket.set_nonblocking(true)?;
        let timer = FlushTimer::new(CAN_FLUSH_TIMEOUT)?;
        Ok(Self {
            socket,
            timer,
            interface: config.can_interface.clone(),
            debug: config.debug,
            buffer: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            tx_count: AtomicU64::new(0),
            rx_count: AtomicU64::new(0),
            udp_worker: Mutex::new(Weak::new()),
            thread: Mutex::new(None),
        })
    }

    /// Point this worker at the UDP worker that receives captured frames.
    ///
    /// Non-owning; must be wired before [`CanWorker::start`].
    pub fn attach_udp_worker(&self, udp: &Arc<UdpWorker>) {
        *self.udp_worker.lock().unwrap() = Arc::downgrade(udp);
    }

    /// Frames written to the bus so far. Advisory.
    pub fn tx_count(&self) -> u64 {
        self.tx_count.load(Ordering::Relaxed)
    }

    /// Frames read off the bus so far. Advisory.
    pub fn rx_count(&self) -> u64 {
        self.rx_count.load(Ordering::Relaxed)
    }

    /// Arm the flush timer and spawn the event loop.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        self.timer.arm()?;
        self.started.store(true, Ordering::SeqCst);
        let worker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cantun-can".into())
            .spawn(move || worker.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the event loop and join its thread.
    pub fn stop(&self) {
        info!(
            "shutting down, CAN transmission summary: TX {} RX {}",
            self.tx_count(),
            self.rx_count()
        );
        self.started.store(false, Ordering::SeqCst);
        unsafe { libc::shutdown(self.socket.as_raw_fd(), libc::SHUT_RDWR) };
        if let Err(err) = self.timer.fire_soon() {
            error!("failed to pull CAN flush timer forward: {err}");
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Append a parsed batch from the peer and pull the flush timer forward.
    ///
    /// Safe to call from the UDP worker's loop; the buffer mutex is held only
    /// for the append.
    pub fn inject_batch(&self, frames: Vec<CanTunnelFrame>) {
        {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.extend_from_slice(&frames);
        }
        if let Err(err) = self.timer.fire_soon() {
            error!("failed to pull CAN flush timer forward: {err}");
        }
    }

    fn run(&self) {
        let mut trans: Vec<CanTunnelFrame> = Vec::new();
        info!("CAN worker up on {}", self.interface);

        while self.started.load(Ordering::SeqCst) {
            let mut fds = [
                poll::pollfd(self.socket.as_raw_fd()),
                poll::pollfd(self.timer.as_raw_fd()),
            ];
            if let Err(err) = poll::wait_readable(&mut fds) {
                error!("CAN worker poll failed: {err}");
                break;
            }

            if poll::is_readable(&fds[1]) {
                match self.timer.drain() {
                    Ok(0) => {}
                    Ok(expirations) => {
                        if self.debug.timer {
                            debug!("CAN flush timer fired, {expirations} expirations");
                        }
                        self.transmit_buffer(&mut trans);
                    }
                    Err(err) => {
                        error!("CAN flush timer read failed: {err}");
                        break;
                    }
                }
            }

            if poll::is_readable(&fds[0]) {
                match self.socket.read_frame() {
                    Ok(can_frame) => {
                        let frame = CanTunnelFrame::from_can(&can_frame);
                        if self.debug.can {
                            debug!("{frame}");
                        }
                        self.rx_count.fetch_add(1, Ordering::Relaxed);
                        let udp = self.udp_worker.lock().unwrap().upgrade();
                        match udp {
                            Some(udp) => udp.enqueue_for_udp(&frame),
                            None => warn!("no UDP worker attached, dropping frame"),
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => {
                        if self.started.load(Ordering::SeqCst) {
                            error!("CAN read on {} failed: {err}", self.interface);
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Drain the outbound buffer to the bus, one kernel write per frame.
    ///
    /// Each frame gets a single write attempt; failures, including a full TX
    /// queue on the non-blocking socket, are logged and draining continues so
    /// a congested bus cannot stall the event loop.
    fn transmit_buffer(&self, trans: &mut Vec<CanTunnelFrame>) {
        {
            let mut active = self.buffer.lock().unwrap();
            mem::swap(&mut *active, trans);
        }
        for frame in trans.iter() {
            let Some(can_frame) = frame.to_can() else {
                warn!("skipping frame with unwritable identifier {:X}", frame.can_id());
                continue;
            };
            match self.socket.write_frame(&can_frame) {
                Ok(()) => {
                    self.tx_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => error!("CAN write on {} failed: {err}", self.interface),
            }
        }
        trans.clear();
    }
}
