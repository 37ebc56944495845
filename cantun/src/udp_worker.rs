//! UDP side of the tunnel.
//!
//! Owns the datagram socket and the frame pool. Outbound CAN frames are
//! coalesced in a double-buffered queue and flushed into identifier-sorted
//! datagrams either on a deadline or as soon as the queue would fill a
//! datagram; inbound datagrams are validated, decoded, and handed to the CAN
//! worker as a batch.

use std::io;
use std::mem;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::can_worker::CanWorker;
use crate::config::{DebugOptions, TunnelConfig};
use crate::frame::CanTunnelFrame;
use crate::poll;
use crate::pool::{FramePool, INITIAL_POOL_SIZE};
use crate::timer::FlushTimer;
use crate::wire::{self, PACKET_HEADER_SIZE, UDP_PAYLOAD_SIZE};

/// Outbound frame queue plus its serialized byte cost.
///
/// `byte_cost` always equals the sum of [`wire::entry_len`] over `frames`, so
/// the capacity check on the enqueue path is a single comparison.
#[derive(Default)]
struct FrameBuffer {
    frames: Vec<CanTunnelFrame>,
    byte_cost: usize,
}

/// Worker owning the datagram socket and the outbound frame pool.
pub struct UdpWorker {
    socket: UdpSocket,
    timer: FlushTimer,
    remote: SocketAddr,
    debug: DebugOptions,
    buffer: Mutex<FrameBuffer>,
    pool: Mutex<FramePool>,
    // Monotonic run flag: set once by start, cleared once by stop.
    started: AtomicBool,
    tx_count: AtomicU64,
    rx_count: AtomicU64,
    can_worker: Mutex<Weak<CanWorker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpWorker {
    /// Bind the datagram socket and create the flush timer.
    pub fn new(config: &TunnelConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.local_addr)?;
        socket.set_nonblocking(true)?;
        let timer = FlushTimer::new(config.flush_timeout)?;
        Ok(Self {
            socket,
            timer,
            remote: config.remote_addr,
            debug: config.debug,
            buffer: Mutex::new(FrameBuffer::default()),
            pool: Mutex::new(FramePool::new()),
            started: AtomicBool::new(false),
            tx_count: AtomicU64::new(0),
            rx_count: AtomicU64::new(0),
            can_worker: Mutex::new(Weak::new()),
            thread: Mutex::new(None),
        })
    }

    /// Local address the datagram socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Point this worker at the CAN worker that receives parsed batches.
    ///
    /// Non-owning; must be wired before [`UdpWorker::start`].
    pub fn attach_can_worker(&self, can: &Arc<CanWorker>) {
        *self.can_worker.lock().unwrap() = Arc::downgrade(can);
    }

    /// Datagrams transmitted so far. Advisory.
    pub fn tx_count(&self) -> u64 {
        self.tx_count.load(Ordering::Relaxed)
    }

    /// Datagrams received and fully parsed so far. Advisory.
    pub fn rx_count(&self) -> u64 {
        self.rx_count.load(Ordering::Relaxed)
    }

    /// Seed the frame pool, arm the flush timer and spawn the event loop.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        self.pool.lock().unwrap().grow(INITIAL_POOL_SIZE);
        self.timer.arm()?;
        self.started.store(true, Ordering::SeqCst);
        let worker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cantun-udp".into())
            .spawn(move || worker.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the event loop and join its thread.
    ///
    /// Shuts the socket down and pulls the timer forward so the readiness
    /// wait unblocks promptly. A flush already in progress runs to completion.
    pub fn stop(&self) {
        info!(
            "shutting down, UDP transmission summary: TX {} RX {}",
            self.tx_count(),
            self.rx_count()
        );
        self.started.store(false, Ordering::SeqCst);
        unsafe { libc::shutdown(self.socket.as_raw_fd(), libc::SHUT_RDWR) };
        if let Err(err) = self.timer.fire_soon() {
            error!("failed to pull flush timer forward: {err}");
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if self.debug.buffer {
            let buffer = self.buffer.lock().unwrap();
            let pool = self.pool.lock().unwrap();
            debug!(
                "{} frames left buffered, pool {}/{} slots free",
                buffer.frames.len(),
                pool.available(),
                pool.total_allocated()
            );
        }
    }

    /// Queue one CAN frame captured on the local bus for transmission.
    ///
    /// Safe to call from the CAN worker's loop: takes a pool slot (growing
    /// the pool when dry), splices it onto the outbound buffer under the
    /// buffer mutex, and pulls the flush timer forward once the buffer would
    /// fill a datagram. The pool lock is taken before and released
    /// independently of the buffer lock; no path locks the other way around.
    pub fn enqueue_for_udp(&self, frame: &CanTunnelFrame) {
        let mut slot = {
            let mut pool = self.pool.lock().unwrap();
            let before = pool.total_allocated();
            let slot = pool.take();
            if self.debug.buffer && pool.total_allocated() != before {
                debug!("frame pool grown to {} slots", pool.total_allocated());
            }
            slot
        };
        slot.copy_from(frame);

        let mut buffer = self.buffer.lock().unwrap();
        buffer.frames.push(slot);
        buffer.byte_cost += wire::entry_len(frame.dlc());
        if buffer.byte_cost + PACKET_HEADER_SIZE >= UDP_PAYLOAD_SIZE {
            if let Err(err) = self.timer.fire_soon() {
                error!("failed to pull flush timer forward: {err}");
            }
        }
    }

    fn run(&self) {
        let mut trans = FrameBuffer::default();
        let mut scratch = [0u8; UDP_PAYLOAD_SIZE];
        let mut recv_buf = [0u8; UDP_PAYLOAD_SIZE];
        let mut seq_no: u16 = 0;

        match self.local_addr() {
            Ok(addr) => info!("UDP worker up on {addr}, peer {}", self.remote),
            Err(_) => info!("UDP worker up, peer {}", self.remote),
        }

        while self.started.load(Ordering::SeqCst) {
            let mut fds = [
                poll::pollfd(self.socket.as_raw_fd()),
                poll::pollfd(self.timer.as_raw_fd()),
            ];
            if let Err(err) = poll::wait_readable(&mut fds) {
                error!("UDP worker poll failed: {err}");
                break;
            }

            if poll::is_readable(&fds[1]) {
                match self.timer.drain() {
                    Ok(0) => {}
                    Ok(expirations) => {
                        if self.debug.timer {
                            debug!("UDP flush timer fired, {expirations} expirations");
                        }
                        let pending = self.buffer.lock().unwrap().byte_cost > 0;
                        if pending {
                            self.transmit_buffer(&mut trans, &mut scratch, &mut seq_no);
                        }
                    }
                    Err(err) => {
                        error!("UDP flush timer read failed: {err}");
                        break;
                    }
                }
            }

            if poll::is_readable(&fds[0]) {
                match self.socket.recv_from(&mut recv_buf) {
                    Ok((len, src)) => self.handle_datagram(&recv_buf[..len], src),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => {
                        if self.started.load(Ordering::SeqCst) {
                            error!("UDP receive failed: {err}");
                        }
                        break;
                    }
                }
            }
        }
    }

    /// Serialize and transmit everything queued so far.
    ///
    /// Swaps the shared buffer against the loop-owned transmit buffer under
    /// the mutex, then sorts and serializes entirely outside it. The walk
    /// emits a datagram whenever the next entry would overflow the payload
    /// budget; a residual datagram is emitted only when it carries at least
    /// one frame.
    fn transmit_buffer(
        &self,
        trans: &mut FrameBuffer,
        scratch: &mut [u8; UDP_PAYLOAD_SIZE],
        seq_no: &mut u16,
    ) {
        {
            let mut active = self.buffer.lock().unwrap();
            mem::swap(&mut *active, trans);
        }

        // Receivers rely on identifier-sorted datagrams so higher-priority
        // IDs reach the far bus first. Stable sort keeps arrival order
        // between frames with equal identifiers.
        trans.frames.sort_by_key(CanTunnelFrame::can_id);

        let mut cursor = PACKET_HEADER_SIZE;
        let mut count: u16 = 0;
        for frame in &trans.frames {
            if cursor + wire::entry_len(frame.dlc()) > UDP_PAYLOAD_SIZE {
                self.send_packet(scratch, cursor, count, seq_no);
                cursor = PACKET_HEADER_SIZE;
                count = 0;
            }
            cursor += wire::encode_frame_into(&mut scratch[cursor..], frame);
            count += 1;
        }
        if count > 0 {
            self.send_packet(scratch, cursor, count, seq_no);
        }

        self.pool.lock().unwrap().absorb(&mut trans.frames);
        trans.byte_cost = 0;
    }

    fn send_packet(
        &self,
        scratch: &mut [u8; UDP_PAYLOAD_SIZE],
        len: usize,
        count: u16,
        seq_no: &mut u16,
    ) {
        wire::encode_header_into(&mut scratch[..PACKET_HEADER_SIZE], *seq_no, count);
        *seq_no = seq_no.wrapping_add(1);
        match self.socket.send_to(&scratch[..len], self.remote) {
            Ok(sent) if sent == len => {
                self.tx_count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(sent) => error!("short UDP send, {sent} of {len} bytes"),
            Err(err) => error!("UDP send to {} failed: {err}", self.remote),
        }
    }

    fn handle_datagram(&self, datagram: &[u8], src: SocketAddr) {
        if src.ip() != self.remote.ip() {
            warn!(
                "received a datagram from {}, which is not the configured remote",
                src.ip()
            );
            return;
        }
        if self.debug.udp {
            debug!("received {} bytes from {src}", datagram.len());
        }
        let frames = match wire::parse_packet(datagram) {
            Ok(frames) => frames,
            Err(reason) => {
                warn!("dropping malformed datagram from {src}: {reason}");
                return;
            }
        };
        if self.debug.can {
            for frame in &frames {
                debug!("{frame}");
            }
        }
        self.rx_count.fetch_add(1, Ordering::Relaxed);

        let can = self.can_worker.lock().unwrap().upgrade();
        match can {
            Some(can) => can.inject_batch(frames),
            None => warn!("no CAN worker attached, dropping {} frames", frames.len()),
        }
    }
}
