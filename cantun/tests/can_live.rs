//! End-to-end tunnel test over a real SocketCAN interface.
//!
//! Requires an up CAN interface (a vcan works) named by the
//! `CANTUN_TEST_CAN_IFACE` environment variable; skips otherwise.
//!
//! ```text
//! sudo ip link add dev vcan0 type vcan && sudo ip link set up vcan0
//! CANTUN_TEST_CAN_IFACE=vcan0 cargo test --test can_live
//! ```

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use cantun::config::TunnelConfig;
use cantun::frame::CanTunnelFrame;
use cantun::wire::{self, PACKET_HEADER_SIZE, UDP_PAYLOAD_SIZE};
use cantun::{CanWorker, UdpWorker};
use embedded_can::{Frame as EmbeddedFrame, StandardId};
use socketcan::{CanFrame, CanSocket, Socket};

const IO_TIMEOUT: Duration = Duration::from_secs(2);

fn iface_name() -> Option<String> {
    std::env::var("CANTUN_TEST_CAN_IFACE").ok()
}

#[test]
fn frames_cross_the_tunnel_in_both_directions() {
    let Some(iface) = iface_name() else {
        eprintln!("skipping: set CANTUN_TEST_CAN_IFACE to an up (v)can interface");
        return;
    };

    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    let mut config = TunnelConfig::new(
        "127.0.0.1:0".parse().unwrap(),
        peer.local_addr().unwrap(),
    );
    config.can_interface = iface.clone();
    config.flush_timeout = Duration::from_millis(20);

    let udp = Arc::new(UdpWorker::new(&config).unwrap());
    let can = match CanWorker::new(&config) {
        Ok(can) => Arc::new(can),
        Err(err) => {
            eprintln!("skipping: failed to open {iface}: {err:?}");
            return;
        }
    };
    udp.attach_can_worker(&can);
    can.attach_udp_worker(&udp);
    udp.start().unwrap();
    can.start().unwrap();

    // A plain bus participant on the same interface.
    let bus = CanSocket::open(&iface).unwrap();

    // Bus -> peer: a frame written to the bus must arrive as one datagram.
    let sent = CanFrame::new(StandardId::new(0x123).unwrap(), &[0xDE, 0xAD, 0xBE]).unwrap();
    bus.write_frame(&sent).unwrap();

    let mut buf = [0u8; UDP_PAYLOAD_SIZE];
    let (len, _) = peer.recv_from(&mut buf).expect("no datagram from tunnel");
    assert_eq!(len, PACKET_HEADER_SIZE + wire::entry_len(3));
    let frames = wire::parse_packet(&buf[..len]).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw_id(), 0x123);
    assert_eq!(frames[0].data(), &[0xDE, 0xAD, 0xBE]);

    // Peer -> bus: a crafted datagram must be injected onto the bus.
    let injected = CanTunnelFrame::new(0x321, &[0x01, 0x02]).unwrap();
    let mut datagram = vec![0u8; UDP_PAYLOAD_SIZE];
    let mut cursor = PACKET_HEADER_SIZE;
    cursor += wire::encode_frame_into(&mut datagram[cursor..], &injected);
    wire::encode_header_into(&mut datagram[..PACKET_HEADER_SIZE], 0, 1);
    datagram.truncate(cursor);
    peer.send_to(&datagram, udp.local_addr().unwrap()).unwrap();

    let seen = bus
        .read_frame_timeout(IO_TIMEOUT)
        .expect("no frame injected on the bus");
    let seen = CanTunnelFrame::from_can(&seen);
    assert_eq!(seen.raw_id(), 0x321);
    assert_eq!(seen.data(), &[0x01, 0x02]);

    can.stop();
    udp.stop();
}
