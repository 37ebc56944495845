use cantun::frame::CanTunnelFrame;
use cantun::wire::{
    self, FRAME_HEADER_SIZE, OP_DATA, PACKET_HEADER_SIZE, PROTOCOL_VERSION, UDP_PAYLOAD_SIZE,
};

const EFF_FLAG: u32 = 0x8000_0000;
const RTR_FLAG: u32 = 0x4000_0000;

fn frame(id: u32, data: &[u8]) -> CanTunnelFrame {
    CanTunnelFrame::new(id, data).unwrap()
}

fn encode_packet(seq_no: u16, frames: &[CanTunnelFrame]) -> Vec<u8> {
    let mut buf = vec![0u8; UDP_PAYLOAD_SIZE];
    let mut cursor = PACKET_HEADER_SIZE;
    for f in frames {
        cursor += wire::encode_frame_into(&mut buf[cursor..], f);
    }
    wire::encode_header_into(&mut buf[..PACKET_HEADER_SIZE], seq_no, frames.len() as u16);
    buf.truncate(cursor);
    buf
}

#[test]
fn header_is_six_bytes_network_order() {
    let datagram = encode_packet(0x0102, &[frame(0x1, &[0xAA])]);
    assert_eq!(
        &datagram[..PACKET_HEADER_SIZE],
        &[PROTOCOL_VERSION, OP_DATA, 0x01, 0x02, 0x00, 0x01]
    );

    let header = wire::decode_header(&datagram).unwrap();
    assert_eq!(header.version, PROTOCOL_VERSION);
    assert_eq!(header.op_code, OP_DATA);
    assert_eq!(header.seq_no, 0x0102);
    assert_eq!(header.count, 1);
}

#[test]
fn single_frame_round_trips() {
    let original = frame(0x123, &[0xDE, 0xAD, 0xBE]);
    let datagram = encode_packet(0, &[original]);

    assert_eq!(datagram.len(), PACKET_HEADER_SIZE + FRAME_HEADER_SIZE + 3);
    let frames = wire::parse_packet(&datagram).unwrap();
    assert_eq!(frames, vec![original]);
}

#[test]
fn flag_bits_survive_the_round_trip() {
    let extended = frame(EFF_FLAG | 0x18DA_F110, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let remote = CanTunnelFrame::from_parts(RTR_FLAG | 0x0234, 4, [0u8; 8]).unwrap();
    let datagram = encode_packet(7, &[extended, remote]);

    let frames = wire::parse_packet(&datagram).unwrap();
    assert_eq!(frames, vec![extended, remote]);
    assert!(frames[0].is_extended());
    assert!(!frames[0].is_remote());
    assert!(frames[1].is_remote());
    assert_eq!(frames[1].dlc(), 4);
}

#[test]
fn batch_round_trips_every_payload_length() {
    let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let frames: Vec<CanTunnelFrame> = (0..=8u32)
        .map(|dlc| frame(0x100 + dlc, &payload[..dlc as usize]))
        .collect();
    let datagram = encode_packet(42, &frames);

    let expected: usize = PACKET_HEADER_SIZE
        + frames
            .iter()
            .map(|f| wire::entry_len(f.dlc()))
            .sum::<usize>();
    assert_eq!(datagram.len(), expected);
    assert_eq!(wire::parse_packet(&datagram).unwrap(), frames);
}

#[test]
fn exact_payload_fit_parses() {
    // 112 eight-byte entries (1456 bytes) plus one five-byte entry (10 bytes)
    // fill the 1466-byte body budget exactly.
    let mut frames: Vec<CanTunnelFrame> = (0..112u32)
        .map(|i| frame(i, &[0xA5; 8]))
        .collect();
    frames.push(frame(0x700, &[0x5A; 5]));
    let datagram = encode_packet(0, &frames);

    assert_eq!(datagram.len(), UDP_PAYLOAD_SIZE);
    assert_eq!(wire::parse_packet(&datagram).unwrap().len(), 113);
}

#[test]
fn wrong_version_is_rejected() {
    let mut datagram = encode_packet(0, &[frame(0x123, &[1])]);
    datagram[0] = PROTOCOL_VERSION.wrapping_sub(1);
    assert_eq!(
        wire::parse_packet(&datagram),
        Err("unsupported protocol version")
    );
}

#[test]
fn wrong_op_code_is_rejected() {
    let mut datagram = encode_packet(0, &[frame(0x123, &[1])]);
    datagram[1] = OP_DATA + 1;
    assert_eq!(wire::parse_packet(&datagram), Err("unexpected op code"));
}

#[test]
fn empty_packet_is_rejected() {
    let mut datagram = vec![0u8; PACKET_HEADER_SIZE];
    wire::encode_header_into(&mut datagram, 3, 0);
    assert_eq!(wire::parse_packet(&datagram), Err("empty packet"));
}

#[test]
fn short_datagram_is_rejected() {
    let datagram = [PROTOCOL_VERSION, OP_DATA, 0, 0];
    assert_eq!(
        wire::parse_packet(&datagram),
        Err("datagram shorter than packet header")
    );
}

#[test]
fn truncated_header_rejects_whole_datagram() {
    // Claims two frames but carries only one: the second entry's header is
    // missing, so nothing from the datagram may be delivered.
    let mut datagram = encode_packet(0, &[frame(0x123, &[1, 2])]);
    datagram[4..6].copy_from_slice(&2u16.to_be_bytes());
    assert_eq!(wire::parse_packet(&datagram), Err("truncated frame header"));
}

#[test]
fn truncated_payload_rejects_whole_datagram() {
    let mut datagram = encode_packet(0, &[frame(0x123, &[1, 2, 3, 4])]);
    datagram.truncate(datagram.len() - 1);
    assert_eq!(
        wire::parse_packet(&datagram),
        Err("truncated frame payload")
    );
}

#[test]
fn oversized_dlc_is_rejected() {
    let mut datagram = encode_packet(0, &[frame(0x123, &[0u8; 8])]);
    datagram[PACKET_HEADER_SIZE + 4] = 9;
    assert_eq!(
        wire::parse_packet(&datagram),
        Err("frame length out of range")
    );
}
