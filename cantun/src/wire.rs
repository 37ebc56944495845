//! Datagram wire format: packet header plus tightly packed frame entries.
//!
//! Multi-byte integers are network byte order.
//!
//! ```text
//! +---------+---------+-----------------+-----------+
//! | version | op_code |     seq_no      |   count   |  entries...
//! |   u8    |   u8    |      u16        |    u16    |
//! +---------+---------+-----------------+-----------+
//!
//! entry:
//! +-----------------+-----+-------------+
//! |   can_id u32    | dlc |  dlc bytes  |
//! +-----------------+-----+-------------+
//! ```

use crate::frame::{CAN_MAX_DLEN, CanTunnelFrame};

/// Protocol version stamped into every datagram.
pub const PROTOCOL_VERSION: u8 = 2;

/// Op code of a data packet. Other codes are reserved.
pub const OP_DATA: u8 = 0;

/// Size of the fixed header preceding the frame entries.
pub const PACKET_HEADER_SIZE: usize = 6;

/// Size of one frame entry header (identifier word plus length byte).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Hard ceiling for an emitted datagram: a 1500-byte Ethernet MTU minus the
/// IPv4 and UDP headers.
pub const UDP_PAYLOAD_SIZE: usize = 1472;

/// Decoded packet header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version byte.
    pub version: u8,
    /// Operation code byte.
    pub op_code: u8,
    /// Per-sender datagram sequence number.
    pub seq_no: u16,
    /// Number of frame entries in the body.
    pub count: u16,
}

/// Serialized size of one frame entry.
pub const fn entry_len(dlc: u8) -> usize {
    FRAME_HEADER_SIZE + dlc as usize
}

/// Write the packet header into `out` (at least [`PACKET_HEADER_SIZE`] bytes).
pub fn encode_header_into(out: &mut [u8], seq_no: u16, count: u16) {
    out[0] = PROTOCOL_VERSION;
    out[1] = OP_DATA;
    out[2..4].copy_from_slice(&seq_no.to_be_bytes());
    out[4..6].copy_from_slice(&count.to_be_bytes());
}

/// Write one frame entry at the start of `out`, returning its length.
///
/// The caller guarantees `out` has room for [`entry_len`] bytes.
pub fn encode_frame_into(out: &mut [u8], frame: &CanTunnelFrame) -> usize {
    let dlc = frame.dlc() as usize;
    out[0..4].copy_from_slice(&frame.can_id().to_be_bytes());
    out[4] = frame.dlc();
    out[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + dlc].copy_from_slice(frame.data());
    FRAME_HEADER_SIZE + dlc
}

/// Split the header fields off a received datagram.
pub fn decode_header(datagram: &[u8]) -> Result<PacketHeader, &'static str> {
    if datagram.len() < PACKET_HEADER_SIZE {
        return Err("datagram shorter than packet header");
    }
    Ok(PacketHeader {
        version: datagram[0],
        op_code: datagram[1],
        seq_no: u16::from_be_bytes(datagram[2..4].try_into().unwrap()),
        count: u16::from_be_bytes(datagram[4..6].try_into().unwrap()),
    })
}

/// Validate a received datagram and decode every frame entry.
///
/// Entries are bounds-checked against the received length; `count` alone is
/// never trusted. Any violation rejects the whole datagram so a truncated
/// body can never inject a partial batch.
pub fn parse_packet(datagram: &[u8]) -> Result<Vec<CanTunnelFrame>, &'static str> {
    let header = decode_header(datagram)?;
    if header.version != PROTOCOL_VERSION {
        return Err("unsupported protocol version");
    }
    if header.op_code != OP_DATA {
        return Err("unexpected op code");
    }
    if header.count == 0 {
        return Err("empty packet");
    }

    let mut frames = Vec::with_capacity(header.count as usize);
    let mut cursor = PACKET_HEADER_SIZE;
    for _ in 0..header.count {
        if cursor + FRAME_HEADER_SIZE > datagram.len() {
            return Err("truncated frame header");
        }
        let can_id = u32::from_be_bytes(datagram[cursor..cursor + 4].try_into().unwrap());
        let dlc = datagram[cursor + 4];
        cursor += FRAME_HEADER_SIZE;
        if dlc as usize > CAN_MAX_DLEN {
            return Err("frame length out of range");
        }
        if cursor + dlc as usize > datagram.len() {
            return Err("truncated frame payload");
        }
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..dlc as usize].copy_from_slice(&datagram[cursor..cursor + dlc as usize]);
        cursor += dlc as usize;
        frames.push(
            CanTunnelFrame::from_parts(can_id, dlc, data).ok_or("frame length out of range")?,
        );
    }
    Ok(frames)
}
