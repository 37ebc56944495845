//! CAN frame model shared by both tunnel directions.

use std::fmt;

use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use socketcan::CanFrame;

/// Maximum payload length of a classic CAN 2.0 frame.
pub const CAN_MAX_DLEN: usize = 8;

/// A CAN 2.0 frame as carried through the tunnel.
///
/// The identifier is stored as the full SocketCAN ID word: the EFF/RTR/ERR
/// flag bits live in the top three bits and travel with the frame, so
/// bus-level flags reach the peer without interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CanTunnelFrame {
    can_id: u32,
    dlc: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanTunnelFrame {
    /// Build a frame from a full identifier word and payload bytes.
    ///
    /// Returns `None` when the payload exceeds [`CAN_MAX_DLEN`].
    pub fn new(can_id: u32, data: &[u8]) -> Option<Self> {
        if data.len() > CAN_MAX_DLEN {
            return None;
        }
        let mut buf = [0u8; CAN_MAX_DLEN];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            can_id,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// Build a frame from already-split wire fields.
    ///
    /// Returns `None` when `dlc` exceeds [`CAN_MAX_DLEN`].
    pub fn from_parts(can_id: u32, dlc: u8, data: [u8; CAN_MAX_DLEN]) -> Option<Self> {
        if dlc as usize > CAN_MAX_DLEN {
            return None;
        }
        Some(Self { can_id, dlc, data })
    }

    /// The full identifier word, including EFF/RTR/ERR flag bits.
    pub fn can_id(&self) -> u32 {
        self.can_id
    }

    /// The identifier with the flag bits masked off.
    pub fn raw_id(&self) -> u32 {
        if self.is_extended() {
            self.can_id & libc::CAN_EFF_MASK
        } else {
            self.can_id & libc::CAN_SFF_MASK
        }
    }

    /// Payload length in bytes, `0..=8`.
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// The valid payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// True for 29-bit extended-format identifiers.
    pub fn is_extended(&self) -> bool {
        self.can_id & libc::CAN_EFF_FLAG != 0
    }

    /// True for remote transmission requests.
    pub fn is_remote(&self) -> bool {
        self.can_id & libc::CAN_RTR_FLAG != 0
    }

    /// True for bus error frames.
    pub fn is_error(&self) -> bool {
        self.can_id & libc::CAN_ERR_FLAG != 0
    }

    /// Overwrite this slot with another frame's bytes.
    pub fn copy_from(&mut self, other: &CanTunnelFrame) {
        self.can_id = other.can_id;
        self.dlc = other.dlc;
        self.data = other.data;
    }

    /// Capture a frame read from a SocketCAN socket, reassembling the full
    /// identifier word from the frame's identifier and flag accessors.
    pub fn from_can(frame: &CanFrame) -> Self {
        let mut can_id = match frame.id() {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw() | libc::CAN_EFF_FLAG,
        };
        if frame.is_remote_frame() {
            can_id |= libc::CAN_RTR_FLAG;
        }
        if matches!(frame, CanFrame::Error(_)) {
            can_id |= libc::CAN_ERR_FLAG;
        }
        let payload = frame.data();
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            can_id,
            dlc: frame.dlc().min(CAN_MAX_DLEN) as u8,
            data,
        }
    }

    /// Convert back into a frame writable to a SocketCAN socket.
    ///
    /// Returns `None` for error-flagged frames: those cannot be synthesized
    /// through the socket API, only observed.
    pub fn to_can(&self) -> Option<CanFrame> {
        if self.is_error() {
            return None;
        }
        let id = if self.is_extended() {
            Id::Extended(ExtendedId::new(self.can_id & libc::CAN_EFF_MASK)?)
        } else {
            Id::Standard(StandardId::new((self.can_id & libc::CAN_SFF_MASK) as u16)?)
        };
        if self.is_remote() {
            CanFrame::new_remote(id, self.dlc as usize)
        } else {
            CanFrame::new(id, self.data())
        }
    }
}

impl fmt::Display for CanTunnelFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = if self.is_extended() { "EFF" } else { "SFF" };
        write!(f, "{} frame ID[{:X}] len {}", format, self.raw_id(), self.dlc)?;
        for byte in self.data() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}
