//! Ethernet frame codec.
//!
//! Shaped after a kernel's `net::ethernet` (`EthFrame`/`parse`/
//! `build_frame`); this version owns its payload instead of borrowing into
//! a NIC-driver buffer, adds an FCS trailer that bare Ethernet framing
//! never had, and carries an explicit payload-length field since nothing
//! here models start/stop framing on the wire.

use log::trace;

use crate::addr::MacAddr;
use crate::checksum::frame_check_sequence;
use crate::config::{MAX_FRAME_PAYLOAD, MIN_FRAME_PAYLOAD};
use crate::error::{SimError, SimResult};

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const HEADER_LEN: usize = 6 + 6 + 2 + 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ether_type: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from an unpadded payload, zero-padding up to the
    /// minimum and rejecting anything over the maximum.
    pub fn new(dst: MacAddr, src: MacAddr, ether_type: u16, payload: &[u8]) -> SimResult<Frame> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(SimError::ArgumentValidation(format!(
                "frame payload {} bytes exceeds max {}",
                payload.len(),
                MAX_FRAME_PAYLOAD
            )));
        }
        let mut padded = payload.to_vec();
        if padded.len() < MIN_FRAME_PAYLOAD {
            padded.resize(MIN_FRAME_PAYLOAD, 0);
        }
        Ok(Frame { dst, src, ether_type, payload: padded })
    }

    fn header_and_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(dst_src_type_length_bytes(self).as_slice());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Bytes the FCS is computed over: dst, src, etherType, payload. The
    /// explicit length field is wire-format bookkeeping only and is not
    /// part of the checksummed input.
    fn fcs_input(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + 6 + 2 + self.payload.len());
        buf.extend_from_slice(self.dst.as_bytes());
        buf.extend_from_slice(self.src.as_bytes());
        buf.extend_from_slice(&self.ether_type.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Serialize to the wire format: dst, src, etherType, an explicit
    /// payload-length field, the payload, then the FCS trailer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header_and_payload();
        let fcs = frame_check_sequence(&self.fcs_input());
        buf.extend_from_slice(&fcs.to_le_bytes());
        buf
    }

    /// Deserialize and verify the FCS. `Ok(None)` on an FCS mismatch (a
    /// corrupted frame is a silent drop at the MAC layer, not an error the
    /// caller must propagate).
    pub fn deserialize(data: &[u8]) -> SimResult<Option<Frame>> {
        if data.len() < HEADER_LEN + 4 {
            return Err(SimError::InvalidFormat("frame shorter than header + FCS".into()));
        }
        let (body, fcs_bytes) = data.split_at(data.len() - 4);
        let stated_fcs = u32::from_le_bytes([fcs_bytes[0], fcs_bytes[1], fcs_bytes[2], fcs_bytes[3]]);

        let dst = MacAddr::new([body[0], body[1], body[2], body[3], body[4], body[5]]);
        let src = MacAddr::new([body[6], body[7], body[8], body[9], body[10], body[11]]);
        let ether_type = u16::from_le_bytes([body[12], body[13]]);
        let payload_length = i32::from_le_bytes([body[14], body[15], body[16], body[17]]);
        if payload_length < 0 {
            return Err(SimError::InvalidFormat("negative payload length".into()));
        }
        let payload_length = payload_length as usize;
        let payload = &body[HEADER_LEN..];
        if payload.len() != payload_length {
            return Err(SimError::InvalidFormat("payload length field does not match body".into()));
        }

        let frame = Frame { dst, src, ether_type, payload: payload.to_vec() };
        if frame_check_sequence(&frame.fcs_input()) != stated_fcs {
            trace!("frame dropped: FCS mismatch");
            return Ok(None);
        }

        Ok(Some(frame))
    }

    /// On-wire length in bytes (header + payload + FCS), used to compute a
    /// frame's transmission time.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + 4
    }
}

fn dst_src_type_length_bytes(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.extend_from_slice(frame.dst.as_bytes());
    buf.extend_from_slice(frame.src.as_bytes());
    buf.extend_from_slice(&frame.ether_type.to_le_bytes());
    buf.extend_from_slice(&(frame.payload.len() as i32).to_le_bytes());
    buf
}
