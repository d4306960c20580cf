//! ICMP packet codec and the four error-reply builders the IPv4 engine
//! generates on its own (TimeExceeded, DestinationNetworkUnreachable,
//! FragmentationRequired, SourceQuench).
//!
//! A kernel's `net::icmp` typically only ever builds echo request/reply,
//! logged for a userland `ping` command — echo is out of scope here
//! (transport above IP is a stub); this module keeps that
//! checksum-then-serialize shape but replaces the payload entirely with
//! the error-reporting packets the simulator's IP engine actually needs.

use crate::checksum::{internet_checksum, verify_internet_checksum};
use crate::error::{SimError, SimResult};
use crate::ip::packet::IpPacket;

pub const TYPE_DESTINATION_UNREACHABLE: u8 = 3;
pub const TYPE_SOURCE_QUENCH: u8 = 4;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_NETWORK_UNREACHABLE: u8 = 0;
pub const CODE_FRAGMENTATION_REQUIRED: u8 = 4;
pub const CODE_TTL_EXCEEDED_IN_TRANSIT: u8 = 0;
pub const CODE_SOURCE_QUENCH: u8 = 0;

const HEADER_LEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub data: Vec<u8>,
}

impl IcmpPacket {
    pub fn new(icmp_type: u8, code: u8, data: Vec<u8>) -> IcmpPacket {
        IcmpPacket { icmp_type, code, data }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![self.icmp_type, self.code, 0, 0];
        buf.extend_from_slice(&self.data);
        let checksum = internet_checksum(&buf);
        buf[2..4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// `Ok(None)` on a checksum mismatch — a silent drop, as with every
    /// other checksummed layer here.
    pub fn deserialize(data: &[u8]) -> SimResult<Option<IcmpPacket>> {
        if data.len() < HEADER_LEN {
            return Err(SimError::InvalidFormat("ICMP packet shorter than header".into()));
        }
        if !verify_internet_checksum(data) {
            return Ok(None);
        }
        Ok(Some(IcmpPacket {
            icmp_type: data[0],
            code: data[1],
            data: data[HEADER_LEN..].to_vec(),
        }))
    }

    pub fn time_exceeded(trigger: &IpPacket) -> IcmpPacket {
        IcmpPacket::new(TYPE_TIME_EXCEEDED, CODE_TTL_EXCEEDED_IN_TRANSIT, triggering_payload(trigger))
    }

    pub fn destination_network_unreachable(trigger: &IpPacket) -> IcmpPacket {
        IcmpPacket::new(TYPE_DESTINATION_UNREACHABLE, CODE_NETWORK_UNREACHABLE, triggering_payload(trigger))
    }

    pub fn fragmentation_required(trigger: &IpPacket) -> IcmpPacket {
        IcmpPacket::new(TYPE_DESTINATION_UNREACHABLE, CODE_FRAGMENTATION_REQUIRED, triggering_payload(trigger))
    }

    pub fn source_quench(trigger: &IpPacket) -> IcmpPacket {
        IcmpPacket::new(TYPE_SOURCE_QUENCH, CODE_SOURCE_QUENCH, triggering_payload(trigger))
    }
}

/// The triggering packet's own header plus the first 8 bytes of its data,
/// carried inside every error ICMP this crate generates.
fn triggering_payload(trigger: &IpPacket) -> Vec<u8> {
    let wire = trigger.serialize();
    let header_len = trigger.header_len();
    let mut buf = wire[..header_len].to_vec();
    let extra_len = trigger.data.len().min(8);
    buf.extend_from_slice(&trigger.data[..extra_len]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Addr;
    use crate::ip::packet::PROTO_ICMP;

    fn trigger() -> IpPacket {
        IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), PROTO_ICMP, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
    }

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let icmp = IcmpPacket::time_exceeded(&trigger());
        let back = IcmpPacket::deserialize(&icmp.serialize()).unwrap().unwrap();
        assert_eq!(back, icmp);
    }

    #[test]
    fn error_builders_carry_header_plus_eight_bytes() {
        let t = trigger();
        let icmp = IcmpPacket::destination_network_unreachable(&t);
        assert_eq!(icmp.data.len(), t.header_len() + 8);
        assert_eq!(icmp.icmp_type, TYPE_DESTINATION_UNREACHABLE);
        assert_eq!(icmp.code, CODE_NETWORK_UNREACHABLE);
    }

    #[test]
    fn fragmentation_required_uses_unreachable_type_with_df_code() {
        let icmp = IcmpPacket::fragmentation_required(&trigger());
        assert_eq!(icmp.icmp_type, TYPE_DESTINATION_UNREACHABLE);
        assert_eq!(icmp.code, CODE_FRAGMENTATION_REQUIRED);
    }

    #[test]
    fn corrupted_packet_deserializes_to_none() {
        let icmp = IcmpPacket::source_quench(&trigger());
        let mut wire = icmp.serialize();
        wire[0] ^= 0xFF;
        assert!(IcmpPacket::deserialize(&wire).unwrap().is_none());
    }
}
