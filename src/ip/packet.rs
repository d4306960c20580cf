//! IPv4 header codec.
//!
//! Shaped after a kernel's `net::ipv4::Ipv4Packet` (borrowed-payload
//! struct, hand-rolled header parse), but owning its payload and options
//! instead of borrowing them. There's no `static mut IP_ID` counter here
//! (an engine-owned `identification` counter replaces it — see
//! `ip::engine`), and no direct `arp::resolve`/`ethernet::send_frame`
//! calls: packet construction is a pure codec, wired to the medium by
//! `ip::engine`.

use crate::addr::Ipv4Addr;
use crate::checksum::{internet_checksum, verify_internet_checksum};
use crate::config::DEFAULT_TTL;
use crate::error::{SimError, SimResult};

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const FLAG_DONT_FRAGMENT: u16 = 0b010;
pub const FLAG_MORE_FRAGMENTS: u16 = 0b001;

pub const FIXED_HEADER_LEN: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpPacket {
    pub dscp: u8,
    pub identification: u16,
    pub flags: u16,
    /// In 8-byte units, per the wire format.
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub options: Vec<u8>,
    pub data: Vec<u8>,
}

impl IpPacket {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, data: Vec<u8>) -> IpPacket {
        IpPacket {
            dscp: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: DEFAULT_TTL,
            protocol,
            src,
            dst,
            options: Vec::new(),
            data,
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.flags & FLAG_MORE_FRAGMENTS != 0 || self.fragment_offset > 0
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags & FLAG_DONT_FRAGMENT != 0
    }

    fn ihl(&self) -> u8 {
        (FIXED_HEADER_LEN + self.options.len()) as u8 / 4
    }

    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN + self.options.len()
    }

    pub fn total_length(&self) -> u16 {
        (self.header_len() + self.data.len()) as u16
    }

    /// Serialize with a freshly computed checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let mut header = vec![0u8; self.header_len()];
        header[0] = (self.ihl() << 4) | 4;
        header[1] = self.dscp;
        header[2..4].copy_from_slice(&self.total_length().to_le_bytes());
        header[4..6].copy_from_slice(&self.identification.to_le_bytes());
        let flags_and_offset = (self.fragment_offset << 3) | self.flags;
        header[6..8].copy_from_slice(&flags_and_offset.to_le_bytes());
        header[8] = self.ttl;
        header[9] = self.protocol;
        header[10..12].copy_from_slice(&0u16.to_le_bytes());
        header[12..16].copy_from_slice(self.src.as_bytes());
        header[16..20].copy_from_slice(self.dst.as_bytes());
        header[20..].copy_from_slice(&self.options);

        let checksum = internet_checksum(&header);
        header[10..12].copy_from_slice(&checksum.to_le_bytes());

        let mut out = header;
        out.extend_from_slice(&self.data);
        out
    }

    /// `Ok(None)` on a checksum mismatch — a bad IP header is a silent
    /// drop at this layer, not a propagated error.
    pub fn deserialize(data: &[u8]) -> SimResult<Option<IpPacket>> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(SimError::InvalidFormat("IPv4 header shorter than 20 bytes".into()));
        }
        let version = data[0] & 0x0F;
        if version != 4 {
            return Err(SimError::InvalidFormat(format!("unsupported IP version {version}")));
        }
        let ihl = (data[0] >> 4) as usize;
        let header_len = ihl * 4;
        if header_len < FIXED_HEADER_LEN || data.len() < header_len {
            return Err(SimError::InvalidFormat("IPv4 header length out of range".into()));
        }

        if !verify_internet_checksum(&data[..header_len]) {
            return Ok(None);
        }

        let dscp = data[1];
        let total_length = u16::from_le_bytes([data[2], data[3]]);
        let identification = u16::from_le_bytes([data[4], data[5]]);
        let flags_and_offset = u16::from_le_bytes([data[6], data[7]]);
        let flags = flags_and_offset & 0b111;
        let fragment_offset = flags_and_offset >> 3;
        let ttl = data[8];
        let protocol = data[9];
        let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let options = data[FIXED_HEADER_LEN..header_len].to_vec();

        let total_length = total_length as usize;
        if total_length < header_len || total_length > data.len() {
            return Err(SimError::InvalidFormat("IPv4 total length inconsistent with buffer".into()));
        }
        let payload = data[header_len..total_length].to_vec();

        Ok(Some(IpPacket {
            dscp,
            identification,
            flags,
            fragment_offset,
            ttl,
            protocol,
            src,
            dst,
            options,
            data: payload,
        }))
    }
}
