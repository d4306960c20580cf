//! Per-interface ARP cache and wire packet.
//!
//! A kernel typically keeps one process-wide ARP table behind a
//! `Spinlock`, keyed by a monotonic tick counter from the PIT —
//! reasonable for a kernel with exactly one NIC and interrupt-driven
//! reentrancy, wrong for a simulator with many interfaces and an
//! `Engine`-owned clock. This version is a plain per-`Interface` value
//! keyed by `Engine::now`, with no lock: the event loop guarantees only
//! the current event can touch it.

use std::collections::{HashMap, HashSet};

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::ARP_ENTRY_TTL_NS;
use crate::engine::SimTime;
use crate::error::{SimError, SimResult};

const WIRE_LEN: usize = 1 + 6 + 4 + 6 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub is_request: bool,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> ArpPacket {
        ArpPacket {
            is_request: true,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::BROADCAST,
            target_ip,
        }
    }

    pub fn reply(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_mac: MacAddr, target_ip: Ipv4Addr) -> ArpPacket {
        ArpPacket { is_request: false, sender_mac, sender_ip, target_mac, target_ip }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_LEN);
        buf.push(self.is_request as u8);
        buf.extend_from_slice(self.sender_mac.as_bytes());
        buf.extend_from_slice(self.sender_ip.as_bytes());
        buf.extend_from_slice(self.target_mac.as_bytes());
        buf.extend_from_slice(self.target_ip.as_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> SimResult<ArpPacket> {
        if data.len() != WIRE_LEN {
            return Err(SimError::InvalidFormat(format!(
                "ARP packet must be {WIRE_LEN} bytes, got {}",
                data.len()
            )));
        }
        let is_request = data[0] != 0;
        let sender_mac = MacAddr::new([data[1], data[2], data[3], data[4], data[5], data[6]]);
        let sender_ip = Ipv4Addr::new(data[7], data[8], data[9], data[10]);
        let target_mac = MacAddr::new([data[11], data[12], data[13], data[14], data[15], data[16]]);
        let target_ip = Ipv4Addr::new(data[17], data[18], data[19], data[20]);
        Ok(ArpPacket { is_request, sender_mac, sender_ip, target_mac, target_ip })
    }
}

struct ArpEntry {
    mac: MacAddr,
    expiry_time: SimTime,
}

/// One interface's resolved-address cache plus in-flight-resolution
/// dedup set. Deliberately has no handle back to a NIC: the caller decides
/// how to transmit whatever `ArpPacket` this returns, keeping the cache a
/// pure data structure.
#[derive(Default)]
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    in_progress: HashSet<Ipv4Addr>,
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache::default()
    }

    /// `None` if there is no entry, or the entry has expired.
    pub fn lookup(&self, now: SimTime, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).filter(|e| now <= e.expiry_time).map(|e| e.mac)
    }

    /// Begin resolving `ip`, returning the request to broadcast unless a
    /// resolution is already in flight (de-duplication).
    pub fn resolve(&mut self, sender_mac: MacAddr, sender_ip: Ipv4Addr, ip: Ipv4Addr) -> Option<ArpPacket> {
        if !self.in_progress.insert(ip) {
            return None;
        }
        Some(ArpPacket::request(sender_mac, sender_ip, ip))
    }

    /// Handle an incoming ARP packet. Always learns the sender; returns a
    /// reply to unicast back when the packet is a request for `own_ip`.
    pub fn on_input(&mut self, own_mac: MacAddr, own_ip: Ipv4Addr, now: SimTime, packet: &ArpPacket) -> Option<ArpPacket> {
        if packet.sender_mac == own_mac {
            return None;
        }

        self.entries.insert(
            packet.sender_ip,
            ArpEntry { mac: packet.sender_mac, expiry_time: now + ARP_ENTRY_TTL_NS },
        );
        self.in_progress.remove(&packet.sender_ip);

        if packet.is_request && packet.target_ip == own_ip {
            Some(ArpPacket::reply(own_mac, own_ip, packet.sender_mac, packet.sender_ip))
        } else {
            None
        }
    }
}
