//! Per-host IPv4 state machine: output queueing gated on ARP resolution,
//! MTU-aware fragmentation, TTL handling with ICMP generation, longest-match
//! routing, and reassembly via a union-find over the datagram's byte range.
//!
//! A kernel's own IPv4 stack typically speaks IPv4 but never routes,
//! never fragments, and keeps no per-interface ARP-wait queue; this is
//! built fresh, reusing the codecs in `ip::packet`/`ip::icmp`/`arp` and
//! the union-find/capped queue already adapted in `util.rs`. Functions
//! take an explicit `&Rc<RefCell<Host>>` rather than owning one,
//! mirroring `phy::Nic`'s associated-function style and matching the
//! non-owning relationship a host's IPv4 state has to its own interfaces
//! and routing table.

use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;

use log::{info, warn};

use crate::addr::{Ipv4Addr, MacAddr};
use crate::arp::ArpPacket;
use crate::config::{DEFAULT_INPUT_QUEUE_CAPACITY, DEFAULT_OUTPUT_QUEUE_CAPACITY, REASSEMBLY_SPACE};
use crate::engine::{Engine, SimTime};
use crate::error::SimResult;
use crate::frame::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::host::Host;
use crate::ip::icmp::IcmpPacket;
use crate::ip::packet::{IpPacket, FIXED_HEADER_LEN, FLAG_MORE_FRAGMENTS, PROTO_ICMP};
use crate::phy::Nic;
use crate::util::{reassembly_key, CappedQueue, UnionFind};

struct FragmentBucket {
    union_find: UnionFind,
    fragments: Vec<IpPacket>,
    original_length: Option<usize>,
}

impl FragmentBucket {
    fn new() -> Self {
        FragmentBucket { union_find: UnionFind::new(REASSEMBLY_SPACE), fragments: Vec::new(), original_length: None }
    }

    fn add(&mut self, packet: IpPacket) {
        let from = packet.fragment_offset as usize * 8;
        let to = from + packet.data.len().saturating_sub(1);
        self.union_find.union(from, to);
        if to + 1 < REASSEMBLY_SPACE {
            self.union_find.union(to, to + 1);
        }
        if packet.flags & FLAG_MORE_FRAGMENTS == 0 {
            self.original_length = Some(from + packet.data.len());
        }
        self.fragments.push(packet);
    }

    fn is_complete(&mut self) -> bool {
        match self.original_length {
            Some(len) if len > 0 => self.union_find.connected(0, len),
            _ => false,
        }
    }

    fn assemble(mut self) -> IpPacket {
        self.fragments.sort_by_key(|f| f.fragment_offset);
        let mut data = Vec::new();
        for fragment in &self.fragments {
            data.extend_from_slice(&fragment.data);
        }
        let mut assembled = self.fragments.remove(0);
        assembled.flags &= !FLAG_MORE_FRAGMENTS;
        assembled.fragment_offset = 0;
        assembled.data = data;
        assembled
    }
}

/// Per-host IPv4 state: output queues and ARP-wait lists keyed by interface
/// name, one global reassembly input queue, and the in-progress reassembly
/// buckets.
pub struct Ipv4Engine {
    output_queues: HashMap<String, CappedQueue<(MacAddr, IpPacket)>>,
    waiting_packets: HashMap<String, Vec<(Ipv4Addr, IpPacket)>>,
    input_queue: CappedQueue<(IpPacket, String)>,
    fragments: HashMap<u64, FragmentBucket>,
}

impl Default for Ipv4Engine {
    fn default() -> Self {
        Ipv4Engine {
            output_queues: HashMap::new(),
            waiting_packets: HashMap::new(),
            input_queue: CappedQueue::new(DEFAULT_INPUT_QUEUE_CAPACITY),
            fragments: HashMap::new(),
        }
    }
}

impl Ipv4Engine {
    pub fn new() -> Self {
        Ipv4Engine::default()
    }

    fn output_queue_is_empty(&self, if_name: &str) -> bool {
        self.output_queues.get(if_name).map(|q| q.is_empty()).unwrap_or(true)
    }

    fn push_output(&mut self, if_name: &str, mac: MacAddr, packet: IpPacket) -> SimResult<()> {
        self.output_queues
            .entry(if_name.to_string())
            .or_insert_with(|| CappedQueue::new(DEFAULT_OUTPUT_QUEUE_CAPACITY))
            .push_back((mac, packet))
    }

    fn pop_output(&mut self, if_name: &str) -> Option<(MacAddr, IpPacket)> {
        self.output_queues.get_mut(if_name)?.pop_front()
    }

    fn take_waiting_for(&mut self, if_name: &str, ip: Ipv4Addr) -> Vec<(Ipv4Addr, IpPacket)> {
        let Some(list) = self.waiting_packets.get_mut(if_name) else {
            return Vec::new();
        };
        let (matched, remaining): (Vec<_>, Vec<_>) = list.drain(..).partition(|(pending_ip, _)| *pending_ip == ip);
        *list = remaining;
        matched
    }

    fn add_fragment(&mut self, key: u64, packet: IpPacket) -> Option<IpPacket> {
        let bucket = self.fragments.entry(key).or_insert_with(FragmentBucket::new);
        bucket.add(packet);
        if bucket.is_complete() {
            self.fragments.remove(&key).map(FragmentBucket::assemble)
        } else {
            None
        }
    }
}

impl Ipv4Engine {
    /// Dispatch a frame payload by its etherType.
    pub fn on_input(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, payload: &[u8], ether_type: u16) {
        match ether_type {
            ETHERTYPE_ARP => Self::on_arp_input(host, engine, if_name, payload),
            ETHERTYPE_IPV4 => Self::on_ip_input(host, engine, if_name, payload),
            other => warn!("unhandled etherType 0x{other:04X} on {if_name}"),
        }
    }

    fn on_arp_input(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, bytes: &[u8]) {
        let packet = match ArpPacket::deserialize(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!("ARP packet dropped on {if_name}: {e}");
                return;
            }
        };

        let interface = host.borrow().interfaces.get(if_name).cloned();
        let Some(interface) = interface else { return };
        let (own_mac, own_ip) = {
            let iface = interface.borrow();
            (iface.mac(), iface.ip_address)
        };
        let now = engine.now();
        let reply = interface.borrow_mut().arp.on_input(own_mac, own_ip, now, &packet);

        if let Some(reply) = reply {
            let nic = interface.borrow().nic.clone();
            let _ = Nic::output(&nic, engine, reply.target_mac, &reply.serialize(), ETHERTYPE_ARP);
        }

        let waiting = host.borrow_mut().ipv4.take_waiting_for(if_name, packet.sender_ip);
        for (_, pending) in waiting {
            Self::enqueue_output(host, engine, if_name, packet.sender_mac, pending);
        }
    }

    fn on_ip_input(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, bytes: &[u8]) {
        let packet = match IpPacket::deserialize(bytes) {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!("IP packet dropped on {if_name}: checksum mismatch");
                return;
            }
            Err(e) => {
                warn!("IP packet dropped on {if_name}: {e}");
                return;
            }
        };

        let was_empty = host.borrow().ipv4.input_queue.is_empty();
        let overflowed = host.borrow_mut().ipv4.input_queue.push_back((packet.clone(), if_name.to_string())).is_err();
        if overflowed {
            warn!("IP input queue full, dropping packet from {}", packet.src);
            let icmp = IcmpPacket::source_quench(&packet);
            Self::send_icmp(host, engine, if_name, packet.src, icmp);
            return;
        }

        if was_empty {
            let delay = host.borrow().nodal_processing_delay_ns;
            let h = Rc::clone(host);
            engine.schedule_callback(delay, move |e| Ipv4Engine::process_packets(&h, e));
        }
    }

    fn process_packets(host: &Rc<RefCell<Host>>, engine: &mut Engine) {
        let next = host.borrow_mut().ipv4.input_queue.pop_front();
        let Some((mut packet, if_name)) = next else { return };

        packet.ttl = packet.ttl.saturating_sub(1);
        if packet.ttl == 0 {
            if packet.protocol != PROTO_ICMP {
                let icmp = IcmpPacket::time_exceeded(&packet);
                Self::send_icmp(host, engine, &if_name, packet.src, icmp);
            }
            Self::reschedule_if_more(host, engine);
            return;
        }

        let addressed_to_us = host.borrow().interfaces.values().any(|i| i.borrow().ip_address == packet.dst);
        if addressed_to_us {
            if packet.is_fragment() {
                Self::reassemble(host, packet);
            } else {
                Self::deliver_locally(&packet);
            }
        } else {
            Self::route(host, engine, &if_name, packet);
        }

        Self::reschedule_if_more(host, engine);
    }

    fn reschedule_if_more(host: &Rc<RefCell<Host>>, engine: &mut Engine) {
        if !host.borrow().ipv4.input_queue.is_empty() {
            let h = Rc::clone(host);
            engine.schedule_callback(0, move |e| Ipv4Engine::process_packets(&h, e));
        }
    }

    fn reassemble(host: &Rc<RefCell<Host>>, packet: IpPacket) {
        let key = reassembly_key(packet.src.to_u32(), packet.dst.to_u32(), packet.protocol, packet.identification);
        let assembled = host.borrow_mut().ipv4.add_fragment(key, packet);
        if let Some(assembled) = assembled {
            Self::deliver_locally(&assembled);
        }
    }

    fn deliver_locally(packet: &IpPacket) {
        if packet.protocol == PROTO_ICMP {
            if let Ok(Some(icmp)) = IcmpPacket::deserialize(&packet.data) {
                info!("ICMP type={} code={} from {}", icmp.icmp_type, icmp.code, packet.src);
            }
        } else {
            info!("delivered {} bytes from {} (protocol {})", packet.data.len(), packet.src, packet.protocol);
        }
    }

    fn route(host: &Rc<RefCell<Host>>, engine: &mut Engine, arrival_if: &str, packet: IpPacket) {
        let route = host.borrow().routing_table.lookup(packet.dst).cloned();
        let Some(route) = route else {
            let icmp = IcmpPacket::destination_network_unreachable(&packet);
            Self::send_icmp(host, engine, arrival_if, packet.src, icmp);
            return;
        };

        let mtu = host.borrow().interfaces.get(&route.interface_name).map(|i| i.borrow().mtu);
        let Some(mtu) = mtu else {
            warn!("route names unknown interface {}", route.interface_name);
            return;
        };

        if packet.total_length() as usize > mtu {
            if packet.dont_fragment() {
                let icmp = IcmpPacket::fragmentation_required(&packet);
                Self::send_icmp(host, engine, arrival_if, packet.src, icmp);
                return;
            }
            for fragment in fragment_for_forward(&packet, mtu, engine.now()) {
                let next_hop = route.gateway.unwrap_or(fragment.dst);
                Self::output_to_next_hop(host, engine, &route.interface_name, next_hop, fragment);
            }
        } else {
            let next_hop = route.gateway.unwrap_or(packet.dst);
            Self::output_to_next_hop(host, engine, &route.interface_name, next_hop, packet);
        }
    }

    fn send_icmp(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, dst: Ipv4Addr, icmp: IcmpPacket) {
        let interface = host.borrow().interfaces.get(if_name).cloned();
        let Some(interface) = interface else { return };
        let (own_ip, gateway, in_subnet) = {
            let iface = interface.borrow();
            (iface.ip_address, iface.gateway, iface.in_subnet(dst))
        };
        let Some(next_hop) = (if in_subnet { Some(dst) } else { gateway }) else {
            warn!("cannot send ICMP from {if_name}: no gateway configured");
            return;
        };
        let packet = IpPacket::new(own_ip, dst, PROTO_ICMP, icmp.serialize());
        Self::output_to_next_hop(host, engine, if_name, next_hop, packet);
    }

    /// Split an application payload into MTU-sized, unfragmented IpPackets
    /// and hand each to the next-hop resolution path.
    pub fn output(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, dst_ip: Ipv4Addr, bytes: &[u8], protocol: u8) {
        let interface = host.borrow().interfaces.get(if_name).cloned();
        let Some(interface) = interface else {
            warn!("output on unknown interface {if_name}");
            return;
        };
        let (own_ip, max_payload, in_subnet, gateway) = {
            let iface = interface.borrow();
            (iface.ip_address, iface.mtu.saturating_sub(FIXED_HEADER_LEN), iface.in_subnet(dst_ip), iface.gateway)
        };
        let next_hop = if in_subnet { Some(dst_ip) } else { gateway };
        let Some(next_hop) = next_hop else {
            warn!("no route to {dst_ip} from {if_name}: no gateway configured");
            return;
        };

        let chunks: Vec<&[u8]> = if bytes.is_empty() { vec![&[][..]] } else { bytes.chunks(max_payload.max(1)).collect() };
        for chunk in chunks {
            let packet = IpPacket::new(own_ip, dst_ip, protocol, chunk.to_vec());
            Self::output_to_next_hop(host, engine, if_name, next_hop, packet);
        }
    }

    fn output_to_next_hop(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, next_hop: Ipv4Addr, packet: IpPacket) {
        let interface = host.borrow().interfaces.get(if_name).cloned();
        let Some(interface) = interface else { return };
        let now = engine.now();
        let mac = {
            let iface = interface.borrow();
            iface.arp.lookup(now, next_hop)
        };

        match mac {
            Some(mac) => Self::enqueue_output(host, engine, if_name, mac, packet),
            None => {
                host.borrow_mut().ipv4.waiting_packets.entry(if_name.to_string()).or_default().push((next_hop, packet));
                let (own_mac, own_ip) = {
                    let iface = interface.borrow();
                    (iface.mac(), iface.ip_address)
                };
                let request = interface.borrow_mut().arp.resolve(own_mac, own_ip, next_hop);
                if let Some(request) = request {
                    let nic = interface.borrow().nic.clone();
                    let _ = Nic::output(&nic, engine, MacAddr::BROADCAST, &request.serialize(), ETHERTYPE_ARP);
                }
            }
        }
    }

    fn enqueue_output(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str, mac: MacAddr, packet: IpPacket) {
        let was_empty = host.borrow().ipv4.output_queue_is_empty(if_name);
        let pushed = host.borrow_mut().ipv4.push_output(if_name, mac, packet).is_ok();
        if !pushed {
            warn!("output queue full on {if_name}, dropping frame");
            return;
        }
        if was_empty {
            let h = Rc::clone(host);
            let name = if_name.to_string();
            engine.schedule_callback(0, move |e| Ipv4Engine::empty_send_fifo(&h, e, &name));
        }
    }

    fn empty_send_fifo(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str) {
        let next = host.borrow_mut().ipv4.pop_output(if_name);
        let Some((mac, packet)) = next else { return };
        let interface = host.borrow().interfaces.get(if_name).cloned();
        let Some(interface) = interface else { return };
        let nic = interface.borrow().nic.clone();
        let _ = Nic::output(&nic, engine, mac, &packet.serialize(), ETHERTYPE_IPV4);
    }

    /// Wired from a NIC's SendFifoEmpty notification: kick off another
    /// drain if there is more to send.
    pub fn on_available_to_send(host: &Rc<RefCell<Host>>, engine: &mut Engine, if_name: &str) {
        if !host.borrow().ipv4.output_queue_is_empty(if_name) {
            let h = Rc::clone(host);
            let name = if_name.to_string();
            engine.schedule_callback(0, move |e| Ipv4Engine::empty_send_fifo(&h, e, &name));
        }
    }
}

/// Re-fragment a packet that is too large for the next hop's MTU. Segment
/// size is rounded down to a multiple of 8 bytes, as required by the
/// fragment-offset field's units; the last fragment carries the remainder.
fn fragment_for_forward(packet: &IpPacket, mtu: usize, now: SimTime) -> Vec<IpPacket> {
    let max_seg_size = (mtu.saturating_sub(FIXED_HEADER_LEN) / 8 * 8).max(8);
    let identification = (now % 65536) as u16;
    let data = &packet.data;

    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut offset_units = packet.fragment_offset;
    loop {
        let remaining = data.len() - pos;
        let size = remaining.min(max_seg_size);
        let more_follow = pos + size < data.len();

        let mut fragment = packet.clone();
        fragment.identification = identification;
        fragment.flags = packet.flags | if more_follow { FLAG_MORE_FRAGMENTS } else { 0 };
        fragment.fragment_offset = offset_units;
        fragment.data = data[pos..pos + size].to_vec();
        out.push(fragment);

        pos += size;
        offset_units += (size / 8) as u16;
        if !more_follow {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Addr;
    use crate::ip::packet::PROTO_TCP;

    #[test]
    fn fragments_a_payload_into_eight_byte_aligned_segments() {
        let packet = IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), PROTO_TCP, vec![0xAB; 250]);
        let fragments = fragment_for_forward(&packet, 100, 12345);

        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[0].fragment_offset, 0);
        assert_eq!(fragments[1].fragment_offset, 10);
        assert_eq!(fragments[2].fragment_offset, 20);
        assert_eq!(fragments[3].fragment_offset, 30);
        assert!(fragments[..3].iter().all(|f| f.flags & FLAG_MORE_FRAGMENTS != 0));
        assert_eq!(fragments[3].flags & FLAG_MORE_FRAGMENTS, 0);

        let total: usize = fragments.iter().map(|f| f.data.len()).sum();
        assert_eq!(total, 250);
    }

    #[test]
    fn reassembles_fragments_regardless_of_arrival_order() {
        let packet = IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), PROTO_TCP, vec![0xCD; 250]);
        let fragments = fragment_for_forward(&packet, 100, 999);

        let mut bucket = FragmentBucket::new();
        for fragment in fragments.into_iter().rev() {
            bucket.add(fragment);
        }
        assert!(bucket.is_complete());

        let assembled = bucket.assemble();
        assert_eq!(assembled.data, vec![0xCD; 250]);
        assert_eq!(assembled.protocol, PROTO_TCP);
        assert_eq!(assembled.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(assembled.dst, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn incomplete_fragment_set_is_not_yet_complete() {
        let packet = IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), PROTO_TCP, vec![0xEF; 250]);
        let fragments = fragment_for_forward(&packet, 100, 1);

        let mut bucket = FragmentBucket::new();
        for fragment in fragments.into_iter().take(3) {
            bucket.add(fragment);
        }
        assert!(!bucket.is_complete());
    }

    use proptest::prelude::*;

    proptest! {
        /// For any payload and MTU, splitting and reassembling (regardless
        /// of arrival order) must reproduce the original bytes exactly.
        #[test]
        fn fragment_then_reassemble_is_identity(
            payload in proptest::collection::vec(any::<u8>(), 1..2000),
            mtu in 28usize..1500,
            now in any::<u64>(),
            shuffle_seed in any::<u64>(),
        ) {
            let packet = IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), PROTO_TCP, payload.clone());
            let mut fragments = fragment_for_forward(&packet, mtu, now);

            // Deterministic order scramble so reassembly can't rely on
            // arrival order, without pulling in a shuffle dependency.
            let n = fragments.len();
            for i in 0..n {
                let j = (i as u64).wrapping_mul(2654435761).wrapping_add(shuffle_seed) as usize % n;
                fragments.swap(i, j);
            }

            let mut bucket = FragmentBucket::new();
            for fragment in fragments {
                bucket.add(fragment);
            }
            prop_assert!(bucket.is_complete());
            let assembled = bucket.assemble();
            prop_assert_eq!(assembled.data, payload);
        }
    }
}
