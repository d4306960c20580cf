//! Multi-port learning switch: per-port MAC learning, flooding on an
//! unknown destination, and a same-segment drop quirk that is kept rather
//! than fixed (see `BridgeState::learn_and_resolve`).
//!
//! A kernel typically has one NIC, never several ports to relay between.
//! Grounded in shape on `phy.rs`'s half-duplex transceiver:
//! each port is an ordinary `Nic` with `set_promiscuous(true)`, so carrier
//! sense, collision handling and FCS checking are all reused unchanged;
//! only the forwarding decision above the NIC layer is new.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::addr::MacAddr;
use crate::config::DEFAULT_OUTPUT_QUEUE_CAPACITY;
use crate::engine::{ConnectorId, Engine};
use crate::error::SimResult;
use crate::medium::Cable;
use crate::phy::{Nic, NicOwner};
use crate::util::CappedQueue;

struct PendingFrame {
    arrival_port: usize,
    dst: MacAddr,
    dst_port: Option<usize>,
    ether_type: u16,
    payload: Vec<u8>,
}

struct BridgeState {
    nics: Vec<Rc<RefCell<Nic>>>,
    forward_table: HashMap<MacAddr, usize>,
    input_fifo: CappedQueue<PendingFrame>,
    output_fifos: Vec<CappedQueue<(MacAddr, u16, Vec<u8>)>>,
    processing_delay_ns: u64,
    drain_scheduled: bool,
}

/// A multi-port Ethernet bridge. Ports are indexed `0..num_ports`, each
/// backed by its own promiscuous `Nic`.
pub struct Bridge {
    state: Rc<RefCell<BridgeState>>,
}

struct BridgePort {
    state: Rc<RefCell<BridgeState>>,
    port_index: usize,
}

impl NicOwner for BridgePort {
    fn on_data_received(&self, _engine: &mut Engine, _payload: &[u8], _ether_type: u16) {
        // Bridging needs addressing; see on_frame_received, which this port
        // always receives instead (Nic always calls the frame-aware hook).
    }

    fn on_frame_received(&self, engine: &mut Engine, src: MacAddr, dst: MacAddr, ether_type: u16, payload: &[u8]) {
        let dst_port = BridgeState::learn_and_resolve(&self.state, self.port_index, src, dst);
        if dst_port == Some(self.port_index) {
            // Both endpoints already learned on the same port the frame
            // arrived on: it never needed to cross the bridge, so it is
            // dropped here rather than occupying input FIFO capacity.
            return;
        }

        let pending = PendingFrame { arrival_port: self.port_index, dst, dst_port, ether_type, payload: payload.to_vec() };
        let overflowed = self.state.borrow_mut().input_fifo.push_back(pending).is_err();
        if overflowed {
            return;
        }
        BridgeState::schedule_drain(&self.state, engine);
    }

    fn on_send_fifo_empty(&self, engine: &mut Engine) {
        BridgeState::try_start_output(&self.state, engine, self.port_index);
    }
}

impl BridgeState {
    /// Learn `src` on `arrival_port` and resolve `dst`'s known port, if
    /// any. Runs synchronously at frame-receipt time so the same-segment
    /// drop decision never depends on what else is sitting in the input
    /// FIFO.
    fn learn_and_resolve(state: &Rc<RefCell<BridgeState>>, arrival_port: usize, src: MacAddr, dst: MacAddr) -> Option<usize> {
        let mut state = state.borrow_mut();
        state.forward_table.insert(src, arrival_port);
        state.forward_table.get(&dst).copied()
    }

    fn schedule_drain(state: &Rc<RefCell<BridgeState>>, engine: &mut Engine) {
        let already = state.borrow().drain_scheduled;
        if already {
            return;
        }
        state.borrow_mut().drain_scheduled = true;
        let delay = state.borrow().processing_delay_ns;
        let s = Rc::clone(state);
        engine.schedule_callback(delay, move |e| BridgeState::process_one(&s, e));
    }

    /// Move exactly one frame from the input FIFO to its destination
    /// port's output FIFO (or flood it), then reschedule itself if more
    /// frames remain. Learning and the same-segment drop already happened
    /// at frame-receipt time, so `pending.dst_port` is never the arrival
    /// port here.
    fn process_one(state: &Rc<RefCell<BridgeState>>, engine: &mut Engine) {
        state.borrow_mut().drain_scheduled = false;
        let pending = state.borrow_mut().input_fifo.pop_front();
        let Some(pending) = pending else { return };

        let num_ports = state.borrow().nics.len();

        match pending.dst_port {
            Some(out_port) => {
                BridgeState::enqueue_output(state, engine, out_port, pending.dst, pending.ether_type, pending.payload);
            }
            None => {
                for port in 0..num_ports {
                    if port == pending.arrival_port {
                        continue;
                    }
                    BridgeState::enqueue_output(state, engine, port, pending.dst, pending.ether_type, pending.payload.clone());
                }
            }
        }

        if !state.borrow().input_fifo.is_empty() {
            BridgeState::schedule_drain(state, engine);
        }
    }

    fn enqueue_output(state: &Rc<RefCell<BridgeState>>, engine: &mut Engine, port: usize, dst: MacAddr, ether_type: u16, payload: Vec<u8>) {
        let was_empty = state.borrow().output_fifos[port].is_empty();
        let pushed = state.borrow_mut().output_fifos[port].push_back((dst, ether_type, payload)).is_ok();
        if pushed && was_empty {
            BridgeState::try_start_output(state, engine, port);
        }
    }

    fn try_start_output(state: &Rc<RefCell<BridgeState>>, engine: &mut Engine, port: usize) {
        let next = state.borrow_mut().output_fifos[port].pop_front();
        let Some((dst, ether_type, payload)) = next else { return };
        let nic = state.borrow().nics[port].clone();
        let _ = Nic::output(&nic, engine, dst, &payload, ether_type);
    }
}

impl Bridge {
    pub fn new(num_ports: usize, processing_delay_ns: u64, engine: &mut Engine) -> Rc<RefCell<Bridge>> {
        let nics: Vec<Rc<RefCell<Nic>>> = (0..num_ports)
            .map(|_| {
                let nic = Nic::new(MacAddr::new([0; 6]), ConnectorId(engine.next_object_id()));
                nic.borrow_mut().set_promiscuous(true);
                nic
            })
            .collect();
        let output_fifos = (0..num_ports).map(|_| CappedQueue::new(DEFAULT_OUTPUT_QUEUE_CAPACITY)).collect();
        let state = Rc::new(RefCell::new(BridgeState {
            nics,
            forward_table: HashMap::new(),
            input_fifo: CappedQueue::new(DEFAULT_OUTPUT_QUEUE_CAPACITY * num_ports.max(1)),
            output_fifos,
            processing_delay_ns,
            drain_scheduled: false,
        }));

        for (index, nic) in state.borrow().nics.iter().enumerate() {
            let port: Rc<dyn NicOwner> = Rc::new(BridgePort { state: Rc::clone(&state), port_index: index });
            nic.borrow_mut().set_owner(port);
        }

        Rc::new(RefCell::new(Bridge { state }))
    }

    pub fn num_ports(&self) -> usize {
        self.state.borrow().nics.len()
    }

    pub fn attach(bridge: &Rc<RefCell<Bridge>>, port: usize, cable: &Rc<RefCell<Cable>>, position_m: f64) -> SimResult<()> {
        let nic = bridge.borrow().state.borrow().nics[port].clone();
        Nic::attach(&nic, cable, position_m)
    }

    pub fn has_learned(&self, mac: MacAddr) -> Option<usize> {
        self.state.borrow().forward_table.get(&mac).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ETHERTYPE_IPV4;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, last])
    }

    fn wire(engine: &mut Engine, bridge: &Rc<RefCell<Bridge>>, port: usize, cable_name: &str, length_m: f64) -> Rc<RefCell<Nic>> {
        let cable = Cable::new(cable_name, length_m, 1.0e7, 1.0, false).unwrap();
        Bridge::attach(bridge, port, &cable, 0.0).unwrap();
        let nic = Nic::new(mac(port as u8 + 10), ConnectorId(engine.next_object_id()));
        Nic::attach(&nic, &cable, length_m).unwrap();
        nic
    }

    struct Sink {
        received: RefCell<Vec<Vec<u8>>>,
    }
    impl NicOwner for Sink {
        fn on_data_received(&self, _engine: &mut Engine, payload: &[u8], _ether_type: u16) {
            self.received.borrow_mut().push(payload.to_vec());
        }
        fn on_send_fifo_empty(&self, _engine: &mut Engine) {}
    }

    #[test]
    fn unknown_destination_floods_every_other_port() {
        let mut engine = Engine::new();
        let bridge = Bridge::new(3, 1_000, &mut engine);

        let host_a = wire(&mut engine, &bridge, 0, "seg-a", 10.0);
        let host_b = wire(&mut engine, &bridge, 1, "seg-b", 10.0);
        let host_c = wire(&mut engine, &bridge, 2, "seg-c", 10.0);

        let sink_b = Rc::new(Sink { received: RefCell::new(Vec::new()) });
        host_b.borrow_mut().set_owner(sink_b.clone());
        let sink_c = Rc::new(Sink { received: RefCell::new(Vec::new()) });
        host_c.borrow_mut().set_owner(sink_c.clone());

        let dst = mac(99);
        Nic::output(&host_a, &mut engine, dst, &[7, 7, 7], ETHERTYPE_IPV4).unwrap();
        engine.run_until(10_000_000);

        assert_eq!(sink_b.received.borrow().as_slice(), &[vec![7, 7, 7]]);
        assert_eq!(sink_c.received.borrow().as_slice(), &[vec![7, 7, 7]]);
    }

    #[test]
    fn learns_sender_port_and_stops_flooding_once_destination_is_known() {
        let mut engine = Engine::new();
        let bridge = Bridge::new(2, 1_000, &mut engine);

        let host_a = wire(&mut engine, &bridge, 0, "seg-a", 10.0);
        let host_b = wire(&mut engine, &bridge, 1, "seg-b", 10.0);

        let sink_a = Rc::new(Sink { received: RefCell::new(Vec::new()) });
        host_a.borrow_mut().set_owner(sink_a.clone());
        let sink_b = Rc::new(Sink { received: RefCell::new(Vec::new()) });
        host_b.borrow_mut().set_owner(sink_b.clone());

        let mac_a = host_a.borrow().mac;
        let mac_b = host_b.borrow().mac;

        // b -> a, learning b on port 1.
        Nic::output(&host_b, &mut engine, mac_a, &[1], ETHERTYPE_IPV4).unwrap();
        engine.run_until(10_000_000);
        assert_eq!(bridge.borrow().has_learned(mac_b), Some(1));

        // a -> b now forwards directly rather than flooding (only 2 ports,
        // so this test only proves correctness of delivery, not
        // flood-suppression by itself).
        Nic::output(&host_a, &mut engine, mac_b, &[2], ETHERTYPE_IPV4).unwrap();
        engine.run_until(20_000_000);
        assert_eq!(sink_b.received.borrow().as_slice(), &[vec![2]]);
    }

    #[test]
    fn same_segment_traffic_is_dropped_once_both_endpoints_are_learned_on_that_port() {
        let mut engine = Engine::new();
        let bridge = Bridge::new(2, 1_000, &mut engine);
        let mac_a = mac(1);
        let mac_b = mac(2);

        // Both addresses already learned on port 0 (as if a hub sat behind
        // that port and both hosts shared its segment).
        {
            let bridge_ref = bridge.borrow();
            let mut state = bridge_ref.state.borrow_mut();
            state.forward_table.insert(mac_a, 0);
            state.forward_table.insert(mac_b, 0);
        }

        let port = BridgePort { state: bridge.borrow().state.clone(), port_index: 0 };
        port.on_frame_received(&mut engine, mac_b, mac_a, ETHERTYPE_IPV4, &[5]);
        engine.run_until(10_000_000);

        assert!(bridge.borrow().state.borrow().output_fifos[0].is_empty());
        assert!(bridge.borrow().state.borrow().output_fifos[1].is_empty());
    }
}
