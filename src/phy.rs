//! The PHY/MAC layer: a half-duplex CSMA/CD transceiver sitting on one
//! `Connector`, with framing, FCS checking, an output FIFO, and the
//! truncated binary exponential backoff state machine.
//!
//! A driver for a switched point-to-point link (`e1000`/`virtio`-style)
//! has no contention to handle at all — there's no drop-in counterpart
//! for carrier sense or collision handling, so this state machine is
//! built fresh, reusing only the framing types (`Frame`) and the
//! queueing shape (`CappedQueue`) already adapted elsewhere in this crate.

use std::cell::RefCell;
use std::rc::Rc;

use log::{trace, warn};
use rand::Rng;

use crate::addr::MacAddr;
use crate::config::{
    BACKOFF_EXPONENT_CAP, DEFAULT_OUTPUT_QUEUE_CAPACITY, DEFER_RETRY_MAX_NS, DEFER_RETRY_MIN_NS, IFG_BITTIMES,
    MAX_RETRANSMISSIONS, SLOT_TIME_BITTIMES,
};
use crate::engine::{ConnectorId, Engine, SimTime};
use crate::error::SimResult;
use crate::frame::Frame;
use crate::medium::{Cable, Connector, SenseCeaseListener};
use crate::util::CappedQueue;

/// Upward notifications a NIC raises into whatever owns it (a `Host`'s
/// interface, or a bridge port).
pub trait NicOwner {
    fn on_data_received(&self, engine: &mut Engine, payload: &[u8], ether_type: u16);
    fn on_send_fifo_empty(&self, engine: &mut Engine);

    /// Same event as `on_data_received`, with the frame's addressing kept.
    /// A bridge port needs `src`/`dst` to learn and forward; an ordinary
    /// host interface only cares about the payload, so the default just
    /// forwards to `on_data_received`.
    fn on_frame_received(&self, engine: &mut Engine, src: MacAddr, dst: MacAddr, ether_type: u16, payload: &[u8]) {
        let _ = (src, dst);
        self.on_data_received(engine, payload, ether_type);
    }
}

pub struct Nic {
    pub mac: MacAddr,
    connector: Connector,
    output_fifo: CappedQueue<Frame>,
    tx: bool,
    rx: bool,
    retransmission_count: u32,
    pending_bytes: Option<Vec<u8>>,
    owner: Option<Rc<dyn NicOwner>>,
    /// A bridge port accepts every frame its FCS validates, not just ones
    /// addressed to its own MAC — it has no "own traffic" of its own.
    promiscuous: bool,
}

struct NicListener {
    nic: Rc<RefCell<Nic>>,
}

impl SenseCeaseListener for NicListener {
    fn on_sense(&self, engine: &mut Engine, connector: ConnectorId) {
        Nic::handle_sense(&self.nic, engine, connector);
    }
    fn on_cease(&self, engine: &mut Engine, connector: ConnectorId, sender: ConnectorId, data: Option<Rc<[u8]>>) {
        Nic::handle_cease(&self.nic, engine, connector, sender, data);
    }
}

impl Nic {
    pub fn new(mac: MacAddr, connector_id: ConnectorId) -> Rc<RefCell<Nic>> {
        Rc::new(RefCell::new(Nic {
            mac,
            connector: Connector::new(connector_id),
            output_fifo: CappedQueue::new(DEFAULT_OUTPUT_QUEUE_CAPACITY),
            tx: false,
            rx: false,
            retransmission_count: 0,
            pending_bytes: None,
            owner: None,
            promiscuous: false,
        }))
    }

    pub fn set_owner(&mut self, owner: Rc<dyn NicOwner>) {
        self.owner = Some(owner);
    }

    pub fn set_promiscuous(&mut self, promiscuous: bool) {
        self.promiscuous = promiscuous;
    }

    pub fn connector_id(&self) -> ConnectorId {
        self.connector.id
    }

    pub fn is_attached(&self) -> bool {
        self.connector.is_attached()
    }

    /// Attach `nic` to `cable` at `position_m`, wiring a listener that
    /// shares ownership of `nic` so the cable can reach it on every sense
    /// and cease without `nic` needing to know about the cable up front.
    pub fn attach(nic: &Rc<RefCell<Nic>>, cable: &Rc<RefCell<Cable>>, position_m: f64) -> SimResult<()> {
        let id = nic.borrow().connector.id;
        let listener: Rc<dyn SenseCeaseListener> = Rc::new(NicListener { nic: Rc::clone(nic) });
        cable.borrow_mut().attach(id, position_m, listener)?;
        nic.borrow_mut().connector.cable = Some(Rc::clone(cable));
        Ok(())
    }

    fn bitrate_bps(&self) -> f64 {
        self.connector.cable.as_ref().map(|c| c.borrow().bitrate_bps).unwrap_or(1.0)
    }

    fn slot_time_ns(&self) -> SimTime {
        (SLOT_TIME_BITTIMES as f64 * 1e9 / self.bitrate_bps()).round() as SimTime
    }

    fn ifg_ns(&self) -> SimTime {
        (IFG_BITTIMES as f64 * 1e9 / self.bitrate_bps()).round() as SimTime
    }

    /// Wrap `payload` into a frame and enqueue it, kicking off draining if
    /// the FIFO was empty.
    pub fn output(nic: &Rc<RefCell<Nic>>, engine: &mut Engine, dst: MacAddr, payload: &[u8], ether_type: u16) -> SimResult<()> {
        let frame = {
            let n = nic.borrow();
            Frame::new(dst, n.mac, ether_type, payload)?
        };
        let was_empty = nic.borrow().output_fifo.is_empty();
        nic.borrow_mut().output_fifo.push_back(frame)?;
        if was_empty {
            let n = Rc::clone(nic);
            engine.schedule_callback(0, move |e| Nic::start_drain(&n, e));
        }
        Ok(())
    }

    fn start_drain(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        let frame = nic.borrow_mut().output_fifo.pop_front();
        let Some(frame) = frame else { return };
        nic.borrow_mut().pending_bytes = Some(frame.serialize());
        Nic::transmit(nic, engine);
    }

    /// Defer on a busy medium, else wait one IFG before trying to actually
    /// start driving the medium.
    fn transmit(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        if nic.borrow().rx {
            Nic::defer_and_retry(nic, engine);
            return;
        }
        let ifg = nic.borrow().ifg_ns();
        let n = Rc::clone(nic);
        engine.schedule_callback(ifg, move |e| Nic::start_transmission(&n, e));
    }

    fn defer_and_retry(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        let delay = engine.rng().gen_range(DEFER_RETRY_MIN_NS..=DEFER_RETRY_MAX_NS);
        let n = Rc::clone(nic);
        engine.schedule_callback(delay, move |e| Nic::transmit(&n, e));
    }

    fn start_transmission(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        if nic.borrow().rx {
            Nic::defer_and_retry(nic, engine);
            return;
        }
        nic.borrow_mut().tx = true;
        let bytes = nic.borrow().pending_bytes.clone().unwrap_or_default();
        nic.borrow().connector.transmit(engine, &bytes);
    }

    fn handle_sense(nic: &Rc<RefCell<Nic>>, engine: &mut Engine, _connector: ConnectorId) {
        let (rx, tx) = {
            let n = nic.borrow();
            (n.rx, n.tx)
        };
        if rx && tx {
            trace!("collision detected");
            let jam_time = nic.borrow().connector.jam(engine);
            Nic::enter_backoff(nic, engine, jam_time);
        } else {
            nic.borrow_mut().rx = true;
        }
    }

    fn handle_cease(nic: &Rc<RefCell<Nic>>, engine: &mut Engine, _connector: ConnectorId, sender: ConnectorId, data: Option<Rc<[u8]>>) {
        nic.borrow_mut().rx = false;
        nic.borrow_mut().tx = false;

        let Some(bytes) = data else {
            // Jam signal: discard, remain in whatever backoff is running.
            return;
        };

        let is_own = nic.borrow().connector.id == sender;
        if is_own {
            Nic::finish_own_transmission(nic, engine);
        } else {
            Nic::mac_receive(nic, engine, &bytes);
        }
    }

    fn finish_own_transmission(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        nic.borrow_mut().retransmission_count = 0;
        nic.borrow_mut().pending_bytes = None;
        let ifg = nic.borrow().ifg_ns();
        let n = Rc::clone(nic);
        engine.schedule_callback(ifg, move |e| Nic::drain_or_notify(&n, e));
    }

    fn drain_or_notify(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        let has_more = !nic.borrow().output_fifo.is_empty();
        if has_more {
            Nic::start_drain(nic, engine);
        } else if let Some(owner) = nic.borrow().owner.clone() {
            owner.on_send_fifo_empty(engine);
        }
    }

    fn mac_receive(nic: &Rc<RefCell<Nic>>, engine: &mut Engine, bytes: &[u8]) {
        let frame = match Frame::deserialize(bytes) {
            Ok(Some(f)) => f,
            Ok(None) => {
                warn!("frame dropped: FCS mismatch");
                return;
            }
            Err(e) => {
                warn!("frame dropped: {e}");
                return;
            }
        };
        let (own_mac, promiscuous) = {
            let n = nic.borrow();
            (n.mac, n.promiscuous)
        };
        if frame.src == own_mac {
            return;
        }
        if !promiscuous && frame.dst != own_mac && !frame.dst.is_broadcast() {
            return;
        }
        if let Some(owner) = nic.borrow().owner.clone() {
            owner.on_frame_received(engine, frame.src, frame.dst, frame.ether_type, &frame.payload);
        }
    }

    /// Truncated binary exponential backoff: let n := retransmissionCount +
    /// 1; abort past the retry ceiling; otherwise draw uniformly from
    /// [0, 2^min(n, cap)) slots and wait `jamTime + c*slotTime` before
    /// retrying the same frame.
    fn enter_backoff(nic: &Rc<RefCell<Nic>>, engine: &mut Engine, jam_time: SimTime) {
        let n = nic.borrow().retransmission_count + 1;
        if n > MAX_RETRANSMISSIONS {
            warn!("aborting transmission after {MAX_RETRANSMISSIONS} retransmissions");
            nic.borrow_mut().retransmission_count = 0;
            nic.borrow_mut().pending_bytes = None;
            return;
        }
        nic.borrow_mut().retransmission_count = n;

        let exponent = n.min(BACKOFF_EXPONENT_CAP);
        let window = 1u64 << exponent;
        let c = engine.rng().gen_range(0..window);
        let slot = nic.borrow().slot_time_ns();
        let wait = jam_time + c * slot;

        let nn = Rc::clone(nic);
        engine.schedule_callback(wait, move |e| Nic::retry_after_backoff(&nn, e));
    }

    fn retry_after_backoff(nic: &Rc<RefCell<Nic>>, engine: &mut Engine) {
        if nic.borrow().pending_bytes.is_some() {
            Nic::transmit(nic, engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::frame::ETHERTYPE_IPV4;

    struct RecordingOwner {
        received: RefCell<Vec<(Vec<u8>, u16)>>,
        fifo_empty_count: RefCell<u32>,
    }

    impl RecordingOwner {
        fn new() -> Rc<RecordingOwner> {
            Rc::new(RecordingOwner { received: RefCell::new(Vec::new()), fifo_empty_count: RefCell::new(0) })
        }
    }

    impl NicOwner for RecordingOwner {
        fn on_data_received(&self, _engine: &mut Engine, payload: &[u8], ether_type: u16) {
            self.received.borrow_mut().push((payload.to_vec(), ether_type));
        }
        fn on_send_fifo_empty(&self, _engine: &mut Engine) {
            *self.fifo_empty_count.borrow_mut() += 1;
        }
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, last])
    }

    #[test]
    fn uncontended_transmission_is_delivered() {
        let mut engine = Engine::new();
        let cable = Cable::new("seg0", 250.0, 1.0e7, 0.66, false).unwrap();

        let nic_a = Nic::new(mac(1), ConnectorId(0));
        let nic_b = Nic::new(mac(2), ConnectorId(1));
        let owner_a = RecordingOwner::new();
        let owner_b = RecordingOwner::new();
        nic_a.borrow_mut().set_owner(owner_a.clone());
        nic_b.borrow_mut().set_owner(owner_b.clone());

        Nic::attach(&nic_a, &cable, 0.0).unwrap();
        Nic::attach(&nic_b, &cable, 250.0).unwrap();

        Nic::output(&nic_a, &mut engine, mac(2), &[1, 2, 3, 4], ETHERTYPE_IPV4).unwrap();
        engine.run_until(1_000_000);

        let received = owner_b.received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, vec![1, 2, 3, 4]);
        assert_eq!(received[0].1, ETHERTYPE_IPV4);
        assert_eq!(*owner_a.fifo_empty_count.borrow(), 1);
    }

    #[test]
    fn broadcast_is_delivered_and_own_frame_is_not_self_received() {
        let mut engine = Engine::new();
        let cable = Cable::new("seg0", 100.0, 1.0e7, 1.0, false).unwrap();

        let nic_a = Nic::new(mac(1), ConnectorId(0));
        let nic_b = Nic::new(mac(2), ConnectorId(1));
        let owner_a = RecordingOwner::new();
        let owner_b = RecordingOwner::new();
        nic_a.borrow_mut().set_owner(owner_a.clone());
        nic_b.borrow_mut().set_owner(owner_b.clone());

        Nic::attach(&nic_a, &cable, 0.0).unwrap();
        Nic::attach(&nic_b, &cable, 100.0).unwrap();

        Nic::output(&nic_a, &mut engine, MacAddr::BROADCAST, &[9], ETHERTYPE_IPV4).unwrap();
        engine.run_until(1_000_000);

        assert_eq!(owner_b.received.borrow().len(), 1);
        assert!(owner_a.received.borrow().is_empty());
    }

    #[test]
    fn colliding_transmissions_both_eventually_deliver() {
        let mut engine = Engine::new();
        let cable = Cable::new("seg0", 250.0, 1.0e7, 0.66, false).unwrap();

        let nic_a = Nic::new(mac(1), ConnectorId(0));
        let nic_b = Nic::new(mac(2), ConnectorId(1));
        let owner_a = RecordingOwner::new();
        let owner_b = RecordingOwner::new();
        nic_a.borrow_mut().set_owner(owner_a.clone());
        nic_b.borrow_mut().set_owner(owner_b.clone());

        Nic::attach(&nic_a, &cable, 0.0).unwrap();
        Nic::attach(&nic_b, &cable, 250.0).unwrap();

        Nic::output(&nic_a, &mut engine, mac(2), &[1, 2, 3], ETHERTYPE_IPV4).unwrap();
        engine.run_for(1000);
        Nic::output(&nic_b, &mut engine, mac(1), &[4, 5, 6], ETHERTYPE_IPV4).unwrap();

        engine.run_until(50_000_000);

        assert_eq!(owner_b.received.borrow().len(), 1);
        assert_eq!(owner_a.received.borrow().len(), 1);
        assert_eq!(owner_b.received.borrow()[0].0, vec![1, 2, 3]);
        assert_eq!(owner_a.received.borrow()[0].0, vec![4, 5, 6]);
    }
}
