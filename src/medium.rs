//! The shared medium: `Cable` models a wired segment (propagation delay,
//! optional bit-error distortion), `Connector` is an attachment point owned
//! by a NIC/bridge-port/hub-port.
//!
//! An `e1000`/`virtio`-style driver talks to a single point-to-point
//! virtual NIC, not a shared broadcast medium with multiple listeners and
//! propagation delay — so this is built fresh, in a plain
//! free-function-and-struct style (no trait-heavy abstraction beyond the
//! one listener interface a cable needs to reach every attached port).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::Rng;

use crate::engine::{ConnectorId, Engine, EventKind, SimTime};
use crate::error::{SimError, SimResult};

/// Speed of light in a vacuum, m/s. A cable's propagation speed is this
/// times its velocity factor.
pub const SPEED_OF_LIGHT_M_PER_S: f64 = 299_792_458.0;

/// Receives a shared medium's sense/cease notifications — implemented once
/// per owner kind (NIC, bridge port, hub port) in their respective modules.
pub trait SenseCeaseListener {
    fn on_sense(&self, engine: &mut Engine, connector: ConnectorId);
    /// `data` is `None` for a jam signal rather than a data transmission.
    fn on_cease(&self, engine: &mut Engine, connector: ConnectorId, sender: ConnectorId, data: Option<Rc<[u8]>>);
}

struct Attachment {
    position_m: f64,
    listener: Rc<dyn SenseCeaseListener>,
}

/// A point a NIC, bridge port, or hub port uses to reach its cable. The
/// listener half of the attachment lives in the cable's own attachment
/// table instead (see module doc), since it's the cable that must reach
/// every listener when it transmits, while a connector only ever needs to
/// reach its own cable.
pub struct Connector {
    pub id: ConnectorId,
    pub cable: Option<Rc<RefCell<Cable>>>,
}

impl Connector {
    pub fn new(id: ConnectorId) -> Self {
        Connector { id, cable: None }
    }

    pub fn is_attached(&self) -> bool {
        self.cable.is_some()
    }

    pub fn transmit(&self, engine: &mut Engine, bytes: &[u8]) {
        if let Some(cable) = &self.cable {
            cable.borrow_mut().transmit(engine, self.id, bytes);
        }
    }

    /// Emit a jam signal; returns the jam's transmission time so the caller
    /// (PHY) can start its backoff clock from it.
    pub fn jam(&self, engine: &mut Engine) -> SimTime {
        match &self.cable {
            Some(cable) => cable.borrow_mut().jam(engine, self.id),
            None => 0,
        }
    }
}

pub struct Cable {
    pub name: String,
    pub length_m: f64,
    pub bitrate_bps: f64,
    pub velocity_factor: f64,
    pub full_duplex: bool,
    pub bit_error_rate: f64,
    pub min_burst_error_len: usize,
    pub max_burst_error_len: usize,
    /// Installation grid for coax-style cables (e.g. 2.5 m for 10BASE5,
    /// 0.5 m for 10BASE2); `None` means any position is allowed.
    pub install_grid_m: Option<f64>,
    attachments: HashMap<ConnectorId, Attachment>,
}

impl Cable {
    pub fn new(
        name: impl Into<String>,
        length_m: f64,
        bitrate_bps: f64,
        velocity_factor: f64,
        full_duplex: bool,
    ) -> SimResult<Rc<RefCell<Cable>>> {
        if length_m <= 0.0 {
            return Err(SimError::ArgumentValidation("cable length must be positive".into()));
        }
        if !(velocity_factor > 0.0 && velocity_factor <= 1.0) {
            return Err(SimError::ArgumentValidation("velocity factor must be in (0, 1]".into()));
        }
        if bitrate_bps <= 0.0 {
            return Err(SimError::ArgumentValidation("bitrate must be positive".into()));
        }
        Ok(Rc::new(RefCell::new(Cable {
            name: name.into(),
            length_m,
            bitrate_bps,
            velocity_factor,
            full_duplex,
            bit_error_rate: 0.0,
            min_burst_error_len: 1,
            max_burst_error_len: 1,
            install_grid_m: None,
            attachments: HashMap::new(),
        })))
    }

    pub fn with_install_grid(mut self, grid_m: f64) -> Self {
        self.install_grid_m = Some(grid_m);
        self
    }

    pub fn set_bit_error_model(
        &mut self,
        bit_error_rate: f64,
        min_burst_error_len: usize,
        max_burst_error_len: usize,
    ) -> SimResult<()> {
        if !(0.0..=1.0).contains(&bit_error_rate) {
            return Err(SimError::ArgumentValidation("bit error rate must be in [0, 1]".into()));
        }
        if min_burst_error_len == 0 || min_burst_error_len > max_burst_error_len {
            return Err(SimError::ArgumentValidation(
                "minBurstErrorLength must be >= 1 and <= maxBurstErrorLength".into(),
            ));
        }
        self.bit_error_rate = bit_error_rate;
        self.min_burst_error_len = min_burst_error_len;
        self.max_burst_error_len = max_burst_error_len;
        Ok(())
    }

    pub fn propagation_speed_m_per_s(&self) -> f64 {
        SPEED_OF_LIGHT_M_PER_S * self.velocity_factor
    }

    pub fn attach(&mut self, id: ConnectorId, position_m: f64, listener: Rc<dyn SenseCeaseListener>) -> SimResult<()> {
        if let Some(grid) = self.install_grid_m {
            let ratio = position_m / grid;
            if (ratio - ratio.round()).abs() > 1e-6 {
                return Err(SimError::InvalidGridPosition(position_m, grid));
            }
        }
        if self.attachments.values().any(|a| (a.position_m - position_m).abs() < 1e-9) {
            return Err(SimError::DuplicatePosition(position_m));
        }
        self.attachments.insert(id, Attachment { position_m, listener });
        Ok(())
    }

    fn prop_delay_ns(&self, from_m: f64, to_m: f64) -> SimTime {
        let distance = (from_m - to_m).abs();
        (distance * 1e9 / self.propagation_speed_m_per_s()).round() as SimTime
    }

    fn transmission_time_ns(&self, num_bytes: usize) -> SimTime {
        ((num_bytes as f64) * 8.0 * 1e9 / self.bitrate_bps).ceil() as SimTime
    }

    /// Begin a transmission from `source`. Every attached connector
    /// (including `source` itself, which monitors its own signal) receives
    /// a `Sense` at its propagation delay and a `Cease` carrying the
    /// (possibly distorted) bytes at `propDelay + transTime`.
    pub fn transmit(&mut self, engine: &mut Engine, source: ConnectorId, bytes: &[u8]) {
        let Some(source_pos) = self.attachments.get(&source).map(|a| a.position_m) else {
            return;
        };
        let trans_time = self.transmission_time_ns(bytes.len());

        let targets: Vec<(ConnectorId, f64, Rc<dyn SenseCeaseListener>)> = self
            .attachments
            .iter()
            .map(|(id, a)| (*id, a.position_m, a.listener.clone()))
            .collect();

        for (cid, pos, listener) in targets {
            let prop_delay = self.prop_delay_ns(source_pos, pos);
            let now = engine.now();

            let sense_listener = listener.clone();
            engine.schedule(now + prop_delay, EventKind::Sense { connector: cid }, move |e| {
                sense_listener.on_sense(e, cid);
            });

            let delivered: Rc<[u8]> = if cid == source || self.bit_error_rate <= 0.0 {
                Rc::from(bytes)
            } else {
                Rc::from(distort(bytes, self.bit_error_rate, self.min_burst_error_len, self.max_burst_error_len, engine.rng()))
            };

            let cease_listener = listener;
            engine.schedule(
                now + prop_delay + trans_time,
                EventKind::Cease { connector: cid, sender: source, is_jam: false },
                move |e| {
                    cease_listener.on_cease(e, cid, source, Some(delivered));
                },
            );
        }
    }

    /// Emit a 48-bit jam signal, invalidating any `Cease` already scheduled
    /// for `source`'s in-flight transmission, and return the jam's
    /// transmission time.
    pub fn jam(&mut self, engine: &mut Engine, source: ConnectorId) -> SimTime {
        engine.cancel_matching(|k| matches!(k, EventKind::Cease { sender, .. } if *sender == source));

        let Some(source_pos) = self.attachments.get(&source).map(|a| a.position_m) else {
            return 0;
        };
        const JAM_BITS: usize = 48;
        let jam_time = self.transmission_time_ns(JAM_BITS / 8);

        let targets: Vec<(ConnectorId, f64, Rc<dyn SenseCeaseListener>)> = self
            .attachments
            .iter()
            .map(|(id, a)| (*id, a.position_m, a.listener.clone()))
            .collect();

        for (cid, pos, listener) in targets {
            let prop_delay = self.prop_delay_ns(source_pos, pos);
            let now = engine.now();

            let sense_listener = listener.clone();
            engine.schedule(now + prop_delay, EventKind::Sense { connector: cid }, move |e| {
                sense_listener.on_sense(e, cid);
            });

            let cease_listener = listener;
            engine.schedule(
                now + prop_delay + jam_time,
                EventKind::Cease { connector: cid, sender: source, is_jam: true },
                move |e| {
                    cease_listener.on_cease(e, cid, source, None);
                },
            );
        }

        jam_time
    }
}

/// Burst bit-error distortion: walk the bitstream, and with probability
/// `bit_error_rate` at each position, replace a run of `[min_len, max_len]`
/// fresh random bits starting there.
fn distort(bytes: &[u8], bit_error_rate: f64, min_len: usize, max_len: usize, rng: &mut impl Rng) -> Vec<u8> {
    let mut out = bytes.to_vec();
    let total_bits = out.len() * 8;
    let mut bit = 0usize;
    while bit < total_bits {
        if rng.gen::<f64>() < bit_error_rate {
            let burst_len = if max_len > min_len { rng.gen_range(min_len..=max_len) } else { min_len };
            for offset in 0..burst_len {
                let b = bit + offset;
                if b >= total_bits {
                    break;
                }
                if rng.gen::<bool>() {
                    out[b / 8] ^= 1 << (7 - (b % 8));
                }
            }
            bit += burst_len;
        } else {
            bit += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    struct RecordingListener {
        log: Rc<StdRefCell<Vec<String>>>,
    }

    impl SenseCeaseListener for RecordingListener {
        fn on_sense(&self, engine: &mut Engine, connector: ConnectorId) {
            self.log.borrow_mut().push(format!("sense({}) @ {}", connector.0, engine.now()));
        }
        fn on_cease(&self, engine: &mut Engine, connector: ConnectorId, sender: ConnectorId, data: Option<Rc<[u8]>>) {
            self.log.borrow_mut().push(format!(
                "cease({},{}) @ {} jam={}",
                connector.0,
                sender.0,
                engine.now(),
                data.is_none()
            ));
        }
    }

    #[test]
    fn transmit_schedules_sense_and_cease_with_propagation_delay() {
        let mut engine = Engine::new();
        let cable = Cable::new("seg0", 250.0, 1.0e7, 0.66, false).unwrap();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let a = ConnectorId(0);
        let b = ConnectorId(1);
        cable.borrow_mut().attach(a, 0.0, Rc::new(RecordingListener { log: log.clone() })).unwrap();
        cable.borrow_mut().attach(b, 250.0, Rc::new(RecordingListener { log: log.clone() })).unwrap();

        let expected_prop_delay = cable.borrow().prop_delay_ns(0.0, 250.0);
        assert!(expected_prop_delay > 0);

        cable.borrow_mut().transmit(&mut engine, a, &[0u8; 8]);
        engine.run_until(10_000);

        let events = log.borrow();
        assert!(events.iter().any(|s| s.starts_with("sense(0)") && s.contains("@ 0")));
        assert!(events
            .iter()
            .any(|s| s.starts_with("sense(1)") && s.contains(&format!("@ {expected_prop_delay}"))));
    }

    #[test]
    fn duplicate_position_rejected() {
        let cable = Cable::new("seg0", 100.0, 1.0e7, 1.0, false).unwrap();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        cable.borrow_mut().attach(ConnectorId(0), 10.0, Rc::new(RecordingListener { log: log.clone() })).unwrap();
        let result = cable.borrow_mut().attach(ConnectorId(1), 10.0, Rc::new(RecordingListener { log }));
        assert!(matches!(result, Err(SimError::DuplicatePosition(_))));
    }

    #[test]
    fn install_grid_rejects_off_grid_positions() {
        let cable = Cable::new("coax", 100.0, 1.0e7, 0.66, false).unwrap();
        cable.borrow_mut().install_grid_m = Some(2.5);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        assert!(cable
            .borrow_mut()
            .attach(ConnectorId(0), 3.0, Rc::new(RecordingListener { log: log.clone() }))
            .is_err());
        assert!(cable.borrow_mut().attach(ConnectorId(1), 2.5, Rc::new(RecordingListener { log })).is_ok());
    }

    #[test]
    fn jam_cancels_pending_cease_for_source() {
        let mut engine = Engine::new();
        let cable = Cable::new("seg0", 0.0001, 1.0e7, 1.0, false).unwrap();
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let a = ConnectorId(0);
        cable.borrow_mut().attach(a, 0.0, Rc::new(RecordingListener { log: log.clone() })).unwrap();

        cable.borrow_mut().transmit(&mut engine, a, &[0u8; 100]);
        cable.borrow_mut().jam(&mut engine, a);
        engine.run_until(1_000_000);

        let events = log.borrow();
        let ceases: Vec<_> = events.iter().filter(|s| s.starts_with("cease(0,0)")).collect();
        assert_eq!(ceases.len(), 1);
        assert!(ceases[0].contains("jam=true"));
    }
}
