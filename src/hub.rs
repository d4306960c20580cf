//! A multi-port repeater: whatever one port observes, every other port
//! replays onto its own cable.
//!
//! An OS kernel never models a shared-medium repeater at all.
//! A `Hub` has no framing or address awareness at all, unlike `Nic` in
//! `phy.rs` — it relays raw bytes at the `Cease` boundary rather than the
//! bit level, which is an approximation: other segments only see carrier
//! once the source segment's own transmission has fully completed, not at
//! the instant the source's own `Sense` fires. A true bit-accurate repeater
//! would need to model partial-transmission streaming, which nothing else
//! in this crate does either.

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{ConnectorId, Engine};
use crate::error::SimResult;
use crate::medium::{Cable, Connector, SenseCeaseListener};

pub struct Hub {
    ports: Vec<Connector>,
}

struct HubPortListener {
    hub: Rc<RefCell<Hub>>,
}

impl SenseCeaseListener for HubPortListener {
    fn on_sense(&self, _engine: &mut Engine, _connector: ConnectorId) {
        // A hub has nothing to do on its own carrier sense: it only acts
        // once a transmission actually completes (see on_cease).
    }

    fn on_cease(&self, engine: &mut Engine, connector: ConnectorId, sender: ConnectorId, data: Option<Rc<[u8]>>) {
        if connector != sender {
            return;
        }
        Hub::relay(&self.hub, engine, connector, data);
    }
}

impl Hub {
    pub fn new(num_ports: usize, engine: &mut Engine) -> Rc<RefCell<Hub>> {
        let ports = (0..num_ports).map(|_| Connector::new(ConnectorId(engine.next_object_id()))).collect();
        Rc::new(RefCell::new(Hub { ports }))
    }

    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    pub fn connector_id(&self, port: usize) -> ConnectorId {
        self.ports[port].id
    }

    pub fn attach(hub: &Rc<RefCell<Hub>>, port: usize, cable: &Rc<RefCell<Cable>>, position_m: f64) -> SimResult<()> {
        let id = hub.borrow().ports[port].id;
        let listener: Rc<dyn SenseCeaseListener> = Rc::new(HubPortListener { hub: Rc::clone(hub) });
        cable.borrow_mut().attach(id, position_m, listener)?;
        hub.borrow_mut().ports[port].cable = Some(Rc::clone(cable));
        Ok(())
    }

    fn relay(hub: &Rc<RefCell<Hub>>, engine: &mut Engine, arrival_port: ConnectorId, data: Option<Rc<[u8]>>) {
        let others: Vec<usize> = hub
            .borrow()
            .ports
            .iter()
            .enumerate()
            .filter(|(_, c)| c.id != arrival_port && c.is_attached())
            .map(|(i, _)| i)
            .collect();

        for idx in others {
            let (id, cable) = {
                let port = &hub.borrow().ports[idx];
                (port.id, port.cable.clone())
            };
            let Some(cable) = cable else { continue };
            match &data {
                Some(bytes) => {
                    cable.borrow_mut().transmit(engine, id, bytes);
                }
                None => {
                    cable.borrow_mut().jam(engine, id);
                }
            }
        }
    }
}
