//! A named network node: a set of interfaces, a routing table, and the
//! IPv4 state machine tying them together.
//!
//! Generalizes a kernel's typical process-wide network state (one ARP
//! cache, one IP address, one send path) into an explicitly-owned,
//! multi-interface unit so a simulation can wire up several hosts, a
//! router with two interfaces, or anything in between.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::NODAL_PROCESSING_DELAY_NS;
use crate::engine::{ConnectorId, Engine};
use crate::error::SimResult;
use crate::interface::Interface;
use crate::ip::engine::Ipv4Engine;
use crate::ip::packet::PROTO_TCP;
use crate::ip::route::{Route, RoutingTable};
use crate::medium::Cable;
use crate::phy::{Nic, NicOwner};

pub struct Host {
    pub hostname: String,
    pub interfaces: HashMap<String, Rc<RefCell<Interface>>>,
    pub routing_table: RoutingTable,
    pub ipv4: Ipv4Engine,
    pub nodal_processing_delay_ns: u64,
}

/// Bridges a `Nic`'s upward notifications to the interface-named `Ipv4Engine`
/// entry points; carries no state of its own beyond which interface it
/// speaks for.
struct HostInterfaceOwner {
    host: Rc<RefCell<Host>>,
    interface_name: String,
}

impl NicOwner for HostInterfaceOwner {
    fn on_data_received(&self, engine: &mut Engine, payload: &[u8], ether_type: u16) {
        Ipv4Engine::on_input(&self.host, engine, &self.interface_name, payload, ether_type);
    }
    fn on_send_fifo_empty(&self, engine: &mut Engine) {
        Ipv4Engine::on_available_to_send(&self.host, engine, &self.interface_name);
    }
}

impl Host {
    pub fn new(hostname: impl Into<String>) -> Rc<RefCell<Host>> {
        Rc::new(RefCell::new(Host {
            hostname: hostname.into(),
            interfaces: HashMap::new(),
            routing_table: RoutingTable::new(),
            ipv4: Ipv4Engine::new(),
            nodal_processing_delay_ns: NODAL_PROCESSING_DELAY_NS,
        }))
    }

    /// Build and wire a new interface, registering its `Nic`'s owner so
    /// incoming frames reach this host's `Ipv4Engine`.
    pub fn add_interface(
        host: &Rc<RefCell<Host>>,
        engine: &mut Engine,
        name: impl Into<String>,
        mac: MacAddr,
        ip_address: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
    ) -> Rc<RefCell<Interface>> {
        let name = name.into();
        let hostname = host.borrow().hostname.clone();
        let connector_id = ConnectorId(engine.next_object_id());
        let interface = Rc::new(RefCell::new(Interface::new(
            name.clone(), mac, ip_address, netmask, gateway, hostname, connector_id,
        )));

        let owner: Rc<dyn NicOwner> = Rc::new(HostInterfaceOwner { host: Rc::clone(host), interface_name: name.clone() });
        interface.borrow().nic.borrow_mut().set_owner(owner);

        host.borrow_mut().interfaces.insert(name, Rc::clone(&interface));
        interface
    }

    pub fn attach_interface(host: &Rc<RefCell<Host>>, name: &str, cable: &Rc<RefCell<Cable>>, position_m: f64) -> SimResult<()> {
        let interface = host.borrow().interfaces.get(name).cloned();
        let Some(interface) = interface else {
            return Err(crate::error::SimError::NoSuchInterface(name.to_string()));
        };
        let nic = interface.borrow().nic.clone();
        Nic::attach(&nic, cable, position_m)
    }

    pub fn add_route(&mut self, route: Route) {
        self.routing_table.add_route(route);
    }

    pub fn remove_route(&mut self, destination: Ipv4Addr, netmask: Ipv4Addr, interface_name: &str) {
        self.routing_table.remove_route(destination, netmask, interface_name);
    }

    /// Send an application payload out `interface_name` toward `dst_ip`.
    /// There is no transport layer above IP in this simulator, so every
    /// originated packet is stamped TCP; real segment framing is out of
    /// scope.
    pub fn output(host: &Rc<RefCell<Host>>, engine: &mut Engine, interface_name: &str, dst_ip: Ipv4Addr, bytes: &[u8]) {
        Ipv4Engine::output(host, engine, interface_name, dst_ip, bytes, PROTO_TCP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::route::Route;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, last])
    }

    fn wire_pair(engine: &mut Engine) -> (Rc<RefCell<Host>>, Rc<RefCell<Host>>) {
        let host_a = Host::new("a");
        let host_b = Host::new("b");
        Host::add_interface(&host_a, engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
        Host::add_interface(&host_b, engine, "eth0", mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(255, 255, 255, 0), None);

        let cable = Cable::new("seg0", 10.0, 1.0e7, 1.0, false).unwrap();
        Host::attach_interface(&host_a, "eth0", &cable, 0.0).unwrap();
        Host::attach_interface(&host_b, "eth0", &cable, 10.0).unwrap();
        (host_a, host_b)
    }

    #[test]
    fn direct_send_resolves_arp_then_delivers() {
        let mut engine = Engine::new();
        let (host_a, host_b) = wire_pair(&mut engine);

        Host::output(&host_a, &mut engine, "eth0", Ipv4Addr::new(10, 0, 0, 2), b"hello");
        engine.run_until(10_000_000);

        let mac_a = host_a.borrow().interfaces["eth0"].borrow().mac();
        assert_eq!(host_b.borrow().interfaces["eth0"].borrow().arp.lookup(engine.now(), Ipv4Addr::new(10, 0, 0, 1)), Some(mac_a));
    }

    #[test]
    fn unreachable_destination_without_a_route_is_silently_dropped_locally_but_does_not_panic() {
        let mut engine = Engine::new();
        let host = Host::new("solo");
        Host::add_interface(&host, &mut engine, "eth0", mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), None);
        let cable = Cable::new("seg0", 10.0, 1.0e7, 1.0, false).unwrap();
        Host::attach_interface(&host, "eth0", &cable, 0.0).unwrap();

        // Destination off-subnet with no gateway configured: output() logs
        // a warning and drops rather than panicking.
        Host::output(&host, &mut engine, "eth0", Ipv4Addr::new(192, 168, 1, 1), b"x");
        engine.run_until(1_000_000);
    }

    #[test]
    fn routing_table_accepts_a_manually_added_route() {
        let host = Host::new("router");
        host.borrow_mut().add_route(Route {
            destination: Ipv4Addr::new(172, 16, 0, 0),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
            gateway: None,
            interface_name: "eth1".into(),
            metric: 1,
        });
        assert!(host.borrow().routing_table.lookup(Ipv4Addr::new(172, 16, 5, 9)).is_some());
    }
}
