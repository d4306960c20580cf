//! A named network attachment point: one NIC, one IPv4 address, and the
//! per-interface ARP cache the address-resolution layer needs.
//!
//! Generalizes a kernel's typical implicit single-interface assumption
//! (one global MAC/IP pair) into a named, repeatable unit so a `Host`
//! can own several.

use std::cell::RefCell;
use std::rc::Rc;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::arp::ArpCache;
use crate::config::DEFAULT_MTU;
use crate::engine::ConnectorId;
use crate::phy::Nic;

pub struct Interface {
    pub name: String,
    pub nic: Rc<RefCell<Nic>>,
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub hostname: String,
    pub mtu: usize,
    pub arp: ArpCache,
}

impl Interface {
    pub fn new(
        name: impl Into<String>,
        mac: MacAddr,
        ip_address: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Option<Ipv4Addr>,
        hostname: impl Into<String>,
        connector_id: ConnectorId,
    ) -> Interface {
        Interface {
            name: name.into(),
            nic: Nic::new(mac, connector_id),
            ip_address,
            netmask,
            gateway,
            hostname: hostname.into(),
            mtu: DEFAULT_MTU,
            arp: ArpCache::new(),
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.nic.borrow().mac
    }

    pub fn in_subnet(&self, ip: Ipv4Addr) -> bool {
        ip.in_subnet(self.ip_address, self.netmask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_own_mac_through_the_nic() {
        let iface = Interface::new(
            "eth0",
            MacAddr::new([1, 2, 3, 4, 5, 6]),
            Ipv4Addr::new(192, 168, 1, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            None,
            "h1",
            ConnectorId(0),
        );
        assert_eq!(iface.mac(), MacAddr::new([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn subnet_membership_matches_netmask() {
        let iface = Interface::new(
            "eth0",
            MacAddr::new([1, 2, 3, 4, 5, 6]),
            Ipv4Addr::new(192, 168, 1, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            None,
            "h1",
            ConnectorId(0),
        );
        assert!(iface.in_subnet(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!iface.in_subnet(Ipv4Addr::new(192, 168, 2, 1)));
    }
}
