//! Routing table: longest-prefix match with a metric tiebreak, then
//! insertion-order tiebreak.
//!
//! A kernel's network stack typically has a single default gateway, no
//! table at all; this is built fresh in the style of the address types
//! in `addr.rs`.

use crate::addr::Ipv4Addr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub interface_name: String,
    pub metric: u32,
}

#[derive(Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable::default()
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn remove_route(&mut self, destination: Ipv4Addr, netmask: Ipv4Addr, interface_name: &str) {
        self.routes
            .retain(|r| !(r.destination == destination && r.netmask == netmask && r.interface_name == interface_name));
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Longest-prefix match among routes whose `(destination & netmask) ==
    /// (dst & netmask)`. Ties broken first by lower metric, then by
    /// earlier insertion (`self.routes` is already in insertion order, so a
    /// stable sort key of `(prefix_len desc, metric asc, index asc)` falls
    /// out of a straightforward fold).
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<(u32, u32, usize, &Route)> = None;
        for (index, route) in self.routes.iter().enumerate() {
            if route.destination.apply_mask(route.netmask) != dst.apply_mask(route.netmask) {
                continue;
            }
            let prefix_len = route.netmask.to_u32().count_ones();
            let candidate = (prefix_len, route.metric, index, route);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.0 > current.0
                        || (candidate.0 == current.0 && candidate.1 < current.1)
                        || (candidate.0 == current.0 && candidate.1 == current.1 && candidate.2 < current.2)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.map(|(_, _, _, route)| route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(prefix: u8) -> Ipv4Addr {
        crate::addr::prefix_len_to_mask(prefix).unwrap()
    }

    #[test]
    fn longest_prefix_wins_over_shorter() {
        let mut table = RoutingTable::new();
        table.add_route(Route {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            netmask: mask(8),
            gateway: None,
            interface_name: "eth0".into(),
            metric: 0,
        });
        table.add_route(Route {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            netmask: mask(24),
            gateway: None,
            interface_name: "eth1".into(),
            metric: 0,
        });

        let route = table.lookup(Ipv4Addr::new(10, 0, 0, 5)).unwrap();
        assert_eq!(route.interface_name, "eth1");
    }

    #[test]
    fn equal_prefix_ties_broken_by_metric_then_insertion_order() {
        let mut table = RoutingTable::new();
        table.add_route(Route {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            netmask: mask(24),
            gateway: None,
            interface_name: "first".into(),
            metric: 5,
        });
        table.add_route(Route {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            netmask: mask(24),
            gateway: None,
            interface_name: "second".into(),
            metric: 2,
        });
        table.add_route(Route {
            destination: Ipv4Addr::new(10, 0, 0, 0),
            netmask: mask(24),
            gateway: None,
            interface_name: "third".into(),
            metric: 2,
        });

        let route = table.lookup(Ipv4Addr::new(10, 0, 0, 9)).unwrap();
        assert_eq!(route.interface_name, "second");
    }

    #[test]
    fn no_matching_route_returns_none() {
        let table = RoutingTable::new();
        assert!(table.lookup(Ipv4Addr::new(192, 168, 1, 1)).is_none());
    }
}
