//! Static routing table: longest-prefix-match lookup, loaded once at
//! startup and read-only thereafter (no lock required).

use std::net::Ipv4Addr;

/// One static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: &'static str,
}

/// Immutable routing table.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: Vec<RouteEntry>,
}

fn to_u32(addr: Ipv4Addr) -> u32 {
    u32::from_be_bytes(addr.octets())
}

impl RoutingTable {
    pub fn new(routes: Vec<RouteEntry>) -> Self {
        Self { routes }
    }

    /// Returns the route with the longest matching prefix, breaking ties
    /// by insertion order (the first-inserted entry with the greatest
    /// mask population count wins).
    pub fn longest_prefix_match(&self, dst: Ipv4Addr) -> Option<RouteEntry> {
        let dst = to_u32(dst);
        let mut best: Option<(u32, RouteEntry)> = None;

        for route in &self.routes {
            let mask = to_u32(route.netmask);
            if dst & mask != to_u32(route.destination) & mask {
                continue;
            }
            let specificity = mask.count_ones();
            match &best {
                Some((best_specificity, _)) if *best_specificity >= specificity => {}
                _ => best = Some((specificity, *route)),
            }
        }

        best.map(|(_, route)| route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: [u8; 4], mask: [u8; 4], gw: [u8; 4], iface: &'static str) -> RouteEntry {
        RouteEntry {
            destination: Ipv4Addr::from(dest),
            netmask: Ipv4Addr::from(mask),
            gateway: Ipv4Addr::from(gw),
            interface: iface,
        }
    }

    #[test]
    fn picks_most_specific_match() {
        let table = RoutingTable::new(vec![
            route([0, 0, 0, 0], [0, 0, 0, 0], [172, 16, 0, 254], "eth2"),
            route([10, 0, 1, 0], [255, 255, 255, 0], [0, 0, 0, 0], "eth1"),
        ]);

        let r = table.longest_prefix_match(Ipv4Addr::new(10, 0, 1, 42)).unwrap();
        assert_eq!(r.interface, "eth1");

        let r = table.longest_prefix_match(Ipv4Addr::new(8, 8, 8, 8)).unwrap();
        assert_eq!(r.interface, "eth2");
    }

    #[test]
    fn no_match_returns_none() {
        let table = RoutingTable::new(vec![route(
            [10, 0, 1, 0],
            [255, 255, 255, 0],
            [0, 0, 0, 0],
            "eth1",
        )]);
        assert!(table
            .longest_prefix_match(Ipv4Addr::new(192, 168, 1, 1))
            .is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let table = RoutingTable::new(vec![
            route([10, 0, 0, 0], [255, 0, 0, 0], [0, 0, 0, 0], "first"),
            route([10, 0, 0, 0], [255, 0, 0, 0], [0, 0, 0, 0], "second"),
        ]);
        let r = table.longest_prefix_match(Ipv4Addr::new(10, 1, 1, 1)).unwrap();
        assert_eq!(r.interface, "first");
    }
}
