//! Per-interface IPv4 address record (`spec.md` §3, §4.4) and its routing
//! table entries.

extern crate alloc;

use alloc::vec::Vec;

use crate::addr::Ipv4Addr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L3Mode {
    Disabled,
    Static,
    Dhcp,
}

/// Options DHCP (or static config) writes back onto the interface:
/// resolved DNS/NTP servers, negotiated MTU, and lease bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeOpts {
    pub dns: [Ipv4Addr; 2],
    pub ntp: [Ipv4Addr; 2],
    pub mtu: u16,
    pub lease_ms: u32,
    pub t1_ms: u32,
    pub t2_ms: u32,
    pub server_ip: Ipv4Addr,
    pub xid: u32,
}

/// A routing-table entry: lower `preference` wins. `spec.md` §4.4 assigns
/// 10 to the direct-attached network route and 11 to the default route
/// via the gateway created on DHCP bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub preference: u8,
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub l3_id: u32,
}

#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    pub entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn replace_for_l3(&mut self, l3_id: u32, entries: &[RouteEntry]) {
        self.entries.retain(|e| e.l3_id != l3_id);
        self.entries.extend_from_slice(entries);
        self.entries.sort_by_key(|e| e.preference);
    }

    /// Best (lowest-preference) route whose network contains `dst`.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| dst.in_subnet(e.network, e.mask))
    }
}

#[derive(Clone, Debug)]
pub struct L3Ipv4Interface {
    pub l3_id: u32,
    pub ifindex: u32,
    pub mode: L3Mode,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gw: Ipv4Addr,
    pub is_localhost: bool,
    pub runtime_opts: RuntimeOpts,
    pub routes: RoutingTable,
    pub needs_inform: bool,
}

impl L3Ipv4Interface {
    pub fn new(l3_id: u32, ifindex: u32) -> Self {
        L3Ipv4Interface {
            l3_id,
            ifindex,
            mode: L3Mode::Disabled,
            ip: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            gw: Ipv4Addr::UNSPECIFIED,
            is_localhost: false,
            runtime_opts: RuntimeOpts::default(),
            routes: RoutingTable::default(),
            needs_inform: false,
        }
    }

    pub fn loopback(l3_id: u32, ifindex: u32) -> Self {
        let mut l3 = Self::new(l3_id, ifindex);
        l3.mode = L3Mode::Static;
        l3.ip = Ipv4Addr::LOOPBACK;
        l3.mask = Ipv4Addr::from_octets(255, 0, 0, 0);
        l3.is_localhost = true;
        l3
    }

    /// Sole mutator of IPv4 addressing (`spec.md` §4.4): called by DHCP on
    /// bind/renew/NAK and by manual static configuration. Rebuilds the
    /// interface's direct-attached and default routes.
    pub fn update(
        &mut self,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
        gw: Ipv4Addr,
        mode: L3Mode,
        runtime_opts: RuntimeOpts,
    ) {
        self.ip = ip;
        self.mask = mask;
        self.gw = gw;
        self.mode = mode;
        self.runtime_opts = runtime_opts;

        let mut entries = Vec::new();
        if !ip.is_unspecified() {
            entries.push(RouteEntry {
                preference: 10,
                network: Ipv4Addr(ip.0 & mask.0),
                mask,
                gateway: None,
                l3_id: self.l3_id,
            });
        }
        if !gw.is_unspecified() {
            entries.push(RouteEntry {
                preference: 11,
                network: Ipv4Addr::UNSPECIFIED,
                mask: Ipv4Addr::UNSPECIFIED,
                gateway: Some(gw),
                l3_id: self.l3_id,
            });
        }
        self.routes.replace_for_l3(self.l3_id, &entries);
    }

    pub fn clear(&mut self) {
        self.update(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            L3Mode::Dhcp,
            RuntimeOpts::default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_creates_direct_and_default_routes() {
        let mut l3 = L3Ipv4Interface::new(1, 1);
        l3.update(
            Ipv4Addr::from_octets(10, 0, 0, 42),
            Ipv4Addr::from_octets(255, 255, 255, 0),
            Ipv4Addr::from_octets(10, 0, 0, 1),
            L3Mode::Dhcp,
            RuntimeOpts::default(),
        );
        assert_eq!(l3.routes.entries.len(), 2);
        assert_eq!(l3.routes.entries[0].preference, 10);
        assert_eq!(l3.routes.entries[1].preference, 11);
        assert_eq!(
            l3.routes.lookup(Ipv4Addr::from_octets(10, 0, 0, 99)).unwrap().l3_id,
            1
        );
    }

    #[test]
    fn loopback_is_flagged_localhost() {
        let l3 = L3Ipv4Interface::loopback(0, 0);
        assert!(l3.is_localhost);
        assert_eq!(l3.ip, Ipv4Addr::LOOPBACK);
    }

    #[test]
    fn clear_zeroes_addressing() {
        let mut l3 = L3Ipv4Interface::new(1, 1);
        l3.update(
            Ipv4Addr::from_octets(10, 0, 0, 42),
            Ipv4Addr::from_octets(255, 255, 255, 0),
            Ipv4Addr::from_octets(10, 0, 0, 1),
            L3Mode::Dhcp,
            RuntimeOpts::default(),
        );
        l3.clear();
        assert!(l3.ip.is_unspecified());
        assert!(l3.routes.entries.is_empty());
    }
}
