//! Per-NIC L2 record and the L2 interface table (`spec.md` §3, §4.4).

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::MacAddr;
use crate::arp::ArpTable;
use crate::driver::{Duplex, L2Kind, NetDriver};
use crate::error::{NetStackError, Result};
use crate::l3::L3Ipv4Interface;

/// One enumerated NIC. Owns its L3 sub-interfaces (design note: "Cyclic
/// L2↔L3 references" — L3 is child-owned here, and reaches its parent only
/// through the non-owning `ifindex` it stores).
pub struct L2Interface {
    pub ifindex: u32,
    pub name: String,
    pub mac: MacAddr,
    pub mtu: u16,
    pub header_size: u16,
    pub is_up: bool,
    pub kind: L2Kind,
    pub arp: ArpTable,
    pub(crate) driver: Box<dyn NetDriver>,
    ipv4: Vec<L3Ipv4Interface>,
    max_ipv4: usize,
}

impl L2Interface {
    pub(crate) fn new(
        ifindex: u32,
        name: String,
        kind: L2Kind,
        driver: Box<dyn NetDriver>,
        arp_table_max: usize,
        max_ipv4: usize,
    ) -> Self {
        let mac = driver.get_mac();
        let mtu = driver.get_mtu();
        let header_size = driver.get_header_size();
        L2Interface {
            ifindex,
            name,
            mac,
            mtu,
            header_size,
            is_up: true,
            kind,
            arp: ArpTable::new(arp_table_max),
            driver,
            ipv4: Vec::new(),
            max_ipv4,
        }
    }

    pub fn speed_mbps(&self) -> u32 {
        self.driver.get_speed_mbps()
    }

    pub fn duplex(&self) -> Duplex {
        self.driver.get_duplex()
    }

    pub fn ipv4_interfaces(&self) -> &[L3Ipv4Interface] {
        &self.ipv4
    }

    pub fn ipv4_interfaces_mut(&mut self) -> &mut [L3Ipv4Interface] {
        &mut self.ipv4
    }

    pub fn ipv4_find(&self, l3_id: u32) -> Option<&L3Ipv4Interface> {
        self.ipv4.iter().find(|l3| l3.l3_id == l3_id)
    }

    pub fn ipv4_find_mut(&mut self, l3_id: u32) -> Option<&mut L3Ipv4Interface> {
        self.ipv4.iter_mut().find(|l3| l3.l3_id == l3_id)
    }

    pub(crate) fn add_ipv4(&mut self, l3: L3Ipv4Interface) -> Result<()> {
        if self.ipv4.len() >= self.max_ipv4 {
            return Err(NetStackError::Busy);
        }
        self.ipv4.push(l3);
        Ok(())
    }

    /// Any configured IPv4 address contains `target` in its subnet.
    pub fn owns_ipv4(&self, target: crate::addr::Ipv4Addr) -> bool {
        self.ipv4.iter().any(|l3| !l3.ip.is_unspecified() && l3.ip == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NetDriver;
    use crate::buffer::PacketBuffer;
    use crate::error::Result as NResult;

    struct StubDriver;
    impl NetDriver for StubDriver {
        fn init_at(&mut self, _a: u64, _i: u32) -> bool {
            true
        }
        fn allocate_packet(&self, size: usize) -> NResult<PacketBuffer> {
            PacketBuffer::alloc(size, 0, 0)
        }
        fn send_packet(&mut self, _b: &PacketBuffer) -> NResult<bool> {
            Ok(true)
        }
        fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
            None
        }
        fn handle_sent_packet(&mut self) {}
        fn get_mac(&self) -> MacAddr {
            MacAddr([1, 2, 3, 4, 5, 6])
        }
        fn get_mtu(&self) -> u16 {
            1500
        }
        fn get_header_size(&self) -> u16 {
            14
        }
        fn get_speed_mbps(&self) -> u32 {
            1000
        }
        fn get_duplex(&self) -> Duplex {
            Duplex::Full
        }
    }

    #[test]
    fn nonzero_ifindex_implies_live_driver() {
        let l2 = L2Interface::new(1, "eth0".into(), L2Kind::Eth, Box::new(StubDriver), 64, 4);
        assert_eq!(l2.ifindex, 1);
        assert_eq!(l2.mac, MacAddr([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn add_ipv4_respects_max_per_interface() {
        let mut l2 = L2Interface::new(1, "eth0".into(), L2Kind::Eth, Box::new(StubDriver), 64, 2);
        for id in 0..2 {
            l2.add_ipv4(L3Ipv4Interface::new(id, 1)).unwrap();
        }
        assert_eq!(l2.add_ipv4(L3Ipv4Interface::new(9, 1)), Err(NetStackError::Busy));
    }
}
