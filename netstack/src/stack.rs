//! The `Stack` root object (`spec.md` §4.4, design note "replace global
//! state with an instance"): one process-wide table of L2 interfaces,
//! each owning its L3 sub-interfaces and ARP table, plus the shared
//! socket table, DNS cache, mDNS registry, DHCP state per L3, and NTP
//! peer set. Everything here is synchronous and non-blocking; the
//! daemon loops in `netstackd` own scheduling and call these methods
//! from their single-threaded cooperative tasks.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::{Endpoint, IpAddr, MacAddr};
use crate::addr::Ipv4Addr;
use crate::arp::ArpPacket;
use crate::config::StackConfig;
use crate::dhcp::DhcpState;
use crate::dns::Cache as DnsCache;
use crate::driver::{NetDriver, NicSlot};
use crate::error::{NetStackError, Result};
use crate::eth::EthHeader;
use crate::icmp::PingTable;
use crate::ipv4::{Ipv4Header, TxScope};
use crate::l2::L2Interface;
use crate::l3::{L3Ipv4Interface, L3Mode};
use crate::mdns::MdnsService;
use crate::ntp::{ClockState, NtpPeer};
use crate::udp::{BindSpec, SocketTable};

pub struct Stack {
    pub config: StackConfig,
    l2: Vec<L2Interface>,
    next_l3_id: u32,
    next_ip_id: u16,
    pub sockets: SocketTable,
    pub dns_cache: DnsCache,
    pub mdns: MdnsService,
    pub dhcp_states: BTreeMap<u32, DhcpState>,
    pub ntp_peers: Vec<NtpPeer>,
    pub clock: ClockState,
    pub icmp_pings: PingTable,
    pub host_name: String,
}

impl Stack {
    pub fn new(config: StackConfig, host_name: String) -> Self {
        Stack {
            dns_cache: DnsCache::new(config.dns_cache_max),
            sockets: SocketTable::new(64),
            mdns: MdnsService::new(),
            dhcp_states: BTreeMap::new(),
            ntp_peers: Vec::new(),
            clock: ClockState::new(),
            icmp_pings: PingTable::new(),
            l2: Vec::new(),
            next_l3_id: 1,
            next_ip_id: 1,
            host_name,
            config,
        }
    }

    /// Adopt bus-enumerated NICs, replacing whatever was previously
    /// registered. Always yields at least the loopback slot (the bus
    /// guarantees that).
    pub fn adopt_nics(&mut self, slots: Vec<NicSlot>) {
        self.l2.clear();
        for (ifindex, slot) in slots.into_iter().enumerate() {
            let mut l2 = L2Interface::new(
                ifindex as u32,
                slot.name,
                slot.kind,
                slot.driver,
                self.config.arp_table_max,
                self.config.max_ipv4_per_interface,
            );
            if matches!(slot.kind, crate::driver::L2Kind::Loopback) {
                let l3_id = self.next_l3_id;
                self.next_l3_id += 1;
                let _ = l2.add_ipv4(L3Ipv4Interface::loopback(l3_id, l2.ifindex));
            }
            self.l2.push(l2);
        }
    }

    pub fn l2_interface_count(&self) -> usize {
        self.l2.len()
    }

    pub fn l2_interface_at(&self, i: usize) -> Option<&L2Interface> {
        self.l2.get(i)
    }

    pub fn l2_interface_at_mut(&mut self, i: usize) -> Option<&mut L2Interface> {
        self.l2.get_mut(i)
    }

    pub fn l2_interface_find_by_index(&self, ifindex: u32) -> Option<&L2Interface> {
        self.l2.iter().find(|l2| l2.ifindex == ifindex)
    }

    pub fn l2_interface_find_by_index_mut(&mut self, ifindex: u32) -> Option<&mut L2Interface> {
        self.l2.iter_mut().find(|l2| l2.ifindex == ifindex)
    }

    /// Allocate a new L3 sub-interface on `ifindex` and return its id.
    pub fn l3_ipv4_attach(&mut self, ifindex: u32, mode: L3Mode) -> Result<u32> {
        let l3_id = self.next_l3_id;
        let l2 = self
            .l2_interface_find_by_index_mut(ifindex)
            .ok_or(NetStackError::NotFound)?;
        let mut l3 = L3Ipv4Interface::new(l3_id, ifindex);
        l3.mode = mode;
        l2.add_ipv4(l3)?;
        self.next_l3_id += 1;
        Ok(l3_id)
    }

    pub fn l3_ipv4_find_by_id(&self, id: u32) -> Option<&L3Ipv4Interface> {
        self.l2.iter().find_map(|l2| l2.ipv4_find(id))
    }

    pub fn l3_ipv4_find_by_id_mut(&mut self, id: u32) -> Option<&mut L3Ipv4Interface> {
        self.l2.iter_mut().find_map(|l2| l2.ipv4_find_mut(id))
    }

    pub fn l3_ipv4_find_by_ip(&self, ip: Ipv4Addr) -> Option<&L3Ipv4Interface> {
        self.l2.iter().flat_map(|l2| l2.ipv4_interfaces()).find(|l3| l3.ip == ip)
    }

    /// The sole mutator of IPv4 addressing (`spec.md` §4.4).
    pub fn l3_ipv4_update(
        &mut self,
        id: u32,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
        gw: Ipv4Addr,
        mode: L3Mode,
        runtime_opts: crate::l3::RuntimeOpts,
    ) -> Result<()> {
        let l3 = self.l3_ipv4_find_by_id_mut(id).ok_or(NetStackError::NotFound)?;
        l3.update(ip, mask, gw, mode, runtime_opts);
        Ok(())
    }

    /// All configured (non-disabled) L3 interfaces across every L2,
    /// for tx-scope selection and DHCP/NTP inventory reconciliation.
    pub fn all_ipv4_interfaces(&self) -> impl Iterator<Item = &L3Ipv4Interface> {
        self.l2.iter().flat_map(|l2| l2.ipv4_interfaces())
    }

    /// Age every L2's ARP table by `delta_ms`; called by the ARP daemon
    /// every 10s.
    pub fn arp_tick_all(&mut self, delta_ms: u64) {
        for l2 in self.l2.iter_mut() {
            l2.arp.tick(delta_ms);
        }
    }

    /// Process an inbound ARP packet on `ifindex`, replying if this
    /// interface owns the target IP.
    pub fn arp_input(&mut self, ifindex: u32, pkt: &ArpPacket) -> Option<(ArpPacket, [u8; 6])> {
        let l2 = self.l2_interface_find_by_index_mut(ifindex)?;
        let mac = l2.mac;
        let owned_ip = l2
            .ipv4_interfaces()
            .iter()
            .find(|l3| l3.ip == pkt.target_ip)
            .map(|l3| l3.ip);
        let reply = owned_ip.and_then(|ip| l2.arp.input(ip, mac, pkt));
        reply.map(|r| (r, mac.0))
    }

    pub fn dhcp_reconcile(&mut self, chaddr_seed: u64) {
        let active: alloc::collections::BTreeSet<u32> = self
            .all_ipv4_interfaces()
            .filter(|l3| matches!(l3.mode, L3Mode::Dhcp) && !l3.is_localhost)
            .map(|l3| l3.l3_id)
            .collect();
        self.dhcp_states.retain(|id, _| active.contains(id));
        for l3_id in active {
            self.dhcp_states.entry(l3_id).or_insert_with(|| {
                let mac = self
                    .l3_ipv4_find_by_id(l3_id)
                    .and_then(|l3| self.l2_interface_find_by_index(l3.ifindex))
                    .map(|l2| l2.mac)
                    .unwrap_or(crate::addr::MacAddr::ZERO);
                DhcpState::new(mac, chaddr_seed ^ l3_id as u64)
            });
        }
    }

    // --- Dispatch loop (spec.md §4.3) -------------------------------------
    //
    // `L2Interface::driver` is crate-private, so the RX/TX glue that
    // touches it has to live here rather than in the `netstackd` daemon
    // layer; the daemons just call `net_task_step` on a timer.

    /// Pop at most one inbound frame from every L2 interface's driver and
    /// dispatch it. Returns whether any interface had work, so the caller
    /// (`net_task`) knows whether to sleep before polling again.
    pub fn net_task_step(&mut self, now_ms: u64) -> bool {
        let mut did_work = false;
        for i in 0..self.l2.len() {
            let Some(buf) = self.l2[i].driver.handle_receive_packet() else {
                continue;
            };
            let frame = buf.to_vec();
            buf.unref();
            let ifindex = self.l2[i].ifindex;
            self.eth_input(ifindex, &frame, now_ms);
            did_work = true;
        }
        did_work
    }

    fn eth_input(&mut self, ifindex: u32, frame: &[u8], now_ms: u64) {
        let Ok((hdr, payload)) = EthHeader::parse(frame) else {
            return;
        };
        match hdr.ethertype {
            crate::eth::ETHERTYPE_ARP => {
                let Ok(pkt) = ArpPacket::parse(payload) else {
                    return;
                };
                if let Some((reply, _our_mac)) = self.arp_input(ifindex, &pkt) {
                    let mut buf = [0u8; crate::arp::HEADER_LEN];
                    if reply.write(&mut buf).is_ok() {
                        let _ = self.send_eth_frame(ifindex, reply.target_mac, crate::eth::ETHERTYPE_ARP, &buf);
                    }
                }
            }
            crate::eth::ETHERTYPE_IPV4 => self.ipv4_input(payload, now_ms),
            _ => {} // IPv6/VLAN: out of scope, dropped silently.
        }
    }

    fn ipv4_input(&mut self, data: &[u8], now_ms: u64) {
        let Ok((hdr, l4)) = Ipv4Header::parse(data) else {
            return;
        };
        if hdr.is_fragment() {
            return; // reassembly is out of scope; drop.
        }
        match hdr.protocol {
            crate::ipv4::PROTO_ICMP => self.icmp_input(hdr.src, hdr.dst, l4, now_ms),
            crate::ipv4::PROTO_UDP => self.udp_input(hdr.src, hdr.dst, l4),
            _ => {}
        }
    }

    fn icmp_input(&mut self, src: Ipv4Addr, dst: Ipv4Addr, data: &[u8], now_ms: u64) {
        let Ok((hdr, body)) = crate::icmp::IcmpHeader::parse(data) else {
            return;
        };
        match hdr.icmp_type {
            crate::icmp::TYPE_ECHO_REQUEST => {
                if self.l3_ipv4_find_by_ip(dst).is_some() {
                    let reply = crate::icmp::echo_reply_for(body, hdr.id, hdr.seq);
                    let _ = self.send_ipv4(TxScope::Unbound, src, crate::ipv4::PROTO_ICMP, 64, &reply);
                }
            }
            crate::icmp::TYPE_ECHO_REPLY => {
                self.icmp_pings.complete_echo_reply(src, hdr.id, hdr.seq);
            }
            t => {
                if let Some(status) = crate::icmp::translate_status(t, hdr.code) {
                    if let Ok((_orig_hdr, orig_l4)) = Ipv4Header::parse(body) {
                        if orig_l4.len() >= 8 {
                            let orig_id = u16::from_be_bytes([orig_l4[4], orig_l4[5]]);
                            let orig_seq = u16::from_be_bytes([orig_l4[6], orig_l4[7]]);
                            self.icmp_pings.complete_error(src, orig_id, orig_seq, status);
                        }
                    }
                }
            }
        }
        let _ = now_ms;
    }

    fn udp_input(&mut self, src: Ipv4Addr, dst: Ipv4Addr, data: &[u8]) {
        if !crate::udp::verify_checksum(src, dst, data) {
            return;
        }
        let Ok((hdr, body)) = crate::udp::UdpHeader::parse(data) else {
            return;
        };
        let scope = self
            .l3_ipv4_find_by_ip(dst)
            .map(|l3| BindSpec::BoundL3(l3.l3_id))
            .unwrap_or(BindSpec::Unbound);
        let from = Endpoint::v4(src, hdr.src_port);
        let _ = self.sockets.deliver(scope, hdr.dst_port, from, body.to_vec());
    }

    /// Build and transmit an IPv4 datagram, resolving the next hop's MAC
    /// non-blockingly against the egress interface's ARP table. Returns
    /// `Busy` (not an error in the blocking sense) if the MAC isn't
    /// resolved yet or the driver's TX ring is full; callers that need a
    /// blocking send drive ARP resolution (`arp::PendingResolve`) and
    /// retry from the daemon layer, per `spec.md` §4.5/§5.
    pub fn send_ipv4(&mut self, scope: TxScope, dst: Ipv4Addr, protocol: u8, ttl: u8, payload: &[u8]) -> Result<()> {
        let (ifindex, src_ip, hop) = {
            let l3 = match scope {
                TxScope::Unbound => {
                    crate::ipv4::select_unbound(self.all_ipv4_interfaces(), dst).ok_or(NetStackError::NotFound)?
                }
                TxScope::BoundL3(id) => self.l3_ipv4_find_by_id(id).ok_or(NetStackError::NotFound)?,
            };
            (l3.ifindex, l3.ip, crate::ipv4::next_hop(l3, dst))
        };
        let dst_mac = if dst.is_broadcast() || hop.is_broadcast() {
            MacAddr::BROADCAST
        } else if is_multicast(dst) {
            multicast_mac(dst)
        } else {
            let l2 = self.l2_interface_find_by_index(ifindex).ok_or(NetStackError::NotFound)?;
            l2.arp.get(hop).ok_or(NetStackError::Busy)?
        };
        let id = self.next_ip_id;
        self.next_ip_id = self.next_ip_id.wrapping_add(1);
        let packet = Ipv4Header::write_with_payload(id, protocol, ttl, src_ip, dst, false, payload)?;
        self.send_eth_frame(ifindex, dst_mac, crate::eth::ETHERTYPE_IPV4, &packet)
    }

    fn send_eth_frame(&mut self, ifindex: u32, dst_mac: MacAddr, ethertype: u16, body: &[u8]) -> Result<()> {
        let l2 = self.l2_interface_find_by_index_mut(ifindex).ok_or(NetStackError::NotFound)?;
        let total = crate::eth::HEADER_LEN + body.len();
        let buf = l2.driver.allocate_packet(total)?;
        let hdr = EthHeader { dst: dst_mac, src: l2.mac, ethertype };
        buf.with_data_mut(|d| {
            let _ = hdr.write(&mut d[..crate::eth::HEADER_LEN]);
            d[crate::eth::HEADER_LEN..].copy_from_slice(body);
        });
        match l2.driver.send_packet(&buf) {
            Ok(true) => Ok(()),
            Ok(false) => Err(NetStackError::Busy),
            Err(e) => Err(e),
        }
    }

    /// Start a ping: allocate a rendezvous slot and send the echo request.
    /// The daemon-side `icmp_ping` polls [`Self::icmp_ping_poll`] until a
    /// result lands or its own timeout elapses.
    pub fn icmp_ping_start(&mut self, dst: Ipv4Addr, id: u16, seq: u16, now_ms: u64, ttl: u8) -> Result<usize> {
        let slot = self.icmp_pings.alloc(dst, id, seq, now_ms)?;
        let payload = crate::icmp::build_echo(crate::icmp::TYPE_ECHO_REQUEST, id, seq, &[0u8; 32]);
        if let Err(e) = self.send_ipv4(TxScope::Unbound, dst, crate::ipv4::PROTO_ICMP, ttl, &payload) {
            self.icmp_pings.free(slot);
            return Err(e);
        }
        Ok(slot)
    }

    pub fn icmp_ping_poll(&self, slot: usize) -> Option<crate::icmp::PingStatus> {
        self.icmp_pings.result(slot)
    }

    pub fn icmp_ping_elapsed_ms(&self, slot: usize, now_ms: u64) -> u64 {
        self.icmp_pings.elapsed_ms(slot, now_ms)
    }

    pub fn icmp_ping_free(&mut self, slot: usize) {
        self.icmp_pings.free(slot)
    }

    /// Send an ARP request for `target_ip` out `ifindex`. The caller (the
    /// ARP daemon's blocking `resolve_on` wrapper) drives this from
    /// [`crate::arp::PendingResolve::poll`]'s `SendRequest` outcome.
    pub fn arp_send_request(&mut self, ifindex: u32, target_ip: Ipv4Addr) -> Result<()> {
        let l2 = self.l2_interface_find_by_index(ifindex).ok_or(NetStackError::NotFound)?;
        let our_mac = l2.mac;
        let our_ip = l2
            .ipv4_interfaces()
            .iter()
            .find(|l3| !l3.ip.is_unspecified())
            .map(|l3| l3.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let req = ArpPacket {
            opcode: crate::arp::OPCODE_REQUEST,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        };
        let mut buf = [0u8; crate::arp::HEADER_LEN];
        req.write(&mut buf)?;
        self.send_eth_frame(ifindex, MacAddr::BROADCAST, crate::eth::ETHERTYPE_ARP, &buf)
    }

    /// Build and send a UDP datagram from an already-bound socket,
    /// selecting the source address from the socket's bind scope.
    pub fn udp_send_to(&mut self, socket_id: u32, to: Endpoint, payload: &[u8]) -> Result<()> {
        let IpAddr::V4(dst_ip) = to.addr else {
            return Err(NetStackError::InvalidArgument);
        };
        let (bind, src_port) = {
            let sock = self.sockets.get_mut(socket_id).ok_or(NetStackError::NotFound)?;
            (sock.bind, sock.port)
        };
        let (tx_scope, src_ip) = match bind {
            BindSpec::Unbound => {
                let src_ip = crate::ipv4::select_unbound(self.all_ipv4_interfaces(), dst_ip)
                    .map(|l3| l3.ip)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                (TxScope::Unbound, src_ip)
            }
            BindSpec::BoundL3(id) => {
                let src_ip = self.l3_ipv4_find_by_id(id).map(|l3| l3.ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
                (TxScope::BoundL3(id), src_ip)
            }
        };
        let datagram = crate::udp::build_datagram(src_ip, dst_ip, src_port, to.port, payload);
        self.send_ipv4(tx_scope, dst_ip, crate::ipv4::PROTO_UDP, 64, &datagram)
    }
}

/// 224.0.0.0/4.
fn is_multicast(ip: Ipv4Addr) -> bool {
    ip.0 & 0xF000_0000 == 0xE000_0000
}

/// Standard IPv4-to-Ethernet multicast mapping (RFC 1112): `01:00:5e` plus
/// the low 23 bits of the group address, used for mDNS transmit.
fn multicast_mac(ip: Ipv4Addr) -> MacAddr {
    let o = ip.octets();
    MacAddr([0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PacketBuffer;
    use crate::driver::{Duplex, L2Kind};

    struct StubDriver;
    impl NetDriver for StubDriver {
        fn init_at(&mut self, _a: u64, _i: u32) -> bool {
            true
        }
        fn allocate_packet(&self, size: usize) -> Result<PacketBuffer> {
            PacketBuffer::alloc(size, 0, 0)
        }
        fn send_packet(&mut self, _b: &PacketBuffer) -> Result<bool> {
            Ok(true)
        }
        fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
            None
        }
        fn handle_sent_packet(&mut self) {}
        fn get_mac(&self) -> crate::addr::MacAddr {
            crate::addr::MacAddr([1, 2, 3, 4, 5, 6])
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

    fn slot(name: &str, kind: L2Kind) -> NicSlot {
        NicSlot {
            name: String::from(name),
            kind,
            driver: Box::new(StubDriver),
        }
    }

    #[test]
    fn adopt_nics_seeds_loopback_l3() {
        let mut stack = Stack::new(StackConfig::default(), String::from("redactedos-00000001.local"));
        stack.adopt_nics(alloc::vec![slot("eth0", L2Kind::Eth), slot("lo0", L2Kind::Loopback)]);
        assert_eq!(stack.l2_interface_count(), 2);
        let lo = stack.l2_interface_find_by_index(1).unwrap();
        assert_eq!(lo.ipv4_interfaces().len(), 1);
        assert_eq!(lo.ipv4_interfaces()[0].ip, Ipv4Addr::LOOPBACK);
    }

    #[test]
    fn l3_update_is_the_sole_mutator_and_visible_by_id() {
        let mut stack = Stack::new(StackConfig::default(), String::from("redactedos-00000002.local"));
        stack.adopt_nics(alloc::vec![slot("eth0", L2Kind::Eth)]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Dhcp).unwrap();
        stack
            .l3_ipv4_update(
                l3_id,
                Ipv4Addr::from_octets(10, 0, 0, 5),
                Ipv4Addr::from_octets(255, 255, 255, 0),
                Ipv4Addr::from_octets(10, 0, 0, 1),
                L3Mode::Dhcp,
                Default::default(),
            )
            .unwrap();
        assert_eq!(stack.l3_ipv4_find_by_id(l3_id).unwrap().ip, Ipv4Addr::from_octets(10, 0, 0, 5));
        assert_eq!(
            stack.l3_ipv4_find_by_ip(Ipv4Addr::from_octets(10, 0, 0, 5)).unwrap().l3_id,
            l3_id
        );
    }

    #[test]
    fn dhcp_reconcile_adds_and_removes_entries() {
        let mut stack = Stack::new(StackConfig::default(), String::from("redactedos-00000003.local"));
        stack.adopt_nics(alloc::vec![slot("eth0", L2Kind::Eth)]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Dhcp).unwrap();
        stack.dhcp_reconcile(1);
        assert!(stack.dhcp_states.contains_key(&l3_id));

        stack.l3_ipv4_update(l3_id, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, L3Mode::Disabled, Default::default()).unwrap();
        stack.dhcp_reconcile(1);
        assert!(!stack.dhcp_states.contains_key(&l3_id));
    }

    // --- Dispatch loop tests -----------------------------------------

    use alloc::rc::Rc;
    use core::cell::RefCell;

    /// A driver with a queued inbound buffer and a capture of everything
    /// submitted for transmission, for exercising `net_task_step`/`send_ipv4`.
    struct RecordingDriver {
        mac: crate::addr::MacAddr,
        rx: Rc<RefCell<Vec<PacketBuffer>>>,
        tx: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl NetDriver for RecordingDriver {
        fn init_at(&mut self, _a: u64, _i: u32) -> bool {
            true
        }
        fn allocate_packet(&self, size: usize) -> Result<PacketBuffer> {
            PacketBuffer::alloc(size, 0, 0)
        }
        fn send_packet(&mut self, b: &PacketBuffer) -> Result<bool> {
            self.tx.borrow_mut().push(b.to_vec());
            Ok(true)
        }
        fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
            self.rx.borrow_mut().pop()
        }
        fn handle_sent_packet(&mut self) {}
        fn get_mac(&self) -> crate::addr::MacAddr {
            self.mac
        }
        fn get_mtu(&self) -> u16 {
            1500
        }
        fn get_header_size(&self) -> u16 {
            0
        }
        fn get_speed_mbps(&self) -> u32 {
            1000
        }
        fn get_duplex(&self) -> Duplex {
            Duplex::Full
        }
    }

    fn recording_stack(
        mac: [u8; 6],
    ) -> (Stack, Rc<RefCell<Vec<PacketBuffer>>>, Rc<RefCell<Vec<Vec<u8>>>>) {
        let rx = Rc::new(RefCell::new(Vec::new()));
        let tx = Rc::new(RefCell::new(Vec::new()));
        let driver = RecordingDriver {
            mac: crate::addr::MacAddr(mac),
            rx: Rc::clone(&rx),
            tx: Rc::clone(&tx),
        };
        let mut stack = Stack::new(StackConfig::default(), String::from("host.local"));
        stack.adopt_nics(alloc::vec![NicSlot {
            name: String::from("eth0"),
            kind: L2Kind::Eth,
            driver: Box::new(driver),
        }]);
        (stack, rx, tx)
    }

    fn eth_frame(dst: crate::addr::MacAddr, src: crate::addr::MacAddr, ethertype: u16, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&dst.0);
        frame.extend_from_slice(&src.0);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn net_task_step_replies_to_arp_request_for_owned_ip() {
        let (mut stack, rx, tx) = recording_stack([2; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        let my_ip = Ipv4Addr::from_octets(10, 0, 0, 5);
        stack
            .l3_ipv4_update(l3_id, my_ip, Ipv4Addr::from_octets(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED, L3Mode::Static, Default::default())
            .unwrap();

        let peer_mac = crate::addr::MacAddr([9; 6]);
        let req = ArpPacket {
            opcode: crate::arp::OPCODE_REQUEST,
            sender_mac: peer_mac,
            sender_ip: Ipv4Addr::from_octets(10, 0, 0, 9),
            target_mac: crate::addr::MacAddr::ZERO,
            target_ip: my_ip,
        };
        let mut arp_bytes = [0u8; crate::arp::HEADER_LEN];
        req.write(&mut arp_bytes).unwrap();
        let frame = eth_frame(crate::addr::MacAddr::BROADCAST, peer_mac, crate::eth::ETHERTYPE_ARP, &arp_bytes);
        rx.borrow_mut().push(PacketBuffer::wrap(frame));

        assert!(stack.net_task_step(0));
        let sent = tx.borrow();
        assert_eq!(sent.len(), 1);
        let (eth_hdr, arp_payload) = EthHeader::parse(&sent[0]).unwrap();
        assert_eq!(eth_hdr.ethertype, crate::eth::ETHERTYPE_ARP);
        assert_eq!(eth_hdr.dst, peer_mac);
        let reply = ArpPacket::parse(arp_payload).unwrap();
        assert_eq!(reply.opcode, crate::arp::OPCODE_REPLY);
        assert_eq!(reply.sender_ip, my_ip);
    }

    #[test]
    fn send_ipv4_without_arp_entry_is_busy() {
        let (mut stack, _rx, _tx) = recording_stack([3; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        stack
            .l3_ipv4_update(
                l3_id,
                Ipv4Addr::from_octets(10, 0, 0, 5),
                Ipv4Addr::from_octets(255, 255, 255, 0),
                Ipv4Addr::UNSPECIFIED,
                L3Mode::Static,
                Default::default(),
            )
            .unwrap();

        let result = stack.send_ipv4(TxScope::Unbound, Ipv4Addr::from_octets(10, 0, 0, 9), crate::ipv4::PROTO_ICMP, 64, &[1, 2, 3]);
        assert_eq!(result, Err(NetStackError::Busy));
    }

    #[test]
    fn icmp_ping_completes_on_matching_echo_reply() {
        let (mut stack, rx, tx) = recording_stack([4; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        let my_ip = Ipv4Addr::from_octets(10, 0, 0, 5);
        let peer_ip = Ipv4Addr::from_octets(10, 0, 0, 9);
        let peer_mac = crate::addr::MacAddr([9; 6]);
        stack
            .l3_ipv4_update(l3_id, my_ip, Ipv4Addr::from_octets(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED, L3Mode::Static, Default::default())
            .unwrap();
        stack.l2_interface_find_by_index_mut(0).unwrap().arp.put(peer_ip, peer_mac, 60_000, true).unwrap();

        let slot = stack.icmp_ping_start(peer_ip, 77, 1, 0, 64).unwrap();
        assert_eq!(tx.borrow().len(), 1);
        assert_eq!(stack.icmp_ping_poll(slot), None);

        let reply_icmp = crate::icmp::build_echo(crate::icmp::TYPE_ECHO_REPLY, 77, 1, &[0u8; 32]);
        let ip_pkt = Ipv4Header::write_with_payload(1, crate::ipv4::PROTO_ICMP, 64, peer_ip, my_ip, false, &reply_icmp).unwrap();
        let my_mac = stack.l2_interface_at(0).unwrap().mac;
        let frame = eth_frame(my_mac, peer_mac, crate::eth::ETHERTYPE_IPV4, &ip_pkt);
        rx.borrow_mut().push(PacketBuffer::wrap(frame));

        assert!(stack.net_task_step(100));
        assert_eq!(stack.icmp_ping_poll(slot), Some(crate::icmp::PingStatus::Ok));
    }

    #[test]
    fn udp_datagram_is_delivered_to_bound_socket() {
        let (mut stack, rx, _tx) = recording_stack([5; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        let my_ip = Ipv4Addr::from_octets(10, 0, 0, 5);
        let peer_ip = Ipv4Addr::from_octets(10, 0, 0, 9);
        stack
            .l3_ipv4_update(l3_id, my_ip, Ipv4Addr::from_octets(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED, L3Mode::Static, Default::default())
            .unwrap();
        let sock_id = stack.sockets.bind(BindSpec::BoundL3(l3_id), 9000).unwrap();

        let dgram = crate::udp::build_datagram(peer_ip, my_ip, 12345, 9000, b"hi");
        let ip_pkt = Ipv4Header::write_with_payload(1, crate::ipv4::PROTO_UDP, 64, peer_ip, my_ip, false, &dgram).unwrap();
        let my_mac = stack.l2_interface_at(0).unwrap().mac;
        let frame = eth_frame(my_mac, crate::addr::MacAddr([9; 6]), crate::eth::ETHERTYPE_IPV4, &ip_pkt);
        rx.borrow_mut().push(PacketBuffer::wrap(frame));

        assert!(stack.net_task_step(0));
        let sock = stack.sockets.get_mut(sock_id).unwrap();
        let (from, payload) = sock.try_recv().unwrap();
        assert_eq!(payload, b"hi");
        assert_eq!(from.port, 12345);
    }

    #[test]
    fn arp_send_request_broadcasts_for_target() {
        let (mut stack, _rx, tx) = recording_stack([6; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        let my_ip = Ipv4Addr::from_octets(10, 0, 0, 5);
        stack
            .l3_ipv4_update(l3_id, my_ip, Ipv4Addr::from_octets(255, 255, 255, 0), Ipv4Addr::UNSPECIFIED, L3Mode::Static, Default::default())
            .unwrap();

        let target = Ipv4Addr::from_octets(10, 0, 0, 9);
        stack.arp_send_request(0, target).unwrap();
        let sent = tx.borrow();
        assert_eq!(sent.len(), 1);
        let (eth_hdr, arp_payload) = EthHeader::parse(&sent[0]).unwrap();
        assert_eq!(eth_hdr.dst, crate::addr::MacAddr::BROADCAST);
        let req = ArpPacket::parse(arp_payload).unwrap();
        assert_eq!(req.opcode, crate::arp::OPCODE_REQUEST);
        assert_eq!(req.sender_ip, my_ip);
        assert_eq!(req.target_ip, target);
    }

    #[test]
    fn send_ipv4_to_multicast_group_skips_arp() {
        let (mut stack, _rx, tx) = recording_stack([7; 6]);
        let l3_id = stack.l3_ipv4_attach(0, L3Mode::Static).unwrap();
        stack
            .l3_ipv4_update(
                l3_id,
                Ipv4Addr::from_octets(10, 0, 0, 5),
                Ipv4Addr::from_octets(255, 255, 255, 0),
                Ipv4Addr::UNSPECIFIED,
                L3Mode::Static,
                Default::default(),
            )
            .unwrap();

        let group = crate::mdns::MULTICAST_GROUP;
        stack.send_ipv4(TxScope::BoundL3(l3_id), group, crate::ipv4::PROTO_UDP, 1, &[0, 1, 2]).unwrap();
        let sent = tx.borrow();
        assert_eq!(sent.len(), 1);
        let (eth_hdr, _) = EthHeader::parse(&sent[0]).unwrap();
        assert_eq!(eth_hdr.dst, crate::addr::MacAddr([0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]));
    }
}
