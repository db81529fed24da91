//! ARP table, wire format, and resolution state machine (`spec.md` §4.5).
//!
//! The table and wire codec are pure and synchronous. Resolution is
//! expressed as a polled state machine ([`PendingResolve`]) rather than a
//! blocking call, so this crate stays free of any scheduler dependency;
//! the blocking `resolve_on(ifindex, ip, timeout_ms) -> mac` entry point
//! described in the spec is the daemon-side wrapper in `netstackd` that
//! drives this state machine with `Scheduler::sleep_ms(100)` between
//! polls.

extern crate alloc;

use alloc::vec::Vec;

use crate::addr::{Ipv4Addr, MacAddr};
use crate::error::{NetStackError, Result};

pub const HEADER_LEN: usize = 28;
pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;
pub const HLEN_ETHERNET: u8 = 6;
pub const PLEN_IPV4: u8 = 4;
pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

/// Default TTL applied to a dynamically learned entry (`spec.md` §4.5:
/// ARP learns the sender's binding on every request with a 180s TTL).
pub const LEARNED_TTL_MS: u64 = 180_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub opcode: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(NetStackError::WireFormat);
        }
        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        let opcode = u16::from_be_bytes([data[6], data[7]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != HLEN_ETHERNET || plen != PLEN_IPV4 {
            return Err(NetStackError::WireFormat);
        }
        let sender_mac = MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]);
        let sender_ip = Ipv4Addr::from_be_bytes([data[14], data[15], data[16], data[17]]);
        let target_mac = MacAddr([data[18], data[19], data[20], data[21], data[22], data[23]]);
        let target_ip = Ipv4Addr::from_be_bytes([data[24], data[25], data[26], data[27]]);
        Ok(ArpPacket {
            opcode,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn write(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_LEN {
            return Err(NetStackError::InvalidArgument);
        }
        out[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        out[4] = HLEN_ETHERNET;
        out[5] = PLEN_IPV4;
        out[6..8].copy_from_slice(&self.opcode.to_be_bytes());
        out[8..14].copy_from_slice(&self.sender_mac.0);
        out[14..18].copy_from_slice(&self.sender_ip.to_be_bytes());
        out[18..24].copy_from_slice(&self.target_mac.0);
        out[24..28].copy_from_slice(&self.target_ip.to_be_bytes());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ArpEntry {
    pub ip: Ipv4Addr, // Ipv4Addr::UNSPECIFIED (0) marks a free slot.
    pub mac: MacAddr,
    pub ttl_ms: u64,
    pub is_static: bool,
}

impl ArpEntry {
    fn free() -> Self {
        ArpEntry {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: MacAddr::ZERO,
            ttl_ms: 0,
            is_static: false,
        }
    }

    fn is_free(&self) -> bool {
        self.ip.is_unspecified()
    }
}

/// Per-L2 fixed-capacity ARP table. The broadcast entry is seeded static
/// at construction and never expires.
pub struct ArpTable {
    entries: Vec<ArpEntry>,
}

impl ArpTable {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity.max(1));
        entries.resize_with(capacity.max(1), ArpEntry::free);
        let mut table = ArpTable { entries };
        table
            .put(Ipv4Addr::BROADCAST, MacAddr::BROADCAST, u64::MAX, true)
            .expect("capacity>=1 reserved for broadcast");
        table
    }

    pub fn put(&mut self, ip: Ipv4Addr, mac: MacAddr, ttl_ms: u64, is_static: bool) -> Result<()> {
        if ip.is_unspecified() {
            return Err(NetStackError::InvalidArgument);
        }
        if let Some(e) = self.entries.iter_mut().find(|e| e.ip == ip) {
            e.mac = mac;
            e.ttl_ms = ttl_ms;
            e.is_static = is_static;
            return Ok(());
        }
        if let Some(slot) = self.entries.iter_mut().find(|e| e.is_free()) {
            *slot = ArpEntry { ip, mac, ttl_ms, is_static };
            return Ok(());
        }
        Err(NetStackError::Busy)
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.iter().find(|e| e.ip == ip).map(|e| e.mac)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter().filter(|e| !e.is_free())
    }

    /// Age all non-static entries by `delta_ms`; an entry that reaches zero
    /// is cleared within this call (invariant 2 in `spec.md` §8).
    pub fn tick(&mut self, delta_ms: u64) {
        for e in self.entries.iter_mut() {
            if e.is_free() || e.is_static {
                continue;
            }
            e.ttl_ms = e.ttl_ms.saturating_sub(delta_ms);
            if e.ttl_ms == 0 {
                *e = ArpEntry::free();
            }
        }
    }

    /// Process an incoming ARP packet for interface `our_ip`/`our_mac`.
    /// Always opportunistically learns the sender's binding; if it's a
    /// request for an IP we own, returns the reply packet to send.
    pub fn input(&mut self, our_ip: Ipv4Addr, our_mac: MacAddr, pkt: &ArpPacket) -> Option<ArpPacket> {
        if !pkt.sender_ip.is_unspecified() {
            let _ = self.put(pkt.sender_ip, pkt.sender_mac, LEARNED_TTL_MS, false);
        }
        if pkt.opcode == OPCODE_REQUEST && pkt.target_ip == our_ip {
            Some(ArpPacket {
                opcode: OPCODE_REPLY,
                sender_mac: our_mac,
                sender_ip: our_ip,
                target_mac: pkt.sender_mac,
                target_ip: pkt.sender_ip,
            })
        } else {
            None
        }
    }
}

/// Polled resolution state used by the daemon-side blocking wrapper.
pub struct PendingResolve {
    target: Ipv4Addr,
    timeout_ms: u64,
    elapsed_ms: u64,
    requested: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Resolved(MacAddr),
    SendRequest(Ipv4Addr),
    Waiting,
    TimedOut,
}

impl PendingResolve {
    pub fn new(target: Ipv4Addr, timeout_ms: u64) -> Self {
        PendingResolve {
            target,
            timeout_ms,
            elapsed_ms: 0,
            requested: false,
        }
    }

    /// Advance the state machine by `delta_ms` and consult `table`. The
    /// caller sends a request on `SendRequest` and re-polls every 100ms
    /// thereafter, per `spec.md` §4.5.
    pub fn poll(&mut self, table: &ArpTable, delta_ms: u64) -> PollOutcome {
        if let Some(mac) = table.get(self.target) {
            return PollOutcome::Resolved(mac);
        }
        self.elapsed_ms += delta_ms;
        if self.elapsed_ms >= self.timeout_ms {
            return PollOutcome::TimedOut;
        }
        if !self.requested {
            self.requested = true;
            return PollOutcome::SendRequest(self.target);
        }
        PollOutcome::Waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_seeded_static_and_never_expires() {
        let mut t = ArpTable::new(4);
        assert_eq!(t.get(Ipv4Addr::BROADCAST), Some(MacAddr::BROADCAST));
        t.tick(u64::MAX);
        assert_eq!(t.get(Ipv4Addr::BROADCAST), Some(MacAddr::BROADCAST));
    }

    #[test]
    fn tick_decrements_and_clears_dynamic_entries() {
        let mut t = ArpTable::new(4);
        let ip = Ipv4Addr::from_octets(10, 0, 0, 1);
        t.put(ip, MacAddr([1; 6]), 1000, false).unwrap();
        t.tick(400);
        assert!(t.get(ip).is_some());
        t.tick(700);
        assert_eq!(t.get(ip), None);
    }

    #[test]
    fn static_entries_never_expire() {
        let mut t = ArpTable::new(4);
        let ip = Ipv4Addr::from_octets(10, 0, 0, 9);
        t.put(ip, MacAddr([2; 6]), 10, true).unwrap();
        t.tick(10_000);
        assert!(t.get(ip).is_some());
    }

    #[test]
    fn full_table_rejects_new_entry() {
        let mut t = ArpTable::new(2); // 1 slot free after broadcast seed.
        t.put(Ipv4Addr::from_octets(1, 1, 1, 1), MacAddr([1; 6]), 1000, false)
            .unwrap();
        let result = t.put(Ipv4Addr::from_octets(2, 2, 2, 2), MacAddr([2; 6]), 1000, false);
        assert_eq!(result, Err(NetStackError::Busy));
    }

    #[test]
    fn wire_roundtrip() {
        let pkt = ArpPacket {
            opcode: OPCODE_REQUEST,
            sender_mac: MacAddr([1, 2, 3, 4, 5, 6]),
            sender_ip: Ipv4Addr::from_octets(10, 0, 0, 42),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr::from_octets(10, 0, 0, 1),
        };
        let mut buf = [0u8; HEADER_LEN];
        pkt.write(&mut buf).unwrap();
        assert_eq!(ArpPacket::parse(&buf).unwrap(), pkt);
    }

    #[test]
    fn input_learns_sender_and_replies_only_for_owned_target() {
        let mut t = ArpTable::new(8);
        let our_ip = Ipv4Addr::from_octets(10, 0, 0, 42);
        let our_mac = MacAddr([9; 6]);
        let req = ArpPacket {
            opcode: OPCODE_REQUEST,
            sender_mac: MacAddr([1; 6]),
            sender_ip: Ipv4Addr::from_octets(10, 0, 0, 2),
            target_mac: MacAddr::ZERO,
            target_ip: our_ip,
        };
        let reply = t.input(our_ip, our_mac, &req).expect("should reply");
        assert_eq!(reply.opcode, OPCODE_REPLY);
        assert_eq!(reply.target_ip, req.sender_ip);
        assert_eq!(t.get(req.sender_ip), Some(req.sender_mac));

        let not_ours = ArpPacket {
            target_ip: Ipv4Addr::from_octets(10, 0, 0, 200),
            ..req
        };
        assert!(t.input(our_ip, our_mac, &not_ours).is_none());
    }

    #[test]
    fn resolve_scenario_s2_sends_then_resolves() {
        let mut t = ArpTable::new(8);
        let target = Ipv4Addr::from_octets(10, 0, 0, 1);
        let mut pending = PendingResolve::new(target, 2000);

        assert_eq!(pending.poll(&t, 0), PollOutcome::SendRequest(target));
        assert_eq!(pending.poll(&t, 100), PollOutcome::Waiting);

        t.put(target, MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]), 180_000, false)
            .unwrap();
        assert_eq!(
            pending.poll(&t, 100),
            PollOutcome::Resolved(MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]))
        );
    }

    #[test]
    fn resolve_times_out() {
        let t = ArpTable::new(8);
        let target = Ipv4Addr::from_octets(10, 0, 0, 1);
        let mut pending = PendingResolve::new(target, 300);
        assert_eq!(pending.poll(&t, 0), PollOutcome::SendRequest(target));
        assert_eq!(pending.poll(&t, 150), PollOutcome::Waiting);
        assert_eq!(pending.poll(&t, 150), PollOutcome::TimedOut);
    }
}
