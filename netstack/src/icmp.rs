//! ICMP echo service and the ping rendezvous table (`spec.md` §4.7).

extern crate alloc;

use alloc::vec::Vec;

use crate::addr::Ipv4Addr;
use crate::checksum::{fold, ones_complement_sum};
use crate::error::{NetStackError, Result};

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACH: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;
pub const TYPE_PARAM_PROBLEM: u8 = 12;
pub const TYPE_REDIRECT: u8 = 5;

pub const CODE_NET_UNREACH: u8 = 0;
pub const CODE_HOST_UNREACH: u8 = 1;
pub const CODE_PROTO_UNREACH: u8 = 2;
pub const CODE_PORT_UNREACH: u8 = 3;
pub const CODE_FRAG_NEEDED: u8 = 4;

pub const MAX_ECHO_PAYLOAD: usize = 56;
pub const RENDEZVOUS_SLOTS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub id: u16,
    pub seq: u16,
}

impl IcmpHeader {
    pub const LEN: usize = 8;

    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < Self::LEN {
            return Err(NetStackError::WireFormat);
        }
        Ok((
            IcmpHeader {
                icmp_type: data[0],
                code: data[1],
                checksum: u16::from_be_bytes([data[2], data[3]]),
                id: u16::from_be_bytes([data[4], data[5]]),
                seq: u16::from_be_bytes([data[6], data[7]]),
            },
            &data[Self::LEN..],
        ))
    }
}

/// Build an echo request/reply datagram (header + payload) with a fresh
/// checksum over the whole message.
pub fn build_echo(icmp_type: u8, id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IcmpHeader::LEN + payload.len());
    out.push(icmp_type);
    out.push(0);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(payload);
    let csum = fold(ones_complement_sum(&out));
    out[2..4].copy_from_slice(&csum.to_be_bytes());
    out
}

/// Given an inbound echo request, build the reply: same id/seq/payload
/// (truncated to [`MAX_ECHO_PAYLOAD`]).
pub fn echo_reply_for(request_payload: &[u8], id: u16, seq: u16) -> Vec<u8> {
    let n = request_payload.len().min(MAX_ECHO_PAYLOAD);
    build_echo(TYPE_ECHO_REPLY, id, seq, &request_payload[..n])
}

/// Final status reported to `icmp_ping` callers, translated from the
/// received type/code or from a timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PingStatus {
    Ok,
    NetUnreach,
    HostUnreach,
    ProtoUnreach,
    PortUnreach,
    FragNeeded,
    TtlExpired,
    ParamProblem,
    Redirect,
    Timeout,
}

pub fn translate_status(icmp_type: u8, code: u8) -> Option<PingStatus> {
    match icmp_type {
        TYPE_ECHO_REPLY => Some(PingStatus::Ok),
        TYPE_DEST_UNREACH => Some(match code {
            CODE_NET_UNREACH => PingStatus::NetUnreach,
            CODE_HOST_UNREACH => PingStatus::HostUnreach,
            CODE_PROTO_UNREACH => PingStatus::ProtoUnreach,
            CODE_PORT_UNREACH => PingStatus::PortUnreach,
            CODE_FRAG_NEEDED => PingStatus::FragNeeded,
            _ => PingStatus::HostUnreach,
        }),
        TYPE_TIME_EXCEEDED => Some(PingStatus::TtlExpired),
        TYPE_PARAM_PROBLEM => Some(PingStatus::ParamProblem),
        TYPE_REDIRECT => Some(PingStatus::Redirect),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    used: bool,
    dst: Ipv4Addr,
    id: u16,
    seq: u16,
    start_ms: u64,
    result: Option<PingStatus>,
}

impl Slot {
    const fn empty() -> Self {
        Slot {
            used: false,
            dst: Ipv4Addr::UNSPECIFIED,
            id: 0,
            seq: 0,
            start_ms: 0,
            result: None,
        }
    }
}

/// Up-to-16-slot rendezvous table matching received echo replies and
/// error messages back to the pending `icmp_ping` call that caused them.
pub struct PingTable {
    slots: [Slot; RENDEZVOUS_SLOTS],
}

impl PingTable {
    pub fn new() -> Self {
        PingTable {
            slots: [Slot::empty(); RENDEZVOUS_SLOTS],
        }
    }

    /// Allocate a slot for a new outstanding ping. Returns its index, or
    /// `Busy` if all 16 slots are in use.
    pub fn alloc(&mut self, dst: Ipv4Addr, id: u16, seq: u16, now_ms: u64) -> Result<usize> {
        let slot = self
            .slots
            .iter_mut()
            .position(|s| !s.used)
            .ok_or(NetStackError::Busy)?;
        self.slots[slot] = Slot {
            used: true,
            dst,
            id,
            seq,
            start_ms: now_ms,
            result: None,
        };
        Ok(slot)
    }

    pub fn free(&mut self, slot: usize) {
        self.slots[slot] = Slot::empty();
    }

    pub fn result(&self, slot: usize) -> Option<PingStatus> {
        self.slots[slot].result
    }

    pub fn elapsed_ms(&self, slot: usize, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.slots[slot].start_ms)
    }

    /// A direct echo reply arrived matching `dst`/`id`/`seq`.
    pub fn complete_echo_reply(&mut self, dst: Ipv4Addr, id: u16, seq: u16) {
        if let Some(s) = self
            .slots
            .iter_mut()
            .find(|s| s.used && s.dst == dst && s.id == id && s.seq == seq)
        {
            s.result = Some(PingStatus::Ok);
        }
    }

    /// An error message (dest-unreach/time-exceeded/param-problem/redirect)
    /// embedding the original IPv4 header + first 8 bytes of the offending
    /// ICMP message arrived; `orig_id`/`orig_seq` are parsed from that
    /// embedded header by the caller.
    pub fn complete_error(&mut self, dst: Ipv4Addr, orig_id: u16, orig_seq: u16, status: PingStatus) {
        if let Some(s) = self
            .slots
            .iter_mut()
            .find(|s| s.used && s.dst == dst && s.id == orig_id && s.seq == orig_seq)
        {
            s.result = Some(status);
        }
    }
}

impl Default for PingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_reply_preserves_id_seq_payload() {
        let payload = [7u8; 12];
        let reply = echo_reply_for(&payload, 42, 99);
        let (hdr, body) = IcmpHeader::parse(&reply).unwrap();
        assert_eq!(hdr.icmp_type, TYPE_ECHO_REPLY);
        assert_eq!(hdr.id, 42);
        assert_eq!(hdr.seq, 99);
        assert_eq!(body, &payload[..]);
        assert_eq!(fold(ones_complement_sum(&reply)), 0);
    }

    #[test]
    fn echo_reply_truncates_oversized_payload() {
        let payload = [1u8; 200];
        let reply = echo_reply_for(&payload, 1, 1);
        let (_, body) = IcmpHeader::parse(&reply).unwrap();
        assert_eq!(body.len(), MAX_ECHO_PAYLOAD);
    }

    #[test]
    fn status_translation_matches_table() {
        assert_eq!(translate_status(TYPE_ECHO_REPLY, 0), Some(PingStatus::Ok));
        assert_eq!(
            translate_status(TYPE_DEST_UNREACH, CODE_PORT_UNREACH),
            Some(PingStatus::PortUnreach)
        );
        assert_eq!(translate_status(TYPE_TIME_EXCEEDED, 0), Some(PingStatus::TtlExpired));
    }

    #[test]
    fn table_rejects_17th_outstanding_ping() {
        let mut t = PingTable::new();
        for i in 0..RENDEZVOUS_SLOTS {
            t.alloc(Ipv4Addr::from_octets(10, 0, 0, 1), i as u16, 0, 0).unwrap();
        }
        assert_eq!(
            t.alloc(Ipv4Addr::from_octets(10, 0, 0, 1), 99, 0, 0),
            Err(NetStackError::Busy)
        );
    }

    #[test]
    fn echo_reply_completes_matching_slot_only() {
        let mut t = PingTable::new();
        let dst = Ipv4Addr::from_octets(10, 0, 0, 1);
        let slot = t.alloc(dst, 5, 1, 0).unwrap();
        t.complete_echo_reply(Ipv4Addr::from_octets(10, 0, 0, 2), 5, 1);
        assert_eq!(t.result(slot), None);
        t.complete_echo_reply(dst, 5, 1);
        assert_eq!(t.result(slot), Some(PingStatus::Ok));
    }
}
