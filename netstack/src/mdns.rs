//! mDNS responder/querier and service registry (`spec.md` §4.10).
//!
//! Reuses [`crate::dns`]'s name codec and resource-record shapes; adds
//! the multicast-specific framing (cache-flush bit, burst scheduling)
//! that unicast DNS doesn't need.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::addr::{Endpoint, Ipv4Addr};
use crate::dns::{decode_name, encode_name, Addr, Header};
use crate::error::{NetStackError, Result};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr(0xE00000FB); // 224.0.0.251
pub const MULTICAST_PORT: u16 = 5353;

pub const CLASS_FLUSH_BIT: u16 = 0x8000;

const ANNOUNCE_BURST: u8 = 3;
const ANNOUNCE_SPACING_MS: u64 = 250;
const KEEPALIVE_INTERVAL_MS: u64 = 60_000;
const GOODBYE_BURST: u8 = 3;

/// Derive this host's mDNS name from its EUI-64-derived link-local
/// suffix: `redactedos-<8 hex digits>.local`.
pub fn host_name(eui64_low32: u32) -> String {
    alloc::format!("redactedos-{eui64_low32:08x}.local")
}

#[derive(Clone, Debug)]
pub struct RegisteredService {
    pub instance_name: String,
    pub service_type: String,
    pub port: u16,
    pub txt: Vec<(String, String)>,
    pub addr: Ipv4Addr,
}

enum BurstKind {
    Announce,
    Goodbye,
}

struct Burst {
    kind: BurstKind,
    remaining: u8,
    next_in_ms: u64,
}

/// Registry of locally announced services plus the announce/keepalive/
/// goodbye burst scheduler. One instance is shared process-wide; the
/// daemon polls [`tick`] and sends whatever packets it returns.
pub struct MdnsService {
    services: Vec<RegisteredService>,
    departing: Vec<RegisteredService>,
    burst: Option<Burst>,
    keepalive_left_ms: u64,
}

impl MdnsService {
    pub fn new() -> Self {
        MdnsService {
            services: Vec::new(),
            departing: Vec::new(),
            burst: None,
            keepalive_left_ms: KEEPALIVE_INTERVAL_MS,
        }
    }

    pub fn register(&mut self, service: RegisteredService) {
        self.services.retain(|s| s.instance_name != service.instance_name);
        self.services.push(service);
        self.burst = Some(Burst {
            kind: BurstKind::Announce,
            remaining: ANNOUNCE_BURST,
            next_in_ms: 0,
        });
    }

    /// Move `instance_name` into the departing set and schedule its
    /// goodbye burst; the record keeps being announced with TTL=0 until
    /// the burst completes, then it is dropped for good.
    pub fn deregister(&mut self, instance_name: &str) {
        if let Some(idx) = self.services.iter().position(|s| s.instance_name == instance_name) {
            let svc = self.services.remove(idx);
            self.departing.push(svc);
        }
        self.burst = Some(Burst {
            kind: BurstKind::Goodbye,
            remaining: GOODBYE_BURST,
            next_in_ms: 0,
        });
    }

    /// Advance burst/keepalive timers by `delta_ms`; returns packets to
    /// multicast this tick, if any are due.
    pub fn tick(&mut self, delta_ms: u64, our_host: &str) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        if let Some(burst) = &mut self.burst {
            burst.next_in_ms = burst.next_in_ms.saturating_sub(delta_ms);
            if burst.next_in_ms == 0 && burst.remaining > 0 {
                let (ttl, targets): (u32, &[RegisteredService]) = match burst.kind {
                    BurstKind::Announce => (120, &self.services),
                    BurstKind::Goodbye => (0, &self.departing),
                };
                for svc in targets {
                    out.push(build_a_response(our_host, svc.addr, ttl, true));
                }
                burst.remaining -= 1;
                burst.next_in_ms = ANNOUNCE_SPACING_MS;
            }
            if burst.remaining == 0 {
                if matches!(burst.kind, BurstKind::Goodbye) {
                    self.departing.clear();
                }
                self.burst = None;
            }
        } else {
            self.keepalive_left_ms = self.keepalive_left_ms.saturating_sub(delta_ms);
            if self.keepalive_left_ms == 0 {
                self.keepalive_left_ms = KEEPALIVE_INTERVAL_MS;
                for svc in &self.services {
                    out.push(build_a_response(our_host, svc.addr, 120, true));
                }
            }
        }

        out
    }

    pub fn services(&self) -> &[RegisteredService] {
        &self.services
    }
}

impl Default for MdnsService {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a one-question multicast query for `name`/`qtype`, used both by
/// the querier (`resolve_a` over `.local` names) and by tests.
pub fn build_query(name: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_be_bytes()); // id is unused/zero for mDNS
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&encode_name(name)?);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // class IN
    Ok(out)
}

/// Build an authoritative A-record response with the cache-flush bit
/// set when `flush` is true, per the responder rule for the local host
/// name.
pub fn build_a_response(name: &str, addr: Ipv4Addr, ttl_s: u32, flush: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0x8400u16.to_be_bytes()); // response, authoritative
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&encode_name(name).unwrap_or_default());
    out.extend_from_slice(&crate::dns::TYPE_A.to_be_bytes());
    let class = if flush { 1 | CLASS_FLUSH_BIT } else { 1 };
    out.extend_from_slice(&class.to_be_bytes());
    out.extend_from_slice(&ttl_s.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&addr.to_be_bytes());
    out
}

/// Accept the first answer from a multicast response whose name matches
/// `expected_name` and whose (class-masked) class is IN, for `qtype`
/// (1 = A, 28 = AAAA). Transaction id is not checked (queries are sent
/// with id 0 and answers may be unsolicited announcements).
pub fn parse_first_answer(packet: &[u8], expected_name: &str, qtype: u16) -> Result<Option<Addr>> {
    let hdr = Header::parse(packet)?;
    let mut pos = Header::LEN;
    for _ in 0..hdr.qdcount {
        let (_, next) = decode_name(packet, pos)?;
        pos = next + 4;
    }
    for _ in 0..hdr.ancount {
        let (name, next) = decode_name(packet, pos)?;
        pos = next;
        if pos + 10 > packet.len() {
            return Err(NetStackError::WireFormat);
        }
        let rtype = u16::from_be_bytes([packet[pos], packet[pos + 1]]);
        let rclass = u16::from_be_bytes([packet[pos + 2], packet[pos + 3]]) & 0x7FFF;
        let rdlength = u16::from_be_bytes([packet[pos + 8], packet[pos + 9]]) as usize;
        let rdata_start = pos + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > packet.len() {
            return Err(NetStackError::WireFormat);
        }
        if rtype == qtype && rclass == 1 && name.eq_ignore_ascii_case(expected_name) {
            if rtype == crate::dns::TYPE_A && rdlength == 4 {
                return Ok(Some(Addr::V4(Ipv4Addr::from_be_bytes([
                    packet[rdata_start],
                    packet[rdata_start + 1],
                    packet[rdata_start + 2],
                    packet[rdata_start + 3],
                ]))));
            }
            if rtype == crate::dns::TYPE_AAAA && rdlength == 16 {
                let mut v6 = [0u8; 16];
                v6.copy_from_slice(&packet[rdata_start..rdata_end]);
                return Ok(Some(Addr::V6(v6)));
            }
        }
        pos = rdata_end;
    }
    Ok(None)
}

pub fn multicast_endpoint() -> Endpoint {
    Endpoint::v4(MULTICAST_GROUP, MULTICAST_PORT)
}
