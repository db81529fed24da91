//! DNS wire codec and resolver cache (`spec.md` §4.10).
//!
//! Name compression, cache TTL ticking, and query/response framing live
//! here; the multicast (`.local`) path and the responder are in
//! [`crate::mdns`], and the blocking `resolve_a` orchestration across
//! cache → mDNS → unicast DNS lives in the daemon layer that owns a
//! `Stack`.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::Ipv4Addr;
use crate::error::{NetStackError, Result};

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_POINTER_HOPS: u8 = 16;

pub const CLASS_IN: u16 = 1;
pub const TYPE_A: u16 = 1;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_TXT: u16 = 16;

pub const RCODE_OK: u8 = 0;
pub const RCODE_NXDOMAIN: u8 = 3;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;

/// A resolved address of either record type. `spec.md` §4.10's
/// `DnsCacheEntry` stores both in a single 16-byte slot (A uses the first
/// 4 bytes); this enum is the in-memory equivalent once the bytes are off
/// the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addr {
    V4(Ipv4Addr),
    V6([u8; 16]),
}

impl Addr {
    pub fn rtype(&self) -> u16 {
        match self {
            Addr::V4(_) => TYPE_A,
            Addr::V6(_) => TYPE_AAAA,
        }
    }

    pub fn as_v4(&self) -> Option<Ipv4Addr> {
        match self {
            Addr::V4(ip) => Some(*ip),
            Addr::V6(_) => None,
        }
    }

    pub fn as_v6(&self) -> Option<[u8; 16]> {
        match self {
            Addr::V4(_) => None,
            Addr::V6(ip) => Some(*ip),
        }
    }
}

/// Encode a presentation-format name (`"www.example.com"`) as
/// length-prefixed labels terminated by a zero byte. Rejects labels over
/// 63 bytes and names over 255 bytes on the wire.
pub fn encode_name(name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(NetStackError::InvalidArgument);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    if out.len() > MAX_NAME_LEN {
        return Err(NetStackError::InvalidArgument);
    }
    Ok(out)
}

/// Decode a name starting at `offset` within `packet`, following
/// compression pointers up to [`MAX_POINTER_HOPS`] times. Returns the
/// decoded name and the offset immediately past the (non-pointer) part
/// consumed from the original position.
pub fn decode_name(packet: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut pos = offset;
    let mut end_of_direct_read: Option<usize> = None;
    let mut hops = 0u8;

    loop {
        let len_byte = *packet.get(pos).ok_or(NetStackError::WireFormat)?;
        if len_byte == 0 {
            pos += 1;
            if end_of_direct_read.is_none() {
                end_of_direct_read = Some(pos);
            }
            break;
        }
        if len_byte & 0xC0 == 0xC0 {
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(NetStackError::WireFormat);
            }
            let lo = *packet.get(pos + 1).ok_or(NetStackError::WireFormat)?;
            let ptr = (((len_byte & 0x3F) as usize) << 8) | lo as usize;
            if end_of_direct_read.is_none() {
                end_of_direct_read = Some(pos + 2);
            }
            if ptr >= pos {
                return Err(NetStackError::WireFormat); // forward/self pointer: would never terminate
            }
            pos = ptr;
            continue;
        }
        let len = len_byte as usize;
        if len > MAX_LABEL_LEN {
            return Err(NetStackError::WireFormat);
        }
        let start = pos + 1;
        let label = packet.get(start..start + len).ok_or(NetStackError::WireFormat)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(core::str::from_utf8(label).map_err(|_| NetStackError::WireFormat)?);
        pos = start + len;
        if name.len() > MAX_NAME_LEN {
            return Err(NetStackError::WireFormat);
        }
    }

    Ok((name, end_of_direct_read.unwrap_or(pos)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
}

impl Header {
    pub const LEN: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(NetStackError::WireFormat);
        }
        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        Ok(Header {
            id,
            is_response: flags & FLAG_RESPONSE != 0,
            rcode: (flags & 0x000F) as u8,
            qdcount: u16::from_be_bytes([data[4], data[5]]),
            ancount: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Build a standard recursion-desired query for `name`/`qtype`.
pub fn build_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&0u16.to_be_bytes()); // ancount
    out.extend_from_slice(&0u16.to_be_bytes()); // nscount
    out.extend_from_slice(&0u16.to_be_bytes()); // arcount
    out.extend_from_slice(&encode_name(name)?);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(out)
}

/// The first A/AAAA answer in a response, if the response is valid
/// (matching transaction id, RCODE 0) and its owner name matches
/// `expected_name`. `qtype` selects which rrtype to accept (`TYPE_A` or
/// `TYPE_AAAA`); the rdata is decoded as 4 or 16 bytes to match.
pub fn parse_first_address_answer(
    packet: &[u8],
    expected_id: u16,
    expected_name: &str,
    qtype: u16,
) -> Result<Option<Addr>> {
    let hdr = Header::parse(packet)?;
    if hdr.id != expected_id {
        return Err(NetStackError::Protocol);
    }
    if hdr.rcode != RCODE_OK {
        return Ok(None);
    }
    let mut pos = Header::LEN;
    for _ in 0..hdr.qdcount {
        let (_, next) = decode_name(packet, pos)?;
        pos = next + 4; // qtype + qclass
    }
    for _ in 0..hdr.ancount {
        let (name, next) = decode_name(packet, pos)?;
        pos = next;
        if pos + 10 > packet.len() {
            return Err(NetStackError::WireFormat);
        }
        let rtype = u16::from_be_bytes([packet[pos], packet[pos + 1]]);
        let rclass = u16::from_be_bytes([packet[pos + 2], packet[pos + 3]]);
        let rdlength = u16::from_be_bytes([packet[pos + 8], packet[pos + 9]]) as usize;
        let rdata_start = pos + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > packet.len() {
            return Err(NetStackError::WireFormat);
        }
        if rtype == qtype && (rclass & 0x7FFF) == CLASS_IN && name.eq_ignore_ascii_case(expected_name) {
            if rtype == TYPE_A && rdlength == 4 {
                return Ok(Some(Addr::V4(Ipv4Addr::from_be_bytes([
                    packet[rdata_start],
                    packet[rdata_start + 1],
                    packet[rdata_start + 2],
                    packet[rdata_start + 3],
                ]))));
            }
            if rtype == TYPE_AAAA && rdlength == 16 {
                let mut v6 = [0u8; 16];
                v6.copy_from_slice(&packet[rdata_start..rdata_end]);
                return Ok(Some(Addr::V6(v6)));
            }
        }
        pos = rdata_end;
    }
    Ok(None)
}

/// One live cache entry. `localhost` is immortal (`ttl_ms == u64::MAX`);
/// every other entry decays to zero and is then considered expired. A and
/// AAAA records for the same name are distinct entries (`addr.rtype()`
/// distinguishes them), per `spec.md` §4.10's `DnsCacheEntry`.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub name: String,
    pub addr: Addr,
    pub ttl_ms: u64,
}

pub struct Cache {
    entries: Vec<CacheEntry>,
    capacity: usize,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        let mut cache = Cache {
            entries: Vec::new(),
            capacity,
        };
        cache.entries.push(CacheEntry {
            name: String::from("localhost"),
            addr: Addr::V4(Ipv4Addr::LOOPBACK),
            ttl_ms: u64::MAX,
        });
        cache.entries.push(CacheEntry {
            name: String::from("localhost"),
            addr: Addr::V6([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            ttl_ms: u64::MAX,
        });
        cache
    }

    pub fn lookup(&self, name: &str, qtype: u16) -> Option<Addr> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name) && e.ttl_ms > 0 && e.addr.rtype() == qtype)
            .map(|e| e.addr)
    }

    /// Insert or refresh an entry. `ttl_s == 0xFFFF_FFFF` is clamped to
    /// `u64::MAX` ("forever") per the spec's huge-TTL rule. A and AAAA
    /// records for the same name refresh independently.
    pub fn insert(&mut self, name: &str, addr: Addr, ttl_s: u32) {
        let ttl_ms = if ttl_s == u32::MAX {
            u64::MAX
        } else {
            (ttl_s as u64).saturating_mul(1000)
        };
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(name) && e.addr.rtype() == addr.rtype())
        {
            e.addr = addr;
            e.ttl_ms = ttl_ms;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(idx) = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.ttl_ms != u64::MAX)
                .min_by_key(|(_, e)| e.ttl_ms)
                .map(|(i, _)| i)
            {
                self.entries.remove(idx);
            } else {
                return; // everything immortal; drop the insert
            }
        }
        self.entries.push(CacheEntry {
            name: String::from(name),
            addr,
            ttl_ms,
        });
    }

    pub fn tick(&mut self, delta_ms: u64) {
        for e in self.entries.iter_mut() {
            if e.ttl_ms != u64::MAX {
                e.ttl_ms = e.ttl_ms.saturating_sub(delta_ms);
            }
        }
        self.entries.retain(|e| e.ttl_ms == u64::MAX || e.ttl_ms > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrips_without_compression() {
        let encoded = encode_name("www.example.com").unwrap();
        let (decoded, next) = decode_name(&encoded, 0).unwrap();
        assert_eq!(decoded, "www.example.com");
        assert_eq!(next, encoded.len());
    }

    #[test]
    fn label_over_63_bytes_rejected() {
        let long = "a".repeat(64);
        assert_eq!(encode_name(&long), Err(NetStackError::InvalidArgument));
    }

    #[test]
    fn self_referential_pointer_is_rejected_not_looped() {
        // Pointer at offset 0 pointing at itself.
        let packet = [0xC0, 0x00];
        assert_eq!(decode_name(&packet, 0), Err(NetStackError::WireFormat));
    }

    #[test]
    fn localhost_is_immortal_in_cache() {
        let mut cache = Cache::new(4);
        cache.tick(u64::MAX);
        assert_eq!(cache.lookup("localhost", TYPE_A), Some(Addr::V4(Ipv4Addr::LOOPBACK)));
        assert_eq!(
            cache.lookup("localhost", TYPE_AAAA),
            Some(Addr::V6([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]))
        );
    }

    #[test]
    fn cache_entry_expires_after_ttl_decays() {
        let mut cache = Cache::new(4);
        cache.insert("host.example", Addr::V4(Ipv4Addr::from_octets(10, 0, 0, 5)), 1);
        assert!(cache.lookup("host.example", TYPE_A).is_some());
        cache.tick(1500);
        assert!(cache.lookup("host.example", TYPE_A).is_none());
    }

    #[test]
    fn a_and_aaaa_entries_for_same_name_are_independent() {
        let mut cache = Cache::new(4);
        cache.insert("dual.example", Addr::V4(Ipv4Addr::from_octets(10, 0, 0, 5)), 300);
        cache.insert("dual.example", Addr::V6([0x20, 0x01, 0xd, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]), 300);
        assert_eq!(cache.lookup("dual.example", TYPE_A), Some(Addr::V4(Ipv4Addr::from_octets(10, 0, 0, 5))));
        assert!(cache.lookup("dual.example", TYPE_AAAA).is_some());
    }

    #[test]
    fn query_then_answer_roundtrip() {
        let query = build_query(0x1234, "example.com", TYPE_A).unwrap();
        assert_eq!(Header::parse(&query).unwrap().id, 0x1234);

        // Hand-build a minimal response with one A answer for example.com.
        let mut resp = Vec::new();
        resp.extend_from_slice(&0x1234u16.to_be_bytes());
        resp.extend_from_slice(&0x8180u16.to_be_bytes()); // response, RD+RA, rcode 0
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&encode_name("example.com").unwrap());
        resp.extend_from_slice(&TYPE_A.to_be_bytes());
        resp.extend_from_slice(&CLASS_IN.to_be_bytes());
        // answer: name as pointer to question, type, class, ttl, rdlength, rdata
        resp.push(0xC0);
        resp.push(Header::LEN as u8);
        resp.extend_from_slice(&TYPE_A.to_be_bytes());
        resp.extend_from_slice(&CLASS_IN.to_be_bytes());
        resp.extend_from_slice(&300u32.to_be_bytes());
        resp.extend_from_slice(&4u16.to_be_bytes());
        resp.extend_from_slice(&Ipv4Addr::from_octets(93, 184, 216, 34).to_be_bytes());

        let answer = parse_first_address_answer(&resp, 0x1234, "example.com", TYPE_A).unwrap();
        assert_eq!(answer, Some(Addr::V4(Ipv4Addr::from_octets(93, 184, 216, 34))));
    }

    #[test]
    fn aaaa_answer_decodes_sixteen_byte_rdata() {
        let mut resp = Vec::new();
        resp.extend_from_slice(&0x5678u16.to_be_bytes());
        resp.extend_from_slice(&0x8180u16.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&0u16.to_be_bytes());
        resp.extend_from_slice(&encode_name("example.com").unwrap());
        resp.extend_from_slice(&TYPE_AAAA.to_be_bytes());
        resp.extend_from_slice(&CLASS_IN.to_be_bytes());
        resp.push(0xC0);
        resp.push(Header::LEN as u8);
        resp.extend_from_slice(&TYPE_AAAA.to_be_bytes());
        resp.extend_from_slice(&CLASS_IN.to_be_bytes());
        resp.extend_from_slice(&300u32.to_be_bytes());
        resp.extend_from_slice(&16u16.to_be_bytes());
        let v6 = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        resp.extend_from_slice(&v6);

        let answer = parse_first_address_answer(&resp, 0x5678, "example.com", TYPE_AAAA).unwrap();
        assert_eq!(answer, Some(Addr::V6(v6)));
    }
}
