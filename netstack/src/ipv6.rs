//! Minimal IPv6 address parsing/formatting and link-local derivation.
//!
//! Non-goal per the spec: full neighbor discovery / DAD is not implemented.
//! Only the leaf address utilities needed elsewhere (mDNS's `ff02::fb`
//! group, link-local source selection) are provided.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::MacAddr;
use crate::error::{NetStackError, Result};

/// Parse a standard IPv6 text representation, including `::` compression
/// and (at most one) embedded run. Does not support zone IDs or
/// IPv4-mapped dotted-quad tails.
pub fn parse(s: &str) -> Result<[u8; 16]> {
    if s.matches("::").count() > 1 {
        return Err(NetStackError::WireFormat);
    }
    let (head_str, tail_str, has_elision) = match s.split_once("::") {
        Some((h, t)) => (h, t, true),
        None => (s, "", false),
    };

    let parse_groups = |part: &str| -> Result<Vec<u16>> {
        if part.is_empty() {
            return Ok(Vec::new());
        }
        part.split(':')
            .map(|g| u16::from_str_radix(g, 16).map_err(|_| NetStackError::WireFormat))
            .collect()
    };

    let head = parse_groups(head_str)?;
    let tail = parse_groups(tail_str)?;

    let mut groups = [0u16; 8];
    if has_elision {
        if head.len() + tail.len() > 8 {
            return Err(NetStackError::WireFormat);
        }
        groups[..head.len()].copy_from_slice(&head);
        let tail_start = 8 - tail.len();
        groups[tail_start..].copy_from_slice(&tail);
    } else {
        if head.len() != 8 {
            return Err(NetStackError::WireFormat);
        }
        groups.copy_from_slice(&head);
    }

    let mut out = [0u8; 16];
    for (i, g) in groups.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&g.to_be_bytes());
    }
    Ok(out)
}

/// Format an address in its canonical compressed form (longest run of
/// zero groups collapsed to `::`, ties broken toward the earliest run).
pub fn to_string(addr: &[u8; 16]) -> String {
    let mut groups = [0u16; 8];
    for i in 0..8 {
        groups[i] = u16::from_be_bytes([addr[i * 2], addr[i * 2 + 1]]);
    }

    let mut best_start = None;
    let mut best_len = 0usize;
    let mut cur_start = None;
    let mut cur_len = 0usize;
    for (i, g) in groups.iter().enumerate() {
        if *g == 0 {
            if cur_start.is_none() {
                cur_start = Some(i);
            }
            cur_len += 1;
            if cur_len > best_len {
                best_len = cur_len;
                best_start = cur_start;
            }
        } else {
            cur_start = None;
            cur_len = 0;
        }
    }

    let mut out = String::new();
    if best_len >= 2 {
        let start = best_start.unwrap();
        let end = start + best_len;
        for (i, g) in groups.iter().enumerate().take(start) {
            if i > 0 {
                out.push(':');
            }
            out.push_str(&alloc::format!("{g:x}"));
        }
        out.push_str("::");
        for (i, g) in groups.iter().enumerate().skip(end) {
            if i > end {
                out.push(':');
            }
            out.push_str(&alloc::format!("{g:x}"));
        }
    } else {
        for (i, g) in groups.iter().enumerate() {
            if i > 0 {
                out.push(':');
            }
            out.push_str(&alloc::format!("{g:x}"));
        }
    }
    out
}

/// Derive the EUI-64-based link-local address `fe80::<eui64>` from a MAC,
/// flipping the universal/local bit per RFC 4291 appendix A.
pub fn link_local_from_mac(mac: &MacAddr) -> [u8; 16] {
    let m = mac.0;
    let mut addr = [0u8; 16];
    addr[0] = 0xfe;
    addr[1] = 0x80;
    addr[8] = m[0] ^ 0x02;
    addr[9] = m[1];
    addr[10] = m[2];
    addr[11] = 0xff;
    addr[12] = 0xfe;
    addr[13] = m[3];
    addr[14] = m[4];
    addr[15] = m[5];
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_full_address() {
        let text = "2001:db8:0:0:0:0:0:1";
        let addr = parse(text).unwrap();
        let back = parse(&to_string(&addr)).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn roundtrip_compressed_and_unspecified() {
        for addr in [[0u8; 16], {
            let mut a = [0u8; 16];
            a[0] = 0xfe;
            a[1] = 0x80;
            a[15] = 1;
            a
        }] {
            let s = to_string(&addr);
            assert_eq!(parse(&s).unwrap(), addr);
        }
    }

    #[test]
    fn loopback_roundtrip() {
        let addr = parse("::1").unwrap();
        assert_eq!(addr[15], 1);
        assert_eq!(to_string(&addr), "::1");
    }

    #[test]
    fn double_elision_rejected() {
        assert_eq!(parse("::1::2"), Err(NetStackError::WireFormat));
    }

    #[test]
    fn link_local_derivation_sets_prefix_and_flips_bit() {
        let mac = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        let ll = link_local_from_mac(&mac);
        assert_eq!(&ll[0..2], &[0xfe, 0x80]);
        assert_eq!(ll[8], 0x00); // universal/local bit flipped from 0x02
        assert_eq!(ll[11], 0xff);
        assert_eq!(ll[12], 0xfe);
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_addresses_roundtrip(bytes in proptest::array::uniform16(proptest::prelude::any::<u8>())) {
            let s = to_string(&bytes);
            let parsed = parse(&s).unwrap();
            proptest::prop_assert_eq!(parsed, bytes);
        }
    }
}
