//! IPv4 header codec and the send/receive path (`spec.md` §4.6).
//!
//! Next-hop resolution and ARP are intentionally left to the caller (the
//! `stack` module, where the L2/L3 tables and ARP live together): this
//! module owns the wire format, the tx-scope interface selection rule,
//! and the header/checksum invariants, all of which are pure and
//! independently testable.

extern crate alloc;

use alloc::vec::Vec;

use crate::addr::Ipv4Addr;
use crate::checksum::{fold, ones_complement_sum};
use crate::error::{NetStackError, Result};
use crate::l3::L3Ipv4Interface;

pub const MIN_HEADER_LEN: usize = 20;
pub const VERSION: u8 = 4;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_UDP: u8 = 17;

pub const FLAG_DONT_FRAGMENT: u16 = 0x4000;
pub const FLAG_MORE_FRAGMENTS: u16 = 0x2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxScope {
    /// Pick any L3 interface whose subnet contains the destination,
    /// falling back to the default-gateway interface, then the first
    /// configured one.
    Unbound,
    /// Use exactly the named `l3_id`.
    BoundL3(u32),
}

impl Default for TxScope {
    fn default() -> Self {
        TxScope::Unbound
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SendOpts {
    pub scope: TxScope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags: u16,
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn is_fragment(&self) -> bool {
        (self.flags & FLAG_MORE_FRAGMENTS) != 0 || self.frag_offset != 0
    }

    /// Parse and validate version/IHL/checksum. Returns the header and the
    /// L4 payload slice.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < MIN_HEADER_LEN {
            return Err(NetStackError::WireFormat);
        }
        let version = data[0] >> 4;
        let ihl = data[0] & 0x0F;
        if version != VERSION || ihl < 5 {
            return Err(NetStackError::WireFormat);
        }
        let header_len = ihl as usize * 4;
        if data.len() < header_len {
            return Err(NetStackError::WireFormat);
        }
        if fold(ones_complement_sum(&data[..header_len])) != 0 {
            return Err(NetStackError::WireFormat);
        }
        let total_len = u16::from_be_bytes([data[2], data[3]]);
        let id = u16::from_be_bytes([data[4], data[5]]);
        let flags_frag = u16::from_be_bytes([data[6], data[7]]);
        let flags = flags_frag & 0xE000;
        let frag_offset = flags_frag & 0x1FFF;
        let ttl = data[8];
        let protocol = data[9];
        let checksum = u16::from_be_bytes([data[10], data[11]]);
        let src = Ipv4Addr::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let dst = Ipv4Addr::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let end = (total_len as usize).min(data.len()).max(header_len);
        Ok((
            Ipv4Header {
                ihl,
                total_len,
                id,
                flags,
                frag_offset,
                ttl,
                protocol,
                checksum,
                src,
                dst,
            },
            &data[header_len..end],
        ))
    }

    /// Write a 20-byte header (no options) with a freshly computed
    /// checksum, followed immediately by `payload`.
    pub fn write_with_payload(
        id: u16,
        protocol: u8,
        ttl: u8,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        dont_frag: bool,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let total_len = MIN_HEADER_LEN
            .checked_add(payload.len())
            .ok_or(NetStackError::InvalidArgument)?;
        if total_len > u16::MAX as usize {
            return Err(NetStackError::InvalidArgument);
        }
        let mut out = Vec::with_capacity(total_len);
        out.resize(MIN_HEADER_LEN, 0);
        out[0] = (VERSION << 4) | 5;
        out[1] = 0; // DSCP/ECN, unused.
        out[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        out[4..6].copy_from_slice(&id.to_be_bytes());
        let flags = if dont_frag { FLAG_DONT_FRAGMENT } else { 0 };
        out[6..8].copy_from_slice(&flags.to_be_bytes());
        out[8] = ttl;
        out[9] = protocol;
        out[10..12].copy_from_slice(&0u16.to_be_bytes());
        out[12..16].copy_from_slice(&src.to_be_bytes());
        out[16..20].copy_from_slice(&dst.to_be_bytes());
        let csum = fold(ones_complement_sum(&out[..MIN_HEADER_LEN]));
        out[10..12].copy_from_slice(&csum.to_be_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }
}

/// Pick the L3 interface to transmit from, per `spec.md` §4.6's
/// `IP_TX_UNBOUND` rule: direct-subnet match, else the default-gateway
/// interface, else the first configured interface.
pub fn select_unbound<'a>(
    interfaces: impl Iterator<Item = &'a L3Ipv4Interface> + Clone,
    dst: Ipv4Addr,
) -> Option<&'a L3Ipv4Interface> {
    let usable = || {
        interfaces
            .clone()
            .filter(|l3| !matches!(l3.mode, crate::l3::L3Mode::Disabled) && !l3.is_localhost)
    };
    if let Some(l3) = usable().find(|l3| dst.in_subnet(Ipv4Addr(l3.ip.0 & l3.mask.0), l3.mask)) {
        return Some(l3);
    }
    if let Some(l3) = usable().find(|l3| !l3.gw.is_unspecified()) {
        return Some(l3);
    }
    usable().next()
}

/// Next hop to ARP-resolve for `dst` given the chosen egress interface:
/// on-link destinations resolve directly, otherwise via the gateway.
pub fn next_hop(l3: &L3Ipv4Interface, dst: Ipv4Addr) -> Ipv4Addr {
    if dst.in_subnet(Ipv4Addr(l3.ip.0 & l3.mask.0), l3.mask) || l3.gw.is_unspecified() {
        dst
    } else {
        l3.gw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l3::{L3Mode, RuntimeOpts};

    fn configured(l3_id: u32, ip: &str, gw_last: u8) -> L3Ipv4Interface {
        let octets: Vec<u8> = ip.split('.').map(|s| s.parse().unwrap()).collect();
        let mut l3 = L3Ipv4Interface::new(l3_id, l3_id);
        l3.update(
            Ipv4Addr::from_octets(octets[0], octets[1], octets[2], octets[3]),
            Ipv4Addr::from_octets(255, 255, 255, 0),
            Ipv4Addr::from_octets(octets[0], octets[1], octets[2], gw_last),
            L3Mode::Dhcp,
            RuntimeOpts::default(),
        );
        l3
    }

    #[test]
    fn header_roundtrips_through_parse() {
        let payload = [0xAA; 16];
        let bytes = Ipv4Header::write_with_payload(
            7,
            PROTO_UDP,
            64,
            Ipv4Addr::from_octets(10, 0, 0, 1),
            Ipv4Addr::from_octets(10, 0, 0, 2),
            true,
            &payload,
        )
        .unwrap();
        let (hdr, body) = Ipv4Header::parse(&bytes).unwrap();
        assert_eq!(hdr.id, 7);
        assert_eq!(hdr.protocol, PROTO_UDP);
        assert_eq!(hdr.ttl, 64);
        assert_eq!(hdr.flags & FLAG_DONT_FRAGMENT, FLAG_DONT_FRAGMENT);
        assert!(!hdr.is_fragment());
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let bytes = Ipv4Header::write_with_payload(
            1,
            PROTO_ICMP,
            32,
            Ipv4Addr::from_octets(10, 0, 0, 1),
            Ipv4Addr::from_octets(10, 0, 0, 2),
            false,
            &[1, 2, 3, 4],
        )
        .unwrap();
        let mut corrupt = bytes;
        corrupt[1] ^= 0xFF;
        assert_eq!(Ipv4Header::parse(&corrupt), Err(NetStackError::WireFormat));
    }

    #[test]
    fn select_unbound_prefers_direct_subnet_match() {
        let a = configured(1, "10.0.0.5", 1);
        let b = configured(2, "192.168.1.5", 1);
        let chosen = select_unbound([&a, &b].into_iter(), Ipv4Addr::from_octets(192, 168, 1, 200)).unwrap();
        assert_eq!(chosen.l3_id, 2);
    }

    #[test]
    fn select_unbound_falls_back_to_gateway_interface() {
        let a = configured(1, "10.0.0.5", 1);
        let chosen = select_unbound([&a].into_iter(), Ipv4Addr::from_octets(8, 8, 8, 8)).unwrap();
        assert_eq!(chosen.l3_id, 1);
    }

    #[test]
    fn next_hop_is_gateway_for_off_link_destination() {
        let a = configured(1, "10.0.0.5", 1);
        assert_eq!(next_hop(&a, Ipv4Addr::from_octets(8, 8, 8, 8)), a.gw);
        assert_eq!(
            next_hop(&a, Ipv4Addr::from_octets(10, 0, 0, 200)),
            Ipv4Addr::from_octets(10, 0, 0, 200)
        );
    }
}
