//! Ethernet II framing (`spec.md` §6): 6 dst + 6 src + 2 ethertype,
//! big-endian, no FCS at this layer.

use crate::addr::MacAddr;
use crate::error::{NetStackError, Result};

pub const HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < HEADER_LEN {
            return Err(NetStackError::WireFormat);
        }
        let dst = MacAddr([data[0], data[1], data[2], data[3], data[4], data[5]]);
        let src = MacAddr([data[6], data[7], data[8], data[9], data[10], data[11]]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        Ok((EthHeader { dst, src, ethertype }, &data[HEADER_LEN..]))
    }

    pub fn write(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_LEN {
            return Err(NetStackError::InvalidArgument);
        }
        out[0..6].copy_from_slice(&self.dst.0);
        out[6..12].copy_from_slice(&self.src.0);
        out[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_then_write_roundtrips() {
        let hdr = EthHeader {
            dst: MacAddr([1, 2, 3, 4, 5, 6]),
            src: MacAddr([7, 8, 9, 10, 11, 12]),
            ethertype: ETHERTYPE_IPV4,
        };
        let mut buf = [0u8; HEADER_LEN + 4];
        hdr.write(&mut buf).unwrap();
        let (parsed, rest) = EthHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(rest.len(), 4);
    }

    #[test]
    fn short_frame_is_wire_format_error() {
        let buf = [0u8; 4];
        assert_eq!(EthHeader::parse(&buf), Err(NetStackError::WireFormat));
    }
}
