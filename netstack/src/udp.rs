//! UDP header codec and the process-wide socket table (`spec.md` §4.8).
//!
//! `recvfrom`'s blocking behavior is a suspension point owned by the
//! scheduler-integrated daemon layer; this module exposes the
//! non-blocking primitives (`try_recv`, queue depth) that the blocking
//! wrapper polls.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::addr::{Endpoint, Ipv4Addr};
use crate::checksum::{fold, ones_complement_sum, pseudo_header_sum};
use crate::error::{NetStackError, Result};

pub const HEADER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < HEADER_LEN {
            return Err(NetStackError::WireFormat);
        }
        let src_port = u16::from_be_bytes([data[0], data[1]]);
        let dst_port = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let checksum = u16::from_be_bytes([data[6], data[7]]);
        let payload_len = (length as usize).saturating_sub(HEADER_LEN);
        let end = HEADER_LEN + payload_len.min(data.len() - HEADER_LEN);
        Ok((
            UdpHeader {
                src_port,
                dst_port,
                length,
                checksum,
            },
            &data[HEADER_LEN..end],
        ))
    }
}

/// Build a UDP datagram and compute its checksum over the IPv4
/// pseudo-header + UDP header + payload. A zero result is forced to
/// 0xFFFF since zero means "unchecked" on the wire.
pub fn build_datagram(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let length = HEADER_LEN + payload.len();
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&src_port.to_be_bytes());
    out.extend_from_slice(&dst_port.to_be_bytes());
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(payload);

    let pseudo = pseudo_header_sum(src.to_be_bytes(), dst.to_be_bytes(), 17, length);
    let body_sum = ones_complement_sum(&out);
    let mut csum = fold(pseudo.wrapping_add(body_sum));
    if csum == 0 {
        csum = 0xFFFF;
    }
    out[6..8].copy_from_slice(&csum.to_be_bytes());
    out
}

/// Validate a received datagram's checksum; `0` on the wire means
/// unchecked and always passes.
pub fn verify_checksum(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> bool {
    if datagram.len() < HEADER_LEN {
        return false;
    }
    if datagram[6] == 0 && datagram[7] == 0 {
        return true;
    }
    let pseudo = pseudo_header_sum(src.to_be_bytes(), dst.to_be_bytes(), 17, datagram.len());
    fold(pseudo.wrapping_add(ones_complement_sum(datagram))) == 0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindSpec {
    Unbound,
    BoundL3(u32),
}

pub struct UdpSocket {
    pub id: u32,
    pub bind: BindSpec,
    pub port: u16,
    rx: VecDeque<(Endpoint, Vec<u8>)>,
    rx_capacity: usize,
}

impl UdpSocket {
    pub fn try_recv(&mut self) -> Option<(Endpoint, Vec<u8>)> {
        self.rx.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn enqueue(&mut self, from: Endpoint, data: Vec<u8>) -> Result<()> {
        if self.rx.len() >= self.rx_capacity {
            return Err(NetStackError::Busy);
        }
        self.rx.push_back((from, data));
        Ok(())
    }
}

const EPHEMERAL_BASE: u16 = 49152;

/// Process-wide (bind scope, port) → socket table.
pub struct SocketTable {
    sockets: Vec<UdpSocket>,
    next_id: u32,
    next_ephemeral: u16,
    rx_capacity: usize,
}

impl SocketTable {
    pub fn new(rx_capacity: usize) -> Self {
        SocketTable {
            sockets: Vec::new(),
            next_id: 1,
            next_ephemeral: EPHEMERAL_BASE,
            rx_capacity,
        }
    }

    /// Reserve `port` (or allocate an ephemeral one if `port == 0`) for
    /// `bind`. Fails with `Busy` if the (bind, port) pair is already
    /// taken.
    pub fn bind(&mut self, bind: BindSpec, port: u16) -> Result<u32> {
        let port = if port == 0 { self.allocate_ephemeral(bind)? } else { port };
        if self.find_index(bind, port).is_some() {
            return Err(NetStackError::Busy);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.sockets.push(UdpSocket {
            id,
            bind,
            port,
            rx: VecDeque::new(),
            rx_capacity: self.rx_capacity,
        });
        Ok(id)
    }

    fn allocate_ephemeral(&mut self, bind: BindSpec) -> Result<u16> {
        for _ in 0..u16::MAX {
            let candidate = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_BASE);
            if self.find_index(bind, candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(NetStackError::Busy)
    }

    fn find_index(&self, bind: BindSpec, port: u16) -> Option<usize> {
        self.sockets.iter().position(|s| s.bind == bind && s.port == port)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut UdpSocket> {
        self.sockets.iter_mut().find(|s| s.id == id)
    }

    pub fn close(&mut self, id: u32) {
        self.sockets.retain(|s| s.id != id);
    }

    /// Dispatch an inbound datagram (already checksum-verified) to the
    /// matching socket, by exact bind scope then by unbound wildcard.
    pub fn deliver(&mut self, scope: BindSpec, dst_port: u16, from: Endpoint, payload: Vec<u8>) -> Result<()> {
        let idx = self
            .find_index(scope, dst_port)
            .or_else(|| self.find_index(BindSpec::Unbound, dst_port))
            .ok_or(NetStackError::NotFound)?;
        self.sockets[idx].enqueue(from, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_roundtrips_with_valid_checksum() {
        let src = Ipv4Addr::from_octets(10, 0, 0, 1);
        let dst = Ipv4Addr::from_octets(10, 0, 0, 2);
        let dgram = build_datagram(src, dst, 1234, 53, b"hello");
        assert!(verify_checksum(src, dst, &dgram));
        let (hdr, body) = UdpHeader::parse(&dgram).unwrap();
        assert_eq!(hdr.src_port, 1234);
        assert_eq!(hdr.dst_port, 53);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn zero_checksum_on_wire_is_always_accepted() {
        let mut dgram = build_datagram(
            Ipv4Addr::from_octets(1, 1, 1, 1),
            Ipv4Addr::from_octets(2, 2, 2, 2),
            1,
            2,
            b"x",
        );
        dgram[6] = 0;
        dgram[7] = 0;
        assert!(verify_checksum(
            Ipv4Addr::from_octets(9, 9, 9, 9),
            Ipv4Addr::from_octets(8, 8, 8, 8),
            &dgram
        ));
    }

    #[test]
    fn bind_zero_allocates_ephemeral_then_rejects_duplicate() {
        let mut t = SocketTable::new(8);
        let id = t.bind(BindSpec::Unbound, 0).unwrap();
        let sock = t.get_mut(id).unwrap();
        assert!(sock.port >= EPHEMERAL_BASE);

        let port = sock.port;
        assert_eq!(t.bind(BindSpec::Unbound, port), Err(NetStackError::Busy));
    }

    #[test]
    fn deliver_routes_by_bind_scope_then_wildcard() {
        let mut t = SocketTable::new(4);
        let bound = t.bind(BindSpec::BoundL3(1), 68).unwrap();
        let from = Endpoint::v4(Ipv4Addr::from_octets(10, 0, 0, 1), 67);
        t.deliver(BindSpec::BoundL3(1), 68, from, alloc::vec![1, 2, 3]).unwrap();
        let sock = t.get_mut(bound).unwrap();
        assert_eq!(sock.pending(), 1);
        assert_eq!(sock.try_recv().unwrap().1, alloc::vec![1, 2, 3]);
    }

    #[test]
    fn full_rx_queue_rejects_further_deliveries() {
        let mut t = SocketTable::new(1);
        let id = t.bind(BindSpec::Unbound, 9000).unwrap();
        let from = Endpoint::v4(Ipv4Addr::from_octets(10, 0, 0, 1), 1);
        t.deliver(BindSpec::Unbound, 9000, from, alloc::vec![0]).unwrap();
        assert_eq!(
            t.deliver(BindSpec::Unbound, 9000, from, alloc::vec![0]),
            Err(NetStackError::Busy)
        );
        let _ = id;
    }
}
