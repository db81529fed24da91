//! DEFLATE (RFC 1951) decoder: stored, fixed-Huffman, and dynamic-Huffman
//! blocks (`spec.md` §4.12). A self-contained leaf used by [`crate::png`].
//!
//! Canonical-code construction follows RFC 1951 directly (the original
//! `shared/compression/huffman.c` builds an *encoder* tree from symbol
//! frequencies, a different problem from decoding a canonical code given
//! code lengths, so this is built from the wire format rather than
//! adapted from that file).

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{NetStackError, Result};

struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, byte_pos: 0, bit_pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32> {
        let byte = *self.data.get(self.byte_pos).ok_or(NetStackError::WireFormat)?;
        let bit = (byte >> self.bit_pos) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Ok(bit as u32)
    }

    fn read_bits(&mut self, n: u8) -> Result<u32> {
        let mut v = 0u32;
        for i in 0..n {
            v |= self.read_bit()? << i;
        }
        Ok(v)
    }

    fn align_to_byte(&mut self) {
        if self.bit_pos != 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.align_to_byte();
        let end = self.byte_pos.checked_add(n).ok_or(NetStackError::WireFormat)?;
        let slice = self.data.get(self.byte_pos..end).ok_or(NetStackError::WireFormat)?;
        self.byte_pos = end;
        Ok(slice)
    }
}

/// A canonical Huffman decode table: `counts[len]` = number of codes of
/// that length, `symbols` sorted by (length, original order).
struct HuffmanTable {
    counts: [u16; 16],
    symbols: Vec<u16>,
}

impl HuffmanTable {
    fn from_code_lengths(lengths: &[u8]) -> Self {
        let mut counts = [0u16; 16];
        for &len in lengths {
            if len > 0 {
                counts[len as usize] += 1;
            }
        }
        let mut offsets = [0u16; 16];
        for len in 1..16 {
            offsets[len] = offsets[len - 1] + counts[len - 1];
        }
        let mut symbols = alloc::vec![0u16; lengths.len()];
        let mut next = offsets;
        for (sym, &len) in lengths.iter().enumerate() {
            if len > 0 {
                symbols[next[len as usize] as usize] = sym as u16;
                next[len as usize] += 1;
            }
        }
        HuffmanTable { counts, symbols }
    }

    fn decode(&self, br: &mut BitReader) -> Result<u16> {
        let mut code = 0i32;
        let mut first = 0i32;
        let mut index = 0i32;
        for len in 1..16 {
            code |= br.read_bit()? as i32;
            let count = self.counts[len] as i32;
            if code - first < count {
                return Ok(self.symbols[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(NetStackError::WireFormat)
    }
}

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537, 2049, 3073, 4097, 6145,
    8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];
const CODE_LENGTH_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

fn fixed_tables() -> (HuffmanTable, HuffmanTable) {
    let mut lit_lengths = [0u8; 288];
    for (i, l) in lit_lengths.iter_mut().enumerate() {
        *l = match i {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    let dist_lengths = [5u8; 30];
    (
        HuffmanTable::from_code_lengths(&lit_lengths),
        HuffmanTable::from_code_lengths(&dist_lengths),
    )
}

fn read_dynamic_tables(br: &mut BitReader) -> Result<(HuffmanTable, HuffmanTable)> {
    let hlit = br.read_bits(5)? as usize + 257;
    let hdist = br.read_bits(5)? as usize + 1;
    let hclen = br.read_bits(4)? as usize + 4;

    let mut cl_lengths = [0u8; 19];
    for i in 0..hclen {
        cl_lengths[CODE_LENGTH_ORDER[i]] = br.read_bits(3)? as u8;
    }
    let cl_table = HuffmanTable::from_code_lengths(&cl_lengths);

    let mut lengths = Vec::with_capacity(hlit + hdist);
    while lengths.len() < hlit + hdist {
        let sym = cl_table.decode(br)?;
        match sym {
            0..=15 => lengths.push(sym as u8),
            16 => {
                let prev = *lengths.last().ok_or(NetStackError::WireFormat)?;
                let repeat = br.read_bits(2)? + 3;
                for _ in 0..repeat {
                    lengths.push(prev);
                }
            }
            17 => {
                let repeat = br.read_bits(3)? + 3;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            18 => {
                let repeat = br.read_bits(7)? + 11;
                for _ in 0..repeat {
                    lengths.push(0);
                }
            }
            _ => return Err(NetStackError::WireFormat),
        }
    }
    if lengths.len() != hlit + hdist {
        return Err(NetStackError::WireFormat);
    }
    let lit_table = HuffmanTable::from_code_lengths(&lengths[..hlit]);
    let dist_table = HuffmanTable::from_code_lengths(&lengths[hlit..]);
    Ok((lit_table, dist_table))
}

fn inflate_block(br: &mut BitReader, lit: &HuffmanTable, dist: &HuffmanTable, out: &mut Vec<u8>) -> Result<()> {
    loop {
        let sym = lit.decode(br)?;
        match sym {
            0..=255 => out.push(sym as u8),
            256 => return Ok(()),
            257..=285 => {
                let idx = (sym - 257) as usize;
                if idx >= LENGTH_BASE.len() {
                    return Err(NetStackError::WireFormat);
                }
                let length = LENGTH_BASE[idx] as usize + br.read_bits(LENGTH_EXTRA[idx])? as usize;
                let dist_sym = dist.decode(br)? as usize;
                if dist_sym >= DIST_BASE.len() {
                    return Err(NetStackError::WireFormat);
                }
                let distance = DIST_BASE[dist_sym] as usize + br.read_bits(DIST_EXTRA[dist_sym])? as usize;
                if distance == 0 || distance > out.len() {
                    return Err(NetStackError::WireFormat);
                }
                let start = out.len() - distance;
                for i in 0..length {
                    let b = out[start + i];
                    out.push(b);
                }
            }
            _ => return Err(NetStackError::WireFormat),
        }
    }
}

/// Inflate a raw DEFLATE stream (no zlib/gzip wrapper).
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut br = BitReader::new(data);
    let mut out = Vec::new();
    loop {
        let is_final = br.read_bit()? == 1;
        let block_type = br.read_bits(2)?;
        match block_type {
            0 => {
                let len_bytes = br.read_bytes(4)?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let nlen = u16::from_le_bytes([len_bytes[2], len_bytes[3]]);
                if nlen != !(len as u16) {
                    return Err(NetStackError::WireFormat);
                }
                out.extend_from_slice(br.read_bytes(len)?);
            }
            1 => {
                let (lit, dist) = fixed_tables();
                inflate_block(&mut br, &lit, &dist, &mut out)?;
            }
            2 => {
                let (lit, dist) = read_dynamic_tables(&mut br)?;
                inflate_block(&mut br, &lit, &dist, &mut out)?;
            }
            _ => return Err(NetStackError::WireFormat),
        }
        if is_final {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_block_roundtrips() {
        // BFINAL=1, BTYPE=00 (stored), then byte-aligned LEN/NLEN/data.
        let payload = b"hello deflate";
        let mut bits = Vec::new();
        bits.push(0b001u8); // final=1, type=00 -> low 3 bits: 1,0,0 => 0b001
        let mut data = alloc::vec![bits[0]];
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(&(!(payload.len() as u16)).to_le_bytes());
        data.extend_from_slice(payload);
        let out = inflate(&data).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn fixed_huffman_block_of_literals_only() {
        // Encode "AAA" with fixed Huffman: 'A' = 0x41 falls in 0..=143 -> 8-bit codes 0x30..0xBF.
        // Symbol 'A' (65) code = 0x30 + 65 = 0x71, MSB-first per RFC1951 for fixed lit/len codes.
        let mut br_bits: Vec<u8> = Vec::new();
        let mut writer = BitWriter::new();
        writer.write_bit(1); // final
        writer.write_bits(0b01, 2); // type=01 fixed huffman, written LSB-first bit by bit (01 -> bits 1,0)
        for _ in 0..3 {
            write_fixed_literal(&mut writer, b'A');
        }
        write_fixed_end_of_block(&mut writer);
        br_bits.extend_from_slice(&writer.finish());
        let out = inflate(&br_bits).unwrap();
        assert_eq!(out, b"AAA");
    }

    // --- tiny bit-level writer used only by tests, mirroring BitReader's LSB-first convention.
    struct BitWriter {
        bytes: Vec<u8>,
        bit_pos: u8,
    }
    impl BitWriter {
        fn new() -> Self {
            BitWriter { bytes: alloc::vec![0u8], bit_pos: 0 }
        }
        fn write_bit(&mut self, bit: u32) {
            if bit != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << self.bit_pos;
            }
            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.bytes.push(0);
            }
        }
        fn write_bits(&mut self, value: u32, n: u8) {
            for i in 0..n {
                self.write_bit((value >> i) & 1);
            }
        }
        /// Fixed-Huffman literal/length codes are 7-9 bits, MSB-first per
        /// RFC1951 §3.2.6, so the caller supplies bits high-to-low.
        fn write_msb_bits(&mut self, value: u32, n: u8) {
            for i in (0..n).rev() {
                self.write_bit((value >> i) & 1);
            }
        }
        fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }

    fn write_fixed_literal(w: &mut BitWriter, byte: u8) {
        let sym = byte as u32;
        // 0..=143 -> 8-bit codes 0x30..0xBF
        w.write_msb_bits(0x30 + sym, 8);
    }

    fn write_fixed_end_of_block(w: &mut BitWriter) {
        // symbol 256 -> 7-bit code 0x00
        w.write_msb_bits(0x00, 7);
    }
}
