//! AJP images: an obfuscated JPEG colour layer combined with a separate
//! alpha mask.
//!
//! The header names a JPEG sub-buffer and a mask sub-buffer, each with its
//! first 16 bytes XOR-masked by a fixed key. The mask is one of: a PMS8
//! image, a WebP whose alpha channel is taken, or a raw zlib stream.

use tracing::warn;

use super::{Cg, CgMetrics, CgType, jpeg, pms8_checkfmt, webp};
use crate::buffer::Reader;
use crate::{Error, Result, zlib};

const AJP_KEY: [u8; 16] = [
    0x5d, 0x91, 0xae, 0x87, 0x4a, 0x56, 0x41, 0xcd, 0x83, 0xec, 0x4c, 0x92, 0xb5, 0xcb, 0x16, 0x34,
];

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"AJP\0"
}

#[derive(Debug, Clone, Copy)]
struct AjpHeader {
    width: u32,
    height: u32,
    jpeg_off: usize,
    jpeg_size: usize,
    mask_off: usize,
    mask_size: usize,
}

fn extract_header(data: &[u8]) -> Result<AjpHeader> {
    let mut r = Reader::new(data);
    r.seek(12);
    Ok(AjpHeader {
        width: r.u32()?,
        height: r.u32()?,
        jpeg_off: r.u32()? as usize,
        jpeg_size: r.u32()? as usize,
        mask_off: r.u32()? as usize,
        mask_size: r.u32()? as usize,
    })
}

fn init_metrics(hdr: &AjpHeader) -> CgMetrics {
    CgMetrics {
        x: 0,
        y: 0,
        w: hdr.width as i32,
        h: hdr.height as i32,
        bpp: 24,
        has_pixel: hdr.jpeg_size > 0,
        has_alpha: hdr.mask_size > 0,
        pixel_pitch: hdr.width as i32 * 3,
        alpha_pitch: 1,
    }
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    Ok(init_metrics(&extract_header(data)?))
}

fn decrypt(data: &mut [u8]) {
    for (b, k) in data.iter_mut().zip(AJP_KEY.iter()) {
        *b ^= k;
    }
}

fn read_mask(mask_data: &[u8], hdr: &AjpHeader) -> Option<Vec<u8>> {
    let npixels = hdr.width as usize * hdr.height as usize;
    if hdr.mask_size == 0 {
        return None;
    }
    if pms8_checkfmt(mask_data) {
        warn!("PMS8 AJP mask not supported");
        return None;
    }
    if webp::checkfmt(mask_data) {
        match webp::extract_alpha(mask_data) {
            Ok((w, h, alpha)) if w == hdr.width && h == hdr.height => return Some(alpha),
            Ok(_) => {
                warn!("Unexpected AJP mask size");
                return None;
            }
            Err(err) => {
                warn!("failed to decode AJP webp mask: {err}");
                return None;
            }
        }
    }
    if mask_data.first() == Some(&0x78) {
        match zlib::inflate(mask_data, npixels) {
            Ok(mask) => {
                if mask.len() != npixels {
                    warn!("Unexpected AJP mask size");
                }
                let mut mask = mask;
                mask.resize(npixels, 0xff);
                return Some(mask);
            }
            Err(err) => {
                warn!("failed to inflate AJP mask: {err}");
                return None;
            }
        }
    }
    warn!(
        "Unsupported AJP mask format: {:02x} {:02x} {:02x} {:02x}",
        mask_data.first().copied().unwrap_or(0),
        mask_data.get(1).copied().unwrap_or(0),
        mask_data.get(2).copied().unwrap_or(0),
        mask_data.get(3).copied().unwrap_or(0)
    );
    None
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let hdr = extract_header(data)?;
    let metrics = init_metrics(&hdr);

    if hdr.jpeg_off > data.len()
        || hdr.jpeg_off + hdr.jpeg_size > data.len()
        || hdr.mask_off > data.len()
        || hdr.mask_off + hdr.mask_size > data.len()
    {
        return Err(Error::invalid("AJP sub-buffer offsets exceed file size"));
    }

    let mut jpeg_data = data[hdr.jpeg_off..hdr.jpeg_off + hdr.jpeg_size].to_vec();
    let mut mask_data = data[hdr.mask_off..hdr.mask_off + hdr.mask_size].to_vec();
    decrypt(&mut jpeg_data);
    decrypt(&mut mask_data);

    let (w, h, rgb) = jpeg::extract_rgb(&jpeg_data)?;
    if w != hdr.width {
        warn!("AJP width doesn't match JPEG width ({w} vs. {})", hdr.width);
    }
    if h != hdr.height {
        warn!("AJP height doesn't match JPEG height ({h} vs. {})", hdr.height);
    }

    let npixels = w as usize * h as usize;
    let mask = read_mask(&mask_data, &hdr).unwrap_or_else(|| vec![0xffu8; npixels]);

    let mut pixels = Vec::with_capacity(npixels * 4);
    for i in 0..npixels {
        pixels.extend_from_slice(&rgb[i * 3..i * 3 + 3]);
        pixels.push(mask.get(i).copied().unwrap_or(0xff));
    }

    Ok(Cg {
        kind: CgType::Ajp,
        metrics,
        pixels,
    })
}
