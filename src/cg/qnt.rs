//! QNT images: the engine's native predictive codec over zlib.
//!
//! Pixels are stored as three colour planes (B, G, R) interleaved in 2x2
//! cells, then run through a row-major predictor: the first row and column
//! predict from the left/above neighbour, interior pixels from the average
//! `(top + left) >> 1`. The alpha plane uses the same predictor on its
//! own zlib stream. Cell rows and columns round up to even; odd tails are
//! carried in half-filled cells.

use std::io::Write;

use tracing::warn;

use super::{Cg, CgMetrics, CgType};
use crate::buffer::Reader;
use crate::{Error, Result, zlib};

#[derive(Debug, Clone, Copy, Default)]
pub struct QntHeader {
    pub hdr_size: usize,
    pub x0: i32,
    pub y0: i32,
    pub width: i32,
    pub height: i32,
    pub bpp: i32,
    pub rsv: i32,
    pub pixel_size: usize,
    pub alpha_size: usize,
}

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 3 && data[0] == b'Q' && data[1] == b'N' && data[2] == b'T'
}

pub fn extract_header(data: &[u8]) -> Result<QntHeader> {
    let mut r = Reader::new(data);
    r.skip(4);
    let rsv0 = r.i32()?;
    let mut hdr = QntHeader::default();
    if rsv0 == 0 {
        hdr.hdr_size = 48;
    } else {
        hdr.hdr_size = r.i32()? as usize;
    }
    hdr.x0 = r.i32()?;
    hdr.y0 = r.i32()?;
    hdr.width = r.i32()?;
    hdr.height = r.i32()?;
    hdr.bpp = r.i32()?;
    hdr.rsv = r.i32()?;
    hdr.pixel_size = r.i32()? as usize;
    hdr.alpha_size = r.i32()? as usize;
    if hdr.bpp != 24 {
        warn!("Unsupported bits-per-pixel: {}", hdr.bpp);
    }
    if hdr.width < 0 || hdr.height < 0 {
        return Err(Error::invalid("negative QNT dimensions"));
    }
    Ok(hdr)
}

fn init_metrics(hdr: &QntHeader) -> CgMetrics {
    CgMetrics {
        x: hdr.x0,
        y: hdr.y0,
        w: hdr.width,
        h: hdr.height,
        bpp: hdr.bpp,
        has_pixel: hdr.pixel_size > 0,
        has_alpha: hdr.alpha_size > 0,
        pixel_pitch: hdr.width * (hdr.bpp / 8),
        alpha_pitch: 1,
    }
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    Ok(init_metrics(&extract_header(data)?))
}

/// Inflate one plane stream, padded out to `need` bytes so half-filled
/// trailing cells always have backing data.
fn inflate_plane(data: &[u8], need: usize) -> Result<Vec<u8>> {
    let mut raw = zlib::inflate(data, need)?;
    if raw.len() < need {
        raw.resize(need, 0);
    }
    Ok(raw)
}

fn extract_pixels(hdr: &QntHeader, data: &[u8]) -> Result<Vec<u8>> {
    let w = hdr.width as usize;
    let h = hdr.height as usize;
    let ew = (w + 1) & !1;
    let eh = (h + 1) & !1;
    let raw = inflate_plane(data, ew * eh * 3)?;
    let mut pic = vec![0u8; w * h * 3];
    if w == 0 || h == 0 {
        return Ok(pic);
    }

    // unpack the 2x2 cell layout, one colour plane at a time
    let mut j = 0;
    for i in (0..3).rev() {
        let mut y = 0;
        while y + 1 < h {
            let mut x = 0;
            while x + 1 < w {
                pic[(y * w + x) * 3 + i] = raw[j];
                pic[((y + 1) * w + x) * 3 + i] = raw[j + 1];
                pic[(y * w + x + 1) * 3 + i] = raw[j + 2];
                pic[((y + 1) * w + x + 1) * 3 + i] = raw[j + 3];
                j += 4;
                x += 2;
            }
            if x != w {
                pic[(y * w + x) * 3 + i] = raw[j];
                pic[((y + 1) * w + x) * 3 + i] = raw[j + 1];
                j += 4;
            }
            y += 2;
        }
        if y != h {
            let mut x = 0;
            while x + 1 < w {
                pic[(y * w + x) * 3 + i] = raw[j];
                pic[(y * w + x + 1) * 3 + i] = raw[j + 2];
                j += 4;
                x += 2;
            }
            if x != w {
                pic[(y * w + x) * 3 + i] = raw[j];
                j += 4;
            }
        }
    }

    // invert the predictor
    for x in 1..w {
        for c in 0..3 {
            pic[x * 3 + c] = pic[(x - 1) * 3 + c].wrapping_sub(pic[x * 3 + c]);
        }
    }
    for y in 1..h {
        for c in 0..3 {
            pic[(y * w) * 3 + c] = pic[((y - 1) * w) * 3 + c].wrapping_sub(pic[(y * w) * 3 + c]);
        }
        for x in 1..w {
            for c in 0..3 {
                let up = i32::from(pic[((y - 1) * w + x) * 3 + c]);
                let left = i32::from(pic[(y * w + x - 1) * 3 + c]);
                let pred = ((up + left) >> 1) as u8;
                pic[(y * w + x) * 3 + c] = pred.wrapping_sub(pic[(y * w + x) * 3 + c]);
            }
        }
    }
    Ok(pic)
}

fn extract_alpha(hdr: &QntHeader, data: &[u8]) -> Result<Vec<u8>> {
    let w = hdr.width as usize;
    let h = hdr.height as usize;
    let ew = (w + 1) & !1;
    let eh = (h + 1) & !1;
    let raw = inflate_plane(data, ew * eh + 1)?;
    let mut pic = vec![0u8; w * h];
    if w == 0 || h == 0 {
        return Ok(pic);
    }

    let mut i = 1;
    if w > 1 {
        pic[0] = raw[0];
        for x in 1..w {
            pic[x] = pic[x - 1].wrapping_sub(raw[i]);
            i += 1;
        }
        if w % 2 == 1 {
            i += 1;
        }
    }
    if h > 1 {
        for y in 1..h {
            pic[y * w] = pic[(y - 1) * w].wrapping_sub(raw[i]);
            i += 1;
            for x in 1..w {
                let left = i32::from(pic[y * w + x - 1]);
                let up = i32::from(pic[(y - 1) * w + x]);
                pic[y * w + x] = (((left + up) >> 1) as u8).wrapping_sub(raw[i]);
                i += 1;
            }
            if w % 2 == 1 {
                i += 1;
            }
        }
    }
    Ok(pic)
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let hdr = extract_header(data)?;
    let metrics = init_metrics(&hdr);
    let w = hdr.width as usize;
    let h = hdr.height as usize;

    let total = hdr
        .hdr_size
        .checked_add(hdr.pixel_size)
        .and_then(|v| v.checked_add(hdr.alpha_size));
    if total.is_none_or(|t| data.len() < t) {
        return Err(Error::invalid("QNT stream sizes exceed buffer"));
    }

    let pixels = if hdr.pixel_size > 0 {
        extract_pixels(&hdr, &data[hdr.hdr_size..hdr.hdr_size + hdr.pixel_size])?
    } else {
        vec![0u8; w * h * 3]
    };

    let alpha = if hdr.alpha_size > 0 {
        extract_alpha(
            &hdr,
            &data[hdr.hdr_size + hdr.pixel_size..hdr.hdr_size + hdr.pixel_size + hdr.alpha_size],
        )?
    } else {
        // some alpha-less CGs rely on an opaque channel being synthesized
        vec![0xffu8; w * h]
    };

    let mut rgba = Vec::with_capacity(w * h * 4);
    for p in 0..w * h {
        rgba.extend_from_slice(&pixels[p * 3..p * 3 + 3]);
        rgba.push(alpha[p]);
    }

    Ok(Cg {
        kind: CgType::Qnt,
        metrics,
        pixels: rgba,
    })
}

/// Apply the predictor in place over RGBA rows (alpha filters with the
/// colour channels; the encoder splits the planes afterwards).
fn filter(rows: &mut [u8], stride: usize, w: usize, h: usize) {
    for y in (1..h).rev() {
        for x in (1..w).rev() {
            for c in 0..4 {
                let up = i32::from(rows[(y - 1) * stride + x * 4 + c]);
                let left = i32::from(rows[y * stride + (x - 1) * 4 + c]);
                let cur = rows[y * stride + x * 4 + c];
                rows[y * stride + x * 4 + c] = (((up + left) >> 1) as u8).wrapping_sub(cur);
            }
        }
        for c in 0..4 {
            let up = rows[(y - 1) * stride + c];
            let cur = rows[y * stride + c];
            rows[y * stride + c] = up.wrapping_sub(cur);
        }
    }
    for x in (1..w).rev() {
        for c in 0..4 {
            let left = rows[(x - 1) * 4 + c];
            let cur = rows[x * 4 + c];
            rows[x * 4 + c] = left.wrapping_sub(cur);
        }
    }
}

fn encode_pixels(rows: &[u8], stride: usize, ew: usize, eh: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(ew * eh * 3);
    for c in (0..3).rev() {
        for y in (0..eh).step_by(2) {
            for x in (0..ew).step_by(2) {
                buf.push(rows[y * stride + x * 4 + c]);
                buf.push(rows[(y + 1) * stride + x * 4 + c]);
                buf.push(rows[y * stride + (x + 1) * 4 + c]);
                buf.push(rows[(y + 1) * stride + (x + 1) * 4 + c]);
            }
        }
    }
    zlib::deflate(&buf, flate2::Compression::best())
}

fn encode_alpha(rows: &[u8], stride: usize, ew: usize, eh: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(ew * eh);
    for y in 0..eh {
        for x in 0..ew {
            buf.push(rows[y * stride + x * 4 + 3]);
        }
    }
    zlib::deflate(&buf, flate2::Compression::best())
}

/// Encode RGBA8 pixels as QNT.
pub fn write(cg: &Cg, out: &mut dyn Write) -> Result<()> {
    let w = cg.metrics.w as usize;
    let h = cg.metrics.h as usize;
    let ew = (w + 1) & !1;
    let eh = (h + 1) & !1;
    let stride = ew * 4;

    let mut rows = vec![0u8; stride * eh];
    for y in 0..h {
        rows[y * stride..y * stride + w * 4]
            .copy_from_slice(&cg.pixels[y * w * 4..(y + 1) * w * 4]);
    }
    filter(&mut rows, stride, w, h);

    let pixel_data = encode_pixels(&rows, stride, ew, eh)?;
    let alpha_data = encode_alpha(&rows, stride, ew, eh)?;

    let hdr_size = 52u32;
    let mut header = crate::buffer::Writer::new();
    header.bytes(b"QNT\0");
    header.u32(1);
    header.u32(hdr_size);
    header.i32(0); // x0
    header.i32(0); // y0
    header.i32(cg.metrics.w);
    header.i32(cg.metrics.h);
    header.i32(24);
    header.i32(1); // rsv
    header.u32(pixel_data.len() as u32);
    header.u32(alpha_data.len() as u32);
    while header.index() < hdr_size as usize {
        header.u8(0);
    }

    out.write_all(header.as_slice())?;
    out.write_all(&pixel_data)?;
    out.write_all(&alpha_data)?;
    Ok(())
}
