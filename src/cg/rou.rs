//! ROU images: fixed header plus raw BGR pixel and/or alpha planes.

use super::{Cg, CgMetrics, CgType};
use crate::buffer::Reader;
use crate::{Error, Result};

const ROU_HEADER_SIZE: usize = 0x44;

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"ROU\0"
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    if data.len() < ROU_HEADER_SIZE {
        return Err(Error::invalid("data size too small for ROU header"));
    }
    let mut r = Reader::new(data);
    r.seek(0x14);
    let w = r.i32()?;
    let h = r.i32()?;
    let bpp = r.i32()?;
    r.seek(0x28);
    let has_alpha = r.u32()? > 0;
    Ok(CgMetrics {
        x: 0,
        y: 0,
        w,
        h,
        bpp,
        has_pixel: true,
        has_alpha,
        pixel_pitch: w * if has_alpha { 4 } else { 3 },
        alpha_pitch: 1,
    })
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let metrics = get_metrics(data)?;
    let mut r = Reader::new(data);
    r.seek(8);
    let header_size = r.u32()? as usize;
    r.seek(0x24);
    let pixels_size = r.u32()? as usize;
    let alpha_size = r.u32()? as usize;

    let width = metrics.w as usize;
    let height = metrics.h as usize;
    let npixels = width * height;

    if data.len() != header_size + pixels_size + alpha_size {
        return Err(Error::invalid("ROU size does not match expected size"));
    }
    if pixels_size != 0 && pixels_size != npixels * 3 {
        return Err(Error::invalid("ROU: unexpected pixel size"));
    }
    if alpha_size != 0 && alpha_size != npixels {
        return Err(Error::invalid("ROU: unexpected alpha size"));
    }
    if pixels_size == 0 && alpha_size == 0 {
        return Err(Error::invalid("ROU: no pixel or alpha data found"));
    }

    let body = &data[header_size..];
    let mut dst = vec![0u8; npixels * 4];

    if alpha_size == 0 {
        for (i, px) in body.chunks_exact(3).take(npixels).enumerate() {
            dst[i * 4] = px[2];
            dst[i * 4 + 1] = px[1];
            dst[i * 4 + 2] = px[0];
            dst[i * 4 + 3] = 0xff;
        }
    } else if pixels_size == 0 {
        for (i, &a) in body.iter().take(npixels).enumerate() {
            dst[i * 4 + 3] = a;
        }
    } else {
        let alpha = &body[pixels_size..];
        for (i, px) in body.chunks_exact(3).take(npixels).enumerate() {
            dst[i * 4] = px[2];
            dst[i * 4 + 1] = px[1];
            dst[i * 4 + 2] = px[0];
            dst[i * 4 + 3] = alpha[i];
        }
    }

    Ok(Cg {
        kind: CgType::Rou,
        metrics,
        pixels: dst,
    })
}
