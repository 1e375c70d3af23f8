//! WebP adapter over the `image` crate.
//!
//! Some archives carry WebP files with a trailing `OVER` record naming a
//! base CG; pixels matching the magenta key are replaced from the base.

use std::io::{Cursor, Write};

use image::codecs::webp::{WebPDecoder, WebPEncoder};
use image::{DynamicImage, ImageDecoder};
use tracing::warn;

use super::{Cg, CgMetrics, CgType};
use crate::archive::Archive;
use crate::{Error, Result};

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

fn init_metrics(w: u32, h: u32) -> CgMetrics {
    CgMetrics {
        x: 0,
        y: 0,
        w: w as i32,
        h: h as i32,
        bpp: 24,
        has_pixel: true,
        has_alpha: true,
        pixel_pitch: w as i32 * 3,
        alpha_pitch: 1,
    }
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    let dec = WebPDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    Ok(init_metrics(w, h))
}

/// Find a trailing `OVER` record and return the base CG number, if any.
fn get_base_cg(data: &[u8]) -> Option<i32> {
    let size = data.len();
    let over = if size >= 20 && &data[size - 12..size - 8] == b"OVER" {
        &data[size - 12..]
    } else if size >= 32 && &data[size - 24..size - 20] == b"OVER" {
        &data[size - 24..]
    } else {
        return None;
    };
    let uk = i32::from_le_bytes(over[4..8].try_into().unwrap());
    if uk != 4 {
        warn!("WEBP: expected 0x4 preceding base CG number, got {uk}");
    }
    Some(i32::from_le_bytes(over[8..12].try_into().unwrap()))
}

pub fn extract(data: &[u8], ar: Option<&dyn Archive>) -> Result<Cg> {
    let dec = WebPDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    let img = DynamicImage::from_decoder(dec).map_err(|e| Error::invalid(e.to_string()))?;
    let mut cg = Cg {
        kind: CgType::Webp,
        metrics: init_metrics(w, h),
        pixels: img.into_rgba8().into_raw(),
    };

    let Some(ar) = ar else { return Ok(cg) };
    let Some(base) = get_base_cg(data) else {
        return Ok(cg);
    };
    if base <= 0 {
        return Ok(cg);
    }

    let base_cg = match super::load_from_archive(ar, (base - 1) as usize) {
        Ok(base_cg) => base_cg,
        Err(err) => {
            warn!("failed to load webp base CG: {err}");
            return Ok(cg);
        }
    };
    if base_cg.metrics.w != cg.metrics.w || base_cg.metrics.h != cg.metrics.h {
        warn!(
            "webp base CG dimensions don't match: ({},{}) / ({},{})",
            base_cg.metrics.w, base_cg.metrics.h, cg.metrics.w, cg.metrics.h
        );
        return Ok(cg);
    }

    // mask alpha color
    for (px, base_px) in cg
        .pixels
        .chunks_exact_mut(4)
        .zip(base_cg.pixels.chunks_exact(4))
    {
        if px[0] == 255 && px[1] == 0 && px[2] == 255 {
            px.copy_from_slice(base_px);
        }
    }
    Ok(cg)
}

pub fn write(cg: &Cg, out: &mut dyn Write) -> Result<()> {
    WebPEncoder::new_lossless(out)
        .encode(
            &cg.pixels,
            cg.metrics.w as u32,
            cg.metrics.h as u32,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| Error::invalid(e.to_string()))
}

/// Decode just the alpha channel; used by the AJP mask path.
pub(super) fn extract_alpha(data: &[u8]) -> Result<(u32, u32, Vec<u8>)> {
    let dec = WebPDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    let img = DynamicImage::from_decoder(dec).map_err(|e| Error::invalid(e.to_string()))?;
    let rgba = img.into_rgba8().into_raw();
    let alpha = rgba.chunks_exact(4).map(|px| px[3]).collect();
    Ok((w, h, alpha))
}
