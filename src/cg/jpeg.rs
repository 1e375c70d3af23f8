//! JPEG adapter over the `image` crate.

use std::io::Cursor;

use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ImageDecoder};

use super::{Cg, CgMetrics, CgType};
use crate::{Error, Result};

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xff && data[1] == 0xd8
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    let dec = JpegDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    Ok(CgMetrics {
        x: 0,
        y: 0,
        w: w as i32,
        h: h as i32,
        bpp: 24,
        has_pixel: true,
        has_alpha: false,
        pixel_pitch: w as i32 * 3,
        alpha_pitch: 1,
    })
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let metrics = get_metrics(data)?;
    let dec = JpegDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let img = DynamicImage::from_decoder(dec).map_err(|e| Error::invalid(e.to_string()))?;
    Ok(Cg {
        kind: CgType::Jpeg,
        metrics,
        pixels: img.into_rgba8().into_raw(),
    })
}

/// Decode to RGB without expanding an alpha channel; used by the AJP
/// combiner which supplies its own mask.
pub(super) fn extract_rgb(data: &[u8]) -> Result<(u32, u32, Vec<u8>)> {
    let dec = JpegDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    let img = DynamicImage::from_decoder(dec).map_err(|e| Error::invalid(e.to_string()))?;
    Ok((w, h, img.into_rgb8().into_raw()))
}
