//! PNG adapter over the `image` crate.

use std::io::{Cursor, Write};

use image::codecs::png::{PngDecoder, PngEncoder};
use image::{DynamicImage, ImageDecoder, ImageEncoder};

use super::{Cg, CgMetrics, CgType};
use crate::{Error, Result};

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 8 && data[0..8] == [137, 80, 78, 71, 13, 10, 26, 10]
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    let dec = PngDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let (w, h) = dec.dimensions();
    let has_alpha = dec.color_type().has_alpha();
    Ok(CgMetrics {
        x: 0,
        y: 0,
        w: w as i32,
        h: h as i32,
        bpp: if has_alpha { 32 } else { 24 },
        has_pixel: true,
        has_alpha,
        pixel_pitch: w as i32 * if has_alpha { 4 } else { 3 },
        alpha_pitch: 1,
    })
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let metrics = get_metrics(data)?;
    let dec = PngDecoder::new(Cursor::new(data)).map_err(|e| Error::invalid(e.to_string()))?;
    let img = DynamicImage::from_decoder(dec).map_err(|e| Error::invalid(e.to_string()))?;
    Ok(Cg {
        kind: CgType::Png,
        metrics,
        pixels: img.into_rgba8().into_raw(),
    })
}

pub fn write(cg: &Cg, out: &mut dyn Write) -> Result<()> {
    PngEncoder::new(out)
        .write_image(
            &cg.pixels,
            cg.metrics.w as u32,
            cg.metrics.h as u32,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| Error::invalid(e.to_string()))
}
