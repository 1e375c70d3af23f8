//! Image (CG) loading and saving.
//!
//! Formats are sniffed by magic bytes. The metrics path decodes only the
//! header and never allocates pixel data; the load path always produces
//! RGBA8 with pitch `w * 4`. Composite formats (DCF, the WebP `OVER`
//! record) may chain back into an enclosing archive to resolve a base CG.

use std::io::Write;

use tracing::warn;

use crate::archive::Archive;
use crate::{Error, Result};

pub mod ajp;
pub mod dcf;
mod jpeg;
pub mod pcf;
mod png;
pub mod qnt;
pub mod rou;
mod webp;

/// Recognised CG formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgType {
    Unknown = 1,
    Qnt = 2,
    Ajp = 3,
    Png = 4,
    Pms8 = 5,
    Pms16 = 6,
    Webp = 7,
    Dcf = 8,
    Jpeg = 9,
    Pcf = 10,
    Rou = 11,
}

impl CgType {
    /// Conventional file extension for the format.
    #[must_use]
    pub fn file_extension(self) -> &'static str {
        match self {
            CgType::Unknown => "",
            CgType::Qnt => "qnt",
            CgType::Ajp => "ajp",
            CgType::Png => "png",
            CgType::Pms8 | CgType::Pms16 => "pms",
            CgType::Webp => "webp",
            CgType::Dcf => "dcf",
            CgType::Jpeg => "jpg",
            CgType::Pcf => "pcf",
            CgType::Rou => "rou",
        }
    }
}

/// Image dimensions and layout, derivable without decoding pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgMetrics {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub bpp: i32,
    pub has_pixel: bool,
    pub has_alpha: bool,
    pub pixel_pitch: i32,
    pub alpha_pitch: i32,
}

/// A decoded image: RGBA8 pixels with pitch `w * 4`.
#[derive(Debug, Clone)]
pub struct Cg {
    pub kind: CgType,
    pub metrics: CgMetrics,
    pub pixels: Vec<u8>,
}

/// Identify the format of an image buffer by its magic bytes.
#[must_use]
pub fn check_format(data: &[u8]) -> CgType {
    if qnt::checkfmt(data) {
        CgType::Qnt
    } else if ajp::checkfmt(data) {
        CgType::Ajp
    } else if png::checkfmt(data) {
        CgType::Png
    } else if webp::checkfmt(data) {
        CgType::Webp
    } else if dcf::checkfmt(data) {
        CgType::Dcf
    } else if pms8_checkfmt(data) {
        CgType::Pms8
    } else if pms16_checkfmt(data) {
        CgType::Pms16
    } else if jpeg::checkfmt(data) {
        CgType::Jpeg
    } else if pcf::checkfmt(data) {
        CgType::Pcf
    } else if rou::checkfmt(data) {
        CgType::Rou
    } else {
        CgType::Unknown
    }
}

fn pms8_checkfmt(data: &[u8]) -> bool {
    data.len() > 6 && data[0] == b'P' && data[1] == b'M' && data[6] == 8
}

fn pms16_checkfmt(data: &[u8]) -> bool {
    data.len() > 6 && data[0] == b'P' && data[1] == b'M' && data[6] == 16
}

/// Header-only metrics extraction.
pub fn metrics(data: &[u8]) -> Result<CgMetrics> {
    match check_format(data) {
        CgType::Qnt => qnt::get_metrics(data),
        CgType::Ajp => ajp::get_metrics(data),
        CgType::Png => png::get_metrics(data),
        CgType::Webp => webp::get_metrics(data),
        CgType::Dcf => dcf::get_metrics(data),
        CgType::Jpeg => jpeg::get_metrics(data),
        CgType::Pcf => pcf::get_metrics(data),
        CgType::Rou => rou::get_metrics(data),
        CgType::Pms8 | CgType::Pms16 => {
            Err(Error::UnsupportedFormat("PMS metrics not supported".into()))
        }
        CgType::Unknown => {
            warn!("Unknown CG type");
            Err(Error::InvalidSignature("unknown CG format".into()))
        }
    }
}

/// Decode an image to RGBA8. `ar` is the enclosing archive, used by
/// composite formats to resolve their base CG; pass `None` when there is
/// none (the composite then decodes its own payload alone).
pub fn load(data: &[u8], ar: Option<&dyn Archive>) -> Result<Cg> {
    match check_format(data) {
        CgType::Qnt => qnt::extract(data),
        CgType::Ajp => ajp::extract(data),
        CgType::Png => png::extract(data),
        CgType::Webp => webp::extract(data, ar),
        CgType::Dcf => dcf::extract(data, ar),
        CgType::Jpeg => jpeg::extract(data),
        CgType::Pcf => pcf::extract(data),
        CgType::Rou => rou::extract(data),
        CgType::Pms8 | CgType::Pms16 => {
            Err(Error::UnsupportedFormat("PMS decoding not supported".into()))
        }
        CgType::Unknown => {
            warn!("Unknown CG type");
            Err(Error::InvalidSignature("unknown CG format".into()))
        }
    }
}

/// Load an entry from an archive and decode it, resolving composite
/// references through the same archive.
pub fn load_from_archive(ar: &dyn Archive, no: usize) -> Result<Cg> {
    let file = ar
        .get(no)
        .ok_or_else(|| Error::invalid(format!("failed to load CG {no}")))??;
    load(&file.data, Some(ar))
}

/// Header-only metrics for an archive entry.
pub fn metrics_from_archive(ar: &dyn Archive, no: usize) -> Result<CgMetrics> {
    let file = ar
        .get(no)
        .ok_or_else(|| Error::invalid(format!("failed to load CG {no}")))??;
    metrics(&file.data)
}

/// Encode `cg` in the requested format. Only QNT, PNG and WebP have
/// encoders.
pub fn write(cg: &Cg, kind: CgType, out: &mut dyn Write) -> Result<()> {
    match kind {
        CgType::Qnt => qnt::write(cg, out),
        CgType::Png => png::write(cg, out),
        CgType::Webp => webp::write(cg, out),
        _ => Err(Error::UnsupportedFormat(format!(
            "encoding not supported for CG type {kind:?}"
        ))),
    }
}

/// Encode to an in-memory buffer.
pub fn write_mem(cg: &Cg, kind: CgType) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write(cg, kind, &mut out)?;
    Ok(out)
}
