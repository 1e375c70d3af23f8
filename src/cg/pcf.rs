//! PCF images: `pcf `/`ptdl`/`pcgd` sections wrapping a QNT. `ptdl`
//! positions the inner CG inside a virtual frame; the pixel data itself is
//! plain QNT.

use tracing::warn;

use super::{Cg, CgMetrics, qnt};
use crate::{Error, Result};

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"pcf "
}

fn get_dw(data: &[u8], off: usize) -> Option<usize> {
    Some(u32::from_le_bytes(data.get(off..off + 4)?.try_into().unwrap()) as usize)
}

/// Locate the inner QNT. Returns `(offset, size)`.
fn get_cg_offset(data: &[u8]) -> Option<(usize, usize)> {
    let pcf_size = get_dw(data, 4)?;

    let ptdl = 8 + pcf_size;
    if data.get(ptdl..ptdl + 4)? != b"ptdl" {
        return None;
    }
    let ptdl_size = get_dw(data, ptdl + 4)?;

    let pcgd = ptdl + 8 + ptdl_size;
    if data.get(pcgd..pcgd + 4)? != b"pcgd" {
        return None;
    }
    let pcgd_size = get_dw(data, pcgd + 4)?;

    if pcgd_size < 4 || data.get(pcgd + 8..pcgd + 12)? != b"QNT\0" {
        warn!("pcf CG isn't qnt format");
        return None;
    }
    Some((pcgd + 8, pcgd_size))
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    let (off, _) = get_cg_offset(data).ok_or_else(|| Error::invalid("bad PCF section layout"))?;
    qnt::get_metrics(&data[off..])
}

pub fn extract(data: &[u8]) -> Result<Cg> {
    let (off, _) = get_cg_offset(data).ok_or_else(|| Error::invalid("bad PCF section layout"))?;
    qnt::extract(&data[off..])
}
