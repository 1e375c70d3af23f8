//! DCF images: a diff against a base CG resolved through the enclosing
//! archive.
//!
//! Three sections: `dcf ` names the base CG (the name is bit-rotated by
//! `(len % 7) + 1`), `dfdl` is a zlib-compressed chunk map with one byte
//! per 16x16 tile (1 = identical to base, 0 = replaced), `dcgd` wraps a
//! QNT of the replacement pixels. Regions beyond the chunk grid always
//! come from the diff image.

use tracing::warn;

use super::{Cg, CgMetrics, CgType, qnt};
use crate::archive::{Archive, basename};
use crate::buffer::{Reader, Writer};
use crate::{Error, Result, encoding, zlib};

pub const DCF_CHUNK: usize = 16;

#[must_use]
pub fn checkfmt(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"dcf "
}

#[derive(Debug, Default)]
struct DcfHeader {
    width: i32,
    height: i32,
    bpp: i32,
    base_cg_name: Vec<u8>,
}

fn read_header(r: &mut Reader<'_>) -> Result<DcfHeader> {
    if !r.check_bytes(b"dcf ") {
        return Err(Error::InvalidSignature("not a DCF file".into()));
    }
    let header_size = r.i32()?;
    if !(0..=4096).contains(&header_size) {
        return Err(Error::invalid("invalid header size in DCF file"));
    }
    let next_pos = r.index() + header_size as usize;

    if r.i32()? != 1 {
        return Err(Error::UnsupportedFormat("unsupported DCF version".into()));
    }
    let mut hdr = DcfHeader {
        width: r.i32()?,
        height: r.i32()?,
        bpp: r.i32()?,
        ..DcfHeader::default()
    };
    if hdr.bpp != 32 {
        return Err(Error::UnsupportedFormat("unsupported BPP in DCF file".into()));
    }

    let name_length = r.i32()?;
    if !(0..=2000).contains(&name_length) {
        return Err(Error::invalid("invalid base CG name length in DCF header"));
    }
    let rot = (name_length % 7 + 1) as u32;
    hdr.base_cg_name = r
        .bytes(name_length as usize)?
        .iter()
        .map(|&b| b.rotate_left(rot))
        .collect();

    if r.index() != next_pos {
        warn!("Extra data at end of DCF header");
        r.seek(next_pos);
    }
    Ok(hdr)
}

/// Inflate the `dfdl` chunk map. The first 4 bytes of the inflated data
/// carry its own length.
fn read_dfdl(r: &mut Reader<'_>) -> Result<Vec<u8>> {
    if !r.check_bytes(b"dfdl") {
        return Err(Error::invalid("expected dfdl section"));
    }
    let dfdl_size = r.i32()?;
    if !(4..=10000).contains(&dfdl_size) {
        return Err(Error::invalid("invalid size for dfdl section"));
    }
    let next_pos = r.index() + dfdl_size as usize;

    let uncompressed_size = r.u32()? as usize;
    if uncompressed_size > 40000 {
        return Err(Error::invalid("invalid size for uncompressed chunk map"));
    }
    if r.remaining() < dfdl_size as usize - 4 {
        return Err(Error::invalid("dfdl section exceeds buffer"));
    }
    let chunk_map = zlib::inflate(&r.data()[..dfdl_size as usize - 4], uncompressed_size)?;
    r.seek(next_pos);
    Ok(chunk_map)
}

fn read_dcgd<'a>(r: &mut Reader<'a>) -> Result<&'a [u8]> {
    if !r.check_bytes(b"dcgd") {
        return Err(Error::invalid("expected dcgd section"));
    }
    let dcgd_size = r.i32()?;
    if dcgd_size < 0 || dcgd_size as usize > r.remaining() {
        return Err(Error::invalid("invalid size for dcgd section"));
    }
    Ok(&r.data()[..dcgd_size as usize])
}

fn blit(base: &mut Cg, diff: &Cg, x: usize, y: usize, w: usize, h: usize) {
    let stride = base.metrics.w as usize * 4;
    for row in 0..h {
        let off = stride * (row + y) + x * 4;
        base.pixels[off..off + w * 4].copy_from_slice(&diff.pixels[off..off + w * 4]);
    }
}

/// Copy replaced chunks (and the off-grid remainder) from the diff image
/// over the base.
fn apply_diff(base: &mut Cg, diff: &Cg, chunk_map: &[u8]) {
    if base.metrics.w != diff.metrics.w {
        warn!(
            "DCF base CG width differs: {} / {}",
            base.metrics.w, diff.metrics.w
        );
        return;
    }
    if base.metrics.h != diff.metrics.h {
        warn!("DCF base CG height differs");
        return;
    }

    let w = base.metrics.w as usize;
    let h = base.metrics.h as usize;
    let chunks_w = w / DCF_CHUNK;
    let chunks_h = h / DCF_CHUNK;
    for (i, &flag) in chunk_map.iter().enumerate() {
        if flag != 0 || chunks_w == 0 {
            continue;
        }
        let chunk_x = i % chunks_w;
        let chunk_y = i / chunks_w;
        if chunk_y >= chunks_h {
            break;
        }
        blit(
            base,
            diff,
            chunk_x * DCF_CHUNK,
            chunk_y * DCF_CHUNK,
            DCF_CHUNK,
            DCF_CHUNK,
        );
    }

    // leftover pixels that don't fit in a chunk are carried by the diff CG
    let remaining_w = w % DCF_CHUNK;
    let remaining_h = h % DCF_CHUNK;
    if remaining_w != 0 {
        blit(base, diff, chunks_w * DCF_CHUNK, 0, remaining_w, h);
    }
    if remaining_h != 0 {
        blit(base, diff, 0, chunks_h * DCF_CHUNK, w, remaining_h);
    }
}

fn get_base_cg(name: &[u8], ar: &dyn Archive) -> Option<Cg> {
    let file = ar.get_by_basename(&basename(name))?;
    let file = file.ok()?;
    super::load(&file.data, Some(ar)).ok()
}

pub fn extract(data: &[u8], ar: Option<&dyn Archive>) -> Result<Cg> {
    let mut r = Reader::new(data);
    let hdr = read_header(&mut r)?;
    let chunk_map = read_dfdl(&mut r)?;

    if chunk_map.len() < 4 {
        return Err(Error::invalid("chunk map too small"));
    }
    let declared = u32::from_le_bytes(chunk_map[0..4].try_into().unwrap()) as usize;
    if declared != chunk_map.len() - 4 {
        return Err(Error::invalid("invalid size in chunk map"));
    }

    let cg_data = read_dcgd(&mut r)?;

    let Some(ar) = ar else {
        return qnt::extract(cg_data);
    };

    let Some(mut base_cg) = get_base_cg(&hdr.base_cg_name, ar) else {
        warn!(
            "Failed to load DCF base CG: \"{}\"",
            encoding::sjis_to_utf8(&hdr.base_cg_name)
        );
        return qnt::extract(cg_data);
    };

    let diff_cg = super::load(cg_data, None).map_err(|err| {
        warn!("Failed to load DCF diff CG");
        err
    })?;
    apply_diff(&mut base_cg, &diff_cg, &chunk_map[4..]);
    Ok(base_cg)
}

/// Locate the inner QNT without touching the chunk map, for the
/// metrics-only path.
fn get_qnt(data: &[u8]) -> Option<&[u8]> {
    if data.get(0..4)? != b"dcf ".as_slice() {
        return None;
    }
    let h2 = 8 + u32::from_le_bytes(data.get(4..8)?.try_into().unwrap()) as usize;
    if data.get(h2..h2 + 4)? != b"dfdl" {
        return None;
    }
    let h3 = h2 + 8 + u32::from_le_bytes(data.get(h2 + 4..h2 + 8)?.try_into().unwrap()) as usize;
    if data.get(h3..h3 + 4)? != b"dcgd" {
        return None;
    }
    if data.get(h3 + 8..h3 + 12)? != b"QNT\0" {
        return None;
    }
    data.get(h3 + 8..)
}

pub fn get_metrics(data: &[u8]) -> Result<CgMetrics> {
    let qnt_data = get_qnt(data).ok_or_else(|| Error::invalid("bad DCF section layout"))?;
    qnt::get_metrics(qnt_data)
}

/// The decrypted base CG name from a DCF header.
pub fn get_base_cg_name(data: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::new(data);
    Ok(read_header(&mut r)?.base_cg_name)
}

/// Encode `diff` as a DCF against `base`. Chunks identical between the two
/// are zeroed out of the stored QNT and marked in the chunk map.
pub fn encode(base: &Cg, diff: &Cg, base_cg_name: &[u8]) -> Result<Vec<u8>> {
    if base.metrics.w != diff.metrics.w || base.metrics.h != diff.metrics.h {
        return Err(Error::invalid("base and diff CG dimensions differ"));
    }

    let w = base.metrics.w as usize;
    let h = base.metrics.h as usize;
    let chunks_w = w / DCF_CHUNK;
    let chunks_h = h / DCF_CHUNK;
    let stride = w * 4;

    // chunk map: 1 = identical, 0 = replaced
    let mut chunk_map = vec![1u8; chunks_w * chunks_h];
    for chunk_y in 0..chunks_h {
        for chunk_x in 0..chunks_w {
            let i = chunk_y * chunks_w + chunk_x;
            'scan: for y in chunk_y * DCF_CHUNK..(chunk_y + 1) * DCF_CHUNK {
                let off = y * stride + chunk_x * DCF_CHUNK * 4;
                let base_row = &base.pixels[off..off + DCF_CHUNK * 4];
                let diff_row = &diff.pixels[off..off + DCF_CHUNK * 4];
                if base_row == diff_row {
                    continue;
                }
                for x in 0..DCF_CHUNK {
                    let bp = &base_row[x * 4..x * 4 + 4];
                    let dp = &diff_row[x * 4..x * 4 + 4];
                    // both fully transparent counts as identical
                    if bp[3] == 0 && dp[3] == 0 {
                        continue;
                    }
                    if bp != dp {
                        chunk_map[i] = 0;
                        break 'scan;
                    }
                }
            }
        }
    }

    // zero identical chunks out of the stored diff
    let mut stored = diff.clone();
    for chunk_y in 0..chunks_h {
        for chunk_x in 0..chunks_w {
            if chunk_map[chunk_y * chunks_w + chunk_x] == 0 {
                continue;
            }
            for y in chunk_y * DCF_CHUNK..(chunk_y + 1) * DCF_CHUNK {
                let off = y * stride + chunk_x * DCF_CHUNK * 4;
                stored.pixels[off..off + DCF_CHUNK * 4].fill(0);
            }
        }
    }

    let mut full_map = Writer::new();
    full_map.u32(chunk_map.len() as u32);
    full_map.bytes(&chunk_map);
    let map_compressed = zlib::deflate(full_map.as_slice(), flate2::Compression::best())?;

    let cg_data = super::write_mem(&stored, CgType::Qnt)?;

    let mut out = Writer::new();
    out.bytes(b"dcf ");
    out.u32(20 + base_cg_name.len() as u32);
    out.u32(1);
    out.i32(base.metrics.w);
    out.i32(base.metrics.h);
    out.i32(32);
    out.u32(base_cg_name.len() as u32);
    let rot = (base_cg_name.len() % 7 + 1) as u32;
    for &b in base_cg_name {
        out.u8(b.rotate_right(rot));
    }

    out.bytes(b"dfdl");
    out.u32(4 + map_compressed.len() as u32);
    out.u32(full_map.index() as u32);
    out.bytes(&map_compressed);

    out.bytes(b"dcgd");
    out.u32(cg_data.len() as u32);
    out.bytes(&cg_data);

    Ok(out.into_vec())
}
