//! Thin zlib helpers over `flate2`, shared by every format that embeds a
//! deflate stream.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::{Error, Result};

/// Inflate a zlib stream. `size_hint` is the expected uncompressed size;
/// it pre-sizes the output but is not enforced (callers that require an
/// exact size check the result length).
pub(crate) fn inflate(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(out)
}

/// Inflate a zlib stream that must expand to exactly `size` bytes.
pub(crate) fn inflate_exact(data: &[u8], size: usize) -> Result<Vec<u8>> {
    let out = inflate(data, size)?;
    if out.len() != size {
        return Err(Error::Compression(format!(
            "unexpected inflated size: {} (expected {size})",
            out.len()
        )));
    }
    Ok(out)
}

pub(crate) fn deflate(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), level);
    enc.write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    enc.finish().map_err(|e| Error::Compression(e.to_string()))
}
