//! FNL font libraries.
//!
//! A font library holds an index of fonts, each with a set of faces at
//! fixed heights; every face carries a fixed-size descriptor per glyph.
//! Glyph bitmaps are 1-bit, zlib-compressed, and demand-loaded. Glyphs
//! are indexed by the sequential order of Shift-JIS code points starting
//! at the ASCII space; glyph 0 is the fallback.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::warn;

use crate::buffer::Reader;
use crate::{Error, Result, zlib};

#[derive(Debug, Clone, Copy, Default)]
pub struct FnlGlyph {
    pub height: u32,
    pub real_width: u16,
    /// File offset of the compressed bitmap; 0 for an absent glyph.
    pub data_pos: u32,
    pub data_compsize: u32,
}

#[derive(Debug, Clone)]
pub struct FnlFontFace {
    pub height: u32,
    pub uk: i32,
    pub glyphs: Vec<FnlGlyph>,
}

#[derive(Debug, Clone)]
pub struct FnlFont {
    pub faces: Vec<FnlFontFace>,
}

#[derive(Debug)]
pub struct Fnl {
    file: RefCell<File>,
    pub uk: i32,
    pub filesize: u32,
    pub index_size: u32,
    pub fonts: Vec<FnlFont>,
}

/// Map an SJIS code point to its glyph index: the single-byte ranges
/// `0x20..=0x7E` and `0xA1..=0xDF` come first, then the double-byte plane
/// as `158 + fst_index*188 + snd_index` over the SJIS-legal byte ranges.
#[must_use]
pub fn char_to_index(code: u16) -> usize {
    if code < 0x20 {
        return 0;
    }
    if code < 0x7f {
        return code as usize - 0x20;
    }
    if code < 0xa1 {
        return 0;
    }
    if code < 0xe0 {
        return code as usize - 0x42;
    }

    let fst = (code >> 8) as u8;
    let snd = (code & 0xff) as u8;
    if snd < 0x40 || snd == 0x7f || snd > 0xfc {
        return 0;
    }
    let snd_index = usize::from(snd) - (0x40 + usize::from(snd > 0x7f));
    let fst_index = match fst {
        0x81..=0x9f => usize::from(fst) - 0x81,
        0xe0..=0xfc => usize::from(fst) - 0xe0 + 31,
        _ => return 0,
    };
    158 + fst_index * 188 + snd_index
}

/// Inverse of [`char_to_index`].
#[must_use]
pub fn index_to_char(index: usize) -> u16 {
    if index < 95 {
        return index as u16 + 0x20;
    }
    if index < 158 {
        return (index as u16 - 95) + 0xa1;
    }
    let index = index - 158;

    // 188 code points are encoded per SJIS first-byte; the 31 bytes from
    // 0xA0 are invalid as first-bytes
    let mut fst = 0x81 + (index / 188) as u16;
    if fst >= 0xa0 {
        fst += 31;
    }
    let mut snd = 0x40 + (index % 188) as u16;
    if snd >= 0x7f {
        snd += 1;
    }
    (fst << 8) | snd
}

fn read_face(r: &mut Reader<'_>) -> Result<FnlFontFace> {
    let height = r.u32()?;
    let uk = r.i32()?;
    let nr_glyphs = r.u32()? as usize;
    let mut glyphs = Vec::with_capacity(nr_glyphs);
    for _ in 0..nr_glyphs {
        glyphs.push(FnlGlyph {
            height,
            real_width: r.u16()?,
            data_pos: r.u32()?,
            data_compsize: r.u32()?,
        });
    }
    Ok(FnlFontFace { height, uk, glyphs })
}

impl Fnl {
    pub fn open(path: impl AsRef<Path>) -> Result<Fnl> {
        let mut file = File::open(path.as_ref())?;
        let mut header = [0u8; 16];
        file.read_exact(&mut header)?;
        let mut r = Reader::new(&header);
        if !r.check_bytes(b"FNA\0") {
            return Err(Error::InvalidSignature("not a font library".into()));
        }
        let uk = r.i32()?;
        if uk != 0 {
            warn!("Unexpected value in font library header: {uk}");
        }
        let filesize = r.u32()?;
        let index_size = r.u32()?;

        let mut index = vec![0u8; index_size as usize];
        file.read_exact(&mut index)?;
        let mut r = Reader::new(&index);

        let nr_fonts = r.u32()? as usize;
        let mut fonts = Vec::with_capacity(nr_fonts);
        for _ in 0..nr_fonts {
            let nr_faces = r.u32()? as usize;
            let mut faces = Vec::with_capacity(nr_faces);
            for _ in 0..nr_faces {
                faces.push(read_face(&mut r)?);
            }
            fonts.push(FnlFont { faces });
        }
        if r.remaining() != 0 {
            warn!(
                "Buffer not empty after reading fonts: {} bytes left",
                r.remaining()
            );
        }

        Ok(Fnl {
            file: RefCell::new(file),
            uk,
            filesize,
            index_size,
            fonts,
        })
    }

    /// Glyph for an SJIS code point, falling back to glyph 0 (space) for
    /// unmapped or absent glyphs.
    #[must_use]
    pub fn get_glyph<'a>(&self, face: &'a FnlFontFace, code: u16) -> Option<&'a FnlGlyph> {
        let mut index = char_to_index(code);
        if index >= face.glyphs.len() || face.glyphs[index].data_pos == 0 {
            index = 0;
        }
        face.glyphs.get(index)
    }

    /// Demand-load and decompress a glyph's 1-bit bitmap. The bitmap is
    /// `data_size * 8 / height` pixels wide at the face height.
    pub fn glyph_data(&self, glyph: &FnlGlyph) -> Result<Vec<u8>> {
        if glyph.data_pos == 0 {
            return Ok(Vec::new());
        }
        let mut compressed = vec![0u8; glyph.data_compsize as usize];
        {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(u64::from(glyph.data_pos)))?;
            file.read_exact(&mut compressed)?;
        }
        zlib::inflate(&compressed, glyph.height as usize * glyph.height as usize * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_mapping() {
        assert_eq!(char_to_index(0x20), 0);
        assert_eq!(char_to_index(0x7e), 0x5e);
        assert_eq!(char_to_index(0x7f), 0);
        assert_eq!(char_to_index(0xa1), 95);
        assert_eq!(char_to_index(0xdf), 157);
    }

    #[test]
    fn double_byte_mapping() {
        // first valid double-byte code point
        assert_eq!(char_to_index(0x8140), 158);
        // 0x7f is skipped as a second byte
        assert_eq!(char_to_index(0x8180), char_to_index(0x817e) + 1);
        // invalid second bytes fall back to glyph 0
        assert_eq!(char_to_index(0x817f), 0);
        assert_eq!(char_to_index(0x81fd), 0);
    }

    #[test]
    fn mapping_round_trips() {
        for index in 0..(158 + 188 * 10) {
            let code = index_to_char(index);
            assert_eq!(char_to_index(code), index, "index {index} code {code:04x}");
        }
    }
}
