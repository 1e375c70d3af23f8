use std::io::Write as _;

use system4::fnl::{Fnl, char_to_index};

fn build_fnl(glyph_bitmaps: &[&[u8]]) -> Vec<u8> {
    let nr_glyphs = glyph_bitmaps.len();
    let index_size = 4 + 4 + 12 + nr_glyphs * 10;

    let compressed: Vec<Vec<u8>> = glyph_bitmaps
        .iter()
        .map(|bitmap| {
            let mut enc =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(bitmap).unwrap();
            enc.finish().unwrap()
        })
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(b"FNA\0");
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // filesize, patched below
    out.extend_from_slice(&(index_size as u32).to_le_bytes());

    out.extend_from_slice(&1u32.to_le_bytes()); // fonts
    out.extend_from_slice(&1u32.to_le_bytes()); // faces
    out.extend_from_slice(&8u32.to_le_bytes()); // height
    out.extend_from_slice(&0u32.to_le_bytes()); // unknown
    out.extend_from_slice(&(nr_glyphs as u32).to_le_bytes());

    let mut data_pos = 16 + index_size;
    for (bitmap, comp) in glyph_bitmaps.iter().zip(&compressed) {
        let width = (bitmap.len() * 8 / 8) as u16;
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&(data_pos as u32).to_le_bytes());
        out.extend_from_slice(&(comp.len() as u32).to_le_bytes());
        data_pos += comp.len();
    }
    for comp in &compressed {
        out.extend_from_slice(comp);
    }
    let total = out.len() as u32;
    out[8..12].copy_from_slice(&total.to_le_bytes());
    out
}

#[test]
fn fnl_index_and_glyph_loading() {
    let space = [0u8; 8];
    let bang: [u8; 8] = [0x10, 0x10, 0x10, 0x10, 0x10, 0, 0x10, 0];
    let bytes = build_fnl(&[&space, &bang]);
    let file = {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&bytes).unwrap();
        f.flush().unwrap();
        f
    };

    let fnl = Fnl::open(file.path()).unwrap();
    assert_eq!(fnl.fonts.len(), 1);
    let face = &fnl.fonts[0].faces[0];
    assert_eq!(face.height, 8);
    assert_eq!(face.glyphs.len(), 2);

    // '!' is glyph 1 in the SJIS enumeration
    assert_eq!(char_to_index(u16::from(b'!')), 1);
    let glyph = fnl.get_glyph(face, u16::from(b'!')).unwrap();
    assert_eq!(fnl.glyph_data(glyph).unwrap(), bang);

    // unmapped code points fall back to the space glyph
    let fallback = fnl.get_glyph(face, 0x1f).unwrap();
    assert_eq!(fallback.real_width, face.glyphs[0].real_width);
}

#[test]
fn fnl_rejects_bad_magic() {
    let file = {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"NOPE0123456789ab").unwrap();
        f.flush().unwrap();
        f
    };
    assert!(Fnl::open(file.path()).is_err());
}
