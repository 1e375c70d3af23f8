use std::borrow::Cow;

use system4::archive::{Archive, Entry};
use system4::cg::{self, Cg, CgMetrics, CgType, dcf, qnt};
use system4::{Result, SjisString};

/// Deterministic RGBA test image.
fn test_image(w: i32, h: i32) -> Cg {
    let mut pixels = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            pixels.push((x * 40 + 3) as u8);
            pixels.push((y * 25 + 7) as u8);
            pixels.push((x * y + 11) as u8);
            pixels.push((255 - x * 9) as u8);
        }
    }
    Cg {
        kind: CgType::Unknown,
        metrics: CgMetrics {
            x: 0,
            y: 0,
            w,
            h,
            bpp: 24,
            has_pixel: true,
            has_alpha: true,
            pixel_pitch: w * 4,
            alpha_pitch: 1,
        },
        pixels,
    }
}

#[test]
fn qnt_round_trip_even_dimensions() {
    let cg = test_image(8, 4);
    let bytes = cg::write_mem(&cg, CgType::Qnt).unwrap();
    assert_eq!(cg::check_format(&bytes), CgType::Qnt);

    let back = cg::load(&bytes, None).unwrap();
    assert_eq!(back.metrics.w, 8);
    assert_eq!(back.metrics.h, 4);
    assert_eq!(back.pixels, cg.pixels);
}

#[test]
fn qnt_round_trip_odd_dimensions() {
    // the internal 4x6 cell grid must not leak into the output
    let cg = test_image(3, 5);
    let bytes = cg::write_mem(&cg, CgType::Qnt).unwrap();
    let back = cg::load(&bytes, None).unwrap();
    assert_eq!(back.pixels.len(), 3 * 5 * 4);
    assert_eq!(back.pixels, cg.pixels);
}

#[test]
fn qnt_metrics_match_decode() {
    let cg = test_image(7, 3);
    let bytes = cg::write_mem(&cg, CgType::Qnt).unwrap();
    let metrics = cg::metrics(&bytes).unwrap();
    let decoded = cg::load(&bytes, None).unwrap();
    assert_eq!(metrics.w, decoded.metrics.w);
    assert_eq!(metrics.h, decoded.metrics.h);
    assert_eq!(
        (metrics.w * metrics.h * 4) as usize,
        decoded.pixels.len()
    );
    assert!(metrics.has_pixel);
    assert!(metrics.has_alpha);
}

#[test]
fn qnt_alpha_only_paints_a_mask() {
    // pixel_size == 0: RGB stays zero, alpha carries the decoded mask
    let w = 2usize;
    let h = 2usize;
    let alpha_raw: [u8; 4] = [0x80, 0, 0, 0]; // constant 0x80 after prediction
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut enc, &alpha_raw).unwrap();
    let alpha_stream = enc.finish().unwrap();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"QNT\0");
    for v in [
        1u32,
        52,
        0,
        0,
        w as u32,
        h as u32,
        24,
        1,
        0,
        alpha_stream.len() as u32,
    ] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes.resize(52, 0);
    bytes.extend_from_slice(&alpha_stream);

    let metrics = cg::metrics(&bytes).unwrap();
    assert!(!metrics.has_pixel);
    assert!(metrics.has_alpha);

    let back = cg::load(&bytes, None).unwrap();
    for px in back.pixels.chunks_exact(4) {
        assert_eq!(px, [0, 0, 0, 0x80]);
    }
}

#[test]
fn qnt_header_variants() {
    let cg = test_image(4, 4);
    let bytes = cg::write_mem(&cg, CgType::Qnt).unwrap();
    let hdr = qnt::extract_header(&bytes).unwrap();
    assert_eq!(hdr.hdr_size, 52);
    assert_eq!(hdr.width, 4);
    assert_eq!(hdr.bpp, 24);
}

// ----------------------------------------------------------------------
// DCF

/// Single-entry archive serving the DCF base CG.
struct OneFileArchive {
    name: SjisString,
    data: Vec<u8>,
}

impl Archive for OneFileArchive {
    fn nr_entries(&self) -> usize {
        1
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        (no == 0).then(|| Entry {
            no: 0,
            name: self.name.clone(),
            size: self.data.len(),
        })
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        assert_eq!(entry.no, 0);
        Ok(Cow::Borrowed(&self.data))
    }

    fn exists_by_basename(&self, name: &[u8]) -> Option<usize> {
        (system4::archive::basename(self.name.as_bytes()) == system4::archive::basename(name))
            .then_some(0)
    }
}

fn base_archive(base: &Cg) -> OneFileArchive {
    OneFileArchive {
        name: SjisString::from_utf8("base.qnt"),
        data: cg::write_mem(base, CgType::Qnt).unwrap(),
    }
}

#[test]
fn dcf_diff_against_itself_reconstructs_base() {
    let base = test_image(32, 32);
    let encoded = dcf::encode(&base, &base, b"base.qnt").unwrap();
    assert_eq!(cg::check_format(&encoded), CgType::Dcf);
    assert_eq!(dcf::get_base_cg_name(&encoded).unwrap(), b"base.qnt");

    let ar = base_archive(&base);
    let decoded = cg::load(&encoded, Some(&ar)).unwrap();
    assert_eq!(decoded.pixels, base.pixels);
}

#[test]
fn dcf_overlays_replaced_chunks() {
    let base = test_image(36, 20);
    let mut diff = base.clone();
    // dirty one chunk and part of the off-grid remainder
    for y in 0..16 {
        for x in 16..32 {
            let off = (y * 36 + x) * 4;
            diff.pixels[off] = 0xaa;
        }
    }
    let off = (2 * 36 + 34) * 4; // x=34 is beyond the 32-pixel chunk grid
    diff.pixels[off] = 0xbb;

    let encoded = dcf::encode(&base, &diff, b"base.qnt").unwrap();
    let ar = base_archive(&base);
    let decoded = cg::load(&encoded, Some(&ar)).unwrap();
    assert_eq!(decoded.pixels, diff.pixels);
}

#[test]
fn dcf_metrics_come_from_the_inner_qnt() {
    let base = test_image(32, 16);
    let encoded = dcf::encode(&base, &base, b"base.qnt").unwrap();
    let metrics = cg::metrics(&encoded).unwrap();
    assert_eq!((metrics.w, metrics.h), (32, 16));
}

#[test]
fn dcf_without_archive_decodes_the_diff() {
    let base = test_image(16, 16);
    let encoded = dcf::encode(&base, &base, b"base.qnt").unwrap();
    // no archive: the embedded (zeroed) diff decodes alone
    let decoded = cg::load(&encoded, None).unwrap();
    assert_eq!(decoded.metrics.w, 16);
    assert_eq!(decoded.pixels.len(), 16 * 16 * 4);
}

// ----------------------------------------------------------------------
// adapters

#[test]
fn png_adapter_round_trip() {
    let cg = test_image(5, 9);
    let bytes = cg::write_mem(&cg, CgType::Png).unwrap();
    assert_eq!(cg::check_format(&bytes), CgType::Png);

    let metrics = cg::metrics(&bytes).unwrap();
    assert_eq!((metrics.w, metrics.h), (5, 9));
    assert!(metrics.has_alpha);

    let back = cg::load(&bytes, None).unwrap();
    assert_eq!(back.kind, CgType::Png);
    assert_eq!(back.pixels, cg.pixels);
}

#[test]
fn webp_adapter_round_trip() {
    let cg = test_image(6, 4);
    let bytes = cg::write_mem(&cg, CgType::Webp).unwrap();
    assert_eq!(cg::check_format(&bytes), CgType::Webp);
    let back = cg::load(&bytes, None).unwrap();
    assert_eq!((back.metrics.w, back.metrics.h), (6, 4));
    // lossless webp preserves the pixels exactly
    assert_eq!(back.pixels, cg.pixels);
}

#[test]
fn rou_decodes_both_planes() {
    let w = 2u32;
    let h = 2u32;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"ROU\0");
    bytes.extend_from_slice(&[0; 4]);
    bytes.extend_from_slice(&0x44u32.to_le_bytes()); // header size
    bytes.resize(0x14, 0);
    bytes.extend_from_slice(&w.to_le_bytes());
    bytes.extend_from_slice(&h.to_le_bytes());
    bytes.extend_from_slice(&24u32.to_le_bytes());
    bytes.resize(0x24, 0);
    bytes.extend_from_slice(&(w * h * 3).to_le_bytes()); // pixel plane size
    bytes.extend_from_slice(&(w * h).to_le_bytes()); // alpha plane size
    bytes.resize(0x44, 0);
    for i in 0..(w * h) as u8 {
        bytes.extend_from_slice(&[i, 10 + i, 20 + i]); // BGR
    }
    bytes.extend_from_slice(&[0xf0, 0xf1, 0xf2, 0xf3]);

    assert_eq!(cg::check_format(&bytes), CgType::Rou);
    let metrics = cg::metrics(&bytes).unwrap();
    assert!(metrics.has_alpha);

    let back = cg::load(&bytes, None).unwrap();
    // BGR input comes out as RGBA
    assert_eq!(&back.pixels[0..4], &[20, 10, 0, 0xf0]);
    assert_eq!(&back.pixels[12..16], &[23, 13, 3, 0xf3]);
}

#[test]
fn unknown_format_is_rejected() {
    let garbage = [0u8; 32];
    assert_eq!(cg::check_format(&garbage), CgType::Unknown);
    assert!(cg::metrics(&garbage).is_err());
    assert!(cg::load(&garbage, None).is_err());
}
