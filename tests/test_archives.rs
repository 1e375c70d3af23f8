use std::io::Write as _;

use system4::archive::aar::AarArchive;
use system4::archive::afa::AfaArchive;
use system4::archive::ald::AldArchive;
use system4::archive::alk::AlkArchive;
use system4::archive::dlf::DlfArchive;
use system4::{Archive, ArchiveFlags};

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

// ----------------------------------------------------------------------
// AAR

/// v2 string encoding: bytes offset by +0x60.
fn aar_string(out: &mut Vec<u8>, s: &[u8]) {
    out.extend(s.iter().map(|&b| b.wrapping_add(0x60)));
    out.push(0);
}

/// Build a v2 AAR: `a.dat` (raw), `b` -> symlink to `a.dat`,
/// `c` -> symlink to `b`, plus an optional orphan.
fn build_aar(with_orphan: bool) -> Vec<u8> {
    let payload = b"file A payload";
    let nr_files: u32 = if with_orphan { 4 } else { 3 };

    let mut index = Vec::new();
    // entry fields only; the header provides the first 12 bytes
    let mut entries = Vec::new();
    write_u32(&mut entries, 0); // entry 0 off, patched below
    write_u32(&mut entries, payload.len() as u32);
    write_i32(&mut entries, 1); // raw
    aar_string(&mut entries, b"a.dat");
    aar_string(&mut entries, b"");

    for (name, target) in [(b"b".as_slice(), b"a.dat".as_slice()), (b"c", b"b")] {
        write_u32(&mut entries, 0);
        write_u32(&mut entries, 0);
        write_i32(&mut entries, -1); // symlink
        aar_string(&mut entries, name);
        aar_string(&mut entries, target);
    }
    if with_orphan {
        write_u32(&mut entries, 0);
        write_u32(&mut entries, 0);
        write_i32(&mut entries, -1);
        aar_string(&mut entries, b"d");
        aar_string(&mut entries, b"missing");
    }

    let first_entry_offset = 12 + entries.len() as u32;
    // patch entry 0's offset: its data begins right after the index
    entries[0..4].copy_from_slice(&first_entry_offset.to_le_bytes());

    index.extend_from_slice(b"AAR\0");
    write_u32(&mut index, 2);
    write_u32(&mut index, nr_files);
    index.extend_from_slice(&entries);
    index.extend_from_slice(payload);
    index
}

#[test]
fn aar_symlink_chain_resolves() {
    let file = temp_file(&build_aar(false));
    let ar = AarArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.nr_entries(), 3);

    // loading the end of the chain yields file A's bytes
    let c = ar.get_by_name(b"c").unwrap().unwrap();
    assert_eq!(c.data.as_ref(), b"file A payload");
    let a = ar.get_by_name(b"a.dat").unwrap().unwrap();
    assert_eq!(a.data.as_ref(), c.data.as_ref());
}

#[test]
fn aar_lookup_is_case_insensitive() {
    let file = temp_file(&build_aar(false));
    let ar = AarArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.exists_by_name(b"A.DAT"), Some(0));
}

#[test]
fn aar_orphan_symlink_is_not_fatal() {
    let file = temp_file(&build_aar(true));
    // the archive still opens and lists all entries
    let ar = AarArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.nr_entries(), 4);
    // loading the orphan fails, loading everything else still works
    let orphan = ar.entry_by_name(b"d").unwrap();
    assert!(ar.load(&orphan).is_err());
    assert!(ar.get_by_name(b"c").unwrap().is_ok());
}

#[test]
fn aar_mapped_mode_matches_streamed() {
    let bytes = build_aar(false);
    let file = temp_file(&bytes);
    let streamed = AarArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    let mapped = AarArchive::open(file.path(), ArchiveFlags::MMAP).unwrap();
    let a = streamed.get(0).unwrap().unwrap();
    let b = mapped.get(0).unwrap().unwrap();
    assert_eq!(a.data, b.data);
}

// ----------------------------------------------------------------------
// ALD

const ALD_KEY: [u8; 3] = [0x37, 0x12, 0x05];
const SECTOR: usize = 256;

fn put_3b(buf: &mut [u8], off: usize, v: u32) {
    buf[off] = v as u8;
    buf[off + 1] = (v >> 8) as u8;
    buf[off + 2] = (v >> 16) as u8;
}

/// One ALD volume: pointer table sector, file map sector, then one
/// 256-byte block per file.
fn build_ald_volume(filemap: &[(u8, u16)], payloads: &[&[u8]]) -> Vec<u8> {
    let total_sectors = 2 + payloads.len();
    let mut vol = vec![0u8; total_sectors * SECTOR];

    // header: pointer-table sectors, total table sectors
    put_3b(&mut vol, 0, 1);
    put_3b(&mut vol, 3, 2); // doubles as data pointer 0
    for (i, _) in payloads.iter().enumerate().skip(1) {
        put_3b(&mut vol, 3 + i * 3, (2 + i) as u32);
    }
    // end-of-data pointer so the last file's size is computable
    put_3b(&mut vol, 3 + payloads.len() * 3, total_sectors as u32);

    // file map (only read from the first volume)
    for (i, &(disk, ptr)) in filemap.iter().enumerate() {
        let off = SECTOR + i * 3;
        vol[off] = disk + 1;
        vol[off + 1..off + 3].copy_from_slice(&(ptr + 1).to_le_bytes());
    }

    // file blocks: 32-byte header with the name at +16
    for (i, payload) in payloads.iter().enumerate() {
        let base = (2 + i) * SECTOR;
        vol[base..base + 4].copy_from_slice(&32u32.to_le_bytes());
        vol[base + 4..base + 8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        let name = format!("FILE{i}.QNT");
        vol[base + 16..base + 16 + name.len()].copy_from_slice(name.as_bytes());
        vol[base + 32..base + 32 + payload.len()].copy_from_slice(payload);
    }

    // per-title obfuscation additive on the first three header bytes
    for (b, k) in vol.iter_mut().zip(ALD_KEY.iter()) {
        *b = b.wrapping_add(*k);
    }
    vol
}

#[test]
fn ald_recovers_obfuscation_key_and_enumerates() {
    let filemap = [(0u8, 0u16), (0, 1), (1, 0)];
    let vol0 = build_ald_volume(&filemap, &[b"vol0 file0", b"vol0 file1"]);
    let vol1 = build_ald_volume(&filemap, &[b"vol1 file0"]);
    let f0 = temp_file(&vol0);
    let f1 = temp_file(&vol1);

    let ar =
        AldArchive::open(&[Some(f0.path()), Some(f1.path())], ArchiveFlags::empty()).unwrap();
    for no in 0..3 {
        assert!(ar.exists(no), "entry {no} should exist");
    }
    assert!(!ar.exists(3));

    let e0 = ar.get(0).unwrap().unwrap();
    assert_eq!(e0.entry.name.as_bytes(), b"FILE0.QNT");
    assert_eq!(e0.data.as_ref(), b"vol0 file0");
    let e2 = ar.get(2).unwrap().unwrap();
    assert_eq!(e2.data.as_ref(), b"vol1 file0");
}

#[test]
fn ald_name_round_trip() {
    let filemap = [(0u8, 0u16), (0, 1)];
    let vol0 = build_ald_volume(&filemap, &[b"abc", b"defg"]);
    let f0 = temp_file(&vol0);
    let ar = AldArchive::open(&[Some(f0.path())], ArchiveFlags::empty()).unwrap();

    let entry = ar.entry(1).unwrap();
    let found = ar.exists_by_name(entry.name.as_bytes()).unwrap();
    assert_eq!(found, 1);
}

// ----------------------------------------------------------------------
// AFA

fn build_afa_v1(files: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut table = Vec::new();
    let mut data = Vec::new();
    data.extend_from_slice(b"DATA");
    write_u32(&mut data, 0); // section size, patched below
    let mut off = 8u32;
    for (i, (name, payload)) in files.iter().enumerate() {
        write_u32(&mut table, name.len() as u32);
        let padded = (name.len() + 3) & !3;
        write_u32(&mut table, padded as u32);
        table.extend_from_slice(name);
        table.resize(table.len() + padded - name.len(), 0);
        write_i32(&mut table, i as i32 + 1); // entry id
        write_u32(&mut table, 0);
        write_u32(&mut table, 0);
        write_u32(&mut table, off);
        write_u32(&mut table, payload.len() as u32);
        data.extend_from_slice(payload);
        off += payload.len() as u32;
    }
    let data_size = data.len() as u32 - 8;
    data[4..8].copy_from_slice(&data_size.to_le_bytes());

    let mut compressed = Vec::new();
    let mut enc =
        flate2::write::ZlibEncoder::new(&mut compressed, flate2::Compression::default());
    enc.write_all(&table).unwrap();
    enc.finish().unwrap();

    let data_start = 44 + compressed.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"AFAH");
    write_u32(&mut out, 0x1c);
    out.extend_from_slice(b"AlicArch");
    write_u32(&mut out, 1); // version
    write_u32(&mut out, 0);
    write_u32(&mut out, data_start);
    out.extend_from_slice(b"INFO");
    write_u32(&mut out, compressed.len() as u32 + 16);
    write_u32(&mut out, table.len() as u32);
    write_u32(&mut out, files.len() as u32);
    out.extend_from_slice(&compressed);
    out.extend_from_slice(&data);
    out
}

#[test]
fn afa_v1_lookups() {
    let bytes = build_afa_v1(&[(b"one.qnt", b"payload one"), (b"Two.dat", b"payload two")]);
    let file = temp_file(&bytes);
    let ar = AfaArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.version, 1);
    assert_eq!(ar.nr_entries(), 2);

    // v1 ids are 1-based on disk
    let one = ar.get_by_name(b"one.qnt").unwrap().unwrap();
    assert_eq!(one.entry.no, 0);
    assert_eq!(one.data.as_ref(), b"payload one");

    // basename lookup folds case and strips the extension
    let two = ar.get_by_basename(b"two.xxx").unwrap().unwrap();
    assert_eq!(two.data.as_ref(), b"payload two");

    // descriptor/name round trip
    let entry = ar.entry(1).unwrap();
    assert_eq!(ar.exists_by_name(entry.name.as_bytes()), Some(1));
}

#[test]
fn afa_iteration_is_ordinal() {
    let bytes = build_afa_v1(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
    let file = temp_file(&bytes);
    let ar = AfaArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    let mut names = Vec::new();
    ar.for_each(&mut |entry| names.push(entry.name.to_utf8()));
    assert_eq!(names, ["a", "b", "c"]);
}

/// MSB-first bit writer for composing v3 index streams.
struct BitWriter {
    bytes: Vec<u8>,
    nr_bits: u32,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            bytes: Vec::new(),
            nr_bits: 0,
        }
    }

    fn bit(&mut self, v: u32) {
        if self.nr_bits % 8 == 0 {
            self.bytes.push(0);
        }
        let last = self.bytes.last_mut().unwrap();
        *last |= ((v & 1) as u8) << (7 - self.nr_bits % 8);
        self.nr_bits += 1;
    }

    fn bits(&mut self, v: u32, count: u32) {
        for i in (0..count).rev() {
            self.bit(v >> i);
        }
    }

    fn u32(&mut self, v: u32) {
        for byte in v.to_le_bytes() {
            self.bits(u32::from(byte), 8);
        }
    }
}

#[test]
fn afa_v3_empty_table() {
    // inner stream: obfuscation bit, then a zero entry count
    let mut inner = BitWriter::new();
    inner.bit(0);
    inner.u32(0);
    let mut packed = Vec::new();
    let mut enc = flate2::write::ZlibEncoder::new(&mut packed, flate2::Compression::default());
    enc.write_all(&inner.bytes).unwrap();
    enc.finish().unwrap();

    // outer stream: obfuscation bit, empty dictionary, packed sizes, data
    let mut outer = BitWriter::new();
    outer.bit(0);
    outer.u32(0); // dictionary size (seeds the PRNG with 0)
    outer.u32(packed.len() as u32);
    outer.u32(inner.bytes.len() as u32);
    for &b in &packed {
        outer.bits(u32::from(b), 8);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"AFAH");
    write_u32(&mut out, outer.bytes.len() as u32);
    write_u32(&mut out, 3);
    out.extend_from_slice(&outer.bytes);
    out.resize(out.len().max(44), 0);

    let file = temp_file(&out);
    let ar = AfaArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.version, 3);
    assert_eq!(ar.nr_entries(), 0);
    let mut visited = 0;
    ar.for_each(&mut |_| visited += 1);
    assert_eq!(visited, 0);
}

// ----------------------------------------------------------------------
// ALK / DLF

#[test]
fn alk_flat_index() {
    let payloads: [&[u8]; 3] = [b"first", b"", b"third"];
    let mut out = Vec::new();
    out.extend_from_slice(b"ALK0");
    write_u32(&mut out, payloads.len() as u32);
    let mut off = (8 + payloads.len() * 8) as u32;
    for p in &payloads {
        write_u32(&mut out, off);
        write_u32(&mut out, p.len() as u32);
        off += p.len() as u32;
    }
    for p in &payloads {
        out.extend_from_slice(p);
    }

    let file = temp_file(&out);
    let ar = AlkArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert!(ar.exists(0));
    assert!(!ar.exists(1)); // zero-size slot
    assert!(ar.exists(2));
    assert_eq!(ar.get(2).unwrap().unwrap().data.as_ref(), b"third");
}

#[test]
fn dlf_synthetic_names() {
    let mut out = Vec::new();
    out.extend_from_slice(b"DLF\0\0\0\0\0");
    let data_start = 8 + 300 * 8;
    // slots 3..6 populated (map 1)
    for i in 0..300u32 {
        if (3..6).contains(&i) {
            write_u32(&mut out, data_start as u32 + (i - 3) * 4);
            write_u32(&mut out, 4);
        } else {
            write_u32(&mut out, 0);
            write_u32(&mut out, 0);
        }
    }
    out.extend_from_slice(b"dgn0dtx0tes0");

    let file = temp_file(&out);
    let ar = DlfArchive::open(file.path(), ArchiveFlags::empty()).unwrap();
    assert_eq!(ar.nr_entries(), 300);
    assert!(!ar.exists(0));
    let e = ar.entry(3).unwrap();
    assert_eq!(e.name.as_bytes(), b"map01.dgn");
    assert_eq!(ar.entry(4).unwrap().name.as_bytes(), b"map01.dtx");
    assert_eq!(ar.entry(5).unwrap().name.as_bytes(), b"map01.tes");
    assert_eq!(ar.get(3).unwrap().unwrap().data.as_ref(), b"dgn0");

    // empty slots are skipped by iteration
    let mut count = 0;
    ar.for_each(&mut |_| count += 1);
    assert_eq!(count, 3);
}
