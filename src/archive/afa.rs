//! AFA archives (versions 1, 2 and 3).
//!
//! v1/v2 share a plain layout: `AFAH` header, `AlicArch` tag, an `INFO`
//! record describing a zlib-compressed file table, and a `DATA` payload
//! section. Whether table entries carry a numeric ID cannot be told from
//! the header for v2, so the table is scanned once under the with-ID
//! layout; an exact fit means IDs are present. v3 replaces the file table
//! with the triple-encrypted index handled in [`super::afa3`].

use std::borrow::Cow;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::Path;

use super::{Archive, ArchiveFlags, Backing, Entry, afa3, basename};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result, zlib};

#[derive(Debug)]
pub(super) struct AfaEntry {
    pub no: usize,
    pub name: SjisString,
    pub unknown0: u32,
    pub unknown1: u32,
    pub off: u64,
    pub size: usize,
}

#[derive(Debug)]
pub struct AfaArchive {
    backing: Backing,
    pub version: u32,
    data_start: u64,
    files: Vec<AfaEntry>,
    name_index: OnceCell<HashMap<Vec<u8>, usize>>,
    basename_index: OnceCell<HashMap<Vec<u8>, usize>>,
    number_index: OnceCell<HashMap<usize, usize>>,
    has_number: bool,
}

impl AfaArchive {
    pub fn open(path: impl AsRef<Path>, flags: ArchiveFlags) -> Result<AfaArchive> {
        let backing = Backing::open(path.as_ref(), flags)?;
        let header = backing.read_at(0, 44)?;

        if &header[0..4] != b"AFAH" {
            return Err(Error::InvalidSignature("not an AFA archive".into()));
        }

        if &header[8..16] != b"AlicArch" {
            let mut r = Reader::new(&header[8..]);
            if r.u32()? == 3 {
                let mut r = Reader::new(&header[4..]);
                let index_size = r.u32()?;
                let (files, data_start) = afa3::read_index(&backing, index_size)?;
                return Ok(AfaArchive {
                    backing,
                    version: 3,
                    data_start,
                    files,
                    name_index: OnceCell::new(),
                    basename_index: OnceCell::new(),
                    number_index: OnceCell::new(),
                    has_number: false,
                });
            }
            return Err(Error::InvalidSignature("not an AlicArch archive".into()));
        }

        let mut r = Reader::new(&header);
        r.skip(4);
        if r.u32()? != 0x1c {
            return Err(Error::invalid("bad AFA header size"));
        }
        r.skip(8); // "AlicArch"
        let version = r.u32()?;
        let _unknown = r.u32()?;
        let data_start = u64::from(r.u32()?);
        r.skip(4); // "INFO"
        let compressed_size = r.u32()? as usize - 16;
        let uncompressed_size = r.u32()? as usize;
        let nr_files = r.u32()? as usize;

        if data_start + 8 >= backing.len() {
            return Err(Error::invalid("AFA data section past end of file"));
        }
        let data_hdr = backing.read_at(data_start, 8)?;
        if &data_hdr[0..4] != b"DATA" {
            return Err(Error::invalid("missing AFA DATA section"));
        }
        let data_size = u64::from(u32::from_le_bytes(data_hdr[4..8].try_into().unwrap()));
        if data_start + data_size > backing.len() {
            return Err(Error::invalid("AFA DATA section size exceeds file"));
        }

        let compressed = backing.read_at(44, compressed_size)?;
        let table = zlib::inflate_exact(&compressed, uncompressed_size)?;

        let has_number = version == 1 || table_has_numbers(&table, nr_files);
        let mut files = Vec::with_capacity(nr_files);
        let mut r = Reader::new(&table);
        for i in 0..nr_files {
            files.push(read_entry(&mut r, i, has_number)?);
        }

        Ok(AfaArchive {
            backing,
            version,
            data_start,
            files,
            name_index: OnceCell::new(),
            basename_index: OnceCell::new(),
            number_index: OnceCell::new(),
            has_number,
        })
    }

    fn index_by_name(&self) -> &HashMap<Vec<u8>, usize> {
        self.name_index.get_or_init(|| {
            self.files
                .iter()
                .enumerate()
                .map(|(i, e)| (e.name.as_bytes().to_vec(), i))
                .collect()
        })
    }

    fn index_by_basename(&self) -> &HashMap<Vec<u8>, usize> {
        self.basename_index.get_or_init(|| {
            self.files
                .iter()
                .enumerate()
                .map(|(i, e)| (basename(e.name.as_bytes()), i))
                .collect()
        })
    }

    fn slot_by_number(&self, no: usize) -> Option<usize> {
        if !self.has_number {
            return (no < self.files.len()).then_some(no);
        }
        let index = self
            .number_index
            .get_or_init(|| self.files.iter().enumerate().map(|(i, e)| (e.no, i)).collect());
        index.get(&no).copied()
    }

    /// The two undeciphered fields of an entry, preserved verbatim from
    /// the file table.
    pub fn entry_unknowns(&self, no: usize) -> Option<(u32, u32)> {
        let slot = self.slot_by_number(no)?;
        Some((self.files[slot].unknown0, self.files[slot].unknown1))
    }

    fn make_entry(&self, slot: usize) -> Entry {
        let e = &self.files[slot];
        Entry {
            no: e.no,
            name: e.name.clone(),
            size: e.size,
        }
    }
}

/// Scan the file table assuming entries carry an ID field; an exact fit
/// means the assumption was right.
fn table_has_numbers(table: &[u8], nr_files: usize) -> bool {
    let mut r = Reader::new(table);
    for _ in 0..nr_files {
        if r.remaining() < 8 {
            return false;
        }
        r.skip(4);
        let Ok(name_len) = r.u32() else { return false };
        if r.remaining() < name_len as usize + 20 {
            return false;
        }
        r.skip(name_len as usize + 20);
    }
    r.remaining() == 0
}

fn read_entry(r: &mut Reader<'_>, seq: usize, has_number: bool) -> Result<AfaEntry> {
    let name_len = r.u32()? as usize;
    let padded = r.pascal_string()?;
    let name = SjisString::from_bytes(&padded[..name_len.min(padded.len())]);

    let mut no = seq;
    if has_number {
        // some v1 archives store all IDs as 0; fall back to sequential
        let id = r.i32()? - 1;
        if id >= 0 {
            no = id as usize;
        }
    }
    let unknown0 = r.u32()?;
    let unknown1 = r.u32()?;
    let off = u64::from(r.u32()?);
    let size = r.u32()? as usize;
    Ok(AfaEntry {
        no,
        name,
        unknown0,
        unknown1,
        off,
        size,
    })
}

impl Archive for AfaArchive {
    fn nr_entries(&self) -> usize {
        self.files.len()
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        self.slot_by_number(no).map(|slot| self.make_entry(slot))
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let slot = self
            .slot_by_number(entry.no)
            .ok_or_else(|| Error::invalid(format!("no such AFA entry: {}", entry.no)))?;
        let e = &self.files[slot];
        self.backing.read_at(self.data_start + e.off, e.size)
    }

    fn exists_by_name(&self, name: &[u8]) -> Option<usize> {
        self.index_by_name().get(name).map(|&slot| self.files[slot].no)
    }

    fn exists_by_basename(&self, name: &[u8]) -> Option<usize> {
        self.index_by_basename()
            .get(&basename(name))
            .map(|&slot| self.files[slot].no)
    }

    fn entry_by_name(&self, name: &[u8]) -> Option<Entry> {
        self.index_by_name().get(name).map(|&slot| self.make_entry(slot))
    }

    fn entry_by_basename(&self, name: &[u8]) -> Option<Entry> {
        self.index_by_basename()
            .get(&basename(name))
            .map(|&slot| self.make_entry(slot))
    }

    fn for_each(&self, visit: &mut dyn FnMut(&Entry)) {
        for slot in 0..self.files.len() {
            let entry = self.make_entry(slot);
            visit(&entry);
        }
    }
}
