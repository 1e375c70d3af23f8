//! AAR archives.
//!
//! A minimal index of `{offset, size, type, name}` entries. Version 2 adds
//! symlink entries which are chased through a case-insensitive name table
//! at load time; an orphaned symlink is a warning, not a fatal error.
//! Compressed entries are a `ZLB\0`-prefixed zlib stream.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use super::{Archive, ArchiveFlags, Backing, Entry};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result, encoding, zlib};

pub const AAR_COMPRESSED: i32 = 0;
pub const AAR_RAW: i32 = 1;
pub const AAR_SYMLINK: i32 = -1;

#[derive(Debug)]
struct AarEntry {
    off: u64,
    size: usize,
    kind: i32,
    name: Vec<u8>,
    link_target: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct AarArchive {
    backing: Backing,
    pub version: u32,
    files: Vec<AarEntry>,
    /// Case-folded name -> entry index.
    names: HashMap<Vec<u8>, usize>,
}

fn fold(name: &[u8]) -> Vec<u8> {
    let mut key = name.to_vec();
    encoding::sjis_normalize_path(&mut key);
    key
}

/// Index strings are stored with a per-byte additive offset in v2+.
fn read_string(r: &mut Reader<'_>, version: u32) -> Result<Vec<u8>> {
    let key = if version >= 2 { 0x60u8 } else { 0 };
    let raw = r.cstring()?;
    Ok(raw.iter().map(|&b| b.wrapping_sub(key)).collect())
}

fn inflate_entry(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.len() < 16 || &buf[0..4] != b"ZLB\0" {
        return Err(Error::InvalidSignature("missing ZLB header".into()));
    }
    let mut r = Reader::new(&buf[4..]);
    let version = r.u32()?;
    if version != 0 {
        warn!("unknown ZLB version: {version}");
        return Err(Error::UnsupportedFormat(format!("ZLB version {version}")));
    }
    let out_size = r.u32()? as usize;
    let in_size = r.u32()? as usize;
    if in_size + 16 > buf.len() {
        return Err(Error::invalid("bad ZLB size"));
    }
    zlib::inflate_exact(&buf[16..16 + in_size], out_size)
}

impl AarArchive {
    pub fn open(path: impl AsRef<Path>, flags: ArchiveFlags) -> Result<AarArchive> {
        let backing = Backing::open(path.as_ref(), flags)?;
        let header = backing.read_at(0, 16)?;
        if &header[0..4] != b"AAR\0" {
            return Err(Error::InvalidSignature("not an AAR archive".into()));
        }
        let mut r = Reader::new(&header[4..]);
        let version = r.u32()?;
        if version != 0 && version != 2 {
            warn!("Unknown AAR version {version}");
            return Err(Error::UnsupportedFormat(format!("AAR version {version}")));
        }
        let nr_files = r.u32()? as usize;
        let first_entry_offset = r.u32()? as usize;

        let index = backing.read_at(0, first_entry_offset)?;
        let mut r = Reader::new(&index);
        r.seek(12);
        let mut files = Vec::with_capacity(nr_files);
        let mut names = HashMap::with_capacity(nr_files);
        for i in 0..nr_files {
            let off = u64::from(r.u32()?);
            let size = r.u32()? as usize;
            let kind = r.i32()?;
            let name = read_string(&mut r, version)?;
            let link_target = if version >= 2 {
                Some(read_string(&mut r, version)?)
            } else {
                None
            };
            names.insert(fold(&name), i);
            files.push(AarEntry {
                off,
                size,
                kind,
                name,
                link_target,
            });
            if r.index() > first_entry_offset {
                break;
            }
        }
        if r.index() != first_entry_offset {
            warn!("unexpected index size");
            return Err(Error::invalid("AAR index size mismatch"));
        }

        Ok(AarArchive {
            backing,
            version,
            files,
            names,
        })
    }

    /// Chase symlinks to the entry that actually carries data.
    fn resolve(&self, no: usize) -> Option<&AarEntry> {
        let mut e = self.files.get(no)?;
        let mut hops = 0;
        while e.kind == AAR_SYMLINK {
            let target = e.link_target.as_deref()?;
            let Some(&slot) = self.names.get(&fold(target)) else {
                warn!(
                    "orphaned symlink: {}",
                    encoding::sjis_to_utf8(&self.files[no].name)
                );
                return None;
            };
            e = &self.files[slot];
            hops += 1;
            if hops > self.files.len() {
                warn!("symlink cycle in AAR archive");
                return None;
            }
        }
        Some(e)
    }
}

impl Archive for AarArchive {
    fn nr_entries(&self) -> usize {
        self.files.len()
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        let e = self.files.get(no)?;
        Some(Entry {
            no,
            name: SjisString::from_bytes(&e.name),
            // may be the compressed size until loaded
            size: e.size,
        })
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let e = self
            .resolve(entry.no)
            .ok_or_else(|| Error::invalid(format!("no such AAR entry: {}", entry.no)))?;
        let raw = self.backing.read_at(e.off, e.size)?;
        if e.kind == AAR_COMPRESSED {
            return Ok(Cow::Owned(inflate_entry(&raw)?));
        }
        Ok(raw)
    }

    fn exists_by_name(&self, name: &[u8]) -> Option<usize> {
        self.names.get(&fold(name)).copied()
    }
}
