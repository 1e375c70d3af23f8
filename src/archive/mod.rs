//! The uniform container contract.
//!
//! Seven on-disk container families (ALD, AFA v1–v3, AAR, ALK, DLF, FLAT)
//! sit behind one [`Archive`] trait so callers can iterate entries, resolve
//! them by ordinal or name, and load payloads without caring which format
//! backs the handle. Payload lifetime follows the borrow: a memory-mapped
//! archive hands out borrows into the mapping, a streamed archive hands out
//! owned bytes; both arrive as [`Cow`] and are released by drop.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bitflags::bitflags;
use memmap2::Mmap;

use crate::string::SjisString;
use crate::{Error, Result, encoding};

pub mod aar;
pub mod afa;
mod afa3;
pub mod ald;
pub mod alk;
pub mod dlf;
pub mod flat;

bitflags! {
    /// Options accepted by every archive opener.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchiveFlags: u32 {
        /// Memory-map the file instead of streaming through a descriptor.
        const MMAP = 1;
    }
}

/// Descriptor for one archive entry. The payload is materialised separately
/// with [`Archive::load`].
#[derive(Debug, Clone)]
pub struct Entry {
    /// Ordinal of the entry within the archive.
    pub no: usize,
    /// Entry name (raw Shift-JIS). Synthetic for formats without names.
    pub name: SjisString,
    /// Payload size in bytes. For compressed entries this may be the
    /// compressed size until the payload is loaded.
    pub size: usize,
}

/// A loaded entry: descriptor plus payload.
#[derive(Debug)]
pub struct FileData<'a> {
    pub entry: Entry,
    pub data: Cow<'a, [u8]>,
}

/// Polymorphic handle over a container format.
pub trait Archive {
    /// Number of entry slots; ordinals range over `0..nr_entries()`.
    /// Some slots may be empty (sparse formats).
    fn nr_entries(&self) -> usize;

    /// Descriptor for entry `no`, if present.
    fn entry(&self, no: usize) -> Option<Entry>;

    /// Materialise the payload for a descriptor.
    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>>;

    fn exists(&self, no: usize) -> bool {
        self.entry(no).is_some()
    }

    fn exists_by_name(&self, name: &[u8]) -> Option<usize> {
        let _ = name;
        None
    }

    fn exists_by_basename(&self, name: &[u8]) -> Option<usize> {
        let _ = name;
        None
    }

    fn entry_by_name(&self, name: &[u8]) -> Option<Entry> {
        self.entry(self.exists_by_name(name)?)
    }

    fn entry_by_basename(&self, name: &[u8]) -> Option<Entry> {
        self.entry(self.exists_by_basename(name)?)
    }

    /// Descriptor plus payload in one step.
    fn get(&self, no: usize) -> Option<Result<FileData<'_>>> {
        let entry = self.entry(no)?;
        Some(self.load(&entry).map(|data| FileData { entry, data }))
    }

    fn get_by_name(&self, name: &[u8]) -> Option<Result<FileData<'_>>> {
        let entry = self.entry_by_name(name)?;
        Some(self.load(&entry).map(|data| FileData { entry, data }))
    }

    fn get_by_basename(&self, name: &[u8]) -> Option<Result<FileData<'_>>> {
        let entry = self.entry_by_basename(name)?;
        Some(self.load(&entry).map(|data| FileData { entry, data }))
    }

    /// Visit every present entry in ordinal order. Descriptors passed to
    /// the visitor are valid only for the duration of the call.
    fn for_each(&self, visit: &mut dyn FnMut(&Entry)) {
        for no in 0..self.nr_entries() {
            if let Some(entry) = self.entry(no) {
                visit(&entry);
            }
        }
    }
}

/// Extension-stripped, SJIS-case-folded name used for loose lookups.
#[must_use]
pub fn basename(name: &[u8]) -> Vec<u8> {
    let stem = match name.iter().rposition(|&b| b == b'.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    let mut out = stem.to_vec();
    encoding::sjis_normalize_path(&mut out);
    out
}

/// File backing shared by the container formats: a read-only map or a
/// seekable descriptor. The descriptor's cursor is interior state; per the
/// concurrency model a handle is used from one thread at a time.
#[derive(Debug)]
pub(crate) enum Backing {
    Mapped(Mmap),
    Stream { file: RefCell<File>, len: u64 },
}

impl Backing {
    pub(crate) fn open(path: &Path, flags: ArchiveFlags) -> Result<Self> {
        let file = File::open(path)?;
        // mapping is disabled on platforms where mandatory file locks
        // would pin the archive open
        let mmap = flags.contains(ArchiveFlags::MMAP) && !cfg!(windows);
        if mmap {
            let map = unsafe { Mmap::map(&file)? };
            Ok(Backing::Mapped(map))
        } else {
            let len = file.metadata()?.len();
            Ok(Backing::Stream {
                file: RefCell::new(file),
                len,
            })
        }
    }

    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, Backing::Mapped(_))
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            Backing::Mapped(map) => map.len() as u64,
            Backing::Stream { len, .. } => *len,
        }
    }

    /// Read `len` bytes at `off`; borrowed from the mapping when mapped.
    pub(crate) fn read_at(&self, off: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        match self {
            Backing::Mapped(map) => {
                let start = off as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&end| end <= map.len())
                    .ok_or(Error::OutOfBounds(start))?;
                Ok(Cow::Borrowed(&map[start..end]))
            }
            Backing::Stream { file, .. } => {
                let mut file = file.borrow_mut();
                file.seek(SeekFrom::Start(off))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                Ok(Cow::Owned(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_extension_and_folds_case() {
        assert_eq!(basename(b"foo/Bar.qnt"), b"FOO\\BAR");
        assert_eq!(basename(b"noext"), b"NOEXT");
    }
}
