//! DLF dungeon archives: a fixed 300-slot index of `(offset, size)` pairs.
//! Slots come in triples per map, exposed under synthetic names
//! `mapNN.{dgn,dtx,tes}`.

use std::borrow::Cow;
use std::path::Path;

use super::{Archive, ArchiveFlags, Backing, Entry};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result};

pub const DLF_NR_ENTRIES: usize = 300;

const EXTENSIONS: [&str; 3] = ["dgn", "dtx", "tes"];

#[derive(Debug)]
pub struct DlfArchive {
    backing: Backing,
    files: [(u64, usize); DLF_NR_ENTRIES],
}

impl DlfArchive {
    pub fn open(path: impl AsRef<Path>, flags: ArchiveFlags) -> Result<DlfArchive> {
        let backing = Backing::open(path.as_ref(), flags)?;
        let header = backing.read_at(0, 8)?;
        if &header[0..8] != b"DLF\0\0\0\0\0" {
            return Err(Error::InvalidSignature("not a DLF archive".into()));
        }
        let index = backing.read_at(8, DLF_NR_ENTRIES * 8)?;
        let mut r = Reader::new(&index);
        let mut files = [(0u64, 0usize); DLF_NR_ENTRIES];
        for slot in files.iter_mut() {
            *slot = (u64::from(r.u32()?), r.u32()? as usize);
        }
        Ok(DlfArchive { backing, files })
    }
}

impl Archive for DlfArchive {
    fn nr_entries(&self) -> usize {
        DLF_NR_ENTRIES
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        let &(off, size) = self.files.get(no)?;
        if off == 0 {
            return None;
        }
        let name = format!("map{:02}.{}", no / 3, EXTENSIONS[no % 3]);
        Some(Entry {
            no,
            name: SjisString::from_vec(name.into_bytes()),
            size,
        })
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let &(off, size) = self
            .files
            .get(entry.no)
            .filter(|&&(off, _)| off > 0)
            .ok_or_else(|| Error::invalid(format!("no such DLF entry: {}", entry.no)))?;
        self.backing.read_at(off, size)
    }

    fn exists(&self, no: usize) -> bool {
        self.files.get(no).is_some_and(|&(off, _)| off != 0)
    }
}
