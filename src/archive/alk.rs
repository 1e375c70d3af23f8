//! ALK archives: `ALK0` magic, entry count, then `(offset, size)` pairs.
//! Entries have no names; a synthetic decimal name is provided.

use std::borrow::Cow;
use std::path::Path;

use super::{Archive, ArchiveFlags, Backing, Entry};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result};

#[derive(Debug)]
pub struct AlkArchive {
    backing: Backing,
    files: Vec<(u64, usize)>,
}

impl AlkArchive {
    pub fn open(path: impl AsRef<Path>, flags: ArchiveFlags) -> Result<AlkArchive> {
        let backing = Backing::open(path.as_ref(), flags)?;
        let header = backing.read_at(0, 8)?;
        if &header[0..4] != b"ALK0" {
            return Err(Error::InvalidSignature("not an ALK archive".into()));
        }
        let nr_files = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        let index = backing.read_at(8, nr_files * 8)?;
        let mut r = Reader::new(&index);
        let mut files = Vec::with_capacity(nr_files);
        for _ in 0..nr_files {
            let off = u64::from(r.u32()?);
            let size = r.u32()? as usize;
            files.push((off, size));
        }
        Ok(AlkArchive { backing, files })
    }
}

impl Archive for AlkArchive {
    fn nr_entries(&self) -> usize {
        self.files.len()
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        let &(_, size) = self.files.get(no)?;
        if size == 0 {
            return None;
        }
        Some(Entry {
            no,
            name: SjisString::from_vec(no.to_string().into_bytes()),
            size,
        })
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let &(off, size) = self
            .files
            .get(entry.no)
            .filter(|&&(_, size)| size > 0)
            .ok_or_else(|| Error::invalid(format!("no such ALK entry: {}", entry.no)))?;
        self.backing.read_at(off, size)
    }
}
