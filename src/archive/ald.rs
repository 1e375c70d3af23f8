//! ALD archives: a sparse directory spread across up to 26 volume files.
//!
//! All volumes share a single file map giving `(disk, pointer-index)` per
//! entry; each volume carries its own pointer table of sector offsets. The
//! first three header bytes of a volume may be obfuscated by a per-title
//! additive key, which is recovered by scanning for the point where the
//! pointer table stops ascending.

use std::borrow::Cow;
use std::path::Path;

use tracing::warn;

use super::{Archive, ArchiveFlags, Backing, Entry};
use crate::buffer::Reader;
use crate::string::SjisString;
use crate::{Error, Result};

pub const ALD_FILE_MAX: usize = 26;

#[derive(Debug)]
pub struct AldArchive {
    volumes: Vec<Option<Backing>>,
    /// Sector pointer tables, one per volume.
    fileptr: Vec<Vec<u32>>,
    map_disk: Vec<i32>,
    map_ptr: Vec<i32>,
    magic: [u8; 3],
}

fn get_3b(b: &[u8], off: usize) -> u32 {
    u32::from(b[off]) | (u32::from(b[off + 1]) << 8) | (u32::from(b[off + 2]) << 16)
}

struct Located {
    disk: usize,
    dataptr: u64,
}

impl AldArchive {
    /// Open an ALD volume set. `files[i]` is the path of volume `i`
    /// (letters A..Z); missing volumes are `None`.
    pub fn open<P: AsRef<Path>>(files: &[Option<P>], flags: ArchiveFlags) -> Result<AldArchive> {
        let mut ar = AldArchive {
            volumes: Vec::new(),
            fileptr: Vec::new(),
            map_disk: Vec::new(),
            map_ptr: Vec::new(),
            magic: [0; 3],
        };
        ar.volumes.resize_with(ALD_FILE_MAX.min(files.len().max(1)), || None);
        ar.fileptr.resize_with(ar.volumes.len(), Vec::new);

        let mut got_map = false;
        for (i, path) in files.iter().enumerate().take(ALD_FILE_MAX) {
            let Some(path) = path else { continue };
            let backing = Backing::open(path.as_ref(), flags)?;
            let (ptrsize, mapsize) = ar.table_sizes(&backing, i == 0)?;

            // sanity: tables must fit in the file
            let sectors = (backing.len() + 255) >> 8;
            if u64::from(ptrsize) > sectors || u64::from(mapsize) > sectors {
                return Err(Error::invalid("ALD table sizes exceed file size"));
            }

            if !got_map {
                ar.read_filemap(&backing, ptrsize, mapsize)?;
                got_map = true;
            }
            ar.read_ptrmap(&backing, i, ptrsize)?;
            ar.volumes[i] = Some(backing);
        }
        if !got_map {
            return Err(Error::invalid("no ALD volumes given"));
        }
        Ok(ar)
    }

    /// Read the pointer-table and link-table sizes from a volume header,
    /// recovering the obfuscation additive on the first volume if needed.
    fn table_sizes(&mut self, backing: &Backing, detect_magic: bool) -> Result<(u32, u32)> {
        let header = backing.read_at(0, 6)?;
        let mut header: [u8; 6] = header.as_ref().try_into().unwrap();

        if detect_magic && header[2] != 0 {
            // Find the boundary between the pointer table and the link
            // table, assuming the pointer table ascends.
            let link_table_end = (get_3b(&header, 3) as usize) << 8;
            let table = backing.read_at(6, link_table_end.saturating_sub(6).min(backing.len() as usize - 6))?;
            let mut prev: i64 = -1;
            let mut found = false;
            for (k, row) in table.chunks_exact(3).enumerate() {
                let n = i64::from(get_3b(row, 0));
                if prev < n {
                    prev = n;
                    continue;
                }
                let boundary = ((6 + k * 3 + 0xff) >> 8) as u32;
                let enc = boundary.to_le_bytes();
                self.magic[0] = header[0].wrapping_sub(enc[0]);
                self.magic[1] = header[1].wrapping_sub(enc[1]);
                self.magic[2] = header[2].wrapping_sub(enc[2]);
                found = true;
                break;
            }
            if !found || self.magic[2] == 0 {
                return Err(Error::InvalidSignature("not an ALD archive".into()));
            }
        }
        for k in 0..3 {
            header[k] = header[k].wrapping_sub(self.magic[k]);
        }

        let ptrsize = get_3b(&header, 0);
        let mapsize = get_3b(&header, 3).wrapping_sub(ptrsize);
        if (ptrsize as i32) < 0 || (mapsize as i32) < 0 {
            return Err(Error::invalid("negative ALD table size"));
        }
        Ok((ptrsize, mapsize))
    }

    fn read_filemap(&mut self, backing: &Backing, ptrsize: u32, mapsize: u32) -> Result<()> {
        let bytes = backing.read_at(u64::from(ptrsize) * 256, mapsize as usize * 256)?;
        let maxfile = bytes.len() / 3;
        self.map_disk = Vec::with_capacity(maxfile);
        self.map_ptr = Vec::with_capacity(maxfile);
        for row in bytes.chunks_exact(3) {
            self.map_disk.push(i32::from(row[0]) - 1);
            self.map_ptr
                .push(i32::from(u16::from_le_bytes([row[1], row[2]])) - 1);
        }
        Ok(())
    }

    fn read_ptrmap(&mut self, backing: &Backing, disk: usize, ptrsize: u32) -> Result<()> {
        let bytes = backing.read_at(0, ptrsize as usize * 256)?;
        let filecnt = bytes.len() / 3;
        let mut ptrs = vec![0u32; filecnt];
        for (i, slot) in ptrs.iter_mut().enumerate().take(filecnt.saturating_sub(1)) {
            *slot = get_3b(&bytes, i * 3 + 3) * 256;
        }
        self.fileptr[disk] = ptrs;
        Ok(())
    }

    fn locate(&self, no: usize) -> Option<Located> {
        let disk = *self.map_disk.get(no)?;
        let ptr = *self.map_ptr.get(no)?;
        if disk < 0 || ptr < 0 {
            return None;
        }
        let ptrs = self.fileptr.get(disk as usize)?;
        if ptrs.is_empty() {
            return None;
        }
        let dataptr = *ptrs.get(ptr as usize)?;
        let dataptr2 = *ptrs.get(ptr as usize + 1)?;
        if dataptr == 0 || dataptr2 == 0 || dataptr2 <= dataptr {
            return None;
        }
        Some(Located {
            disk: disk as usize,
            dataptr: u64::from(dataptr),
        })
    }

    /// Per-entry header: `{hdr_size, payload_size, name @ +16}`.
    fn read_entry_header(&self, loc: &Located) -> Result<(u32, u32, SjisString)> {
        let backing = self.volumes[loc.disk]
            .as_ref()
            .ok_or_else(|| Error::invalid("ALD volume not loaded"))?;
        let head = backing.read_at(loc.dataptr, 16)?;
        let mut r = Reader::new(&head);
        let hdr_size = r.u32()?;
        let size = r.u32()?;
        if hdr_size < 16 {
            return Err(Error::invalid("ALD entry header too small"));
        }
        let name_buf = backing.read_at(loc.dataptr + 16, hdr_size as usize - 16)?;
        let name_len = name_buf.iter().position(|&b| b == 0).unwrap_or(name_buf.len());
        Ok((hdr_size, size, SjisString::from_bytes(&name_buf[..name_len])))
    }
}

impl Archive for AldArchive {
    fn nr_entries(&self) -> usize {
        self.map_disk.len()
    }

    fn entry(&self, no: usize) -> Option<Entry> {
        let loc = self.locate(no)?;
        match self.read_entry_header(&loc) {
            Ok((_, size, name)) => Some(Entry {
                no,
                name,
                size: size as usize,
            }),
            Err(err) => {
                warn!("failed to read ALD entry header: {err}");
                None
            }
        }
    }

    fn load(&self, entry: &Entry) -> Result<Cow<'_, [u8]>> {
        let loc = self
            .locate(entry.no)
            .ok_or_else(|| Error::invalid(format!("no such ALD entry: {}", entry.no)))?;
        let (hdr_size, size, _) = self.read_entry_header(&loc)?;
        let backing = self.volumes[loc.disk]
            .as_ref()
            .ok_or_else(|| Error::invalid("ALD volume not loaded"))?;
        backing.read_at(loc.dataptr + u64::from(hdr_size), size as usize)
    }

    fn exists(&self, no: usize) -> bool {
        self.locate(no).is_some()
    }

    fn exists_by_name(&self, name: &[u8]) -> Option<usize> {
        (0..self.nr_entries()).find(|&no| {
            self.entry(no)
                .is_some_and(|e| e.name.as_bytes() == name)
        })
    }
}
