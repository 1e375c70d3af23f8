//! Save files.
//!
//! Both save kinds share an outer container: a `GD\x01\x01` header with
//! the raw size, an optional encryption stream, and a zlib body. The
//! compression level of the original file is latched from the zlib marker
//! byte and preserved on rewrite.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;

use crate::buffer::Reader;
use crate::{Error, Result, mt19937, zlib};

pub mod gsave;
pub mod rsave;

pub use gsave::GlobalSave;
pub use rsave::{ResumeSave, RsaveReadMode};

/// Seed for the save-file encryption stream.
pub const SAVE_ENCRYPTION_SEED: u32 = 0x12320f;

/// A decoded save container: the raw inner payload plus the outer
/// parameters needed to rewrite it byte-compatibly.
#[derive(Debug, Clone)]
pub struct Savefile {
    pub buf: Vec<u8>,
    pub encrypted: bool,
    pub compression: Compression,
}

fn crypt(buf: &mut [u8]) {
    mt19937::xor_stream(buf, SAVE_ENCRYPTION_SEED);
}

impl Savefile {
    pub fn read(path: impl AsRef<Path>) -> Result<Savefile> {
        Self::from_bytes(&fs::read(path)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Savefile> {
        let mut r = Reader::new(data);
        if !r.check_bytes(b"GD\x01\x01") {
            return Err(Error::InvalidSignature("not a System4 save file".into()));
        }
        let raw_size = r.u32()? as usize;
        if r.remaining() < 2 {
            return Err(Error::invalid("save file too small"));
        }

        let mut body = r.data().to_vec();
        let encrypted = body[0] == 0x1a;
        if encrypted {
            crypt(&mut body);
        }
        let compression = match body[1] {
            0x01 => Compression::fast(),
            0xda => Compression::best(),
            _ => Compression::default(),
        };

        let buf = zlib::inflate_exact(&body, raw_size)?;
        Ok(Savefile {
            buf,
            encrypted,
            compression,
        })
    }

    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        let mut body = zlib::deflate(&self.buf, self.compression)?;
        if self.encrypted {
            crypt(&mut body);
        }
        out.write_all(b"GD\x01\x01")?;
        out.write_all(&(self.buf.len() as u32).to_le_bytes())?;
        out.write_all(&body)?;
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_round_trip() {
        let save = Savefile {
            buf: b"hello save".repeat(20),
            encrypted: true,
            compression: Compression::best(),
        };
        let bytes = save.to_vec().unwrap();
        assert_eq!(&bytes[0..4], b"GD\x01\x01");
        let back = Savefile::from_bytes(&bytes).unwrap();
        assert_eq!(back.buf, save.buf);
        assert!(back.encrypted);
        assert_eq!(back.compression.level(), Compression::best().level());
    }

    #[test]
    fn unencrypted_container() {
        let save = Savefile {
            buf: vec![7; 64],
            encrypted: false,
            compression: Compression::default(),
        };
        let bytes = save.to_vec().unwrap();
        // plain zlib marker, not the encryption mark
        assert_eq!(bytes[8], 0x78);
        let back = Savefile::from_bytes(&bytes).unwrap();
        assert!(!back.encrypted);
        assert_eq!(back.buf, save.buf);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            Savefile::from_bytes(b"XX\x01\x01aaaaaaaaaa"),
            Err(Error::InvalidSignature(_))
        ));
    }
}
