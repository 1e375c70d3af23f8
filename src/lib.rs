//! AliceSoft System 4 file format parsers and writers in Rust
//!
//! Read/write access to the binary artifacts of the System 4 engine:
//! compiled program files (`ain`), archive containers (`ald`, `afa`,
//! `aar`, `alk`, `dlf`, `flat`), structured data files (`ex`), save
//! files, image codecs (`qnt`, `ajp`, `pcf`, `dcf`, `rou` plus PNG /
//! JPEG / WebP adapters) and font containers (`fnl`).

/// Program image (`ain`) model, reader, writer and instruction table
pub mod ain;
/// Archive contract and the container format backends
pub mod archive;
mod buffer;
/// Image loading and saving
pub mod cg;
/// Disassembler cursor
pub mod dasm;
/// Shift-JIS text handling
pub mod encoding;
mod error;
/// EX data files
pub mod ex;
/// Font libraries
pub mod fnl;
mod mt19937;
/// Save files
pub mod save;
mod string;
mod zlib;

pub use self::ain::Ain;
pub use self::archive::{Archive, ArchiveFlags, Entry};
pub use self::buffer::{Reader, Writer};
pub use self::dasm::Dasm;
pub use self::error::{Error, Result};
pub use self::ex::Ex;
pub use self::mt19937::{Mt19937, xor_stream};
pub use self::string::{SjisString, float_to_sjis, int_to_sjis};
