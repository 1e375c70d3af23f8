//! Resume-save files (`system.ResumeSave` / `system.ResumeLoad`).
//!
//! The inner payload is a suspended VM image: the current return record,
//! the integer stack, the call-frame stack, the return-record list and a
//! typed heap of frames, strings, arrays, structs and delegates that
//! reference each other by index. Function references are raw ids in
//! version 4 and names from version 6. A `CommentsOnly` read mode stops
//! after the comment block for fast save-slot listings.

use std::io::Write;
use std::path::Path;

use flate2::Compression;

use super::Savefile;
use crate::buffer::{Reader, Writer};
use crate::string::SjisString;
use crate::{Error, Result, encoding};

pub const FRAME_ENTRY_POINT: i32 = 0;
pub const FRAME_FUNCTION_CALL: i32 = 1;
pub const FRAME_METHOD_CALL: i32 = 2;
pub const FRAME_CALL_STACK_BOTTOM: i32 = 4;

const HEAP_NULL: i32 = -1;
const HEAP_GLOBALS: i32 = 0;
const HEAP_LOCALS: i32 = 1;
const HEAP_STRING: i32 = 2;
const HEAP_ARRAY: i32 = 3;
const HEAP_STRUCT: i32 = 4;
const HEAP_DELEGATE: i32 = 5;

/// A function reference: a raw id in version 4, a name from version 6.
#[derive(Debug, Clone, PartialEq)]
pub enum RsaveSymbol {
    Id(i32),
    Name(String),
}

impl Default for RsaveSymbol {
    fn default() -> Self {
        RsaveSymbol::Id(-1)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RsaveReturnRecord {
    pub return_addr: i32,
    pub caller_func: RsaveSymbol,
    pub local_addr: i32,
    pub crc: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaveCallFrame {
    pub frame_type: i32,
    pub local_ptr: i32,
    /// Heap index of the receiver for method-call frames, else -1.
    pub struct_ptr: i32,
}

/// One heap object. Objects reference each other by heap index; -1 is the
/// shared null sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum RsaveHeapObj {
    /// A globals or locals page.
    Frame {
        globals: bool,
        seq: i32,
        func: RsaveSymbol,
        types: Vec<i32>,
        /// v9+; -1 when absent.
        struct_ptr: i32,
        slots: Vec<i32>,
    },
    String {
        seq: i32,
        value: SjisString,
    },
    Array {
        seq: i32,
        rank: i32,
        data_type: i32,
        struct_type: RsaveSymbol,
        root_rank: i32,
        is_not_empty: i32,
        slots: Vec<i32>,
    },
    Struct {
        seq: i32,
        ctor: RsaveSymbol,
        dtor: RsaveSymbol,
        struct_type: RsaveSymbol,
        types: Vec<i32>,
        slots: Vec<i32>,
    },
    /// v9+.
    Delegate {
        seq: i32,
        slots: Vec<i32>,
    },
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaveReadMode {
    Full,
    /// Stop after the comment block.
    CommentsOnly,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeSave {
    pub version: i32,
    pub key: String,
    /// v7+; may be the only content of a save.
    pub comments: Vec<SjisString>,
    /// Set when parsing stopped at the comment block.
    pub comments_only: bool,

    pub ip: RsaveReturnRecord,
    pub stack: Vec<i32>,
    pub call_frames: Vec<RsaveCallFrame>,
    pub return_records: Vec<RsaveReturnRecord>,
    pub uk1: i32,
    pub uk2: i32,
    pub uk3: i32,
    pub uk4: i32,
    /// v9+.
    pub next_seq: i32,
    pub heap: Vec<RsaveHeapObj>,
    /// v6+.
    pub func_names: Vec<String>,
}

fn read_symbol(r: &mut Reader<'_>, version: i32) -> Result<RsaveSymbol> {
    if version >= 6 {
        Ok(RsaveSymbol::Name(encoding::sjis_to_utf8(r.cstring()?)))
    } else {
        Ok(RsaveSymbol::Id(r.i32()?))
    }
}

fn write_symbol(w: &mut Writer, version: i32, sym: &RsaveSymbol) {
    if version >= 6 {
        let name = match sym {
            RsaveSymbol::Name(name) => name.clone(),
            RsaveSymbol::Id(id) => id.to_string(),
        };
        w.cstring(&encoding::utf8_to_sjis(&name));
    } else {
        match sym {
            RsaveSymbol::Id(id) => w.i32(*id),
            RsaveSymbol::Name(_) => w.i32(-1),
        }
    }
}

fn read_return_record(r: &mut Reader<'_>, version: i32) -> Result<RsaveReturnRecord> {
    Ok(RsaveReturnRecord {
        return_addr: r.i32()?,
        caller_func: read_symbol(r, version)?,
        local_addr: r.i32()?,
        crc: r.i32()?,
    })
}

fn write_return_record(w: &mut Writer, version: i32, rec: &RsaveReturnRecord) {
    w.i32(rec.return_addr);
    write_symbol(w, version, &rec.caller_func);
    w.i32(rec.local_addr);
    w.i32(rec.crc);
}

fn read_typed_slots(r: &mut Reader<'_>) -> Result<Vec<i32>> {
    let n = r.i32()?;
    if n < 0 {
        return Err(Error::invalid("negative slot count"));
    }
    let mut out = Vec::with_capacity(n as usize);
    for _ in 0..n {
        out.push(r.i32()?);
    }
    Ok(out)
}

fn read_heap_obj(r: &mut Reader<'_>, version: i32) -> Result<RsaveHeapObj> {
    let tag = r.i32()?;
    if tag == HEAP_NULL {
        return Ok(RsaveHeapObj::Null);
    }
    let seq = if version >= 9 { r.i32()? } else { 0 };
    match tag {
        HEAP_GLOBALS | HEAP_LOCALS => {
            let func = read_symbol(r, version)?;
            let types = read_typed_slots(r)?;
            let struct_ptr = if version >= 9 { r.i32()? } else { -1 };
            // the frame size is stored in bytes
            let nr_bytes = r.i32()?;
            if nr_bytes < 0 || nr_bytes % 4 != 0 {
                return Err(Error::invalid("bad frame size"));
            }
            let mut slots = Vec::with_capacity(nr_bytes as usize / 4);
            for _ in 0..nr_bytes / 4 {
                slots.push(r.i32()?);
            }
            Ok(RsaveHeapObj::Frame {
                globals: tag == HEAP_GLOBALS,
                seq,
                func,
                types,
                struct_ptr,
                slots,
            })
        }
        HEAP_STRING => {
            // length includes the NUL terminator
            let len = r.i32()?;
            if len < 1 {
                return Err(Error::invalid("bad string length"));
            }
            let bytes = r.bytes(len as usize)?;
            Ok(RsaveHeapObj::String {
                seq,
                value: SjisString::from_bytes(&bytes[..len as usize - 1]),
            })
        }
        HEAP_ARRAY => Ok(RsaveHeapObj::Array {
            seq,
            rank: r.i32()?,
            data_type: r.i32()?,
            struct_type: read_symbol(r, version)?,
            root_rank: r.i32()?,
            is_not_empty: r.i32()?,
            slots: read_typed_slots(r)?,
        }),
        HEAP_STRUCT => Ok(RsaveHeapObj::Struct {
            seq,
            ctor: read_symbol(r, version)?,
            dtor: read_symbol(r, version)?,
            struct_type: read_symbol(r, version)?,
            types: read_typed_slots(r)?,
            slots: read_typed_slots(r)?,
        }),
        HEAP_DELEGATE if version >= 9 => Ok(RsaveHeapObj::Delegate {
            seq,
            slots: read_typed_slots(r)?,
        }),
        _ => Err(Error::invalid(format!("unknown heap object tag {tag}"))),
    }
}

fn write_heap_obj(w: &mut Writer, version: i32, obj: &RsaveHeapObj) {
    let write_slots = |w: &mut Writer, slots: &[i32]| {
        w.i32(slots.len() as i32);
        for &s in slots {
            w.i32(s);
        }
    };
    match obj {
        RsaveHeapObj::Null => w.i32(HEAP_NULL),
        RsaveHeapObj::Frame {
            globals,
            seq,
            func,
            types,
            struct_ptr,
            slots,
        } => {
            w.i32(if *globals { HEAP_GLOBALS } else { HEAP_LOCALS });
            if version >= 9 {
                w.i32(*seq);
            }
            write_symbol(w, version, func);
            write_slots(w, types);
            if version >= 9 {
                w.i32(*struct_ptr);
            }
            w.i32(slots.len() as i32 * 4);
            for &s in slots {
                w.i32(s);
            }
        }
        RsaveHeapObj::String { seq, value } => {
            w.i32(HEAP_STRING);
            if version >= 9 {
                w.i32(*seq);
            }
            w.i32(value.len() as i32 + 1);
            w.cstring(value.as_bytes());
        }
        RsaveHeapObj::Array {
            seq,
            rank,
            data_type,
            struct_type,
            root_rank,
            is_not_empty,
            slots,
        } => {
            w.i32(HEAP_ARRAY);
            if version >= 9 {
                w.i32(*seq);
            }
            w.i32(*rank);
            w.i32(*data_type);
            write_symbol(w, version, struct_type);
            w.i32(*root_rank);
            w.i32(*is_not_empty);
            write_slots(w, slots);
        }
        RsaveHeapObj::Struct {
            seq,
            ctor,
            dtor,
            struct_type,
            types,
            slots,
        } => {
            w.i32(HEAP_STRUCT);
            if version >= 9 {
                w.i32(*seq);
            }
            write_symbol(w, version, ctor);
            write_symbol(w, version, dtor);
            write_symbol(w, version, struct_type);
            write_slots(w, types);
            write_slots(w, slots);
        }
        RsaveHeapObj::Delegate { seq, slots } => {
            w.i32(HEAP_DELEGATE);
            if version >= 9 {
                w.i32(*seq);
            }
            write_slots(w, slots);
        }
    }
}

impl ResumeSave {
    pub fn read(path: impl AsRef<Path>, mode: RsaveReadMode) -> Result<ResumeSave> {
        let save = Savefile::read(path)?;
        Self::parse(&save.buf, mode)
    }

    pub fn parse(buf: &[u8], mode: RsaveReadMode) -> Result<ResumeSave> {
        let mut r = Reader::new(buf);
        if !r.check_bytes(b"RSM\0") {
            return Err(Error::InvalidSignature("not a resume save".into()));
        }
        let mut rs = ResumeSave {
            version: r.i32()?,
            ..ResumeSave::default()
        };
        if !matches!(rs.version, 4 | 6 | 7 | 9) {
            return Err(Error::UnsupportedFormat(format!(
                "resume save version {}",
                rs.version
            )));
        }
        rs.key = encoding::sjis_to_utf8(r.cstring()?);

        if rs.version >= 7 {
            let nr_comments = r.i32()?;
            for _ in 0..nr_comments {
                rs.comments.push(SjisString::from_bytes(r.cstring()?));
            }
            // a comment-only file ends here
            if mode == RsaveReadMode::CommentsOnly || r.remaining() == 0 {
                rs.comments_only = true;
                return Ok(rs);
            }
        } else if mode == RsaveReadMode::CommentsOnly {
            rs.comments_only = true;
            return Ok(rs);
        }

        rs.ip = read_return_record(&mut r, rs.version)?;

        let stack_size = r.i32()?;
        for _ in 0..stack_size {
            rs.stack.push(r.i32()?);
        }

        // call frames as three parallel arrays; struct pointers only
        // exist for method-call frames
        let nr_frames = r.i32()?;
        let mut local_ptrs = Vec::with_capacity(nr_frames.max(0) as usize);
        for _ in 0..nr_frames {
            local_ptrs.push(r.i32()?);
        }
        let mut frame_types = Vec::with_capacity(nr_frames.max(0) as usize);
        for _ in 0..nr_frames {
            frame_types.push(r.i32()?);
        }
        for i in 0..nr_frames as usize {
            let struct_ptr = if frame_types[i] == FRAME_METHOD_CALL {
                r.i32()?
            } else {
                -1
            };
            rs.call_frames.push(RsaveCallFrame {
                frame_type: frame_types[i],
                local_ptr: local_ptrs[i],
                struct_ptr,
            });
        }

        let nr_return_records = r.i32()?;
        for _ in 0..nr_return_records {
            rs.return_records.push(read_return_record(&mut r, rs.version)?);
        }

        rs.uk1 = r.i32()?;
        rs.uk2 = r.i32()?;
        rs.uk3 = r.i32()?;
        rs.uk4 = r.i32()?;

        if rs.version >= 9 {
            rs.next_seq = r.i32()?;
        }

        let nr_heap = r.i32()?;
        for _ in 0..nr_heap {
            rs.heap.push(read_heap_obj(&mut r, rs.version)?);
        }

        if rs.version >= 6 {
            let nr_func_names = r.i32()?;
            for _ in 0..nr_func_names {
                rs.func_names.push(encoding::sjis_to_utf8(r.cstring()?));
            }
        }

        rs.validate()?;
        Ok(rs)
    }

    /// Check that every heap index stored in a frame points at a real
    /// heap object (or the null sentinel).
    fn validate(&self) -> Result<()> {
        let valid = |ptr: i32| ptr == -1 || (0 <= ptr && (ptr as usize) < self.heap.len());
        for frame in &self.call_frames {
            if !valid(frame.local_ptr) || !valid(frame.struct_ptr) {
                return Err(Error::invalid("call frame references invalid heap object"));
            }
        }
        for obj in &self.heap {
            if let RsaveHeapObj::Frame { struct_ptr, .. } = obj
                && !valid(*struct_ptr)
            {
                return Err(Error::invalid("frame references invalid heap object"));
            }
        }
        Ok(())
    }

    /// Serialize the inner payload (without the outer container).
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(b"RSM\0");
        w.i32(self.version);
        w.cstring(&encoding::utf8_to_sjis(&self.key));

        if self.version >= 7 {
            w.i32(self.comments.len() as i32);
            for c in &self.comments {
                w.cstring(c.as_bytes());
            }
            if self.comments_only {
                return w.into_vec();
            }
        }

        write_return_record(&mut w, self.version, &self.ip);

        w.i32(self.stack.len() as i32);
        for &v in &self.stack {
            w.i32(v);
        }

        w.i32(self.call_frames.len() as i32);
        for frame in &self.call_frames {
            w.i32(frame.local_ptr);
        }
        for frame in &self.call_frames {
            w.i32(frame.frame_type);
        }
        for frame in &self.call_frames {
            if frame.frame_type == FRAME_METHOD_CALL {
                w.i32(frame.struct_ptr);
            }
        }

        w.i32(self.return_records.len() as i32);
        for rec in &self.return_records {
            write_return_record(&mut w, self.version, rec);
        }

        w.i32(self.uk1);
        w.i32(self.uk2);
        w.i32(self.uk3);
        w.i32(self.uk4);

        if self.version >= 9 {
            w.i32(self.next_seq);
        }

        w.i32(self.heap.len() as i32);
        for obj in &self.heap {
            write_heap_obj(&mut w, self.version, obj);
        }

        if self.version >= 6 {
            w.i32(self.func_names.len() as i32);
            for name in &self.func_names {
                w.cstring(&encoding::utf8_to_sjis(name));
            }
        }

        w.into_vec()
    }

    pub fn write(&self, out: &mut dyn Write, encrypt: bool, compression: Compression) -> Result<()> {
        let save = Savefile {
            buf: self.serialize(),
            encrypted: encrypt,
            compression,
        };
        save.write(out)
    }
}
