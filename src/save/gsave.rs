//! Global-save files (`system.GlobalSave` / `system.GroupSave`).
//!
//! The inner payload is a record graph: a record table whose entries are
//! struct instances or the singleton globals record, plus globals,
//! strings, arrays and key-value tables referenced by index. Versions 4
//! and 5 differ only in the `group` field; version 7 drops the per-global
//! unknown, moves the array element type up to the flat-array level, adds
//! a struct-definition table and uses a sentinel for the empty string.

use std::io::Write;
use std::path::Path;

use flate2::Compression;

use super::Savefile;
use crate::ain::DataType;
use crate::buffer::{Reader, Writer};
use crate::string::SjisString;
use crate::{Error, Result, encoding};

/// Record-table entry type for struct instances.
pub const RECORD_STRUCT: i32 = 13;
/// Record-table entry type for the singleton globals record.
pub const RECORD_GLOBALS: i32 = 1000;

/// Empty-string value sentinel used from version 7.
pub const EMPTY_STRING: i32 = 0x7fffffff;

#[derive(Debug, Clone)]
pub struct GsaveRecord {
    /// [`RECORD_STRUCT`] or [`RECORD_GLOBALS`].
    pub record_type: i32,
    pub struct_name: String,
    /// Key-value indices for struct records, global indices for the
    /// globals record.
    pub indices: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct GsaveGlobal {
    pub data_type: i32,
    pub value: i32,
    pub name: String,
    /// Always 1; dropped from the format in version 7.
    pub unknown: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct GsaveArrayValue {
    pub value: i32,
    pub data_type: i32,
}

#[derive(Debug, Clone, Default)]
pub struct GsaveFlatArray {
    /// Element type, stored once per flat array from version 7.
    pub data_type: i32,
    pub values: Vec<GsaveArrayValue>,
}

#[derive(Debug, Clone, Default)]
pub struct GsaveArray {
    /// -1 for an unallocated array.
    pub rank: i32,
    /// Dimensions in reversed order.
    pub dimensions: Vec<i32>,
    pub flat_arrays: Vec<GsaveFlatArray>,
}

#[derive(Debug, Clone)]
pub struct GsaveKeyval {
    pub data_type: i32,
    pub value: i32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GsaveFieldDef {
    pub data_type: i32,
    pub name: String,
}

/// Struct schema stored alongside the data from version 7.
#[derive(Debug, Clone)]
pub struct GsaveStructDef {
    pub name: String,
    pub fields: Vec<GsaveFieldDef>,
}

#[derive(Debug, Clone)]
pub struct GlobalSave {
    pub key: String,
    /// Always 1000.
    pub uk1: i32,
    pub version: i32,
    /// Always 56.
    pub uk2: i32,
    pub nr_ain_globals: i32,
    /// Version 5+.
    pub group: Option<String>,

    pub records: Vec<GsaveRecord>,
    pub globals: Vec<GsaveGlobal>,
    pub strings: Vec<SjisString>,
    pub arrays: Vec<GsaveArray>,
    pub keyvals: Vec<GsaveKeyval>,
    /// Version 7+.
    pub struct_defs: Vec<GsaveStructDef>,
}

impl GlobalSave {
    #[must_use]
    pub fn create(version: i32, key: &str, nr_ain_globals: i32, group: Option<&str>) -> GlobalSave {
        GlobalSave {
            key: key.to_string(),
            uk1: 1000,
            version,
            uk2: 56,
            nr_ain_globals,
            group: (version >= 5).then(|| group.unwrap_or("").to_string()),
            records: Vec::new(),
            globals: Vec::new(),
            strings: Vec::new(),
            arrays: Vec::new(),
            keyvals: Vec::new(),
            struct_defs: Vec::new(),
        }
    }

    pub fn read(path: impl AsRef<Path>) -> Result<GlobalSave> {
        let save = Savefile::read(path)?;
        Self::parse(&save.buf)
    }

    fn validate_value(&self, value: i32, data_type: i32) -> bool {
        let data_type = DataType::from(data_type);
        match data_type {
            DataType::Void
            | DataType::Int
            | DataType::Bool
            | DataType::FuncType
            | DataType::Delegate
            | DataType::LongInt
            | DataType::Float => true,
            DataType::String => {
                (self.version >= 7 && value == EMPTY_STRING)
                    || (0 <= value && (value as usize) < self.strings.len())
            }
            DataType::Struct => 0 <= value && (value as usize) < self.records.len(),
            d if d.is_ref() => true,
            d if d.is_ranked_array() || d == DataType::Array => {
                0 <= value && (value as usize) < self.arrays.len()
            }
            _ => false,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<GlobalSave> {
        let mut r = Reader::new(buf);
        let mut gs = GlobalSave {
            key: encoding::sjis_to_utf8(r.cstring()?),
            uk1: r.i32()?,
            version: r.i32()?,
            uk2: r.i32()?,
            nr_ain_globals: r.i32()?,
            group: None,
            records: Vec::new(),
            globals: Vec::new(),
            strings: Vec::new(),
            arrays: Vec::new(),
            keyvals: Vec::new(),
            struct_defs: Vec::new(),
        };
        if gs.version != 4 && gs.version != 5 && gs.version != 7 {
            return Err(Error::UnsupportedFormat(format!(
                "global save version {}",
                gs.version
            )));
        }

        let records_offset = r.u32()? as usize;
        let nr_records = r.i32()?;
        let globals_offset = r.u32()? as usize;
        let nr_globals = r.i32()?;
        let strings_offset = r.u32()? as usize;
        let nr_strings = r.i32()?;
        let arrays_offset = r.u32()? as usize;
        let nr_arrays = r.i32()?;
        let keyvals_offset = r.u32()? as usize;
        let nr_keyvals = r.i32()?;
        let (structs_offset, nr_struct_defs) = if gs.version >= 7 {
            (r.u32()? as usize, r.i32()?)
        } else {
            (0, 0)
        };
        if gs.version >= 5 {
            gs.group = Some(encoding::sjis_to_utf8(r.cstring()?));
        }

        // every table must begin exactly at its declared offset
        if r.index() != records_offset {
            return Err(Error::invalid("record table offset mismatch"));
        }
        for _ in 0..nr_records {
            let record_type = r.i32()?;
            let struct_name = encoding::sjis_to_utf8(r.cstring()?);
            let nr_indices = r.i32()?;
            let index_ubound = match record_type {
                RECORD_STRUCT => nr_keyvals,
                RECORD_GLOBALS => nr_globals,
                _ => return Err(Error::invalid("bad record type")),
            };
            let mut indices = Vec::with_capacity(nr_indices.max(0) as usize);
            for _ in 0..nr_indices {
                let index = r.i32()?;
                if index < 0 || index >= index_ubound {
                    return Err(Error::invalid("record index out of range"));
                }
                indices.push(index);
            }
            gs.records.push(GsaveRecord {
                record_type,
                struct_name,
                indices,
            });
        }

        if r.index() != globals_offset {
            return Err(Error::invalid("globals table offset mismatch"));
        }
        for _ in 0..nr_globals {
            let data_type = r.i32()?;
            let value = r.i32()?;
            let name = encoding::sjis_to_utf8(r.cstring()?);
            let unknown = if gs.version < 7 { r.i32()? } else { 1 };
            gs.globals.push(GsaveGlobal {
                data_type,
                value,
                name,
                unknown,
            });
        }

        if r.index() != strings_offset {
            return Err(Error::invalid("string table offset mismatch"));
        }
        for _ in 0..nr_strings {
            gs.strings.push(SjisString::from_bytes(r.cstring()?));
        }

        if r.index() != arrays_offset {
            return Err(Error::invalid("array table offset mismatch"));
        }
        for _ in 0..nr_arrays {
            let mut array = GsaveArray {
                rank: r.i32()?,
                ..GsaveArray::default()
            };
            let mut expected_flat = 0;
            if array.rank > 0 {
                expected_flat = 1;
                for i in 0..array.rank {
                    let dim = r.i32()?;
                    if i != 0 {
                        expected_flat *= dim;
                    }
                    array.dimensions.push(dim);
                }
            }
            let nr_flat = r.i32()?;
            if nr_flat != expected_flat {
                return Err(Error::invalid("bad flat-array count"));
            }
            for _ in 0..nr_flat {
                let nr_values = r.i32()?;
                if nr_values != array.dimensions[0] {
                    return Err(Error::invalid("bad flat-array length"));
                }
                let mut fa = GsaveFlatArray::default();
                if gs.version >= 7 {
                    fa.data_type = r.i32()?;
                }
                for _ in 0..nr_values {
                    let value = r.i32()?;
                    let data_type = if gs.version >= 7 { fa.data_type } else { r.i32()? };
                    fa.values.push(GsaveArrayValue { value, data_type });
                }
                array.flat_arrays.push(fa);
            }
            gs.arrays.push(array);
        }

        if r.index() != keyvals_offset {
            return Err(Error::invalid("key-value table offset mismatch"));
        }
        for _ in 0..nr_keyvals {
            gs.keyvals.push(GsaveKeyval {
                data_type: r.i32()?,
                value: r.i32()?,
                name: encoding::sjis_to_utf8(r.cstring()?),
            });
        }

        if gs.version >= 7 {
            if r.index() != structs_offset {
                return Err(Error::invalid("struct-def table offset mismatch"));
            }
            for _ in 0..nr_struct_defs {
                let name = encoding::sjis_to_utf8(r.cstring()?);
                let nr_fields = r.i32()?;
                let mut fields = Vec::with_capacity(nr_fields.max(0) as usize);
                for _ in 0..nr_fields {
                    fields.push(GsaveFieldDef {
                        data_type: r.i32()?,
                        name: encoding::sjis_to_utf8(r.cstring()?),
                    });
                }
                gs.struct_defs.push(GsaveStructDef { name, fields });
            }
        }

        // cross-reference validation once every table is loaded
        for g in &gs.globals {
            if !gs.validate_value(g.value, g.data_type) {
                return Err(Error::invalid(format!("bad global value: {}", g.name)));
            }
        }
        for a in &gs.arrays {
            for fa in &a.flat_arrays {
                for v in &fa.values {
                    if !gs.validate_value(v.value, v.data_type) {
                        return Err(Error::invalid("bad array value"));
                    }
                }
            }
        }
        for kv in &gs.keyvals {
            if !gs.validate_value(kv.value, kv.data_type) {
                return Err(Error::invalid(format!("bad key-value: {}", kv.name)));
            }
        }

        Ok(gs)
    }

    /// Serialize the inner payload (without the outer container).
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.cstring(&encoding::utf8_to_sjis(&self.key));
        w.i32(self.uk1);
        w.i32(self.version);
        w.i32(self.uk2);
        w.i32(self.nr_ain_globals);

        let records_loc = w.skip_i32();
        w.i32(self.records.len() as i32);
        let globals_loc = w.skip_i32();
        w.i32(self.globals.len() as i32);
        let strings_loc = w.skip_i32();
        w.i32(self.strings.len() as i32);
        let arrays_loc = w.skip_i32();
        w.i32(self.arrays.len() as i32);
        let keyvals_loc = w.skip_i32();
        w.i32(self.keyvals.len() as i32);
        let structs_loc = if self.version >= 7 {
            let loc = w.skip_i32();
            w.i32(self.struct_defs.len() as i32);
            Some(loc)
        } else {
            None
        };
        if self.version >= 5 {
            w.cstring(&encoding::utf8_to_sjis(self.group.as_deref().unwrap_or("")));
        }

        w.write_i32_at(records_loc, w.index() as i32);
        for rec in &self.records {
            w.i32(rec.record_type);
            w.cstring(&encoding::utf8_to_sjis(&rec.struct_name));
            w.i32(rec.indices.len() as i32);
            for &i in &rec.indices {
                w.i32(i);
            }
        }

        w.write_i32_at(globals_loc, w.index() as i32);
        for g in &self.globals {
            w.i32(g.data_type);
            w.i32(g.value);
            w.cstring(&encoding::utf8_to_sjis(&g.name));
            if self.version < 7 {
                w.i32(g.unknown);
            }
        }

        w.write_i32_at(strings_loc, w.index() as i32);
        for s in &self.strings {
            w.cstring(s.as_bytes());
        }

        w.write_i32_at(arrays_loc, w.index() as i32);
        for a in &self.arrays {
            w.i32(a.rank);
            for &dim in &a.dimensions {
                w.i32(dim);
            }
            w.i32(a.flat_arrays.len() as i32);
            for fa in &a.flat_arrays {
                w.i32(fa.values.len() as i32);
                if self.version >= 7 {
                    w.i32(fa.data_type);
                }
                for v in &fa.values {
                    w.i32(v.value);
                    if self.version < 7 {
                        w.i32(v.data_type);
                    }
                }
            }
        }

        w.write_i32_at(keyvals_loc, w.index() as i32);
        for kv in &self.keyvals {
            w.i32(kv.data_type);
            w.i32(kv.value);
            w.cstring(&encoding::utf8_to_sjis(&kv.name));
        }

        if let Some(loc) = structs_loc {
            w.write_i32_at(loc, w.index() as i32);
            for def in &self.struct_defs {
                w.cstring(&encoding::utf8_to_sjis(&def.name));
                w.i32(def.fields.len() as i32);
                for field in &def.fields {
                    w.i32(field.data_type);
                    w.cstring(&encoding::utf8_to_sjis(&field.name));
                }
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

    // ------------------------------------------------------------------
    // builders

    /// Create the singleton globals record covering `nr_globals` entries.
    pub fn add_globals_record(&mut self, nr_globals: usize) -> i32 {
        debug_assert!(self.globals.is_empty());
        let rec = GsaveRecord {
            record_type: RECORD_GLOBALS,
            struct_name: String::new(),
            indices: (0..nr_globals as i32).collect(),
        };
        let no = self.add_record(rec);
        self.globals = (0..nr_globals)
            .map(|_| GsaveGlobal {
                data_type: DataType::Void.into(),
                value: 0,
                name: String::new(),
                unknown: 1,
            })
            .collect();
        no
    }

    pub fn add_record(&mut self, rec: GsaveRecord) -> i32 {
        self.records.push(rec);
        self.records.len() as i32 - 1
    }

    pub fn add_string(&mut self, s: SjisString) -> i32 {
        self.strings.push(s);
        self.strings.len() as i32 - 1
    }

    pub fn add_array(&mut self, array: GsaveArray) -> i32 {
        self.arrays.push(array);
        self.arrays.len() as i32 - 1
    }

    pub fn add_keyval(&mut self, kv: GsaveKeyval) -> i32 {
        self.keyvals.push(kv);
        self.keyvals.len() as i32 - 1
    }
}
