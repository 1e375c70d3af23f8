//! `ain` file writer: the reader mirrored.
//!
//! Sections are emitted in canonical tag order for every section whose
//! presence flag is set, then the image is wrapped in the outer container:
//! either the encryption stream or an `AI2` zlib wrap.

use super::{Ain, DataType, Function, FunctionType, InitVal, Initval, Struct, Type, Variable};
use crate::buffer::Writer;
use crate::{Result, encoding, zlib};

/// Outer container forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// XOR stream over the whole file (the form used below version 6).
    Encrypted,
    /// `AI2\0\0\0\0` header plus zlib.
    Compressed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Defaults to the form the image's version shipped with.
    pub container: Option<Container>,
}

fn write_string(w: &mut Writer, s: &str) {
    w.cstring(&encoding::utf8_to_sjis(s));
}

fn write_msg1_string(w: &mut Writer, s: &str) {
    let bytes: Vec<u8> = encoding::utf8_to_sjis(s)
        .iter()
        .enumerate()
        .map(|(i, &b)| b.wrapping_add(0x60).wrapping_add(i as u8))
        .collect();
    w.pascal_string(&bytes);
}

fn write_variable_type(w: &mut Writer, ain: &Ain, t: &Type) {
    w.i32(t.data.into());
    w.i32(t.struc);
    w.i32(t.rank);
    if ain.version_gte(11, 0)
        && t.rank != 0
        && let Some(sub) = &t.array_type
    {
        write_variable_type(w, ain, sub);
    }
}

fn write_return_type(w: &mut Writer, ain: &Ain, t: &Type) {
    if ain.version_gte(11, 0) {
        write_variable_type(w, ain, t);
        return;
    }
    w.i32(t.data.into());
    w.i32(t.struc);
}

fn write_variable_initval(w: &mut Writer, v: &Variable) {
    let Some(initval) = &v.initval else {
        w.i32(0);
        return;
    };
    w.i32(1);
    match v.var_type.data {
        DataType::String => {
            if let InitVal::String(s) = initval {
                write_string(w, s);
            } else {
                write_string(w, "");
            }
        }
        DataType::Struct | DataType::Delegate | DataType::Array => {}
        d if d.is_ref() => {}
        _ => match initval {
            InitVal::Float(f) => w.u32(f.to_bits()),
            InitVal::Int(i) => w.i32(*i),
            InitVal::String(_) => w.i32(0),
        },
    }
}

fn write_variables(w: &mut Writer, ain: &Ain, vars: &[Variable]) {
    for v in vars {
        write_string(w, &v.name);
        if ain.version_gte(12, 0) {
            write_string(w, v.name2.as_deref().unwrap_or(""));
        }
        write_variable_type(w, ain, &v.var_type);
        if ain.version_gte(8, 0) {
            write_variable_initval(w, v);
        }
    }
}

fn write_function(w: &mut Writer, ain: &Ain, f: &Function) {
    w.u32(f.address);
    write_string(w, &f.name);
    if ain.version > 1 && ain.version < 7 {
        w.i32(f.is_label.into());
    }
    write_return_type(w, ain, &f.return_type);
    w.i32(f.nr_args);
    w.i32(f.vars.len() as i32);
    if ain.version_gte(11, 0) {
        w.i32(f.is_lambda);
    }
    if ain.version > 1 {
        w.i32(f.crc);
    }
    write_variables(w, ain, &f.vars);
}

fn write_global(w: &mut Writer, ain: &Ain, g: &Variable) {
    write_string(w, &g.name);
    if ain.version_gte(12, 0) {
        write_string(w, g.name2.as_deref().unwrap_or(""));
    }
    write_variable_type(w, ain, &g.var_type);
    if ain.version_gte(5, 0) {
        w.i32(g.group_index);
    }
}

fn write_initval(w: &mut Writer, iv: &Initval) {
    w.i32(iv.global_index);
    w.i32(iv.data_type);
    match &iv.value {
        InitVal::String(s) => write_string(w, s),
        InitVal::Float(f) => w.u32(f.to_bits()),
        InitVal::Int(i) => w.i32(*i),
    }
}

fn write_structure(w: &mut Writer, ain: &Ain, s: &Struct) {
    write_string(w, &s.name);
    if ain.version_gte(11, 0) {
        w.i32(s.interfaces.len() as i32);
        for iface in &s.interfaces {
            w.i32(iface.struct_type);
            w.i32(iface.vtable_offset);
        }
    }
    w.i32(s.constructor);
    w.i32(s.destructor);
    w.i32(s.members.len() as i32);
    write_variables(w, ain, &s.members);
    if ain.version_gte(14, 1) {
        w.i32(s.vmethods.len() as i32);
        for &m in &s.vmethods {
            w.i32(m);
        }
    }
}

fn write_libraries(w: &mut Writer, ain: &Ain) {
    w.i32(ain.libraries.len() as i32);
    for lib in &ain.libraries {
        write_string(w, &lib.name);
        w.i32(lib.functions.len() as i32);
        for f in &lib.functions {
            write_string(w, &f.name);
            if ain.version_gte(14, 0) {
                write_variable_type(w, ain, &f.return_type);
            } else {
                w.i32(f.return_type.data.into());
            }
            w.i32(f.arguments.len() as i32);
            for a in &f.arguments {
                write_string(w, &a.name);
                if ain.version_gte(14, 0) {
                    write_variable_type(w, ain, &a.arg_type);
                } else {
                    w.i32(a.arg_type.data.into());
                }
            }
        }
    }
}

fn write_function_types(w: &mut Writer, ain: &Ain, types: &[FunctionType]) {
    // section size is back-patched once the payload length is known
    let size_loc = w.skip_i32();
    let start = w.index();
    w.i32(types.len() as i32);
    for t in types {
        write_string(w, &t.name);
        write_return_type(w, ain, &t.return_type);
        w.i32(t.nr_arguments);
        w.i32(t.variables.len() as i32);
        write_variables(w, ain, &t.variables);
    }
    w.write_i32_at(size_loc, (w.index() - start) as i32);
}

pub(super) fn write(ain: &Ain, opts: &WriteOptions) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    let s = &ain.sections;

    if s.vers.present {
        w.bytes(b"VERS");
        w.i32(ain.version);
    }
    if s.keyc.present {
        w.bytes(b"KEYC");
        w.i32(ain.keycode);
    }
    if s.code.present {
        w.bytes(b"CODE");
        w.i32(ain.code.len() as i32);
        w.bytes(&ain.code);
    }
    if s.func.present {
        w.bytes(b"FUNC");
        w.i32(ain.functions.len() as i32);
        for f in &ain.functions {
            write_function(&mut w, ain, f);
        }
    }
    if s.glob.present {
        w.bytes(b"GLOB");
        w.i32(ain.globals.len() as i32);
        for g in &ain.globals {
            write_global(&mut w, ain, g);
        }
    }
    if s.gset.present {
        w.bytes(b"GSET");
        w.i32(ain.global_initvals.len() as i32);
        for iv in &ain.global_initvals {
            write_initval(&mut w, iv);
        }
    }
    if s.strt.present {
        w.bytes(b"STRT");
        w.i32(ain.structures.len() as i32);
        for st in &ain.structures {
            write_structure(&mut w, ain, st);
        }
    }
    if s.msg0.present {
        w.bytes(b"MSG0");
        w.i32(ain.messages.len() as i32);
        for m in &ain.messages {
            write_string(&mut w, m);
        }
    }
    if s.msg1.present {
        w.bytes(b"MSG1");
        w.i32(ain.messages.len() as i32);
        w.i32(ain.msg1_uk);
        for m in &ain.messages {
            write_msg1_string(&mut w, m);
        }
    }
    if s.main.present {
        w.bytes(b"MAIN");
        w.i32(ain.main);
    }
    if s.msgf.present {
        w.bytes(b"MSGF");
        w.i32(ain.msgf);
    }
    if s.hll0.present {
        w.bytes(b"HLL0");
        write_libraries(&mut w, ain);
    }
    if s.swi0.present {
        w.bytes(b"SWI0");
        w.i32(ain.switches.len() as i32);
        for sw in &ain.switches {
            w.i32(sw.case_type);
            w.i32(sw.default_address);
            w.i32(sw.cases.len() as i32);
            for c in &sw.cases {
                w.i32(c.value);
                w.i32(c.address);
            }
        }
    }
    if s.gver.present {
        w.bytes(b"GVER");
        w.i32(ain.game_version);
    }
    if s.slbl.present {
        w.bytes(b"SLBL");
        w.i32(ain.scenario_labels.len() as i32);
        for label in &ain.scenario_labels {
            write_string(&mut w, &label.name);
            w.u32(label.address);
        }
    }
    if s.str0.present {
        w.bytes(b"STR0");
        w.i32(ain.strings.len() as i32);
        for st in &ain.strings {
            write_string(&mut w, st);
        }
    }
    if s.fnam.present {
        w.bytes(b"FNAM");
        w.i32(ain.filenames.len() as i32);
        for f in &ain.filenames {
            write_string(&mut w, f);
        }
    }
    if s.ojmp.present {
        w.bytes(b"OJMP");
        w.i32(ain.ojmp);
    }
    if s.fnct.present {
        w.bytes(b"FNCT");
        write_function_types(&mut w, ain, &ain.function_types);
    }
    if s.delg.present {
        w.bytes(b"DELG");
        write_function_types(&mut w, ain, &ain.delegates);
    }
    if s.objg.present {
        w.bytes(b"OBJG");
        w.i32(ain.global_group_names.len() as i32);
        for g in &ain.global_group_names {
            write_string(&mut w, g);
        }
    }
    if s.enums.present {
        w.bytes(b"ENUM");
        w.i32(ain.enums.len() as i32);
        for e in &ain.enums {
            write_string(&mut w, &e.name);
        }
    }

    let mut image = w.into_vec();
    let container = opts.container.unwrap_or(if ain.version < 6 {
        Container::Encrypted
    } else {
        Container::Compressed
    });
    match container {
        Container::Encrypted => {
            Ain::decrypt(&mut image);
            Ok(image)
        }
        Container::Compressed => {
            let compressed = zlib::deflate(&image, flate2::Compression::default())?;
            let mut out = Writer::new();
            out.bytes(b"AI2\0\0\0\0\0");
            out.i32(image.len() as i32);
            out.i32(compressed.len() as i32);
            out.bytes(&compressed);
            Ok(out.into_vec())
        }
    }
}
