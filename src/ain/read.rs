//! `ain` file reader.
//!
//! Outer framing is either `AI2\0\0\0\0` (zlib wrapped with explicit
//! sizes) or an encryption stream (detected by decrypting the first eight
//! bytes and looking for a `VERS` tag). The inner format is an ordered
//! sequence of 4-byte tags, each followed by a section-specific payload;
//! an unknown tag stops parsing with a warning.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use super::instructions::{InstructionTable, Opcode};
use super::{
    Ain, DataType, EnumType, Function, HllArgument, HllFunction, InitVal, Initval, Interface,
    Library, ScenarioLabel, Section, Sections, Struct, Switch, SwitchCase, Type, Variable,
    VariableKind,
};
use crate::buffer::Reader;
use crate::{Error, Result, encoding, zlib};

pub(super) fn read_raw(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path)?;
    decode_container(&data)
}

/// Strip the outer container: decompress an `AI2` image or decrypt an
/// encrypted one.
pub(super) fn decode_container(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 16 && data[0..8] == *b"AI2\0\0\0\0\0" {
        let out_len = i32::from_le_bytes(data[8..12].try_into().unwrap());
        let in_len = i32::from_le_bytes(data[12..16].try_into().unwrap());
        if out_len < 0 || in_len < 0 || 16 + in_len as usize > data.len() {
            return Err(Error::invalid("bad AI2 stream sizes"));
        }
        return zlib::inflate_exact(&data[16..16 + in_len as usize], out_len as usize);
    }

    if data.len() >= 8 {
        let mut magic: [u8; 8] = data[0..8].try_into().unwrap();
        Ain::decrypt(&mut magic);
        if &magic[0..4] == b"VERS" && magic[5] == 0 && magic[6] == 0 && magic[7] == 0 {
            let mut buf = data.to_vec();
            Ain::decrypt(&mut buf);
            return Ok(buf);
        }
    }

    Err(Error::UnsupportedFormat(
        "unrecognized ain container".to_string(),
    ))
}

/// Which section a tag selects in the file map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Vers,
    Keyc,
    Code,
    Func,
    Glob,
    Gset,
    Strt,
    Msg0,
    Msg1,
    Main,
    Msgf,
    Hll0,
    Swi0,
    Gver,
    Slbl,
    Str0,
    Fnam,
    Ojmp,
    Fnct,
    Delg,
    Objg,
    Enum,
}

fn section_mut<'a>(sections: &'a mut Sections, tag: Tag) -> &'a mut Section {
    match tag {
        Tag::Vers => &mut sections.vers,
        Tag::Keyc => &mut sections.keyc,
        Tag::Code => &mut sections.code,
        Tag::Func => &mut sections.func,
        Tag::Glob => &mut sections.glob,
        Tag::Gset => &mut sections.gset,
        Tag::Strt => &mut sections.strt,
        Tag::Msg0 => &mut sections.msg0,
        Tag::Msg1 => &mut sections.msg1,
        Tag::Main => &mut sections.main,
        Tag::Msgf => &mut sections.msgf,
        Tag::Hll0 => &mut sections.hll0,
        Tag::Swi0 => &mut sections.swi0,
        Tag::Gver => &mut sections.gver,
        Tag::Slbl => &mut sections.slbl,
        Tag::Str0 => &mut sections.str0,
        Tag::Fnam => &mut sections.fnam,
        Tag::Ojmp => &mut sections.ojmp,
        Tag::Fnct => &mut sections.fnct,
        Tag::Delg => &mut sections.delg,
        Tag::Objg => &mut sections.objg,
        Tag::Enum => &mut sections.enums,
    }
}

struct AinReader<'a> {
    r: Reader<'a>,
    ain: Ain,
    current: Option<Tag>,
}

impl<'a> AinReader<'a> {
    fn read_string(&mut self) -> Result<String> {
        Ok(encoding::sjis_to_utf8(self.r.cstring()?))
    }

    fn read_strings(&mut self, count: usize) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_string()?);
        }
        Ok(out)
    }

    /// MSG1 strings are length-prefixed and byte-obfuscated.
    fn read_msg1_string(&mut self) -> Result<String> {
        let raw = self.r.pascal_string()?;
        let bytes: Vec<u8> = raw
            .iter()
            .enumerate()
            .map(|(i, &b)| b.wrapping_sub(i as u8).wrapping_sub(0x60))
            .collect();
        Ok(encoding::sjis_to_utf8(&bytes))
    }

    fn read_variable_type(&mut self) -> Result<Type> {
        let mut t = Type {
            data: DataType::from(self.r.i32()?),
            struc: self.r.i32()?,
            rank: self.r.i32()?,
            array_type: None,
        };
        // from v11, 'rank' is a flag marking a nested sub-type; arrays
        // nest instead of carrying ranks, and the innermost struct type
        // is propagated to every parent
        if self.ain.version_gte(11, 0) {
            if !(0..=1).contains(&t.rank) {
                let data: i32 = t.data.into();
                warn!(
                    "non-boolean rank in ain v11+ ({}, {}, {})",
                    data, t.struc, t.rank
                );
            }
            if t.rank != 0 {
                t.array_type = Some(Box::new(self.read_variable_type()?));
            }
        }
        Ok(t)
    }

    fn read_return_type(&mut self) -> Result<Type> {
        if self.ain.version_gte(11, 0) {
            return self.read_variable_type();
        }
        Ok(Type {
            data: DataType::from(self.r.i32()?),
            struc: self.r.i32()?,
            rank: 0,
            array_type: None,
        })
    }

    fn read_variable_initval(&mut self, var_type: &Type) -> Result<Option<InitVal>> {
        let has_initval = self.r.i32()?;
        if has_initval == 0 {
            return Ok(None);
        }
        if has_initval != 1 {
            warn!(
                "variable->has_initval is not boolean: {has_initval} (at 0x{:x})",
                self.r.index() - 4
            );
        }
        Ok(Some(match var_type.data {
            DataType::String => InitVal::String(self.read_string()?),
            // no inline payload for these
            DataType::Struct | DataType::Delegate | DataType::Array => InitVal::Int(0),
            d if d.is_ref() => InitVal::Int(0),
            DataType::Float => InitVal::Float(f32::from_bits(self.r.u32()?)),
            _ => InitVal::Int(self.r.i32()?),
        }))
    }

    fn read_variables(&mut self, count: usize, kind: VariableKind) -> Result<Vec<Variable>> {
        let mut vars = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let name2 = if self.ain.version_gte(12, 0) {
                Some(self.read_string()?)
            } else {
                None
            };
            let var_type = self.read_variable_type()?;
            let initval = if self.ain.version_gte(8, 0) {
                self.read_variable_initval(&var_type)?
            } else {
                None
            };
            vars.push(Variable {
                name,
                name2,
                var_type,
                initval,
                group_index: 0,
                kind,
            });
        }
        Ok(vars)
    }

    fn read_functions(&mut self, count: usize) -> Result<Vec<Function>> {
        let mut funs = Vec::with_capacity(count);
        for i in 0..count {
            let address = self.r.u32()?;

            // workaround for a broken Chinese port: junk 0xFF bytes before
            // the name (0xFF is never a valid name byte)
            if self.r.data().first() == Some(&0xff) {
                warn!("Junk at start of function name");
                while self.r.data().first() == Some(&0xff) {
                    self.r.skip(1);
                }
            }
            let name = self.read_string()?;
            if name == "0" {
                self.ain.alloc = i as i32;
            }

            // title quirks: these names identify v14.0 games
            if self.ain.version == 14
                && self.ain.minor_version == 1
                && matches!(
                    name.as_str(),
                    "C_MedicaMenu@0" | "CInvasionHexScene@0" | "_ALICETOOLS_AINV14_00"
                )
            {
                self.ain.minor_version = 0;
            }

            let is_label = if self.ain.version > 1 && self.ain.version < 7 {
                self.r.i32()? != 0
            } else {
                false
            };
            let return_type = self.read_return_type()?;
            let nr_args = self.r.i32()?;
            let nr_vars = self.r.i32()?;

            let is_lambda = if self.ain.version_gte(11, 0) {
                let v = self.r.i32()?;
                if v != 0 && v != 1 {
                    warn!(
                        "function->is_lambda is not a boolean: {v} (at 0x{:x})",
                        self.r.index() - 4
                    );
                }
                v
            } else {
                0
            };
            let crc = if self.ain.version > 1 { self.r.i32()? } else { 0 };
            let vars = if nr_vars > 0 {
                self.read_variables(nr_vars as usize, VariableKind::Local)?
            } else {
                Vec::new()
            };

            funs.push(Function {
                address,
                name,
                is_label,
                return_type,
                nr_args,
                is_lambda,
                crc,
                struct_type: -1,
                enum_type: -1,
                vars,
            });
        }
        Ok(funs)
    }

    fn read_globals(&mut self, count: usize) -> Result<Vec<Variable>> {
        let mut globals = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let name2 = if self.ain.version_gte(12, 0) {
                Some(self.read_string()?)
            } else {
                None
            };
            let var_type = self.read_variable_type()?;
            let group_index = if self.ain.version_gte(5, 0) {
                self.r.i32()?
            } else {
                0
            };
            globals.push(Variable {
                name,
                name2,
                var_type,
                initval: None,
                group_index,
                kind: VariableKind::Global,
            });
        }
        Ok(globals)
    }

    fn read_initvals(&mut self, count: usize) -> Result<Vec<Initval>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let global_index = self.r.i32()?;
            let data_type = self.r.i32()?;
            let value = if DataType::from(data_type) == DataType::String {
                InitVal::String(self.read_string()?)
            } else if DataType::from(data_type) == DataType::Float {
                InitVal::Float(f32::from_bits(self.r.u32()?))
            } else {
                InitVal::Int(self.r.i32()?)
            };
            values.push(Initval {
                global_index,
                data_type,
                value,
            });
        }
        Ok(values)
    }

    fn read_structures(&mut self, count: usize) -> Result<Vec<Struct>> {
        let mut structures = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let mut interfaces = Vec::new();
            if self.ain.version_gte(11, 0) {
                let nr_interfaces = self.r.i32()?;
                for _ in 0..nr_interfaces {
                    interfaces.push(Interface {
                        struct_type: self.r.i32()?,
                        vtable_offset: self.r.i32()?,
                    });
                }
            }
            let constructor = self.r.i32()?;
            let destructor = self.r.i32()?;
            let nr_members = self.r.i32()?;
            let members = self.read_variables(nr_members as usize, VariableKind::Member)?;

            // from Hentai Labyrinth, a listing of the vtable follows
            let mut vmethods = Vec::new();
            if self.ain.version_gte(14, 1) {
                let nr_vmethods = self.r.i32()?;
                for _ in 0..nr_vmethods {
                    vmethods.push(self.r.i32()?);
                }
            }

            structures.push(Struct {
                name,
                interfaces,
                constructor,
                destructor,
                members,
                vmethods,
                is_interface: false,
            });
        }

        if self.ain.version_gte(11, 0) {
            let mut iface_types = Vec::new();
            for s in &structures {
                for iface in &s.interfaces {
                    if iface.struct_type < 0 || iface.struct_type as usize >= structures.len() {
                        return Err(Error::invalid("interface references invalid struct"));
                    }
                    iface_types.push(iface.struct_type as usize);
                }
            }
            for no in iface_types {
                structures[no].is_interface = true;
            }
        }
        Ok(structures)
    }

    fn read_hll_arguments(&mut self, count: usize) -> Result<Vec<HllArgument>> {
        let mut arguments = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let arg_type = if self.ain.version_gte(14, 0) {
                self.read_variable_type()?
            } else {
                Type::new(DataType::from(self.r.i32()?), -1, 0)
            };
            arguments.push(HllArgument { name, arg_type });
        }
        Ok(arguments)
    }

    fn read_hll_functions(&mut self, count: usize) -> Result<Vec<HllFunction>> {
        let mut functions = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let return_type = if self.ain.version_gte(14, 0) {
                self.read_variable_type()?
            } else {
                Type::new(DataType::from(self.r.i32()?), -1, 0)
            };
            let nr_arguments = self.r.i32()?;
            if !(0..=100).contains(&nr_arguments) {
                return Err(Error::invalid(format!(
                    "too many HLL arguments (at 0x{:x})",
                    self.r.index()
                )));
            }
            let arguments = self.read_hll_arguments(nr_arguments as usize)?;
            functions.push(HllFunction {
                name,
                return_type,
                arguments,
            });
        }
        Ok(functions)
    }

    fn read_libraries(&mut self, count: usize) -> Result<Vec<Library>> {
        let mut libraries = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let nr_functions = self.r.i32()?;
            let functions = self.read_hll_functions(nr_functions as usize)?;
            libraries.push(Library { name, functions });
        }
        Ok(libraries)
    }

    fn read_switches(&mut self, count: usize) -> Result<Vec<Switch>> {
        let mut switches = Vec::with_capacity(count);
        for _ in 0..count {
            let case_type = self.r.i32()?;
            let default_address = self.r.i32()?;
            let nr_cases = self.r.i32()?;
            let mut cases = Vec::with_capacity(nr_cases.max(0) as usize);
            for _ in 0..nr_cases {
                cases.push(SwitchCase {
                    value: self.r.i32()?,
                    address: self.r.i32()?,
                });
            }
            switches.push(Switch {
                case_type,
                default_address,
                cases,
            });
        }
        Ok(switches)
    }

    fn read_scenario_labels(&mut self, count: usize) -> Result<Vec<ScenarioLabel>> {
        let mut labels = Vec::with_capacity(count);
        for _ in 0..count {
            labels.push(ScenarioLabel {
                name: self.read_string()?,
                address: self.r.u32()?,
            });
        }
        Ok(labels)
    }

    fn read_function_types(&mut self, count: usize) -> Result<Vec<super::FunctionType>> {
        let mut types = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.read_string()?;
            let return_type = self.read_return_type()?;
            let nr_arguments = self.r.i32()?;
            let nr_variables = self.r.i32()?;
            let variables = self.read_variables(nr_variables as usize, VariableKind::Local)?;
            types.push(super::FunctionType {
                name,
                return_type,
                nr_arguments,
                variables,
            });
        }
        Ok(types)
    }

    /// Enum symbols are not stored; they are recovered by disassembling
    /// the enum's string-conversion function and collecting `S_PUSH`
    /// operands until `ENDFUNC`.
    fn read_enums(&mut self, count: usize, table: &InstructionTable) -> Result<Vec<EnumType>> {
        let names = self.read_strings(count)?;
        let mut enums = Vec::with_capacity(count);
        for name in names {
            let conv_name = if self.ain.version < 14 {
                format!("{name}@String")
            } else {
                format!("{name}::ToString")
            };
            let funs = self.ain.func_index.get(&conv_name);
            let Some([no]) = funs.map(Vec::as_slice) else {
                warn!("Failed to parse enum: {name}");
                enums.push(EnumType {
                    name,
                    symbols: Vec::new(),
                });
                continue;
            };

            let mut symbols = Vec::new();
            let code = &self.ain.code;
            let mut addr = self.ain.functions[*no].address as usize;
            while addr + 2 <= code.len() {
                let opcode = u16::from_le_bytes([code[addr], code[addr + 1]]);
                let Some(instr) = table.get(opcode) else {
                    warn!("Unknown/invalid opcode: {opcode}");
                    break;
                };
                if addr + instr.nr_args * 4 >= code.len() {
                    warn!("CODE section truncated?");
                    break;
                }
                if instr.opcode == Opcode::EndFunc {
                    break;
                }
                if instr.opcode == Opcode::SPush {
                    let Some(operand) = code.get(addr + 2..addr + 6) else {
                        warn!("CODE section truncated?");
                        break;
                    };
                    let strno = i32::from_le_bytes(operand.try_into().unwrap());
                    if strno < 0 || strno as usize >= self.ain.strings.len() {
                        warn!("Encountered invalid string number when parsing enums");
                    } else if !self.ain.strings[strno as usize].is_empty() {
                        symbols.push(self.ain.strings[strno as usize].clone());
                    }
                }
                addr += instr.width();
            }
            enums.push(EnumType { name, symbols });
        }
        Ok(enums)
    }

    /// Record the start of a new section, closing out the previous one.
    fn start_section(&mut self, tag: Option<Tag>) {
        if let Some(prev) = self.current {
            let index = self.r.index() as u32;
            let section = section_mut(&mut self.ain.sections, prev);
            section.size = index - section.addr;
        }
        self.current = tag;
        if let Some(tag) = tag {
            let index = self.r.index() as u32;
            let section = section_mut(&mut self.ain.sections, tag);
            section.addr = index;
            section.present = true;
            self.r.skip(4);
        }
    }

    fn read_tag(&mut self, table: &mut InstructionTable) -> Result<bool> {
        if self.r.remaining() <= 4 {
            self.start_section(None);
            return Ok(false);
        }

        let tag = self.r.data()[0..4].to_vec();
        match &tag[..] {
            b"VERS" => {
                self.start_section(Some(Tag::Vers));
                self.ain.version = self.r.i32()?;
                *table = InstructionTable::new(self.ain.version);
                // 14.0 games are identified by function-name quirks later
                if self.ain.version == 14 {
                    self.ain.minor_version = 1;
                }
            }
            b"KEYC" => {
                self.start_section(Some(Tag::Keyc));
                self.ain.keycode = self.r.i32()?;
            }
            b"CODE" => {
                self.start_section(Some(Tag::Code));
                let size = self.r.i32()?;
                if size < 0 {
                    return Err(Error::invalid("negative CODE size"));
                }
                self.ain.code = self.r.bytes(size as usize)?.to_vec();
            }
            b"FUNC" => {
                self.start_section(Some(Tag::Func));
                let count = self.r.i32()?;
                self.ain.functions = self.read_functions(count as usize)?;
                self.ain.index_functions();
            }
            b"GLOB" => {
                self.start_section(Some(Tag::Glob));
                let count = self.r.i32()?;
                self.ain.globals = self.read_globals(count as usize)?;
            }
            b"GSET" => {
                self.start_section(Some(Tag::Gset));
                let count = self.r.i32()?;
                self.ain.global_initvals = self.read_initvals(count as usize)?;
            }
            b"STRT" => {
                self.start_section(Some(Tag::Strt));
                let count = self.r.i32()?;
                self.ain.structures = self.read_structures(count as usize)?;
                self.ain.index_structures();
            }
            b"MSG0" => {
                self.start_section(Some(Tag::Msg0));
                let count = self.r.i32()?;
                let mut messages = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    messages.push(self.read_string()?);
                }
                self.ain.messages = messages;
            }
            b"MSG1" => {
                self.start_section(Some(Tag::Msg1));
                let count = self.r.i32()?;
                self.ain.msg1_uk = self.r.i32()?;
                if self.ain.msg1_uk != 0 {
                    warn!("unexpected MSG1 header value: {}", self.ain.msg1_uk);
                }
                let mut messages = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    messages.push(self.read_msg1_string()?);
                }
                self.ain.messages = messages;
            }
            b"MAIN" => {
                self.start_section(Some(Tag::Main));
                self.ain.main = self.r.i32()?;
            }
            b"MSGF" => {
                self.start_section(Some(Tag::Msgf));
                self.ain.msgf = self.r.i32()?;
            }
            b"HLL0" => {
                self.start_section(Some(Tag::Hll0));
                let count = self.r.i32()?;
                self.ain.libraries = self.read_libraries(count as usize)?;
            }
            b"SWI0" => {
                self.start_section(Some(Tag::Swi0));
                let count = self.r.i32()?;
                self.ain.switches = self.read_switches(count as usize)?;
            }
            b"GVER" => {
                self.start_section(Some(Tag::Gver));
                self.ain.game_version = self.r.i32()?;
            }
            b"SLBL" => {
                self.start_section(Some(Tag::Slbl));
                let count = self.r.i32()?;
                self.ain.scenario_labels = self.read_scenario_labels(count as usize)?;
            }
            b"STR0" => {
                self.start_section(Some(Tag::Str0));
                let count = self.r.i32()?;
                self.ain.strings = self.read_strings(count.max(0) as usize)?;
            }
            b"FNAM" => {
                self.start_section(Some(Tag::Fnam));
                let count = self.r.i32()?;
                self.ain.filenames = self.read_strings(count.max(0) as usize)?;
            }
            b"OJMP" => {
                self.start_section(Some(Tag::Ojmp));
                self.ain.ojmp = self.r.i32()?;
            }
            b"FNCT" => {
                self.start_section(Some(Tag::Fnct));
                self.ain.fnct_size = self.r.i32()?;
                let count = self.r.i32()?;
                self.ain.function_types = self.read_function_types(count as usize)?;
            }
            b"DELG" => {
                self.start_section(Some(Tag::Delg));
                self.ain.delg_size = self.r.i32()?;
                let count = self.r.i32()?;
                self.ain.delegates = self.read_function_types(count as usize)?;
            }
            b"OBJG" => {
                self.start_section(Some(Tag::Objg));
                let count = self.r.i32()?;
                self.ain.global_group_names = self.read_strings(count.max(0) as usize)?;
            }
            b"ENUM" => {
                self.start_section(Some(Tag::Enum));
                let count = self.r.i32()?;
                self.ain.enums = self.read_enums(count.max(0) as usize, table)?;
            }
            _ => {
                self.start_section(None);
                warn!("Junk at end of AIN file?");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub(super) fn parse(buf: &[u8]) -> Result<Ain> {
    let ain = Ain {
        version: -1,
        minor_version: 0,
        keycode: 0,
        code: Vec::new(),
        functions: Vec::new(),
        globals: Vec::new(),
        global_initvals: Vec::new(),
        structures: Vec::new(),
        messages: Vec::new(),
        msg1_uk: 0,
        main: -1,
        alloc: -1,
        msgf: -1,
        libraries: Vec::new(),
        switches: Vec::new(),
        game_version: 0,
        scenario_labels: Vec::new(),
        strings: Vec::new(),
        filenames: Vec::new(),
        ojmp: -1,
        fnct_size: 0,
        function_types: Vec::new(),
        delg_size: 0,
        delegates: Vec::new(),
        global_group_names: Vec::new(),
        enums: Vec::new(),
        sections: Sections::default(),
        instructions: InstructionTable::default(),
        func_index: HashMap::new(),
        struct_index: HashMap::new(),
        string_index: None,
    };

    let mut reader = AinReader {
        r: Reader::new(buf),
        ain,
        current: None,
    };
    let mut table = InstructionTable::default();
    while reader.read_tag(&mut table)? {}

    let mut ain = reader.ain;
    if ain.version == -1 {
        return Err(Error::invalid("ain file with no VERS section"));
    }
    // Rance IX era v6 files use MSG1; the version number did not change
    if ain.sections.msg1.present && ain.version == 6 {
        ain.minor_version = ain.minor_version.max(1);
    }
    ain.set_instructions(table);

    // resolve @-prefixed method names now that structs and enums exist
    let mut funs = std::mem::take(&mut ain.functions);
    for f in &mut funs {
        ain.function_init_struct_type(f);
    }
    ain.functions = funs;

    ain.distribute_initvals();
    Ok(ain)
}
