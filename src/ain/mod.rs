//! The `ain` program image: the engine's compiled bytecode file.
//!
//! An `ain` file is an ordered sequence of tagged sections (code, function
//! table, globals, structs, string pools, libraries, ...). [`Ain`] holds
//! the decoded program, the per-section presence map, and the symbol
//! indexes used to resolve functions, structs and strings by name.

use std::collections::HashMap;
use std::path::Path;

use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::warn;

use crate::Result;
use crate::mt19937;

pub mod instructions;
mod read;
mod write;

pub use write::{Container, WriteOptions};

use instructions::InstructionTable;

/// Seed for the XOR stream applied to encrypted `ain` files.
pub const AIN_ENCRYPTION_SEED: u32 = 0x5d3e3;

/// Value types used in variable declarations, globals and save data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum DataType {
    Void = 0,
    Int = 10,
    Float = 11,
    String = 12,
    Struct = 13,
    ArrayInt = 14,
    ArrayFloat = 15,
    ArrayString = 16,
    ArrayStruct = 17,
    RefInt = 18,
    RefFloat = 19,
    RefString = 20,
    RefStruct = 21,
    RefArrayInt = 22,
    RefArrayFloat = 23,
    RefArrayString = 24,
    RefArrayStruct = 25,
    ImainSystem = 26,
    FuncType = 27,
    ArrayFuncType = 30,
    RefFuncType = 31,
    RefArrayFuncType = 32,
    Bool = 47,
    ArrayBool = 50,
    RefBool = 51,
    RefArrayBool = 52,
    LongInt = 55,
    ArrayLongInt = 58,
    RefLongInt = 59,
    RefArrayLongInt = 60,
    Delegate = 63,
    ArrayDelegate = 66,
    RefDelegate = 67,
    RefArrayDelegate = 69,
    /// Predicate function type used by the array HLL in later titles.
    HllFunc71 = 71,
    HllParam = 74,
    RefHllParam = 75,
    Array = 79,
    RefArray = 80,
    /// Wrapper type of unknown purpose.
    Wrap = 82,
    /// Option type; the wrapped type lives in the struct-type slot.
    Option = 86,
    UnknownType87 = 87,
    /// Two-value representation: struct page + vtable offset.
    Iface = 89,
    Enum2 = 91,
    Enum = 92,
    RefEnum = 93,
    HllFunc = 95,
    /// An interface wrapped in [`DataType::Wrap`].
    IfaceWrap = 100,
    /// Unrecognised type id, preserved verbatim.
    #[num_enum(catch_all)]
    Other(i32),
}

impl DataType {
    /// Container types whose `array_type` chain carries the element type.
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(
            self,
            DataType::Array
                | DataType::RefArray
                | DataType::Wrap
                | DataType::Option
                | DataType::UnknownType87
        )
    }

    #[must_use]
    pub fn is_ref(self) -> bool {
        matches!(
            self,
            DataType::RefInt
                | DataType::RefFloat
                | DataType::RefString
                | DataType::RefStruct
                | DataType::RefEnum
                | DataType::RefArrayInt
                | DataType::RefArrayFloat
                | DataType::RefArrayString
                | DataType::RefArrayStruct
                | DataType::RefFuncType
                | DataType::RefArrayFuncType
                | DataType::RefBool
                | DataType::RefArrayBool
                | DataType::RefLongInt
                | DataType::RefArrayLongInt
                | DataType::RefArray
                | DataType::Iface
        )
    }

    /// Old-style array types with a rank field.
    #[must_use]
    pub fn is_ranked_array(self) -> bool {
        matches!(
            self,
            DataType::ArrayInt
                | DataType::ArrayFloat
                | DataType::ArrayString
                | DataType::ArrayStruct
                | DataType::ArrayFuncType
                | DataType::ArrayBool
                | DataType::ArrayLongInt
                | DataType::ArrayDelegate
                | DataType::RefArrayInt
                | DataType::RefArrayFloat
                | DataType::RefArrayString
                | DataType::RefArrayStruct
                | DataType::RefArrayFuncType
                | DataType::RefArrayBool
                | DataType::RefArrayLongInt
                | DataType::RefArrayDelegate
        )
    }
}

/// A (possibly nested) variable type.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub data: DataType,
    /// Struct type index, or -1.
    pub struc: i32,
    /// Array rank; from v11 a flag marking the presence of `array_type`.
    pub rank: i32,
    pub array_type: Option<Box<Type>>,
}

impl Type {
    #[must_use]
    pub fn new(data: DataType, struc: i32, rank: i32) -> Type {
        Type {
            data,
            struc,
            rank,
            array_type: None,
        }
    }

    /// Render the type the way decompiled source spells it.
    #[must_use]
    pub fn display(&self, ain: Option<&Ain>) -> String {
        fn array(base: &str, rank: i32) -> String {
            if rank <= 1 {
                base.to_string()
            } else {
                format!("{base}@{rank}")
            }
        }
        fn struct_name(ain: Option<&Ain>, struc: i32, fallback: &str) -> String {
            match ain {
                Some(ain) if struc >= 0 && (struc as usize) < ain.structures.len() => {
                    ain.structures[struc as usize].name.clone()
                }
                _ => fallback.to_string(),
            }
        }

        match self.data {
            DataType::Void => "void".into(),
            DataType::Int => "int".into(),
            DataType::Float => "float".into(),
            DataType::String => "string".into(),
            DataType::Struct => struct_name(ain, self.struc, "hll_struct"),
            DataType::ArrayInt => array("array<int>", self.rank),
            DataType::ArrayFloat => array("array<float>", self.rank),
            DataType::ArrayString => array("array<string>", self.rank),
            DataType::ArrayStruct => array(
                &format!("array<{}>", struct_name(ain, self.struc, "struct")),
                self.rank,
            ),
            DataType::RefInt => "ref int".into(),
            DataType::RefFloat => "ref float".into(),
            DataType::RefString => "ref string".into(),
            DataType::RefStruct => format!("ref {}", struct_name(ain, self.struc, "hll_struct")),
            DataType::RefArrayInt => array("ref array<int>", self.rank),
            DataType::RefArrayFloat => array("ref array<float>", self.rank),
            DataType::RefArrayString => array("ref array<string>", self.rank),
            DataType::RefArrayStruct => array(
                &format!("ref array<{}>", struct_name(ain, self.struc, "struct")),
                self.rank,
            ),
            DataType::ImainSystem => "imain_system".into(),
            DataType::FuncType => "functype".into(),
            DataType::ArrayFuncType => array("array<functype>", self.rank),
            DataType::RefFuncType => "ref functype".into(),
            DataType::RefArrayFuncType => array("ref array<functype>", self.rank),
            DataType::Bool => "bool".into(),
            DataType::ArrayBool => array("array<bool>", self.rank),
            DataType::RefBool => "ref bool".into(),
            DataType::RefArrayBool => array("ref array<bool>", self.rank),
            DataType::LongInt => "lint".into(),
            DataType::ArrayLongInt => array("array<lint>", self.rank),
            DataType::RefLongInt => "ref lint".into(),
            DataType::RefArrayLongInt => array("ref array<lint>", self.rank),
            DataType::Delegate => "delegate".into(),
            DataType::ArrayDelegate => array("array<delegate>", self.rank),
            DataType::RefDelegate => "ref delegate".into(),
            DataType::RefArrayDelegate => array("ref array<delegate>", self.rank),
            DataType::HllParam => "hll_param".into(),
            DataType::RefHllParam => "ref hll_param".into(),
            DataType::Array | DataType::RefArray | DataType::Wrap | DataType::Option => {
                let container = match self.data {
                    DataType::Array => "array",
                    DataType::RefArray => "ref array",
                    DataType::Wrap => "wrap",
                    _ => "option",
                };
                let inner = match &self.array_type {
                    Some(t) => t.display(ain),
                    None => "?".into(),
                };
                // a space keeps nested containers from forming a '>>' token
                if inner.ends_with('>') {
                    format!("{container}<{inner} >")
                } else {
                    format!("{container}<{inner}>")
                }
            }
            DataType::UnknownType87 => "type_87".into(),
            DataType::Iface => struct_name(ain, self.struc, "interface"),
            DataType::Enum2 | DataType::Enum => {
                let id: i32 = self.data.into();
                match ain {
                    Some(ain) if self.struc >= 0 && (self.struc as usize) < ain.enums.len() => {
                        format!("{}#{}", ain.enums[self.struc as usize].name, id)
                    }
                    _ => format!("enum#{id}"),
                }
            }
            DataType::RefEnum => match ain {
                Some(ain) if self.struc >= 0 && (self.struc as usize) < ain.enums.len() => {
                    format!("ref {}", ain.enums[self.struc as usize].name)
                }
                _ => "ref enum".into(),
            },
            DataType::HllFunc71 => "hll_func_71".into(),
            DataType::HllFunc => "hll_func".into(),
            DataType::IfaceWrap => format!("iwrap<{}>", struct_name(ain, self.struc, "?")),
            DataType::Other(id) => {
                warn!("Unknown type: {id}");
                format!("unknown_type_{id}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Local,
    Member,
    Global,
}

/// An inline initial value on a variable or a `GSET` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum InitVal {
    Int(i32),
    Float(f32),
    String(String),
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    /// Secondary "display" name, v12+.
    pub name2: Option<String>,
    pub var_type: Type,
    pub initval: Option<InitVal>,
    pub group_index: i32,
    pub kind: VariableKind,
}

impl Variable {
    #[must_use]
    pub fn new(name: &str, kind: VariableKind) -> Variable {
        Variable {
            name: name.to_string(),
            name2: None,
            var_type: Type::new(DataType::Void, -1, 0),
            initval: None,
            group_index: 0,
            kind,
        }
    }

    /// Render as a declaration, e.g. `int foo = 3`.
    #[must_use]
    pub fn display(&self, ain: Option<&Ain>) -> String {
        let mut s = format!("{} {}", self.var_type.display(ain), self.name);
        match &self.initval {
            Some(InitVal::String(v)) => s.push_str(&format!(" = \"{v}\"")),
            Some(InitVal::Float(f)) => s.push_str(&format!(" = {f:.6}")),
            Some(InitVal::Int(i)) if !self.var_type.data.is_ref() => {
                s.push_str(&format!(" = {i}"));
            }
            _ => {}
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub address: u32,
    pub name: String,
    pub is_label: bool,
    pub return_type: Type,
    /// The first `nr_args` of `vars` are the arguments.
    pub nr_args: i32,
    /// Stored as an int; 1 marks a lambda but not all lambdas are marked.
    pub is_lambda: i32,
    pub crc: i32,
    /// Struct this function is a method of, or -1.
    pub struct_type: i32,
    /// Enum this function belongs to, or -1.
    pub enum_type: i32,
    pub vars: Vec<Variable>,
}

impl Function {
    #[must_use]
    pub fn new(name: &str) -> Function {
        Function {
            address: 0,
            name: name.to_string(),
            is_label: false,
            return_type: Type::new(DataType::Void, -1, 0),
            nr_args: 0,
            is_lambda: 0,
            crc: 0,
            struct_type: -1,
            enum_type: -1,
            vars: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Initval {
    pub global_index: i32,
    pub data_type: i32,
    pub value: InitVal,
}

#[derive(Debug, Clone, Copy)]
pub struct Interface {
    pub struct_type: i32,
    pub vtable_offset: i32,
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub name: String,
    pub interfaces: Vec<Interface>,
    pub constructor: i32,
    pub destructor: i32,
    pub members: Vec<Variable>,
    /// Virtual-method table slots, v14.1+.
    pub vmethods: Vec<i32>,
    /// Not stored in the file; set when another struct lists this one as
    /// an interface.
    pub is_interface: bool,
}

impl Struct {
    #[must_use]
    pub fn new(name: &str) -> Struct {
        Struct {
            name: name.to_string(),
            interfaces: Vec::new(),
            constructor: -1,
            destructor: -1,
            members: Vec::new(),
            vmethods: Vec::new(),
            is_interface: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HllArgument {
    pub name: String,
    pub arg_type: Type,
}

#[derive(Debug, Clone)]
pub struct HllFunction {
    pub name: String,
    pub return_type: Type,
    pub arguments: Vec<HllArgument>,
}

/// A high-level library: a named table of foreign-function signatures.
#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    pub functions: Vec<HllFunction>,
}

pub const SWITCH_INT: i32 = 2;
pub const SWITCH_STRING: i32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct SwitchCase {
    pub value: i32,
    pub address: i32,
}

#[derive(Debug, Clone)]
pub struct Switch {
    /// [`SWITCH_INT`] or [`SWITCH_STRING`].
    pub case_type: i32,
    pub default_address: i32,
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone)]
pub struct ScenarioLabel {
    pub name: String,
    pub address: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub name: String,
    pub return_type: Type,
    pub nr_arguments: i32,
    pub variables: Vec<Variable>,
}

impl FunctionType {
    #[must_use]
    pub fn new(name: &str) -> FunctionType {
        FunctionType {
            name: name.to_string(),
            return_type: Type::new(DataType::Void, -1, 0),
            nr_arguments: 0,
            variables: Vec::new(),
        }
    }
}

/// An enum and its symbolic values, recovered by disassembling the enum's
/// string-conversion function.
#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Section {
    pub addr: u32,
    pub size: u32,
    pub present: bool,
}

/// Per-section file map recording where each tag was found.
#[derive(Debug, Clone, Default)]
pub struct Sections {
    pub vers: Section,
    pub keyc: Section,
    pub code: Section,
    pub func: Section,
    pub glob: Section,
    pub gset: Section,
    pub strt: Section,
    pub msg0: Section,
    pub msg1: Section,
    pub main: Section,
    pub msgf: Section,
    pub hll0: Section,
    pub swi0: Section,
    pub gver: Section,
    pub slbl: Section,
    pub str0: Section,
    pub fnam: Section,
    pub ojmp: Section,
    pub fnct: Section,
    pub delg: Section,
    pub objg: Section,
    pub enums: Section,
}

/// A decoded program image.
#[derive(Debug)]
pub struct Ain {
    pub version: i32,
    /// Inferred sub-version for incompatibilities within a major version.
    pub minor_version: i32,
    pub keycode: i32,
    pub code: Vec<u8>,
    pub functions: Vec<Function>,
    pub globals: Vec<Variable>,
    pub global_initvals: Vec<Initval>,
    pub structures: Vec<Struct>,
    pub messages: Vec<String>,
    pub msg1_uk: i32,
    /// Index of the `main` function.
    pub main: i32,
    /// Index of the allocator function (named "0"), or -1.
    pub alloc: i32,
    /// Index of the message handler function.
    pub msgf: i32,
    pub libraries: Vec<Library>,
    pub switches: Vec<Switch>,
    pub game_version: i32,
    pub scenario_labels: Vec<ScenarioLabel>,
    pub strings: Vec<String>,
    pub filenames: Vec<String>,
    pub ojmp: i32,
    pub fnct_size: i32,
    pub function_types: Vec<FunctionType>,
    pub delg_size: i32,
    pub delegates: Vec<FunctionType>,
    pub global_group_names: Vec<String>,
    pub enums: Vec<EnumType>,
    pub sections: Sections,

    instructions: InstructionTable,
    func_index: HashMap<String, Vec<usize>>,
    struct_index: HashMap<String, usize>,
    string_index: Option<HashMap<String, usize>>,
}

impl Ain {
    /// Open and decode an `ain` file.
    pub fn open(path: impl AsRef<Path>) -> Result<Ain> {
        let buf = read::read_raw(path.as_ref())?;
        Self::from_decoded(buf)
    }

    /// Decode an `ain` image from raw file bytes (still encrypted or
    /// compressed).
    pub fn from_bytes(data: &[u8]) -> Result<Ain> {
        let buf = read::decode_container(data)?;
        Self::from_decoded(buf)
    }

    fn from_decoded(buf: Vec<u8>) -> Result<Ain> {
        read::parse(&buf)
    }

    /// `true` when this image's version is at least `major.minor`.
    #[must_use]
    pub fn version_gte(&self, major: i32, minor: i32) -> bool {
        self.version > major || (self.version == major && self.minor_version >= minor)
    }

    /// Construct an empty program image with the section layout the given
    /// version shipped with.
    #[must_use]
    pub fn new(major_version: i32, minor_version: i32) -> Ain {
        let mut ain = Ain {
            version: major_version,
            minor_version,
            keycode: 0,
            code: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            global_initvals: Vec::new(),
            structures: Vec::new(),
            messages: vec![String::new()],
            msg1_uk: 0,
            main: -1,
            alloc: -1,
            msgf: -1,
            libraries: Vec::new(),
            switches: Vec::new(),
            game_version: 100,
            scenario_labels: Vec::new(),
            strings: vec![String::new()],
            filenames: Vec::new(),
            ojmp: -1,
            fnct_size: 0,
            function_types: Vec::new(),
            delg_size: 0,
            delegates: Vec::new(),
            global_group_names: Vec::new(),
            enums: Vec::new(),
            sections: Sections::default(),
            instructions: InstructionTable::new(major_version),
            func_index: HashMap::new(),
            struct_index: HashMap::new(),
            string_index: None,
        };

        let s = &mut ain.sections;
        s.vers.present = true;
        s.keyc.present = major_version < 12;
        s.code.present = true;
        s.func.present = true;
        s.glob.present = true;
        s.gset.present = major_version < 12;
        s.strt.present = true;
        // the MSG1 layout replaced MSG0 mid-way through v6
        s.msg1.present = (major_version == 6 && minor_version > 0) || major_version > 6;
        s.msg0.present = !s.msg1.present;
        s.main.present = true;
        s.msgf.present = major_version < 12;
        s.hll0.present = true;
        s.swi0.present = true;
        s.gver.present = true;
        s.slbl.present = major_version == 1;
        s.str0.present = true;
        s.fnam.present = major_version < 12;
        s.ojmp.present = major_version < 7;
        s.fnct.present = major_version < 7;
        s.delg.present = major_version >= 7;
        s.objg.present = major_version >= 5;
        s.enums.present = major_version >= 12;

        let mut null_fn = Function::new("NULL");
        null_fn.return_type = Type::new(DataType::Void, -1, 0);
        ain.functions.push(null_fn);
        // a marker function records a non-zero minor version on disk
        if minor_version != 0 {
            ain.functions.push(Function::new(&format!(
                "_ALICETOOLS_AINV{major_version:02}_{minor_version:02}"
            )));
        }

        ain.index_functions();
        ain.index_structures();
        ain
    }

    /// The instruction table with this image's version patches applied.
    #[must_use]
    pub fn instructions(&self) -> &InstructionTable {
        &self.instructions
    }

    pub(crate) fn set_instructions(&mut self, table: InstructionTable) {
        self.instructions = table;
    }

    /// XOR-decrypt (or re-encrypt) a raw `ain` buffer in place.
    pub fn decrypt(buf: &mut [u8]) {
        mt19937::xor_stream(buf, AIN_ENCRYPTION_SEED);
    }

    // ------------------------------------------------------------------
    // symbol indexes

    pub fn index_functions(&mut self) {
        let mut index: HashMap<String, Vec<usize>> = HashMap::with_capacity(self.functions.len());
        for (i, f) in self.functions.iter().enumerate() {
            index.entry(f.name.clone()).or_default().push(i);
        }
        self.func_index = index;
    }

    pub fn index_structures(&mut self) {
        let mut index = HashMap::with_capacity(self.structures.len());
        for (i, s) in self.structures.iter().enumerate() {
            if index.insert(s.name.clone(), i).is_some() {
                warn!("Duplicate structure names: '{}'", s.name);
            }
        }
        self.struct_index = index;
    }

    fn init_string_index(&mut self) {
        if self.string_index.is_some() {
            return;
        }
        let mut index = HashMap::with_capacity(self.strings.len());
        for (i, s) in self.strings.iter().enumerate() {
            if index.insert(s.clone(), i).is_some() {
                warn!("Duplicate string in string table");
            }
        }
        self.string_index = Some(index);
    }

    /// Look up a function index by name. The `name#n` syntax selects the
    /// n'th function of that name when names collide.
    #[must_use]
    pub fn get_function(&self, name: &str) -> Option<usize> {
        let (name, n) = match name.split_once('#') {
            Some((base, index)) => match index.parse::<usize>() {
                Ok(n) => (base, n),
                Err(_) => {
                    warn!("Invalid function name: '{name}'");
                    (base, 0)
                }
            },
            None => (name, 0),
        };
        self.func_index.get(name)?.get(n).copied()
    }

    /// Position of function `no` within the list of functions sharing its
    /// name (the `n` of `name#n`).
    #[must_use]
    pub fn get_function_name_index(&self, no: usize) -> usize {
        let Some(name) = self.functions.get(no).map(|f| f.name.as_str()) else {
            return 0;
        };
        self.func_index
            .get(name)
            .and_then(|list| list.iter().position(|&i| i == no))
            .unwrap_or_else(|| {
                warn!("Invalid function: '{name}'");
                0
            })
    }

    #[must_use]
    pub fn get_struct(&self, name: &str) -> Option<usize> {
        self.struct_index.get(name).copied()
    }

    #[must_use]
    pub fn get_enum(&self, name: &str) -> Option<usize> {
        self.enums.iter().position(|e| e.name == name)
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g.name == name)
    }

    #[must_use]
    pub fn get_library(&self, name: &str) -> Option<usize> {
        self.libraries.iter().position(|l| l.name == name)
    }

    #[must_use]
    pub fn get_library_function(&self, libno: usize, name: &str) -> Option<usize> {
        self.libraries
            .get(libno)?
            .functions
            .iter()
            .position(|f| f.name == name)
    }

    #[must_use]
    pub fn get_functype(&self, name: &str) -> Option<usize> {
        self.function_types.iter().position(|t| t.name == name)
    }

    #[must_use]
    pub fn get_delegate(&self, name: &str) -> Option<usize> {
        self.delegates.iter().position(|t| t.name == name)
    }

    pub fn get_string_no(&mut self, s: &str) -> Option<usize> {
        self.init_string_index();
        self.string_index.as_ref().unwrap().get(s).copied()
    }

    // ------------------------------------------------------------------
    // builders

    /// Set `struct_type`/`enum_type` from the prefix before `@` in a
    /// function name.
    fn function_init_struct_type(&self, f: &mut Function) {
        f.struct_type = -1;
        f.enum_type = -1;
        let Some(at) = f.name.find('@') else { return };
        let prefix = &f.name[..at];
        if let Some(no) = self.get_struct(prefix) {
            f.struct_type = no as i32;
        } else if let Some(no) = self.get_enum(prefix) {
            f.enum_type = no as i32;
        }
    }

    pub fn add_function(&mut self, name: &str) -> usize {
        let no = self.functions.len();
        let mut f = Function::new(name);
        self.function_init_struct_type(&mut f);
        self.functions.push(f);
        self.func_index.entry(name.to_string()).or_default().push(no);
        no
    }

    pub fn dup_function(&mut self, src_no: usize) -> usize {
        let no = self.functions.len();
        let f = self.functions[src_no].clone();
        self.func_index
            .entry(f.name.clone())
            .or_default()
            .push(no);
        self.functions.push(f);
        no
    }

    pub fn add_global(&mut self, name: &str) -> usize {
        let no = self.globals.len();
        let mut g = Variable::new(name, VariableKind::Global);
        if self.version_gte(12, 0) {
            g.name2 = Some(String::new());
        }
        self.globals.push(g);
        no
    }

    pub fn add_initval(&mut self, global_index: i32) -> usize {
        let no = self.global_initvals.len();
        self.global_initvals.push(Initval {
            global_index,
            data_type: DataType::Void.into(),
            value: InitVal::Int(0),
        });
        no
    }

    pub fn add_struct(&mut self, name: &str) -> usize {
        let no = self.structures.len();
        self.structures.push(Struct::new(name));
        if self.struct_index.insert(name.to_string(), no).is_some() {
            warn!("Duplicate structure names: '{name}'");
        }
        no
    }

    pub fn add_library(&mut self, name: &str) -> usize {
        let no = self.libraries.len();
        self.libraries.push(Library {
            name: name.to_string(),
            functions: Vec::new(),
        });
        no
    }

    pub fn add_functype(&mut self, name: &str) -> usize {
        let no = self.function_types.len();
        self.function_types.push(FunctionType::new(name));
        self.sections.fnct.present = true;
        no
    }

    pub fn add_delegate(&mut self, name: &str) -> usize {
        let no = self.delegates.len();
        self.delegates.push(FunctionType::new(name));
        self.sections.delg.present = true;
        no
    }

    /// Intern a string into the string pool, returning its index.
    pub fn add_string(&mut self, s: &str) -> usize {
        self.init_string_index();
        let index = self.string_index.as_mut().unwrap();
        if let Some(&no) = index.get(s) {
            return no;
        }
        let no = self.strings.len();
        index.insert(s.to_string(), no);
        self.strings.push(s.to_string());
        no
    }

    pub fn add_message(&mut self, s: &str) -> usize {
        self.messages.push(s.to_string());
        self.messages.len() - 1
    }

    pub fn add_switch(&mut self) -> usize {
        let no = self.switches.len();
        self.switches.push(Switch {
            case_type: SWITCH_INT,
            default_address: -1,
            cases: Vec::new(),
        });
        no
    }

    pub fn add_file(&mut self, filename: &str) -> usize {
        self.filenames.push(filename.to_string());
        self.filenames.len() - 1
    }

    /// Copy each `GSET` entry into the matching global's inline initial
    /// value.
    pub fn distribute_initvals(&mut self) {
        for iv in &self.global_initvals {
            let Some(g) = self.globals.get_mut(iv.global_index as usize) else {
                warn!("initval references invalid global {}", iv.global_index);
                continue;
            };
            g.initval = Some(iv.value.clone());
        }
    }

    /// Serialize back to the on-disk format.
    pub fn write(&self, opts: &WriteOptions) -> Result<Vec<u8>> {
        write::write(self, opts)
    }
}
