use system4::Writer;
use system4::ain::instructions::Opcode;
use system4::ain::{Ain, Container, DataType, InitVal, Type, Variable, VariableKind, WriteOptions};

/// A small v12 program: four functions, two structs, a few globals and
/// strings, one enum with a string-conversion function in the code
/// section.
fn build_program() -> Ain {
    let mut ain = Ain::new(12, 0);

    ain.add_struct("Point");
    ain.add_struct("Rect");
    ain.structures[0].members.push(Variable {
        name: "x".to_string(),
        name2: Some(String::new()),
        var_type: Type::new(DataType::Int, -1, 0),
        initval: None,
        group_index: 0,
        kind: VariableKind::Member,
    });

    let s_red = ain.add_string("Red");
    let s_blue = ain.add_string("Blue");

    // code: the enum conversion function pushes each symbol
    let conv = ain.add_function("Color@String");
    let mut code = Writer::new();
    ain.functions[conv].address = code.index() as u32;
    code.u16(Opcode::Func as u16);
    code.i32(conv as i32);
    code.u16(Opcode::SPush as u16);
    code.i32(s_red as i32);
    code.u16(Opcode::SPush as u16);
    code.i32(s_blue as i32);
    code.u16(Opcode::Return as u16);
    code.u16(Opcode::EndFunc as u16);
    code.i32(conv as i32);

    let main_fn = ain.add_function("main");
    ain.functions[main_fn].address = code.index() as u32;
    code.u16(Opcode::Func as u16);
    code.i32(main_fn as i32);
    code.u16(Opcode::Push as u16);
    code.i32(7);
    code.u16(Opcode::Pop as u16);
    code.u16(Opcode::EndFunc as u16);
    code.i32(main_fn as i32);

    let method = ain.add_function("Point@Move");
    ain.functions[method].address = code.index() as u32;
    ain.main = main_fn as i32;
    ain.code = code.into_vec();

    let g = ain.add_global("counter");
    ain.globals[g].var_type = Type::new(DataType::Int, -1, 0);
    let g = ain.add_global("title");
    ain.globals[g].var_type = Type::new(DataType::String, -1, 0);

    ain.enums.push(system4::ain::EnumType {
        name: "Color".to_string(),
        symbols: Vec::new(),
    });

    ain
}

#[test]
fn encrypted_round_trip_preserves_everything() {
    let ain = build_program();
    let opts = WriteOptions {
        container: Some(Container::Encrypted),
    };
    let bytes = ain.write(&opts).unwrap();
    let back = Ain::from_bytes(&bytes).unwrap();

    assert_eq!(back.version, 12);
    assert_eq!(back.minor_version, 0);
    assert_eq!(back.main, ain.main);
    assert_eq!(back.game_version, ain.game_version);
    assert_eq!(back.code, ain.code);
    assert_eq!(back.strings, ain.strings);
    assert_eq!(back.messages, ain.messages);

    assert_eq!(back.functions.len(), ain.functions.len());
    for (a, b) in ain.functions.iter().zip(&back.functions) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.address, b.address);
    }
    assert_eq!(back.structures.len(), 2);
    assert_eq!(back.structures[0].name, "Point");
    assert_eq!(back.structures[0].members.len(), 1);
    assert_eq!(back.globals.len(), ain.globals.len());
    assert_eq!(back.globals[0].name, "counter");

    // every section the program carries is flagged present
    let s = &back.sections;
    for (name, section) in [
        ("VERS", s.vers),
        ("CODE", s.code),
        ("FUNC", s.func),
        ("GLOB", s.glob),
        ("STRT", s.strt),
        ("STR0", s.str0),
        ("MAIN", s.main),
        ("HLL0", s.hll0),
        ("SWI0", s.swi0),
        ("GVER", s.gver),
        ("OBJG", s.objg),
        ("ENUM", s.enums),
    ] {
        assert!(section.present, "{name} should be present");
    }
    assert!(!s.keyc.present);
    assert!(!s.gset.present);

    // a second trip is byte-identical
    let again = back.write(&opts).unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn compressed_container_round_trips() {
    let ain = build_program();
    let bytes = ain
        .write(&WriteOptions {
            container: Some(Container::Compressed),
        })
        .unwrap();
    assert_eq!(&bytes[0..3], b"AI2");
    let back = Ain::from_bytes(&bytes).unwrap();
    assert_eq!(back.version, 12);
    assert_eq!(back.code, ain.code);
}

#[test]
fn enum_symbols_are_recovered_from_code() {
    let ain = build_program();
    let bytes = ain
        .write(&WriteOptions {
            container: Some(Container::Encrypted),
        })
        .unwrap();
    let back = Ain::from_bytes(&bytes).unwrap();

    assert_eq!(back.enums.len(), 1);
    assert_eq!(back.enums[0].name, "Color");
    assert_eq!(back.enums[0].symbols, ["Red", "Blue"]);
}

#[test]
fn at_names_resolve_to_struct_or_enum() {
    let ain = build_program();
    let bytes = ain
        .write(&WriteOptions {
            container: Some(Container::Encrypted),
        })
        .unwrap();
    let back = Ain::from_bytes(&bytes).unwrap();

    // a method name resolves to its struct, an enum helper to its enum,
    // never both
    for f in &back.functions {
        if !f.name.contains('@') {
            assert_eq!((f.struct_type, f.enum_type), (-1, -1), "{}", f.name);
        }
    }
    let method = &back.functions[back.get_function("Point@Move").unwrap()];
    assert_eq!(method.struct_type, 0);
    assert_eq!(method.enum_type, -1);
    let conv = &back.functions[back.get_function("Color@String").unwrap()];
    assert_eq!(conv.struct_type, -1);
    assert_eq!(conv.enum_type, 0);
}

#[test]
fn function_index_reflects_declaration_order() {
    let mut ain = build_program();
    let first = ain.get_function("main").unwrap();
    let dup = ain.dup_function(first);
    assert_eq!(ain.get_function("main"), Some(first));
    assert_eq!(ain.get_function("main#1"), Some(dup));
    assert_eq!(ain.get_function("main#2"), None);
    assert_eq!(ain.get_function_name_index(dup), 1);

    // the invariant: looking up any function's name finds it
    for (i, f) in ain.functions.iter().enumerate() {
        let slot = ain.get_function_name_index(i);
        let name = if slot == 0 {
            f.name.clone()
        } else {
            format!("{}#{slot}", f.name)
        };
        assert_eq!(ain.get_function(&name), Some(i));
    }
}

#[test]
fn msg1_in_v6_bumps_minor_version() {
    let mut ain = Ain::new(6, 1);
    assert!(ain.sections.msg1.present);
    ain.messages = vec!["こんにちは".to_string(), String::new()];
    let bytes = ain
        .write(&WriteOptions {
            container: Some(Container::Compressed),
        })
        .unwrap();
    let back = Ain::from_bytes(&bytes).unwrap();
    assert_eq!(back.version, 6);
    assert!(back.minor_version >= 1);
    assert_eq!(back.messages, ain.messages);
}

#[test]
fn string_interning() {
    let mut ain = Ain::new(12, 0);
    let a = ain.add_string("hello");
    let b = ain.add_string("hello");
    let c = ain.add_string("world");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(ain.get_string_no("world"), Some(c));
    assert_eq!(ain.get_string_no("nope"), None);
}

#[test]
fn initvals_distribute_to_globals() {
    let mut ain = Ain::new(4, 0);
    assert!(ain.sections.gset.present);
    let g = ain.add_global("flag") as i32;
    let iv = ain.add_initval(g);
    ain.global_initvals[iv].data_type = DataType::Int.into();
    ain.global_initvals[iv].value = InitVal::Int(42);
    ain.globals[g as usize].var_type = Type::new(DataType::Int, -1, 0);

    let bytes = ain
        .write(&WriteOptions {
            container: Some(Container::Encrypted),
        })
        .unwrap();
    let back = Ain::from_bytes(&bytes).unwrap();
    assert_eq!(back.globals[g as usize].initval, Some(InitVal::Int(42)));
}
