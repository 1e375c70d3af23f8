use flate2::Compression;
use system4::SjisString;
use system4::ain::DataType;
use system4::save::gsave::{
    self, GlobalSave, GsaveArray, GsaveArrayValue, GsaveFlatArray, GsaveKeyval, GsaveRecord,
    GsaveStructDef,
};
use system4::save::rsave::{
    FRAME_FUNCTION_CALL, FRAME_METHOD_CALL, ResumeSave, RsaveCallFrame, RsaveHeapObj,
    RsaveReturnRecord, RsaveSymbol,
};
use system4::save::{RsaveReadMode, Savefile};

fn int_type() -> i32 {
    DataType::Int.into()
}

fn string_type() -> i32 {
    DataType::String.into()
}

fn build_gsave(version: i32) -> GlobalSave {
    let mut gs = GlobalSave::create(version, "SaveKey", 3, Some("GroupA"));
    gs.add_globals_record(3);

    let hello = gs.add_string(SjisString::from_utf8("hello"));
    gs.globals[0].data_type = int_type();
    gs.globals[0].value = 42;
    gs.globals[0].name = "count".to_string();
    gs.globals[1].data_type = string_type();
    gs.globals[1].value = hello;
    gs.globals[1].name = "title".to_string();

    let array = GsaveArray {
        rank: 2,
        dimensions: vec![2, 3],
        flat_arrays: (0..3)
            .map(|i| GsaveFlatArray {
                data_type: int_type(),
                values: vec![
                    GsaveArrayValue {
                        value: i,
                        data_type: int_type(),
                    },
                    GsaveArrayValue {
                        value: i * 10,
                        data_type: int_type(),
                    },
                ],
            })
            .collect(),
    };
    let arr = gs.add_array(array);
    gs.globals[2].data_type = DataType::ArrayInt.into();
    gs.globals[2].value = arr;
    gs.globals[2].name = "grid".to_string();

    let kv = gs.add_keyval(GsaveKeyval {
        data_type: int_type(),
        value: 1,
        name: "x".to_string(),
    });
    gs.add_record(GsaveRecord {
        record_type: gsave::RECORD_STRUCT,
        struct_name: "Point".to_string(),
        indices: vec![kv],
    });

    if version >= 7 {
        gs.struct_defs.push(GsaveStructDef {
            name: "Point".to_string(),
            fields: vec![gsave::GsaveFieldDef {
                data_type: int_type(),
                name: "x".to_string(),
            }],
        });
    }
    gs
}

fn round_trip(gs: &GlobalSave, encrypt: bool, level: Compression) -> GlobalSave {
    let mut bytes = Vec::new();
    gs.write(&mut bytes, encrypt, level).unwrap();
    let save = Savefile::from_bytes(&bytes).unwrap();
    assert_eq!(save.encrypted, encrypt);
    assert_eq!(save.compression.level(), level.level());
    GlobalSave::parse(&save.buf).unwrap()
}

#[test]
fn gsave_v5_round_trip() {
    let gs = build_gsave(5);
    let back = round_trip(&gs, true, Compression::best());

    assert_eq!(back.version, 5);
    assert_eq!(back.key, "SaveKey");
    assert_eq!(back.uk1, 1000);
    assert_eq!(back.uk2, 56);
    assert_eq!(back.group.as_deref(), Some("GroupA"));
    assert_eq!(back.records.len(), 2);
    assert_eq!(back.records[1].struct_name, "Point");
    assert_eq!(back.globals[0].value, 42);
    assert_eq!(back.globals[1].unknown, 1);
    assert_eq!(back.strings[0].to_utf8(), "hello");
    assert_eq!(back.arrays[0].dimensions, [2, 3]);
    assert_eq!(back.arrays[0].flat_arrays.len(), 3);
    assert_eq!(back.keyvals[0].name, "x");
}

#[test]
fn gsave_v4_has_no_group() {
    let mut gs = build_gsave(4);
    gs.group = None;
    let back = round_trip(&gs, false, Compression::default());
    assert_eq!(back.version, 4);
    assert_eq!(back.group, None);
}

#[test]
fn gsave_v7_empty_string_sentinel() {
    let mut gs = build_gsave(7);
    gs.globals[1].value = gsave::EMPTY_STRING;

    let payload = gs.serialize();
    // the sentinel is persisted verbatim in the global's value slot
    assert!(
        payload
            .windows(4)
            .any(|w| w == 0x7fffffffu32.to_le_bytes()),
        "sentinel not found in serialized payload"
    );

    let back = GlobalSave::parse(&payload).unwrap();
    assert_eq!(back.version, 7);
    assert_eq!(back.globals[1].value, gsave::EMPTY_STRING);
    assert_eq!(back.struct_defs.len(), 1);
    assert_eq!(back.struct_defs[0].fields[0].name, "x");
}

#[test]
fn gsave_rejects_bad_string_index() {
    let mut gs = build_gsave(5);
    gs.globals[1].value = 99; // out of the string table
    let payload = gs.serialize();
    assert!(GlobalSave::parse(&payload).is_err());
}

#[test]
fn gsave_compression_level_is_preserved() {
    let gs = build_gsave(5);
    let mut bytes = Vec::new();
    gs.write(&mut bytes, true, Compression::fast()).unwrap();
    let save = Savefile::from_bytes(&bytes).unwrap();
    // rewriting keeps the original outer parameters
    let rewritten = save.to_vec().unwrap();
    let save2 = Savefile::from_bytes(&rewritten).unwrap();
    assert_eq!(save2.buf, save.buf);
    assert_eq!(save2.compression.level(), Compression::fast().level());
    assert!(save2.encrypted);
}

fn build_rsave(version: i32) -> ResumeSave {
    let sym = |id: i32, name: &str| {
        if version >= 6 {
            RsaveSymbol::Name(name.to_string())
        } else {
            RsaveSymbol::Id(id)
        }
    };
    ResumeSave {
        version,
        key: "ResumeKey".to_string(),
        comments: if version >= 7 {
            vec![SjisString::from_utf8("chapter 3")]
        } else {
            Vec::new()
        },
        comments_only: false,
        ip: RsaveReturnRecord {
            return_addr: 0x1234,
            caller_func: sym(2, "main"),
            local_addr: 8,
            crc: 0,
        },
        stack: vec![1, 2, 3],
        call_frames: vec![
            RsaveCallFrame {
                frame_type: FRAME_FUNCTION_CALL,
                local_ptr: 0,
                struct_ptr: -1,
            },
            RsaveCallFrame {
                frame_type: FRAME_METHOD_CALL,
                local_ptr: 1,
                struct_ptr: 3,
            },
        ],
        return_records: vec![RsaveReturnRecord {
            return_addr: -1,
            caller_func: sym(-1, "NULL"),
            local_addr: 0,
            crc: 0,
        }],
        uk1: 0,
        uk2: 0,
        uk3: 0,
        uk4: 0,
        next_seq: if version >= 9 { 7 } else { 0 },
        heap: vec![
            RsaveHeapObj::Frame {
                globals: true,
                seq: 1,
                func: sym(0, ""),
                types: vec![int_type()],
                struct_ptr: -1,
                slots: vec![42],
            },
            RsaveHeapObj::Frame {
                globals: false,
                seq: 2,
                func: sym(3, "Point@Move"),
                types: vec![int_type(), int_type()],
                struct_ptr: if version >= 9 { 3 } else { -1 },
                slots: vec![5, 6],
            },
            RsaveHeapObj::String {
                seq: 3,
                value: SjisString::from_utf8("すごい"),
            },
            RsaveHeapObj::Struct {
                seq: 4,
                ctor: sym(4, "Point@0"),
                dtor: sym(5, "Point@1"),
                struct_type: sym(0, "Point"),
                types: vec![int_type()],
                slots: vec![2],
            },
            RsaveHeapObj::Array {
                seq: 5,
                rank: 1,
                data_type: int_type(),
                struct_type: sym(-1, ""),
                root_rank: 1,
                is_not_empty: 1,
                slots: vec![9, 9, 9],
            },
            RsaveHeapObj::Null,
        ],
        func_names: if version >= 6 {
            vec!["NULL".to_string(), "main".to_string()]
        } else {
            Vec::new()
        },
    }
}

#[test]
fn rsave_round_trip_all_versions() {
    for version in [4, 6, 7, 9] {
        let mut rs = build_rsave(version);
        if version >= 9 {
            rs.heap.push(RsaveHeapObj::Delegate {
                seq: 6,
                slots: vec![1, 2],
            });
        }
        let payload = rs.serialize();
        let back = ResumeSave::parse(&payload, RsaveReadMode::Full).unwrap();

        assert_eq!(back.version, version, "v{version}");
        assert_eq!(back.key, rs.key);
        assert_eq!(back.ip, rs.ip);
        assert_eq!(back.stack, rs.stack);
        assert_eq!(back.call_frames, rs.call_frames);
        assert_eq!(back.return_records, rs.return_records);
        assert_eq!(back.next_seq, rs.next_seq);
        assert_eq!(back.heap, rs.heap);
        assert_eq!(back.func_names, rs.func_names);
        assert_eq!(back.comments, rs.comments);

        // the serialized form round-trips byte for byte
        assert_eq!(back.serialize(), payload);
    }
}

#[test]
fn rsave_comments_only_mode() {
    let rs = build_rsave(9);
    let payload = rs.serialize();
    let listing = ResumeSave::parse(&payload, RsaveReadMode::CommentsOnly).unwrap();
    assert!(listing.comments_only);
    assert_eq!(listing.comments.len(), 1);
    assert_eq!(listing.comments[0].to_utf8(), "chapter 3");
    assert!(listing.heap.is_empty());
}

#[test]
fn rsave_comment_only_file() {
    // a file that *is* only comments parses even in full mode
    let rs = ResumeSave {
        version: 7,
        key: "k".to_string(),
        comments: vec![SjisString::from_utf8("quick save")],
        comments_only: true,
        ..ResumeSave::default()
    };
    let payload = rs.serialize();
    let back = ResumeSave::parse(&payload, RsaveReadMode::Full).unwrap();
    assert!(back.comments_only);
    assert_eq!(back.comments.len(), 1);
}

#[test]
fn rsave_rejects_bad_heap_reference() {
    let mut rs = build_rsave(9);
    rs.call_frames[0].local_ptr = 99;
    let payload = rs.serialize();
    assert!(ResumeSave::parse(&payload, RsaveReadMode::Full).is_err());
}

#[test]
fn rsave_in_outer_container() {
    let rs = build_rsave(6);
    let mut bytes = Vec::new();
    rs.write(&mut bytes, true, Compression::default()).unwrap();
    let save = Savefile::from_bytes(&bytes).unwrap();
    let back = ResumeSave::parse(&save.buf, RsaveReadMode::Full).unwrap();
    assert_eq!(back.heap, rs.heap);
}
