use system4::Ex;
use system4::ex::{ExBlock, ExField, ExNode, ExTable, ExType, ExValue};

fn item_field(name: &str, field_type: ExType, is_index: bool) -> ExField {
    ExField {
        field_type,
        name: name.into(),
        has_value: false,
        value: None,
        is_index,
        subfields: Vec::new(),
    }
}

fn item_table(rows: Vec<Vec<ExValue>>) -> ExValue {
    ExValue::Table(Box::new(ExTable {
        fields: vec![
            item_field("id", ExType::Int, true),
            item_field("label", ExType::String, false),
        ],
        rows,
    }))
}

fn build_file(rows: Vec<Vec<ExValue>>) -> Ex {
    Ex {
        blocks: vec![ExBlock {
            name: "ItemList".into(),
            value: item_table(rows),
        }],
        row_major: false,
    }
}

#[test]
fn schema_preserving_append_across_files() {
    // two files with the same block name, identical schemas, disjoint rows
    let a = build_file(vec![
        vec![ExValue::Int(1), ExValue::String("sword".into())],
        vec![ExValue::Int(2), ExValue::String("shield".into())],
    ]);
    let b = build_file(vec![vec![ExValue::Int(3), ExValue::String("potion".into())]]);

    // through the full on-disk form on both sides
    let a = Ex::read(&a.to_vec().unwrap()).unwrap();
    let b = Ex::read(&b.to_vec().unwrap()).unwrap();

    let merged = Ex::extract_append(&a, &b).unwrap();
    let table = merged.get_table("ItemList").unwrap();
    assert_eq!(table.rows.len(), 3);
    let base_table = a.get_table("ItemList").unwrap();
    assert_eq!(table.fields, base_table.fields);

    // the merged file serializes and parses like any other
    let reread = Ex::read(&merged.to_vec().unwrap()).unwrap();
    assert_eq!(reread.get_table("ItemList").unwrap().rows.len(), 3);
    assert_eq!(
        reread.get_table("ItemList").unwrap().row_at_int_key(3),
        Some(2)
    );
}

#[test]
fn extract_append_keeps_only_touched_blocks() {
    let mut a = build_file(vec![vec![ExValue::Int(1), ExValue::String("sword".into())]]);
    a.blocks.push(ExBlock {
        name: "Untouched".into(),
        value: ExValue::Int(9),
    });
    let b = build_file(vec![vec![ExValue::Int(2), ExValue::String("axe".into())]]);

    let merged = Ex::extract_append(&a, &b).unwrap();
    assert_eq!(merged.blocks.len(), 1);
    assert_eq!(merged.get_table("ItemList").unwrap().rows.len(), 2);
}

#[test]
fn nested_table_schema_round_trips() {
    let sub = vec![
        item_field("x", ExType::Int, false),
        item_field("y", ExType::Int, false),
    ];
    let fields = vec![
        item_field("id", ExType::Int, true),
        ExField {
            field_type: ExType::Table,
            name: "pos".into(),
            has_value: false,
            value: None,
            is_index: false,
            subfields: sub.clone(),
        },
    ];
    let inner = ExValue::Table(Box::new(ExTable {
        fields: sub,
        rows: vec![vec![ExValue::Int(3), ExValue::Int(4)]],
    }));
    let ex = Ex {
        blocks: vec![ExBlock {
            name: "Spots".into(),
            value: ExValue::Table(Box::new(ExTable {
                fields,
                rows: vec![vec![ExValue::Int(1), inner]],
            })),
        }],
        row_major: false,
    };

    let back = Ex::read(&ex.to_vec().unwrap()).unwrap();
    assert_eq!(back, ex);
    let table = back.get_table("Spots").unwrap();
    let ExValue::Table(pos) = table.get(0, 1).unwrap() else {
        panic!("expected sub-table");
    };
    assert_eq!(pos.rows[0], [ExValue::Int(3), ExValue::Int(4)]);
}

#[test]
fn scalar_blocks_and_path_lookup() {
    let ex = Ex {
        blocks: vec![
            ExBlock {
                name: "Width".into(),
                value: ExValue::Int(800),
            },
            ExBlock {
                name: "Scale".into(),
                value: ExValue::Float(1.5),
            },
            ExBlock {
                name: "Title".into(),
                value: ExValue::String("ランス".into()),
            },
        ],
        row_major: false,
    };
    let back = Ex::read(&ex.to_vec().unwrap()).unwrap();
    assert_eq!(back.get_int("Width", 0), 800);
    assert_eq!(back.get_float("Scale", 0.0), 1.5);
    assert_eq!(back.get_string("Title").unwrap().to_utf8(), "ランス");
    assert_eq!(back.get_int("Missing", -7), -7);
    assert_eq!(back.get("Width"), Some(ExNode::Value(&ExValue::Int(800))));
    assert_eq!(back.get("Missing"), None);
}
