//! EX data files.
//!
//! An EX file is a sequence of named top-level blocks holding a recursive
//! value tree: scalars, schema-checked tables (with sub-field schemas for
//! struct-valued columns), size-checked lists, and name-keyed trees. The
//! payload is XOR-permuted with a fixed substitution table and zlib
//! compressed inside `HEAD`/`EXTF`/`DATA` framing.
//!
//! Later games swapped the persisted row/column counts; the reader detects
//! this by comparing the first count against the field schema and latches
//! the swapped interpretation for the rest of the file.

use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use num_enum::TryFromPrimitive;
use tracing::warn;

use crate::buffer::{Reader, Writer};
use crate::string::SjisString;
use crate::{Error, Result, zlib};

/// Value kind tags as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum ExType {
    Int = 1,
    Float = 2,
    String = 3,
    Table = 4,
    List = 5,
    Tree = 6,
}

impl ExType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ExType::Int => "int",
            ExType::Float => "float",
            ExType::String => "string",
            ExType::Table => "table",
            ExType::List => "list",
            ExType::Tree => "tree",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExValue {
    Int(i32),
    Float(f32),
    String(SjisString),
    Table(Box<ExTable>),
    List(Box<ExList>),
    Tree(Box<ExTree>),
}

impl ExValue {
    #[must_use]
    pub fn ex_type(&self) -> ExType {
        match self {
            ExValue::Int(_) => ExType::Int,
            ExValue::Float(_) => ExType::Float,
            ExValue::String(_) => ExType::String,
            ExValue::Table(_) => ExType::Table,
            ExValue::List(_) => ExType::List,
            ExValue::Tree(_) => ExType::Tree,
        }
    }

    /// Scalar equality, used for schema default-value comparison.
    fn scalar_eq(&self, other: &ExValue) -> bool {
        match (self, other) {
            (ExValue::Int(a), ExValue::Int(b)) => a == b,
            (ExValue::Float(a), ExValue::Float(b)) => (a - b).abs() < 0.00001,
            (ExValue::String(a), ExValue::String(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExField {
    pub field_type: ExType,
    pub name: SjisString,
    pub has_value: bool,
    /// Default value when `has_value` is set.
    pub value: Option<ExValue>,
    pub is_index: bool,
    /// Schema of struct-valued columns.
    pub subfields: Vec<ExField>,
}

impl ExField {
    fn schema_eq(&self, other: &ExField) -> bool {
        self.field_type == other.field_type
            && self.name == other.name
            && self.has_value == other.has_value
            && match (&self.value, &other.value) {
                (Some(a), Some(b)) => a.scalar_eq(b),
                (None, None) => true,
                _ => false,
            }
            && self.is_index == other.is_index
            && self.subfields.len() == other.subfields.len()
            && self
                .subfields
                .iter()
                .zip(&other.subfields)
                .all(|(a, b)| a.schema_eq(b))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExTable {
    pub fields: Vec<ExField>,
    pub rows: Vec<Vec<ExValue>>,
}

impl ExTable {
    #[must_use]
    pub fn nr_columns(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&ExValue> {
        self.rows.get(row)?.get(col)
    }

    fn index_column(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.is_index)
    }

    /// Row whose index column holds `key`.
    #[must_use]
    pub fn row_at_int_key(&self, key: i32) -> Option<usize> {
        let col = self.index_column()?;
        if self.fields[col].field_type != ExType::Int {
            return None;
        }
        self.rows
            .iter()
            .position(|row| matches!(row[col], ExValue::Int(v) if v == key))
    }

    /// Row whose index column holds `key`.
    #[must_use]
    pub fn row_at_string_key(&self, key: &SjisString) -> Option<usize> {
        let col = self.index_column()?;
        if self.fields[col].field_type != ExType::String {
            return None;
        }
        self.rows
            .iter()
            .position(|row| matches!(&row[col], ExValue::String(s) if s == key))
    }

    #[must_use]
    pub fn col_from_name(&self, name: &SjisString) -> Option<usize> {
        self.fields.iter().position(|f| &f.name == name)
    }

    fn schema_eq(&self, other: &ExTable) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| a.schema_eq(b))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExList {
    pub items: Vec<ExValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExTreeContent {
    Node(Vec<ExTree>),
    Leaf { name: SjisString, value: ExValue },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExTree {
    pub name: SjisString,
    pub content: ExTreeContent,
}

impl ExTree {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, ExTreeContent::Leaf { .. })
    }

    #[must_use]
    pub fn get_child(&self, name: &SjisString) -> Option<&ExTree> {
        match &self.content {
            ExTreeContent::Node(children) => children.iter().find(|c| &c.name == name),
            ExTreeContent::Leaf { .. } => None,
        }
    }

    #[must_use]
    pub fn leaf_value(&self) -> Option<&ExValue> {
        match &self.content {
            ExTreeContent::Leaf { value, .. } => Some(value),
            ExTreeContent::Node(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExBlock {
    pub name: SjisString,
    pub value: ExValue,
}

/// A decoded EX file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ex {
    pub blocks: Vec<ExBlock>,
    /// Whether the source file stored row counts before column counts.
    pub row_major: bool,
}

/// Result of a path lookup: a plain value, or an interior tree node.
#[derive(Debug, PartialEq)]
pub enum ExNode<'a> {
    Value(&'a ExValue),
    Tree(&'a ExTree),
}

// ----------------------------------------------------------------------
// byte permutation

/// The byte substitution is derived from a bit-rotation schedule: rotate
/// each byte by its popcount, direction chosen by popcount parity. The
/// forward and inverse tables are computed once.
fn tables() -> &'static ([u8; 256], [u8; 256]) {
    static TABLES: OnceLock<([u8; 256], [u8; 256])> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut forward = [0u8; 256];
        for (i, out) in forward.iter_mut().enumerate() {
            let b = i as u8;
            let n = b.count_ones();
            *out = if n % 2 == 0 {
                b.rotate_left(8 - n)
            } else {
                b.rotate_right(8 - n)
            };
        }
        let mut inverse = [0u8; 256];
        for (i, &v) in forward.iter().enumerate() {
            inverse[v as usize] = i as u8;
        }
        (forward, inverse)
    })
}

/// Apply the decode permutation in place.
pub fn decode_bytes(buf: &mut [u8]) {
    let (forward, _) = tables();
    for b in buf.iter_mut() {
        *b = forward[*b as usize];
    }
}

/// Apply the encode (inverse) permutation in place.
pub fn encode_bytes(buf: &mut [u8]) {
    let (_, inverse) = tables();
    for b in buf.iter_mut() {
        *b = inverse[*b as usize];
    }
}

// ----------------------------------------------------------------------
// reader

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableLayout {
    Default,
    ColumnsFirst,
    RowsFirst,
}

struct ExReader<'a> {
    r: Reader<'a>,
    layout: TableLayout,
}

impl<'a> ExReader<'a> {
    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::Invalid(format!("At 0x{:08x}: {msg}", self.r.index()))
    }

    /// Strings are stored with their length padded out to alignment; the
    /// logical value ends at the first NUL.
    fn read_string(&mut self) -> Result<SjisString> {
        let raw = self.r.pascal_string()?;
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(SjisString::from_bytes(&raw[..len]))
    }

    fn read_value_of_type(&mut self, value_type: ExType, fields: &[ExField]) -> Result<ExValue> {
        Ok(match value_type {
            ExType::Int => ExValue::Int(self.r.i32()?),
            ExType::Float => ExValue::Float(self.r.f32()?),
            ExType::String => ExValue::String(self.read_string()?),
            ExType::Table => {
                // a value with no inherited schema is a full table and
                // carries its own fields
                let table = if fields.is_empty() {
                    let own = self.read_fields()?;
                    self.read_table(own)?
                } else {
                    self.read_table(fields.to_vec())?
                };
                ExValue::Table(Box::new(table))
            }
            ExType::List => ExValue::List(Box::new(self.read_list()?)),
            ExType::Tree => ExValue::Tree(Box::new(self.read_tree()?)),
        })
    }

    fn read_tagged_value(&mut self, fields: &[ExField]) -> Result<ExValue> {
        let tag = self.r.i32()?;
        let value_type = ExType::try_from(tag)
            .map_err(|_| self.error(format!("Unhandled value type: {tag}")))?;
        self.read_value_of_type(value_type, fields)
    }

    fn read_field(&mut self) -> Result<ExField> {
        let tag = self.r.i32()?;
        let field_type = ExType::try_from(tag)
            .map_err(|_| self.error(format!("Unknown/invalid field type: {tag}")))?;
        if matches!(field_type, ExType::List | ExType::Tree) {
            return Err(self.error(format!("Unknown/invalid field type: {tag}")));
        }

        let name = self.read_string()?;
        let has_value = self.r.i32()?;
        let is_index = self.r.i32()?;
        let value = if has_value != 0 {
            Some(self.read_value_of_type(field_type, &[])?)
        } else {
            None
        };
        if has_value != 0 && has_value != 1 {
            warn!("Non-boolean for field->has_value: {has_value}");
        }
        if is_index != 0 && is_index != 1 {
            warn!("Non-boolean for field->is_index: {is_index}");
        }

        let mut subfields = Vec::new();
        if field_type == ExType::Table {
            let nr_subfields = self.r.i32()?;
            if nr_subfields > 255 {
                return Err(self.error(format!("Too many subfields: {nr_subfields}")));
            }
            for _ in 0..nr_subfields {
                subfields.push(self.read_field()?);
            }
        }

        Ok(ExField {
            field_type,
            name,
            has_value: has_value != 0,
            value,
            is_index: is_index != 0,
            subfields,
        })
    }

    fn read_fields(&mut self) -> Result<Vec<ExField>> {
        let nr_fields = self.r.i32()?;
        let mut fields = Vec::with_capacity(nr_fields.max(0) as usize);
        for _ in 0..nr_fields {
            fields.push(self.read_field()?);
        }
        Ok(fields)
    }

    fn read_table(&mut self, fields: Vec<ExField>) -> Result<ExTable> {
        let first = self.r.i32()? as u32;
        let second = self.r.i32()? as u32;

        // starting in later titles the row/column counts are reversed;
        // detect once and latch
        let (nr_columns, nr_rows) = match self.layout {
            TableLayout::RowsFirst => (second, first),
            TableLayout::ColumnsFirst => (first, second),
            TableLayout::Default => {
                if first as usize != fields.len() && second as usize == fields.len() {
                    self.layout = TableLayout::RowsFirst;
                    (second, first)
                } else {
                    self.layout = TableLayout::ColumnsFirst;
                    (first, second)
                }
            }
        };
        if nr_columns as usize != fields.len() {
            return Err(self.error(format!(
                "Number of fields doesn't match number of columns: {nr_columns}, {}",
                fields.len()
            )));
        }

        let mut rows = Vec::with_capacity(nr_rows as usize);
        for _ in 0..nr_rows {
            let mut row = Vec::with_capacity(nr_columns as usize);
            for field in &fields {
                let value = self.read_tagged_value(&field.subfields)?;
                if value.ex_type() != field.field_type {
                    // a known-broken table ships in at least one title
                    warn!(
                        "Column type doesn't match field type: expected {}; got {}",
                        field.field_type.name(),
                        value.ex_type().name()
                    );
                }
                row.push(value);
            }
            rows.push(row);
        }
        Ok(ExTable { fields, rows })
    }

    fn read_list(&mut self) -> Result<ExList> {
        let nr_items = self.r.i32()?;
        let mut items = Vec::with_capacity(nr_items.max(0) as usize);
        for _ in 0..nr_items {
            let tag = self.r.i32()?;
            let value_type = ExType::try_from(tag)
                .map_err(|_| self.error(format!("Unhandled value type: {tag}")))?;
            let size = self.r.i32()? as usize;
            let data_loc = self.r.index();
            let value = self.read_value_of_type(value_type, &[])?;
            if self.r.index() - data_loc != size {
                return Err(self.error(format!(
                    "Incorrect size for list item: {size} / {}",
                    self.r.index() - data_loc
                )));
            }
            items.push(value);
        }
        Ok(ExList { items })
    }

    fn read_tree(&mut self) -> Result<ExTree> {
        let name = self.read_string()?;
        let is_leaf = self.r.i32()?;
        if !(0..=1).contains(&is_leaf) {
            return Err(self.error(format!("tree->is_leaf is not a boolean: {is_leaf}")));
        }

        if is_leaf == 0 {
            let nr_children = self.r.i32()?;
            let mut children = Vec::with_capacity(nr_children.max(0) as usize);
            for _ in 0..nr_children {
                children.push(self.read_tree()?);
            }
            return Ok(ExTree {
                name,
                content: ExTreeContent::Node(children),
            });
        }

        let tag = self.r.i32()?;
        let value_type = ExType::try_from(tag)
            .map_err(|_| self.error(format!("Unhandled value type: {tag}")))?;
        let size = self.r.i32()? as usize;
        let data_loc = self.r.index();
        let leaf_name = self.read_string()?;
        let value = self.read_value_of_type(value_type, &[])?;
        if self.r.index() - data_loc != size {
            return Err(self.error(format!(
                "Incorrect size for leaf node: {size} / {}",
                self.r.index() - data_loc
            )));
        }
        let zero = self.r.i32()?;
        if zero != 0 {
            return Err(self.error(format!("Expected 0 after leaf node: 0x{zero:x}")));
        }
        Ok(ExTree {
            name,
            content: ExTreeContent::Leaf {
                name: leaf_name,
                value,
            },
        })
    }

    fn read_block(&mut self) -> Result<ExBlock> {
        let tag = self.r.i32()?;
        let value_type = ExType::try_from(tag)
            .map_err(|_| self.error(format!("Unknown/invalid block type: {tag}")))?;
        let size = self.r.i32()? as usize;
        if size > self.r.remaining() {
            return Err(self.error(format!("Block size extends past end of file: {size}")));
        }
        let data_loc = self.r.index();
        let name = self.read_string()?;
        let value = self.read_value_of_type(value_type, &[])?;
        if self.r.index() - data_loc != size {
            return Err(self.error(format!(
                "Incorrect block size: {} / {size}",
                self.r.index() - data_loc
            )));
        }
        Ok(ExBlock { name, value })
    }
}

/// Undo the outer framing: check the section markers, apply the byte
/// permutation and inflate. Returns the block count and the raw tree data.
fn decode_container(data: &[u8]) -> Result<(u32, Vec<u8>)> {
    let mut r = Reader::new(data);
    if !r.check_bytes(b"HEAD") {
        return Err(Error::InvalidSignature("missing HEAD section marker".into()));
    }
    r.skip(4);
    if !r.check_bytes(b"EXTF") {
        return Err(Error::invalid("missing EXTF section marker"));
    }
    r.skip(4);
    let nr_blocks = r.u32()?;
    if !r.check_bytes(b"DATA") {
        return Err(Error::invalid("missing DATA section marker"));
    }
    let compressed_size = r.u32()? as usize;
    let uncompressed_size = r.u32()? as usize;

    let mut compressed = r.bytes(compressed_size)?.to_vec();
    decode_bytes(&mut compressed);
    let out = zlib::inflate_exact(&compressed, uncompressed_size)?;
    Ok((nr_blocks, out))
}

impl Ex {
    pub fn read(data: &[u8]) -> Result<Ex> {
        let (nr_blocks, decoded) = decode_container(data)?;
        let mut reader = ExReader {
            r: Reader::new(&decoded),
            layout: TableLayout::Default,
        };
        let mut blocks = Vec::with_capacity(nr_blocks as usize);
        for _ in 0..nr_blocks {
            blocks.push(reader.read_block()?);
        }
        Ok(Ex {
            blocks,
            row_major: reader.layout == TableLayout::RowsFirst,
        })
    }

    pub fn read_file(path: impl AsRef<Path>) -> Result<Ex> {
        Ex::read(&std::fs::read(path)?)
    }

    // ------------------------------------------------------------------
    // lookup

    fn get_block(&self, name: &SjisString, value_type: ExType) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.value.ex_type() == value_type && &b.name == name)
    }

    /// Resolve a dotted path: the first segment names a top-level block,
    /// the rest walk tree children by name.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<ExNode<'_>> {
        let mut segments = path.split('.');
        let first = SjisString::from_utf8(segments.next()?);
        let block = self.blocks.iter().find(|b| b.name == first)?;

        let mut segs = segments.peekable();
        if segs.peek().is_none() {
            return Some(ExNode::Value(&block.value));
        }
        let ExValue::Tree(tree) = &block.value else {
            return None;
        };
        let mut node: &ExTree = tree;
        loop {
            let seg = SjisString::from_utf8(segs.next()?);
            match &node.content {
                ExTreeContent::Leaf { name, value } => {
                    // a leaf terminates the path with its own name
                    return (segs.peek().is_none() && name == &seg).then_some(ExNode::Value(value));
                }
                ExTreeContent::Node(children) => {
                    let child = children.iter().find(|c| c.name == seg)?;
                    if segs.peek().is_none() {
                        return match &child.content {
                            ExTreeContent::Leaf { value, .. } => Some(ExNode::Value(value)),
                            ExTreeContent::Node(_) => Some(ExNode::Tree(child)),
                        };
                    }
                    node = child;
                }
            }
        }
    }

    #[must_use]
    pub fn get_int(&self, name: &str, dflt: i32) -> i32 {
        match self.get_block(&SjisString::from_utf8(name), ExType::Int) {
            Some(i) => match self.blocks[i].value {
                ExValue::Int(v) => v,
                _ => dflt,
            },
            None => dflt,
        }
    }

    #[must_use]
    pub fn get_float(&self, name: &str, dflt: f32) -> f32 {
        match self.get_block(&SjisString::from_utf8(name), ExType::Float) {
            Some(i) => match self.blocks[i].value {
                ExValue::Float(v) => v,
                _ => dflt,
            },
            None => dflt,
        }
    }

    #[must_use]
    pub fn get_string(&self, name: &str) -> Option<&SjisString> {
        let i = self.get_block(&SjisString::from_utf8(name), ExType::String)?;
        match &self.blocks[i].value {
            ExValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&ExTable> {
        let i = self.get_block(&SjisString::from_utf8(name), ExType::Table)?;
        match &self.blocks[i].value {
            ExValue::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_list(&self, name: &str) -> Option<&ExList> {
        let i = self.get_block(&SjisString::from_utf8(name), ExType::List)?;
        match &self.blocks[i].value {
            ExValue::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_tree(&self, name: &str) -> Option<&ExTree> {
        let i = self.get_block(&SjisString::from_utf8(name), ExType::Tree)?;
        match &self.blocks[i].value {
            ExValue::Tree(t) => Some(t),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // mutation

    /// Merge `other` into `self` block by block: scalars are overwritten,
    /// tables and lists appended, trees merged by child name.
    pub fn append(&mut self, other: &Ex) -> Result<()> {
        for block in &other.blocks {
            match self.get_block(&block.name, block.value.ex_type()) {
                Some(i) => append_value(&mut self.blocks[i].value, &block.value)?,
                None => self.blocks.push(block.clone()),
            }
        }
        Ok(())
    }

    /// Replace matching blocks wholesale, appending the rest.
    pub fn replace(&mut self, other: &Ex) {
        for block in &other.blocks {
            match self.get_block(&block.name, block.value.ex_type()) {
                Some(i) => self.blocks[i].value = block.value.clone(),
                None => self.blocks.push(block.clone()),
            }
        }
    }

    /// Append `append` onto `base` data, returning a new file holding
    /// only the blocks added or modified by `append`.
    pub fn extract_append(base: &Ex, append: &Ex) -> Result<Ex> {
        let mut out = Ex::default();
        for block in &append.blocks {
            let merged = match base.get_block(&block.name, block.value.ex_type()) {
                Some(i) => {
                    let src = &base.blocks[i].value;
                    match src {
                        ExValue::Int(_) | ExValue::Float(_) | ExValue::String(_) => block.clone(),
                        _ => {
                            let mut value = src.clone();
                            append_value(&mut value, &block.value)?;
                            ExBlock {
                                name: block.name.clone(),
                                value,
                            }
                        }
                    }
                }
                None => block.clone(),
            };
            out.blocks.push(merged);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // writer

    /// Serialize and apply the outer framing.
    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        let mut body = Writer::new();
        for block in &self.blocks {
            write_block(&mut body, block, self.row_major);
        }
        let raw = body.into_vec();
        let mut compressed = zlib::deflate(&raw, flate2::Compression::default())?;
        encode_bytes(&mut compressed);

        let mut w = Writer::new();
        w.bytes(b"HEAD");
        w.i32(0);
        w.bytes(b"EXTF");
        w.i32(0);
        w.i32(self.blocks.len() as i32);
        w.bytes(b"DATA");
        w.u32(compressed.len() as u32);
        w.u32(raw.len() as u32);
        w.bytes(&compressed);
        out.write_all(w.as_slice())?;
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

fn append_value(dst: &mut ExValue, src: &ExValue) -> Result<()> {
    match (dst, src) {
        (ExValue::Int(d), ExValue::Int(s)) => *d = *s,
        (ExValue::Float(d), ExValue::Float(s)) => *d = *s,
        (ExValue::String(d), ExValue::String(s)) => *d = s.clone(),
        (ExValue::Table(d), ExValue::Table(s)) => append_table(d, s)?,
        (ExValue::List(d), ExValue::List(s)) => d.items.extend(s.items.iter().cloned()),
        (ExValue::Tree(d), ExValue::Tree(s)) => append_tree(d, s)?,
        _ => return Err(Error::invalid("appended block has mismatched type")),
    }
    Ok(())
}

/// Two tables can be appended only when their schemas compare equal.
fn append_table(dst: &mut ExTable, src: &ExTable) -> Result<()> {
    if !dst.schema_eq(src) {
        return Err(Error::invalid("table headers do not match"));
    }
    dst.rows.extend(src.rows.iter().cloned());
    Ok(())
}

/// Merge trees by child name: leaves override, interior nodes recurse.
fn append_tree(dst: &mut ExTree, src: &ExTree) -> Result<()> {
    let (ExTreeContent::Node(dst_children), ExTreeContent::Node(src_children)) =
        (&mut dst.content, &src.content)
    else {
        return Err(Error::invalid("tried to append to leaf node"));
    };

    for child in src_children {
        match dst_children.iter_mut().find(|c| c.name == child.name) {
            Some(existing) => {
                if existing.is_leaf() != child.is_leaf() {
                    return Err(Error::invalid(
                        "tree nodes with same name have different type",
                    ));
                }
                if child.is_leaf() {
                    existing.content = child.content.clone();
                } else {
                    append_tree(existing, child)?;
                }
            }
            None => dst_children.push(child.clone()),
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// write helpers

/// Strings are NUL-terminated then padded out to 4-byte alignment, with
/// the padded length persisted.
fn write_string(w: &mut Writer, s: &SjisString) {
    let padded = (s.len() + 1 + 3) & !3;
    w.i32(padded as i32);
    w.bytes(s.as_bytes());
    for _ in s.len()..padded {
        w.u8(0);
    }
}

fn write_value(w: &mut Writer, value: &ExValue, with_fields: bool, row_major: bool) {
    match value {
        ExValue::Int(v) => w.i32(*v),
        ExValue::Float(v) => w.f32(*v),
        ExValue::String(s) => write_string(w, s),
        ExValue::Table(t) => write_table(w, t, with_fields, row_major),
        ExValue::List(l) => write_list(w, l, row_major),
        ExValue::Tree(t) => write_tree(w, t, row_major),
    }
}

fn write_field(w: &mut Writer, field: &ExField, row_major: bool) {
    w.i32(field.field_type as i32);
    write_string(w, &field.name);
    w.i32(field.has_value.into());
    w.i32(field.is_index.into());
    if let Some(value) = &field.value {
        write_value(w, value, true, row_major);
    }
    if field.field_type == ExType::Table {
        w.i32(field.subfields.len() as i32);
        for sub in &field.subfields {
            write_field(w, sub, row_major);
        }
    }
}

fn write_table(w: &mut Writer, table: &ExTable, with_fields: bool, row_major: bool) {
    if with_fields {
        w.i32(table.fields.len() as i32);
        for field in &table.fields {
            write_field(w, field, row_major);
        }
    }
    if row_major {
        w.i32(table.rows.len() as i32);
        w.i32(table.nr_columns() as i32);
    } else {
        w.i32(table.nr_columns() as i32);
        w.i32(table.rows.len() as i32);
    }
    for row in &table.rows {
        for (value, field) in row.iter().zip(&table.fields) {
            w.i32(value.ex_type() as i32);
            write_value(w, value, field.subfields.is_empty(), row_major);
        }
    }
}

fn write_list(w: &mut Writer, list: &ExList, row_major: bool) {
    w.i32(list.items.len() as i32);
    for item in &list.items {
        w.i32(item.ex_type() as i32);
        let size_loc = w.skip_i32();
        let start = w.index();
        write_value(w, item, true, row_major);
        w.write_i32_at(size_loc, (w.index() - start) as i32);
    }
}

fn write_tree(w: &mut Writer, tree: &ExTree, row_major: bool) {
    write_string(w, &tree.name);
    match &tree.content {
        ExTreeContent::Node(children) => {
            w.i32(0);
            w.i32(children.len() as i32);
            for child in children {
                write_tree(w, child, row_major);
            }
        }
        ExTreeContent::Leaf { name, value } => {
            w.i32(1);
            w.i32(value.ex_type() as i32);
            let size_loc = w.skip_i32();
            let start = w.index();
            write_string(w, name);
            write_value(w, value, true, row_major);
            w.write_i32_at(size_loc, (w.index() - start) as i32);
            w.i32(0);
        }
    }
}

fn write_block(w: &mut Writer, block: &ExBlock, row_major: bool) {
    w.i32(block.value.ex_type() as i32);
    let size_loc = w.skip_i32();
    let start = w.index();
    write_string(w, &block.name);
    write_value(w, &block.value, true, row_major);
    w.write_i32_at(size_loc, (w.index() - start) as i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_block() -> ExBlock {
        let fields = vec![
            ExField {
                field_type: ExType::Int,
                name: "id".into(),
                has_value: false,
                value: None,
                is_index: true,
                subfields: Vec::new(),
            },
            ExField {
                field_type: ExType::String,
                name: "name".into(),
                has_value: false,
                value: None,
                is_index: false,
                subfields: Vec::new(),
            },
        ];
        let rows = vec![
            vec![ExValue::Int(1), ExValue::String("one".into())],
            vec![ExValue::Int(2), ExValue::String("two".into())],
        ];
        ExBlock {
            name: "Items".into(),
            value: ExValue::Table(Box::new(ExTable { fields, rows })),
        }
    }

    fn tree_block() -> ExBlock {
        let leaf = |name: &str, v: i32| ExTree {
            name: name.into(),
            content: ExTreeContent::Leaf {
                name: name.into(),
                value: ExValue::Int(v),
            },
        };
        let tree = ExTree {
            name: "a".into(),
            content: ExTreeContent::Node(vec![ExTree {
                name: "b".into(),
                content: ExTreeContent::Node(vec![leaf("c", 42)]),
            }]),
        };
        ExBlock {
            name: "a".into(),
            value: ExValue::Tree(Box::new(tree)),
        }
    }

    fn sample() -> Ex {
        Ex {
            blocks: vec![
                ExBlock {
                    name: "Version".into(),
                    value: ExValue::Int(3),
                },
                table_block(),
                tree_block(),
            ],
            row_major: false,
        }
    }

    #[test]
    fn permutation_tables_invert() {
        let mut buf: Vec<u8> = (0..=255).collect();
        decode_bytes(&mut buf);
        encode_bytes(&mut buf);
        assert!(buf.iter().enumerate().all(|(i, &b)| i == b as usize));
    }

    #[test]
    fn round_trip() {
        let ex = sample();
        let bytes = ex.to_vec().unwrap();
        let back = Ex::read(&bytes).unwrap();
        assert_eq!(back, ex);
    }

    #[test]
    fn row_major_files_decode_identically(){
        let mut ex = sample();
        ex.row_major = true;
        let bytes = ex.to_vec().unwrap();
        let back = Ex::read(&bytes).unwrap();
        assert!(back.row_major);
        assert_eq!(back.get_table("Items").unwrap().rows.len(), 2);
    }

    #[test]
    fn path_lookup_matches_manual_traversal() {
        let ex = sample();
        let via_path = match ex.get("a.b.c") {
            Some(ExNode::Value(v)) => v,
            other => panic!("unexpected lookup result: {other:?}"),
        };
        let manual = ex
            .get_tree("a")
            .unwrap()
            .get_child(&"b".into())
            .unwrap()
            .get_child(&"c".into())
            .unwrap()
            .leaf_value()
            .unwrap();
        assert_eq!(via_path, manual);
        assert_eq!(via_path, &ExValue::Int(42));
    }

    #[test]
    fn table_key_lookup() {
        let ex = sample();
        let table = ex.get_table("Items").unwrap();
        assert_eq!(table.row_at_int_key(2), Some(1));
        assert_eq!(table.row_at_int_key(9), None);
        assert_eq!(table.col_from_name(&"name".into()), Some(1));
    }

    #[test]
    fn append_rejects_mismatched_schema() {
        let mut base = sample();
        let mut other = Ex::default();
        let mut block = table_block();
        if let ExValue::Table(t) = &mut block.value {
            t.fields[1].name = "other".into();
        }
        other.blocks.push(block);
        assert!(base.append(&other).is_err());
    }

    #[test]
    fn tree_merge_overrides_leaves() {
        let mut base = sample();
        let mut patch = Ex::default();
        let leaf = ExTree {
            name: "c".into(),
            content: ExTreeContent::Leaf {
                name: "c".into(),
                value: ExValue::Int(7),
            },
        };
        patch.blocks.push(ExBlock {
            name: "a".into(),
            value: ExValue::Tree(Box::new(ExTree {
                name: "a".into(),
                content: ExTreeContent::Node(vec![ExTree {
                    name: "b".into(),
                    content: ExTreeContent::Node(vec![leaf]),
                }]),
            })),
        });
        base.append(&patch).unwrap();
        assert_eq!(base.get("a.b.c"), Some(ExNode::Value(&ExValue::Int(7))));
    }
}
