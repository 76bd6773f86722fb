//! Code-object export to the JSON intermediate representation, and import back.
//!
//! The IR mirrors the loader of the external VM: every code object is a
//! `{"type": "code", "co_code": ..., ...}` record and every constant slot is either a nested
//! code record or `{"type": "literal", "real_type": "<class 'int'>", "value": 42}`. Binary
//! fields are standard base64 without line breaks, and name sequences are always explicit
//! arrays, never `null`.
//!
//! Export is deterministic: field order is fixed by the record types below and nothing
//! depends on hash iteration order, so equal trees serialize to byte-identical documents.

use std::io::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{
    code::{CodeObject, Constant, Literal, type_name_from_tag, type_tag_for},
    error::StructuralError,
    opcode::OpcodeTable,
};

/// Deepest container nesting [`IrDocument::from_json`] accepts.
const MAX_JSON_NESTING: usize = 127;

/// Deepest code-object nesting an IR document can carry.
///
/// A code record at depth `d` sits at JSON depth `2d - 1` and its arrays at `2d`, so deeper
/// trees would export to documents that fail to parse.
pub const MAX_IR_CODE_DEPTH: usize = MAX_JSON_NESTING / 2;

/// Default bound on code-object nesting for export and import.
pub const DEFAULT_MAX_CODE_DEPTH: usize = MAX_IR_CODE_DEPTH;

/// Limits applied while walking a code-object tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimits {
    /// Maximum nesting depth; the root code object is at depth 1. Export never goes past
    /// [`MAX_IR_CODE_DEPTH`] whatever this is set to.
    pub max_depth: usize,
}

impl Default for ExportLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_CODE_DEPTH,
        }
    }
}

/// IR record for one code object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrCode {
    /// Base64 of the instruction stream.
    pub co_code: String,
    /// Base64 of the line table.
    pub co_lnotab: String,
    pub co_consts: Vec<IrConstant>,
    pub co_name: String,
    pub co_filename: String,
    #[serde(default)]
    pub co_firstlineno: u32,
    pub co_argcount: u32,
    pub co_kwonlyargcount: u32,
    pub co_nlocals: u32,
    pub co_stacksize: u32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub co_names: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub co_varnames: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub co_freevars: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub co_cellvars: Vec<String>,
}

/// IR record for one constant slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IrConstant {
    Code(IrCode),
    Literal { real_type: String, value: JsonValue },
}

/// A complete IR document: the root code object of a compiled module.
#[derive(Debug, Clone, PartialEq)]
pub struct IrDocument {
    pub root: IrCode,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum IrRootRef<'a> {
    Code(&'a IrCode),
}

impl Serialize for IrDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        IrRootRef::Code(&self.root).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IrDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match IrConstant::deserialize(deserializer)? {
            IrConstant::Code(root) => Ok(Self { root }),
            IrConstant::Literal { .. } => Err(serde::de::Error::custom(
                "the document root must be a code object, found a literal",
            )),
        }
    }
}

/// Older producers wrote `null` for empty name sequences; both read back as empty.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl IrDocument {
    /// Serializes the document, compact or indented by two spaces.
    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// Serializes the document into `writer`.
    pub fn write_json<W: Write>(&self, writer: W, pretty: bool) -> serde_json::Result<()> {
        if pretty {
            serde_json::to_writer_pretty(writer, self)
        } else {
            serde_json::to_writer(writer, self)
        }
    }

    /// Parses a document.
    pub fn from_json(json: &str) -> Result<Self, StructuralError> {
        serde_json::from_str(json).map_err(|err| StructuralError::invalid_ir("<document>", err.to_string()))
    }

    /// Rebuilds the code-object tree with default limits.
    pub fn to_code_object(&self) -> Result<CodeObject, StructuralError> {
        self.to_code_object_with(ExportLimits::default())
    }

    /// Rebuilds the code-object tree, enforcing `limits` on nesting depth.
    pub fn to_code_object_with(&self, limits: ExportLimits) -> Result<CodeObject, StructuralError> {
        let mut path = Vec::new();
        import_code(&self.root, limits, &mut path)
    }
}

/// Converts code-object trees into IR documents.
#[derive(Debug, Clone, Default)]
pub struct Exporter<'t> {
    limits: ExportLimits,
    opcodes: Option<&'t OpcodeTable>,
}

impl<'t> Exporter<'t> {
    #[must_use]
    pub fn new(limits: ExportLimits) -> Self {
        Self { limits, opcodes: None }
    }

    /// Checks every instruction against `table` during export.
    ///
    /// Bytecode is read as wordcode (two bytes per instruction); an opcode that names a
    /// placeholder slot or lies past the end of the table fails the export.
    #[must_use]
    pub fn with_opcode_table(mut self, table: &'t OpcodeTable) -> Self {
        self.opcodes = Some(table);
        self
    }

    /// Exports the tree rooted at `code`.
    pub fn export(&self, code: &CodeObject) -> Result<IrDocument, StructuralError> {
        let _span = tracing::debug_span!("export", root = %code.name).entered();
        let mut path = Vec::new();
        let root = self.export_code(code, &mut path)?;
        tracing::debug!(code_objects = code.tree_size(), "exported code object tree");
        Ok(IrDocument { root })
    }

    fn export_code<'c>(&self, code: &'c CodeObject, path: &mut Vec<&'c str>) -> Result<IrCode, StructuralError> {
        path.push(&code.name);
        let limit = self.limits.max_depth.min(MAX_IR_CODE_DEPTH);
        if path.len() > limit {
            return Err(StructuralError::DepthExceeded {
                limit,
                path: path.join("."),
            });
        }
        if let Some(table) = self.opcodes {
            validate_opcodes(table, &code.bytecode, path)?;
        }
        tracing::trace!(name = %code.name, constants = code.constants.len(), "exporting code object");

        let mut co_consts = Vec::with_capacity(code.constants.len());
        for constant in &code.constants {
            let exported = match constant {
                Constant::Code(nested) => IrConstant::Code(self.export_code(nested, path)?),
                Constant::Literal(literal) => {
                    let unsupported = |literal: &Literal| StructuralError::UnsupportedLiteral {
                        type_tag: literal.type_tag(),
                        path: path.join("."),
                    };
                    let value = literal_to_json(literal).map_err(unsupported)?;
                    // the literal record sits one level below this code object's arrays
                    if 2 * path.len() + 1 + json_nesting(&value) > MAX_JSON_NESTING {
                        return Err(unsupported(literal));
                    }
                    IrConstant::Literal {
                        real_type: literal.type_tag(),
                        value,
                    }
                }
            };
            co_consts.push(exported);
        }
        path.pop();

        Ok(IrCode {
            co_code: encode_binary(&code.bytecode),
            co_lnotab: encode_binary(&code.line_table),
            co_consts,
            co_name: code.name.clone(),
            co_filename: code.source_file.clone(),
            co_firstlineno: code.first_line,
            co_argcount: code.arg_count,
            co_kwonlyargcount: code.kwonly_arg_count,
            co_nlocals: code.local_count,
            co_stacksize: code.stack_size,
            co_names: code.names.clone(),
            co_varnames: code.local_names.clone(),
            co_freevars: code.free_vars.clone(),
            co_cellvars: code.cell_vars.clone(),
        })
    }
}

/// Exports `code` with default limits and no opcode validation.
pub fn export(code: &CodeObject) -> Result<IrDocument, StructuralError> {
    Exporter::default().export(code)
}

fn validate_opcodes(table: &OpcodeTable, bytecode: &[u8], path: &[&str]) -> Result<(), StructuralError> {
    for (index, instruction) in bytecode.chunks(2).enumerate() {
        let opcode = instruction[0];
        if table.mnemonic(opcode).is_none() {
            return Err(StructuralError::UnknownOpcode {
                opcode,
                offset: index * 2,
                path: path.join("."),
            });
        }
    }
    Ok(())
}

/// Encodes binary fields as standard padded base64; the engine never wraps lines.
fn encode_binary(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode_binary(text: &str, field: &str, path: &str) -> Result<Vec<u8>, StructuralError> {
    // producers that wrap at 76 columns leave line breaks behind
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|err| StructuralError::invalid_ir(path, format!("{field} is not valid base64: {err}")))
}

/// Returns the JSON form of `literal`, or the (possibly nested) literal that has none.
fn literal_to_json(literal: &Literal) -> Result<JsonValue, &Literal> {
    match literal {
        Literal::None => Ok(JsonValue::Null),
        Literal::Bool(value) => Ok(JsonValue::Bool(*value)),
        Literal::Int(value) => Ok(JsonValue::from(*value)),
        Literal::BigInt(value) => value.to_i64().map(JsonValue::from).ok_or(literal),
        Literal::Float(value) => serde_json::Number::from_f64(*value)
            .map(JsonValue::Number)
            .ok_or(literal),
        Literal::Str(value) => Ok(JsonValue::String(value.clone())),
        Literal::Tuple(items) => items
            .iter()
            .map(literal_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        Literal::Ellipsis | Literal::Complex { .. } | Literal::Bytes(_) | Literal::FrozenSet(_) => Err(literal),
    }
}

/// Number of arrays nested inside `value`, itself included.
fn json_nesting(value: &JsonValue) -> usize {
    match value {
        JsonValue::Array(items) => 1 + items.iter().map(json_nesting).max().unwrap_or(0),
        _ => 0,
    }
}

fn import_code(ir: &IrCode, limits: ExportLimits, path: &mut Vec<String>) -> Result<CodeObject, StructuralError> {
    path.push(ir.co_name.clone());
    let here = path.join(".");
    if path.len() > limits.max_depth {
        return Err(StructuralError::DepthExceeded {
            limit: limits.max_depth,
            path: here,
        });
    }

    let mut constants = Vec::with_capacity(ir.co_consts.len());
    for constant in &ir.co_consts {
        constants.push(match constant {
            IrConstant::Code(nested) => Constant::Code(Box::new(import_code(nested, limits, path)?)),
            IrConstant::Literal { real_type, value } => Constant::Literal(import_literal(real_type, value, &here)?),
        });
    }
    path.pop();

    Ok(CodeObject {
        bytecode: decode_binary(&ir.co_code, "co_code", &here)?,
        line_table: decode_binary(&ir.co_lnotab, "co_lnotab", &here)?,
        constants,
        name: ir.co_name.clone(),
        source_file: ir.co_filename.clone(),
        first_line: ir.co_firstlineno,
        arg_count: ir.co_argcount,
        kwonly_arg_count: ir.co_kwonlyargcount,
        local_count: ir.co_nlocals,
        stack_size: ir.co_stacksize,
        names: ir.co_names.clone(),
        local_names: ir.co_varnames.clone(),
        free_vars: ir.co_freevars.clone(),
        cell_vars: ir.co_cellvars.clone(),
    })
}

fn import_literal(real_type: &str, value: &JsonValue, path: &str) -> Result<Literal, StructuralError> {
    let mismatch = || StructuralError::invalid_ir(path, format!("value {value} does not match type {real_type}"));
    let type_name = type_name_from_tag(real_type)
        .ok_or_else(|| StructuralError::invalid_ir(path, format!("malformed type tag {real_type:?}")))?;
    match type_name {
        "NoneType" => value.is_null().then_some(Literal::None).ok_or_else(mismatch),
        "bool" => value.as_bool().map(Literal::Bool).ok_or_else(mismatch),
        "int" => json_int(value).ok_or_else(mismatch),
        "float" => value.as_f64().map(Literal::Float).ok_or_else(mismatch),
        "str" => value.as_str().map(|s| Literal::Str(s.to_owned())).ok_or_else(mismatch),
        "tuple" => match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| infer_literal(item).ok_or_else(mismatch))
                .collect::<Result<Vec<_>, _>>()
                .map(Literal::Tuple),
            _ => Err(mismatch()),
        },
        _ => Err(StructuralError::invalid_ir(
            path,
            format!("literal type {} cannot appear in IR", type_tag_for(type_name)),
        )),
    }
}

fn json_int(value: &JsonValue) -> Option<Literal> {
    if let Some(int) = value.as_i64() {
        Some(Literal::Int(int))
    } else {
        value.as_u64().map(|int| Literal::BigInt(BigInt::from(int)))
    }
}

/// Tuple elements carry no tag of their own; their type follows from the JSON value.
fn infer_literal(value: &JsonValue) -> Option<Literal> {
    match value {
        JsonValue::Null => Some(Literal::None),
        JsonValue::Bool(value) => Some(Literal::Bool(*value)),
        JsonValue::Number(number) if number.is_f64() => number.as_f64().map(Literal::Float),
        JsonValue::Number(_) => json_int(value),
        JsonValue::String(value) => Some(Literal::Str(value.clone())),
        JsonValue::Array(items) => items.iter().map(infer_literal).collect::<Option<Vec<_>>>().map(Literal::Tuple),
        JsonValue::Object(_) => None,
    }
}
