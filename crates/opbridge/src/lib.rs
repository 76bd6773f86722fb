//! Interchange between CPython code objects and an external bytecode VM.
//!
//! - [`export`] turns a [`CodeObject`] tree into the JSON IR the VM loads, and reads it back.
//! - [`codegen`] emits the C++ opcode constants the VM is compiled against, from an
//!   [`OpcodeTable`].
//! - [`marshal`] loads `.pyc` files so trees can be exported without a Python runtime.
//! - [`disasm`] renders `dis`-style listings of a tree.
//! - [`trace`] parses the VM's execution logs into per-opcode timings.
//!
//! ```
//! use opbridge::{CodeObject, Literal, export};
//!
//! let mut code = CodeObject::new("<module>", "demo.py");
//! code.constants.push(Literal::Int(42).into());
//! let json = export(&code).unwrap().to_json(false).unwrap();
//! assert!(json.starts_with(r#"{"type":"code","co_code":"""#));
//! ```

pub mod code;
pub mod codegen;
pub mod disasm;
mod error;
pub mod export;
pub mod marshal;
pub mod opcode;
pub mod trace;

pub use crate::{
    code::{CodeObject, Constant, ConstantKind, Literal},
    codegen::{CodegenError, GeneratedTables, GeneratorConfig, generate},
    disasm::{Disassembly, disassemble},
    error::{FormatError, RecordSkipped, ReportGap, SkipReason, StructuralError},
    export::{DEFAULT_MAX_CODE_DEPTH, ExportLimits, Exporter, IrDocument, MAX_IR_CODE_DEPTH, export},
    marshal::{CodeDecoder, MarshalDecoder, MarshalError, PythonVersion, load_pyc, read_pyc},
    opcode::{OpcodeEntry, OpcodeTable, OpcodeTableError},
    trace::{CsvAggregator, CsvReport, EventCategory, TimingReport, TraceEvent, TraceParser, analyze},
};
