//! Error taxonomy shared by the exporter and the trace tooling.
//!
//! Fatal conditions ([`StructuralError`], [`FormatError`]) abort the operation that raised
//! them. Recoverable conditions ([`RecordSkipped`], [`ReportGap`]) are plain values that the
//! permissive CSV aggregator accumulates next to its partial report.

use std::{fmt, io};

/// Malformed or unsupported input to the exporter or the IR importer.
///
/// `path` is the dotted chain of code-object names from the root to the offending unit,
/// e.g. `<module>.outer.<lambda>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// A literal constant has no representation in the IR, or nests too deeply for a
    /// document to carry it.
    UnsupportedLiteral { type_tag: String, path: String },
    /// Code objects are nested deeper than the configured limit.
    DepthExceeded { limit: usize, path: String },
    /// An instruction uses an opcode that is not a named slot of the validation table.
    UnknownOpcode { opcode: u8, offset: usize, path: String },
    /// An IR document could not be turned back into a code object.
    InvalidIr { path: String, message: String },
}

impl StructuralError {
    pub(crate) fn invalid_ir(path: &str, message: impl Into<String>) -> Self {
        Self::InvalidIr {
            path: path.to_owned(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedLiteral { type_tag, path } => {
                write!(f, "unsupported literal type {type_tag} in {path}")
            }
            Self::DepthExceeded { limit, path } => {
                write!(f, "code object nesting exceeds limit of {limit} at {path}")
            }
            Self::UnknownOpcode { opcode, offset, path } => {
                write!(f, "unknown opcode 0x{opcode:02x} at offset {offset} in {path}")
            }
            Self::InvalidIr { path, message } => write!(f, "invalid IR at {path}: {message}"),
        }
    }
}

impl std::error::Error for StructuralError {}

/// Fatal error in the strict trace log parser.
///
/// The trace format is a closed contract between the VM and the analyzer, so nothing here
/// is recoverable. Line numbers are 1-based.
#[derive(Debug)]
pub enum FormatError {
    /// A line inside a dump block matched none of the known prefixes.
    UnrecognizedLine { line: usize, content: String },
    /// A data line has no `:` separating the label from its fields.
    MissingSeparator { line: usize, content: String },
    /// A data line has fewer fields than its event kind requires.
    MissingField { line: usize, content: String },
    /// The trailing field of a data line is not an integer tick count.
    InvalidTimestamp { line: usize, value: String },
    /// Reading the log failed.
    Io(io::Error),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedLine { line, content } => {
                write!(f, "line {line}: unknown line contents {content:?}")
            }
            Self::MissingSeparator { line, content } => {
                write!(f, "line {line}: missing ':' separator in {content:?}")
            }
            Self::MissingField { line, content } => {
                write!(f, "line {line}: missing field in {content:?}")
            }
            Self::InvalidTimestamp { line, value } => {
                write!(f, "line {line}: invalid timestamp {value:?}")
            }
            Self::Io(err) => write!(f, "failed to read trace log: {err}"),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Why a CSV row was left out of the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The row has fewer than the three fields needed for a key and a duration.
    TooFewFields { found: usize },
    /// The trailing field is not a finite number. `key` is the row's trimmed second field.
    InvalidDuration { key: String, value: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewFields { found } => write!(f, "expected at least 3 fields, found {found}"),
            Self::InvalidDuration { key, value } => write!(f, "invalid duration {value:?} for {key:?}"),
        }
    }
}

/// A malformed CSV row that was counted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSkipped {
    /// 1-based line number of the row.
    pub line: usize,
    pub reason: SkipReason,
}

impl fmt::Display for RecordSkipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped line {}: {}", self.line, self.reason)
    }
}

/// A category that has no valid samples at report time, so it has no mean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportGap {
    pub category: String,
}

impl fmt::Display for ReportGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no valid samples for category {:?}", self.category)
    }
}
