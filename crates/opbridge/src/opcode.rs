//! The opcode catalog shared by the exporter, the table generator and the disassembler.
//!
//! Generation and validation are pure functions of the [`OpcodeTable`] they are handed.
//! Entry `i` always has code `i`, so codes are unique and contiguous from zero.

use std::{collections::HashMap, fmt, fs, io, path::Path};

use crate::marshal::PythonVersion;

/// Mnemonics starting with this character are placeholder slots.
pub const PSEUDO_SENTINEL: char = '<';

/// Opcodes are single bytes, so a table never has more slots than this.
pub const MAX_OPCODES: usize = 256;

/// `HAVE_ARGUMENT` of the CPython 3.6 opcode table.
pub const CPYTHON36_HAVE_ARGUMENT: u8 = 90;

/// Returns the operand length in bytes for `code` given the table's operand threshold.
#[must_use]
pub const fn operand_length(code: u8, has_operand_from: u8) -> u8 {
    if code >= has_operand_from { 2 } else { 0 }
}

/// One slot of the opcode table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct OpcodeEntry {
    pub mnemonic: String,
    pub code: u8,
}

impl OpcodeEntry {
    /// Whether this slot is a placeholder rather than a real instruction.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.mnemonic.starts_with(PSEUDO_SENTINEL)
    }
}

/// Error building or loading an [`OpcodeTable`].
#[derive(Debug)]
pub enum OpcodeTableError {
    /// The table has no entries.
    Empty,
    /// More entries than single-byte opcodes can address.
    TooManyEntries { count: usize },
    /// Two real instructions share a mnemonic.
    DuplicateMnemonic { mnemonic: String, first: u8, second: u8 },
    /// A real instruction's mnemonic cannot be emitted as a C identifier.
    InvalidMnemonic { code: u8, mnemonic: String },
    /// The table file is not valid JSON of the expected shape.
    Json(serde_json::Error),
    /// The table file could not be read.
    Io(io::Error),
}

impl fmt::Display for OpcodeTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("opcode table is empty"),
            Self::TooManyEntries { count } => {
                write!(f, "opcode table has {count} entries, at most {MAX_OPCODES} are addressable")
            }
            Self::DuplicateMnemonic { mnemonic, first, second } => {
                write!(f, "mnemonic {mnemonic} is used by both {first} and {second}")
            }
            Self::InvalidMnemonic { code, mnemonic } => {
                write!(f, "mnemonic {mnemonic:?} for opcode {code} is not a valid identifier")
            }
            Self::Json(err) => write!(f, "invalid opcode table file: {err}"),
            Self::Io(err) => write!(f, "failed to read opcode table: {err}"),
        }
    }
}

impl std::error::Error for OpcodeTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// On-disk form of a table: a dump of `dis.opname` and `dis.HAVE_ARGUMENT`.
#[derive(Debug, serde::Deserialize)]
struct OpcodeTableFile {
    #[serde(alias = "has_operand_from")]
    have_argument: u8,
    opnames: Vec<String>,
}

/// An ordered, validated opcode catalog plus the operand threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeTable {
    entries: Vec<OpcodeEntry>,
    has_operand_from: u8,
    by_mnemonic: HashMap<String, u8>,
}

impl OpcodeTable {
    /// Builds a table from mnemonics in code order.
    ///
    /// Real mnemonics must be unique C identifiers; placeholder slots (leading `<`) may
    /// repeat and are never looked up by name.
    pub fn new<I, S>(mnemonics: I, has_operand_from: u8) -> Result<Self, OpcodeTableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mnemonics: Vec<String> = mnemonics.into_iter().map(Into::into).collect();
        if mnemonics.is_empty() {
            return Err(OpcodeTableError::Empty);
        }
        if mnemonics.len() > MAX_OPCODES {
            return Err(OpcodeTableError::TooManyEntries { count: mnemonics.len() });
        }

        let mut entries = Vec::with_capacity(mnemonics.len());
        let mut by_mnemonic = HashMap::new();
        for (code, mnemonic) in (0..=u8::MAX).zip(mnemonics) {
            let entry = OpcodeEntry { mnemonic, code };
            if !entry.is_pseudo() {
                if !is_identifier(&entry.mnemonic) {
                    return Err(OpcodeTableError::InvalidMnemonic {
                        code,
                        mnemonic: entry.mnemonic,
                    });
                }
                if let Some(&first) = by_mnemonic.get(&entry.mnemonic) {
                    return Err(OpcodeTableError::DuplicateMnemonic {
                        mnemonic: entry.mnemonic,
                        first,
                        second: code,
                    });
                }
                by_mnemonic.insert(entry.mnemonic.clone(), code);
            }
            entries.push(entry);
        }

        Ok(Self {
            entries,
            has_operand_from,
            by_mnemonic,
        })
    }

    /// Parses a table from the JSON form `{"have_argument": N, "opnames": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, OpcodeTableError> {
        let file: OpcodeTableFile = serde_json::from_str(json).map_err(OpcodeTableError::Json)?;
        Self::new(file.opnames, file.have_argument)
    }

    /// Reads a JSON table file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OpcodeTableError> {
        let json = fs::read_to_string(path).map_err(OpcodeTableError::Io)?;
        Self::from_json(&json)
    }

    /// The CPython 3.6 opcode table: 256 slots, 118 real instructions, `HAVE_ARGUMENT` 90.
    #[must_use]
    pub fn cpython36() -> Self {
        let mut mnemonics: Vec<String> = (0..MAX_OPCODES).map(|code| format!("<{code}>")).collect();
        for &(code, name) in CPYTHON36_OPCODES {
            mnemonics[usize::from(code)] = name.to_owned();
        }
        match Self::new(mnemonics, CPYTHON36_HAVE_ARGUMENT) {
            Ok(table) => table,
            Err(err) => unreachable!("built-in opcode table is valid: {err}"),
        }
    }

    /// The built-in table matching bytecode written by `version`, if there is one.
    ///
    /// Only CPython 3.6 is built in; other releases renumber or add opcodes and need a table
    /// loaded with [`OpcodeTable::load`].
    #[must_use]
    pub fn for_version(version: PythonVersion) -> Option<Self> {
        (version == PythonVersion::new(3, 6)).then(Self::cpython36)
    }

    /// All slots in code order.
    #[must_use]
    pub fn entries(&self) -> &[OpcodeEntry] {
        &self.entries
    }

    /// Number of slots, including placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The smallest code that carries an operand.
    #[must_use]
    pub fn has_operand_from(&self) -> u8 {
        self.has_operand_from
    }

    #[must_use]
    pub fn get(&self, code: u8) -> Option<&OpcodeEntry> {
        self.entries.get(usize::from(code))
    }

    /// The mnemonic of a real instruction; `None` for placeholders and codes past the end.
    #[must_use]
    pub fn mnemonic(&self, code: u8) -> Option<&str> {
        self.get(code)
            .filter(|entry| !entry.is_pseudo())
            .map(|entry| entry.mnemonic.as_str())
    }

    #[must_use]
    pub fn code_of(&self, mnemonic: &str) -> Option<u8> {
        self.by_mnemonic.get(mnemonic).copied()
    }

    /// Real instructions in code order.
    pub fn named(&self) -> impl Iterator<Item = &OpcodeEntry> {
        self.entries.iter().filter(|entry| !entry.is_pseudo())
    }

    #[must_use]
    pub fn operand_length(&self, code: u8) -> u8 {
        operand_length(code, self.has_operand_from)
    }

    #[must_use]
    pub fn has_operand(&self, code: u8) -> bool {
        self.operand_length(code) > 0
    }
}

/// Whether `name` can be emitted as a C/C++ identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const CPYTHON36_OPCODES: &[(u8, &str)] = &[
    (1, "POP_TOP"),
    (2, "ROT_TWO"),
    (3, "ROT_THREE"),
    (4, "DUP_TOP"),
    (5, "DUP_TOP_TWO"),
    (9, "NOP"),
    (10, "UNARY_POSITIVE"),
    (11, "UNARY_NEGATIVE"),
    (12, "UNARY_NOT"),
    (15, "UNARY_INVERT"),
    (16, "BINARY_MATRIX_MULTIPLY"),
    (17, "INPLACE_MATRIX_MULTIPLY"),
    (19, "BINARY_POWER"),
    (20, "BINARY_MULTIPLY"),
    (22, "BINARY_MODULO"),
    (23, "BINARY_ADD"),
    (24, "BINARY_SUBTRACT"),
    (25, "BINARY_SUBSCR"),
    (26, "BINARY_FLOOR_DIVIDE"),
    (27, "BINARY_TRUE_DIVIDE"),
    (28, "INPLACE_FLOOR_DIVIDE"),
    (29, "INPLACE_TRUE_DIVIDE"),
    (50, "GET_AITER"),
    (51, "GET_ANEXT"),
    (52, "BEFORE_ASYNC_WITH"),
    (55, "INPLACE_ADD"),
    (56, "INPLACE_SUBTRACT"),
    (57, "INPLACE_MULTIPLY"),
    (59, "INPLACE_MODULO"),
    (60, "STORE_SUBSCR"),
    (61, "DELETE_SUBSCR"),
    (62, "BINARY_LSHIFT"),
    (63, "BINARY_RSHIFT"),
    (64, "BINARY_AND"),
    (65, "BINARY_XOR"),
    (66, "BINARY_OR"),
    (67, "INPLACE_POWER"),
    (68, "GET_ITER"),
    (69, "GET_YIELD_FROM_ITER"),
    (70, "PRINT_EXPR"),
    (71, "LOAD_BUILD_CLASS"),
    (72, "YIELD_FROM"),
    (73, "GET_AWAITABLE"),
    (75, "INPLACE_LSHIFT"),
    (76, "INPLACE_RSHIFT"),
    (77, "INPLACE_AND"),
    (78, "INPLACE_XOR"),
    (79, "INPLACE_OR"),
    (80, "BREAK_LOOP"),
    (81, "WITH_CLEANUP_START"),
    (82, "WITH_CLEANUP_FINISH"),
    (83, "RETURN_VALUE"),
    (84, "IMPORT_STAR"),
    (85, "SETUP_ANNOTATIONS"),
    (86, "YIELD_VALUE"),
    (87, "POP_BLOCK"),
    (88, "END_FINALLY"),
    (89, "POP_EXCEPT"),
    (90, "STORE_NAME"),
    (91, "DELETE_NAME"),
    (92, "UNPACK_SEQUENCE"),
    (93, "FOR_ITER"),
    (94, "UNPACK_EX"),
    (95, "STORE_ATTR"),
    (96, "DELETE_ATTR"),
    (97, "STORE_GLOBAL"),
    (98, "DELETE_GLOBAL"),
    (100, "LOAD_CONST"),
    (101, "LOAD_NAME"),
    (102, "BUILD_TUPLE"),
    (103, "BUILD_LIST"),
    (104, "BUILD_SET"),
    (105, "BUILD_MAP"),
    (106, "LOAD_ATTR"),
    (107, "COMPARE_OP"),
    (108, "IMPORT_NAME"),
    (109, "IMPORT_FROM"),
    (110, "JUMP_FORWARD"),
    (111, "JUMP_IF_FALSE_OR_POP"),
    (112, "JUMP_IF_TRUE_OR_POP"),
    (113, "JUMP_ABSOLUTE"),
    (114, "POP_JUMP_IF_FALSE"),
    (115, "POP_JUMP_IF_TRUE"),
    (116, "LOAD_GLOBAL"),
    (119, "CONTINUE_LOOP"),
    (120, "SETUP_LOOP"),
    (121, "SETUP_EXCEPT"),
    (122, "SETUP_FINALLY"),
    (124, "LOAD_FAST"),
    (125, "STORE_FAST"),
    (126, "DELETE_FAST"),
    (127, "STORE_ANNOTATION"),
    (130, "RAISE_VARARGS"),
    (131, "CALL_FUNCTION"),
    (132, "MAKE_FUNCTION"),
    (133, "BUILD_SLICE"),
    (135, "LOAD_CLOSURE"),
    (136, "LOAD_DEREF"),
    (137, "STORE_DEREF"),
    (138, "DELETE_DEREF"),
    (141, "CALL_FUNCTION_KW"),
    (142, "CALL_FUNCTION_EX"),
    (143, "SETUP_WITH"),
    (144, "EXTENDED_ARG"),
    (145, "LIST_APPEND"),
    (146, "SET_ADD"),
    (147, "MAP_ADD"),
    (148, "LOAD_CLASSDEREF"),
    (149, "BUILD_LIST_UNPACK"),
    (150, "BUILD_MAP_UNPACK"),
    (151, "BUILD_MAP_UNPACK_WITH_CALL"),
    (152, "BUILD_TUPLE_UNPACK"),
    (153, "BUILD_SET_UNPACK"),
    (154, "SETUP_ASYNC_WITH"),
    (155, "FORMAT_VALUE"),
    (156, "BUILD_CONST_KEY_MAP"),
    (157, "BUILD_STRING"),
    (158, "BUILD_TUPLE_UNPACK_WITH_CALL"),
];
