//! Loading persisted bytecode files (`.pyc`) into [`CodeObject`] trees.
//!
//! A pyc file is a fixed-size header followed by one object in the host runtime's `marshal`
//! format. The header length depends on the magic number: 8 bytes before 3.3, 12 bytes for
//! 3.3 through 3.6 (magic, mtime, source size) and 16 bytes from 3.7 on (PEP 552 flags
//! word). Decoding the payload sits behind the [`CodeDecoder`] seam; [`MarshalDecoder`]
//! understands the code object layouts of CPython 3.0 through 3.10.

use std::{fmt, fs, io, path::Path};

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::code::{CodeObject, Constant, Literal};

/// Set on a type byte when the object is entered in the back-reference table.
const FLAG_REF: u8 = 0x80;

/// Nesting bound for marshal containers and code objects.
///
/// Lower in debug builds, whose decoder frames are several times larger.
#[cfg(debug_assertions)]
pub const MAX_MARSHAL_DEPTH: usize = 100;

/// Nesting bound for marshal containers and code objects.
#[cfg(not(debug_assertions))]
pub const MAX_MARSHAL_DEPTH: usize = 400;

/// A host runtime version as implied by a pyc magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
}

impl PythonVersion {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Maps a magic number to the release line that wrote it.
    #[must_use]
    pub fn from_magic(magic: u16) -> Option<Self> {
        let minor = match magic {
            3000..=3139 => 0,
            3140..=3159 => 1,
            3160..=3189 => 2,
            3190..=3249 => 3,
            3250..=3319 => 4,
            3320..=3359 => 5,
            3360..=3389 => 6,
            3390..=3399 => 7,
            3400..=3419 => 8,
            3420..=3429 => 9,
            3430..=3449 => 10,
            3450..=3499 => 11,
            3500..=3549 => 12,
            _ => return None,
        };
        Some(Self::new(3, minor))
    }

    /// Length of the pyc header preceding the marshal payload.
    #[must_use]
    pub fn header_len(self) -> usize {
        match self.minor {
            0..=2 => 8,
            3..=6 => 12,
            _ => 16,
        }
    }

    /// Whether code objects carry a positional-only argument count (3.8+).
    fn has_posonly_args(self) -> bool {
        self.minor >= 8
    }

    /// Code objects from 3.11 on use a different field layout that is not decoded.
    fn supports_code_layout(self) -> bool {
        self.major == 3 && self.minor <= 10
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The decoded fixed-size header of a pyc file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PycHeader {
    pub magic: u16,
    pub version: PythonVersion,
    pub header_len: usize,
}

/// Error loading a pyc file.
#[derive(Debug)]
pub enum MarshalError {
    /// The file is not a pyc file of a known release.
    BadMagic { magic: [u8; 4] },
    /// The release is recognized but its code layout is not decoded.
    UnsupportedVersion { version: PythonVersion },
    /// The input ended inside an object.
    Truncated { offset: usize },
    /// A type byte that the marshal format does not define.
    UnknownType { code: u8, offset: usize },
    /// A marshal type that is valid but never appears in code objects.
    UnsupportedType { type_name: &'static str, offset: usize },
    /// A back-reference to an index that was never assigned.
    BadReference { index: u32, offset: usize },
    /// A back-reference to an object that is still being decoded (a cycle).
    IncompleteReference { index: u32, offset: usize },
    /// A string payload that is not valid UTF-8 or ASCII.
    InvalidText { offset: usize },
    /// A float or long payload that does not decode to a number.
    InvalidNumber { offset: usize },
    /// A code object field holds the wrong kind of object.
    UnexpectedObject { field: &'static str, found: &'static str },
    /// A code object count field is negative.
    NegativeCount { field: &'static str, value: i32 },
    /// Containers are nested beyond [`MAX_MARSHAL_DEPTH`].
    DepthExceeded { offset: usize },
    /// Reading the file failed.
    Io(io::Error),
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { magic } => write!(f, "not a pyc file: bad magic number {magic:02x?}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "code objects of Python {version} are not supported")
            }
            Self::Truncated { offset } => write!(f, "marshal data truncated at offset {offset}"),
            Self::UnknownType { code, offset } => {
                write!(f, "unknown marshal type 0x{code:02x} at offset {offset}")
            }
            Self::UnsupportedType { type_name, offset } => {
                write!(f, "unsupported marshal type {type_name} at offset {offset}")
            }
            Self::BadReference { index, offset } => {
                write!(f, "invalid back-reference {index} at offset {offset}")
            }
            Self::IncompleteReference { index, offset } => {
                write!(f, "back-reference {index} at offset {offset} points at an unfinished object")
            }
            Self::InvalidText { offset } => write!(f, "invalid string data at offset {offset}"),
            Self::InvalidNumber { offset } => write!(f, "invalid numeric data at offset {offset}"),
            Self::UnexpectedObject { field, found } => write!(f, "expected {field}, found {found}"),
            Self::NegativeCount { field, value } => write!(f, "negative {field}: {value}"),
            Self::DepthExceeded { offset } => {
                write!(f, "marshal data nested deeper than {MAX_MARSHAL_DEPTH} at offset {offset}")
            }
            Self::Io(err) => write!(f, "failed to read pyc file: {err}"),
        }
    }
}

impl std::error::Error for MarshalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MarshalError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Decodes the payload that follows a pyc header into a code-object tree.
pub trait CodeDecoder {
    fn decode(&self, version: PythonVersion, payload: &[u8]) -> Result<CodeObject, MarshalError>;
}

/// [`CodeDecoder`] for the host runtime's marshal format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarshalDecoder;

impl CodeDecoder for MarshalDecoder {
    fn decode(&self, version: PythonVersion, payload: &[u8]) -> Result<CodeObject, MarshalError> {
        if !version.supports_code_layout() {
            return Err(MarshalError::UnsupportedVersion { version });
        }
        let mut reader = Reader::new(payload, version);
        match reader.read_object()? {
            Obj::Code(code) => Ok(*code),
            other => Err(MarshalError::UnexpectedObject {
                field: "a code object",
                found: other.kind_name(),
            }),
        }
    }
}

/// Reads and validates the fixed-size header.
pub fn parse_header(bytes: &[u8]) -> Result<PycHeader, MarshalError> {
    let Some(magic_bytes) = bytes.get(..4) else {
        return Err(MarshalError::Truncated { offset: bytes.len() });
    };
    let magic_bytes = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
    if magic_bytes[2..] != *b"\r\n" {
        return Err(MarshalError::BadMagic { magic: magic_bytes });
    }
    let magic = u16::from_le_bytes([magic_bytes[0], magic_bytes[1]]);
    let version = PythonVersion::from_magic(magic).ok_or(MarshalError::BadMagic { magic: magic_bytes })?;
    let header_len = version.header_len();
    if bytes.len() < header_len {
        return Err(MarshalError::Truncated { offset: bytes.len() });
    }
    Ok(PycHeader {
        magic,
        version,
        header_len,
    })
}

/// Loads a pyc image with the marshal decoder.
pub fn load_pyc(bytes: &[u8]) -> Result<CodeObject, MarshalError> {
    load_pyc_with(bytes, &MarshalDecoder)
}

/// Loads a pyc image: skips the header, then hands the payload to `decoder`.
pub fn load_pyc_with<D: CodeDecoder>(bytes: &[u8], decoder: &D) -> Result<CodeObject, MarshalError> {
    let header = parse_header(bytes)?;
    tracing::debug!(magic = header.magic, version = %header.version, header_len = header.header_len, "read pyc header");
    decoder.decode(header.version, &bytes[header.header_len..])
}

/// Reads and loads a pyc file from disk.
pub fn read_pyc(path: impl AsRef<Path>) -> Result<CodeObject, MarshalError> {
    let bytes = fs::read(path)?;
    load_pyc(&bytes)
}

/// A decoded marshal object before it is placed in the code-object model.
#[derive(Debug, Clone)]
enum Obj {
    /// The terminator of dict entries.
    Null,
    Literal(Literal),
    Code(Box<CodeObject>),
    Tuple(Vec<Obj>),
    FrozenSet(Vec<Obj>),
    /// A mutable container (list, dict, set); decoded for reference numbering only.
    Container(&'static str),
}

impl Obj {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Literal(literal) => literal.type_name(),
            Self::Code(_) => "code",
            Self::Tuple(_) => "tuple",
            Self::FrozenSet(_) => "frozenset",
            Self::Container(kind) => *kind,
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    version: PythonVersion,
    /// Back-reference table; `None` marks an object still being decoded.
    refs: Vec<Option<Obj>>,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], version: PythonVersion) -> Self {
        Self {
            data,
            pos: 0,
            version,
            refs: Vec::new(),
            depth: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MarshalError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(MarshalError::Truncated { offset: self.data.len() })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, MarshalError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, MarshalError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, MarshalError> {
        let bytes = self.take(8)?;
        let mut buf = [0; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    fn read_len(&mut self) -> Result<usize, MarshalError> {
        let len = self.read_u32()?;
        usize::try_from(len).map_err(|_| MarshalError::Truncated { offset: self.pos })
    }

    /// Text-encoded float used by marshal version 0 and 1 (`f` / `x`).
    fn read_text_float(&mut self) -> Result<f64, MarshalError> {
        let offset = self.pos;
        let len = usize::from(self.read_u8()?);
        let text = std::str::from_utf8(self.take(len)?).map_err(|_| MarshalError::InvalidText { offset })?;
        parse_float_text(text).ok_or(MarshalError::InvalidNumber { offset })
    }

    fn read_text(&mut self, len: usize) -> Result<String, MarshalError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MarshalError::InvalidText { offset })
    }

    fn read_ascii(&mut self, len: usize) -> Result<String, MarshalError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        if !bytes.is_ascii() {
            return Err(MarshalError::InvalidText { offset });
        }
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }

    fn read_long(&mut self) -> Result<Literal, MarshalError> {
        let offset = self.pos;
        let size = self.read_i32()?;
        let digits = usize::try_from(size.unsigned_abs()).map_err(|_| MarshalError::InvalidNumber { offset })?;
        let mut value = BigInt::from(0);
        let mut raw = Vec::with_capacity(digits.min(1024));
        for _ in 0..digits {
            let bytes = self.take(2)?;
            let digit = u16::from_le_bytes([bytes[0], bytes[1]]);
            if digit >= 1 << 15 {
                return Err(MarshalError::InvalidNumber { offset });
            }
            raw.push(digit);
        }
        // digits are stored least significant first, 15 bits each
        for &digit in raw.iter().rev() {
            value = (value << 15u32) + BigInt::from(digit);
        }
        if size < 0 {
            value = -value;
        }
        Ok(match value.to_i64() {
            Some(small) => Literal::Int(small),
            None => Literal::BigInt(value),
        })
    }

    fn read_items(&mut self, count: usize) -> Result<Vec<Obj>, MarshalError> {
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn read_object(&mut self) -> Result<Obj, MarshalError> {
        let offset = self.pos;
        if self.depth >= MAX_MARSHAL_DEPTH {
            return Err(MarshalError::DepthExceeded { offset });
        }
        self.depth += 1;
        let result = self.read_object_inner(offset);
        self.depth -= 1;
        result
    }

    fn read_object_inner(&mut self, offset: usize) -> Result<Obj, MarshalError> {
        let code = self.read_u8()?;
        let flagged = code & FLAG_REF != 0;
        let type_code = code & !FLAG_REF;

        if type_code == b'r' {
            let index = self.read_u32()?;
            let slot = usize::try_from(index)
                .ok()
                .and_then(|i| self.refs.get(i))
                .ok_or(MarshalError::BadReference { index, offset })?;
            return slot.clone().ok_or(MarshalError::IncompleteReference { index, offset });
        }

        // the slot is reserved before contents are read so nested references see the
        // same indices the writer assigned
        let slot = if flagged {
            self.refs.push(None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let obj = match type_code {
            b'0' => Obj::Null,
            b'N' => Obj::Literal(Literal::None),
            b'F' => Obj::Literal(Literal::Bool(false)),
            b'T' => Obj::Literal(Literal::Bool(true)),
            b'.' => Obj::Literal(Literal::Ellipsis),
            b'S' => {
                return Err(MarshalError::UnsupportedType {
                    type_name: "StopIteration",
                    offset,
                });
            }
            b'i' => Obj::Literal(Literal::Int(i64::from(self.read_i32()?))),
            b'l' => Obj::Literal(self.read_long()?),
            b'g' => Obj::Literal(Literal::Float(self.read_f64()?)),
            b'f' => Obj::Literal(Literal::Float(self.read_text_float()?)),
            b'y' => {
                let real = self.read_f64()?;
                let imag = self.read_f64()?;
                Obj::Literal(Literal::Complex { real, imag })
            }
            b'x' => {
                let real = self.read_text_float()?;
                let imag = self.read_text_float()?;
                Obj::Literal(Literal::Complex { real, imag })
            }
            b's' => {
                let len = self.read_len()?;
                Obj::Literal(Literal::Bytes(self.take(len)?.to_vec()))
            }
            b't' | b'u' => {
                let len = self.read_len()?;
                Obj::Literal(Literal::Str(self.read_text(len)?))
            }
            b'a' | b'A' => {
                let len = self.read_len()?;
                Obj::Literal(Literal::Str(self.read_ascii(len)?))
            }
            b'z' | b'Z' => {
                let len = usize::from(self.read_u8()?);
                Obj::Literal(Literal::Str(self.read_ascii(len)?))
            }
            b'(' => {
                let len = self.read_len()?;
                Obj::Tuple(self.read_items(len)?)
            }
            b')' => {
                let len = usize::from(self.read_u8()?);
                Obj::Tuple(self.read_items(len)?)
            }
            b'[' => {
                let len = self.read_len()?;
                self.read_items(len)?;
                Obj::Container("list")
            }
            b'<' => {
                let len = self.read_len()?;
                self.read_items(len)?;
                Obj::Container("set")
            }
            b'>' => {
                let len = self.read_len()?;
                Obj::FrozenSet(self.read_items(len)?)
            }
            b'{' => {
                while !matches!(self.read_object()?, Obj::Null) {
                    self.read_object()?;
                }
                Obj::Container("dict")
            }
            b'c' => Obj::Code(Box::new(self.read_code()?)),
            _ => return Err(MarshalError::UnknownType { code, offset }),
        };

        if let Some(slot) = slot {
            self.refs[slot] = Some(obj.clone());
        }
        Ok(obj)
    }

    fn read_count(&mut self, field: &'static str) -> Result<u32, MarshalError> {
        let value = self.read_i32()?;
        u32::try_from(value).map_err(|_| MarshalError::NegativeCount { field, value })
    }

    fn read_code(&mut self) -> Result<CodeObject, MarshalError> {
        let arg_count = self.read_count("co_argcount")?;
        if self.version.has_posonly_args() {
            // folded into co_argcount by the runtime itself; not represented
            self.read_count("co_posonlyargcount")?;
        }
        let kwonly_arg_count = self.read_count("co_kwonlyargcount")?;
        let local_count = self.read_count("co_nlocals")?;
        let stack_size = self.read_count("co_stacksize")?;
        let _flags = self.read_i32()?;
        let bytecode = expect_bytes(self.read_object()?, "co_code")?;
        let constants = expect_tuple(self.read_object()?, "co_consts")?
            .into_iter()
            .map(into_constant)
            .collect::<Result<Vec<_>, _>>()?;
        let names = expect_names(self.read_object()?, "co_names")?;
        let local_names = expect_names(self.read_object()?, "co_varnames")?;
        let free_vars = expect_names(self.read_object()?, "co_freevars")?;
        let cell_vars = expect_names(self.read_object()?, "co_cellvars")?;
        let source_file = expect_str(self.read_object()?, "co_filename")?;
        let name = expect_str(self.read_object()?, "co_name")?;
        let first_line = self.read_count("co_firstlineno")?;
        let line_table = expect_bytes(self.read_object()?, "co_lnotab")?;

        tracing::trace!(%name, constants = constants.len(), "decoded code object");
        Ok(CodeObject {
            bytecode,
            line_table,
            constants,
            name,
            source_file,
            first_line,
            arg_count,
            kwonly_arg_count,
            local_count,
            stack_size,
            names,
            local_names,
            free_vars,
            cell_vars,
        })
    }
}

/// Parses the `repr()`-style text floats of old marshal versions, including `inf`/`nan`.
fn parse_float_text(text: &str) -> Option<f64> {
    match text {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

fn expect_bytes(obj: Obj, field: &'static str) -> Result<Vec<u8>, MarshalError> {
    match obj {
        Obj::Literal(Literal::Bytes(bytes)) => Ok(bytes),
        other => Err(MarshalError::UnexpectedObject {
            field,
            found: other.kind_name(),
        }),
    }
}

fn expect_str(obj: Obj, field: &'static str) -> Result<String, MarshalError> {
    match obj {
        Obj::Literal(Literal::Str(text)) => Ok(text),
        other => Err(MarshalError::UnexpectedObject {
            field,
            found: other.kind_name(),
        }),
    }
}

fn expect_tuple(obj: Obj, field: &'static str) -> Result<Vec<Obj>, MarshalError> {
    match obj {
        Obj::Tuple(items) => Ok(items),
        other => Err(MarshalError::UnexpectedObject {
            field,
            found: other.kind_name(),
        }),
    }
}

fn expect_names(obj: Obj, field: &'static str) -> Result<Vec<String>, MarshalError> {
    expect_tuple(obj, field)?
        .into_iter()
        .map(|item| expect_str(item, field))
        .collect()
}

fn into_constant(obj: Obj) -> Result<Constant, MarshalError> {
    match obj {
        Obj::Code(code) => Ok(Constant::Code(code)),
        other => into_literal(other).map(Constant::Literal),
    }
}

fn into_literal(obj: Obj) -> Result<Literal, MarshalError> {
    match obj {
        Obj::Literal(literal) => Ok(literal),
        Obj::Tuple(items) => items
            .into_iter()
            .map(into_literal)
            .collect::<Result<_, _>>()
            .map(Literal::Tuple),
        Obj::FrozenSet(items) => items
            .into_iter()
            .map(into_literal)
            .collect::<Result<_, _>>()
            .map(Literal::FrozenSet),
        other => Err(MarshalError::UnexpectedObject {
            field: "a constant",
            found: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(version: PythonVersion, data: &[u8]) -> Result<Obj, MarshalError> {
        Reader::new(data, version).read_object()
    }

    const V36: PythonVersion = PythonVersion::new(3, 6);

    #[test]
    fn header_length_follows_magic() {
        assert_eq!(PythonVersion::from_magic(3379), Some(PythonVersion::new(3, 6)));
        assert_eq!(PythonVersion::new(3, 6).header_len(), 12);
        assert_eq!(PythonVersion::new(3, 7).header_len(), 16);
        assert_eq!(PythonVersion::new(3, 2).header_len(), 8);
        assert_eq!(PythonVersion::from_magic(62211), None);
        assert_eq!(PythonVersion::from_magic(3131), Some(PythonVersion::new(3, 0)));
        assert_eq!(PythonVersion::from_magic(3151), Some(PythonVersion::new(3, 1)));
        assert_eq!(PythonVersion::from_magic(3180), Some(PythonVersion::new(3, 2)));
        assert_eq!(PythonVersion::new(3, 0).header_len(), 8);
    }

    #[test]
    fn decodes_longs() {
        // 2**15 + 1 is two digits: [1, 1]
        let data = [b'l', 2, 0, 0, 0, 1, 0, 1, 0];
        assert!(matches!(read(V36, &data), Ok(Obj::Literal(Literal::Int(32769)))));

        let negative = [b'l', 0xff, 0xff, 0xff, 0xff, 5, 0];
        assert!(matches!(read(V36, &negative), Ok(Obj::Literal(Literal::Int(-5)))));

        let mut huge = vec![b'l', 5, 0, 0, 0];
        huge.extend([0xff, 0x7f].repeat(5));
        assert!(matches!(read(V36, &huge), Ok(Obj::Literal(Literal::BigInt(_)))));
    }

    #[test]
    fn resolves_back_references() {
        // a flagged short ascii string followed by a small tuple referencing it twice
        let data = [
            b')', 3, b'z' | FLAG_REF, 1, b'x', b'r', 0, 0, 0, 0, b'r', 0, 0, 0, 0,
        ];
        let Ok(Obj::Tuple(items)) = read(V36, &data) else {
            panic!("expected tuple");
        };
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| matches!(item, Obj::Literal(Literal::Str(s)) if s == "x")));
    }

    #[test]
    fn rejects_references_to_unfinished_objects() {
        let data = [b')' | FLAG_REF, 1, b'r', 0, 0, 0, 0];
        assert!(matches!(
            read(V36, &data),
            Err(MarshalError::IncompleteReference { index: 0, .. })
        ));
        let data = [b'r', 3, 0, 0, 0];
        assert!(matches!(read(V36, &data), Err(MarshalError::BadReference { index: 3, .. })));
    }

    #[test]
    fn reports_truncation_and_unknown_types() {
        assert!(matches!(read(V36, &[b'i', 1, 0]), Err(MarshalError::Truncated { .. })));
        assert!(matches!(
            read(V36, &[b'?']),
            Err(MarshalError::UnknownType { code: b'?', offset: 0 })
        ));
    }

    #[test]
    fn guards_nesting_depth() {
        let mut data = Vec::new();
        for _ in 0..=MAX_MARSHAL_DEPTH {
            data.extend([b')', 1]);
        }
        data.push(b'N');
        assert!(matches!(read(V36, &data), Err(MarshalError::DepthExceeded { .. })));

        // one level less fits
        let inner = &data[2..];
        assert!(matches!(read(V36, inner), Ok(Obj::Tuple(_))));
    }

    #[test]
    fn text_floats() {
        let data = [b'f', 3, b'1', b'.', b'5'];
        assert!(matches!(read(V36, &data), Ok(Obj::Literal(Literal::Float(v))) if v == 1.5));
        assert_eq!(parse_float_text("-inf"), Some(f64::NEG_INFINITY));
    }
}
