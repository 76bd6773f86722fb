//! The compiled code-object tree consumed by the exporter.
//!
//! A [`CodeObject`] owns its nested code objects through [`Constant::Code`] slots, so the
//! structure is always a tree. Whether a constant is a nested unit or a literal is decided
//! once, when the tree is built (by the marshal loader or the IR importer), and never
//! re-inspected at export time.

use std::fmt::{self, Write};

use num_bigint::BigInt;

/// One compiled unit: a module body, a function, a class body or a comprehension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeObject {
    /// Raw instruction stream.
    pub bytecode: Vec<u8>,
    /// Offset-to-line mapping, opaque to everything but the disassembler.
    pub line_table: Vec<u8>,
    /// Constant pool in load order.
    pub constants: Vec<Constant>,
    pub name: String,
    pub source_file: String,
    /// Source line of the first instruction, the base the line table is relative to.
    pub first_line: u32,
    pub arg_count: u32,
    pub kwonly_arg_count: u32,
    pub local_count: u32,
    pub stack_size: u32,
    /// Global and attribute names referenced by the bytecode.
    pub names: Vec<String>,
    /// Argument and local variable names.
    pub local_names: Vec<String>,
    pub free_vars: Vec<String>,
    pub cell_vars: Vec<String>,
}

impl CodeObject {
    /// Creates an empty code object with the given name and source file.
    #[must_use]
    pub fn new(name: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            ..Self::default()
        }
    }

    /// Iterates over the code objects directly nested in this one's constant pool.
    pub fn nested(&self) -> impl Iterator<Item = &Self> {
        self.constants.iter().filter_map(|constant| match constant {
            Constant::Code(code) => Some(code.as_ref()),
            Constant::Literal(_) => None,
        })
    }

    /// Total number of code objects in the tree rooted here, including this one.
    #[must_use]
    pub fn tree_size(&self) -> usize {
        1 + self.nested().map(Self::tree_size).sum::<usize>()
    }

    /// Nesting depth of the tree rooted here; a code object without nested units has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.nested().map(Self::depth).max().unwrap_or(0)
    }
}

/// A constant pool slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// A nested code object (function body, lambda, class body, comprehension).
    Code(Box<CodeObject>),
    /// Any other constant value.
    Literal(Literal),
}

impl Constant {
    /// The IR kind tag for this slot.
    #[must_use]
    pub fn kind(&self) -> ConstantKind {
        match self {
            Self::Code(_) => ConstantKind::Code,
            Self::Literal(_) => ConstantKind::Literal,
        }
    }
}

impl From<CodeObject> for Constant {
    fn from(code: CodeObject) -> Self {
        Self::Code(Box::new(code))
    }
}

impl From<Literal> for Constant {
    fn from(literal: Literal) -> Self {
        Self::Literal(literal)
    }
}

/// Discriminant of [`Constant`], spelled the way the IR tags it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConstantKind {
    Code,
    Literal,
}

/// A literal constant as the host runtime stores it.
///
/// Not every variant can be written to the IR; the exporter rejects the ones JSON cannot
/// carry instead of coercing them.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Ellipsis,
    Int(i64),
    /// An integer outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Self>),
    FrozenSet(Vec<Self>),
}

impl Literal {
    /// The host runtime's name for this value's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Ellipsis => "ellipsis",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Complex { .. } => "complex",
            Self::Bytes(_) => "bytes",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::FrozenSet(_) => "frozenset",
        }
    }

    /// The runtime type tag carried in the IR, e.g. `<class 'int'>`.
    #[must_use]
    pub fn type_tag(&self) -> String {
        type_tag_for(self.type_name())
    }
}

/// Formats a host type name as the IR's runtime type tag.
#[must_use]
pub fn type_tag_for(type_name: &str) -> String {
    format!("<class '{type_name}'>")
}

/// Extracts the type name from a runtime type tag, the inverse of [`type_tag_for`].
#[must_use]
pub fn type_name_from_tag(tag: &str) -> Option<&str> {
    tag.strip_prefix("<class '")?.strip_suffix("'>")
}

/// Renders literals the way the host runtime's `repr()` does, for disassembly listings.
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::Int(value) => write!(f, "{value}"),
            Self::BigInt(value) => write!(f, "{value}"),
            Self::Float(value) => write_float(f, *value),
            Self::Complex { real, imag } => {
                if *real == 0.0 && real.is_sign_positive() {
                    write_float_bare(f, *imag)?;
                    f.write_char('j')
                } else {
                    f.write_char('(')?;
                    write_float_bare(f, *real)?;
                    if *imag >= 0.0 || imag.is_nan() {
                        f.write_char('+')?;
                    }
                    write_float_bare(f, *imag)?;
                    f.write_str("j)")
                }
            }
            Self::Bytes(bytes) => {
                f.write_str("b'")?;
                for &byte in bytes {
                    match byte {
                        b'\\' => f.write_str("\\\\")?,
                        b'\'' => f.write_str("\\'")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        b'\t' => f.write_str("\\t")?,
                        0x20..=0x7e => f.write_char(char::from(byte))?,
                        _ => write!(f, "\\x{byte:02x}")?,
                    }
                }
                f.write_char('\'')
            }
            Self::Str(value) => {
                f.write_char('\'')?;
                for c in value.chars() {
                    match c {
                        '\\' => f.write_str("\\\\")?,
                        '\'' => f.write_str("\\'")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        c if c.is_control() => write!(f, "\\x{:02x}", u32::from(c))?,
                        c => f.write_char(c)?,
                    }
                }
                f.write_char('\'')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::FrozenSet(items) => {
                if items.is_empty() {
                    return f.write_str("frozenset()");
                }
                f.write_str("frozenset({")?;
                write_items(f, items)?;
                f.write_str("})")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("nan")
    } else if value.is_infinite() {
        f.write_str(if value > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{value:?}")
    }
}

/// Complex parts drop the `.0` suffix of integral values, as `repr(1+2j)` does.
fn write_float_bare(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.0}")
    } else {
        write_float(f, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_use_host_spelling() {
        assert_eq!(Literal::None.type_tag(), "<class 'NoneType'>");
        assert_eq!(Literal::Str("x".to_owned()).type_tag(), "<class 'str'>");
        assert_eq!(type_name_from_tag("<class 'float'>"), Some("float"));
        assert_eq!(type_name_from_tag("float"), None);
    }

    #[test]
    fn literal_repr() {
        assert_eq!(Literal::Tuple(vec![Literal::Int(1)]).to_string(), "(1,)");
        assert_eq!(
            Literal::Tuple(vec![Literal::Str("a'b".to_owned()), Literal::Float(2.0)]).to_string(),
            "('a\\'b', 2.0)"
        );
        assert_eq!(Literal::Bytes(b"a\x00".to_vec()).to_string(), "b'a\\x00'");
        assert_eq!(Literal::Complex { real: 0.0, imag: 2.0 }.to_string(), "2j");
        assert_eq!(Literal::Complex { real: 1.0, imag: -2.5 }.to_string(), "(1-2.5j)");
        assert_eq!(Literal::FrozenSet(vec![]).to_string(), "frozenset()");
    }

    #[test]
    fn tree_size_and_depth() {
        let mut inner = CodeObject::new("inner", "t.py");
        inner.constants.push(Literal::None.into());
        let mut outer = CodeObject::new("outer", "t.py");
        outer.constants.push(inner.into());
        let mut module = CodeObject::new("<module>", "t.py");
        module.constants.push(outer.into());
        module.constants.push(CodeObject::new("other", "t.py").into());

        assert_eq!(module.tree_size(), 4);
        assert_eq!(module.depth(), 3);
        assert_eq!(module.nested().count(), 2);
    }
}
