//! C++ header/definition generation for the external VM's opcode constants.
//!
//! Both artifacts come out of a single [`generate`] call over one [`OpcodeTable`] snapshot.
//! The header's `HAVE_ARGUMENT` threshold and the order of the definitions' name table must
//! agree, so the two are only ever produced together.

use std::{
    fmt::{self, Write as _},
    fs, io,
    path::Path,
};

use crate::opcode::{OpcodeTable, is_identifier};

/// Identifiers the header declares itself; an opcode with one of these names would collide.
const RESERVED_NAMES: &[&str] = &["HAVE_ARGUMENT", "name", "operand_length", "uint8_t"];

/// Where and under which names the artifacts are emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Nested namespaces, outermost first.
    pub namespace: Vec<String>,
    /// File name of the header; the definitions file shares its stem with a `.cpp` extension.
    pub header_name: String,
    pub include_guard: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            namespace: vec!["py".to_owned(), "op".to_owned()],
            header_name: "oplist.hpp".to_owned(),
            include_guard: "OPLIST_H".to_owned(),
        }
    }
}

impl GeneratorConfig {
    /// Replaces the namespace with a `::`-separated path such as `py::op`.
    #[must_use]
    pub fn with_namespace(mut self, path: &str) -> Self {
        self.namespace = path
            .split("::")
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .collect();
        self
    }

    /// Sets the header name and derives the include guard from it (`ops.hpp` → `OPS_H`).
    #[must_use]
    pub fn with_header_name(mut self, header_name: &str) -> Self {
        let stem = header_name.rsplit_once('.').map_or(header_name, |(stem, _)| stem);
        self.include_guard = format!(
            "{}_H",
            stem.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect::<String>()
        );
        self.header_name = header_name.to_owned();
        self
    }

    /// File name of the definitions artifact.
    #[must_use]
    pub fn definitions_name(&self) -> String {
        let stem = self
            .header_name
            .rsplit_once('.')
            .map_or(self.header_name.as_str(), |(stem, _)| stem);
        format!("{stem}.cpp")
    }
}

/// Error generating the artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// An opcode mnemonic collides with an identifier the header declares.
    ReservedName { mnemonic: String },
    /// A namespace segment is not a C++ identifier.
    InvalidNamespace { segment: String },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedName { mnemonic } => {
                write!(f, "opcode mnemonic {mnemonic} collides with a generated declaration")
            }
            Self::InvalidNamespace { segment } => write!(f, "namespace segment {segment:?} is not an identifier"),
        }
    }
}

impl std::error::Error for CodegenError {}

/// The header and definitions generated from one table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTables {
    pub header_name: String,
    pub definitions_name: String,
    pub header: String,
    pub definitions: String,
}

impl GeneratedTables {
    /// Writes both artifacts into `dir`.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> io::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join(&self.header_name), &self.header)?;
        fs::write(dir.join(&self.definitions_name), &self.definitions)?;
        tracing::info!(
            header = %dir.join(&self.header_name).display(),
            definitions = %dir.join(&self.definitions_name).display(),
            "wrote opcode tables"
        );
        Ok(())
    }
}

/// Generates the header/definitions pair for `table`.
pub fn generate(table: &OpcodeTable, config: &GeneratorConfig) -> Result<GeneratedTables, CodegenError> {
    for segment in &config.namespace {
        if !is_identifier(segment) {
            return Err(CodegenError::InvalidNamespace {
                segment: segment.clone(),
            });
        }
    }
    if let Some(entry) = table
        .named()
        .find(|entry| RESERVED_NAMES.contains(&entry.mnemonic.as_str()))
    {
        return Err(CodegenError::ReservedName {
            mnemonic: entry.mnemonic.clone(),
        });
    }

    let header = render_header(table, config);
    let definitions = render_definitions(table, config);
    tracing::debug!(
        slots = table.len(),
        named = table.named().count(),
        have_argument = table.has_operand_from(),
        "generated opcode tables"
    );
    Ok(GeneratedTables {
        header_name: config.header_name.clone(),
        definitions_name: config.definitions_name(),
        header,
        definitions,
    })
}

// writing into a String cannot fail, so the fmt::Results below are discarded

fn render_header(table: &OpcodeTable, config: &GeneratorConfig) -> String {
    let guard = &config.include_guard;
    let mut out = String::new();
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    out.push_str("#include <stdint.h>\n");
    open_namespaces(&mut out, config);
    let _ = writeln!(out, "extern const char *name[{}];", table.len());
    let _ = write!(
        out,
        "\nconst uint8_t HAVE_ARGUMENT = 0x{:x};\n\
         inline uint8_t operand_length(uint8_t opcode) {{\n    \
         return opcode >= HAVE_ARGUMENT ? 2 : 0;\n\
         }}\n\n",
        table.has_operand_from()
    );
    for entry in table.named() {
        let _ = writeln!(out, "const uint8_t {:<15} = 0x{:02x};", entry.mnemonic, entry.code);
    }
    close_namespaces(&mut out, config);
    out.push_str("#endif\n");
    out
}

fn render_definitions(table: &OpcodeTable, config: &GeneratorConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#include \"{}\"", config.header_name);
    open_namespaces(&mut out, config);
    out.push_str("const char *name[] = {\n");
    let names: Vec<String> = table
        .entries()
        .iter()
        .map(|entry| format!("    \"{}\"", escape_c(&entry.mnemonic)))
        .collect();
    out.push_str(&names.join(",\n"));
    out.push_str("\n};\n");
    close_namespaces(&mut out, config);
    out
}

fn open_namespaces(out: &mut String, config: &GeneratorConfig) {
    for segment in &config.namespace {
        let _ = writeln!(out, "namespace {segment} {{");
    }
}

fn close_namespaces(out: &mut String, config: &GeneratorConfig) {
    for _ in &config.namespace {
        out.push_str("}\n");
    }
}

fn escape_c(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            c => escaped.push(c),
        }
    }
    escaped
}
