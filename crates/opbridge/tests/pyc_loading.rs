//! Loading hand-assembled pyc images, then exporting and disassembling them.

use opbridge::{
    CodeObject, IrDocument, Literal, MarshalError, OpcodeTable, PythonVersion, disassemble, export, load_pyc,
    marshal::parse_header, read_pyc,
};
use pretty_assertions::assert_eq;

const FLAG_REF: u8 = 0x80;

/// Writes marshal data the way the host runtime does.
#[derive(Default)]
struct Marshal(Vec<u8>);

impl Marshal {
    fn header(magic: u16, header_len: usize) -> Self {
        let mut data = magic.to_le_bytes().to_vec();
        data.extend(b"\r\n");
        data.resize(header_len, 0);
        Self(data)
    }

    fn raw(&mut self, byte: u8) -> &mut Self {
        self.0.push(byte);
        self
    }

    fn int(&mut self, value: i32) -> &mut Self {
        self.0.extend(value.to_le_bytes());
        self
    }

    fn code(&mut self, counts: &[i32]) -> &mut Self {
        self.raw(b'c' | FLAG_REF);
        for &count in counts {
            self.int(count);
        }
        self
    }

    fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.raw(b's');
        self.int(i32::try_from(data.len()).unwrap());
        self.0.extend(data);
        self
    }

    fn short_ascii(&mut self, text: &str, flagged: bool) -> &mut Self {
        self.raw(if flagged { b'z' | FLAG_REF } else { b'z' });
        self.raw(u8::try_from(text.len()).unwrap());
        self.0.extend(text.as_bytes());
        self
    }

    fn tuple(&mut self, len: u8) -> &mut Self {
        self.raw(b')').raw(len)
    }

    fn reference(&mut self, index: i32) -> &mut Self {
        self.raw(b'r').int(index)
    }
}

/// ```python
/// def f(x):
///     return x + 1
/// ```
fn demo_pyc() -> Vec<u8> {
    let mut m = Marshal::header(3379, 12);
    // <module>, back-reference 0
    m.code(&[0, 0, 0, 2, 0x40])
        .bytes(&[100, 0, 100, 1, 132, 0, 90, 0, 100, 2, 83, 0])
        .tuple(3);
    // f, back-reference 1
    m.code(&[1, 0, 1, 2, 0x43])
        .bytes(&[124, 0, 100, 1, 23, 0, 83, 0])
        .tuple(2)
        .raw(b'N')
        .raw(b'i')
        .int(1)
        .tuple(0)
        .tuple(1)
        .short_ascii("x", true) // 2
        .tuple(0)
        .tuple(0)
        .short_ascii("demo.py", true) // 3
        .short_ascii("f", true) // 4
        .int(1)
        .bytes(&[0, 1]);
    // remaining module constants, then its other fields
    m.reference(4)
        .raw(b'N')
        .tuple(1)
        .reference(4)
        .tuple(0)
        .tuple(0)
        .tuple(0)
        .reference(3)
        .short_ascii("<module>", false)
        .int(1)
        .bytes(&[]);
    m.0
}

fn expected_tree() -> CodeObject {
    let mut function = CodeObject::new("f", "demo.py");
    function.bytecode = vec![124, 0, 100, 1, 23, 0, 83, 0];
    function.line_table = vec![0, 1];
    function.first_line = 1;
    function.arg_count = 1;
    function.local_count = 1;
    function.stack_size = 2;
    function.constants = vec![Literal::None.into(), Literal::Int(1).into()];
    function.local_names = vec!["x".to_owned()];

    let mut module = CodeObject::new("<module>", "demo.py");
    module.bytecode = vec![100, 0, 100, 1, 132, 0, 90, 0, 100, 2, 83, 0];
    module.first_line = 1;
    module.stack_size = 2;
    module.constants = vec![
        function.into(),
        Literal::Str("f".to_owned()).into(),
        Literal::None.into(),
    ];
    module.names = vec!["f".to_owned()];
    module
}

#[test]
fn decodes_a_python36_pyc() {
    assert_eq!(load_pyc(&demo_pyc()).unwrap(), expected_tree());
}

#[test]
fn decoded_tree_exports_and_round_trips() {
    let code = load_pyc(&demo_pyc()).unwrap();
    let json = export(&code).unwrap().to_json(false).unwrap();
    assert_eq!(IrDocument::from_json(&json).unwrap().to_code_object().unwrap(), code);
}

#[test]
fn reads_pyc_files_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.cpython-36.pyc");
    std::fs::write(&path, demo_pyc()).unwrap();
    assert_eq!(read_pyc(&path).unwrap().name, "<module>");
    assert!(matches!(read_pyc(dir.path().join("missing.pyc")), Err(MarshalError::Io(_))));
}

#[test]
fn disassembles_the_tree() {
    let code = load_pyc(&demo_pyc()).unwrap();
    let expected = [
        "  1           0 LOAD_CONST               0 (<code object f, file \"demo.py\", line 1>)",
        "              2 LOAD_CONST               1 ('f')",
        "              4 MAKE_FUNCTION            0",
        "              6 STORE_NAME               0 (f)",
        "              8 LOAD_CONST               2 (None)",
        "             10 RETURN_VALUE",
        "",
        "Disassembly of <code object f, file \"demo.py\", line 1>:",
        "  2           0 LOAD_FAST                0 (x)",
        "              2 LOAD_CONST               1 (1)",
        "              4 BINARY_ADD",
        "              6 RETURN_VALUE",
        "",
    ]
    .join("\n");
    assert_eq!(disassemble(&code, &OpcodeTable::cpython36()), expected);
}

#[test]
fn header_length_depends_on_magic() {
    let py37 = Marshal::header(3394, 16);
    let header = parse_header(&py37.0).unwrap();
    assert_eq!(header.version, PythonVersion::new(3, 7));
    assert_eq!(header.header_len, 16);

    let py33 = Marshal::header(3230, 12);
    assert_eq!(parse_header(&py33.0).unwrap().header_len, 12);

    let py32 = Marshal::header(3180, 8);
    assert_eq!(parse_header(&py32.0).unwrap().header_len, 8);

    assert!(matches!(
        parse_header(&Marshal::header(3394, 12).0),
        Err(MarshalError::Truncated { .. })
    ));
    assert!(matches!(parse_header(b"\x7fELF"), Err(MarshalError::BadMagic { .. })));
}

#[test]
fn python38_code_objects_skip_posonly_count() {
    let mut m = Marshal::header(3413, 16);
    m.code(&[2, 1, 0, 2, 1, 0])
        .bytes(&[])
        .tuple(0)
        .tuple(0)
        .tuple(0)
        .tuple(0)
        .tuple(0)
        .short_ascii("m.py", false)
        .short_ascii("g", false)
        .int(7)
        .bytes(&[]);

    let code = load_pyc(&m.0).unwrap();
    assert_eq!(code.arg_count, 2);
    assert_eq!(code.local_count, 2);
    assert_eq!(code.stack_size, 1);
    assert_eq!(code.first_line, 7);
}

#[test]
fn rejects_unsupported_and_damaged_input() {
    let newer = Marshal::header(3495, 16);
    assert!(matches!(
        load_pyc(&newer.0),
        Err(MarshalError::UnsupportedVersion { version }) if version == PythonVersion::new(3, 11)
    ));

    let mut truncated = demo_pyc();
    truncated.truncate(truncated.len() - 3);
    assert!(matches!(load_pyc(&truncated), Err(MarshalError::Truncated { .. })));

    let mut not_code = Marshal::header(3379, 12);
    not_code.raw(b'N');
    assert!(matches!(
        load_pyc(&not_code.0),
        Err(MarshalError::UnexpectedObject { found: "NoneType", .. })
    ));
}
