//! Exporting code-object trees to the IR and reading them back.

use opbridge::{
    CodeObject, Constant, DEFAULT_MAX_CODE_DEPTH, ExportLimits, Exporter, IrDocument, Literal, MAX_IR_CODE_DEPTH,
    OpcodeTable, StructuralError, export,
};
use pretty_assertions::assert_eq;
use serde_json::Value;

/// A module containing a function that itself contains a lambda.
fn sample_tree() -> CodeObject {
    let mut lambda = CodeObject::new("<lambda>", "sample.py");
    lambda.bytecode = vec![124, 0, 83, 0];
    lambda.line_table = vec![0, 1];
    lambda.first_line = 3;
    lambda.arg_count = 1;
    lambda.local_count = 1;
    lambda.stack_size = 1;
    lambda.local_names = vec!["x".to_owned()];
    lambda.constants.push(Literal::None.into());

    let mut function = CodeObject::new("outer", "sample.py");
    function.bytecode = vec![100, 1, 100, 2, 132, 0, 83, 0];
    function.line_table = vec![0, 1, 4, 1];
    function.first_line = 2;
    function.stack_size = 2;
    function.constants = vec![
        Literal::Str("doc".to_owned()).into(),
        lambda.into(),
        Literal::Str("outer.<locals>.<lambda>".to_owned()).into(),
    ];
    function.cell_vars = vec!["y".to_owned()];

    let mut module = CodeObject::new("<module>", "sample.py");
    module.bytecode = vec![100, 0, 100, 1, 132, 0, 90, 0, 100, 2, 83, 0];
    module.line_table = vec![0, 1];
    module.first_line = 1;
    module.stack_size = 2;
    module.names = vec!["outer".to_owned()];
    module.constants = vec![
        function.into(),
        Literal::Str("outer".to_owned()).into(),
        Literal::Tuple(vec![Literal::Int(1), Literal::Float(2.5), Literal::Bool(true), Literal::None]).into(),
        Literal::Int(-7).into(),
    ];
    module
}

#[test]
fn round_trip_preserves_structure() {
    let tree = sample_tree();
    let json = export(&tree).unwrap().to_json(false).unwrap();
    let imported = IrDocument::from_json(&json).unwrap().to_code_object().unwrap();
    assert_eq!(imported, tree);
}

#[test]
fn export_is_deterministic() {
    let first = export(&sample_tree()).unwrap().to_json(true).unwrap();
    let second = export(&sample_tree()).unwrap().to_json(true).unwrap();
    assert_eq!(first, second);
}

#[test]
fn wire_format_matches_vm_loader() {
    let json = export(&sample_tree()).unwrap().to_json(false).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["type"], "code");
    assert_eq!(value["co_name"], "<module>");
    assert_eq!(value["co_code"], "ZABkAYQAWgBkAlMA");
    assert_eq!(value["co_varnames"], Value::Array(vec![]));
    assert_eq!(value["co_consts"][0]["type"], "code");
    assert_eq!(value["co_consts"][0]["co_cellvars"][0], "y");
    assert_eq!(value["co_consts"][2]["real_type"], "<class 'tuple'>");
    assert_eq!(value["co_consts"][2]["value"], serde_json::json!([1, 2.5, true, null]));
    assert_eq!(value["co_consts"][3]["value"], -7);

    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "type",
            "co_code",
            "co_lnotab",
            "co_consts",
            "co_name",
            "co_filename",
            "co_firstlineno",
            "co_argcount",
            "co_kwonlyargcount",
            "co_nlocals",
            "co_stacksize",
            "co_names",
            "co_varnames",
            "co_freevars",
            "co_cellvars",
        ]
    );
}

#[test]
fn binary_fields_have_no_line_breaks() {
    let mut code = CodeObject::new("big", "big.py");
    code.bytecode = (0..=255).cycle().take(4096).collect();
    code.line_table = vec![2; 1000];
    let json = export(&code).unwrap().to_json(true).unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();

    let co_code = value["co_code"].as_str().unwrap();
    assert!(co_code.len() > 76);
    assert!(!co_code.contains('\n'));
    assert!(!value["co_lnotab"].as_str().unwrap().contains('\n'));
}

#[test]
fn nesting_beyond_the_limit_fails() {
    let mut tree = CodeObject::new("level5", "deep.py");
    for level in (1..5).rev() {
        let mut parent = CodeObject::new(format!("level{level}"), "deep.py");
        parent.constants.push(tree.into());
        tree = parent;
    }

    let exporter = Exporter::new(ExportLimits { max_depth: 4 });
    assert_eq!(
        exporter.export(&tree).unwrap_err(),
        StructuralError::DepthExceeded {
            limit: 4,
            path: "level1.level2.level3.level4.level5".to_owned(),
        }
    );
    assert!(Exporter::new(ExportLimits { max_depth: 5 }).export(&tree).is_ok());

    let document = Exporter::default().export(&tree).unwrap();
    assert!(matches!(
        document.to_code_object_with(ExportLimits { max_depth: 2 }),
        Err(StructuralError::DepthExceeded { limit: 2, .. })
    ));
}

/// `depth` nested code objects, the innermost holding `leaf`.
fn chain(depth: usize, leaf: Literal) -> CodeObject {
    let mut tree = CodeObject::new(format!("f{depth}"), "deep.py");
    tree.constants.push(leaf.into());
    for level in (1..depth).rev() {
        let mut parent = CodeObject::new(format!("f{level}"), "deep.py");
        parent.constants.push(Literal::Int(i64::try_from(level).unwrap()).into());
        parent.constants.push(tree.into());
        tree = parent;
    }
    tree
}

#[test]
fn deepest_default_tree_reads_back() {
    let tree = chain(DEFAULT_MAX_CODE_DEPTH, Literal::Str("leaf".to_owned()));
    assert_eq!(tree.tree_size(), DEFAULT_MAX_CODE_DEPTH);

    for pretty in [false, true] {
        let json = export(&tree).unwrap().to_json(pretty).unwrap();
        let imported = IrDocument::from_json(&json).unwrap().to_code_object().unwrap();
        assert_eq!(imported, tree);
    }
}

#[test]
fn export_never_writes_documents_too_deep_to_read() {
    let tree = chain(MAX_IR_CODE_DEPTH + 1, Literal::None);
    let exporter = Exporter::new(ExportLimits { max_depth: 200 });
    assert!(matches!(
        exporter.export(&tree),
        Err(StructuralError::DepthExceeded { limit, .. }) if limit == MAX_IR_CODE_DEPTH
    ));

    // a tuple in the innermost object would need one more JSON level than a document allows
    let tuple = Literal::Tuple(vec![Literal::Int(1)]);
    assert!(matches!(
        export(&chain(MAX_IR_CODE_DEPTH, tuple.clone())),
        Err(StructuralError::UnsupportedLiteral { ref type_tag, .. }) if type_tag == "<class 'tuple'>"
    ));
    let document = export(&chain(MAX_IR_CODE_DEPTH - 1, tuple)).unwrap();
    let json = document.to_json(false).unwrap();
    assert!(IrDocument::from_json(&json).is_ok());
}

#[test]
fn unencodable_literals_fail_with_their_path() {
    let mut inner = CodeObject::new("f", "lit.py");
    inner.constants.push(Literal::Bytes(b"raw".to_vec()).into());
    let mut module = CodeObject::new("<module>", "lit.py");
    module.constants.push(inner.into());

    assert_eq!(
        export(&module).unwrap_err(),
        StructuralError::UnsupportedLiteral {
            type_tag: "<class 'bytes'>".to_owned(),
            path: "<module>.f".to_owned(),
        }
    );

    for literal in [
        Literal::Ellipsis,
        Literal::Complex { real: 1.0, imag: 2.0 },
        Literal::FrozenSet(vec![Literal::Int(1)]),
        Literal::Float(f64::NAN),
        Literal::Tuple(vec![Literal::Int(1), Literal::Ellipsis]),
    ] {
        let mut code = CodeObject::new("<module>", "lit.py");
        code.constants.push(Constant::Literal(literal));
        assert!(
            matches!(export(&code), Err(StructuralError::UnsupportedLiteral { .. })),
            "{:?} should not export",
            code.constants[0]
        );
    }
}

#[test]
fn legacy_null_name_lists_import_as_empty() {
    let json = r#"{"type": "code", "co_code": "ZABTAA==", "co_lnotab": "", "co_consts": [
        {"type": "literal", "real_type": "<class 'NoneType'>", "value": null}
    ], "co_name": "<module>", "co_filename": "old.py", "co_argcount": 0, "co_kwonlyargcount": 0,
    "co_nlocals": 0, "co_stacksize": 1, "co_names": null, "co_varnames": null,
    "co_freevars": null, "co_cellvars": null}"#;

    let code = IrDocument::from_json(json).unwrap().to_code_object().unwrap();
    assert_eq!(code.bytecode, vec![100, 0, 83, 0]);
    assert_eq!(code.names, Vec::<String>::new());
    assert_eq!(code.first_line, 0);
    assert_eq!(code.constants, vec![Constant::Literal(Literal::None)]);

    // the canonical form writes explicit empty arrays
    let json = export(&code).unwrap().to_json(false).unwrap();
    assert!(json.contains(r#""co_names":[],"co_varnames":[],"co_freevars":[],"co_cellvars":[]"#));
}

#[test]
fn malformed_documents_are_rejected() {
    assert!(matches!(
        IrDocument::from_json(r#"{"type": "literal", "real_type": "<class 'int'>", "value": 1}"#),
        Err(StructuralError::InvalidIr { .. })
    ));

    let bad_base64 = export(&CodeObject::new("m", "m.py"))
        .unwrap()
        .to_json(false)
        .unwrap()
        .replace(r#""co_code":"""#, r#""co_code":"!!""#);
    let document = IrDocument::from_json(&bad_base64).unwrap();
    assert!(matches!(
        document.to_code_object(),
        Err(StructuralError::InvalidIr { ref message, .. }) if message.contains("co_code")
    ));
}

#[test]
fn opcode_validation_reports_offset() {
    let table = OpcodeTable::cpython36();
    let mut code = CodeObject::new("<module>", "ops.py");
    // LOAD_CONST 0, then opcode 0 (a placeholder slot in 3.6)
    code.bytecode = vec![100, 0, 0, 0];
    code.constants.push(Literal::None.into());

    assert!(export(&code).is_ok());
    assert_eq!(
        Exporter::default().with_opcode_table(&table).export(&code).unwrap_err(),
        StructuralError::UnknownOpcode {
            opcode: 0,
            offset: 2,
            path: "<module>".to_owned(),
        }
    );
}
