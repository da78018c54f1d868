//! Loading HIR files and compiling them through the salsa pipeline.

mod common;

use std::io::Write;

use caldera::{CalderaDatabase, CompileOptions, compile_wasm, site_table};
use tempfile::NamedTempFile;
use wasmparser::{Validator, WasmFeatures};

fn write_hir(program: &caldera_hir::HirProgram) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".hir.json").expect("temp file");
    let json = program.to_json().expect("serialize HIR");
    file.write_all(json.as_bytes()).expect("write HIR");
    file
}

fn assert_valid(bytes: &[u8]) {
    let result = Validator::new_with_features(WasmFeatures::all()).validate_all(bytes);
    assert!(result.is_ok(), "validation failed: {:?}", result.err());
}

#[test]
fn every_sample_program_compiles_to_a_valid_module() {
    let samples = [
        common::ask(),
        common::counting_loop(),
        common::branches(),
        common::closures(),
        common::counter(),
        common::outer_handlers(),
        common::identity_loop(),
        common::double_resume(),
        common::escaping_fn_clause(),
    ];
    for program in samples {
        let name = program.module_name.clone();
        let artifact = common::compile(program);
        assert!(!artifact.exports.is_empty(), "{name} has no exports");
        assert_valid(&artifact.bytes);
    }
}

#[test]
fn hir_files_round_trip_through_the_database() {
    let file = write_hir(&common::branches());
    let db = CalderaDatabase::default();
    let source = db.load(file.path()).unwrap();
    assert_eq!(source.hir(&db), &common::branches());

    let table = site_table(&db, source).as_ref().unwrap();
    // one perform per match arm or branch
    assert_eq!(table.sites.len(), 3);
    let dump = table.dump(source.hir(&db));
    assert!(dump.contains("pick"), "{dump}");

    let artifact = compile_wasm(&db, source, CompileOptions::default())
        .as_ref()
        .unwrap();
    assert_eq!(artifact.exports, vec!["pick".to_owned()]);
    assert_valid(&artifact.bytes);
}

#[test]
fn pure_surfaces_can_be_disabled() {
    let db = CalderaDatabase::default();
    let source = caldera::ProgramSource::new(&db, common::ask());
    let with_surfaces = compile_wasm(&db, source, CompileOptions::default())
        .clone()
        .unwrap();
    let options = CompileOptions {
        export_pure_surfaces: false,
        ..CompileOptions::default()
    };
    let without = compile_wasm(&db, source, options).clone().unwrap();
    assert_valid(&without.bytes);

    let export_names = |bytes: &[u8]| -> Vec<String> {
        let mut names = Vec::new();
        for payload in wasmparser::Parser::new(0).parse_all(bytes) {
            if let wasmparser::Payload::ExportSection(reader) = payload.unwrap() {
                for export in reader {
                    names.push(export.unwrap().name.to_owned());
                }
            }
        }
        names
    };
    let with_names = export_names(&with_surfaces.bytes);
    let without_names = export_names(&without.bytes);
    assert!(with_names.contains(&"main".to_owned()));
    assert!(with_names.contains(&"main_effectful".to_owned()));
    assert!(!without_names.contains(&"main".to_owned()));
    assert!(without_names.contains(&"main_effectful".to_owned()));
}

#[test]
fn malformed_hir_files_are_rejected() {
    let mut file = NamedTempFile::with_suffix(".hir.json").unwrap();
    file.write_all(br#"{ "module_name": "broken" }"#).unwrap();
    let db = CalderaDatabase::default();
    let err = db.load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Invalid HIR JSON"), "{err:#}");
}
