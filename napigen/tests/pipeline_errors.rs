//! Failure paths of the pipeline: each broken fixture copy must fail in the
//! right stage, with an actionable message, and without partial output of
//! the stages that did not run.

use std::fs;
use std::path::Path;

use napigen::GenError;

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).expect("create dir");
    for entry in fs::read_dir(from).expect("read fixture dir") {
        let entry = entry.expect("dir entry");
        let target = to.join(entry.file_name());
        if entry.file_type().expect("file type").is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).expect("copy fixture file");
        }
    }
}

/// Copy the fixture, apply `edit` to one file, and run the pipeline.
fn generate_broken(
    rel: &str,
    edit: impl FnOnce(String) -> String,
) -> (tempfile::TempDir, Result<napigen::Generated, GenError>) {
    let dir = tempfile::tempdir().expect("tempdir");
    copy_tree(
        &Path::new(env!("CARGO_MANIFEST_DIR")).join("../tests/fixtures/dd3d"),
        dir.path(),
    );
    let path = dir.path().join(rel);
    let text = fs::read_to_string(&path).expect("read fixture file");
    fs::write(&path, edit(text)).expect("write fixture file");

    let cfg = napigen::config::load_config(&dir.path().join("napigen.toml")).expect("load config");
    let result = napigen::generate_from_config(&cfg, dir.path());
    (dir, result)
}

#[test]
fn missing_c_suffix_writes_nothing() {
    let (dir, result) = generate_broken("src/3d/debug_draw_3d.h", |h| {
        h.replace("void draw_points_c(", "void draw_points(")
    });
    let err = result.expect_err("`_data` arguments without `_c` must fail");
    assert!(matches!(err, GenError::Extraction(_)), "got: {err}");
    assert_eq!(err.exit_code(), 110);

    let msg = err.to_string();
    assert!(msg.contains("draw_points_c"), "error should name the fix, got:\n{msg}");
    assert!(msg.contains("debug_draw_3d.h"), "error should name the header, got:\n{msg}");

    assert!(!dir.path().join("src/gen").exists(), "no C API may be written");
    assert!(!dir.path().join("out").exists(), "no other output may be written");
}

#[test]
fn duplicate_enum_constant_is_fatal() {
    let (_dir, result) = generate_broken("src/3d/config_scope_3d.h", |h| {
        h.replace(
            "\tNAPI real_t get_thickness() const;",
            "\tNAPI_ENUM enum Shape : uint8_t { POINT_TYPE_SQUARE, SHAPE_ROUND };\n\tNAPI real_t get_thickness() const;",
        )
    });
    let err = result.expect_err("duplicate enum constants must fail");
    let msg = err.to_string();
    assert!(msg.contains("POINT_TYPE_SQUARE"), "got:\n{msg}");
    assert!(msg.contains("declared in both"), "got:\n{msg}");
}

#[test]
fn self_return_in_singleton_is_rejected() {
    let (_dir, result) = generate_broken("src/3d/debug_draw_3d.h", |h| {
        h.replace("NAPI void clear_all();", "NAPI NSELF_RETURN clear_all();")
    });
    let err = result.expect_err("NSELF_RETURN in a singleton must fail");
    let msg = err.to_string();
    assert!(msg.contains("clear_all"), "got:\n{msg}");
    assert!(msg.contains("singleton"), "got:\n{msg}");
}

#[test]
fn unsupported_argument_type_gets_a_hint() {
    let (_dir, result) = generate_broken("src/3d/debug_draw_3d.h", |h| {
        h.replace(
            "NAPI void clear_all();",
            "NAPI void set_path(const PackedVector3Array &path);\n\tNAPI void clear_all();",
        )
    });
    let msg = result.expect_err("Packed arrays cannot cross the ABI").to_string();
    assert!(msg.contains("path_data"), "hint should suggest the data/size pair, got:\n{msg}");
}

#[test]
fn missing_template_mark_fails_in_its_stage() {
    let (dir, result) = generate_broken("templates/cs/dd3d_cs_api.cs", |t| {
        t.replace("// GENERATOR_DD3D_API_FUNCTIONS", "")
    });
    let err = result.expect_err("missing C# mark must fail");
    assert!(matches!(err, GenError::CSharp(_)), "got: {err}");
    assert_eq!(err.exit_code(), 113);
    assert!(err.to_string().contains("GENERATOR_DD3D_API_FUNCTIONS"), "got: {err}");

    // Earlier stages completed.
    assert!(dir.path().join("src/gen/c_api.gen.cpp").is_file());
    assert!(dir.path().join("out/cpp/dd3d_cpp_api.hpp").is_file());
    assert!(!dir.path().join("out/cs").exists());
}

#[test]
fn broken_manifest_is_an_extraction_error() {
    let (_dir, result) = generate_broken("src/default_sources.json", |_| "{ not json".to_string());
    let err = result.expect_err("invalid manifest must fail");
    assert_eq!(err.exit_code(), 110);
    assert!(err.to_string().contains("default_sources.json"), "got: {err}");
}

#[test]
fn unreadable_config_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("napigen.toml"), "src_folder = [").unwrap();

    let mut sources = Vec::new();
    let code = napigen::run(&dir.path().join("napigen.toml"), &[], false, &mut sources);
    assert_eq!(code, 1);
    assert!(sources.is_empty());
}
