#![cfg(feature = "naga")]

use std::fs;

use spirv_relay::preprocess::{Preprocessor, ProcessingConfig};
use spirv_relay::{ensure_initialized, translate, translate_file, Error, Language,
    ShaderStage, Source, Spirv, Target, TranslateOptions, ValidationPolicy};
use tempfile::TempDir;

const TRIANGLE: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(i) - 1);
    let y = f32(i32(i & 1u) * 2 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

fn fragment() -> TranslateOptions {
    TranslateOptions {
        entry_point: "fs_main".to_owned(),
        stage: Some(ShaderStage::Fragment),
        ..Default::default()
    }
}

#[test]
fn wgsl_to_spirv_is_valid() {
    let ctx = ensure_initialized();
    let out = translate(ctx, Source::Text(TRIANGLE), Language::Wgsl, Language::Spirv,
        &TranslateOptions::default()).unwrap();
    let spv = out.as_spirv().unwrap();
    assert_eq!(ctx.validate(spv, ValidationPolicy::Report).unwrap(), None);
}

#[test]
fn wgsl_to_text_targets() {
    let ctx = ensure_initialized();
    let src = Source::Text(TRIANGLE);

    let glsl = translate(ctx, src, Language::Wgsl, Language::Glsl, &fragment()).unwrap();
    let glsl = glsl.as_text().unwrap();
    assert!(glsl.starts_with("#version 450"));
    assert!(glsl.contains("void main()"));

    let hlsl = translate(ctx, src, Language::Wgsl, Language::Hlsl, &fragment()).unwrap();
    assert!(hlsl.as_text().unwrap().contains("fs_main"));

    let msl = translate(ctx, src, Language::Wgsl, Language::Msl, &fragment()).unwrap();
    assert!(msl.as_text().unwrap().contains("#include <metal_stdlib>"));

    let wgsl = translate(ctx, src, Language::Wgsl, Language::Wgsl, &fragment()).unwrap();
    assert!(wgsl.as_text().unwrap().contains("@fragment"));
}

#[cfg(feature = "rspirv")]
#[test]
fn optimized_modules_stay_valid() {
    let ctx = ensure_initialized();
    let opts = TranslateOptions {
        optimize: Some(spirv_relay::backend::PassSet::Size),
        ..Default::default()
    };
    let out = translate(ctx, Source::Text(TRIANGLE), Language::Wgsl, Language::Spirv, &opts).unwrap();
    let spv = out.as_spirv().unwrap();
    assert_eq!(ctx.validate(spv, ValidationPolicy::Fail).unwrap(), None);
    let mut names = spv.entry_point_names();
    names.sort();
    assert_eq!(names, ["fs_main", "vs_main"]);
}

#[test]
fn spirv_options_re_emit_the_module() {
    let ctx = ensure_initialized();
    let opts = TranslateOptions {
        spirv: spirv_relay::backend::SpirvOptions { version: (1, 0), ..Default::default() },
        ..fragment()
    };
    let out = translate(ctx, Source::Text(TRIANGLE), Language::Wgsl, Language::Spirv, &opts).unwrap();
    let spv = out.as_spirv().unwrap();
    assert_eq!(spv.header().unwrap().version(), (1, 0));
    assert_eq!(spv.entry_point_names(), ["fs_main"]);
    assert_eq!(ctx.validate(spv, ValidationPolicy::Fail).unwrap(), None);
}

#[test]
fn broken_wgsl_is_a_parse_error() {
    let ctx = ensure_initialized();
    let err = translate(ctx, Source::Text("@fragment fn f( {"), Language::Wgsl, Language::Spirv,
        &TranslateOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
}

#[test]
fn spirv_files_translate_directly() {
    let ctx = ensure_initialized();
    let spv = translate(ctx, Source::Text(TRIANGLE), Language::Wgsl, Language::Spirv,
        &TranslateOptions::default()).unwrap();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("triangle.spv");
    fs::write(&path, spv.as_spirv().unwrap().as_bytes()).unwrap();

    let mut pp = Preprocessor::new();
    let out = translate_file(ctx, &mut pp, &path, Language::Spirv, Language::Wgsl,
        &ProcessingConfig::default(), &fragment()).unwrap();
    assert!(out.as_text().unwrap().contains("fn fs_main"));
    assert!(pp.cache().is_empty());
}

#[test]
fn preprocessed_wgsl_files_translate() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("include")).unwrap();
    fs::write(tmp.path().join("include/color.wgsl"),
        "#pragma once\nconst RED: vec4<f32> = vec4<f32>(1.0, 0.0, 0.0, 1.0);\n").unwrap();
    fs::write(tmp.path().join("shade.wgsl"), concat!(
        "#include <color.wgsl>\n",
        "#include <color.wgsl>\n",
        "@fragment\n",
        "fn fs_main() -> @location(0) vec4<f32> {\n",
        "#if USE_RED\n",
        "    return RED;\n",
        "#else\n",
        "    return vec4<f32>(0.0);\n",
        "#endif\n",
        "}\n",
    )).unwrap();

    let ctx = ensure_initialized();
    let mut pp = Preprocessor::new();
    pp.add_search_root(tmp.path().join("include")).add_define("USE_RED", "1");
    let out = translate_file(ctx, &mut pp, tmp.path().join("shade.wgsl"), Language::Wgsl,
        Language::Wgsl, &ProcessingConfig::default(), &fragment()).unwrap();
    let wgsl = out.as_text().unwrap();
    assert!(wgsl.contains("fn fs_main"));
    assert_eq!(pp.cache().len(), 1);
}

#[test]
fn sessions_cache_per_target_and_entry_point() {
    let ctx = ensure_initialized();
    let mut session = ctx.wgsl_session([
        Target::Spirv(Default::default()),
        Target::Glsl(Default::default()),
        Target::Wgsl,
    ]);
    session.load(TRIANGLE, "triangle.wgsl", "triangle").unwrap();

    let first = session.generate(0, "vs_main").unwrap().to_vec();
    let again = session.generate(0, "vs_main").unwrap().to_vec();
    assert_eq!(first, again);
    let spv = Spirv::from_bytes(&first).unwrap();
    assert_eq!(spv.entry_point_names(), ["vs_main"]);

    let glsl = String::from_utf8(session.generate(1, "fs_main").unwrap().to_vec()).unwrap();
    assert!(glsl.contains("void main()"));

    let err = session.generate(2, "cs_main").unwrap_err();
    assert!(matches!(err, Error::EntryPointNotFound { .. }));
}

#[test]
fn broken_session_sources_fail_to_load() {
    let ctx = ensure_initialized();
    let mut session = ctx.wgsl_session([Target::Wgsl]);
    let err = session.load("fn nope( {", "broken.wgsl", "broken").unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
    assert!(session.modules().is_empty());
}

#[cfg(feature = "spvasm")]
#[test]
fn spirv_disassembles() {
    let ctx = ensure_initialized();
    let out = translate(ctx, Source::Text(TRIANGLE), Language::Wgsl, Language::SpirvAsm,
        &TranslateOptions::default()).unwrap();
    let text = out.as_text().unwrap();
    assert!(text.contains("OpEntryPoint"));
    assert!(text.contains("OpMemoryModel"));
}
