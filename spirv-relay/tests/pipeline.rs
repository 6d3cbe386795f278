#![cfg(all(feature = "naga", feature = "rspirv"))]

use spirv_relay::{ensure_initialized, translate, Language, ShaderStage, Source, Spirv,
    TranslateOptions, ValidationPolicy};

const SHADER: &str = r#"
fn unused_helper(x: f32) -> f32 {
    return x * 3.0;
}

fn tint(c: vec3<f32>) -> vec4<f32> {
    return vec4<f32>(c * 0.5, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint(vec3<f32>(1.0, 0.5, 0.25));
}
"#;

fn shader_spirv() -> Spirv {
    let out = translate(ensure_initialized(), Source::Text(SHADER), Language::Wgsl, Language::Spirv,
        &TranslateOptions::default()).unwrap();
    out.as_spirv().unwrap().clone()
}

#[test]
fn canonicalization_is_stable() {
    let ctx = ensure_initialized();
    let spv = shader_spirv();
    let once = ctx.canonicalize(&spv, ShaderStage::Fragment, "fs_main").unwrap();
    let twice = ctx.canonicalize(&once, ShaderStage::Fragment, "main").unwrap();

    assert_eq!(once.entry_point_names(), ["main"]);
    assert_eq!(twice.entry_point_names(), ["main"]);
    assert_eq!(ctx.validate(&once, ValidationPolicy::Report).unwrap(), None);
    assert_eq!(ctx.validate(&twice, ValidationPolicy::Report).unwrap(), None);
}

#[test]
fn optimization_keeps_the_validation_verdict() {
    let ctx = ensure_initialized();
    let spv = shader_spirv();
    let snapshot = spv.clone();
    let verdict = ctx.validate(&spv, ValidationPolicy::Report).unwrap();
    assert_eq!(verdict, None);

    let fast = ctx.optimize(&spv, true).unwrap();
    let small = ctx.optimize(&spv, false).unwrap();
    for out in [&fast, &small] {
        assert_eq!(ctx.validate(out, ValidationPolicy::Report).unwrap(), verdict);
        assert_eq!(out.entry_point_names(), ["fs_main"]);
    }
    assert_eq!(spv, snapshot);
    // `unused_helper` goes in both builds, debug names only in the size build.
    assert!(fast.len() < spv.len());
    assert!(small.len() < fast.len());
}

#[test]
fn structurally_broken_modules_fail_validation() {
    let ctx = ensure_initialized();
    // OpCapability Shader and an OpTypeVoid whose id is past the bound; no
    // OpMemoryModel.
    let spv = Spirv::from_words(vec![0x0723_0203, 0x0001_0000, 0, 5,
        0, (2 << 16) | 17, 1, (2 << 16) | 19, 7]);
    let report = ctx.validate(&spv, ValidationPolicy::Report).unwrap().unwrap();
    assert!(report.contains("OpMemoryModel"), "{}", report);
    assert!(report.contains("%7"), "{}", report);
}
