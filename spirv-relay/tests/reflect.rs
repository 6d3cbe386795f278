#![cfg(feature = "naga")]

use spirq::ReflectConfig;
use spirv_relay::{ensure_initialized, translate, Language, ShaderStage, Source, TranslateOptions};

const SHADER: &str = r#"
struct Globals {
    tint: vec4<f32>,
}
@group(0) @binding(0) var<uniform> globals: Globals;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return globals.tint;
}
"#;

#[test]
fn generated_spirv_reflects() {
    let ctx = ensure_initialized();
    let opts = TranslateOptions {
        entry_point: "fs_main".to_owned(),
        stage: Some(ShaderStage::Fragment),
        ..Default::default()
    };
    let out = translate(ctx, Source::Text(SHADER), Language::Wgsl, Language::Spirv, &opts).unwrap();
    let words = out.as_spirv().unwrap().words().to_vec();

    let entry_points = ReflectConfig::new().spv(words).reflect().unwrap();
    assert_eq!(entry_points.len(), 1);
    let entry = entry_points.first().unwrap();
    assert_eq!(entry.name, "fs_main");
}
