use spirv_relay::preprocess::{Preprocessor, ProcessingConfig};
use spirv_relay::{ensure_initialized, translate, Language, ShaderStage, Source, Target,
    TranslateOptions};

fn main() {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let mut pp = Preprocessor::new();
    pp.add_search_root("examples/demo/assets/include")
        .add_define("SCALE", "0.75");
    let src = pp.process("examples/demo/assets/triangle.wgsl", &ProcessingConfig::default())
        .unwrap();

    let ctx = ensure_initialized();
    let opts = TranslateOptions {
        entry_point: "fs_main".to_owned(),
        stage: Some(ShaderStage::Fragment),
        ..Default::default()
    };
    for lang in [Language::Glsl, Language::Hlsl, Language::Msl] {
        let out = translate(ctx, Source::Text(&src), Language::Wgsl, lang, &opts).unwrap();
        println!("=== {} ===\n{}", lang, out.as_text().unwrap_or_default());
    }

    let spvasm = translate(ctx, Source::Text(&src), Language::Wgsl, Language::SpirvAsm, &opts)
        .unwrap();
    println!("=== spvasm ===\n{}", spvasm.as_text().unwrap_or_default());

    // One parse, several targets.
    let mut session = ctx.wgsl_session([
        Target::Spirv(Default::default()),
        Target::Glsl(Default::default()),
    ]);
    session.load(&src, "triangle.wgsl", "triangle").unwrap();
    for entry in ["vs_main", "fs_main"] {
        let spv = session.generate(0, entry).unwrap();
        println!("{}: {} bytes of SPIR-V", entry, spv.len());
    }
    let glsl = session.generate(1, "vs_main").unwrap();
    println!("=== vs_main (glsl) ===\n{}", String::from_utf8_lossy(glsl));

    println!("sounds good");
}
