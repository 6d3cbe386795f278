use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Shading languages known to the relay. Whether a language can be read or
/// written depends on the backends enabled at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Glsl,
    Hlsl,
    Msl,
    Wgsl,
    Slang,
    /// Binary SPIR-V.
    Spirv,
    /// Textual SPIR-V assembly.
    SpirvAsm,
}
impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Glsl => "glsl",
            Language::Hlsl => "hlsl",
            Language::Msl => "msl",
            Language::Wgsl => "wgsl",
            Language::Slang => "slang",
            Language::Spirv => "spirv",
            Language::SpirvAsm => "spvasm",
        }
    }
}
impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for Language {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match &s.to_ascii_lowercase() as &str {
            "glsl" => Language::Glsl,
            "hlsl" => Language::Hlsl,
            "msl" | "metal" => Language::Msl,
            "wgsl" => Language::Wgsl,
            "slang" => Language::Slang,
            "spirv" | "spv" => Language::Spirv,
            "spvasm" => Language::SpirvAsm,
            _ => return Err(Error::InvalidOptions(format!("invalid language: {}", s))),
        };
        Ok(lang)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TesselationControl,
    TesselationEvaluation,
    Geometry,
    Fragment,
    Compute,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
    Task,
    Mesh,
}
impl ShaderStage {
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TesselationControl => "tesselation_control",
            ShaderStage::TesselationEvaluation => "tesselation_evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::RayGeneration => "ray_generation",
            ShaderStage::Intersection => "intersection",
            ShaderStage::AnyHit => "any_hit",
            ShaderStage::ClosestHit => "closest_hit",
            ShaderStage::Miss => "miss",
            ShaderStage::Callable => "callable",
            ShaderStage::Task => "task",
            ShaderStage::Mesh => "mesh",
        }
    }
}
impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for ShaderStage {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match &s.to_ascii_lowercase() as &str {
            "vert" | "vertex" => ShaderStage::Vertex,
            "tesc" | "tesselation_control" => ShaderStage::TesselationControl,
            "tese" | "tesselation_evaluation" => ShaderStage::TesselationEvaluation,
            "geom" | "geometry" => ShaderStage::Geometry,
            "frag" | "fragment" => ShaderStage::Fragment,
            "comp" | "compute" => ShaderStage::Compute,
            "rgen" | "ray_generation" | "raygen" => ShaderStage::RayGeneration,
            "rint" | "intersection" | "intersect" => ShaderStage::Intersection,
            "rahit" | "any_hit" | "anyhit" => ShaderStage::AnyHit,
            "rchit" | "closest_hit" | "closesthit" => ShaderStage::ClosestHit,
            "rmiss" | "miss" => ShaderStage::Miss,
            "rcall" | "callable" => ShaderStage::Callable,
            "task" => ShaderStage::Task,
            "mesh" => ShaderStage::Mesh,
            _ => return Err(Error::InvalidOptions(format!("invalid shader stage: {}", s))),
        };
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("WGSL".parse::<Language>().unwrap(), Language::Wgsl);
        assert_eq!("spv".parse::<Language>().unwrap(), Language::Spirv);
        assert_eq!("frag".parse::<ShaderStage>().unwrap(), ShaderStage::Fragment);
        assert_eq!("Compute".parse::<ShaderStage>().unwrap(), ShaderStage::Compute);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for lang in [Language::Glsl, Language::Msl, Language::SpirvAsm] {
            assert_eq!(lang.to_string().parse::<Language>().unwrap(), lang);
        }
        let stage = ShaderStage::ClosestHit;
        assert_eq!(stage.to_string().parse::<ShaderStage>().unwrap(), stage);
    }
}
