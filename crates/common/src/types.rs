use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A shading sample: one light path vertex considered for resampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// World position of the sample point.
    pub position: Vec3,
    /// Surface normal at the sample point.
    pub normal: Vec3,
    /// RGB radiance leaving the sample point.
    pub radiance: Vec3,
    /// Probability density the sample was generated with.
    pub pdf: f32,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            radiance: Vec3::ZERO,
            pdf: 1.0,
        }
    }
}

impl Sample {
    /// Rec. 709 luminance of the carried radiance.
    pub fn luminance(&self) -> f32 {
        self.radiance.dot(Vec3::new(0.2126, 0.7152, 0.0722))
    }
}

/// Programmable stage of a gbuffers program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// File extension used by OptiFine/Iris packs for this stage.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vsh",
            Self::Fragment => "fsh",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Vertex and fragment source paths of one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ProgramPaths {
    fn default() -> Self {
        Self::named("shaders", "gbuffers_textured")
    }
}

impl ProgramPaths {
    pub fn new(vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// Program `name` inside `dir`, e.g. `shaders/gbuffers_water.{vsh,fsh}`.
    pub fn named(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            vertex: dir.join(format!("{name}.{}", ShaderStage::Vertex.extension())),
            fragment: dir.join(format!("{name}.{}", ShaderStage::Fragment.extension())),
        }
    }

    pub fn get(&self, stage: ShaderStage) -> &Path {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// Both stages in pipeline order.
    pub fn stages(&self) -> [(ShaderStage, &Path); 2] {
        [
            (ShaderStage::Vertex, self.vertex.as_path()),
            (ShaderStage::Fragment, self.fragment.as_path()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_program_is_gbuffers_textured() {
        let paths = ProgramPaths::default();
        assert_eq!(paths.vertex, Path::new("shaders/gbuffers_textured.vsh"));
        assert_eq!(paths.fragment, Path::new("shaders/gbuffers_textured.fsh"));
    }

    #[test]
    fn stages_in_pipeline_order() {
        let paths = ProgramPaths::named("pack", "gbuffers_water");
        let stages = paths.stages();
        assert_eq!(stages[0].0, ShaderStage::Vertex);
        assert_eq!(stages[1].1, Path::new("pack/gbuffers_water.fsh"));
        assert_eq!(paths.get(ShaderStage::Vertex), stages[0].1);
    }

    #[test]
    fn sample_luminance() {
        let s = Sample {
            radiance: Vec3::ONE,
            ..Sample::default()
        };
        assert!((s.luminance() - 1.0).abs() < 1e-5);
        assert_eq!(Sample::default().luminance(), 0.0);
    }
}
