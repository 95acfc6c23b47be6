//! Shared types for the latinium shader-pack toolkit.
//!
//! Everything here is plain data: shading samples handed to the resampling
//! code, and the paths that make up a gbuffers program.

mod types;

pub use types::{ProgramPaths, Sample, ShaderStage};

pub fn crate_info() -> &'static str {
    "latinium-common v0.1.0"
}
