//! Render Inputs: camera matrices, uniform staging and the debug overlay.
//!
//! # Invariants
//! - Uniform writes are best effort. A name the program does not declare is
//!   skipped, never an error.
//! - The staging block follows std140 layout in declaration order.
//! - Nothing here touches a GPU. Consumers upload `UniformBlock::bytes`.

mod camera;
mod overlay;
mod uniforms;

pub use camera::{CameraMatrices, ViewerCamera, build_matrices};
pub use overlay::{DebugOverlay, Overlay, OverlayInfo, OverlayStats, StageInfo};
pub use uniforms::{
    FrameInputs, TEXTURE_UNITS, UniformBlock, UniformKind, UniformSlot, UniformTable,
    UniformValue,
};

pub fn crate_info() -> &'static str {
    "latinium-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
