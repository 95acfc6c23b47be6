use glam::{Mat4, Vec3};
use serde::Serialize;

/// Look-at camera feeding the `gbuffer*` matrices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerCamera {
    pub eye: Vec3,
    pub target: Vec3,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ViewerCamera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            fov_degrees: 70.0,
            aspect: 4.0 / 3.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// View and projection matrices in the layout shader packs expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraMatrices {
    /// `gbufferModelView`
    pub model_view: Mat4,
    /// `gbufferModelViewInverse`
    pub model_view_inverse: Mat4,
    /// `gbufferProjection`
    pub projection: Mat4,
    /// `gbufferProjectionInverse`
    pub projection_inverse: Mat4,
    /// `cameraPosition`
    pub position: Vec3,
}

impl ViewerCamera {
    pub fn new(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye,
            target,
            ..Self::default()
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    /// Update the aspect ratio from a viewport size in pixels.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }

    /// OpenGL clip space (depth in -1..1), as used by OptiFine/Iris.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn matrices(&self) -> CameraMatrices {
        let model_view = self.view_matrix();
        let projection = self.projection_matrix();
        CameraMatrices {
            model_view,
            model_view_inverse: model_view.inverse(),
            projection,
            projection_inverse: projection.inverse(),
            position: self.eye,
        }
    }
}

/// Matrices for a camera at `eye` looking at `target`, near 0.1 and far 100.
pub fn build_matrices(eye: Vec3, target: Vec3, fov_degrees: f32, aspect: f32) -> CameraMatrices {
    ViewerCamera {
        eye,
        target,
        fov_degrees,
        aspect,
        ..ViewerCamera::default()
    }
    .matrices()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera() {
        let cam = ViewerCamera::default();
        let vp = cam.view_projection();
        // Should produce a valid matrix (no NaN)
        assert!(!vp.col(0).x.is_nan());
        assert_eq!(cam.forward(), Vec3::NEG_Z);
    }

    #[test]
    fn inverses_round_trip() {
        let m = build_matrices(Vec3::new(4.0, 3.0, 5.0), Vec3::ZERO, 70.0, 16.0 / 9.0);
        assert!((m.model_view * m.model_view_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert!((m.projection * m.projection_inverse).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn eye_maps_to_view_origin() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let m = build_matrices(eye, Vec3::ZERO, 60.0, 1.0);
        assert!(m.model_view.transform_point3(eye).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert!(m.model_view_inverse.transform_point3(Vec3::ZERO).abs_diff_eq(eye, 1e-5));
        assert_eq!(m.position, eye);
    }

    #[test]
    fn target_is_in_front() {
        let m = build_matrices(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 60.0, 1.0);
        let clip = m.projection * m.model_view * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }

    #[test]
    fn viewport_sets_aspect() {
        let mut cam = ViewerCamera::default();
        cam.set_viewport(1920, 1080);
        assert!((cam.aspect - 16.0 / 9.0).abs() < 1e-6);
        cam.set_viewport(800, 0);
        assert_eq!(cam.aspect, 800.0);
    }
}
