//! Camera and the per-frame ray basis handed to the evaluator.

use glam::{Mat4, Vec2, Vec3, Vec4};
use nimbus_core::math::Ray;

/// Clip-space depth range a graphics API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthRange {
    /// OpenGL, `[-1, 1]`.
    #[default]
    NegativeOneToOne,
    /// Direct3D, Metal and Vulkan, `[0, 1]`.
    ZeroToOne,
    /// `[0, 1]` with the near plane at 1.
    ReversedZeroToOne,
}

/// How the host's projection must be corrected before it reaches the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectionConvention {
    pub depth: DepthRange,
    /// Flip clip-space Y, as needed when rendering into a texture on some APIs.
    pub flip_y: bool,
}

impl ProjectionConvention {
    pub const OPENGL: Self = Self {
        depth: DepthRange::NegativeOneToOne,
        flip_y: false,
    };
    pub const DIRECT3D: Self = Self {
        depth: DepthRange::ReversedZeroToOne,
        flip_y: false,
    };
    pub const VULKAN: Self = Self {
        depth: DepthRange::ReversedZeroToOne,
        flip_y: true,
    };

    /// NDC depth of the near plane.
    pub const fn near_ndc_z(&self) -> f32 {
        match self.depth {
            DepthRange::NegativeOneToOne => -1.0,
            DepthRange::ZeroToOne => 0.0,
            DepthRange::ReversedZeroToOne => 1.0,
        }
    }
}

/// Convert an OpenGL-style projection into the one the GPU will actually use.
pub fn gpu_projection(projection: Mat4, convention: ProjectionConvention) -> Mat4 {
    let (z_scale, z_bias) = match convention.depth {
        DepthRange::NegativeOneToOne => (1.0, 0.0),
        DepthRange::ZeroToOne => (0.5, 0.5),
        DepthRange::ReversedZeroToOne => (-0.5, 0.5),
    };
    let y_scale = if convention.flip_y { -1.0 } else { 1.0 };

    let remap = Mat4::from_cols(
        Vec4::X,
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(0.0, 0.0, z_scale, 0.0),
        Vec4::new(0.0, 0.0, z_bias, 1.0),
    );
    remap * projection
}

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub convention: ProjectionConvention,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
            convention: ProjectionConvention::OPENGL,
        }
    }
}

impl Camera {
    /// Create a new camera.
    pub fn new(position: Vec3, target: Vec3, up: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up,
            fov,
            aspect,
            ..Self::default()
        }
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// OpenGL-style projection, as a scene host would report it.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov, self.aspect, self.near, self.far)
    }

    pub fn camera_to_world(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn forward(&self) -> Vec3 {
        self.direction.normalize()
    }
}

/// Matrices the evaluator needs to rebuild a world-space ray per pixel.
///
/// Recomputed every frame; nothing is cached between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRayBasis {
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
    pub forward: Vec3,
    convention: ProjectionConvention,
}

impl CameraRayBasis {
    /// Build the basis from host camera data.
    ///
    /// `projection` is OpenGL-style; `convention` describes the correction the
    /// GPU needs. `camera_to_world` is used directly as the inverse view.
    pub fn new(
        projection: Mat4,
        convention: ProjectionConvention,
        camera_to_world: Mat4,
        forward: Vec3,
    ) -> Self {
        Self {
            inverse_projection: gpu_projection(projection, convention).inverse(),
            inverse_view: camera_to_world,
            forward,
            convention,
        }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        Self::new(
            camera.projection_matrix(),
            camera.convention,
            camera.camera_to_world(),
            camera.forward(),
        )
    }

    /// World-space camera position.
    pub fn origin(&self) -> Vec3 {
        self.inverse_view.w_axis.truncate()
    }

    /// Projection convention the inverse projection was built for.
    pub const fn convention(&self) -> ProjectionConvention {
        self.convention
    }

    /// World-space ray through a point in normalized device coordinates.
    ///
    /// This is the unprojection the evaluator performs per pixel.
    pub fn ray_through(&self, ndc: Vec2) -> Ray {
        let clip = Vec4::new(ndc.x, ndc.y, self.convention.near_ndc_z(), 1.0);
        let view = self.inverse_projection * clip;
        let view_dir = view.truncate() / view.w;
        Ray::new(self.origin(), self.inverse_view.transform_vector3(view_dir))
    }

    /// World-space ray through texture coordinates `uv` in `[0, 1]`, origin top-left.
    pub fn ray_through_uv(&self, uv: Vec2) -> Ray {
        let y = if self.convention.flip_y {
            uv.y * 2.0 - 1.0
        } else {
            1.0 - uv.y * 2.0
        };
        self.ray_through(Vec2::new(uv.x * 2.0 - 1.0, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn test_camera(convention: ProjectionConvention) -> Camera {
        Camera {
            position: Vec3::new(10.0, 50.0, -20.0),
            direction: Vec3::new(1.0, 0.2, 0.5).normalize(),
            aspect: 1280.0 / 720.0,
            convention,
            ..Camera::default()
        }
    }

    #[test]
    fn center_ray_matches_forward() {
        for convention in [
            ProjectionConvention::OPENGL,
            ProjectionConvention::DIRECT3D,
            ProjectionConvention::VULKAN,
        ] {
            let camera = test_camera(convention);
            let basis = CameraRayBasis::from_camera(&camera);
            let ray = basis.ray_through(Vec2::ZERO);
            assert_abs_diff_eq!(ray.origin, camera.position, epsilon = 1e-3);
            assert_abs_diff_eq!(ray.direction, basis.forward, epsilon = 1e-4);
        }
    }

    #[test]
    fn uv_rays_agree_across_conventions() {
        let gl = CameraRayBasis::from_camera(&test_camera(ProjectionConvention::OPENGL));
        let vk = CameraRayBasis::from_camera(&test_camera(ProjectionConvention::VULKAN));
        let d3d = CameraRayBasis::from_camera(&test_camera(ProjectionConvention::DIRECT3D));

        for uv in [Vec2::ZERO, Vec2::ONE, Vec2::new(0.25, 0.8)] {
            let expected = gl.ray_through_uv(uv).direction;
            assert_abs_diff_eq!(vk.ray_through_uv(uv).direction, expected, epsilon = 1e-4);
            assert_abs_diff_eq!(d3d.ray_through_uv(uv).direction, expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn top_of_screen_looks_up() {
        let camera = Camera {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            ..Camera::default()
        };
        let basis = CameraRayBasis::from_camera(&camera);
        assert!(basis.ray_through_uv(Vec2::new(0.5, 0.0)).direction.y > 0.0);
        assert!(basis.ray_through_uv(Vec2::new(0.5, 1.0)).direction.y < 0.0);
        assert!(basis.ray_through_uv(Vec2::new(1.0, 0.5)).direction.x > 0.0);
    }

    #[test]
    fn gpu_projection_maps_near_plane() {
        let camera = test_camera(ProjectionConvention::OPENGL);
        let view_near = Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let view_far = Vec4::new(0.0, 0.0, -camera.far, 1.0);

        for (convention, near_z, far_z) in [
            (ProjectionConvention::OPENGL, -1.0, 1.0),
            (
                ProjectionConvention {
                    depth: DepthRange::ZeroToOne,
                    flip_y: false,
                },
                0.0,
                1.0,
            ),
            (ProjectionConvention::DIRECT3D, 1.0, 0.0),
        ] {
            let projection = gpu_projection(camera.projection_matrix(), convention);
            let near = projection * view_near;
            let far = projection * view_far;
            assert_abs_diff_eq!(near.z / near.w, near_z, epsilon = 1e-4);
            assert_abs_diff_eq!(far.z / far.w, far_z, epsilon = 1e-3);
            assert_abs_diff_eq!(convention.near_ndc_z(), near_z);
        }
    }

    #[test]
    fn flip_y_negates_clip_y() {
        let projection = Camera::default().projection_matrix();
        let point = Vec4::new(1.0, 2.0, -5.0, 1.0);
        let plain = gpu_projection(projection, ProjectionConvention::DIRECT3D) * point;
        let flipped = gpu_projection(projection, ProjectionConvention::VULKAN) * point;
        assert_abs_diff_eq!(flipped.y, -plain.y, epsilon = 1e-6);
        assert_abs_diff_eq!(flipped.x, plain.x, epsilon = 1e-6);
    }
}
