//! Synthetic host scenes for driving the renderer without a real engine.

use glam::{Vec2, Vec3};
use image::{Rgba, Rgba32FImage};
use nimbus_gpu::{Extent2d, FilterMode, PixelFormat, TargetId, TargetView};
use nimbus_render::{Camera, CameraRayBasis, FrameTargets};

const GROUND: [f32; 4] = [0.32, 0.30, 0.26, 1.0];
const HORIZON: Vec3 = Vec3::new(0.78, 0.85, 0.95);
const ZENITH: Vec3 = Vec3::new(0.25, 0.45, 0.85);

/// Colour and depth of a sky over a ground plane at `y = 0`.
pub struct SkyScene {
    pub color: Rgba32FImage,
    pub depth: Rgba32FImage,
}

impl SkyScene {
    /// Ray trace the scene for `camera` at `extent`.
    pub fn render(camera: &Camera, extent: Extent2d) -> Self {
        let basis = CameraRayBasis::from_camera(camera);
        let mut color = Rgba32FImage::new(extent.width, extent.height);
        let mut depth = Rgba32FImage::new(extent.width, extent.height);

        for (x, y, pixel) in color.enumerate_pixels_mut() {
            let uv = Vec2::new(
                (x as f32 + 0.5) / extent.width as f32,
                (y as f32 + 0.5) / extent.height as f32,
            );
            let ray = basis.ray_through_uv(uv);

            let distance = if ray.direction.y < 0.0 && ray.origin.y > 0.0 {
                -ray.origin.y / ray.direction.y
            } else {
                f32::INFINITY
            };

            *pixel = if distance.is_finite() {
                Rgba(GROUND)
            } else {
                let sky = HORIZON.lerp(ZENITH, ray.direction.y.clamp(0.0, 1.0));
                Rgba([sky.x, sky.y, sky.z, 1.0])
            };
            depth.put_pixel(x, y, Rgba([distance, distance, distance, 1.0]));
        }

        Self { color, depth }
    }
}

fn host_view(id: u64, extent: Extent2d) -> TargetView {
    TargetView {
        id: TargetId(id),
        extent,
        format: PixelFormat::Rgba16Float,
        filter: FilterMode::Point,
    }
}

/// Host targets with fixed ids 1 (colour), 2 (depth) and 3 (destination).
pub fn host_frame(extent: Extent2d) -> FrameTargets {
    FrameTargets {
        source_color: host_view(1, extent),
        source_depth: host_view(2, extent),
        destination: host_view(3, extent),
    }
}

/// Camera at ground level looking slightly up toward the horizon.
pub fn test_camera(extent: Extent2d) -> Camera {
    Camera {
        position: Vec3::new(0.0, 2.0, 900.0),
        direction: Vec3::new(0.0, 0.12, -1.0).normalize(),
        aspect: extent.width as f32 / extent.height as f32,
        far: 5000.0,
        ..Camera::default()
    }
}
