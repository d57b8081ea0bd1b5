//! Uniform block layout for GPU evaluators.
//!
//! Matches the following GLSL (std140):
//! ```glsl
//! layout(set = 0, binding = 0) uniform CloudUniforms {
//!     mat4 inverse_projection;
//!     mat4 inverse_view;
//!     mat4 local_frame;
//!     vec4 camera_dir;
//!     vec4 bounds_min;
//!     vec4 bounds_max;
//!     vec4 col_a;
//!     vec4 col_b;
//!     vec4 phase_params;
//!     vec4 flow_warp;
//!     vec4 shape_noise_weights;
//!     vec4 blue_noise_coords;
//!     vec4 tiling_steps;      // shape tiling, detail tiling, step, ray step
//!     vec4 density_colour;    // density offset, density multiplier, colour offsets 1 and 2
//!     vec4 light_weights;     // absorption toward sun, through cloud, ray offset, height weights
//!     vec4 detail_flags;      // detail weights, detail noise weight, has volume, has blue noise
//! } u;
//! ```

use glam::{Mat4, Vec4};

use crate::bindings::{BindingId, EvaluatorInputSet};

/// Every non-texture evaluator input packed for a single buffer write.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CloudUniforms {
    pub inverse_projection: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub local_frame: [[f32; 4]; 4],
    pub camera_dir: [f32; 4],
    pub bounds_min: [f32; 4],
    pub bounds_max: [f32; 4],
    pub col_a: [f32; 4],
    pub col_b: [f32; 4],
    pub phase_params: [f32; 4],
    pub flow_warp: [f32; 4],
    pub shape_noise_weights: [f32; 4],
    pub blue_noise_coords: [f32; 4],
    pub tiling_steps: [f32; 4],
    pub density_colour: [f32; 4],
    pub light_weights: [f32; 4],
    pub detail_flags: [f32; 4],
}

impl CloudUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Pack `inputs`. Unbound values become zero and the flag lanes record
    /// whether the volume and blue noise were bound.
    pub fn from_inputs(inputs: &EvaluatorInputSet) -> Self {
        let matrix = |id| inputs.matrix(id).unwrap_or(Mat4::ZERO).to_cols_array_2d();
        let vector = |id| inputs.vector(id).unwrap_or(Vec4::ZERO).to_array();
        let float = |id| inputs.float(id).unwrap_or(0.0);
        let flag = |present: bool| if present { 1.0 } else { 0.0 };

        Self {
            inverse_projection: matrix(BindingId::InverseProjection),
            inverse_view: matrix(BindingId::InverseView),
            local_frame: matrix(BindingId::LocalFrame),
            camera_dir: vector(BindingId::CameraDir),
            bounds_min: vector(BindingId::BoundsMin),
            bounds_max: vector(BindingId::BoundsMax),
            col_a: vector(BindingId::ColA),
            col_b: vector(BindingId::ColB),
            phase_params: vector(BindingId::PhaseParams),
            flow_warp: vector(BindingId::FlowWarp),
            shape_noise_weights: vector(BindingId::ShapeNoiseWeights),
            blue_noise_coords: vector(BindingId::BlueNoiseCoords),
            tiling_steps: [
                float(BindingId::ShapeTiling),
                float(BindingId::DetailTiling),
                float(BindingId::Step),
                float(BindingId::RayStep),
            ],
            density_colour: [
                float(BindingId::DensityOffset),
                float(BindingId::DensityMultiplier),
                float(BindingId::ColorOffset1),
                float(BindingId::ColorOffset2),
            ],
            light_weights: [
                float(BindingId::LightAbsorptionTowardSun),
                float(BindingId::LightAbsorptionThroughCloud),
                float(BindingId::RayOffsetStrength),
                float(BindingId::HeightWeights),
            ],
            detail_flags: [
                float(BindingId::DetailWeights),
                float(BindingId::DetailNoiseWeight),
                flag(inputs.contains(BindingId::LocalFrame)),
                flag(inputs.contains(BindingId::BlueNoise)),
            ],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraRayBasis};
    use crate::config::CloudVolumeConfig;
    use crate::marshal::marshal;
    use glam::Vec3;
    use nimbus_core::MarkerTransform;
    use nimbus_gpu::Extent2d;

    #[test]
    fn uniforms_layout() {
        assert_eq!(std::mem::offset_of!(CloudUniforms, inverse_projection), 0);
        assert_eq!(std::mem::offset_of!(CloudUniforms, inverse_view), 64);
        assert_eq!(std::mem::offset_of!(CloudUniforms, local_frame), 128);
        assert_eq!(std::mem::offset_of!(CloudUniforms, camera_dir), 192);
        assert_eq!(std::mem::offset_of!(CloudUniforms, bounds_min), 208);
        assert_eq!(std::mem::offset_of!(CloudUniforms, blue_noise_coords), 320);
        assert_eq!(std::mem::offset_of!(CloudUniforms, tiling_steps), 336);
        assert_eq!(std::mem::offset_of!(CloudUniforms, detail_flags), 384);
        assert_eq!(CloudUniforms::SIZE, 400);
        assert_eq!(CloudUniforms::SIZE % 16, 0);
    }

    #[test]
    fn packs_marshalled_inputs() {
        let volume = MarkerTransform::new(Vec3::new(0.0, 100.0, 0.0), Vec3::new(1000.0, 200.0, 1000.0))
            .resolve()
            .unwrap();
        let camera = CameraRayBasis::from_camera(&Camera::default());
        let config = CloudVolumeConfig::default();
        let inputs = marshal(&config, &camera, Some(&volume), Extent2d::new(1280, 720));

        let uniforms = CloudUniforms::from_inputs(&inputs);
        assert_eq!(uniforms.bounds_min, [-500.0, 0.0, -500.0, 0.0]);
        assert_eq!(uniforms.tiling_steps, [0.01, 0.1, 1.2, 1.2]);
        assert_eq!(uniforms.detail_flags, [-3.76, 0.12, 1.0, 0.0]);
        assert_eq!(
            uniforms.local_frame,
            volume.local_frame.matrix().to_cols_array_2d()
        );
        assert_eq!(uniforms.as_bytes().len(), CloudUniforms::SIZE);
    }

    #[test]
    fn missing_volume_clears_flag() {
        let camera = CameraRayBasis::from_camera(&Camera::default());
        let inputs = marshal(
            &CloudVolumeConfig::default(),
            &camera,
            None,
            Extent2d::new(64, 64),
        );
        let uniforms = CloudUniforms::from_inputs(&inputs);
        assert_eq!(uniforms.detail_flags[2], 0.0);
        assert_eq!(uniforms.bounds_max, [0.0; 4]);
    }
}
