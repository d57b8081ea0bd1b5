//! Builds the evaluator input set for one frame.

use glam::Vec4;
use nimbus_core::ResolvedVolume;
use nimbus_gpu::{Extent2d, TextureRef};

use crate::bindings::{BindingId, EvaluatorInputSet};
use crate::camera::CameraRayBasis;
use crate::config::CloudVolumeConfig;

/// Scale that tiles the blue-noise texture across the screen without stretching.
pub fn blue_noise_coords(screen: Extent2d, noise: &TextureRef) -> Vec4 {
    Vec4::new(
        screen.width as f32 / noise.width.max(1) as f32,
        screen.height as f32 / noise.height.max(1) as f32,
        0.0,
        0.0,
    )
}

/// Map `config`, the camera basis and the resolved volume onto named inputs.
///
/// Without a volume the bounds and local frame are left unbound. Textures
/// that are `None` are left unbound. Everything else is always bound.
/// Ranges are not re-checked here.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn marshal(
    config: &CloudVolumeConfig,
    camera: &CameraRayBasis,
    volume: Option<&ResolvedVolume>,
    screen: Extent2d,
) -> EvaluatorInputSet {
    let mut inputs = EvaluatorInputSet::new();

    inputs.set_matrix(BindingId::InverseProjection, camera.inverse_projection);
    inputs.set_matrix(BindingId::InverseView, camera.inverse_view);
    inputs.set_vector(BindingId::CameraDir, camera.forward.extend(0.0));

    if let Some(volume) = volume {
        inputs.set_vector(BindingId::BoundsMin, volume.bounds.min.extend(0.0));
        inputs.set_vector(BindingId::BoundsMax, volume.bounds.max.extend(0.0));
        inputs.set_matrix(BindingId::LocalFrame, volume.local_frame.matrix());
    }

    inputs.set_texture(BindingId::ShapeNoise, config.shape_noise);
    inputs.set_texture(BindingId::DetailNoise, config.detail_noise);
    inputs.set_texture(BindingId::WeatherMap, config.weather_map);
    inputs.set_texture(BindingId::MaskNoise, config.mask_noise);

    if let Some(blue_noise) = config.blue_noise {
        inputs.set_vector(
            BindingId::BlueNoiseCoords,
            blue_noise_coords(screen, &blue_noise),
        );
        inputs.set_texture(BindingId::BlueNoise, Some(blue_noise));
    }

    inputs.set_float(BindingId::ShapeTiling, config.shape_tiling);
    inputs.set_float(BindingId::DetailTiling, config.detail_tiling);
    inputs.set_float(BindingId::Step, config.step);
    inputs.set_float(BindingId::RayStep, config.ray_step);
    inputs.set_float(BindingId::DensityOffset, config.density_offset);
    inputs.set_float(BindingId::DensityMultiplier, config.density_multiplier);

    inputs.set_vector(BindingId::ColA, config.col_a);
    inputs.set_vector(BindingId::ColB, config.col_b);
    inputs.set_float(BindingId::ColorOffset1, config.color_offset1);
    inputs.set_float(BindingId::ColorOffset2, config.color_offset2);
    inputs.set_float(
        BindingId::LightAbsorptionTowardSun,
        config.light_absorption_toward_sun,
    );
    inputs.set_float(
        BindingId::LightAbsorptionThroughCloud,
        config.light_absorption_through_cloud,
    );

    inputs.set_float(BindingId::RayOffsetStrength, config.ray_offset_strength);
    inputs.set_vector(BindingId::PhaseParams, config.phase_params);
    inputs.set_vector(BindingId::FlowWarp, config.flow_warp);

    inputs.set_vector(BindingId::ShapeNoiseWeights, config.shape_noise_weights);
    inputs.set_float(BindingId::HeightWeights, config.height_weights);
    inputs.set_float(BindingId::DetailWeights, config.detail_weights);
    inputs.set_float(BindingId::DetailNoiseWeight, config.detail_noise_weight);

    inputs
}
