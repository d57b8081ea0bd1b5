//! Tunable parameters of the cloud effect.

use glam::Vec4;
use nimbus_core::{Error, Result};
use nimbus_gpu::TextureRef;
use serde::{Deserialize, Serialize};

/// Linear resolution divisor for the low-resolution passes, 1 to 16 inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DownsampleFactor(u32);

impl DownsampleFactor {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 16;

    pub fn new(factor: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&factor) {
            Ok(Self(factor))
        } else {
            Err(Error::OutOfRange(format!(
                "downsample factor {factor} is outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for DownsampleFactor {
    fn default() -> Self {
        Self(4)
    }
}

impl TryFrom<u32> for DownsampleFactor {
    type Error = Error;

    fn try_from(factor: u32) -> Result<Self> {
        Self::new(factor)
    }
}

impl From<DownsampleFactor> for u32 {
    fn from(factor: DownsampleFactor) -> Self {
        factor.0
    }
}

/// Per-frame snapshot of every cloud parameter.
///
/// Texture fields left as `None` are not bound at all, so the evaluator keeps
/// whatever it had before. Colours are linear RGBA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudVolumeConfig {
    /// Render the effect at all; a disabled effect copies the source through.
    pub enabled: bool,

    pub shape_noise: Option<TextureRef>,
    pub detail_noise: Option<TextureRef>,
    pub weather_map: Option<TextureRef>,
    pub mask_noise: Option<TextureRef>,
    pub blue_noise: Option<TextureRef>,

    pub shape_tiling: f32,
    pub detail_tiling: f32,

    pub col_a: Vec4,
    pub col_b: Vec4,
    pub color_offset1: f32,
    pub color_offset2: f32,
    pub light_absorption_toward_sun: f32,
    pub light_absorption_through_cloud: f32,
    /// Forward scattering, back scattering, base brightness, phase factor.
    pub phase_params: Vec4,

    pub density_offset: f32,
    pub density_multiplier: f32,
    pub step: f32,
    pub ray_step: f32,
    pub ray_offset_strength: f32,
    pub downsample: DownsampleFactor,

    /// Height gradient weight, `[0, 1]`.
    pub height_weights: f32,
    pub shape_noise_weights: Vec4,
    pub detail_weights: f32,
    pub detail_noise_weight: f32,
    /// Flow speed in `xy`, warp in `zw`.
    pub flow_warp: Vec4,
}

impl Default for CloudVolumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shape_noise: None,
            detail_noise: None,
            weather_map: None,
            mask_noise: None,
            blue_noise: None,
            shape_tiling: 0.01,
            detail_tiling: 0.1,
            col_a: Vec4::ONE,
            col_b: Vec4::ONE,
            color_offset1: 0.59,
            color_offset2: 1.02,
            light_absorption_toward_sun: 0.1,
            light_absorption_through_cloud: 1.0,
            phase_params: Vec4::new(0.72, 1.0, 0.5, 1.58),
            density_offset: 4.02,
            density_multiplier: 2.31,
            step: 1.2,
            ray_step: 1.2,
            ray_offset_strength: 1.5,
            downsample: DownsampleFactor::default(),
            height_weights: 1.0,
            shape_noise_weights: Vec4::new(-0.17, 27.17, -3.65, -0.08),
            detail_weights: -3.76,
            detail_noise_weight: 0.12,
            flow_warp: Vec4::new(0.05, 1.0, 1.0, 10.0),
        }
    }
}

impl CloudVolumeConfig {
    /// Check fields whose range the type system does not enforce.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.height_weights) {
            return Err(Error::OutOfRange(format!(
                "height_weights {} is outside [0, 1]",
                self.height_weights
            )));
        }

        let scalars = [
            ("shape_tiling", self.shape_tiling),
            ("detail_tiling", self.detail_tiling),
            ("step", self.step),
            ("ray_step", self.ray_step),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(Error::InvalidData(format!("{name} is not finite")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_factor_range() {
        assert!(DownsampleFactor::new(0).is_err());
        assert_eq!(DownsampleFactor::new(1).unwrap().get(), 1);
        assert_eq!(DownsampleFactor::new(16).unwrap().get(), 16);
        assert!(matches!(
            DownsampleFactor::try_from(17),
            Err(Error::OutOfRange(_))
        ));
        assert_eq!(DownsampleFactor::default().get(), 4);
    }

    #[test]
    fn defaults_are_valid() {
        let config = CloudVolumeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert!(config.weather_map.is_none());
    }

    #[test]
    fn height_weights_must_be_unit_range() {
        let config = CloudVolumeConfig {
            height_weights: 1.5,
            ..CloudVolumeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config: CloudVolumeConfig = serde_json::from_str(
            r#"{ "downsample": 2, "weather_map": { "id": 7, "width": 512, "height": 512 } }"#,
        )
        .unwrap();
        assert_eq!(config.downsample.get(), 2);
        assert_eq!(config.weather_map, Some(TextureRef::new_2d(7, 512, 512)));
        assert_eq!(config.step, CloudVolumeConfig::default().step);
    }

    #[test]
    fn json_rejects_out_of_range_downsample() {
        let result = serde_json::from_str::<CloudVolumeConfig>(r#"{ "downsample": 32 }"#);
        assert!(result.is_err());
    }
}
