//! Named evaluator inputs.
//!
//! Every value the evaluator reads has a stable [`BindingId`]. An
//! [`EvaluatorInputSet`] is built fresh each frame and only contains the
//! bindings that were actually set; an absent texture is simply missing.

use std::collections::BTreeMap;

use glam::{Mat4, Vec4};
use nimbus_gpu::TextureRef;

/// Value type of a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Texture,
    Float,
    Vector,
    Matrix,
    /// Output of an earlier pass, handed over as a typed handle.
    StageOutput,
}

/// Stable identifier of an evaluator input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingId {
    ShapeNoise,
    DetailNoise,
    WeatherMap,
    MaskNoise,
    BlueNoise,
    BlueNoiseCoords,
    ShapeTiling,
    DetailTiling,
    Step,
    RayStep,
    DensityOffset,
    DensityMultiplier,
    ColA,
    ColB,
    ColorOffset1,
    ColorOffset2,
    LightAbsorptionTowardSun,
    LightAbsorptionThroughCloud,
    PhaseParams,
    FlowWarp,
    ShapeNoiseWeights,
    HeightWeights,
    DetailWeights,
    DetailNoiseWeight,
    RayOffsetStrength,
    BoundsMin,
    BoundsMax,
    LocalFrame,
    InverseProjection,
    InverseView,
    CameraDir,
    LowDepthTexture,
    DownsampleColor,
}

impl BindingId {
    pub const ALL: [Self; 33] = [
        Self::ShapeNoise,
        Self::DetailNoise,
        Self::WeatherMap,
        Self::MaskNoise,
        Self::BlueNoise,
        Self::BlueNoiseCoords,
        Self::ShapeTiling,
        Self::DetailTiling,
        Self::Step,
        Self::RayStep,
        Self::DensityOffset,
        Self::DensityMultiplier,
        Self::ColA,
        Self::ColB,
        Self::ColorOffset1,
        Self::ColorOffset2,
        Self::LightAbsorptionTowardSun,
        Self::LightAbsorptionThroughCloud,
        Self::PhaseParams,
        Self::FlowWarp,
        Self::ShapeNoiseWeights,
        Self::HeightWeights,
        Self::DetailWeights,
        Self::DetailNoiseWeight,
        Self::RayOffsetStrength,
        Self::BoundsMin,
        Self::BoundsMax,
        Self::LocalFrame,
        Self::InverseProjection,
        Self::InverseView,
        Self::CameraDir,
        Self::LowDepthTexture,
        Self::DownsampleColor,
    ];

    /// Shader-side name of the binding.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ShapeNoise => "_noiseTex",
            Self::DetailNoise => "_noiseDetail3D",
            Self::WeatherMap => "_weatherMap",
            Self::MaskNoise => "_maskNoise",
            Self::BlueNoise => "_BlueNoise",
            Self::BlueNoiseCoords => "_BlueNoiseCoords",
            Self::ShapeTiling => "_shapeTiling",
            Self::DetailTiling => "_detailTiling",
            Self::Step => "_step",
            Self::RayStep => "_rayStep",
            Self::DensityOffset => "_densityOffset",
            Self::DensityMultiplier => "_densityMultiplier",
            Self::ColA => "_colA",
            Self::ColB => "_colB",
            Self::ColorOffset1 => "_colorOffset1",
            Self::ColorOffset2 => "_colorOffset2",
            Self::LightAbsorptionTowardSun => "_lightAbsorptionTowardSun",
            Self::LightAbsorptionThroughCloud => "_lightAbsorptionThroughCloud",
            Self::PhaseParams => "_phaseParams",
            Self::FlowWarp => "_xy_Speed_zw_Warp",
            Self::ShapeNoiseWeights => "_shapeNoiseWeights",
            Self::HeightWeights => "_heightWeights",
            Self::DetailWeights => "_detailWeights",
            Self::DetailNoiseWeight => "_detailNoiseWeight",
            Self::RayOffsetStrength => "_rayOffsetStrength",
            Self::BoundsMin => "_boundsMin",
            Self::BoundsMax => "_boundsMax",
            Self::LocalFrame => "_TRSMatrix",
            Self::InverseProjection => "_InverseProjectionMatrix",
            Self::InverseView => "_InverseViewMatrix",
            Self::CameraDir => "_CameraDir",
            Self::LowDepthTexture => "_LowDepthTexture",
            Self::DownsampleColor => "_DownsampleColor",
        }
    }

    pub const fn kind(self) -> BindingKind {
        match self {
            Self::ShapeNoise
            | Self::DetailNoise
            | Self::WeatherMap
            | Self::MaskNoise
            | Self::BlueNoise => BindingKind::Texture,
            Self::BlueNoiseCoords
            | Self::ColA
            | Self::ColB
            | Self::PhaseParams
            | Self::FlowWarp
            | Self::ShapeNoiseWeights
            | Self::BoundsMin
            | Self::BoundsMax
            | Self::CameraDir => BindingKind::Vector,
            Self::LocalFrame | Self::InverseProjection | Self::InverseView => BindingKind::Matrix,
            Self::LowDepthTexture | Self::DownsampleColor => BindingKind::StageOutput,
            Self::ShapeTiling
            | Self::DetailTiling
            | Self::Step
            | Self::RayStep
            | Self::DensityOffset
            | Self::DensityMultiplier
            | Self::ColorOffset1
            | Self::ColorOffset2
            | Self::LightAbsorptionTowardSun
            | Self::LightAbsorptionThroughCloud
            | Self::HeightWeights
            | Self::DetailWeights
            | Self::DetailNoiseWeight
            | Self::RayOffsetStrength => BindingKind::Float,
        }
    }

    /// Look a binding up by its shader-side name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A bound value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BindingValue {
    Texture(TextureRef),
    Float(f32),
    Vector(Vec4),
    Matrix(Mat4),
}

impl BindingValue {
    pub const fn kind(&self) -> BindingKind {
        match self {
            Self::Texture(_) => BindingKind::Texture,
            Self::Float(_) => BindingKind::Float,
            Self::Vector(_) => BindingKind::Vector,
            Self::Matrix(_) => BindingKind::Matrix,
        }
    }
}

/// Inputs handed to the evaluator for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluatorInputSet {
    values: BTreeMap<BindingId, BindingValue>,
}

impl EvaluatorInputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `id`, replacing any earlier value.
    pub fn set(&mut self, id: BindingId, value: BindingValue) {
        debug_assert_eq!(id.kind(), value.kind(), "{id} bound with the wrong type");
        self.values.insert(id, value);
    }

    pub fn set_float(&mut self, id: BindingId, value: f32) {
        self.set(id, BindingValue::Float(value));
    }

    pub fn set_vector(&mut self, id: BindingId, value: Vec4) {
        self.set(id, BindingValue::Vector(value));
    }

    pub fn set_matrix(&mut self, id: BindingId, value: Mat4) {
        self.set(id, BindingValue::Matrix(value));
    }

    /// Bind `texture` only when present.
    pub fn set_texture(&mut self, id: BindingId, texture: Option<TextureRef>) {
        if let Some(texture) = texture {
            self.set(id, BindingValue::Texture(texture));
        }
    }

    pub fn get(&self, id: BindingId) -> Option<&BindingValue> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: BindingId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn float(&self, id: BindingId) -> Option<f32> {
        match self.values.get(&id) {
            Some(BindingValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn vector(&self, id: BindingId) -> Option<Vec4> {
        match self.values.get(&id) {
            Some(BindingValue::Vector(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn matrix(&self, id: BindingId) -> Option<Mat4> {
        match self.values.get(&id) {
            Some(BindingValue::Matrix(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn texture(&self, id: BindingId) -> Option<TextureRef> {
        match self.values.get(&id) {
            Some(BindingValue::Texture(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (BindingId, &BindingValue)> {
        self.values.iter().map(|(id, value)| (*id, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = BindingId::ALL.iter().map(|id| id.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BindingId::ALL.len());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(BindingId::from_name("_TRSMatrix"), Some(BindingId::LocalFrame));
        assert_eq!(BindingId::from_name("_xy_Speed_zw_Warp"), Some(BindingId::FlowWarp));
        assert_eq!(BindingId::from_name("_unknown"), None);
    }

    #[test]
    fn absent_texture_is_not_bound() {
        let mut inputs = EvaluatorInputSet::new();
        inputs.set_texture(BindingId::WeatherMap, None);
        inputs.set_texture(BindingId::ShapeNoise, Some(TextureRef::new_3d(1, 32, 32, 32)));
        assert!(!inputs.contains(BindingId::WeatherMap));
        assert_eq!(
            inputs.texture(BindingId::ShapeNoise),
            Some(TextureRef::new_3d(1, 32, 32, 32))
        );
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn typed_getters_check_kind() {
        let mut inputs = EvaluatorInputSet::new();
        inputs.set_float(BindingId::Step, 1.2);
        assert_eq!(inputs.float(BindingId::Step), Some(1.2));
        assert_eq!(inputs.vector(BindingId::Step), None);
    }
}
