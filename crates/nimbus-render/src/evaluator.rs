//! The cloud evaluator capability.
//!
//! The evaluator is the program that actually marches clouds. It exposes
//! three operations that the renderer calls in a fixed order. Intermediate
//! results travel between them as typed handles instead of global bindings:
//! [`CloudEvaluator::evaluate`] cannot be called without the [`LowResDepth`]
//! produced by the depth pass, and [`CloudEvaluator::composite`] cannot be
//! called without the [`LowResClouds`] produced by evaluation.

use nimbus_gpu::TargetView;

use crate::bindings::EvaluatorInputSet;

/// Host images the effect reads from and writes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTargets {
    pub source_color: TargetView,
    pub source_depth: TargetView,
    pub destination: TargetView,
}

/// Pass of the cloud pipeline, in issue order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassStage {
    DepthDownsample,
    CloudEvaluate,
    Composite,
}

impl PassStage {
    pub const ORDER: [Self; 3] = [Self::DepthDownsample, Self::CloudEvaluate, Self::Composite];

    pub const fn name(self) -> &'static str {
        match self {
            Self::DepthDownsample => "depth_downsample",
            Self::CloudEvaluate => "cloud_evaluate",
            Self::Composite => "composite",
        }
    }
}

impl std::fmt::Display for PassStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Downsampled depth written by [`CloudEvaluator::downsample_depth`].
///
/// Only the renderer creates these, once the depth pass has succeeded:
///
/// ```compile_fail
/// use nimbus_gpu::{Extent2d, FilterMode, PixelFormat, TargetId, TargetView};
/// use nimbus_render::LowResDepth;
///
/// let target = TargetView {
///     id: TargetId(7),
///     extent: Extent2d::new(4, 4),
///     format: PixelFormat::Rgba16Float,
///     filter: FilterMode::Point,
/// };
/// let forged = LowResDepth::from_target(target);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LowResDepth(TargetView);

impl LowResDepth {
    /// Wrap a target that holds downsampled depth.
    pub(crate) const fn from_target(target: TargetView) -> Self {
        Self(target)
    }

    pub const fn target(&self) -> &TargetView {
        &self.0
    }
}

/// Low-resolution cloud colour and transmittance written by [`CloudEvaluator::evaluate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LowResClouds(TargetView);

impl LowResClouds {
    /// Wrap a target that holds evaluated clouds.
    pub(crate) const fn from_target(target: TargetView) -> Self {
        Self(target)
    }

    pub const fn target(&self) -> &TargetView {
        &self.0
    }
}

/// A program that can run the three cloud passes.
///
/// Every operation receives the same input set. Failures are reported as
/// [`nimbus_gpu::GpuError`]; the renderer does not retry.
pub trait CloudEvaluator {
    /// Write a point-sampled, downsampled copy of the scene depth into `target`.
    fn downsample_depth(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()>;

    /// March clouds at `target`'s resolution, writing premultiplied colour and
    /// transmittance. May sample `depth` for early termination.
    fn evaluate(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        depth: &LowResDepth,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()>;

    /// Upsample `clouds` and blend them over the source into the frame destination.
    fn composite(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        depth: &LowResDepth,
        clouds: &LowResClouds,
    ) -> nimbus_gpu::Result<()>;
}
