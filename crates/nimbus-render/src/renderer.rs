//! Per-frame pass sequencing.
//!
//! A frame runs, strictly in order:
//! 1. depth downsample into a point-filtered scratch target,
//! 2. cloud evaluation into a trilinear scratch target,
//! 3. composite into the host destination,
//! 4. release of both scratch targets.
//!
//! When the effect is disabled or no volume marker resolves, none of this
//! runs and the source is copied to the destination untouched. The same copy
//! replaces the frame when an allocation or a pass fails.

use bitflags::bitflags;
use nimbus_core::VolumeProvider;
use nimbus_gpu::{
    scratch_extent, Blitter, Extent2d, FilterMode, GpuError, TargetAllocator, TargetDesc,
    TargetView,
};

use crate::bindings::EvaluatorInputSet;
use crate::camera::CameraRayBasis;
use crate::config::CloudVolumeConfig;
use crate::error::{RenderError, Result};
use crate::evaluator::{CloudEvaluator, FrameTargets, LowResClouds, LowResDepth, PassStage};
use crate::marshal::marshal;
use crate::scratch::ScratchScope;

/// Debug label of the downsampled depth target.
pub const LOW_DEPTH_LABEL: &str = "cloud_low_depth";
/// Debug label of the low-resolution cloud target.
pub const LOW_COLOR_LABEL: &str = "cloud_low_color";

bitflags! {
    /// Host camera buffers the effect reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CameraInputs: u32 {
        const DEPTH = 1 << 0;
    }
}

/// Why a frame was passed through without clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    MissingVolumeMarker,
}

/// Result of a successful [`CloudRenderer::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// All three passes ran at `scratch_extent`.
    Composited { scratch_extent: Extent2d },
    /// The source was copied to the destination.
    Skipped(SkipReason),
}

/// Everything the host supplies for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest<'a> {
    pub config: &'a CloudVolumeConfig,
    pub camera: &'a CameraRayBasis,
    pub screen: Extent2d,
    pub targets: FrameTargets,
}

/// Backends the renderer drives for one frame.
pub struct RenderServices<'a> {
    pub allocator: &'a mut dyn TargetAllocator,
    pub evaluator: &'a mut dyn CloudEvaluator,
    pub blitter: &'a mut dyn Blitter,
}

/// Sequences the cloud passes for a volume supplied by `V`.
pub struct CloudRenderer<V> {
    volume: V,
    frame_index: u64,
}

impl<V: VolumeProvider> CloudRenderer<V> {
    pub fn new(volume: V) -> Self {
        Self {
            volume,
            frame_index: 0,
        }
    }

    /// Camera buffers the host must produce before calling [`Self::render`].
    pub const fn required_camera_inputs() -> CameraInputs {
        CameraInputs::DEPTH
    }

    pub fn volume(&self) -> &V {
        &self.volume
    }

    /// Replace or move the volume between frames.
    pub fn volume_mut(&mut self) -> &mut V {
        &mut self.volume
    }

    /// Number of `render` calls so far, skipped frames included.
    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }

    /// Render clouds for one frame.
    ///
    /// Both scratch targets are acquired before the first pass and are
    /// released on every path out of this function. A pass failure ends the
    /// frame without retrying. Any failure, allocation or pass, releases the
    /// scratch targets and copies the source through before returning the
    /// error, so the destination never holds a partial composite.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn render(
        &mut self,
        request: &FrameRequest<'_>,
        services: &mut RenderServices<'_>,
    ) -> Result<FrameOutcome> {
        let frame = self.frame_index;
        self.frame_index += 1;
        let _frame_span = tracing::debug_span!("cloud_frame", frame).entered();

        if !request.config.enabled {
            passthrough(services.blitter, &request.targets)?;
            return Ok(FrameOutcome::Skipped(SkipReason::Disabled));
        }

        let Some(volume) = self.volume.resolve_volume() else {
            tracing::debug!("No cloud volume marker, passing frame through");
            passthrough(services.blitter, &request.targets)?;
            return Ok(FrameOutcome::Skipped(SkipReason::MissingVolumeMarker));
        };

        let inputs = marshal(
            request.config,
            request.camera,
            Some(&volume),
            request.screen,
        );

        let extent = scratch_extent(request.screen, request.config.downsample.get());
        let format = request.targets.source_color.format;
        let depth_desc = TargetDesc {
            label: LOW_DEPTH_LABEL,
            extent,
            format,
            filter: FilterMode::Point,
        };
        let color_desc = TargetDesc {
            label: LOW_COLOR_LABEL,
            extent,
            format,
            filter: FilterMode::Trilinear,
        };

        let RenderServices {
            allocator,
            evaluator,
            blitter,
        } = services;

        let mut scratch = ScratchScope::new(&mut **allocator);
        let acquired = scratch
            .acquire(&depth_desc)
            .and_then(|depth| Ok((depth, scratch.acquire(&color_desc)?)));
        let (depth_target, color_target) = match acquired {
            Ok(targets) => targets,
            Err(e) => {
                drop(scratch);
                tracing::warn!("Skipping clouds for frame {frame}: {e}");
                if let Err(blit) = passthrough(&mut **blitter, &request.targets) {
                    tracing::warn!("{blit}");
                }
                return Err(RenderError::ScratchAllocation(e));
            }
        };

        if let Err(e) = run_passes(
            &mut **evaluator,
            &inputs,
            &request.targets,
            depth_target,
            color_target,
        ) {
            drop(scratch);
            if let Err(blit) = passthrough(&mut **blitter, &request.targets) {
                tracing::warn!("{blit}");
            }
            return Err(e);
        }

        scratch.finish().map_err(RenderError::ScratchRelease)?;
        Ok(FrameOutcome::Composited {
            scratch_extent: extent,
        })
    }
}

/// Depth downsample, evaluation and composite, stopping at the first failure.
fn run_passes(
    evaluator: &mut dyn CloudEvaluator,
    inputs: &EvaluatorInputSet,
    targets: &FrameTargets,
    depth_target: TargetView,
    color_target: TargetView,
) -> Result<()> {
    let low_depth = {
        let _span = tracing::trace_span!("depth_downsample").entered();
        evaluator
            .downsample_depth(inputs, targets, &depth_target)
            .map_err(|e| pass_failed(PassStage::DepthDownsample, e))?;
        LowResDepth::from_target(depth_target)
    };

    let clouds = {
        let _span = tracing::trace_span!("cloud_evaluate").entered();
        evaluator
            .evaluate(inputs, targets, &low_depth, &color_target)
            .map_err(|e| pass_failed(PassStage::CloudEvaluate, e))?;
        LowResClouds::from_target(color_target)
    };

    let _span = tracing::trace_span!("composite").entered();
    evaluator
        .composite(inputs, targets, &low_depth, &clouds)
        .map_err(|e| pass_failed(PassStage::Composite, e))
}

fn pass_failed(stage: PassStage, source: GpuError) -> RenderError {
    tracing::warn!("Cloud {stage} pass failed: {source}");
    RenderError::Pass { stage, source }
}

fn passthrough(blitter: &mut dyn Blitter, targets: &FrameTargets) -> Result<()> {
    blitter
        .blit(&targets.source_color, &targets.destination)
        .map_err(RenderError::Passthrough)
}
