//! Volumetric cloud post-process pipeline.
//!
//! This crate provides:
//! - Camera ray basis construction
//! - The cloud configuration record and its marshalling into evaluator inputs
//! - The evaluator capability and its typed stage handles
//! - Frame-scoped scratch targets and pass sequencing
//! - Uniform packing for GPU evaluators

pub mod bindings;
pub mod camera;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod marshal;
pub mod renderer;
pub mod scratch;
pub mod uniforms;

pub use bindings::{BindingId, BindingKind, BindingValue, EvaluatorInputSet};
pub use camera::{gpu_projection, Camera, CameraRayBasis, DepthRange, ProjectionConvention};
pub use config::{CloudVolumeConfig, DownsampleFactor};
pub use error::{RenderError, Result};
pub use evaluator::{CloudEvaluator, FrameTargets, LowResClouds, LowResDepth, PassStage};
pub use marshal::{blue_noise_coords, marshal};
pub use renderer::{
    CameraInputs, CloudRenderer, FrameOutcome, FrameRequest, RenderServices, SkipReason,
    LOW_COLOR_LABEL, LOW_DEPTH_LABEL,
};
pub use scratch::ScratchScope;
pub use uniforms::CloudUniforms;
