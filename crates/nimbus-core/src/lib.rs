//! Core types and math for the Nimbus cloud renderer.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Rays and axis-aligned boxes
//! - The cloud volume marker and its resolved bounds and local frame
//! - Common error types

pub mod error;
pub mod math;
pub mod volume;

pub use error::{Error, Result};
pub use math::{Aabb, Ray};
pub use volume::{
    LocalFrameTransform, MarkerTransform, ResolvedVolume, VolumeBounds, VolumeFn, VolumeProvider,
    LOCAL_SCALE_FACTOR,
};
