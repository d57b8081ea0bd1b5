//! Error types for the cloud renderer.

use nimbus_gpu::GpuError;
use thiserror::Error;

use crate::evaluator::PassStage;

/// Frame-level rendering error.
///
/// None of these abort the host; the next frame starts from scratch.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A scratch target could not be created; no pass ran this frame.
    #[error("Failed to allocate scratch target: {0}")]
    ScratchAllocation(#[source] GpuError),

    /// Every pass ran but a scratch target could not be returned.
    #[error("Failed to release scratch target: {0}")]
    ScratchRelease(#[source] GpuError),

    #[error("{stage} pass failed: {source}")]
    Pass {
        stage: PassStage,
        #[source]
        source: GpuError,
    },

    /// Copying the untouched source into the destination failed.
    #[error("Passthrough blit failed: {0}")]
    Passthrough(#[source] GpuError),
}

/// Result type alias for rendering.
pub type Result<T> = std::result::Result<T, RenderError>;
