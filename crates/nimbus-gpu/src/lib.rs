//! GPU resource layer for the Nimbus cloud renderer.
//!
//! This crate provides:
//! - Render target and texture handle types
//! - The allocator and blit seams a host implements for its device
//! - A Vulkan scratch target pool built on gpu-allocator
//! - A headless Vulkan context to host it

pub mod context;
pub mod error;
pub mod memory;
pub mod scratch_pool;
pub mod target;

pub use context::{GpuContext, GpuContextBuilder};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuImage};
pub use scratch_pool::{FormatSupport, ScratchImage, VulkanScratchPool};
pub use target::{
    scratch_extent, Blitter, Extent2d, FilterMode, PixelFormat, TargetAllocator, TargetDesc,
    TargetId, TargetView, TextureRef,
};
