//! Render targets, texture handles and the backend seams that create them.
//!
//! The cloud pipeline never talks to a graphics API directly. Hosts hand it
//! views of their own images and implement [`TargetAllocator`] and
//! [`Blitter`] on top of whatever device they drive.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque identifier of a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Width and height of a 2D image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Extent2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg11b10Float,
}

/// How a target is filtered when sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterMode {
    /// Nearest texel, no interpolation.
    Point,
    /// Linear within a level, linear between levels.
    Trilinear,
}

/// Description of a target to allocate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    /// Debug label (visible in GPU debuggers).
    pub label: &'static str,
    pub extent: Extent2d,
    pub format: PixelFormat,
    pub filter: FilterMode,
}

/// A render target handed between passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetView {
    pub id: TargetId,
    pub extent: Extent2d,
    pub format: PixelFormat,
    pub filter: FilterMode,
}

/// Handle to a texture asset bound as an evaluator input.
///
/// `depth` is 1 for 2D textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureRef {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

const fn default_depth() -> u32 {
    1
}

impl TextureRef {
    /// A 2D texture handle.
    pub const fn new_2d(id: u64, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            depth: 1,
        }
    }

    /// A 3D texture handle.
    pub const fn new_3d(id: u64, width: u32, height: u32, depth: u32) -> Self {
        Self {
            id,
            width,
            height,
            depth,
        }
    }

    pub const fn is_volume(&self) -> bool {
        self.depth > 1
    }
}

/// Allocates and frees frame-scoped scratch targets.
pub trait TargetAllocator {
    /// Allocate a target matching `desc`.
    fn acquire(&mut self, desc: &TargetDesc) -> Result<TargetView>;

    /// Free a target previously returned by [`TargetAllocator::acquire`].
    fn release(&mut self, id: TargetId) -> Result<()>;
}

/// Copies one target into another, resampling if extents differ.
pub trait Blitter {
    fn blit(&mut self, source: &TargetView, destination: &TargetView) -> Result<()>;
}

/// Size of a target reduced by `factor` in each dimension.
///
/// Never returns a zero dimension.
pub fn scratch_extent(screen: Extent2d, factor: u32) -> Extent2d {
    let factor = factor.max(1);
    Extent2d {
        width: (screen.width / factor).max(1),
        height: (screen.height / factor).max(1),
    }
}
