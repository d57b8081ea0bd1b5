//! Cloud volume marker and the bounds derived from it.
//!
//! A volume marker is a plain transform placed in the scene to say where the
//! cloud layer lives. Every frame the marker is resolved into two things the
//! evaluator consumes:
//! - a world-aligned bounding box used for ray/box entry and exit,
//! - a rotation-aware local frame used for density sampling.
//!
//! The box ignores the marker's rotation while the local frame honours it.

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::Aabb;

/// World-space bounds of the cloud volume.
pub type VolumeBounds = Aabb;

/// Multiplier applied to the marker scale before it is inverted for the local frame.
///
/// Keeps local density coordinates independent of the authored box size.
pub const LOCAL_SCALE_FACTOR: f32 = 0.1;

/// Transform of the volume marker as authored in the host scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerTransform {
    /// World-space position of the marker.
    pub position: Vec3,
    /// Euler angles in degrees, applied Z, then X, then Y.
    pub rotation: Vec3,
    /// Local scale; doubles as the full size of the volume box.
    pub scale: Vec3,
}

impl Default for MarkerTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl MarkerTransform {
    /// Create an unrotated marker.
    pub const fn new(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::ZERO,
            scale,
        }
    }

    /// Set the Euler rotation in degrees.
    #[must_use]
    pub fn with_rotation(mut self, degrees: Vec3) -> Self {
        self.rotation = degrees;
        self
    }

    /// Rotation as a quaternion.
    pub fn rotation_quat(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.rotation.y.to_radians(),
            self.rotation.x.to_radians(),
            self.rotation.z.to_radians(),
        )
    }

    /// World-aligned bounds, `position ± scale / 2`.
    pub fn bounds(&self) -> VolumeBounds {
        Aabb::from_center_size(self.position, self.scale)
    }

    /// Local density frame of this marker.
    ///
    /// Fails when any scale component is zero or not finite.
    pub fn local_frame(&self) -> Result<LocalFrameTransform> {
        let scaled = self.scale * LOCAL_SCALE_FACTOR;
        if !scaled.is_finite() || scaled.cmpeq(Vec3::ZERO).any() {
            return Err(Error::DegenerateVolume(format!(
                "marker scale {} has a zero or non-finite component",
                self.scale
            )));
        }
        Ok(LocalFrameTransform::new(
            self.position,
            self.rotation_quat(),
            scaled.recip(),
        ))
    }

    /// Resolve bounds and local frame together.
    pub fn resolve(&self) -> Result<ResolvedVolume> {
        Ok(ResolvedVolume {
            bounds: self.bounds(),
            local_frame: self.local_frame()?,
        })
    }
}

/// World-to-local transform of the cloud volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrameTransform {
    matrix: Mat4,
    inverse_scale: Vec3,
}

impl LocalFrameTransform {
    /// Build from translation, rotation and the already inverted scale.
    ///
    /// The marker position maps to the local origin, the marker axes map to
    /// the local axes, and distances shrink by `inverse_scale`.
    pub fn new(translation: Vec3, rotation: Quat, inverse_scale: Vec3) -> Self {
        let matrix = Mat4::from_scale(inverse_scale)
            * Mat4::from_quat(rotation.inverse())
            * Mat4::from_translation(-translation);
        Self {
            matrix,
            inverse_scale,
        }
    }

    /// The 4x4 world-to-local matrix.
    #[inline]
    pub const fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// The inverted, rescaled marker scale.
    #[inline]
    pub const fn inverse_scale(&self) -> Vec3 {
        self.inverse_scale
    }

    /// Map a world-space point into the local frame.
    #[inline]
    pub fn to_local(&self, world: Vec3) -> Vec3 {
        self.matrix.transform_point3(world)
    }
}

/// Bounds and local frame resolved from one marker lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedVolume {
    pub bounds: VolumeBounds,
    pub local_frame: LocalFrameTransform,
}

/// Source of the cloud volume for a frame.
///
/// `None` means no usable marker exists this frame.
pub trait VolumeProvider {
    fn resolve_volume(&self) -> Option<ResolvedVolume>;
}

impl VolumeProvider for MarkerTransform {
    fn resolve_volume(&self) -> Option<ResolvedVolume> {
        match self.resolve() {
            Ok(volume) => Some(volume),
            Err(e) => {
                // Repeats every frame the marker stays degenerate.
                tracing::debug!("Ignoring cloud volume marker: {e}");
                None
            }
        }
    }
}

impl VolumeProvider for Option<MarkerTransform> {
    fn resolve_volume(&self) -> Option<ResolvedVolume> {
        self.as_ref().and_then(MarkerTransform::resolve_volume)
    }
}

impl VolumeProvider for ResolvedVolume {
    fn resolve_volume(&self) -> Option<ResolvedVolume> {
        Some(*self)
    }
}

/// Adapts a lookup closure into a [`VolumeProvider`].
pub struct VolumeFn<F>(pub F);

impl<F> VolumeProvider for VolumeFn<F>
where
    F: Fn() -> Option<MarkerTransform>,
{
    fn resolve_volume(&self) -> Option<ResolvedVolume> {
        (self.0)().resolve_volume()
    }
}
