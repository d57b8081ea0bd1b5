//! Rays and boxes for volume entry/exit tests.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Half-line with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray, normalizing `direction`.
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// World-aligned box with `min <= max` on every axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box centered at `center` spanning `size`.
    ///
    /// Negative size components are mirrored, so `min <= max` always holds.
    #[inline]
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Entry and exit distances of `ray` through the box.
    ///
    /// Entry is clamped to zero when the origin is inside. Returns `None`
    /// when the ray misses or the box lies behind it.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(f32, f32)> {
        let inverse = ray.direction.recip();
        let to_min = (self.min - ray.origin) * inverse;
        let to_max = (self.max - ray.origin) * inverse;

        let enter = to_min.min(to_max).max_element();
        let exit = to_min.max(to_max).min_element();

        (enter <= exit && exit >= 0.0).then(|| (enter.max(0.0), exit))
    }
}
