//! Test backends for the Nimbus cloud renderer.
//!
//! Provides a recording backend for asserting on pass order and scratch
//! lifetimes, and a CPU software backend for checking rendered output.

pub mod recording;
pub mod scene;
pub mod software;

#[cfg(test)]
mod scenarios;

pub use recording::{Command, RecordingBackend};
pub use scene::{host_frame, test_camera, SkyScene};
pub use software::SoftwareBackend;

use image::{Rgba, Rgba32FImage, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Convert a linear float image to 8-bit, clamping to `[0, 1]`.
pub fn to_rgba8(image: &Rgba32FImage) -> RgbaImage {
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y).0;
        Rgba(pixel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
    })
}

/// Largest per-channel difference between two images of equal size.
pub fn max_difference(a: &Rgba32FImage, b: &Rgba32FImage) -> Result<f32> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    Ok(a.pixels()
        .zip(b.pixels())
        .flat_map(|(pa, pb)| pa.0.into_iter().zip(pb.0).map(|(ca, cb)| (ca - cb).abs()))
        .fold(0.0, f32::max))
}
