//! CPU implementation of the cloud passes.
//!
//! Images are `Rgba32FImage`s keyed by target id. Scene depth images store
//! the distance along each pixel's view ray in the red channel, with
//! `f32::INFINITY` for sky. The march is a plain Beer–Lambert integration of
//! an analytic density through the bounds box; it exists to make the pass
//! contract observable, not to look good.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};
use image::{imageops, Rgba, Rgba32FImage};
use nimbus_core::{Aabb, Ray};
use nimbus_gpu::scratch_pool::SCRATCH_ID_BASE;
use nimbus_gpu::{
    Blitter, FilterMode, GpuError, PixelFormat, TargetAllocator, TargetDesc, TargetId, TargetView,
    TextureRef,
};
use nimbus_render::{
    BindingId, BindingValue, CloudEvaluator, EvaluatorInputSet, FrameTargets, LowResClouds,
    LowResDepth, RenderServices,
};
use parking_lot::Mutex;

const MAX_STEPS: u32 = 64;
/// Extinction per world unit at unit density.
const EXTINCTION_SCALE: f32 = 0.01;
/// Half height of the volume in local units, `0.5 / LOCAL_SCALE_FACTOR`.
const LOCAL_HALF_EXTENT: f32 = 5.0;

#[derive(Default)]
struct Store {
    images: HashMap<TargetId, Rgba32FImage>,
}

impl Store {
    fn get(&self, id: TargetId) -> nimbus_gpu::Result<&Rgba32FImage> {
        self.images
            .get(&id)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("image {id:?}")))
    }

    fn replace(&mut self, id: TargetId, image: Rgba32FImage) -> nimbus_gpu::Result<()> {
        let slot = self
            .images
            .get_mut(&id)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("image {id:?}")))?;
        *slot = image;
        Ok(())
    }
}

type Shared = Arc<Mutex<Store>>;

fn to_vec4(pixel: &Rgba<f32>) -> Vec4 {
    Vec4::from_array(pixel.0)
}

fn to_pixel(value: Vec4) -> Rgba<f32> {
    Rgba(value.to_array())
}

/// Texel centre of `x` in a `size`-wide image, mapped into a `target`-wide one.
fn nearest_index(x: u32, size: u32, target: u32) -> u32 {
    let scaled = (u64::from(x) * 2 + 1) * u64::from(target) / (u64::from(size) * 2);
    u32::try_from(scaled).unwrap_or(u32::MAX).min(target.saturating_sub(1))
}

fn sample_bilinear(image: &Rgba32FImage, uv: Vec2) -> Vec4 {
    let (width, height) = image.dimensions();
    let x = uv.x * width as f32 - 0.5;
    let y = uv.y * height as f32 - 0.5;
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);

    let clamp_x = |v: f32| v.clamp(0.0, (width - 1) as f32) as u32;
    let clamp_y = |v: f32| v.clamp(0.0, (height - 1) as f32) as u32;
    let texel = |px: f32, py: f32| to_vec4(image.get_pixel(clamp_x(px), clamp_y(py)));

    let top = texel(x0, y0).lerp(texel(x0 + 1.0, y0), fx);
    let bottom = texel(x0, y0 + 1.0).lerp(texel(x0 + 1.0, y0 + 1.0), fx);
    top.lerp(bottom, fy)
}

fn pixel_hash(x: u32, y: u32) -> f32 {
    let mut h = x.wrapping_mul(0x8da6_b343) ^ y.wrapping_mul(0xd816_3841);
    h ^= h >> 13;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 16;
    (h & 0xffff) as f32 / 65535.0
}

/// Scratch allocator half of [`SoftwareBackend`].
pub struct SoftwareAllocator {
    store: Shared,
    next_id: u64,
}

impl TargetAllocator for SoftwareAllocator {
    fn acquire(&mut self, desc: &TargetDesc) -> nimbus_gpu::Result<TargetView> {
        if desc.extent.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "{} has an empty extent {}",
                desc.label, desc.extent
            )));
        }
        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.store.lock().images.insert(
            id,
            Rgba32FImage::new(desc.extent.width, desc.extent.height),
        );
        tracing::debug!("Acquired {} {} as {:?}", desc.label, desc.extent, id);
        Ok(TargetView {
            id,
            extent: desc.extent,
            format: desc.format,
            filter: desc.filter,
        })
    }

    fn release(&mut self, id: TargetId) -> nimbus_gpu::Result<()> {
        self.store
            .lock()
            .images
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("scratch target {id:?}")))
    }
}

/// Blitter half of [`SoftwareBackend`]. Resamples with nearest filtering.
pub struct SoftwareBlitter {
    store: Shared,
}

impl Blitter for SoftwareBlitter {
    fn blit(&mut self, source: &TargetView, destination: &TargetView) -> nimbus_gpu::Result<()> {
        let mut store = self.store.lock();
        let copy = {
            let image = store.get(source.id)?;
            if source.extent == destination.extent {
                image.clone()
            } else {
                imageops::resize(
                    image,
                    destination.extent.width,
                    destination.extent.height,
                    imageops::FilterType::Nearest,
                )
            }
        };
        store.replace(destination.id, copy)
    }
}

/// Cloud parameters the march reads, pulled out of an input set.
struct MarchParams {
    inverse_projection: Mat4,
    inverse_view: Mat4,
    bounds: Aabb,
    local_frame: Mat4,
    step: f32,
    shape_tiling: f32,
    density_offset: f32,
    density_multiplier: f32,
    height_weights: f32,
    absorption: f32,
    col_a: Vec3,
    col_b: Vec3,
    color_offset1: f32,
    jitter_strength: f32,
}

impl MarchParams {
    /// `None` when the volume was not bound this frame.
    fn from_inputs(
        inputs: &EvaluatorInputSet,
        blue_noise_bound: bool,
    ) -> nimbus_gpu::Result<Option<Self>> {
        let (Some(inverse_projection), Some(inverse_view)) = (
            inputs.matrix(BindingId::InverseProjection),
            inputs.matrix(BindingId::InverseView),
        ) else {
            return Err(GpuError::InvalidState(
                "camera matrices are not bound".to_string(),
            ));
        };

        let (Some(min), Some(max), Some(local_frame)) = (
            inputs.vector(BindingId::BoundsMin),
            inputs.vector(BindingId::BoundsMax),
            inputs.matrix(BindingId::LocalFrame),
        ) else {
            return Ok(None);
        };

        let float = |id| inputs.float(id).unwrap_or(0.0);
        let colour = |id| inputs.vector(id).unwrap_or(Vec4::ONE).xyz();
        let jitter_strength = if blue_noise_bound {
            float(BindingId::RayOffsetStrength).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(Some(Self {
            inverse_projection,
            inverse_view,
            bounds: Aabb::new(min.xyz(), max.xyz()),
            local_frame,
            step: float(BindingId::Step).max(1e-3),
            shape_tiling: float(BindingId::ShapeTiling),
            density_offset: float(BindingId::DensityOffset),
            density_multiplier: float(BindingId::DensityMultiplier),
            height_weights: float(BindingId::HeightWeights),
            absorption: float(BindingId::LightAbsorptionThroughCloud),
            col_a: colour(BindingId::ColA),
            col_b: colour(BindingId::ColB),
            color_offset1: float(BindingId::ColorOffset1),
            jitter_strength,
        }))
    }

    fn ray(&self, uv: Vec2) -> Ray {
        // Any depth inside the frustum lies on the pixel's ray.
        let clip = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.5, 1.0);
        let view = self.inverse_projection * clip;
        let direction = self.inverse_view.transform_vector3(view.xyz() / view.w);
        Ray::new(self.inverse_view.w_axis.xyz(), direction)
    }

    fn height_fraction(local: Vec3) -> f32 {
        ((local.y + LOCAL_HALF_EXTENT) / (2.0 * LOCAL_HALF_EXTENT)).clamp(0.0, 1.0)
    }

    fn density(&self, local: Vec3) -> f32 {
        let h = Self::height_fraction(local);
        let profile = 1.0 + (4.0 * h * (1.0 - h) - 1.0) * self.height_weights;
        let frequency = std::f32::consts::TAU * self.shape_tiling * 10.0;
        let lumps = 0.5 + 0.5 * (local.x * frequency).sin() * (local.z * frequency).cos();
        (profile * lumps * self.density_multiplier - self.density_offset * 0.1).max(0.0)
    }

    /// Premultiplied colour in `xyz`, transmittance in `w`.
    fn march(&self, ray: &Ray, scene_depth: f32, jitter: f32) -> Vec4 {
        let Some((t_enter, t_exit)) = self.bounds.intersect_ray(ray) else {
            return Vec4::W;
        };
        let t_exit = t_exit.min(scene_depth);
        if t_exit <= t_enter {
            return Vec4::W;
        }

        let span = t_exit - t_enter;
        let steps = ((span / self.step).ceil() as u32).clamp(1, MAX_STEPS);
        let dt = span / steps as f32;
        let offset = (jitter - 0.5) * dt * self.jitter_strength;

        let mut transmittance = 1.0;
        let mut light = Vec3::ZERO;
        for i in 0..steps {
            let t = t_enter + dt * (i as f32 + 0.5) + offset;
            let local = self.local_frame.transform_point3(ray.at(t));
            let density = self.density(local);
            if density <= 0.0 {
                continue;
            }

            let h = Self::height_fraction(local);
            let colour = self
                .col_a
                .lerp(self.col_b, (h * self.color_offset1).clamp(0.0, 1.0));
            let step_transmittance = (-density * self.absorption * EXTINCTION_SCALE * dt).exp();
            light += colour * transmittance * (1.0 - step_transmittance);
            transmittance *= step_transmittance;
            if transmittance < 0.01 {
                break;
            }
        }
        light.extend(transmittance)
    }
}

/// Evaluator half of [`SoftwareBackend`].
///
/// Texture bindings persist across frames: a frame that leaves a texture
/// unbound keeps the one bound before.
pub struct SoftwareEvaluator {
    store: Shared,
    textures: BTreeMap<BindingId, TextureRef>,
}

impl SoftwareEvaluator {
    /// Texture currently bound under `id`.
    pub fn bound_texture(&self, id: BindingId) -> Option<TextureRef> {
        self.textures.get(&id).copied()
    }

    fn bind_textures(&mut self, inputs: &EvaluatorInputSet) {
        for (id, value) in inputs.iter() {
            if let BindingValue::Texture(texture) = value {
                self.textures.insert(id, *texture);
            }
        }
    }
}

impl CloudEvaluator for SoftwareEvaluator {
    fn downsample_depth(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()> {
        self.bind_textures(inputs);
        let mut store = self.store.lock();
        let low = {
            let depth = store.get(frame.source_depth.id)?;
            let (width, height) = depth.dimensions();
            Rgba32FImage::from_fn(target.extent.width, target.extent.height, |x, y| {
                *depth.get_pixel(
                    nearest_index(x, target.extent.width, width),
                    nearest_index(y, target.extent.height, height),
                )
            })
        };
        store.replace(target.id, low)
    }

    fn evaluate(
        &mut self,
        inputs: &EvaluatorInputSet,
        _frame: &FrameTargets,
        depth: &LowResDepth,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()> {
        self.bind_textures(inputs);
        let blue_noise = self.textures.contains_key(&BindingId::BlueNoise);
        let params = MarchParams::from_inputs(inputs, blue_noise)?;

        let mut store = self.store.lock();
        let clouds = {
            let low_depth = store.get(depth.target().id)?;
            let (width, height) = (target.extent.width, target.extent.height);
            Rgba32FImage::from_fn(width, height, |x, y| {
                let Some(params) = &params else {
                    return to_pixel(Vec4::W);
                };
                let uv = Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                );
                let scene_depth = low_depth
                    .get_pixel(
                        nearest_index(x, width, low_depth.width()),
                        nearest_index(y, height, low_depth.height()),
                    )
                    .0[0];
                to_pixel(params.march(&params.ray(uv), scene_depth, pixel_hash(x, y)))
            })
        };
        store.replace(target.id, clouds)
    }

    fn composite(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        _depth: &LowResDepth,
        clouds: &LowResClouds,
    ) -> nimbus_gpu::Result<()> {
        self.bind_textures(inputs);
        let mut store = self.store.lock();
        let output = {
            let source = store.get(frame.source_color.id)?;
            let low = store.get(clouds.target().id)?;
            let (width, height) = (frame.destination.extent.width, frame.destination.extent.height);
            Rgba32FImage::from_fn(width, height, |x, y| {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                );
                let cloud = sample_bilinear(low, uv);
                let scene = to_vec4(source.get_pixel(
                    nearest_index(x, width, source.width()),
                    nearest_index(y, height, source.height()),
                ));
                let colour = scene.xyz() * cloud.w + cloud.xyz();
                to_pixel(colour.extend(scene.w))
            })
        };
        store.replace(frame.destination.id, output)
    }
}

/// Allocator, evaluator and blitter over one in-memory image store.
pub struct SoftwareBackend {
    store: Shared,
    next_host_id: u64,
    pub allocator: SoftwareAllocator,
    pub evaluator: SoftwareEvaluator,
    pub blitter: SoftwareBlitter,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        let store = Shared::default();
        Self {
            allocator: SoftwareAllocator {
                store: store.clone(),
                next_id: SCRATCH_ID_BASE,
            },
            evaluator: SoftwareEvaluator {
                store: store.clone(),
                textures: BTreeMap::new(),
            },
            blitter: SoftwareBlitter {
                store: store.clone(),
            },
            store,
            next_host_id: 1,
        }
    }

    /// Register a host-owned image.
    pub fn add_image(&mut self, image: Rgba32FImage) -> TargetView {
        let id = TargetId(self.next_host_id);
        self.next_host_id += 1;
        let extent = nimbus_gpu::Extent2d::new(image.width(), image.height());
        self.store.lock().images.insert(id, image);
        TargetView {
            id,
            extent,
            format: PixelFormat::Rgba32Float,
            filter: FilterMode::Point,
        }
    }

    pub fn image(&self, id: TargetId) -> Option<Rgba32FImage> {
        self.store.lock().images.get(&id).cloned()
    }

    /// Scratch images currently allocated.
    pub fn scratch_count(&self) -> usize {
        self.store
            .lock()
            .images
            .keys()
            .filter(|id| id.0 >= SCRATCH_ID_BASE)
            .count()
    }

    pub fn services(&mut self) -> RenderServices<'_> {
        RenderServices {
            allocator: &mut self.allocator,
            evaluator: &mut self.evaluator,
            blitter: &mut self.blitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_gpu::Extent2d;

    fn filled(width: u32, height: u32, value: f32) -> Rgba32FImage {
        Rgba32FImage::from_pixel(width, height, Rgba([value, value, value, 1.0]))
    }

    #[test]
    fn nearest_index_maps_texel_centres() {
        assert_eq!(nearest_index(0, 4, 16), 2);
        assert_eq!(nearest_index(3, 4, 16), 14);
        assert_eq!(nearest_index(15, 16, 4), 3);
        assert_eq!(nearest_index(0, 1, 1), 0);
    }

    #[test]
    fn bilinear_interpolates_between_texels() {
        let mut image = Rgba32FImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([0.0; 4]));
        image.put_pixel(1, 0, Rgba([1.0; 4]));
        let mid = sample_bilinear(&image, Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
        let edge = sample_bilinear(&image, Vec2::new(0.0, 0.5));
        assert!(edge.x.abs() < 1e-6);
    }

    #[test]
    fn blit_resamples_to_destination() {
        let mut backend = SoftwareBackend::new();
        let source = backend.add_image(filled(8, 8, 0.25));
        let destination = backend.add_image(Rgba32FImage::new(4, 2));
        backend.blitter.blit(&source, &destination).unwrap();
        let copy = backend.image(destination.id).unwrap();
        assert_eq!(copy.dimensions(), (4, 2));
        assert_eq!(copy.get_pixel(3, 1).0, [0.25, 0.25, 0.25, 1.0]);
    }

    #[test]
    fn release_frees_the_image() {
        let mut backend = SoftwareBackend::new();
        let desc = TargetDesc {
            label: "scratch",
            extent: Extent2d::new(4, 4),
            format: PixelFormat::Rgba32Float,
            filter: FilterMode::Point,
        };
        let target = backend.allocator.acquire(&desc).unwrap();
        assert_eq!(backend.scratch_count(), 1);
        backend.allocator.release(target.id).unwrap();
        assert_eq!(backend.scratch_count(), 0);
        assert!(backend.allocator.release(target.id).is_err());
    }

    #[test]
    fn depth_downsample_point_samples() {
        let mut backend = SoftwareBackend::new();
        let mut depth = Rgba32FImage::new(4, 4);
        for (x, y, pixel) in depth.enumerate_pixels_mut() {
            let value = (y * 4 + x) as f32;
            *pixel = Rgba([value, value, value, 1.0]);
        }
        let depth = backend.add_image(depth);
        let colour = backend.add_image(filled(4, 4, 0.0));
        let frame = FrameTargets {
            source_color: colour,
            source_depth: depth,
            destination: colour,
        };
        let target = backend
            .allocator
            .acquire(&TargetDesc {
                label: "low depth",
                extent: Extent2d::new(2, 2),
                format: PixelFormat::Rgba32Float,
                filter: FilterMode::Point,
            })
            .unwrap();

        backend
            .evaluator
            .downsample_depth(&EvaluatorInputSet::new(), &frame, &target)
            .unwrap();

        let low = backend.image(target.id).unwrap();
        // Every value is an exact source texel, never a blend.
        assert_eq!(low.get_pixel(0, 0).0[0], 5.0);
        assert_eq!(low.get_pixel(1, 1).0[0], 15.0);
    }

    #[test]
    fn unbound_textures_keep_previous_binding() {
        let mut backend = SoftwareBackend::new();
        let weather = TextureRef::new_2d(9, 256, 256);

        let mut first = EvaluatorInputSet::new();
        first.set_texture(BindingId::WeatherMap, Some(weather));
        backend.evaluator.bind_textures(&first);
        backend.evaluator.bind_textures(&EvaluatorInputSet::new());

        assert_eq!(
            backend.evaluator.bound_texture(BindingId::WeatherMap),
            Some(weather)
        );
        assert_eq!(backend.evaluator.bound_texture(BindingId::BlueNoise), None);
    }
}
