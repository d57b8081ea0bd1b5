//! Vulkan-backed scratch targets.
//!
//! Each scratch target owns one image, one image view and one sampler whose
//! filtering matches the requested [`FilterMode`]. Everything is destroyed
//! when the target is released.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuImage};
use crate::target::{FilterMode, PixelFormat, TargetAllocator, TargetDesc, TargetId, TargetView};

/// First id handed out by the pool; host-owned targets should stay below it.
pub const SCRATCH_ID_BASE: u64 = 1 << 48;

const ALL_FORMATS: [PixelFormat; 6] = [
    PixelFormat::Rgba8Unorm,
    PixelFormat::Rgba8Srgb,
    PixelFormat::Bgra8Unorm,
    PixelFormat::Rgba16Float,
    PixelFormat::Rgba32Float,
    PixelFormat::Rg11b10Float,
];

/// Vulkan format for a pixel format.
pub const fn vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        PixelFormat::Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
    }
}

/// Sampler filter and mipmap mode for a filter mode.
pub const fn sampler_filters(filter: FilterMode) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        FilterMode::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        FilterMode::Trilinear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

/// Optimal-tiling format features of the physical device.
#[derive(Debug, Clone, Default)]
pub struct FormatSupport {
    features: HashMap<PixelFormat, vk::FormatFeatureFlags>,
}

impl FormatSupport {
    /// Query format features for every [`PixelFormat`].
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let features = ALL_FORMATS
            .iter()
            .map(|&format| {
                let properties = unsafe {
                    instance.get_physical_device_format_properties(physical_device, vk_format(format))
                };
                (format, properties.optimal_tiling_features)
            })
            .collect();
        Self { features }
    }

    /// Build from explicit feature flags.
    pub fn from_features(
        features: impl IntoIterator<Item = (PixelFormat, vk::FormatFeatureFlags)>,
    ) -> Self {
        Self {
            features: features.into_iter().collect(),
        }
    }

    /// Whether `format` can be rendered to and sampled with `filter`.
    pub fn supports(&self, format: PixelFormat, filter: FilterMode) -> bool {
        let mut required =
            vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE;
        if filter == FilterMode::Trilinear {
            required |= vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        }
        self.features
            .get(&format)
            .is_some_and(|features| features.contains(required))
    }
}

/// A live scratch target.
pub struct ScratchImage {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub desc: TargetDesc,
}

/// Scratch target allocator backed by `gpu-allocator`.
pub struct VulkanScratchPool {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    support: FormatSupport,
    live: HashMap<TargetId, ScratchImage>,
    next_id: u64,
}

impl VulkanScratchPool {
    /// Create a pool allocating from `allocator`.
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<GpuAllocator>>,
        support: FormatSupport,
    ) -> Self {
        Self {
            device,
            allocator,
            support,
            live: HashMap::new(),
            next_id: SCRATCH_ID_BASE,
        }
    }

    /// Look up a live scratch target.
    pub fn get(&self, id: TargetId) -> Option<&ScratchImage> {
        self.live.get(&id)
    }

    /// Number of targets acquired and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Release every live target.
    ///
    /// Call during shutdown after `device_wait_idle()`.
    pub fn release_all(&mut self) -> Result<()> {
        let ids: Vec<TargetId> = self.live.keys().copied().collect();
        for id in ids {
            self.release(id)?;
        }
        Ok(())
    }

    fn create(&self, desc: &TargetDesc) -> Result<ScratchImage> {
        let format = vk_format(desc.format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = self.allocator.lock().create_image(&image_info, desc.label)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.allocator.lock().free_image(&mut image)?;
                return Err(GpuError::Other(format!("Failed to create image view: {e}")));
            }
        };

        let (filter, mipmap_mode) = sampler_filters(desc.filter);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = match unsafe { self.device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { self.device.destroy_image_view(view, None) };
                self.allocator.lock().free_image(&mut image)?;
                return Err(GpuError::Other(format!("Failed to create sampler: {e}")));
            }
        };

        Ok(ScratchImage {
            image,
            view,
            sampler,
            desc: desc.clone(),
        })
    }
}

impl TargetAllocator for VulkanScratchPool {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn acquire(&mut self, desc: &TargetDesc) -> Result<TargetView> {
        if desc.extent.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "{} has an empty extent {}",
                desc.label, desc.extent
            )));
        }
        if !self.support.supports(desc.format, desc.filter) {
            return Err(GpuError::UnsupportedFormat(format!(
                "{:?} with {:?} filtering for {}",
                desc.format, desc.filter, desc.label
            )));
        }

        let scratch = self.create(desc)?;
        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, scratch);

        tracing::debug!("Acquired {} {} as {:?}", desc.label, desc.extent, id);
        Ok(TargetView {
            id,
            extent: desc.extent,
            format: desc.format,
            filter: desc.filter,
        })
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn release(&mut self, id: TargetId) -> Result<()> {
        let mut scratch = self
            .live
            .remove(&id)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("scratch target {id:?}")))?;

        unsafe {
            self.device.destroy_sampler(scratch.sampler, None);
            self.device.destroy_image_view(scratch.view, None);
        }
        self.allocator.lock().free_image(&mut scratch.image)?;

        tracing::debug!("Released {} {:?}", scratch.desc.label, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderable() -> vk::FormatFeatureFlags {
        vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE
    }

    #[test]
    fn formats_map_to_vulkan() {
        assert_eq!(
            vk_format(PixelFormat::Rgba16Float),
            vk::Format::R16G16B16A16_SFLOAT
        );
        assert_eq!(
            vk_format(PixelFormat::Rg11b10Float),
            vk::Format::B10G11R11_UFLOAT_PACK32
        );
    }

    #[test]
    fn point_filter_never_interpolates() {
        assert_eq!(
            sampler_filters(FilterMode::Point),
            (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST)
        );
        assert_eq!(
            sampler_filters(FilterMode::Trilinear),
            (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR)
        );
    }

    #[test]
    fn trilinear_needs_linear_filtering_support() {
        let support = FormatSupport::from_features([
            (PixelFormat::Rgba32Float, renderable()),
            (
                PixelFormat::Rgba16Float,
                renderable() | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            ),
        ]);

        assert!(support.supports(PixelFormat::Rgba32Float, FilterMode::Point));
        assert!(!support.supports(PixelFormat::Rgba32Float, FilterMode::Trilinear));
        assert!(support.supports(PixelFormat::Rgba16Float, FilterMode::Trilinear));
        assert!(!support.supports(PixelFormat::Rgba8Unorm, FilterMode::Point));
    }
}
