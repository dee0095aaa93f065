//! Sampler wrapper and builder.

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};

/// An owning wrapper around a Vulkan sampler.
pub struct Sampler {
    pub sampler: vk::Sampler,
}

impl Sampler {
    /// Start building a sampler.
    pub fn builder() -> SamplerBuilder {
        SamplerBuilder::default()
    }

    /// Destroy the sampler.
    pub fn destroy(&mut self, context: &Context) {
        if self.sampler != vk::Sampler::null() {
            unsafe {
                context.device.destroy_sampler(self.sampler, None);
            }
            self.sampler = vk::Sampler::null();
        }
    }
}

/// Fluent builder for [`Sampler`].
pub struct SamplerBuilder {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub anisotropy: Option<f32>,
    pub compare: Option<vk::CompareOp>,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
    pub label: String,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: None,
            compare: None,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            label: String::new(),
        }
    }
}

impl SamplerBuilder {
    /// Use nearest filtering.
    pub fn nearest(mut self) -> Self {
        self.filter = vk::Filter::NEAREST;
        self.mipmap_mode = vk::SamplerMipmapMode::NEAREST;
        self
    }

    /// Set the address mode for all three axes.
    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    /// Enable anisotropic filtering up to `max`.
    pub fn anisotropy(mut self, max: f32) -> Self {
        self.anisotropy = Some(max);
        self
    }

    /// Enable depth-compare sampling (shadow maps).
    ///
    /// Shadow samplers use clamp-to-border with an opaque-white border so
    /// texels outside the light frustum compare as unshadowed.
    pub fn shadow(mut self) -> Self {
        self.compare = Some(vk::CompareOp::LESS_OR_EQUAL);
        self.address_mode = vk::SamplerAddressMode::CLAMP_TO_BORDER;
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the sampler.
    pub fn build(self, context: &Context) -> RenderResult<Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(self.anisotropy.is_some())
            .max_anisotropy(self.anisotropy.unwrap_or(1.0))
            .compare_enable(self.compare.is_some())
            .compare_op(self.compare.unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(0.0)
            .max_lod(self.max_lod)
            .border_color(self.border_color)
            .unnormalized_coordinates(false);

        let sampler = unsafe { context.device.create_sampler(&sampler_info, None) }.map_err(
            |e| {
                RenderError::ResourceCreationFailed(format!("Failed to create sampler: {:?}", e))
            },
        )?;

        if !self.label.is_empty() {
            context.markers.set_object_name(sampler, &self.label);
        }

        Ok(Sampler { sampler })
    }
}
