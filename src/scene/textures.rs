//! Bindless texture registry.
//!
//! Every texture a mesh references is registered here once, at load time,
//! and receives a stable slot index from an explicit allocator. The geometry
//! pass binds the whole registry as a single variable-count descriptor
//! array; materials record their slots into push constants. Because slots
//! are assigned at registration and never recomputed from iteration order,
//! draw order and descriptor-write order cannot drift apart.

use ash::vk;

use crate::context::Context;
use crate::error::{RenderError, RenderResult};
use crate::resources::{Image, Sampler};

/// Capacity of the bindless texture array binding.
pub const MAX_BINDLESS_TEXTURES: u32 = 256;

/// Hands out bindless slot indices deterministically, in registration order.
#[derive(Debug, Default, Clone)]
pub struct TextureIndexAllocator {
    next: u32,
}

impl TextureIndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next slot.
    pub fn allocate(&mut self) -> u32 {
        let slot = self.next;
        self.next += 1;
        slot
    }

    /// Number of slots allocated so far.
    pub fn count(&self) -> u32 {
        self.next
    }
}

/// Owns all registered textures, their shared sampler, and the slot
/// allocator.
pub struct TextureRegistry {
    entries: Vec<Image>,
    allocator: TextureIndexAllocator,
    sampler: Sampler,
}

impl TextureRegistry {
    /// Create the registry with its shared trilinear sampler.
    pub fn new(context: &Context) -> RenderResult<Self> {
        let sampler = Sampler::builder()
            .anisotropy(8.0)
            .label("texture registry sampler")
            .build(context)?;
        Ok(Self {
            entries: Vec::new(),
            allocator: TextureIndexAllocator::new(),
            sampler,
        })
    }

    /// Register an already-built image and return its stable slot.
    pub fn register(&mut self, image: Image) -> RenderResult<u32> {
        if self.allocator.count() >= MAX_BINDLESS_TEXTURES {
            return Err(RenderError::ResourceCreationFailed(format!(
                "bindless texture table is full ({} slots)",
                MAX_BINDLESS_TEXTURES
            )));
        }
        let slot = self.allocator.allocate();
        debug_assert_eq!(slot as usize, self.entries.len());
        self.entries.push(image);
        Ok(slot)
    }

    /// Decode an image file, upload it with a full mip chain, and register it.
    pub fn load_from_file(&mut self, context: &Context, path: &str) -> RenderResult<u32> {
        let decoded = image::open(path)
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "failed to decode texture {}: {}",
                    path, e
                ))
            })?
            .to_rgba8();
        let (width, height) = decoded.dimensions();

        let uploaded = Image::builder(
            vk::Extent2D { width, height },
            vk::Format::R8G8B8A8_UNORM,
        )
        .usage(vk::ImageUsageFlags::SAMPLED)
        .full_mip_chain()
        .initial_data(decoded.as_raw())
        .label(path.to_string())
        .build(context)?;

        self.register(uploaded)
    }

    /// Register a 1x1 solid-color texture (fallback albedo, flat normals).
    pub fn register_solid(&mut self, context: &Context, rgba: [u8; 4]) -> RenderResult<u32> {
        let uploaded = Image::builder(
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            vk::Format::R8G8B8A8_UNORM,
        )
        .usage(vk::ImageUsageFlags::SAMPLED)
        .initial_data(&rgba)
        .label(format!("solid {:?}", rgba))
        .build(context)?;

        self.register(uploaded)
    }

    /// Number of registered textures.
    pub fn count(&self) -> u32 {
        self.allocator.count()
    }

    /// The shared sampler for every registry texture.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.sampler
    }

    /// Image views in ascending slot order: the exact sequence the bindless
    /// descriptor array is written with. Calling this twice with an
    /// unchanged registry yields an identical plan, which is what makes
    /// descriptor reallocation idempotent.
    pub fn view_plan(&self) -> Vec<vk::ImageView> {
        self.entries.iter().map(|image| image.view).collect()
    }

    /// Destroy all textures and the sampler.
    pub fn destroy(&mut self, context: &Context) {
        for mut image in self.entries.drain(..) {
            image.destroy(context);
        }
        self.sampler.destroy(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_deterministic() {
        let mut allocator = TextureIndexAllocator::new();
        let slots: Vec<u32> = (0..5).map(|_| allocator.allocate()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
        assert_eq!(allocator.count(), 5);
    }

    #[test]
    fn test_slots_are_stable_across_growth() {
        // Growing the set from 10 to 12 textures must not move the first 10
        // slots; only two new trailing slots appear.
        let mut allocator = TextureIndexAllocator::new();
        let first_ten: Vec<u32> = (0..10).map(|_| allocator.allocate()).collect();
        let eleventh = allocator.allocate();
        let twelfth = allocator.allocate();

        assert_eq!(first_ten, (0..10).collect::<Vec<u32>>());
        assert_eq!(eleventh, 10);
        assert_eq!(twelfth, 11);
        assert_eq!(allocator.count(), 12);
    }
}
