//! Contract tests for the frame ring, shadow topology, and bindless index
//! stability.
//!
//! Everything here runs without a GPU: the properties under test are the
//! CPU-side state machines the render loop is built on.

use glam::Vec3;
use rstest::rstest;

use emberlight::scene::{
    light_buffer_size, Light, LightKind, TextureIndexAllocator,
};
use emberlight::sync::{previous_slot, FrameClock};
use emberlight::MAX_FRAMES_IN_FLIGHT;

// ============================================================================
// Frame ring
// ============================================================================

/// A presented frame advances the ring; a skipped frame (out-of-date
/// acquire) never does, so the slot is reused with its fence still
/// signaled.
#[test]
fn test_skipped_frame_reuses_slot() {
    let mut clock = FrameClock::new(MAX_FRAMES_IN_FLIGHT);

    clock.advance(); // frame 0 presented
    let slot = clock.current();

    // Frame 1 hits an out-of-date swapchain: recreate + early return,
    // no submit, no present, no advance.
    assert_eq!(clock.current(), slot);

    clock.advance(); // frame 1 retried and presented
    assert_eq!(clock.current(), (slot + 1) % MAX_FRAMES_IN_FLIGHT);
}

/// The eye-adaptation ring: slot N reads slot N-1 and the two roles never
/// alias, for every slot and every plausible ring depth.
#[rstest]
#[case(2)]
#[case(3)]
#[case(4)]
fn test_eye_adaptation_ring(#[case] frames: usize) {
    for n in 0..frames * 4 {
        let current = n % frames;
        let previous = previous_slot(current, frames);
        assert_eq!(previous, (n + frames - 1) % frames);
        assert_ne!(current, previous);
    }
}

// ============================================================================
// Shadow topology
// ============================================================================

/// One directional light: exactly one shadow layer, so the lighting pass's
/// directional shadow array holds exactly one descriptor.
#[test]
fn test_single_directional_light_layer_count() {
    let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0);
    assert_eq!(light.shadow_layer_count(), 1);

    let builder = Light::shadow_map_builder(LightKind::Directional, 2048);
    assert_eq!(builder.array_layers, 1);
}

/// Three point lights render six faces each: 18 single-layer depth passes
/// per frame, on cube-compatible 6-layer images.
#[test]
fn test_three_point_lights_render_18_faces() {
    let lights: Vec<Light> = (0..3)
        .map(|i| Light::point(Vec3::new(i as f32, 2.0, 0.0), Vec3::ONE, 10.0, 20.0))
        .collect();

    let total_layer_passes: u32 = lights.iter().map(|l| l.shadow_layer_count()).sum();
    assert_eq!(total_layer_passes, 18);

    let builder = Light::shadow_map_builder(LightKind::Point, 1024);
    assert_eq!(builder.array_layers, 6);
    assert!(builder
        .flags
        .contains(ash::vk::ImageCreateFlags::CUBE_COMPATIBLE));
}

/// A light ring covers every frame in flight so no frame's GPU reads race
/// the CPU re-render of another frame's map.
#[test]
fn test_shadow_ring_depth_matches_frames_in_flight() {
    let mut light = Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 10.0);
    assert!(!light.has_shadow_maps());
    // Until the renderer creates the ring, the light packs slot -1 and
    // shades unshadowed.
    let data = light.to_gpu_data(10.0, -1);
    assert_eq!(data.shadow.x, -1.0);
}

// ============================================================================
// Bindless index stability
// ============================================================================

/// Growing the registry from 10 to 12 textures reallocates the descriptor
/// set with variable count 12 while the first ten slots keep their indices
/// (so push constants recorded against them stay valid).
#[test]
fn test_texture_growth_keeps_stable_indices() {
    let mut allocator = TextureIndexAllocator::new();
    let initial: Vec<u32> = (0..10).map(|_| allocator.allocate()).collect();
    assert_eq!(allocator.count(), 10);

    let extra: Vec<u32> = (0..2).map(|_| allocator.allocate()).collect();
    assert_eq!(allocator.count(), 12);

    // Stable prefix, appended suffix.
    assert_eq!(initial, (0..10).collect::<Vec<u32>>());
    assert_eq!(extra, vec![10, 11]);
}

// ============================================================================
// Light buffer layout
// ============================================================================

/// The structured light buffer is a 4-word header plus a tightly packed
/// light array; resizing is purely a function of the light count.
#[rstest]
#[case(0, 16)]
#[case(1, 144)]
#[case(8, 16 + 8 * 128)]
fn test_light_buffer_sizes(#[case] lights: usize, #[case] expected: u64) {
    assert_eq!(light_buffer_size(lights), expected);
}
