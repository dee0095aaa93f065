//! Owning wrappers around GPU memory allocations.
//!
//! All resources are destroyed explicitly via `destroy(&Context)`, never by
//! `Drop`, since destruction requires the device handle. Owners that cannot
//! destroy at a known-safe point push a closure onto a deletion queue
//! instead.

mod buffer;
mod image;
mod sampler;

pub use buffer::{Buffer, BufferBuilder};
pub use image::{transition_masks, Image, ImageBuilder, TransitionMasks};
pub use sampler::{Sampler, SamplerBuilder};
