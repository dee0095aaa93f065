//! Descriptor set layouts, allocation, and update helpers.
//!
//! Supports the update-after-bind / variable-descriptor-count pattern used
//! by the bindless texture table: a single binding holding a runtime-sized
//! array of combined image samplers. Such sets must be freed and
//! *reallocated* whenever the bound count changes, because the variable
//! descriptor count is fixed at allocation time.

mod layout;
mod pool;
mod writer;

pub use layout::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use pool::DescriptorAllocator;
pub use writer::DescriptorWriter;
