//! Owning wrappers around device child objects.
//!
//! Every wrapper destroys its native object exactly once when dropped and keeps the device
//! alive until then.

pub mod handle;
pub mod sync;
pub mod image;
pub mod buffer;
pub mod descriptor;
pub mod render_pass;
pub mod framebuffer;
pub mod pipeline;
pub mod query;
pub mod command_pool;
pub mod swapchain;

pub use handle::{Destroy, DeviceHandle, Handle, Unowned};
pub use sync::{Fence, Semaphore, TimelineSemaphore, WaitResult, INFINITE_TIMEOUT};
pub use image::{Image, ImageKind, ImageView, Sampler};
pub use buffer::Buffer;
pub use descriptor::{DescriptorPool, DescriptorResource, DescriptorSet, DescriptorSetLayout, LayoutBinding};
pub use render_pass::{RenderPass, RenderPassBuilder, SubpassDescription};
pub use framebuffer::FrameBuffer;
pub use pipeline::{ComputePipeline, ComputePipelineCreateInfo, GraphicsPipeline, GraphicsPipelineCreateInfo, PipelineCache, PipelineLayout, SpecializationConstants};
pub use query::QueryPool;
pub use command_pool::CommandPool;
pub use swapchain::{AcquireStatus, PresentStatus, Swapchain};
