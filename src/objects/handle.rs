//! Single owner wrappers around native handles.
//!
//! A [`Handle`] pairs a native handle with the object that knows how to destroy it. Consumers
//! which must not influence the lifetime of an object hold an [`Unowned`] copy instead. Using an
//! [`Unowned`] handle after its owner was dropped is undefined behaviour and is not checked.

use std::fmt::{Debug, Formatter};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceFunctions;
use crate::error::{channel, Error};

/// Implemented by objects able to destroy handles of type `H`.
pub trait Destroy<H> {
    /// # Safety
    /// The handle must have been created by this owner and must not be in use.
    unsafe fn destroy(&self, handle: H) -> Result<(), Error>;
}

impl<H, T: Destroy<H>> Destroy<H> for Arc<T> {
    unsafe fn destroy(&self, handle: H) -> Result<(), Error> {
        T::destroy(self.as_ref(), handle)
    }
}

/// A move only owner of a native handle. The handle is destroyed exactly once when dropped.
pub struct Handle<H: vk::Handle + Copy, O: Destroy<H>> {
    handle: H,
    owner: O,
}

impl<H: vk::Handle + Copy, O: Destroy<H>> Handle<H, O> {
    /// Runs the creation function and wraps its result. If the creation fails no handle is
    /// constructed.
    pub fn create<F>(owner: O, create: F) -> Result<Self, Error> where F: FnOnce(&O) -> Result<H, Error> {
        let handle = create(&owner)?;
        Ok(Self {
            handle,
            owner,
        })
    }

    /// # Safety
    /// The handle must have been created by the owner and must not be owned by anything else.
    pub unsafe fn from_raw(owner: O, handle: H) -> Self {
        Self {
            handle,
            owner,
        }
    }

    pub fn raw(&self) -> H {
        self.handle
    }

    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }

    /// Creates a non owning reference to the handle.
    pub fn weak(&self) -> Unowned<H> {
        Unowned(self.handle)
    }

    /// Releases ownership without destroying the handle.
    pub fn into_raw(self) -> (H, O) {
        let this = ManuallyDrop::new(self);
        // The wrapper is never dropped so the owner is moved out exactly once
        let owner = unsafe { std::ptr::read(&this.owner) };
        (this.handle, owner)
    }
}

impl<H: vk::Handle + Copy, O: Destroy<H>> Drop for Handle<H, O> {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        if let Err(err) = unsafe { self.owner.destroy(self.handle) } {
            channel::destroy_failed(std::any::type_name::<H>(), err);
        }
    }
}

impl<H: vk::Handle + Copy + Debug, O: Destroy<H>> Debug for Handle<H, O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.handle).finish()
    }
}

/// A non owning copy of a native handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Unowned<H>(H);

impl<H: Copy> Unowned<H> {
    /// # Safety
    /// The caller must ensure the handle outlives every use of this reference.
    pub unsafe fn new(handle: H) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> H {
        self.0
    }
}

/// Implements the generic destruction rule for device children.
macro_rules! destroy_with {
    ($($handle:ty => $destroy:ident,)+) => {
        $(
            impl Destroy<$handle> for DeviceFunctions {
                unsafe fn destroy(&self, handle: $handle) -> Result<(), Error> {
                    (self.vk().$destroy)(self.handle(), handle, std::ptr::null());
                    Ok(())
                }
            }
        )+
    }
}

destroy_with! {
    vk::Buffer => destroy_buffer,
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::ShaderModule => destroy_shader_module,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineCache => destroy_pipeline_cache,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::QueryPool => destroy_query_pool,
    vk::Fence => destroy_fence,
    vk::Semaphore => destroy_semaphore,
}

/// A device child owned through the device functions.
pub type DeviceHandle<H> = Handle<H, Arc<DeviceFunctions>>;
