//! Descriptor set layouts, pools and sets.
//!
//! A [`DescriptorSet`] is returned to its pool through a custom destruction rule. Sets are only
//! freed individually if the pool was created with `FREE_DESCRIPTOR_SET` and has not been reset
//! or destroyed since the set was allocated. Otherwise the memory was already reclaimed by the
//! pool and dropping the set does nothing, so a set can never be freed twice.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::{post_error, Error};
use crate::objects::buffer::Buffer;
use crate::objects::handle::{Destroy, DeviceHandle, Handle, Unowned};
use crate::objects::image::{ImageView, Sampler};
use crate::recorder::ProtocolError;
use crate::vk_check;

/// One binding of a [`DescriptorSetLayout`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, count: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count,
            stages,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC)
    }
}

pub struct DescriptorSetLayout {
    handle: DeviceHandle<vk::DescriptorSetLayout>,
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayout {
    /// Creates a layout. Bindings may be passed in any order but every binding index may only
    /// appear once.
    pub fn new(device: &DeviceContext, bindings: &[LayoutBinding]) -> Result<Arc<Self>, Error> {
        Self::from_functions(device.get_functions(), bindings)
    }

    pub(crate) fn from_functions(functions: &Arc<DeviceFunctions>, bindings: &[LayoutBinding]) -> Result<Arc<Self>, Error> {
        for (index, binding) in bindings.iter().enumerate() {
            if bindings[..index].iter().any(|other| other.binding == binding.binding) {
                return post_error(Error::Logic(format!("descriptor binding {} declared twice", binding.binding)));
            }
        }

        let native: Vec<_> = bindings.iter().map(|binding| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding.binding)
                .descriptor_type(binding.descriptor_type)
                .descriptor_count(binding.count)
                .stage_flags(binding.stages)
                .build()
        }).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&native);

        let handle = Handle::create(functions.clone(), |functions| {
            let mut layout = vk::DescriptorSetLayout::null();
            unsafe {
                vk_check!((functions.vk().create_descriptor_set_layout)(functions.handle(), &*create_info, std::ptr::null(), &mut layout))?;
            }
            Ok(layout)
        })?;

        Ok(Arc::new(Self {
            handle,
            bindings: bindings.to_vec(),
        }))
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::DescriptorSetLayout> {
        self.handle.weak()
    }

    /// The bindings in declaration order.
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    pub fn get_binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// Tests if sets of `other` can be bound where this layout is expected. Layouts are
    /// compatible if they are the same object or declare identical bindings.
    pub fn is_compatible(&self, other: &DescriptorSetLayout) -> bool {
        if self.handle() == other.handle() {
            return true;
        }
        self.bindings.len() == other.bindings.len()
            && self.bindings.iter().all(|binding| other.get_binding(binding.binding) == Some(binding))
    }
}

/// The kind of resource written into a descriptor.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DescriptorResource {
    Buffer,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    Sampler,
}

impl DescriptorResource {
    /// The descriptor types a resource of this kind can be written into.
    pub fn accepted_types(&self) -> &'static [vk::DescriptorType] {
        match self {
            DescriptorResource::Buffer => &[
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            ],
            DescriptorResource::CombinedImageSampler => &[vk::DescriptorType::COMBINED_IMAGE_SAMPLER],
            DescriptorResource::SampledImage => &[vk::DescriptorType::SAMPLED_IMAGE],
            DescriptorResource::StorageImage => &[vk::DescriptorType::STORAGE_IMAGE],
            DescriptorResource::Sampler => &[vk::DescriptorType::SAMPLER],
        }
    }
}

impl Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("handle", &self.handle.raw())
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// The part of a pool its sets keep alive. Never destroys the native pool itself.
pub struct DescriptorPoolShared {
    functions: Arc<DeviceFunctions>,
    handle: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    epoch: AtomicU64,
}

impl DescriptorPoolShared {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn invalidate_sets(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

/// Back reference of a set to the pool it was allocated from.
pub struct PoolMember {
    pool: Arc<DescriptorPoolShared>,
    epoch: u64,
}

impl PoolMember {
    /// Tests if freeing a set through the pool is still required.
    pub fn needs_free(&self) -> bool {
        self.pool.flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) && self.pool.current_epoch() == self.epoch
    }
}

impl Destroy<vk::DescriptorSet> for PoolMember {
    unsafe fn destroy(&self, handle: vk::DescriptorSet) -> Result<(), Error> {
        if !self.needs_free() {
            return Ok(());
        }
        let functions = &self.pool.functions;
        vk_check!((functions.vk().free_descriptor_sets)(functions.handle(), self.pool.handle, 1, &handle))
    }
}

pub struct DescriptorPool {
    shared: Arc<DescriptorPoolShared>,
}

impl DescriptorPool {
    pub fn new(device: &DeviceContext, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize], flags: vk::DescriptorPoolCreateFlags) -> Result<Self, Error> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let functions = device.get_functions().clone();
        let mut handle = vk::DescriptorPool::null();
        unsafe {
            vk_check!((functions.vk().create_descriptor_pool)(functions.handle(), &*create_info, std::ptr::null(), &mut handle))?;
        }

        Ok(Self {
            shared: Arc::new(DescriptorPoolShared {
                functions,
                handle,
                flags,
                epoch: AtomicU64::new(0),
            })
        })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.shared.handle
    }

    pub fn flags(&self) -> vk::DescriptorPoolCreateFlags {
        self.shared.flags
    }

    pub fn allocate(&mut self, layout: &Arc<DescriptorSetLayout>) -> Result<DescriptorSet, Error> {
        let layouts = [layout.handle()];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.shared.handle)
            .set_layouts(&layouts);

        let owner = PoolMember {
            pool: self.shared.clone(),
            epoch: self.shared.current_epoch(),
        };
        let handle = Handle::create(owner, |owner| {
            let functions = &owner.pool.functions;
            let mut set = vk::DescriptorSet::null();
            unsafe {
                vk_check!((functions.vk().allocate_descriptor_sets)(functions.handle(), &*allocate_info, &mut set))?;
            }
            Ok(set)
        })?;

        Ok(DescriptorSet::new(handle, layout.clone()))
    }

    /// Returns every set to the pool. Sets allocated before the reset stay valid rust objects
    /// but must not be used anymore and will not be freed again.
    pub fn reset(&mut self) -> Result<(), Error> {
        let functions = &self.shared.functions;
        unsafe {
            vk_check!((functions.vk().reset_descriptor_pool)(functions.handle(), self.shared.handle, vk::DescriptorPoolResetFlags::empty()))?;
        }
        self.shared.invalidate_sets();
        Ok(())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.shared.invalidate_sets();
        let functions = &self.shared.functions;
        unsafe {
            (functions.vk().destroy_descriptor_pool)(functions.handle(), self.shared.handle, std::ptr::null());
        }
    }
}

impl Debug for DescriptorPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("handle", &self.shared.handle)
            .field("flags", &self.shared.flags)
            .finish()
    }
}

#[derive(Clone, Debug)]
struct DynamicBinding {
    binding: u32,
    offsets: Vec<u32>,
}

pub struct DescriptorSet {
    handle: Handle<vk::DescriptorSet, PoolMember>,
    layout: Arc<DescriptorSetLayout>,
    /// Sorted by ascending binding index
    dynamic: Vec<DynamicBinding>,
}

impl DescriptorSet {
    fn new(handle: Handle<vk::DescriptorSet, PoolMember>, layout: Arc<DescriptorSetLayout>) -> Self {
        let mut dynamic: Vec<_> = layout.bindings().iter()
            .filter(|binding| binding.is_dynamic())
            .map(|binding| DynamicBinding { binding: binding.binding, offsets: vec![0; binding.count as usize] })
            .collect();
        dynamic.sort_by_key(|binding| binding.binding);

        Self {
            handle,
            layout,
            dynamic,
        }
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::DescriptorSet> {
        self.handle.weak()
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Sets the dynamic offset of one element of a dynamic buffer binding.
    pub fn set_dynamic_offset(&mut self, binding: u32, element: u32, offset: u32) -> Result<(), Error> {
        let entry = match self.dynamic.iter_mut().find(|entry| entry.binding == binding) {
            Some(entry) => entry,
            None => return post_error(ProtocolError::NotDynamic { binding }.into()),
        };
        let count = entry.offsets.len() as u32;
        match entry.offsets.get_mut(element as usize) {
            Some(slot) => {
                *slot = offset;
                Ok(())
            }
            None => post_error(ProtocolError::BindingOutOfBounds { binding, element, count }.into()),
        }
    }

    /// The dynamic offsets in the order expected by `vkCmdBindDescriptorSets`, ascending by
    /// binding index and then by array element.
    pub fn dynamic_offsets(&self) -> impl Iterator<Item=u32> + '_ {
        self.dynamic.iter().flat_map(|entry| entry.offsets.iter().copied())
    }

    pub fn dynamic_offset_count(&self) -> usize {
        self.dynamic.iter().map(|entry| entry.offsets.len()).sum()
    }

    fn check_write(&self, binding: u32, element: u32, written: DescriptorResource) -> Result<vk::DescriptorType, Error> {
        let declared = match self.layout.get_binding(binding) {
            Some(declared) => declared,
            None => return post_error(ProtocolError::UnknownBinding { binding }.into()),
        };
        if element >= declared.count {
            return post_error(ProtocolError::BindingOutOfBounds { binding, element, count: declared.count }.into());
        }
        if !written.accepted_types().contains(&declared.descriptor_type) {
            return post_error(ProtocolError::DescriptorTypeMismatch { binding, declared: declared.descriptor_type, written }.into());
        }
        Ok(declared.descriptor_type)
    }

    fn update(&self, write: vk::WriteDescriptorSet) {
        let functions = &self.handle.owner().pool.functions;
        unsafe {
            (functions.vk().update_descriptor_sets)(functions.handle(), 1, &write, 0, std::ptr::null());
        }
    }

    /// Writes a uniform or storage buffer, dynamic or not.
    pub fn write_buffer(&mut self, binding: u32, element: u32, buffer: &Buffer, offset: vk::DeviceSize, range: vk::DeviceSize) -> Result<(), Error> {
        let descriptor_type = self.check_write(binding, element, DescriptorResource::Buffer)?;

        let info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.handle())
            .dst_binding(binding)
            .dst_array_element(element)
            .descriptor_type(descriptor_type)
            .buffer_info(&info)
            .build();
        self.update(write);
        Ok(())
    }

    pub fn write_combined_image_sampler(&mut self, binding: u32, element: u32, view: &ImageView, sampler: &Sampler, layout: vk::ImageLayout) -> Result<(), Error> {
        self.write_image(binding, element, DescriptorResource::CombinedImageSampler, view.handle(), sampler.handle(), layout)
    }

    pub fn write_sampled_image(&mut self, binding: u32, element: u32, view: &ImageView, layout: vk::ImageLayout) -> Result<(), Error> {
        self.write_image(binding, element, DescriptorResource::SampledImage, view.handle(), vk::Sampler::null(), layout)
    }

    pub fn write_storage_image(&mut self, binding: u32, element: u32, view: &ImageView) -> Result<(), Error> {
        self.write_image(binding, element, DescriptorResource::StorageImage, view.handle(), vk::Sampler::null(), vk::ImageLayout::GENERAL)
    }

    pub fn write_sampler(&mut self, binding: u32, element: u32, sampler: &Sampler) -> Result<(), Error> {
        self.write_image(binding, element, DescriptorResource::Sampler, vk::ImageView::null(), sampler.handle(), vk::ImageLayout::UNDEFINED)
    }

    fn write_image(&mut self, binding: u32, element: u32, resource: DescriptorResource, view: vk::ImageView, sampler: vk::Sampler, layout: vk::ImageLayout) -> Result<(), Error> {
        let descriptor_type = self.check_write(binding, element, resource)?;

        let info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.handle())
            .dst_binding(binding)
            .dst_array_element(element)
            .descriptor_type(descriptor_type)
            .image_info(&info)
            .build();
        self.update(write);
        Ok(())
    }
}

impl Debug for DescriptorSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("handle", &self.handle())
            .field("dynamic", &self.dynamic)
            .finish()
    }
}
