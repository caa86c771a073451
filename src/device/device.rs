use core::panic::{UnwindSafe, RefUnwindSafe};

use std::cmp::Ordering;
use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use static_assertions::assert_impl_all;

use crate::allocator::DeviceAllocator;
use crate::error::{post_error, Error};
use crate::instance::capabilities::CapabilitySet;
use crate::instance::{DeviceFeature, InstanceContext, PhysicalDevice, VulkanVersion};
use crate::objects::swapchain::{PresentStatus, Swapchain};
use crate::objects::sync::{Fence, Semaphore, TimelineSemaphore};
use crate::recorder::PrimaryCommandBuffer;
use crate::symbols::{DeviceCore, DeviceFnV1_0, SwapchainKhrFn};
use crate::util::id::ObjectId;
use crate::vk_check;

/// The device handle together with its resolved entry points.
///
/// Every wrapped device object keeps an `Arc` to this struct so the device is destroyed only
/// after all of its children.
pub struct DeviceFunctions {
    id: ObjectId,
    physical_device: PhysicalDevice,
    handle: vk::Device,
    core: DeviceCore,
    swapchain_khr: Option<SwapchainKhrFn>,
    capabilities: CapabilitySet,
    enabled_features: vk::PhysicalDeviceFeatures,
    timeline_semaphores: bool,
}

impl DeviceFunctions {
    pub(crate) fn new(
        physical_device: PhysicalDevice,
        handle: vk::Device,
        core: DeviceCore,
        swapchain_khr: Option<SwapchainKhrFn>,
        capabilities: CapabilitySet,
        enabled_features: vk::PhysicalDeviceFeatures,
        timeline_semaphores: bool,
    ) -> Self {
        Self {
            id: ObjectId::new("Device"),
            physical_device,
            handle,
            core,
            swapchain_khr,
            capabilities,
            enabled_features,
            timeline_semaphores,
        }
    }

    pub fn get_id(&self) -> &ObjectId {
        &self.id
    }

    pub fn handle(&self) -> vk::Device {
        self.handle
    }

    /// The 1.0 core entry points. Always available.
    pub fn vk(&self) -> &DeviceFnV1_0 {
        self.core.v1_0()
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn get_version(&self) -> VulkanVersion {
        self.core.version()
    }

    pub fn swapchain_khr(&self) -> Result<&SwapchainKhrFn, Error> {
        match &self.swapchain_khr {
            Some(table) => Ok(table),
            None => post_error(Error::ExtensionNotEnabled(SwapchainKhrFn::extension_name())),
        }
    }

    pub fn get_instance(&self) -> &Arc<InstanceContext> {
        self.physical_device.instance()
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.capabilities.is_extension_enabled(name)
    }

    pub fn is_feature_enabled(&self, feature: DeviceFeature) -> bool {
        feature.get(&self.enabled_features)
    }

    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    pub fn timeline_semaphores_enabled(&self) -> bool {
        self.timeline_semaphores
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        self.physical_device.memory_properties()
    }
}

impl Drop for DeviceFunctions {
    fn drop(&mut self) {
        unsafe {
            (self.core.v1_0().destroy_device)(self.handle, std::ptr::null());
        }
        log::debug!("Destroyed device {:?}", self.id);
    }
}

impl Debug for DeviceFunctions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFunctions")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("version", &self.core.version())
            .finish()
    }
}

assert_impl_all!(DeviceFunctions: Send, Sync, UnwindSafe, RefUnwindSafe);

pub struct DeviceContext {
    functions: Arc<DeviceFunctions>,
    queues: Vec<Arc<Queue>>,
    allocator: Arc<dyn DeviceAllocator>,
}

impl DeviceContext {
    pub(crate) fn new(functions: Arc<DeviceFunctions>, queues: Vec<Arc<Queue>>, allocator: Arc<dyn DeviceAllocator>) -> Arc<Self> {
        Arc::new(Self {
            functions,
            queues,
            allocator,
        })
    }

    pub fn get_id(&self) -> &ObjectId {
        self.functions.get_id()
    }

    pub fn get_instance(&self) -> &Arc<InstanceContext> {
        self.functions.get_instance()
    }

    pub fn get_functions(&self) -> &Arc<DeviceFunctions> {
        &self.functions
    }

    pub fn vk(&self) -> &DeviceFnV1_0 {
        self.functions.vk()
    }

    pub fn handle(&self) -> vk::Device {
        self.functions.handle()
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        self.functions.physical_device()
    }

    pub fn allocator(&self) -> &Arc<dyn DeviceAllocator> {
        &self.allocator
    }

    /// Returns a queue requested at device creation.
    pub fn get_queue(&self, family: u32, index: u32) -> Option<&Arc<Queue>> {
        self.queues.iter().find(|queue| queue.family == family && queue.index == index)
    }

    pub fn queues(&self) -> &[Arc<Queue>] {
        &self.queues
    }

    pub fn wait_idle(&self) -> Result<(), Error> {
        unsafe {
            vk_check!((self.vk().device_wait_idle)(self.handle()))
        }
    }
}

impl Debug for DeviceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("functions", &self.functions)
            .field("queues", &self.queues.len())
            .finish()
    }
}

impl PartialEq for DeviceContext {
    fn eq(&self, other: &Self) -> bool {
        self.get_id().eq(other.get_id())
    }
}

impl Eq for DeviceContext {
}

impl PartialOrd for DeviceContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceContext {
    fn cmp(&self, other: &Self) -> Ordering {
        self.get_id().cmp(other.get_id())
    }
}

assert_impl_all!(DeviceContext: Send, Sync);

/// A semaphore operation of a [`SubmitBatch`]. Binary semaphores carry a value of zero.
#[derive(Copy, Clone, Debug)]
struct SemaphoreOp {
    semaphore: vk::Semaphore,
    value: u64,
    stage: vk::PipelineStageFlags,
}

impl SemaphoreOp {
    fn submit_info(&self) -> vk::SemaphoreSubmitInfo {
        vk::SemaphoreSubmitInfo::builder()
            .semaphore(self.semaphore)
            .value(self.value)
            .stage_mask(vk::PipelineStageFlags2::from_raw(self.stage.as_raw() as u64))
            .build()
    }
}

/// One submission batch of a [`Queue::submit`] or [`Queue::submit2`] call.
#[derive(Default)]
pub struct SubmitBatch<'a> {
    waits: Vec<SemaphoreOp>,
    command_buffers: Vec<&'a PrimaryCommandBuffer>,
    signals: Vec<SemaphoreOp>,
    timeline: bool,
    _semaphores: PhantomData<&'a Semaphore>,
}

impl<'a> SubmitBatch<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, semaphore: &'a Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(SemaphoreOp { semaphore: semaphore.handle(), value: 0, stage });
        self
    }

    /// Waits until the timeline semaphore reaches `value`.
    pub fn wait_timeline(mut self, semaphore: &'a TimelineSemaphore, value: u64, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(SemaphoreOp { semaphore: semaphore.handle(), value, stage });
        self.timeline = true;
        self
    }

    pub fn command_buffer(mut self, command_buffer: &'a PrimaryCommandBuffer) -> Self {
        self.command_buffers.push(command_buffer);
        self
    }

    pub fn signal(mut self, semaphore: &'a Semaphore) -> Self {
        self.signals.push(SemaphoreOp { semaphore: semaphore.handle(), value: 0, stage: vk::PipelineStageFlags::ALL_COMMANDS });
        self
    }

    /// Sets the timeline semaphore to `value` once the batch completes.
    pub fn signal_timeline(mut self, semaphore: &'a TimelineSemaphore, value: u64) -> Self {
        self.signals.push(SemaphoreOp { semaphore: semaphore.handle(), value, stage: vk::PipelineStageFlags::ALL_COMMANDS });
        self.timeline = true;
        self
    }

    fn check_submittable(&self) -> Result<(), Error> {
        for command_buffer in &self.command_buffers {
            command_buffer.check_submittable()?;
        }
        Ok(())
    }
}

pub struct Queue {
    functions: Arc<DeviceFunctions>,
    queue: Mutex<vk::Queue>,
    family: u32,
    index: u32,
}

impl Queue {
    pub(crate) fn new(functions: Arc<DeviceFunctions>, family: u32, index: u32) -> Self {
        let mut queue = vk::Queue::null();
        unsafe {
            (functions.vk().get_device_queue)(functions.handle(), family, index, &mut queue);
        }

        Self {
            functions,
            queue: Mutex::new(queue),
            family,
            index,
        }
    }

    /// Submits command buffers to the queue.
    ///
    /// Every command buffer must have finished recording, otherwise a protocol error is
    /// reported before anything is submitted. Timeline values are passed through a chained
    /// `VkTimelineSemaphoreSubmitInfo`.
    pub fn submit(&self, batches: &[SubmitBatch], fence: Option<&Fence>) -> Result<(), Error> {
        for batch in batches {
            batch.check_submittable()?;
        }

        let mut wait_semaphores = Vec::with_capacity(batches.len());
        let mut wait_values = Vec::with_capacity(batches.len());
        let mut wait_stages = Vec::with_capacity(batches.len());
        let mut command_buffers = Vec::with_capacity(batches.len());
        let mut signal_semaphores = Vec::with_capacity(batches.len());
        let mut signal_values = Vec::with_capacity(batches.len());
        for batch in batches {
            wait_semaphores.push(batch.waits.iter().map(|op| op.semaphore).collect::<Vec<_>>());
            wait_values.push(batch.waits.iter().map(|op| op.value).collect::<Vec<_>>());
            wait_stages.push(batch.waits.iter().map(|op| op.stage).collect::<Vec<_>>());
            command_buffers.push(batch.command_buffers.iter().map(|buffer| buffer.handle()).collect::<Vec<_>>());
            signal_semaphores.push(batch.signals.iter().map(|op| op.semaphore).collect::<Vec<_>>());
            signal_values.push(batch.signals.iter().map(|op| op.value).collect::<Vec<_>>());
        }

        let mut timeline_infos: Vec<_> = (0..batches.len()).map(|i| {
            vk::TimelineSemaphoreSubmitInfo::builder()
                .wait_semaphore_values(&wait_values[i])
                .signal_semaphore_values(&signal_values[i])
                .build()
        }).collect();

        let submits: Vec<_> = timeline_infos.iter_mut().enumerate().map(|(i, timeline_info)| {
            let mut submit = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores[i])
                .wait_dst_stage_mask(&wait_stages[i])
                .command_buffers(&command_buffers[i])
                .signal_semaphores(&signal_semaphores[i]);
            if batches[i].timeline {
                submit = submit.push_next(timeline_info);
            }
            submit.build()
        }).collect();

        let fence = fence.map(Fence::handle).unwrap_or(vk::Fence::null());

        let queue = self.lock_queue();
        unsafe {
            vk_check!((self.functions.vk().queue_submit)(*queue, submits.len() as u32, submits.as_ptr(), fence))
        }
    }

    /// Submits through `vkQueueSubmit2`. Needs a 1.3 device.
    pub fn submit2(&self, batches: &[SubmitBatch], fence: Option<&Fence>) -> Result<(), Error> {
        let v1_3 = self.functions.core().v1_3()?;
        for batch in batches {
            batch.check_submittable()?;
        }

        let mut waits = Vec::with_capacity(batches.len());
        let mut command_buffers = Vec::with_capacity(batches.len());
        let mut signals = Vec::with_capacity(batches.len());
        for batch in batches {
            waits.push(batch.waits.iter().map(SemaphoreOp::submit_info).collect::<Vec<_>>());
            command_buffers.push(batch.command_buffers.iter().map(|buffer| {
                vk::CommandBufferSubmitInfo::builder()
                    .command_buffer(buffer.handle())
                    .build()
            }).collect::<Vec<_>>());
            signals.push(batch.signals.iter().map(SemaphoreOp::submit_info).collect::<Vec<_>>());
        }

        let submits: Vec<_> = (0..batches.len()).map(|i| {
            vk::SubmitInfo2::builder()
                .wait_semaphore_infos(&waits[i])
                .command_buffer_infos(&command_buffers[i])
                .signal_semaphore_infos(&signals[i])
                .build()
        }).collect();

        let fence = fence.map(Fence::handle).unwrap_or(vk::Fence::null());

        let queue = self.lock_queue();
        unsafe {
            vk_check!((v1_3.queue_submit2)(*queue, submits.len() as u32, submits.as_ptr(), fence))
        }
    }

    pub fn wait_idle(&self) -> Result<(), Error> {
        let queue = self.lock_queue();
        unsafe {
            vk_check!((self.functions.vk().queue_wait_idle)(*queue))
        }
    }

    /// Presents a swapchain image. Out of date and suboptimal swapchains are reported through
    /// the returned status.
    pub fn present(&self, swapchain: &Swapchain, image_index: u32, wait_semaphores: &[&Semaphore]) -> Result<PresentStatus, Error> {
        let swapchain_khr = self.functions.swapchain_khr()?;

        let waits: Vec<_> = wait_semaphores.iter().map(|semaphore| semaphore.handle()).collect();
        let swapchains = [swapchain.handle()];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let queue = self.lock_queue();
        let result = unsafe {
            (swapchain_khr.queue_present)(*queue, &*present_info)
        };
        match result {
            vk::Result::SUCCESS => Ok(PresentStatus::Successful),
            vk::Result::SUBOPTIMAL_KHR => Ok(PresentStatus::Suboptimal),
            vk::Result::ERROR_OUT_OF_DATE_KHR => Ok(PresentStatus::OutOfDate),
            result => vk_check!(result).map(|_| PresentStatus::Successful),
        }
    }

    pub fn lock_queue(&self) -> MutexGuard<vk::Queue> {
        self.queue.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn get_queue_family_index(&self) -> u32 {
        self.family
    }

    pub fn get_queue_index(&self) -> u32 {
        self.index
    }
}

impl Debug for Queue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("family", &self.family)
            .field("index", &self.index)
            .finish()
    }
}

assert_impl_all!(Queue: Send, Sync);
