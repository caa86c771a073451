//! Command buffers and recording.
//!
//! A [`CommandBuffer`] is parameterized by its level. Recording happens through scope objects
//! borrowing the buffer mutably:
//!
//! - [`BufferRecorder`] for a whole primary buffer, from begin to end.
//! - [`RenderPassRecorder`], [`ComputePassRecorder`] and [`TransferPassRecorder`] for the pass
//!   scopes of a primary buffer.
//! - [`RenderPassRecorder<Secondary>`] for a whole secondary buffer. For secondary buffers begin
//!   and begin render pass are one operation, and end render pass ends the buffer.
//!
//! Dropping a scope object performs the matching end call, so the buffer is never left in an
//! inconsistent state on early returns. Errors on that path are routed to the irrecoverable
//! error channel.
//!
//! Commands are only available on the scope they are valid in. The scope transitions are
//! validated by a [`StateTracker`]. A render pass begun with secondary contents rejects every
//! command but [`RenderPassRecorder::execute_commands`] at runtime.

mod pass;
mod state;

use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::device::DeviceFunctions;
use crate::error::{channel, post_error, Error};
use crate::objects::command_pool::CommandPoolShared;
use crate::objects::descriptor::DescriptorSet;
use crate::objects::framebuffer::FrameBuffer;
use crate::objects::pipeline::PipelineLayout;
use crate::objects::query::QueryPool;
use crate::vk_check;

pub use pass::{ComputePassRecorder, RenderPassRecorder, TransferPassRecorder};
pub use state::{transition, BufferState, CommandKind, LevelKind, PassState, ProtocolError, RecordOp, StateTracker};

mod private {
    pub trait Sealed {
    }
}

/// The level of a command buffer. Implemented by [`Primary`] and [`Secondary`] only.
pub trait Level: private::Sealed + 'static {
    const KIND: LevelKind;
    const NATIVE: vk::CommandBufferLevel;
}

/// Marker for primary command buffers.
#[derive(Debug)]
pub enum Primary {}

/// Marker for secondary command buffers.
#[derive(Debug)]
pub enum Secondary {}

impl private::Sealed for Primary {
}

impl private::Sealed for Secondary {
}

impl Level for Primary {
    const KIND: LevelKind = LevelKind::Primary;
    const NATIVE: vk::CommandBufferLevel = vk::CommandBufferLevel::PRIMARY;
}

impl Level for Secondary {
    const KIND: LevelKind = LevelKind::Secondary;
    const NATIVE: vk::CommandBufferLevel = vk::CommandBufferLevel::SECONDARY;
}

pub type PrimaryCommandBuffer = CommandBuffer<Primary>;
pub type SecondaryCommandBuffer = CommandBuffer<Secondary>;

/// A command buffer allocated from a [`CommandPool`](crate::objects::command_pool::CommandPool).
///
/// Returned to its pool when dropped, unless the pool was destroyed already.
pub struct CommandBuffer<L: Level> {
    pool: Arc<CommandPoolShared>,
    handle: vk::CommandBuffer,
    tracker: StateTracker,
    _level: PhantomData<L>,
}

impl<L: Level> CommandBuffer<L> {
    pub(crate) fn new(pool: Arc<CommandPoolShared>, handle: vk::CommandBuffer) -> Self {
        let tracker = StateTracker::new(L::KIND, pool.reset_epoch());
        Self {
            pool,
            handle,
            tracker,
            _level: PhantomData,
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn level(&self) -> LevelKind {
        L::KIND
    }

    pub fn state(&self) -> BufferState {
        self.tracker.state(self.pool.reset_epoch())
    }

    pub(crate) fn functions(&self) -> &DeviceFunctions {
        self.pool.functions()
    }

    pub(crate) fn apply(&mut self, operation: RecordOp) -> Result<(), Error> {
        let epoch = self.pool.reset_epoch();
        self.tracker.apply(operation, epoch)
    }

    pub(crate) fn check(&self, operation: RecordOp) -> Result<(), Error> {
        self.tracker.check(operation, self.pool.reset_epoch()).map(|_| ())
    }

    /// Resets the buffer to the initial state. The pool must have been created with
    /// `RESET_COMMAND_BUFFER`.
    pub fn reset(&mut self, release_resources: bool) -> Result<(), Error> {
        if !self.pool.allows_individual_reset() {
            return post_error(ProtocolError::ResetNotAllowed.into());
        }
        let flags = if release_resources {
            vk::CommandBufferResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandBufferResetFlags::empty()
        };

        unsafe {
            vk_check!((self.functions().vk().reset_command_buffer)(self.handle, flags))?;
        }
        self.apply(RecordOp::Reset)
    }

    pub(crate) fn end_native(&mut self) -> Result<(), Error> {
        self.apply(RecordOp::End)?;
        unsafe {
            vk_check!((self.functions().vk().end_command_buffer)(self.handle))
        }
    }
}

impl CommandBuffer<Primary> {
    /// Begins recording. The buffer must be in the initial state.
    pub fn record(&mut self, usage: vk::CommandBufferUsageFlags) -> Result<BufferRecorder<'_>, Error> {
        self.check(RecordOp::Begin)?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(usage);
        unsafe {
            vk_check!((self.functions().vk().begin_command_buffer)(self.handle, &*begin_info))?;
        }
        self.apply(RecordOp::Begin)?;

        Ok(BufferRecorder {
            buffer: self,
            ended: false,
        })
    }

    /// Tests if the buffer can be submitted to a queue.
    pub fn check_submittable(&self) -> Result<(), Error> {
        self.check(RecordOp::Submit)
    }
}

impl CommandBuffer<Secondary> {
    /// Begins recording a secondary buffer continuing subpass 0 of the framebuffer's render
    /// pass. The whole recording is one render pass scope.
    pub fn record_render_pass<'a>(&'a mut self, framebuffer: &'a FrameBuffer, usage: vk::CommandBufferUsageFlags) -> Result<RenderPassRecorder<'a, Secondary>, Error> {
        self.check(RecordOp::BeginRenderPass)?;

        let inheritance = vk::CommandBufferInheritanceInfo::builder()
            .render_pass(framebuffer.render_pass().raw())
            .subpass(0)
            .framebuffer(framebuffer.handle());
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(usage | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance);
        unsafe {
            vk_check!((self.functions().vk().begin_command_buffer)(self.handle, &*begin_info))?;
        }
        self.apply(RecordOp::BeginRenderPass)?;

        Ok(RenderPassRecorder::new(self, framebuffer, vk::SubpassContents::INLINE))
    }

    /// Tests if the buffer can be executed from a primary buffer.
    pub fn check_executable(&self) -> Result<(), Error> {
        self.check(RecordOp::Execute)
    }
}

impl<L: Level> Drop for CommandBuffer<L> {
    fn drop(&mut self) {
        if self.pool.is_destroyed() {
            return;
        }
        let functions = self.pool.functions();
        unsafe {
            (functions.vk().free_command_buffers)(functions.handle(), self.pool.handle(), 1, &self.handle);
        }
    }
}

impl<L: Level> Debug for CommandBuffer<L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("level", &L::KIND)
            .field("state", &self.state())
            .finish()
    }
}

/// Commands valid in every recording scope.
///
/// Render passes begun with secondary contents accept none of these, which is reported by
/// [`Recorder::check_inline`].
pub trait Recorder {
    fn command_buffer(&self) -> vk::CommandBuffer;

    fn functions(&self) -> &DeviceFunctions;

    /// Tests if commands may be recorded directly into this scope.
    fn check_inline(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Records a pipeline barrier. Completeness of the barrier is not checked.
    fn pipeline_barrier(&mut self, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags, dependency_flags: vk::DependencyFlags, memory: &[vk::MemoryBarrier], buffers: &[vk::BufferMemoryBarrier], images: &[vk::ImageMemoryBarrier]) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.functions().vk().cmd_pipeline_barrier)(
                self.command_buffer(),
                src_stages,
                dst_stages,
                dependency_flags,
                memory.len() as u32,
                memory.as_ptr(),
                buffers.len() as u32,
                buffers.as_ptr(),
                images.len() as u32,
                images.as_ptr()
            );
        }
        Ok(())
    }

    fn memory_barrier(&mut self, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags, src_access: vk::AccessFlags, dst_access: vk::AccessFlags) -> Result<(), Error> {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        self.pipeline_barrier(src_stages, dst_stages, vk::DependencyFlags::empty(), std::slice::from_ref(&barrier), &[], &[])
    }

    fn buffer_barriers(&mut self, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags, barriers: &[vk::BufferMemoryBarrier]) -> Result<(), Error> {
        self.pipeline_barrier(src_stages, dst_stages, vk::DependencyFlags::empty(), &[], barriers, &[])
    }

    fn image_barriers(&mut self, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags, barriers: &[vk::ImageMemoryBarrier]) -> Result<(), Error> {
        self.pipeline_barrier(src_stages, dst_stages, vk::DependencyFlags::empty(), &[], &[], barriers)
    }

    /// Records a synchronization2 barrier. Needs a 1.3 device.
    fn pipeline_barrier2(&mut self, dependency: &vk::DependencyInfo) -> Result<(), Error> {
        self.check_inline()?;
        let v1_3 = self.functions().core().v1_3()?;
        unsafe {
            (v1_3.cmd_pipeline_barrier2)(self.command_buffer(), dependency);
        }
        Ok(())
    }

    fn begin_query(&mut self, pool: &QueryPool, query: u32, flags: vk::QueryControlFlags) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.functions().vk().cmd_begin_query)(self.command_buffer(), pool.handle(), query, flags);
        }
        Ok(())
    }

    fn end_query(&mut self, pool: &QueryPool, query: u32) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.functions().vk().cmd_end_query)(self.command_buffer(), pool.handle(), query);
        }
        Ok(())
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: &QueryPool, query: u32) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.functions().vk().cmd_write_timestamp)(self.command_buffer(), stage, pool.handle(), query);
        }
        Ok(())
    }
}

/// Descriptor binding for scopes with a pipeline bind point.
pub trait DescriptorRecorder: Recorder {
    const BIND_POINT: vk::PipelineBindPoint;

    /// Binds descriptor sets starting at `first_set`.
    ///
    /// Every set must use the set layout `layout` has at its index. The dynamic offsets of
    /// every set are taken from the set itself, ordered by set and then by ascending binding
    /// index.
    fn bind_descriptor_sets(&mut self, layout: &PipelineLayout, first_set: u32, sets: &[&DescriptorSet]) -> Result<(), Error> {
        self.check_inline()?;

        let set_layouts = layout.set_layouts();
        let end = first_set as usize + sets.len();
        if end > set_layouts.len() {
            return post_error(Error::Logic(format!("binding sets {}..{} but the pipeline layout only has {} sets", first_set, end, set_layouts.len())));
        }
        for (index, (set, expected)) in sets.iter().zip(&set_layouts[first_set as usize..end]).enumerate() {
            if !expected.is_compatible(set.layout()) {
                return post_error(Error::Logic(format!("descriptor set bound at index {} is not compatible with the pipeline layout's set layout", first_set as usize + index)));
            }
        }

        let handles: Vec<_> = sets.iter().map(|set| set.handle()).collect();
        let offsets: Vec<u32> = sets.iter().flat_map(|set| set.dynamic_offsets()).collect();
        unsafe {
            (self.functions().vk().cmd_bind_descriptor_sets)(
                self.command_buffer(),
                Self::BIND_POINT,
                layout.handle(),
                first_set,
                handles.len() as u32,
                handles.as_ptr(),
                offsets.len() as u32,
                offsets.as_ptr()
            );
        }
        Ok(())
    }

    fn push_constants<T: Pod>(&mut self, layout: &PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, value: &T) -> Result<(), Error> {
        self.check_inline()?;
        let bytes = bytemuck::bytes_of(value);
        unsafe {
            (self.functions().vk().cmd_push_constants)(
                self.command_buffer(),
                layout.handle(),
                stages,
                offset,
                bytes.len() as u32,
                bytes.as_ptr() as *const std::ffi::c_void
            );
        }
        Ok(())
    }
}

/// Records a whole primary command buffer. Ends the buffer when dropped.
pub struct BufferRecorder<'a> {
    buffer: &'a mut CommandBuffer<Primary>,
    ended: bool,
}

impl<'a> BufferRecorder<'a> {
    /// Begins a render pass instance.
    ///
    /// If `use_secondary` is set the contents of the render pass must be recorded into
    /// secondary buffers and executed through [`RenderPassRecorder::execute_commands`].
    pub fn begin_render_pass<'b>(&'b mut self, framebuffer: &'b FrameBuffer, area: vk::Rect2D, clear_values: &[vk::ClearValue], use_secondary: bool) -> Result<RenderPassRecorder<'b, Primary>, Error> {
        self.buffer.check(RecordOp::BeginRenderPass)?;

        let contents = if use_secondary {
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
        } else {
            vk::SubpassContents::INLINE
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(framebuffer.render_pass().raw())
            .framebuffer(framebuffer.handle())
            .render_area(area)
            .clear_values(clear_values);
        unsafe {
            (self.buffer.functions().vk().cmd_begin_render_pass)(self.buffer.handle, &*begin_info, contents);
        }
        self.buffer.apply(RecordOp::BeginRenderPass)?;

        Ok(RenderPassRecorder::new(&mut *self.buffer, framebuffer, contents))
    }

    pub fn begin_compute_pass(&mut self) -> Result<ComputePassRecorder<'_>, Error> {
        self.buffer.apply(RecordOp::BeginComputePass)?;
        Ok(ComputePassRecorder::new(&mut *self.buffer))
    }

    pub fn begin_transfer_pass(&mut self) -> Result<TransferPassRecorder<'_>, Error> {
        self.buffer.apply(RecordOp::BeginTransferPass)?;
        Ok(TransferPassRecorder::new(&mut *self.buffer))
    }

    /// Executes secondary buffers outside of a render pass.
    pub fn execute_commands(&mut self, secondaries: &[&SecondaryCommandBuffer]) -> Result<(), Error> {
        execute_commands(self.buffer, secondaries)
    }

    pub fn reset_query_pool(&mut self, pool: &QueryPool, first: u32, count: u32) -> Result<(), Error> {
        pool.check_range(first, count)?;
        unsafe {
            (self.buffer.functions().vk().cmd_reset_query_pool)(self.buffer.handle, pool.handle(), first, count);
        }
        Ok(())
    }

    /// Ends the recording. Dropping the recorder has the same effect.
    pub fn end(mut self) -> Result<(), Error> {
        self.ended = true;
        self.buffer.end_native()
    }
}

impl<'a> Recorder for BufferRecorder<'a> {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer.handle
    }

    fn functions(&self) -> &DeviceFunctions {
        self.buffer.functions()
    }
}

impl<'a> Drop for BufferRecorder<'a> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if let Err(err) = self.buffer.end_native() {
            channel::destroy_failed("command buffer recording", err);
        }
    }
}

impl<'a> Debug for BufferRecorder<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRecorder")
            .field("buffer", &self.buffer)
            .finish()
    }
}

pub(crate) fn execute_commands(buffer: &mut CommandBuffer<Primary>, secondaries: &[&SecondaryCommandBuffer]) -> Result<(), Error> {
    buffer.check(RecordOp::Command(CommandKind::ExecuteCommands))?;
    for secondary in secondaries {
        secondary.check_executable()?;
    }

    let handles: Vec<_> = secondaries.iter().map(|secondary| secondary.handle()).collect();
    unsafe {
        (buffer.functions().vk().cmd_execute_commands)(buffer.handle, handles.len() as u32, handles.as_ptr());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::command_pool::CommandPool;
    use crate::objects::descriptor::{DescriptorPool, DescriptorSetLayout, LayoutBinding};
    use crate::instance::VulkanVersion;
    use crate::util::test::{make_test_device, make_test_device_with_version, make_test_framebuffer, MockDriver};

    #[test]
    fn dropped_recorder_ends_the_buffer() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        {
            let _recorder = buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        }
        assert_eq!(buffer.state(), BufferState::Ended);
        assert!(buffer.check_submittable().is_ok());
    }

    #[test]
    fn reset_needs_pool_flag() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        assert_eq!(buffer.reset(false), Err(Error::Protocol(ProtocolError::ResetNotAllowed)));

        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap().end().unwrap();
        buffer.reset(false).unwrap();
        assert_eq!(buffer.state(), BufferState::Initial);
    }

    #[test]
    fn unfinished_buffers_are_not_submittable() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let buffer = pool.allocate_primary().unwrap();
        assert!(matches!(buffer.check_submittable(), Err(Error::Protocol(ProtocolError::InvalidTransition { .. }))));
    }

    #[test]
    fn dynamic_offsets_are_bound_in_binding_order() {
        let device = make_test_device();
        let layout = DescriptorSetLayout::new(&device, &[
            LayoutBinding::new(2, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1, vk::ShaderStageFlags::COMPUTE),
            LayoutBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1, vk::ShaderStageFlags::COMPUTE),
        ]).unwrap();
        let pipeline_layout = PipelineLayout::new(&device, &[layout.clone()], &[]).unwrap();
        let mut descriptor_pool = DescriptorPool::new(&device, 1, &[], vk::DescriptorPoolCreateFlags::empty()).unwrap();
        let mut set = descriptor_pool.allocate(&layout).unwrap();
        set.set_dynamic_offset(2, 0, 512).unwrap();
        set.set_dynamic_offset(0, 0, 256).unwrap();

        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        let mut recorder = buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        let mut compute = recorder.begin_compute_pass().unwrap();
        MockDriver::clear_trace();
        compute.bind_descriptor_sets(&pipeline_layout, 0, &[&set]).unwrap();

        let trace = MockDriver::trace();
        assert_eq!(trace.len(), 1);
        assert!(trace[0].starts_with("vkCmdBindDescriptorSets"));
        assert!(trace[0].ends_with("[256, 512])"), "{}", trace[0]);
    }

    #[test]
    fn descriptor_sets_must_match_the_pipeline_layout() {
        let device = make_test_device();
        let uniform = DescriptorSetLayout::new(&device, &[
            LayoutBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
        ]).unwrap();
        let storage = DescriptorSetLayout::new(&device, &[
            LayoutBinding::new(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
        ]).unwrap();
        let pipeline_layout = PipelineLayout::new(&device, &[uniform.clone()], &[]).unwrap();
        let mut descriptor_pool = DescriptorPool::new(&device, 2, &[], vk::DescriptorPoolCreateFlags::empty()).unwrap();
        let uniform_set = descriptor_pool.allocate(&uniform).unwrap();
        let storage_set = descriptor_pool.allocate(&storage).unwrap();

        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        let mut recorder = buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        let mut compute = recorder.begin_compute_pass().unwrap();

        MockDriver::clear_trace();
        assert!(matches!(compute.bind_descriptor_sets(&pipeline_layout, 1, &[&uniform_set]), Err(Error::Logic(_))));
        assert!(matches!(compute.bind_descriptor_sets(&pipeline_layout, 0, &[&uniform_set, &uniform_set]), Err(Error::Logic(_))));
        assert!(matches!(compute.bind_descriptor_sets(&pipeline_layout, 0, &[&storage_set]), Err(Error::Logic(_))));
        assert!(MockDriver::trace().is_empty());

        compute.bind_descriptor_sets(&pipeline_layout, 0, &[&uniform_set]).unwrap();
        assert_eq!(MockDriver::trace().len(), 1);
    }

    #[test]
    fn execute_requires_secondary_contents() {
        let device = make_test_device();
        let (_render_pass, _target, framebuffer) = make_test_framebuffer(&device);
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();

        let mut secondary = pool.allocate_secondary().unwrap();
        secondary.record_render_pass(&framebuffer, vk::CommandBufferUsageFlags::empty()).unwrap().end().unwrap();

        let mut primary = pool.allocate_primary().unwrap();
        let mut recorder = primary.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        {
            let mut pass = recorder.begin_render_pass(&framebuffer, framebuffer.full_render_area(), &[], false).unwrap();
            assert_eq!(pass.execute_commands(&[&secondary]), Err(Error::Protocol(ProtocolError::InlineRenderPass)));
        }
        {
            let mut pass = recorder.begin_render_pass(&framebuffer, framebuffer.full_render_area(), &[], true).unwrap();
            pass.execute_commands(&[&secondary]).unwrap();
        }
        recorder.execute_commands(&[&secondary]).unwrap();
        recorder.end().unwrap();
    }

    #[test]
    fn unfinished_secondaries_can_not_be_executed() {
        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let secondary = pool.allocate_secondary().unwrap();

        let mut primary = pool.allocate_primary().unwrap();
        let mut recorder = primary.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        assert!(recorder.execute_commands(&[&secondary]).is_err());
    }

    #[test]
    fn synchronization2_barriers_need_a_1_3_device() {
        let barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ)
            .build();
        let dependency = vk::DependencyInfo::builder()
            .memory_barriers(std::slice::from_ref(&barrier))
            .build();

        let device = make_test_device();
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        let mut recorder = buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        match recorder.pipeline_barrier2(&dependency) {
            Err(Error::SymbolsMissing { requested, .. }) => assert_eq!(requested, VulkanVersion::VK_1_3),
            other => panic!("Unexpected result {:?}", other),
        }
        recorder.end().unwrap();

        let device = make_test_device_with_version(VulkanVersion::VK_1_3);
        let mut pool = CommandPool::new(&device, 0, vk::CommandPoolCreateFlags::empty()).unwrap();
        let mut buffer = pool.allocate_primary().unwrap();
        let mut recorder = buffer.record(vk::CommandBufferUsageFlags::empty()).unwrap();
        MockDriver::clear_trace();
        recorder.pipeline_barrier2(&dependency).unwrap();
        recorder.end().unwrap();
        assert!(MockDriver::trace().contains(&String::from("vkCmdPipelineBarrier2()")));
    }
}
