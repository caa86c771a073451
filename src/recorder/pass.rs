use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::device::DeviceFunctions;
use crate::error::{channel, post_error, Error};
use crate::objects::buffer::Buffer;
use crate::objects::framebuffer::FrameBuffer;
use crate::objects::image::Image;
use crate::objects::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::recorder::{execute_commands, CommandBuffer, DescriptorRecorder, Level, LevelKind, Primary, ProtocolError, RecordOp, Recorder, SecondaryCommandBuffer};

/// Records the commands of a render pass instance.
///
/// If the instance was begun with secondary contents only [`RenderPassRecorder::execute_commands`]
/// is accepted. Every other command fails with [`ProtocolError::SecondaryContentsPass`].
///
/// For primary buffers the instance is ended with `vkCmdEndRenderPass` when the recorder is
/// ended or dropped. For secondary buffers this ends the whole buffer.
pub struct RenderPassRecorder<'a, L: Level> {
    buffer: &'a mut CommandBuffer<L>,
    framebuffer: &'a FrameBuffer,
    contents: vk::SubpassContents,
    ended: bool,
}

impl<'a, L: Level> RenderPassRecorder<'a, L> {
    pub(super) fn new(buffer: &'a mut CommandBuffer<L>, framebuffer: &'a FrameBuffer, contents: vk::SubpassContents) -> Self {
        Self {
            buffer,
            framebuffer,
            contents,
            ended: false,
        }
    }

    pub fn framebuffer(&self) -> &FrameBuffer {
        self.framebuffer
    }

    pub fn contents(&self) -> vk::SubpassContents {
        self.contents
    }

    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_bind_pipeline)(self.buffer.handle(), vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        }
        Ok(())
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&Buffer, vk::DeviceSize)]) -> Result<(), Error> {
        self.check_inline()?;
        let handles: Vec<_> = buffers.iter().map(|(buffer, _)| buffer.handle()).collect();
        let offsets: Vec<_> = buffers.iter().map(|(_, offset)| *offset).collect();
        unsafe {
            (self.buffer.functions().vk().cmd_bind_vertex_buffers)(self.buffer.handle(), first_binding, handles.len() as u32, handles.as_ptr(), offsets.as_ptr());
        }
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_bind_index_buffer)(self.buffer.handle(), buffer.handle(), offset, index_type);
        }
        Ok(())
    }

    pub fn set_viewports(&mut self, first: u32, viewports: &[vk::Viewport]) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_set_viewport)(self.buffer.handle(), first, viewports.len() as u32, viewports.as_ptr());
        }
        Ok(())
    }

    pub fn set_scissors(&mut self, first: u32, scissors: &[vk::Rect2D]) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_set_scissor)(self.buffer.handle(), first, scissors.len() as u32, scissors.as_ptr());
        }
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_draw)(self.buffer.handle(), vertex_count, instance_count, first_vertex, first_instance);
        }
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) -> Result<(), Error> {
        self.check_inline()?;
        unsafe {
            (self.buffer.functions().vk().cmd_draw_indexed)(self.buffer.handle(), index_count, instance_count, first_index, vertex_offset, first_instance);
        }
        Ok(())
    }

    pub fn end(mut self) -> Result<(), Error> {
        self.ended = true;
        self.finish()
    }

    fn finish(&mut self) -> Result<(), Error> {
        match L::KIND {
            LevelKind::Primary => {
                self.buffer.check(RecordOp::EndPass)?;
                unsafe {
                    (self.buffer.functions().vk().cmd_end_render_pass)(self.buffer.handle());
                }
                self.buffer.apply(RecordOp::EndPass)
            }
            LevelKind::Secondary => self.buffer.end_native(),
        }
    }
}

impl<'a> RenderPassRecorder<'a, Primary> {
    /// Executes secondary buffers inside this render pass. The render pass must have been begun
    /// with secondary contents.
    pub fn execute_commands(&mut self, secondaries: &[&SecondaryCommandBuffer]) -> Result<(), Error> {
        if self.contents != vk::SubpassContents::SECONDARY_COMMAND_BUFFERS {
            log::error!("Executing secondary command buffers in an inline render pass");
            return post_error(ProtocolError::InlineRenderPass.into());
        }
        execute_commands(self.buffer, secondaries)
    }
}

impl<'a, L: Level> Recorder for RenderPassRecorder<'a, L> {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer.handle()
    }

    fn functions(&self) -> &DeviceFunctions {
        self.buffer.functions()
    }

    fn check_inline(&self) -> Result<(), Error> {
        if self.contents == vk::SubpassContents::SECONDARY_COMMAND_BUFFERS {
            log::error!("Recording inline commands in a render pass begun with secondary contents");
            return post_error(ProtocolError::SecondaryContentsPass.into());
        }
        Ok(())
    }
}

impl<'a, L: Level> DescriptorRecorder for RenderPassRecorder<'a, L> {
    const BIND_POINT: vk::PipelineBindPoint = vk::PipelineBindPoint::GRAPHICS;
}

impl<'a, L: Level> Drop for RenderPassRecorder<'a, L> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if let Err(err) = self.finish() {
            channel::destroy_failed("render pass recording", err);
        }
    }
}

impl<'a, L: Level> Debug for RenderPassRecorder<'a, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPassRecorder")
            .field("buffer", &self.buffer)
            .field("framebuffer", &self.framebuffer.handle())
            .field("contents", &self.contents)
            .finish()
    }
}

/// Records dispatches. Compute passes only exist on the recording side and make no native calls
/// when begun or ended.
pub struct ComputePassRecorder<'a> {
    buffer: &'a mut CommandBuffer<Primary>,
    ended: bool,
}

impl<'a> ComputePassRecorder<'a> {
    pub(super) fn new(buffer: &'a mut CommandBuffer<Primary>) -> Self {
        Self {
            buffer,
            ended: false,
        }
    }

    pub fn bind_pipeline(&mut self, pipeline: &ComputePipeline) {
        unsafe {
            (self.buffer.functions().vk().cmd_bind_pipeline)(self.buffer.handle(), vk::PipelineBindPoint::COMPUTE, pipeline.handle());
        }
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe {
            (self.buffer.functions().vk().cmd_dispatch)(self.buffer.handle(), x, y, z);
        }
    }

    pub fn end(mut self) -> Result<(), Error> {
        self.ended = true;
        self.buffer.apply(RecordOp::EndPass)
    }
}

impl<'a> Recorder for ComputePassRecorder<'a> {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer.handle()
    }

    fn functions(&self) -> &DeviceFunctions {
        self.buffer.functions()
    }
}

impl<'a> DescriptorRecorder for ComputePassRecorder<'a> {
    const BIND_POINT: vk::PipelineBindPoint = vk::PipelineBindPoint::COMPUTE;
}

impl<'a> Drop for ComputePassRecorder<'a> {
    fn drop(&mut self) {
        if !self.ended {
            self.ended = true;
            if let Err(err) = self.buffer.apply(RecordOp::EndPass) {
                channel::destroy_failed("compute pass recording", err);
            }
        }
    }
}

impl<'a> Debug for ComputePassRecorder<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePassRecorder")
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// Records copies and blits.
pub struct TransferPassRecorder<'a> {
    buffer: &'a mut CommandBuffer<Primary>,
    ended: bool,
}

impl<'a> TransferPassRecorder<'a> {
    pub(super) fn new(buffer: &'a mut CommandBuffer<Primary>) -> Self {
        Self {
            buffer,
            ended: false,
        }
    }

    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            (self.buffer.functions().vk().cmd_copy_buffer)(self.buffer.handle(), src.handle(), dst.handle(), regions.len() as u32, regions.as_ptr());
        }
    }

    pub fn copy_image(&mut self, src: &Image, src_layout: vk::ImageLayout, dst: &Image, dst_layout: vk::ImageLayout, regions: &[vk::ImageCopy]) {
        unsafe {
            (self.buffer.functions().vk().cmd_copy_image)(self.buffer.handle(), src.handle(), src_layout, dst.handle(), dst_layout, regions.len() as u32, regions.as_ptr());
        }
    }

    pub fn copy_buffer_to_image(&mut self, src: &Buffer, dst: &Image, dst_layout: vk::ImageLayout, regions: &[vk::BufferImageCopy]) {
        unsafe {
            (self.buffer.functions().vk().cmd_copy_buffer_to_image)(self.buffer.handle(), src.handle(), dst.handle(), dst_layout, regions.len() as u32, regions.as_ptr());
        }
    }

    pub fn copy_image_to_buffer(&mut self, src: &Image, src_layout: vk::ImageLayout, dst: &Buffer, regions: &[vk::BufferImageCopy]) {
        unsafe {
            (self.buffer.functions().vk().cmd_copy_image_to_buffer)(self.buffer.handle(), src.handle(), src_layout, dst.handle(), regions.len() as u32, regions.as_ptr());
        }
    }

    pub fn blit_image(&mut self, src: &Image, src_layout: vk::ImageLayout, dst: &Image, dst_layout: vk::ImageLayout, regions: &[vk::ImageBlit], filter: vk::Filter) {
        unsafe {
            (self.buffer.functions().vk().cmd_blit_image)(self.buffer.handle(), src.handle(), src_layout, dst.handle(), dst_layout, regions.len() as u32, regions.as_ptr(), filter);
        }
    }

    pub fn end(mut self) -> Result<(), Error> {
        self.ended = true;
        self.buffer.apply(RecordOp::EndPass)
    }
}

impl<'a> Recorder for TransferPassRecorder<'a> {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer.handle()
    }

    fn functions(&self) -> &DeviceFunctions {
        self.buffer.functions()
    }
}

impl<'a> Drop for TransferPassRecorder<'a> {
    fn drop(&mut self) {
        if !self.ended {
            self.ended = true;
            if let Err(err) = self.buffer.apply(RecordOp::EndPass) {
                channel::destroy_failed("transfer pass recording", err);
            }
        }
    }
}

impl<'a> Debug for TransferPassRecorder<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPassRecorder")
            .field("buffer", &self.buffer)
            .finish()
    }
}
