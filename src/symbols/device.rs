use crate::error::{post_error, Error};
use crate::instance::VulkanVersion;

use super::{check_table, fn_table, walk_tiers, SymbolLoader, TierLoader};

fn_table! {
    pub struct DeviceFnV1_0 {
        destroy_device => vkDestroyDevice,
        get_device_queue => vkGetDeviceQueue,
        device_wait_idle => vkDeviceWaitIdle,
        queue_submit => vkQueueSubmit,
        queue_wait_idle => vkQueueWaitIdle,

        allocate_memory => vkAllocateMemory,
        free_memory => vkFreeMemory,
        map_memory => vkMapMemory,
        unmap_memory => vkUnmapMemory,
        flush_mapped_memory_ranges => vkFlushMappedMemoryRanges,
        invalidate_mapped_memory_ranges => vkInvalidateMappedMemoryRanges,
        bind_buffer_memory => vkBindBufferMemory,
        bind_image_memory => vkBindImageMemory,
        get_buffer_memory_requirements => vkGetBufferMemoryRequirements,
        get_image_memory_requirements => vkGetImageMemoryRequirements,

        create_fence => vkCreateFence,
        destroy_fence => vkDestroyFence,
        reset_fences => vkResetFences,
        get_fence_status => vkGetFenceStatus,
        wait_for_fences => vkWaitForFences,
        create_semaphore => vkCreateSemaphore,
        destroy_semaphore => vkDestroySemaphore,

        create_query_pool => vkCreateQueryPool,
        destroy_query_pool => vkDestroyQueryPool,
        get_query_pool_results => vkGetQueryPoolResults,

        create_buffer => vkCreateBuffer,
        destroy_buffer => vkDestroyBuffer,
        create_image => vkCreateImage,
        destroy_image => vkDestroyImage,
        create_image_view => vkCreateImageView,
        destroy_image_view => vkDestroyImageView,
        create_sampler => vkCreateSampler,
        destroy_sampler => vkDestroySampler,

        create_shader_module => vkCreateShaderModule,
        destroy_shader_module => vkDestroyShaderModule,
        create_pipeline_cache => vkCreatePipelineCache,
        destroy_pipeline_cache => vkDestroyPipelineCache,
        get_pipeline_cache_data => vkGetPipelineCacheData,
        create_graphics_pipelines => vkCreateGraphicsPipelines,
        create_compute_pipelines => vkCreateComputePipelines,
        destroy_pipeline => vkDestroyPipeline,
        create_pipeline_layout => vkCreatePipelineLayout,
        destroy_pipeline_layout => vkDestroyPipelineLayout,

        create_descriptor_set_layout => vkCreateDescriptorSetLayout,
        destroy_descriptor_set_layout => vkDestroyDescriptorSetLayout,
        create_descriptor_pool => vkCreateDescriptorPool,
        destroy_descriptor_pool => vkDestroyDescriptorPool,
        reset_descriptor_pool => vkResetDescriptorPool,
        allocate_descriptor_sets => vkAllocateDescriptorSets,
        free_descriptor_sets => vkFreeDescriptorSets,
        update_descriptor_sets => vkUpdateDescriptorSets,

        create_framebuffer => vkCreateFramebuffer,
        destroy_framebuffer => vkDestroyFramebuffer,
        create_render_pass => vkCreateRenderPass,
        destroy_render_pass => vkDestroyRenderPass,

        create_command_pool => vkCreateCommandPool,
        destroy_command_pool => vkDestroyCommandPool,
        reset_command_pool => vkResetCommandPool,
        allocate_command_buffers => vkAllocateCommandBuffers,
        free_command_buffers => vkFreeCommandBuffers,
        begin_command_buffer => vkBeginCommandBuffer,
        end_command_buffer => vkEndCommandBuffer,
        reset_command_buffer => vkResetCommandBuffer,

        cmd_bind_pipeline => vkCmdBindPipeline,
        cmd_set_viewport => vkCmdSetViewport,
        cmd_set_scissor => vkCmdSetScissor,
        cmd_bind_descriptor_sets => vkCmdBindDescriptorSets,
        cmd_bind_index_buffer => vkCmdBindIndexBuffer,
        cmd_bind_vertex_buffers => vkCmdBindVertexBuffers,
        cmd_draw => vkCmdDraw,
        cmd_draw_indexed => vkCmdDrawIndexed,
        cmd_dispatch => vkCmdDispatch,
        cmd_copy_buffer => vkCmdCopyBuffer,
        cmd_copy_image => vkCmdCopyImage,
        cmd_blit_image => vkCmdBlitImage,
        cmd_copy_buffer_to_image => vkCmdCopyBufferToImage,
        cmd_copy_image_to_buffer => vkCmdCopyImageToBuffer,
        cmd_pipeline_barrier => vkCmdPipelineBarrier,
        cmd_begin_query => vkCmdBeginQuery,
        cmd_end_query => vkCmdEndQuery,
        cmd_reset_query_pool => vkCmdResetQueryPool,
        cmd_write_timestamp => vkCmdWriteTimestamp,
        cmd_push_constants => vkCmdPushConstants,
        cmd_begin_render_pass => vkCmdBeginRenderPass,
        cmd_end_render_pass => vkCmdEndRenderPass,
        cmd_execute_commands => vkCmdExecuteCommands,
    }
}

fn_table! {
    pub struct DeviceFnV1_1 {
        trim_command_pool => vkTrimCommandPool,
        get_device_queue2 => vkGetDeviceQueue2,
    }
}

fn_table! {
    pub struct DeviceFnV1_2 {
        reset_query_pool => vkResetQueryPool,
        wait_semaphores => vkWaitSemaphores,
        signal_semaphore => vkSignalSemaphore,
        get_semaphore_counter_value => vkGetSemaphoreCounterValue,
    }
}

fn_table! {
    pub struct DeviceFnV1_3 {
        cmd_pipeline_barrier2 => vkCmdPipelineBarrier2,
        queue_submit2 => vkQueueSubmit2,
    }
}

/// The core device tables up to the negotiated version.
///
/// Tables above the negotiated version are never loaded. Accessing them returns
/// [`Error::SymbolsMissing`] instead of exposing a null function pointer.
#[derive(Copy, Clone)]
pub struct DeviceCore {
    version: VulkanVersion,
    v1_0: DeviceFnV1_0,
    v1_1: Option<DeviceFnV1_1>,
    v1_2: Option<DeviceFnV1_2>,
    v1_3: Option<DeviceFnV1_3>,
}

impl DeviceCore {
    const TIERS: [(VulkanVersion, TierLoader<DeviceCore>); 4] = [
        (VulkanVersion::VK_1_0, Self::load_1_0 as TierLoader<DeviceCore>),
        (VulkanVersion::VK_1_1, Self::load_1_1 as TierLoader<DeviceCore>),
        (VulkanVersion::VK_1_2, Self::load_1_2 as TierLoader<DeviceCore>),
        (VulkanVersion::VK_1_3, Self::load_1_3 as TierLoader<DeviceCore>),
    ];

    /// # Safety
    /// The loader must return function pointers matching the signature of the requested symbol.
    pub unsafe fn resolve(negotiated: VulkanVersion, loader: &mut SymbolLoader) -> Result<Self, Error> {
        walk_tiers(&Self::TIERS, negotiated, loader)
    }

    unsafe fn load_1_0(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        Ok(Self {
            version,
            v1_0: check_table(DeviceFnV1_0::NAME, DeviceFnV1_0::load(loader))?,
            v1_1: None,
            v1_2: None,
            v1_3: None,
        })
    }

    unsafe fn load_1_1(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        let mut core = Self::load_1_0(loader, version)?;
        core.v1_1 = Some(check_table(DeviceFnV1_1::NAME, DeviceFnV1_1::load(loader))?);
        Ok(core)
    }

    unsafe fn load_1_2(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        let mut core = Self::load_1_1(loader, version)?;
        core.v1_2 = Some(check_table(DeviceFnV1_2::NAME, DeviceFnV1_2::load(loader))?);
        Ok(core)
    }

    unsafe fn load_1_3(loader: &mut SymbolLoader, version: VulkanVersion) -> Result<Self, Error> {
        let mut core = Self::load_1_2(loader, version)?;
        core.v1_3 = Some(check_table(DeviceFnV1_3::NAME, DeviceFnV1_3::load(loader))?);
        Ok(core)
    }

    pub fn version(&self) -> VulkanVersion {
        self.version
    }

    pub fn v1_0(&self) -> &DeviceFnV1_0 {
        &self.v1_0
    }

    pub fn v1_1(&self) -> Result<&DeviceFnV1_1, Error> {
        match &self.v1_1 {
            Some(table) => Ok(table),
            None => self.missing(VulkanVersion::VK_1_1),
        }
    }

    pub fn v1_2(&self) -> Result<&DeviceFnV1_2, Error> {
        match &self.v1_2 {
            Some(table) => Ok(table),
            None => self.missing(VulkanVersion::VK_1_2),
        }
    }

    pub fn v1_3(&self) -> Result<&DeviceFnV1_3, Error> {
        match &self.v1_3 {
            Some(table) => Ok(table),
            None => self.missing(VulkanVersion::VK_1_3),
        }
    }

    fn missing<T>(&self, requested: VulkanVersion) -> Result<T, Error> {
        log::warn!("Requested device entry points for {} but only {} was loaded", requested, self.version);
        post_error(Error::SymbolsMissing { loaded: self.version, requested })
    }
}
