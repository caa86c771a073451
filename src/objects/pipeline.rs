//! Pipeline layouts, pipelines and pipeline caches.

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::device::{DeviceContext, DeviceFunctions};
use crate::error::{post_error, Error};
use crate::instance::DeviceFeature;
use crate::objects::descriptor::{DescriptorSetLayout, LayoutBinding};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::objects::render_pass::RenderPass;
use crate::shader::{ComputeShader, FragmentShader, ShaderModule, VertexShader};
use crate::vk_check;

/// Values for specialization constants of one shader stage.
#[derive(Clone, Default, Debug)]
pub struct SpecializationConstants {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the value of constant `id`. Every id may only be set once.
    pub fn add_constant<T: Pod>(&mut self, id: u32, value: &T) -> Result<(), Error> {
        if self.entries.iter().any(|entry| entry.constant_id == id) {
            return post_error(Error::Logic(format!("specialization constant {} set twice", id)));
        }

        let bytes = bytemuck::bytes_of(value);
        self.entries.push(vk::SpecializationMapEntry {
            constant_id: id,
            offset: self.data.len() as u32,
            size: bytes.len(),
        });
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn info(&self) -> vk::SpecializationInfoBuilder<'_> {
        vk::SpecializationInfo::builder()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

pub struct PipelineLayout {
    handle: DeviceHandle<vk::PipelineLayout>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    pub fn new(device: &DeviceContext, set_layouts: &[Arc<DescriptorSetLayout>], push_constant_ranges: &[vk::PushConstantRange]) -> Result<Self, Error> {
        Self::create(device.get_functions(), set_layouts.to_vec(), push_constant_ranges.to_vec())
    }

    /// Derives a layout from the reflected interface of the shaders.
    ///
    /// Bindings used by several stages are merged into one binding visible to all of them. Set
    /// numbers without any binding get an empty set layout. Every stage gets its own push
    /// constant range.
    pub fn from_shaders(device: &DeviceContext, shaders: &[&ShaderModule]) -> Result<Self, Error> {
        let mut sets: BTreeMap<u32, Vec<LayoutBinding>> = BTreeMap::new();
        let mut push_constant_ranges = Vec::new();

        for shader in shaders {
            for reflected in shader.descriptor_bindings() {
                let bindings = sets.entry(reflected.set).or_default();
                match bindings.iter_mut().find(|binding| binding.binding == reflected.binding) {
                    Some(binding) => {
                        if binding.descriptor_type != reflected.descriptor_type || binding.count != reflected.count {
                            return post_error(Error::Logic(format!("set {} binding {} is declared as {:?}[{}] and {:?}[{}] by different stages",
                                reflected.set, reflected.binding, binding.descriptor_type, binding.count, reflected.descriptor_type, reflected.count)));
                        }
                        binding.stages |= shader.stage();
                    }
                    None => bindings.push(LayoutBinding::new(reflected.binding, reflected.descriptor_type, reflected.count, shader.stage())),
                }
            }

            if let Some(range) = shader.push_constants() {
                push_constant_ranges.push(vk::PushConstantRange {
                    stage_flags: shader.stage(),
                    offset: range.offset,
                    size: range.size,
                });
            }
        }

        let functions = device.get_functions();
        let set_count = sets.keys().next_back().map_or(0, |last| last + 1);
        let mut set_layouts = Vec::with_capacity(set_count as usize);
        for set in 0..set_count {
            let bindings = sets.get(&set).map(Vec::as_slice).unwrap_or(&[]);
            set_layouts.push(DescriptorSetLayout::from_functions(functions, bindings)?);
        }

        Self::create(functions, set_layouts, push_constant_ranges)
    }

    fn create(functions: &Arc<DeviceFunctions>, set_layouts: Vec<Arc<DescriptorSetLayout>>, push_constant_ranges: Vec<vk::PushConstantRange>) -> Result<Self, Error> {
        let native_layouts: Vec<_> = set_layouts.iter().map(|layout| layout.handle()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&native_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let handle = Handle::create(functions.clone(), |functions| {
            let mut layout = vk::PipelineLayout::null();
            unsafe {
                vk_check!((functions.vk().create_pipeline_layout)(functions.handle(), &*create_info, std::ptr::null(), &mut layout))?;
            }
            Ok(layout)
        })?;

        Ok(Self {
            handle,
            set_layouts,
            push_constant_ranges,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::PipelineLayout> {
        self.handle.weak()
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Debug for PipelineLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle())
            .field("set_layouts", &self.set_layouts.len())
            .field("push_constant_ranges", &self.push_constant_ranges)
            .finish()
    }
}

pub struct PipelineCache {
    handle: DeviceHandle<vk::PipelineCache>,
}

impl PipelineCache {
    /// Creates a cache, optionally seeded with data previously returned by [`PipelineCache::data`].
    pub fn new(device: &DeviceContext, initial_data: &[u8]) -> Result<Self, Error> {
        let create_info = vk::PipelineCacheCreateInfo::builder()
            .initial_data(initial_data);

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut cache = vk::PipelineCache::null();
            unsafe {
                vk_check!((functions.vk().create_pipeline_cache)(functions.handle(), &*create_info, std::ptr::null(), &mut cache))?;
            }
            Ok(cache)
        })?;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.handle.raw()
    }

    pub fn data(&self) -> Result<Vec<u8>, Error> {
        let functions = self.handle.owner();
        let mut size = 0usize;
        unsafe {
            vk_check!((functions.vk().get_pipeline_cache_data)(functions.handle(), self.handle(), &mut size, std::ptr::null_mut()))?;
        }
        let mut data = vec![0u8; size];
        unsafe {
            vk_check!((functions.vk().get_pipeline_cache_data)(functions.handle(), self.handle(), &mut size, data.as_mut_ptr() as *mut c_void))?;
        }
        data.truncate(size);
        Ok(data)
    }
}

impl Debug for PipelineCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineCache").field(&self.handle()).finish()
    }
}

struct StageInfo<'a> {
    module: &'a ShaderModule,
    specialization: Option<&'a SpecializationConstants>,
}

/// Collects the state of a graphics pipeline.
///
/// Defaults to a triangle list without culling, depth testing or blending, one sample and
/// dynamic viewport and scissor.
pub struct GraphicsPipelineCreateInfo<'a> {
    device: &'a DeviceContext,
    render_pass: &'a RenderPass,
    subpass: u32,
    layout: &'a PipelineLayout,
    vertex: Option<StageInfo<'a>>,
    fragment: Option<StageInfo<'a>>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    primitive_restart: bool,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    line_width: f32,
    depth_test: Option<(bool, vk::CompareOp)>,
    blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    dynamic_states: Vec<vk::DynamicState>,
    samples: vk::SampleCountFlags,
    min_sample_shading: Option<f32>,
    sample_mask: Vec<vk::SampleMask>,
}

impl<'a> GraphicsPipelineCreateInfo<'a> {
    pub fn new(device: &'a DeviceContext, render_pass: &'a RenderPass, subpass: u32, layout: &'a PipelineLayout) -> Self {
        let blend = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build();

        Self {
            device,
            render_pass,
            subpass,
            layout,
            vertex: None,
            fragment: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_test: None,
            blend_attachments: vec![blend; render_pass.num_color_attachments() as usize],
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            sample_mask: Vec::new(),
        }
    }

    /// Sets the vertex shader. Replaces any previously set vertex shader.
    pub fn set_vertex_shader(&mut self, shader: &'a VertexShader, specialization: Option<&'a SpecializationConstants>) -> &mut Self {
        self.vertex = Some(StageInfo { module: shader.module(), specialization });
        self
    }

    /// Sets the fragment shader. Replaces any previously set fragment shader.
    pub fn set_fragment_shader(&mut self, shader: &'a FragmentShader, specialization: Option<&'a SpecializationConstants>) -> &mut Self {
        self.fragment = Some(StageInfo { module: shader.module(), specialization });
        self
    }

    pub fn set_vertex_input(&mut self, bindings: &[vk::VertexInputBindingDescription], attributes: &[vk::VertexInputAttributeDescription]) -> &mut Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn set_input_assembly(&mut self, topology: vk::PrimitiveTopology, primitive_restart: bool) -> &mut Self {
        self.topology = topology;
        self.primitive_restart = primitive_restart;
        self
    }

    pub fn set_rasterization(&mut self, polygon_mode: vk::PolygonMode, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace, line_width: f32) -> &mut Self {
        self.polygon_mode = polygon_mode;
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self.line_width = line_width;
        self
    }

    pub fn enable_depth_test(&mut self, write: bool, compare_op: vk::CompareOp) -> &mut Self {
        self.depth_test = Some((write, compare_op));
        self
    }

    /// Sets the blend state of one color attachment.
    pub fn set_blend(&mut self, attachment: u32, state: vk::PipelineColorBlendAttachmentState) -> Result<&mut Self, Error> {
        match self.blend_attachments.get_mut(attachment as usize) {
            Some(slot) => {
                *slot = state;
                Ok(self)
            }
            None => post_error(Error::Logic(format!("render pass has no color attachment #{}", attachment))),
        }
    }

    /// Adds a dynamic state. Adding a state twice has no effect.
    pub fn add_dynamic_state(&mut self, state: vk::DynamicState) -> &mut Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    pub fn dynamic_states(&self) -> &[vk::DynamicState] {
        &self.dynamic_states
    }

    pub fn set_multisampling(&mut self, samples: vk::SampleCountFlags) -> &mut Self {
        self.samples = samples;
        self
    }

    /// Enables sample rate shading. Requires multisampling and the `sampleRateShading` device
    /// feature.
    pub fn enable_sample_rate_shading(&mut self, min_sample_shading: f32) -> Result<&mut Self, Error> {
        if self.samples == vk::SampleCountFlags::TYPE_1 {
            return post_error(Error::Logic(String::from("sample rate shading requires multisampling")));
        }
        if !self.device.get_functions().is_feature_enabled(DeviceFeature::SampleRateShading) {
            return post_error(Error::Logic(String::from("sample rate shading requires the sampleRateShading feature")));
        }
        self.min_sample_shading = Some(min_sample_shading);
        Ok(self)
    }

    /// Sets the sample mask. Needs one word per 32 samples.
    pub fn set_sample_mask(&mut self, mask: &[vk::SampleMask]) -> Result<&mut Self, Error> {
        let expected = ((self.samples.as_raw() + 31) / 32) as usize;
        if mask.len() != expected {
            return post_error(Error::Logic(format!("sample mask has {} words but {:?} needs {}", mask.len(), self.samples, expected)));
        }
        self.sample_mask = mask.to_vec();
        Ok(self)
    }
}

fn make_stage<'b>(stage: vk::ShaderStageFlags, info: &'b StageInfo, specialization: &'b Option<vk::SpecializationInfo>) -> vk::PipelineShaderStageCreateInfo {
    let mut builder = vk::PipelineShaderStageCreateInfo::builder()
        .stage(stage)
        .module(info.module.handle())
        .name(info.module.entry_point());
    if let Some(specialization) = specialization {
        builder = builder.specialization_info(specialization);
    }
    builder.build()
}

pub struct GraphicsPipeline {
    handle: DeviceHandle<vk::Pipeline>,
    layout: Unowned<vk::PipelineLayout>,
    render_pass: Unowned<vk::RenderPass>,
}

impl GraphicsPipeline {
    pub fn new(info: &GraphicsPipelineCreateInfo, cache: Option<&PipelineCache>) -> Result<Self, Error> {
        let vertex = match &info.vertex {
            Some(vertex) => vertex,
            None => return post_error(Error::Logic(String::from("graphics pipelines need a vertex shader"))),
        };
        if info.subpass >= info.render_pass.subpass_count() {
            return post_error(Error::Logic(format!("render pass has no subpass #{}", info.subpass)));
        }

        let mut stage_infos = vec![(vk::ShaderStageFlags::VERTEX, vertex)];
        if let Some(fragment) = &info.fragment {
            stage_infos.push((vk::ShaderStageFlags::FRAGMENT, fragment));
        }
        let specializations: Vec<_> = stage_infos.iter()
            .map(|(_, stage)| stage.specialization.map(|constants| constants.info().build()))
            .collect();
        let stages: Vec<_> = stage_infos.iter().zip(specializations.iter())
            .map(|((stage, stage_info), specialization)| make_stage(*stage, stage_info, specialization))
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&info.vertex_bindings)
            .vertex_attribute_descriptions(&info.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(info.topology)
            .primitive_restart_enable(info.primitive_restart);

        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(info.polygon_mode)
            .cull_mode(info.cull_mode)
            .front_face(info.front_face)
            .line_width(info.line_width);

        let mut multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(info.samples);
        if let Some(min) = info.min_sample_shading {
            multisample = multisample.sample_shading_enable(true).min_sample_shading(min);
        }
        if !info.sample_mask.is_empty() {
            multisample = multisample.sample_mask(&info.sample_mask);
        }

        let (depth_test, depth_write, compare_op) = match info.depth_test {
            Some((write, op)) => (true, write, op),
            None => (false, false, vk::CompareOp::ALWAYS),
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth_test)
            .depth_write_enable(depth_write)
            .depth_compare_op(compare_op);

        let blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&info.blend_attachments);

        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&info.dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(info.layout.handle())
            .render_pass(info.render_pass.handle())
            .subpass(info.subpass);

        let cache = cache.map_or(vk::PipelineCache::null(), PipelineCache::handle);
        let handle = Handle::create(info.device.get_functions().clone(), |functions| {
            let mut pipeline = vk::Pipeline::null();
            unsafe {
                vk_check!((functions.vk().create_graphics_pipelines)(functions.handle(), cache, 1, &*create_info, std::ptr::null(), &mut pipeline))?;
            }
            Ok(pipeline)
        })?;
        log::debug!("Created graphics pipeline {:?}", handle.raw());

        Ok(Self {
            handle,
            layout: info.layout.weak(),
            render_pass: info.render_pass.weak(),
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle.raw()
    }

    pub fn layout(&self) -> Unowned<vk::PipelineLayout> {
        self.layout
    }

    pub fn render_pass(&self) -> Unowned<vk::RenderPass> {
        self.render_pass
    }
}

impl Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GraphicsPipeline").field(&self.handle()).finish()
    }
}

pub struct ComputePipelineCreateInfo<'a> {
    device: &'a DeviceContext,
    layout: &'a PipelineLayout,
    shader: StageInfo<'a>,
}

impl<'a> ComputePipelineCreateInfo<'a> {
    pub fn new(device: &'a DeviceContext, layout: &'a PipelineLayout, shader: &'a ComputeShader, specialization: Option<&'a SpecializationConstants>) -> Self {
        Self {
            device,
            layout,
            shader: StageInfo { module: shader.module(), specialization },
        }
    }
}

pub struct ComputePipeline {
    handle: DeviceHandle<vk::Pipeline>,
    layout: Unowned<vk::PipelineLayout>,
}

impl ComputePipeline {
    pub fn new(info: &ComputePipelineCreateInfo, cache: Option<&PipelineCache>) -> Result<Self, Error> {
        let specialization = info.shader.specialization.map(|constants| constants.info().build());
        let stage = make_stage(vk::ShaderStageFlags::COMPUTE, &info.shader, &specialization);

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(info.layout.handle());

        let cache = cache.map_or(vk::PipelineCache::null(), PipelineCache::handle);
        let handle = Handle::create(info.device.get_functions().clone(), |functions| {
            let mut pipeline = vk::Pipeline::null();
            unsafe {
                vk_check!((functions.vk().create_compute_pipelines)(functions.handle(), cache, 1, &*create_info, std::ptr::null(), &mut pipeline))?;
            }
            Ok(pipeline)
        })?;
        log::debug!("Created compute pipeline {:?}", handle.raw());

        Ok(Self {
            handle,
            layout: info.layout.weak(),
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle.raw()
    }

    pub fn layout(&self) -> Unowned<vk::PipelineLayout> {
        self.layout
    }
}

impl Debug for ComputePipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ComputePipeline").field(&self.handle()).finish()
    }
}
