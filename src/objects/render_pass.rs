//! Render pass descriptions and their validation.
//!
//! A [`RenderPassBuilder`] is validated completely before any native object is created. Every
//! failure is reported as [`Error::BadRenderPassCreateInfo`] with a message naming the subpass
//! and attachment at fault.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{post_error, Error};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::objects::image::is_depth_format;
use crate::vk_check;

/// The attachments one subpass reads and writes.
#[derive(Clone, Default, Debug)]
pub struct SubpassDescription {
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    resolve: Vec<vk::AttachmentReference>,
    depth: Option<vk::AttachmentReference>,
    preserve: Vec<u32>,
}

impl SubpassDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.input.push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn add_color_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.color.push(vk::AttachmentReference { attachment, layout });
        self
    }

    /// Resolve attachments pair up with the color attachments in order.
    pub fn add_resolve_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.resolve.push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn set_depth_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.depth = Some(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn add_preserve_attachment(mut self, attachment: u32) -> Self {
        self.preserve.push(attachment);
        self
    }

    pub fn color_attachments(&self) -> &[vk::AttachmentReference] {
        &self.color
    }

    fn build(&self) -> vk::SubpassDescription {
        let mut builder = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&self.input)
            .color_attachments(&self.color)
            .preserve_attachments(&self.preserve);
        if !self.resolve.is_empty() {
            builder = builder.resolve_attachments(&self.resolve);
        }
        if let Some(depth) = &self.depth {
            builder = builder.depth_stencil_attachment(depth);
        }
        builder.build()
    }
}

#[derive(Clone, Default, Debug)]
pub struct RenderPassBuilder {
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<SubpassDescription>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attachment and returns its index.
    pub fn add_attachment(&mut self, description: vk::AttachmentDescription) -> u32 {
        self.attachments.push(description);
        (self.attachments.len() - 1) as u32
    }

    /// Adds a subpass and returns its index.
    pub fn add_subpass(&mut self, subpass: SubpassDescription) -> u32 {
        self.subpasses.push(subpass);
        (self.subpasses.len() - 1) as u32
    }

    /// Adds a dependency between two subpasses. `None` stands for operations outside the render
    /// pass.
    pub fn add_dependency(&mut self, src: Option<u32>, dst: Option<u32>, src_stages: vk::PipelineStageFlags, dst_stages: vk::PipelineStageFlags, src_access: vk::AccessFlags, dst_access: vk::AccessFlags, flags: vk::DependencyFlags) {
        self.dependencies.push(vk::SubpassDependency {
            src_subpass: src.unwrap_or(vk::SUBPASS_EXTERNAL),
            dst_subpass: dst.unwrap_or(vk::SUBPASS_EXTERNAL),
            src_stage_mask: src_stages,
            dst_stage_mask: dst_stages,
            src_access_mask: src_access,
            dst_access_mask: dst_access,
            dependency_flags: flags,
        });
    }

    pub fn attachments(&self) -> &[vk::AttachmentDescription] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[SubpassDescription] {
        &self.subpasses
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.attachments.is_empty() {
            return Err(Error::BadRenderPassCreateInfo(String::from("no attachments given")));
        }
        if self.subpasses.is_empty() {
            return Err(Error::BadRenderPassCreateInfo(String::from("no subpasses given")));
        }

        for (index, subpass) in self.subpasses.iter().enumerate() {
            let mut seen = HashSet::new();

            for reference in &subpass.input {
                self.check_bound(index, reference.attachment, "input")?;
                Self::check_unique(&mut seen, index, reference.attachment, "input")?;
            }
            for reference in &subpass.color {
                let format = self.check_bound(index, reference.attachment, "color")?;
                if is_depth_format(format) {
                    return Err(Error::BadRenderPassCreateInfo(format!("subpass #{} color attachment #{} has depth format {:?}", index, reference.attachment, format)));
                }
                Self::check_unique(&mut seen, index, reference.attachment, "color")?;
            }
            for reference in &subpass.resolve {
                if reference.attachment != vk::ATTACHMENT_UNUSED {
                    self.check_bound(index, reference.attachment, "resolve")?;
                }
            }
            for attachment in &subpass.preserve {
                self.check_bound(index, *attachment, "preserved")?;
            }
            if let Some(reference) = &subpass.depth {
                let format = self.check_bound(index, reference.attachment, "depth/stencil")?;
                if !is_depth_format(format) {
                    return Err(Error::BadRenderPassCreateInfo(format!("subpass #{} depth attachment #{} has non-depth format {:?}", index, reference.attachment, format)));
                }
                Self::check_unique(&mut seen, index, reference.attachment, "depth/stencil")?;
            }

            if !subpass.resolve.is_empty() && subpass.resolve.len() != subpass.color.len() {
                return Err(Error::BadRenderPassCreateInfo(format!("subpass #{} has different count of color and resolve attachments - {} vs {}", index, subpass.color.len(), subpass.resolve.len())));
            }
        }

        for (index, dependency) in self.dependencies.iter().enumerate() {
            for subpass in [dependency.src_subpass, dependency.dst_subpass] {
                if subpass != vk::SUBPASS_EXTERNAL && subpass as usize >= self.subpasses.len() {
                    return Err(Error::BadRenderPassCreateInfo(format!("dependency #{} references subpass #{} - only have {} subpasses", index, subpass, self.subpasses.len())));
                }
            }
        }

        Ok(())
    }

    fn check_bound(&self, subpass: usize, attachment: u32, kind: &str) -> Result<vk::Format, Error> {
        match self.attachments.get(attachment as usize) {
            Some(description) => Ok(description.format),
            None => Err(Error::BadRenderPassCreateInfo(format!("subpass #{} referenced unbound {} attachment #{} - only have {} attachments bound", subpass, kind, attachment, self.attachments.len()))),
        }
    }

    fn check_unique(seen: &mut HashSet<u32>, subpass: usize, attachment: u32, kind: &str) -> Result<(), Error> {
        if seen.insert(attachment) {
            Ok(())
        } else {
            Err(Error::BadRenderPassCreateInfo(format!("subpass #{} references {} attachment #{} twice", subpass, kind, attachment)))
        }
    }
}

pub struct RenderPass {
    handle: DeviceHandle<vk::RenderPass>,
    attachments: Vec<vk::AttachmentDescription>,
    subpass_count: u32,
    num_color_attachments: u32,
}

impl RenderPass {
    pub fn new(device: &DeviceContext, builder: &RenderPassBuilder) -> Result<Self, Error> {
        if let Err(err) = builder.validate() {
            return post_error(err);
        }

        let subpasses: Vec<_> = builder.subpasses.iter().map(SubpassDescription::build).collect();
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&builder.attachments)
            .subpasses(&subpasses)
            .dependencies(&builder.dependencies);

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut render_pass = vk::RenderPass::null();
            unsafe {
                vk_check!((functions.vk().create_render_pass)(functions.handle(), &*create_info, std::ptr::null(), &mut render_pass))?;
            }
            Ok(render_pass)
        })?;

        let num_color_attachments = builder.attachments.iter().filter(|attachment| !is_depth_format(attachment.format)).count() as u32;

        Ok(Self {
            handle,
            attachments: builder.attachments.clone(),
            subpass_count: builder.subpasses.len() as u32,
            num_color_attachments,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::RenderPass> {
        self.handle.weak()
    }

    pub fn attachments(&self) -> &[vk::AttachmentDescription] {
        &self.attachments
    }

    pub fn attachment_count(&self) -> u32 {
        self.attachments.len() as u32
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }

    /// The number of attachments with a color format. Used to size the default blend state.
    pub fn num_color_attachments(&self) -> u32 {
        self.num_color_attachments
    }
}

impl Debug for RenderPass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle())
            .field("attachments", &self.attachments.len())
            .field("subpasses", &self.subpass_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_attachment(format: vk::Format) -> vk::AttachmentDescription {
        vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()
    }

    fn message(builder: &RenderPassBuilder) -> String {
        match builder.validate() {
            Err(Error::BadRenderPassCreateInfo(msg)) => msg,
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn empty_builders_fail() {
        let mut builder = RenderPassBuilder::new();
        assert_eq!(message(&builder), "no attachments given");
        builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        assert_eq!(message(&builder), "no subpasses given");
    }

    #[test]
    fn depth_and_color_formats_are_checked() {
        let mut builder = RenderPassBuilder::new();
        let color = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        let depth = builder.add_attachment(make_attachment(vk::Format::D32_SFLOAT));
        builder.add_subpass(SubpassDescription::new().add_color_attachment(depth, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(message(&builder), "subpass #0 color attachment #1 has depth format D32_SFLOAT");

        let mut builder = RenderPassBuilder::new();
        builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        builder.add_subpass(SubpassDescription::new().set_depth_attachment(color, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        assert_eq!(message(&builder), "subpass #0 depth attachment #0 has non-depth format R8G8B8A8_UNORM");
    }

    #[test]
    fn resolve_count_must_match() {
        let mut builder = RenderPassBuilder::new();
        let a = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        let b = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        let c = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        builder.add_subpass(SubpassDescription::new()
            .add_color_attachment(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .add_color_attachment(b, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .add_resolve_attachment(c, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(message(&builder), "subpass #0 has different count of color and resolve attachments - 2 vs 1");
    }

    #[test]
    fn dependencies_must_reference_subpasses() {
        let mut builder = RenderPassBuilder::new();
        let a = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        builder.add_subpass(SubpassDescription::new().add_color_attachment(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        builder.add_dependency(None, Some(0), vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::empty(), vk::AccessFlags::COLOR_ATTACHMENT_WRITE, vk::DependencyFlags::empty());
        assert!(builder.validate().is_ok());

        builder.add_dependency(Some(0), Some(1), vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty(), vk::AccessFlags::empty(), vk::DependencyFlags::empty());
        assert_eq!(message(&builder), "dependency #1 references subpass #1 - only have 1 subpasses");
    }

    #[test]
    fn color_count_excludes_depth() {
        let device = crate::util::test::make_test_device();
        let mut builder = RenderPassBuilder::new();
        let color = builder.add_attachment(make_attachment(vk::Format::R8G8B8A8_UNORM));
        let depth = builder.add_attachment(make_attachment(vk::Format::D24_UNORM_S8_UINT));
        builder.add_subpass(SubpassDescription::new()
            .add_color_attachment(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .set_depth_attachment(depth, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));

        let render_pass = RenderPass::new(&device, &builder).unwrap();
        assert_eq!(render_pass.num_color_attachments(), 1);
        assert_eq!(render_pass.attachment_count(), 2);
    }
}
