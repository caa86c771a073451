use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{post_error, Error};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::objects::image::ImageView;
use crate::objects::render_pass::RenderPass;
use crate::vk_check;

/// A set of image views bound to the attachments of a render pass.
///
/// The render pass and the views are referenced without ownership. They must outlive the
/// framebuffer and the framebuffer must outlive every recorder using it.
pub struct FrameBuffer {
    handle: DeviceHandle<vk::Framebuffer>,
    render_pass: Unowned<vk::RenderPass>,
    attachments: Vec<Unowned<vk::ImageView>>,
    extent: vk::Extent2D,
    layers: u32,
}

impl FrameBuffer {
    pub fn new(device: &DeviceContext, render_pass: &RenderPass, attachments: &[&ImageView], extent: vk::Extent2D, layers: u32) -> Result<Self, Error> {
        if attachments.len() as u32 != render_pass.attachment_count() {
            return post_error(Error::Logic(format!("render pass expects {} attachments but {} views were given", render_pass.attachment_count(), attachments.len())));
        }
        if extent.width == 0 || extent.height == 0 || layers == 0 {
            return post_error(Error::Logic(format!("framebuffer extent {}x{}x{} is empty", extent.width, extent.height, layers)));
        }
        for (index, view) in attachments.iter().enumerate() {
            let view_extent = view.extent();
            if view_extent.width < extent.width || view_extent.height < extent.height || view.layer_count() < layers {
                return post_error(Error::Logic(format!("attachment #{} of size {}x{}x{} is smaller than the framebuffer {}x{}x{}",
                    index, view_extent.width, view_extent.height, view.layer_count(), extent.width, extent.height, layers)));
            }
        }

        let views: Vec<_> = attachments.iter().map(|view| view.handle()).collect();
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);

        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut framebuffer = vk::Framebuffer::null();
            unsafe {
                vk_check!((functions.vk().create_framebuffer)(functions.handle(), &*create_info, std::ptr::null(), &mut framebuffer))?;
            }
            Ok(framebuffer)
        })?;

        Ok(Self {
            handle,
            render_pass: render_pass.weak(),
            attachments: attachments.iter().map(|view| view.weak()).collect(),
            extent,
            layers,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle.raw()
    }

    pub fn render_pass(&self) -> Unowned<vk::RenderPass> {
        self.render_pass
    }

    pub fn attachments(&self) -> &[Unowned<vk::ImageView>] {
        &self.attachments
    }

    pub fn extents(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn full_render_area(&self) -> vk::Rect2D {
        crate::util::vk::make_full_rect(self.extent)
    }
}

impl Debug for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("handle", &self.handle())
            .field("render_pass", &self.render_pass.raw())
            .field("extent", &self.extent)
            .field("layers", &self.layers)
            .finish()
    }
}
