//! Images, image views and samplers.
//!
//! The capabilities of an image are described by an [`ImageKind`], a plain tagged description
//! built from the pixel type, the dimensionality and whether the image has multiple layers.
//! Queries against a kind are free functions.

use std::fmt::{Debug, Formatter};

use ash::vk;
use ash::vk::Handle as _;

use crate::allocator::{Allocation, MemoryUsage};
use crate::device::DeviceContext;
use crate::error::{post_error, Error};
use crate::objects::handle::{DeviceHandle, Handle, Unowned};
use crate::vk_check;

/// Which aspects the pixels of an image have.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PixelType {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

impl PixelType {
    pub fn from_format(format: vk::Format) -> Self {
        match format {
            vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => PixelType::Depth,
            vk::Format::S8_UINT => PixelType::Stencil,
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => PixelType::DepthStencil,
            _ => PixelType::Color,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ImageDim {
    D1,
    D2,
    D3,
    /// A 2d image with 6 layers per cube that can be viewed as a cube map.
    Cube,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Arrayness {
    Single,
    Array,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ImageKind {
    pub pixel: PixelType,
    pub dim: ImageDim,
    pub arrayness: Arrayness,
}

impl ImageKind {
    pub const fn new(pixel: PixelType, dim: ImageDim, arrayness: Arrayness) -> Self {
        Self {
            pixel,
            dim,
            arrayness,
        }
    }

    /// Derives the kind of an image from the parameters used to create it.
    pub fn from_create_info(info: &vk::ImageCreateInfo) -> Self {
        let cube = info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE);
        let dim = match info.image_type {
            vk::ImageType::TYPE_1D => ImageDim::D1,
            vk::ImageType::TYPE_3D => ImageDim::D3,
            _ if cube => ImageDim::Cube,
            _ => ImageDim::D2,
        };
        let single_layers = if dim == ImageDim::Cube { 6 } else { 1 };
        let arrayness = if info.array_layers > single_layers {
            Arrayness::Array
        } else {
            Arrayness::Single
        };

        Self::new(PixelType::from_format(info.format), dim, arrayness)
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(PixelType::from_format(format), PixelType::Depth | PixelType::DepthStencil)
}

pub fn aspect_mask(kind: &ImageKind) -> vk::ImageAspectFlags {
    match kind.pixel {
        PixelType::Color => vk::ImageAspectFlags::COLOR,
        PixelType::Depth => vk::ImageAspectFlags::DEPTH,
        PixelType::Stencil => vk::ImageAspectFlags::STENCIL,
        PixelType::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

/// Tests if a view of `view_type` can be created for an image of `kind`.
pub fn compatible_view_type(kind: &ImageKind, view_type: vk::ImageViewType) -> bool {
    match kind.dim {
        ImageDim::D1 => matches!(view_type, vk::ImageViewType::TYPE_1D | vk::ImageViewType::TYPE_1D_ARRAY),
        ImageDim::D2 => matches!(view_type, vk::ImageViewType::TYPE_2D | vk::ImageViewType::TYPE_2D_ARRAY),
        ImageDim::D3 => view_type == vk::ImageViewType::TYPE_3D,
        ImageDim::Cube => match view_type {
            vk::ImageViewType::TYPE_2D | vk::ImageViewType::TYPE_2D_ARRAY | vk::ImageViewType::CUBE => true,
            vk::ImageViewType::CUBE_ARRAY => kind.arrayness == Arrayness::Array,
            _ => false,
        }
    }
}

/// A subresource range covering every mip level and layer.
pub fn complete_subresource_range(kind: &ImageKind, mip_levels: u32, array_layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(kind),
        base_mip_level: 0,
        level_count: mip_levels,
        base_array_layer: 0,
        layer_count: array_layers,
    }
}

pub struct Image {
    allocation: Allocation<vk::Image>,
    kind: ImageKind,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    usage: vk::ImageUsageFlags,
}

impl Image {
    pub fn new(device: &DeviceContext, create_info: &vk::ImageCreateInfo, memory_usage: MemoryUsage) -> Result<Self, Error> {
        if create_info.mip_levels == 0 || create_info.array_layers == 0 {
            return post_error(Error::Logic(String::from("images need at least one mip level and one array layer")));
        }
        let kind = ImageKind::from_create_info(create_info);
        if kind.dim == ImageDim::Cube && create_info.array_layers % 6 != 0 {
            return post_error(Error::Logic(format!("cube compatible image has {} layers which is not a multiple of 6", create_info.array_layers)));
        }

        let linear = create_info.tiling == vk::ImageTiling::LINEAR;
        let allocation = Allocation::new(device, memory_usage, linear, |functions| {
            let mut image = vk::Image::null();
            unsafe {
                vk_check!((functions.vk().create_image)(functions.handle(), create_info, std::ptr::null(), &mut image))?;
            }
            Ok(image)
        })?;
        log::debug!("Created image {:#x} of kind {:?}", allocation.handle().as_raw(), kind);

        Ok(Self {
            allocation,
            kind,
            format: create_info.format,
            extent: create_info.extent,
            mip_levels: create_info.mip_levels,
            array_layers: create_info.array_layers,
            usage: create_info.usage,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.allocation.handle()
    }

    pub fn weak(&self) -> Unowned<vk::Image> {
        unsafe { Unowned::new(self.handle()) }
    }

    pub fn allocation(&self) -> &Allocation<vk::Image> {
        &self.allocation
    }

    pub fn kind(&self) -> &ImageKind {
        &self.kind
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        complete_subresource_range(&self.kind, self.mip_levels, self.array_layers)
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle())
            .field("kind", &self.kind)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}

/// A view of an image. The image must outlive the view.
pub struct ImageView {
    handle: DeviceHandle<vk::ImageView>,
    image: Unowned<vk::Image>,
    kind: ImageKind,
    format: vk::Format,
    extent: vk::Extent2D,
    range: vk::ImageSubresourceRange,
}

impl ImageView {
    /// Creates a view of the image. If `range` is `None` the view covers the whole image.
    pub fn new(image: &Image, view_type: vk::ImageViewType, range: Option<vk::ImageSubresourceRange>) -> Result<Self, Error> {
        if !compatible_view_type(image.kind(), view_type) {
            return post_error(Error::Logic(format!("view type {:?} is not compatible with image kind {:?}", view_type, image.kind())));
        }

        let range = range.unwrap_or_else(|| image.full_subresource_range());
        let level_count = if range.level_count == vk::REMAINING_MIP_LEVELS { image.mip_levels().saturating_sub(range.base_mip_level) } else { range.level_count };
        let layer_count = if range.layer_count == vk::REMAINING_ARRAY_LAYERS { image.array_layers().saturating_sub(range.base_array_layer) } else { range.layer_count };
        if level_count == 0 || range.base_mip_level + level_count > image.mip_levels() {
            return post_error(Error::Logic(format!("mip range {}+{} exceeds image mip levels {}", range.base_mip_level, level_count, image.mip_levels())));
        }
        if layer_count == 0 || range.base_array_layer + layer_count > image.array_layers() {
            return post_error(Error::Logic(format!("layer range {}+{} exceeds image layers {}", range.base_array_layer, layer_count, image.array_layers())));
        }
        let range = vk::ImageSubresourceRange {
            level_count,
            layer_count,
            ..range
        };

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image.handle())
            .view_type(view_type)
            .format(image.format())
            .components(vk::ComponentMapping::default())
            .subresource_range(range);

        let functions = image.allocation().functions().clone();
        let handle = Handle::create(functions, |functions| {
            let mut view = vk::ImageView::null();
            unsafe {
                vk_check!((functions.vk().create_image_view)(functions.handle(), &*create_info, std::ptr::null(), &mut view))?;
            }
            Ok(view)
        })?;

        let extent = image.extent();
        let extent = vk::Extent2D {
            width: (extent.width >> range.base_mip_level).max(1),
            height: (extent.height >> range.base_mip_level).max(1),
        };

        Ok(Self {
            handle,
            image: image.weak(),
            kind: *image.kind(),
            format: image.format(),
            extent,
            range,
        })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::ImageView> {
        self.handle.weak()
    }

    pub fn image(&self) -> Unowned<vk::Image> {
        self.image
    }

    pub fn kind(&self) -> &ImageKind {
        &self.kind
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// The size of the viewed mip level.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layer_count(&self) -> u32 {
        self.range.layer_count
    }

    pub fn subresource_range(&self) -> &vk::ImageSubresourceRange {
        &self.range
    }
}

impl Debug for ImageView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageView")
            .field("handle", &self.handle())
            .field("image", &self.image.raw())
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}

pub struct Sampler {
    handle: DeviceHandle<vk::Sampler>,
}

impl Sampler {
    pub fn new(device: &DeviceContext, create_info: &vk::SamplerCreateInfo) -> Result<Self, Error> {
        let handle = Handle::create(device.get_functions().clone(), |functions| {
            let mut sampler = vk::Sampler::null();
            unsafe {
                vk_check!((functions.vk().create_sampler)(functions.handle(), create_info, std::ptr::null(), &mut sampler))?;
            }
            Ok(sampler)
        })?;

        Ok(Self { handle })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle.raw()
    }

    pub fn weak(&self) -> Unowned<vk::Sampler> {
        self.handle.weak()
    }
}

impl Debug for Sampler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkSampler({:#016X})", self.handle().as_raw()))
    }
}
