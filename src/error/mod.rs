//! Error types shared by every wrapper in the crate.
//!
//! All fallible operations report through [`post_error`]. With the `recoverable-errors` feature
//! (the default) this returns the error to the caller. Without it the error is handed to the
//! irrecoverable error channel in [`channel`] and the process is aborted, so the same call
//! sites behave identically apart from whether control returns.

pub mod channel;

use std::ffi::{CStr, CString};
use std::fmt::{Debug, Display, Formatter};

use ash::vk;

use crate::instance::VulkanVersion;
use crate::instance::DeviceFeature;
use crate::recorder::ProtocolError;

pub use channel::{clear_irrecoverable_callbacks, irrecoverable_error, register_irrecoverable_callback, report_irrecoverable};

/// A failed native api call together with the location of the call.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct VulkanError {
    pub result: vk::Result,
    pub file: &'static str,
    pub line: u32,
}

impl VulkanError {
    pub const fn new(result: vk::Result, file: &'static str, line: u32) -> Self {
        Self {
            result,
            file,
            line,
        }
    }
}

impl Debug for VulkanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VulkanError({:?} at {}:{})", self.result, self.file, self.line))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorCategory {
    /// Something was requested that the lower layer does not provide.
    Capability,
    /// The api was used in a way that is never valid.
    Protocol,
    /// The driver reported a failure.
    Device,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Error {
    /// The vulkan loader could not be opened.
    Loading(String),
    ApiVersionUnsupported {
        supported: VulkanVersion,
        requested: VulkanVersion,
    },
    ExtensionUnsupported(CString),
    LayerUnsupported(CString),
    ExtensionNotEnabled(&'static CStr),
    FeatureUnsupported(DeviceFeature),
    NotEnoughQueues {
        family: u32,
        requested: u32,
        available: u32,
    },
    /// A function table above the negotiated version was requested.
    SymbolsMissing {
        loaded: VulkanVersion,
        requested: VulkanVersion,
    },
    /// The loader returned null for entry points that must exist.
    NullEntryPoints {
        table: &'static str,
        missing: Vec<&'static str>,
    },
    Protocol(ProtocolError),
    BadRenderPassCreateInfo(String),
    BadShaderModule(String),
    SpirvParse(String),
    SpirvLink(String),
    Logic(String),
    Vulkan(VulkanError),
    /// A sub-allocating backend failed to provide memory.
    Allocation(String),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Loading(_) |
            Error::ApiVersionUnsupported { .. } |
            Error::ExtensionUnsupported(_) |
            Error::LayerUnsupported(_) |
            Error::ExtensionNotEnabled(_) |
            Error::FeatureUnsupported(_) |
            Error::NotEnoughQueues { .. } |
            Error::SymbolsMissing { .. } |
            Error::NullEntryPoints { .. } => ErrorCategory::Capability,

            Error::Protocol(_) |
            Error::BadRenderPassCreateInfo(_) |
            Error::BadShaderModule(_) |
            Error::SpirvParse(_) |
            Error::SpirvLink(_) |
            Error::Logic(_) => ErrorCategory::Protocol,

            Error::Vulkan(_) |
            Error::Allocation(_) => ErrorCategory::Device,
        }
    }

    /// Returns the native result code if this error was reported by the driver.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Error::Vulkan(err) => Some(err.result),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Loading(msg) => write!(f, "failed to load vulkan library: {}", msg),
            Error::ApiVersionUnsupported { supported, requested } => {
                write!(f, "api version unsupported: requested {}, only {} is available", requested, supported)
            }
            Error::ExtensionUnsupported(name) => write!(f, "extension {:?} is not supported", name),
            Error::LayerUnsupported(name) => write!(f, "layer {:?} is not supported", name),
            Error::ExtensionNotEnabled(name) => write!(f, "extension {:?} was not enabled", name),
            Error::FeatureUnsupported(feature) => write!(f, "device feature {} is not supported", feature.name()),
            Error::NotEnoughQueues { family, requested, available } => {
                write!(f, "requested {} queues in queue family index {}, when it only supports at max {}", requested, family, available)
            }
            Error::SymbolsMissing { loaded, requested } => {
                write!(f, "symbols missing: entry points for {} were requested but only {} was loaded", requested, loaded)
            }
            Error::NullEntryPoints { table, missing } => {
                write!(f, "loader returned null for {} entry points of {}: {}", missing.len(), table, missing.join(", "))
            }
            Error::Protocol(err) => Display::fmt(err, f),
            Error::BadRenderPassCreateInfo(msg) => write!(f, "bad render pass create info: {}", msg),
            Error::BadShaderModule(msg) => write!(f, "bad shader module: {}", msg),
            Error::SpirvParse(msg) => write!(f, "failed to parse spirv module: {}", msg),
            Error::SpirvLink(msg) => write!(f, "failed to link spirv modules: {}", msg),
            Error::Logic(msg) => write!(f, "logic error: {}", msg),
            Error::Vulkan(err) => write!(f, "{:?} at {}:{}", err.result, err.file, err.line),
            Error::Allocation(msg) => write!(f, "allocation failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
}

impl From<VulkanError> for Error {
    fn from(err: VulkanError) -> Self {
        Error::Vulkan(err)
    }
}

impl From<gpu_allocator::AllocationError> for Error {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Error::Allocation(err.to_string())
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

/// Reports an error according to the build wide error policy.
#[cfg(feature = "recoverable-errors")]
#[inline]
pub fn post_error<T>(error: Error) -> Result<T, Error> {
    Err(error)
}

/// Reports an error according to the build wide error policy.
#[cfg(not(feature = "recoverable-errors"))]
#[inline]
pub fn post_error<T>(error: Error) -> Result<T, Error> {
    channel::irrecoverable_error(error)
}

/// Checks a [`vk::Result`] returned by a native call and reports anything but `SUCCESS` through
/// [`post_error`] tagged with the call site.
#[macro_export]
macro_rules! vk_check {
    ($call:expr) => {
        match $call {
            ::ash::vk::Result::SUCCESS => Ok(()),
            result => $crate::error::post_error($crate::error::Error::Vulkan($crate::error::VulkanError::new(result, file!(), line!()))),
        }
    };
}
