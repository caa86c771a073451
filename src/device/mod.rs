pub mod device;
pub mod init;

pub use device::{DeviceContext, DeviceFunctions, Queue, SubmitBatch};
pub use init::{create_device, DeviceCreateConfig};
