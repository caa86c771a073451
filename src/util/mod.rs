pub mod id;
pub mod vk;
