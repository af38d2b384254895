//! Compute device discovery and launch configuration.

mod descriptor;
mod exec;
mod manager;

pub use descriptor::{DeviceDescriptor, DeviceFeatures, Version};
pub use exec::{ExecutionConfig, DEFAULT_TILE};
pub use manager::DeviceManager;
