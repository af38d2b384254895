//! Compute runtimes.
//!
//! - [`HostRuntime`] - software device on a worker thread, always available
//! - [`NullRuntime`] - no device at all
//! - `WgpuRuntime` - GPU compute through wgpu (feature `wgpu`)

mod host;
mod kernel;
mod null;

#[cfg(feature = "wgpu")]
mod wgpu;

pub use host::{HostRuntime, HostRuntimeConfig, RuntimeEvent, RuntimeOp, RuntimeStats};
pub use kernel::{DeviceScene, HostKernel, PreviewKernel, Shade};
pub use null::NullRuntime;

#[cfg(feature = "wgpu")]
pub use self::wgpu::WgpuRuntime;
