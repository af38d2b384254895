//! # raytrace-host
//!
//! Host-side orchestration for an interactive, progressively refining
//! ray tracer running on a compute device.
//!
//! The host keeps the scene in memory, uploads only what changed since
//! the last frame, launches one accumulation pass per frame and reads the
//! refined image back. Once the configured number of passes is reached
//! frames become no-ops until the scene or camera changes.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math types
//! - [`scene`] - Host scene mirrors, kernel-facing records, fractal generator
//! - [`device`] - Device discovery and launch configuration
//! - [`core`] - Resource lifecycle, transfer scheduling, render loop
//! - [`runtime`] - Compute backends (software, null, wgpu)
//! - [`config`] - JSON renderer configuration
//! - [`logging`] - tracing subscriber setup
//!
//! ## Example
//!
//! ```ignore
//! use raytrace_host::prelude::*;
//!
//! let info = SceneInfo::new(320, 240, 16);
//! let mut ctx = RenderContext::new(HostRuntime::new(HostRuntimeConfig::default()), info);
//! ctx.startup(0, &SceneCapacity::default())?;
//! ctx.edit().geometry().add_sphere(Vec3::ZERO, 1000.0, 0);
//!
//! let mut image = vec![0u8; info.pixel_count() * BYTES_PER_PIXEL];
//! while ctx.needs_refresh() {
//!     ctx.render_begin(0.0)?;
//!     ctx.render_end(&mut image)?;
//! }
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod logging;
pub mod runtime;
pub mod scene;
pub mod util;

// Re-export commonly used types
pub use util::{DataClass, Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{RendererConfig, SceneConfig};
    pub use crate::core::{
        CaptureFrame, ComputeRuntime, FrameOutcome, FrameSource, RenderContext, RenderState,
        SceneCapacity, BYTES_PER_PIXEL,
    };
    pub use crate::device::{DeviceDescriptor, DeviceManager, ExecutionConfig};
    pub use crate::runtime::{HostRuntime, HostRuntimeConfig, NullRuntime};
    pub use crate::scene::{Camera, Material, PostProcessing, SceneInfo, Texture};
    pub use crate::util::{DataClass, Error, Result, Vec3, Vec4};

    #[cfg(feature = "wgpu")]
    pub use crate::runtime::WgpuRuntime;
}
