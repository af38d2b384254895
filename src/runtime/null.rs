//! Runtime for machines without a compute device.

use crate::core::{CaptureFrame, ComputeRuntime, KernelLaunch, SceneCapacity};
use crate::device::DeviceDescriptor;
use crate::scene::{BoundingBox, Lamp, Material, Primitive, SceneInfo, Texture, TextureInfo};
use crate::{Error, Result};

/// Reports zero devices and refuses every device operation.
///
/// A [`RenderContext`](crate::core::RenderContext) over this runtime runs
/// in degraded mode: frames are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRuntime;

impl NullRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn unavailable<T>() -> Result<T> {
    Err(Error::DeviceUnavailable("no compute device present".into()))
}

impl ComputeRuntime for NullRuntime {
    fn backend_name(&self) -> &str {
        "none"
    }

    fn device_count(&self) -> Result<u32> {
        Ok(0)
    }

    fn device_properties(&self, _index: u32) -> Result<DeviceDescriptor> {
        unavailable()
    }

    fn select_device(&mut self, _index: u32) -> Result<()> {
        unavailable()
    }

    fn allocate_scene_buffers(&mut self, _capacity: &SceneCapacity) -> Result<()> {
        unavailable()
    }

    fn free_scene_buffers(&mut self) {}

    fn upload_geometry(&mut self, _: &[BoundingBox], _: &[Primitive], _: &[Lamp]) -> Result<()> {
        unavailable()
    }

    fn upload_materials(&mut self, _: &[Material], _: &[f32]) -> Result<()> {
        unavailable()
    }

    fn upload_textures(&mut self, _: &[Texture], _: &[TextureInfo]) -> Result<()> {
        unavailable()
    }

    fn upload_capture(&mut self, _frame: &CaptureFrame) -> Result<()> {
        unavailable()
    }

    fn dispatch_render(&mut self, _launch: &KernelLaunch) -> Result<()> {
        unavailable()
    }

    fn readback_image(&mut self, _: &mut [u8], _: &mut [i32], _: &SceneInfo) -> Result<()> {
        unavailable()
    }
}
