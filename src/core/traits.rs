//! Backend seams.
//!
//! A [`ComputeRuntime`] owns device memory and the kernel; the orchestration
//! layer only decides when to call it. A [`FrameSource`] feeds optional
//! capture frames into the render loop.

use bytemuck::{Pod, Zeroable};

use super::resources::SceneCapacity;
use crate::device::{DeviceDescriptor, ExecutionConfig};
use crate::scene::{
    BoundingBox, Camera, Lamp, Material, ObjectCounts, PostProcessing, Primitive, SceneInfo,
    Texture, TextureInfo,
};
use crate::Result;

/// Bytes per output pixel (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Primitive id written for pixels that hit nothing.
pub const NO_PRIMITIVE: i32 = -1;

/// Everything one kernel launch consumes, copied at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelLaunch {
    pub config: ExecutionConfig,
    pub info: SceneInfo,
    pub counts: ObjectCounts,
    pub post_processing: PostProcessing,
    pub camera: Camera,
    pub time: f32,
}

impl KernelLaunch {
    /// Blocks needed to cover the image.
    pub fn grid(&self) -> [u32; 3] {
        self.config.grid_for(self.info.width, self.info.height)
    }

    /// Uniform block layout shared with device kernels.
    pub fn params(&self) -> LaunchParams {
        LaunchParams {
            info: self.info,
            counts: self.counts,
            post_processing: self.post_processing,
            camera: self.camera,
            time: self.time,
            _pad: [0; 3],
            tile: self.config,
        }
    }
}

/// GPU-side launch parameters (176 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LaunchParams {
    pub info: SceneInfo,
    pub counts: ObjectCounts,
    pub post_processing: PostProcessing,
    pub camera: Camera,
    pub time: f32,
    pub _pad: [u32; 3],
    pub tile: ExecutionConfig,
}

const _: () = assert!(std::mem::size_of::<LaunchParams>() == 176);

/// One frame from an attached capture device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureFrame {
    /// RGBA8 video frame
    pub video: Vec<u8>,
    /// 16-bit depth samples
    pub depth: Vec<u16>,
}

/// Optional capture device polled at the start of refreshing frames.
pub trait FrameSource: Send {
    /// Next frame, if one is ready. Must not block for long.
    fn next_frame(&mut self) -> Option<CaptureFrame>;
}

/// No capture device attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFrameSource;

impl FrameSource for NoFrameSource {
    fn next_frame(&mut self) -> Option<CaptureFrame> {
        None
    }
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<CaptureFrame> + Send,
{
    fn next_frame(&mut self) -> Option<CaptureFrame> {
        self()
    }
}

/// Compute backend: device queries, buffer management, transfers and the kernel.
///
/// Uploads and dispatch may complete asynchronously but must execute in
/// submission order. `readback_image` blocks until all prior work is done.
pub trait ComputeRuntime: Send {
    /// Short backend name used in logs and the profile string.
    fn backend_name(&self) -> &str;

    fn device_count(&self) -> Result<u32>;

    fn device_properties(&self, index: u32) -> Result<DeviceDescriptor>;

    /// Bind subsequent work to device `index`.
    fn select_device(&mut self, index: u32) -> Result<()>;

    /// Allocate every scene buffer at its maximum size.
    ///
    /// Either all buffers exist afterwards or none do.
    fn allocate_scene_buffers(&mut self, capacity: &SceneCapacity) -> Result<()>;

    /// Free every scene buffer. Safe to call when nothing is allocated.
    fn free_scene_buffers(&mut self);

    fn upload_geometry(
        &mut self,
        boxes: &[BoundingBox],
        primitives: &[Primitive],
        lamps: &[Lamp],
    ) -> Result<()>;

    /// `materials` includes the trailing fallback slot.
    fn upload_materials(&mut self, materials: &[Material], random_seeds: &[f32]) -> Result<()>;

    fn upload_textures(&mut self, textures: &[Texture], infos: &[TextureInfo]) -> Result<()>;

    /// Backends without capture support ignore frames.
    fn upload_capture(&mut self, _frame: &CaptureFrame) -> Result<()> {
        Ok(())
    }

    /// Queue one accumulation pass.
    fn dispatch_render(&mut self, launch: &KernelLaunch) -> Result<()>;

    /// Wait for queued work, then copy the image (RGBA8) and per-pixel
    /// primitive ids to the host.
    fn readback_image(
        &mut self,
        image: &mut [u8],
        primitive_ids: &mut [i32],
        info: &SceneInfo,
    ) -> Result<()>;
}

impl<R: ComputeRuntime + ?Sized> ComputeRuntime for Box<R> {
    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
    fn device_count(&self) -> Result<u32> {
        (**self).device_count()
    }
    fn device_properties(&self, index: u32) -> Result<DeviceDescriptor> {
        (**self).device_properties(index)
    }
    fn select_device(&mut self, index: u32) -> Result<()> {
        (**self).select_device(index)
    }
    fn allocate_scene_buffers(&mut self, capacity: &SceneCapacity) -> Result<()> {
        (**self).allocate_scene_buffers(capacity)
    }
    fn free_scene_buffers(&mut self) {
        (**self).free_scene_buffers()
    }
    fn upload_geometry(
        &mut self,
        boxes: &[BoundingBox],
        primitives: &[Primitive],
        lamps: &[Lamp],
    ) -> Result<()> {
        (**self).upload_geometry(boxes, primitives, lamps)
    }
    fn upload_materials(&mut self, materials: &[Material], random_seeds: &[f32]) -> Result<()> {
        (**self).upload_materials(materials, random_seeds)
    }
    fn upload_textures(&mut self, textures: &[Texture], infos: &[TextureInfo]) -> Result<()> {
        (**self).upload_textures(textures, infos)
    }
    fn upload_capture(&mut self, frame: &CaptureFrame) -> Result<()> {
        (**self).upload_capture(frame)
    }
    fn dispatch_render(&mut self, launch: &KernelLaunch) -> Result<()> {
        (**self).dispatch_render(launch)
    }
    fn readback_image(
        &mut self,
        image: &mut [u8],
        primitive_ids: &mut [i32],
        info: &SceneInfo,
    ) -> Result<()> {
        (**self).readback_image(image, primitive_ids, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_params_layout() {
        let launch = KernelLaunch {
            config: ExecutionConfig::new(8, 8, 1),
            info: SceneInfo::new(20, 10, 4),
            counts: ObjectCounts::default(),
            post_processing: PostProcessing::default(),
            camera: Camera::default(),
            time: 1.5,
        };
        assert_eq!(launch.grid(), [3, 2, 1]);
        let params = launch.params();
        let bytes = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), 176);
        assert_eq!(params.tile, launch.config);
    }

    #[test]
    fn test_closure_frame_source() {
        let mut frames = vec![CaptureFrame::default()];
        let mut source = move || frames.pop();
        assert!(FrameSource::next_frame(&mut source).is_some());
        assert!(FrameSource::next_frame(&mut source).is_none());
        assert!(NoFrameSource.next_frame().is_none());
    }
}
