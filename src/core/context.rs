//! One render session: a runtime plus all orchestration state.

use tracing::info;

use super::render::{FrameInputs, FrameOutcome, RenderLoop, RenderState};
use super::resources::{ResourceLifecycle, ResourceState, SceneCapacity};
use super::traits::{ComputeRuntime, FrameSource, NoFrameSource, NO_PRIMITIVE};
use super::transfer::{TransferReport, TransferState};
use crate::device::{DeviceDescriptor, DeviceManager, ExecutionConfig};
use crate::scene::{Camera, Geometry, HostScene, MaterialTable, PostProcessing, SceneInfo, Texture};
use crate::util::DataClass;
use crate::{Error, Result};

/// Seed for the per-pixel random buffer.
pub const DEFAULT_SEED: u64 = 0x5EED_1234;

/// Owns a runtime, the device/resource/transfer/render components and the
/// host scene mirrors.
///
/// Contexts are independent; run at most one per device. Every method
/// takes `&mut self`, so a context is driven from one thread.
///
/// ```ignore
/// let mut ctx = RenderContext::new(HostRuntime::default(), SceneInfo::new(320, 240, 16));
/// ctx.startup(0, &SceneCapacity::default())?;
/// ctx.edit().geometry().add_sphere(Vec3::ZERO, 1.0, 0);
/// let mut image = vec![0u8; 320 * 240 * 4];
/// while ctx.needs_refresh() {
///     ctx.render_begin(0.0)?;
///     ctx.render_end(&mut image)?;
/// }
/// ```
pub struct RenderContext<R: ComputeRuntime> {
    runtime: R,
    devices: DeviceManager,
    resources: ResourceLifecycle,
    transfer: TransferState,
    render: RenderLoop,
    scene: HostScene,
    info: SceneInfo,
    camera: Camera,
    post_processing: PostProcessing,
    frame_source: Box<dyn FrameSource>,
    seed: u64,
}

impl<R: ComputeRuntime> RenderContext<R> {
    pub fn new(runtime: R, info: SceneInfo) -> Self {
        Self {
            runtime,
            devices: DeviceManager::new(),
            resources: ResourceLifecycle::new(),
            transfer: TransferState::default(),
            render: RenderLoop::new(),
            scene: HostScene::new(),
            info,
            camera: Camera::default(),
            post_processing: PostProcessing::default(),
            frame_source: Box::new(NoFrameSource),
            seed: DEFAULT_SEED,
        }
    }

    /// Use a custom device manager (e.g. with a tile override).
    pub fn with_device_manager(mut self, devices: DeviceManager) -> Self {
        self.devices = devices;
        self
    }

    /// Attach a capture device polled on refreshing frames.
    pub fn with_frame_source(mut self, source: impl FrameSource + 'static) -> Self {
        self.frame_source = Box::new(source);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // ------------------------------------------------------------------
    // Device session
    // ------------------------------------------------------------------

    /// Enumerate, select device `index`, derive the tile and allocate.
    ///
    /// With zero devices this succeeds in degraded mode: every frame is a
    /// no-op.
    pub fn startup(&mut self, index: u32, capacity: &SceneCapacity) -> Result<()> {
        if self.devices.enumerate(&self.runtime) == 0 {
            // Drop whatever a previous session selected and allocated
            self.release_device();
            self.devices.reset();
            self.devices.derive_execution_config();
            return Ok(());
        }
        self.devices.select_and_query(&mut self.runtime, index)?;
        self.devices.derive_execution_config();
        self.initialize_device(capacity)
    }

    /// (Re)allocate device buffers for the current image size.
    ///
    /// Transfer flags reset, so the next frame uploads every class.
    pub fn initialize_device(&mut self, capacity: &SceneCapacity) -> Result<()> {
        let capacity = capacity.for_image(self.info.width, self.info.height);
        self.render.reset();
        self.resources.initialize_device(
            &mut self.runtime,
            &self.devices,
            &capacity,
            &mut self.transfer,
        )?;
        self.scene
            .materials_mut()
            .regenerate_seeds(self.info.pixel_count(), self.seed);
        Ok(())
    }

    /// Free device buffers. Safe to call repeatedly.
    pub fn release_device(&mut self) {
        self.resources.release_device(&mut self.runtime, &mut self.transfer);
        self.render.reset();
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Sync dirty scene classes and queue one accumulation pass.
    ///
    /// Does nothing (and reads only scene info) once converged.
    pub fn render_begin(&mut self, time: f32) -> Result<FrameOutcome> {
        self.check_lost()?;
        let ready = self.resources.is_initialized() && self.devices.has_device();
        let Some(capacity) = self.resources.capacity().copied() else {
            return Ok(FrameOutcome::Degraded);
        };

        let result = self.render.begin(
            FrameInputs {
                runtime: &mut self.runtime,
                execution: self.devices.execution_config(),
                ready,
                scene: &self.scene,
                capacity: &capacity,
                transfer: &mut self.transfer,
                info: &mut self.info,
                camera: &self.camera,
                post_processing: &self.post_processing,
                frame_source: self.frame_source.as_mut(),
            },
            time,
        );
        self.track(result)
    }

    /// Wait for the pass queued by [`render_begin`](Self::render_begin) and
    /// copy the RGBA8 image into `image`.
    ///
    /// Returns `false` and leaves `image` untouched without a usable device.
    pub fn render_end(&mut self, image: &mut [u8]) -> Result<bool> {
        self.check_lost()?;
        let ready = self.resources.is_initialized() && self.devices.has_device();
        let result = self.render.end(
            &mut self.runtime,
            ready,
            self.devices.execution_config(),
            &self.info,
            image,
            self.resources.primitive_ids_mut(),
        );
        self.track(result)
    }

    /// Start accumulating from scratch.
    pub fn reset_accumulation(&mut self) {
        self.render
            .reset_accumulation(&mut self.info, &mut self.transfer);
    }

    /// Whether the next `render_begin` dispatches.
    pub fn needs_refresh(&self) -> bool {
        self.transfer.refresh()
    }

    /// Primitive hit at pixel (x, y) in the last readback.
    pub fn primitive_at(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.info.width || y >= self.info.height {
            return None;
        }
        let index = y as usize * self.info.width as usize + x as usize;
        self.resources
            .primitive_ids()
            .get(index)
            .copied()
            .filter(|&id| id != NO_PRIMITIVE && id >= 0)
            .map(|id| id as u32)
    }

    fn check_lost(&self) -> Result<()> {
        if self.resources.state() == ResourceState::Lost {
            return Err(Error::DeviceLost(
                "release and re-initialise the device".into(),
            ));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.resources.mark_lost();
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Scene access
    // ------------------------------------------------------------------

    /// Mutable access to the host mirrors; touched classes get re-uploaded.
    pub fn edit(&mut self) -> SceneEditor<'_> {
        SceneEditor {
            scene: &mut self.scene,
            transfer: &mut self.transfer,
        }
    }

    pub fn scene(&self) -> &HostScene {
        &self.scene
    }

    pub fn scene_info(&self) -> &SceneInfo {
        &self.info
    }

    /// Per-frame parameters. Changing the image size needs a re-initialise.
    pub fn scene_info_mut(&mut self) -> &mut SceneInfo {
        &mut self.info
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.transfer.set_refresh(true);
    }

    pub fn post_processing(&self) -> &PostProcessing {
        &self.post_processing
    }

    pub fn set_post_processing(&mut self, post_processing: PostProcessing) {
        self.post_processing = post_processing;
        self.transfer.set_refresh(true);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn transfer_state(&self) -> &TransferState {
        &self.transfer
    }

    pub fn last_transfer_report(&self) -> &TransferReport {
        self.render.last_report()
    }

    pub fn render_state(&self) -> RenderState {
        self.render.state()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.render.dispatch_count()
    }

    pub fn resource_state(&self) -> ResourceState {
        self.resources.state()
    }

    pub fn capacity(&self) -> Option<&SceneCapacity> {
        self.resources.capacity()
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.devices.descriptor()
    }

    pub fn device_manager(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        self.devices.execution_config()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }
}

impl<R: ComputeRuntime> Drop for RenderContext<R> {
    fn drop(&mut self) {
        if self.resources.state() != ResourceState::Released {
            info!("render context dropped, releasing device");
        }
        self.release_device();
    }
}

/// Mutable view of the host scene.
///
/// Each accessor marks its class as not uploaded and raises `refresh`.
/// Seeds belong to the materials class.
pub struct SceneEditor<'a> {
    scene: &'a mut HostScene,
    transfer: &'a mut TransferState,
}

impl SceneEditor<'_> {
    /// Boxes, primitives and lamps.
    pub fn geometry(&mut self) -> &mut Geometry {
        self.transfer.invalidate(DataClass::Geometry);
        self.scene.geometry_mut()
    }

    /// Materials and the random seed buffer.
    pub fn materials(&mut self) -> &mut MaterialTable {
        self.transfer.invalidate(DataClass::Materials);
        self.scene.materials_mut()
    }

    pub fn textures(&mut self) -> &mut Vec<Texture> {
        self.transfer.invalidate(DataClass::Textures);
        self.scene.textures_mut()
    }

    /// Drop every primitive, material and texture.
    pub fn clear(&mut self) {
        self.geometry().clear();
        self.materials().clear();
        self.textures().clear();
    }
}
