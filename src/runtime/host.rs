//! Software compute device.
//!
//! Emulates an in-order device stream: every upload and dispatch becomes a
//! command on an mpsc channel consumed by a background worker thread that
//! owns the "device memory". A fence counts submitted and completed
//! commands; readback waits on it. Pixel work inside a dispatch is spread
//! over the rayon pool.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use super::kernel::{DeviceScene, HostKernel, PreviewKernel};
use crate::core::{CaptureFrame, ComputeRuntime, KernelLaunch, SceneCapacity, BYTES_PER_PIXEL, NO_PRIMITIVE};
use crate::device::{DeviceDescriptor, DeviceFeatures, Version};
use crate::scene::{BoundingBox, Lamp, Material, Primitive, SceneInfo, Texture, TextureInfo};
use crate::util::{DataClass, Vec4};
use crate::{Error, Result};

/// Software device settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HostRuntimeConfig {
    /// Simulated device count
    pub devices: u32,
    /// Total bytes the scene buffers may take
    pub memory_budget: u64,
    /// Largest single buffer
    pub max_buffer_size: u64,
    pub max_threads_per_block: u32,
}

impl Default for HostRuntimeConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            memory_budget: 2 << 30,
            max_buffer_size: 1 << 30,
            max_threads_per_block: 1024,
        }
    }
}

/// Runtime operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    DeviceCount,
    Select,
    Allocate,
    UploadGeometry,
    UploadMaterials,
    UploadTextures,
    UploadCapture,
    Dispatch,
    Readback,
}

/// What the device was asked to do, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    Allocate { bytes: u64 },
    Free,
    Upload { class: DataClass, elements: usize },
    Dispatch { iteration: u32 },
    Readback,
}

/// Counters plus the full event log.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    pub allocations: u32,
    pub frees: u32,
    pub geometry_uploads: u32,
    pub material_uploads: u32,
    pub texture_uploads: u32,
    pub capture_uploads: u32,
    pub dispatches: u32,
    pub readbacks: u32,
    pub events: Vec<RuntimeEvent>,
}

impl RuntimeStats {
    /// Uploads of `class` so far.
    pub fn uploads(&self, class: DataClass) -> u32 {
        match class {
            DataClass::Geometry => self.geometry_uploads,
            DataClass::Materials => self.material_uploads,
            DataClass::Textures => self.texture_uploads,
            DataClass::Capture => self.capture_uploads,
            DataClass::Image => self.readbacks,
        }
    }

    /// Upload classes in the order they were submitted.
    pub fn upload_order(&self) -> Vec<DataClass> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Upload { class, .. } => Some(*class),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Allocate { .. } => self.allocations += 1,
            RuntimeEvent::Free => self.frees += 1,
            RuntimeEvent::Upload { class, .. } => match class {
                DataClass::Geometry => self.geometry_uploads += 1,
                DataClass::Materials => self.material_uploads += 1,
                DataClass::Textures => self.texture_uploads += 1,
                DataClass::Capture => self.capture_uploads += 1,
                DataClass::Image => {}
            },
            RuntimeEvent::Dispatch { .. } => self.dispatches += 1,
            RuntimeEvent::Readback => self.readbacks += 1,
        }
        self.events.push(event);
    }
}

/// Accumulation buffer plus the primitive-id buffer.
#[derive(Debug, Default)]
struct RenderTarget {
    width: u32,
    height: u32,
    accum: Vec<Vec4>,
    ids: Vec<i32>,
    samples: u32,
}

impl RenderTarget {
    fn new(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            accum: vec![Vec4::ZERO; pixels],
            ids: vec![NO_PRIMITIVE; pixels],
            samples: 0,
        }
    }

    fn accumulate(&mut self, scene: &DeviceScene, launch: &KernelLaunch, kernel: &dyn HostKernel) {
        if launch.info.path_tracing_iteration == 0 {
            self.accum.fill(Vec4::ZERO);
            self.samples = 0;
        }
        let (w, h) = (self.width as usize, self.height as usize);
        if w == 0 || h == 0 {
            return;
        }
        self.accum
            .par_chunks_mut(w)
            .zip(self.ids.par_chunks_mut(w))
            .take(h)
            .enumerate()
            .for_each(|(y, (row, ids))| {
                for (x, (acc, id)) in row.iter_mut().zip(ids.iter_mut()).enumerate() {
                    let shade = kernel.shade(scene, launch, x as u32, y as u32);
                    *acc += shade.color;
                    *id = shade.primitive;
                }
            });
        self.samples += 1;
    }

    /// Average of the accumulated samples as RGBA8.
    fn resolve(&self) -> (Vec<u8>, Vec<i32>) {
        let n = self.samples.max(1) as f32;
        let image = self
            .accum
            .par_iter()
            .flat_map_iter(|c| {
                let c = (*c / n).clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
                [c.x as u8, c.y as u8, c.z as u8, 255]
            })
            .collect();
        (image, self.ids.clone())
    }
}

enum Command {
    Allocate { width: u32, height: u32 },
    Free,
    Geometry {
        boxes: Vec<BoundingBox>,
        primitives: Vec<Primitive>,
        lamps: Vec<Lamp>,
    },
    Materials {
        materials: Vec<Material>,
        seeds: Vec<f32>,
    },
    Textures {
        texels: Vec<u8>,
        infos: Vec<TextureInfo>,
    },
    Capture(CaptureFrame),
    Dispatch(Box<KernelLaunch>),
    Readback(Sender<(Vec<u8>, Vec<i32>)>),
    Stop,
}

#[derive(Debug, Default)]
struct FenceState {
    completed: u64,
    stopped: bool,
}

/// Completed-command counter shared with the worker.
#[derive(Debug, Default)]
struct Fence {
    state: Mutex<FenceState>,
    cond: Condvar,
}

impl Fence {
    fn complete(&self) {
        let mut s = self.state.lock();
        s.completed += 1;
        self.cond.notify_all();
    }

    fn stop(&self) {
        let mut s = self.state.lock();
        s.stopped = true;
        self.cond.notify_all();
    }

    /// Wait until `target` commands completed. False if the worker died first.
    fn wait(&self, target: u64) -> bool {
        let mut s = self.state.lock();
        while s.completed < target && !s.stopped {
            self.cond.wait(&mut s);
        }
        s.completed >= target
    }
}

/// Marks the fence stopped when the worker exits, panics included.
struct StopOnExit(Arc<Fence>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.stop();
    }
}

fn worker_loop(rx: Receiver<Command>, fence: Arc<Fence>, kernel: Arc<dyn HostKernel>) {
    let _stop = StopOnExit(fence.clone());
    let mut scene = DeviceScene::default();
    let mut target = RenderTarget::default();

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Stop => break,
            Command::Allocate { width, height } => {
                scene = DeviceScene::default();
                target = RenderTarget::new(width, height);
            }
            Command::Free => {
                scene = DeviceScene::default();
                target = RenderTarget::default();
            }
            Command::Geometry {
                boxes,
                primitives,
                lamps,
            } => {
                scene.boxes = boxes;
                scene.primitives = primitives;
                scene.lamps = lamps;
            }
            Command::Materials { materials, seeds } => {
                scene.materials = materials;
                scene.random_seeds = seeds;
            }
            Command::Textures { texels, infos } => {
                scene.textures = texels;
                scene.texture_infos = infos;
            }
            Command::Capture(frame) => {
                scene.video = frame.video;
                scene.depth = frame.depth;
            }
            Command::Dispatch(launch) => {
                target.accumulate(&scene, &launch, kernel.as_ref());
                trace!(samples = target.samples, "pass complete");
            }
            Command::Readback(reply) => {
                // Receiver may be gone if the caller gave up
                let _ = reply.send(target.resolve());
            }
        }
        fence.complete();
    }
}

/// Software [`ComputeRuntime`] backed by a worker thread.
pub struct HostRuntime {
    config: HostRuntimeConfig,
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
    fence: Arc<Fence>,
    submitted: u64,
    selected: Option<u32>,
    capacity: Option<SceneCapacity>,
    lost: bool,
    failures: Mutex<HashMap<RuntimeOp, u32>>,
    stats: Arc<Mutex<RuntimeStats>>,
}

impl HostRuntime {
    pub fn new(config: HostRuntimeConfig) -> Self {
        Self::with_kernel(config, PreviewKernel)
    }

    /// Software device running a custom kernel.
    pub fn with_kernel(config: HostRuntimeConfig, kernel: impl HostKernel + 'static) -> Self {
        let (tx, rx) = channel::<Command>();
        let fence = Arc::new(Fence::default());
        let kernel: Arc<dyn HostKernel> = Arc::new(kernel);

        let worker_fence = fence.clone();
        let handle = thread::Builder::new()
            .name("host-device".into())
            .spawn(move || worker_loop(rx, worker_fence, kernel))
            .map_err(|e| warn!("cannot spawn host device worker: {e}"))
            .ok();
        if handle.is_none() {
            fence.stop();
        }

        debug!(devices = config.devices, budget = config.memory_budget, "host runtime created");
        Self {
            config,
            tx,
            handle,
            fence,
            submitted: 0,
            selected: None,
            capacity: None,
            lost: false,
            failures: Mutex::new(HashMap::new()),
            stats: Arc::new(Mutex::new(RuntimeStats::default())),
        }
    }

    /// Make the next `count` calls of `op` fail.
    pub fn inject_failure(&self, op: RuntimeOp, count: u32) {
        *self.failures.lock().entry(op).or_insert(0) += count;
    }

    /// Simulate the device being revoked. Everything fails with
    /// `DeviceLost` until [`restore_device`](Self::restore_device).
    pub fn lose_device(&mut self) {
        warn!("host device lost");
        self.lost = true;
        self.capacity = None;
    }

    pub fn restore_device(&mut self) {
        self.lost = false;
    }

    /// Snapshot of the counters and event log.
    pub fn stats(&self) -> RuntimeStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = RuntimeStats::default();
    }

    /// Commands queued but not yet executed.
    pub fn pending_commands(&self) -> u64 {
        self.submitted
            .saturating_sub(self.fence.state.lock().completed)
    }

    pub fn is_allocated(&self) -> bool {
        self.capacity.is_some()
    }

    /// Block until every submitted command ran.
    pub fn synchronize(&self) -> Result<()> {
        if self.fence.wait(self.submitted) {
            Ok(())
        } else {
            Err(Error::DeviceLost("host device worker stopped".into()))
        }
    }

    fn check(&self, op: RuntimeOp) -> Result<()> {
        if self.lost {
            return Err(Error::DeviceLost("host device was revoked".into()));
        }
        let mut failures = self.failures.lock();
        if let Some(n) = failures.get_mut(&op).filter(|n| **n > 0) {
            *n -= 1;
            return Err(Error::other(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn submit(&mut self, cmd: Command, event: Option<RuntimeEvent>) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| Error::DeviceLost("host device worker stopped".into()))?;
        self.submitted += 1;
        if let Some(event) = event {
            self.stats.lock().record(event);
        }
        Ok(())
    }

    fn allocated(&self, class: DataClass) -> Result<&SceneCapacity> {
        self.capacity
            .as_ref()
            .ok_or_else(|| Error::transfer(class, "scene buffers not allocated"))
    }

    fn descriptor(&self, index: u32) -> DeviceDescriptor {
        let threads = rayon::current_num_threads() as u32;
        DeviceDescriptor {
            index,
            name: format!("Host Device {index}"),
            backend: "host".into(),
            driver_version: Version::from_packed(1000),
            runtime_version: Version::from_packed(1000),
            compute_capability: Version::new(1, 0),
            total_memory: self.config.memory_budget,
            constant_memory: 64 * 1024,
            shared_memory_per_block: 48 * 1024,
            max_buffer_size: self.config.max_buffer_size,
            warp_size: 32,
            multiprocessor_count: threads,
            max_threads_per_block: self.config.max_threads_per_block,
            max_threads_per_multiprocessor: self.config.max_threads_per_block * 2,
            max_block_dims: [1024, 1024, 64],
            max_grid_dims: [u32::MAX >> 1, 65535, 65535],
            features: DeviceFeatures {
                ecc: false,
                unified_addressing: true,
                concurrent_kernels: false,
            },
        }
    }
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new(HostRuntimeConfig::default())
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn exceeds(class: DataClass, what: &str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::transfer(
            class,
            format!("{len} {what} exceed device capacity {max}"),
        ));
    }
    Ok(())
}

impl ComputeRuntime for HostRuntime {
    fn backend_name(&self) -> &str {
        "host"
    }

    fn device_count(&self) -> Result<u32> {
        self.check(RuntimeOp::DeviceCount)?;
        Ok(self.config.devices)
    }

    fn device_properties(&self, index: u32) -> Result<DeviceDescriptor> {
        if self.lost {
            return Err(Error::DeviceLost("host device was revoked".into()));
        }
        if index >= self.config.devices {
            return Err(Error::DeviceUnavailable(format!(
                "device {index} out of range ({} present)",
                self.config.devices
            )));
        }
        Ok(self.descriptor(index))
    }

    fn select_device(&mut self, index: u32) -> Result<()> {
        self.check(RuntimeOp::Select)
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        if index >= self.config.devices {
            return Err(Error::DeviceUnavailable(format!(
                "device {index} out of range ({} present)",
                self.config.devices
            )));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn allocate_scene_buffers(&mut self, capacity: &SceneCapacity) -> Result<()> {
        self.check(RuntimeOp::Allocate)
            .map_err(|e| match e {
                Error::DeviceLost(_) => e,
                other => Error::AllocationFailure {
                    buffer: "scene",
                    bytes: capacity.total_bytes(),
                    reason: other.to_string(),
                },
            })?;
        if self.selected.is_none() {
            return Err(Error::DeviceUnavailable("no device selected".into()));
        }

        let mut used = 0u64;
        for buffer in capacity.buffer_plan() {
            used += buffer.bytes;
            if used > self.config.memory_budget {
                return Err(Error::AllocationFailure {
                    buffer: buffer.name,
                    bytes: buffer.bytes,
                    reason: format!(
                        "memory budget of {} bytes exhausted",
                        self.config.memory_budget
                    ),
                });
            }
        }

        self.submit(
            Command::Allocate {
                width: capacity.image_width,
                height: capacity.image_height,
            },
            Some(RuntimeEvent::Allocate { bytes: used }),
        )?;
        self.capacity = Some(*capacity);
        info!(bytes = used, "host device buffers allocated");
        Ok(())
    }

    fn free_scene_buffers(&mut self) {
        if self.capacity.take().is_some() {
            // A dead worker has nothing left to free
            let _ = self.submit(Command::Free, Some(RuntimeEvent::Free));
        }
    }

    fn upload_geometry(
        &mut self,
        boxes: &[BoundingBox],
        primitives: &[Primitive],
        lamps: &[Lamp],
    ) -> Result<()> {
        self.check(RuntimeOp::UploadGeometry)?;
        let cap = self.allocated(DataClass::Geometry)?;
        exceeds(DataClass::Geometry, "boxes", boxes.len(), cap.max_boxes)?;
        exceeds(DataClass::Geometry, "primitives", primitives.len(), cap.max_primitives)?;
        exceeds(DataClass::Geometry, "lamps", lamps.len(), cap.max_lamps)?;

        self.submit(
            Command::Geometry {
                boxes: boxes.to_vec(),
                primitives: primitives.to_vec(),
                lamps: lamps.to_vec(),
            },
            Some(RuntimeEvent::Upload {
                class: DataClass::Geometry,
                elements: primitives.len(),
            }),
        )
    }

    fn upload_materials(&mut self, materials: &[Material], random_seeds: &[f32]) -> Result<()> {
        self.check(RuntimeOp::UploadMaterials)?;
        let cap = self.allocated(DataClass::Materials)?;
        exceeds(DataClass::Materials, "materials", materials.len(), cap.max_materials + 1)?;
        exceeds(DataClass::Materials, "seeds", random_seeds.len(), cap.pixel_count())?;

        self.submit(
            Command::Materials {
                materials: materials.to_vec(),
                seeds: random_seeds.to_vec(),
            },
            Some(RuntimeEvent::Upload {
                class: DataClass::Materials,
                elements: materials.len(),
            }),
        )
    }

    fn upload_textures(&mut self, textures: &[Texture], infos: &[TextureInfo]) -> Result<()> {
        self.check(RuntimeOp::UploadTextures)?;
        let cap = self.allocated(DataClass::Textures)?;
        exceeds(DataClass::Textures, "textures", textures.len(), cap.max_textures)?;

        let texels: Vec<u8> = textures.iter().flat_map(|t| t.texels.iter().copied()).collect();
        self.submit(
            Command::Textures {
                texels,
                infos: infos.to_vec(),
            },
            Some(RuntimeEvent::Upload {
                class: DataClass::Textures,
                elements: textures.len(),
            }),
        )
    }

    fn upload_capture(&mut self, frame: &CaptureFrame) -> Result<()> {
        self.check(RuntimeOp::UploadCapture)?;
        self.allocated(DataClass::Capture)?;
        self.submit(
            Command::Capture(frame.clone()),
            Some(RuntimeEvent::Upload {
                class: DataClass::Capture,
                elements: 1,
            }),
        )
    }

    fn dispatch_render(&mut self, launch: &KernelLaunch) -> Result<()> {
        self.check(RuntimeOp::Dispatch)
            .map_err(|e| match e {
                Error::DeviceLost(_) => e,
                other => Error::DispatchFailure(other.to_string()),
            })?;
        let Some(cap) = self.capacity else {
            return Err(Error::DispatchFailure("scene buffers not allocated".into()));
        };
        if !launch.config.is_valid() {
            return Err(Error::DispatchFailure(format!(
                "invalid launch tile {:?}",
                launch.config
            )));
        }
        if launch.info.width != cap.image_width || launch.info.height != cap.image_height {
            return Err(Error::DispatchFailure(format!(
                "image is {}x{} but buffers were sized for {}x{}",
                launch.info.width, launch.info.height, cap.image_width, cap.image_height
            )));
        }

        self.submit(
            Command::Dispatch(Box::new(*launch)),
            Some(RuntimeEvent::Dispatch {
                iteration: launch.info.path_tracing_iteration,
            }),
        )
    }

    fn readback_image(
        &mut self,
        image: &mut [u8],
        primitive_ids: &mut [i32],
        info: &SceneInfo,
    ) -> Result<()> {
        self.check(RuntimeOp::Readback)
            .map_err(|e| match e {
                Error::DeviceLost(_) => e,
                other => Error::Readback(other.to_string()),
            })?;
        if self.capacity.is_none() {
            return Err(Error::Readback("scene buffers not allocated".into()));
        }

        let (reply_tx, reply_rx) = channel();
        self.submit(Command::Readback(reply_tx), Some(RuntimeEvent::Readback))?;
        self.synchronize()?;
        let (pixels, ids) = reply_rx
            .recv()
            .map_err(|_| Error::DeviceLost("host device worker stopped".into()))?;

        let bytes = info.pixel_count() * BYTES_PER_PIXEL;
        if pixels.len() != bytes || image.len() != bytes {
            return Err(Error::Readback(format!(
                "device image holds {} bytes, output {} bytes, expected {bytes}",
                pixels.len(),
                image.len()
            )));
        }
        image.copy_from_slice(&pixels);
        let n = primitive_ids.len().min(ids.len());
        primitive_ids[..n].copy_from_slice(&ids[..n]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ExecutionConfig;
    use crate::runtime::Shade;
    use crate::scene::{Camera, ObjectCounts, PostProcessing};

    fn small_capacity() -> SceneCapacity {
        SceneCapacity {
            image_width: 4,
            image_height: 4,
            max_primitives: 8,
            max_lamps: 2,
            max_materials: 4,
            max_textures: 2,
            max_boxes: 8,
            texture_texels: 64,
        }
    }

    #[test]
    fn test_budget_rejects_allocation() {
        let mut rt = HostRuntime::new(HostRuntimeConfig {
            memory_budget: 100,
            ..Default::default()
        });
        rt.select_device(0).unwrap();
        let err = rt.allocate_scene_buffers(&small_capacity()).unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { .. }));
        assert!(!rt.is_allocated());
        assert_eq!(rt.stats().allocations, 0);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let mut rt = HostRuntime::default();
        rt.select_device(0).unwrap();
        rt.allocate_scene_buffers(&small_capacity()).unwrap();
        rt.inject_failure(RuntimeOp::UploadMaterials, 1);
        assert!(rt.upload_materials(&[Material::default()], &[]).is_err());
        assert!(rt.upload_materials(&[Material::default()], &[]).is_ok());
        assert_eq!(rt.stats().material_uploads, 1);
    }

    #[test]
    fn test_dispatch_then_readback() {
        let mut rt = HostRuntime::with_kernel(
            HostRuntimeConfig::default(),
            |_: &DeviceScene, _: &KernelLaunch, x: u32, _y: u32| Shade {
                color: Vec4::new(1.0, 0.0, 0.0, 1.0),
                primitive: x as i32,
            },
        );
        rt.select_device(0).unwrap();
        rt.allocate_scene_buffers(&small_capacity()).unwrap();
        let launch = KernelLaunch {
            config: ExecutionConfig::new(8, 8, 1),
            info: SceneInfo::new(4, 4, 2),
            counts: ObjectCounts::default(),
            post_processing: PostProcessing::default(),
            camera: Camera::default(),
            time: 0.0,
        };
        rt.dispatch_render(&launch).unwrap();

        let mut image = vec![0u8; 64];
        let mut ids = vec![0i32; 16];
        rt.readback_image(&mut image, &mut ids, &launch.info).unwrap();
        assert_eq!(&image[..4], &[255, 0, 0, 255]);
        assert_eq!(ids[..4], [0, 1, 2, 3]);
        assert_eq!(rt.pending_commands(), 0);
    }

    #[test]
    fn test_target_shades_every_row_once() {
        let kernel = |_: &DeviceScene, _: &KernelLaunch, x: u32, y: u32| Shade {
            color: Vec4::ONE,
            primitive: (y * 10 + x) as i32,
        };
        let launch = KernelLaunch {
            config: ExecutionConfig::new(8, 8, 1),
            info: SceneInfo::new(3, 2, 1),
            counts: ObjectCounts::default(),
            post_processing: PostProcessing::default(),
            camera: Camera::default(),
            time: 0.0,
        };
        let mut target = RenderTarget::new(3, 2);
        target.accumulate(&DeviceScene::default(), &launch, &kernel);
        assert_eq!(target.ids, [0, 1, 2, 10, 11, 12]);
        assert_eq!(target.samples, 1);

        let mut empty = RenderTarget::new(3, 0);
        empty.accumulate(&DeviceScene::default(), &launch, &kernel);
        assert_eq!(empty.samples, 0);
        assert!(empty.resolve().0.is_empty());
    }

    #[test]
    fn test_lost_device_refuses_work() {
        let mut rt = HostRuntime::default();
        rt.select_device(0).unwrap();
        rt.allocate_scene_buffers(&small_capacity()).unwrap();
        rt.lose_device();
        let err = rt.upload_geometry(&[], &[], &[]).unwrap_err();
        assert!(err.is_fatal());
        rt.restore_device();
        assert!(rt.allocate_scene_buffers(&small_capacity()).is_ok());
    }
}
