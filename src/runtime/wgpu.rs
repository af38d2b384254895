//! GPU compute runtime on wgpu.
//!
//! Scene buffers are storage buffers sized to the capacity maxima and
//! bound once per allocation. Uploads go through `queue.write_buffer`,
//! the kernel is one compute pass per dispatch and readback copies into
//! staging buffers that are mapped after `device.poll`.

use std::mem::size_of;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{CaptureFrame, ComputeRuntime, KernelLaunch, LaunchParams, SceneCapacity, BYTES_PER_PIXEL};
use crate::device::{DeviceDescriptor, DeviceFeatures, Version};
use crate::scene::{BoundingBox, Lamp, Material, Primitive, SceneInfo, Texture, TextureInfo};
use crate::util::DataClass;
use crate::{Error, Result};

/// WGSL source embedded at compile time.
const KERNEL_WGSL: &str = include_str!("kernel.wgsl");

/// Workgroup size (must match @workgroup_size in WGSL).
const WG_SIZE: u32 = 8;

/// Device, queue and the compute pipeline.
struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
}

/// Every buffer of one allocation.
struct SceneBuffers {
    capacity: SceneCapacity,
    boxes: wgpu::Buffer,
    primitives: wgpu::Buffer,
    lamps: wgpu::Buffer,
    materials: wgpu::Buffer,
    seeds: wgpu::Buffer,
    textures: wgpu::Buffer,
    texture_infos: wgpu::Buffer,
    video: wgpu::Buffer,
    depth: wgpu::Buffer,
    accum: wgpu::Buffer,
    image: wgpu::Buffer,
    ids: wgpu::Buffer,
    image_staging: wgpu::Buffer,
    ids_staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    /// Uploaded materials including the fallback slot
    material_count: u32,
}

/// Buffer size rounded up to the copy alignment, never zero.
fn aligned(bytes: u64, stride: u64) -> u64 {
    let bytes = bytes.max(stride).max(wgpu::COPY_BUFFER_ALIGNMENT);
    bytes.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

/// Pad a byte slice to the copy alignment.
fn padded(bytes: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if bytes.len() % align == 0 {
        std::borrow::Cow::Borrowed(bytes)
    } else {
        let mut v = bytes.to_vec();
        v.resize(bytes.len().div_ceil(align) * align, 0);
        std::borrow::Cow::Owned(v)
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// "31.0.101" -> 31.0
fn parse_version(s: &str) -> Version {
    let mut parts = s
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.parse::<u32>().ok());
    match (parts.next(), parts.next()) {
        (Some(major), minor) => Version::new(major, minor.unwrap_or(0)),
        _ => Version::default(),
    }
}

/// [`ComputeRuntime`] on the default wgpu adapter.
pub struct WgpuRuntime {
    adapter: Option<wgpu::Adapter>,
    gpu: Option<Gpu>,
    buffers: Option<SceneBuffers>,
    lost: Arc<AtomicBool>,
}

impl WgpuRuntime {
    /// Look for a high-performance adapter. Finding none is not an error;
    /// the runtime then reports zero devices.
    pub fn new() -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .inspect_err(|e| info!("no wgpu adapter: {e}"))
        .ok();

        Self {
            adapter,
            gpu: None,
            buffers: None,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check_lost(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::DeviceLost("wgpu device lost".into()));
        }
        Ok(())
    }

    fn gpu(&self) -> Result<&Gpu> {
        self.gpu
            .as_ref()
            .ok_or_else(|| Error::DeviceUnavailable("no device selected".into()))
    }

    fn buffers(&self, class: DataClass) -> Result<&SceneBuffers> {
        self.check_lost()?;
        self.buffers
            .as_ref()
            .ok_or_else(|| Error::transfer(class, "scene buffers not allocated"))
    }

    fn create_pipeline(device: &wgpu::Device) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("raytrace_kernel"),
            source: wgpu::ShaderSource::Wgsl(KERNEL_WGSL.into()),
        });

        let params_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("raytrace_bind_group_layout"),
            entries: &[
                params_entry,
                storage_entry(1, true),  // boxes
                storage_entry(2, true),  // primitives
                storage_entry(3, true),  // lamps
                storage_entry(4, true),  // materials
                storage_entry(5, true),  // seeds
                storage_entry(6, false), // accum
                storage_entry(7, false), // image
                storage_entry(8, false), // ids
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("raytrace_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("raytrace_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        (pipeline, bind_group_layout)
    }
}

impl Default for WgpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeRuntime for WgpuRuntime {
    fn backend_name(&self) -> &str {
        "wgpu"
    }

    fn device_count(&self) -> Result<u32> {
        Ok(u32::from(self.adapter.is_some()))
    }

    fn device_properties(&self, index: u32) -> Result<DeviceDescriptor> {
        let adapter = self
            .adapter
            .as_ref()
            .filter(|_| index == 0)
            .ok_or_else(|| Error::DeviceUnavailable(format!("no wgpu adapter {index}")))?;
        let info = adapter.get_info();
        let limits = adapter.limits();

        Ok(DeviceDescriptor {
            index,
            name: info.name.clone(),
            backend: format!("{:?}", info.backend).to_lowercase(),
            driver_version: parse_version(&info.driver_info),
            runtime_version: Version::new(27, 0),
            compute_capability: Version::new(1, 0),
            total_memory: limits.max_buffer_size,
            constant_memory: u64::from(limits.max_uniform_buffer_binding_size),
            shared_memory_per_block: u64::from(limits.max_compute_workgroup_storage_size),
            max_buffer_size: limits
                .max_buffer_size
                .min(u64::from(limits.max_storage_buffer_binding_size)),
            warp_size: 32,
            multiprocessor_count: 1,
            max_threads_per_block: limits.max_compute_invocations_per_workgroup,
            max_threads_per_multiprocessor: limits.max_compute_invocations_per_workgroup,
            max_block_dims: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_grid_dims: [limits.max_compute_workgroups_per_dimension; 3],
            features: DeviceFeatures {
                ecc: false,
                unified_addressing: info.device_type == wgpu::DeviceType::IntegratedGpu,
                concurrent_kernels: false,
            },
        })
    }

    fn select_device(&mut self, index: u32) -> Result<()> {
        let adapter = self
            .adapter
            .as_ref()
            .filter(|_| index == 0)
            .ok_or_else(|| Error::DeviceUnavailable(format!("no wgpu adapter {index}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("raytrace device"),
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let lost = self.lost.clone();
        lost.store(false, Ordering::Release);
        device.set_device_lost_callback(move |reason, message| {
            warn!("wgpu device lost ({reason:?}): {message}");
            lost.store(true, Ordering::Release);
        });

        let (pipeline, bind_group_layout) = Self::create_pipeline(&device);
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("launch_params"),
            size: std::mem::size_of::<LaunchParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!("wgpu device ready: {}", adapter.get_info().name);
        self.buffers = None;
        self.gpu = Some(Gpu {
            device,
            queue,
            pipeline,
            bind_group_layout,
            params,
        });
        Ok(())
    }

    fn allocate_scene_buffers(&mut self, capacity: &SceneCapacity) -> Result<()> {
        self.check_lost()?;
        self.buffers = None;
        let gpu = self.gpu()?;
        let device = &gpu.device;
        let limits = device.limits();

        for spec in capacity.buffer_plan() {
            if spec.bytes > u64::from(limits.max_storage_buffer_binding_size) {
                return Err(Error::AllocationFailure {
                    buffer: spec.name,
                    bytes: spec.bytes,
                    reason: format!(
                        "storage binding limit is {} bytes",
                        limits.max_storage_buffer_binding_size
                    ),
                });
            }
        }

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let create = |label: &str, bytes: u64, stride: usize, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: aligned(bytes, stride as u64),
                usage,
                mapped_at_creation: false,
            })
        };
        let plan = capacity.buffer_plan();
        let bytes = |name: &str| plan.iter().find(|b| b.name == name).map_or(0, |b| b.bytes);
        let pixels = capacity.pixel_count() as u64;

        let boxes = create("boxes", bytes("boxes"), size_of::<BoundingBox>(), storage);
        let primitives = create("primitives", bytes("primitives"), size_of::<Primitive>(), storage);
        let lamps = create("lamps", bytes("lamps"), size_of::<Lamp>(), storage);
        let materials = create("materials", bytes("materials"), size_of::<Material>(), storage);
        let seeds = create("random_seeds", bytes("random_seeds"), 4, storage);
        // Uploaded for accounting only; the preview kernel samples neither
        // textures nor capture frames and the stage is at 8 storage buffers
        let textures = create("textures", bytes("textures"), 4, storage);
        let texture_infos = create("texture_infos", bytes("texture_infos"), size_of::<TextureInfo>(), storage);
        let video = create("capture_video", pixels * 4, 4, storage);
        let depth = create("capture_depth", pixels * 2, 4, storage);
        let accum = create("accum", pixels * 16, 16, wgpu::BufferUsages::STORAGE);
        let out = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let image = create("image", bytes("image"), 4, out);
        let ids = create("primitive_ids", bytes("primitive_ids"), 4, out);
        let staging = wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        let image_staging = create("image_staging", bytes("image"), 4, staging);
        let ids_staging = create("ids_staging", bytes("primitive_ids"), 4, staging);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raytrace_bind_group"),
            layout: &gpu.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: boxes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: primitives.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: lamps.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: materials.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: seeds.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: accum.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: image.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: ids.as_entire_binding(),
                },
            ],
        });

        info!(bytes = capacity.total_bytes(), "wgpu scene buffers allocated");
        self.buffers = Some(SceneBuffers {
            capacity: *capacity,
            boxes,
            primitives,
            lamps,
            materials,
            seeds,
            textures,
            texture_infos,
            video,
            depth,
            accum,
            image,
            ids,
            image_staging,
            ids_staging,
            bind_group,
            material_count: 0,
        });
        Ok(())
    }

    fn free_scene_buffers(&mut self) {
        if let Some(b) = self.buffers.take() {
            debug!("freeing wgpu scene buffers");
            for buffer in [
                &b.boxes,
                &b.primitives,
                &b.lamps,
                &b.materials,
                &b.seeds,
                &b.textures,
                &b.texture_infos,
                &b.video,
                &b.depth,
                &b.accum,
                &b.image,
                &b.ids,
                &b.image_staging,
                &b.ids_staging,
            ] {
                buffer.destroy();
            }
        }
    }

    fn upload_geometry(
        &mut self,
        boxes: &[BoundingBox],
        primitives: &[Primitive],
        lamps: &[Lamp],
    ) -> Result<()> {
        let b = self.buffers(DataClass::Geometry)?;
        let cap = &b.capacity;
        if boxes.len() > cap.max_boxes || primitives.len() > cap.max_primitives || lamps.len() > cap.max_lamps {
            return Err(Error::transfer(DataClass::Geometry, "exceeds device capacity"));
        }
        let queue = &self.gpu()?.queue;
        queue.write_buffer(&b.boxes, 0, bytemuck::cast_slice(boxes));
        queue.write_buffer(&b.primitives, 0, bytemuck::cast_slice(primitives));
        queue.write_buffer(&b.lamps, 0, bytemuck::cast_slice(lamps));
        Ok(())
    }

    fn upload_materials(&mut self, materials: &[Material], random_seeds: &[f32]) -> Result<()> {
        let b = self.buffers(DataClass::Materials)?;
        if materials.len() > b.capacity.max_materials + 1 || random_seeds.len() > b.capacity.pixel_count() {
            return Err(Error::transfer(DataClass::Materials, "exceeds device capacity"));
        }
        let queue = &self.gpu()?.queue;
        queue.write_buffer(&b.materials, 0, bytemuck::cast_slice(materials));
        queue.write_buffer(&b.seeds, 0, bytemuck::cast_slice(random_seeds));
        if let Some(b) = self.buffers.as_mut() {
            b.material_count = materials.len() as u32;
        }
        Ok(())
    }

    fn upload_textures(&mut self, textures: &[Texture], infos: &[TextureInfo]) -> Result<()> {
        let b = self.buffers(DataClass::Textures)?;
        let texels: Vec<u8> = textures.iter().flat_map(|t| t.texels.iter().copied()).collect();
        if textures.len() > b.capacity.max_textures || texels.len() as u64 > b.textures.size() {
            return Err(Error::transfer(DataClass::Textures, "exceeds device capacity"));
        }
        let queue = &self.gpu()?.queue;
        queue.write_buffer(&b.textures, 0, &padded(&texels));
        queue.write_buffer(&b.texture_infos, 0, bytemuck::cast_slice(infos));
        Ok(())
    }

    fn upload_capture(&mut self, frame: &CaptureFrame) -> Result<()> {
        let b = self.buffers(DataClass::Capture)?;
        let queue = &self.gpu()?.queue;
        let video = &frame.video[..frame.video.len().min(b.video.size() as usize)];
        let depth: &[u8] = bytemuck::cast_slice(&frame.depth);
        let depth = &depth[..depth.len().min(b.depth.size() as usize)];
        queue.write_buffer(&b.video, 0, &padded(video));
        queue.write_buffer(&b.depth, 0, &padded(depth));
        Ok(())
    }

    fn dispatch_render(&mut self, launch: &KernelLaunch) -> Result<()> {
        self.check_lost()?;
        let gpu = self.gpu().map_err(|e| Error::DispatchFailure(e.to_string()))?;
        let b = self
            .buffers
            .as_ref()
            .ok_or_else(|| Error::DispatchFailure("scene buffers not allocated".into()))?;
        if launch.info.width != b.capacity.image_width || launch.info.height != b.capacity.image_height {
            return Err(Error::DispatchFailure("image size differs from allocation".into()));
        }
        if launch.config.x != WG_SIZE || launch.config.y != WG_SIZE {
            debug!(x = launch.config.x, y = launch.config.y, "kernel uses fixed 8x8 workgroups");
        }

        let mut params = launch.params();
        params._pad[0] = b.material_count;
        gpu.queue.write_buffer(&gpu.params, 0, bytemuck::bytes_of(&params));

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("raytrace_dispatch"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("raytrace_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu.pipeline);
            pass.set_bind_group(0, &b.bind_group, &[]);
            pass.dispatch_workgroups(
                launch.info.width.div_ceil(WG_SIZE),
                launch.info.height.div_ceil(WG_SIZE),
                1,
            );
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn readback_image(
        &mut self,
        image: &mut [u8],
        primitive_ids: &mut [i32],
        info: &SceneInfo,
    ) -> Result<()> {
        self.check_lost()?;
        let gpu = self.gpu().map_err(|e| Error::Readback(e.to_string()))?;
        let b = self
            .buffers
            .as_ref()
            .ok_or_else(|| Error::Readback("scene buffers not allocated".into()))?;

        let image_bytes = (info.pixel_count() * BYTES_PER_PIXEL) as u64;
        let ids_bytes = (primitive_ids.len() * size_of::<i32>()) as u64;
        if image.len() as u64 != image_bytes || image_bytes > b.image.size() {
            return Err(Error::Readback("output size does not match the device image".into()));
        }
        let ids_bytes = ids_bytes.min(b.ids.size());

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("raytrace_readback"),
        });
        encoder.copy_buffer_to_buffer(&b.image, 0, &b.image_staging, 0, image_bytes);
        if ids_bytes > 0 {
            encoder.copy_buffer_to_buffer(&b.ids, 0, &b.ids_staging, 0, ids_bytes);
        }
        gpu.queue.submit(Some(encoder.finish()));

        let (tx, rx) = channel();
        let image_slice = b.image_staging.slice(..image_bytes);
        let tx_image = tx.clone();
        image_slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx_image.send(r);
        });
        let ids_slice = (ids_bytes > 0).then(|| b.ids_staging.slice(..ids_bytes));
        if let Some(slice) = &ids_slice {
            slice.map_async(wgpu::MapMode::Read, move |r| {
                let _ = tx.send(r);
            });
        }

        // Staging buffers go back to the device on every exit below
        let _unmap = OnExit(|| {
            b.image_staging.unmap();
            if ids_bytes > 0 {
                b.ids_staging.unmap();
            }
        });

        if let Err(e) = gpu.device.poll(wgpu::PollType::wait_indefinitely()) {
            warn!("device poll during readback failed: {e}");
        }
        let expected = 1 + usize::from(ids_slice.is_some());
        for _ in 0..expected {
            rx.recv()
                .map_err(|_| Error::Readback("map callback dropped".into()))?
                .map_err(|e| Error::Readback(e.to_string()))?;
        }
        self.check_lost()?;

        {
            let data = image_slice.get_mapped_range();
            image.copy_from_slice(&data[..]);
        }
        if let Some(slice) = ids_slice {
            let data = slice.get_mapped_range();
            let ids: &[i32] = bytemuck::cast_slice(&data[..]);
            primitive_ids[..ids.len()].copy_from_slice(ids);
        }
        Ok(())
    }
}

/// Runs the closure when dropped.
struct OnExit<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnExit<F> {
    fn drop(&mut self) {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("31.0.101.5186"), Version::new(31, 0));
        assert_eq!(parse_version("Mesa 24"), Version::new(24, 0));
        assert_eq!(parse_version(""), Version::default());
    }

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(aligned(0, 48), 48);
        assert_eq!(aligned(5, 1), 8);
        assert_eq!(padded(&[1, 2, 3]).len(), 4);
        assert_eq!(padded(&[1, 2, 3, 4]).len(), 4);
    }

    #[test]
    fn test_exit_guard_runs_on_error_return() {
        use std::cell::Cell;

        fn copy_out(unmapped: &Cell<u32>, fail: bool) -> Result<()> {
            let _unmap = OnExit(|| unmapped.set(unmapped.get() + 1));
            if fail {
                return Err(Error::Readback("map callback dropped".into()));
            }
            Ok(())
        }

        let unmapped = Cell::new(0);
        assert!(copy_out(&unmapped, true).is_err());
        assert_eq!(unmapped.get(), 1);
        assert!(copy_out(&unmapped, false).is_ok());
        assert_eq!(unmapped.get(), 2);
    }
}
