//! Device buffer lifecycle.

use std::mem::size_of;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::traits::{ComputeRuntime, BYTES_PER_PIXEL};
use super::transfer::TransferState;
use crate::device::DeviceManager;
use crate::scene::{BoundingBox, Lamp, Material, Primitive, TextureInfo};
use crate::{Error, Result};

/// Maxima every device scene buffer is sized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneCapacity {
    pub image_width: u32,
    pub image_height: u32,
    pub max_primitives: usize,
    pub max_lamps: usize,
    /// User materials; one extra fallback slot is always allocated
    pub max_materials: usize,
    pub max_textures: usize,
    pub max_boxes: usize,
    /// Byte budget per texture
    pub texture_texels: usize,
}

impl Default for SceneCapacity {
    fn default() -> Self {
        Self {
            image_width: 640,
            image_height: 480,
            max_primitives: 100_000,
            max_lamps: 16,
            max_materials: 100,
            max_textures: 32,
            max_boxes: 100_000,
            texture_texels: 256 * 256 * 3,
        }
    }
}

/// One device buffer and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    pub name: &'static str,
    pub bytes: u64,
}

impl SceneCapacity {
    /// Same maxima for a different image size.
    pub fn for_image(self, width: u32, height: u32) -> Self {
        Self {
            image_width: width,
            image_height: height,
            ..self
        }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.image_width as usize * self.image_height as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(Error::invalid(format!(
                "image size {}x{} is empty",
                self.image_width, self.image_height
            )));
        }
        if self.max_primitives == 0 {
            return Err(Error::invalid("max_primitives must be at least 1"));
        }
        Ok(())
    }

    /// Every buffer the device session allocates.
    pub fn buffer_plan(&self) -> Vec<BufferSpec> {
        let pixels = self.pixel_count() as u64;
        let spec = |name, count: usize, stride: usize| BufferSpec {
            name,
            bytes: count as u64 * stride as u64,
        };
        vec![
            spec("boxes", self.max_boxes, size_of::<BoundingBox>()),
            spec("primitives", self.max_primitives, size_of::<Primitive>()),
            spec("lamps", self.max_lamps, size_of::<Lamp>()),
            spec("materials", self.max_materials + 1, size_of::<Material>()),
            spec("textures", self.max_textures, self.texture_texels),
            spec("texture_infos", self.max_textures, size_of::<TextureInfo>()),
            BufferSpec {
                name: "random_seeds",
                bytes: pixels * size_of::<f32>() as u64,
            },
            BufferSpec {
                name: "image",
                bytes: pixels * BYTES_PER_PIXEL as u64,
            },
            BufferSpec {
                name: "primitive_ids",
                bytes: pixels * size_of::<i32>() as u64,
            },
        ]
    }

    pub fn total_bytes(&self) -> u64 {
        self.buffer_plan().iter().map(|b| b.bytes).sum()
    }
}

/// Allocation state of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Released,
    Initialized,
    /// The device went away; only `release_device` is accepted
    Lost,
}

/// Allocates and frees the device scene buffers, all or nothing.
#[derive(Debug, Default)]
pub struct ResourceLifecycle {
    state: ResourceState,
    capacity: Option<SceneCapacity>,
    primitive_ids: Vec<i32>,
}

impl ResourceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate every scene buffer at `capacity`.
    ///
    /// An initialised session is released first. Transfer flags are reset
    /// so the next refreshing frame uploads everything.
    #[tracing::instrument(skip_all, fields(w = capacity.image_width, h = capacity.image_height))]
    pub fn initialize_device<R: ComputeRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        devices: &DeviceManager,
        capacity: &SceneCapacity,
        transfer: &mut TransferState,
    ) -> Result<()> {
        if self.state != ResourceState::Released {
            self.release_device(runtime, transfer);
        }
        transfer.reset();

        let Some(device) = devices.descriptor() else {
            return Err(Error::DeviceUnavailable("no device selected".into()));
        };
        capacity.validate()?;

        if let Some(buffer) = capacity
            .buffer_plan()
            .into_iter()
            .find(|b| b.bytes > device.max_buffer_size)
        {
            warn!(
                buffer = buffer.name,
                bytes = buffer.bytes,
                limit = device.max_buffer_size,
                "buffer exceeds device limit"
            );
            return Err(Error::AllocationFailure {
                buffer: buffer.name,
                bytes: buffer.bytes,
                reason: format!("device limit is {} bytes", device.max_buffer_size),
            });
        }

        if let Err(e) = runtime.allocate_scene_buffers(capacity) {
            error!("scene buffer allocation failed: {e}");
            runtime.free_scene_buffers();
            return Err(e);
        }

        self.primitive_ids.clear();
        self.primitive_ids
            .resize(capacity.pixel_count(), super::traits::NO_PRIMITIVE);
        self.capacity = Some(*capacity);
        self.state = ResourceState::Initialized;
        info!(
            bytes = capacity.total_bytes(),
            primitives = capacity.max_primitives,
            materials = capacity.max_materials,
            "device scene buffers allocated"
        );
        Ok(())
    }

    /// Free everything. Safe in any state.
    pub fn release_device<R: ComputeRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        transfer: &mut TransferState,
    ) {
        if self.state != ResourceState::Released {
            debug!(state = ?self.state, "releasing device scene buffers");
        }
        runtime.free_scene_buffers();
        transfer.reset();
        self.capacity = None;
        self.state = ResourceState::Released;
    }

    /// Record device loss; further work is refused until re-initialised.
    pub fn mark_lost(&mut self) {
        if self.state == ResourceState::Initialized {
            error!("device lost, scene buffers are gone");
        }
        self.state = ResourceState::Lost;
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ResourceState::Initialized
    }

    pub fn capacity(&self) -> Option<&SceneCapacity> {
        self.capacity.as_ref()
    }

    /// Host copy of the per-pixel primitive ids from the last readback.
    pub fn primitive_ids(&self) -> &[i32] {
        &self.primitive_ids
    }

    pub(crate) fn primitive_ids_mut(&mut self) -> &mut [i32] {
        &mut self.primitive_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_validation() {
        assert!(SceneCapacity::default().validate().is_ok());
        let empty = SceneCapacity::default().for_image(0, 10);
        assert!(matches!(empty.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_buffer_plan_sizes() {
        let cap = SceneCapacity {
            image_width: 4,
            image_height: 2,
            max_primitives: 10,
            max_lamps: 2,
            max_materials: 5,
            max_textures: 1,
            max_boxes: 3,
            texture_texels: 12,
        };
        let plan = cap.buffer_plan();
        let bytes = |name: &str| plan.iter().find(|b| b.name == name).map(|b| b.bytes);
        assert_eq!(bytes("primitives"), Some(1280));
        assert_eq!(bytes("materials"), Some(6 * 64));
        assert_eq!(bytes("image"), Some(32));
        assert_eq!(bytes("random_seeds"), Some(32));
        assert_eq!(bytes("textures"), Some(12));
    }
}
