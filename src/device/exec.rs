//! Kernel launch geometry.

use serde::{Deserialize, Serialize};

use super::DeviceDescriptor;

/// Threads per block along each axis, plus a reserved fourth lane.
///
/// All zero means "cannot render": dispatches become no-ops.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
pub struct ExecutionConfig {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub w: u32,
}

/// Default tile: 8 x 8 x 1 threads.
pub const DEFAULT_TILE: [u32; 3] = [8, 8, 1];

impl ExecutionConfig {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0, w: 0 };

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z, w: 0 }
    }

    /// Every launch dimension is non-zero.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x > 0 && self.y > 0 && self.z > 0
    }

    #[inline]
    pub fn threads_per_block(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// Blocks needed to cover a `width` x `height` image.
    pub fn grid_for(&self, width: u32, height: u32) -> [u32; 3] {
        if !self.is_valid() {
            return [0; 3];
        }
        [width.div_ceil(self.x), height.div_ceil(self.y), 1]
    }

    /// Derive the launch tile from device limits.
    ///
    /// Starts from `tile` (or [`DEFAULT_TILE`]) and halves the largest axis
    /// until the per-axis and per-block thread limits hold. No device, or a
    /// device reporting zero limits, gives [`ExecutionConfig::ZERO`].
    pub fn derive(device: Option<&DeviceDescriptor>, tile: Option<[u32; 3]>) -> Self {
        let Some(device) = device else {
            return Self::ZERO;
        };
        if device.max_threads_per_block == 0 || device.max_block_dims.contains(&0) {
            return Self::ZERO;
        }

        let mut dims = tile.unwrap_or(DEFAULT_TILE).map(|d| d.max(1));
        for (d, limit) in dims.iter_mut().zip(device.max_block_dims) {
            *d = (*d).min(limit);
        }
        while dims.iter().product::<u32>() > device.max_threads_per_block {
            let axis = (0..3).max_by_key(|&i| dims[i]).unwrap_or(0);
            dims[axis] = (dims[axis] / 2).max(1);
            if dims == [1, 1, 1] {
                break;
            }
        }

        Self::new(dims[0], dims[1], dims[2])
    }
}
