//! Per-frame parameters read by the kernel on every dispatch.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::util::Vec4;

/// Image and accumulation parameters (64 bytes, matches the kernel struct).
///
/// Owned by the caller. The render loop only ever increments
/// `path_tracing_iteration`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct SceneInfo {
    pub width: u32,
    pub height: u32,
    /// Samples accumulated so far
    pub path_tracing_iteration: u32,
    /// Accumulation stops once the iteration counter reaches this
    pub max_path_tracing_iterations: u32,
    /// Free counters; `misc[1]` is the animation tick
    pub misc: [i32; 4],
    pub background_color: [f32; 4],
    /// Ray bounces per sample
    pub ray_bounces: u32,
    pub supersampling_level: u32,
    pub view_distance: f32,
    pub shadow_intensity: f32,
}

impl SceneInfo {
    /// Parameters for a `width` x `height` image refined over `max_iterations` samples.
    pub fn new(width: u32, height: u32, max_iterations: u32) -> Self {
        Self {
            width,
            height,
            path_tracing_iteration: 0,
            max_path_tracing_iterations: max_iterations,
            misc: [0; 4],
            background_color: [0.1, 0.1, 0.12, 1.0],
            ray_bounces: 4,
            supersampling_level: 1,
            view_distance: 50_000.0,
            shadow_intensity: 0.9,
        }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether another accumulation pass is still required.
    #[inline]
    pub fn needs_more_iterations(&self) -> bool {
        self.path_tracing_iteration < self.max_path_tracing_iterations
    }

    /// Animation tick counter.
    #[inline]
    pub fn animation_tick(&self) -> i32 {
        self.misc[1]
    }
}

impl Default for SceneInfo {
    fn default() -> Self {
        Self::new(640, 480, 64)
    }
}

/// Post-processing effect applied by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum PostProcessingKind {
    #[default]
    None = 0,
    DepthOfField = 1,
    AmbientOcclusion = 2,
    Radiosity = 3,
    Filter = 4,
}

/// Post-processing parameters (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PostProcessing {
    pub kind: u32,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
}

impl PostProcessing {
    pub fn new(kind: PostProcessingKind, param1: f32, param2: f32, param3: f32) -> Self {
        Self {
            kind: kind as u32,
            param1,
            param2,
            param3,
        }
    }
}

impl Default for PostProcessing {
    fn default() -> Self {
        Self::new(PostProcessingKind::None, 0.0, 0.0, 0.0)
    }
}

/// Viewer position, direction and rotation angles (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec4,
    pub direction: Vec4,
    pub angles: Vec4,
}

impl Camera {
    pub fn new(position: Vec4, direction: Vec4, angles: Vec4) -> Self {
        Self {
            position,
            direction,
            angles,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec4::new(0.0, 0.0, -10_000.0, 0.0),
            direction: Vec4::new(0.0, 0.0, 0.0, 0.0),
            angles: Vec4::ZERO,
        }
    }
}

/// Active object counts packed for the kernel (boxes, primitives, lamps, reserved).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ObjectCounts {
    pub boxes: u32,
    pub primitives: u32,
    pub lamps: u32,
    pub reserved: u32,
}

impl ObjectCounts {
    pub fn as_array(&self) -> [u32; 4] {
        [self.boxes, self.primitives, self.lamps, self.reserved]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_predicate() {
        let mut info = SceneInfo::new(4, 4, 2);
        assert!(info.needs_more_iterations());
        info.path_tracing_iteration = 1;
        assert!(info.needs_more_iterations());
        info.path_tracing_iteration = 2;
        assert!(!info.needs_more_iterations());
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<SceneInfo>(), 64);
        assert_eq!(std::mem::size_of::<PostProcessing>(), 16);
        assert_eq!(std::mem::size_of::<Camera>(), 48);
        assert_eq!(std::mem::size_of::<ObjectCounts>(), 16);
    }
}
