//! Scene data model.
//!
//! Kernel-facing records are `#[repr(C)]` Pod structs so whole slices
//! upload as raw bytes. [`HostScene`] holds the host mirrors.

pub mod fractal;
mod host;
mod info;
pub mod random;
mod types;

pub use fractal::{FractalMode, FractalParams};
pub use host::{Geometry, HostScene, MaterialTable};
pub use info::{Camera, ObjectCounts, PostProcessing, PostProcessingKind, SceneInfo};
pub use types::{
    BoundingBox, Lamp, Material, Primitive, PrimitiveKind, Texture, TextureInfo,
    PRIMITIVE_IN_MODEL, PRIMITIVE_MOVABLE,
};
