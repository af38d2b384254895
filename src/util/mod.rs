//! Utility types shared by every layer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`DataClass`] - Host/device transfer classes
//! - Math type re-exports from glam and [`Aabb`]

mod error;
mod math;

pub use error::*;
pub use math::*;
