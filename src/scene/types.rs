//! Device-facing scene records.
//!
//! Every record is `#[repr(C)]` + Pod so a host slice uploads as raw bytes.
//! Fields are grouped in 16-byte rows to match WGSL/CUDA `vec4` alignment.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::util::{Aabb, Vec3};

/// Primitive shape understood by the device kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimitiveKind {
    Sphere = 0,
    Cylinder = 1,
    Triangle = 2,
    Cube = 3,
    Plane = 4,
    Ellipsoid = 5,
}

impl PrimitiveKind {
    /// Decode a raw kind value, if known.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Sphere),
            1 => Some(Self::Cylinder),
            2 => Some(Self::Triangle),
            3 => Some(Self::Cube),
            4 => Some(Self::Plane),
            5 => Some(Self::Ellipsoid),
            _ => None,
        }
    }
}

/// Primitive may be moved by scene animation.
pub const PRIMITIVE_MOVABLE: u32 = 1 << 0;
/// Primitive was produced by a model loader or generator.
pub const PRIMITIVE_IN_MODEL: u32 = 1 << 1;

/// Scene primitive (128 bytes).
///
/// `p0` is the center for spheres and cubes, the first vertex for triangles.
/// `size.xyz` holds per-axis extents (radius for spheres).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Primitive {
    pub p0: [f32; 4],
    pub p1: [f32; 4],
    pub p2: [f32; 4],
    pub normal: [f32; 4],
    pub size: [f32; 4],
    pub tex_coords: [[f32; 2]; 4],
    pub kind: u32,
    pub material_id: u32,
    pub flags: u32,
    pub _pad: u32,
}

impl Primitive {
    /// Create a primitive of the given kind at the origin.
    pub fn new(kind: PrimitiveKind) -> Self {
        Self {
            kind: kind as u32,
            flags: PRIMITIVE_MOVABLE,
            ..Self::zeroed()
        }
    }

    /// Decoded primitive kind.
    pub fn kind(&self) -> Option<PrimitiveKind> {
        PrimitiveKind::from_raw(self.kind)
    }

    /// Center point used for spatial grouping.
    pub fn center(&self) -> Vec3 {
        match self.kind() {
            Some(PrimitiveKind::Triangle) => {
                (Vec3::from_slice(&self.p0[..3])
                    + Vec3::from_slice(&self.p1[..3])
                    + Vec3::from_slice(&self.p2[..3]))
                    / 3.0
            }
            _ => Vec3::from_slice(&self.p0[..3]),
        }
    }

    /// Conservative bounds of the primitive.
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        match self.kind() {
            Some(PrimitiveKind::Triangle) => {
                b.grow_point(Vec3::from_slice(&self.p0[..3]));
                b.grow_point(Vec3::from_slice(&self.p1[..3]));
                b.grow_point(Vec3::from_slice(&self.p2[..3]));
            }
            Some(PrimitiveKind::Cylinder) => {
                let r = Vec3::splat(self.size[0]);
                let a = Vec3::from_slice(&self.p0[..3]);
                let c = Vec3::from_slice(&self.p1[..3]);
                b.grow_point(a - r);
                b.grow_point(a + r);
                b.grow_point(c - r);
                b.grow_point(c + r);
            }
            _ => {
                let c = Vec3::from_slice(&self.p0[..3]);
                let s = Vec3::from_slice(&self.size[..3]).abs();
                b.grow_point(c - s);
                b.grow_point(c + s);
            }
        }
        b
    }

    #[inline]
    pub fn is_movable(&self) -> bool {
        self.flags & PRIMITIVE_MOVABLE != 0
    }
}

/// Light source bound to an emissive primitive (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Lamp {
    /// xyz = position, w = radius
    pub center: [f32; 4],
    /// rgb = color, a = intensity
    pub color: [f32; 4],
    pub primitive_id: u32,
    pub _pad: [u32; 3],
}

/// Surface material (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Material {
    /// rgb = diffuse color, a = opacity
    pub color: [f32; 4],
    /// x = specular value, y = power, z = coef
    pub specular: [f32; 4],
    /// rgb = emitted color, a = strength
    pub emission: [f32; 4],
    pub reflection: f32,
    pub refraction: f32,
    pub transparency: f32,
    /// Texture slot, or -1 for none
    pub texture_id: i32,
}

impl Material {
    /// Plain diffuse material.
    pub fn diffuse(r: f32, g: f32, b: f32) -> Self {
        Self {
            color: [r, g, b, 1.0],
            specular: [0.0, 10.0, 0.0, 0.0],
            emission: [0.0; 4],
            reflection: 0.0,
            refraction: 1.0,
            transparency: 0.0,
            texture_id: -1,
        }
    }

    /// Emissive material used by light primitives.
    pub fn light(r: f32, g: f32, b: f32, strength: f32) -> Self {
        Self {
            emission: [r, g, b, strength],
            ..Self::diffuse(r, g, b)
        }
    }

    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.emission[3] > 0.0
    }
}

impl Default for Material {
    /// Neutral grey used for the fallback slot.
    fn default() -> Self {
        Self::diffuse(0.5, 0.5, 0.5)
    }
}

/// Bounding box with its primitive membership range (48 bytes).
///
/// Primitives `first_primitive .. first_primitive + primitive_count`
/// belong to this box.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoundingBox {
    pub min: [f32; 4],
    pub max: [f32; 4],
    pub first_primitive: u32,
    pub primitive_count: u32,
    pub _pad: [u32; 2],
}

impl BoundingBox {
    pub fn from_aabb(aabb: &Aabb, first_primitive: u32, primitive_count: u32) -> Self {
        Self {
            min: aabb.min.extend(0.0).to_array(),
            max: aabb.max.extend(0.0).to_array(),
            first_primitive,
            primitive_count,
            _pad: [0; 2],
        }
    }

    /// Membership range as indices into the primitive array.
    pub fn primitive_range(&self) -> std::ops::Range<usize> {
        let first = self.first_primitive as usize;
        first..first + self.primitive_count as usize
    }
}

/// Texture descriptor as seen by the kernel (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    /// Bytes per texel
    pub depth: u32,
    /// Byte offset into the device texel buffer
    pub offset: u32,
}

/// Host texture: dimensions plus tightly packed texels.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub texels: Vec<u8>,
}

impl Texture {
    /// Create a texture, checking that texel data matches the dimensions.
    pub fn new(width: u32, height: u32, depth: u32, texels: Vec<u8>) -> crate::Result<Self> {
        let expected = width as usize * height as usize * depth as usize;
        if texels.len() != expected {
            return Err(crate::Error::invalid(format!(
                "texture {}x{}x{} needs {} bytes, got {}",
                width,
                height,
                depth,
                expected,
                texels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            depth,
            texels,
        })
    }

    /// Solid-color RGB texture.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let texels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            depth: 3,
            texels,
        }
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.texels.len()
    }
}

// Layout checks against the kernel structs
const _: () = assert!(std::mem::size_of::<Primitive>() == 128);
const _: () = assert!(std::mem::size_of::<Lamp>() == 48);
const _: () = assert!(std::mem::size_of::<Material>() == 64);
const _: () = assert!(std::mem::size_of::<BoundingBox>() == 48);
const _: () = assert!(std::mem::size_of::<TextureInfo>() == 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_aabb() {
        let mut p = Primitive::new(PrimitiveKind::Sphere);
        p.p0 = [1.0, 2.0, 3.0, 0.0];
        p.size = [0.5, 0.5, 0.5, 0.0];
        let b = p.aabb();
        assert_eq!(b.min, Vec3::new(0.5, 1.5, 2.5));
        assert_eq!(b.max, Vec3::new(1.5, 2.5, 3.5));
    }

    #[test]
    fn test_triangle_center() {
        let mut p = Primitive::new(PrimitiveKind::Triangle);
        p.p0 = [0.0, 0.0, 0.0, 0.0];
        p.p1 = [3.0, 0.0, 0.0, 0.0];
        p.p2 = [0.0, 3.0, 0.0, 0.0];
        assert_eq!(p.center(), Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_texture_size_checked() {
        assert!(Texture::new(2, 2, 3, vec![0; 12]).is_ok());
        assert!(Texture::new(2, 2, 3, vec![0; 11]).is_err());
        assert_eq!(Texture::solid(4, 4, [1, 2, 3]).byte_len(), 48);
    }

    #[test]
    fn test_kind_roundtrip_raw() {
        for kind in [PrimitiveKind::Sphere, PrimitiveKind::Cube, PrimitiveKind::Ellipsoid] {
            assert_eq!(PrimitiveKind::from_raw(kind as u32), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_raw(99), None);
    }
}
