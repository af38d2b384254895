//! Host scene mirrors.
//!
//! The host arrays are the single source of truth; device buffers are
//! derived copies. Mutable access is handed out by
//! [`SceneEditor`](crate::core::SceneEditor), which marks the touched class
//! for re-upload.

use std::cmp::Ordering;

use tracing::debug;

use super::random;
use super::types::{
    BoundingBox, Lamp, Material, Primitive, PrimitiveKind, Texture, TextureInfo,
    PRIMITIVE_MOVABLE,
};
use crate::util::{Aabb, EulerRot, Quat, Vec2, Vec3, Vec4};
use crate::{Error, Result};

// ============================================================================
// Geometry
// ============================================================================

/// Bounding boxes, primitives and lamps. Uploaded together.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub boxes: Vec<BoundingBox>,
    pub primitives: Vec<Primitive>,
    pub lamps: Vec<Lamp>,
}

impl Geometry {
    /// Append a primitive, returning its index.
    pub fn add_primitive(&mut self, primitive: Primitive) -> usize {
        self.primitives.push(primitive);
        self.primitives.len() - 1
    }

    /// Sphere of the given radius.
    pub fn add_sphere(&mut self, center: Vec3, radius: f32, material_id: u32) -> usize {
        self.add_ellipsoid(center, Vec3::splat(radius), material_id)
    }

    /// Sphere with independent per-axis extents.
    pub fn add_ellipsoid(&mut self, center: Vec3, radii: Vec3, material_id: u32) -> usize {
        let mut p = Primitive::new(PrimitiveKind::Sphere);
        p.p0 = center.extend(0.0).to_array();
        p.size = radii.extend(0.0).to_array();
        p.material_id = material_id;
        p.tex_coords = [[0.0, 0.0], [1.0, 1.0], [0.0, 0.0], [0.0, 0.0]];
        self.add_primitive(p)
    }

    /// Axis-aligned cube with half extent `half_size`.
    pub fn add_cube(&mut self, center: Vec3, half_size: f32, material_id: u32) -> usize {
        let mut p = Primitive::new(PrimitiveKind::Cube);
        p.p0 = center.extend(0.0).to_array();
        p.size = Vec3::splat(half_size).extend(0.0).to_array();
        p.material_id = material_id;
        self.add_primitive(p)
    }

    /// Single triangle; the face normal is derived from the winding.
    pub fn add_triangle(&mut self, v0: Vec3, v1: Vec3, v2: Vec3, material_id: u32) -> usize {
        let mut p = Primitive::new(PrimitiveKind::Triangle);
        p.p0 = v0.extend(0.0).to_array();
        p.p1 = v1.extend(0.0).to_array();
        p.p2 = v2.extend(0.0).to_array();
        p.normal = (v1 - v0).cross(v2 - v0).normalize_or_zero().extend(0.0).to_array();
        p.material_id = material_id;
        self.add_primitive(p)
    }

    /// Light: a fixed emissive sphere plus the lamp record pointing at it.
    pub fn add_light(&mut self, center: Vec3, radius: f32, material_id: u32, color: Vec4) -> usize {
        let index = self.add_sphere(center, radius, material_id);
        self.primitives[index].flags &= !PRIMITIVE_MOVABLE;
        self.lamps.push(Lamp {
            center: center.extend(radius).to_array(),
            color: color.to_array(),
            primitive_id: index as u32,
            _pad: [0; 3],
        });
        index
    }

    /// Texture coordinates of the three primitive corners.
    pub fn set_tex_coords(&mut self, index: usize, coords: [Vec2; 3]) -> Result<()> {
        let count = self.primitives.len();
        let p = self
            .primitives
            .get_mut(index)
            .ok_or_else(|| Error::invalid(format!("primitive {index} out of range ({count})")))?;
        for (slot, uv) in p.tex_coords.iter_mut().zip(coords) {
            *slot = uv.to_array();
        }
        Ok(())
    }

    /// Drop all geometry.
    pub fn clear(&mut self) {
        self.boxes.clear();
        self.primitives.clear();
        self.lamps.clear();
    }

    /// Bounds of every primitive.
    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for p in &self.primitives {
            b.grow(&p.aabb());
        }
        b
    }

    /// Rotate movable primitives around `center` by Euler `angles` (radians).
    ///
    /// Lamps follow their primitive. Boxes are stale afterwards; call
    /// [`compact_boxes`](Self::compact_boxes).
    pub fn rotate_primitives(&mut self, center: Vec3, angles: Vec3) {
        let rotation = Quat::from_euler(EulerRot::XYZ, angles.x, angles.y, angles.z);
        let rotate = |v: &mut [f32; 4]| {
            let p = Vec3::from_slice(&v[..3]);
            let r = center + rotation * (p - center);
            v[..3].copy_from_slice(&r.to_array());
        };

        for p in self.primitives.iter_mut().filter(|p| p.is_movable()) {
            rotate(&mut p.p0);
            rotate(&mut p.p1);
            rotate(&mut p.p2);
            let n = rotation * Vec3::from_slice(&p.normal[..3]);
            p.normal[..3].copy_from_slice(&n.to_array());
        }

        for lamp in &mut self.lamps {
            if let Some(p) = self.primitives.get(lamp.primitive_id as usize) {
                lamp.center[..3].copy_from_slice(&p.center().to_array());
            }
        }
    }

    /// Regroup primitives into boxes of at most `max_per_box` members.
    ///
    /// Primitives are reordered so every box covers a contiguous range;
    /// lamp references are remapped to the new order. Returns the box count.
    pub fn compact_boxes(&mut self, max_per_box: usize) -> usize {
        self.boxes.clear();
        let n = self.primitives.len();
        if n == 0 {
            return 0;
        }
        let max_per_box = max_per_box.max(1);

        let centers: Vec<Vec3> = self.primitives.iter().map(Primitive::center).collect();
        let mut order: Vec<usize> = (0..n).collect();

        // Median split on the longest centroid axis, explicit stack
        let mut leaves = Vec::new();
        let mut stack = vec![(0usize, n)];
        while let Some((start, end)) = stack.pop() {
            if end - start <= max_per_box {
                leaves.push((start, end));
                continue;
            }
            let mut bounds = Aabb::EMPTY;
            for &i in &order[start..end] {
                bounds.grow_point(centers[i]);
            }
            let axis = bounds.longest_axis();
            let mid = start + (end - start) / 2;
            order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
                centers[a][axis]
                    .partial_cmp(&centers[b][axis])
                    .unwrap_or(Ordering::Equal)
            });
            stack.push((mid, end));
            stack.push((start, mid));
        }

        let mut new_index = vec![0u32; n];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new as u32;
        }
        self.primitives = order.iter().map(|&i| self.primitives[i]).collect();
        for lamp in &mut self.lamps {
            if let Some(&idx) = new_index.get(lamp.primitive_id as usize) {
                lamp.primitive_id = idx;
            }
        }

        leaves.sort_unstable_by_key(|&(start, _)| start);
        for (start, end) in leaves {
            let mut b = Aabb::EMPTY;
            for p in &self.primitives[start..end] {
                b.grow(&p.aabb());
            }
            self.boxes
                .push(BoundingBox::from_aabb(&b, start as u32, (end - start) as u32));
        }

        debug!(primitives = n, boxes = self.boxes.len(), "compacted boxes");
        self.boxes.len()
    }
}

// ============================================================================
// Materials
// ============================================================================

/// Material table plus the per-pixel random seed buffer.
///
/// The table always ends with a fallback slot, so the uploaded material
/// count is the active count plus one.
#[derive(Debug, Clone)]
pub struct MaterialTable {
    materials: Vec<Material>,
    random_seeds: Vec<f32>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self {
            materials: vec![Material::default()],
            random_seeds: Vec::new(),
        }
    }

    /// Add a material, returning its id.
    pub fn push(&mut self, material: Material) -> u32 {
        let id = self.active_count();
        self.materials.insert(id, material);
        id as u32
    }

    /// Replace an existing material.
    pub fn set(&mut self, id: u32, material: Material) -> Result<()> {
        let active = self.active_count();
        let slot = self
            .materials
            .get_mut(id as usize)
            .filter(|_| (id as usize) < active)
            .ok_or_else(|| Error::invalid(format!("material {id} out of range ({active})")))?;
        *slot = material;
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Material> {
        self.materials[..self.active_count()].get(id as usize)
    }

    /// Number of user materials, not counting the fallback slot.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.materials.len() - 1
    }

    /// Material used when an id is out of range.
    pub fn fallback(&self) -> &Material {
        &self.materials[self.materials.len() - 1]
    }

    pub fn set_fallback(&mut self, material: Material) {
        let last = self.materials.len() - 1;
        self.materials[last] = material;
    }

    /// Active materials followed by the fallback slot.
    #[inline]
    pub fn with_fallback(&self) -> &[Material] {
        &self.materials
    }

    pub fn random_seeds(&self) -> &[f32] {
        &self.random_seeds
    }

    /// Rebuild the seed buffer for `pixel_count` pixels.
    pub fn regenerate_seeds(&mut self, pixel_count: usize, seed: u64) {
        random::fill_seeds(&mut self.random_seeds, pixel_count, seed);
    }

    /// Drop all user materials, keeping the fallback.
    pub fn clear(&mut self) {
        let fallback = *self.fallback();
        self.materials.clear();
        self.materials.push(fallback);
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Host scene
// ============================================================================

/// All host-side scene arrays.
#[derive(Debug, Clone, Default)]
pub struct HostScene {
    geometry: Geometry,
    materials: MaterialTable,
    textures: Vec<Texture>,
}

impl HostScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub(crate) fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    pub(crate) fn materials_mut(&mut self) -> &mut MaterialTable {
        &mut self.materials
    }

    pub(crate) fn textures_mut(&mut self) -> &mut Vec<Texture> {
        &mut self.textures
    }

    /// Kernel-side descriptors for the first `count` textures, with texel
    /// offsets into one packed buffer.
    pub fn texture_infos(&self, count: usize) -> Vec<TextureInfo> {
        let mut offset = 0u32;
        self.textures
            .iter()
            .take(count)
            .map(|t| {
                let info = TextureInfo {
                    width: t.width,
                    height: t.height,
                    depth: t.depth,
                    offset,
                };
                offset += t.byte_len() as u32;
                info
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_geometry(n: usize) -> Geometry {
        let mut g = Geometry::default();
        for i in 0..n {
            g.add_sphere(Vec3::new(i as f32 * 10.0, (i % 3) as f32, 0.0), 1.0, 0);
        }
        g
    }

    #[test]
    fn test_compact_covers_every_primitive_once() {
        let mut g = grid_geometry(37);
        let boxes = g.compact_boxes(4);
        assert!(boxes >= 10);

        let mut covered = vec![false; 37];
        for b in &g.boxes {
            assert!(b.primitive_count as usize <= 4);
            for i in b.primitive_range() {
                assert!(!covered[i], "primitive {i} in two boxes");
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_compact_box_bounds_contain_members() {
        let mut g = grid_geometry(20);
        g.compact_boxes(3);
        for b in &g.boxes {
            for p in &g.primitives[b.primitive_range()] {
                let a = p.aabb();
                assert!(a.min.x >= b.min[0] && a.max.x <= b.max[0]);
                assert!(a.min.y >= b.min[1] && a.max.y <= b.max[1]);
            }
        }
    }

    #[test]
    fn test_compact_remaps_lamps() {
        let mut g = grid_geometry(12);
        let light = g.add_light(Vec3::new(-500.0, 0.0, 0.0), 2.0, 1, Vec4::ONE);
        let before = g.primitives[light];
        g.compact_boxes(2);
        let lamp = g.lamps[0];
        assert_eq!(g.primitives[lamp.primitive_id as usize], before);
    }

    #[test]
    fn test_compact_empty() {
        let mut g = Geometry::default();
        assert_eq!(g.compact_boxes(8), 0);
        assert!(g.boxes.is_empty());
    }

    #[test]
    fn test_rotate_skips_fixed_primitives() {
        let mut g = Geometry::default();
        let moving = g.add_sphere(Vec3::new(1.0, 0.0, 0.0), 0.5, 0);
        let light = g.add_light(Vec3::new(0.0, 5.0, 0.0), 0.5, 0, Vec4::ONE);
        g.rotate_primitives(Vec3::ZERO, Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));

        let p = g.primitives[moving].center();
        assert!((p - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        assert_eq!(g.primitives[light].center(), Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_material_table_fallback_slot() {
        let mut table = MaterialTable::new();
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.with_fallback().len(), 1);

        for i in 0..5 {
            let id = table.push(Material::diffuse(i as f32 / 5.0, 0.0, 0.0));
            assert_eq!(id, i);
        }
        assert_eq!(table.active_count(), 5);
        assert_eq!(table.with_fallback().len(), 6);
        assert_eq!(*table.fallback(), Material::default());
        assert!(table.set(5, Material::default()).is_err());
        assert!(table.set(4, Material::light(1.0, 1.0, 1.0, 2.0)).is_ok());
        assert!(table.get(4).is_some_and(Material::is_emissive));

        table.clear();
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn test_texture_infos_offsets() {
        let mut scene = HostScene::new();
        scene.textures_mut().push(Texture::solid(2, 2, [0, 0, 0]));
        scene.textures_mut().push(Texture::solid(4, 1, [0, 0, 0]));
        let infos = scene.texture_infos(8);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].offset, 0);
        assert_eq!(infos[1].offset, 12);
    }
}
