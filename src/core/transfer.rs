//! Dirty-flag host to device transfers.
//!
//! A class is uploaded only while its flag is false and the flag turns true
//! right after a successful copy. Classes go in a fixed order: geometry,
//! then materials with the seed buffer, then textures. A failed class
//! stops the pass so later classes never overtake it.

use std::borrow::Cow;
use std::mem::size_of;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::resources::SceneCapacity;
use super::traits::ComputeRuntime;
use crate::scene::{
    BoundingBox, HostScene, Lamp, Material, ObjectCounts, Primitive, SceneInfo, TextureInfo,
};
use crate::util::DataClass;
use crate::{Error, Result};

/// Upload flags plus the scene-level refresh flag.
///
/// An upload flag is true only while the host arrays are unchanged since
/// their last successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    primitives_uploaded: bool,
    materials_uploaded: bool,
    textures_uploaded: bool,
    refresh: bool,
}

impl Default for TransferState {
    fn default() -> Self {
        Self {
            primitives_uploaded: false,
            materials_uploaded: false,
            textures_uploaded: false,
            refresh: true,
        }
    }
}

impl TransferState {
    pub fn primitives_uploaded(&self) -> bool {
        self.primitives_uploaded
    }

    pub fn materials_uploaded(&self) -> bool {
        self.materials_uploaded
    }

    pub fn textures_uploaded(&self) -> bool {
        self.textures_uploaded
    }

    /// Whether the next frame syncs and dispatches.
    pub fn refresh(&self) -> bool {
        self.refresh
    }

    pub fn is_uploaded(&self, class: DataClass) -> bool {
        match class {
            DataClass::Geometry => self.primitives_uploaded,
            DataClass::Materials => self.materials_uploaded,
            DataClass::Textures => self.textures_uploaded,
            DataClass::Capture | DataClass::Image => false,
        }
    }

    /// Nothing on the device is current; refresh on the next frame.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Host arrays of `class` changed.
    pub(crate) fn invalidate(&mut self, class: DataClass) {
        match class {
            DataClass::Geometry => self.primitives_uploaded = false,
            DataClass::Materials => self.materials_uploaded = false,
            DataClass::Textures => self.textures_uploaded = false,
            DataClass::Capture | DataClass::Image => {}
        }
        self.refresh = true;
    }

    pub(crate) fn set_refresh(&mut self, refresh: bool) {
        self.refresh = refresh;
    }

    fn mark_uploaded(&mut self, class: DataClass) {
        match class {
            DataClass::Geometry => self.primitives_uploaded = true,
            DataClass::Materials => self.materials_uploaded = true,
            DataClass::Textures => self.textures_uploaded = true,
            DataClass::Capture | DataClass::Image => {}
        }
    }
}

/// One class sent during a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub class: DataClass,
    /// Primary element count (primitives, materials incl. fallback, textures)
    pub elements: usize,
    pub bytes: u64,
}

/// Classes sent by one sync pass, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub records: SmallVec<[TransferRecord; 4]>,
}

impl TransferReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, class: DataClass) -> bool {
        self.records.iter().any(|r| r.class == class)
    }

    pub fn get(&self, class: DataClass) -> Option<&TransferRecord> {
        self.records.iter().find(|r| r.class == class)
    }

    pub fn classes(&self) -> impl Iterator<Item = DataClass> + '_ {
        self.records.iter().map(|r| r.class)
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.bytes).sum()
    }

    pub(crate) fn push(&mut self, class: DataClass, elements: usize, bytes: u64) {
        self.records.push(TransferRecord {
            class,
            elements,
            bytes,
        });
    }
}

/// Active counts clamped to device capacity.
pub fn object_counts(scene: &HostScene, capacity: &SceneCapacity) -> ObjectCounts {
    let g = scene.geometry();
    ObjectCounts {
        boxes: g.boxes.len().min(capacity.max_boxes) as u32,
        primitives: g.primitives.len().min(capacity.max_primitives) as u32,
        lamps: g.lamps.len().min(capacity.max_lamps) as u32,
        reserved: 0,
    }
}

fn clamp_count(class: DataClass, what: &'static str, len: usize, max: usize) -> usize {
    if len > max {
        warn!(%class, what, len, max, "host data exceeds device capacity, truncating");
    }
    len.min(max)
}

/// Keep fatal errors as they are, wrap the rest as a transfer failure.
fn transfer_error(class: DataClass, e: Error) -> Error {
    match e {
        Error::DeviceLost(_) | Error::TransferFailure { .. } => e,
        other => Error::transfer(class, other.to_string()),
    }
}

/// Issues host to device copies for every class whose flag is false.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferScheduler;

impl TransferScheduler {
    /// Run one sync pass.
    ///
    /// Returns what was sent. On failure the failing class keeps its flag
    /// false, later classes are skipped and the error is returned.
    #[tracing::instrument(skip_all)]
    pub fn sync<R: ComputeRuntime + ?Sized>(
        runtime: &mut R,
        scene: &HostScene,
        info: &SceneInfo,
        capacity: &SceneCapacity,
        state: &mut TransferState,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::default();

        if !state.primitives_uploaded {
            let g = scene.geometry();
            let boxes = clamp_count(DataClass::Geometry, "boxes", g.boxes.len(), capacity.max_boxes);
            let prims = clamp_count(
                DataClass::Geometry,
                "primitives",
                g.primitives.len(),
                capacity.max_primitives,
            );
            let lamps = clamp_count(DataClass::Geometry, "lamps", g.lamps.len(), capacity.max_lamps);
            debug!(boxes, primitives = prims, lamps, "uploading geometry");

            runtime
                .upload_geometry(&g.boxes[..boxes], &g.primitives[..prims], &g.lamps[..lamps])
                .map_err(|e| transfer_error(DataClass::Geometry, e))
                .inspect_err(|e| warn!("{e}"))?;
            state.mark_uploaded(DataClass::Geometry);

            let bytes = boxes * size_of::<BoundingBox>()
                + prims * size_of::<Primitive>()
                + lamps * size_of::<Lamp>();
            report.push(DataClass::Geometry, prims, bytes as u64);
        }

        if !state.materials_uploaded {
            let table = scene.materials();
            let active = clamp_count(
                DataClass::Materials,
                "materials",
                table.active_count(),
                capacity.max_materials,
            );
            // Active materials plus the fallback slot
            let materials: Cow<'_, [Material]> = if active == table.active_count() {
                Cow::Borrowed(table.with_fallback())
            } else {
                let mut v = table.with_fallback()[..active].to_vec();
                v.push(*table.fallback());
                Cow::Owned(v)
            };
            let pixels = info.pixel_count().min(capacity.pixel_count());
            let seeds = &table.random_seeds()[..table.random_seeds().len().min(pixels)];
            debug!(materials = materials.len(), seeds = seeds.len(), "uploading materials");

            runtime
                .upload_materials(&materials, seeds)
                .map_err(|e| transfer_error(DataClass::Materials, e))
                .inspect_err(|e| warn!("{e}"))?;
            state.mark_uploaded(DataClass::Materials);

            let bytes = materials.len() * size_of::<Material>() + seeds.len() * size_of::<f32>();
            report.push(DataClass::Materials, materials.len(), bytes as u64);
        }

        if !state.textures_uploaded {
            let textures = scene.textures();
            let count = clamp_count(
                DataClass::Textures,
                "textures",
                textures.len(),
                capacity.max_textures,
            );
            let textures = &textures[..count];
            if let Some((i, t)) = textures
                .iter()
                .enumerate()
                .find(|(_, t)| t.byte_len() > capacity.texture_texels)
            {
                let e = Error::transfer(
                    DataClass::Textures,
                    format!(
                        "texture {i} needs {} bytes, capacity is {}",
                        t.byte_len(),
                        capacity.texture_texels
                    ),
                );
                warn!("{e}");
                return Err(e);
            }
            let infos = scene.texture_infos(count);
            debug!(textures = count, "uploading textures");

            runtime
                .upload_textures(textures, &infos)
                .map_err(|e| transfer_error(DataClass::Textures, e))
                .inspect_err(|e| warn!("{e}"))?;
            state.mark_uploaded(DataClass::Textures);

            let bytes = textures.iter().map(|t| t.byte_len()).sum::<usize>()
                + infos.len() * size_of::<TextureInfo>();
            report.push(DataClass::Textures, count, bytes as u64);
        }

        trace!(sent = report.records.len(), bytes = report.total_bytes(), "sync pass done");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Texture;
    use crate::util::Vec3;

    #[test]
    fn test_state_defaults_to_refresh() {
        let s = TransferState::default();
        assert!(s.refresh());
        assert!(!s.primitives_uploaded());
        assert!(!s.materials_uploaded());
        assert!(!s.textures_uploaded());
    }

    #[test]
    fn test_invalidate_raises_refresh() {
        let mut s = TransferState::default();
        s.mark_uploaded(DataClass::Materials);
        s.set_refresh(false);
        s.invalidate(DataClass::Materials);
        assert!(s.refresh());
        assert!(!s.is_uploaded(DataClass::Materials));
    }

    #[test]
    fn test_object_counts_clamped() {
        let mut scene = HostScene::new();
        for i in 0..5 {
            scene.geometry_mut().add_sphere(Vec3::splat(i as f32), 1.0, 0);
        }
        scene.textures_mut().push(Texture::solid(1, 1, [1, 2, 3]));
        let cap = SceneCapacity {
            max_primitives: 3,
            ..Default::default()
        };
        let counts = object_counts(&scene, &cap);
        assert_eq!(counts.primitives, 3);
        assert_eq!(counts.boxes, 0);
    }

    #[test]
    fn test_transfer_error_keeps_device_loss() {
        let e = transfer_error(DataClass::Geometry, Error::DeviceLost("gone".into()));
        assert!(e.is_fatal());
        let e = transfer_error(DataClass::Textures, Error::other("busy"));
        assert!(matches!(
            e,
            Error::TransferFailure {
                class: DataClass::Textures,
                ..
            }
        ));
    }
}
