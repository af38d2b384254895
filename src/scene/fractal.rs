//! Procedural fractal scene.
//!
//! Each level places up to eight children around its parent at offsets
//! taken from one of five models, scaled down by `radius` per level.
//! Generation walks an explicit stack instead of recursing, and the depth
//! is capped at [`MAX_FRACTAL_DEPTH`].

use tracing::{debug, info};

use super::host::Geometry;
use super::info::SceneInfo;
use super::random::SplitMix64;
use crate::util::{Vec3, Vec4};

/// Hard cap on fractal levels (8^5 children at most).
pub const MAX_FRACTAL_DEPTH: u32 = 5;

/// Number of built-in child placement models.
pub const MODEL_COUNT: usize = 5;

const ELEMENTS: usize = 8;

/// Child offsets per model; all-zero rows are unused slots.
const MODELS: [[[f32; 3]; ELEMENTS]; MODEL_COUNT] = [
    [
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
        [0.0, -1.0, 1.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ],
    [
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [-1.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ],
    // Cube corners
    [
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [1.0, 1.0, -1.0],
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [-1.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
    ],
    [
        [1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 2.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ],
    [
        [1.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0],
        [1.0, -1.0, 0.0],
        [-1.0, -1.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ],
];

/// What each fractal node becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractalMode {
    #[default]
    Spheres,
    Cubes,
    /// Spheres on odd levels, cubes on even levels
    Alternate,
}

/// Fractal generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractalParams {
    /// Levels below the root
    pub iterations: u32,
    /// Placement model, `0..MODEL_COUNT`
    pub model: usize,
    pub mode: FractalMode,
    /// xyz = root center, w = root size
    pub center: Vec4,
    /// Base material id
    pub material: u32,
    /// Child distance as a multiple of the parent size
    pub interval: f32,
    /// Child size as a fraction of the parent size
    pub radius: f32,
}

impl FractalParams {
    /// Randomized parameters, reproducible from `seed`.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = SplitMix64::new(seed);
        let iterations = 2 + rng.next_below(3);
        Self {
            iterations,
            model: rng.next_below(MODEL_COUNT as u32) as usize,
            mode: FractalMode::Spheres,
            center: Vec4::new(0.0, 0.0, 0.0, 2000.0),
            material: rng.next_below(30),
            interval: 1.0 + rng.next_below(500) as f32 / 1000.0,
            radius: 0.5 + rng.next_below(200) as f32 / 1000.0,
        }
    }
}

impl Default for FractalParams {
    fn default() -> Self {
        Self {
            iterations: 3,
            model: 2,
            mode: FractalMode::Spheres,
            center: Vec4::new(0.0, 0.0, 0.0, 2000.0),
            material: 0,
            interval: 1.2,
            radius: 0.55,
        }
    }
}

/// Add the fractal to `geometry`, stopping at `max_primitives` total.
///
/// Returns the number of primitives added.
pub fn generate(geometry: &mut Geometry, params: &FractalParams, max_primitives: usize) -> usize {
    let depth = params.iterations.min(MAX_FRACTAL_DEPTH);
    let model = &MODELS[params.model % MODEL_COUNT];
    let start = geometry.primitives.len();

    // (remaining levels, parent center+size)
    let mut stack: Vec<(u32, Vec4)> = vec![(depth, params.center)];
    'outer: while let Some((iteration, parent)) = stack.pop() {
        if iteration == 0 {
            continue;
        }
        for offset in model.iter().rev() {
            let offset = Vec3::from_array(*offset);
            if offset == Vec3::ZERO {
                continue;
            }
            if geometry.primitives.len() >= max_primitives {
                debug!(max_primitives, "fractal truncated at primitive budget");
                break 'outer;
            }

            let center = parent.truncate() + offset * parent.w * params.interval;
            let size = parent.w * params.radius;
            let node = center.extend(size);

            let cube = match params.mode {
                FractalMode::Spheres => false,
                FractalMode::Cubes => true,
                FractalMode::Alternate => iteration % 2 == 0,
            };
            if cube {
                let half = if iteration == 1 { size / 2.0 } else { size };
                let material = params.material + ((depth - iteration) * 10) % 50;
                geometry.add_cube(center, half, material);
            } else {
                // Flatten one axis on the three lowest levels
                let radii = Vec3::new(
                    if iteration == 1 { size / 2.0 } else { size },
                    if iteration == 2 { size / 2.0 } else { size },
                    if iteration == 3 { size / 2.0 } else { size },
                );
                let material = match params.mode {
                    FractalMode::Spheres => params.material + iteration,
                    _ => params.material + ((depth - iteration) * 10) % 50,
                };
                let index = geometry.add_ellipsoid(center, radii, material);
                geometry.primitives[index].flags |= super::types::PRIMITIVE_IN_MODEL;
            }

            stack.push((iteration - 1, node));
        }
    }

    let added = geometry.primitives.len() - start;
    info!(added, depth, model = params.model, "generated fractal scene");
    added
}

/// One animation step: spin the movable primitives, rebuild boxes and
/// advance the animation tick.
pub fn animate(geometry: &mut Geometry, info: &mut SceneInfo, pivot: Vec3, box_size: usize) {
    geometry.rotate_primitives(pivot, Vec3::new(0.02, 0.01, 0.015));
    geometry.compact_boxes(box_size);
    info.misc[1] += 1;
}
