//! Host-side shading kernels for the software device.
//!
//! The kernel is opaque to the orchestration layer; this one casts a single
//! primary ray per pixel, shades it with direct light from the lamps and
//! jitters it with the per-pixel seed so accumulation has something to
//! average.

use crate::core::{KernelLaunch, NO_PRIMITIVE};
use crate::scene::{BoundingBox, Lamp, Material, Primitive, PrimitiveKind, TextureInfo};
use crate::util::{Vec3, Vec4};

/// Device-resident copies of the scene arrays.
#[derive(Debug, Clone, Default)]
pub struct DeviceScene {
    pub boxes: Vec<BoundingBox>,
    pub primitives: Vec<Primitive>,
    pub lamps: Vec<Lamp>,
    /// Active materials followed by the fallback slot
    pub materials: Vec<Material>,
    pub random_seeds: Vec<f32>,
    pub textures: Vec<u8>,
    pub texture_infos: Vec<TextureInfo>,
    pub video: Vec<u8>,
    pub depth: Vec<u16>,
}

impl DeviceScene {
    /// Material for `id`, or the fallback slot when out of range.
    pub fn material(&self, id: u32) -> Material {
        let active = self.materials.len().saturating_sub(1);
        let index = if (id as usize) < active {
            id as usize
        } else {
            active
        };
        self.materials.get(index).copied().unwrap_or_default()
    }

    /// Random value in `[0, 1)` for `pixel`, 0 when no seeds are uploaded.
    pub fn seed(&self, pixel: usize) -> f32 {
        if self.random_seeds.is_empty() {
            return 0.0;
        }
        self.random_seeds[pixel % self.random_seeds.len()]
    }
}

/// Result for one pixel sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shade {
    /// Linear RGB, alpha ignored
    pub color: Vec4,
    /// Hit primitive or [`NO_PRIMITIVE`]
    pub primitive: i32,
}

/// One sample of one pixel.
pub trait HostKernel: Send + Sync {
    fn shade(&self, scene: &DeviceScene, launch: &KernelLaunch, x: u32, y: u32) -> Shade;
}

impl<F> HostKernel for F
where
    F: Fn(&DeviceScene, &KernelLaunch, u32, u32) -> Shade + Send + Sync,
{
    fn shade(&self, scene: &DeviceScene, launch: &KernelLaunch, x: u32, y: u32) -> Shade {
        self(scene, launch, x, y)
    }
}

#[derive(Debug, Clone, Copy)]
struct Ray {
    origin: Vec3,
    dir: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    t: f32,
    normal: Vec3,
    primitive: usize,
}

fn xyz(v: &[f32; 4]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Slab test; returns entry distance.
fn hit_aabb(ray: &Ray, min: Vec3, max: Vec3, t_max: f32) -> Option<f32> {
    let inv = ray.dir.recip();
    let t0 = (min - ray.origin) * inv;
    let t1 = (max - ray.origin) * inv;
    let near = t0.min(t1).max_element().max(0.0);
    let far = t0.max(t1).min_element().min(t_max);
    (near <= far).then_some(near)
}

fn hit_primitive(ray: &Ray, p: &Primitive, t_max: f32) -> Option<(f32, Vec3)> {
    match p.kind()? {
        PrimitiveKind::Sphere | PrimitiveKind::Ellipsoid => {
            // Ellipsoid as a unit sphere in scaled space
            let radii = xyz(&p.size).max(Vec3::splat(1e-6));
            let center = xyz(&p.p0);
            let o = (ray.origin - center) / radii;
            let d = ray.dir / radii;
            let a = d.dot(d);
            let b = o.dot(d);
            let c = o.dot(o) - 1.0;
            let disc = b * b - a * c;
            if disc < 0.0 {
                return None;
            }
            let sq = disc.sqrt();
            let t = [(-b - sq) / a, (-b + sq) / a]
                .into_iter()
                .find(|&t| t > 1e-4 && t < t_max)?;
            let local = o + d * t;
            Some((t, (local / radii).normalize_or_zero()))
        }
        PrimitiveKind::Cube => {
            let center = xyz(&p.p0);
            let half = xyz(&p.size);
            let t = hit_aabb(ray, center - half, center + half, t_max).filter(|&t| t > 1e-4)?;
            let local = (ray.origin + ray.dir * t - center) / half.max(Vec3::splat(1e-6));
            let a = local.abs();
            let normal = if a.x >= a.y && a.x >= a.z {
                Vec3::new(local.x.signum(), 0.0, 0.0)
            } else if a.y >= a.z {
                Vec3::new(0.0, local.y.signum(), 0.0)
            } else {
                Vec3::new(0.0, 0.0, local.z.signum())
            };
            Some((t, normal))
        }
        PrimitiveKind::Triangle => {
            let (v0, v1, v2) = (xyz(&p.p0), xyz(&p.p1), xyz(&p.p2));
            let e1 = v1 - v0;
            let e2 = v2 - v0;
            let h = ray.dir.cross(e2);
            let det = e1.dot(h);
            if det.abs() < 1e-8 {
                return None;
            }
            let inv = 1.0 / det;
            let s = ray.origin - v0;
            let u = s.dot(h) * inv;
            let q = s.cross(e1);
            let v = ray.dir.dot(q) * inv;
            if u < 0.0 || v < 0.0 || u + v > 1.0 {
                return None;
            }
            let t = e2.dot(q) * inv;
            (t > 1e-4 && t < t_max).then(|| (t, xyz(&p.normal)))
        }
        PrimitiveKind::Cylinder | PrimitiveKind::Plane => None,
    }
}

fn trace(scene: &DeviceScene, ray: &Ray, t_max: f32) -> Option<Hit> {
    let mut best: Option<Hit> = None;
    let mut closest = t_max;
    let mut test = |index: usize, closest: &mut f32| {
        if let Some((t, normal)) = hit_primitive(ray, &scene.primitives[index], *closest) {
            *closest = t;
            best = Some(Hit {
                t,
                normal,
                primitive: index,
            });
        }
    };

    if scene.boxes.is_empty() {
        for i in 0..scene.primitives.len() {
            test(i, &mut closest);
        }
    } else {
        for b in &scene.boxes {
            if hit_aabb(ray, xyz(&b.min), xyz(&b.max), closest).is_none() {
                continue;
            }
            let range = b.primitive_range();
            let end = range.end.min(scene.primitives.len());
            for i in range.start.min(end)..end {
                test(i, &mut closest);
            }
        }
    }
    best
}

fn primary_ray(launch: &KernelLaunch, x: f32, y: f32) -> Ray {
    let cam = &launch.camera;
    let origin = cam.position.truncate();
    let forward = (cam.direction.truncate() - origin).normalize_or(Vec3::Z);
    let right = forward.cross(Vec3::Y).normalize_or(Vec3::X);
    let up = right.cross(forward);

    let w = launch.info.width.max(1) as f32;
    let h = launch.info.height.max(1) as f32;
    // 60 degree vertical field of view
    let scale = (30f32).to_radians().tan();
    let px = (2.0 * x / w - 1.0) * scale * (w / h);
    let py = (1.0 - 2.0 * y / h) * scale;
    Ray {
        origin,
        dir: (forward + right * px + up * py).normalize(),
    }
}

/// Primary-ray kernel with Lambert direct lighting and hard shadows.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewKernel;

impl HostKernel for PreviewKernel {
    fn shade(&self, scene: &DeviceScene, launch: &KernelLaunch, x: u32, y: u32) -> Shade {
        let info = &launch.info;
        let pixel = y as usize * info.width as usize + x as usize;
        let seed = scene.seed(pixel);
        let jitter = (seed * 7.0 + info.path_tracing_iteration as f32 * 0.618_034).fract();
        let ray = primary_ray(launch, x as f32 + jitter, y as f32 + (1.0 - jitter));
        let background = Vec4::from_array(info.background_color);

        let view = if info.view_distance > 0.0 {
            info.view_distance
        } else {
            f32::MAX
        };
        let Some(hit) = trace(scene, &ray, view) else {
            return Shade {
                color: background,
                primitive: NO_PRIMITIVE,
            };
        };

        let prim = &scene.primitives[hit.primitive];
        let material = scene.material(prim.material_id);
        let base = Vec4::from_array(material.color);
        let point = ray.origin + ray.dir * hit.t;
        let mut normal = hit.normal;
        if normal.dot(ray.dir) > 0.0 {
            normal = -normal;
        }

        let mut light = Vec3::splat(0.1);
        for lamp in &scene.lamps {
            if lamp.primitive_id as usize == hit.primitive {
                continue;
            }
            let to_lamp = xyz(&lamp.center) - point;
            let dist = to_lamp.length();
            let dir = to_lamp / dist.max(1e-6);
            let lambert = normal.dot(dir).max(0.0);
            if lambert == 0.0 {
                continue;
            }
            let shadow_ray = Ray {
                origin: point + normal * 1e-3,
                dir,
            };
            let shadowed = trace(scene, &shadow_ray, dist - lamp.center[3])
                .is_some_and(|h| h.primitive != lamp.primitive_id as usize);
            let visibility = if shadowed {
                1.0 - info.shadow_intensity.clamp(0.0, 1.0)
            } else {
                1.0
            };
            light += xyz(&lamp.color) * lambert * visibility;
        }

        let emission = xyz(&material.emission) * material.emission[3];
        let color = base.truncate() * light + emission;
        Shade {
            color: color.extend(1.0),
            primitive: hit.primitive as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ExecutionConfig;
    use crate::scene::{Camera, Geometry, ObjectCounts, PostProcessing, SceneInfo};

    fn launch(w: u32, h: u32) -> KernelLaunch {
        KernelLaunch {
            config: ExecutionConfig::new(8, 8, 1),
            info: SceneInfo::new(w, h, 4),
            counts: ObjectCounts::default(),
            post_processing: PostProcessing::default(),
            camera: Camera::new(Vec4::new(0.0, 0.0, -10.0, 0.0), Vec4::ZERO, Vec4::ZERO),
            time: 0.0,
        }
    }

    #[test]
    fn test_center_pixel_hits_sphere() {
        let mut g = Geometry::default();
        g.add_sphere(Vec3::ZERO, 2.0, 0);
        let scene = DeviceScene {
            primitives: g.primitives,
            materials: vec![Material::diffuse(1.0, 0.0, 0.0), Material::default()],
            ..Default::default()
        };
        let shade = PreviewKernel.shade(&scene, &launch(9, 9), 4, 4);
        assert_eq!(shade.primitive, 0);

        let corner = PreviewKernel.shade(&scene, &launch(9, 9), 0, 0);
        assert_eq!(corner.primitive, NO_PRIMITIVE);
    }

    #[test]
    fn test_boxes_limit_candidates() {
        let mut g = Geometry::default();
        g.add_cube(Vec3::ZERO, 1.0, 0);
        g.add_sphere(Vec3::new(0.0, 0.0, 50.0), 1.0, 0);
        g.compact_boxes(1);
        let scene = DeviceScene {
            boxes: g.boxes,
            primitives: g.primitives.clone(),
            ..Default::default()
        };
        let shade = PreviewKernel.shade(&scene, &launch(9, 9), 4, 4);
        let cube = g
            .primitives
            .iter()
            .position(|p| p.kind() == Some(PrimitiveKind::Cube))
            .map(|i| i as i32);
        assert_eq!(Some(shade.primitive), cube);
    }

    #[test]
    fn test_out_of_range_material_uses_fallback() {
        let scene = DeviceScene {
            materials: vec![Material::diffuse(1.0, 0.0, 0.0), Material::diffuse(0.0, 0.0, 1.0)],
            ..Default::default()
        };
        assert_eq!(scene.material(0).color[0], 1.0);
        assert_eq!(scene.material(9).color[2], 1.0);
        assert_eq!(DeviceScene::default().material(0), Material::default());
    }
}
