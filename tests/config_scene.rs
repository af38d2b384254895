//! Config files and procedural scenes through the public API.

use raytrace_host::config::RendererConfig;
use raytrace_host::core::{FrameOutcome, RenderContext, BYTES_PER_PIXEL};
use raytrace_host::device::DeviceManager;
use raytrace_host::runtime::HostRuntime;
use raytrace_host::scene::fractal::{self, FractalParams};
use raytrace_host::scene::{FractalMode, Geometry, Material};
use raytrace_host::util::Vec3;
use raytrace_host::Error;

use tempfile::TempDir;

#[test]
fn test_config_file_roundtrip() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("nested").join("config.json");

    let mut config = RendererConfig::default();
    config.width = 96;
    config.height = 54;
    config.tile = Some([16, 8, 1]);
    config.max_iterations = 3;
    config.capacity.max_primitives = 500;
    config.host.devices = 2;
    config.scene.fractal_mode = FractalMode::Alternate;
    config.log_filter = Some("raytrace_host=debug".into());
    config.save(&path).expect("save");

    let loaded = RendererConfig::load(&path).expect("load");
    assert_eq!(loaded, config);
    assert_eq!(loaded.session_capacity().image_width, 96);
}

#[test]
fn test_config_rejects_invalid_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"width": 0, "height": 10}"#).unwrap();
    assert!(matches!(RendererConfig::load(&path), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_fractal_is_deterministic() {
    let params = FractalParams::from_seed(42);
    assert_eq!(params, FractalParams::from_seed(42));

    let mut a = Geometry::default();
    let mut b = Geometry::default();
    let n = fractal::generate(&mut a, &params, 10_000);
    fractal::generate(&mut b, &params, 10_000);
    assert!(n > 0);
    assert_eq!(a.primitives, b.primitives);

    a.compact_boxes(8);
    let covered: usize = a.boxes.iter().map(|b| b.primitive_range().len()).sum();
    assert_eq!(covered, n);
}

#[test]
fn test_config_driven_session() {
    let config = RendererConfig::from_json(
        r#"{
            "width": 16,
            "height": 12,
            "tile": [4, 4, 1],
            "max_iterations": 3,
            "capacity": { "max_primitives": 200, "max_boxes": 200 },
            "scene": { "fractal_iterations": 2, "box_size": 4 }
        }"#,
    )
    .expect("config");

    let capacity = config.session_capacity();
    let mut ctx = RenderContext::new(HostRuntime::new(config.host.clone()), config.scene_info())
        .with_device_manager(DeviceManager::with_tile(config.tile))
        .with_seed(config.scene.seed);
    ctx.startup(config.device_index, &capacity).expect("startup");
    assert_eq!(ctx.execution_config().threads_per_block(), 16);

    let params = FractalParams {
        iterations: config.scene.fractal_iterations,
        ..FractalParams::default()
    };
    {
        let mut edit = ctx.edit();
        edit.materials().push(Material::diffuse(0.5, 0.5, 0.5));
        let geometry = edit.geometry();
        fractal::generate(geometry, &params, capacity.max_primitives);
        geometry.compact_boxes(config.scene.box_size);
    }

    let mut image = vec![0u8; capacity.pixel_count() * BYTES_PER_PIXEL];
    let mut passes = 0;
    for _ in 0..10 {
        if let FrameOutcome::Dispatched { .. } = ctx.render_begin(0.0).unwrap() {
            passes += 1;
        }
        assert!(ctx.render_end(&mut image).unwrap());
    }
    assert_eq!(passes, 3);

    // Animation moves geometry and restarts accumulation
    let mut info = *ctx.scene_info();
    fractal::animate(ctx.edit().geometry(), &mut info, Vec3::ZERO, config.scene.box_size);
    *ctx.scene_info_mut() = info;
    ctx.reset_accumulation();
    assert_eq!(ctx.scene_info().animation_tick(), 1);
    assert_eq!(
        ctx.render_begin(0.1).unwrap(),
        FrameOutcome::Dispatched { iteration: 1 }
    );
    assert!(ctx.last_transfer_report().contains(raytrace_host::DataClass::Geometry));
    assert!(ctx.render_end(&mut image).unwrap());
}
