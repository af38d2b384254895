//! End-to-end frame tests against the software and null runtimes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use raytrace_host::core::{
    CaptureFrame, ComputeRuntime, FrameOutcome, KernelLaunch, RenderContext, RenderState,
    ResourceState, SceneCapacity, BYTES_PER_PIXEL,
};
use raytrace_host::runtime::{
    DeviceScene, HostRuntime, HostRuntimeConfig, NullRuntime, RuntimeEvent, RuntimeOp, Shade,
};
use raytrace_host::device::ExecutionConfig;
use raytrace_host::scene::{Material, SceneInfo, Texture};
use raytrace_host::util::{Vec3, Vec4};
use raytrace_host::{DataClass, Error};

const W: u32 = 8;
const H: u32 = 8;

fn capacity() -> SceneCapacity {
    SceneCapacity {
        image_width: W,
        image_height: H,
        max_primitives: 64,
        max_lamps: 4,
        max_materials: 16,
        max_textures: 4,
        max_boxes: 64,
        texture_texels: 16 * 16 * 3,
    }
}

fn image() -> Vec<u8> {
    vec![0u8; (W * H) as usize * BYTES_PER_PIXEL]
}

/// Started context with a sphere, two materials and a texture.
fn context(max_iterations: u32) -> RenderContext<HostRuntime> {
    context_with(HostRuntime::default(), max_iterations)
}

fn context_with(runtime: HostRuntime, max_iterations: u32) -> RenderContext<HostRuntime> {
    let mut ctx = RenderContext::new(runtime, SceneInfo::new(W, H, max_iterations));
    ctx.startup(0, &capacity()).expect("startup");
    let mut edit = ctx.edit();
    edit.geometry().add_sphere(Vec3::ZERO, 4000.0, 0);
    edit.materials().push(Material::diffuse(0.8, 0.2, 0.2));
    edit.materials().push(Material::diffuse(0.2, 0.8, 0.2));
    edit.textures().push(Texture::solid(4, 4, [255, 0, 0]));
    ctx
}

fn frame(ctx: &mut RenderContext<HostRuntime>, image: &mut [u8]) -> FrameOutcome {
    let outcome = ctx.render_begin(0.0).expect("render_begin");
    ctx.render_end(image).expect("render_end");
    outcome
}

#[test]
fn test_unchanged_frames_upload_nothing() {
    let mut ctx = context(16);
    let mut img = image();

    frame(&mut ctx, &mut img);
    let report = ctx.last_transfer_report();
    assert!(report.contains(DataClass::Geometry));
    assert!(report.contains(DataClass::Materials));
    assert!(report.contains(DataClass::Textures));

    for _ in 0..5 {
        frame(&mut ctx, &mut img);
        assert!(ctx.last_transfer_report().is_empty());
    }
    let stats = ctx.runtime().stats();
    assert_eq!(stats.geometry_uploads, 1);
    assert_eq!(stats.material_uploads, 1);
    assert_eq!(stats.texture_uploads, 1);
    assert_eq!(stats.dispatches, 6);
}

#[test]
fn test_iteration_counter_and_refresh_predicate() {
    let mut ctx = context(4);
    let mut img = image();

    let mut last = 0;
    for _ in 0..4 {
        let outcome = frame(&mut ctx, &mut img);
        let info = *ctx.scene_info();
        assert_eq!(outcome, FrameOutcome::Dispatched { iteration: info.path_tracing_iteration });
        assert_eq!(info.path_tracing_iteration, last + 1);
        assert_eq!(
            ctx.needs_refresh(),
            info.path_tracing_iteration < info.max_path_tracing_iterations
        );
        last = info.path_tracing_iteration;
    }

    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Skipped);
    assert_eq!(ctx.scene_info().path_tracing_iteration, 4);
    assert_eq!(ctx.render_state(), RenderState::Converged);
    assert_eq!(ctx.runtime().stats().dispatches, 4);
}

#[test]
fn test_reset_accumulation_restarts() {
    let mut ctx = context(2);
    let mut img = image();
    frame(&mut ctx, &mut img);
    frame(&mut ctx, &mut img);
    assert!(!ctx.needs_refresh());

    ctx.reset_accumulation();
    assert!(ctx.needs_refresh());
    assert_eq!(ctx.scene_info().path_tracing_iteration, 0);
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { iteration: 1 });
}

#[test]
fn test_raised_iteration_limit_resumes() {
    let mut ctx = context(2);
    let mut img = image();
    frame(&mut ctx, &mut img);
    frame(&mut ctx, &mut img);
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Skipped);
    assert_eq!(ctx.render_state(), RenderState::Converged);

    ctx.scene_info_mut().max_path_tracing_iterations = 10;
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { iteration: 3 });
    assert!(ctx.needs_refresh());
    assert_eq!(ctx.runtime().stats().dispatches, 3);
}

#[test]
fn test_iteration_rewind_through_scene_info_resumes() {
    let mut ctx = context(2);
    let mut img = image();
    frame(&mut ctx, &mut img);
    frame(&mut ctx, &mut img);
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Skipped);

    ctx.scene_info_mut().path_tracing_iteration = 0;
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { iteration: 1 });
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { iteration: 2 });
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Skipped);
}

#[test]
fn test_scene_edit_requests_refresh() {
    let mut ctx = context(1);
    let mut img = image();
    frame(&mut ctx, &mut img);
    assert!(!ctx.needs_refresh());

    ctx.edit().materials().push(Material::diffuse(0.0, 0.0, 1.0));
    assert!(ctx.needs_refresh());
    assert!(!ctx.transfer_state().materials_uploaded());
    assert!(ctx.transfer_state().primitives_uploaded());
}

#[test]
fn test_flags_cleared_by_reinitialise() {
    let mut ctx = context(8);
    let mut img = image();
    frame(&mut ctx, &mut img);
    assert!(ctx.transfer_state().primitives_uploaded());

    ctx.initialize_device(&capacity()).unwrap();
    let state = ctx.transfer_state();
    assert!(!state.primitives_uploaded());
    assert!(!state.materials_uploaded());
    assert!(!state.textures_uploaded());
    assert!(state.refresh());
}

#[test]
fn test_upload_order() {
    let mut ctx = context(8);
    let mut img = image();
    frame(&mut ctx, &mut img);
    assert_eq!(
        ctx.runtime().stats().upload_order(),
        vec![DataClass::Geometry, DataClass::Materials, DataClass::Textures]
    );
}

#[test]
fn test_readback_sees_complete_image() {
    let runtime = HostRuntime::with_kernel(
        HostRuntimeConfig::default(),
        |_: &DeviceScene, _: &KernelLaunch, _x: u32, _y: u32| Shade {
            color: Vec4::new(1.0, 0.0, 0.0, 1.0),
            primitive: 3,
        },
    );
    let mut ctx = context_with(runtime, 8);
    for _ in 0..3 {
        let mut img = image();
        frame(&mut ctx, &mut img);
        assert!(img.chunks_exact(4).all(|px| px == [255, 0, 0, 255]));
    }
    assert_eq!(ctx.primitive_at(0, 0), Some(3));
    assert_eq!(ctx.runtime().pending_commands(), 0);
}

#[test]
fn test_degraded_mode_leaves_output_alone() {
    let mut ctx = RenderContext::new(NullRuntime::new(), SceneInfo::new(W, H, 4));
    ctx.startup(0, &capacity()).unwrap();
    assert!(!ctx.device_manager().has_device());
    assert!(ctx.execution_config().x == 0);

    let mut img = vec![7u8; (W * H) as usize * BYTES_PER_PIXEL];
    assert_eq!(ctx.render_begin(0.0).unwrap(), FrameOutcome::Degraded);
    assert!(!ctx.render_end(&mut img).unwrap());
    assert!(img.iter().all(|&b| b == 7));
    assert_eq!(ctx.scene_info().path_tracing_iteration, 0);
}

#[test]
fn test_restart_without_devices_forgets_previous_device() {
    let mut ctx = context(4);
    let mut img = image();
    assert!(ctx.device_manager().has_device());
    frame(&mut ctx, &mut img);

    ctx.runtime().inject_failure(RuntimeOp::DeviceCount, 1);
    ctx.startup(0, &capacity()).expect("startup without devices");
    assert!(!ctx.device_manager().has_device());
    assert_eq!(ctx.execution_config(), ExecutionConfig::ZERO);
    assert_eq!(ctx.resource_state(), ResourceState::Released);
    assert_eq!(ctx.render_begin(0.0).unwrap(), FrameOutcome::Degraded);
}

#[test]
fn test_single_iteration_dispatches_once() {
    let mut ctx = context(1);
    let mut img = image();
    for _ in 0..5 {
        frame(&mut ctx, &mut img);
    }
    let stats = ctx.runtime().stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.readbacks, 5);
}

#[test]
fn test_fallback_material_is_uploaded() {
    let mut ctx = RenderContext::new(HostRuntime::default(), SceneInfo::new(W, H, 4));
    ctx.startup(0, &capacity()).unwrap();
    for i in 0..5 {
        ctx.edit().materials().push(Material::diffuse(i as f32 / 5.0, 0.5, 0.5));
    }
    let mut img = image();
    frame(&mut ctx, &mut img);

    let uploaded = ctx.runtime().stats().events.iter().find_map(|e| match e {
        RuntimeEvent::Upload {
            class: DataClass::Materials,
            elements,
        } => Some(*elements),
        _ => None,
    });
    assert_eq!(uploaded, Some(6));
}

#[test]
fn test_smaller_capacity_clamps_upload() {
    let mut ctx = context(8);
    {
        let mut edit = ctx.edit();
        let geometry = edit.geometry();
        for i in 0..20 {
            geometry.add_sphere(Vec3::new(i as f32 * 10.0, 0.0, 0.0), 1.0, 0);
        }
    }
    let mut img = image();
    frame(&mut ctx, &mut img);

    let small = SceneCapacity {
        max_primitives: 4,
        ..capacity()
    };
    ctx.initialize_device(&small).unwrap();
    ctx.runtime().reset_stats();
    frame(&mut ctx, &mut img);

    let report = ctx.last_transfer_report();
    assert_eq!(report.get(DataClass::Geometry).map(|r| r.elements), Some(4));
}

#[test]
fn test_allocation_failure_rolls_back() {
    let runtime = HostRuntime::new(HostRuntimeConfig {
        memory_budget: 1024,
        ..Default::default()
    });
    let mut ctx = RenderContext::new(runtime, SceneInfo::new(W, H, 4));
    let err = ctx.startup(0, &capacity()).unwrap_err();
    assert!(matches!(err, Error::AllocationFailure { .. }));
    assert_eq!(ctx.resource_state(), ResourceState::Released);
    assert!(!ctx.runtime().is_allocated());

    let mut img = vec![1u8; (W * H) as usize * BYTES_PER_PIXEL];
    assert_eq!(ctx.render_begin(0.0).unwrap(), FrameOutcome::Degraded);
    assert!(!ctx.render_end(&mut img).unwrap());
}

#[test]
fn test_transfer_failure_retries_next_frame() {
    let mut ctx = context(8);
    ctx.runtime().inject_failure(RuntimeOp::UploadMaterials, 1);

    let err = ctx.render_begin(0.0).unwrap_err();
    assert!(matches!(
        err,
        Error::TransferFailure {
            class: DataClass::Materials,
            ..
        }
    ));
    let state = ctx.transfer_state();
    assert!(state.primitives_uploaded());
    assert!(!state.materials_uploaded());
    assert!(!state.textures_uploaded());
    assert!(ctx.needs_refresh());
    assert_eq!(ctx.runtime().stats().dispatches, 0);

    let mut img = image();
    frame(&mut ctx, &mut img);
    let stats = ctx.runtime().stats();
    assert_eq!(stats.geometry_uploads, 1);
    assert_eq!(stats.material_uploads, 1);
    assert_eq!(stats.texture_uploads, 1);
    assert_eq!(stats.dispatches, 1);
}

#[test]
fn test_dispatch_failure_keeps_refresh() {
    let mut ctx = context(8);
    ctx.runtime().inject_failure(RuntimeOp::Dispatch, 1);

    let err = ctx.render_begin(0.0).unwrap_err();
    assert!(matches!(err, Error::DispatchFailure(_)));
    assert!(ctx.needs_refresh());
    assert_eq!(ctx.scene_info().path_tracing_iteration, 0);
    assert_eq!(ctx.resource_state(), ResourceState::Initialized);

    let mut img = image();
    assert_eq!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { iteration: 1 });
}

#[test]
fn test_device_loss_is_fatal() {
    let mut ctx = context(8);
    let mut img = image();
    frame(&mut ctx, &mut img);

    ctx.runtime_mut().lose_device();
    let err = ctx.render_begin(0.0).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(ctx.resource_state(), ResourceState::Lost);
    assert!(matches!(ctx.render_end(&mut img), Err(Error::DeviceLost(_))));
    assert!(matches!(ctx.render_begin(0.0), Err(Error::DeviceLost(_))));

    ctx.runtime_mut().restore_device();
    ctx.release_device();
    assert_eq!(ctx.resource_state(), ResourceState::Released);
    ctx.initialize_device(&capacity()).unwrap();
    assert!(matches!(frame(&mut ctx, &mut img), FrameOutcome::Dispatched { .. }));
}

#[test]
fn test_capture_only_while_refreshing() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let source = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(CaptureFrame {
            video: vec![0; (W * H * 4) as usize],
            depth: vec![0; (W * H) as usize],
        })
    };

    let mut ctx = RenderContext::new(HostRuntime::default(), SceneInfo::new(W, H, 2))
        .with_frame_source(source);
    ctx.startup(0, &capacity()).unwrap();
    let mut img = image();
    for _ in 0..5 {
        frame(&mut ctx, &mut img);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.runtime().stats().capture_uploads, 2);
}

#[test]
fn test_release_is_idempotent() {
    let mut ctx = context(4);
    ctx.release_device();
    ctx.release_device();
    assert_eq!(ctx.resource_state(), ResourceState::Released);
    assert!(!ctx.runtime().is_allocated());
    assert_eq!(ctx.runtime().stats().frees, 1);
}

#[test]
fn test_primitive_pick() {
    let mut ctx = context(4);
    let mut img = image();
    frame(&mut ctx, &mut img);
    assert_eq!(ctx.primitive_at(W / 2, H / 2), Some(0));
    assert_eq!(ctx.primitive_at(W, 0), None);
    assert_eq!(ctx.runtime().backend_name(), "host");
}
