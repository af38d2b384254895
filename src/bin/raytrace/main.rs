//! raytrace-cli - drive the progressive renderer from the command line.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use raytrace_host::config::{RendererConfig, SceneConfig};
use raytrace_host::core::{ComputeRuntime, FrameOutcome, RenderContext, BYTES_PER_PIXEL};
use raytrace_host::device::DeviceManager;
use raytrace_host::logging::{init_logging, LoggingConfig};
use raytrace_host::runtime::HostRuntime;
use raytrace_host::scene::fractal::{self, FractalParams};
use raytrace_host::scene::random::SplitMix64;
use raytrace_host::scene::{Camera, Material};
use raytrace_host::util::{Vec3, Vec4};
use tracing::{info, warn};

/// Parsed `render` arguments.
#[derive(Debug, Default)]
struct RenderArgs {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    frames: Option<u32>,
    seed: Option<u64>,
    gpu: bool,
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    // Global flags
    let mut filter: Option<&str> = None;
    let mut rest: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => filter = Some("debug"),
            "-vv" | "--trace" => filter = Some("trace"),
            "-q" | "--quiet" => filter = Some("error"),
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            _ => rest.push(arg),
        }
    }

    if rest.is_empty() {
        print_help();
        return Ok(());
    }

    match rest[0] {
        "d" | "devices" => {
            let _guard = init_logging(&LoggingConfig {
                filter: filter.map(String::from),
                ..Default::default()
            });
            cmd_devices(rest.contains(&"--gpu"))
        }
        "r" | "render" => {
            let args = parse_render_args(&rest[1..])?;
            let mut config = match &args.config {
                Some(path) => RendererConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RendererConfig::load_or_default(),
            };
            if let Some(seed) = args.seed {
                config.scene.seed = seed;
            }
            config.validate()?;

            let _guard = init_logging(&LoggingConfig {
                filter: filter.map(String::from).or_else(|| config.log_filter.clone()),
                ..Default::default()
            });
            cmd_render(&config, &args)
        }
        "c" | "config" => {
            let path = rest
                .get(1)
                .map(PathBuf::from)
                .or_else(RendererConfig::default_path)
                .context("no config directory on this system")?;
            RendererConfig::default().save(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        "h" | "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown command: {other}")
        }
    }
}

fn parse_render_args(args: &[&str]) -> anyhow::Result<RenderArgs> {
    let mut out = RenderArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .copied()
                .with_context(|| format!("{name} needs a value"))
        };
        match *arg {
            "--config" | "-c" => out.config = Some(PathBuf::from(value("--config")?)),
            "--output" | "-o" => out.output = Some(PathBuf::from(value("--output")?)),
            "--frames" | "-n" => {
                out.frames = Some(value("--frames")?.parse().context("--frames expects a number")?)
            }
            "--seed" | "-s" => {
                out.seed = Some(value("--seed")?.parse().context("--seed expects a number")?)
            }
            "--gpu" => out.gpu = true,
            other => bail!("unexpected argument: {other}"),
        }
    }
    Ok(out)
}

fn cmd_devices(gpu: bool) -> anyhow::Result<()> {
    if gpu {
        #[cfg(feature = "wgpu")]
        return print_devices(&raytrace_host::runtime::WgpuRuntime::new());
        #[cfg(not(feature = "wgpu"))]
        bail!("built without the `wgpu` feature");
    }
    print_devices(&HostRuntime::default())
}

fn print_devices<R: ComputeRuntime>(runtime: &R) -> anyhow::Result<()> {
    let mut manager = DeviceManager::new();
    let count = manager.enumerate(runtime);
    println!("{} backend: {count} device(s)", runtime.backend_name());
    for index in 0..count {
        match runtime.device_properties(index) {
            Ok(desc) => println!("\n{}", desc.report()),
            Err(e) => println!("\ndevice {index}: {e}"),
        }
    }
    if !manager.profile_string().is_empty() {
        println!("\n{}", manager.profile_string());
    }
    Ok(())
}

fn cmd_render(config: &RendererConfig, args: &RenderArgs) -> anyhow::Result<()> {
    if args.gpu {
        #[cfg(feature = "wgpu")]
        return render_with(raytrace_host::runtime::WgpuRuntime::new(), config, args);
        #[cfg(not(feature = "wgpu"))]
        bail!("built without the `wgpu` feature");
    }
    render_with(HostRuntime::new(config.host.clone()), config, args)
}

fn render_with<R: ComputeRuntime>(
    runtime: R,
    config: &RendererConfig,
    args: &RenderArgs,
) -> anyhow::Result<()> {
    let capacity = config.session_capacity();
    let mut ctx = RenderContext::new(runtime, config.scene_info())
        .with_device_manager(DeviceManager::with_tile(config.tile))
        .with_seed(config.scene.seed);
    ctx.startup(config.device_index, &capacity)?;
    if !ctx.device_manager().has_device() {
        warn!("no compute device, nothing to render");
        return Ok(());
    }

    let pivot = build_scene(&mut ctx, &config.scene, capacity.max_primitives);
    let frames = args.frames.unwrap_or(config.max_iterations);
    let mut image = vec![0u8; capacity.pixel_count() * BYTES_PER_PIXEL];

    let start = Instant::now();
    let mut dispatched = 0u32;
    for frame in 0..frames {
        if config.scene.animate && frame > 0 {
            let mut info = *ctx.scene_info();
            fractal::animate(ctx.edit().geometry(), &mut info, pivot, config.scene.box_size);
            *ctx.scene_info_mut() = info;
            ctx.reset_accumulation();
        }

        let time = start.elapsed().as_secs_f32();
        if let FrameOutcome::Dispatched { .. } = ctx.render_begin(time)? {
            dispatched += 1;
        }
        ctx.render_end(&mut image)?;

        if !config.scene.animate && !ctx.needs_refresh() {
            break;
        }
    }

    let info = ctx.scene_info();
    info!(
        passes = dispatched,
        iteration = info.path_tracing_iteration,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "render finished"
    );

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("render.png"));
    write_png(&output, info.width, info.height, image)?;
    println!("wrote {}", output.display());
    Ok(())
}

/// Fractal, palette and lights. Returns the animation pivot.
fn build_scene<R: ComputeRuntime>(
    ctx: &mut RenderContext<R>,
    scene: &SceneConfig,
    max_primitives: usize,
) -> Vec3 {
    let params = FractalParams {
        iterations: scene.fractal_iterations,
        model: scene.fractal_model,
        mode: scene.fractal_mode,
        ..FractalParams::from_seed(scene.seed)
    };
    let center = params.center.truncate();
    let size = params.center.w;

    let mut editor = ctx.edit();
    {
        let materials = editor.materials();
        let mut rng = SplitMix64::new(scene.seed);
        for _ in 0..64 {
            materials.push(Material::diffuse(
                0.2 + 0.8 * rng.next_f32(),
                0.2 + 0.8 * rng.next_f32(),
                0.2 + 0.8 * rng.next_f32(),
            ));
        }
    }
    let light_material = editor.materials().push(Material::light(1.0, 1.0, 1.0, 1.0));

    let geometry = editor.geometry();
    let lights = [
        center + Vec3::new(-3.0, 4.0, -5.0) * size,
        center + Vec3::new(4.0, 2.0, -3.0) * size,
    ];
    for position in lights {
        geometry.add_light(position, size * 0.1, light_material, Vec4::new(0.6, 0.6, 0.55, 1.0));
    }
    fractal::generate(geometry, &params, max_primitives);
    geometry.compact_boxes(scene.box_size);

    ctx.set_camera(Camera::new(
        (center - Vec3::Z * size * 6.0).extend(0.0),
        center.extend(0.0),
        Vec4::ZERO,
    ));
    center
}

fn write_png(path: &Path, width: u32, height: u32, rgba: Vec<u8>) -> anyhow::Result<()> {
    let img = image::RgbaImage::from_raw(width, height, rgba)
        .context("image buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn print_version() {
    println!(
        "raytrace-cli {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("RAYTRACE_BUILD_DATE"),
        env!("RAYTRACE_BUILD_TIME")
    );
}

fn print_help() {
    println!("raytrace-cli - progressive ray tracer host");
    println!();
    println!("USAGE:");
    println!("    raytrace-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    d, devices [--gpu]            List compute devices and their limits");
    println!("    r, render  [ARGS]             Render a fractal scene to PNG");
    println!("    c, config  [file]             Write the default config");
    println!("    h, help                       Show this help");
    println!();
    println!("RENDER ARGS:");
    println!("    -c, --config <file>   Config file (default: per-user config)");
    println!("    -o, --output <file>   Output PNG (default: render.png)");
    println!("    -n, --frames <n>      Frame limit (default: max_iterations)");
    println!("    -s, --seed <n>        Scene seed");
    println!("        --gpu             Use the wgpu device (feature `wgpu`)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!("    -V, --version    Show version and build date");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG         Log filter when no -v/-q is given");
    println!("    RAYTRACE_TRACE=1 Write trace.json (feature `chrome-trace`)");
}
