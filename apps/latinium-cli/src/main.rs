use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glam::{Vec2, Vec3};
use latinium_common::{ProgramPaths, Sample, ShaderStage};
use latinium_render::{
    DebugOverlay, FrameInputs, Overlay, OverlayInfo, OverlayStats, StageInfo, UniformBlock,
    UniformTable, ViewerCamera, build_matrices,
};
use latinium_restir::{Reservoir, SplitMix64, UniformSource};
use latinium_shader::{
    FlattenedShader, IncludedFile, ProgramReloader, ProgramSource, ReloadEvent, ReloadOutcome,
    ShaderWatcher,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const STAGES: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

#[derive(Parser)]
#[command(name = "latinium", about = "Toolkit for shader-pack gbuffers programs")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Vertex and fragment entry files. Defaults to `shaders/gbuffers_textured`.
#[derive(Args)]
struct ProgramArgs {
    /// Vertex shader (.vsh)
    vertex: Option<PathBuf>,
    /// Fragment shader (.fsh)
    fragment: Option<PathBuf>,
}

impl ProgramArgs {
    fn paths(&self) -> ProgramPaths {
        let defaults = ProgramPaths::default();
        ProgramPaths::new(
            self.vertex.clone().unwrap_or(defaults.vertex),
            self.fragment.clone().unwrap_or(defaults.fragment),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print toolkit version and crate info
    Info,
    /// Flatten both stages of a program, inlining every #include
    Flatten {
        #[command(flatten)]
        program: ProgramArgs,
        /// Print a JSON report instead of the sources
        #[arg(long)]
        json: bool,
        /// Print the include tree instead of the sources
        #[arg(long, conflicts_with = "json")]
        tree: bool,
    },
    /// List the uniforms a program declares and their std140 layout
    Uniforms {
        #[command(flatten)]
        program: ProgramArgs,
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch a program's sources and report reloads
    Watch {
        #[command(flatten)]
        program: ProgramArgs,
        /// Stop after this many seconds (runs until interrupted otherwise)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Print the gbuffer camera matrices for a viewpoint
    Matrices {
        /// Camera position, as x,y,z
        #[arg(long, default_value = "0,0,3", value_parser = parse_vec3, allow_hyphen_values = true)]
        eye: Vec3,
        /// Look-at point, as x,y,z
        #[arg(long, default_value = "0,0,0", value_parser = parse_vec3, allow_hyphen_values = true)]
        target: Vec3,
        /// Vertical field of view in degrees
        #[arg(long, default_value = "70")]
        fov: f32,
        /// Width over height
        #[arg(long, default_value = "1.333")]
        aspect: f32,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a seeded reservoir resampling demo
    Restir {
        /// RNG seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Candidates streamed into each pixel's reservoir
        #[arg(short, long, default_value = "32")]
        candidates: usize,
        /// Neighbor reservoirs merged into the center pixel
        #[arg(short, long, default_value = "4")]
        neighbors: usize,
        /// Print a JSON report
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("latinium v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", latinium_common::crate_info());
            println!("shader: {}", latinium_shader::crate_info());
            println!("restir: {}", latinium_restir::crate_info());
            println!("render: {}", latinium_render::crate_info());
            let paths = ProgramPaths::default();
            println!(
                "default program: {} + {}",
                paths.vertex.display(),
                paths.fragment.display()
            );
        }
        Commands::Flatten {
            program,
            json,
            tree,
        } => {
            let program = load_program(&program.paths())?;
            if json {
                let report = FlattenReport::new(&program);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if tree {
                for stage in STAGES {
                    println!("{stage}:");
                    print!("{}", include_tree(program.stage(stage)));
                }
            } else {
                for stage in STAGES {
                    let flat = program.stage(stage);
                    println!("// ---- {stage}: {} ----", flat.entry().display());
                    println!("{}", flat.source());
                }
            }
        }
        Commands::Uniforms { program, json } => {
            let program = load_program(&program.paths())?;
            let table = uniform_table(&program);
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                println!(
                    "{} uniforms, block size {} bytes",
                    table.len(),
                    table.block_size()
                );
                for (name, slot) in table.iter() {
                    match slot.offset {
                        Some(offset) => println!("  {name:<28} {:?} @ {offset}", slot.kind),
                        None => println!("  {name:<28} {:?}", slot.kind),
                    }
                }
            }
        }
        Commands::Watch {
            program,
            timeout_secs,
        } => watch(program.paths(), timeout_secs.map(Duration::from_secs))?,
        Commands::Matrices {
            eye,
            target,
            fov,
            aspect,
            json,
        } => {
            let m = build_matrices(eye, target, fov, aspect);
            if json {
                println!("{}", serde_json::to_string_pretty(&m)?);
            } else {
                println!("cameraPosition: {:?}", m.position);
                for (name, mat) in [
                    ("gbufferModelView", m.model_view),
                    ("gbufferModelViewInverse", m.model_view_inverse),
                    ("gbufferProjection", m.projection),
                    ("gbufferProjectionInverse", m.projection_inverse),
                ] {
                    println!("{name}:");
                    // Rows, for reading; storage is column-major.
                    let t = mat.transpose();
                    for row in [t.x_axis, t.y_axis, t.z_axis, t.w_axis] {
                        println!(
                            "  [{:>9.4} {:>9.4} {:>9.4} {:>9.4}]",
                            row.x, row.y, row.z, row.w
                        );
                    }
                }
            }
        }
        Commands::Restir {
            seed,
            candidates,
            neighbors,
            json,
        } => {
            let report = restir_demo(seed, candidates, neighbors)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "ReSTIR demo: seed={seed}, candidates={candidates}, neighbors={neighbors}"
                );
                println!(
                    "Center: M={}, wsum={:.4}, W={:.4}",
                    report.center.m, report.center.wsum, report.center.weight
                );
                println!(
                    "Merged: M={}, wsum={:.4}, W={:.4}",
                    report.merged.m, report.merged.wsum, report.merged.weight
                );
                println!(
                    "Estimate: {:.4} (mean luminance {:.4})",
                    report.estimate, report.mean_luminance
                );
            }
        }
    }

    Ok(())
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z, got '{s}'"));
    };
    let parse = |v: &str| v.parse::<f32>().map_err(|e| format!("'{v}': {e}"));
    Ok(Vec3::new(parse(x)?, parse(y)?, parse(z)?))
}

fn load_program(paths: &ProgramPaths) -> anyhow::Result<ProgramSource> {
    ProgramSource::load(paths).with_context(|| {
        format!(
            "failed to load program {} + {}",
            paths.vertex.display(),
            paths.fragment.display()
        )
    })
}

fn uniform_table(program: &ProgramSource) -> UniformTable {
    UniformTable::from_sources(&[program.vertex.source(), program.fragment.source()])
}

fn include_tree(flat: &FlattenedShader) -> String {
    let root = flat.entry().parent().unwrap_or(Path::new(""));
    let mut out = String::new();
    for file in flat.files() {
        let shown = file.path.strip_prefix(root).unwrap_or(file.path.as_path());
        out.push_str(&format!(
            "{}{}\n",
            "  ".repeat(file.depth + 1),
            shown.display()
        ));
    }
    out
}

#[derive(Serialize)]
struct StageReport<'a> {
    entry: &'a Path,
    lines: usize,
    includes: usize,
    files: &'a [IncludedFile],
}

#[derive(Serialize)]
struct FlattenReport<'a> {
    digest: &'a str,
    vertex: StageReport<'a>,
    fragment: StageReport<'a>,
    dependencies: Vec<&'a Path>,
}

impl<'a> FlattenReport<'a> {
    fn new(program: &'a ProgramSource) -> Self {
        let stage = |flat: &'a FlattenedShader| StageReport {
            entry: flat.entry(),
            lines: flat.line_count(),
            includes: flat.include_count(),
            files: flat.files(),
        };
        Self {
            digest: &program.digest,
            vertex: stage(&program.vertex),
            fragment: stage(&program.fragment),
            dependencies: program.dependencies(),
        }
    }
}

fn overlay_info(program: &ProgramSource, last_error: Option<String>) -> OverlayInfo {
    let stages = STAGES
        .into_iter()
        .map(|stage| {
            let flat = program.stage(stage);
            StageInfo {
                stage,
                path: flat.entry().to_path_buf(),
                lines: flat.line_count(),
                includes: flat.include_count(),
            }
        })
        .collect();
    OverlayInfo {
        stages,
        uniforms: uniform_table(program).len(),
        last_error,
    }
}

/// Load the program once and hand the loaded reloader to a watcher, so only
/// changes made after startup are reported.
fn start_watch(paths: ProgramPaths) -> anyhow::Result<(ProgramSource, Duration, ShaderWatcher)> {
    let mut reloader = ProgramReloader::new(paths.clone());
    let program = match reloader.reload() {
        ReloadOutcome::Updated(program) => program,
        ReloadOutcome::Failed(e) => return Err(e).context("initial load failed"),
        ReloadOutcome::Unchanged => load_program(&paths)?,
    };
    let took = reloader.last_duration();
    let watcher = ShaderWatcher::new(reloader).context("failed to start shader watcher")?;
    Ok((program, took, watcher))
}

/// Hot-reload loop: reports every reload and ticks a headless frame that
/// stages the uniforms of the current program.
fn watch(paths: ProgramPaths, timeout: Option<Duration>) -> anyhow::Result<()> {
    let (mut current, took, watcher) = start_watch(paths)?;
    println!(
        "Watching {} (ctrl-c to stop)",
        watcher
            .roots()
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let start = Instant::now();
    let mut camera = ViewerCamera::default();
    camera.set_viewport(1280, 720);
    let mut block = UniformBlock::new(uniform_table(&current));
    let mut stats = OverlayStats::new();
    stats.record_reload(Some(took));
    let mut frame = 0u32;

    let info = overlay_info(&current, None);
    print!("{}", DebugOverlay::new().render(&info, &stats));

    loop {
        if timeout.is_some_and(|t| start.elapsed() >= t) {
            break;
        }
        let frame_start = Instant::now();
        let event = watcher.recv_timeout(Duration::from_millis(250));

        let inputs = FrameInputs {
            time: start.elapsed().as_secs_f32(),
            frame,
            resolution: Vec2::new(1280.0, 720.0),
            camera: camera.matrices(),
        };
        block.apply_frame(&inputs);
        frame = frame.wrapping_add(1);
        stats.record_frame(frame_start.elapsed());

        let Some(event) = event else {
            continue;
        };
        let last_error = match event {
            ReloadEvent::Reloaded(program) => {
                stats.record_reload(None);
                println!("reloaded: digest {}", &program.digest[..12]);
                block = UniformBlock::new(uniform_table(&program));
                current = program;
                None
            }
            ReloadEvent::Failed(e) => {
                stats.record_failure();
                println!("reload failed, keeping last good program: {e}");
                Some(e.to_string())
            }
        };
        let info = overlay_info(&current, last_error);
        print!("{}", DebugOverlay::new().render(&info, &stats));
    }

    println!(
        "Stopped after {frame} frames, {} loads, {} failures",
        stats.reloads(),
        stats.failures()
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct ReservoirReport {
    m: u32,
    wsum: f32,
    weight: f32,
    sample: Option<Sample>,
}

impl ReservoirReport {
    fn new<R>(r: &Reservoir<Sample, R>) -> Self {
        Self {
            m: r.m(),
            wsum: r.wsum(),
            weight: r.get_weight(Sample::luminance),
            sample: r.sample().copied(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RestirReport {
    center: ReservoirReport,
    merged: ReservoirReport,
    /// Luminance of the merged sample times its contribution weight.
    estimate: f32,
    /// Mean luminance over every candidate, for comparison.
    mean_luminance: f32,
}

/// Streams random light samples into a center pixel and its neighbors, then
/// reuses the neighbors spatially. Target density is sample luminance.
fn restir_demo(seed: u64, candidates: usize, neighbors: usize) -> anyhow::Result<RestirReport> {
    let mut rng = SplitMix64::new(seed);
    let mut total_luminance = 0.0f32;
    let mut pixels = Vec::with_capacity(neighbors + 1);

    for _ in 0..=neighbors {
        let mut reservoir = Reservoir::new(rng.fork());
        for _ in 0..candidates {
            let sample = Sample {
                position: Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32()) * 10.0,
                normal: Vec3::Y,
                radiance: Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32()) * 4.0,
                pdf: 1.0,
            };
            total_luminance += sample.luminance();
            reservoir.update(sample, sample.luminance() / sample.pdf)?;
        }
        pixels.push(reservoir);
    }

    let mut merged = Reservoir::new(rng.fork());
    for pixel in &pixels {
        merged.merge(pixel, Sample::luminance)?;
    }
    tracing::debug!(m = merged.m(), wsum = merged.wsum(), "merged reservoirs");

    let weight = merged.get_weight(Sample::luminance);
    let estimate = merged.sample().map_or(0.0, |s| s.luminance() * weight);
    let count = (candidates * (neighbors + 1)).max(1);

    Ok(RestirReport {
        center: ReservoirReport::new(&pixels[0]),
        merged: ReservoirReport::new(&merged),
        estimate,
        mean_luminance: total_luminance / count as f32,
    })
}
