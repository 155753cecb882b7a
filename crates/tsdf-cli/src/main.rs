//! `tsdf-cli` – command line front end for `tsdf-fusion`.
//!
//! ```text
//! tsdf init  [path]                write a default config (./tsdf.toml)
//! tsdf check [path] [--json]       validate a config, print volume metadata
//! tsdf bench [path] [frames]       integrate synthetic frames and time them
//! ```
//!
//! Ctrl-C during `bench` cancels the frame in flight and stops the run.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use colored::Colorize;
use tracing::{info, warn};
use tsdf_fusion::volume::origin_transform;
use tsdf_fusion::{DepthFrame, FrameOutcome, Session, StampedTransform, Transform3D, Vec3};
use tsdf_types::{ConfigError, FusionConfig};

const DEFAULT_BENCH_FRAMES: u32 = 30;

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("tsdf");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);
    let rest = args.get(1..).unwrap_or_default();

    let result = match command {
        Some("init") => cmd_init(rest),
        Some("check") => cmd_check(rest),
        Some("bench") => cmd_bench(rest),
        Some("help" | "-h" | "--help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            println!("{}: unknown command `{}`\n", "Error".red(), other);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_init(args: &[String]) -> Result<(), ConfigError> {
    let path = config::config_path(args.first().map(String::as_str));
    if path.exists() {
        println!(
            "  {} {} already exists; leaving it untouched.",
            "!".yellow().bold(),
            path.display().to_string().bold()
        );
        return Ok(());
    }
    config::save_to(&FusionConfig::default(), &path)?;
    println!(
        "  {} Default config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// check
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_check(args: &[String]) -> Result<(), ConfigError> {
    let json = args.iter().any(|a| a == "--json");
    let path_arg = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);
    let path = config::config_path(path_arg);

    let cfg = config::load_from(&path)?.ok_or_else(|| ConfigError::Io {
        path: path.display().to_string(),
        reason: "file not found (run `tsdf init` first)".to_string(),
    })?;
    cfg.validate()?;

    let voxels = cfg.voxel_count();
    let bytes = voxels * std::mem::size_of::<tsdf_fusion::Voxel>() as u64;

    if json {
        let summary = serde_json::json!({
            "path": path.display().to_string(),
            "config": cfg,
            "voxels": voxels,
            "memory_bytes": bytes,
            "truncation": cfg.truncation_distance(),
        });
        println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| ConfigError::Parse(e.to_string()))?);
        return Ok(());
    }

    let intr = &cfg.camera_intrinsic_params;
    println!("  {} {} is valid\n", "✓".green().bold(), path.display().to_string().bold());
    println!("  {:<14} {}", "frame".dimmed(), cfg.tsdf_frame_id);
    println!(
        "  {:<14} {} x {} x {} voxels @ {} m",
        "volume".dimmed(),
        cfg.volume_x,
        cfg.volume_y,
        cfg.volume_z,
        cfg.volume_resolution
    );
    println!(
        "  {:<14} {:.3} x {:.3} x {:.3} m",
        "extent".dimmed(),
        cfg.volume_x as f32 * cfg.volume_resolution,
        cfg.volume_y as f32 * cfg.volume_resolution,
        cfg.volume_z as f32 * cfg.volume_resolution
    );
    println!("  {:<14} {} m", "truncation".dimmed(), cfg.truncation_distance());
    println!("  {:<14} {}", "memory".dimmed(), human_bytes(bytes));
    println!(
        "  {:<14} {} x {} px, fx={} fy={} cx={} cy={}",
        "camera".dimmed(),
        cfg.cols,
        cfg.rows,
        intr.fx,
        intr.fy,
        intr.cx,
        intr.cy
    );
    println!(
        "  {:<14} max_weight={} weighting={} min_translation={} m",
        "fusion".dimmed(),
        cfg.max_weight,
        cfg.weighting,
        cfg.min_translation
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// bench
// ─────────────────────────────────────────────────────────────────────────────

/// Integrates a fronto-parallel plane halfway through the volume, seen from a
/// camera sliding along `+x` in front of it.
fn cmd_bench(args: &[String]) -> Result<(), ConfigError> {
    let path = config::config_path(args.first().map(String::as_str));
    let frames = args
        .get(1)
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_BENCH_FRAMES);

    let cfg = match config::load_from(&path)? {
        Some(cfg) => cfg,
        None => {
            println!(
                "  {} {} not found, using defaults.",
                "!".yellow().bold(),
                path.display().to_string().bold()
            );
            let mut cfg = FusionConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let mut session = Session::new(cfg.clone())?;
    println!(
        "  Allocating {} voxels ({}) …",
        cfg.voxel_count(),
        human_bytes(cfg.voxel_count() * std::mem::size_of::<tsdf_fusion::Voxel>() as u64)
    );
    session.initialize()?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let cancel = session.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
        cancel.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; bench cannot be interrupted cleanly");
    }

    let origin = origin_transform(&cfg)?;
    let res = cfg.volume_resolution;
    let extent = Vec3::new(
        cfg.volume_x as f32 * res,
        cfg.volume_y as f32 * res,
        cfg.volume_z as f32 * res,
    );
    let plane_depth = extent.z * 0.5;
    let step = (res * 0.5).max(cfg.min_translation * 2.0);
    let camera_frame = "bench_camera";

    info!(frames, plane_depth, step, "bench started");
    let started = Instant::now();
    for i in 0..frames {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stamp = Utc::now();
        let local = Vec3::new(extent.x * 0.5 + step * i as f32, extent.y * 0.5, 0.0);
        let camera_to_reference = origin.compose(Transform3D::from_translation(local));
        let pose = StampedTransform::new(cfg.tsdf_frame_id.clone(), camera_frame, stamp, camera_to_reference);
        let frame = DepthFrame::constant(camera_frame, stamp, cfg.cols, cfg.rows, plane_depth);

        match session.integrate(&frame, &pose) {
            FrameOutcome::Integrated(report) => println!(
                "  frame {:>4}  {}  {:>10} voxels  {:>8.2} ms",
                i,
                "integrated".green(),
                report.voxels_updated,
                report.elapsed.as_secs_f64() * 1e3
            ),
            FrameOutcome::Interrupted(report) => println!(
                "  frame {:>4}  {}  {}/{} slabs",
                i,
                "interrupted".yellow(),
                report.slabs_completed,
                report.slabs_total
            ),
            FrameOutcome::Skipped(reason) => println!("  frame {:>4}  {}  {}", i, "skipped".yellow(), reason),
        }
    }
    let elapsed = started.elapsed();

    let stats = session.stats();
    println!();
    println!(
        "  {} received, {} integrated, {} interrupted, {} skipped in {:.2} s",
        stats.received,
        stats.integrated.to_string().green(),
        stats.interrupted,
        stats.total_skipped(),
        elapsed.as_secs_f64()
    );
    for (kind, count) in &stats.skipped {
        println!("    {:?}: {}", kind, count);
    }

    let mesh = session.extract_mesh();
    let points = session.extract_points();
    println!(
        "  mesh: {} vertices, {} triangles; points: {}",
        mesh.vertices.len(),
        mesh.triangles.len(),
        points.len()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_usage() {
    println!("  {} {}", "tsdf".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Volumetric depth fusion\n");
    println!("  {}", "Usage:".bold());
    println!("    tsdf init  [path]             write a default config");
    println!("    tsdf check [path] [--json]    validate a config and show volume metadata");
    println!("    tsdf bench [path] [frames]    integrate synthetic frames (default {DEFAULT_BENCH_FRAMES})");
    println!();
    println!("  Config path defaults to ./{}.", config::DEFAULT_CONFIG_FILE);
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(629_145_600), "600.0 MiB");
    }

    #[test]
    fn init_writes_loadable_default() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("tsdf.toml");
        let arg = path.display().to_string();

        cmd_init(std::slice::from_ref(&arg)).expect("init");
        let raw = std::fs::read_to_string(&path).expect("read back");
        let loaded: FusionConfig = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded, FusionConfig::default());

        cmd_check(&[arg]).expect("check");
    }

    #[test]
    fn check_rejects_invalid_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("tsdf.toml");
        std::fs::write(&path, "volume_resolution = -1.0\n").expect("write");
        let err = cmd_check(&[path.display().to_string()]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidResolution(-1.0));
    }

    #[test]
    fn check_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("absent.toml");
        assert!(matches!(cmd_check(&[path.display().to_string()]), Err(ConfigError::Io { .. })));
    }
}
