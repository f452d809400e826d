use std::{error::Error, fs, path::Path, path::PathBuf};

use clap::Parser;
use log::info;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use sft::synthetic::{SceneParams, SyntheticScene};
use sft::{reconstruct_surface, Embedding, IsometricParams, ParamDomain, SampledSurface};

/// Reconstruct a synthetic deformed surface with isometric shape-from-template.
#[derive(Debug, Parser)]
#[command(author, version, about = "Shape-from-template on a synthetic quadratic surface")]
struct Args {
    /// Optional JSON DemoConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the control point subset.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of control points.
    #[arg(long)]
    control_samples: Option<usize>,

    /// Write the JSON report here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Also write the reconstructed depth as a grayscale image (PNG, ...).
    #[cfg(feature = "image")]
    #[arg(long)]
    depth_map: Option<PathBuf>,

    /// Log progress to stderr (repeat for more detail). With the `tracing`
    /// feature, `RUST_LOG` overrides this when set.
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON tracing output instead of the plain logger.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    scene: SceneParams,
    isometric: IsometricParams,
    warp_regularization: f64,
    seed: u64,
    /// Resolution of the sampled output surface.
    surface_samples: [usize; 2],
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scene: SceneParams::default(),
            // The default scene spans 20 units; a unit step is too coarse.
            isometric: IsometricParams {
                step: 0.25,
                ..IsometricParams::default()
            },
            warp_regularization: 0.0,
            seed: 1,
            surface_samples: [20, 20],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DemoReport {
    control_points: usize,
    skipped_control_points: usize,
    /// Reconstruction error over every grid point, scene units.
    rms_error: f64,
    max_error: f64,
    surface: SurfaceReport,
}

#[derive(Debug, Serialize, Deserialize)]
struct SurfaceReport {
    nx: usize,
    ny: usize,
    positions: Vec<[f64; 3]>,
    normals: Vec<[f64; 3]>,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

fn run_demo(config: &DemoConfig) -> Result<(DemoReport, SampledSurface), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let scene = SyntheticScene::generate(config.scene.clone(), &mut rng)?;
    info!(
        "scene: {} grid points, {} control points",
        scene.len(),
        scene.control.len()
    );

    let (_, solution) = reconstruct_surface(
        &scene.control_parameters(),
        &scene.control_image_points(),
        config.warp_regularization,
        &config.isometric,
    )?;

    let all = scene.all_parameters();
    let estimated = solution.apply(&all)?.to_points3()?;
    let errors: Vec<f64> = estimated
        .iter()
        .zip(&scene.surface_points)
        .map(|(e, t)| (e - t).norm())
        .collect();
    let rms_error = (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt();
    let max_error = errors.iter().copied().fold(0.0, f64::max);
    info!("rms error {rms_error:.4}, max error {max_error:.4}");

    let [nx, ny] = config.surface_samples;
    let sampled = SampledSurface::sample(&solution, ParamDomain::bounding(&all)?, nx, ny)?;
    let report = DemoReport {
        control_points: scene.control.len(),
        skipped_control_points: solution.skipped().len(),
        rms_error,
        max_error,
        surface: SurfaceReport {
            nx,
            ny,
            positions: sampled.positions().iter().map(|p| [p.x, p.y, p.z]).collect(),
            normals: sampled.normals().iter().map(|n| [n.x, n.y, n.z]).collect(),
        },
    };
    Ok((report, sampled))
}

fn init_logging(args: &Args) {
    #[cfg(feature = "tracing")]
    let json = {
        let _ = tracing_log::LogTracer::init();
        args.json_logs
    };
    #[cfg(not(feature = "tracing"))]
    let json = false;
    sft::core::init_logging(sft::core::level_for_verbosity(args.verbose), json);
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => load_json_file::<DemoConfig>(path)?,
        None => DemoConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(n) = args.control_samples {
        config.scene.control_samples = n;
    }

    let (report, surface) = run_demo(&config)?;
    #[cfg(feature = "image")]
    {
        if let Some(path) = &args.depth_map {
            sft::io::save_gray(&sft::io::depth_image(&surface), path)?;
            info!("wrote depth map to {}", path.display());
        }
    }
    #[cfg(not(feature = "image"))]
    let _ = surface;
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json)?;
            info!("wrote report to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_demo_reconstructs_closely() {
        let (report, surface) = run_demo(&DemoConfig::default()).unwrap();
        assert_eq!(surface.shape(), (20, 20));
        assert_eq!(report.control_points, 60);
        assert_eq!(report.surface.positions.len(), 400);
        assert!(report.rms_error < 1.0, "rms error {}", report.rms_error);
    }
}
