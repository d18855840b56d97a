use std::path::PathBuf;
use std::process;

use clap::Parser;

use pmg::mosaic;
use pmg::mosaic::photo::Sizing;
use pmg::mosaic::roi::{DisabledDetector, FaceDetector};
use pmg::mosaic::{GeneratorConfig, MosaicError};

#[derive(Parser)]
#[command(version, about = "Rebuild a photograph as a mosaic of tile images", long_about = None)]
struct Cli {
    /// Reference photograph
    #[arg(long, value_name = "FILE")]
    photo: PathBuf,

    /// Directory containing candidate tile images
    #[arg(long, value_name = "DIR")]
    tiles: PathBuf,

    /// Mosaic grid: one value for a square grid, or width and height
    #[arg(long, num_args = 1..=2, default_values_t = [32], value_name = "N")]
    grid: Vec<u32>,

    /// Scale factor applied to the reference
    #[arg(long, conflicts_with = "resolution", value_name = "FACTOR")]
    scale: Option<f64>,

    /// Working resolution of the reference (width height)
    #[arg(long, num_args = 2, value_name = "PIXELS")]
    resolution: Option<Vec<u32>>,

    /// With --resolution, crop the aspect-ratio overflow instead of
    /// stretching
    #[arg(long, requires = "resolution")]
    crop: bool,

    /// Blending: a single level, or step min max for a range of outputs
    #[arg(long, num_args = 1..=3, default_values_t = [1.0], value_name = "VALUE")]
    blending: Vec<f64>,
}

/// Cross-argument validation beyond what clap expresses; every violated rule
/// gets its own line so a bad invocation reads as a checklist.
fn validate(cli: Cli) -> Result<GeneratorConfig, MosaicError> {
    let mut problems: Vec<String> = vec![];

    let grid = match cli.grid.as_slice() {
        [n] => (*n, *n),
        [w, h] => (*w, *h),
        _ => {
            problems.push("--grid takes one or two values".into());
            (0, 0)
        }
    };
    if grid.0 == 0 || grid.1 == 0 {
        problems.push("grid values must be positive".into());
    }

    let sizing = match (cli.scale, &cli.resolution) {
        (Some(scale), None) => {
            if scale <= 0.0 {
                problems.push("--scale must be positive".into());
            }
            Sizing::Scale(scale)
        }
        (None, Some(resolution)) => {
            let (width, height) = (resolution[0], resolution[1]);
            if width == 0 || height == 0 {
                problems.push("--resolution values must be at least 1".into());
            }
            Sizing::Resolution {
                width,
                height,
                crop: cli.crop,
            }
        }
        (None, None) => Sizing::Native,
        // clap already rejects the combination; keep the arm for
        // completeness.
        (Some(_), Some(_)) => {
            problems.push("--scale and --resolution are mutually exclusive".into());
            Sizing::Native
        }
    };

    let blending = match cli.blending.as_slice() {
        [level] => {
            if !(0.0..=1.0).contains(level) {
                problems.push("--blending level must be between 0 and 1".into());
            }
            (*level, *level, *level)
        }
        [step, min, max] => {
            if !(0.01..=1.0).contains(step) {
                problems.push("--blending step must be between 0.01 and 1".into());
            }
            if *min < 0.0 || *max > 1.0 || min > max {
                problems
                    .push("--blending range needs 0 <= min <= max <= 1".into());
            }
            (*step, *min, *max)
        }
        _ => {
            problems.push("--blending takes one value or step min max".into());
            (1.0, 1.0, 1.0)
        }
    };

    if !cli.photo.is_file() {
        problems.push(format!("photo {:?} is not a readable file", cli.photo));
    }
    if !cli.tiles.is_dir() {
        problems.push(format!("tiles path {:?} is not a directory", cli.tiles));
    }

    if problems.is_empty() {
        Ok(GeneratorConfig {
            photo_path: cli.photo,
            tiles_path: cli.tiles,
            grid,
            sizing,
            blending,
        })
    } else {
        Err(MosaicError::Config(problems.join("\n")))
    }
}

fn detector_factory() -> Box<dyn FaceDetector + Send> {
    // Wire a real face detection model here; with the stand-in every tile
    // keeps its default framing.
    Box::new(DisabledDetector)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match validate(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    match mosaic::generate(&config, detector_factory) {
        Ok(outputs) => {
            println!("{} mosaic(s) written", outputs.len());
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli(dir: &std::path::Path) -> Vec<String> {
        let photo = dir.join("p.png");
        let tiles = dir.join("tiles");
        std::fs::create_dir_all(&tiles).unwrap();
        std::fs::write(&photo, b"png").unwrap();
        vec![
            "pmg".into(),
            "--photo".into(),
            photo.to_string_lossy().into_owned(),
            "--tiles".into(),
            tiles.to_string_lossy().into_owned(),
        ]
    }

    #[test]
    fn test_single_grid_value_means_square() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.extend(["--grid".into(), "13".into()]);
        let config = validate(Cli::parse_from(args)).unwrap();
        assert_eq!(config.grid, (13, 13));
    }

    #[test]
    fn test_two_grid_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.extend(["--grid".into(), "8".into(), "12".into()]);
        let config = validate(Cli::parse_from(args)).unwrap();
        assert_eq!(config.grid, (8, 12));
    }

    #[test]
    fn test_zero_grid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.extend(["--grid".into(), "0".into()]);
        assert!(validate(Cli::parse_from(args)).is_err());
    }

    #[test]
    fn test_scale_conflicts_with_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.extend([
            "--scale".into(),
            "2.0".into(),
            "--resolution".into(),
            "800".into(),
            "600".into(),
        ]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_crop_requires_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.push("--crop".into());
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_blending_triple_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = base_cli(dir.path());
        args.extend([
            "--blending".into(),
            "0.1".into(),
            "0.2".into(),
            "0.8".into(),
        ]);
        let config = validate(Cli::parse_from(args)).unwrap();
        assert_eq!(config.blending, (0.1, 0.2, 0.8));

        let dir2 = tempfile::tempdir().unwrap();
        let mut bad = base_cli(dir2.path());
        bad.extend([
            "--blending".into(),
            "0.1".into(),
            "0.9".into(),
            "0.2".into(),
        ]);
        assert!(validate(Cli::parse_from(bad)).is_err());
    }

    #[test]
    fn test_default_blending_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let config = validate(Cli::parse_from(base_cli(dir.path()))).unwrap();
        assert_eq!(config.blending, (1.0, 1.0, 1.0));
        assert_eq!(config.grid, (32, 32));
        assert_eq!(config.sizing, Sizing::Native);
    }

    #[test]
    fn test_missing_paths_reported_together() {
        let err = validate(Cli::parse_from([
            "pmg",
            "--photo",
            "/nonexistent/p.png",
            "--tiles",
            "/nonexistent/tiles",
        ]))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not a readable file"));
        assert!(message.contains("not a directory"));
    }
}
