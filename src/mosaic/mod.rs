pub mod enhance;
pub mod error;
pub mod features;
pub mod gmm;
pub mod hash;
pub mod image;
pub mod photo;
pub mod rendering;
pub mod resample;
pub mod roi;
pub mod solver;
pub mod tiles;

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

pub use error::{MosaicError, Result};

use features::Features;
use photo::{Photo, Sizing};
use rendering::MosaicBuilder;
use roi::FaceDetector;
use solver::MatchSolver;
use tiles::TileCatalog;

pub(crate) fn progress_bar(len: usize, msg: &'static str) -> ProgressBar {
    ProgressBar::new(len as u64).with_message(msg).with_style(
        ProgressStyle::default_bar()
            .template("{msg} {wide_bar} {pos}/{len} ({per_sec})")
            .unwrap(),
    )
}

#[derive(Debug)]
pub struct GeneratorConfig {
    pub photo_path: PathBuf,
    pub tiles_path: PathBuf,
    pub grid: (u32, u32),
    pub sizing: Sizing,
    /// (step, min, max); one output canvas per step in [min, max].
    pub blending: (f64, f64, f64),
}

/// Run the whole pipeline: slice the reference, prepare the tile catalog,
/// solve the non-redundant assignment, and compose one mosaic per blending
/// level. Returns the written mosaic paths.
pub fn generate<F>(config: &GeneratorConfig, make_detector: F) -> Result<Vec<PathBuf>>
where
    F: Fn() -> Box<dyn FaceDetector + Send> + Sync,
{
    let photo = Photo::load(&config.photo_path, config.grid, config.sizing)?;
    let solver = MatchSolver::new(config.grid);

    let mut catalog = TileCatalog::scan(&config.tiles_path)?;
    catalog.cleanup(solver.required_tiles())?;
    let (tile_w, tile_h) = photo.tile_size();
    catalog.compute(tile_w, tile_h, make_detector)?;

    let cell_features: Vec<Features> = (0..photo.cells())
        .into_par_iter()
        .map(|m| features::compute(photo.image(), photo.tile_box(m)))
        .collect();
    let tile_features: Vec<Features> = catalog.tiles().iter().map(|t| t.features).collect();
    let assignment = solver.solve(&cell_features, &tile_features)?;

    MosaicBuilder::new(config.blending).build(&photo, &catalog, &assignment)
}
