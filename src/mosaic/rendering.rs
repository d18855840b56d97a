use std::path::PathBuf;

use log::info;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::enhance::ColorEnhancer;
use super::error::Result;
use super::image::{self, Image};
use super::photo::Photo;
use super::progress_bar;
use super::solver::Assignment;
use super::tiles::TileCatalog;

const JPEG_QUALITY: u8 = 100;

/// Stamps color-corrected tiles into one canvas per blending level and
/// writes each canvas next to the reference as
/// `mosaic_<blending x 100, zero-padded>.jpg`.
pub struct MosaicBuilder {
    blending_step: f64,
    blending_min: f64,
    blending_max: f64,
}

impl MosaicBuilder {
    /// `blending` is (step, min, max); a single level is (level, level,
    /// level).
    pub fn new(blending: (f64, f64, f64)) -> MosaicBuilder {
        MosaicBuilder {
            blending_step: blending.0,
            blending_min: blending.1,
            blending_max: blending.2,
        }
    }

    fn levels(&self) -> Vec<f64> {
        let span = self.blending_max - self.blending_min;
        let nb_steps = if span > 0.0 {
            (span / self.blending_step) as usize + 1
        } else {
            1
        };
        (0..nb_steps)
            .map(|s| self.blending_min + s as f64 * self.blending_step)
            .collect()
    }

    pub fn build(
        &self,
        photo: &Photo,
        catalog: &TileCatalog,
        assignment: &Assignment,
    ) -> Result<Vec<PathBuf>> {
        let (tile_w, tile_h) = photo.tile_size();
        let (grid_w, _) = photo.grid();
        let levels = self.levels();

        // Cells are enhanced in parallel; the canvases are assembled
        // afterwards so the parallel stage never shares mutable pixels.
        let pb = progress_bar(photo.cells(), "Building mosaics");
        let enhanced: Vec<(usize, Vec<Image>)> = (0..photo.cells())
            .into_par_iter()
            .map(|m| -> Result<(usize, Vec<Image>)> {
                let tile = image::decode(catalog.export_path(assignment.tile_for(m)))?;
                let enhancer = ColorEnhancer::new(photo.image(), photo.tile_box(m), &tile);
                let variants = levels
                    .iter()
                    .map(|&blending| {
                        let mut out = tile.clone();
                        for (p, value) in out.data_mut().iter_mut().enumerate() {
                            *value = enhancer.apply(*value, p % 3, blending);
                        }
                        out
                    })
                    .collect();
                Ok((m, variants))
            })
            .inspect(|_| pb.inc(1))
            .collect::<Result<_>>()?;
        pb.finish_and_clear();

        let mut canvases = vec![
            Image::new(grid_w * tile_w, photo.grid().1 * tile_h);
            levels.len()
        ];
        for (m, variants) in enhanced {
            let i = m as u32 / grid_w;
            let j = m as u32 % grid_w;
            for (canvas, variant) in canvases.iter_mut().zip(&variants) {
                canvas.copy_from(variant, variant.full_rect(), j * tile_w, i * tile_h);
            }
        }

        let mut outputs = Vec::with_capacity(levels.len());
        for (canvas, blending) in canvases.iter().zip(&levels) {
            let path = photo
                .directory()
                .join(format!("mosaic_{:03}.jpg", (blending * 100.0) as u32));
            canvas.encode_jpeg(&path, JPEG_QUALITY)?;
            info!("mosaic exported at {:?}", path);
            outputs.push(path);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_cover_the_range_inclusively() {
        let builder = MosaicBuilder::new((0.25, 0.0, 1.0));
        let levels = builder.levels();
        assert_eq!(levels.len(), 5);
        assert_eq!(levels[0], 0.0);
        assert!((levels[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_level_when_range_is_empty() {
        let builder = MosaicBuilder::new((1.0, 0.7, 0.7));
        assert_eq!(builder.levels(), vec![0.7]);
    }
}
