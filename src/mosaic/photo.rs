use std::path::{Path, PathBuf};

use log::info;

use super::error::{MosaicError, Result};
use super::image::{self, Image, Rect};
use super::resample::{resample, Filter};

/// Tiles smaller than this on either side carry too little color structure
/// to match against.
pub const MIN_TILE_SIZE: u32 = 32;

/// How the reference is brought to its working resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sizing {
    /// Keep the source resolution.
    Native,
    /// Multiply both dimensions by a positive factor.
    Scale(f64),
    /// Resample to an exact resolution; with `crop` the aspect-mismatched
    /// axis is extended first so the final frame is a centered crop instead
    /// of a stretch.
    Resolution { width: u32, height: u32, crop: bool },
}

/// The reference photograph at working resolution, sliced into the mosaic
/// grid. Excess border pixels around the grid are split evenly, so the
/// mosaic area sits centered in the working image.
#[derive(Debug)]
pub struct Photo {
    path: PathBuf,
    image: Image,
    grid_w: u32,
    grid_h: u32,
    tile_w: u32,
    tile_h: u32,
    offset_x: u32,
    offset_y: u32,
}

impl Photo {
    pub fn load(path: &Path, grid: (u32, u32), sizing: Sizing) -> Result<Photo> {
        let input = image::decode(path)?;
        let (input_w, input_h) = input.dimensions();

        let (resample_w, resample_h, target_w, target_h) = match sizing {
            Sizing::Native => (input_w, input_h, input_w, input_h),
            Sizing::Scale(scale) => {
                let w = (f64::from(input_w) * scale) as u32;
                let h = (f64::from(input_h) * scale) as u32;
                (w, h, w, h)
            }
            Sizing::Resolution {
                width,
                height,
                crop,
            } => {
                let mut w = width;
                let mut h = height;
                if crop {
                    let input_ratio = f64::from(input_w) / f64::from(input_h);
                    let target_ratio = f64::from(width) / f64::from(height);
                    if input_ratio < target_ratio {
                        h = (f64::from(width) / input_ratio) as u32;
                    } else if input_ratio > target_ratio {
                        w = (f64::from(height) * input_ratio) as u32;
                    }
                }
                (w, h, width, height)
            }
        };

        let image = resample(
            &input,
            input.full_rect(),
            resample_w,
            resample_h,
            Filter::Lanczos,
        )?;

        let (grid_w, grid_h) = grid;
        let tile_w = target_w / grid_w;
        let tile_h = target_h / grid_h;
        if tile_w < MIN_TILE_SIZE || tile_h < MIN_TILE_SIZE {
            return Err(MosaicError::TileTooSmall {
                width: tile_w,
                height: tile_h,
            });
        }

        let offset_x = (image.width() - grid_w * tile_w) / 2;
        let offset_y = (image.height() - grid_h * tile_h) / 2;

        info!("photo size: {}x{}", input_w, input_h);
        info!("mosaic size: {}x{}", grid_w * tile_w, grid_h * tile_h);
        info!(
            "cropped border: {}x{}",
            image.width() - grid_w * tile_w,
            image.height() - grid_h * tile_h
        );
        info!("tile size: {}x{}", tile_w, tile_h);

        Ok(Photo {
            path: path.to_owned(),
            image,
            grid_w,
            grid_h,
            tile_w,
            tile_h,
            offset_x,
            offset_y,
        })
    }

    pub fn grid(&self) -> (u32, u32) {
        (self.grid_w, self.grid_h)
    }

    pub fn cells(&self) -> usize {
        self.grid_w as usize * self.grid_h as usize
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_w, self.tile_h)
    }

    /// Working-resolution image the regions index into.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// The region of the working image covered by mosaic cell `m`.
    pub fn tile_box(&self, m: usize) -> Rect {
        let i = m as u32 / self.grid_w;
        let j = m as u32 % self.grid_w;
        Rect::new(
            self.offset_x + j * self.tile_w,
            self.offset_y + i * self.tile_h,
            self.tile_w,
            self.tile_h,
        )
    }

    pub fn region(&self, m: usize) -> Image {
        self.image.crop(self.tile_box(m))
    }

    /// Where the mosaics are written: next to the reference.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new(""))
    }
}
