use std::io;
use std::path::{Path, PathBuf};

use derive_more::Display;

pub type Result<T> = std::result::Result<T, MosaicError>;

/// Fatal pipeline errors. Per-tile decode failures are not represented here:
/// an unreadable candidate is dropped during cleanup and only the resulting
/// shortage of tiles is fatal.
#[derive(Debug, Display)]
pub enum MosaicError {
    #[display(fmt = "invalid configuration:\n{}", _0)]
    Config(String),

    #[display(fmt = "{:?}: {}", path, source)]
    Io { path: PathBuf, source: io::Error },

    #[display(fmt = "{:?}: {}", path, source)]
    Image {
        path: PathBuf,
        source: ::image::ImageError,
    },

    #[display(
        fmt = "not enough usable tiles: {} found after cleanup but at least {} are required",
        found,
        required
    )]
    InsufficientTiles { found: usize, required: usize },

    #[display(
        fmt = "grid subdivision leads to {}x{} tiles (minimum is 32x32)",
        width,
        height
    )]
    TileTooSmall { width: u32, height: u32 },

    #[display(fmt = "invalid resampling geometry: {}", _0)]
    Geometry(String),

    #[display(fmt = "match solver left one or several cells without a tile")]
    Incomplete,
}

impl MosaicError {
    pub fn io(path: &Path, source: io::Error) -> MosaicError {
        MosaicError::Io {
            path: path.to_owned(),
            source,
        }
    }

    pub fn image(path: &Path, source: ::image::ImageError) -> MosaicError {
        MosaicError::Image {
            path: path.to_owned(),
            source,
        }
    }
}

impl std::error::Error for MosaicError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MosaicError::Io { source, .. } => Some(source),
            MosaicError::Image { source, .. } => Some(source),
            _ => None,
        }
    }
}
