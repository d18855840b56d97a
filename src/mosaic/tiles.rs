use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, trace, warn};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use super::error::{MosaicError, Result};
use super::features::{self, Features};
use super::hash::{self, HASH_BITS};
use super::image::{self, Image, Rect};
use super::progress_bar;
use super::resample::{resample, Filter};
use super::roi::{self, FaceDetector};

const TEMP_DIR_SUFFIX: &str = "PMG_temp";
const HASH_CACHE_FILE: &str = ".pmg_dhash";
/// Two tiles whose hashes differ in at most this fraction of their bits are
/// duplicates.
const DEDUP_TOLERANCE: f64 = 0.16;

/// One catalog entry after compute: where it came from, where its resampled
/// export lives, and its color descriptor.
pub struct Tile {
    pub source_path: PathBuf,
    pub export_path: PathBuf,
    pub features: Features,
}

/// The candidate tile library: enumerated from a directory tree, thinned of
/// perceptual duplicates, then cropped/resampled/exported. The exported
/// tiles live in a sibling temp directory owned by the catalog and removed
/// when it drops, unwinding included.
pub struct TileCatalog {
    root: PathBuf,
    temp_path: PathBuf,
    candidates: Vec<PathBuf>,
    tiles: Vec<Tile>,
    _guard: Option<TempDirGuard>,
}

impl TileCatalog {
    pub fn scan(root: &Path) -> Result<TileCatalog> {
        let temp_path = temp_dir_for(root);
        let candidates = image::find_images(root, &temp_path)?;
        trace!("{} tile candidates found under {:?}", candidates.len(), root);
        Ok(TileCatalog {
            root: root.to_owned(),
            temp_path,
            candidates,
            tiles: vec![],
            _guard: None,
        })
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn export_path(&self, id: usize) -> &Path {
        &self.tiles[id].export_path
    }

    /// Drop unreadable candidates and perceptual duplicates. Scanning pairs
    /// in enumeration order and always discarding the later entry keeps the
    /// first member of every duplicate class (stable). Errors out when fewer
    /// than `min_tiles` survive.
    pub fn cleanup(&mut self, min_tiles: usize) -> Result<()> {
        let cache = HashCache::load(&self.root);
        let fresh: RwLock<HashMap<String, u128>> = RwLock::new(HashMap::new());

        let pb = progress_bar(self.candidates.len(), "Detecting duplicates");
        let hashes: Vec<Option<u128>> = self
            .candidates
            .par_iter()
            .map(|path| {
                let bytes = fs::read(path).ok()?;
                let key = format!("{:x}", md5::compute(&bytes));
                if let Some(&known) = cache.entries.get(&key) {
                    return Some(known);
                }
                let decoded = ::image::load_from_memory(&bytes).ok()?;
                let computed = hash::dhash(&Image::from_rgb8(decoded.into_rgb8())).ok()?;
                fresh.write().unwrap().insert(key, computed);
                Some(computed)
            })
            .inspect(|_| pb.inc(1))
            .collect();
        pb.finish_and_clear();
        trace!("tile hashes computed");

        let max_bit_dist = (f64::from(HASH_BITS) * DEDUP_TOLERANCE) as u32;
        let mut keep = vec![true; hashes.len()];
        for t1 in 0..hashes.len() {
            let Some(h1) = hashes[t1] else {
                keep[t1] = false;
                continue;
            };
            for t2 in t1 + 1..hashes.len() {
                if let Some(h2) = hashes[t2] {
                    if hash::distance(h1, h2) <= max_bit_dist {
                        keep[t2] = false;
                    }
                }
            }
        }

        let before = self.candidates.len();
        let mut kept = Vec::with_capacity(before);
        for (candidate, keep) in self.candidates.drain(..).zip(keep) {
            if keep {
                kept.push(candidate);
            }
        }
        self.candidates = kept;
        debug!(
            "{} duplicate or unreadable tiles removed, {} remain",
            before - self.candidates.len(),
            self.candidates.len()
        );

        let fresh = fresh.into_inner().unwrap();
        if !fresh.is_empty() {
            cache.merged(fresh).store(&self.root);
        }

        if self.candidates.len() < min_tiles {
            return Err(MosaicError::InsufficientTiles {
                found: self.candidates.len(),
                required: min_tiles,
            });
        }
        Ok(())
    }

    /// Crop every surviving candidate to the tile aspect ratio, resample it
    /// to `tile_w` x `tile_h`, extract its descriptor, and export it as PNG
    /// into the temp directory. Workers get their own detector instance from
    /// `make_detector`; instances are never shared across threads.
    pub fn compute<F>(&mut self, tile_w: u32, tile_h: u32, make_detector: F) -> Result<()>
    where
        F: Fn() -> Box<dyn FaceDetector + Send> + Sync,
    {
        self._guard = None;
        if self.temp_path.exists() {
            fs::remove_dir_all(&self.temp_path)
                .map_err(|e| MosaicError::io(&self.temp_path, e))?;
        }
        fs::create_dir_all(&self.temp_path).map_err(|e| MosaicError::io(&self.temp_path, e))?;
        self._guard = Some(TempDirGuard {
            path: self.temp_path.clone(),
        });
        trace!("{:?} temporary folder created", self.temp_path);

        let digits = self.candidates.len().to_string().len();
        let temp_path = &self.temp_path;
        let pb = progress_bar(self.candidates.len(), "Computing tile candidates");
        let tiles = self
            .candidates
            .par_iter()
            .enumerate()
            .map_init(&make_detector, |detector, (t, path)| -> Result<Tile> {
                let img = image::decode_oriented(path)?;
                let crop = crop_box(&img, tile_w, tile_h, detector.as_mut())?;
                let tile_img = resample(&img, crop, tile_w, tile_h, Filter::Lanczos)?;
                let features = features::compute(&tile_img, tile_img.full_rect());
                let export_path = temp_path.join(format!("tile_{t:0digits$}.png"));
                tile_img.encode_png(&export_path)?;
                Ok(Tile {
                    source_path: path.clone(),
                    export_path,
                    features,
                })
            })
            .inspect(|_| pb.inc(1))
            .collect::<Result<Vec<Tile>>>()?;
        pb.finish_and_clear();
        trace!("tile features computed");

        self.tiles = tiles;
        Ok(())
    }
}

/// Pick the crop of `img` matching the tile aspect ratio: the crop spans the
/// full image along its tighter axis and slides along the other, positioned
/// by the ROI policy.
fn crop_box(
    img: &Image,
    tile_w: u32,
    tile_h: u32,
    detector: &mut dyn FaceDetector,
) -> Result<Rect> {
    if img.dimensions() == (tile_w, tile_h) {
        return Ok(img.full_rect());
    }

    let w_scale_inv = f64::from(img.width()) / f64::from(tile_w);
    let h_scale_inv = f64::from(img.height()) / f64::from(tile_h);
    let scale_inv = w_scale_inv.min(h_scale_inv);

    let crop_w = ((f64::from(tile_w) * scale_inv).ceil() as u32).min(img.width());
    let crop_h = ((f64::from(tile_h) * scale_inv).ceil() as u32).min(img.height());
    let row_search = w_scale_inv < h_scale_inv;

    let (x, y) = roi::find_roi(img, crop_w, crop_h, row_search, detector)?;
    Ok(Rect::new(x, y, crop_w, crop_h))
}

/// The export directory sits beside the tile directory, its name suffixed
/// onto the path, and is excluded from enumeration.
fn temp_dir_for(root: &Path) -> PathBuf {
    let mut path = OsString::from(root.as_os_str());
    path.push(TEMP_DIR_SUFFIX);
    PathBuf::from(path)
}

struct TempDirGuard {
    path: PathBuf,
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if fs::remove_dir_all(&self.path).is_err() {
                warn!("could not remove temporary folder {:?}", self.path);
            } else {
                trace!("{:?} temporary folder removed", self.path);
            }
        }
    }
}

/// Content-keyed hash memo so reruns over a large tile library skip the
/// decode + hash pass for unchanged files. Purely an optimization: load and
/// store failures are ignored.
#[derive(Default, Serialize, Deserialize)]
struct HashCache {
    entries: HashMap<String, u128>,
}

impl HashCache {
    fn load(root: &Path) -> HashCache {
        fs::read(root.join(HASH_CACHE_FILE))
            .ok()
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
            .unwrap_or_default()
    }

    fn merged(mut self, fresh: HashMap<String, u128>) -> HashCache {
        self.entries.extend(fresh);
        self
    }

    fn store(&self, root: &Path) {
        let Ok(bytes) = bincode::serialize(self) else {
            return;
        };
        if fs::write(root.join(HASH_CACHE_FILE), bytes).is_err() {
            warn!("could not update the tile hash cache in {:?}", root);
        }
    }
}
