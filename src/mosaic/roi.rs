use super::error::Result;
use super::image::Image;
use super::resample::{resample, Filter};

/// Detector input is normalized so the longer edge matches this.
pub const DETECTION_SIZE: u32 = 640;

const MIN_CROPPED_RATIO: f64 = 0.9;
const HIGH_CONFIDENCE: f32 = 0.8;
const LOW_CONFIDENCE: f32 = 0.5;
const FACE_BOX_TOLERANCE: f64 = 0.2;

/// One face bounding box in detector-input coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub confidence: f32,
}

/// Pluggable face detector. Implementations hold per-thread state: the
/// catalog creates one instance per worker and never shares them.
pub trait FaceDetector {
    fn set_input_size(&mut self, width: u32, height: u32);
    fn detect(&mut self, image: &Image) -> Vec<Detection>;
}

/// Detector used when no face model is wired in: every tile gets the default
/// framing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledDetector;

impl FaceDetector for DisabledDetector {
    fn set_input_size(&mut self, _width: u32, _height: u32) {}

    fn detect(&mut self, _image: &Image) -> Vec<Detection> {
        Vec::new()
    }
}

/// Choose where to place a `crop_w` x `crop_h` crop inside `image`. The crop
/// spans the full image on one axis; `row_search` selects which axis is free
/// (true: free along y). When the crop already covers at least 90% of the
/// search axis the centered default wins without running the detector;
/// otherwise the crop is centered on the detected faces when a confident,
/// tight enough cluster exists.
pub fn find_roi(
    image: &Image,
    crop_w: u32,
    crop_h: u32,
    row_search: bool,
    detector: &mut dyn FaceDetector,
) -> Result<(u32, u32)> {
    debug_assert!(crop_w <= image.width() && crop_h <= image.height());

    let cropped_ratio = if row_search {
        f64::from(crop_h) / f64::from(image.height())
    } else {
        f64::from(crop_w) / f64::from(image.width())
    };

    if cropped_ratio < MIN_CROPPED_RATIO {
        let longest = image.width().max(image.height());
        let scale = f64::from(DETECTION_SIZE) / f64::from(longest);
        let scale_inv = f64::from(longest) / f64::from(DETECTION_SIZE);
        let sw = (f64::from(image.width()) * scale).round() as u32;
        let sh = (f64::from(image.height()) * scale).round() as u32;
        let small = resample(image, image.full_rect(), sw, sh, Filter::Area)?;
        detector.set_input_size(sw, sh);
        let faces = detector.detect(&small);
        if !faces.is_empty() {
            if let Some(position) =
                detection_roi(image, &faces, crop_w, crop_h, scale_inv, row_search)
            {
                return Ok(position);
            }
        }
    }

    Ok(default_roi(image, crop_w, crop_h, row_search))
}

/// Center the crop on the largest prefix of faces (ordered by proximity to
/// the image midline) whose bounding box fits the crop within tolerance.
fn detection_roi(
    image: &Image,
    faces: &[Detection],
    crop_w: u32,
    crop_h: u32,
    scale_inv: f64,
    row_search: bool,
) -> Option<(u32, u32)> {
    let min_confidence = if faces.iter().any(|f| f.confidence >= HIGH_CONFIDENCE) {
        HIGH_CONFIDENCE
    } else {
        LOW_CONFIDENCE
    };

    let mut boxes: Vec<(f64, f64, f64, f64)> = faces
        .iter()
        .filter(|f| f.confidence >= min_confidence)
        .map(|f| {
            (
                f.x * scale_inv,
                f.y * scale_inv,
                f.w * scale_inv,
                f.h * scale_inv,
            )
        })
        .collect();
    if boxes.is_empty() {
        return None;
    }

    let midline = if row_search {
        f64::from(image.height()) * 0.5
    } else {
        f64::from(image.width()) * 0.5
    };
    boxes.sort_by(|lhs, rhs| {
        let center = |b: &(f64, f64, f64, f64)| {
            if row_search {
                b.1 + b.3 * 0.5
            } else {
                b.0 + b.2 * 0.5
            }
        };
        (midline - center(lhs))
            .abs()
            .total_cmp(&(midline - center(rhs)).abs())
    });

    for nb_faces in (1..=boxes.len()).rev() {
        let subset = &boxes[..nb_faces];
        let min_x = subset.iter().map(|b| b.0).fold(f64::MAX, f64::min);
        let max_x = subset.iter().map(|b| b.0 + b.2).fold(f64::MIN, f64::max);
        let min_y = subset.iter().map(|b| b.1).fold(f64::MAX, f64::min);
        let max_y = subset.iter().map(|b| b.1 + b.3).fold(f64::MIN, f64::max);

        if row_search {
            if boxes.len() == 1
                || max_y - min_y <= f64::from(crop_h) * (1.0 + FACE_BOX_TOLERANCE)
            {
                let y = ((max_y + min_y - f64::from(crop_h)) / 2.0)
                    .clamp(0.0, f64::from(image.height() - crop_h));
                return Some((0, y as u32));
            }
        } else if boxes.len() == 1
            || max_x - min_x <= f64::from(crop_w) * (1.0 + FACE_BOX_TOLERANCE)
        {
            let x = ((max_x + min_x - f64::from(crop_w)) / 2.0)
                .clamp(0.0, f64::from(image.width() - crop_w));
            return Some((x as u32, 0));
        }
    }

    None
}

fn default_roi(image: &Image, crop_w: u32, crop_h: u32, row_search: bool) -> (u32, u32) {
    let x = (image.width() - crop_w) / 2;
    // Column-searched (portrait-shaped) crops sit at the upper third, where
    // the subject usually is.
    let y = if row_search {
        (image.height() - crop_h) / 2
    } else {
        (image.height() - crop_h) / 3
    };
    (x, y)
}
