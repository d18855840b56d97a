use super::image::{Image, Rect};

/// Blocks per axis in a descriptor.
pub const FEATURE_DIV: usize = 4;
/// Descriptor length: mean B, G, R for each of the 4x4 blocks.
pub const NB_FEATURES: usize = 3 * FEATURE_DIV * FEATURE_DIV;

pub type Features = [f64; NB_FEATURES];

/// Reduce `rect` to its 48-value color descriptor: the region is cut into a
/// 4x4 grid of blocks (the last row and column absorb the remainder) and each
/// block contributes its mean BGR triple. Every value stays in [0, 255].
pub fn compute(img: &Image, rect: Rect) -> Features {
    assert!(rect.fits_in(img.width(), img.height()));
    let block_w = (rect.w as usize).div_ceil(FEATURE_DIV);
    let block_h = (rect.h as usize).div_ceil(FEATURE_DIV);

    let mut sums = [0f64; NB_FEATURES];
    let mut counts = [0u32; FEATURE_DIV * FEATURE_DIV];
    for i in 0..rect.h {
        for j in 0..rect.w {
            let block =
                FEATURE_DIV * (i as usize / block_h) + j as usize / block_w;
            let px = img.pixel(rect.x + j, rect.y + i);
            for c in 0..3 {
                sums[3 * block + c] += f64::from(px[c]);
            }
            counts[block] += 1;
        }
    }
    for (block, &count) in counts.iter().enumerate() {
        if count > 0 {
            for c in 0..3 {
                sums[3 * block + c] /= f64::from(count);
            }
        }
    }
    sums
}

/// Perceptual distance between two descriptors: a red-mean weighted deltaE
/// summed over the blocks. Symmetric and non-negative but not a metric; used
/// as the matching cost.
pub fn distance(a: &Features, b: &Features) -> f64 {
    let mut sum = 0.0;
    for i in (0..NB_FEATURES).step_by(3) {
        let db = a[i] - b[i];
        let dg = a[i + 1] - b[i + 1];
        let dr = a[i + 2] - b[i + 2];
        let mean_r = (a[i + 2] + b[i + 2]) / 2.0;
        let sq = (2.0 + mean_r / 256.0) * dr * dr
            + 4.0 * dg * dg
            + (2.0 + (255.0 - mean_r) / 256.0) * db * db;
        sum += sq.sqrt();
    }
    sum
}
