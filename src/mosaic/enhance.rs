use super::gmm::{Component, GaussianMixture};
use super::image::{Image, Rect};

/// Wasserstein-1 distance above which the enhancer tries to reshape the
/// target distribution before building the color map.
pub const W1_DIST_TARGET: f64 = 30.0;

const MAX_COMPONENTS: usize = 10;
const MAX_FIT_ITER: usize = 1000;
const CONVERGENCE_TOL: f64 = 1e-3;
const STD_DEV_MAX: f64 = 128.0;
const STD_DEV_INCR: f64 = 2.0;
const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// Per-channel cumulative distribution over 8-bit intensities.
/// `cdf[c][k]` is the fraction of pixels with value <= k; each channel is
/// non-decreasing and ends at exactly 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Cdf([[f64; 256]; 3]);

impl Cdf {
    pub fn from_region(img: &Image, rect: Rect) -> Cdf {
        assert!(rect.fits_in(img.width(), img.height()));
        let mut counts = [[0u64; 256]; 3];
        for i in 0..rect.h {
            for j in 0..rect.w {
                let px = img.pixel(rect.x + j, rect.y + i);
                for c in 0..3 {
                    counts[c][px[c] as usize] += 1;
                }
            }
        }
        let nb_pixels = (rect.w as u64 * rect.h as u64) as f64;
        let mut data = [[0f64; 256]; 3];
        for c in 0..3 {
            let mut acc = 0u64;
            for k in 0..256 {
                acc += counts[c][k];
                data[c][k] = acc as f64 / nb_pixels;
            }
            data[c][255] = 1.0;
        }
        Cdf(data)
    }

    pub fn from_image(img: &Image) -> Cdf {
        Cdf::from_region(img, img.full_rect())
    }

    pub fn channel(&self, c: usize) -> &[f64; 256] {
        &self.0[c]
    }

    /// L1 norm between the two tables, summed over channels.
    pub fn w1_distance(&self, other: &Cdf) -> f64 {
        let mut distance = 0.0;
        for c in 0..3 {
            for k in 0..256 {
                distance += (self.0[c][k] - other.0[c][k]).abs();
            }
        }
        distance
    }
}

/// Per-channel intensity counts for a region; feeds the mixture fit.
fn channel_histograms(img: &Image, rect: Rect) -> [[u64; 256]; 3] {
    let mut counts = [[0u64; 256]; 3];
    for i in 0..rect.h {
        for j in 0..rect.w {
            let px = img.pixel(rect.x + j, rect.y + i);
            for c in 0..3 {
                counts[c][px[c] as usize] += 1;
            }
        }
    }
    counts
}

/// Histogram transport for one mosaic cell: maps each tile intensity to the
/// reference region's matching quantile, attenuated for tiles whose natural
/// distribution is far from the target.
pub struct ColorEnhancer {
    map: [[u8; 256]; 3],
    w1: f64,
}

impl ColorEnhancer {
    /// `region` addresses the reference area the tile will cover; `tile` is
    /// the exported tile about to be stamped there.
    pub fn new(reference: &Image, region: Rect, tile: &Image) -> ColorEnhancer {
        let mut target = Cdf::from_region(reference, region);
        let tile_cdf = Cdf::from_image(tile);

        let mut w1 = target.w1_distance(&tile_cdf);
        if w1 > W1_DIST_TARGET {
            // The straight transport would overreach; try to trade the exact
            // target distribution for the nearest attainable one.
            if let Some(components) = fit_channel_mixtures(reference, region, tile) {
                if let Some(reshaped) = reshape_target(&components, &tile_cdf) {
                    target = reshaped;
                    w1 = target.w1_distance(&tile_cdf);
                }
            }
        }

        let mut map = [[0u8; 256]; 3];
        for c in 0..3 {
            let mut optimal = 0usize;
            for k in 0..256 {
                let probability = tile_cdf.channel(c)[k];
                while optimal < 255 && probability > target.channel(c)[optimal] {
                    optimal += 1;
                }
                map[c][k] = optimal as u8;
            }
        }

        ColorEnhancer { map, w1 }
    }

    pub fn map_value(&self, channel: usize, value: u8) -> u8 {
        self.map[channel][value as usize]
    }

    /// Transport `value` toward the target distribution. Close matches get
    /// the full requested blending; distant ones are attenuated so the
    /// output never leaves the [value, mapped] interval.
    pub fn apply(&self, value: u8, channel: usize, blending: f64) -> u8 {
        let b_eff = if self.w1 > 0.0 {
            (blending * W1_DIST_TARGET / self.w1).min(1.0)
        } else {
            blending
        };
        let mapped = f64::from(self.map[channel][value as usize]);
        (b_eff * mapped + (1.0 - b_eff) * f64::from(value)).round() as u8
    }
}

/// One mixture per channel, fit on the pooled histogram of the tile and the
/// reference region. `None` when any channel fails to fit.
fn fit_channel_mixtures(
    reference: &Image,
    region: Rect,
    tile: &Image,
) -> Option<[Vec<Component>; 3]> {
    let mut tile_counts = channel_histograms(tile, tile.full_rect());
    let region_counts = channel_histograms(reference, region);
    for c in 0..3 {
        for k in 0..256 {
            tile_counts[c][k] += region_counts[c][k];
        }
    }

    let mut mixtures: [Vec<Component>; 3] = Default::default();
    for c in 0..3 {
        let mut gmm = GaussianMixture::new(
            CONVERGENCE_TOL,
            MAX_FIT_ITER,
            CONVERGENCE_TOL,
            MAX_FIT_ITER,
            true,
        );
        gmm.set_histogram(
            tile_counts[c]
                .iter()
                .enumerate()
                .map(|(value, &count)| (value as i32, count)),
        );
        mixtures[c] = gmm.fit_best(MAX_COMPONENTS)?;
    }
    Some(mixtures)
}

fn gaussian_cdf(x: f64, component: &Component, var_scale: f64) -> f64 {
    0.5 * (1.0 + erf((x - component.mean) / (2.0 * component.variance * var_scale).sqrt()))
        * component.weight
}

fn mixture_cdf(x: f64, components: &[Component], var_scale: f64) -> f64 {
    components
        .iter()
        .map(|c| gaussian_cdf(x, c, var_scale))
        .sum()
}

/// Evaluate the variance-scaled mixture CDF, renormalized over [0, 255] and
/// bound-adjusted against the tile CDF's endpoint masses so the table stays a
/// valid distribution the transport can reach.
fn scaled_cdf(
    components: &[Vec<Component>; 3],
    var_scale: f64,
    start_constraint: &[f64; 3],
    end_constraint: &[f64; 3],
) -> Cdf {
    let mut data = [[0f64; 256]; 3];
    for c in 0..3 {
        let tail = mixture_cdf(255.0, &components[c], var_scale);
        for k in 0..255 {
            data[c][k] = mixture_cdf(k as f64, &components[c], var_scale) / tail;
        }
        data[c][255] = 1.0;

        let mut min = 0.0;
        let mut max = 1.0;
        if start_constraint[c] < data[c][0] {
            min = data[c][0] - start_constraint[c];
        }
        let last_step = data[c][255] - data[c][254];
        if end_constraint[c] > last_step {
            max = 1.0 - (end_constraint[c] - last_step);
        }
        let scale = max - min;
        if scale < 1.0 {
            for value in data[c].iter_mut() {
                *value = ((*value - min) / scale).min(1.0);
            }
        }
    }
    Cdf(data)
}

/// Search the variance scale whose reshaped CDF sits closest to the tile
/// distribution at exactly the target distance: coarse scan in standard
/// deviation steps to bracket the minimum, then golden-section refinement.
/// `None` when the scan never brackets (reshape is skipped, not fatal).
fn reshape_target(components: &[Vec<Component>; 3], tile_cdf: &Cdf) -> Option<Cdf> {
    let mut start_constraint = [0f64; 3];
    let mut end_constraint = [0f64; 3];
    let mut var_mean = 0.0;
    for c in 0..3 {
        start_constraint[c] = tile_cdf.channel(c)[0];
        end_constraint[c] = tile_cdf.channel(c)[255] - tile_cdf.channel(c)[254];
        for component in &components[c] {
            var_mean += component.variance * component.weight;
        }
    }
    var_mean /= 3.0;
    let std_dev_mean = var_mean.sqrt();

    let distance = |var_scale: f64| {
        let cdf = scaled_cdf(components, var_scale, &start_constraint, &end_constraint);
        (cdf.w1_distance(tile_cdf) - W1_DIST_TARGET).abs()
    };

    let nb_steps = ((STD_DEV_MAX - std_dev_mean) / STD_DEV_INCR) as i32;
    let mut x_min = -1.0;
    let mut x_mid = -1.0;
    let mut x_max = -1.0;
    let mut dist_mid = f64::MAX;
    let mut bracketed = false;
    for step in 0..nb_steps {
        let std_dev = std_dev_mean + f64::from(step) * STD_DEV_INCR;
        x_max = std_dev * std_dev / var_mean;
        let dist_max = distance(x_max);
        if dist_max > dist_mid {
            bracketed = true;
            break;
        }
        x_min = x_mid;
        x_mid = x_max;
        dist_mid = dist_max;
    }
    if !bracketed {
        return None;
    }
    if x_min < 0.0 {
        x_min = x_mid;
    }

    let (mut lo, mut hi) = (x_min, x_max);
    while hi - lo > CONVERGENCE_TOL {
        let x0 = hi - (hi - lo) / GOLDEN_RATIO;
        let x1 = lo + (hi - lo) / GOLDEN_RATIO;
        if distance(x0) < distance(x1) {
            hi = x1;
        } else {
            lo = x0;
        }
    }

    Some(scaled_cdf(
        components,
        (lo + hi) * 0.5,
        &start_constraint,
        &end_constraint,
    ))
}

/// Abramowitz & Stegun 7.1.26 rational approximation; absolute error below
/// 1.5e-7 which is far inside the transport's quantization.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(w: u32, h: u32, bgr: [u8; 3]) -> Image {
        let mut img = Image::new(w, h);
        for px in img.data_mut().chunks_exact_mut(3) {
            px.copy_from_slice(&bgr);
        }
        img
    }

    fn gradient(w: u32, h: u32) -> Image {
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let v = ((x + y * w) % 256) as u8;
                img.put_pixel(x, y, [v, v.wrapping_add(40), v.wrapping_add(90)]);
            }
        }
        img
    }

    #[test]
    fn test_cdf_is_monotone_and_ends_at_one() {
        let img = gradient(32, 32);
        let cdf = Cdf::from_image(&img);
        for c in 0..3 {
            let channel = cdf.channel(c);
            for k in 1..256 {
                assert!(channel[k] >= channel[k - 1]);
            }
            assert_eq!(channel[255], 1.0);
        }
    }

    #[test]
    fn test_w1_distance_of_identical_regions_is_zero() {
        let img = gradient(16, 16);
        let cdf = Cdf::from_image(&img);
        assert_eq!(cdf.w1_distance(&cdf.clone()), 0.0);
    }

    #[test]
    fn test_matching_distributions_give_identity_map() {
        // Region and tile share one distribution: W1 = 0, the map is the
        // identity, and the enhancer is a no-op for every blending level.
        let region = filled(64, 64, [128, 128, 128]);
        let tile = filled(64, 64, [128, 128, 128]);
        let enhancer = ColorEnhancer::new(&region, region.full_rect(), &tile);
        for c in 0..3 {
            assert_eq!(enhancer.map_value(c, 128), 128);
        }
        for blending in [0.0, 0.3, 1.0] {
            assert_eq!(enhancer.apply(128, 0, blending), 128);
        }
    }

    #[test]
    fn test_identity_map_on_equal_gradients() {
        let img = gradient(32, 32);
        let enhancer = ColorEnhancer::new(&img, img.full_rect(), &img);
        for c in 0..3 {
            for v in 0..=255u8 {
                assert_eq!(enhancer.map_value(c, v), v, "channel {c} value {v}");
            }
        }
    }

    #[test]
    fn test_transport_maps_toward_target_quantiles() {
        let region = filled(32, 32, [200, 200, 200]);
        let tile = filled(32, 32, [195, 195, 195]);
        let enhancer = ColorEnhancer::new(&region, region.full_rect(), &tile);
        // W1 = 5 * 3 channels / 256ths... small enough to skip the reshape;
        // full blending must land exactly on the region value.
        assert_eq!(enhancer.apply(195, 0, 1.0), 200);
        assert_eq!(enhancer.apply(195, 0, 0.0), 195);
    }

    #[test]
    fn test_blending_attenuation_bound() {
        let region = gradient(24, 24);
        let tile = filled(24, 24, [40, 90, 160]);
        let enhancer = ColorEnhancer::new(&region, region.full_rect(), &tile);
        for c in 0..3 {
            for v in [0u8, 40, 90, 160, 255] {
                for blending in [0.0, 0.25, 0.5, 1.0] {
                    let out = enhancer.apply(v, c, blending);
                    let mapped = enhancer.map_value(c, v);
                    assert!(out >= v.min(mapped) && out <= v.max(mapped));
                }
            }
        }
    }

    #[test]
    fn test_erf_reference_values() {
        assert!((erf(0.0)).abs() < 1e-12);
        assert!((erf(1.0) - 0.8427007929).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427007929).abs() < 1e-6);
        assert!((erf(3.0) - 0.9999779095).abs() < 1e-6);
    }

    #[test]
    fn test_scaled_cdf_is_a_valid_distribution() {
        let components = [
            vec![Component {
                mean: 60.0,
                variance: 100.0,
                weight: 0.5,
            },
            Component {
                mean: 180.0,
                variance: 150.0,
                weight: 0.5,
            }],
            vec![Component {
                mean: 128.0,
                variance: 200.0,
                weight: 1.0,
            }],
            vec![Component {
                mean: 90.0,
                variance: 50.0,
                weight: 1.0,
            }],
        ];
        let start = [0.01, 0.0, 0.02];
        let end = [0.01, 0.005, 0.0];
        for var_scale in [0.5, 1.0, 2.5] {
            let cdf = scaled_cdf(&components, var_scale, &start, &end);
            for c in 0..3 {
                let channel = cdf.channel(c);
                assert_eq!(channel[255], 1.0);
                for k in 1..256 {
                    assert!(channel[k] + 1e-12 >= channel[k - 1]);
                }
            }
        }
    }
}
