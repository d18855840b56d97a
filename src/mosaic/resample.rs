use super::error::{MosaicError, Result};
use super::image::{Image, Rect};

// Coefficients are quantized to integer fixed point so accumulation over u8
// pixels stays exact and branch-free. 8 bits of pixel and 2 guard bits leave
// 22 precision bits in a 32-bit budget.
const PRECISION_BITS: u32 = 32 - 8 - 2;
const PRECISION_SHIFT: f64 = (1u32 << PRECISION_BITS) as f64;
const PIXEL_INIT: i64 = 1 << (PRECISION_BITS - 1);

const BLUR_BOXES: usize = 3;

/// Sampling filters for [`resample`]. Support grows with the reconstruction
/// quality: exact fractional coverage, Keys cubic, windowed sinc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Area,
    Bicubic,
    Lanczos,
}

impl Filter {
    fn support(self) -> f64 {
        match self {
            Filter::Area => 1.0,
            Filter::Bicubic => 2.0,
            Filter::Lanczos => 3.0,
        }
    }

    /// Kernel weight for the source tap at `x_pos`, for an output pixel
    /// mapped to `center`. `scale` is the kernel stretch, already clamped
    /// to >= 1 so upscales keep the unit kernel.
    fn eval(self, x_pos: f64, center: f64, scale: f64) -> f64 {
        match self {
            Filter::Area => {
                let min_val = center - scale * 0.5;
                let max_val = center + scale * 0.5;
                let min_pos = min_val.ceil();
                let max_pos = max_val.floor();
                if min_pos <= x_pos && x_pos <= max_pos {
                    1.0
                } else if min_pos - 1.0 <= x_pos && x_pos <= min_pos {
                    min_pos - min_val
                } else if max_pos <= x_pos && x_pos <= max_pos + 1.0 {
                    max_val - max_pos
                } else {
                    0.0
                }
            }
            Filter::Bicubic => {
                const A: f64 = -0.5;
                let x = ((x_pos - center) / scale).abs();
                if x < 1.0 {
                    ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
                } else if x < 2.0 {
                    (((x - 5.0) * x + 8.0) * x - 4.0) * A
                } else {
                    0.0
                }
            }
            Filter::Lanczos => {
                const A: f64 = 3.0;
                let x = (x_pos - center) / scale;
                if (-A..A).contains(&x) {
                    sinc(x) * sinc(x / A)
                } else {
                    0.0
                }
            }
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    let x = x * std::f64::consts::PI;
    x.sin() / x
}

/// Precomputed filter windows for one axis: per output pixel the first source
/// tap, the tap count, and `stride` fixed-point coefficients.
struct Taps {
    stride: usize,
    coeffs: Vec<i64>,
    bounds: Vec<(usize, usize)>,
}

/// Build the coefficient windows mapping source span `[min, max)` onto
/// `out_size` output pixels. The support is truncated at the *image* bounds
/// `[0, in_size)` (not the span), and each window is re-normalized to sum to
/// one before quantization; there is no mirroring at edges.
fn compute_taps(in_size: u32, out_size: u32, min: u32, max: u32, filter: Filter) -> Taps {
    let scale = f64::from(max - min) / f64::from(out_size);
    let kernel_scale = scale.max(1.0);
    let support = filter.support() * kernel_scale;
    let stride = support.ceil() as usize * 2 + 1;

    let mut coeffs = vec![0i64; out_size as usize * stride];
    let mut bounds = Vec::with_capacity(out_size as usize);
    let mut window = vec![0f64; stride];

    for x_out in 0..out_size as usize {
        let center = f64::from(min) + (x_out as f64 + 0.5) * scale;
        let lo = ((center - support + 0.5) as i64).max(0) as usize;
        let hi = ((center + support + 0.5) as i64).min(i64::from(in_size)) as usize;
        let count = hi.saturating_sub(lo);

        let mut sum = 0.0;
        for (k, w) in window[..count].iter_mut().enumerate() {
            *w = filter.eval((lo + k) as f64 + 0.5, center, kernel_scale);
            sum += *w;
        }
        if sum != 0.0 {
            let inv = 1.0 / sum;
            let taps = &mut coeffs[x_out * stride..][..count];
            for (k, w) in window[..count].iter().enumerate() {
                taps[k] = (w * inv * PRECISION_SHIFT).round() as i64;
            }
        }
        bounds.push((lo, count));
    }

    Taps {
        stride,
        coeffs,
        bounds,
    }
}

/// Horizontal pass. Source rows `row_offset .. row_offset + out_height` of
/// `input` (which is `in_width` pixels wide) produce output rows
/// `0 .. out_height` of width `out_width`.
fn resample_rows<const C: usize>(
    input: &[u8],
    in_width: usize,
    row_offset: usize,
    out_width: usize,
    out_height: usize,
    taps: &Taps,
) -> Vec<u8> {
    let mut out = vec![0u8; out_width * out_height * C];
    for y in 0..out_height {
        let in_row = &input[(y + row_offset) * in_width * C..][..in_width * C];
        let out_row = &mut out[y * out_width * C..][..out_width * C];
        for (x_out, &(lo, count)) in taps.bounds.iter().enumerate() {
            let coeff = &taps.coeffs[x_out * taps.stride..][..count];
            for c in 0..C {
                let mut acc = PIXEL_INIT;
                for (k, &w) in coeff.iter().enumerate() {
                    acc += i64::from(in_row[(lo + k) * C + c]) * w;
                }
                out_row[x_out * C + c] = (acc >> PRECISION_BITS).clamp(0, 255) as u8;
            }
        }
    }
    out
}

/// Vertical pass over an `width`-pixel-wide buffer; the tap bounds index rows
/// of `input` directly.
fn resample_cols<const C: usize>(
    input: &[u8],
    width: usize,
    out_height: usize,
    taps: &Taps,
) -> Vec<u8> {
    let mut out = vec![0u8; width * out_height * C];
    for (y_out, &(lo, count)) in taps.bounds.iter().enumerate().take(out_height) {
        let coeff = &taps.coeffs[y_out * taps.stride..][..count];
        let out_row = &mut out[y_out * width * C..][..width * C];
        for x in 0..width {
            for c in 0..C {
                let mut acc = PIXEL_INIT;
                for (k, &w) in coeff.iter().enumerate() {
                    acc += i64::from(input[((lo + k) * width + x) * C + c]) * w;
                }
                out_row[x * C + c] = (acc >> PRECISION_BITS).clamp(0, 255) as u8;
            }
        }
    }
    out
}

fn copy_rect<const C: usize>(data: &[u8], in_width: usize, rect: Rect) -> Vec<u8> {
    let mut out = Vec::with_capacity(rect.w as usize * rect.h as usize * C);
    for i in 0..rect.h as usize {
        let start = ((rect.y as usize + i) * in_width + rect.x as usize) * C;
        out.extend_from_slice(&data[start..start + rect.w as usize * C]);
    }
    out
}

/// Separable filtered resampling of the `rect` region of a raw `C`-channel
/// plane onto a `dst_w` x `dst_h` plane. Axes whose sizes already match are
/// passed through; when both match this is a plain crop copy.
pub(crate) fn resample_plane<const C: usize>(
    data: &[u8],
    src_w: u32,
    src_h: u32,
    rect: Rect,
    dst_w: u32,
    dst_h: u32,
    filter: Filter,
) -> Result<Vec<u8>> {
    if dst_w == 0 || dst_h == 0 {
        return Err(MosaicError::Geometry(format!(
            "target size {dst_w}x{dst_h} is empty"
        )));
    }
    if !rect.fits_in(src_w, src_h) {
        return Err(MosaicError::Geometry(format!(
            "source rectangle {rect:?} exceeds the {src_w}x{src_h} image"
        )));
    }
    debug_assert_eq!(data.len(), src_w as usize * src_h as usize * C);

    let do_horizontal = dst_w != rect.w;
    let do_vertical = dst_h != rect.h;

    if !do_horizontal && !do_vertical {
        return Ok(copy_rect::<C>(data, src_w as usize, rect));
    }

    let h_taps = do_horizontal.then(|| compute_taps(src_w, dst_w, rect.x, rect.x + rect.w, filter));
    let mut v_taps = do_vertical.then(|| compute_taps(src_h, dst_h, rect.y, rect.y + rect.h, filter));

    if let Some(h_taps) = &h_taps {
        // The horizontal pass only materializes the row band the vertical
        // pass will read.
        let (row_lo, row_hi) = match &v_taps {
            Some(v) => {
                let (last_lo, last_n) = v.bounds[v.bounds.len() - 1];
                (v.bounds[0].0, last_lo + last_n)
            }
            None => (rect.y as usize, (rect.y + rect.h) as usize),
        };
        let mid = resample_rows::<C>(
            data,
            src_w as usize,
            row_lo,
            dst_w as usize,
            row_hi - row_lo,
            h_taps,
        );
        match v_taps.as_mut() {
            Some(v) => {
                for b in v.bounds.iter_mut() {
                    b.0 -= row_lo;
                }
                Ok(resample_cols::<C>(&mid, dst_w as usize, dst_h as usize, v))
            }
            None => Ok(mid),
        }
    } else if let Some(v) = &v_taps {
        // Vertical only. The taps may reach rows outside the rect (support
        // truncation is against the image) but never columns outside it, so
        // slice the column slab out first.
        let slab = copy_rect::<C>(data, src_w as usize, Rect::new(rect.x, 0, rect.w, src_h));
        Ok(resample_cols::<C>(&slab, rect.w as usize, dst_h as usize, v))
    } else {
        unreachable!("at least one axis requires sampling")
    }
}

/// Resample the `rect` region of `src` to a `dst_w` x `dst_h` image.
pub fn resample(src: &Image, rect: Rect, dst_w: u32, dst_h: u32, filter: Filter) -> Result<Image> {
    let data = resample_plane::<3>(
        src.data(),
        src.width(),
        src.height(),
        rect,
        dst_w,
        dst_h,
        filter,
    )?;
    Ok(Image::from_bgr_data(data, dst_w, dst_h))
}

/// Approximate Gaussian blur as three successive box blurs whose radii are
/// chosen so the accumulated variance matches `sigma` (van Vliet / Young).
/// A no-op when the image is too small for the largest box.
pub fn gaussian_blur(img: &mut Image, sigma: f64) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let radii = blur_box_radii(sigma);
    if radii[BLUR_BOXES - 1] > w.min(h) / 2 {
        return;
    }
    let mut buffer = vec![0u8; img.data().len()];
    for radius in radii {
        box_blur_rows(img.data(), &mut buffer, w, h, radius);
        box_blur_cols(&buffer, img.data_mut(), w, h, radius);
    }
}

fn blur_box_radii(sigma: f64) -> [usize; BLUR_BOXES] {
    let n = BLUR_BOXES as f64;
    let ideal = (12.0 * sigma * sigma / n + 1.0).sqrt();
    let mut lower = ideal.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let cutoff = ((12.0 * sigma * sigma
        - n * (lower * lower) as f64
        - 4.0 * n * lower as f64
        - 3.0 * n)
        / (-4.0 * lower as f64 - 4.0))
        .round() as i64;

    let mut radii = [0; BLUR_BOXES];
    for (k, radius) in radii.iter_mut().enumerate() {
        let width = if (k as i64) < cutoff { lower } else { upper };
        *radius = ((width - 1) / 2) as usize;
    }
    radii
}

fn box_blur_rows(src: &[u8], dst: &mut [u8], w: usize, h: usize, radius: usize) {
    let inv = 1.0 / (2 * radius + 1) as f64;
    let r = radius as isize;
    for y in 0..h {
        let row = &src[y * w * 3..][..w * 3];
        let out = &mut dst[y * w * 3..][..w * 3];
        for c in 0..3 {
            let at = |k: isize| i32::from(row[(k.clamp(0, w as isize - 1) as usize) * 3 + c]);
            let mut acc: i32 = (-r..=r).map(at).sum();
            for j in 0..w {
                out[j * 3 + c] = (f64::from(acc) * inv + 0.5) as u8;
                acc += at(j as isize + r + 1) - at(j as isize - r);
            }
        }
    }
}

fn box_blur_cols(src: &[u8], dst: &mut [u8], w: usize, h: usize, radius: usize) {
    let inv = 1.0 / (2 * radius + 1) as f64;
    let r = radius as isize;
    for x in 0..w {
        for c in 0..3 {
            let at = |k: isize| i32::from(src[(k.clamp(0, h as isize - 1) as usize * w + x) * 3 + c]);
            let mut acc: i32 = (-r..=r).map(at).sum();
            for i in 0..h {
                dst[(i * w + x) * 3 + c] = (f64::from(acc) * inv + 0.5) as u8;
                acc += at(i as isize + r + 1) - at(i as isize - r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Image {
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(x, y, [(x * 7 % 256) as u8, (y * 11 % 256) as u8, 128]);
            }
        }
        img
    }

    #[test]
    fn test_identity_resample_is_exact() {
        let img = gradient(16, 12);
        for filter in [Filter::Area, Filter::Bicubic, Filter::Lanczos] {
            let out = resample(&img, img.full_rect(), 16, 12, filter).unwrap();
            assert_eq!(out, img);
        }
    }

    #[test]
    fn test_constant_color_survives_every_filter() {
        let mut img = Image::new(64, 48);
        img.data_mut().iter_mut().for_each(|v| *v = 131);
        for filter in [Filter::Area, Filter::Bicubic, Filter::Lanczos] {
            let out = resample(&img, img.full_rect(), 13, 9, filter).unwrap();
            assert!(
                out.data().iter().all(|&v| v == 131),
                "{filter:?} altered a constant image"
            );
            let up = resample(&img, img.full_rect(), 100, 70, filter).unwrap();
            assert!(up.data().iter().all(|&v| v == 131));
        }
    }

    #[test]
    fn test_area_downscale_averages_blocks() {
        let mut img = Image::new(2, 2);
        img.put_pixel(0, 0, [10, 10, 10]);
        img.put_pixel(1, 0, [20, 20, 20]);
        img.put_pixel(0, 1, [30, 30, 30]);
        img.put_pixel(1, 1, [40, 40, 40]);
        let out = resample(&img, img.full_rect(), 1, 1, Filter::Area).unwrap();
        assert_eq!(out.pixel(0, 0), [25, 25, 25]);
    }

    #[test]
    fn test_rect_resample_matches_crop_when_sizes_agree() {
        let img = gradient(20, 20);
        let rect = Rect::new(3, 5, 8, 6);
        let out = resample(&img, rect, 8, 6, Filter::Lanczos).unwrap();
        assert_eq!(out, img.crop(rect));
    }

    #[test]
    fn test_single_axis_passes() {
        let mut img = Image::new(4, 4);
        img.data_mut().iter_mut().for_each(|v| *v = 77);
        let horizontal = resample(&img, img.full_rect(), 2, 4, Filter::Area).unwrap();
        assert_eq!(horizontal.dimensions(), (2, 4));
        assert!(horizontal.data().iter().all(|&v| v == 77));
        let vertical = resample(&img, img.full_rect(), 4, 2, Filter::Area).unwrap();
        assert_eq!(vertical.dimensions(), (4, 2));
        assert!(vertical.data().iter().all(|&v| v == 77));
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let img = gradient(8, 8);
        assert!(resample(&img, img.full_rect(), 0, 4, Filter::Area).is_err());
        assert!(resample(&img, Rect::new(4, 4, 8, 8), 4, 4, Filter::Area).is_err());
    }

    #[test]
    fn test_gaussian_blur_keeps_constant_image() {
        let mut img = Image::new(32, 32);
        img.data_mut().iter_mut().for_each(|v| *v = 90);
        gaussian_blur(&mut img, 2.0);
        assert!(img.data().iter().all(|&v| v == 90));
    }

    #[test]
    fn test_gaussian_blur_spreads_an_impulse() {
        let mut img = Image::new(33, 33);
        img.put_pixel(16, 16, [255, 255, 255]);
        gaussian_blur(&mut img, 1.5);
        assert!(img.pixel(16, 16)[0] < 255);
        assert!(img.pixel(14, 16)[0] > 0);
    }
}
