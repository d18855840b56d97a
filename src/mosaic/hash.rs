use super::error::Result;
use super::image::Image;
use super::resample::{resample_plane, Filter};

const HASH_SIZE: u32 = 8;
/// Bits in a difference hash: 64 horizontal gradients + 64 vertical ones.
pub const HASH_BITS: u32 = 2 * HASH_SIZE * HASH_SIZE;

/// 128-bit difference hash. The grayscale image is Lanczos-shrunk to 9x8 and
/// each horizontal neighbor pair contributes one of the first 64 bits
/// (set when left < right), then to 8x9 for the vertical pairs in the next
/// 64 bits. Near-duplicate images land within a few bits of each other.
pub fn dhash(img: &Image) -> Result<u128> {
    let gray = img.luma();
    let full = img.full_rect();
    let (w, h) = img.dimensions();

    let mut hash = 0u128;
    let mut bit = 0u32;

    let horizontal = resample_plane::<1>(
        &gray,
        w,
        h,
        full,
        HASH_SIZE + 1,
        HASH_SIZE,
        Filter::Lanczos,
    )?;
    for i in 0..HASH_SIZE as usize {
        for j in 0..HASH_SIZE as usize {
            let row = &horizontal[i * (HASH_SIZE as usize + 1)..];
            if row[j] < row[j + 1] {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }

    let vertical = resample_plane::<1>(
        &gray,
        w,
        h,
        full,
        HASH_SIZE,
        HASH_SIZE + 1,
        Filter::Lanczos,
    )?;
    for i in 0..HASH_SIZE as usize {
        for j in 0..HASH_SIZE as usize {
            if vertical[i * HASH_SIZE as usize + j] < vertical[(i + 1) * HASH_SIZE as usize + j] {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }

    Ok(hash)
}

pub fn distance(a: u128, b: u128) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_ramp() -> Image {
        let mut img = Image::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                let v = (x * 4) as u8;
                img.put_pixel(x, y, [v, v, v]);
            }
        }
        img
    }

    #[test]
    fn test_dhash_is_deterministic() {
        let img = horizontal_ramp();
        assert_eq!(dhash(&img).unwrap(), dhash(&img).unwrap());
    }

    #[test]
    fn test_equal_images_have_zero_distance() {
        let img = horizontal_ramp();
        let other = img.clone();
        assert_eq!(distance(dhash(&img).unwrap(), dhash(&other).unwrap()), 0);
    }

    #[test]
    fn test_horizontal_ramp_sets_exactly_the_gradient_bits() {
        // Strictly increasing along x: every horizontal pair fires, no
        // vertical pair does.
        let hash = dhash(&horizontal_ramp()).unwrap();
        assert_eq!(hash, (1u128 << 64) - 1);
    }

    #[test]
    fn test_inverted_ramp_is_far_away() {
        let img = horizontal_ramp();
        let mut flipped = Image::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                flipped.put_pixel(63 - x, y, img.pixel(x, y));
            }
        }
        let d = distance(dhash(&img).unwrap(), dhash(&flipped).unwrap());
        assert_eq!(d, 64);
    }
}
