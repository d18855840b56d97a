use std::ffi::OsStr;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ::image::codecs::jpeg::JpegEncoder;
use ::image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use ::image::{imageops, ExtendedColorType, ImageEncoder, RgbImage};
use exif::{In, Tag};

use super::error::{MosaicError, Result};

/// Extensions accepted when scanning a tile directory.
pub const TILE_EXTENSIONS: [&str; 15] = [
    "bmp", "dib", "jpeg", "jpg", "jpe", "jp2", "png", "webp", "pbm", "pgm", "ppm", "pxm", "pnm",
    "tiff", "tif",
];

/// Sub-rectangle of an image: `x + w` and `y + h` must stay within the owning
/// image's bounds for every operation that takes a `Rect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Rect {
        Rect { x, y, w, h }
    }

    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.w > 0
            && self.h > 0
            && self.x.checked_add(self.w).is_some_and(|r| r <= width)
            && self.y.checked_add(self.h).is_some_and(|b| b <= height)
    }
}

/// Dense row-major 8-bit pixel buffer in BGR channel order. The channel order
/// is part of the invariant: every consumer indexes blue first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Image {
        Image {
            data: vec![0; width as usize * height as usize * 3],
            width,
            height,
        }
    }

    pub fn from_bgr_data(data: Vec<u8>, width: u32, height: u32) -> Image {
        assert_eq!(data.len(), width as usize * height as usize * 3);
        Image {
            data,
            width,
            height,
        }
    }

    pub fn from_rgb8(img: RgbImage) -> Image {
        let (width, height) = img.dimensions();
        let mut data = img.into_raw();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Image {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        assert!(x < self.width && y < self.height);
        let p = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[p], self.data[p + 1], self.data[p + 2]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        assert!(x < self.width && y < self.height);
        let p = (y as usize * self.width as usize + x as usize) * 3;
        self.data[p..p + 3].copy_from_slice(&bgr);
    }

    /// Copy of the pixels inside `rect`.
    pub fn crop(&self, rect: Rect) -> Image {
        assert!(rect.fits_in(self.width, self.height));
        let mut out = Image::new(rect.w, rect.h);
        out.copy_from(self, rect, 0, 0);
        out
    }

    /// Copy `src_rect` of `src` into this image with its top-left corner at
    /// `(dst_x, dst_y)`.
    pub fn copy_from(&mut self, src: &Image, src_rect: Rect, dst_x: u32, dst_y: u32) {
        assert!(src_rect.fits_in(src.width, src.height));
        assert!(dst_x + src_rect.w <= self.width && dst_y + src_rect.h <= self.height);
        let src_stride = src.width as usize * 3;
        let dst_stride = self.width as usize * 3;
        let row_bytes = src_rect.w as usize * 3;
        for i in 0..src_rect.h as usize {
            let sp = (src_rect.y as usize + i) * src_stride + src_rect.x as usize * 3;
            let dp = (dst_y as usize + i) * dst_stride + dst_x as usize * 3;
            self.data[dp..dp + row_bytes].copy_from_slice(&src.data[sp..sp + row_bytes]);
        }
    }

    /// Single-channel plane with the Rec.601 luma weights.
    pub fn luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| {
                (f64::from(px[0]) * 0.114 + f64::from(px[1]) * 0.587 + f64::from(px[2]) * 0.299)
                    .round() as u8
            })
            .collect()
    }

    fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        for px in bytes.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        bytes
    }

    pub fn encode_png(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path).map_err(|e| MosaicError::io(path, e))?;
        // Compression speed over size: exported tiles are throwaway files the
        // composer reads straight back.
        let encoder =
            PngEncoder::new_with_quality(file, CompressionType::Fast, PngFilter::NoFilter);
        encoder
            .write_image(
                &self.to_rgb_bytes(),
                self.width,
                self.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| MosaicError::image(path, e))
    }

    pub fn encode_jpeg(&self, path: &Path, quality: u8) -> Result<()> {
        let file = fs::File::create(path).map_err(|e| MosaicError::io(path, e))?;
        let encoder = JpegEncoder::new_with_quality(file, quality);
        encoder
            .write_image(
                &self.to_rgb_bytes(),
                self.width,
                self.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| MosaicError::image(path, e))
    }
}

pub fn decode(path: &Path) -> Result<Image> {
    let img = ::image::open(path).map_err(|e| MosaicError::image(path, e))?;
    Ok(Image::from_rgb8(img.into_rgb8()))
}

/// Decode honoring the EXIF orientation tag, so sideways phone shots crop the
/// way the photographer saw them.
pub fn decode_oriented(path: &Path) -> Result<Image> {
    let img = ::image::open(path).map_err(|e| MosaicError::image(path, e))?;
    Ok(Image::from_rgb8(orient(
        img.into_rgb8(),
        exif_orientation(path),
    )))
}

fn exif_orientation(path: &Path) -> u32 {
    let Ok(file) = fs::File::open(path) else {
        return 1;
    };
    let mut reader = BufReader::new(file);
    exif::Reader::new()
        .read_from_container(&mut reader)
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .filter(|v| (1..=8).contains(v))
        .unwrap_or(1)
}

fn orient(img: RgbImage, orientation: u32) -> RgbImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

/// Recursively collect every file under `root` with a recognized image
/// extension, skipping the directory `skip` (the catalog's temp export dir).
/// The result is sorted so enumeration order is stable across runs.
pub fn find_images(root: &Path, skip: &Path) -> Result<Vec<PathBuf>> {
    let mut stack: Vec<PathBuf> = vec![root.to_owned()];
    let mut images = vec![];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| MosaicError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| MosaicError::io(&dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                if path != skip {
                    stack.push(path);
                }
            } else if has_tile_extension(&path) {
                images.push(path);
            }
        }
    }
    images.sort();
    Ok(images)
}

fn has_tile_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| TILE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::Rgb;

    #[test]
    fn test_rect_bounds() {
        assert!(Rect::new(0, 0, 4, 4).fits_in(4, 4));
        assert!(Rect::new(1, 1, 3, 3).fits_in(4, 4));
        assert!(!Rect::new(1, 1, 4, 3).fits_in(4, 4));
        assert!(!Rect::new(0, 0, 0, 4).fits_in(4, 4));
        assert!(!Rect::new(u32::MAX, 0, 2, 2).fits_in(4, 4));
    }

    #[test]
    fn test_bgr_channel_order() {
        let rgb = RgbImage::from_pixel(1, 1, Rgb([10, 20, 30]));
        let img = Image::from_rgb8(rgb);
        assert_eq!(img.pixel(0, 0), [30, 20, 10]);
    }

    #[test]
    fn test_luma_rec601() {
        let mut img = Image::new(1, 1);
        img.put_pixel(0, 0, [100, 150, 200]);
        let expected = (100.0 * 0.114 + 150.0 * 0.587 + 200.0 * 0.299_f64).round() as u8;
        assert_eq!(img.luma(), vec![expected]);
    }

    #[test]
    fn test_crop_and_copy() {
        let mut img = Image::new(4, 4);
        img.put_pixel(2, 1, [1, 2, 3]);
        let cropped = img.crop(Rect::new(2, 1, 2, 2));
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.pixel(0, 0), [1, 2, 3]);

        let mut canvas = Image::new(8, 8);
        canvas.copy_from(&cropped, cropped.full_rect(), 6, 6);
        assert_eq!(canvas.pixel(6, 6), [1, 2, 3]);
    }

    #[test]
    fn test_png_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        let mut img = Image::new(3, 2);
        img.put_pixel(1, 1, [7, 8, 9]);
        img.encode_png(&path).unwrap();
        let back = decode(&path).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_find_images_skips_temp_and_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("nested")).unwrap();
        fs::create_dir(root.join("PMG_temp")).unwrap();
        fs::write(root.join("a.JPG"), b"x").unwrap();
        fs::write(root.join("nested/b.png"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join("PMG_temp/c.png"), b"x").unwrap();

        let found = find_images(root, &root.join("PMG_temp")).unwrap();
        assert_eq!(
            found,
            vec![root.join("a.JPG"), root.join("nested/b.png")]
        );
    }
}
