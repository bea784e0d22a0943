//! 64-bit perceptual and difference hashes.
//!
//! The perceptual hash is DCT-based: the image is reduced to 32x32
//! grayscale, transformed with a 2-D DCT-II, and the AC coefficients of
//! the low-frequency 8x8 block are thresholded against their median (DC
//! is excluded, so a flat image hashes to zero). Robust to rescaling and
//! recompression. The difference hash compares horizontal neighbor
//! brightness on a 9x8 reduction and survives mild crops.
//!
//! Storage form everywhere is 16-character big-endian hex; LSH band `i` is
//! byte `i` of that big-endian value.

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{PipelineError, Result};

const DCT_SIZE: usize = 32;
const BLOCK: usize = 8;

/// DCT-based 64-bit perceptual hash.
pub fn perceptual_hash(img: &DynamicImage) -> u64 {
    let gray = img
        .resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Triangle)
        .to_luma8();
    let mut pixels = [[0.0f64; DCT_SIZE]; DCT_SIZE];
    for (x, y, pixel) in gray.enumerate_pixels() {
        pixels[y as usize][x as usize] = pixel.0[0] as f64;
    }
    let freq = dct_2d(&pixels);

    let mut low = [0.0f64; BLOCK * BLOCK];
    for row in 0..BLOCK {
        for col in 0..BLOCK {
            low[row * BLOCK + col] = freq[row][col];
        }
    }
    // DC only encodes overall brightness and would swamp the threshold;
    // the median and the bits cover the 63 AC coefficients.
    let mut sorted = [0.0f64; BLOCK * BLOCK - 1];
    sorted.copy_from_slice(&low[1..]);
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[sorted.len() / 2];

    let mut hash = 0u64;
    for (i, value) in low.iter().enumerate().skip(1) {
        if *value > median {
            hash |= 1 << (63 - i);
        }
    }
    hash
}

/// Gradient-based 64-bit difference hash (9x8 reduction, one bit per
/// horizontal neighbor pair).
pub fn difference_hash(img: &DynamicImage) -> u64 {
    let gray = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();
    let mut hash = 0u64;
    let mut bit = 0u32;
    for y in 0..8 {
        for x in 0..8 {
            let left = gray.get_pixel(x, y).0[0];
            let right = gray.get_pixel(x + 1, y).0[0];
            if left < right {
                hash |= 1 << (63 - bit);
            }
            bit += 1;
        }
    }
    hash
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub fn to_hex(hash: u64) -> String {
    hex::encode(hash.to_be_bytes())
}

pub fn from_hex(text: &str) -> Result<u64> {
    let bytes: [u8; 8] = hex::decode(text)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| PipelineError::InvalidArgument(format!("bad hash hex {text:?}")))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Byte `band` of the big-endian hash value, band 0 being the most
/// significant byte.
pub fn band_key(hash: u64, band: usize) -> u8 {
    ((hash >> (56 - band * 8)) & 0xff) as u8
}

fn dct_1d(input: &[f64; DCT_SIZE]) -> [f64; DCT_SIZE] {
    let n = DCT_SIZE as f64;
    let mut out = [0.0f64; DCT_SIZE];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (i, value) in input.iter().enumerate() {
            sum += value
                * (std::f64::consts::PI / n * (i as f64 + 0.5) * k as f64).cos();
        }
        *slot = sum;
    }
    out
}

fn dct_2d(pixels: &[[f64; DCT_SIZE]; DCT_SIZE]) -> [[f64; DCT_SIZE]; DCT_SIZE] {
    let mut rows = [[0.0f64; DCT_SIZE]; DCT_SIZE];
    for (i, row) in pixels.iter().enumerate() {
        rows[i] = dct_1d(row);
    }
    let mut out = [[0.0f64; DCT_SIZE]; DCT_SIZE];
    for col in 0..DCT_SIZE {
        let mut column = [0.0f64; DCT_SIZE];
        for row in 0..DCT_SIZE {
            column[row] = rows[row][col];
        }
        let transformed = dct_1d(&column);
        for row in 0..DCT_SIZE {
            out[row][col] = transformed[row];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    /// 8x8 grid of light/dark cells toggled by `pattern` bits; spreads
    /// energy across the whole low-frequency block.
    fn blocks(width: u32, height: u32, pattern: u64) -> DynamicImage {
        let img = GrayImage::from_fn(width, height, |x, y| {
            let cell = (y * 8 / height) * 8 + x * 8 / width;
            Luma([if pattern >> cell & 1 == 1 { 230 } else { 25 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn hex_round_trip_is_big_endian_16_chars() {
        let hash = 0x0123_4567_89ab_cdefu64;
        let hex = to_hex(hash);
        assert_eq!(hex, "0123456789abcdef");
        assert_eq!(from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn band_keys_are_natural_order_bytes() {
        let hash = 0x0102_0304_0506_0708u64;
        for band in 0..8 {
            assert_eq!(band_key(hash, band), band as u8 + 1);
        }
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming(0, 0), 0);
        assert_eq!(hamming(0, u64::MAX), 64);
        assert_eq!(hamming(0b1010, 0b0110), 2);
    }

    #[test]
    fn constant_image_hashes_to_zero() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
        assert_eq!(perceptual_hash(&img), 0);
        assert_eq!(difference_hash(&img), 0);
    }

    #[test]
    fn phash_survives_rescaling() {
        let original = blocks(64, 48, 0x9d2c_5680_37f0_52e1);
        let rescaled = original.resize_exact(200, 150, FilterType::Lanczos3);
        let a = perceptual_hash(&original);
        let b = perceptual_hash(&rescaled);
        assert!(hamming(a, b) <= 8, "distance {} too large", hamming(a, b));
    }

    #[test]
    fn distinct_content_hashes_apart() {
        let a = perceptual_hash(&blocks(64, 64, 0x9d2c_5680_37f0_52e1));
        let b = perceptual_hash(&blocks(64, 64, 0x1357_9bdf_0246_8ace));
        assert!(hamming(a, b) > 8);
    }

    #[test]
    fn dct_of_constant_signal_concentrates_in_dc() {
        let input = [1.0f64; DCT_SIZE];
        let out = dct_1d(&input);
        assert!((out[0] - DCT_SIZE as f64).abs() < 1e-9);
        for value in &out[1..] {
            assert!(value.abs() < 1e-9);
        }
    }
}
