//! 色空間変換
//!
//! 8bit画像の慣習に従い、各チャネルを 0〜255 の範囲に変換してから
//! 8bit格子に丸め、255 で割って [0, 1] に正規化します。
//!
//! - `lab`: L は 0〜100 を 0〜255 に拡大、a/b は +128 のオフセット
//! - `hsv`: H は 0〜360 を半分にして 0〜180、S/V は 0〜255

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// 前処理後の色空間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Rgb,
    Bgr,
    Grayscale,
    #[default]
    Lab,
    Hsv,
}

impl ColorSpace {
    /// チャネル数
    pub fn channels(self) -> usize {
        match self {
            ColorSpace::Grayscale => 1,
            _ => 3,
        }
    }

    /// RGB画像を [H, W, C] 順の正規化済み配列に変換
    pub fn normalize(self, image: &RgbImage) -> Vec<f32> {
        let channels = self.channels();
        let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize * channels);
        for pixel in image.pixels() {
            let converted = self.convert_pixel(pixel.0);
            for value in &converted[..channels] {
                data.push(quantize(*value) / 255.0);
            }
        }
        data
    }

    /// 1画素を 0〜255 スケールの値に変換（グレースケールは先頭のみ有効）
    fn convert_pixel(self, [r, g, b]: [u8; 3]) -> [f32; 3] {
        let (r, g, b) = (r as f32, g as f32, b as f32);
        match self {
            ColorSpace::Rgb => [r, g, b],
            ColorSpace::Bgr => [b, g, r],
            ColorSpace::Grayscale => [0.299 * r + 0.587 * g + 0.114 * b, 0.0, 0.0],
            ColorSpace::Lab => rgb_to_lab(r / 255.0, g / 255.0, b / 255.0),
            ColorSpace::Hsv => rgb_to_hsv(r, g, b),
        }
    }
}

impl std::fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColorSpace::Rgb => "rgb",
            ColorSpace::Bgr => "bgr",
            ColorSpace::Grayscale => "grayscale",
            ColorSpace::Lab => "lab",
            ColorSpace::Hsv => "hsv",
        };
        write!(f, "{}", name)
    }
}

fn quantize(value: f32) -> f32 {
    value.round().clamp(0.0, 255.0)
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f32) -> f32 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

// D65白色点
fn rgb_to_lab(r: f32, g: f32, b: f32) -> [f32; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / 0.950456;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / 1.088754;

    let l = if y > 0.008856 {
        116.0 * y.cbrt() - 16.0
    } else {
        903.3 * y
    };
    let a = 500.0 * (lab_f(x) - lab_f(y));
    let b = 200.0 * (lab_f(y) - lab_f(z));

    [l * 255.0 / 100.0, a + 128.0, b + 128.0]
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [h / 2.0, s, max]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn single_pixel(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(1, 1, Rgb(rgb))
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_rgb_and_bgr_order() {
        let img = single_pixel([255, 0, 51]);
        assert_close(&ColorSpace::Rgb.normalize(&img), &[1.0, 0.0, 0.2]);
        assert_close(&ColorSpace::Bgr.normalize(&img), &[0.2, 0.0, 1.0]);
    }

    #[test]
    fn test_grayscale_has_one_channel() {
        let img = single_pixel([255, 255, 255]);
        assert_eq!(ColorSpace::Grayscale.channels(), 1);
        assert_close(&ColorSpace::Grayscale.normalize(&img), &[1.0]);
    }

    #[test]
    fn test_lab_white_and_black() {
        let neutral = 128.0 / 255.0;
        assert_close(
            &ColorSpace::Lab.normalize(&single_pixel([255, 255, 255])),
            &[1.0, neutral, neutral],
        );
        assert_close(
            &ColorSpace::Lab.normalize(&single_pixel([0, 0, 0])),
            &[0.0, neutral, neutral],
        );
    }

    #[test]
    fn test_hsv_primary_colors() {
        assert_close(&ColorSpace::Hsv.normalize(&single_pixel([255, 0, 0])), &[0.0, 1.0, 1.0]);
        assert_close(
            &ColorSpace::Hsv.normalize(&single_pixel([0, 255, 0])),
            &[60.0 / 255.0, 1.0, 1.0],
        );
    }

    #[test]
    fn test_all_spaces_stay_in_unit_range() {
        let mut img = RgbImage::new(16, 16);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8]);
        }
        for space in [
            ColorSpace::Rgb,
            ColorSpace::Bgr,
            ColorSpace::Grayscale,
            ColorSpace::Lab,
            ColorSpace::Hsv,
        ] {
            let data = space.normalize(&img);
            assert_eq!(data.len(), 16 * 16 * space.channels());
            assert!(data.iter().all(|v| (0.0..=1.0).contains(v)), "{space} out of range");
        }
    }

    #[test]
    fn test_color_space_serde_names() {
        let json = serde_json::to_string(&ColorSpace::Grayscale).unwrap();
        assert_eq!(json, "\"grayscale\"");
        let parsed: ColorSpace = serde_json::from_str("\"lab\"").unwrap();
        assert_eq!(parsed, ColorSpace::Lab);
    }
}
