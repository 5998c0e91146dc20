//! Conversion of arbitrary uploads into the classifier's fixed input tensor.
//!
//! Every accepted image goes through the same steps: alpha and palette
//! images are composited over white, greyscale is replicated into three
//! channels, the result is checked against the minimum size, resized with
//! Lanczos3 to the target size, scaled from `0..=255` to `0.0..=1.0` and
//! given a leading batch dimension. The finished tensor is checked once
//! more before it is handed out.

use image::{RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::error::{NormalizationError, NormalizeResult};
use crate::raw::RawImage;

/// Default model input edge length.
pub const DEFAULT_INPUT_SIZE: u32 = 224;
/// Smallest accepted width or height.
pub const MIN_DIMENSION: u32 = 32;
/// Channels in the canonical tensor.
pub const RGB_CHANNELS: usize = 3;

const BACKGROUND: [u8; 3] = [255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub min_dimension: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            target_width: DEFAULT_INPUT_SIZE,
            target_height: DEFAULT_INPUT_SIZE,
            min_dimension: MIN_DIMENSION,
        }
    }
}

impl NormalizerConfig {
    /// Rejects zero sizes, which would let empty images reach the resizer.
    pub fn validate(&self) -> NormalizeResult<()> {
        for (name, value) in [
            ("target_width", self.target_width),
            ("target_height", self.target_height),
            ("min_dimension", self.min_dimension),
        ] {
            if value == 0 {
                return Err(NormalizationError::InvalidConfig {
                    reason: format!("{name} must be at least 1"),
                });
            }
        }
        Ok(())
    }
}

/// `[1, H, W, 3]` float tensor with every element in `[0, 1]`.
///
/// Only [`ImageNormalizer::normalize`] builds one, so holding a value means
/// the guarantees were checked.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTensor {
    data: Array4<f32>,
}

impl CanonicalTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// RGB values at row `y`, column `x`.
    pub fn pixel(&self, y: usize, x: usize) -> [f32; 3] {
        [
            self.data[[0, y, x, 0]],
            self.data[[0, y, x, 1]],
            self.data[[0, y, x, 2]],
        ]
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Stateless converter from [`RawImage`] to [`CanonicalTensor`]. Safe to
/// share between threads.
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        tracing::debug!(
            "normalizer target size {}x{}",
            config.target_width,
            config.target_height
        );
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Shape of every tensor this normalizer produces.
    pub fn output_shape(&self) -> [usize; 4] {
        [
            1,
            self.config.target_height as usize,
            self.config.target_width as usize,
            RGB_CHANNELS,
        ]
    }

    pub fn normalize(&self, image: &RawImage) -> NormalizeResult<CanonicalTensor> {
        let rgb = flatten_to_rgb(image)?;
        let (width, height) = rgb.dimensions();
        self.check_size(width, height)?;

        let (tw, th) = (self.config.target_width, self.config.target_height);
        let resized = if (width, height) != (tw, th) {
            image::imageops::resize(&rgb, tw, th, FilterType::Lanczos3)
        } else {
            rgb
        };

        let (rw, rh) = resized.dimensions();
        let values: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();
        let data = Array4::from_shape_vec((1, rh as usize, rw as usize, RGB_CHANNELS), values)
            .map_err(|e| NormalizationError::invariant(format!("tensor layout: {e}")))?;

        let tensor = CanonicalTensor { data };
        self.check_invariants(&tensor)?;
        Ok(tensor)
    }

    /// Cheap pre-check: true when `normalize` would accept the image's mode
    /// and size.
    pub fn validate(&self, image: &RawImage) -> bool {
        let (width, height) = image.dimensions();
        let mode_ok = match image {
            RawImage::Interleaved(buf) => matches!(buf.channels(), 1 | 3 | 4),
            RawImage::Palette(p) => p
                .indices()
                .iter()
                .all(|&idx| (idx as usize) < p.palette_len()),
            _ => true,
        };
        mode_ok && self.check_size(width, height).is_ok()
    }

    /// Aspect-preserving RGB preview no larger than `max_side` on either edge.
    pub fn thumbnail(&self, image: &RawImage, max_side: u32) -> NormalizeResult<RgbImage> {
        let rgb = flatten_to_rgb(image)?;
        let (width, height) = rgb.dimensions();
        let longest = width.max(height);
        if longest <= max_side || longest == 0 {
            return Ok(rgb);
        }
        let scale = f64::from(max_side) / f64::from(longest);
        let tw = ((f64::from(width) * scale).round() as u32).max(1);
        let th = ((f64::from(height) * scale).round() as u32).max(1);
        Ok(image::imageops::resize(&rgb, tw, th, FilterType::Lanczos3))
    }

    fn check_size(&self, width: u32, height: u32) -> NormalizeResult<()> {
        let min = self.config.min_dimension;
        if width < min || height < min {
            return Err(NormalizationError::ImageTooSmall { width, height, min });
        }
        Ok(())
    }

    fn check_invariants(&self, tensor: &CanonicalTensor) -> NormalizeResult<()> {
        let expected = self.output_shape();
        if tensor.shape() != expected {
            return Err(NormalizationError::invariant(format!(
                "shape {:?}, expected {:?}",
                tensor.shape(),
                expected
            )));
        }
        if let Some(bad) = tensor
            .data
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(NormalizationError::invariant(format!(
                "element {bad} outside [0, 1]"
            )));
        }
        Ok(())
    }
}

/// Composite straight (non-premultiplied) alpha over the background.
fn blend(channel: u8, alpha: u8, background: u8) -> u8 {
    let a = u32::from(alpha);
    let v = u32::from(channel) * a + u32::from(background) * (255 - a);
    ((v + 127) / 255) as u8
}

fn composite<I>(width: u32, height: u32, pixels: I) -> NormalizeResult<RgbImage>
where
    I: Iterator<Item = [u8; 4]>,
{
    let mut buf = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
    for [r, g, b, a] in pixels {
        buf.push(blend(r, a, BACKGROUND[0]));
        buf.push(blend(g, a, BACKGROUND[1]));
        buf.push(blend(b, a, BACKGROUND[2]));
    }
    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| NormalizationError::invariant("flattened buffer size"))
}

/// Flatten any accepted color mode to opaque 8-bit RGB.
fn flatten_to_rgb(image: &RawImage) -> NormalizeResult<RgbImage> {
    match image {
        RawImage::Rgb(img) => Ok(img.clone()),
        RawImage::Rgba(img) => composite(img.width(), img.height(), img.pixels().map(|p| p.0)),
        RawImage::Gray(img) => composite(
            img.width(),
            img.height(),
            img.pixels().map(|p| [p[0], p[0], p[0], u8::MAX]),
        ),
        RawImage::GrayAlpha(img) => composite(
            img.width(),
            img.height(),
            img.pixels().map(|p| [p[0], p[0], p[0], p[1]]),
        ),
        RawImage::Palette(p) => {
            let (width, height) = p.dimensions();
            let pixels = p
                .indices()
                .iter()
                .map(|&idx| {
                    p.entry(idx).ok_or_else(|| {
                        NormalizationError::unsupported(format!(
                            "palette index {idx} outside {} entries",
                            p.palette_len()
                        ))
                    })
                })
                .collect::<NormalizeResult<Vec<_>>>()?;
            composite(width, height, pixels.into_iter())
        }
        RawImage::Interleaved(buf) => {
            let (width, height) = buf.dimensions();
            let data = buf.data();
            match buf.channels() {
                1 => composite(width, height, data.iter().map(|&v| [v, v, v, u8::MAX])),
                3 => composite(
                    width,
                    height,
                    data.chunks_exact(3).map(|c| [c[0], c[1], c[2], u8::MAX]),
                ),
                4 => composite(
                    width,
                    height,
                    data.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]),
                ),
                n => Err(NormalizationError::unsupported(format!(
                    "{n}-channel pixel buffer"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{InterleavedImage, PaletteImage};
    use approx::assert_abs_diff_eq;
    use image::{GrayAlphaImage, GrayImage, Luma, LumaA, Rgb, Rgba, RgbaImage};
    use rstest::rstest;

    const RESIZE_TOLERANCE: f32 = 2.0 / 255.0;

    fn assert_canonical(tensor: &CanonicalTensor) {
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        let (lo, hi) = tensor.min_max();
        assert!(lo >= 0.0 && hi <= 1.0, "range [{lo}, {hi}]");
    }

    fn palette_image() -> RawImage {
        let indices = (0..48 * 48).map(|i| (i % 3) as u8).collect();
        let palette = vec![[200, 10, 10], [10, 200, 10], [10, 10, 200]];
        RawImage::Palette(PaletteImage::new(48, 48, indices, palette, None).unwrap())
    }

    #[rstest]
    #[case::rgb(RawImage::Rgb(RgbImage::from_pixel(300, 200, Rgb([90, 40, 30]))))]
    #[case::rgba(RawImage::Rgba(RgbaImage::from_pixel(64, 64, Rgba([90, 40, 30, 128]))))]
    #[case::gray(RawImage::Gray(GrayImage::from_pixel(50, 80, Luma([77]))))]
    #[case::gray_alpha(RawImage::GrayAlpha(GrayAlphaImage::from_pixel(40, 40, LumaA([77, 10]))))]
    #[case::palette(palette_image())]
    #[case::interleaved(RawImage::Interleaved(
        InterleavedImage::new(32, 32, 4, vec![128; 32 * 32 * 4]).unwrap()
    ))]
    fn every_supported_mode_yields_canonical_tensor(#[case] image: RawImage) {
        let normalizer = ImageNormalizer::default();
        let tensor = normalizer.normalize(&image).unwrap();
        assert_canonical(&tensor);
    }

    #[test]
    fn mid_grey_rgb_scales_to_half() {
        let image = RawImage::Rgb(RgbImage::from_pixel(100, 100, Rgb([128, 128, 128])));
        let tensor = ImageNormalizer::default().normalize(&image).unwrap();
        assert_canonical(&tensor);
        for v in tensor.view().iter() {
            assert_abs_diff_eq!(*v, 128.0 / 255.0, epsilon = RESIZE_TOLERANCE);
        }
    }

    #[test]
    fn target_sized_input_is_only_rescaled() {
        let mut img = RgbImage::new(224, 224);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([x as u8, y as u8, 255]);
        }
        let tensor = ImageNormalizer::default()
            .normalize(&RawImage::Rgb(img))
            .unwrap();
        assert_canonical(&tensor);
        assert_eq!(tensor.pixel(10, 200), [200.0 / 255.0, 10.0 / 255.0, 1.0]);
        assert_eq!(tensor.pixel(0, 0), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn too_small_image_is_rejected() {
        let image = RawImage::Rgb(RgbImage::new(16, 16));
        let err = ImageNormalizer::default().normalize(&image).unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::ImageTooSmall {
                width: 16,
                height: 16,
                min: 32
            }
        ));
    }

    #[test]
    fn one_short_edge_is_enough_to_reject() {
        let image = RawImage::Gray(GrayImage::new(500, 31));
        let err = ImageNormalizer::default().normalize(&image).unwrap_err();
        assert!(matches!(err, NormalizationError::ImageTooSmall { .. }));
    }

    #[rstest]
    #[case(2)]
    #[case(5)]
    #[case(0)]
    fn unexpected_channel_count_is_unsupported(#[case] channels: usize) {
        let data = vec![0; 64 * 64 * channels];
        let image = RawImage::Interleaved(InterleavedImage::new(64, 64, channels, data).unwrap());
        let err = ImageNormalizer::default().normalize(&image).unwrap_err();
        assert!(matches!(err, NormalizationError::UnsupportedColorMode { .. }));
    }

    #[test]
    fn out_of_range_palette_index_is_unsupported() {
        let indices = vec![3; 40 * 40];
        let image = RawImage::Palette(
            PaletteImage::new(40, 40, indices, vec![[0, 0, 0]], None).unwrap(),
        );
        let normalizer = ImageNormalizer::default();
        assert!(!normalizer.validate(&image));
        assert!(matches!(
            normalizer.normalize(&image).unwrap_err(),
            NormalizationError::UnsupportedColorMode { .. }
        ));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let image = RawImage::Rgba(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 0])));
        let tensor = ImageNormalizer::default().normalize(&image).unwrap();
        for v in tensor.view().iter() {
            assert_eq!(*v, 1.0);
        }
    }

    #[test]
    fn transparent_region_stays_white_next_to_opaque_region() {
        let mut img = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 0]));
        for (x, _, px) in img.enumerate_pixels_mut() {
            if x >= 32 {
                *px = Rgba([200, 0, 0, 255]);
            }
        }
        let tensor = ImageNormalizer::default()
            .normalize(&RawImage::Rgba(img))
            .unwrap();
        for c in tensor.pixel(100, 10) {
            assert_abs_diff_eq!(c, 1.0, epsilon = 1.0 / 255.0);
        }
        let [r, g, b] = tensor.pixel(100, 210);
        assert_abs_diff_eq!(r, 200.0 / 255.0, epsilon = RESIZE_TOLERANCE);
        assert_abs_diff_eq!(g, 0.0, epsilon = RESIZE_TOLERANCE);
        assert_abs_diff_eq!(b, 0.0, epsilon = RESIZE_TOLERANCE);
    }

    #[test]
    fn palette_alpha_is_composited_like_rgba() {
        let indices = vec![0; 224 * 224];
        let image = RawImage::Palette(
            PaletteImage::new(224, 224, indices, vec![[0, 0, 0]], Some(vec![0])).unwrap(),
        );
        let tensor = ImageNormalizer::default().normalize(&image).unwrap();
        assert_eq!(tensor.pixel(0, 0), [1.0, 1.0, 1.0]);
        assert_eq!(tensor.pixel(223, 223), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn half_alpha_blends_toward_white() {
        assert_eq!(blend(0, 255, 255), 0);
        assert_eq!(blend(0, 0, 255), 255);
        assert_eq!(blend(100, 128, 255), 177);
        assert_eq!(blend(37, 255, 255), 37);
    }

    #[test]
    fn greyscale_is_replicated_into_three_channels() {
        let image = RawImage::Gray(GrayImage::from_pixel(60, 60, Luma([77])));
        let tensor = ImageNormalizer::default().normalize(&image).unwrap();
        for y in [0, 100, 223] {
            for x in [0, 57, 223] {
                for c in tensor.pixel(y, x) {
                    assert_abs_diff_eq!(c, 77.0 / 255.0, epsilon = RESIZE_TOLERANCE);
                }
            }
        }
    }

    #[test]
    fn custom_target_size_is_honored() {
        let normalizer = ImageNormalizer::new(NormalizerConfig {
            target_width: 96,
            target_height: 64,
            min_dimension: 8,
        });
        let image = RawImage::Rgb(RgbImage::from_pixel(10, 10, Rgb([1, 2, 3])));
        let tensor = normalizer.normalize(&image).unwrap();
        assert_eq!(tensor.shape(), [1, 64, 96, 3]);
        assert_eq!(normalizer.output_shape(), [1, 64, 96, 3]);
    }

    #[rstest]
    #[case(NormalizerConfig { target_width: 0, ..NormalizerConfig::default() }, "target_width")]
    #[case(NormalizerConfig { target_height: 0, ..NormalizerConfig::default() }, "target_height")]
    #[case(NormalizerConfig { min_dimension: 0, ..NormalizerConfig::default() }, "min_dimension")]
    fn zero_sizes_are_rejected(#[case] config: NormalizerConfig, #[case] field: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidConfig { .. }));
        assert!(err.to_string().contains(field), "{err}");
        assert!(NormalizerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_mirrors_normalize_preconditions() {
        let normalizer = ImageNormalizer::default();
        assert!(normalizer.validate(&RawImage::Rgb(RgbImage::new(32, 32))));
        assert!(!normalizer.validate(&RawImage::Rgb(RgbImage::new(31, 32))));
        let two_channel = InterleavedImage::new(40, 40, 2, vec![0; 40 * 40 * 2]).unwrap();
        assert!(!normalizer.validate(&RawImage::Interleaved(two_channel)));
    }

    #[test]
    fn thumbnail_preserves_aspect_ratio() {
        let normalizer = ImageNormalizer::default();
        let image = RawImage::Rgb(RgbImage::new(400, 200));
        let thumb = normalizer.thumbnail(&image, 128).unwrap();
        assert_eq!(thumb.dimensions(), (128, 64));

        let small = RawImage::Gray(GrayImage::new(50, 20));
        assert_eq!(normalizer.thumbnail(&small, 128).unwrap().dimensions(), (50, 20));
    }
}
