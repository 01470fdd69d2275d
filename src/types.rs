//! Contains various types needed across the crate.

use crate::MAX_PIXELS;
use palette::Srgb;
use std::{
    error::Error,
    fmt::{Debug, Display},
};
#[cfg(feature = "image")]
use {image::RgbImage, palette::cast::ComponentsAs};

/// An error type for when the length of an input (e.g., `Vec` or slice)
/// is above the maximum supported value.
///
/// The inner value is the maximum supported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AboveMaxLen<T>(pub T);

impl<T: Display> Display for AboveMaxLen<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "above the maximum length of {}", self.0)
    }
}

impl<T: Debug + Display> Error for AboveMaxLen<T> {}

/// An invalid compression parameter.
///
/// This is the only way [`compress`](crate::CompressPipeline::compress) can
/// fail: degraded-quality results are always preferred over hard failure, so
/// resource exhaustion during the build is reported through
/// [`BuildOutcome`](crate::BuildOutcome) instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamError {
    /// The threshold must be a positive, finite number.
    NonPositiveThreshold(f64),
    /// The minimum block size must be at least 1.
    ZeroMinBlockSize,
    /// The target compression percentage must be in `0.0..=100.0`.
    TargetOutOfRange(f64),
    /// The image has zero width or height.
    EmptyImage,
}

impl Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ParamError::NonPositiveThreshold(t) => {
                write!(f, "threshold must be positive and finite, got {t}")
            }
            ParamError::ZeroMinBlockSize => write!(f, "minimum block size must be at least 1"),
            ParamError::TargetOutOfRange(p) => {
                write!(f, "target compression must be in 0..=100 percent, got {p}")
            }
            ParamError::EmptyImage => write!(f, "image has zero width or height"),
        }
    }
}

impl Error for ParamError {}

/// A borrowed width x height buffer of 3-channel 8-bit pixels.
///
/// The invariants are that `pixels.len()` must equal `width * height` and must
/// not be greater than [`MAX_PIXELS`]. The view is read-only: tree
/// construction never writes to the source buffer, which is what makes the
/// bounded parallel fan-out safe.
///
/// # Examples
/// From a raw pixel slice:
/// ```
/// # use quadpix::PixelView;
/// # use palette::Srgb;
/// let pixels = vec![Srgb::new(0u8, 0, 0); 12];
/// let view = PixelView::new(&pixels, 4, 3).unwrap();
/// ```
///
/// From an image (needs the `image` feature to be enabled):
/// ```no_run
/// # use quadpix::PixelView;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let img = image::open("some image")?.into_rgb8();
/// let view = PixelView::try_from(&img)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelView<'a> {
    /// The pixels in row-major order.
    pixels: &'a [Srgb<u8>],
    /// The width of the image.
    width: u32,
    /// The height of the image.
    height: u32,
}

impl<'a> PixelView<'a> {
    /// Creates a new [`PixelView`].
    ///
    /// Returns `None` if the length of `pixels` is not equal to
    /// `width * height` or is greater than [`MAX_PIXELS`].
    #[must_use]
    pub fn new(pixels: &'a [Srgb<u8>], width: u32, height: u32) -> Option<Self> {
        let len = (width as u64).checked_mul(height as u64)?;
        if len <= u64::from(MAX_PIXELS) && pixels.len() as u64 == len {
            Some(Self { pixels, width, height })
        } else {
            None
        }
    }

    /// The width of the image.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The height of the image.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// The total number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The pixels in row-major order.
    #[must_use]
    pub const fn pixels(&self) -> &'a [Srgb<u8>] {
        self.pixels
    }

    /// The pixel at `(x, y)`. Both coordinates must be in bounds.
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Srgb<u8> {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// The given row of pixels, clamped to the columns `x0..x1`.
    #[inline]
    pub(crate) fn row(&self, y: u32, x0: u32, x1: u32) -> &'a [Srgb<u8>] {
        let start = y as usize * self.width as usize;
        &self.pixels[start + x0 as usize..start + x1 as usize]
    }

    /// Produces a half-scale copy by averaging 2x2 pixel blocks
    /// (odd trailing rows/columns average the pixels that exist).
    ///
    /// Used to bound the cost of trial builds on large images.
    #[must_use]
    pub(crate) fn half_scale(&self) -> (Vec<Srgb<u8>>, u32, u32) {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let x0 = (x * 2).min(self.width - 1);
                let y0 = (y * 2).min(self.height - 1);
                let x1 = (x0 + 1).min(self.width - 1);
                let y1 = (y0 + 1).min(self.height - 1);
                let mut sum = [0u32; 3];
                let mut count = 0u32;
                for py in [y0, y1] {
                    for px in [x0, x1] {
                        let p = self.pixel(px, py);
                        sum[0] += u32::from(p.red);
                        sum[1] += u32::from(p.green);
                        sum[2] += u32::from(p.blue);
                        count += 1;
                    }
                }
                // y1 == y0 or x1 == x0 double-counts pixels, which still
                // averages to the same value.
                #[allow(clippy::cast_possible_truncation)]
                out.push(Srgb::new(
                    (sum[0] / count) as u8,
                    (sum[1] / count) as u8,
                    (sum[2] / count) as u8,
                ));
            }
        }
        (out, width, height)
    }
}

#[cfg(feature = "image")]
impl<'a> TryFrom<&'a RgbImage> for PixelView<'a> {
    type Error = AboveMaxLen<u32>;

    fn try_from(image: &'a RgbImage) -> Result<Self, Self::Error> {
        let pixels = image.pixels().len();
        if pixels <= MAX_PIXELS as usize {
            let buf = &image.as_raw()[..(pixels * 3)];
            Ok(Self {
                pixels: buf.components_as(),
                width: image.width(),
                height: image.height(),
            })
        } else {
            Err(AboveMaxLen(MAX_PIXELS))
        }
    }
}
