//! Contains the error metrics that drive the split-or-leaf decision.
//!
//! Each metric scores the color homogeneity of a rectangular pixel region:
//! higher means less homogeneous. A node whose region scores below the
//! threshold becomes a leaf.

use crate::{PixelView, Rect};
use palette::Srgb;
use std::fmt::Display;

/// A bounds-clamped rectangular region of a [`PixelView`] (the "safe ROI").
///
/// Construction clamps the requested rectangle to the buffer and fails when
/// nothing remains, so every region holds at least one pixel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region<'a> {
    /// The source buffer.
    view: PixelView<'a>,
    /// The clamped rectangle; always non-empty and fully inside `view`.
    rect: Rect,
}

impl<'a> Region<'a> {
    /// Clamps `rect` to the buffer, returning `None` when the intersection
    /// is empty.
    pub fn new(view: PixelView<'a>, rect: Rect) -> Option<Self> {
        let rect = rect.clamp_to(view.width(), view.height())?;
        Some(Self { view, rect })
    }

    /// The number of pixels in the clamped region.
    pub const fn pixel_count(&self) -> u64 {
        self.rect.area()
    }

    /// The width of the clamped region.
    pub const fn width(&self) -> u32 {
        self.rect.width
    }

    /// The height of the clamped region.
    pub const fn height(&self) -> u32 {
        self.rect.height
    }

    /// Iterates over the region's pixels in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Srgb<u8>> + '_ {
        let Rect { x, y, width, height } = self.rect;
        (y..y + height).flat_map(move |row| self.view.row(row, x, x + width).iter().copied())
    }

    /// The per-channel mean as floats.
    pub fn mean(&self) -> [f64; 3] {
        let mut sum = [0u64; 3];
        for p in self.pixels() {
            sum[0] += u64::from(p.red);
            sum[1] += u64::from(p.green);
            sum[2] += u64::from(p.blue);
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.pixel_count() as f64;
        sum.map(|s| s as f64 / count)
    }

    /// The mean color with each channel truncated to 8 bits
    /// (the node's representative color).
    pub fn mean_color(&self) -> Srgb<u8> {
        let mut sum = [0u64; 3];
        for p in self.pixels() {
            sum[0] += u64::from(p.red);
            sum[1] += u64::from(p.green);
            sum[2] += u64::from(p.blue);
        }
        let count = self.pixel_count();
        #[allow(clippy::cast_possible_truncation)]
        Srgb::new(
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
        )
    }
}

/// The set of supported homogeneity measures.
///
/// All metrics return a non-negative score where higher means less
/// homogeneous; their natural scales differ (variance is unbounded, the
/// similarity index lives in `0.0..=0.5`), so thresholds are
/// metric-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMetric {
    /// Per-channel squared deviation from the region mean, averaged over
    /// channels and pixels.
    #[default]
    Variance,
    /// Mean absolute deviation from the region mean.
    Mad,
    /// Spread between the channel extremes; for regions of four pixels or
    /// fewer, the largest per-pixel difference from the first pixel.
    MaxPixelDiff,
    /// Shannon entropy of a per-channel histogram, averaged over channels and
    /// clamped to `5.0`. Regions under 16 pixels fall back to a normalized
    /// [`MaxPixelDiff`](ErrorMetric::MaxPixelDiff), since entropy over few
    /// samples is unstable.
    Entropy,
    /// An SSIM-derived dissimilarity between the region and its candidate
    /// uniform mean-color fill, luma-weighted across channels. Regions
    /// narrower than 4 pixels in either dimension fall back to
    /// [`Variance`](ErrorMetric::Variance) scaled by `1/1000`.
    SimilarityIndex,
}

impl ErrorMetric {
    /// The human-readable metric name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ErrorMetric::Variance => "Variance",
            ErrorMetric::Mad => "Mean Absolute Deviation",
            ErrorMetric::MaxPixelDiff => "Max Pixel Difference",
            ErrorMetric::Entropy => "Entropy",
            ErrorMetric::SimilarityIndex => "Similarity Index",
        }
    }

    /// Scores the region's homogeneity.
    ///
    /// `reference_fill` is the candidate uniform fill color the region would
    /// be replaced with; only [`SimilarityIndex`](ErrorMetric::SimilarityIndex)
    /// uses it (falling back to the region mean when absent), all other
    /// metrics ignore it. Single-pixel regions always score `0.0`.
    pub(crate) fn evaluate(self, region: &Region<'_>, reference_fill: Option<Srgb<u8>>) -> f64 {
        if region.pixel_count() <= 1 {
            return 0.0;
        }
        match self {
            ErrorMetric::Variance => variance(region),
            ErrorMetric::Mad => mad(region),
            ErrorMetric::MaxPixelDiff => max_pixel_diff(region),
            ErrorMetric::Entropy => entropy(region),
            ErrorMetric::SimilarityIndex => {
                let fill = reference_fill.unwrap_or_else(|| region.mean_color());
                similarity_index(region, fill)
            }
        }
    }
}

impl Display for ErrorMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The per-channel components of a pixel as floats.
#[inline]
fn channels(p: Srgb<u8>) -> [f64; 3] {
    [f64::from(p.red), f64::from(p.green), f64::from(p.blue)]
}

/// Per-channel squared deviation from the mean, over `3 * count`.
fn variance(region: &Region<'_>) -> f64 {
    let count = region.pixel_count();
    if count <= 1 {
        return 0.0;
    }
    let mean = region.mean();
    let mut sum_sq = 0.0;
    for p in region.pixels() {
        let c = channels(p);
        for ch in 0..3 {
            let diff = c[ch] - mean[ch];
            sum_sq += diff * diff;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    {
        sum_sq / (3.0 * count as f64)
    }
}

/// Per-channel absolute deviation from the mean, over `3 * count`.
fn mad(region: &Region<'_>) -> f64 {
    let mean = region.mean();
    let mut sum = 0.0;
    for p in region.pixels() {
        let c = channels(p);
        for ch in 0..3 {
            sum += (c[ch] - mean[ch]).abs();
        }
    }
    #[allow(clippy::cast_precision_loss)]
    {
        sum / (3.0 * region.pixel_count() as f64)
    }
}

/// Channel-range spread, with a first-pixel-difference path for tiny regions.
fn max_pixel_diff(region: &Region<'_>) -> f64 {
    if region.pixel_count() <= 4 {
        let mut pixels = region.pixels();
        let Some(first) = pixels.next() else {
            return 0.0;
        };
        let first = channels(first);
        let mut max_diff = 0.0f64;
        for p in pixels {
            let c = channels(p);
            let diff: f64 = (0..3).map(|ch| (c[ch] - first[ch]).abs()).sum();
            max_diff = max_diff.max(diff / 3.0);
        }
        return max_diff;
    }

    let mut min = [255u8; 3];
    let mut max = [0u8; 3];
    for p in region.pixels() {
        let c = [p.red, p.green, p.blue];
        for ch in 0..3 {
            min[ch] = min[ch].min(c[ch]);
            max[ch] = max[ch].max(c[ch]);
        }
    }
    let spread: u32 = (0..3).map(|ch| u32::from(max[ch] - min[ch])).sum();
    f64::from(spread) / 3.0
}

/// Shannon entropy over a 768-bin histogram (256 bins per channel),
/// averaged over channels and clamped to `5.0`.
fn entropy(region: &Region<'_>) -> f64 {
    let count = region.pixel_count();
    if count < 16 {
        return max_pixel_diff(region) / 255.0;
    }

    let mut hist = [0u32; 768];
    for p in region.pixels() {
        hist[usize::from(p.red)] += 1;
        hist[256 + usize::from(p.green)] += 1;
        hist[512 + usize::from(p.blue)] += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let samples = count as f64;
    let mut entropy = 0.0;
    for &bin in &hist {
        if bin > 0 {
            let p = f64::from(bin) / samples;
            entropy -= p * p.log2();
        }
    }
    (entropy / 3.0).min(5.0)
}

/// SSIM-derived dissimilarity between the region and a uniform fill.
///
/// The reference is a uniform fill of the candidate color, so its variance
/// and the covariance are identically zero; only the region's own statistics
/// need computing.
fn similarity_index(region: &Region<'_>, fill: Srgb<u8>) -> f64 {
    if region.width() < 4 || region.height() < 4 {
        return variance(region) / 1000.0;
    }

    // Stabilization constants for an 8-bit dynamic range.
    const L: f64 = 255.0;
    const C1: f64 = (0.01 * L) * (0.01 * L);
    const C2: f64 = (0.03 * L) * (0.03 * L);
    /// Luma weights applied to the R, G, and B dissimilarities.
    const WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

    #[allow(clippy::cast_precision_loss)]
    let n = region.pixel_count() as f64;
    let mean = region.mean();
    let fill = channels(fill);

    let mut dissimilarity = 0.0;
    for ch in 0..3 {
        let mu1 = mean[ch];
        let mu2 = fill[ch];

        let mut sigma1_sq = 0.0;
        for p in region.pixels() {
            let diff = channels(p)[ch] - mu1;
            sigma1_sq += diff * diff;
        }
        sigma1_sq /= n - 1.0;

        let numerator = (2.0 * mu1 * mu2 + C1) * C2;
        let denominator = (mu1 * mu1 + mu2 * mu2 + C1) * (sigma1_sq + C2);

        let ssim = if denominator > 0.001 {
            numerator / denominator
        } else {
            // Near-degenerate statistics; treat as near-identical.
            0.99
        };
        dissimilarity += WEIGHTS[ch] * (1.0 - ssim).clamp(0.0, 1.0);
    }
    dissimilarity * 0.5
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;

    const ALL_METRICS: [ErrorMetric; 5] = [
        ErrorMetric::Variance,
        ErrorMetric::Mad,
        ErrorMetric::MaxPixelDiff,
        ErrorMetric::Entropy,
        ErrorMetric::SimilarityIndex,
    ];

    fn full_region<'a>(pixels: &'a [Srgb<u8>], width: u32, height: u32) -> Region<'a> {
        Region::new(view(pixels, width, height), Rect::new(0, 0, width, height)).unwrap()
    }

    #[test]
    fn uniform_region_scores_zero_everywhere() {
        let pixels = uniform_image(8, 8, Srgb::new(37u8, 101, 200));
        let region = full_region(&pixels, 8, 8);
        for metric in ALL_METRICS {
            assert_eq!(metric.evaluate(&region, None), 0.0, "{metric}");
        }
    }

    #[test]
    fn single_pixel_scores_zero() {
        let pixels = vec![Srgb::new(1u8, 2, 3)];
        let region = full_region(&pixels, 1, 1);
        for metric in ALL_METRICS {
            assert_eq!(metric.evaluate(&region, None), 0.0);
        }
    }

    #[test]
    fn variance_of_two_halves() {
        let pixels = two_halves_4x4();
        let region = full_region(&pixels, 4, 4);
        // Mean is 127.5 per channel, every pixel deviates by 127.5.
        let expected = 127.5 * 127.5;
        let actual = ErrorMetric::Variance.evaluate(&region, None);
        assert!((actual - expected).abs() < 1e-9);
    }

    #[test]
    fn mad_of_two_halves() {
        let pixels = two_halves_4x4();
        let region = full_region(&pixels, 4, 4);
        let actual = ErrorMetric::Mad.evaluate(&region, None);
        assert!((actual - 127.5).abs() < 1e-9);
    }

    #[test]
    fn max_pixel_diff_small_region_uses_first_pixel() {
        // 2x2: three black, one (30, 60, 90).
        let pixels = vec![
            Srgb::new(0u8, 0, 0),
            Srgb::new(0u8, 0, 0),
            Srgb::new(0u8, 0, 0),
            Srgb::new(30u8, 60, 90),
        ];
        let region = full_region(&pixels, 2, 2);
        let actual = ErrorMetric::MaxPixelDiff.evaluate(&region, None);
        assert!((actual - 60.0).abs() < 1e-9);
    }

    #[test]
    fn max_pixel_diff_large_region_uses_channel_ranges() {
        let mut pixels = uniform_image(3, 3, Srgb::new(100u8, 100, 100));
        pixels[4] = Srgb::new(130u8, 40, 100);
        let region = full_region(&pixels, 3, 3);
        // Ranges: R 30, G 60, B 0.
        let actual = ErrorMetric::MaxPixelDiff.evaluate(&region, None);
        assert!((actual - 30.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_small_region_proxies_max_pixel_diff() {
        let pixels = two_halves_4x4();
        let region =
            Region::new(view(&pixels, 4, 4), Rect::new(0, 0, 3, 3)).unwrap();
        let expected = max_pixel_diff(&region) / 255.0;
        assert_eq!(ErrorMetric::Entropy.evaluate(&region, None), expected);
    }

    #[test]
    fn entropy_of_two_halves() {
        let pixels = two_halves_4x4();
        let region = full_region(&pixels, 4, 4);
        // Two equally likely values per channel: one bit each.
        let actual = ErrorMetric::Entropy.evaluate(&region, None);
        assert!((actual - 1.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_is_clamped() {
        let pixels = noise_image(64, 64, 7);
        let region = full_region(&pixels, 64, 64);
        assert!(ErrorMetric::Entropy.evaluate(&region, None) <= 5.0);
    }

    #[test]
    fn similarity_index_narrow_region_falls_back_to_variance() {
        let pixels = two_halves_4x4();
        let region =
            Region::new(view(&pixels, 4, 4), Rect::new(0, 0, 4, 3)).unwrap();
        let expected = variance(&region) / 1000.0;
        assert_eq!(
            ErrorMetric::SimilarityIndex.evaluate(&region, None),
            expected
        );
    }

    #[test]
    fn similarity_index_bounds() {
        let pixels = noise_image(16, 16, 99);
        let region = full_region(&pixels, 16, 16);
        let score = ErrorMetric::SimilarityIndex.evaluate(&region, None);
        assert!((0.0..=0.5).contains(&score));
        // Heterogeneous region against its own mean fill is dissimilar.
        assert!(score > 0.0);
    }

    #[test]
    fn non_similarity_metrics_ignore_reference_fill() {
        let pixels = two_halves_4x4();
        let region = full_region(&pixels, 4, 4);
        let fill = Some(Srgb::new(255u8, 0, 0));
        for metric in [ErrorMetric::Variance, ErrorMetric::Mad, ErrorMetric::MaxPixelDiff] {
            assert_eq!(metric.evaluate(&region, fill), metric.evaluate(&region, None));
        }
    }

    #[test]
    fn region_clamps_to_buffer() {
        let pixels = uniform_image(4, 4, Srgb::new(5u8, 5, 5));
        let region =
            Region::new(view(&pixels, 4, 4), Rect::new(2, 2, 10, 10)).unwrap();
        assert_eq!(region.pixel_count(), 4);
        assert!(Region::new(view(&pixels, 4, 4), Rect::new(4, 0, 2, 2)).is_none());
    }

    #[test]
    fn mean_color_truncates() {
        let pixels = vec![Srgb::new(0u8, 0, 1), Srgb::new(1u8, 0, 2)];
        let region = full_region(&pixels, 2, 1);
        assert_eq!(region.mean_color(), Srgb::new(0u8, 0, 1));
    }
}
