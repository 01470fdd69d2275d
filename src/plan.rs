//! Contains the compression plan and the adaptive threshold search.
//!
//! A [`CompressionPlan`] is the full set of parameters one tree build runs
//! under. It is computed once per compress call; the adaptive search derives
//! a fresh plan from a target compression percentage rather than mutating
//! any cross-call state.

use crate::{
    build::TreeBuilder, ErrorMetric, PixelView, Rect, DEFAULT_MAX_DEPTH, DEFAULT_TIMEOUT,
};
use std::time::Duration;

/// The number of trial builds the adaptive bisection may run after its
/// initial probe.
const MAX_SEARCH_ITERATIONS: u32 = 7;

/// The search stops once the achieved percentage is within this many
/// percentage points of the target.
const SEARCH_TOLERANCE: f64 = 3.0;

/// Trial builds run on a half-scale copy when the image exceeds this many
/// pixels, to bound the cost of the search.
const TRIAL_PIXEL_LIMIT: u64 = 1_000_000;

/// How a build decides whether to subdivide a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Subdivide while the error metric scores at or above the threshold.
    MetricDriven,
    /// Subdivide purely by depth and block size, ignoring the metric.
    /// Produces a uniform grid of leaves.
    FixedGrid,
    /// Like [`FixedGrid`](SplitMode::FixedGrid), but nodes touching a
    /// centered region subdivide finer than the surrounding area, which
    /// concentrates detail centrally while still approximating an overall
    /// node-count target.
    Hybrid {
        /// The centered high-detail region.
        center: Rect,
        /// The minimum block size inside the center.
        center_min_block: u32,
        /// The maximum depth inside the center.
        center_max_depth: u32,
        /// The minimum block size outside the center.
        outer_min_block: u32,
        /// The maximum depth outside the center.
        outer_max_depth: u32,
    },
}

/// The parameters a single tree build runs under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionPlan {
    /// The error-metric cutoff below which a node becomes a leaf.
    pub(crate) threshold: f64,
    /// The smallest block dimension before a leaf is forced.
    pub(crate) min_block_size: u32,
    /// The maximum subdivision depth.
    pub(crate) max_depth: u32,
    /// The subdivision policy.
    pub(crate) mode: SplitMode,
    /// The wall-clock budget for the build, or `None` for unbounded.
    pub(crate) timeout: Option<Duration>,
}

impl CompressionPlan {
    /// Creates a metric-driven plan with the default depth limit and timeout.
    #[must_use]
    pub const fn new(threshold: f64, min_block_size: u32) -> Self {
        Self {
            threshold,
            min_block_size,
            max_depth: DEFAULT_MAX_DEPTH,
            mode: SplitMode::MetricDriven,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Sets the wall-clock budget for the build. `None` disables it.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The error-metric cutoff below which a node becomes a leaf.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The smallest block dimension before a leaf is forced.
    #[must_use]
    pub const fn min_block_size(&self) -> u32 {
        self.min_block_size
    }

    /// The maximum subdivision depth.
    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// The subdivision policy.
    #[must_use]
    pub const fn mode(&self) -> SplitMode {
        self.mode
    }

    /// The wall-clock budget for the build.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The effective limits for a node covering `rect`:
    /// `(min_block_size, max_depth, metric_driven)`.
    pub(crate) fn limits_for(&self, rect: &Rect) -> (u32, u32, bool) {
        match self.mode {
            SplitMode::MetricDriven => (self.min_block_size, self.max_depth, true),
            SplitMode::FixedGrid => (self.min_block_size, self.max_depth, false),
            SplitMode::Hybrid {
                center,
                center_min_block,
                center_max_depth,
                outer_min_block,
                outer_max_depth,
            } => {
                if rect.intersects(&center) {
                    (center_min_block, center_max_depth, false)
                } else {
                    (outer_min_block, outer_max_depth, false)
                }
            }
        }
    }

    /// Derives a plan that approximates the target compression percentage.
    ///
    /// `base` supplies the caller's threshold, minimum block size, and
    /// timeout. Three regimes apply:
    /// - below 20%: a small metric-appropriate threshold with a derived
    ///   minimum block size; no search.
    /// - 20% to 75%: a fixed power-of-two grid sized from the target leaf
    ///   count, escalating to a two-zone hybrid grid when the grid's
    ///   predicted compression misses the target by more than 10 points.
    /// - 75% and above: weighted bisection over a metric-specific threshold
    ///   range, measuring each candidate with a full trial build.
    ///
    /// Targets at or below zero (or NaN) return `base` unchanged (adaptive
    /// search disabled); targets above 100 are clamped to 100.
    #[must_use]
    pub fn for_target(
        view: PixelView<'_>,
        metric: ErrorMetric,
        base: &CompressionPlan,
        target_pct: f64,
    ) -> CompressionPlan {
        if target_pct.is_nan() || target_pct <= 0.0 {
            return *base;
        }
        let target_pct = target_pct.min(100.0);
        if target_pct < 20.0 {
            low_target_plan(view, metric, base, target_pct)
        } else if target_pct < 75.0 {
            fixed_grid_plan(view, base, target_pct)
        } else {
            bisection_plan(view, metric, base, target_pct)
        }
    }
}

impl Default for CompressionPlan {
    fn default() -> Self {
        Self::new(100.0, 4)
    }
}

/// The largest power of two less than or equal to `n` (1 for `n == 0`).
const fn floor_pow2(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        1 << (31 - n.leading_zeros())
    }
}

/// A small threshold that keeps subdivision aggressive for the given metric.
const fn low_target_threshold(metric: ErrorMetric) -> f64 {
    match metric {
        ErrorMetric::Variance | ErrorMetric::MaxPixelDiff => 5.0,
        ErrorMetric::Mad => 2.0,
        ErrorMetric::Entropy => 0.1,
        ErrorMetric::SimilarityIndex => 0.01,
    }
}

/// The upper bound of the bisection range for the given metric and target.
const fn search_ceiling(metric: ErrorMetric, target_pct: f64) -> f64 {
    if target_pct < 85.0 {
        match metric {
            ErrorMetric::Variance => 50.0,
            ErrorMetric::Mad => 15.0,
            ErrorMetric::MaxPixelDiff => 30.0,
            ErrorMetric::Entropy => 1.0,
            ErrorMetric::SimilarityIndex => 0.15,
        }
    } else if target_pct < 95.0 {
        match metric {
            ErrorMetric::Variance => 200.0,
            ErrorMetric::Mad => 30.0,
            ErrorMetric::MaxPixelDiff => 75.0,
            ErrorMetric::Entropy => 2.5,
            ErrorMetric::SimilarityIndex => 0.3,
        }
    } else {
        match metric {
            ErrorMetric::Variance => 500.0,
            ErrorMetric::Mad => 50.0,
            ErrorMetric::MaxPixelDiff => 150.0,
            ErrorMetric::Entropy => 5.0,
            ErrorMetric::SimilarityIndex => 0.5,
        }
    }
}

/// Low-target regime: keep the metric in charge but force small blocks.
fn low_target_plan(
    view: PixelView<'_>,
    metric: ErrorMetric,
    base: &CompressionPlan,
    target_pct: f64,
) -> CompressionPlan {
    #[allow(clippy::cast_precision_loss)]
    let total = view.pixel_count() as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let grid = (total * (1.0 - target_pct / 100.0)).sqrt() as u32;
    CompressionPlan {
        threshold: low_target_threshold(metric),
        min_block_size: floor_pow2(grid).max(2),
        max_depth: DEFAULT_MAX_DEPTH,
        mode: SplitMode::MetricDriven,
        timeout: base.timeout,
    }
}

/// Mid-target regime: a uniform power-of-two grid sized from the target leaf
/// count, with a hybrid two-zone escalation when the grid prediction is off
/// by more than 10 points.
fn fixed_grid_plan(
    view: PixelView<'_>,
    base: &CompressionPlan,
    target_pct: f64,
) -> CompressionPlan {
    let total = view.pixel_count();
    #[allow(clippy::cast_precision_loss)]
    let total_f = total as f64;

    let ratio = 1.0 - target_pct / 100.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let target_leaves = ((total_f * ratio) as u64).max(1);
    #[allow(clippy::cast_precision_loss)]
    let avg_block_area = total_f / target_leaves as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let grid = floor_pow2(avg_block_area.sqrt() as u32);

    let longest = view.width().max(view.height());
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_depth = (f64::from(longest) / f64::from(grid)).log2() as u32 + 1;

    let predicted_leaves = u64::from(view.width() / grid) * u64::from(view.height() / grid);
    #[allow(clippy::cast_precision_loss)]
    let predicted_pct = (1.0 - predicted_leaves as f64 / total_f) * 100.0;

    let mode = if (predicted_pct - target_pct).abs() > 10.0 {
        let center_ratio = if target_pct < 40.0 {
            0.6
        } else if target_pct > 60.0 {
            0.3
        } else {
            0.4
        };
        log::debug!(
            "fixed grid of {grid} predicts {predicted_pct:.1}%, \
             using hybrid center ratio {center_ratio}"
        );
        SplitMode::Hybrid {
            center: Rect::centered_fraction(view.width(), view.height(), center_ratio),
            center_min_block: (grid / 2).max(1),
            center_max_depth: DEFAULT_MAX_DEPTH,
            outer_min_block: grid * 2,
            outer_max_depth: (max_depth.saturating_sub(1)).min(4),
        }
    } else {
        SplitMode::FixedGrid
    };

    CompressionPlan {
        threshold: base.threshold,
        min_block_size: grid,
        max_depth,
        mode,
        timeout: base.timeout,
    }
}

/// High-target regime: weighted bisection over the metric's threshold range,
/// measuring each candidate with a full trial build.
fn bisection_plan(
    view: PixelView<'_>,
    metric: ErrorMetric,
    base: &CompressionPlan,
    target_pct: f64,
) -> CompressionPlan {
    let scaled;
    let trial_view = if view.pixel_count() > TRIAL_PIXEL_LIMIT {
        scaled = view.half_scale();
        #[allow(clippy::expect_used)]
        {
            // half_scale allocates exactly width * height pixels
            PixelView::new(&scaled.0, scaled.1, scaled.2).expect("consistent dimensions")
        }
    } else {
        view
    };
    #[allow(clippy::cast_precision_loss)]
    let trial_total = trial_view.pixel_count() as f64;

    let measure = |threshold: f64| -> f64 {
        let plan = CompressionPlan {
            threshold,
            min_block_size: base.min_block_size,
            max_depth: DEFAULT_MAX_DEPTH,
            mode: SplitMode::MetricDriven,
            timeout: None,
        };
        let trial = TreeBuilder::new(trial_view, metric, plan).build();
        #[allow(clippy::cast_precision_loss)]
        let leaves = trial.tree.leaf_count() as f64;
        (1.0 - leaves / trial_total) * 100.0
    };

    let mut low = 1e-4;
    let mut high = search_ceiling(metric, target_pct);

    // Initial probe at the caller's threshold; it may already be good enough.
    let mut current = measure(base.threshold);
    let mut best = base.threshold;
    let mut best_diff = (current - target_pct).abs();
    if best_diff <= SEARCH_TOLERANCE {
        return plan_with_threshold(base, best);
    }
    if current < target_pct {
        low = base.threshold;
    } else {
        high = base.threshold;
    }

    for iter in 0..MAX_SEARCH_ITERATIONS {
        let weight = if iter == 0 {
            0.5
        } else if current < target_pct {
            0.7
        } else {
            0.3
        };
        let candidate = low + (high - low) * weight;
        if (candidate - best).abs() < 0.001 * best {
            break;
        }

        current = measure(candidate);
        log::debug!(
            "threshold search iteration {}: candidate {candidate:.4} gave {current:.1}%",
            iter + 1,
        );

        let diff = (current - target_pct).abs();
        if diff < best_diff {
            best = candidate;
            best_diff = diff;
        }
        if diff <= SEARCH_TOLERANCE {
            break;
        }
        if current < target_pct {
            low = candidate;
        } else {
            high = candidate;
        }
        if (high - low) < 0.001 * low {
            break;
        }
    }

    // One extrapolation probe when bisection never reached tolerance:
    // scale the best threshold by target / achieved, accepted only if it
    // improves on the best difference found.
    if best_diff > SEARCH_TOLERANCE && current > 0.0 && low <= high * 1.2 {
        let extrapolated = (best * (target_pct / current)).clamp(low, high * 1.2);
        let pct = measure(extrapolated);
        if (pct - target_pct).abs() < best_diff {
            best = extrapolated;
            best_diff = (pct - target_pct).abs();
        }
    }

    log::debug!("threshold search settled on {best:.4} ({best_diff:.1} points from target)");
    plan_with_threshold(base, best)
}

/// A metric-driven plan carrying the searched threshold.
const fn plan_with_threshold(base: &CompressionPlan, threshold: f64) -> CompressionPlan {
    CompressionPlan {
        threshold,
        min_block_size: base.min_block_size,
        max_depth: DEFAULT_MAX_DEPTH,
        mode: SplitMode::MetricDriven,
        timeout: base.timeout,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;
    use palette::Srgb;

    #[test]
    fn floor_pow2_values() {
        assert_eq!(floor_pow2(0), 1);
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(2), 2);
        assert_eq!(floor_pow2(3), 2);
        assert_eq!(floor_pow2(15), 8);
        assert_eq!(floor_pow2(16), 16);
    }

    #[test]
    fn zero_target_returns_base() {
        let pixels = uniform_image(8, 8, Srgb::new(1u8, 1, 1));
        let base = CompressionPlan::new(42.0, 4);
        let plan =
            CompressionPlan::for_target(view(&pixels, 8, 8), ErrorMetric::Variance, &base, 0.0);
        assert_eq!(plan, base);
    }

    #[test]
    fn out_of_range_targets_are_clamped_or_disabled() {
        let pixels = noise_image(16, 16, 3);
        let base = CompressionPlan::new(42.0, 4);

        // NaN and negative targets disable the search entirely.
        let v = view(&pixels, 16, 16);
        assert_eq!(
            CompressionPlan::for_target(v, ErrorMetric::Variance, &base, f64::NAN),
            base
        );
        assert_eq!(
            CompressionPlan::for_target(v, ErrorMetric::Variance, &base, -5.0),
            base
        );

        // Targets above 100 behave exactly like 100.
        let clamped = CompressionPlan::for_target(v, ErrorMetric::Variance, &base, 150.0);
        let full = CompressionPlan::for_target(v, ErrorMetric::Variance, &base, 100.0);
        assert_eq!(clamped, full);
    }

    #[test]
    fn low_target_regime_fixes_threshold_and_block_size() {
        let pixels = uniform_image(64, 64, Srgb::new(1u8, 1, 1));
        let base = CompressionPlan::new(42.0, 4);
        let plan =
            CompressionPlan::for_target(view(&pixels, 64, 64), ErrorMetric::Mad, &base, 10.0);
        assert_eq!(plan.threshold(), 2.0);
        // sqrt(4096 * 0.9) = 60.7 -> largest power of two is 32.
        assert_eq!(plan.min_block_size(), 32);
        assert_eq!(plan.mode(), SplitMode::MetricDriven);
    }

    #[test]
    fn mid_target_regime_escalates_to_hybrid_when_grid_misses() {
        // 64x64 at 50%: the grid math lands on 1x1 blocks (predicting 0%),
        // which misses the target and flips on the hybrid policy.
        let pixels = uniform_image(64, 64, Srgb::new(1u8, 1, 1));
        let base = CompressionPlan::new(42.0, 4);
        let plan =
            CompressionPlan::for_target(view(&pixels, 64, 64), ErrorMetric::Variance, &base, 50.0);
        assert_eq!(plan.min_block_size(), 1);
        assert_eq!(plan.max_depth(), 7);
        match plan.mode() {
            SplitMode::Hybrid {
                center,
                center_min_block,
                center_max_depth,
                outer_min_block,
                outer_max_depth,
            } => {
                assert_eq!(center, Rect::new(19, 19, 25, 25));
                assert_eq!(center_min_block, 1);
                assert_eq!(center_max_depth, DEFAULT_MAX_DEPTH);
                assert_eq!(outer_min_block, 2);
                assert_eq!(outer_max_depth, 4);
            }
            mode => panic!("expected hybrid mode, got {mode:?}"),
        }
    }

    #[test]
    fn mid_target_center_ratio_tracks_target() {
        let pixels = uniform_image(64, 64, Srgb::new(1u8, 1, 1));
        let base = CompressionPlan::new(42.0, 4);

        let low =
            CompressionPlan::for_target(view(&pixels, 64, 64), ErrorMetric::Variance, &base, 25.0);
        let high =
            CompressionPlan::for_target(view(&pixels, 64, 64), ErrorMetric::Variance, &base, 70.0);
        let (SplitMode::Hybrid { center: c_low, .. }, SplitMode::Hybrid { center: c_high, .. }) =
            (low.mode(), high.mode())
        else {
            panic!("expected hybrid modes");
        };
        // Lower targets keep a larger high-detail center.
        assert!(c_low.area() > c_high.area());
    }

    #[test]
    fn bisection_regime_stays_metric_driven() {
        let pixels = noise_image(32, 32, 11);
        let base = CompressionPlan::new(42.0, 4);
        let plan =
            CompressionPlan::for_target(view(&pixels, 32, 32), ErrorMetric::Variance, &base, 90.0);
        assert_eq!(plan.mode(), SplitMode::MetricDriven);
        assert_eq!(plan.min_block_size(), 4);
        assert!(plan.threshold() > 0.0);
    }

    #[test]
    fn search_ceiling_widens_with_target() {
        for metric in [
            ErrorMetric::Variance,
            ErrorMetric::Mad,
            ErrorMetric::MaxPixelDiff,
            ErrorMetric::Entropy,
            ErrorMetric::SimilarityIndex,
        ] {
            let bands = [
                search_ceiling(metric, 80.0),
                search_ceiling(metric, 90.0),
                search_ceiling(metric, 99.0),
            ];
            assert!(bands[0] < bands[1] && bands[1] < bands[2], "{metric}");
        }
    }

    #[test]
    fn limits_for_hybrid_depend_on_center_overlap() {
        let plan = CompressionPlan {
            threshold: 1.0,
            min_block_size: 1,
            max_depth: 7,
            mode: SplitMode::Hybrid {
                center: Rect::new(16, 16, 32, 32),
                center_min_block: 1,
                center_max_depth: 10,
                outer_min_block: 4,
                outer_max_depth: 4,
            },
            timeout: None,
        };
        assert_eq!(plan.limits_for(&Rect::new(20, 20, 8, 8)), (1, 10, false));
        assert_eq!(plan.limits_for(&Rect::new(0, 0, 8, 8)), (4, 4, false));
        // Straddling the boundary counts as center.
        assert_eq!(plan.limits_for(&Rect::new(12, 12, 8, 8)), (1, 10, false));
    }
}
