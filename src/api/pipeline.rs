use crate::{
    plan::CompressionPlan, BuildOutcome, ErrorMetric, ParamError, PixelView, Quadtree,
    SplitMode, TreeBuilder, DEFAULT_TIMEOUT,
};
use palette::Srgb;
use std::time::Duration;

#[cfg(feature = "visualize")]
use crate::Frame;
#[cfg(feature = "image")]
use {crate::AboveMaxLen, image::RgbImage};

/// A builder struct to specify the parameters for compressing an image into
/// a quadtree.
///
/// # Examples
/// ```
/// # use quadpix::{CompressPipeline, ErrorMetric, PixelView};
/// # use palette::Srgb;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pixels = vec![Srgb::new(40u8, 40, 40); 64 * 64];
/// let view = PixelView::new(&pixels, 64, 64).ok_or("bad dimensions")?;
///
/// let compressed = CompressPipeline::new(view)
///     .metric(ErrorMetric::Mad)
///     .threshold(2.0)
///     .min_block_size(4)
///     .compress()?;
///
/// assert_eq!(compressed.leaf_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct CompressPipeline<'a> {
    /// The source image.
    view: PixelView<'a>,
    /// The error-metric cutoff below which a region becomes a leaf.
    threshold: f64,
    /// The smallest block dimension before a leaf is forced.
    min_block_size: u32,
    /// The homogeneity metric.
    metric: ErrorMetric,
    /// The target compression percentage; `0.0` disables the adaptive
    /// threshold search.
    target_compression: f64,
    /// The wall-clock budget for the build.
    timeout: Option<Duration>,
    /// Whether to record intermediate construction frames.
    #[cfg(feature = "visualize")]
    capture_frames: bool,
}

impl<'a> CompressPipeline<'a> {
    /// Creates a new [`CompressPipeline`] with default values.
    pub const fn new(view: PixelView<'a>) -> Self {
        Self {
            view,
            threshold: 100.0,
            min_block_size: 4,
            metric: ErrorMetric::Variance,
            target_compression: 0.0,
            timeout: Some(DEFAULT_TIMEOUT),
            #[cfg(feature = "visualize")]
            capture_frames: false,
        }
    }

    /// Sets the error-metric threshold below which a region becomes a leaf.
    ///
    /// The default is `100.0`, a mid-range value for the default
    /// [`Variance`](ErrorMetric::Variance) metric. Sensible ranges differ
    /// per metric; see [`ErrorMetric`].
    pub const fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the smallest block dimension before a leaf is forced.
    ///
    /// The default is `4`. Power-of-two values align blocks with the
    /// quadrant grid; other values still work but waste some granularity.
    pub const fn min_block_size(mut self, min_block_size: u32) -> Self {
        self.min_block_size = min_block_size;
        self
    }

    /// Sets the homogeneity metric.
    ///
    /// The default is [`Variance`](ErrorMetric::Variance).
    pub const fn metric(mut self, metric: ErrorMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Sets a target compression percentage, deriving the effective
    /// threshold and block limits automatically instead of using the
    /// explicitly configured ones.
    ///
    /// The default is `0.0`, which disables the adaptive search.
    pub const fn target_compression(mut self, percent: f64) -> Self {
        self.target_compression = percent;
        self
    }

    /// Sets the wall-clock budget for the build, or `None` to disable it.
    ///
    /// The default is [`DEFAULT_TIMEOUT`]. When the budget runs out the
    /// build degrades unfinished regions to leaves and reports it through
    /// [`Compressed::outcome`].
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether to record bounded intermediate snapshots of the build.
    ///
    /// The default is `false`.
    #[cfg(feature = "visualize")]
    pub const fn capture_frames(mut self, capture: bool) -> Self {
        self.capture_frames = capture;
        self
    }

    /// Runs the compression.
    ///
    /// # Errors
    /// Returns a [`ParamError`] when a configured parameter is invalid.
    /// Resource exhaustion during the build never fails; it is reported
    /// through [`Compressed::outcome`] instead.
    pub fn compress(self) -> Result<Compressed, ParamError> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ParamError::NonPositiveThreshold(self.threshold));
        }
        if self.min_block_size == 0 {
            return Err(ParamError::ZeroMinBlockSize);
        }
        if !(0.0..=100.0).contains(&self.target_compression) {
            return Err(ParamError::TargetOutOfRange(self.target_compression));
        }
        if self.view.width() == 0 || self.view.height() == 0 {
            return Err(ParamError::EmptyImage);
        }
        if !self.min_block_size.is_power_of_two() {
            log::warn!(
                "minimum block size {} is not a power of two and will not align \
                 with the quadrant grid",
                self.min_block_size,
            );
        }

        let base = CompressionPlan::new(self.threshold, self.min_block_size)
            .with_timeout(self.timeout);
        let plan = if self.target_compression > 0.0 {
            CompressionPlan::for_target(self.view, self.metric, &base, self.target_compression)
        } else {
            base
        };

        let builder = TreeBuilder::new(self.view, self.metric, plan);
        #[cfg(feature = "visualize")]
        let builder = builder.capture_frames(self.capture_frames);
        let build = builder.build();

        Ok(Compressed {
            tree: build.tree,
            outcome: build.outcome,
            #[cfg(feature = "visualize")]
            frames: build.frames,
        })
    }
}

#[cfg(feature = "image")]
impl<'a> TryFrom<&'a RgbImage> for CompressPipeline<'a> {
    type Error = AboveMaxLen<u32>;

    fn try_from(image: &'a RgbImage) -> Result<Self, Self::Error> {
        Ok(Self::new(image.try_into()?))
    }
}

/// The result of a [`CompressPipeline`] run: the quadtree plus everything
/// observed while building it.
#[derive(Debug, Clone)]
pub struct Compressed {
    /// The built tree.
    tree: Quadtree,
    /// How the build finished.
    outcome: BuildOutcome,
    /// Intermediate construction frames, empty unless capture was enabled.
    #[cfg(feature = "visualize")]
    frames: Vec<Frame>,
}

impl Compressed {
    /// The built quadtree.
    #[must_use]
    pub const fn tree(&self) -> &Quadtree {
        &self.tree
    }

    /// Consumes `self`, returning the quadtree.
    #[must_use]
    pub fn into_tree(self) -> Quadtree {
        self.tree
    }

    /// How the build finished.
    #[must_use]
    pub const fn outcome(&self) -> BuildOutcome {
        self.outcome
    }

    /// The threshold the tree was actually built with.
    ///
    /// This differs from the configured one when a target compression
    /// percentage triggered the adaptive search (and is meaningless for the
    /// grid-driven [`SplitMode`]s, which ignore it).
    #[must_use]
    pub const fn final_threshold(&self) -> f64 {
        self.tree.plan().threshold()
    }

    /// The subdivision policy the tree was built with.
    #[must_use]
    pub const fn split_mode(&self) -> SplitMode {
        self.tree.plan().mode()
    }

    /// The tree depth (a single-leaf tree has depth 1).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.tree.depth()
    }

    /// The total number of tree nodes.
    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.tree.node_count()
    }

    /// The number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        self.tree.leaf_count()
    }

    /// The structural compression percentage; see
    /// [`Quadtree::structural_compression_percent`].
    #[must_use]
    pub fn structural_compression_percent(&self) -> f64 {
        self.tree.structural_compression_percent()
    }

    /// Rebuilds the raster from the tree.
    #[must_use]
    pub fn reconstruct(&self) -> Vec<Srgb<u8>> {
        self.tree.reconstruct()
    }

    /// Rebuilds the raster as an [`RgbImage`].
    #[cfg(feature = "image")]
    #[must_use]
    pub fn reconstructed_rgbimage(&self) -> RgbImage {
        self.tree.reconstructed_rgbimage()
    }

    /// The captured intermediate frames, in build order.
    #[cfg(feature = "visualize")]
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Consumes `self`, returning the captured intermediate frames.
    #[cfg(feature = "visualize")]
    #[must_use]
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
