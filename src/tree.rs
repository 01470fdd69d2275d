//! Contains the quadtree itself: nodes, tree metrics, and reconstruction.

use crate::{plan::CompressionPlan, ErrorMetric, Rect};
use palette::Srgb;
use std::{fs, io, path::Path};
#[cfg(feature = "image")]
use {image::RgbImage, palette::cast::IntoComponents};

/// The color assigned to nodes whose region has no valid pixels.
pub(crate) const NEUTRAL_GRAY: Srgb<u8> = Srgb::new(128, 128, 128);

/// A node of the quadtree.
///
/// A node is either a leaf (no children) or an internal node with exactly
/// four children whose rectangles partition the node's rectangle. Each parent
/// exclusively owns its children; the structure is a strict out-tree.
///
/// A leaf always carries a representative color (the mean of the source
/// pixels inside its bounds-clamped rectangle), so tree descent can stop at
/// any level and still paint something meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuadtreeNode {
    /// The rectangle this node covers.
    rect: Rect,
    /// The representative color of the covered region.
    color: Srgb<u8>,
    /// The four children of an internal node.
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl QuadtreeNode {
    /// Creates a new leaf covering `rect` with a neutral placeholder color.
    pub(crate) const fn new(rect: Rect) -> Self {
        Self { rect, color: NEUTRAL_GRAY, children: None }
    }

    /// Sets the representative color.
    pub(crate) fn set_color(&mut self, color: Srgb<u8>) {
        self.color = color;
    }

    /// Attaches the four children, turning this node into an internal node.
    pub(crate) fn set_children(&mut self, children: Box<[QuadtreeNode; 4]>) {
        self.children = Some(children);
    }

    /// The rectangle this node covers.
    #[must_use]
    pub const fn rect(&self) -> Rect {
        self.rect
    }

    /// The representative color of the covered region.
    #[must_use]
    pub const fn color(&self) -> Srgb<u8> {
        self.color
    }

    /// The children of an internal node, or `None` for a leaf.
    #[must_use]
    pub fn children(&self) -> Option<&[QuadtreeNode; 4]> {
        self.children.as_deref()
    }

    /// Whether this node is a leaf.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// The depth of the subtree rooted at this node (a leaf has depth 1).
    #[must_use]
    pub fn depth(&self) -> u32 {
        match &self.children {
            None => 1,
            Some(children) => {
                1 + children
                    .iter()
                    .map(QuadtreeNode::depth)
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    /// The number of nodes in the subtree rooted at this node.
    #[must_use]
    pub fn node_count(&self) -> u64 {
        1 + self
            .children
            .iter()
            .flat_map(|c| c.iter())
            .map(QuadtreeNode::node_count)
            .sum::<u64>()
    }

    /// The number of leaves in the subtree rooted at this node.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        match &self.children {
            None => 1,
            Some(children) => children.iter().map(QuadtreeNode::leaf_count).sum(),
        }
    }

    /// Paints this subtree into `pixels` (a `width x height` row-major
    /// buffer): each leaf fills its bounds-clamped rectangle with its color.
    fn paint(&self, pixels: &mut [Srgb<u8>], width: u32, height: u32) {
        match &self.children {
            Some(children) => {
                for child in children.iter() {
                    child.paint(pixels, width, height);
                }
            }
            None => {
                let Some(rect) = self.rect.clamp_to(width, height) else {
                    return;
                };
                for y in rect.y..rect.y + rect.height {
                    let start = y as usize * width as usize + rect.x as usize;
                    pixels[start..start + rect.width as usize].fill(self.color);
                }
            }
        }
    }
}

/// A built quadtree over a source image.
///
/// Produced by [`TreeBuilder`](crate::TreeBuilder) or the
/// [`CompressPipeline`](crate::CompressPipeline); queryable for tree metrics
/// and for the reconstructed raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadtree {
    /// The root node, covering the whole image.
    root: QuadtreeNode,
    /// The source image width.
    width: u32,
    /// The source image height.
    height: u32,
    /// The metric the tree was built with.
    metric: ErrorMetric,
    /// The effective plan, including any threshold rewritten by the
    /// adaptive search.
    plan: CompressionPlan,
}

impl Quadtree {
    /// Assembles a built tree.
    pub(crate) const fn new(
        root: QuadtreeNode,
        width: u32,
        height: u32,
        metric: ErrorMetric,
        plan: CompressionPlan,
    ) -> Self {
        Self { root, width, height, metric, plan }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> &QuadtreeNode {
        &self.root
    }

    /// The source image width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The source image height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// The metric the tree was built with.
    #[must_use]
    pub const fn metric(&self) -> ErrorMetric {
        self.metric
    }

    /// The effective plan the tree was built with.
    ///
    /// When an adaptive threshold search ran, this holds the threshold it
    /// settled on rather than the caller-supplied one.
    #[must_use]
    pub const fn plan(&self) -> &CompressionPlan {
        &self.plan
    }

    /// The tree depth (a single-leaf tree has depth 1).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }

    /// The total number of nodes.
    #[must_use]
    pub fn node_count(&self) -> u64 {
        self.root.node_count()
    }

    /// The number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        self.root.leaf_count()
    }

    /// The structural compression percentage:
    /// `(1 - leaves / totalPixels) * 100`.
    ///
    /// This is a proxy based on tree granularity, not on encoded file sizes;
    /// see [`file_compression_percent`] for the file-size-based figure.
    #[must_use]
    pub fn structural_compression_percent(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let total = (self.width as u64 * self.height as u64) as f64;
        if total == 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let leaves = self.leaf_count() as f64;
        (1.0 - leaves / total) * 100.0
    }

    /// Rebuilds a raster from the tree: a zeroed `width x height` buffer
    /// where every leaf's rectangle is filled with its representative color.
    ///
    /// Under correct construction the leaves tile the image completely, so
    /// no pixel remains zero.
    #[must_use]
    pub fn reconstruct(&self) -> Vec<Srgb<u8>> {
        let mut pixels =
            vec![Srgb::new(0u8, 0, 0); self.width as usize * self.height as usize];
        self.root.paint(&mut pixels, self.width, self.height);
        pixels
    }

    /// Rebuilds the raster as an [`RgbImage`].
    #[cfg(feature = "image")]
    #[must_use]
    pub fn reconstructed_rgbimage(&self) -> RgbImage {
        let buf = self.reconstruct().into_components();
        #[allow(clippy::expect_used)]
        {
            // reconstruct() allocates exactly width * height pixels
            RgbImage::from_vec(self.width, self.height, buf).expect("large enough buffer")
        }
    }
}

/// The compression percentage by encoded file size:
/// `(1 - compressedBytes / originalBytes) * 100`.
///
/// This queries the filesystem for both paths and is the preferred figure
/// when both files exist; fall back to
/// [`Quadtree::structural_compression_percent`] otherwise. Negative results
/// mean the compressed file is larger than the original.
///
/// # Errors
/// Returns an error if either file's size cannot be queried or is zero.
pub fn file_compression_percent(
    original: impl AsRef<Path>,
    compressed: impl AsRef<Path>,
) -> io::Result<f64> {
    let original_size = fs::metadata(original)?.len();
    let compressed_size = fs::metadata(compressed)?.len();
    if original_size == 0 || compressed_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file sizes must be non-zero",
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    Ok((1.0 - compressed_size as f64 / original_size as f64) * 100.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A 4x4 tree: root split once, all four quadrants leaves.
    fn sample_tree() -> Quadtree {
        let mut root = QuadtreeNode::new(Rect::new(0, 0, 4, 4));
        let colors = [
            Srgb::new(10u8, 0, 0),
            Srgb::new(0u8, 20, 0),
            Srgb::new(0u8, 0, 30),
            Srgb::new(40u8, 40, 40),
        ];
        let quads = root.rect().split_quadrants();
        let children = std::array::from_fn(|i| {
            let mut child = QuadtreeNode::new(quads[i]);
            child.set_color(colors[i]);
            child
        });
        root.set_children(Box::new(children));
        Quadtree::new(root, 4, 4, ErrorMetric::Variance, CompressionPlan::default())
    }

    #[test]
    fn counts_and_depth() {
        let tree = sample_tree();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn single_leaf_tree() {
        let mut root = QuadtreeNode::new(Rect::new(0, 0, 3, 3));
        root.set_color(Srgb::new(7u8, 7, 7));
        let tree =
            Quadtree::new(root, 3, 3, ErrorMetric::Variance, CompressionPlan::default());
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.leaf_count(), 1);
        assert!(tree.reconstruct().iter().all(|&p| p == Srgb::new(7u8, 7, 7)));
    }

    #[test]
    fn reconstruction_paints_each_leaf_rect() {
        let tree = sample_tree();
        let pixels = tree.reconstruct();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let expected = match (x < 2, y < 2) {
                    (true, true) => Srgb::new(10u8, 0, 0),
                    (false, true) => Srgb::new(0u8, 20, 0),
                    (true, false) => Srgb::new(0u8, 0, 30),
                    (false, false) => Srgb::new(40u8, 40, 40),
                };
                assert_eq!(pixels[(y * 4 + x) as usize], expected, "({x}, {y})");
            }
        }
    }

    #[test]
    fn out_of_bounds_leaf_is_skipped() {
        let mut root = QuadtreeNode::new(Rect::new(0, 0, 2, 2));
        let mut inside = QuadtreeNode::new(Rect::new(0, 0, 2, 2));
        inside.set_color(Srgb::new(50u8, 50, 50));
        let outside = QuadtreeNode::new(Rect::new(2, 2, 2, 2));
        root.set_children(Box::new([
            inside.clone(),
            outside.clone(),
            outside.clone(),
            outside,
        ]));
        let tree =
            Quadtree::new(root, 2, 2, ErrorMetric::Variance, CompressionPlan::default());
        assert!(tree.reconstruct().iter().all(|&p| p == Srgb::new(50u8, 50, 50)));
    }

    #[test]
    fn structural_percent() {
        let tree = sample_tree();
        // 4 leaves over 16 pixels.
        assert!((tree.structural_compression_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn file_percent_requires_real_files() {
        assert!(file_compression_percent("/nonexistent/a", "/nonexistent/b").is_err());
    }
}
