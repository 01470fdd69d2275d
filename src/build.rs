//! Contains the tree builder: the recursive subdivision loop with its
//! resource guards.
//!
//! A build never hard-fails. When the node cap or the wall-clock budget is
//! hit, subdivision stops where it is, the affected nodes stay leaves, and
//! the truncation is reported through [`BuildOutcome`].

use crate::{
    metric::Region, plan::CompressionPlan, ErrorMetric, PixelView, Quadtree, QuadtreeNode, Rect,
    MAX_NODES,
};
#[cfg(feature = "visualize")]
use crate::{Frame, FrameRecorder};
#[cfg(feature = "threads")]
use crate::PARALLEL_PIXEL_THRESHOLD;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// How often the watchdog thread checks the elapsed time.
const WATCHDOG_TICK: Duration = Duration::from_millis(100);

/// How a build finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Subdivision ran to completion everywhere.
    Complete,
    /// One or more resource guards stopped subdivision early. The tree is
    /// still valid and fully paintable, just coarser than requested.
    Truncated {
        /// The wall-clock budget ran out.
        timed_out: bool,
        /// The node count reached [`MAX_NODES`].
        node_cap_hit: bool,
    },
}

impl BuildOutcome {
    /// Whether subdivision ran to completion.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, BuildOutcome::Complete)
    }
}

/// The result of a tree build.
#[derive(Debug, Clone)]
pub struct TreeBuild {
    /// The built tree.
    pub tree: Quadtree,
    /// How the build finished.
    pub outcome: BuildOutcome,
    /// Intermediate construction frames, empty unless capture was enabled.
    #[cfg(feature = "visualize")]
    pub frames: Vec<Frame>,
}

/// Flags shared with the watchdog thread.
#[derive(Debug, Default)]
struct WatchdogFlags {
    /// Set by the watchdog when the budget runs out.
    timed_out: AtomicBool,
    /// Set by the build when it finishes, letting the watchdog exit early.
    done: AtomicBool,
}

/// State shared across the (possibly parallel) subdivision recursion.
struct Shared<'a> {
    view: PixelView<'a>,
    metric: ErrorMetric,
    plan: &'a CompressionPlan,
    flags: Arc<WatchdogFlags>,
    /// Total nodes allocated so far, root included.
    nodes: AtomicUsize,
    node_cap_hit: AtomicBool,
    #[cfg(feature = "visualize")]
    recorder: Option<FrameRecorder>,
}

/// Builds a [`Quadtree`] over a [`PixelView`] under a [`CompressionPlan`].
///
/// # Examples
/// ```
/// # use quadpix::{CompressionPlan, ErrorMetric, PixelView, TreeBuilder};
/// # use palette::Srgb;
/// let pixels = vec![Srgb::new(0u8, 0, 0); 64];
/// let view = PixelView::new(&pixels, 8, 8).unwrap();
/// let plan = CompressionPlan::new(10.0, 1);
/// let build = TreeBuilder::new(view, ErrorMetric::Variance, plan).build();
/// assert!(build.outcome.is_complete());
/// assert_eq!(build.tree.leaf_count(), 1); // a uniform image never splits
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct TreeBuilder<'a> {
    view: PixelView<'a>,
    metric: ErrorMetric,
    plan: CompressionPlan,
    #[cfg(feature = "visualize")]
    capture_frames: bool,
}

impl<'a> TreeBuilder<'a> {
    /// Creates a builder for the given view, metric, and plan.
    pub const fn new(view: PixelView<'a>, metric: ErrorMetric, plan: CompressionPlan) -> Self {
        Self {
            view,
            metric,
            plan,
            #[cfg(feature = "visualize")]
            capture_frames: false,
        }
    }

    /// Sets whether to record intermediate construction frames.
    #[cfg(feature = "visualize")]
    pub const fn capture_frames(mut self, capture: bool) -> Self {
        self.capture_frames = capture;
        self
    }

    /// Runs the build.
    pub fn build(self) -> TreeBuild {
        let flags = Arc::new(WatchdogFlags::default());
        if let Some(timeout) = self.plan.timeout() {
            spawn_watchdog(Arc::clone(&flags), timeout);
        }

        let shared = Shared {
            view: self.view,
            metric: self.metric,
            plan: &self.plan,
            flags,
            nodes: AtomicUsize::new(1),
            node_cap_hit: AtomicBool::new(false),
            #[cfg(feature = "visualize")]
            recorder: self.capture_frames.then(FrameRecorder::new),
        };

        let mut root =
            QuadtreeNode::new(Rect::new(0, 0, self.view.width(), self.view.height()));
        grow(&shared, &mut root, 0);
        shared.flags.done.store(true, Ordering::Relaxed);

        let timed_out = shared.flags.timed_out.load(Ordering::Relaxed);
        let node_cap_hit = shared.node_cap_hit.load(Ordering::Relaxed);
        #[cfg(feature = "visualize")]
        let frames = shared.recorder.map(FrameRecorder::into_frames).unwrap_or_default();

        let outcome = if timed_out || node_cap_hit {
            log::warn!(
                "tree build truncated (timed out: {timed_out}, node cap hit: {node_cap_hit})"
            );
            BuildOutcome::Truncated { timed_out, node_cap_hit }
        } else {
            BuildOutcome::Complete
        };

        TreeBuild {
            tree: Quadtree::new(
                root,
                self.view.width(),
                self.view.height(),
                self.metric,
                self.plan,
            ),
            outcome,
            #[cfg(feature = "visualize")]
            frames,
        }
    }
}

/// The watchdog polls rather than sleeping the full budget so it can exit
/// promptly once the build finishes.
fn spawn_watchdog(flags: Arc<WatchdogFlags>, timeout: Duration) {
    let start = Instant::now();
    thread::spawn(move || loop {
        thread::sleep(WATCHDOG_TICK);
        if flags.done.load(Ordering::Relaxed) {
            break;
        }
        if start.elapsed() >= timeout {
            flags.timed_out.store(true, Ordering::Relaxed);
            break;
        }
    });
}

/// Subdivides `node` (a fresh neutral leaf) recursively.
///
/// Ordering of the guards matters: the timeout and node-cap checks come
/// first and leave the node on its neutral placeholder color, the
/// out-of-bounds check leaves it neutral too, and only then do the limit
/// and metric checks run, both of which give the leaf its real mean color.
fn grow(shared: &Shared<'_>, node: &mut QuadtreeNode, depth: u32) {
    if shared.flags.timed_out.load(Ordering::Relaxed) {
        return;
    }
    if shared.nodes.load(Ordering::Relaxed) > MAX_NODES {
        shared.node_cap_hit.store(true, Ordering::Relaxed);
        return;
    }
    let rect = node.rect();
    let Some(region) = Region::new(shared.view, rect) else {
        return;
    };

    let (min_block, max_depth, metric_driven) = shared.plan.limits_for(&rect);
    if depth > max_depth || rect.width <= min_block || rect.height <= min_block {
        node.set_color(region.mean_color());
        return;
    }
    if metric_driven {
        let color = region.mean_color();
        node.set_color(color);
        if shared.metric.evaluate(&region, Some(color)) < shared.plan.threshold() {
            return;
        }
    }

    #[cfg(feature = "visualize")]
    if let Some(recorder) = &shared.recorder {
        if depth <= 1 || depth == 3 || depth == 5 {
            recorder.offer(shared.view, rect);
        }
    }

    shared.nodes.fetch_add(4, Ordering::Relaxed);
    let mut children = Box::new(rect.split_quadrants().map(QuadtreeNode::new));

    #[cfg(feature = "threads")]
    if shared.view.pixel_count() > u64::from(PARALLEL_PIXEL_THRESHOLD) && depth <= 1 {
        let [a, b, c, d] = &mut *children;
        rayon::join(
            || rayon::join(|| grow(shared, a, depth + 1), || grow(shared, b, depth + 1)),
            || rayon::join(|| grow(shared, c, depth + 1), || grow(shared, d, depth + 1)),
        );
        node.set_children(children);
        return;
    }

    for child in children.iter_mut() {
        // Once the budget runs out, remaining children stay neutral leaves.
        if shared.flags.timed_out.load(Ordering::Relaxed) {
            break;
        }
        grow(shared, child, depth + 1);
    }
    node.set_children(children);
}
