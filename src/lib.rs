//! A library for quadtree-based raster image compression.
//!
//! `quadpix` recursively partitions an image into quadrants and replaces
//! homogeneous regions with a single averaged color. Whether a region is
//! homogeneous enough to become a leaf is decided by a pluggable
//! [`ErrorMetric`] compared against a threshold, and the threshold itself can
//! be derived automatically from a target compression percentage.
//!
//! # Features
//! To reduce dependencies and compile times, `quadpix` has several `cargo`
//! features that can be turned off or on:
//! - `pipelines`: exposes the [`CompressPipeline`] builder struct that serves as the high-level API.
//! - `threads`: enables the bounded parallel fan-out during tree construction via [`rayon`].
//! - `image`: enables integration with the [`image`] crate.
//! - `visualize`: captures bounded intermediate snapshots of the build for an external animation encoder.
//!
//! # High-Level API
//! To get started with the high-level API, see [`CompressPipeline`].
//! Here is a short example:
//! ```no_run
//! # use quadpix::{CompressPipeline, ErrorMetric};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = image::open("some image")?.into_rgb8();
//!
//! let compressed = CompressPipeline::try_from(&img)?
//!     .metric(ErrorMetric::Variance)
//!     .threshold(100.0)
//!     .min_block_size(4)
//!     .compress()?;
//!
//! println!(
//!     "{} leaves, {:.1}% structural compression",
//!     compressed.leaf_count(),
//!     compressed.structural_compression_percent(),
//! );
//! compressed.reconstructed_rgbimage().save("out.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! Note that some of the options and functions above require certain features to be enabled.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::pedantic,
    clippy::cargo,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::unwrap_in_result,
    clippy::expect_used,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::string_slice,
    missing_docs,
    clippy::missing_docs_in_private_items,
    rustdoc::all,
    clippy::float_cmp_const,
    clippy::lossy_float_literal
)]
#![allow(
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::many_single_char_names,
    clippy::missing_panics_doc,
    clippy::unreadable_literal,
    clippy::wildcard_imports
)]

mod build;
mod metric;
mod plan;
mod rect;
mod tree;
mod types;

#[cfg(feature = "pipelines")]
mod api;

#[cfg(feature = "visualize")]
mod frames;

pub use build::*;
pub use metric::ErrorMetric;
pub use plan::{CompressionPlan, SplitMode};
pub use rect::Rect;
pub use tree::*;
pub use types::*;

#[cfg(feature = "pipelines")]
pub use api::*;

#[cfg(feature = "visualize")]
pub use frames::{Frame, FrameRecorder};

use std::time::Duration;

/// The maximum supported image size in number of pixels is `u32::MAX`.
pub const MAX_PIXELS: u32 = u32::MAX;

/// The hard cap on quadtree node creation during a single build.
///
/// Once this many nodes have been created, affected subtrees stop subdividing
/// and degrade to leaves.
pub const MAX_NODES: usize = 150_000;

/// Images with more pixels than this recurse into the top one or two levels
/// of the tree concurrently (needs the `threads` feature).
pub const PARALLEL_PIXEL_THRESHOLD: u32 = 500_000;

/// The default wall-clock budget for a single tree build.
///
/// When exceeded, in-flight subtrees degrade to leaves rather than failing
/// the build. Pass `None` as the timeout to disable the budget entirely.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600);

/// The default maximum subdivision depth.
pub const DEFAULT_MAX_DEPTH: u32 = 10;

#[cfg(test)]
#[allow(clippy::unwrap_used, missing_docs, clippy::missing_docs_in_private_items)]
pub(crate) mod tests {
    use crate::PixelView;
    use palette::Srgb;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoroshiro128PlusPlus;

    /// A width x height image of a single color.
    pub fn uniform_image(width: u32, height: u32, color: Srgb<u8>) -> Vec<Srgb<u8>> {
        vec![color; width as usize * height as usize]
    }

    /// A 4x4 image: left two columns black, right two columns white.
    pub fn two_halves_4x4() -> Vec<Srgb<u8>> {
        let black = Srgb::new(0u8, 0, 0);
        let white = Srgb::new(255u8, 255, 255);
        let mut pixels = Vec::with_capacity(16);
        for _y in 0..4 {
            pixels.extend_from_slice(&[black, black, white, white]);
        }
        pixels
    }

    /// Deterministic per-pixel noise.
    pub fn noise_image(width: u32, height: u32, seed: u64) -> Vec<Srgb<u8>> {
        let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
        (0..width as usize * height as usize)
            .map(|_| Srgb::new(rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()))
            .collect()
    }

    pub fn view(pixels: &[Srgb<u8>], width: u32, height: u32) -> PixelView<'_> {
        PixelView::new(pixels, width, height).unwrap()
    }
}
