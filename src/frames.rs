//! Contains intermediate frame capture for visualizing tree construction.
//!
//! Frame capture is best effort: it must never slow the build down or change
//! the resulting tree, so the recorder skips a frame rather than contend on
//! its lock, and the capture cadence is bounded to at most 30 frames.

use crate::{PixelView, Rect};
use palette::Srgb;
use std::sync::Mutex;
#[cfg(feature = "image")]
use {image::RgbImage, palette::cast::IntoComponents};

/// The outline color drawn around the region being subdivided.
const OUTLINE: Srgb<u8> = Srgb::new(255, 0, 0);

/// A snapshot of the source image with the region being subdivided outlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<Srgb<u8>>,
}

impl Frame {
    /// The frame width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The frame height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// The frame pixels in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Srgb<u8>] {
        &self.pixels
    }

    /// Converts the frame into an [`RgbImage`].
    #[cfg(feature = "image")]
    #[must_use]
    pub fn into_rgbimage(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        let buf = self.pixels.into_components();
        #[allow(clippy::expect_used)]
        {
            // a frame always holds exactly width * height pixels
            RgbImage::from_vec(width, height, buf).expect("large enough buffer")
        }
    }

    /// Paints a one-pixel outline of `rect` (clamped to the frame) in red.
    fn outline(&mut self, rect: Rect) {
        let Some(rect) = rect.clamp_to(self.width, self.height) else {
            return;
        };
        let (top, bottom) = (rect.y, rect.y + rect.height - 1);
        for x in rect.x..rect.x + rect.width {
            self.put(x, top);
            self.put(x, bottom);
        }
        let (left, right) = (rect.x, rect.x + rect.width - 1);
        for y in rect.y..rect.y + rect.height {
            self.put(left, y);
            self.put(right, y);
        }
    }

    fn put(&mut self, x: u32, y: u32) {
        self.pixels[y as usize * self.width as usize + x as usize] = OUTLINE;
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    frames: Vec<Frame>,
    /// The number of capture opportunities seen so far.
    offered: u64,
}

/// Collects a bounded sequence of [`Frame`]s during a tree build.
///
/// The cadence thins out as frames accumulate: every offer is captured while
/// fewer than 5 frames exist, then every 40th offer up to 15 frames, then
/// every 80th up to 30, after which capture stops.
#[derive(Debug, Default)]
pub struct FrameRecorder {
    inner: Mutex<RecorderState>,
}

impl FrameRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Offers a capture opportunity for the subdivision of `rect`.
    ///
    /// Skips silently when another thread holds the recorder lock.
    pub(crate) fn offer(&self, view: PixelView<'_>, rect: Rect) {
        let Ok(mut state) = self.inner.try_lock() else {
            return;
        };
        state.offered += 1;
        let capture = match state.frames.len() {
            0..=4 => true,
            5..=14 => state.offered % 40 == 0,
            15..=29 => state.offered % 80 == 0,
            _ => false,
        };
        if !capture {
            return;
        }
        let mut frame = Frame {
            width: view.width(),
            height: view.height(),
            pixels: view.pixels().to_vec(),
        };
        frame.outline(rect);
        state.frames.push(frame);
    }

    /// Consumes the recorder, returning the captured frames in order.
    pub(crate) fn into_frames(self) -> Vec<Frame> {
        self.inner
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .frames
    }
}
