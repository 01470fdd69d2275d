//! Contains the integer rectangle type used for node geometry.

/// An axis-aligned rectangle in pixel coordinates.
///
/// Every quadtree node covers exactly one [`Rect`]; a node's rectangle is
/// always contained in its parent's rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    /// The x coordinate of the top-left corner.
    pub x: u32,
    /// The y coordinate of the top-left corner.
    pub y: u32,
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
}

impl Rect {
    /// Creates a new [`Rect`].
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The area in pixels.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Splits this rectangle into its four quadrants.
    ///
    /// The first quadrant is `floor(width / 2) x floor(height / 2)` at
    /// `(x, y)`; the remaining three cover the rest, so odd dimensions yield
    /// slightly larger trailing children. The quadrants are pairwise disjoint
    /// and their union is exactly `self`. Both dimensions must be at least 2,
    /// otherwise a trailing quadrant would be empty.
    #[must_use]
    pub fn split_quadrants(&self) -> [Rect; 4] {
        let half_w = (self.width / 2).max(1);
        let half_h = (self.height / 2).max(1);
        let Self { x, y, width, height } = *self;
        [
            Rect::new(x, y, half_w, half_h),
            Rect::new(x + half_w, y, width - half_w, half_h),
            Rect::new(x, y + half_h, half_w, height - half_h),
            Rect::new(x + half_w, y + half_h, width - half_w, height - half_h),
        ]
    }

    /// Intersects this rectangle with a `width x height` buffer anchored at
    /// the origin, returning `None` when the intersection is empty.
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height || self.width == 0 || self.height == 0 {
            return None;
        }
        let end_x = (self.x + self.width).min(width);
        let end_y = (self.y + self.height).min(height);
        Some(Rect::new(self.x, self.y, end_x - self.x, end_y - self.y))
    }

    /// Whether this rectangle and `other` share at least one pixel.
    #[must_use]
    pub const fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// A rectangle of `ratio * width` by `ratio * height` centered in a
    /// `width x height` buffer.
    #[must_use]
    pub(crate) fn centered_fraction(width: u32, height: u32, ratio: f64) -> Rect {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (w, h) = (
            (f64::from(width) * ratio) as u32,
            (f64::from(height) * ratio) as u32,
        );
        Rect::new((width - w) / 2, (height - h) / 2, w, h)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// The four quadrants must tile the parent exactly.
    fn assert_partitions(parent: Rect) {
        let quads = parent.split_quadrants();

        let total: u64 = quads.iter().map(Rect::area).sum();
        assert_eq!(total, parent.area());

        for (i, a) in quads.iter().enumerate() {
            assert!(a.width >= 1 && a.height >= 1);
            assert!(a.x >= parent.x && a.y >= parent.y);
            assert!(a.x + a.width <= parent.x + parent.width);
            assert!(a.y + a.height <= parent.y + parent.height);
            for b in &quads[i + 1..] {
                assert!(!a.intersects(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn split_even_dimensions() {
        assert_partitions(Rect::new(0, 0, 8, 8));
        let quads = Rect::new(0, 0, 8, 8).split_quadrants();
        assert_eq!(quads[0], Rect::new(0, 0, 4, 4));
        assert_eq!(quads[3], Rect::new(4, 4, 4, 4));
    }

    #[test]
    fn split_odd_dimensions_enlarges_trailing_children() {
        assert_partitions(Rect::new(2, 3, 7, 5));
        let quads = Rect::new(2, 3, 7, 5).split_quadrants();
        assert_eq!(quads[0], Rect::new(2, 3, 3, 2));
        assert_eq!(quads[1], Rect::new(5, 3, 4, 2));
        assert_eq!(quads[2], Rect::new(2, 5, 3, 3));
        assert_eq!(quads[3], Rect::new(5, 5, 4, 3));
    }

    #[test]
    fn split_minimum_size() {
        assert_partitions(Rect::new(0, 0, 2, 2));
        assert_partitions(Rect::new(0, 0, 3, 2));
    }

    #[test]
    fn clamp_to_buffer() {
        assert_eq!(
            Rect::new(6, 0, 4, 4).clamp_to(8, 8),
            Some(Rect::new(6, 0, 2, 4))
        );
        assert_eq!(Rect::new(8, 0, 4, 4).clamp_to(8, 8), None);
        assert_eq!(Rect::new(0, 0, 0, 4).clamp_to(8, 8), None);
        assert_eq!(
            Rect::new(1, 1, 2, 2).clamp_to(8, 8),
            Some(Rect::new(1, 1, 2, 2))
        );
    }

    #[test]
    fn centered_fraction_is_centered() {
        let center = Rect::centered_fraction(100, 60, 0.4);
        assert_eq!(center, Rect::new(30, 18, 40, 24));
    }
}
