use std::ops::{Add, Sub};

pub use euclid::{Point2D as Point, Size2D as Extent, Vector2D as Offset};

/// Physical pixels on a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Px();

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect<T, U>(euclid::Box2D<T, U>);

impl<T, U> Rect<T, U> {
    pub fn new(origin: Point<T, U>, extent: Extent<T, U>) -> Self
    where
        T: Copy + Add<T, Output = T>,
    {
        Self(euclid::Box2D::from_origin_and_size(origin, extent))
    }

    pub fn from_extent(extent: Extent<T, U>) -> Self
    where
        T: Copy + Default + Add<T, Output = T>,
    {
        Self::new(Point::new(T::default(), T::default()), extent)
    }

    pub fn top_left(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.min
    }

    pub fn bottom_right(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.max
    }

    pub fn extent(&self) -> Extent<T, U>
    where
        T: Copy + Sub<T, Output = T>,
    {
        self.0.size()
    }
}

/// The region of a render target that a draw rasterizes into, along with the
/// depth range it maps to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering the whole target with the full `[0, 1]` depth
    /// range.
    #[must_use]
    pub fn from_extent(extent: Extent<u32, Px>) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent() {
        let viewport = Viewport::from_extent(Extent::new(1280, 720));
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, 720.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn rect_from_extent() {
        let rect = Rect::<u32, Px>::from_extent(Extent::new(640, 480));
        assert_eq!(rect.top_left(), Point::new(0, 0));
        assert_eq!(rect.bottom_right(), Point::new(640, 480));
        assert_eq!(rect.extent(), Extent::new(640, 480));
    }
}
