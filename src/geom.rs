//! Axis-aligned bounding boxes used to bound selectors, files and octree cells.
//!
//! Every spatial object in the crate can be reduced to an [`Aabb`], which is
//! what file selection, overlap detection and octree subdivision work with.
//! Boxes are closed on the low side and open on the high side when used to
//! assign particles to octants, so a particle sitting exactly on a split plane
//! lands in exactly one child.

use nalgebra::{Point3, Vector3};
use ndarray::ArrayView2;
use ndarray_stats::QuantileExt;

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::array;

    #[test]
    fn from_positions_bounds_all_points() {
        let positions = array![[0.0, 1.0, 2.0], [3.0, -1.0, 0.5], [1.0, 0.0, 4.0]];
        let aabb = Aabb::from_positions(positions.view()).unwrap();
        assert_eq!(aabb.min, Point3::new(0.0, -1.0, 0.5));
        assert_eq!(aabb.max, Point3::new(3.0, 1.0, 4.0));
    }

    #[test]
    fn empty_positions_have_no_bounds() {
        let positions = ndarray::Array2::<f64>::zeros((0, 3));
        assert!(Aabb::from_positions(positions.view()).is_none());
    }

    #[test]
    fn octants_partition_the_box() {
        let aabb = Aabb::new(Point3::origin(), Point3::new(2.0, 2.0, 2.0));
        let p = Point3::new(1.5, 0.5, 1.5);
        let octant = aabb.octant_of(&p);
        assert_eq!(octant, 0b101);
        assert!(aabb.octant(octant).contains(&p));
        // split planes belong to the upper child
        assert_eq!(aabb.octant_of(&Point3::new(1.0, 1.0, 1.0)), 0b111);
    }

    #[test]
    fn expanded_box_intersects_neighbour() {
        let a = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(1.5, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&b));
        assert!(a.expanded(0.6).intersects(&b));
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Box centred on `center` with half-width `radius` along every axis.
    pub fn around(center: &Point3<f64>, radius: f64) -> Self {
        let half = Vector3::repeat(radius);
        Self::new(center - half, center + half)
    }

    /// Smallest box containing every row of an `n x 3` position array.
    /// Returns `None` for an empty array or when a coordinate is NaN.
    pub fn from_positions(positions: ArrayView2<'_, f64>) -> Option<Self> {
        if positions.nrows() == 0 {
            return None;
        }
        let mut min = Point3::origin();
        let mut max = Point3::origin();
        for axis in 0..3 {
            let column = positions.column(axis);
            min[axis] = *column.min().ok()?;
            max[axis] = *column.max().ok()?;
        }
        Some(Self::new(min, max))
    }

    /// Closed containment test.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Grow the box by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        let pad = Vector3::repeat(margin);
        Self::new(self.min - pad, self.max + pad)
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self::new(
            self.min.inf(&other.min),
            self.max.sup(&other.max),
        )
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn width(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Index (0..8) of the octant holding `p`; bit 0 is x, bit 1 is y, bit 2 is z.
    pub fn octant_of(&self, p: &Point3<f64>) -> usize {
        let c = self.center();
        (0..3).fold(0, |acc, i| if p[i] >= c[i] { acc | (1 << i) } else { acc })
    }

    /// The child box for octant `index`.
    pub fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let mut min = self.min;
        let mut max = c;
        for i in 0..3 {
            if index & (1 << i) != 0 {
                min[i] = c[i];
                max[i] = self.max[i];
            }
        }
        Aabb::new(min, max)
    }

    /// Squared distance from `p` to the closest point of the box (zero inside).
    pub fn distance_squared(&self, p: &Point3<f64>) -> f64 {
        (0..3)
            .map(|i| {
                let d = (self.min[i] - p[i]).max(0.0).max(p[i] - self.max[i]);
                d * d
            })
            .sum()
    }
}
