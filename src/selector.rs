//! Spatial selectors and the regions built from them.
//!
//! A [`Selector`] is a point-inclusion predicate over 3D coordinates. Applying
//! it to an `n x 3` array of positions yields a [`SelectorMask`] of length `n`.
//! A [`Region`] couples a shared selector with the base extent it was built
//! for; regions are immutable, and cloning one shares the selector.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nalgebra::Point3;
use ndarray::{Array1, ArrayView2};

use crate::geom::Aabb;

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::array;

    #[test]
    fn sphere_selects_points_inside_radius() {
        let sphere = SphereSelector::new(Point3::new(0.0, 0.0, 0.0), 1.0);
        let positions = array![[0.0, 0.0, 0.5], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        let mask = sphere.select_points(positions.view());
        assert_eq!(mask, array![true, true, false]);
    }

    #[test]
    fn box_selector_is_closed() {
        let sel = BoxSelector::new(Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0)));
        assert!(sel.contains(&Point3::new(1.0, 0.0, 1.0)));
        assert!(!sel.contains(&Point3::new(1.0, 0.0, 1.01)));
    }

    #[test]
    fn selector_ids_are_unique() {
        let a = AllSelector::new();
        let b = AllSelector::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cloned_region_shares_selector() {
        let region = Region::sphere(Point3::origin(), 2.0);
        let copy = region.clone();
        assert!(Arc::ptr_eq(region.selector(), copy.selector()));
        assert_eq!(region.extent(), Aabb::around(&Point3::origin(), 2.0));
    }
}

/// Boolean inclusion mask, one entry per particle.
pub type SelectorMask = Array1<bool>;

/// Process-unique identity of a selector instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorId(u64);

impl SelectorId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SelectorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SelectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector#{}", self.0)
    }
}

/// A point-inclusion predicate.
pub trait Selector: fmt::Debug {
    /// Identity used to key cached masks.
    fn id(&self) -> SelectorId;

    fn contains(&self, p: &Point3<f64>) -> bool;

    /// Box enclosing every point the selector can accept.
    fn bounding_box(&self) -> Aabb;

    /// Apply the predicate to every row of an `n x 3` position array.
    fn select_points(&self, positions: ArrayView2<'_, f64>) -> SelectorMask {
        positions
            .outer_iter()
            .map(|row| self.contains(&Point3::new(row[0], row[1], row[2])))
            .collect()
    }

    /// Conservative box overlap test used to skip whole files and cells.
    fn may_intersect(&self, aabb: &Aabb) -> bool {
        self.bounding_box().intersects(aabb)
    }
}

/// Selects everything inside a closed box.
#[derive(Debug, Clone)]
pub struct BoxSelector {
    id: SelectorId,
    pub aabb: Aabb,
}

impl BoxSelector {
    pub fn new(aabb: Aabb) -> Self {
        Self {
            id: SelectorId::next(),
            aabb,
        }
    }
}

impl Selector for BoxSelector {
    fn id(&self) -> SelectorId {
        self.id
    }

    fn contains(&self, p: &Point3<f64>) -> bool {
        self.aabb.contains(p)
    }

    fn bounding_box(&self) -> Aabb {
        self.aabb
    }
}

/// Selects everything within `radius` of `center` (boundary included).
#[derive(Debug, Clone)]
pub struct SphereSelector {
    id: SelectorId,
    pub center: Point3<f64>,
    pub radius: f64,
}

impl SphereSelector {
    pub fn new(center: Point3<f64>, radius: f64) -> Self {
        Self {
            id: SelectorId::next(),
            center,
            radius,
        }
    }
}

impl Selector for SphereSelector {
    fn id(&self) -> SelectorId {
        self.id
    }

    fn contains(&self, p: &Point3<f64>) -> bool {
        nalgebra::distance_squared(&self.center, p) <= self.radius * self.radius
    }

    fn bounding_box(&self) -> Aabb {
        Aabb::around(&self.center, self.radius)
    }

    fn may_intersect(&self, aabb: &Aabb) -> bool {
        aabb.distance_squared(&self.center) <= self.radius * self.radius
    }
}

/// Selects every point.
#[derive(Debug, Clone)]
pub struct AllSelector {
    id: SelectorId,
}

impl AllSelector {
    pub fn new() -> Self {
        Self {
            id: SelectorId::next(),
        }
    }
}

impl Default for AllSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for AllSelector {
    fn id(&self) -> SelectorId {
        self.id
    }

    fn contains(&self, _p: &Point3<f64>) -> bool {
        true
    }

    fn bounding_box(&self) -> Aabb {
        let inf = f64::INFINITY;
        Aabb::new(Point3::new(-inf, -inf, -inf), Point3::new(inf, inf, inf))
    }
}

/// A selector together with the base extent it covers.
#[derive(Debug, Clone)]
pub struct Region {
    selector: Arc<dyn Selector>,
    extent: Aabb,
}

impl Region {
    pub fn new(selector: Arc<dyn Selector>) -> Self {
        let extent = selector.bounding_box();
        Self { selector, extent }
    }

    pub fn sphere(center: Point3<f64>, radius: f64) -> Self {
        Self::new(Arc::new(SphereSelector::new(center, radius)))
    }

    pub fn from_box(aabb: Aabb) -> Self {
        Self::new(Arc::new(BoxSelector::new(aabb)))
    }

    pub fn selector(&self) -> &Arc<dyn Selector> {
        &self.selector
    }

    pub fn extent(&self) -> Aabb {
        self.extent
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        self.selector.contains(p)
    }
}
