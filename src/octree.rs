//! Particle octree and the [`SpatialIndex`] contract containers build on.
//!
//! The index is constructed over the particles of a file set that fall
//! inside a region (optionally narrowed by a precomputed mask), and answers
//! the cell- and particle-level queries that containers delegate to it.
//!
//! The tree follows the usual particle-octree layout:
//! - the root covers the dataset domain (grown to cover stray particles);
//! - a node splits into eight octants once it holds more than `n_ref`
//!   particles, down to `max_level`;
//! - every leaf is further divided into `nz^3` cells with
//!   `nz = 2^over_refine_factor`, and cell queries operate on the cells of
//!   occupied leaves.
//!
//! Cells and particles are always visited in a canonical order (leaves in
//! node order, cells x-fastest within a leaf; particle types in name order,
//! particles in file order), so arrays returned by different queries line up.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use ndarray::{Array1, Array2, ArrayView1};
use tracing::debug;

use crate::data_file::{FileSet, ParticleBlock, ALL_PARTICLES};
use crate::error::{HaloError, Result};
use crate::geom::Aabb;
use crate::selector::{Region, Selector, SelectorMask};

#[cfg(test)]
mod tests {

    use super::*;
    use crate::data_file::DataFile;
    use crate::selector::{AllSelector, BoxSelector};
    use ndarray::array;

    fn params() -> RefinementParams {
        RefinementParams {
            n_ref: 2,
            over_refine_factor: 0,
            max_level: 8,
            domain: Aabb::new(Point3::origin(), Point3::new(8.0, 8.0, 8.0)),
        }
    }

    fn line_file(sequence: u32, xs: &[f64]) -> Arc<DataFile> {
        let n = xs.len();
        let mut positions = Array2::zeros((n, 3));
        for (i, x) in xs.iter().enumerate() {
            positions[[i, 0]] = *x;
            positions[[i, 1]] = 1.0;
            positions[[i, 2]] = 1.0;
        }
        let ids = Array1::from_iter((0..n).map(|i| sequence as i64 * 100 + i as i64));
        let masses = Array1::from_elem(n, 2.0);
        let block = ParticleBlock::new(positions, Array2::zeros((n, 3)), masses, ids).unwrap();
        Arc::new(DataFile::new(sequence, "snap", format!("snap.{sequence}"), [("io", block)]))
    }

    fn build(region: Region, files: &FileSet) -> ParticleOctree {
        ParticleOctree::build(&region, files, &FileSet::empty(), None, &params()).unwrap()
    }

    #[test]
    fn build_keeps_only_particles_in_region() {
        let files = FileSet::new([line_file(0, &[0.5, 1.5, 2.5, 6.5])]);
        let region = Region::from_box(Aabb::new(Point3::origin(), Point3::new(3.0, 8.0, 8.0)));
        let octree = build(region, &files);
        assert_eq!(octree.particle_ids("io"), array![0, 1, 2]);
        assert_eq!(octree.count_particles(&AllSelector::new()), 3);
    }

    #[test]
    fn leaves_respect_n_ref() {
        let files = FileSet::new([line_file(0, &[0.1, 0.2, 0.3, 0.4, 4.5, 5.5])]);
        let octree = build(Region::from_box(params().domain), &files);
        assert!(octree.leaves.iter().all(|&leaf| octree.nodes[leaf].particles.len() <= 2));
        assert_eq!(octree.leaf_of.len(), 6);
    }

    #[test]
    fn precomputed_mask_filters_particles() {
        let files = FileSet::new([line_file(0, &[0.5, 1.5, 2.5])]);
        let mask = array![true, false, true];
        let octree = ParticleOctree::build(
            &Region::from_box(params().domain),
            &files,
            &FileSet::empty(),
            Some(&mask),
            &params(),
        )
        .unwrap();
        assert_eq!(octree.particle_ids(ALL_PARTICLES), array![0, 2]);
    }

    #[test]
    fn mask_length_must_match_particle_count() {
        let files = FileSet::new([line_file(0, &[0.5, 1.5, 2.5])]);
        let mask = array![true, false];
        let result = ParticleOctree::build(
            &Region::from_box(params().domain),
            &files,
            &FileSet::empty(),
            Some(&mask),
            &params(),
        );
        assert!(matches!(result, Err(HaloError::Configuration(_))));
    }

    #[test]
    fn cell_queries_line_up() {
        let files = FileSet::new([line_file(0, &[0.5, 1.5, 2.5, 3.5, 6.5])]);
        let octree = build(Region::from_box(params().domain), &files);
        let all = AllSelector::new();
        let n = octree.count(&all);
        assert_eq!(octree.select_fcoords(&all).nrows(), n);
        assert_eq!(octree.select_fwidth(&all).nrows(), n);
        assert_eq!(octree.select_icoords(&all).nrows(), n);
        assert_eq!(octree.select_ires(&all).len(), n);
        assert_eq!(octree.select(&all).iter().filter(|&&m| m).count(), n);
        let counts = octree.deposit(&all, "io", "particle_mass", DepositMethod::Count).unwrap();
        assert_eq!(counts.sum(), 5.0);
        let mass = octree.deposit(&all, "io", "particle_mass", DepositMethod::Sum).unwrap();
        assert_eq!(mass.sum(), 10.0);
    }

    #[test]
    fn select_blocks_reports_selected_particles() {
        let files = FileSet::new([line_file(0, &[0.5, 1.5, 2.5, 6.5])]);
        let octree = build(Region::from_box(params().domain), &files);
        let near = BoxSelector::new(Aabb::new(Point3::origin(), Point3::new(2.0, 8.0, 8.0)));
        let selected: usize = octree.select_blocks(&near).iter().map(|b| b.particles.len()).sum();
        assert_eq!(selected, 2);
    }

    #[test]
    fn smooth_averages_within_leaf() {
        let files = FileSet::new([line_file(0, &[0.5, 0.6])]);
        let octree = build(Region::from_box(params().domain), &files);
        let smoothed = octree.smooth(&AllSelector::new(), "io", "particle_identity").unwrap();
        assert_eq!(smoothed, array![0.5, 0.5]);
    }

    #[test]
    fn widen_pulls_in_neighbouring_files() {
        let inner = line_file(0, &[0.25, 0.75, 1.25, 1.75, 2.25, 2.75]);
        let outer = line_file(1, &[3.2, 7.0]);
        let region = Region::from_box(Aabb::new(Point3::origin(), Point3::new(3.0, 8.0, 8.0)));
        let octree = build(region, &FileSet::new([inner.clone()]));
        let union = FileSet::new([inner, outer]);
        let widened = octree.widen(&union, 1, false).unwrap();
        assert_eq!(widened.ghost_zones(), 1);
        assert!(widened.particle_ids("io").iter().any(|&id| id == 100));
        assert!(!widened.particle_ids("io").iter().any(|&id| id == 101));
        assert!(widened.overlap_files().is_empty());
        // the source index is untouched
        assert_eq!(octree.particle_ids("io").len(), 6);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let files = FileSet::new([line_file(0, &[0.5])]);
        let octree = build(Region::from_box(params().domain), &files);
        assert!(matches!(
            octree.particle_field("io", "particle_spin"),
            Err(HaloError::UnknownField { .. })
        ));
    }
}

/// Refinement parameters for index construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementParams {
    pub n_ref: usize,            // particles per leaf before it splits
    pub over_refine_factor: u32, // leaves hold (2^factor)^3 cells
    pub max_level: u32,          // deepest node level
    pub domain: Aabb,            // root extent
}

/// How particle values are deposited onto cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositMethod {
    Count,
    Sum,
    Mean,
}

/// The selected particles of one occupied leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct OctBlock {
    pub leaf: usize,
    pub level: u32,
    pub bounds: Aabb,
    pub particles: Vec<usize>, // indices into the `all` particle arrays
}

/// Contract between a container and the spatial index it lazily builds.
///
/// Implementations own their particle data; a widened index is a new,
/// independent value.
pub trait SpatialIndex: Clone + fmt::Debug {
    /// Build over the particles of `data_files` selected by `region` (and by
    /// `selector_mask`, which has one entry per particle of `data_files`).
    fn build(
        region: &Region,
        data_files: &FileSet,
        overlap_files: &FileSet,
        selector_mask: Option<&SelectorMask>,
        params: &RefinementParams,
    ) -> Result<Self>;

    /// A new index over `data_files` widened by `depth` ghost cell layers.
    fn widen(&self, data_files: &FileSet, depth: u32, coarse_ghosts: bool) -> Result<Self>;

    fn region(&self) -> &Region;
    fn data_files(&self) -> &FileSet;
    fn overlap_files(&self) -> &FileSet;
    fn selector_mask(&self) -> Option<&SelectorMask>;
    fn params(&self) -> &RefinementParams;

    fn selector(&self) -> &Arc<dyn Selector> {
        self.region().selector()
    }

    /// Mask over every cell of the index, true where the cell is selected.
    fn select(&self, selector: &dyn Selector) -> SelectorMask;
    /// Number of selected cells.
    fn count(&self, selector: &dyn Selector) -> usize;
    /// Number of indexed particles inside `selector`.
    fn count_particles(&self, selector: &dyn Selector) -> usize;
    fn select_blocks(&self, selector: &dyn Selector) -> Vec<OctBlock>;
    fn select_fcoords(&self, selector: &dyn Selector) -> Array2<f64>;
    fn select_fwidth(&self, selector: &dyn Selector) -> Array2<f64>;
    fn select_icoords(&self, selector: &dyn Selector) -> Array2<i64>;
    fn select_ires(&self, selector: &dyn Selector) -> Array1<u32>;
    fn deposit(
        &self,
        selector: &dyn Selector,
        ptype: &str,
        field: &str,
        method: DepositMethod,
    ) -> Result<Array1<f64>>;
    fn smooth(&self, selector: &dyn Selector, ptype: &str, field: &str) -> Result<Array1<f64>>;

    fn particle_ids(&self, ptype: &str) -> Array1<i64>;
    fn particle_positions(&self, ptype: &str) -> Array2<f64>;
    fn particle_velocities(&self, ptype: &str) -> Array2<f64>;
    fn particle_field(&self, ptype: &str, field: &str) -> Result<Array1<f64>>;
}

#[derive(Debug, Clone)]
struct OctNode {
    bounds: Aabb,
    level: u32,
    children: Option<[usize; 8]>,
    particles: Vec<usize>,
}

/// A cell of an occupied leaf.
#[derive(Debug, Clone, Copy)]
struct Cell {
    leaf: usize,
    bounds: Aabb,
    level: u32,
}

/// Octree over the particles of a file set inside a region.
#[derive(Debug, Clone)]
pub struct ParticleOctree {
    region: Region,
    data_files: FileSet,
    overlap_files: FileSet,
    selector_mask: Option<SelectorMask>,
    params: RefinementParams,
    ghost: Option<Aabb>, // extra volume pulled in by widening
    ghost_zones: u32,
    particles: BTreeMap<String, ParticleBlock>,
    offsets: BTreeMap<String, Range<usize>>, // per-type slice of the `all` ordering
    all: ParticleBlock,
    nodes: Vec<OctNode>,
    leaves: Vec<usize>,  // occupied leaves, in node order
    leaf_of: Vec<usize>, // node holding each `all` particle
}

impl ParticleOctree {
    pub fn ghost_zones(&self) -> u32 {
        self.ghost_zones
    }

    fn construct(
        region: &Region,
        data_files: &FileSet,
        overlap_files: &FileSet,
        selector_mask: Option<&SelectorMask>,
        params: &RefinementParams,
        ghost: Option<Aabb>,
        ghost_zones: u32,
    ) -> Result<Self> {
        let total: usize = data_files.iter().map(|f| f.particle_count(ALL_PARTICLES)).sum();
        if let Some(mask) = selector_mask {
            if mask.len() != total {
                return Err(HaloError::Configuration(format!(
                    "selector mask has {} entries but the data files hold {} particles",
                    mask.len(),
                    total
                )));
            }
        }

        let in_scope = |p: &Point3<f64>| {
            region.contains(p) || ghost.is_some_and(|g| g.contains(p))
        };

        // gather kept particles per type, in file order
        let mut kept: BTreeMap<String, Vec<(&ParticleBlock, usize)>> = BTreeMap::new();
        let mut global = 0;
        for file in data_files {
            for ptype in file.particle_types() {
                for block in file.blocks_for(ptype) {
                    for i in 0..block.len() {
                        let row = block.positions.row(i);
                        let p = Point3::new(row[0], row[1], row[2]);
                        let masked_in = selector_mask.map_or(true, |m| m[global]);
                        if masked_in && in_scope(&p) {
                            kept.entry(ptype.to_string()).or_default().push((block, i));
                        }
                        global += 1;
                    }
                }
            }
        }

        let particles: BTreeMap<String, ParticleBlock> = kept
            .into_iter()
            .map(|(ptype, rows)| (ptype, gather(&rows)))
            .collect();
        let mut offsets = BTreeMap::new();
        let mut start = 0;
        for (ptype, block) in &particles {
            offsets.insert(ptype.clone(), start..start + block.len());
            start += block.len();
        }
        let all = ParticleBlock::concatenate(particles.values());

        let mut octree = ParticleOctree {
            region: region.clone(),
            data_files: data_files.clone(),
            overlap_files: overlap_files.clone(),
            selector_mask: selector_mask.cloned(),
            params: *params,
            ghost,
            ghost_zones,
            particles,
            offsets,
            all,
            nodes: Vec::new(),
            leaves: Vec::new(),
            leaf_of: Vec::new(),
        };
        octree.grow();

        debug!(
            files = octree.data_files.len(),
            particles = octree.all.len(),
            leaves = octree.leaves.len(),
            ghost_zones,
            "built particle octree"
        );
        Ok(octree)
    }

    /// Build the node hierarchy over `self.all`.
    fn grow(&mut self) {
        let root_bounds = Aabb::from_positions(self.all.positions.view())
            .map_or(self.params.domain, |b| b.union(&self.params.domain));
        self.nodes.push(OctNode {
            bounds: root_bounds,
            level: 0,
            children: None,
            particles: (0..self.all.len()).collect(),
        });

        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            let (bounds, level, count) = {
                let n = &self.nodes[node];
                (n.bounds, n.level, n.particles.len())
            };
            if count <= self.params.n_ref || level >= self.params.max_level {
                continue;
            }
            let members = std::mem::take(&mut self.nodes[node].particles);
            let mut buckets: [Vec<usize>; 8] = Default::default();
            for p in members {
                buckets[bounds.octant_of(&self.position(p))].push(p);
            }
            let first = self.nodes.len();
            for (octant, bucket) in buckets.into_iter().enumerate() {
                self.nodes.push(OctNode {
                    bounds: bounds.octant(octant),
                    level: level + 1,
                    children: None,
                    particles: bucket,
                });
                stack.push(first + octant);
            }
            self.nodes[node].children = Some(std::array::from_fn(|i| first + i));
        }

        self.leaf_of = vec![0; self.all.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            if node.children.is_none() && !node.particles.is_empty() {
                self.leaves.push(index);
                for &p in &node.particles {
                    self.leaf_of[p] = index;
                }
            }
        }
    }

    fn position(&self, particle: usize) -> Point3<f64> {
        let row = self.all.positions.row(particle);
        Point3::new(row[0], row[1], row[2])
    }

    fn cells_per_axis(&self) -> usize {
        1 << self.params.over_refine_factor
    }

    /// Every cell of every occupied leaf, in canonical order.
    fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        let nz = self.cells_per_axis();
        self.leaves.iter().flat_map(move |&leaf| {
            let node = &self.nodes[leaf];
            let width = node.bounds.width() / nz as f64;
            (0..nz * nz * nz).map(move |c| {
                let (i, j, k) = (c % nz, (c / nz) % nz, c / (nz * nz));
                let min = node.bounds.min
                    + Vector3::new(i as f64 * width.x, j as f64 * width.y, k as f64 * width.z);
                Cell {
                    leaf,
                    bounds: Aabb::new(min, min + width),
                    level: node.level + self.params.over_refine_factor,
                }
            })
        })
    }

    fn selected_cells<'a>(&'a self, selector: &'a dyn Selector) -> impl Iterator<Item = Cell> + 'a {
        self.cells().filter(move |c| selector.contains(&c.bounds.center()))
    }

    /// Cell (in canonical order) holding a particle.
    fn cell_of(&self, particle: usize) -> usize {
        let nz = self.cells_per_axis();
        let leaf = self.leaf_of[particle];
        let rank = self.leaves.partition_point(|&l| l < leaf);
        let bounds = self.nodes[leaf].bounds;
        let p = self.position(particle);
        let local = |axis: usize| {
            let w = bounds.width()[axis] / nz as f64;
            (((p[axis] - bounds.min[axis]) / w).floor().max(0.0) as usize).min(nz - 1)
        };
        rank * nz * nz * nz + local(0) + nz * local(1) + nz * nz * local(2)
    }

    fn type_range(&self, ptype: &str) -> Range<usize> {
        if ptype == ALL_PARTICLES {
            return 0..self.all.len();
        }
        self.offsets.get(ptype).cloned().unwrap_or(0..0)
    }

    fn block(&self, ptype: &str) -> Option<&ParticleBlock> {
        if ptype == ALL_PARTICLES {
            return Some(&self.all);
        }
        self.particles.get(ptype)
    }

    fn scalar_column(&self, ptype: &str, field: &str) -> Result<Array1<f64>> {
        let unknown = || HaloError::UnknownField {
            ptype: ptype.to_string(),
            field: field.to_string(),
        };
        let Some(block) = self.block(ptype) else {
            return Ok(Array1::zeros(0));
        };
        let column = |a: &Array2<f64>, axis: usize| a.column(axis).to_owned();
        Ok(match field {
            "particle_mass" => block.masses.clone(),
            "particle_identity" => block.ids.mapv(|id| id as f64),
            "particle_position_x" => column(&block.positions, 0),
            "particle_position_y" => column(&block.positions, 1),
            "particle_position_z" => column(&block.positions, 2),
            "particle_velocity_x" => column(&block.velocities, 0),
            "particle_velocity_y" => column(&block.velocities, 1),
            "particle_velocity_z" => column(&block.velocities, 2),
            _ => return Err(unknown()),
        })
    }

    /// Width of the finest (or, for coarse ghosts, the coarsest) occupied cell.
    fn ghost_cell_width(&self, coarse_ghosts: bool) -> f64 {
        let nz = self.cells_per_axis() as f64;
        let widths = self
            .leaves
            .iter()
            .map(|&l| self.nodes[l].bounds.width().max() / nz);
        let width = if coarse_ghosts {
            widths.fold(f64::NEG_INFINITY, f64::max)
        } else {
            widths.fold(f64::INFINITY, f64::min)
        };
        if width.is_finite() {
            width
        } else {
            // no particles: fall back to the root cell
            self.params.domain.width().max() / nz
        }
    }
}

/// Copy the listed rows out of their blocks into a fresh block.
fn gather(rows: &[(&ParticleBlock, usize)]) -> ParticleBlock {
    let n = rows.len();
    let mut block = ParticleBlock {
        positions: Array2::zeros((n, 3)),
        velocities: Array2::zeros((n, 3)),
        masses: Array1::zeros(n),
        ids: Array1::zeros(n),
    };
    for (k, (src, i)) in rows.iter().enumerate() {
        block.positions.row_mut(k).assign(&src.positions.row(*i));
        block.velocities.row_mut(k).assign(&src.velocities.row(*i));
        block.masses[k] = src.masses[*i];
        block.ids[k] = src.ids[*i];
    }
    block
}

fn mean(values: ArrayView1<'_, f64>) -> f64 {
    values.mean().unwrap_or(0.0)
}

impl SpatialIndex for ParticleOctree {
    fn build(
        region: &Region,
        data_files: &FileSet,
        overlap_files: &FileSet,
        selector_mask: Option<&SelectorMask>,
        params: &RefinementParams,
    ) -> Result<Self> {
        Self::construct(region, data_files, overlap_files, selector_mask, params, None, 0)
    }

    fn widen(&self, data_files: &FileSet, depth: u32, coarse_ghosts: bool) -> Result<Self> {
        let ghost_zones = self.ghost_zones + depth;
        let ghost = if ghost_zones == 0 {
            None
        } else {
            let margin = ghost_zones as f64 * self.ghost_cell_width(coarse_ghosts);
            Some(self.region.extent().expanded(margin))
        };
        // the precomputed mask described the original file set only
        Self::construct(
            &self.region,
            data_files,
            &FileSet::empty(),
            None,
            &self.params,
            ghost,
            ghost_zones,
        )
    }

    fn region(&self) -> &Region {
        &self.region
    }

    fn data_files(&self) -> &FileSet {
        &self.data_files
    }

    fn overlap_files(&self) -> &FileSet {
        &self.overlap_files
    }

    fn selector_mask(&self) -> Option<&SelectorMask> {
        self.selector_mask.as_ref()
    }

    fn params(&self) -> &RefinementParams {
        &self.params
    }

    fn select(&self, selector: &dyn Selector) -> SelectorMask {
        self.cells()
            .map(|c| selector.contains(&c.bounds.center()))
            .collect()
    }

    fn count(&self, selector: &dyn Selector) -> usize {
        self.selected_cells(selector).count()
    }

    fn count_particles(&self, selector: &dyn Selector) -> usize {
        selector
            .select_points(self.all.positions.view())
            .iter()
            .filter(|&&m| m)
            .count()
    }

    fn select_blocks(&self, selector: &dyn Selector) -> Vec<OctBlock> {
        self.leaves
            .iter()
            .filter(|&&leaf| selector.may_intersect(&self.nodes[leaf].bounds))
            .filter_map(|&leaf| {
                let node = &self.nodes[leaf];
                let particles: Vec<usize> = node
                    .particles
                    .iter()
                    .copied()
                    .filter(|&p| selector.contains(&self.position(p)))
                    .collect();
                (!particles.is_empty()).then(|| OctBlock {
                    leaf,
                    level: node.level,
                    bounds: node.bounds,
                    particles,
                })
            })
            .collect()
    }

    fn select_fcoords(&self, selector: &dyn Selector) -> Array2<f64> {
        let centers: Vec<Point3<f64>> = self
            .selected_cells(selector)
            .map(|c| c.bounds.center())
            .collect();
        Array2::from_shape_fn((centers.len(), 3), |(i, j)| centers[i][j])
    }

    fn select_fwidth(&self, selector: &dyn Selector) -> Array2<f64> {
        let widths: Vec<Vector3<f64>> = self
            .selected_cells(selector)
            .map(|c| c.bounds.width())
            .collect();
        Array2::from_shape_fn((widths.len(), 3), |(i, j)| widths[i][j])
    }

    fn select_icoords(&self, selector: &dyn Selector) -> Array2<i64> {
        let domain = self.nodes.first().map_or(self.params.domain, |n| n.bounds);
        let coords: Vec<[i64; 3]> = self
            .selected_cells(selector)
            .map(|c| {
                let width = c.bounds.width();
                std::array::from_fn(|axis| {
                    ((c.bounds.min[axis] - domain.min[axis]) / width[axis]).round() as i64
                })
            })
            .collect();
        Array2::from_shape_fn((coords.len(), 3), |(i, j)| coords[i][j])
    }

    fn select_ires(&self, selector: &dyn Selector) -> Array1<u32> {
        self.selected_cells(selector).map(|c| c.level).collect()
    }

    fn deposit(
        &self,
        selector: &dyn Selector,
        ptype: &str,
        field: &str,
        method: DepositMethod,
    ) -> Result<Array1<f64>> {
        let values = self.scalar_column(ptype, field)?;
        let ncells = self.leaves.len() * self.cells_per_axis().pow(3);
        let mut sums = Array1::<f64>::zeros(ncells);
        let mut counts = Array1::<f64>::zeros(ncells);
        for (value, particle) in values.iter().zip(self.type_range(ptype)) {
            let cell = self.cell_of(particle);
            sums[cell] += value;
            counts[cell] += 1.0;
        }
        let selected = self.select(selector);
        Ok(selected
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(cell, _)| match method {
                DepositMethod::Count => counts[cell],
                DepositMethod::Sum => sums[cell],
                DepositMethod::Mean if counts[cell] > 0.0 => sums[cell] / counts[cell],
                DepositMethod::Mean => 0.0,
            })
            .collect())
    }

    fn smooth(&self, selector: &dyn Selector, ptype: &str, field: &str) -> Result<Array1<f64>> {
        let values = self.scalar_column(ptype, field)?;
        let range = self.type_range(ptype);
        let local = |particle: usize| particle - range.start;
        Ok(range
            .clone()
            .filter(|&p| selector.contains(&self.position(p)))
            .map(|p| {
                let neighbours: Array1<f64> = self.nodes[self.leaf_of[p]]
                    .particles
                    .iter()
                    .filter(|&&q| range.contains(&q))
                    .map(|&q| values[local(q)])
                    .collect();
                mean(neighbours.view())
            })
            .collect())
    }

    fn particle_ids(&self, ptype: &str) -> Array1<i64> {
        self.block(ptype)
            .map_or_else(|| Array1::zeros(0), |b| b.ids.clone())
    }

    fn particle_positions(&self, ptype: &str) -> Array2<f64> {
        self.block(ptype)
            .map_or_else(|| Array2::zeros((0, 3)), |b| b.positions.clone())
    }

    fn particle_velocities(&self, ptype: &str) -> Array2<f64> {
        self.block(ptype)
            .map_or_else(|| Array2::zeros((0, 3)), |b| b.velocities.clone())
    }

    fn particle_field(&self, ptype: &str, field: &str) -> Result<Array1<f64>> {
        self.scalar_column(ptype, field)
    }
}
