//! Lazily indexed particle containers.
//!
//! An [`IndexedParticleContainer`] owns a base region, the primary and overlap
//! file sets feeding it, and a spatial index that is built on first use and
//! then reused for the lifetime of the container.
//!
//! Index-backed operations (cell selection, coordinates, widths, levels,
//! counting, deposition, smoothing) are declared one by one. Each is gated by
//! the container's spatial mode: a spatial container forwards the call to its
//! index and returns the result verbatim, any other container fails with
//! [`HaloError::NotIndexed`]. Spatial mode is switched on by adopting an index
//! ([`IndexedParticleContainer::from_index`]), by inheriting it from a spatial
//! container, or temporarily through [`IndexedParticleContainer::as_spatial`].
//!
//! Field reads (`particle_ids`, `particle_positions`, ...) are not gated; they
//! build the index if needed.

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use ndarray::{Array1, Array2, ArrayView2};
use tracing::debug;

use crate::data_file::{FileSet, ParticleBlock, ALL_PARTICLES};
use crate::error::{HaloError, Result};
use crate::octree::{DepositMethod, OctBlock, ParticleOctree, RefinementParams, SpatialIndex};
use crate::selector::{Region, Selector, SelectorId, SelectorMask};


/// The index-backed operations a spatial container forwards to its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOperation {
    SelectBlocks,
    Deposit,
    Smooth,
    SelectIcoords,
    SelectFcoords,
    SelectFwidth,
    SelectIres,
    Select,
    Count,
    CountParticles,
    Selector,
}

impl IndexOperation {
    pub const ALL: [IndexOperation; 11] = [
        IndexOperation::SelectBlocks,
        IndexOperation::Deposit,
        IndexOperation::Smooth,
        IndexOperation::SelectIcoords,
        IndexOperation::SelectFcoords,
        IndexOperation::SelectFwidth,
        IndexOperation::SelectIres,
        IndexOperation::Select,
        IndexOperation::Count,
        IndexOperation::CountParticles,
        IndexOperation::Selector,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IndexOperation::SelectBlocks => "select_blocks",
            IndexOperation::Deposit => "deposit",
            IndexOperation::Smooth => "smooth",
            IndexOperation::SelectIcoords => "select_icoords",
            IndexOperation::SelectFcoords => "select_fcoords",
            IndexOperation::SelectFwidth => "select_fwidth",
            IndexOperation::SelectIres => "select_ires",
            IndexOperation::Select => "select",
            IndexOperation::Count => "count",
            IndexOperation::CountParticles => "count_particles",
            IndexOperation::Selector => "selector",
        }
    }
}

impl FromStr for IndexOperation {
    type Err = HaloError;

    fn from_str(s: &str) -> Result<Self> {
        IndexOperation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| HaloError::UnsupportedOperation {
                operation: s.to_string(),
            })
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named value attached to a container, e.g. the bulk velocity of a halo.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldParameter {
    Scalar(f64),
    Vector(Vector3<f64>),
    Point(Point3<f64>),
}

/// Name of the field parameter velocity-relative quantities subtract.
pub const BULK_VELOCITY: &str = "bulk_velocity";

/// Particle container backed by a lazily built spatial index.
///
/// The index is built at most once, from the file sets and mask held at the
/// time of the first index access. Replacing the file sets afterwards (see
/// [`IndexedParticleContainer::replace_files`]) does not rebuild it.
#[derive(Debug)]
pub struct IndexedParticleContainer<I: SpatialIndex = ParticleOctree> {
    region: Region,
    data_files: FileSet,    // primary files
    overlap_files: FileSet, // neighbours only needed for ghost zones
    selector_mask: Option<SelectorMask>,
    params: RefinementParams,
    index: OnceCell<I>,
    spatial: bool,
    last_mask: RefCell<Option<(SelectorId, SelectorMask)>>,
    field_parameters: BTreeMap<String, FieldParameter>,
    particle_type: String,
}

impl<I: SpatialIndex> IndexedParticleContainer<I> {
    /// Creates a container over `region` fed by the given files.
    ///
    /// Fails if `data_files` is empty or if the files do not all belong to
    /// one dataset.
    pub fn new(
        region: Region,
        data_files: FileSet,
        overlap_files: FileSet,
        selector_mask: Option<SelectorMask>,
        params: RefinementParams,
    ) -> Result<Self> {
        check_files(&data_files, &overlap_files)?;
        Ok(Self {
            region,
            data_files,
            overlap_files,
            selector_mask,
            params,
            index: OnceCell::new(),
            spatial: false,
            last_mask: RefCell::new(None),
            field_parameters: BTreeMap::new(),
            particle_type: ALL_PARTICLES.to_string(),
        })
    }

    /// Creates a container with no overlap files and no precomputed mask.
    pub fn with_files(region: Region, data_files: FileSet, params: RefinementParams) -> Result<Self> {
        Self::new(region, data_files, FileSet::empty(), None, params)
    }

    /// Creates a container over another container's region.
    ///
    /// The region is taken from `other` directly, so wrapping a wrapper still
    /// refers to the original base region. A spatial `other` also hands over
    /// its spatial mode and a copy of its index.
    pub fn from_container(
        other: &IndexedParticleContainer<I>,
        data_files: FileSet,
        overlap_files: FileSet,
        selector_mask: Option<SelectorMask>,
    ) -> Result<Self> {
        let mut container = Self::new(
            other.region.clone(),
            data_files,
            overlap_files,
            selector_mask,
            other.params,
        )?;
        if other.spatial {
            container.spatial = true;
            if let Some(index) = other.index.get() {
                let _ = container.index.set(index.clone());
            }
        }
        container.particle_type = other.particle_type.clone();
        Ok(container)
    }

    /// Adopts a built index verbatim and switches spatial mode on.
    pub fn from_index(index: I) -> Result<Self> {
        let mut container = Self::new(
            index.region().clone(),
            index.data_files().clone(),
            index.overlap_files().clone(),
            index.selector_mask().cloned(),
            *index.params(),
        )?;
        let _ = container.index.set(index);
        container.spatial = true;
        Ok(container)
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn data_files(&self) -> &FileSet {
        &self.data_files
    }

    pub fn overlap_files(&self) -> &FileSet {
        &self.overlap_files
    }

    pub fn selector_mask(&self) -> Option<&SelectorMask> {
        self.selector_mask.as_ref()
    }

    pub fn params(&self) -> &RefinementParams {
        &self.params
    }

    /// Replace both file sets.
    ///
    /// Calling this after the index was built is a caller error: the built
    /// index is kept as is and keeps describing the old files.
    pub fn replace_files(&mut self, data_files: FileSet, overlap_files: FileSet) -> Result<()> {
        check_files(&data_files, &overlap_files)?;
        self.data_files = data_files;
        self.overlap_files = overlap_files;
        self.last_mask.get_mut().take();
        Ok(())
    }

    pub fn is_spatial(&self) -> bool {
        self.spatial
    }

    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    /// The spatial index, built on first access.
    pub fn index(&self) -> Result<&I> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        debug!(
            files = self.data_files.len(),
            overlap = self.overlap_files.len(),
            "building spatial index"
        );
        let built = I::build(
            &self.region,
            &self.data_files,
            &self.overlap_files,
            self.selector_mask.as_ref(),
            &self.params,
        )?;
        Ok(self.index.get_or_init(|| built))
    }

    /// Temporarily switch spatial mode on. The previous mode is restored
    /// when the guard is dropped, including during unwinding.
    pub fn as_spatial(&mut self) -> SpatialGuard<'_, I> {
        let previous = self.spatial;
        self.spatial = true;
        SpatialGuard {
            container: self,
            previous,
        }
    }

    /// Checks that `name` is an index-backed operation this container can run.
    pub fn check_operation(&self, name: &str) -> Result<()> {
        let operation: IndexOperation = name.parse()?;
        self.gated(operation).map(drop)
    }

    fn gated(&self, operation: IndexOperation) -> Result<&I> {
        if !self.spatial {
            return Err(HaloError::not_indexed(operation.name()));
        }
        self.index()
    }

    pub fn selector(&self) -> Result<&Arc<dyn Selector>> {
        Ok(self.gated(IndexOperation::Selector)?.selector())
    }

    pub fn select_blocks(&self, selector: &dyn Selector) -> Result<Vec<OctBlock>> {
        Ok(self.gated(IndexOperation::SelectBlocks)?.select_blocks(selector))
    }

    pub fn deposit(
        &self,
        selector: &dyn Selector,
        ptype: &str,
        field: &str,
        method: DepositMethod,
    ) -> Result<Array1<f64>> {
        self.gated(IndexOperation::Deposit)?
            .deposit(selector, ptype, field, method)
    }

    pub fn smooth(&self, selector: &dyn Selector, ptype: &str, field: &str) -> Result<Array1<f64>> {
        self.gated(IndexOperation::Smooth)?.smooth(selector, ptype, field)
    }

    pub fn select_icoords(&self, selector: &dyn Selector) -> Result<Array2<i64>> {
        Ok(self.gated(IndexOperation::SelectIcoords)?.select_icoords(selector))
    }

    pub fn select_fcoords(&self, selector: &dyn Selector) -> Result<Array2<f64>> {
        Ok(self.gated(IndexOperation::SelectFcoords)?.select_fcoords(selector))
    }

    pub fn select_fwidth(&self, selector: &dyn Selector) -> Result<Array2<f64>> {
        Ok(self.gated(IndexOperation::SelectFwidth)?.select_fwidth(selector))
    }

    pub fn select_ires(&self, selector: &dyn Selector) -> Result<Array1<u32>> {
        Ok(self.gated(IndexOperation::SelectIres)?.select_ires(selector))
    }

    pub fn select(&self, selector: &dyn Selector) -> Result<SelectorMask> {
        Ok(self.gated(IndexOperation::Select)?.select(selector))
    }

    pub fn count(&self, selector: &dyn Selector) -> Result<usize> {
        Ok(self.gated(IndexOperation::Count)?.count(selector))
    }

    pub fn count_particles(&self, selector: &dyn Selector) -> Result<usize> {
        Ok(self.gated(IndexOperation::CountParticles)?.count_particles(selector))
    }

    /// Apply `selector` to an `n x 3` position array.
    pub fn select_particles(&self, selector: &dyn Selector, positions: ArrayView2<'_, f64>) -> SelectorMask {
        selector.select_points(positions)
    }

    /// Mask of the container's own particles (current particle type, primary
    /// files) selected by `selector`. The last mask is kept and reused while
    /// the same selector is passed in again.
    pub fn mask(&self, selector: &dyn Selector) -> Result<SelectorMask> {
        if let Some((id, mask)) = self.last_mask.borrow().as_ref() {
            if *id == selector.id() {
                return Ok(mask.clone());
            }
        }
        let block = ParticleBlock::concatenate(
            self.data_files
                .iter()
                .flat_map(|f| f.blocks_for(&self.particle_type)),
        );
        let mask = self.select_particles(selector, block.positions.view());
        *self.last_mask.borrow_mut() = Some((selector.id(), mask.clone()));
        Ok(mask)
    }

    pub fn last_mask_selector(&self) -> Option<SelectorId> {
        self.last_mask.borrow().as_ref().map(|(id, _)| *id)
    }

    /// Widen the index by `depth` ghost cell layers over the union of the
    /// primary and overlap files, returning a new spatial container that owns
    /// the widened index. `self` is not modified.
    ///
    /// The index must already be built; widening never triggers a build.
    pub fn expand_ghost_zones(&self, depth: i32, coarse_ghosts: bool) -> Result<Self> {
        if depth < 0 {
            return Err(HaloError::GhostZone(format!(
                "ghost zone depth must be non-negative, got {depth}"
            )));
        }
        let index = self.index.get().ok_or_else(|| {
            HaloError::GhostZone("the index must be built before ghost zones can be retrieved".to_string())
        })?;
        let files = self.data_files.union(&self.overlap_files);
        debug!(
            depth,
            coarse_ghosts,
            files = files.len(),
            "expanding ghost zones"
        );
        let widened = index.widen(&files, depth.unsigned_abs(), coarse_ghosts)?;
        let mut container = Self::from_index(widened)?;
        container.field_parameters = self.field_parameters.clone();
        container.particle_type = self.particle_type.clone();
        Ok(container)
    }

    pub fn particle_type(&self) -> &str {
        &self.particle_type
    }

    /// Switch the particle type. The kept mask described the old particles
    /// and is dropped.
    pub fn set_particle_type(&mut self, ptype: impl Into<String>) {
        self.particle_type = ptype.into();
        self.last_mask.get_mut().take();
    }

    pub fn set_field_parameter(&mut self, name: impl Into<String>, value: FieldParameter) {
        self.field_parameters.insert(name.into(), value);
    }

    pub fn field_parameter(&self, name: &str) -> Option<&FieldParameter> {
        self.field_parameters.get(name)
    }

    pub fn has_field_parameter(&self, name: &str) -> bool {
        self.field_parameters.contains_key(name)
    }

    /// Bulk velocity, if one was attached as a vector field parameter.
    pub fn bulk_velocity(&self) -> Option<Vector3<f64>> {
        match self.field_parameters.get(BULK_VELOCITY) {
            Some(FieldParameter::Vector(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn particle_ids(&self, ptype: &str) -> Result<Array1<i64>> {
        Ok(self.index()?.particle_ids(ptype))
    }

    pub fn particle_positions(&self, ptype: &str) -> Result<Array2<f64>> {
        Ok(self.index()?.particle_positions(ptype))
    }

    pub fn particle_velocities(&self, ptype: &str) -> Result<Array2<f64>> {
        Ok(self.index()?.particle_velocities(ptype))
    }

    pub fn particle_field(&self, ptype: &str, field: &str) -> Result<Array1<f64>> {
        self.index()?.particle_field(ptype, field)
    }

    /// Particle velocities in the frame of the bulk velocity field parameter.
    pub fn relative_velocities(&self, ptype: &str) -> Result<Array2<f64>> {
        let mut velocities = self.particle_velocities(ptype)?;
        if let Some(bulk) = self.bulk_velocity() {
            for mut row in velocities.rows_mut() {
                for axis in 0..3 {
                    row[axis] -= bulk[axis];
                }
            }
        }
        Ok(velocities)
    }
}

fn check_files(data_files: &FileSet, overlap_files: &FileSet) -> Result<()> {
    if data_files.is_empty() {
        return Err(HaloError::Configuration(
            "a particle container needs at least one data file".to_string(),
        ));
    }
    data_files.union(overlap_files).common_dataset()?;
    Ok(())
}

/// Keeps a container in spatial mode until dropped.
#[derive(Debug)]
pub struct SpatialGuard<'a, I: SpatialIndex> {
    container: &'a mut IndexedParticleContainer<I>,
    previous: bool,
}

impl<I: SpatialIndex> Deref for SpatialGuard<'_, I> {
    type Target = IndexedParticleContainer<I>;

    fn deref(&self) -> &Self::Target {
        self.container
    }
}

impl<I: SpatialIndex> DerefMut for SpatialGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.container
    }
}

impl<I: SpatialIndex> Drop for SpatialGuard<'_, I> {
    fn drop(&mut self) {
        self.container.spatial = self.previous;
    }
}
