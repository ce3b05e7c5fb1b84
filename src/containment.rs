//! Exact-membership containment search across datasets.
//!
//! A halo catalog describes each halo by an approximate center, an approximate
//! radius and the identifiers of its member particles. The particles themselves
//! live in a separate, independently indexed dataset. The resolver bridges the
//! two:
//!
//! - grow a sphere around the approximate center by a fixed factor per step
//!   until every member identifier is found inside it;
//! - cut the sphere down to exactly the member particles with an identity
//!   predicate;
//! - attach the halo's bulk velocity to the sphere so velocity-relative
//!   quantities are frame corrected.
//!
//! The growth loop is bounded by a maximum multiple of the approximate radius.

use std::collections::HashSet;

use nalgebra::{Point3, Vector3};
use ndarray::{Array1, Array2, Axis};
use tracing::{debug, info};

use crate::container::{FieldParameter, IndexedParticleContainer, BULK_VELOCITY};
use crate::dataset::ParticleDataset;
use crate::error::{HaloError, Result};
use crate::selector::{Region, SelectorMask};
use crate::settings::ContainmentSettings;


/// Smallest-enclosing-sphere search by geometric growth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainmentResolver {
    growth_factor: f64,  // radius multiplier between steps, > 1
    max_multiplier: f64, // largest multiple of the approximate radius tried
}

impl ContainmentResolver {
    pub fn new(settings: &ContainmentSettings) -> Result<Self> {
        if settings.growth_factor.is_nan() || settings.growth_factor <= 1.0 {
            return Err(HaloError::Configuration(format!(
                "containment growth factor must be greater than 1, got {}",
                settings.growth_factor
            )));
        }
        if settings.max_multiplier.is_nan() || settings.max_multiplier < 1.0 {
            return Err(HaloError::Configuration(format!(
                "maximum containment multiplier must be at least 1, got {}",
                settings.max_multiplier
            )));
        }
        Ok(Self {
            growth_factor: settings.growth_factor,
            max_multiplier: settings.max_multiplier,
        })
    }

    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    pub fn max_multiplier(&self) -> f64 {
        self.max_multiplier
    }

    /// Find the smallest tested sphere around `center` holding every member.
    ///
    /// **Context**: Catalog radii are only approximate, and the members of a
    /// halo can sit slightly outside them. The particle data lives in another
    /// dataset with its own file layout, so membership has to be checked
    /// against that dataset directly.
    ///
    /// **How it Works**: Step `k` queries a sphere of radius
    /// `growth_factor^k * radius`, starting at `k = 0`. The multiplier is
    /// accumulated step by step. Steps whose sphere touches no data file are
    /// skipped. The first sphere whose `ptype`
    /// identifiers include every member is kept; the search fails with
    /// [`HaloError::ContainmentNotFound`] once the multiplier would exceed
    /// the configured maximum.
    ///
    /// `center` and `radius` are in Mpc, `velocity` in km/s.
    pub fn resolve(
        &self,
        dataset: &ParticleDataset,
        center: Point3<f64>,
        radius: f64,
        velocity: Vector3<f64>,
        ptype: &str,
        members: &[i64],
    ) -> Result<Containment> {
        if members.is_empty() {
            return Err(HaloError::Configuration(
                "containment search needs at least one member identifier".to_string(),
            ));
        }
        let wanted: HashSet<i64> = members.iter().copied().collect();

        let mut missing = wanted.len();
        let mut last_multiplier = 1.0;
        let mut multiplier = 1.0;
        for step in 0_u64.. {
            if step > 0 {
                multiplier *= self.growth_factor;
            }
            if multiplier > self.max_multiplier {
                break;
            }
            last_multiplier = multiplier;
            let search_radius = multiplier * radius;
            let region = Region::sphere(center, search_radius);
            if !dataset.touches(&region) {
                debug!(step, search_radius, "sphere touches no data file");
                continue;
            }

            let mut sphere = dataset.container(region)?;
            sphere.set_particle_type(ptype);
            let ids = sphere.particle_ids(ptype)?;
            let found: HashSet<i64> = ids.iter().copied().collect();
            missing = wanted.difference(&found).count();
            debug!(step, search_radius, particles = ids.len(), missing, "containment step");
            if missing > 0 {
                continue;
            }

            sphere.set_field_parameter(BULK_VELOCITY, FieldParameter::Vector(velocity));
            sphere.set_field_parameter("center", FieldParameter::Point(center));
            let region = FilteredRegion::new(ptype, &ids, &wanted);
            info!(
                members = wanted.len(),
                multiplier,
                radius = search_radius,
                sphere_particles = ids.len(),
                "found enclosing sphere"
            );
            return Ok(Containment {
                sphere,
                region,
                radius: search_radius,
                multiplier,
            });
        }

        Err(HaloError::ContainmentNotFound {
            multiplier: last_multiplier,
            missing,
        })
    }
}

/// Identity cut over a sphere's particles: rows whose identifier is a member.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRegion {
    ptype: String,
    mask: SelectorMask, // one entry per sphere particle
    rows: Vec<usize>,   // indices where `mask` is set
}

impl FilteredRegion {
    pub fn new(ptype: &str, ids: &Array1<i64>, members: &HashSet<i64>) -> Self {
        let mask: SelectorMask = ids.iter().map(|id| members.contains(id)).collect();
        let rows = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Self {
            ptype: ptype.to_string(),
            mask,
            rows,
        }
    }

    pub fn particle_type(&self) -> &str {
        &self.ptype
    }

    pub fn mask(&self) -> &SelectorMask {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep the member entries of a per-particle column.
    pub fn apply(&self, values: &Array1<f64>) -> Array1<f64> {
        values.select(Axis(0), &self.rows)
    }

    /// Keep the member rows of an `n x 3` array.
    pub fn apply_rows<T: Clone>(&self, values: &Array2<T>) -> Array2<T> {
        values.select(Axis(0), &self.rows)
    }
}

/// Result of a containment search: the enclosing sphere and the member cut.
#[derive(Debug)]
pub struct Containment {
    sphere: IndexedParticleContainer,
    region: FilteredRegion,
    radius: f64,     // Mpc
    multiplier: f64, // radius / approximate radius
}

impl Containment {
    /// The enclosing sphere, with `bulk_velocity` and `center` attached.
    pub fn sphere(&self) -> &IndexedParticleContainer {
        &self.sphere
    }

    pub fn region(&self) -> &FilteredRegion {
        &self.region
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn particle_ids(&self) -> Result<Array1<i64>> {
        let ids = self.sphere.particle_ids(&self.region.ptype)?;
        Ok(ids.select(Axis(0), &self.region.rows))
    }

    pub fn particle_positions(&self) -> Result<Array2<f64>> {
        Ok(self
            .region
            .apply_rows(&self.sphere.particle_positions(&self.region.ptype)?))
    }

    pub fn particle_velocities(&self) -> Result<Array2<f64>> {
        Ok(self
            .region
            .apply_rows(&self.sphere.particle_velocities(&self.region.ptype)?))
    }

    /// Member velocities relative to the halo's bulk velocity.
    pub fn relative_velocities(&self) -> Result<Array2<f64>> {
        Ok(self
            .region
            .apply_rows(&self.sphere.relative_velocities(&self.region.ptype)?))
    }

    pub fn particle_field(&self, field: &str) -> Result<Array1<f64>> {
        Ok(self
            .region
            .apply(&self.sphere.particle_field(&self.region.ptype, field)?))
    }
}
