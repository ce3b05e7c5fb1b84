//! Synthetic snapshot and halo catalog pairs.
//!
//! Halos are Gaussian particle clumps with a known member list, embedded in a
//! uniform background and split into slab-shaped files along x. The catalog
//! stores each halo in AdaptaHOP code units with a radius that underestimates
//! the true extent, so looking a halo up always exercises the containment
//! growth loop.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{CatalogFile, CatalogHeader, CatalogRow};
use crate::data_file::ParticleBlock;
use crate::dataset::{Cosmology, Snapshot};
use crate::error::{HaloError, Result};
use crate::units::CodeUnits;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_same_data() {
        let params = SyntheticParams::default();
        let (snap_a, cat_a) = generate(&params, Some(4)).unwrap();
        let (snap_b, cat_b) = generate(&params, Some(4)).unwrap();
        assert_eq!(snap_a, snap_b);
        assert_eq!(cat_a, cat_b);
    }

    #[test]
    fn members_are_stored_in_snapshot() {
        let params = SyntheticParams {
            n_halos: 3,
            particles_per_halo: 50,
            n_background: 100,
            ..SyntheticParams::default()
        };
        let (snapshot, catalog) = generate(&params, Some(1)).unwrap();
        assert_eq!(snapshot.files.len(), params.n_files);
        let stored: usize = snapshot.files.iter().map(|f| f["io"].len()).sum();
        assert_eq!(stored, 3 * 50 + 100);
        assert_eq!(catalog.halos.len(), 3);
        for row in &catalog.halos {
            assert_eq!(row.members.len(), 50);
            assert!(row.mass > 0.0);
        }
    }
}

/// Shape of a generated dataset. Lengths in Mpc.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticParams {
    pub box_size: f64,
    pub n_halos: usize,
    pub particles_per_halo: usize,
    pub n_background: usize,
    pub n_files: usize,
    pub particle_mass: f64, // Msun
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            box_size: 50.0,
            n_halos: 8,
            particles_per_halo: 200,
            n_background: 2000,
            n_files: 4,
            particle_mass: 1e9,
        }
    }
}

/// Fraction of the true extent written to the catalog as the halo radius.
const RADIUS_UNDERESTIMATE: f64 = 0.7;

struct Particle {
    id: i64,
    position: Point3<f64>,
    velocity: Vector3<f64>,
}

/// Generate a snapshot and its catalog. Halo identifiers are odd numbers so
/// that even identifiers are guaranteed misses.
pub fn generate(params: &SyntheticParams, seed: Option<u64>) -> Result<(Snapshot, CatalogFile)> {
    if params.n_files == 0 || params.box_size <= 0.0 || params.particle_mass <= 0.0 {
        return Err(HaloError::Configuration(format!(
            "invalid synthetic dataset parameters: {params:?}"
        )));
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let normal = |sigma: f64| {
        Normal::new(0.0, sigma).map_err(|e| HaloError::Configuration(format!("bad dispersion {sigma}: {e}")))
    };
    let halo_velocity = normal(200.0)?;
    let member_velocity = normal(50.0)?;
    let units = CodeUnits::adaptahop();
    let size = params.box_size;

    let mut particles = Vec::new();
    let mut halos = Vec::with_capacity(params.n_halos);
    let mut next_id = 1;
    for h in 0..params.n_halos {
        let center = Point3::new(
            rng.random_range(0.15 * size..0.85 * size),
            rng.random_range(0.15 * size..0.85 * size),
            rng.random_range(0.15 * size..0.85 * size),
        );
        let extent = rng.random_range(0.02 * size..0.05 * size);
        let velocity = Vector3::new(
            halo_velocity.sample(&mut rng),
            halo_velocity.sample(&mut rng),
            halo_velocity.sample(&mut rng),
        );
        let spread = normal(extent / 2.0)?;

        let mut members = Vec::with_capacity(params.particles_per_halo);
        while members.len() < params.particles_per_halo {
            let offset = Vector3::new(spread.sample(&mut rng), spread.sample(&mut rng), spread.sample(&mut rng));
            if offset.norm() > extent {
                continue;
            }
            let jitter = Vector3::new(
                member_velocity.sample(&mut rng),
                member_velocity.sample(&mut rng),
                member_velocity.sample(&mut rng),
            );
            particles.push(Particle {
                id: next_id,
                position: center + offset,
                velocity: velocity + jitter,
            });
            members.push(next_id);
            next_id += 1;
        }

        let mass = members.len() as f64 * params.particle_mass;
        halos.push(CatalogRow {
            id: 2 * h as i64 + 1,
            position: (center.coords / units.length_to_mpc).into(),
            velocity: (velocity / units.velocity_to_kms).into(),
            mass: mass / units.mass_to_msun,
            radius: RADIUS_UNDERESTIMATE * extent / units.length_to_mpc,
            members,
        });
    }

    for _ in 0..params.n_background {
        particles.push(Particle {
            id: next_id,
            position: Point3::new(
                rng.random_range(0.0..size),
                rng.random_range(0.0..size),
                rng.random_range(0.0..size),
            ),
            velocity: Vector3::new(
                halo_velocity.sample(&mut rng),
                halo_velocity.sample(&mut rng),
                halo_velocity.sample(&mut rng),
            ),
        });
        next_id += 1;
    }

    // contiguous slabs along x, one per file
    particles.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));
    let per_file = particles.len().div_ceil(params.n_files).max(1);
    let mut files: Vec<BTreeMap<String, ParticleBlock>> = particles
        .chunks(per_file)
        .map(|chunk| {
            let n = chunk.len();
            let block = ParticleBlock::new(
                Array2::from_shape_fn((n, 3), |(i, j)| chunk[i].position[j]),
                Array2::from_shape_fn((n, 3), |(i, j)| chunk[i].velocity[j]),
                Array1::from_elem(n, params.particle_mass),
                chunk.iter().map(|p| p.id).collect(),
            )?;
            Ok(BTreeMap::from([("io".to_string(), block)]))
        })
        .collect::<Result<_>>()?;
    files.resize_with(params.n_files, || BTreeMap::from([("io".to_string(), ParticleBlock::empty())]));

    info!(
        halos = halos.len(),
        particles = particles.len(),
        files = files.len(),
        "generated synthetic dataset"
    );

    let snapshot = Snapshot {
        name: "output_00080".to_string(),
        domain_left_edge: [0.0; 3],
        domain_right_edge: [size; 3],
        cosmology: Cosmology {
            omega_matter: Some(0.3),
            omega_lambda: Some(0.7),
            omega_radiation: None,
            hubble_constant: Some(0.7),
        },
        files,
    };
    let catalog = CatalogFile {
        filename: "tree_bricks080".to_string(),
        header: CatalogHeader {
            aexp: 1.0,
            omega_t: 0.3,
            age: 13.8,
        },
        units,
        halos,
    };
    Ok((snapshot, catalog))
}
