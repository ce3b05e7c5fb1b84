//! Halo catalogs and per-halo containers.
//!
//! A [`HaloCatalog`] holds one row per halo: a globally sorted identifier
//! column, position, velocity, mass and radius columns in catalog code units,
//! and the member particle identifiers of every row (CSR layout). It always
//! refers to the particle dataset the halos were found in.
//!
//! [`HaloCatalog::halo`] turns a row into a [`HaloContainer`]: the catalog
//! values are converted to Mpc, km/s and Msun, then the containment resolver
//! locates the members in the parent dataset.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::containment::{Containment, ContainmentResolver};
use crate::container::IndexedParticleContainer;
use crate::dataset::{Cosmology, ParticleDataset};
use crate::error::{HaloError, Result};
use crate::units::CodeUnits;

#[cfg(test)]
mod tests {

    use super::*;
    use crate::data_file::ParticleBlock;
    use crate::dataset::Snapshot;
    use crate::settings::{ContainmentSettings, IndexSettings};
    use ndarray::array;
    use std::collections::BTreeMap;

    /// Three particles per halo around x = id, y = z = 5.
    fn parent(ids: &[i64]) -> Arc<ParticleDataset> {
        let mut positions = Vec::new();
        let mut pids = Vec::new();
        for &id in ids {
            for k in 0..3 {
                positions.extend([id as f64 + 0.1 * k as f64, 5.0, 5.0]);
                pids.push(id * 100 + k);
            }
        }
        let n = pids.len();
        let block = ParticleBlock::new(
            Array2::from_shape_vec((n, 3), positions).unwrap(),
            Array2::from_elem((n, 3), 1.0),
            Array1::from_elem(n, 2.0),
            Array1::from(pids),
        )
        .unwrap();
        let snapshot = Snapshot {
            name: "info_00080".to_string(),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [50.0; 3],
            cosmology: Cosmology {
                omega_lambda: Some(0.7),
                hubble_constant: Some(0.68),
                ..Cosmology::default()
            },
            files: vec![BTreeMap::from([("io".to_string(), block)])],
        };
        let settings = IndexSettings {
            n_ref: 16,
            over_refine_factor: 1,
            max_level: 12,
            overlap_margin: 1.0,
        };
        Arc::new(ParticleDataset::from_snapshot(snapshot, &settings).unwrap())
    }

    fn catalog_file(ids: &[i64]) -> CatalogFile {
        CatalogFile {
            filename: "tree_bricks080".to_string(),
            header: CatalogHeader {
                aexp: 0.5,
                omega_t: 0.3,
                age: 6.2,
            },
            units: CodeUnits::physical(),
            halos: ids
                .iter()
                .rev()
                .map(|&id| CatalogRow {
                    id,
                    position: [id as f64 + 0.1, 5.0, 5.0],
                    velocity: [10.0, 0.0, -10.0],
                    mass: 6.0,
                    radius: 0.1,
                    members: (0..3).map(|k| id * 100 + k).collect(),
                })
                .collect(),
        }
    }

    fn catalog(ids: &[i64]) -> HaloCatalog {
        HaloCatalog::from_file(catalog_file(ids), Some(parent(ids))).unwrap()
    }

    fn resolver() -> ContainmentResolver {
        ContainmentResolver::new(&ContainmentSettings::default()).unwrap()
    }

    #[test]
    fn rows_are_found_by_sorted_search() {
        let catalog = catalog(&[3, 7, 12, 40]);
        assert_eq!(catalog.row_of(12).unwrap(), 2);
        assert_eq!(catalog.row_of(3).unwrap(), 0);
        assert_eq!(catalog.row_of(40).unwrap(), 3);
        assert!(matches!(catalog.row_of(9), Err(HaloError::HaloNotFound { identifier: 9 })));
        assert!(matches!(catalog.row_of(41), Err(HaloError::HaloNotFound { .. })));
    }

    #[test]
    fn first_row_is_a_valid_halo() {
        let catalog = catalog(&[3, 7, 12, 40]);
        let halo = catalog.halo(3, "io", &resolver()).unwrap();
        assert_eq!(halo.row(), 0);
        assert_eq!(halo.member_ids(), &array![300, 301, 302]);
        let mut ids = halo.particle_ids().unwrap().to_vec();
        ids.sort_unstable();
        assert_eq!(ids, vec![300, 301, 302]);
    }

    #[test]
    fn halo_exposes_catalog_values() {
        let catalog = catalog(&[3, 7, 12, 40]);
        let halo = catalog.halo(12, "io", &resolver()).unwrap();
        assert_eq!(halo.row(), 2);
        assert_eq!(halo.mass(), 6.0);
        assert!((halo.position() - Point3::new(12.1, 5.0, 5.0)).norm() < 1e-12);
        assert_eq!(halo.velocity(), Vector3::new(10.0, 0.0, -10.0));
        assert_eq!(halo.sphere().bulk_velocity(), Some(halo.velocity()));
        assert_eq!(halo.particle_field("particle_mass").unwrap(), array![2.0, 2.0, 2.0]);
        assert_eq!(halo.to_string(), "info_00080_io_000000012");
    }

    #[test]
    fn records_outside_the_catalog_are_errors() {
        let catalog = catalog(&[3, 7]);
        assert_eq!(catalog.record(1).unwrap().identifier, 7);
        assert!(matches!(catalog.record(2), Err(HaloError::Configuration(_))));
    }

    #[test]
    fn missing_halo_is_reported() {
        let catalog = catalog(&[3, 7, 12, 40]);
        assert!(matches!(
            catalog.halo(9, "io", &resolver()),
            Err(HaloError::HaloNotFound { identifier: 9 })
        ));
    }

    #[test]
    fn unknown_particle_type_is_rejected() {
        let catalog = catalog(&[3, 7]);
        assert!(matches!(
            catalog.halo(3, "DM", &resolver()),
            Err(HaloError::Configuration(_))
        ));
    }

    #[test]
    fn catalog_requires_parent_dataset() {
        assert!(matches!(
            HaloCatalog::from_file(catalog_file(&[3]), None),
            Err(HaloError::Configuration(_))
        ));
    }

    #[test]
    fn header_and_cosmology() {
        let catalog = catalog(&[3]);
        assert_eq!(catalog.current_redshift(), 1.0);
        assert_eq!(catalog.cosmology.omega_matter, Some(0.3));
        assert_eq!(catalog.cosmology.omega_lambda, Some(0.7));
        assert_eq!(catalog.cosmology.hubble_constant, Some(0.68));
        assert_eq!(catalog.domain_right_edge().x, 50.0);
    }

    #[test]
    fn filenames_follow_tree_bricks_pattern() {
        assert!(HaloCatalog::is_valid_filename("output_00080_halos/tree_bricks080"));
        assert!(!HaloCatalog::is_valid_filename("tree_bricks80"));
        assert!(!HaloCatalog::is_valid_filename("tree_bricks0800"));
        assert!(!HaloCatalog::is_valid_filename("info_00080.txt"));
    }
}

/// Omega lambda assumed when the parent dataset does not define it.
pub const DEFAULT_OMEGA_LAMBDA: f64 = 0.724;
/// Hubble constant assumed when the parent dataset does not define it.
pub const DEFAULT_HUBBLE_CONSTANT: f64 = 0.7;

/// Scalar header attributes of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CatalogHeader {
    pub aexp: f64,    // expansion factor
    pub omega_t: f64, // total matter density
    pub age: f64,     // Gyr
}

/// One halo as stored in a JSON catalog, in catalog code units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub id: i64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub mass: f64,
    pub radius: f64,
    pub members: Vec<i64>,
}

/// On-disk JSON layout of a halo catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub filename: String,
    pub header: CatalogHeader,
    #[serde(default)]
    pub units: CodeUnits,
    pub halos: Vec<CatalogRow>,
}

/// Columnar halo catalog bound to its parent particle dataset.
#[derive(Debug, Clone)]
pub struct HaloCatalog {
    pub filename: String,
    pub header: CatalogHeader,
    pub units: CodeUnits,
    pub cosmology: Cosmology,
    parent: Arc<ParticleDataset>,
    ids: Array1<i64>, // ascending
    positions: Array2<f64>,
    velocities: Array2<f64>,
    masses: Array1<f64>,
    radii: Array1<f64>,
    member_offsets: Vec<usize>, // row i owns member_ids[offsets[i]..offsets[i + 1]]
    member_ids: Vec<i64>,
}

impl HaloCatalog {
    /// Build the catalog columns from rows, sorted by identifier.
    ///
    /// Fails without a parent dataset or with duplicate identifiers.
    pub fn from_file(file: CatalogFile, parent: Option<Arc<ParticleDataset>>) -> Result<Self> {
        let parent = parent.ok_or_else(|| {
            HaloError::Configuration(format!(
                "halo catalog {} requires a parent particle dataset",
                file.filename
            ))
        })?;
        let rows: Vec<CatalogRow> = file.halos.into_iter().sorted_by_key(|r| r.id).collect();
        if let Some((a, _)) = rows.iter().tuple_windows().find(|(a, b)| a.id == b.id) {
            return Err(HaloError::Configuration(format!(
                "halo identifier {} appears more than once in {}",
                a.id, file.filename
            )));
        }

        let n = rows.len();
        let mut positions = Array2::zeros((n, 3));
        let mut velocities = Array2::zeros((n, 3));
        let mut member_offsets = Vec::with_capacity(n + 1);
        let mut member_ids = Vec::new();
        member_offsets.push(0);
        for (i, row) in rows.iter().enumerate() {
            for axis in 0..3 {
                positions[[i, axis]] = row.position[axis];
                velocities[[i, axis]] = row.velocity[axis];
            }
            member_ids.extend_from_slice(&row.members);
            member_offsets.push(member_ids.len());
        }

        let mut cosmology = Cosmology {
            omega_matter: Some(file.header.omega_t),
            omega_lambda: Some(DEFAULT_OMEGA_LAMBDA),
            hubble_constant: Some(DEFAULT_HUBBLE_CONSTANT),
            omega_radiation: None,
        };
        cosmology.inherit(&parent.cosmology);

        debug!(
            filename = %file.filename,
            halos = n,
            members = member_ids.len(),
            parent = %parent.name,
            "built halo catalog"
        );
        Ok(Self {
            filename: file.filename,
            header: file.header,
            units: file.units,
            cosmology,
            parent,
            ids: rows.iter().map(|r| r.id).collect(),
            positions,
            velocities,
            masses: rows.iter().map(|r| r.mass).collect(),
            radii: rows.iter().map(|r| r.radius).collect(),
            member_offsets,
            member_ids,
        })
    }

    /// Load a JSON catalog and bind it to `parent`.
    pub fn load(path: impl AsRef<Path>, parent: Option<Arc<ParticleDataset>>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: CatalogFile = serde_json::from_reader(reader)?;
        Self::from_file(file, parent)
    }

    /// Catalog files are named `tree_bricks` followed by three digits.
    pub fn is_valid_filename(path: impl AsRef<Path>) -> bool {
        let Some(name) = path.as_ref().file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.strip_prefix("tree_bricks")
            .is_some_and(|digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
    }

    pub fn parent(&self) -> &Arc<ParticleDataset> {
        &self.parent
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &Array1<i64> {
        &self.ids
    }

    pub fn current_redshift(&self) -> f64 {
        1.0 / self.header.aexp - 1.0
    }

    /// Right domain edge: the parent's edge in Mpc scaled by the code length factor.
    pub fn domain_right_edge(&self) -> Point3<f64> {
        self.parent.domain.max.map(|x| x * self.units.length_to_mpc)
    }

    /// Row of `identifier` in the sorted identifier column.
    pub fn row_of(&self, identifier: i64) -> Result<usize> {
        let ids = self.ids.as_slice().unwrap_or_default();
        let row = ids.partition_point(|&id| id < identifier);
        match ids.get(row) {
            Some(&id) if id == identifier => Ok(row),
            _ => Err(HaloError::HaloNotFound { identifier }),
        }
    }

    /// Member particle identifiers of `row`.
    pub fn members(&self, row: usize) -> &[i64] {
        match (self.member_offsets.get(row), self.member_offsets.get(row + 1)) {
            (Some(&start), Some(&end)) => &self.member_ids[start..end],
            _ => &[],
        }
    }

    /// Physical values of the halo at `row`.
    pub fn record(&self, row: usize) -> Result<HaloRecord> {
        if row >= self.ids.len() {
            return Err(HaloError::Configuration(format!(
                "catalog row {row} out of range for {} halos",
                self.ids.len()
            )));
        }
        let position = self.positions.row(row);
        let velocity = self.velocities.row(row);
        let units = &self.units;
        Ok(HaloRecord {
            identifier: self.ids[row],
            row,
            position: Point3::new(
                units.length(position[0]),
                units.length(position[1]),
                units.length(position[2]),
            ),
            velocity: Vector3::new(
                units.velocity(velocity[0]),
                units.velocity(velocity[1]),
                units.velocity(velocity[2]),
            ),
            mass: units.mass(self.masses[row]),
            radius: units.length(self.radii[row]),
            member_ids: Array1::from(self.members(row).to_vec()),
        })
    }

    /// Look up halo `identifier` and locate its `ptype` members in the
    /// parent dataset.
    pub fn halo(&self, identifier: i64, ptype: &str, resolver: &ContainmentResolver) -> Result<HaloContainer> {
        if !self.parent.has_particle_type(ptype) {
            return Err(HaloError::Configuration(format!(
                "possible halo types are {:?}, got \"{}\"",
                self.parent.particle_types_raw(),
                ptype
            )));
        }
        let row = self.row_of(identifier)?;
        let record = self.record(row)?;
        debug!(identifier, row, members = record.member_ids.len(), "looking up halo");
        let members = record.member_ids.to_vec();
        let containment = resolver.resolve(
            &self.parent,
            record.position,
            record.radius,
            record.velocity,
            ptype,
            &members,
        )?;
        Ok(HaloContainer {
            record,
            ptype: ptype.to_string(),
            dataset: self.parent.clone(),
            containment,
        })
    }
}

/// Catalog values of one halo in Mpc, km/s and Msun.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloRecord {
    pub identifier: i64,
    pub row: usize,
    pub position: Point3<f64>,
    pub velocity: Vector3<f64>,
    pub mass: f64,
    pub radius: f64,
    pub member_ids: Array1<i64>,
}

/// One halo with its enclosing sphere and exact member region.
#[derive(Debug)]
pub struct HaloContainer {
    record: HaloRecord,
    ptype: String,
    dataset: Arc<ParticleDataset>,
    containment: Containment,
}

impl HaloContainer {
    pub fn identifier(&self) -> i64 {
        self.record.identifier
    }

    /// Row of the halo in its catalog.
    pub fn row(&self) -> usize {
        self.record.row
    }

    pub fn record(&self) -> &HaloRecord {
        &self.record
    }

    pub fn particle_type(&self) -> &str {
        &self.ptype
    }

    pub fn mass(&self) -> f64 {
        self.record.mass
    }

    pub fn position(&self) -> Point3<f64> {
        self.record.position
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.record.velocity
    }

    pub fn member_ids(&self) -> &Array1<i64> {
        &self.record.member_ids
    }

    /// The enclosing sphere; a superset of the members.
    pub fn sphere(&self) -> &IndexedParticleContainer {
        self.containment.sphere()
    }

    /// The exact member region.
    pub fn region(&self) -> &Containment {
        &self.containment
    }

    pub fn particle_ids(&self) -> Result<Array1<i64>> {
        self.containment.particle_ids()
    }

    pub fn particle_positions(&self) -> Result<Array2<f64>> {
        self.containment.particle_positions()
    }

    pub fn particle_field(&self, field: &str) -> Result<Array1<f64>> {
        self.containment.particle_field(field)
    }
}

impl fmt::Display for HaloContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{:09}", self.dataset.name, self.ptype, self.record.identifier)
    }
}
