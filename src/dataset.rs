//! Particle snapshots: files, domain, particle types and cosmology.
//!
//! A [`ParticleDataset`] hands out containers for spatial selections. For a
//! selector it picks the *primary* files (files holding a particle inside the
//! selector's bounding volume) and the *overlap* files (the remaining files
//! within the configured overlap margin), so the container only ever indexes
//! the files it needs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::IndexedParticleContainer;
use crate::data_file::{DataFile, FileSet, ParticleBlock};
use crate::error::{HaloError, Result};
use crate::geom::Aabb;
use crate::octree::RefinementParams;
use crate::selector::{AllSelector, Region};
use crate::settings::IndexSettings;

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::{array, Array1, Array2};

    fn settings() -> IndexSettings {
        IndexSettings {
            n_ref: 8,
            over_refine_factor: 1,
            max_level: 12,
            overlap_margin: 1.6,
        }
    }

    fn block_at(x: f64, first_id: i64) -> ParticleBlock {
        ParticleBlock::new(
            array![[x, 5.0, 5.0], [x + 0.5, 5.0, 5.0]],
            Array2::zeros((2, 3)),
            Array1::ones(2),
            array![first_id, first_id + 1],
        )
        .unwrap()
    }

    fn dataset() -> ParticleDataset {
        let snapshot = Snapshot {
            name: "snap_080".to_string(),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [10.0; 3],
            cosmology: Cosmology::default(),
            files: (0..5)
                .map(|i| BTreeMap::from([("io".to_string(), block_at(2.0 * i as f64, 10 * i))]))
                .collect(),
        };
        ParticleDataset::from_snapshot(snapshot, &settings()).unwrap()
    }

    #[test]
    fn files_are_split_into_primary_and_overlap() {
        let ds = dataset();
        // particles sit at x in {0, 0.5}, {2, 2.5}, {4, 4.5}, ...
        let region = Region::from_box(Aabb::new(Point3::new(2.0, 4.0, 4.0), Point3::new(3.0, 6.0, 6.0)));
        let (primary, overlap) = ds.files_for(&region);
        assert_eq!(primary.sequence_numbers(), vec![1]);
        assert_eq!(overlap.sequence_numbers(), vec![0, 2]);
    }

    #[test]
    fn sphere_container_reads_particles() {
        let ds = dataset();
        let sphere = ds.sphere(Point3::new(4.25, 5.0, 5.0), 0.5).unwrap();
        assert_eq!(sphere.particle_ids("io").unwrap(), array![20, 21]);
    }

    #[test]
    fn empty_selection_has_no_container() {
        let ds = dataset();
        let region = Region::sphere(Point3::new(9.5, 9.5, 9.5), 0.1);
        assert!(!ds.touches(&region));
        assert!(matches!(ds.container(region), Err(HaloError::Configuration(_))));
    }

    #[test]
    fn particle_types_are_collected() {
        let ds = dataset();
        assert_eq!(ds.particle_types_raw(), vec!["io".to_string()]);
        assert!(ds.has_particle_type("io"));
        assert!(!ds.has_particle_type("DM"));
        assert_eq!(ds.all_data().unwrap().particle_ids("io").unwrap().len(), 10);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = Snapshot {
            name: "tiny".to_string(),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [1.0; 3],
            cosmology: Cosmology {
                omega_matter: Some(0.3),
                ..Cosmology::default()
            },
            files: vec![BTreeMap::from([("io".to_string(), block_at(0.1, 1))])],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let ds = ParticleDataset::from_snapshot(serde_json::from_str(&json).unwrap(), &settings()).unwrap();
        assert_eq!(ds.cosmology.omega_matter, Some(0.3));
        assert_eq!(ds.files().len(), 1);
    }
}

/// Cosmological parameters; any of them may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    pub omega_matter: Option<f64>,
    pub omega_lambda: Option<f64>,
    pub omega_radiation: Option<f64>,
    pub hubble_constant: Option<f64>,
}

impl Cosmology {
    /// Take every parameter `parent` defines, keep ours otherwise.
    pub fn inherit(&mut self, parent: &Cosmology) {
        let pick = |ours: &mut Option<f64>, theirs: Option<f64>| {
            if theirs.is_some() {
                *ours = theirs;
            }
        };
        pick(&mut self.omega_matter, parent.omega_matter);
        pick(&mut self.omega_lambda, parent.omega_lambda);
        pick(&mut self.omega_radiation, parent.omega_radiation);
        pick(&mut self.hubble_constant, parent.hubble_constant);
    }
}

/// On-disk JSON layout of a particle snapshot. Lengths are in Mpc,
/// velocities in km/s, masses in Msun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub domain_left_edge: [f64; 3],
    pub domain_right_edge: [f64; 3],
    #[serde(default)]
    pub cosmology: Cosmology,
    pub files: Vec<BTreeMap<String, ParticleBlock>>, // one map of particle type -> block per file
}

/// A particle snapshot split into data files.
#[derive(Debug, Clone)]
pub struct ParticleDataset {
    pub name: String,
    pub domain: Aabb,
    pub cosmology: Cosmology,
    files: Vec<Arc<DataFile>>,
    particle_types: BTreeSet<String>,
    params: RefinementParams,
    overlap_margin: f64,
}

impl ParticleDataset {
    pub fn from_snapshot(snapshot: Snapshot, settings: &IndexSettings) -> Result<Self> {
        let domain = Aabb::new(
            Point3::from(snapshot.domain_left_edge),
            Point3::from(snapshot.domain_right_edge),
        );
        let mut files = Vec::with_capacity(snapshot.files.len());
        for (sequence, blocks) in snapshot.files.into_iter().enumerate() {
            for block in blocks.values() {
                block.validate()?;
            }
            let filename = format!("{}.{:04}", snapshot.name, sequence);
            files.push(Arc::new(DataFile::new(
                sequence as u32,
                snapshot.name.clone(),
                filename,
                blocks,
            )));
        }
        let particle_types = files
            .iter()
            .flat_map(|f| f.particle_types().map(str::to_string))
            .collect();
        Ok(Self {
            name: snapshot.name,
            domain,
            cosmology: snapshot.cosmology,
            files,
            particle_types,
            params: RefinementParams {
                n_ref: settings.n_ref,
                over_refine_factor: settings.over_refine_factor,
                max_level: settings.max_level,
                domain,
            },
            overlap_margin: settings.overlap_margin,
        })
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: impl AsRef<Path>, settings: &IndexSettings) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        debug!(
            path = %path.as_ref().display(),
            files = snapshot.files.len(),
            "loaded particle snapshot"
        );
        Self::from_snapshot(snapshot, settings)
    }

    pub fn files(&self) -> &[Arc<DataFile>] {
        &self.files
    }

    pub fn params(&self) -> &RefinementParams {
        &self.params
    }

    /// Particle types present in at least one file, sorted.
    pub fn particle_types_raw(&self) -> Vec<String> {
        self.particle_types.iter().cloned().collect()
    }

    pub fn has_particle_type(&self, ptype: &str) -> bool {
        self.particle_types.contains(ptype)
    }

    /// Primary and overlap files for a region.
    pub fn files_for(&self, region: &Region) -> (FileSet, FileSet) {
        let selector = region.selector();
        let padded = selector.bounding_box().expanded(self.overlap_margin);
        let mut primary = Vec::new();
        let mut overlap = Vec::new();
        for file in &self.files {
            let Some(bounds) = file.bounds() else {
                continue;
            };
            if selector.may_intersect(&bounds) {
                primary.push(file.clone());
            } else if padded.intersects(&bounds) {
                overlap.push(file.clone());
            }
        }
        (FileSet::new(primary), FileSet::new(overlap))
    }

    /// Whether any file may hold particles inside `region`.
    pub fn touches(&self, region: &Region) -> bool {
        self.files
            .iter()
            .filter_map(|f| f.bounds())
            .any(|b| region.selector().may_intersect(&b))
    }

    /// A container over `region` fed by the files it touches.
    pub fn container(&self, region: Region) -> Result<IndexedParticleContainer> {
        let (primary, overlap) = self.files_for(&region);
        if primary.is_empty() {
            return Err(HaloError::Configuration(format!(
                "no data file of {} intersects the requested region",
                self.name
            )));
        }
        IndexedParticleContainer::new(region, primary, overlap, None, self.params)
    }

    pub fn sphere(&self, center: Point3<f64>, radius: f64) -> Result<IndexedParticleContainer> {
        self.container(Region::sphere(center, radius))
    }

    pub fn region(&self, aabb: Aabb) -> Result<IndexedParticleContainer> {
        self.container(Region::from_box(aabb))
    }

    pub fn all_data(&self) -> Result<IndexedParticleContainer> {
        self.container(Region::new(Arc::new(AllSelector::new())))
    }
}
