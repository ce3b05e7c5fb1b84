//! Read-only particle data files and ordered file sets.
//!
//! A [`DataFile`] is one chunk of a simulation snapshot: for every particle
//! type it holds positions, velocities, masses and integer identities. Files
//! are shared between containers through `Arc` and never mutated after they
//! are created.
//!
//! A [`FileSet`] is an ordered, duplicate-free sequence of files, ordered by
//! file sequence number. Containers keep a primary and an overlap set; the
//! union of the two is what ghost zone widening indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{HaloError, Result};
use crate::geom::Aabb;

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::array;

    fn file(sequence: u32) -> Arc<DataFile> {
        let block = ParticleBlock::new(
            array![[sequence as f64, 0.0, 0.0]],
            array![[0.0, 0.0, 0.0]],
            array![1.0],
            array![sequence as i64],
        )
        .unwrap();
        Arc::new(DataFile::new(sequence, "snap", format!("snap.{sequence}"), [("io", block)]))
    }

    #[test]
    fn union_is_sorted_and_deduplicated() {
        let (a, b, c) = (file(0), file(1), file(2));
        let primary = FileSet::new([b.clone(), a.clone()]);
        let overlap = FileSet::new([a.clone(), c.clone()]);
        let union = primary.union(&overlap);
        assert_eq!(union.sequence_numbers(), vec![0, 1, 2]);
        // the inputs are untouched
        assert_eq!(primary.sequence_numbers(), vec![0, 1]);
        assert_eq!(overlap.sequence_numbers(), vec![0, 2]);
    }

    #[test]
    fn union_ignores_input_order() {
        let (a, b, c) = (file(0), file(1), file(2));
        let one = FileSet::new([c.clone(), a.clone()]).union(&FileSet::new([b.clone(), a.clone()]));
        let two = FileSet::new([a.clone(), b]).union(&FileSet::new([a, c]));
        assert_eq!(one.sequence_numbers(), two.sequence_numbers());
    }

    #[test]
    fn mismatched_block_lengths_are_rejected() {
        let block = ParticleBlock::new(
            array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
            array![[0.0, 0.0, 0.0]],
            array![1.0, 1.0],
            array![1, 2],
        );
        assert!(matches!(block, Err(HaloError::Configuration(_))));
    }

    #[test]
    fn all_type_spans_every_block() {
        let io = ParticleBlock::new(array![[0.0, 0.0, 0.0]], array![[0.0, 0.0, 0.0]], array![1.0], array![1]).unwrap();
        let star = ParticleBlock::new(array![[5.0, 5.0, 5.0]], array![[0.0, 0.0, 0.0]], array![2.0], array![2]).unwrap();
        let file = DataFile::new(0, "snap", "snap.0", [("io", io), ("star", star)]);
        assert_eq!(file.blocks_for("all").count(), 2);
        assert_eq!(file.blocks_for("star").count(), 1);
        assert_eq!(file.particle_count("all"), 2);
        let bounds = file.bounds().unwrap();
        assert_eq!(bounds.max.x, 5.0);
    }
}

/// Name of the pseudo particle type covering every type in a file.
pub const ALL_PARTICLES: &str = "all";

/// Particle columns for one particle type within one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleBlock {
    pub positions: Array2<f64>,  // n x 3, Mpc
    pub velocities: Array2<f64>, // n x 3, km/s
    pub masses: Array1<f64>,     // n, Msun
    pub ids: Array1<i64>,        // n
}

impl ParticleBlock {
    pub fn new(
        positions: Array2<f64>,
        velocities: Array2<f64>,
        masses: Array1<f64>,
        ids: Array1<i64>,
    ) -> Result<Self> {
        let block = Self {
            positions,
            velocities,
            masses,
            ids,
        };
        block.validate()?;
        Ok(block)
    }

    /// Check that every column describes the same number of particles.
    pub fn validate(&self) -> Result<()> {
        let n = self.ids.len();
        if self.positions.dim() != (n, 3)
            || self.velocities.dim() != (n, 3)
            || self.masses.len() != n
        {
            return Err(HaloError::Configuration(format!(
                "particle block columns disagree: positions {:?}, velocities {:?}, masses {}, ids {}",
                self.positions.dim(),
                self.velocities.dim(),
                self.masses.len(),
                n
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Concatenate blocks in order.
    pub fn concatenate<'a>(blocks: impl IntoIterator<Item = &'a ParticleBlock>) -> ParticleBlock {
        let blocks: Vec<&ParticleBlock> = blocks.into_iter().collect();
        if blocks.is_empty() {
            return ParticleBlock::empty();
        }
        let positions: Vec<_> = blocks.iter().map(|b| b.positions.view()).collect();
        let velocities: Vec<_> = blocks.iter().map(|b| b.velocities.view()).collect();
        let masses: Vec<_> = blocks.iter().map(|b| b.masses.view()).collect();
        let ids: Vec<_> = blocks.iter().map(|b| b.ids.view()).collect();
        // every block was validated to be n x 3, so the shapes always line up
        ParticleBlock {
            positions: ndarray::concatenate(Axis(0), &positions).unwrap_or_else(|_| Array2::zeros((0, 3))),
            velocities: ndarray::concatenate(Axis(0), &velocities).unwrap_or_else(|_| Array2::zeros((0, 3))),
            masses: ndarray::concatenate(Axis(0), &masses).unwrap_or_else(|_| Array1::zeros(0)),
            ids: ndarray::concatenate(Axis(0), &ids).unwrap_or_else(|_| Array1::zeros(0)),
        }
    }

    pub fn empty() -> ParticleBlock {
        ParticleBlock {
            positions: Array2::zeros((0, 3)),
            velocities: Array2::zeros((0, 3)),
            masses: Array1::zeros(0),
            ids: Array1::zeros(0),
        }
    }
}

/// One read-only chunk of a particle snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub sequence: u32,   // position of the file within its dataset
    pub dataset: String, // name of the owning dataset
    pub filename: String,
    blocks: BTreeMap<String, ParticleBlock>,
    bounds: Option<Aabb>,
}

impl DataFile {
    pub fn new<S: Into<String>>(
        sequence: u32,
        dataset: impl Into<String>,
        filename: impl Into<String>,
        blocks: impl IntoIterator<Item = (S, ParticleBlock)>,
    ) -> Self {
        let blocks: BTreeMap<String, ParticleBlock> =
            blocks.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let bounds = blocks
            .values()
            .filter_map(|b| Aabb::from_positions(b.positions.view()))
            .reduce(|a, b| a.union(&b));
        Self {
            sequence,
            dataset: dataset.into(),
            filename: filename.into(),
            blocks,
            bounds,
        }
    }

    /// Blocks for `ptype`; the `all` type yields every block.
    pub fn blocks_for<'a>(&'a self, ptype: &'a str) -> impl Iterator<Item = &'a ParticleBlock> + 'a {
        self.blocks
            .iter()
            .filter(move |(name, _)| ptype == ALL_PARTICLES || name.as_str() == ptype)
            .map(|(_, block)| block)
    }

    pub fn particle_types(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn particle_count(&self, ptype: &str) -> usize {
        self.blocks_for(ptype).map(ParticleBlock::len).sum()
    }

    /// Box around every particle in the file, `None` when the file is empty.
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }
}

/// Ordered, duplicate-free sequence of shared data files.
#[derive(Debug, Clone, Default)]
pub struct FileSet(Vec<Arc<DataFile>>);

impl FileSet {
    /// Sorts by sequence number and drops duplicates.
    pub fn new(files: impl IntoIterator<Item = Arc<DataFile>>) -> Self {
        FileSet(
            files
                .into_iter()
                .sorted_by_key(|f| f.sequence)
                .dedup_by(|a, b| a.sequence == b.sequence)
                .collect(),
        )
    }

    pub fn empty() -> Self {
        FileSet(Vec::new())
    }

    /// `self ∪ other`, sorted and deduplicated. Neither input is modified.
    pub fn union(&self, other: &FileSet) -> FileSet {
        FileSet::new(self.0.iter().chain(other.0.iter()).cloned())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataFile>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, file: &DataFile) -> bool {
        self.0.iter().any(|f| f.sequence == file.sequence)
    }

    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.0.iter().map(|f| f.sequence).collect()
    }

    /// The dataset every file belongs to, or `None` for an empty set.
    /// Fails if the files come from different datasets.
    pub fn common_dataset(&self) -> Result<Option<&str>> {
        let mut datasets = self.0.iter().map(|f| f.dataset.as_str()).unique();
        let first = datasets.next();
        if let Some(other) = datasets.next() {
            return Err(HaloError::Configuration(format!(
                "data files belong to different datasets ({} and {})",
                first.unwrap_or_default(),
                other
            )));
        }
        Ok(first)
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a Arc<DataFile>;
    type IntoIter = std::slice::Iter<'a, Arc<DataFile>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
