//! Lazily indexed particle containers and exact halo membership.
//!
//! - [`container`]: containers over a region and a set of data files, with a
//!   spatial index built on first use and index-backed queries gated by
//!   spatial mode.
//! - [`octree`]: the [`octree::SpatialIndex`] trait and its particle octree.
//! - [`containment`]: grows a sphere until it holds a known member set, then
//!   cuts it down to exactly those members.
//! - [`catalog`]: halo catalogs bound to their parent particle dataset.
//! - [`dataset`], [`data_file`]: snapshots, data files and file sets.

pub mod catalog;
pub mod container;
pub mod containment;
pub mod data_file;
pub mod dataset;
pub mod error;
pub mod geom;
pub mod octree;
pub mod output;
pub mod selector;
pub mod settings;
pub mod synthetic;
pub mod units;

pub use error::{HaloError, Result};
