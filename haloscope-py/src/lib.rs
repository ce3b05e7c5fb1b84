use std::sync::Arc;

use haloscope::catalog::HaloCatalog;
use haloscope::containment::ContainmentResolver;
use haloscope::dataset::ParticleDataset;
use haloscope::output::HaloSummary;
use haloscope::settings::{ContainmentSettings, IndexSettings};
use haloscope::synthetic::{self, SyntheticParams};
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

/// Per-halo numbers in Mpc, km/s and Msun.
#[pyclass(name = "HaloSummary", frozen)]
struct PyHaloSummary {
    #[pyo3(get)]
    name: String,
    #[pyo3(get)]
    identifier: i64,
    #[pyo3(get)]
    row: usize,
    #[pyo3(get)]
    mass: f64,
    #[pyo3(get)]
    position: [f64; 3],
    #[pyo3(get)]
    velocity: [f64; 3],
    #[pyo3(get)]
    sphere_radius: f64,
    #[pyo3(get)]
    members: usize,
    #[pyo3(get)]
    member_mass: f64,
    json: String,
}

#[pymethods]
impl PyHaloSummary {
    fn to_json(&self) -> String {
        self.json.clone()
    }

    fn __repr__(&self) -> String {
        format!("HaloSummary({}, members={})", self.name, self.members)
    }
}

fn to_py_err(e: haloscope::HaloError) -> PyErr {
    match e {
        haloscope::HaloError::HaloNotFound { .. } => PyKeyError::new_err(e.to_string()),
        haloscope::HaloError::Configuration(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

fn summarize(catalog: &HaloCatalog, halo_id: i64, ptype: &str) -> PyResult<PyHaloSummary> {
    let resolver = ContainmentResolver::new(&ContainmentSettings::default()).map_err(to_py_err)?;
    let halo = catalog.halo(halo_id, ptype, &resolver).map_err(to_py_err)?;
    let summary = HaloSummary::from_halo(&halo).map_err(|e| PyRuntimeError::new_err(format!("{e:#}")))?;
    let json = serde_json::to_string(&summary).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Ok(PyHaloSummary {
        name: summary.name,
        identifier: summary.identifier,
        row: summary.row,
        mass: summary.catalog_mass,
        position: summary.position,
        velocity: summary.velocity,
        sphere_radius: summary.sphere_radius,
        members: summary.members,
        member_mass: summary.member_mass,
        json,
    })
}

/// Look up one halo of a JSON catalog in its JSON particle snapshot.
#[pyfunction]
#[pyo3(signature = (snapshot, catalog, halo_id, ptype = "io"))]
fn lookup_halo(snapshot: &str, catalog: &str, halo_id: i64, ptype: &str) -> PyResult<PyHaloSummary> {
    let dataset = ParticleDataset::load(snapshot, &IndexSettings::default()).map_err(to_py_err)?;
    let catalog = HaloCatalog::load(catalog, Some(Arc::new(dataset))).map_err(to_py_err)?;
    summarize(&catalog, halo_id, ptype)
}

/// Generate a synthetic snapshot and catalog, then look up one halo.
#[pyfunction]
#[pyo3(signature = (halo_id = 1, seed = None))]
fn synthetic_halo(halo_id: i64, seed: Option<u64>) -> PyResult<PyHaloSummary> {
    let (snapshot, catalog) = synthetic::generate(&SyntheticParams::default(), seed).map_err(to_py_err)?;
    let dataset = ParticleDataset::from_snapshot(snapshot, &IndexSettings::default()).map_err(to_py_err)?;
    let catalog = HaloCatalog::from_file(catalog, Some(Arc::new(dataset))).map_err(to_py_err)?;
    summarize(&catalog, halo_id, "io")
}

#[pymodule]
fn _haloscope_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(lookup_halo, m)?)?;
    m.add_function(wrap_pyfunction!(synthetic_halo, m)?)?;
    m.add_class::<PyHaloSummary>()?;
    Ok(())
}
