use std::sync::Arc;

use anyhow::{bail, Context, Result};
use haloscope::catalog::HaloCatalog;
use haloscope::containment::ContainmentResolver;
use haloscope::dataset::ParticleDataset;
use haloscope::output::HaloSummary;
use haloscope::settings::{self, Settings};
use haloscope::synthetic::{self, SyntheticParams};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("haloscope=info".parse()?))
        .init();

    let settings = settings::load_config()?;
    match toml::to_string_pretty(&settings) {
        Ok(config) => debug!(%config, "effective configuration"),
        Err(e) => warn!(error = %e, "could not render configuration"),
    }
    println!("{settings}");

    let catalog = load_catalog(&settings)?;
    let identifier = match settings.halo_id {
        Some(id) => id,
        None => {
            let Some(&first) = catalog.ids().first() else {
                bail!("halo catalog {} is empty", catalog.filename);
            };
            info!(identifier = first, "no halo requested, using the first catalog entry");
            first
        }
    };

    let resolver = ContainmentResolver::new(&settings.containment)?;
    let halo = catalog
        .halo(identifier, &settings.particle_type, &resolver)
        .with_context(|| format!("Failed to look up halo {identifier}"))?;
    let summary = HaloSummary::from_halo(&halo)?;
    println!("{summary}");

    if let Some(path) = &settings.output {
        summary.write_json(path)?;
        info!(path = %path, "wrote halo summary");
    }
    Ok(())
}

/// Load the snapshot and catalog named in the settings, or generate both.
fn load_catalog(settings: &Settings) -> Result<HaloCatalog> {
    if settings.synthetic {
        let (snapshot, catalog) = synthetic::generate(&SyntheticParams::default(), settings.seed)?;
        let dataset = ParticleDataset::from_snapshot(snapshot, &settings.index)?;
        return Ok(HaloCatalog::from_file(catalog, Some(Arc::new(dataset)))?);
    }

    let (Some(snapshot), Some(catalog)) = (&settings.snapshot, &settings.catalog) else {
        bail!("a snapshot and a catalog are required unless --synthetic is given");
    };
    let dataset = ParticleDataset::load(snapshot, &settings.index)
        .with_context(|| format!("Failed to load snapshot {snapshot}"))?;
    info!(
        name = %dataset.name,
        files = dataset.files().len(),
        types = ?dataset.particle_types_raw(),
        "loaded particle dataset"
    );
    if !HaloCatalog::is_valid_filename(catalog) {
        warn!(path = %catalog, "catalog file name does not follow the tree_bricksNNN pattern");
    }
    HaloCatalog::load(catalog, Some(Arc::new(dataset)))
        .with_context(|| format!("Failed to load halo catalog {catalog}"))
}
