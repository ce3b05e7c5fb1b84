use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let settings = load_default_config().unwrap();
        assert_eq!(settings.index.n_ref, 16);
        assert_eq!(settings.index.over_refine_factor, 1);
        assert!((settings.containment.growth_factor - DEFAULT_GROWTH_FACTOR).abs() < 1e-12);
        assert_eq!(settings.containment.max_multiplier, DEFAULT_MAX_MULTIPLIER);
        assert_eq!(settings.particle_type, "io");
    }

    #[test]
    fn cli_arguments_override_config() {
        let mut settings = load_default_config().unwrap();
        let args = CliArgs::parse_from([
            "haloscope",
            "--halo",
            "12",
            "--ptype",
            "DM",
            "--growth",
            "1.2",
            "--n-ref",
            "32",
        ]);
        apply_cli_overrides(&mut settings, &args);
        assert_eq!(settings.halo_id, Some(12));
        assert_eq!(settings.particle_type, "DM");
        assert_eq!(settings.containment.growth_factor, 1.2);
        assert_eq!(settings.index.n_ref, 32);
        validate_config(&settings).unwrap();
    }

    #[test]
    fn growth_factor_must_exceed_one() {
        let mut settings = load_default_config().unwrap();
        settings.containment.growth_factor = 1.0;
        assert!(validate_config(&settings).is_err());
    }
}

/// Factor the search radius grows by between containment iterations.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.1;
/// Largest multiple of the approximate radius the containment search tries.
pub const DEFAULT_MAX_MULTIPLIER: f64 = 1e4;

/// Octree refinement and file selection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IndexSettings {
    pub n_ref: usize,
    pub over_refine_factor: u32,
    pub max_level: u32,
    /// Distance (Mpc) beyond a selector's bounding box within which files
    /// are kept as overlap files.
    pub overlap_margin: f64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            n_ref: 16,
            over_refine_factor: 1,
            max_level: 20,
            overlap_margin: 0.5,
        }
    }
}

/// Containment search settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContainmentSettings {
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,
}

fn default_growth_factor() -> f64 {
    DEFAULT_GROWTH_FACTOR
}

fn default_max_multiplier() -> f64 {
    DEFAULT_MAX_MULTIPLIER
}

impl Default for ContainmentSettings {
    fn default() -> Self {
        Self {
            growth_factor: DEFAULT_GROWTH_FACTOR,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
        }
    }
}

/// Runtime configuration for the application.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    pub index: IndexSettings,
    #[serde(default)]
    pub containment: ContainmentSettings,
    pub particle_type: String,
    pub snapshot: Option<String>, // JSON particle snapshot
    pub catalog: Option<String>,  // JSON halo catalog
    pub halo_id: Option<i64>,
    pub seed: Option<u64>,
    pub output: Option<String>,
    #[serde(default)]
    pub synthetic: bool, // generate data instead of loading it
}

pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let config: Settings = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("Error loading configuration")?
        .try_deserialize()
        .context("Error deserializing configuration")?;

    validate_config(&config)?;

    Ok(config)
}

pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    // Check if local config exists, if not use default
    let config_file = if local_config.exists() {
        info!(path = %local_config.display(), "using local configuration");
        local_config
    } else {
        info!(path = %default_config_file.display(), "using default configuration");
        default_config_file
    };

    let mut config: Settings = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(
            Environment::with_prefix("haloscope")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Error loading configuration")?
        .try_deserialize()
        .context("Error deserializing configuration")?;

    // Parse command-line arguments and override values
    let args = CliArgs::parse();
    apply_cli_overrides(&mut config, &args);

    validate_config(&config)?;

    Ok(config)
}

fn apply_cli_overrides(config: &mut Settings, args: &CliArgs) {
    if let Some(snapshot) = &args.snapshot {
        config.snapshot = Some(snapshot.clone());
    }
    if let Some(catalog) = &args.catalog {
        config.catalog = Some(catalog.clone());
    }
    if let Some(halo) = args.halo {
        config.halo_id = Some(halo);
    }
    if let Some(ptype) = &args.ptype {
        config.particle_type = ptype.clone();
    }
    if let Some(n_ref) = args.n_ref {
        config.index.n_ref = n_ref;
    }
    if let Some(factor) = args.over_refine {
        config.index.over_refine_factor = factor;
    }
    if let Some(growth) = args.growth {
        config.containment.growth_factor = growth;
    }
    if let Some(max) = args.max_multiplier {
        config.containment.max_multiplier = max;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if args.synthetic {
        if config.snapshot.is_some() || config.catalog.is_some() {
            warn!("--synthetic given: ignoring configured snapshot and catalog paths");
            config.snapshot = None;
            config.catalog = None;
        }
        config.synthetic = true;
    }
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the HALOSCOPE_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        // When running through cargo (e.g. cargo run, cargo test)
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("HALOSCOPE_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }
    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(PathBuf::from)
        .context("Could not find project root directory")
}

pub fn validate_config(config: &Settings) -> Result<()> {
    anyhow::ensure!(config.index.n_ref > 0, "n_ref must be at least 1");
    anyhow::ensure!(
        config.index.over_refine_factor <= 4,
        "over_refine_factor must be at most 4"
    );
    anyhow::ensure!(
        config.index.overlap_margin >= 0.0,
        "overlap margin must be non-negative"
    );
    anyhow::ensure!(
        config.containment.growth_factor > 1.0,
        "growth factor must be greater than 1"
    );
    anyhow::ensure!(
        config.containment.max_multiplier >= 1.0,
        "maximum multiplier must be at least 1"
    );
    anyhow::ensure!(!config.particle_type.is_empty(), "particle type must not be empty");
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "haloscope - exact halo membership across particle datasets")]
pub struct CliArgs {
    /// Path to a JSON particle snapshot.
    #[arg(short, long)]
    snapshot: Option<String>,

    /// Path to a JSON halo catalog describing the snapshot.
    #[arg(short, long)]
    catalog: Option<String>,

    /// Identifier of the halo to look up.
    #[arg(long)]
    halo: Option<i64>,

    /// Particle type the halo is made of.
    #[arg(short, long)]
    ptype: Option<String>,

    /// Number of particles in an octree leaf before it is split.
    #[arg(long)]
    n_ref: Option<usize>,

    /// Each octree leaf holds (2^factor)^3 cells.
    #[arg(long)]
    over_refine: Option<u32>,

    /// Factor the containment radius grows by on every iteration.
    #[arg(long)]
    growth: Option<f64>,

    /// Largest multiple of the catalog radius tried before giving up.
    #[arg(long)]
    max_multiplier: Option<f64>,

    /// Generate a synthetic snapshot and catalog instead of loading files.
    #[arg(long)]
    synthetic: bool,

    /// Random seed for synthetic data.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the halo summary as JSON to this path.
    #[arg(short, long)]
    output: Option<String>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - n_ref: {}
  - Over-refine factor: {}
  - Max level: {}
  - Overlap margin: {:.3} Mpc
  - Growth factor: {:.3}
  - Max multiplier: {:.1}
  - Particle type: {}
  ",
            self.index.n_ref,
            self.index.over_refine_factor,
            self.index.max_level,
            self.index.overlap_margin,
            self.containment.growth_factor,
            self.containment.max_multiplier,
            self.particle_type,
        )
    }
}
