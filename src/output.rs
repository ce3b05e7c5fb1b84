use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Axis;
use serde::Serialize;

use crate::catalog::HaloContainer;

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> HaloSummary {
        HaloSummary {
            name: "output_00080_io_000000003".to_string(),
            identifier: 3,
            row: 1,
            particle_type: "io".to_string(),
            catalog_mass: 2e11,
            position: [1.0, 2.0, 3.0],
            velocity: [10.0, 0.0, 0.0],
            catalog_radius: 0.7,
            sphere_radius: 0.77,
            multiplier: 1.1,
            members: 200,
            sphere_particles: 260,
            member_mass: 2e11,
            center_of_mass: [1.0, 2.0, 3.1],
            velocity_dispersion: 49.5,
        }
    }

    #[test]
    fn summary_serializes_to_json() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["identifier"], 3);
        assert_eq!(json["members"], 200);
        assert_eq!(json["position"][2], 3.0);
    }

    #[test]
    fn summary_is_written_to_file() {
        let path = std::env::temp_dir().join(format!("haloscope_summary_{}.json", std::process::id()));
        summary().write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.contains("\"sphere_particles\": 260"));
    }

    #[test]
    fn display_lists_members() {
        let text = summary().to_string();
        assert!(text.starts_with("Halo output_00080_io_000000003"));
        assert!(text.contains("Members:"));
    }
}

/// Per-halo numbers reported by the CLI. Mpc, km/s and Msun throughout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HaloSummary {
    pub name: String,
    pub identifier: i64,
    pub row: usize,
    pub particle_type: String,
    pub catalog_mass: f64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub catalog_radius: f64,
    pub sphere_radius: f64, // radius of the enclosing sphere
    pub multiplier: f64,    // sphere radius / catalog radius
    pub members: usize,
    pub sphere_particles: usize,
    pub member_mass: f64, // summed particle masses of the exact region
    pub center_of_mass: [f64; 3],
    pub velocity_dispersion: f64, // rms member speed in the halo frame
}

impl HaloSummary {
    pub fn from_halo(halo: &HaloContainer) -> Result<Self> {
        let region = halo.region();
        let masses = region.particle_field("particle_mass")?;
        let positions = region.particle_positions()?;
        let relative = region.relative_velocities()?;
        let sphere_particles = halo.sphere().particle_ids(halo.particle_type())?.len();

        let member_mass = masses.sum();
        let mut center_of_mass = halo.position().into();
        if member_mass > 0.0 {
            let weighted = positions.t().dot(&masses) / member_mass;
            center_of_mass = [weighted[0], weighted[1], weighted[2]];
        }
        let velocity_dispersion = relative
            .map_axis(Axis(1), |v| v.dot(&v))
            .mean()
            .map_or(0.0, f64::sqrt);

        Ok(Self {
            name: halo.to_string(),
            identifier: halo.identifier(),
            row: halo.row(),
            particle_type: halo.particle_type().to_string(),
            catalog_mass: halo.mass(),
            position: halo.position().into(),
            velocity: halo.velocity().into(),
            catalog_radius: halo.record().radius,
            sphere_radius: region.radius(),
            multiplier: region.multiplier(),
            members: region.len(),
            sphere_particles,
            member_mass,
            center_of_mass,
            velocity_dispersion,
        })
    }

    /// Write the summary as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        Ok(())
    }
}

impl fmt::Display for HaloSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.position;
        let [vx, vy, vz] = self.velocity;
        let [cx, cy, cz] = self.center_of_mass;
        writeln!(f, "Halo {} (row {}):", self.name, self.row)?;
        writeln!(f, "  Catalog mass:     {:.4e} Msun", self.catalog_mass)?;
        writeln!(f, "  Member mass:      {:.4e} Msun", self.member_mass)?;
        writeln!(f, "  Position:         ({x:.4}, {y:.4}, {z:.4}) Mpc")?;
        writeln!(f, "  Center of mass:   ({cx:.4}, {cy:.4}, {cz:.4}) Mpc")?;
        writeln!(f, "  Velocity:         ({vx:.2}, {vy:.2}, {vz:.2}) km/s")?;
        writeln!(f, "  Dispersion:       {:.2} km/s", self.velocity_dispersion)?;
        writeln!(f, "  Catalog radius:   {:.4} Mpc", self.catalog_radius)?;
        writeln!(
            f,
            "  Sphere radius:    {:.4} Mpc ({:.3}x)",
            self.sphere_radius, self.multiplier
        )?;
        writeln!(f, "  Members:          {}", self.members)?;
        writeln!(f, "  Sphere particles: {}", self.sphere_particles)
    }
}
