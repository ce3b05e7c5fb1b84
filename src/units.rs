//! Conversion factors between catalog code units and the physical frame.
//!
//! Containment search runs in one common frame: Mpc for positions and radii,
//! km/s for velocities, Msun for masses. Catalog columns are stored in code
//! units and converted with a [`CodeUnits`] before they leave the catalog.

use serde::{Deserialize, Serialize};

/// Centimetres per megaparsec.
pub const CM_PER_MPC: f64 = 3.085_677_581_491_367e24;
/// AdaptaHOP internally assumes 1 Mpc == 3.08e24 cm.
pub const ADAPTAHOP_CM_PER_MPC: f64 = 3.08e24;
/// AdaptaHOP masses are stored in units of 1e11 Msun.
pub const ADAPTAHOP_MASS_UNIT: f64 = 1e11;


/// Scale factors from code units to Mpc, km/s and Msun.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodeUnits {
    pub length_to_mpc: f64,
    pub velocity_to_kms: f64,
    pub mass_to_msun: f64,
}

impl CodeUnits {
    /// Unit system of AdaptaHOP `tree_bricks` catalogs.
    pub fn adaptahop() -> Self {
        Self {
            length_to_mpc: CM_PER_MPC / ADAPTAHOP_CM_PER_MPC,
            velocity_to_kms: 1.0,
            mass_to_msun: ADAPTAHOP_MASS_UNIT,
        }
    }

    /// Values already in Mpc, km/s and Msun.
    pub fn physical() -> Self {
        Self {
            length_to_mpc: 1.0,
            velocity_to_kms: 1.0,
            mass_to_msun: 1.0,
        }
    }

    pub fn length(&self, value: f64) -> f64 {
        value * self.length_to_mpc
    }

    pub fn velocity(&self, value: f64) -> f64 {
        value * self.velocity_to_kms
    }

    pub fn mass(&self, value: f64) -> f64 {
        value * self.mass_to_msun
    }
}

impl Default for CodeUnits {
    fn default() -> Self {
        Self::adaptahop()
    }
}
