//! Destinations for generated rays.
//!
//! A sink accepts fixed-width records of ten columns: position (3), direction
//! (3), photon energy and the Stokes parameters `xi1`, `xi2`, `xi3`. Sinks do
//! not interpret the columns; they only store or encode them.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{RadiationError, Result};
use crate::polarization::StokesParameters;

pub mod binary_output;
pub mod file_output;
pub mod memory_output;

pub use binary_output::BinaryRaySink;
pub use file_output::CsvRaySink;
pub use memory_output::VecRaySink;

/// Number of columns in a ray record.
pub const RAY_COLUMNS: usize = 10;

/// Column names, in the order of [RayRecord::columns].
pub const RAY_HEADER: [&str; RAY_COLUMNS] = [
    "x", "y", "z", "nx", "ny", "nz", "energy", "xi1", "xi2", "xi3",
];

/// One sampled photon.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RayRecord {
    /// Point of emission relative to the laser focus, SI units of m.
    pub position: Vector3<f64>,
    /// Unit vector along the photon momentum.
    pub direction: Vector3<f64>,
    /// Photon energy, in Joules.
    pub energy: f64,
    pub polarization: StokesParameters,
}

impl RayRecord {
    pub fn columns(&self) -> [f64; RAY_COLUMNS] {
        [
            self.position[0],
            self.position[1],
            self.position[2],
            self.direction[0],
            self.direction[1],
            self.direction[2],
            self.energy,
            self.polarization.xi1,
            self.polarization.xi2,
            self.polarization.xi3,
        ]
    }

    pub fn from_columns(columns: &[f64]) -> Result<Self> {
        if columns.len() != RAY_COLUMNS {
            return Err(RadiationError::MalformedRecord(format!(
                "expected {} columns, found {}",
                RAY_COLUMNS,
                columns.len()
            )));
        }
        Ok(RayRecord {
            position: Vector3::new(columns[0], columns[1], columns[2]),
            direction: Vector3::new(columns[3], columns[4], columns[5]),
            energy: columns[6],
            polarization: StokesParameters::new(columns[7], columns[8], columns[9]),
        })
    }
}

/// A write-only destination for rays.
///
/// Writing to a sink that is not open fails with [RadiationError::SinkNotOpen].
pub trait RaySink: Send {
    fn write_ray(&mut self, ray: &RayRecord) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Flushes pending output. Further writes fail.
    fn close(&mut self) -> Result<()>;
}
