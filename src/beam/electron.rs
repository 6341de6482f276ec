//! Gaussian model of a relativistic electron bunch.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constant::{ELECTRON_REST_ENERGY, MEV};
use crate::error::{RadiationError, Result};
use crate::maths;

/// An electron bunch travelling along `+z`, with its beam waist at `z = 0`.
///
/// All widths and spreads are derived on demand from the emittances and beta
/// functions, so they always agree with the current parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectronBunch {
    /// Mean Lorentz factor of the electrons.
    pub gamma: f64,

    /// Number of electrons in the bunch.
    pub number: f64,

    /// Relative rms energy spread `delta gamma / gamma`.
    pub delgamma: f64,

    /// Rms bunch semi-length, SI units of m.
    pub length: f64,

    /// Geometric rms emittance in x, SI units of m rad.
    pub eps_x: f64,

    /// Geometric rms emittance in y, SI units of m rad.
    pub eps_y: f64,

    /// Beta function in x at the waist, SI units of m.
    pub beta_x: f64,

    /// Beta function in y at the waist, SI units of m.
    pub beta_y: f64,

    /// Displacement of the bunch with respect to the laser focus, SI units of m.
    pub shift: Vector3<f64>,
}

impl Default for ElectronBunch {
    fn default() -> Self {
        ElectronBunch {
            gamma: 50.0 * MEV / ELECTRON_REST_ENERGY,
            number: 6.24e9,
            delgamma: 0.0025,
            length: 3.0e-4,
            eps_x: 5.0e-9,
            eps_y: 5.0e-9,
            beta_x: 0.01,
            beta_y: 0.01,
            shift: Vector3::zeros(),
        }
    }
}

impl ElectronBunch {
    /// Creates a bunch of the given kinetic-plus-rest energy in Joules, otherwise default.
    pub fn with_energy(energy: f64) -> Self {
        ElectronBunch {
            gamma: energy / ELECTRON_REST_ENERGY,
            ..Default::default()
        }
    }

    /// Total electron energy `gamma m c^2`, in Joules.
    pub fn energy(&self) -> f64 {
        self.gamma * ELECTRON_REST_ENERGY
    }

    pub fn set_energy(&mut self, energy: f64) {
        self.gamma = energy / ELECTRON_REST_ENERGY;
    }

    /// Mean direction of motion.
    pub fn direction(&self) -> Vector3<f64> {
        Vector3::z()
    }

    /// Speed in units of c at the given Lorentz factor.
    pub fn speed_at(gamma: f64) -> f64 {
        (1.0 - 1.0 / (gamma * gamma)).max(0.0).sqrt()
    }

    /// Mean speed in units of c.
    pub fn speed(&self) -> f64 {
        Self::speed_at(self.gamma)
    }

    /// Rms angular spread in x, in radians.
    pub fn angle_spread_x(&self) -> f64 {
        (self.eps_x / self.beta_x).sqrt()
    }

    /// Rms angular spread in y, in radians.
    pub fn angle_spread_y(&self) -> f64 {
        (self.eps_y / self.beta_y).sqrt()
    }

    /// The larger of the two angular spreads.
    pub fn spread(&self) -> f64 {
        self.angle_spread_x().max(self.angle_spread_y())
    }

    /// Squared rms width in x at longitudinal position `z` from the waist.
    pub fn width2_x(&self, z: f64) -> f64 {
        self.eps_x * (self.beta_x + z * z / self.beta_x)
    }

    /// Squared rms width in y at longitudinal position `z` from the waist.
    pub fn width2_y(&self, z: f64) -> f64 {
        self.eps_y * (self.beta_y + z * z / self.beta_y)
    }

    pub fn width_x(&self, z: f64) -> f64 {
        self.width2_x(z).sqrt()
    }

    pub fn width_y(&self, z: f64) -> f64 {
        self.width2_y(z).sqrt()
    }

    /// Rms spread of the Lorentz factor.
    pub fn energy_spread(&self) -> f64 {
        self.gamma * self.delgamma
    }

    /// Normalised transverse density at `(x, y)` in the plane `z`, relative to the bunch axis.
    pub fn transverse_density(&self, x: f64, y: f64, z: f64) -> f64 {
        let dx = x - self.shift[0];
        let dy = y - self.shift[1];
        maths::gaussian_2d(self.width_x(z - self.shift[2]), self.width_y(z - self.shift[2]), dx, dy)
    }

    /// Normalised spatial density at `pos` when the bunch centre sits at `centre_z` on its axis.
    pub fn spatial_density(&self, pos: &Vector3<f64>, centre_z: f64) -> f64 {
        self.transverse_density(pos[0], pos[1], pos[2])
            * maths::gaussian_1d(self.length, pos[2] - centre_z - self.shift[2])
    }

    /// Normalised density of the electron angles `(theta_x, theta_y)` about the mean direction.
    pub fn angular_density(&self, theta_x: f64, theta_y: f64) -> f64 {
        maths::gaussian_2d(self.angle_spread_x(), self.angle_spread_y(), theta_x, theta_y)
    }

    /// Normalised density of the Lorentz factor.
    pub fn energy_density(&self, gamma: f64) -> f64 {
        maths::gaussian_1d(self.energy_spread(), gamma - self.gamma)
    }

    /// Rejects unphysical parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.gamma.is_finite() && self.gamma > 1.0) {
            return Err(RadiationError::invalid("electron.gamma", "must be finite and above 1"));
        }
        let non_negative = [
            ("electron.number", self.number),
            ("electron.delgamma", self.delgamma),
            ("electron.eps_x", self.eps_x),
            ("electron.eps_y", self.eps_y),
        ];
        for &(name, value) in non_negative.iter() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RadiationError::invalid(name, "must be finite and non-negative"));
            }
        }
        let positive = [
            ("electron.length", self.length),
            ("electron.beta_x", self.beta_x),
            ("electron.beta_y", self.beta_y),
        ];
        for &(name, value) in positive.iter() {
            if !(value.is_finite() && value > 0.0) {
                return Err(RadiationError::invalid(name, "must be finite and positive"));
            }
        }
        if !self.shift.iter().all(|c| c.is_finite()) {
            return Err(RadiationError::invalid("electron.shift", "must be finite"));
        }
        Ok(())
    }

    /// Ordered `(name, value)` list of the scalar parameters.
    pub fn parameters(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("electron.gamma", self.gamma),
            ("electron.number", self.number),
            ("electron.delgamma", self.delgamma),
            ("electron.length", self.length),
            ("electron.eps_x", self.eps_x),
            ("electron.eps_y", self.eps_y),
            ("electron.beta_x", self.beta_x),
            ("electron.beta_y", self.beta_y),
            ("electron.shift_x", self.shift[0]),
            ("electron.shift_y", self.shift[1]),
            ("electron.shift_z", self.shift[2]),
        ]
    }

    /// Sets a parameter by the name used in [parameters](Self::parameters).
    ///
    /// Returns `false` if the name is unknown.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "electron.gamma" => self.gamma = value,
            "electron.number" => self.number = value,
            "electron.delgamma" => self.delgamma = value,
            "electron.length" => self.length = value,
            "electron.eps_x" => self.eps_x = value,
            "electron.eps_y" => self.eps_y = value,
            "electron.beta_x" => self.beta_x = value,
            "electron.beta_y" => self.beta_y = value,
            "electron.shift_x" => self.shift[0] = value,
            "electron.shift_y" => self.shift[1] = value,
            "electron.shift_z" => self.shift[2] = value,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_beam_optics() {
        let bunch = ElectronBunch {
            eps_x: 1e-9,
            beta_x: 0.01,
            ..Default::default()
        };
        assert_approx_eq!(bunch.width2_x(0.0), 1e-11, 1e-20);
        assert_approx_eq!(bunch.width2_x(0.01), 2e-11, 1e-20);
        assert_approx_eq!(bunch.angle_spread_x(), (1e-7_f64).sqrt(), 1e-15);
    }

    #[test]
    fn test_clone_is_deep() {
        let bunch = ElectronBunch::default();
        let mut copy = bunch.clone();
        copy.shift[0] = 1e-5;
        assert_approx_eq!(bunch.shift[0], 0.0, 1e-20);
        assert!(copy != bunch);
    }

    #[test]
    fn test_energy_of_50_mev_bunch() {
        let bunch = ElectronBunch::with_energy(50.0 * MEV);
        assert_approx_eq!(bunch.gamma, 97.847, 1e-3);
        assert_approx_eq!(bunch.energy() / MEV, 50.0, 1e-9);
    }

    #[test]
    fn test_parameters_round_trip() {
        let mut bunch = ElectronBunch::default();
        for (name, value) in ElectronBunch::default().parameters() {
            assert!(bunch.set_parameter(name, value * 2.0));
        }
        assert_approx_eq!(bunch.gamma, 2.0 * ElectronBunch::default().gamma, 1e-9);
        assert!(!bunch.set_parameter("electron.colour", 1.0));
    }

    #[test]
    fn test_validate() {
        assert!(ElectronBunch::default().validate().is_ok());
        let bunch = ElectronBunch { beta_x: 0.0, ..Default::default() };
        assert!(bunch.validate().is_err());
        let bunch = ElectronBunch { gamma: 0.5, ..Default::default() };
        assert!(bunch.validate().is_err());
    }
}
