//! Gaussian model of the laser pulse.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constant::{C, ELECTRON_CHARGE, ELECTRON_MASS, EPSILON_0, EV, HBAR, PI};
use crate::error::{RadiationError, Result};
use crate::maths;
use crate::polarization::StokesParameters;

/// The scalar and vector settings of a laser pulse, without derived state.
///
/// This is also the serialised form of a [LaserPulse].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaserPulseSettings {
    /// Photon energy, in Joules.
    pub photon_energy: f64,
    /// Number of photons in the pulse.
    pub number: f64,
    /// Rms pulse semi-length, SI units of m.
    pub length: f64,
    /// Rayleigh length, SI units of m.
    pub rayleigh_length: f64,
    /// Repetition frequency, in Hz.
    pub frequency: f64,
    /// Delay of the pulse with respect to the electron bunch, in s.
    pub delay: f64,
    /// Direction of propagation.
    pub direction: Vector3<f64>,
    /// Polarization state, in the transverse basis of `direction`.
    pub polarization: StokesParameters,
}

impl Default for LaserPulseSettings {
    fn default() -> Self {
        let photon_energy = 1.17 * EV;
        LaserPulseSettings {
            photon_energy,
            number: 0.02 / photon_energy,
            length: 1.5e-3,
            rayleigh_length: 2.7e-3,
            frequency: 79.33e6,
            delay: 0.0,
            direction: Vector3::new(0.0, 0.0, -1.0),
            polarization: StokesParameters::linear(),
        }
    }
}

/// A gaussian laser pulse focused at the origin.
///
/// Intensity, vector potential and the eigen-polarization decomposition are
/// derived quantities; every setter that affects them recomputes all of them
/// together, so they never disagree with the settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "LaserPulseSettings", into = "LaserPulseSettings")]
pub struct LaserPulse {
    settings: LaserPulseSettings,
    intensity: f64,
    a0: f64,
    eigen_vectors: [Vector3<f64>; 2],
    eigen_weights: [f64; 2],
}

impl From<LaserPulseSettings> for LaserPulse {
    fn from(settings: LaserPulseSettings) -> Self {
        let mut laser = LaserPulse {
            settings,
            intensity: 0.0,
            a0: 0.0,
            eigen_vectors: [Vector3::x(), Vector3::y()],
            eigen_weights: [0.5, 0.5],
        };
        laser.update();
        laser
    }
}

impl From<LaserPulse> for LaserPulseSettings {
    fn from(laser: LaserPulse) -> Self {
        laser.settings
    }
}

impl Default for LaserPulse {
    fn default() -> Self {
        LaserPulseSettings::default().into()
    }
}

impl LaserPulse {
    pub fn settings(&self) -> &LaserPulseSettings {
        &self.settings
    }

    /// Recomputes intensity, vector potential and polarization eigenstates.
    fn update(&mut self) {
        let s = &self.settings;
        let width2 = self.width2(0.0);
        self.intensity = s.number * s.photon_energy * C
            / ((2.0 * PI).powf(1.5) * width2 * s.length);
        let lambda = self.wavelength();
        self.a0 = (ELECTRON_CHARGE * ELECTRON_CHARGE * lambda * lambda * self.intensity
            / (2.0 * PI * PI * EPSILON_0 * ELECTRON_MASS * ELECTRON_MASS * C.powi(5)))
        .sqrt();

        // Diagonalise the real part of the polarization density matrix
        // 1/2 [[1 + xi3, xi1], [xi1, 1 - xi3]] in the transverse basis.
        let xi = s.polarization;
        let linear = xi.xi1.hypot(xi.xi3);
        let psi = 0.5 * xi.xi1.atan2(xi.xi3);
        let (b1, b2) = maths::transverse_basis(&s.direction);
        let (sin, cos) = psi.sin_cos();
        self.eigen_vectors = [b1 * cos + b2 * sin, -b1 * sin + b2 * cos];
        self.eigen_weights = [0.5 * (1.0 + linear), 0.5 * (1.0 - linear)];
    }

    pub fn photon_energy(&self) -> f64 {
        self.settings.photon_energy
    }

    pub fn set_photon_energy(&mut self, energy: f64) {
        self.settings.photon_energy = energy;
        self.update();
    }

    /// Number of photons in the pulse.
    pub fn number(&self) -> f64 {
        self.settings.number
    }

    pub fn set_number(&mut self, number: f64) {
        self.settings.number = number;
        self.update();
    }

    /// Energy of the pulse in Joules; the same quantity as [number](Self::number).
    pub fn pulse_energy(&self) -> f64 {
        self.settings.number * self.settings.photon_energy
    }

    pub fn set_pulse_energy(&mut self, energy: f64) {
        self.settings.number = energy / self.settings.photon_energy;
        self.update();
    }

    pub fn length(&self) -> f64 {
        self.settings.length
    }

    pub fn set_length(&mut self, length: f64) {
        self.settings.length = length;
        self.update();
    }

    pub fn rayleigh_length(&self) -> f64 {
        self.settings.rayleigh_length
    }

    pub fn set_rayleigh_length(&mut self, length: f64) {
        self.settings.rayleigh_length = length;
        self.update();
    }

    /// Repetition frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.settings.frequency
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.settings.frequency = frequency;
    }

    pub fn delay(&self) -> f64 {
        self.settings.delay
    }

    pub fn set_delay(&mut self, delay: f64) {
        self.settings.delay = delay;
    }

    /// Unit vector along the direction of propagation.
    pub fn direction(&self) -> Vector3<f64> {
        self.settings.direction.normalize()
    }

    pub fn set_direction(&mut self, direction: Vector3<f64>) {
        self.settings.direction = direction;
        self.update();
    }

    pub fn polarization(&self) -> StokesParameters {
        self.settings.polarization
    }

    pub fn set_polarization(&mut self, polarization: StokesParameters) {
        self.settings.polarization = polarization;
        self.update();
    }

    /// A copy of this pulse with a different polarization state.
    pub fn with_polarization(&self, polarization: StokesParameters) -> LaserPulse {
        let mut laser = self.clone();
        laser.set_polarization(polarization);
        laser
    }

    pub fn wavelength(&self) -> f64 {
        2.0 * PI * HBAR * C / self.settings.photon_energy
    }

    /// Squared rms transverse width at distance `s` from the focus.
    pub fn width2(&self, s: f64) -> f64 {
        let zr = self.settings.rayleigh_length;
        zr * self.wavelength() / (4.0 * PI) * (1.0 + s * s / (zr * zr))
    }

    pub fn width(&self, s: f64) -> f64 {
        self.width2(s).sqrt()
    }

    /// Cycle-averaged intensity at the focus, in W/m^2.
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Normalised vector potential at the focus.
    pub fn a0(&self) -> f64 {
        self.a0
    }

    /// Orthonormal eigen-polarization amplitude vectors, `a1 x a2` along the direction.
    pub fn polarization_vectors(&self) -> [Vector3<f64>; 2] {
        self.eigen_vectors
    }

    /// Relative weights of the two eigen-polarizations; they sum to one.
    pub fn polarization_weights(&self) -> [f64; 2] {
        self.eigen_weights
    }

    /// Intensities carried by the two eigen-polarizations; they sum to [intensity](Self::intensity).
    pub fn eigen_intensities(&self) -> [f64; 2] {
        [
            self.intensity * self.eigen_weights[0],
            self.intensity * self.eigen_weights[1],
        ]
    }

    /// Degree of polarization of the pulse.
    pub fn polarization_degree(&self) -> f64 {
        self.settings.polarization.degree()
    }

    /// Normalised photon density at `pos` and time `t`.
    pub fn density(&self, pos: &Vector3<f64>, t: f64) -> f64 {
        let k = self.direction();
        let s = pos.dot(&k);
        let r2 = (pos.norm_squared() - s * s).max(0.0);
        maths::gaussian_dis(self.width(s), r2)
            * maths::gaussian_1d(self.settings.length, s - C * (t - self.settings.delay))
    }

    /// Rejects unphysical parameters.
    pub fn validate(&self) -> Result<()> {
        let s = &self.settings;
        let positive = [
            ("laser.photon_energy", s.photon_energy),
            ("laser.length", s.length),
            ("laser.rayleigh_length", s.rayleigh_length),
        ];
        for &(name, value) in positive.iter() {
            if !(value.is_finite() && value > 0.0) {
                return Err(RadiationError::invalid(name, "must be finite and positive"));
            }
        }
        let non_negative = [("laser.number", s.number), ("laser.frequency", s.frequency)];
        for &(name, value) in non_negative.iter() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RadiationError::invalid(name, "must be finite and non-negative"));
            }
        }
        if !s.delay.is_finite() {
            return Err(RadiationError::invalid("laser.delay", "must be finite"));
        }
        if !(s.direction.iter().all(|c| c.is_finite()) && s.direction.norm() > 0.0) {
            return Err(RadiationError::invalid("laser.direction", "must be a finite, non-zero vector"));
        }
        s.polarization.validate("laser.polarization")
    }

    /// Ordered `(name, value)` list of the scalar parameters.
    pub fn parameters(&self) -> Vec<(&'static str, f64)> {
        let s = &self.settings;
        vec![
            ("laser.photon_energy", s.photon_energy),
            ("laser.number", s.number),
            ("laser.length", s.length),
            ("laser.rayleigh_length", s.rayleigh_length),
            ("laser.frequency", s.frequency),
            ("laser.delay", s.delay),
            ("laser.direction_x", s.direction[0]),
            ("laser.direction_y", s.direction[1]),
            ("laser.direction_z", s.direction[2]),
            ("laser.xi1", s.polarization.xi1),
            ("laser.xi2", s.polarization.xi2),
            ("laser.xi3", s.polarization.xi3),
        ]
    }

    /// Sets a parameter by the name used in [parameters](Self::parameters).
    ///
    /// Returns `false` if the name is unknown.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        let s = &mut self.settings;
        match name {
            "laser.photon_energy" => s.photon_energy = value,
            "laser.number" => s.number = value,
            "laser.length" => s.length = value,
            "laser.rayleigh_length" => s.rayleigh_length = value,
            "laser.frequency" => s.frequency = value,
            "laser.delay" => s.delay = value,
            "laser.direction_x" => s.direction[0] = value,
            "laser.direction_y" => s.direction[1] = value,
            "laser.direction_z" => s.direction[2] = value,
            "laser.xi1" => s.polarization.xi1 = value,
            "laser.xi2" => s.polarization.xi2 = value,
            "laser.xi3" => s.polarization.xi3 = value,
            _ => return false,
        }
        self.update();
        true
    }
}
