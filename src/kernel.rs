//! Scattering of laser photons by a single electron.
//!
//! The photon energy follows from the Doppler relation between the laser
//! direction `k`, the electron velocity `beta u` and the observation direction
//! `n`. The angular pattern is the dipole pattern of Thomson scattering in the
//! electron rest frame, carried back to the laboratory frame by Lorentz
//! transforming both the fields and the solid angle. Each eigen-polarization of
//! the laser is scattered separately and the results are combined into Stokes
//! parameters in the transverse basis of `n`.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::beam::{ElectronBunch, LaserPulse};
use crate::constant::ELECTRON_RADIUS;
use crate::maths;
use crate::polarization::WeightedStokes;

/// Selects the emission process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EmissionOrder {
    /// Linear Thomson scattering, the weak-field limit.
    Linear,
    /// Non-linear scattering into the given harmonic, `harmonic >= 1`.
    NonLinear { harmonic: u32 },
}

impl Default for EmissionOrder {
    fn default() -> Self {
        EmissionOrder::Linear
    }
}

impl EmissionOrder {
    pub fn harmonic(&self) -> u32 {
        match self {
            EmissionOrder::Linear => 1,
            EmissionOrder::NonLinear { harmonic } => *harmonic,
        }
    }
}

/// The instantaneous state of one electron.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElectronState {
    /// Position relative to the laser focus, SI units of m.
    pub position: Vector3<f64>,
    /// Unit vector along the velocity.
    pub direction: Vector3<f64>,
    /// Lorentz factor.
    pub gamma: f64,
}

impl ElectronState {
    pub fn new(direction: Vector3<f64>, gamma: f64) -> Self {
        ElectronState {
            position: Vector3::zeros(),
            direction,
            gamma,
        }
    }
}

/// Emission of one electron into one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Emission {
    /// Differential cross-section `d sigma / d Omega` in the laboratory, in m^2/sr.
    pub intensity: f64,
    /// Photon energy, in Joules.
    pub energy: f64,
    /// Intensity-weighted Stokes parameters of the scattered photons.
    pub stokes: WeightedStokes,
}

/// Precomputed laser quantities shared by all evaluations of one job.
#[derive(Clone, Debug)]
pub struct EmissionKernel {
    order: EmissionOrder,
    k: Vector3<f64>,
    photon_energy: f64,
    a0_sqr: f64,
    rayleigh_length: f64,
    laser_width2: f64,
    eigen_vectors: [Vector3<f64>; 2],
    eigen_weights: [f64; 2],
    circular: f64,
}

impl EmissionKernel {
    pub fn new(laser: &LaserPulse, order: EmissionOrder) -> Self {
        EmissionKernel {
            order,
            k: laser.direction(),
            photon_energy: laser.photon_energy(),
            a0_sqr: laser.a0().powi(2),
            rayleigh_length: laser.rayleigh_length(),
            laser_width2: laser.width2(0.0),
            eigen_vectors: laser.polarization_vectors(),
            eigen_weights: laser.polarization_weights(),
            circular: laser.polarization().xi2,
        }
    }

    /// Square of the vector potential seen by an electron at `position`.
    ///
    /// Zero for the linear kernel, which neglects the laser field strength.
    fn local_a0_sqr(&self, position: &Vector3<f64>) -> f64 {
        match self.order {
            EmissionOrder::Linear => 0.0,
            EmissionOrder::NonLinear { .. } => {
                let s = position.dot(&self.k);
                let r2 = (position.norm_squared() - s * s).max(0.0);
                let spread = 1.0 + (s / self.rayleigh_length).powi(2);
                self.a0_sqr / spread * (-r2 / (2.0 * self.laser_width2 * spread)).exp()
            }
        }
    }

    /// Relative strength of the harmonic compared to the fundamental.
    ///
    /// Leading term of the weak-field expansion, equal to one for the fundamental.
    fn harmonic_weight(&self, a0_sqr: f64) -> f64 {
        let h = self.order.harmonic();
        if h == 1 {
            return 1.0;
        }
        let h = h as f64;
        let mut factorial = 1.0;
        for i in 1..(h as u32) {
            factorial *= i as f64;
        }
        (h.powf(h - 1.0) / factorial).powi(2) * (a0_sqr / 4.0).powf(h - 1.0)
    }

    /// Photon energy scattered into `n` by an electron in state `e`.
    ///
    /// Harmonics are exact multiples of the fundamental; the field strength only
    /// enters through the emission weight. Returns `None` for kinematically
    /// forbidden states.
    pub fn energy(&self, n: &Vector3<f64>, e: &ElectronState) -> Option<f64> {
        if !(e.gamma >= 1.0 && e.gamma.is_finite()) {
            return None;
        }
        let beta = ElectronBunch::speed_at(e.gamma);
        let d0 = 1.0 - beta * e.direction.dot(&self.k);
        let d1 = 1.0 - beta * e.direction.dot(n);
        if d0 <= 0.0 || d1 <= 0.0 {
            return None;
        }
        let h = self.order.harmonic() as f64;
        Some(h * self.photon_energy * d0 / d1)
    }

    /// Full emission of an electron in state `e` into direction `n`.
    ///
    /// Electron states outside the physically allowed range give zero emission.
    pub fn emission(&self, n: &Vector3<f64>, e: &ElectronState) -> Emission {
        let energy = match self.energy(n, e) {
            Some(energy) => energy,
            None => return Emission::default(),
        };
        let gamma = e.gamma;
        let beta = ElectronBunch::speed_at(gamma);
        let bv = e.direction * beta;
        let d1 = 1.0 - bv.dot(n);

        // Observation direction in the rest frame.
        let nu = n.dot(&e.direction);
        let n_rest = (n + e.direction * ((gamma - 1.0) * nu) - bv * gamma) / (gamma * d1);
        let solid_angle = 1.0 / (gamma * gamma * d1 * d1);

        let (e1, e2) = maths::transverse_basis(n);
        let mut amplitudes = [Vector3::zeros(); 2];
        let mut stokes = WeightedStokes::zero();
        for (index, (a, weight)) in self
            .eigen_vectors
            .iter()
            .zip(self.eigen_weights.iter())
            .enumerate()
        {
            // Incident field in the rest frame.
            let field = boost_field(a, &self.k.cross(a), &bv, gamma);
            let norm = field.norm();
            if norm == 0.0 {
                continue;
            }
            let field = field / norm;
            // Dipole radiation field in the rest frame, then back in the lab.
            let scattered = field - n_rest * n_rest.dot(&field);
            let strength2 = scattered.norm_squared();
            let lab = boost_field(&scattered, &n_rest.cross(&scattered), &(-bv), gamma);
            let lab_norm = lab.norm();
            let amplitude = if lab_norm > 0.0 {
                lab * (strength2.sqrt() / lab_norm)
            } else {
                Vector3::zeros()
            };
            amplitudes[index] = amplitude;
            let (p1, p2) = (amplitude.dot(&e1), amplitude.dot(&e2));
            stokes = stokes
                + WeightedStokes {
                    intensity: weight * (p1 * p1 + p2 * p2),
                    xi1: weight * 2.0 * p1 * p2,
                    xi2: 0.0,
                    xi3: weight * (p1 * p1 - p2 * p2),
                };
        }
        // Circular polarization is carried by the determinant of the scattering map.
        let determinant = amplitudes[0].dot(&e1) * amplitudes[1].dot(&e2)
            - amplitudes[0].dot(&e2) * amplitudes[1].dot(&e1);
        stokes.xi2 = self.circular * determinant;

        let factor = ELECTRON_RADIUS
            * ELECTRON_RADIUS
            * solid_angle
            * self.harmonic_weight(self.local_a0_sqr(&e.position));
        let stokes = stokes * factor;
        Emission {
            intensity: stokes.intensity,
            energy,
            stokes,
        }
    }

    /// The Lorentz factor at which an electron moving along `u` scatters photons
    /// of `energy` into `n`.
    pub fn resonant_gamma(&self, n: &Vector3<f64>, u: &Vector3<f64>, energy: f64) -> Option<f64> {
        let c0 = u.dot(&self.k);
        let c1 = u.dot(n);
        let el = self.order.harmonic() as f64 * self.photon_energy;

        // energy (1 - b c1) = el (1 - b c0)
        let denominator = energy * c1 - el * c0;
        if denominator == 0.0 {
            return None;
        }
        let beta = (energy - el) / denominator;
        if !(beta > 0.0 && beta < 1.0) {
            return None;
        }
        Some(1.0 / (1.0 - beta * beta).sqrt())
    }

    /// Derivative of the photon energy with respect to the electron Lorentz factor.
    pub fn energy_gamma_derivative(&self, n: &Vector3<f64>, e: &ElectronState) -> f64 {
        let beta = ElectronBunch::speed_at(e.gamma);
        let c0 = e.direction.dot(&self.k);
        let c1 = e.direction.dot(n);
        let d0 = 1.0 - beta * c0;
        let d1 = 1.0 - beta * c1;
        let el = self.order.harmonic() as f64 * self.photon_energy;
        let d_energy_d_beta = el * (c1 * d0 - c0 * d1) / (d1 * d1);
        d_energy_d_beta / (e.gamma.powi(3) * beta)
    }

    /// Finds the electron direction on the cone around `n` with azimuth `phi` in the
    /// basis `(t1, t2)` that scatters photons of `energy` into `n`.
    ///
    /// Returns the electron direction and the Jacobian `sin(psi) / |d energy / d psi|`
    /// of the cone parametrisation. `min_angle` bounds the cone angle from below so the
    /// removable singularity at the apex is never evaluated directly.
    pub fn ring_point(
        &self,
        n: &Vector3<f64>,
        basis: (&Vector3<f64>, &Vector3<f64>),
        phi: f64,
        gamma: f64,
        energy: f64,
        min_angle: f64,
    ) -> Option<(Vector3<f64>, f64)> {
        const ITERATIONS: usize = 8;
        let beta = ElectronBunch::speed_at(gamma);
        let el = self.order.harmonic() as f64 * self.photon_energy;
        let t = basis.0 * phi.cos() + basis.1 * phi.sin();

        let mut u = *n;
        let mut psi = 0.0;
        for _ in 0..ITERATIONS {
            let d0 = 1.0 - beta * u.dot(&self.k);
            let cos_psi = (1.0 - el * d0 / energy) / beta;
            if !(-1.0..=1.0).contains(&cos_psi) {
                return None;
            }
            psi = cos_psi.acos();
            u = n * psi.cos() + t * psi.sin();
        }
        let psi = psi.max(min_angle);
        let u = n * psi.cos() + t * psi.sin();

        let d0 = 1.0 - beta * u.dot(&self.k);
        let denominator = 1.0 - beta * psi.cos();
        let du = -n * psi.sin() + t * psi.cos();
        let dd0 = -beta * du.dot(&self.k);
        let d_denominator = beta * psi.sin();
        let e = el * d0 / denominator;
        let de = e * (dd0 / d0 - d_denominator / denominator);
        if de == 0.0 {
            return None;
        }
        Some((u, psi.sin() / de.abs()))
    }
}

/// Electric field seen in a frame moving with velocity `beta` for a plane wave
/// with fields `e` and `b` (`c = 1`).
fn boost_field(e: &Vector3<f64>, b: &Vector3<f64>, beta: &Vector3<f64>, gamma: f64) -> Vector3<f64> {
    (e + beta.cross(b)) * gamma - beta * (gamma * gamma / (gamma + 1.0) * beta.dot(e))
}
