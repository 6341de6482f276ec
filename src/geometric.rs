//! Overlap of the electron bunch with the laser pulse.
//!
//! The geometric factor
//!
//! `G = int int rho_e(r, t) rho_l(r, t) c (1 - beta u.k) dt d^3r`
//!
//! counts how many laser photons per unit area an average electron sweeps
//! through during the collision. Multiplying by the electron and photon numbers,
//! the repetition rate and a cross-section gives an event rate.
//!
//! The exact value is found by Monte Carlo: electrons are drawn from the bunch
//! phase space and straight trajectories are integrated in time against the
//! laser density by importance sampling around the moment of closest approach.
//! For short, weakly focused beams the overlap is a product of transverse
//! gaussians, which gives the cheap approximation.

use log::{debug, info};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::beam::{ElectronBunch, LaserPulse};
use crate::constant::{C, PI, THOMSON_CROSS_SECTION};
use crate::error::{RadiationError, Result};
use crate::maths;
use crate::parallel::{chunk_seed, CancellationToken, ParallelExecutor};

/// Number of samples drawn between two checks of the cancellation token.
pub const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Widening of the time proposal relative to the laser transit time.
const TIME_PROPOSAL_WIDENING: f64 = 1.5;

/// One electron drawn from the bunch, evaluated at a sampled instant of the collision.
#[derive(Clone, Copy, Debug)]
pub struct CollisionSample {
    /// Position at the sampled instant, relative to the laser focus.
    pub position: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub gamma: f64,
    /// Unbiased estimate of this electron's contribution to the geometric factor, m^-2.
    pub weight: f64,
}

/// Draws electrons and collision times from a fixed bunch and pulse.
pub struct CollisionSampler<'a> {
    bunch: &'a ElectronBunch,
    laser: &'a LaserPulse,
    position_x: Normal<f64>,
    position_y: Normal<f64>,
    angle_x: Normal<f64>,
    angle_y: Normal<f64>,
    longitudinal: Normal<f64>,
    energy: Option<Normal<f64>>,
    standard: Normal<f64>,
}

fn normal(mean: f64, std: f64, parameter: &'static str) -> Result<Normal<f64>> {
    Normal::new(mean, std).map_err(|e| RadiationError::invalid(parameter, e.to_string()))
}

impl<'a> CollisionSampler<'a> {
    /// `energy_spread` selects whether electron energies are drawn from the bunch spread.
    pub fn new(bunch: &'a ElectronBunch, laser: &'a LaserPulse, energy_spread: bool) -> Result<Self> {
        let energy = if energy_spread && bunch.delgamma > 0.0 {
            Some(normal(bunch.gamma, bunch.energy_spread(), "electron.delgamma")?)
        } else {
            None
        };
        Ok(CollisionSampler {
            bunch,
            laser,
            position_x: normal(0.0, bunch.width_x(0.0), "electron.eps_x")?,
            position_y: normal(0.0, bunch.width_y(0.0), "electron.eps_y")?,
            angle_x: normal(0.0, bunch.angle_spread_x(), "electron.eps_x")?,
            angle_y: normal(0.0, bunch.angle_spread_y(), "electron.eps_y")?,
            longitudinal: normal(0.0, bunch.length, "electron.length")?,
            energy,
            standard: normal(0.0, 1.0, "standard")?,
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> CollisionSample {
        let bunch = self.bunch;
        let k = self.laser.direction();
        let direction = maths::tilt(
            &bunch.direction(),
            self.angle_x.sample(rng),
            self.angle_y.sample(rng),
        );
        let gamma = match &self.energy {
            // Keep the tail of the distribution physical.
            Some(energy) => energy.sample(rng).max(1.0 + 1e-9),
            None => bunch.gamma,
        };
        let beta = ElectronBunch::speed_at(gamma);
        // Trajectory r(t) = origin + u (zeta + beta c t); the waist is crossed where zeta + beta c t = 0.
        let zeta = self.longitudinal.sample(rng);
        let origin = bunch.shift
            + Vector3::new(self.position_x.sample(rng), self.position_y.sample(rng), 0.0)
            + direction * zeta;

        // The laser centre reaches the electron when k.r(t) = c (t - delay).
        let closing = C * (1.0 - beta * direction.dot(&k));
        let centre = (origin.dot(&k) + C * self.laser.delay()) / closing;
        let spread = TIME_PROPOSAL_WIDENING * self.laser.length() / closing;
        let time = centre + spread * self.standard.sample(rng);
        let position = origin + direction * (beta * C * time);

        let proposal = maths::gaussian_1d(spread, time - centre);
        let weight = self.laser.density(&position, time) * closing / proposal;
        CollisionSample {
            position,
            direction,
            gamma,
            weight,
        }
    }
}

/// Paraxial estimate of the geometric factor, in m^-2.
///
/// Valid when both beams are much shorter than their Rayleigh lengths and beta
/// functions and collide head-on.
pub fn approximate_geometric_factor(bunch: &ElectronBunch, laser: &LaserPulse) -> f64 {
    let laser_width2 = laser.width2(0.0);
    let sx2 = bunch.width2_x(0.0) + laser_width2;
    let sy2 = bunch.width2_y(0.0) + laser_width2;
    let (dx, dy) = (bunch.shift[0], bunch.shift[1]);
    (-dx * dx / (2.0 * sx2) - dy * dy / (2.0 * sy2)).exp() / (2.0 * PI * (sx2 * sy2).sqrt())
}

/// Total number of photons scattered per second in the linear regime.
pub fn linear_total_flux(bunch: &ElectronBunch, laser: &LaserPulse, geometric_factor: f64) -> f64 {
    THOMSON_CROSS_SECTION * bunch.number * laser.number() * laser.frequency() * geometric_factor
}

/// Monte Carlo estimate of the geometric factor, in m^-2.
///
/// The samples are split over the executor's workers. Each chunk draws from its
/// own generator seeded from `seed`, so the estimate is reproducible for a given
/// seed and thread count.
pub fn geometric_factor(
    bunch: &ElectronBunch,
    laser: &LaserPulse,
    samples: usize,
    energy_spread: bool,
    seed: u64,
    executor: &ParallelExecutor,
    token: &CancellationToken,
) -> Result<f64> {
    if samples == 0 {
        return Err(RadiationError::invalid("samples", "must be positive"));
    }
    let sampler = CollisionSampler::new(bunch, laser, energy_spread)?;
    let sums = executor.run_chunks(samples, token, |index, range| {
        let mut rng = StdRng::seed_from_u64(chunk_seed(seed, index));
        let mut sum = 0.0;
        for i in range {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            sum += sampler.sample(&mut rng).weight;
        }
        Ok(sum)
    })?;
    let factor = sums.iter().sum::<f64>() / samples as f64;
    debug!("Geometric factor from {} samples: {:e} m^-2", samples, factor);
    info!(
        "Geometric factor {:e} m^-2, paraxial estimate {:e} m^-2",
        factor,
        approximate_geometric_factor(bunch, laser)
    );
    Ok(factor)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Short beams focused weakly, where the paraxial overlap is accurate.
    pub fn paraxial_beams() -> (ElectronBunch, LaserPulse) {
        let bunch = ElectronBunch {
            length: 1e-4,
            eps_x: 1e-9,
            eps_y: 1e-9,
            beta_x: 0.01,
            beta_y: 0.01,
            ..Default::default()
        };
        let mut laser = LaserPulse::default();
        laser.set_rayleigh_length(0.1);
        laser.set_length(1e-4);
        (bunch, laser)
    }

    #[test]
    fn test_approximate_factor_centred() {
        let (bunch, laser) = paraxial_beams();
        let s2 = bunch.width2_x(0.0) + laser.width2(0.0);
        assert_approx_eq!(approximate_geometric_factor(&bunch, &laser) * 2.0 * PI * s2, 1.0, 1e-12);
    }

    #[test]
    fn test_approximate_factor_falls_with_offset() {
        let (mut bunch, laser) = paraxial_beams();
        let centred = approximate_geometric_factor(&bunch, &laser);
        let s2 = bunch.width2_x(0.0) + laser.width2(0.0);
        bunch.shift = Vector3::new(s2.sqrt(), 0.0, 0.0);
        assert_approx_eq!(approximate_geometric_factor(&bunch, &laser) / centred, (-0.5f64).exp(), 1e-12);
    }

    #[test]
    fn test_monte_carlo_matches_paraxial_limit() {
        let (bunch, laser) = paraxial_beams();
        let executor = ParallelExecutor::new(2).unwrap();
        let token = CancellationToken::new();
        let exact = geometric_factor(&bunch, &laser, 100_000, true, 17, &executor, &token).unwrap();
        let approx = approximate_geometric_factor(&bunch, &laser);
        assert_approx_eq!(exact / approx, 1.0, 0.05);
    }

    #[test]
    fn test_monte_carlo_is_reproducible() {
        let (bunch, laser) = paraxial_beams();
        let executor = ParallelExecutor::new(3).unwrap();
        let token = CancellationToken::new();
        let a = geometric_factor(&bunch, &laser, 5_000, false, 3, &executor, &token).unwrap();
        let b = geometric_factor(&bunch, &laser, 5_000, false, 3, &executor, &token).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_monte_carlo_cancelled() {
        let (bunch, laser) = paraxial_beams();
        let executor = ParallelExecutor::new(2).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = geometric_factor(&bunch, &laser, 100_000, true, 1, &executor, &token);
        assert!(matches!(result, Err(RadiationError::Cancelled)));
    }

    #[test]
    fn test_total_flux_scales_with_numbers() {
        let (mut bunch, laser) = paraxial_beams();
        let g = approximate_geometric_factor(&bunch, &laser);
        let flux = linear_total_flux(&bunch, &laser, g);
        bunch.number *= 2.0;
        assert_approx_eq!(linear_total_flux(&bunch, &laser, g) / flux, 2.0, 1e-12);
        assert!(flux > 0.0);
    }
}
