//! Monte Carlo generation of individual photons for ray tracing.
//!
//! Candidates pair an electron and collision instant from the geometric-factor
//! sampler with an observation direction drawn uniformly in the angular
//! acceptance window. A candidate is kept with probability proportional to its
//! overlap weight times the single-electron cross-section; this is rejection
//! sampling against a majorant found in a calibration pass. Every accepted ray
//! therefore carries the same flux, and the flux reaching the window follows
//! from the acceptance rate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, trace, warn};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::beam::{ElectronBunch, LaserPulse};
use crate::error::{RadiationError, Result};
use crate::geometric::{CollisionSampler, CANCEL_CHECK_INTERVAL};
use crate::kernel::{ElectronState, EmissionKernel, EmissionOrder};
use crate::maths;
use crate::output::{RayRecord, RaySink};
use crate::parallel::{chunk_seed, CancellationToken, ParallelExecutor};

/// Candidates drawn to estimate the majorant of the acceptance weight.
pub const CALIBRATION_SAMPLES: usize = 20_000;

/// Safety factor applied to the largest calibration weight.
const MAJORANT_MARGIN: f64 = 1.5;

/// Offsets separating the generator's random streams from other jobs on the same seed.
const CALIBRATION_STREAM: u64 = 0x5EED_0001;
const RAY_STREAM: u64 = 0x5EED_0002;

/// The region of direction and photon energy in which rays are kept.
///
/// Angles are measured from the mean electron direction along the `x` and `y`
/// axes of its transverse basis, in radians. Energies are in Joules.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceWindow {
    pub theta_x: (f64, f64),
    pub theta_y: (f64, f64),
    pub energy: (f64, f64),
}

impl Default for AcceptanceWindow {
    fn default() -> Self {
        AcceptanceWindow {
            theta_x: (-5e-3, 5e-3),
            theta_y: (-5e-3, 5e-3),
            energy: (0.0, 1e-13),
        }
    }
}

impl AcceptanceWindow {
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("ray_window.theta_x", self.theta_x),
            ("ray_window.theta_y", self.theta_y),
            ("ray_window.energy", self.energy),
        ];
        for &(name, (low, high)) in ranges.iter() {
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(RadiationError::invalid(name, "must be a finite, increasing range"));
            }
        }
        if self.energy.0 < 0.0 {
            return Err(RadiationError::invalid("ray_window.energy", "must not be negative"));
        }
        let half = std::f64::consts::FRAC_PI_2;
        for &(name, (low, high)) in ranges[..2].iter() {
            if low <= -half || high >= half {
                return Err(RadiationError::invalid(name, "must lie within (-pi/2, pi/2)"));
            }
        }
        Ok(())
    }

    /// Area of the window in the `(theta_x, theta_y)` plane, in sr for small angles.
    pub fn solid_angle(&self) -> f64 {
        (self.theta_x.1 - self.theta_x.0) * (self.theta_y.1 - self.theta_y.0)
    }

    pub fn contains_energy(&self, energy: f64) -> bool {
        energy >= self.energy.0 && energy <= self.energy.1
    }
}

/// Bookkeeping of one ray generation run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RaySummary {
    /// Rays requested after rounding to a multiple of the thread count.
    pub requested: usize,
    /// Rays written to the sink.
    pub written: usize,
    /// Candidates drawn, accepted or not.
    pub candidates: usize,
    /// Photons per second carried by each ray.
    pub ray_flux: f64,
    /// Photons per second into the acceptance window carried by the written rays.
    pub partial_flux: f64,
}

/// The summary of a run together with how it ended.
///
/// The summary is meaningful even when the run was cancelled or the sink failed.
#[derive(Debug)]
pub struct RayRun {
    pub summary: RaySummary,
    pub error: Option<RadiationError>,
}

impl RayRun {
    pub fn into_result(self) -> Result<RaySummary> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.summary),
        }
    }
}

struct Output<'s, P> {
    sink: &'s mut dyn RaySink,
    progress: P,
    written: usize,
    reported: u32,
    /// Set once the sink has failed, which stops the other workers.
    failed: bool,
}

pub struct RayGenerator<'a> {
    bunch: &'a ElectronBunch,
    kernel: EmissionKernel,
    sampler: CollisionSampler<'a>,
    window: AcceptanceWindow,
    /// Electron number times photon number times repetition rate, in s^-1.
    rate: f64,
    seed: u64,
}

impl<'a> RayGenerator<'a> {
    pub fn new(
        bunch: &'a ElectronBunch,
        laser: &'a LaserPulse,
        order: EmissionOrder,
        window: AcceptanceWindow,
        energy_spread: bool,
        seed: u64,
    ) -> Result<Self> {
        window.validate()?;
        Ok(RayGenerator {
            bunch,
            kernel: EmissionKernel::new(laser, order),
            sampler: CollisionSampler::new(bunch, laser, energy_spread)?,
            window,
            rate: bunch.number * laser.number() * laser.frequency(),
            seed,
        })
    }

    /// Draws one candidate and its acceptance weight; zero outside the window.
    fn candidate<R: Rng>(&self, rng: &mut R, theta_x: &Uniform<f64>, theta_y: &Uniform<f64>) -> (RayRecord, f64) {
        let collision = self.sampler.sample(rng);
        let n = maths::tilt(&self.bunch.direction(), rng.sample(theta_x), rng.sample(theta_y));
        let electron = ElectronState {
            position: collision.position,
            direction: collision.direction,
            gamma: collision.gamma,
        };
        let emission = self.kernel.emission(&n, &electron);
        let ray = RayRecord {
            position: collision.position,
            direction: n,
            energy: emission.energy,
            polarization: emission.stokes.normalised(),
        };
        let weight = if emission.intensity > 0.0 && self.window.contains_energy(emission.energy) {
            collision.weight * emission.intensity
        } else {
            0.0
        };
        (ray, weight)
    }

    fn angle_distributions(&self) -> (Uniform<f64>, Uniform<f64>) {
        (
            Uniform::new(self.window.theta_x.0, self.window.theta_x.1),
            Uniform::new(self.window.theta_y.0, self.window.theta_y.1),
        )
    }

    /// Largest acceptance weight seen in a calibration pass, with a safety margin.
    fn majorant(&self, executor: &ParallelExecutor, token: &CancellationToken) -> Result<f64> {
        let (theta_x, theta_y) = self.angle_distributions();
        let maxima = executor.run_chunks(CALIBRATION_SAMPLES, token, |index, range| {
            let mut rng = StdRng::seed_from_u64(chunk_seed(self.seed ^ CALIBRATION_STREAM, index));
            let mut max: f64 = 0.0;
            for i in range {
                if i % CANCEL_CHECK_INTERVAL == 0 {
                    token.check()?;
                }
                max = max.max(self.candidate(&mut rng, &theta_x, &theta_y).1);
            }
            Ok(max)
        })?;
        let max = maxima.iter().cloned().fold(0.0, f64::max);
        if !(max > 0.0 && max.is_finite()) {
            return Err(RadiationError::invalid(
                "ray_window",
                "no emission falls inside the acceptance window",
            ));
        }
        Ok(MAJORANT_MARGIN * max)
    }

    /// Writes `count` accepted rays to `sink`, rounded up to a multiple of the thread count.
    ///
    /// `progress` receives increasing percentages from 0 to 100. Cancellation is
    /// checked under the sink lock before every write, so a cancelled run leaves
    /// exactly the rays written before the request in the sink.
    pub fn write_rays<P>(
        &self,
        sink: &mut dyn RaySink,
        count: usize,
        progress: P,
        executor: &ParallelExecutor,
        token: &CancellationToken,
    ) -> RayRun
    where
        P: FnMut(u32) + Send,
    {
        let threads = executor.threads();
        let requested = (count + threads - 1) / threads * threads;
        let mut summary = RaySummary {
            requested,
            ..Default::default()
        };
        if !sink.is_open() {
            return RayRun {
                summary,
                error: Some(RadiationError::SinkNotOpen),
            };
        }
        let majorant = match self.majorant(executor, token) {
            Ok(majorant) => majorant,
            Err(error) => return RayRun { summary, error: Some(error) },
        };
        debug!(
            "Generating {} rays on {} threads, majorant {:e}",
            requested, threads, majorant
        );

        let output = Mutex::new(Output {
            sink,
            progress,
            written: 0,
            reported: 0,
            failed: false,
        });
        if let Ok(mut output) = output.lock() {
            (output.progress)(0);
        }
        let candidates = AtomicUsize::new(0);
        let (theta_x, theta_y) = self.angle_distributions();

        let result = executor.run_chunks(requested, token, |index, range| {
            let mut rng = StdRng::seed_from_u64(chunk_seed(self.seed ^ RAY_STREAM, index));
            let mut drawn = 0usize;
            let outcome = (|| -> Result<()> {
                let mut accepted = 0;
                let mut overflow_reported = false;
                while accepted < range.len() {
                    if drawn % CANCEL_CHECK_INTERVAL == 0 {
                        token.check()?;
                    }
                    drawn += 1;
                    let (ray, weight) = self.candidate(&mut rng, &theta_x, &theta_y);
                    if weight <= 0.0 {
                        continue;
                    }
                    if weight > majorant && !overflow_reported {
                        warn!(
                            "Ray weight {:e} exceeds the calibrated majorant {:e}, the sample is biased",
                            weight, majorant
                        );
                        overflow_reported = true;
                    }
                    if rng.gen::<f64>() * majorant > weight {
                        continue;
                    }
                    let mut output = output.lock().unwrap_or_else(|e| e.into_inner());
                    token.check()?;
                    if output.failed {
                        return Ok(());
                    }
                    if let Err(error) = output.sink.write_ray(&ray) {
                        output.failed = true;
                        return Err(error);
                    }
                    output.written += 1;
                    accepted += 1;
                    let percent = (output.written * 100 / requested) as u32;
                    if percent > output.reported {
                        output.reported = percent;
                        (output.progress)(percent);
                    }
                }
                Ok(())
            })();
            candidates.fetch_add(drawn, Ordering::SeqCst);
            trace!("Ray chunk {} finished after {} candidates", index, drawn);
            outcome
        });

        let output = output.into_inner().unwrap_or_else(|e| e.into_inner());
        summary.written = output.written;
        summary.candidates = candidates.load(Ordering::SeqCst);
        if summary.candidates > 0 {
            summary.ray_flux =
                self.rate * self.window.solid_angle() * majorant / summary.candidates as f64;
            summary.partial_flux = summary.ray_flux * summary.written as f64;
        }
        debug!(
            "Wrote {} of {} rays from {} candidates, partial flux {:e} photons/s",
            summary.written, requested, summary.candidates, summary.partial_flux
        );
        RayRun {
            summary,
            error: result.err(),
        }
    }
}
