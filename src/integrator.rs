//! Ensemble-averaged radiation observables in a fixed direction.
//!
//! The single-electron emission is folded with the angular distribution of the
//! bunch and, when enabled, with its energy distribution. Angular integrals run
//! over `±5` rms spreads about the mean electron direction with nested adaptive
//! quadratures, which are given breakpoints around the electron angle that
//! points straight at the observer.
//!
//! Photon-energy resolved queries remove one integration variable with the
//! delta function of the kinematics:
//! * with energy spread, the Lorentz factor is solved for at each electron angle;
//! * without it, the electrons emitting at a given energy lie on a cone about the
//!   observation direction, and the integral runs around that cone.

use log::debug;
use nalgebra::Vector3;

use crate::beam::{ElectronBunch, LaserPulse};
use crate::constant::PI;
use crate::error::{RadiationError, Result};
use crate::kernel::{ElectronState, Emission, EmissionKernel, EmissionOrder};
use crate::maths;
use crate::parallel::CancellationToken;
use crate::polarization::{StokesComponent, StokesParameters, WeightedStokes};
use crate::quadrature::qag;

/// Half-width of the integration domains, in units of the rms spread.
pub const INTEGRATION_RANGE: f64 = 5.0;

/// Angle, in units of `1/gamma` per unit shift factor, by which the observation
/// direction is moved away from the electron direction.
pub const REGULARIZATION: f64 = 1e-4;

const SUBDIVISION_LIMIT: usize = 100;

/// Numerical settings shared by all queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrationSettings {
    /// Relative precision requested from each quadrature.
    pub precision: f64,
    /// Scale of the regularising shift near the symmetry axis.
    pub shift_factor: f64,
    /// Whether the electron energy distribution is integrated over.
    pub energy_spread: bool,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        IntegrationSettings {
            precision: 1e-4,
            shift_factor: 1.0,
            energy_spread: true,
        }
    }
}

pub struct DirectionalIntegrator<'a> {
    bunch: &'a ElectronBunch,
    laser: &'a LaserPulse,
    order: EmissionOrder,
    settings: IntegrationSettings,
    luminosity: f64,
    token: &'a CancellationToken,
}

impl<'a> DirectionalIntegrator<'a> {
    /// `luminosity` is the product of electron number, photon number, repetition
    /// rate and geometric factor, in s^-1 m^-2.
    pub fn new(
        bunch: &'a ElectronBunch,
        laser: &'a LaserPulse,
        order: EmissionOrder,
        settings: IntegrationSettings,
        luminosity: f64,
        token: &'a CancellationToken,
    ) -> Self {
        DirectionalIntegrator {
            bunch,
            laser,
            order,
            settings,
            luminosity,
            token,
        }
    }

    /// Photon flux per unit solid angle in direction `n`, in photons/s/sr.
    ///
    /// `v` is the mean electron direction.
    pub fn direction_flux(&self, n: &Vector3<f64>, v: &Vector3<f64>) -> Result<f64> {
        self.token.check()?;
        let n = self.regularized(n, &v.normalize());
        let kernel = self.kernel(None);
        let value = self.ensemble(&n, v, |e| Ok(kernel.emission(&n, e).intensity))?;
        Ok(self.luminosity * value)
    }

    /// Flux-weighted mean photon energy in direction `n`, in Joules.
    ///
    /// Both energy-integrated queries see the same regularised direction as the
    /// energy-resolved ones.
    pub fn direction_energy(&self, n: &Vector3<f64>, v: &Vector3<f64>) -> Result<f64> {
        self.token.check()?;
        let n = self.regularized(n, &v.normalize());
        let kernel = self.kernel(None);
        let intensity = self.ensemble(&n, v, |e| Ok(kernel.emission(&n, e).intensity))?;
        if intensity <= 0.0 {
            return Ok(0.0);
        }
        let weighted = self.ensemble(&n, v, |e| {
            let emission = kernel.emission(&n, e);
            Ok(emission.intensity * emission.energy)
        })?;
        Ok(weighted / intensity)
    }

    /// Photon flux per unit solid angle and unit relative bandwidth at `energy`,
    /// in photons/s/sr.
    ///
    /// `polarization` replaces the laser polarization for this query only.
    pub fn direction_frequency_flux(
        &self,
        n: &Vector3<f64>,
        v: &Vector3<f64>,
        polarization: Option<StokesParameters>,
        energy: f64,
    ) -> Result<f64> {
        self.token.check()?;
        let value = self.frequency_integral(n, v, polarization, energy, |e| e.intensity)?;
        Ok(self.luminosity * energy * value)
    }

    /// Spectral brilliance at `energy`, in photons/s/m^2/sr per unit relative bandwidth.
    ///
    /// The observer at `observer` looks back along `n`; the line of sight is
    /// projected onto the plane through the bunch centre perpendicular to `v`, and
    /// the transverse bunch density there gives the source area.
    pub fn direction_frequency_brilliance(
        &self,
        observer: &Vector3<f64>,
        n: &Vector3<f64>,
        v: &Vector3<f64>,
        energy: f64,
    ) -> Result<f64> {
        self.token.check()?;
        let bunch = self.bunch;
        if !(bunch.width_x(0.0) > 0.0 && bunch.width_y(0.0) > 0.0) {
            return Err(RadiationError::invalid(
                "electron.eps_x",
                "brilliance needs a bunch of non-zero transverse size",
            ));
        }
        let n = n.normalize();
        let v = v.normalize();
        let along = n.dot(&v);
        if along <= 0.0 {
            return Ok(0.0);
        }
        let distance = (observer - bunch.shift).dot(&v) / along;
        let source = observer - n * distance;
        let density = bunch.transverse_density(source[0], source[1], source[2]);
        if density == 0.0 {
            return Ok(0.0);
        }
        Ok(self.direction_frequency_flux(&n, &v, None, energy)? * density)
    }

    /// One Stokes parameter of the radiation at `energy` in direction `n`.
    pub fn direction_frequency_polarization(
        &self,
        n: &Vector3<f64>,
        v: &Vector3<f64>,
        polarization: Option<StokesParameters>,
        energy: f64,
        component: StokesComponent,
    ) -> Result<f64> {
        self.token.check()?;
        let intensity = self.frequency_integral(n, v, polarization, energy, |e| e.intensity)?;
        if intensity <= 0.0 {
            return Ok(0.0);
        }
        let part = |c: StokesComponent| {
            self.frequency_integral(n, v, polarization, energy, move |e: &Emission| {
                e.stokes.weighted_component(c)
            })
        };
        let weighted = match component {
            StokesComponent::Degree => WeightedStokes {
                intensity,
                xi1: part(StokesComponent::Xi1)?,
                xi2: part(StokesComponent::Xi2)?,
                xi3: part(StokesComponent::Xi3)?,
            }
            .weighted_component(StokesComponent::Degree),
            c => part(c)?,
        };
        Ok(weighted / intensity)
    }

    fn kernel(&self, polarization: Option<StokesParameters>) -> EmissionKernel {
        match polarization {
            Some(xi) => EmissionKernel::new(&self.laser.with_polarization(xi), self.order),
            None => EmissionKernel::new(self.laser, self.order),
        }
    }

    fn spread_enabled(&self) -> bool {
        self.settings.energy_spread && self.bunch.delgamma > 0.0
    }

    fn regularization_angle(&self) -> f64 {
        self.settings.shift_factor * REGULARIZATION / self.bunch.gamma
    }

    /// Moves `n` off the electron direction when the two are closer than the
    /// regularisation angle.
    fn regularized(&self, n: &Vector3<f64>, v: &Vector3<f64>) -> Vector3<f64> {
        let n = n.normalize();
        let delta = self.regularization_angle();
        let angle = n.cross(v).norm().atan2(n.dot(v));
        if delta > 0.0 && angle < delta {
            let (e1, _) = maths::transverse_basis(&n);
            (n * delta.cos() + e1 * delta.sin()).normalize()
        } else {
            n
        }
    }

    fn quad<F>(&self, f: F, lower: f64, upper: f64, breakpoints: &[f64]) -> Result<f64>
    where
        F: FnMut(f64) -> Result<f64>,
    {
        Ok(qag(f, lower, upper)
            .breakpoints(breakpoints)
            .tolerance(0.0, self.settings.precision)
            .limit(SUBDIVISION_LIMIT)
            .cancellation(self.token)
            .compute()?
            .value)
    }

    /// Points bracketing the emission cone of width `1/gamma` centred on `peak`.
    fn cone_breakpoints(&self, peak: f64) -> [f64; 4] {
        let width = 1.0 / self.bunch.gamma;
        [peak - 3.0 * width, peak - width, peak + width, peak + 3.0 * width]
    }

    /// Integrates `f` over the angular distribution of the electrons about `v`.
    ///
    /// A vanishing spread along an axis collapses that integral onto its mean.
    fn angular_integral<F>(&self, n: &Vector3<f64>, v: &Vector3<f64>, mut f: F) -> Result<f64>
    where
        F: FnMut(&Vector3<f64>) -> Result<f64>,
    {
        let (sx, sy) = (self.bunch.angle_spread_x(), self.bunch.angle_spread_y());
        let (peak_x, peak_y) = maths::tilt_angles(v, n);
        let (bx, by) = (self.cone_breakpoints(peak_x), self.cone_breakpoints(peak_y));
        let (rx, ry) = (INTEGRATION_RANGE * sx, INTEGRATION_RANGE * sy);
        match (sx > 0.0, sy > 0.0) {
            (false, false) => f(&v.normalize()),
            (true, false) => self.quad(
                |tx| Ok(maths::gaussian_1d(sx, tx) * f(&maths::tilt(v, tx, 0.0))?),
                -rx,
                rx,
                &bx,
            ),
            (false, true) => self.quad(
                |ty| Ok(maths::gaussian_1d(sy, ty) * f(&maths::tilt(v, 0.0, ty))?),
                -ry,
                ry,
                &by,
            ),
            (true, true) => self.quad(
                |tx| {
                    let inner = self.quad(
                        |ty| Ok(maths::gaussian_1d(sy, ty) * f(&maths::tilt(v, tx, ty))?),
                        -ry,
                        ry,
                        &by,
                    )?;
                    Ok(maths::gaussian_1d(sx, tx) * inner)
                },
                -rx,
                rx,
                &bx,
            ),
        }
    }

    /// Integrates `f` over all electron states of the bunch.
    fn ensemble<F>(&self, n: &Vector3<f64>, v: &Vector3<f64>, mut f: F) -> Result<f64>
    where
        F: FnMut(&ElectronState) -> Result<f64>,
    {
        let gamma = self.bunch.gamma;
        if !self.spread_enabled() {
            return self.angular_integral(n, v, |u| f(&ElectronState::new(*u, gamma)));
        }
        let spread = self.bunch.energy_spread();
        let lower = (gamma - INTEGRATION_RANGE * spread).max(1.0);
        let upper = gamma + INTEGRATION_RANGE * spread;
        self.quad(
            |g| {
                let weight = self.bunch.energy_density(g);
                let angular = self.angular_integral(n, v, |u| f(&ElectronState::new(*u, g)))?;
                Ok(weight * angular)
            },
            lower,
            upper,
            &[],
        )
    }

    /// Integrates `g(emission) delta(energy - emission energy)` over the bunch.
    fn frequency_integral<G>(
        &self,
        n: &Vector3<f64>,
        v: &Vector3<f64>,
        polarization: Option<StokesParameters>,
        energy: f64,
        g: G,
    ) -> Result<f64>
    where
        G: Fn(&Emission) -> f64,
    {
        if !(energy > 0.0) {
            return Ok(0.0);
        }
        let kernel = self.kernel(polarization);
        let v = v.normalize();
        let n = self.regularized(n, &v);

        if self.spread_enabled() {
            return self.angular_integral(&n, &v, |u| {
                let gamma = match kernel.resonant_gamma(&n, u, energy) {
                    Some(gamma) => gamma,
                    None => return Ok(0.0),
                };
                let density = self.bunch.energy_density(gamma);
                if density == 0.0 {
                    return Ok(0.0);
                }
                let e = ElectronState::new(*u, gamma);
                let slope = kernel.energy_gamma_derivative(&n, &e).abs();
                if slope == 0.0 {
                    return Ok(0.0);
                }
                Ok(density * g(&kernel.emission(&n, &e)) / slope)
            });
        }

        let (sx, sy) = (self.bunch.angle_spread_x(), self.bunch.angle_spread_y());
        if !(sx > 0.0 && sy > 0.0) {
            debug!("Spectrum of a bunch without energy or angular spread is a line, returning zero");
            return Ok(0.0);
        }
        let gamma = self.bunch.gamma;
        let min_angle = self.regularization_angle();
        let offset = v - n * n.dot(&v);
        let t1 = if offset.norm() > 0.0 {
            offset.normalize()
        } else {
            maths::transverse_basis(&n).0
        };
        let t2 = n.cross(&t1);

        // Azimuthal width of the part of the cone inside the angular distribution.
        let cone = kernel
            .ring_point(&n, (&t1, &t2), 0.0, gamma, energy, min_angle)
            .map(|(u, _)| u.cross(&n).norm().atan2(u.dot(&n)))
            .unwrap_or(PI);
        let sigma = sx.max(sy);
        let width = (sigma / cone.max(sigma)).min(PI);
        let breakpoints = [-4.0 * width, -width, width, 4.0 * width];

        self.quad(
            |phi| match kernel.ring_point(&n, (&t1, &t2), phi, gamma, energy, min_angle) {
                Some((u, jacobian)) => {
                    let (tx, ty) = maths::tilt_angles(&v, &u);
                    let density = self.bunch.angular_density(tx, ty);
                    if density == 0.0 {
                        return Ok(0.0);
                    }
                    let emission = kernel.emission(&n, &ElectronState::new(u, gamma));
                    Ok(density * jacobian * g(&emission))
                }
                None => Ok(0.0),
            },
            -PI,
            PI,
            &breakpoints,
        )
    }
}
