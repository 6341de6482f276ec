//! The radiation source: the entry point tying the models to the engines.
//!
//! A [RadiationSource] holds shared handles to one electron bunch and one laser
//! pulse, which callers may change between jobs, and its own [SourceConfig].
//! Every job works on a [SourceSnapshot] taken when it starts, so the models
//! are never read while being changed. Derived quantities are cached together
//! with the inputs that produced them and are only reported while those inputs
//! are unchanged, so settings they do not depend on can change freely.

use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::beam::{ElectronBunch, LaserPulse};
use crate::error::{RadiationError, Result};
use crate::geometric;
use crate::integrator::{DirectionalIntegrator, IntegrationSettings};
use crate::kernel::EmissionOrder;
use crate::output::RaySink;
use crate::parallel::{CancellationToken, ParallelExecutor};
use crate::polarization::{StokesComponent, StokesParameters};
use crate::rays::{AcceptanceWindow, RayGenerator, RaySummary};

/// Numerical and sampling settings of a [RadiationSource].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Relative precision of the quadratures.
    pub precision: f64,
    /// Scale of the regularising shift applied near the symmetry axis.
    pub shift_factor: f64,
    /// Monte Carlo samples for the geometric factor.
    pub samples: usize,
    /// Size of the worker pool.
    pub threads: usize,
    /// Whether the electron energy spread is integrated over.
    pub energy_spread: bool,
    /// Replaces the laser polarization when set.
    pub polarization: Option<StokesParameters>,
    /// Acceptance region of the ray generator.
    pub ray_window: AcceptanceWindow,
    /// Default number of rays per run.
    pub ray_count: usize,
    pub order: EmissionOrder,
    /// Seed of the random streams; drawn afresh for every job when absent.
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            precision: 1e-4,
            shift_factor: 1.0,
            samples: 100_000,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            energy_spread: true,
            polarization: None,
            ray_window: AcceptanceWindow::default(),
            ray_count: 1000,
            order: EmissionOrder::Linear,
            seed: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.precision > 0.0 && self.precision < 1.0) {
            return Err(RadiationError::invalid("precision", "must lie in (0, 1)"));
        }
        if !(self.shift_factor.is_finite() && self.shift_factor >= 0.0) {
            return Err(RadiationError::invalid("shift_factor", "must be finite and non-negative"));
        }
        if self.samples == 0 {
            return Err(RadiationError::invalid("samples", "must be positive"));
        }
        if self.threads == 0 {
            return Err(RadiationError::invalid("threads", "must be positive"));
        }
        if self.ray_count == 0 {
            return Err(RadiationError::invalid("ray_count", "must be positive"));
        }
        if let EmissionOrder::NonLinear { harmonic: 0 } = self.order {
            return Err(RadiationError::invalid("order", "harmonic number must be at least 1"));
        }
        if let Some(polarization) = &self.polarization {
            polarization.validate("polarization")?;
        }
        self.ray_window.validate()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: SourceConfig = serde_yaml::from_str(text)
            .map_err(|e| RadiationError::invalid("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SourceConfig = serde_json::from_str(text)
            .map_err(|e| RadiationError::invalid("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| RadiationError::invalid("config", e.to_string()))
    }

    fn integration_settings(&self) -> IntegrationSettings {
        IntegrationSettings {
            precision: self.precision,
            shift_factor: self.shift_factor,
            energy_spread: self.energy_spread,
        }
    }
}

/// An immutable copy of everything a job depends on.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSnapshot {
    pub bunch: ElectronBunch,
    /// The laser with any polarization override applied.
    pub laser: LaserPulse,
    pub config: SourceConfig,
}

impl SourceSnapshot {
    fn seed(&self) -> u64 {
        self.config.seed.unwrap_or_else(rand::random)
    }

    /// Electron number times photon number times repetition rate, in s^-1.
    fn collision_rate(&self) -> f64 {
        self.bunch.number * self.laser.number() * self.laser.frequency()
    }
}

/// Inputs of the Monte Carlo geometric factor and of the total flux derived from it.
#[derive(Clone, Debug, PartialEq)]
struct GeometryKey {
    bunch: ElectronBunch,
    /// The laser with its polarization cleared, which the overlap does not see.
    laser: LaserPulse,
    samples: usize,
    energy_spread: bool,
    seed: Option<u64>,
}

impl GeometryKey {
    fn new(snapshot: &SourceSnapshot) -> Self {
        GeometryKey {
            bunch: snapshot.bunch.clone(),
            laser: overlap_laser(&snapshot.laser),
            samples: snapshot.config.samples,
            energy_spread: snapshot.config.energy_spread,
            seed: snapshot.config.seed,
        }
    }
}

/// Inputs of the ray generator.
#[derive(Clone, Debug, PartialEq)]
struct RayKey {
    bunch: ElectronBunch,
    laser: LaserPulse,
    order: EmissionOrder,
    window: AcceptanceWindow,
    energy_spread: bool,
    seed: Option<u64>,
}

impl RayKey {
    fn new(snapshot: &SourceSnapshot) -> Self {
        RayKey {
            bunch: snapshot.bunch.clone(),
            laser: snapshot.laser.clone(),
            order: snapshot.config.order,
            window: snapshot.config.ray_window,
            energy_spread: snapshot.config.energy_spread,
            seed: snapshot.config.seed,
        }
    }
}

fn overlap_laser(laser: &LaserPulse) -> LaserPulse {
    laser.with_polarization(StokesParameters::unpolarized())
}

/// The observable evaluated by a directional scan.
///
/// Polarizations given to the energy-resolved observables replace the laser
/// polarization for the scan only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Observable {
    Flux,
    Energy,
    FrequencyFlux(Option<StokesParameters>),
    /// Brilliance as seen by an observer at the given position.
    Brilliance(Vector3<f64>),
    Polarization(StokesComponent, Option<StokesParameters>),
}

/// One point of a directional scan. `energy` is ignored by energy-integrated observables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanPoint {
    pub direction: Vector3<f64>,
    pub energy: f64,
}

#[derive(Clone, Debug, Default)]
struct DerivedCache {
    geometric_factor: Option<(GeometryKey, f64)>,
    approx_geometric_factor: Option<((ElectronBunch, LaserPulse), f64)>,
    linear_total_flux: Option<(GeometryKey, f64)>,
    partial_flux: Option<(RayKey, f64)>,
}

fn cached<K: PartialEq>(entry: &Option<(K, f64)>, current: &K) -> Option<f64> {
    match entry {
        Some((key, value)) if key == current => Some(*value),
        _ => None,
    }
}

pub struct RadiationSource {
    bunch: Arc<RwLock<ElectronBunch>>,
    laser: Arc<RwLock<LaserPulse>>,
    config: SourceConfig,
    executor: ParallelExecutor,
    cache: DerivedCache,
}

impl RadiationSource {
    pub fn new(
        bunch: Arc<RwLock<ElectronBunch>>,
        laser: Arc<RwLock<LaserPulse>>,
        config: SourceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let executor = ParallelExecutor::new(config.threads)?;
        Ok(RadiationSource {
            bunch,
            laser,
            config,
            executor,
            cache: DerivedCache::default(),
        })
    }

    /// Creates a source owning fresh handles to the given models.
    pub fn from_models(bunch: ElectronBunch, laser: LaserPulse, config: SourceConfig) -> Result<Self> {
        Self::new(Arc::new(RwLock::new(bunch)), Arc::new(RwLock::new(laser)), config)
    }

    pub fn bunch(&self) -> Arc<RwLock<ElectronBunch>> {
        Arc::clone(&self.bunch)
    }

    pub fn laser(&self) -> Arc<RwLock<LaserPulse>> {
        Arc::clone(&self.laser)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Applies `change` to a copy of the configuration and keeps it if it validates.
    ///
    /// The worker pool is rebuilt when the thread count changes. Cached results
    /// stay valid unless the change touches their inputs. On error the
    /// configuration is left untouched.
    pub fn configure<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SourceConfig),
    {
        let mut config = self.config.clone();
        change(&mut config);
        config.validate()?;
        if config.threads != self.executor.threads() {
            self.executor = ParallelExecutor::new(config.threads)?;
        }
        self.config = config;
        Ok(())
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        let bunch = self.bunch.read().unwrap_or_else(|e| e.into_inner()).clone();
        let laser = self.laser.read().unwrap_or_else(|e| e.into_inner());
        let laser = match self.config.polarization {
            Some(polarization) => laser.with_polarization(polarization),
            None => laser.clone(),
        };
        SourceSnapshot {
            bunch,
            laser,
            config: self.config.clone(),
        }
    }

    /// Monte Carlo geometric factor, in m^-2; the result is cached.
    pub fn calculate_geometric_factor(&mut self, token: &CancellationToken) -> Result<f64> {
        let snapshot = self.snapshot();
        let factor = geometric::geometric_factor(
            &snapshot.bunch,
            &snapshot.laser,
            snapshot.config.samples,
            snapshot.config.energy_spread,
            snapshot.seed(),
            &self.executor,
            token,
        )?;
        self.cache.geometric_factor = Some((GeometryKey::new(&snapshot), factor));
        Ok(factor)
    }

    /// Paraxial geometric factor, in m^-2; the result is cached.
    pub fn calculate_approx_geometric_factor(&mut self) -> f64 {
        let snapshot = self.snapshot();
        let factor = geometric::approximate_geometric_factor(&snapshot.bunch, &snapshot.laser);
        let key = (snapshot.bunch, overlap_laser(&snapshot.laser));
        self.cache.approx_geometric_factor = Some((key, factor));
        factor
    }

    /// Total photons per second, computing the geometric factor first if needed.
    pub fn calculate_linear_total_flux(&mut self, token: &CancellationToken) -> Result<f64> {
        let factor = match self.geometric_factor() {
            Some(factor) => factor,
            None => self.calculate_geometric_factor(token)?,
        };
        let snapshot = self.snapshot();
        let flux = geometric::linear_total_flux(&snapshot.bunch, &snapshot.laser, factor);
        info!("Linear total flux {:e} photons/s", flux);
        self.cache.linear_total_flux = Some((GeometryKey::new(&snapshot), flux));
        Ok(flux)
    }

    pub fn geometric_factor(&self) -> Option<f64> {
        cached(&self.cache.geometric_factor, &GeometryKey::new(&self.snapshot()))
    }

    pub fn approx_geometric_factor(&self) -> Option<f64> {
        let snapshot = self.snapshot();
        let key = (snapshot.bunch, overlap_laser(&snapshot.laser));
        cached(&self.cache.approx_geometric_factor, &key)
    }

    pub fn linear_total_flux(&self) -> Option<f64> {
        cached(&self.cache.linear_total_flux, &GeometryKey::new(&self.snapshot()))
    }

    /// Flux into the acceptance window carried by the rays of the last run.
    pub fn partial_flux(&self) -> Option<f64> {
        cached(&self.cache.partial_flux, &RayKey::new(&self.snapshot()))
    }

    /// Collision rate per unit area for the snapshot, preferring the Monte Carlo
    /// geometric factor.
    fn luminosity(&self, snapshot: &SourceSnapshot) -> f64 {
        let factor = match cached(&self.cache.geometric_factor, &GeometryKey::new(snapshot)) {
            Some(factor) => factor,
            None => {
                warn!("Geometric factor not calculated for the current models, using the paraxial estimate");
                geometric::approximate_geometric_factor(&snapshot.bunch, &snapshot.laser)
            }
        };
        snapshot.collision_rate() * factor
    }

    fn evaluate(
        &self,
        snapshot: &SourceSnapshot,
        luminosity: f64,
        observable: Observable,
        point: &ScanPoint,
        token: &CancellationToken,
    ) -> Result<f64> {
        let v = snapshot.bunch.direction();
        let integrator = DirectionalIntegrator::new(
            &snapshot.bunch,
            &snapshot.laser,
            snapshot.config.order,
            snapshot.config.integration_settings(),
            luminosity,
            token,
        );
        let n = &point.direction;
        match observable {
            Observable::Flux => integrator.direction_flux(n, &v),
            Observable::Energy => integrator.direction_energy(n, &v),
            Observable::FrequencyFlux(polarization) => {
                integrator.direction_frequency_flux(n, &v, polarization, point.energy)
            }
            Observable::Brilliance(observer) => {
                integrator.direction_frequency_brilliance(&observer, n, &v, point.energy)
            }
            Observable::Polarization(component, polarization) => {
                integrator.direction_frequency_polarization(n, &v, polarization, point.energy, component)
            }
        }
    }

    fn query(&self, observable: Observable, point: ScanPoint, token: &CancellationToken) -> Result<f64> {
        let snapshot = self.snapshot();
        let luminosity = self.luminosity(&snapshot);
        self.evaluate(&snapshot, luminosity, observable, &point, token)
    }

    /// Photon flux per unit solid angle in direction `n`, in photons/s/sr.
    pub fn direction_flux(&self, n: &Vector3<f64>, token: &CancellationToken) -> Result<f64> {
        self.query(Observable::Flux, ScanPoint { direction: *n, energy: 0.0 }, token)
    }

    /// Mean photon energy in direction `n`, in Joules.
    pub fn direction_energy(&self, n: &Vector3<f64>, token: &CancellationToken) -> Result<f64> {
        self.query(Observable::Energy, ScanPoint { direction: *n, energy: 0.0 }, token)
    }

    /// Photon flux per unit solid angle and unit relative bandwidth at `energy`.
    ///
    /// `polarization` replaces the laser polarization for this query only.
    pub fn direction_frequency_flux(
        &self,
        n: &Vector3<f64>,
        polarization: Option<StokesParameters>,
        energy: f64,
        token: &CancellationToken,
    ) -> Result<f64> {
        self.query(Observable::FrequencyFlux(polarization), ScanPoint { direction: *n, energy }, token)
    }

    pub fn direction_frequency_brilliance(
        &self,
        observer: &Vector3<f64>,
        n: &Vector3<f64>,
        energy: f64,
        token: &CancellationToken,
    ) -> Result<f64> {
        self.query(Observable::Brilliance(*observer), ScanPoint { direction: *n, energy }, token)
    }

    pub fn direction_frequency_polarization(
        &self,
        n: &Vector3<f64>,
        polarization: Option<StokesParameters>,
        energy: f64,
        component: StokesComponent,
        token: &CancellationToken,
    ) -> Result<f64> {
        self.query(
            Observable::Polarization(component, polarization),
            ScanPoint { direction: *n, energy },
            token,
        )
    }

    /// Evaluates `observable` at every point, spreading the points over the workers.
    ///
    /// Results are in the order of `points`.
    pub fn scan_directions(
        &self,
        points: &[ScanPoint],
        observable: Observable,
        token: &CancellationToken,
    ) -> Result<Vec<f64>> {
        let snapshot = self.snapshot();
        let luminosity = self.luminosity(&snapshot);
        debug!("Scanning {} points on {} threads", points.len(), self.executor.threads());
        self.executor.map(points, token, |point| {
            self.evaluate(&snapshot, luminosity, observable, point, token)
        })
    }

    /// Generates `count` rays into `sink`, see [RayGenerator::write_rays].
    ///
    /// The partial flux of the run is cached even when it is cancelled or fails.
    pub fn write_rays<P>(
        &mut self,
        sink: &mut dyn RaySink,
        count: usize,
        progress: P,
        token: &CancellationToken,
    ) -> Result<RaySummary>
    where
        P: FnMut(u32) + Send,
    {
        if count == 0 {
            return Err(RadiationError::invalid("ray_count", "must be positive"));
        }
        let snapshot = self.snapshot();
        let generator = RayGenerator::new(
            &snapshot.bunch,
            &snapshot.laser,
            snapshot.config.order,
            snapshot.config.ray_window,
            snapshot.config.energy_spread,
            snapshot.seed(),
        )?;
        let run = generator.write_rays(sink, count, progress, &self.executor, token);
        let partial_flux = run.summary.partial_flux;
        drop(generator);
        self.cache.partial_flux = Some((RayKey::new(&snapshot), partial_flux));
        run.into_result()
    }

    /// Generates the configured number of rays.
    pub fn write_configured_rays<P>(
        &mut self,
        sink: &mut dyn RaySink,
        progress: P,
        token: &CancellationToken,
    ) -> Result<RaySummary>
    where
        P: FnMut(u32) + Send,
    {
        let count = self.config.ray_count;
        self.write_rays(sink, count, progress, token)
    }

    /// Ordered `(name, value)` list of the scalar configuration followed by the
    /// electron and laser parameters.
    pub fn parameters(&self) -> Vec<(&'static str, f64)> {
        let c = &self.config;
        let polarization = c.polarization.unwrap_or_else(StokesParameters::unpolarized);
        let order = match c.order {
            EmissionOrder::Linear => 0.0,
            EmissionOrder::NonLinear { harmonic } => harmonic as f64,
        };
        let mut parameters = vec![
            ("source.precision", c.precision),
            ("source.shift_factor", c.shift_factor),
            ("source.samples", c.samples as f64),
            ("source.threads", c.threads as f64),
            ("source.energy_spread", if c.energy_spread { 1.0 } else { 0.0 }),
            ("source.override_polarization", if c.polarization.is_some() { 1.0 } else { 0.0 }),
            ("source.xi1", polarization.xi1),
            ("source.xi2", polarization.xi2),
            ("source.xi3", polarization.xi3),
            ("source.theta_x_min", c.ray_window.theta_x.0),
            ("source.theta_x_max", c.ray_window.theta_x.1),
            ("source.theta_y_min", c.ray_window.theta_y.0),
            ("source.theta_y_max", c.ray_window.theta_y.1),
            ("source.energy_min", c.ray_window.energy.0),
            ("source.energy_max", c.ray_window.energy.1),
            ("source.ray_count", c.ray_count as f64),
            ("source.order", order),
        ];
        parameters.extend(self.bunch.read().unwrap_or_else(|e| e.into_inner()).parameters());
        parameters.extend(self.laser.read().unwrap_or_else(|e| e.into_inner()).parameters());
        parameters
    }

    /// Sets one parameter by the name used in [parameters](Self::parameters).
    ///
    /// The value is validated before it is applied.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if name.starts_with("electron.") {
            let mut guard = self.bunch.write().unwrap_or_else(|e| e.into_inner());
            let mut bunch = guard.clone();
            if !bunch.set_parameter(name, value) {
                return Err(unknown(name));
            }
            bunch.validate()?;
            *guard = bunch;
            return Ok(());
        }
        if name.starts_with("laser.") {
            let mut guard = self.laser.write().unwrap_or_else(|e| e.into_inner());
            let mut laser = guard.clone();
            if !laser.set_parameter(name, value) {
                return Err(unknown(name));
            }
            laser.validate()?;
            *guard = laser;
            return Ok(());
        }

        let count = |parameter: &'static str| -> Result<usize> {
            if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
                Ok(value as usize)
            } else {
                Err(RadiationError::invalid(parameter, "must be a whole number"))
            }
        };
        let fallback = self.laser.read().unwrap_or_else(|e| e.into_inner()).polarization();
        let flag = value != 0.0;
        match name {
            "source.precision" => self.configure(|c| c.precision = value),
            "source.shift_factor" => self.configure(|c| c.shift_factor = value),
            "source.samples" => {
                let n = count("samples")?;
                self.configure(|c| c.samples = n)
            }
            "source.threads" => {
                let n = count("threads")?;
                self.configure(|c| c.threads = n)
            }
            "source.energy_spread" => self.configure(|c| c.energy_spread = flag),
            "source.override_polarization" => self.configure(|c| {
                c.polarization = if flag {
                    Some(c.polarization.unwrap_or(fallback))
                } else {
                    None
                }
            }),
            "source.xi1" => self.configure(|c| c.polarization.get_or_insert(fallback).xi1 = value),
            "source.xi2" => self.configure(|c| c.polarization.get_or_insert(fallback).xi2 = value),
            "source.xi3" => self.configure(|c| c.polarization.get_or_insert(fallback).xi3 = value),
            "source.theta_x_min" => self.configure(|c| c.ray_window.theta_x.0 = value),
            "source.theta_x_max" => self.configure(|c| c.ray_window.theta_x.1 = value),
            "source.theta_y_min" => self.configure(|c| c.ray_window.theta_y.0 = value),
            "source.theta_y_max" => self.configure(|c| c.ray_window.theta_y.1 = value),
            "source.energy_min" => self.configure(|c| c.ray_window.energy.0 = value),
            "source.energy_max" => self.configure(|c| c.ray_window.energy.1 = value),
            "source.ray_count" => {
                let n = count("ray_count")?;
                self.configure(|c| c.ray_count = n)
            }
            "source.order" => {
                let n = count("order")?;
                self.configure(|c| {
                    c.order = if n == 0 {
                        EmissionOrder::Linear
                    } else {
                        EmissionOrder::NonLinear { harmonic: n as u32 }
                    }
                })
            }
            _ => Err(unknown(name)),
        }
    }
}

fn unknown(name: &str) -> RadiationError {
    RadiationError::invalid("parameter", format!("unknown parameter '{}'", name))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::output::VecRaySink;
    use assert_approx_eq::assert_approx_eq;

    fn config() -> SourceConfig {
        SourceConfig {
            threads: 2,
            samples: 5_000,
            seed: Some(5),
            ..Default::default()
        }
    }

    fn source() -> RadiationSource {
        RadiationSource::from_models(ElectronBunch::default(), LaserPulse::default(), config()).unwrap()
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let mut source = source();
        let result = source.configure(|c| c.threads = 0);
        assert!(matches!(result, Err(RadiationError::InvalidConfiguration { parameter: "threads", .. })));
        assert_eq!(source.config().threads, 2);
        assert!(source.configure(|c| c.precision = 0.0).is_err());
        assert!(source.configure(|c| c.ray_window.energy = (-1.0, 1.0)).is_err());
        assert!(source
            .configure(|c| c.order = EmissionOrder::NonLinear { harmonic: 0 })
            .is_err());
        assert!(source
            .configure(|c| c.polarization = Some(StokesParameters::new(1.0, 1.0, 0.0)))
            .is_err());
        assert!(source.configure(|c| c.threads = 3).is_ok());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = SourceConfig {
            order: EmissionOrder::NonLinear { harmonic: 2 },
            polarization: Some(StokesParameters::circular()),
            ..config()
        };
        let text = config.to_yaml_string().unwrap();
        assert_eq!(SourceConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_json_config_uses_defaults() {
        let config = SourceConfig::from_json_str(r#"{"precision": 1e-3, "threads": 4}"#).unwrap();
        assert_eq!(config.precision, 1e-3);
        assert_eq!(config.threads, 4);
        assert_eq!(config.samples, SourceConfig::default().samples);
        assert!(SourceConfig::from_json_str(r#"{"samples": 0}"#).is_err());
    }

    #[test]
    fn test_cache_invalidated_by_model_change() {
        let mut source = source();
        let token = CancellationToken::new();
        assert_eq!(source.geometric_factor(), None);
        let factor = source.calculate_geometric_factor(&token).unwrap();
        assert_eq!(source.geometric_factor(), Some(factor));
        source.bunch().write().unwrap().eps_x *= 2.0;
        assert_eq!(source.geometric_factor(), None);
    }

    #[test]
    fn test_cache_kept_across_unrelated_configuration() {
        let mut source = source();
        let token = CancellationToken::new();
        let factor = source.calculate_geometric_factor(&token).unwrap();
        let approx = source.calculate_approx_geometric_factor();
        source.configure(|c| c.ray_count = 2000).unwrap();
        source.configure(|c| c.precision = 1e-3).unwrap();
        source.configure(|c| c.shift_factor = 2.0).unwrap();
        source.configure(|c| c.threads = 3).unwrap();
        source
            .configure(|c| c.polarization = Some(StokesParameters::circular()))
            .unwrap();
        assert_eq!(source.geometric_factor(), Some(factor));
        assert_eq!(source.approx_geometric_factor(), Some(approx));

        source.configure(|c| c.samples = 6_000).unwrap();
        assert_eq!(source.geometric_factor(), None);
        assert_eq!(source.approx_geometric_factor(), Some(approx));
        source.configure(|c| c.samples = 5_000).unwrap();
        assert_eq!(source.geometric_factor(), Some(factor));
        source.configure(|c| c.energy_spread = false).unwrap();
        assert_eq!(source.geometric_factor(), None);

        source.laser().write().unwrap().set_rayleigh_length(1e-3);
        assert_eq!(source.approx_geometric_factor(), None);
    }

    #[test]
    fn test_partial_flux_follows_ray_settings() {
        let mut source = source();
        let edge = 4.0 * ElectronBunch::default().gamma.powi(2) * LaserPulse::default().photon_energy();
        source
            .configure(|c| c.ray_window.energy = (0.5 * edge, 1.5 * edge))
            .unwrap();
        let token = CancellationToken::new();
        let mut sink = VecRaySink::new();
        let summary = source.write_rays(&mut sink, 10, |_| {}, &token).unwrap();
        source.configure(|c| c.samples = 6_000).unwrap();
        assert_eq!(source.partial_flux(), Some(summary.partial_flux));
        source
            .configure(|c| c.order = EmissionOrder::NonLinear { harmonic: 2 })
            .unwrap();
        assert_eq!(source.partial_flux(), None);
    }

    #[test]
    fn test_polarization_given_per_query() {
        let source = source();
        let token = CancellationToken::new();
        let bunch = ElectronBunch::default();
        let laser = LaserPulse::default();
        let energy = 0.999 * 4.0 * bunch.gamma.powi(2) * laser.photon_energy();
        let n = Vector3::z();
        let circular = Some(StokesParameters::circular());

        let xi2 = source
            .direction_frequency_polarization(&n, circular, energy, StokesComponent::Xi2, &token)
            .unwrap();
        assert!(xi2 < -0.95);
        let xi2 = source
            .direction_frequency_polarization(&n, None, energy, StokesComponent::Xi2, &token)
            .unwrap();
        assert!(xi2.abs() < 1e-12);
        assert_eq!(source.config().polarization, None);

        let overridden = source.direction_frequency_flux(&n, circular, energy, &token).unwrap();
        let scan = source
            .scan_directions(
                &[ScanPoint { direction: n, energy }],
                Observable::FrequencyFlux(circular),
                &token,
            )
            .unwrap();
        assert_eq!(scan, vec![overridden]);
    }

    #[test]
    fn test_linear_total_flux_uses_geometric_factor() {
        let mut source = source();
        let token = CancellationToken::new();
        let flux = source.calculate_linear_total_flux(&token).unwrap();
        let factor = source.geometric_factor().unwrap();
        let bunch = ElectronBunch::default();
        let laser = LaserPulse::default();
        assert_approx_eq!(flux / geometric::linear_total_flux(&bunch, &laser, factor), 1.0, 1e-12);
        assert_eq!(source.linear_total_flux(), Some(flux));
    }

    #[test]
    fn test_polarization_override_in_snapshot() {
        let mut source = source();
        assert_eq!(source.snapshot().laser.polarization(), StokesParameters::linear());
        source
            .configure(|c| c.polarization = Some(StokesParameters::circular()))
            .unwrap();
        assert_eq!(source.snapshot().laser.polarization(), StokesParameters::circular());
        assert_eq!(
            source.laser().read().unwrap().polarization(),
            StokesParameters::linear()
        );
    }

    #[test]
    fn test_parameters_round_trip() {
        let mut source = source();
        let names: Vec<&str> = source.parameters().iter().map(|(name, _)| *name).collect();
        assert_eq!(names[0], "source.precision");
        assert!(names.contains(&"electron.gamma"));
        assert!(names.contains(&"laser.rayleigh_length"));

        source.set_parameter("source.samples", 2000.0).unwrap();
        assert_eq!(source.config().samples, 2000);
        source.set_parameter("electron.eps_x", 1e-9).unwrap();
        assert_eq!(source.bunch().read().unwrap().eps_x, 1e-9);
        source.set_parameter("source.order", 3.0).unwrap();
        assert_eq!(source.config().order, EmissionOrder::NonLinear { harmonic: 3 });
        source.set_parameter("source.xi2", 0.0).unwrap();
        assert_eq!(source.config().polarization, Some(StokesParameters::linear()));

        assert!(source.set_parameter("source.samples", 1.5).is_err());
        assert!(source.set_parameter("electron.gamma", 0.5).is_err());
        assert!(source.bunch().read().unwrap().gamma > 1.0);
        assert!(source.set_parameter("nonsense", 1.0).is_err());
    }

    #[test]
    fn test_scan_matches_single_queries() {
        let source = source();
        let token = CancellationToken::new();
        let points: Vec<ScanPoint> = (0..4)
            .map(|i| ScanPoint {
                direction: Vector3::new(i as f64 * 1e-3, 0.0, 1.0).normalize(),
                energy: 0.0,
            })
            .collect();
        let scan = source.scan_directions(&points, Observable::Flux, &token).unwrap();
        assert_eq!(scan.len(), 4);
        for (point, value) in points.iter().zip(scan.iter()) {
            assert_eq!(*value, source.direction_flux(&point.direction, &token).unwrap());
        }
        assert!(scan.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_partial_flux_recorded() {
        let mut source = source();
        let bunch = ElectronBunch::default();
        let laser = LaserPulse::default();
        let edge = 4.0 * bunch.gamma.powi(2) * laser.photon_energy();
        source
            .configure(|c| c.ray_window.energy = (0.5 * edge, 1.5 * edge))
            .unwrap();
        let token = CancellationToken::new();
        let mut sink = VecRaySink::new();
        let summary = source.write_rays(&mut sink, 20, |_| {}, &token).unwrap();
        assert_eq!(sink.rays().len(), 20);
        assert_eq!(source.partial_flux(), Some(summary.partial_flux));
    }
}
