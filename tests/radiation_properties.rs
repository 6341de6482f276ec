use std::thread;
use std::time::{Duration, Instant};

use assert_approx_eq::assert_approx_eq;
use nalgebra::Vector3;

use thomson::beam::{ElectronBunch, LaserPulse};
use thomson::constant::{EV, MEV};
use thomson::geometric;
use thomson::kernel::{ElectronState, EmissionKernel, EmissionOrder};
use thomson::maths;
use thomson::output::{RayRecord, RaySink, VecRaySink};
use thomson::parallel::ParallelExecutor;
use thomson::quadrature::qag;
use thomson::{CancellationToken, RadiationError, RadiationSource, Result, SourceConfig};

fn config() -> SourceConfig {
    SourceConfig {
        threads: 4,
        samples: 20_000,
        seed: Some(2024),
        ..Default::default()
    }
}

/// Ratio of the integrated spectrum to the directional flux at a fixed direction.
fn spectrum_over_flux(order: EmissionOrder) -> f64 {
    let bunch = ElectronBunch {
        delgamma: 0.0,
        ..Default::default()
    };
    let laser = LaserPulse::default();
    let source = RadiationSource::from_models(
        bunch.clone(),
        laser.clone(),
        SourceConfig {
            precision: 1e-6,
            order,
            ..config()
        },
    )
    .unwrap();
    let token = CancellationToken::new();
    let n = Vector3::new(1e-3, 0.0, 1.0).normalize();

    let flux = source.direction_flux(&n, &token).unwrap();

    let kernel = EmissionKernel::new(&laser, order);
    let highest = kernel.energy(&n, &ElectronState::new(n, bunch.gamma)).unwrap();
    let reach = 1e-3 + 8.0 * bunch.spread();
    let lowest = highest / (1.0 + (bunch.gamma * reach).powi(2));
    let spectrum = qag(
        |energy| Ok(source.direction_frequency_flux(&n, None, energy, &token)? / energy),
        lowest,
        highest * (1.0 - 1e-12),
    )
    .tolerance(0.0, 1e-5)
    .compute()
    .unwrap();

    spectrum.value / flux
}

#[test]
fn frequency_flux_integrates_to_direction_flux() {
    assert_approx_eq!(spectrum_over_flux(EmissionOrder::Linear), 1.0, 1e-3);
}

#[test]
fn second_harmonic_spectrum_integrates_to_direction_flux() {
    assert_approx_eq!(spectrum_over_flux(EmissionOrder::NonLinear { harmonic: 2 }), 1.0, 1e-3);
}

#[test]
fn geometric_factor_approaches_paraxial_limit() {
    let bunch = ElectronBunch {
        length: 1e-4,
        eps_x: 1e-10,
        eps_y: 1e-10,
        ..Default::default()
    };
    let mut laser = LaserPulse::default();
    laser.set_rayleigh_length(0.05);
    laser.set_length(1e-4);
    let mut source = RadiationSource::from_models(
        bunch,
        laser,
        SourceConfig {
            samples: 200_000,
            ..config()
        },
    )
    .unwrap();
    let token = CancellationToken::new();
    let exact = source.calculate_geometric_factor(&token).unwrap();
    let approx = source.calculate_approx_geometric_factor();
    assert_approx_eq!(exact / approx, 1.0, 0.05);
}

fn standard_deviation(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[test]
fn monte_carlo_error_falls_with_sample_count() {
    let bunch = ElectronBunch::default();
    let laser = LaserPulse::default();
    let executor = ParallelExecutor::new(2).unwrap();
    let token = CancellationToken::new();
    let runs = |samples: usize| -> Vec<f64> {
        (0..16u64)
            .map(|seed| {
                geometric::geometric_factor(&bunch, &laser, samples, true, seed, &executor, &token)
                    .unwrap()
            })
            .collect()
    };
    let coarse = standard_deviation(&runs(2_000));
    let fine = standard_deviation(&runs(8_000));
    let ratio = coarse / fine;
    assert!(ratio > 1.2 && ratio < 3.5, "ratio of standard errors {}", ratio);
}

fn ray_source() -> RadiationSource {
    let bunch = ElectronBunch::default();
    let laser = LaserPulse::default();
    let edge = 4.0 * bunch.gamma.powi(2) * laser.photon_energy();
    let mut config = config();
    config.ray_window.theta_x = (-2e-3, 4e-3);
    config.ray_window.theta_y = (-3e-3, 3e-3);
    config.ray_window.energy = (0.8 * edge, 1.2 * edge);
    RadiationSource::from_models(bunch, laser, config).unwrap()
}

#[test]
fn rays_fill_the_acceptance_window() {
    let mut source = ray_source();
    let window = source.config().ray_window;
    let token = CancellationToken::new();
    let mut sink = VecRaySink::new();
    let summary = source.write_rays(&mut sink, 64, |_| {}, &token).unwrap();
    assert_eq!(summary.written, 64);
    assert_eq!(sink.rays().len(), 64);
    for ray in sink.rays() {
        let (tx, ty) = maths::tilt_angles(&Vector3::z(), &ray.direction);
        assert!(tx >= window.theta_x.0 && tx <= window.theta_x.1);
        assert!(ty >= window.theta_y.0 && ty <= window.theta_y.1);
        assert!(ray.energy >= window.energy.0 && ray.energy <= window.energy.1);
        assert!(ray.polarization.degree() <= 1.0 + 1e-9);
    }
    let partial = source.partial_flux().unwrap();
    assert!(partial > 0.0);
    assert_approx_eq!(partial, summary.ray_flux * 64.0, partial * 1e-12);
}

/// Requests cancellation once it holds a given number of rays.
struct CancellingSink {
    rays: VecRaySink,
    token: CancellationToken,
    limit: usize,
}

impl RaySink for CancellingSink {
    fn write_ray(&mut self, ray: &RayRecord) -> Result<()> {
        self.rays.write_ray(ray)?;
        if self.rays.rays().len() == self.limit {
            self.token.cancel();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.rays.is_open()
    }

    fn close(&mut self) -> Result<()> {
        self.rays.close()
    }
}

#[test]
fn cancelled_ray_run_keeps_written_rays() {
    let mut source = ray_source();
    let token = CancellationToken::new();
    let mut sink = CancellingSink {
        rays: VecRaySink::new(),
        token: token.clone(),
        limit: 17,
    };
    let result = source.write_rays(&mut sink, 400, |_| {}, &token);
    assert!(matches!(result, Err(RadiationError::Cancelled)));
    assert_eq!(sink.rays.rays().len(), 17);
    assert!(source.partial_flux().unwrap() > 0.0);
}

#[test]
fn cancellation_stops_monte_carlo_promptly() {
    let mut source = RadiationSource::from_models(
        ElectronBunch::default(),
        LaserPulse::default(),
        SourceConfig {
            samples: 2_000_000_000,
            ..config()
        },
    )
    .unwrap();
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let handle = thread::spawn(move || source.calculate_geometric_factor(&worker_token));
    thread::sleep(Duration::from_millis(100));
    let requested = Instant::now();
    token.cancel();
    let result = handle.join().unwrap();
    assert!(requested.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(RadiationError::Cancelled)));
}

#[test]
fn cancellation_stops_directional_query_promptly() {
    let source = RadiationSource::from_models(
        ElectronBunch::default(),
        LaserPulse::default(),
        SourceConfig {
            precision: 1e-12,
            ..config()
        },
    )
    .unwrap();
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let n = Vector3::new(2e-3, 1e-3, 1.0).normalize();
    let handle = thread::spawn(move || source.direction_flux(&n, &worker_token));
    thread::sleep(Duration::from_millis(20));
    let requested = Instant::now();
    token.cancel();
    let result = handle.join().unwrap();
    assert!(requested.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(RadiationError::Cancelled)));
}

#[test]
fn first_harmonic_reduces_to_linear_scattering() {
    let bunch = ElectronBunch::default();
    let mut strong = LaserPulse::default();
    strong.set_pulse_energy(1.0);
    let token = CancellationToken::new();
    let n = Vector3::new(1e-3, 0.0, 1.0).normalize();
    let observer = Vector3::new(0.0, 0.0, 10.0);

    for laser in vec![LaserPulse::default(), strong] {
        let linear = RadiationSource::from_models(bunch.clone(), laser.clone(), config()).unwrap();
        let first = RadiationSource::from_models(
            bunch.clone(),
            laser,
            SourceConfig {
                order: EmissionOrder::NonLinear { harmonic: 1 },
                ..config()
            },
        )
        .unwrap();

        let a = linear.direction_energy(&n, &token).unwrap();
        let b = first.direction_energy(&n, &token).unwrap();
        assert_approx_eq!(a / b, 1.0, 1e-12);

        let energy = 0.95 * a;
        let a = linear.direction_frequency_brilliance(&observer, &n, energy, &token).unwrap();
        let b = first.direction_frequency_brilliance(&observer, &n, energy, &token).unwrap();
        assert!(a > 0.0);
        assert_approx_eq!(a / b, 1.0, 1e-12);
    }
}

#[test]
fn on_axis_energy_is_compton_edge() {
    let bunch = ElectronBunch {
        delgamma: 0.0,
        eps_x: 1e-14,
        eps_y: 1e-14,
        ..ElectronBunch::with_energy(50.0 * MEV)
    };
    let mut laser = LaserPulse::default();
    laser.set_photon_energy(1.1 * EV);
    let source = RadiationSource::from_models(bunch.clone(), laser, config()).unwrap();
    let token = CancellationToken::new();
    let energy = source.direction_energy(&Vector3::z(), &token).unwrap();
    let edge = 4.0 * bunch.gamma.powi(2) * 1.1 * EV;
    assert_approx_eq!(energy / edge, 1.0, source.config().precision);
}
