//! Radiation from the scattering of laser light on relativistic electron bunches.
//!
//! A [RadiationSource](source::RadiationSource) combines an
//! [ElectronBunch](beam::ElectronBunch) and a [LaserPulse](beam::LaserPulse) and
//! answers questions about the scattered X-rays: flux, mean energy, spectral
//! flux, brilliance and polarization in a given direction, the total flux, and
//! Monte Carlo photon samples for ray tracing.

pub mod beam;
pub mod constant;
pub mod error;
pub mod geometric;
pub mod integrator;
pub mod kernel;
pub mod maths;
pub mod output;
pub mod parallel;
pub mod polarization;
pub mod quadrature;
pub mod rays;
pub mod source;

pub use error::{RadiationError, Result};
pub use parallel::CancellationToken;
pub use source::{RadiationSource, SourceConfig};
