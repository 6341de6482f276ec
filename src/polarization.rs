//! Stokes description of the polarization state of laser and scattered photons.
//!
//! The convention follows Landau & Lifshitz: `xi3` is the degree of linear
//! polarization along the first/second basis vector, `xi1` along the diagonals
//! and `xi2` the degree of circular polarization.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

use crate::error::{RadiationError, Result};

/// A set of Stokes parameters `(xi1, xi2, xi3)` normalised to the intensity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StokesParameters {
    pub xi1: f64,
    pub xi2: f64,
    pub xi3: f64,
}

impl StokesParameters {
    pub fn new(xi1: f64, xi2: f64, xi3: f64) -> Self {
        StokesParameters { xi1, xi2, xi3 }
    }

    pub fn unpolarized() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Linear polarization along the first basis vector.
    pub fn linear() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    pub fn circular() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    /// Degree of polarization
    pub fn degree(&self) -> f64 {
        self.xi1.hypot(self.xi2).hypot(self.xi3)
    }

    /// Rejects non-finite components and states with degree above one.
    pub fn validate(&self, parameter: &'static str) -> Result<()> {
        if !(self.xi1.is_finite() && self.xi2.is_finite() && self.xi3.is_finite()) {
            return Err(RadiationError::invalid(parameter, "Stokes parameters must be finite"));
        }
        if self.degree() > 1.0 + 1e-12 {
            return Err(RadiationError::invalid(
                parameter,
                format!("degree of polarization {} exceeds one", self.degree()),
            ));
        }
        Ok(())
    }

    /// Returns the selected component.
    pub fn component(&self, component: StokesComponent) -> f64 {
        match component {
            StokesComponent::Xi1 => self.xi1,
            StokesComponent::Xi2 => self.xi2,
            StokesComponent::Xi3 => self.xi3,
            StokesComponent::Degree => self.degree(),
        }
    }
}

impl Default for StokesParameters {
    fn default() -> Self {
        Self::unpolarized()
    }
}

/// Selects one polarization observable of the scattered radiation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum StokesComponent {
    Xi1,
    Xi2,
    Xi3,
    /// The overall degree of polarization.
    Degree,
}

impl StokesComponent {
    /// Maps the indices 0..=3 onto `xi1`, `xi2`, `xi3` and the degree.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(StokesComponent::Xi1),
            1 => Some(StokesComponent::Xi2),
            2 => Some(StokesComponent::Xi3),
            3 => Some(StokesComponent::Degree),
            _ => None,
        }
    }
}

/// Intensity-weighted Stokes vector `(I, I xi1, I xi2, I xi3)`.
///
/// Incoherent contributions add linearly in this form, so it is what
/// the emission kernel returns and what integrals accumulate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightedStokes {
    pub intensity: f64,
    pub xi1: f64,
    pub xi2: f64,
    pub xi3: f64,
}

impl WeightedStokes {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Normalised Stokes parameters; unpolarized for vanishing intensity.
    pub fn normalised(&self) -> StokesParameters {
        if self.intensity > 0.0 {
            StokesParameters::new(
                self.xi1 / self.intensity,
                self.xi2 / self.intensity,
                self.xi3 / self.intensity,
            )
        } else {
            StokesParameters::unpolarized()
        }
    }

    /// The weighted component, `I` times the selected parameter.
    ///
    /// The degree is not linear in the weights and is therefore computed from
    /// the already accumulated components.
    pub fn weighted_component(&self, component: StokesComponent) -> f64 {
        match component {
            StokesComponent::Xi1 => self.xi1,
            StokesComponent::Xi2 => self.xi2,
            StokesComponent::Xi3 => self.xi3,
            StokesComponent::Degree => self.xi1.hypot(self.xi2).hypot(self.xi3),
        }
    }
}

impl Add for WeightedStokes {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        WeightedStokes {
            intensity: self.intensity + other.intensity,
            xi1: self.xi1 + other.xi1,
            xi2: self.xi2 + other.xi2,
            xi3: self.xi3 + other.xi3,
        }
    }
}

impl Mul<f64> for WeightedStokes {
    type Output = Self;
    fn mul(self, factor: f64) -> Self {
        WeightedStokes {
            intensity: self.intensity * factor,
            xi1: self.xi1 * factor,
            xi2: self.xi2 * factor,
            xi3: self.xi3 * factor,
        }
    }
}
