//! Physical constants in SI units.

/// Reduced plank constant in SI units
pub const HBAR: f64 = 1.054571817e-34;

/// Mathematica constant pi
pub const PI: f64 = std::f64::consts::PI;

/// Speed of light in SI units of m/s
pub const C: f64 = 2.99792458e8;

/// Elementary charge, in Coulomb.
pub const ELECTRON_CHARGE: f64 = 1.602176634e-19;

/// Electron rest mass, in kg.
pub const ELECTRON_MASS: f64 = 9.1093837015e-31;

/// Electron rest energy m c^2, in Joules.
pub const ELECTRON_REST_ENERGY: f64 = ELECTRON_MASS * C * C;

/// Vacuum permittivity in SI units of F/m.
pub const EPSILON_0: f64 = 8.8541878128e-12;

/// Classical electron radius, in metres.
pub const ELECTRON_RADIUS: f64 = 2.8179403262e-15;

/// Thomson cross-section 8 pi r_e^2 / 3, in m^2.
pub const THOMSON_CROSS_SECTION: f64 = 8.0 * PI * ELECTRON_RADIUS * ELECTRON_RADIUS / 3.0;

/// One electronvolt in Joules.
pub const EV: f64 = ELECTRON_CHARGE;

/// One megaelectronvolt in Joules.
pub const MEV: f64 = 1.0e6 * ELECTRON_CHARGE;
