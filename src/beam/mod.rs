//! Phase-space models of the two colliding beams.
//!
//! Both models are plain values: the engine reads them concurrently from many
//! workers during a job and clones them whenever it needs an isolated copy.

pub mod electron;
pub mod laser;

pub use electron::ElectronBunch;
pub use laser::LaserPulse;
