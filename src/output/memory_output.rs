//! Stores rays in memory.

use super::{RayRecord, RaySink};
use crate::error::{RadiationError, Result};

/// A sink that keeps every ray in a vector.
///
/// Intended for tests and small runs; large ray counts should be streamed to a
/// [CsvRaySink](super::CsvRaySink) or [BinaryRaySink](super::BinaryRaySink).
#[derive(Clone, Debug)]
pub struct VecRaySink {
    rays: Vec<RayRecord>,
    open: bool,
}

impl Default for VecRaySink {
    fn default() -> Self {
        VecRaySink {
            rays: Vec::new(),
            open: true,
        }
    }
}

impl VecRaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rays(&self) -> &[RayRecord] {
        &self.rays
    }

    pub fn into_rays(self) -> Vec<RayRecord> {
        self.rays
    }
}

impl RaySink for VecRaySink {
    fn write_ray(&mut self, ray: &RayRecord) -> Result<()> {
        if !self.open {
            return Err(RadiationError::SinkNotOpen);
        }
        self.rays.push(*ray);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
