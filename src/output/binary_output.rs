//! Writes rays as raw little-endian doubles.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{RayRecord, RaySink};
use crate::error::{RadiationError, Result};

type Endianness = LittleEndian;

/// A sink that writes the ten columns of each ray as consecutive `f64` values.
///
/// The stream carries no header; a file of `m` rays is `80 m` bytes long.
pub struct BinaryRaySink<W: Write> {
    writer: W,
    open: bool,
}

impl<W: Write> BinaryRaySink<W> {
    pub fn new(writer: W) -> Self {
        BinaryRaySink { writer, open: true }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RaySink for BinaryRaySink<W> {
    fn write_ray(&mut self, ray: &RayRecord) -> Result<()> {
        if !self.open {
            return Err(RadiationError::SinkNotOpen);
        }
        for element in ray.columns().iter() {
            self.writer.write_f64::<Endianness>(*element)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::polarization::StokesParameters;
    use byteorder::ReadBytesExt;
    use nalgebra::Vector3;
    use std::io::Cursor;

    #[test]
    fn test_rays_round_trip_through_bytes() {
        let ray = RayRecord {
            position: Vector3::new(1e-6, -2e-6, 3e-4),
            direction: Vector3::new(0.0, 0.6, 0.8),
            energy: 2.0e-14,
            polarization: StokesParameters::new(0.1, -0.2, 0.3),
        };
        let mut sink = BinaryRaySink::new(Vec::new());
        sink.write_ray(&ray).unwrap();
        sink.write_ray(&ray).unwrap();
        sink.close().unwrap();
        let bytes = sink.into_inner();
        assert_eq!(bytes.len(), 160);
        let mut cursor = Cursor::new(bytes);
        let columns: Vec<f64> = (0..10)
            .map(|_| cursor.read_f64::<LittleEndian>().unwrap())
            .collect();
        assert_eq!(RayRecord::from_columns(&columns).unwrap(), ray);
    }

    #[test]
    fn test_closed_sink_rejects_rays() {
        let mut sink = BinaryRaySink::new(Vec::new());
        sink.close().unwrap();
        let ray = RayRecord::from_columns(&[0.0; 10]).unwrap();
        assert!(matches!(sink.write_ray(&ray), Err(RadiationError::SinkNotOpen)));
    }
}
