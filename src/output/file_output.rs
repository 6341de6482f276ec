//! Writes rays as comma separated text.

use std::io::Write;

use super::{RayRecord, RaySink, RAY_HEADER};
use crate::error::{RadiationError, Result};

/// A sink that writes one csv row per ray, preceded by a header row.
pub struct CsvRaySink<W: Write> {
    writer: Option<csv::Writer<W>>,
}

impl<W: Write> CsvRaySink<W> {
    pub fn new(stream: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(stream);
        writer.write_record(&RAY_HEADER)?;
        Ok(CsvRaySink {
            writer: Some(writer),
        })
    }

    /// Closes the sink and returns the underlying stream.
    pub fn into_inner(mut self) -> Result<W> {
        match self.writer.take() {
            Some(writer) => writer.into_inner().map_err(|e| {
                RadiationError::SinkIo(std::io::Error::new(e.error().kind(), e.error().to_string()))
            }),
            None => Err(RadiationError::SinkNotOpen),
        }
    }
}

impl<W: Write + Send> RaySink for CsvRaySink<W> {
    fn write_ray(&mut self, ray: &RayRecord) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(RadiationError::SinkNotOpen)?;
        let columns = ray.columns();
        if columns.iter().any(|c| !c.is_finite()) {
            return Err(RadiationError::MalformedRecord(format!("non-finite column in {:?}", columns)));
        }
        writer.serialize(columns)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
