//! Output sinks for distributed fields.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::error::Result;
use crate::raster::Raster;

/// Receives one grid per variable per output step.
pub trait OutputSink: Send {
    fn write(&mut self, variable: &str, field: &Raster, time: &DateTime<Tz>) -> Result<()>;

    /// Called once after the last step.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Which fields are written and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPlan {
    pub variables: Vec<String>,
    pub frequency: usize,
    pub ny: usize,
    pub nx: usize,
}

/// Keeps every written grid in memory, keyed by variable.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub written: BTreeMap<String, Vec<(DateTime<Tz>, Raster)>>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, variable: &str) -> &[(DateTime<Tz>, Raster)] {
        self.written.get(variable).map_or(&[], Vec::as_slice)
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, variable: &str, field: &Raster, time: &DateTime<Tz>) -> Result<()> {
        self.written
            .entry(variable.to_string())
            .or_default()
            .push((*time, field.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
