//! Air temperature (°C).

use std::sync::Arc;

use crate::config::AirTempConfig;
use crate::error::Result;
use crate::scheduler::{Fields, Stage, Step};
use crate::stations::StationData;
use crate::time::TimeAxis;
use crate::topo::Topography;

use super::ImageData;

pub const BOUNDS: (f64, f64) = (-73.0, 47.0);

pub struct AirTempStage {
    image: ImageData,
}

impl AirTempStage {
    pub fn new(cfg: &AirTempConfig, topo: Arc<Topography>, data: &StationData, axis: &TimeAxis) -> Result<Self> {
        let image = ImageData::initialize("air_temp", "air_temp", topo, data, axis, &cfg.dist, BOUNDS)?;
        Ok(Self { image })
    }
}

impl Stage for AirTempStage {
    fn name(&self) -> &str {
        "air_temp"
    }

    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<String> {
        self.image.field_names()
    }

    fn step(&mut self, step: &Step, _inputs: &Fields) -> Result<Fields> {
        let result = self.image.distribute_step(step)?;
        let mut out = Fields::new();
        self.image.publish(&mut out, result);
        Ok(out)
    }
}
