//! Soil temperature: a constant field.

use crate::config::SoilTempConfig;
use crate::error::Result;
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};

pub struct SoilTempStage {
    field: Field,
}

impl SoilTempStage {
    pub fn new(cfg: &SoilTempConfig, ny: usize, nx: usize) -> Self {
        Self {
            field: Field::raster(Raster::filled(ny, nx, cfg.temp)),
        }
    }
}

impl Stage for SoilTempStage {
    fn name(&self) -> &str {
        "soil_temp"
    }

    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<String> {
        vec!["soil_temp".to_string()]
    }

    fn step(&mut self, _step: &Step, _inputs: &Fields) -> Result<Fields> {
        let mut out = Fields::new();
        out.insert("soil_temp", self.field.clone());
        Ok(out)
    }
}
