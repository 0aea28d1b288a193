//! Cloud factor: the ratio of measured to modelled clear-sky shortwave.

use std::sync::Arc;

use crate::config::CloudFactorConfig;
use crate::error::Result;
use crate::scheduler::{Fields, Stage, Step};
use crate::stations::StationData;
use crate::time::TimeAxis;
use crate::topo::Topography;

use super::ImageData;

pub struct CloudFactorStage {
    image: ImageData,
}

impl CloudFactorStage {
    pub fn new(cfg: &CloudFactorConfig, topo: Arc<Topography>, data: &StationData, axis: &TimeAxis) -> Result<Self> {
        let mut image = ImageData::initialize("cloud_factor", "cloud_factor", topo, data, axis, &cfg.dist, (0.0, 1.0))?;
        // A transmissivity outside [0, 1] has no meaning whatever the config says.
        image.min = image.min.max(0.0);
        image.max = image.max.min(1.0);
        Ok(Self { image })
    }
}

impl Stage for CloudFactorStage {
    fn name(&self) -> &str {
        "cloud_factor"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::*;

    #[test]
    fn clamped_to_unit_interval() {
        let axis = axis(2);
        let mut data = station_data(2);
        data.tables.insert("cloud_factor".into(), table(2, |_, k| 0.5 + 0.4 * k as f64));
        let mut cfg = CloudFactorConfig::default();
        cfg.dist.max = Some(5.0);
        let mut stage = CloudFactorStage::new(&cfg, topo(), &data, &axis).unwrap();
        let out = stage.step(&step(&axis, 0), &Fields::new()).unwrap();
        let cf = out.raster("cloud_factor").unwrap();
        assert!(cf.data.iter().all(|v| (0.0..=1.0).contains(v)), "{:?}", cf.data);
    }
}
