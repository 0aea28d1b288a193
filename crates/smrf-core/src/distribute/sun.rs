//! Solar geometry producers: the sun position over the basin centroid and
//! the per-pixel illumination angle on the terrain.

use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use tracing::debug;

use crate::envphys::sunang::{illumination, sunang};
use crate::error::Result;
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::topo::Topography;

pub struct SunAngleStage {
    latitude: f64,
    longitude: f64,
}

impl SunAngleStage {
    pub fn new(topo: &Topography) -> Self {
        Self {
            latitude: topo.basin_lat,
            longitude: topo.basin_lon,
        }
    }
}

impl Stage for SunAngleStage {
    fn name(&self) -> &str {
        "sun_angle"
    }

    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<String> {
        vec!["cosz".to_string(), "azimuth".to_string()]
    }

    fn step(&mut self, step: &Step, _inputs: &Fields) -> Result<Fields> {
        let s = sunang(&step.time.with_timezone(&Utc), self.latitude, self.longitude)?;
        debug!(step = step.index, cosz = s.cosz, azimuth = s.azimuth, "sun angle");
        let mut out = Fields::new();
        out.insert("cosz", Field::Scalar(s.cosz));
        out.insert("azimuth", Field::Scalar(s.azimuth));
        Ok(out)
    }
}

/// Cosine of the local illumination angle. Empty while the sun is down.
pub struct IllumStage {
    topo: Arc<Topography>,
}

impl IllumStage {
    pub fn new(topo: Arc<Topography>) -> Self {
        Self { topo }
    }
}

impl Stage for IllumStage {
    fn name(&self) -> &str {
        "illum_angle"
    }

    fn inputs(&self) -> Vec<String> {
        vec!["cosz".to_string(), "azimuth".to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["illum_ang".to_string()]
    }

    fn step(&mut self, _step: &Step, inputs: &Fields) -> Result<Fields> {
        let cosz = inputs.scalar("cosz")?;
        let mut out = Fields::new();
        if cosz <= 0.0 {
            out.insert("illum_ang", Field::Empty);
            return Ok(out);
        }
        let azimuth = inputs.scalar("azimuth")?;
        let topo = &self.topo;
        let data = topo
            .sin_slope
            .data
            .par_iter()
            .zip(topo.aspect.data.par_iter())
            .map(|(&s, &a)| illumination(cosz, azimuth, s, a))
            .collect();
        out.insert("illum_ang", Field::raster(Raster::from_vec(topo.ny(), topo.nx(), data)?));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::topo;
    use chrono::TimeZone;

    fn at(hour: u32) -> Step {
        Step {
            index: 0,
            time: chrono_tz::America::Boise.with_ymd_and_hms(1998, 1, 14, hour, 0, 0).unwrap(),
            dt_days: 1.0 / 24.0,
        }
    }

    fn sun(step: &Step) -> Fields {
        SunAngleStage::new(&topo()).step(step, &Fields::new()).unwrap()
    }

    #[test]
    fn midday_sun_lights_the_basin() {
        let step = at(12);
        let angles = sun(&step);
        let cosz = angles.scalar("cosz").unwrap();
        assert!(cosz > 0.3 && cosz < 0.6, "January noon at 43°N, cosz {cosz}");

        let out = IllumStage::new(topo()).step(&step, &angles).unwrap();
        let illum = out.raster("illum_ang").unwrap();
        assert_eq!(illum.shape(), (4, 4));
        assert!(illum.data.iter().all(|&m| (0.0..=1.0).contains(&m)));
    }

    /// Illumination is empty at night; the sink turns it into zeros.
    #[test]
    fn night_is_empty() {
        let step = at(23);
        let angles = sun(&step);
        assert!(angles.scalar("cosz").unwrap() < 0.0);
        let out = IllumStage::new(topo()).step(&step, &angles).unwrap();
        assert!(out.get("illum_ang").unwrap().is_empty());
    }
}
