//! Incoming longwave radiation (W/m²).

use std::sync::Arc;

use tracing::debug;

use crate::config::{ClearSkyMethod, CloudMethod, ThermalConfig};
use crate::envphys::thermal;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::topo::Topography;

pub const BOUNDS: (f64, f64) = (0.0, 600.0);

pub struct ThermalStage {
    topo: Arc<Topography>,
    clear_sky_method: ClearSkyMethod,
    cloud_method: CloudMethod,
    correct_cloud: bool,
    correct_veg: bool,
    correct_terrain: bool,
    min: f64,
    max: f64,
    pool: Option<rayon::ThreadPool>,
}

impl ThermalStage {
    pub fn new(cfg: &ThermalConfig, topo: Arc<Topography>) -> Result<Self> {
        let pool = if cfg.clear_sky_method == ClearSkyMethod::Marks1979 && cfg.marks1979_nthreads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.marks1979_nthreads)
                .build()
                .map_err(|e| SmrfError::config(format!("topotherm thread pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            topo,
            clear_sky_method: cfg.clear_sky_method,
            cloud_method: cfg.cloud_method,
            correct_cloud: cfg.correct_cloud,
            correct_veg: cfg.correct_veg,
            correct_terrain: cfg.correct_terrain,
            min: cfg.min.unwrap_or(BOUNDS.0),
            max: cfg.max.unwrap_or(BOUNDS.1),
            pool,
        })
    }

    fn clear_sky(&self, ta: &Raster, vp: &Raster, dpt: &Raster) -> Raster {
        let topo = &self.topo;
        let solve = || {
            thermal::clear_sky(
                self.clear_sky_method,
                ta,
                vp,
                dpt,
                &topo.dem,
                &topo.sky_view,
                self.correct_terrain,
            )
        };
        match &self.pool {
            Some(pool) => pool.install(solve),
            None => solve(),
        }
    }
}

impl Stage for ThermalStage {
    fn name(&self) -> &str {
        "thermal"
    }

    fn inputs(&self) -> Vec<String> {
        let mut names: Vec<String> = ["air_temp", "vapor_pressure", "dew_point"].map(String::from).to_vec();
        if self.correct_cloud {
            names.push("cloud_factor".to_string());
        }
        names
    }

    fn outputs(&self) -> Vec<String> {
        ["thermal_clear", "thermal_cloud", "thermal_veg", "thermal"]
            .map(String::from)
            .to_vec()
    }

    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
        let ta = inputs.raster("air_temp")?;
        let vp = inputs.raster("vapor_pressure")?;
        let dpt = inputs.raster("dew_point")?;

        let clear = self.clear_sky(ta, vp, dpt);
        let cloud = if self.correct_cloud {
            thermal::cloud(self.cloud_method, &clear, ta, vp, inputs.raster("cloud_factor")?)
        } else {
            clear.clone()
        };
        let veg = if self.correct_veg {
            let topo = &self.topo;
            thermal::canopy(&cloud, ta, &topo.veg_tau, &topo.veg_height)
        } else {
            cloud.clone()
        };
        let final_field = veg.clone().clamped(self.min, self.max);
        debug!(step = step.index, thermal = final_field.mean(), "thermal distributed");

        let mut out = Fields::new();
        out.insert("thermal_clear", Field::raster(clear));
        out.insert("thermal_cloud", Field::raster(cloud));
        out.insert("thermal_veg", Field::raster(veg));
        out.insert("thermal", Field::raster(final_field));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::{axis, step, topo};

    fn inputs(cf: f64) -> Fields {
        let mut f = Fields::new();
        f.insert("air_temp", Field::raster(Raster::filled(4, 4, -5.0)));
        f.insert("vapor_pressure", Field::raster(Raster::filled(4, 4, 350.0)));
        f.insert("dew_point", Field::raster(Raster::filled(4, 4, -7.0)));
        f.insert("cloud_factor", Field::raster(Raster::filled(4, 4, cf)));
        f
    }

    fn run(cfg: &ThermalConfig, cf: f64) -> Fields {
        let axis = axis(1);
        ThermalStage::new(cfg, topo()).unwrap().step(&step(&axis, 0), &inputs(cf)).unwrap()
    }

    /// Winter clear-sky longwave at 2 km lies in the low hundreds.
    #[test]
    fn clear_sky_is_plausible() {
        for method in [
            ClearSkyMethod::Marks1979,
            ClearSkyMethod::Dilley1998,
            ClearSkyMethod::Prata1996,
            ClearSkyMethod::Angstrom1918,
        ] {
            let cfg = ThermalConfig {
                clear_sky_method: method,
                ..ThermalConfig::default()
            };
            let out = run(&cfg, 1.0);
            let clear = out.raster("thermal_clear").unwrap();
            assert!(clear.data.iter().all(|&l| l > 150.0 && l < 320.0), "{method:?}: {:?}", clear.data);
        }
    }

    /// Clouds add longwave for every cloud model.
    #[test]
    fn clouds_warm_the_sky() {
        for method in [
            CloudMethod::Garen2005,
            CloudMethod::Unsworth1975,
            CloudMethod::Kimball1982,
            CloudMethod::Crawford1999,
        ] {
            let cfg = ThermalConfig {
                cloud_method: method,
                ..ThermalConfig::default()
            };
            let out = run(&cfg, 0.3);
            let (clear, cloud) = (out.raster("thermal_clear").unwrap(), out.raster("thermal_cloud").unwrap());
            assert!(cloud.data[5] > clear.data[5], "{method:?}");
        }
    }

    /// Only the tall-canopy pixel changes under the canopy correction.
    #[test]
    fn canopy_applies_above_height_threshold() {
        let out = run(&ThermalConfig::default(), 0.6);
        let (cloud, veg) = (out.raster("thermal_cloud").unwrap(), out.raster("thermal_veg").unwrap());
        assert_ne!(veg.data[0], cloud.data[0]);
        assert_eq!(veg.data[1..], cloud.data[1..]);
    }

    #[test]
    fn final_thermal_is_clamped() {
        let cfg = ThermalConfig {
            max: Some(200.0),
            ..ThermalConfig::default()
        };
        let out = run(&cfg, 0.2);
        assert!(out.raster("thermal").unwrap().data.iter().all(|&l| l <= 200.0));
    }
}
