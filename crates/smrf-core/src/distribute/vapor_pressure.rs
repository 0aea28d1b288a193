//! Vapor pressure (Pa), with the dew point and precipitation temperature
//! derived from it.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::config::{PrecipTempMethod, VaporPressureConfig};
use crate::envphys::constants::FREEZE;
use crate::envphys::phys::{dew_point, wet_bulb, wet_bulb_pressure};
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::stations::StationData;
use crate::time::TimeAxis;
use crate::topo::Topography;

use super::ImageData;

pub const BOUNDS: (f64, f64) = (10.0, 5000.0);

/// Dew point is kept this far (°C) below an air temperature it would exceed.
const DEW_POINT_OFFSET: f64 = 0.2;

pub struct VaporPressureStage {
    image: ImageData,
    topo: Arc<Topography>,
    tolerance: f64,
    method: PrecipTempMethod,
    pool: Option<rayon::ThreadPool>,
}

impl VaporPressureStage {
    pub fn new(
        cfg: &VaporPressureConfig,
        method: PrecipTempMethod,
        topo: Arc<Topography>,
        data: &StationData,
        axis: &TimeAxis,
    ) -> Result<Self> {
        let image = ImageData::initialize(
            "vapor_pressure",
            "vapor_pressure",
            Arc::clone(&topo),
            data,
            axis,
            &cfg.dist,
            BOUNDS,
        )?;
        let pool = if cfg.dew_point_nthreads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.dew_point_nthreads)
                .build()
                .map_err(|e| SmrfError::config(format!("dew point thread pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            image,
            topo,
            tolerance: cfg.dew_point_tolerance,
            method,
            pool,
        })
    }

    /// Dew point (°C) from vapor pressure (Pa), held below air temperature.
    fn dew_point(&self, vp: &Raster, ta: &Raster) -> Result<Raster> {
        let tol = self.tolerance;
        let solve = || -> Result<Vec<f64>> {
            vp.data
                .par_iter()
                .zip(ta.data.par_iter())
                .map(|(&e, &t)| {
                    let dpt = dew_point(e, tol)? - FREEZE;
                    Ok(if dpt >= t { t - DEW_POINT_OFFSET } else { dpt })
                })
                .collect()
        };
        let data = match &self.pool {
            Some(pool) => pool.install(solve)?,
            None => solve()?,
        };
        Raster::from_vec(vp.ny, vp.nx, data)
    }

    fn precip_temp(&self, ta: &Raster, dpt: &Raster) -> Result<Raster> {
        match self.method {
            PrecipTempMethod::DewPoint => Ok(dpt.clone()),
            PrecipTempMethod::AirTemp => Ok(ta.clone()),
            PrecipTempMethod::WetBulb => {
                let dem = &self.topo.dem;
                let data = (0..ta.len())
                    .into_par_iter()
                    .map(|i| {
                        let tw = wet_bulb(ta.data[i] + FREEZE, dpt.data[i] + FREEZE, wet_bulb_pressure(dem.data[i]))?;
                        Ok(tw - FREEZE)
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Raster::from_vec(ta.ny, ta.nx, data)
            }
        }
    }
}

impl Stage for VaporPressureStage {
    fn name(&self) -> &str {
        "vapor_pressure"
    }

    fn inputs(&self) -> Vec<String> {
        vec!["air_temp".to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        let mut names = self.image.field_names();
        names.extend(["dew_point".to_string(), "precip_temp".to_string()]);
        names
    }

    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
        let ta = inputs.raster("air_temp")?;
        let result = self.image.distribute_step(step)?;
        let dpt = self.dew_point(&result.field, ta)?;
        let tpp = self.precip_temp(ta, &dpt)?;
        debug!(step = step.index, dew_point_mean = dpt.mean(), "dew point solved");

        let mut out = Fields::new();
        self.image.publish(&mut out, result);
        out.insert("dew_point", Field::raster(dpt));
        out.insert("precip_temp", Field::raster(tpp));
        Ok(out)
    }
}
