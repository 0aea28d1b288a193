//! Precipitation (mm), its phase and new-snow density, and the per-pixel
//! storm state that albedo and solar depend on.
//!
//! Under `marks2017` the whole station record is split into storms once at
//! startup; precipitation between storms is removed and the in-storm values
//! rescaled to conserve each station's mass. The other density models track
//! storms per pixel from the accumulated snowfall instead.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{GaugeType, NasdeModel, PrecipConfig};
use crate::envphys::nasde::{phase_and_density, PhaseField};
use crate::envphys::storms::{self, Storm};
use crate::envphys::undercatch;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::stations::StationData;
use crate::time::{water_day, TimeAxis};
use crate::topo::Topography;

use super::ImageData;

pub const BOUNDS: (f64, f64) = (0.0, f64::INFINITY);

/// Storm totals are only distributed when some of the basin is this cold (°C).
const STORM_TEMPERATURE: f64 = 2.0;
/// Keeps the last storm strictly before the current water day.
const LAST_STORM_OFFSET: f64 = 0.001;

/// Station wind and air temperature used for gauge undercatch.
struct Undercatch {
    gauges: Vec<GaugeType>,
    /// Observed wind per step and station; NaN where the station has none.
    wind: Vec<Vec<f64>>,
    air_temp: Vec<Vec<f64>>,
}

pub struct PrecipStage {
    image: ImageData,
    model: NasdeModel,
    mass: f64,
    steps_to_end: usize,
    output_scalar: f64,
    mask: Raster,
    undercatch: Option<Undercatch>,
    storms: Vec<Storm>,
    storm_days: Raster,
    /// Storm accumulation: the distributed storm total under `marks2017`,
    /// the running snowfall otherwise.
    storm_total: Raster,
}

/// `series[step][station]` for `ids` from `table`, NaN for stations the
/// table does not carry.
fn station_series(data: &StationData, table: &str, ids: &[String], axis: &TimeAxis) -> Result<Vec<Vec<f64>>> {
    let Ok(obs) = data.table(table) else {
        return Ok(vec![vec![f64::NAN; ids.len()]; axis.len()]);
    };
    let present: Vec<String> = ids
        .iter()
        .filter(|id| obs.stations.iter().any(|s| s.eq_ignore_ascii_case(id)))
        .cloned()
        .collect();
    let aligned = obs.aligned(&present, axis)?;
    Ok(aligned
        .into_iter()
        .map(|row| {
            ids.iter()
                .map(|id| present.iter().position(|p| p == id).map_or(f64::NAN, |k| row[k]))
                .collect()
        })
        .collect())
}

impl PrecipStage {
    pub fn new(
        cfg: &PrecipConfig,
        topo: Arc<Topography>,
        data: &StationData,
        axis: &TimeAxis,
        storm_days_restart: Option<Raster>,
    ) -> Result<Self> {
        let (ny, nx) = (topo.ny(), topo.nx());
        let mut image = ImageData::initialize("precip", "precip", Arc::clone(&topo), data, axis, &cfg.dist, BOUNDS)?;
        if cfg.input_scalar_factor != 1.0 {
            for v in image.rows.iter_mut().flatten() {
                *v *= cfg.input_scalar_factor;
            }
        }

        let mut storms = Vec::new();
        if cfg.new_snow_density_model == NasdeModel::Marks2017 {
            storms = storms::tracking_by_station(&image.rows, cfg.storm_mass_threshold, cfg.time_steps_to_end_storms);
            image.rows = storms::clip_and_correct(&image.rows, &storms);
            if storms.is_empty() {
                warn!("no precipitation met the storm definition, none of it will be distributed");
            } else {
                info!(storms = storms.len(), "storms identified");
                for (i, s) in storms.iter().enumerate() {
                    debug!(storm = i, start = %axis.steps[s.start], end = %axis.steps[s.end], "storm");
                }
            }
        }

        let undercatch = if cfg.station_adjust_for_undercatch {
            let ids = &image.stations.ids;
            let gauges = ids
                .iter()
                .map(|id| {
                    cfg.station_gauge
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(id))
                        .map_or(cfg.gauge_default, |(_, &g)| g)
                })
                .collect();
            Some(Undercatch {
                gauges,
                wind: station_series(data, "wind_speed", ids, axis)?,
                air_temp: station_series(data, "air_temp", ids, axis)?,
            })
        } else {
            None
        };

        let storm_days = match storm_days_restart {
            Some(r) if r.shape() == (ny, nx) => {
                info!(mean = r.mean(), "storm days restarted");
                r
            }
            Some(r) => {
                return Err(SmrfError::config(format!(
                    "storm_days restart is {:?}, topography is {:?}",
                    r.shape(),
                    (ny, nx)
                )))
            }
            None => Raster::zeros(ny, nx),
        };

        info!(model = ?cfg.new_snow_density_model, "new snow density model");
        Ok(Self {
            image,
            model: cfg.new_snow_density_model,
            mass: cfg.storm_mass_threshold,
            steps_to_end: cfg.time_steps_to_end_storms,
            output_scalar: cfg.output_scalar_factor,
            mask: topo.mask.clone(),
            undercatch,
            storms,
            storm_days,
            storm_total: Raster::zeros(ny, nx),
        })
    }

    pub fn storms(&self) -> &[Storm] {
        &self.storms
    }

    /// Station values for the step, corrected for undercatch when
    /// configured. Stations without their own wind or temperature read the
    /// distributed field at their pixel.
    fn station_values(&self, step: &Step, inputs: &Fields) -> Result<Vec<f64>> {
        let mut values = self.image.values(step)?.to_vec();
        let Some(uc) = &self.undercatch else {
            return Ok(values);
        };
        let wind = self.image.at_stations(inputs.raster("wind_speed")?);
        let temp = self.image.at_stations(inputs.raster("air_temp")?);
        for (j, p) in values.iter_mut().enumerate() {
            let ws = uc.wind[step.index][j];
            let ta = uc.air_temp[step.index][j];
            let ws = if ws.is_nan() { wind[j] } else { ws };
            let ta = if ta.is_nan() { temp[j] } else { ta };
            *p = undercatch::adjust(*p, ws, ta, uc.gauges[j]);
        }
        Ok(values)
    }

    fn current_storm(&self, index: usize) -> Option<usize> {
        self.storms.iter().position(|s| s.contains(index))
    }

    /// Index of the storm in progress or most recently started.
    fn storm_id(&self, index: usize) -> f64 {
        self.storms
            .iter()
            .rposition(|s| s.start <= index)
            .map_or(f64::NAN, |i| i as f64)
    }

    fn distribute(&mut self, values: &[f64], step: &Step) -> Result<Raster> {
        let out = self.image.distribute(values).map_err(|e| e.at("precip", &step.label()))?;
        Ok(out.field)
    }

    fn step_marks2017(&mut self, step: &Step, values: &[f64], tpp: &Raster) -> Result<(Raster, PhaseField)> {
        let (ny, nx) = self.storm_days.shape();
        let zeros = || PhaseField {
            percent_snow: Raster::zeros(ny, nx),
            snow_density: Raster::zeros(ny, nx),
        };
        if nansum(values) <= 0.0 {
            storms::time_since_storm_pixel(&mut self.storm_days, &Raster::zeros(ny, nx), &Raster::zeros(ny, nx), false, step.dt_days, self.mass);
            return Ok((Raster::zeros(ny, nx), zeros()));
        }

        let storm = self.current_storm(step.index);
        let precip = self.distribute(values, step)?;
        let cold = tpp.min() < STORM_TEMPERATURE;

        if let Some(id) = storm {
            if step.index == self.storms[id].start && cold {
                debug!(storm = id, "distributing storm total");
                let total = self.storms[id].total.clone();
                self.storm_total = self.distribute(&total, step)?;
            }
        }

        let phase = if storm.is_some() && cold {
            phase_and_density(self.model, tpp, &precip)
        } else {
            zeros()
        };
        storms::time_since_storm_pixel(
            &mut self.storm_days,
            &precip,
            &phase.percent_snow,
            storm.is_some(),
            step.dt_days,
            self.mass,
        );
        Ok((precip, phase))
    }

    fn step_susong(&mut self, step: &Step, values: &[f64], tpp: &Raster) -> Result<(Raster, PhaseField)> {
        let (ny, nx) = self.storm_days.shape();
        if nansum(values) <= 0.0 {
            self.storm_days.data.iter_mut().for_each(|d| *d += step.dt_days);
            let zeros = PhaseField {
                percent_snow: Raster::zeros(ny, nx),
                snow_density: Raster::zeros(ny, nx),
            };
            return Ok((Raster::zeros(ny, nx), zeros));
        }
        let precip = self.distribute(values, step)?;
        let phase = phase_and_density(self.model, tpp, &precip);
        storms::time_since_storm(
            &mut self.storm_days,
            &mut self.storm_total,
            &precip,
            &phase.percent_snow,
            step.dt_days,
            self.mass,
            self.steps_to_end as f64 * step.dt_days,
        );
        Ok((precip, phase))
    }
}

fn nansum(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

impl Stage for PrecipStage {
    fn name(&self) -> &str {
        "precip"
    }

    fn inputs(&self) -> Vec<String> {
        let mut names = vec!["precip_temp".to_string()];
        if self.undercatch.is_some() {
            names.extend(["air_temp".to_string(), "wind_speed".to_string()]);
        }
        names
    }

    fn outputs(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            "precip",
            "percent_snow",
            "snow_density",
            "storm_days",
            "storm_total",
            "last_storm_day",
            "last_storm_day_basin",
        ]
        .map(String::from)
        .to_vec();
        if self.model == NasdeModel::Marks2017 {
            names.push("storm_id".to_string());
        }
        names
    }

    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
        let tpp = inputs.raster("precip_temp")?;
        let values = self.station_values(step, inputs)?;
        let (precip, phase) = match self.model {
            NasdeModel::Marks2017 => self.step_marks2017(step, &values, tpp)?,
            NasdeModel::Susong1999 | NasdeModel::PiecewiseSusong1999 => self.step_susong(step, &values, tpp)?,
        };

        let (wd, _) = water_day(&step.time);
        let last_storm_day = self.storm_days.map(|d| wd - d - LAST_STORM_OFFSET);
        let basin = last_storm_day.zip_map(&self.mask, |d, m| d * m).max();
        debug!(step = step.index, precip = precip.mean(), last_storm_day_basin = basin, "precip distributed");

        let mut out = Fields::new();
        out.insert("precip", Field::raster(precip.map(|p| p * self.output_scalar)));
        out.insert("percent_snow", Field::raster(phase.percent_snow));
        out.insert("snow_density", Field::raster(phase.snow_density));
        out.insert("storm_days", Field::raster(self.storm_days.clone()));
        out.insert("storm_total", Field::raster(self.storm_total.clone()));
        out.insert("last_storm_day", Field::raster(last_storm_day));
        out.insert("last_storm_day_basin", Field::Scalar(basin));
        if self.model == NasdeModel::Marks2017 {
            out.insert("storm_id", Field::Scalar(self.storm_id(step.index)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::*;
    use approx::assert_relative_eq;

    fn inputs(tpp: f64) -> Fields {
        let mut f = Fields::new();
        f.insert("precip_temp", Field::raster(Raster::filled(4, 4, tpp)));
        f.insert("air_temp", Field::raster(Raster::filled(4, 4, tpp)));
        f.insert("wind_speed", Field::raster(Raster::filled(4, 4, 4.0)));
        f
    }

    fn run(cfg: &PrecipConfig, n: usize, tpp: f64) -> Vec<Fields> {
        let axis = axis(n);
        let mut stage = PrecipStage::new(cfg, topo(), &station_data(n), &axis, None).unwrap();
        (0..n).map(|i| stage.step(&step(&axis, i), &inputs(tpp)).unwrap()).collect()
    }

    /// The test storm covers steps 1 and 2; snow resets storm days there.
    #[test]
    fn marks2017_cold_storm_resets_storm_days() {
        let out = run(&PrecipConfig::default(), 5, -4.0);
        assert_eq!(out[0].raster("precip").unwrap().sum(), 0.0);
        assert!(out[1].raster("precip").unwrap().min() > 0.0);
        assert!(out[1].raster("percent_snow").unwrap().data.iter().all(|&p| p == 1.0));
        assert!(out[2].raster("storm_days").unwrap().data.iter().all(|&d| d == 0.0));
        let dt = 1.0 / 24.0;
        assert_relative_eq!(out[4].raster("storm_days").unwrap().data[0], 2.0 * dt, epsilon = 1e-12);
        assert!(out[0].scalar("storm_id").unwrap().is_nan(), "no storm has started");
        assert_eq!(out[3].scalar("storm_id").unwrap(), 0.0);
        assert!(out[1].raster("storm_total").unwrap().min() > 0.0);
    }

    /// Warm storms carry no snow and leave storm days counting.
    #[test]
    fn marks2017_warm_storm_has_no_snow() {
        let out = run(&PrecipConfig::default(), 4, 5.0);
        assert_eq!(out[1].raster("percent_snow").unwrap().sum(), 0.0);
        assert_eq!(out[1].raster("snow_density").unwrap().sum(), 0.0);
        assert!(out[2].raster("storm_days").unwrap().min() > 0.0);
    }

    #[test]
    fn susong_tracks_accumulated_snowfall() {
        let cfg = PrecipConfig {
            new_snow_density_model: NasdeModel::Susong1999,
            ..PrecipConfig::default()
        };
        let out = run(&cfg, 4, -4.0);
        assert!(out[1].get("storm_id").is_none());
        let total = out[2].raster("storm_total").unwrap();
        assert!(total.min() > 0.0, "snowfall accumulates over the storm");
        assert!(out[2].raster("snow_density").unwrap().data.iter().all(|&d| d == 100.0));
    }

    #[test]
    fn output_scalar_doubles_precip() {
        let base = run(&PrecipConfig::default(), 3, -4.0);
        let cfg = PrecipConfig {
            output_scalar_factor: 2.0,
            ..PrecipConfig::default()
        };
        let doubled = run(&cfg, 3, -4.0);
        let (a, b) = (base[1].raster("precip").unwrap(), doubled[1].raster("precip").unwrap());
        for (x, y) in a.data.iter().zip(&b.data) {
            assert_relative_eq!(*y, 2.0 * x, epsilon = 1e-12);
        }
        assert_eq!(base[1].raster("storm_days").unwrap(), doubled[1].raster("storm_days").unwrap());
    }

    /// Undercatch scales the gauges up, so the distributed field grows.
    #[test]
    fn undercatch_increases_precip() {
        let base = run(&PrecipConfig::default(), 3, -4.0);
        let cfg = PrecipConfig {
            station_adjust_for_undercatch: true,
            ..PrecipConfig::default()
        };
        let axis = axis(3);
        let mut stage = PrecipStage::new(&cfg, topo(), &station_data(3), &axis, None).unwrap();
        assert_eq!(stage.inputs(), vec!["precip_temp", "air_temp", "wind_speed"]);
        stage.step(&step(&axis, 0), &inputs(-4.0)).unwrap();
        let adjusted = stage.step(&step(&axis, 1), &inputs(-4.0)).unwrap();
        assert!(adjusted.raster("precip").unwrap().sum() > base[1].raster("precip").unwrap().sum());
    }

    #[test]
    fn last_storm_day_follows_water_day() {
        let out = run(&PrecipConfig::default(), 2, -4.0);
        let axis = axis(2);
        let (wd, _) = water_day(&axis.steps[0]);
        let dt = 1.0 / 24.0;
        let lsd = out[0].raster("last_storm_day").unwrap();
        assert_relative_eq!(lsd.data[0], wd - dt - LAST_STORM_OFFSET, epsilon = 1e-9);
        assert_relative_eq!(out[0].scalar("last_storm_day_basin").unwrap(), lsd.max(), epsilon = 1e-12);
    }

    #[test]
    fn restart_shape_is_checked() {
        let axis = axis(2);
        let err = PrecipStage::new(&PrecipConfig::default(), topo(), &station_data(2), &axis, Some(Raster::zeros(2, 2)))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "config");
    }
}
