//! Wind speed (m/s) and direction (degrees from north).
//!
//! `interp` distributes the station speed and the unit direction components
//! directly. `winstral` first lapses each station to the speed it would see
//! on flat terrain using the maximum upwind slope (maxus) at the station,
//! distributes that flat wind, then lapses it back out to every cell with the
//! cell's own maxus for the distributed direction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{WindConfig, WindModel};
use crate::error::{Result, SmrfError};
use crate::raster::{clamp_value, Raster};
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::stations::StationData;
use crate::time::TimeAxis;
use crate::topo::Topography;

use super::{class_map, ImageData};

pub const BOUNDS: (f64, f64) = (0.447, 35.0);

/// Station maxus is capped to this magnitude (degrees).
const STATION_MAXUS_CAP: f64 = 35.0;
/// Cell maxus is capped to this magnitude (degrees).
const CELL_MAXUS_CAP: f64 = 32.0;
/// Converts the modelled 3 m wind to 5 m.
const HEIGHT_ADJUSTMENT: f64 = 1.07985;

// ── Maxus library ────────────────────────────────────────────────────────────

/// Maximum upwind slope per direction bin over the basin grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Maxus {
    /// Bin centers, degrees, evenly spaced from 0.
    pub direction: Vec<f64>,
    pub maxus: Vec<Raster>,
    /// Break-in-slope library, same shape as `maxus`, when provided.
    pub tbreak: Option<Vec<Raster>>,
}

/// On-disk maxus library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxusFile {
    pub direction: Vec<f64>,
    pub maxus: Vec<Vec<Vec<f64>>>,
    #[serde(default)]
    pub tbreak: Option<Vec<Vec<Vec<f64>>>>,
}

impl MaxusFile {
    /// Check the library against the DEM shape.
    pub fn into_maxus(self, ny: usize, nx: usize) -> Result<Maxus> {
        let layers = |name: &str, cube: Vec<Vec<Vec<f64>>>| -> Result<Vec<Raster>> {
            if cube.len() != self.direction.len() {
                return Err(SmrfError::config(format!(
                    "maxus {name} has {} layers for {} directions",
                    cube.len(),
                    self.direction.len()
                )));
            }
            cube.iter()
                .map(|layer| {
                    let r = Raster::from_rows(layer)?;
                    if r.shape() != (ny, nx) {
                        return Err(SmrfError::config(format!(
                            "maxus {name} layer is {:?}, topography is {:?}; the library must be built from the same DEM",
                            r.shape(),
                            (ny, nx)
                        )));
                    }
                    Ok(r)
                })
                .collect()
        };
        if self.direction.is_empty() {
            return Err(SmrfError::config("maxus library has no directions"));
        }
        let maxus = layers("maxus", self.maxus)?;
        let tbreak = self.tbreak.map(|t| layers("tbreak", t)).transpose()?;
        Ok(Maxus {
            direction: self.direction,
            maxus,
            tbreak,
        })
    }
}

impl Maxus {
    /// Width of one direction bin, degrees.
    pub fn bin_width(&self) -> f64 {
        360.0 / self.direction.len() as f64
    }

    /// Library layer for `dir`, or `None` for a missing direction or a bin
    /// the library does not carry.
    pub fn bin(&self, dir: f64) -> Option<usize> {
        if dir.is_nan() {
            return None;
        }
        let rounded = round_direction(dir, self.bin_width());
        self.direction.iter().position(|&d| (d - rounded).abs() < 1e-6)
    }
}

/// Snap a direction to the center of its bin in `[0, 360)`.
pub fn round_direction(dir: f64, step: f64) -> f64 {
    let mut r = ((dir - step / 2.0) / step).ceil() * step;
    if r < 0.0 {
        r += 360.0;
    }
    if r >= 360.0 || r == 0.0 {
        r = 0.0;
    }
    r
}

// ── Lapse ────────────────────────────────────────────────────────────────────

/// Winstral & Marks (2002) speed ratio between terrain with upwind slope
/// `m` degrees and flat terrain. Depends on `|m|` only.
pub fn wind_lapse_exponent(m: f64) -> f64 {
    let c = m.abs();
    if c >= 30.0 {
        4.21
    } else if c >= 21.3 {
        1.756507 - 0.1678945 * c + 0.01927844 * c.powi(2) - 0.0003651592 * c.powi(3)
    } else {
        1.0 + 0.1031717 * c - 0.008003561 * c.powi(2) + 0.0003996581 * c.powi(3)
    }
}

/// Speed a station with maxus `m` would measure on flat terrain.
pub fn flat_wind(speed: f64, m: f64) -> f64 {
    let e = wind_lapse_exponent(m);
    if m > 0.0 {
        speed * e
    } else {
        speed / e
    }
}

/// Speed at a cell with maxus `m` given the flat wind. Exposed cells
/// (`m < 0`) are additionally scaled by `reduction`.
pub fn cell_wind(flat: f64, m: f64, reduction: f64) -> f64 {
    let e = wind_lapse_exponent(m);
    if m < 0.0 {
        reduction * flat * e
    } else {
        flat / e
    }
}

/// Direction (degrees, `[0, 360)`) from unit components.
pub fn direction(u: f64, v: f64) -> f64 {
    let az = u.atan2(v).to_degrees();
    if az < 0.0 {
        az + 360.0
    } else if az >= 360.0 {
        az - 360.0
    } else {
        az
    }
}

// ── Stage ────────────────────────────────────────────────────────────────────

struct Winstral {
    maxus: Arc<Maxus>,
    /// Measured speeds, which overwrite the station pixels.
    observed: Vec<Vec<f64>>,
    reduction: f64,
    /// Vegetation maxus offset per cell.
    veg_offset: Vec<f64>,
}

pub struct WindStage {
    /// Measured speed for `interp`, flat wind for `winstral`.
    speed: ImageData,
    u: ImageData,
    v: ImageData,
    winstral: Option<Winstral>,
}

impl WindStage {
    pub fn new(
        cfg: &WindConfig,
        topo: Arc<Topography>,
        data: &StationData,
        axis: &TimeAxis,
        maxus: Option<Arc<Maxus>>,
    ) -> Result<Self> {
        let components = |name: &str, f: fn(f64) -> f64| -> Result<ImageData> {
            let mut img = ImageData::initialize(name, "wind_direction", Arc::clone(&topo), data, axis, &cfg.dist, (-1.0, 1.0))?;
            img.min = -1.0;
            img.max = 1.0;
            for row in &mut img.rows {
                row.iter_mut().for_each(|d| *d = f(d.to_radians()));
            }
            Ok(img)
        };
        let u = components("wind_u", f64::sin)?;
        let v = components("wind_v", f64::cos)?;

        match cfg.wind_model {
            WindModel::Interp => {
                let speed = ImageData::initialize("wind_speed", "wind_speed", Arc::clone(&topo), data, axis, &cfg.dist, BOUNDS)?;
                Ok(Self {
                    speed,
                    u,
                    v,
                    winstral: None,
                })
            }
            WindModel::Winstral => {
                let maxus = maxus.ok_or_else(|| SmrfError::config("wind.winstral needs a maxus library (inputs.maxus)"))?;
                let mut speed = ImageData::initialize("flatwind", "wind_speed", Arc::clone(&topo), data, axis, &cfg.dist, BOUNDS)?;
                let directions = data.table("wind_direction")?.aligned(&speed.stations.ids, axis)?;
                let observed = speed.rows.clone();
                speed.rows = station_flat_wind(cfg, &speed, &maxus, &observed, &directions);
                let veg_offset = veg_offsets(cfg, &topo.veg_type)?;
                debug!(bins = maxus.direction.len(), "winstral wind initialized");
                Ok(Self {
                    speed,
                    u,
                    v,
                    winstral: Some(Winstral {
                        maxus,
                        observed,
                        reduction: cfg.reduction_factor,
                        veg_offset,
                    }),
                })
            }
            WindModel::WindNinja => Err(SmrfError::config(
                "wind.wind_model wind_ninja needs the external WindNinja adapter",
            )),
        }
    }
}

/// Per-station flat wind for every step.
fn station_flat_wind(
    cfg: &WindConfig,
    img: &ImageData,
    maxus: &Maxus,
    speeds: &[Vec<f64>],
    directions: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let enhancement: Vec<f64> = img
        .stations
        .ids
        .iter()
        .map(|id| {
            cfg.station_enhancement
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(id))
                .map_or(cfg.station_default, |(_, &e)| e)
        })
        .collect();
    let peak: Vec<bool> = img
        .stations
        .ids
        .iter()
        .map(|id| cfg.station_peak.iter().any(|p| p.eq_ignore_ascii_case(id)))
        .collect();

    speeds
        .iter()
        .zip(directions)
        .map(|(speed, dir)| {
            (0..speed.len())
                .map(|j| {
                    let (yi, xi) = (img.stations.yi[j], img.stations.xi[j]);
                    let raw = if dir[j].is_nan() {
                        return f64::NAN;
                    } else if peak[j] {
                        maxus
                            .maxus
                            .iter()
                            .map(|layer| layer.get(yi, xi))
                            .fold(f64::INFINITY, f64::min)
                    } else {
                        match maxus.bin(dir[j]) {
                            Some(k) => maxus.maxus[k].get(yi, xi),
                            None => return f64::NAN,
                        }
                    };
                    flat_wind(speed[j], station_maxus(raw, enhancement[j]))
                })
                .collect()
        })
        .collect()
}

fn veg_offsets(cfg: &WindConfig, veg_type: &[i64]) -> Result<Vec<f64>> {
    let classes = class_map("wind.veg", &cfg.veg)?;
    Ok(veg_type
        .iter()
        .map(|code| classes.get(code).copied().unwrap_or(cfg.veg_default))
        .collect())
}

impl Winstral {
    /// Cell wind from the distributed flat wind and direction. Returns the
    /// speed, the cell maxus and the rounded direction.
    fn simulate(&self, step: &Step, speed_img: &ImageData, flat: &Raster, az: &Raster) -> Result<(Raster, Raster, Raster)> {
        let width = self.maxus.bin_width();
        let mut dir_round = Raster::zeros(az.ny, az.nx);
        let mut cellmaxus = Raster::zeros(az.ny, az.nx);
        let mut wind = Raster::zeros(az.ny, az.nx);
        for i in 0..az.len() {
            dir_round.data[i] = round_direction(az.data[i], width);
            let m = match self.maxus.bin(az.data[i]) {
                Some(k) => (self.maxus.maxus[k].data[i] + self.veg_offset[i]).clamp(-CELL_MAXUS_CAP, CELL_MAXUS_CAP),
                None => f64::NAN,
            };
            cellmaxus.data[i] = m;
            wind.data[i] = cell_wind(flat.data[i], m, self.reduction) * HEIGHT_ADJUSTMENT;
        }

        let observed = self
            .observed
            .get(step.index)
            .ok_or_else(|| SmrfError::input("wind_speed", step.label(), "step lies beyond the observations"))?;
        for (j, &s) in observed.iter().enumerate() {
            if !s.is_nan() {
                wind.set(speed_img.stations.yi[j], speed_img.stations.xi[j], s);
            }
        }
        let filled = wind.fill_nan_linear();
        if filled > 0 {
            debug!(cells = filled, "filled NaN wind cells");
        }
        if wind.count_nan() > 0 {
            warn!(time = %step.label(), "wind speed is NaN everywhere");
        }
        wind.clamp_in_place(speed_img.min, speed_img.max);
        Ok((wind, cellmaxus, dir_round))
    }
}

impl Stage for WindStage {
    fn name(&self) -> &str {
        "wind"
    }

    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<String> {
        let mut names = vec!["wind_speed".to_string(), "wind_direction".to_string()];
        if self.winstral.is_some() {
            names.extend(["flatwind", "cellmaxus", "dir_round_cell"].map(String::from));
        }
        names
    }

    fn step(&mut self, step: &Step, _inputs: &Fields) -> Result<Fields> {
        let speed = self.speed.distribute_step(step)?.field;
        let u = self.u.distribute_step(step)?.field;
        let v = self.v.distribute_step(step)?.field;
        let az = u.zip_map(&v, direction);

        let mut out = Fields::new();
        match &self.winstral {
            None => {
                out.insert("wind_speed", Field::raster(speed));
            }
            Some(w) => {
                let (wind, cellmaxus, dir_round) = w.simulate(step, &self.speed, &speed, &az)?;
                out.insert("wind_speed", Field::raster(wind));
                out.insert("flatwind", Field::raster(speed));
                out.insert("cellmaxus", Field::raster(cellmaxus));
                out.insert("dir_round_cell", Field::raster(dir_round));
            }
        }
        out.insert("wind_direction", Field::raster(az));
        Ok(out)
    }
}

/// Station maxus after enhancement, capped.
pub fn station_maxus(raw: f64, enhancement: f64) -> f64 {
    clamp_value(raw + enhancement, -STATION_MAXUS_CAP, STATION_MAXUS_CAP)
}
