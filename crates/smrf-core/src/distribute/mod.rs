//! Per-variable distributors and the stages that drive them.
//!
//! [`ImageData`] is the shared piece: the stations feeding one variable,
//! their observations aligned onto the run's time axis, the interpolation
//! kernel and the clamp bounds. Each variable's stage wraps one or more of
//! these with its own physics and state.

pub mod air_temp;
pub mod albedo;
pub mod cloud_factor;
pub mod precip;
pub mod soil_temp;
pub mod solar;
pub mod sun;
pub mod thermal;
pub mod vapor_pressure;
pub mod wind;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DistributionConfig;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Step};
use crate::spatial::{Kernel, KernelOutput};
use crate::stations::{StationData, StationSet};
use crate::time::TimeAxis;
use crate::topo::Topography;

pub use air_temp::AirTempStage;
pub use albedo::AlbedoStage;
pub use cloud_factor::CloudFactorStage;
pub use precip::PrecipStage;
pub use soil_temp::SoilTempStage;
pub use solar::SolarStage;
pub use sun::{IllumStage, SunAngleStage};
pub use thermal::ThermalStage;
pub use vapor_pressure::VaporPressureStage;
pub use wind::{Maxus, WindStage};

/// Stations, aligned observations, kernel and bounds for one variable.
pub struct ImageData {
    pub variable: String,
    pub stations: StationSet,
    pub min: f64,
    pub max: f64,
    kernel: Kernel,
    /// Observations per step, one value per station in `stations` order.
    pub(crate) rows: Vec<Vec<f64>>,
}

impl ImageData {
    /// Select the stations reporting `variable` (the table of the same name
    /// unless `table` says otherwise), align their observations onto `axis`
    /// and build the configured kernel.
    pub fn initialize(
        variable: &str,
        table: &str,
        topo: Arc<Topography>,
        data: &StationData,
        axis: &TimeAxis,
        cfg: &DistributionConfig,
        default_bounds: (f64, f64),
    ) -> Result<Self> {
        let obs = data.table(table)?;
        obs.check_window(table, axis)?;
        let stations = StationSet::select(variable, &topo, &data.metadata, obs, cfg.stations.as_deref())?;
        let rows = obs.aligned(&stations.ids, axis)?;
        let (min, max) = cfg.bounds(default_bounds.0, default_bounds.1);
        let kernel = Kernel::new(topo, &stations, cfg)?;
        debug!(variable, stations = stations.len(), min, max, "distributor initialized");
        Ok(Self {
            variable: variable.to_string(),
            stations,
            min,
            max,
            kernel,
            rows,
        })
    }

    /// Station values for a step.
    pub fn values(&self, step: &Step) -> Result<&[f64]> {
        self.rows
            .get(step.index)
            .map(Vec::as_slice)
            .ok_or_else(|| SmrfError::input(&self.variable, step.label(), "step lies beyond the observations"))
    }

    /// Whether the kernel also estimates a variance.
    pub fn has_variance(&self) -> bool {
        matches!(self.kernel, Kernel::Krige(_))
    }

    /// The published field names: the variable, plus its variance for
    /// kriging.
    pub fn field_names(&self) -> Vec<String> {
        let mut names = vec![self.variable.clone()];
        if self.has_variance() {
            names.push(variance_name(&self.variable));
        }
        names
    }

    /// Run the kernel and clamp to `[min, max]`.
    pub fn distribute(&mut self, values: &[f64]) -> Result<KernelOutput> {
        if values.iter().all(|v| v.is_nan()) {
            return Err(SmrfError::AllNaN {
                variable: self.variable.clone(),
                time: String::new(),
            });
        }
        let mut out = self.kernel.distribute(values)?;
        out.field.clamp_in_place(self.min, self.max);
        let nan = out.field.count_nan();
        if nan > 0 {
            warn!(variable = %self.variable, cells = nan, "distributed field has NaN cells");
        }
        Ok(out)
    }

    /// Distribute this step's observations.
    pub fn distribute_step(&mut self, step: &Step) -> Result<KernelOutput> {
        let values = self.values(step)?.to_vec();
        self.distribute(&values).map_err(|e| match e {
            SmrfError::AllNaN { variable, .. } => SmrfError::AllNaN {
                variable,
                time: step.label(),
            },
            other => other,
        })
    }

    /// Insert a kernel result under this variable's names.
    pub fn publish(&self, out: &mut Fields, result: KernelOutput) {
        out.insert(self.variable.clone(), Field::raster(result.field));
        if let Some(v) = result.variance {
            out.insert(variance_name(&self.variable), Field::raster(v));
        }
    }

    /// Values of `field` at each station pixel.
    pub fn at_stations(&self, field: &Raster) -> Vec<f64> {
        self.stations
            .yi
            .iter()
            .zip(&self.stations.xi)
            .map(|(&y, &x)| field.get(y, x))
            .collect()
    }
}

pub fn variance_name(variable: &str) -> String {
    format!("{variable}_variance")
}

/// Parse a config map keyed by vegetation class code.
pub(crate) fn class_map<T: Copy>(section: &str, map: &BTreeMap<String, T>) -> Result<BTreeMap<i64, T>> {
    map.iter()
        .map(|(k, &v)| {
            k.trim()
                .trim_start_matches("veg_")
                .parse::<i64>()
                .map(|code| (code, v))
                .map_err(|_| SmrfError::config(format!("{section} key {k} is not a vegetation class code")))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::stations::{ObservationTable, StationMetadata};
    use crate::topo::testing::tilted_basin;

    pub const STATIONS: [&str; 3] = ["RMESP", "RME_176", "BOGUS"];

    /// Three stations inside the 4×4 test basin.
    pub fn metadata() -> Vec<StationMetadata> {
        let at = |id: &str, x: f64, y: f64, z: f64| StationMetadata {
            primary_id: id.to_string(),
            latitude: 43.07,
            longitude: -116.75,
            utm_x: Some(x),
            utm_y: Some(y),
            elevation: z,
        };
        vec![
            at("RMESP", 520_050.0, 4_768_950.0, 2015.0),
            at("RME_176", 520_350.0, 4_768_650.0, 2030.0),
            at("BOGUS", 520_250.0, 4_768_850.0, 2025.0),
        ]
    }

    pub fn hourly(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|h| Utc.with_ymd_and_hms(1998, 1, 14, 15 + h as u32, 0, 0).unwrap())
            .collect()
    }

    pub fn axis(n: usize) -> TimeAxis {
        TimeAxis::from_config(
            "1998-01-14 15:00",
            &format!("1998-01-14 {}:00", 15 + n - 1),
            60,
            "UTC",
        )
        .unwrap()
    }

    /// One table per variable, `f(step, station)` valued.
    pub fn table(n: usize, f: impl Fn(usize, usize) -> f64) -> ObservationTable {
        let rows: BTreeMap<_, _> = hourly(n)
            .into_iter()
            .enumerate()
            .map(|(s, t)| (t, (0..STATIONS.len()).map(|k| f(s, k)).collect()))
            .collect();
        ObservationTable::new(STATIONS.iter().map(|s| s.to_string()).collect(), rows).unwrap()
    }

    /// A winter afternoon with a short snow storm in the middle.
    pub fn station_data(n: usize) -> StationData {
        let mut tables = BTreeMap::new();
        tables.insert("air_temp".to_string(), table(n, |s, k| -3.0 + 0.5 * k as f64 - 0.2 * s as f64));
        tables.insert("vapor_pressure".to_string(), table(n, |_, k| 400.0 + 10.0 * k as f64));
        tables.insert("wind_speed".to_string(), table(n, |s, k| 2.0 + s as f64 * 0.1 + k as f64));
        tables.insert("wind_direction".to_string(), table(n, |_, k| 250.0 + 10.0 * k as f64));
        tables.insert("cloud_factor".to_string(), table(n, |_, _| 0.6));
        tables.insert(
            "precip".to_string(),
            table(n, |s, k| if (1..=2).contains(&s) { 1.0 + 0.5 * k as f64 } else { 0.0 }),
        );
        StationData {
            metadata: metadata(),
            tables,
        }
    }

    pub fn topo() -> Arc<Topography> {
        Arc::new(tilted_basin(4, 4))
    }

    pub fn step(axis: &TimeAxis, index: usize) -> Step {
        Step {
            index,
            time: axis.steps[index],
            dt_days: axis.step_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn initialize_selects_and_aligns() {
        let data = station_data(4);
        let axis = axis(4);
        let img = ImageData::initialize(
            "air_temp",
            "air_temp",
            topo(),
            &data,
            &axis,
            &DistributionConfig::default(),
            (-73.0, 47.0),
        )
        .unwrap();
        assert_eq!(img.stations.ids, vec!["BOGUS", "RMESP", "RME_176"], "alphabetical");
        assert_eq!(img.rows.len(), 4);
        assert_eq!(img.values(&step(&axis, 0)).unwrap()[1], -3.0);
        assert_eq!((img.min, img.max), (-73.0, 47.0));
    }

    /// Distributed values are clamped to the configured bounds.
    #[test]
    fn distribute_clamps() {
        let data = station_data(2);
        let axis = axis(2);
        let cfg = DistributionConfig {
            max: Some(-2.8),
            ..DistributionConfig::default()
        };
        let mut img = ImageData::initialize("air_temp", "air_temp", topo(), &data, &axis, &cfg, (-73.0, 47.0)).unwrap();
        let out = img.distribute_step(&step(&axis, 0)).unwrap();
        assert!(out.field.data.iter().all(|&v| v <= -2.8), "{:?}", out.field.data);
        assert!(out.field.data.iter().any(|&v| v == -2.8));
    }

    #[test]
    fn all_nan_step_names_variable_and_time() {
        let mut data = station_data(2);
        data.tables.insert("air_temp".into(), table(2, |_, _| f64::NAN));
        let axis = axis(2);
        let mut img = ImageData::initialize(
            "air_temp",
            "air_temp",
            topo(),
            &data,
            &axis,
            &DistributionConfig::default(),
            (-73.0, 47.0),
        )
        .unwrap();
        match img.distribute_step(&step(&axis, 1)) {
            Err(SmrfError::AllNaN { variable, time }) => {
                assert_eq!(variable, "air_temp");
                assert!(time.starts_with("1998-01-14T16:00"), "{time}");
            }
            other => panic!("expected AllNaN, got {:?}", other.map(|o| o.field)),
        }
    }

    #[test]
    fn unknown_station_filter_is_input_error() {
        let data = station_data(2);
        let cfg = DistributionConfig {
            stations: Some(vec!["NOPE".into()]),
            ..DistributionConfig::default()
        };
        let err = ImageData::initialize("air_temp", "air_temp", topo(), &data, &axis(2), &cfg, (-73.0, 47.0))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "input");
    }
}
