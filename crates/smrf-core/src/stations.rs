//! Station metadata, per-variable observation tables and station selection.
//!
//! Observation tables are keyed by UTC instant with one column per station.
//! Gridded sources are flattened into the same shape, one pseudo-station per
//! model cell inside the basin bounding box.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SmrfError};
use crate::time::{parse_local, TimeAxis};
use crate::topo::Topography;

/// Degrees added around the basin when selecting gridded cells.
pub const GRID_BUFFER_DEG: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub primary_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Blank in the source means derive from latitude/longitude.
    pub utm_x: Option<f64>,
    pub utm_y: Option<f64>,
    pub elevation: f64,
}

/// One variable's observations: rows are instants, columns are stations.
#[derive(Debug, Clone, Default)]
pub struct ObservationTable {
    pub stations: Vec<String>,
    pub times: Vec<DateTime<Utc>>,
    pub rows: Vec<Vec<f64>>,
    /// Fill axis steps that fall between observations linearly.
    pub interpolate: bool,
    /// Replacement for a row whose every value is NaN.
    pub all_nan_fill: Option<f64>,
}

impl ObservationTable {
    /// Build from unordered rows, upper-casing the station IDs.
    pub fn new(stations: Vec<String>, rows: BTreeMap<DateTime<Utc>, Vec<f64>>) -> Result<Self> {
        let n = stations.len();
        if let Some((t, _)) = rows.iter().find(|(_, r)| r.len() != n) {
            return Err(SmrfError::Parse(format!("row at {t} does not have {n} values")));
        }
        let (times, rows) = rows.into_iter().unzip();
        Ok(Self {
            stations: stations.into_iter().map(|s| s.trim().to_uppercase()).collect(),
            times,
            rows,
            interpolate: false,
            all_nan_fill: None,
        })
    }

    fn column_of(&self, id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s == id)
    }

    /// Values for `ids` on every step of `axis`. Steps without a row are NaN
    /// unless the table interpolates.
    pub fn aligned(&self, ids: &[String], axis: &TimeAxis) -> Result<Vec<Vec<f64>>> {
        let cols: Vec<usize> = ids
            .iter()
            .map(|id| {
                self.column_of(id)
                    .ok_or_else(|| SmrfError::config(format!("station {id} not in observation table")))
            })
            .collect::<Result<_>>()?;

        let mut out = Vec::with_capacity(axis.len());
        for i in 0..axis.len() {
            let t = axis.utc(i);
            let row = match self.times.binary_search(&t) {
                Ok(k) => cols.iter().map(|&c| self.rows[k][c]).collect(),
                Err(k) if self.interpolate && k > 0 && k < self.times.len() => {
                    let (t0, t1) = (self.times[k - 1], self.times[k]);
                    let f = (t - t0).num_seconds() as f64 / (t1 - t0).num_seconds() as f64;
                    cols.iter()
                        .map(|&c| {
                            let (a, b) = (self.rows[k - 1][c], self.rows[k][c]);
                            a + f * (b - a)
                        })
                        .collect()
                }
                Err(_) => vec![f64::NAN; cols.len()],
            };
            out.push(row);
        }

        if let Some(fill) = self.all_nan_fill {
            for row in out.iter_mut().filter(|r| r.iter().all(|v| v.is_nan())) {
                row.iter_mut().for_each(|v| *v = fill);
            }
        }
        Ok(out)
    }

    /// Fail when the run window is not covered by the table.
    pub fn check_window(&self, variable: &str, axis: &TimeAxis) -> Result<()> {
        let (Some(first), Some(last)) = (self.times.first(), self.times.last()) else {
            return Err(SmrfError::input(variable, "-", "observation table is empty"));
        };
        if axis.is_empty() {
            return Ok(());
        }
        let (start, end) = (axis.utc(0), axis.utc(axis.len() - 1));
        if start < *first || end > *last {
            return Err(SmrfError::input(
                variable,
                start.to_rfc3339(),
                format!("run window {start}..{end} lies outside observations {first}..{last}"),
            ));
        }
        Ok(())
    }
}

/// All observation tables plus the shared metadata.
#[derive(Debug, Clone, Default)]
pub struct StationData {
    pub metadata: Vec<StationMetadata>,
    pub tables: BTreeMap<String, ObservationTable>,
}

impl StationData {
    pub fn table(&self, variable: &str) -> Result<&ObservationTable> {
        self.tables
            .get(variable)
            .ok_or_else(|| SmrfError::input(variable, "-", "no observations loaded"))
    }
}

/// The stations feeding one variable, in alphabetical order.
#[derive(Debug, Clone, Default)]
pub struct StationSet {
    pub ids: Vec<String>,
    pub mx: Vec<f64>,
    pub my: Vec<f64>,
    pub mz: Vec<f64>,
    pub xi: Vec<usize>,
    pub yi: Vec<usize>,
}

impl StationSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Stations present in both metadata and `table`, restricted to
    /// `filter` when given.
    pub fn select(
        variable: &str,
        topo: &Topography,
        metadata: &[StationMetadata],
        table: &ObservationTable,
        filter: Option<&[String]>,
    ) -> Result<Self> {
        let filter: Option<Vec<String>> = filter.map(|f| f.iter().map(|s| s.to_uppercase()).collect());
        let mut chosen: Vec<&StationMetadata> = metadata
            .iter()
            .filter(|m| table.stations.iter().any(|s| s.eq_ignore_ascii_case(&m.primary_id)))
            .filter(|m| {
                filter
                    .as_ref()
                    .map_or(true, |f| f.iter().any(|s| s.eq_ignore_ascii_case(&m.primary_id)))
            })
            .collect();
        chosen.sort_by_key(|m| m.primary_id.to_uppercase());
        chosen.dedup_by(|a, b| a.primary_id.eq_ignore_ascii_case(&b.primary_id));

        if chosen.is_empty() {
            return Err(SmrfError::input(variable, "-", "no stations left after filtering"));
        }

        let mut set = StationSet::default();
        for m in chosen {
            let (x, y) = match (m.utm_x, m.utm_y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => (x, y),
                _ => topo.to_utm(m.latitude, m.longitude),
            };
            let (xi, yi) = topo.nearest_pixel(x, y);
            // Tables are upper-cased, so match their spelling.
            let id = table
                .stations
                .iter()
                .find(|s| s.eq_ignore_ascii_case(&m.primary_id))
                .cloned()
                .unwrap_or_else(|| m.primary_id.to_uppercase());
            set.ids.push(id);
            set.mx.push(x);
            set.my.push(y);
            set.mz.push(m.elevation);
            set.xi.push(xi);
            set.yi.push(yi);
        }
        debug!(variable, stations = set.len(), "stations selected");
        Ok(set)
    }
}

// ── Gridded sources ──────────────────────────────────────────────────────────

/// A gridded weather product flattened to pseudo-stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GriddedSource {
    pub latitude: Vec<Vec<f64>>,
    pub longitude: Vec<Vec<f64>>,
    pub elevation: Vec<Vec<f64>>,
    pub time: Vec<String>,
    /// `variable -> [time][row][col]`.
    pub variables: BTreeMap<String, Vec<Vec<Vec<f64>>>>,
}

impl GriddedSource {
    /// Keep the cells inside the basin bounding box plus a buffer and turn
    /// each into a station named `grid_y<i>_x<j>`.
    pub fn into_station_data(self, topo: &Topography, tz: Tz) -> Result<StationData> {
        let ny = self.latitude.len();
        let nx = self.latitude.first().map_or(0, Vec::len);
        for (name, g) in [("longitude", &self.longitude), ("elevation", &self.elevation)] {
            if g.len() != ny || g.iter().any(|r| r.len() != nx) {
                return Err(SmrfError::config(format!("gridded {name} does not match latitude grid")));
            }
        }

        let (lat0, lon0, lat1, lon1) = topo.latlon_bounds();
        let (lat0, lon0) = (lat0 - GRID_BUFFER_DEG, lon0 - GRID_BUFFER_DEG);
        let (lat1, lon1) = (lat1 + GRID_BUFFER_DEG, lon1 + GRID_BUFFER_DEG);

        let mut cells = Vec::new();
        let mut metadata = Vec::new();
        for i in 0..ny {
            for j in 0..nx {
                let (lat, lon) = (self.latitude[i][j], self.longitude[i][j]);
                if lat >= lat0 && lat <= lat1 && lon >= lon0 && lon <= lon1 {
                    let (x, y) = topo.to_utm(lat, lon);
                    metadata.push(StationMetadata {
                        primary_id: format!("grid_y{i}_x{j}"),
                        latitude: lat,
                        longitude: lon,
                        utm_x: Some(x),
                        utm_y: Some(y),
                        elevation: self.elevation[i][j],
                    });
                    cells.push((i, j));
                }
            }
        }
        if cells.is_empty() {
            return Err(SmrfError::input("gridded", "-", "no grid cells inside the basin bounding box"));
        }
        debug!(cells = cells.len(), "gridded cells kept");

        let times: Vec<DateTime<Utc>> = self
            .time
            .iter()
            .map(|s| parse_local(s, tz).map(|t| t.with_timezone(&Utc)))
            .collect::<Result<_>>()?;

        let ids: Vec<String> = metadata.iter().map(|m| m.primary_id.clone()).collect();
        let mut tables = BTreeMap::new();
        for (variable, cube) in self.variables {
            if cube.len() != times.len() {
                return Err(SmrfError::config(format!(
                    "gridded {variable} has {} steps, time vector has {}",
                    cube.len(),
                    times.len()
                )));
            }
            let mut rows = BTreeMap::new();
            for (t, grid) in times.iter().zip(&cube) {
                let row = cells
                    .iter()
                    .map(|&(i, j)| grid.get(i).and_then(|r| r.get(j)).copied().unwrap_or(f64::NAN))
                    .collect();
                rows.insert(*t, row);
            }
            let mut table = ObservationTable::new(ids.clone(), rows)?;
            // Pseudo-station names stay lower case.
            table.stations = ids.clone();
            table.interpolate = true;
            if variable == "cloud_factor" {
                table.all_nan_fill = Some(1.0);
            }
            if table.rows.iter().all(|r| r.iter().all(|v| v.is_nan())) {
                warn!(variable, "gridded variable has no finite values");
            }
            tables.insert(variable, table);
        }

        Ok(StationData { metadata, tables })
    }
}
