//! Readers for the run inputs named in the configuration's `inputs`
//! section. Station files are CSV with a header row; everything else is JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use csv::{StringRecord, Trim};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use smrf_core::distribute::wind::MaxusFile;
use smrf_core::distribute::Maxus;
use smrf_core::stations::{GriddedSource, ObservationTable, StationData, StationMetadata};
use smrf_core::time::parse_local;
use smrf_core::topo::{TopoFile, Topography};
use smrf_core::{ModelInputs, Raster, SmrfConfig};

/// Paths in the configuration are relative to the configuration file.
pub struct Loader {
    base: PathBuf,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(text.as_bytes())
}

fn parse_value(cell: &str) -> Result<f64> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().with_context(|| format!("not a number: {cell:?}"))
}

fn parse_optional(cell: &str) -> Result<Option<f64>> {
    let v = parse_value(cell)?;
    Ok((!v.is_nan()).then_some(v))
}

fn resolve_column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .with_context(|| format!("metadata has no {name} column"))
}

/// Station observations: a timestamp column, then one column per station.
pub fn parse_observations(text: &str) -> Result<ObservationTable> {
    let mut reader = csv_reader(text);
    let headers = reader.headers().context("reading header")?.clone();
    if headers.is_empty() {
        bail!("empty station file");
    }
    let stations: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut rows: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for (n, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("row {}", n + 2))?;
        let stamp = record.get(0).unwrap_or("");
        let time = parse_local(stamp, chrono_tz::UTC)
            .with_context(|| format!("row {}: bad timestamp {stamp:?}", n + 2))?
            .with_timezone(&Utc);
        let values = record
            .iter()
            .skip(1)
            .map(parse_value)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("row {}", n + 2))?;
        rows.insert(time, values);
    }
    Ok(ObservationTable::new(stations, rows)?)
}

/// Station metadata, columns located by header name.
pub fn parse_metadata(text: &str) -> Result<Vec<StationMetadata>> {
    let mut reader = csv_reader(text);
    let headers = reader.headers().context("reading header")?.clone();
    let (id, lat, lon, x, y, z) = (
        resolve_column(&headers, "primary_id")?,
        resolve_column(&headers, "latitude")?,
        resolve_column(&headers, "longitude")?,
        resolve_column(&headers, "utm_x").ok(),
        resolve_column(&headers, "utm_y").ok(),
        resolve_column(&headers, "elevation")?,
    );

    reader
        .records()
        .enumerate()
        .map(|(n, record)| {
            let row = || -> Result<StationMetadata> {
                let record = record?;
                let get = |i: usize| record.get(i).unwrap_or("");
                let optional = |i: Option<usize>| i.map_or(Ok(None), |i| parse_optional(get(i)));
                Ok(StationMetadata {
                    primary_id: get(id).to_uppercase(),
                    latitude: parse_value(get(lat))?,
                    longitude: parse_value(get(lon))?,
                    utm_x: optional(x)?,
                    utm_y: optional(y)?,
                    elevation: parse_value(get(z))?,
                })
            };
            row().with_context(|| format!("metadata row {}", n + 2))
        })
        .collect()
}

impl Loader {
    pub fn new(config_path: &Path) -> Self {
        let base = config_path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self { base }
    }

    pub fn path(&self, p: &str) -> PathBuf {
        self.base.join(p)
    }

    pub fn topo(&self, cfg: &SmrfConfig) -> Result<Topography> {
        let path = cfg.inputs.topo.as_deref().context("inputs.topo is required")?;
        let file: TopoFile = read_json(&self.path(path))?;
        let topo = file.into_topography()?;
        info!(ny = topo.ny(), nx = topo.nx(), dx = topo.dx, "topography loaded");
        Ok(topo)
    }

    pub fn stations(&self, cfg: &SmrfConfig, topo: &Topography, tz: Tz) -> Result<StationData> {
        if let Some(path) = &cfg.inputs.gridded {
            let source: GriddedSource = read_json(&self.path(path))?;
            let data = source.into_station_data(topo, tz)?;
            info!(cells = data.metadata.len(), "gridded source loaded");
            return Ok(data);
        }

        let meta_path = cfg
            .inputs
            .metadata
            .as_deref()
            .context("inputs.metadata is required for station CSVs")?;
        let meta_path = self.path(meta_path);
        let text = fs::read_to_string(&meta_path).with_context(|| format!("reading {}", meta_path.display()))?;
        let metadata = parse_metadata(&text).with_context(|| format!("parsing {}", meta_path.display()))?;

        let mut tables = BTreeMap::new();
        for (variable, file) in &cfg.inputs.csv {
            let path = self.path(file);
            let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let table = parse_observations(&text).with_context(|| format!("parsing {}", path.display()))?;
            debug!(variable, stations = table.stations.len(), rows = table.rows.len(), "station csv loaded");
            tables.insert(variable.clone(), table);
        }
        if tables.is_empty() {
            bail!("no station input: set inputs.csv or inputs.gridded");
        }
        info!(stations = metadata.len(), variables = tables.len(), "station data loaded");
        Ok(StationData { metadata, tables })
    }

    pub fn maxus(&self, cfg: &SmrfConfig, topo: &Topography) -> Result<Option<Maxus>> {
        let Some(path) = &cfg.inputs.maxus else {
            return Ok(None);
        };
        let file: MaxusFile = read_json(&self.path(path))?;
        let maxus = file.into_maxus(topo.ny(), topo.nx())?;
        info!(directions = maxus.direction.len(), "maxus library loaded");
        Ok(Some(maxus))
    }

    /// `[ny][nx]` storm days to resume from.
    pub fn restart(&self, cfg: &SmrfConfig) -> Result<Option<Raster>> {
        let Some(path) = &cfg.inputs.storm_days_restart else {
            return Ok(None);
        };
        let rows: Vec<Vec<f64>> = read_json(&self.path(path))?;
        Ok(Some(Raster::from_rows(&rows)?))
    }

    pub fn inputs(&self, cfg: &SmrfConfig) -> Result<ModelInputs> {
        let tz = cfg.time_axis()?.tz;
        let topo = self.topo(cfg)?;
        let stations = self.stations(cfg, &topo, tz)?;
        let maxus = self.maxus(cfg, &topo)?;
        let storm_days_restart = self.restart(cfg)?;
        Ok(ModelInputs {
            topo,
            stations,
            maxus,
            storm_days_restart,
        })
    }
}
