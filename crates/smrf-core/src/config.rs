//! Run configuration: one JSON document, one section per variable.
//!
//! Every section is `#[serde(default)]`, so a minimal file only needs the
//! time window and the input locations. `validate` turns the remaining
//! semantic checks into `Config` errors before any stage is built.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmrfError};
use crate::time::{parse_local, parse_tz, TimeAxis};

// ── Enumerated options ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    #[default]
    Idw,
    Dk,
    Grid,
    #[serde(alias = "krige")]
    Kriging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMethod {
    #[default]
    Linear,
    Cubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariogramKind {
    #[default]
    Linear,
    Power,
    Gaussian,
    Spherical,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatesType {
    #[default]
    Euclidean,
    Geographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecipTempMethod {
    #[default]
    DewPoint,
    WetBulb,
    AirTemp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NasdeModel {
    Susong1999,
    PiecewiseSusong1999,
    #[default]
    Marks2017,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GaugeType {
    #[serde(rename = "us_nws_8_shielded")]
    UsNws8Shielded,
    #[default]
    #[serde(rename = "us_nws_8_unshielded")]
    UsNws8Unshielded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindModel {
    #[default]
    Interp,
    Winstral,
    WindNinja,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayMethod {
    #[default]
    None,
    DateMethod,
    Hardy2000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearSkyMethod {
    #[default]
    Marks1979,
    Dilley1998,
    Prata1996,
    Angstrom1918,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudMethod {
    #[default]
    Garen2005,
    Unsworth1975,
    Kimball1982,
    Crawford1999,
}

// ── Shared distribution keys ─────────────────────────────────────────────────

/// Keys common to every station-driven variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub distribution: DistributionMethod,
    pub detrend: bool,
    /// Required sign of the elevation slope: -1, 0 (any) or +1.
    pub detrend_slope: i32,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Restrict to these station IDs.
    pub stations: Option<Vec<String>>,
    pub idw_power: f64,
    pub dk_ncores: usize,
    pub grid_method: GridMethod,
    pub grid_mask: bool,
    pub grid_local: bool,
    pub grid_local_n: usize,
    pub krig_variogram_model: VariogramKind,
    pub krig_nlags: usize,
    pub krig_weight: bool,
    pub krig_anisotropy_scaling: f64,
    pub krig_anisotropy_angle: f64,
    pub krig_coordinates_type: CoordinatesType,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            distribution: DistributionMethod::Idw,
            detrend: true,
            detrend_slope: 0,
            min: None,
            max: None,
            stations: None,
            idw_power: 2.0,
            dk_ncores: 1,
            grid_method: GridMethod::Linear,
            grid_mask: false,
            grid_local: false,
            grid_local_n: 25,
            krig_variogram_model: VariogramKind::Linear,
            krig_nlags: 6,
            krig_weight: false,
            krig_anisotropy_scaling: 1.0,
            krig_anisotropy_angle: 0.0,
            krig_coordinates_type: CoordinatesType::Euclidean,
        }
    }
}

impl DistributionConfig {
    /// Configured bounds, falling back to the variable's defaults.
    pub fn bounds(&self, min: f64, max: f64) -> (f64, f64) {
        (self.min.unwrap_or(min), self.max.unwrap_or(max))
    }

    fn validate(&self, section: &str) -> Result<()> {
        if ![-1, 0, 1].contains(&self.detrend_slope) {
            return Err(SmrfError::config(format!(
                "{section}.detrend_slope must be -1, 0 or 1, got {}",
                self.detrend_slope
            )));
        }
        if self.idw_power <= 0.0 {
            return Err(SmrfError::config(format!("{section}.idw_power must be positive")));
        }
        if self.grid_local && self.grid_local_n < 2 {
            return Err(SmrfError::config(format!("{section}.grid_local_n must be at least 2")));
        }
        if self.krig_nlags == 0 {
            return Err(SmrfError::config(format!("{section}.krig_nlags must be positive")));
        }
        if self.krig_anisotropy_scaling <= 0.0 {
            return Err(SmrfError::config(format!("{section}.krig_anisotropy_scaling must be positive")));
        }
        if self.distribution == DistributionMethod::Kriging
            && self.krig_coordinates_type == CoordinatesType::Geographic
        {
            return Err(SmrfError::config(format!(
                "{section}.krig_coordinates_type geographic is not supported, stations are in UTM"
            )));
        }
        if let (Some(lo), Some(hi)) = (self.min, self.max) {
            if lo > hi {
                return Err(SmrfError::config(format!("{section}.min exceeds {section}.max")));
            }
        }
        Ok(())
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub start_date: String,
    pub end_date: String,
    /// Minutes.
    pub time_step: i64,
    pub time_zone: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start_date: String::new(),
            end_date: String::new(),
            time_step: 60,
            time_zone: "UTC".to_string(),
        }
    }
}

/// Input locations, read by the command-line front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub topo: Option<String>,
    pub metadata: Option<String>,
    /// `variable -> csv path`.
    pub csv: BTreeMap<String, String>,
    pub gridded: Option<String>,
    pub maxus: Option<String>,
    pub storm_days_restart: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirTempConfig {
    #[serde(flatten)]
    pub dist: DistributionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaporPressureConfig {
    #[serde(flatten)]
    pub dist: DistributionConfig,
    pub dew_point_tolerance: f64,
    /// Thread-count hint for the dew-point solve.
    pub dew_point_nthreads: usize,
}

impl Default for VaporPressureConfig {
    fn default() -> Self {
        Self {
            dist: DistributionConfig::default(),
            dew_point_tolerance: 0.01,
            dew_point_nthreads: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudFactorConfig {
    #[serde(flatten)]
    pub dist: DistributionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilTempConfig {
    pub temp: f64,
}

impl Default for SoilTempConfig {
    fn default() -> Self {
        Self { temp: -2.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindConfig {
    #[serde(flatten)]
    pub dist: DistributionConfig,
    pub wind_model: WindModel,
    pub reduction_factor: f64,
    /// Maxus enhancement for stations without their own entry.
    pub station_default: f64,
    /// Per-station maxus enhancement.
    pub station_enhancement: BTreeMap<String, f64>,
    /// Stations on ridges, which take the minimum maxus over all directions.
    pub station_peak: Vec<String>,
    pub veg_default: f64,
    /// Per vegetation class maxus offset, keyed by class code.
    pub veg: BTreeMap<String, f64>,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            dist: DistributionConfig::default(),
            wind_model: WindModel::Interp,
            reduction_factor: 0.7,
            station_default: 11.4,
            station_enhancement: BTreeMap::new(),
            station_peak: Vec::new(),
            veg_default: 0.0,
            veg: BTreeMap::from([
                ("41".to_string(), 3.3),
                ("42".to_string(), 3.3),
                ("43".to_string(), 11.4),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecipConfig {
    #[serde(flatten)]
    pub dist: DistributionConfig,
    pub precip_temp_method: PrecipTempMethod,
    #[serde(alias = "nasde_model")]
    pub new_snow_density_model: NasdeModel,
    #[serde(alias = "storm_mass_thresh")]
    pub storm_mass_threshold: f64,
    pub time_steps_to_end_storms: usize,
    pub station_adjust_for_undercatch: bool,
    pub gauge_default: GaugeType,
    /// Per-station gauge type.
    pub station_gauge: BTreeMap<String, GaugeType>,
    pub input_scalar_factor: f64,
    pub output_scalar_factor: f64,
}

impl Default for PrecipConfig {
    fn default() -> Self {
        Self {
            dist: DistributionConfig::default(),
            precip_temp_method: PrecipTempMethod::DewPoint,
            new_snow_density_model: NasdeModel::Marks2017,
            storm_mass_threshold: 0.01,
            time_steps_to_end_storms: 2,
            station_adjust_for_undercatch: false,
            gauge_default: GaugeType::UsNws8Unshielded,
            station_gauge: BTreeMap::new(),
            input_scalar_factor: 1.0,
            output_scalar_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbedoConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub grain_size: f64,
    pub max_grain: f64,
    pub dirt: f64,
    pub decay_method: DecayMethod,
    pub start_decay: Option<String>,
    pub end_decay: Option<String>,
    pub decay_power: f64,
    /// Maximum decay for classes without an entry.
    pub veg_default: MaxDecay,
    pub veg: BTreeMap<String, MaxDecay>,
    pub litter_default: f64,
    pub litter: BTreeMap<String, f64>,
    pub litter_albedo: f64,
}

/// Date-method decay: one value for both bands, or a (visible, infrared) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxDecay {
    Both(f64),
    Bands([f64; 2]),
}

impl MaxDecay {
    pub fn bands(self) -> [f64; 2] {
        match self {
            Self::Both(d) => [d, d],
            Self::Bands(b) => b,
        }
    }
}

impl Default for AlbedoConfig {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
            grain_size: 100.0,
            max_grain: 700.0,
            dirt: 2.0,
            decay_method: DecayMethod::None,
            start_decay: None,
            end_decay: None,
            decay_power: 0.714,
            veg_default: MaxDecay::Both(0.25),
            veg: BTreeMap::new(),
            litter_default: 0.003,
            litter: BTreeMap::new(),
            litter_albedo: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Elevation (m) at which `clear_tau` was measured.
    pub clear_opt_depth: f64,
    pub clear_tau: f64,
    pub clear_omega: f64,
    pub clear_gamma: f64,
    pub correct_cloud: bool,
    pub correct_veg: bool,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
            clear_opt_depth: 100.0,
            clear_tau: 0.2,
            clear_omega: 0.85,
            clear_gamma: 0.3,
            correct_cloud: true,
            correct_veg: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub clear_sky_method: ClearSkyMethod,
    pub cloud_method: CloudMethod,
    pub correct_cloud: bool,
    pub correct_veg: bool,
    pub correct_terrain: bool,
    pub marks1979_nthreads: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
            clear_sky_method: ClearSkyMethod::Marks1979,
            cloud_method: CloudMethod::Garen2005,
            correct_cloud: true,
            correct_veg: true,
            correct_terrain: true,
            marks1979_nthreads: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub threading: bool,
    pub max_queue: usize,
    /// Seconds a queue `get` or `put` may block. `None` waits forever.
    pub time_out: Option<f64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            threading: false,
            max_queue: 1,
            time_out: Some(60.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write every n-th step (the last step is always written).
    pub frequency: usize,
    pub variables: Vec<String>,
    pub out_location: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frequency: 1,
            variables: [
                "air_temp",
                "vapor_pressure",
                "precip",
                "percent_snow",
                "snow_density",
                "precip_temp",
                "wind_speed",
                "net_solar",
                "thermal",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            out_location: "output".to_string(),
        }
    }
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmrfConfig {
    pub time: TimeConfig,
    pub inputs: InputConfig,
    pub air_temp: AirTempConfig,
    pub vapor_pressure: VaporPressureConfig,
    pub wind: WindConfig,
    pub precip: PrecipConfig,
    pub albedo: AlbedoConfig,
    pub solar: SolarConfig,
    pub thermal: ThermalConfig,
    pub cloud_factor: CloudFactorConfig,
    pub soil_temp: SoilTempConfig,
    pub system: SystemConfig,
    pub output: OutputConfig,
}

impl SmrfConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn time_axis(&self) -> Result<TimeAxis> {
        TimeAxis::from_config(
            &self.time.start_date,
            &self.time.end_date,
            self.time.time_step,
            &self.time.time_zone,
        )
    }

    /// Semantic checks the deserializer cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.time.start_date.is_empty() || self.time.end_date.is_empty() {
            return Err(SmrfError::config("time.start_date and time.end_date are required"));
        }
        let axis = self.time_axis()?;
        if axis.is_empty() {
            return Err(SmrfError::config("time window contains no steps"));
        }

        self.air_temp.dist.validate("air_temp")?;
        self.vapor_pressure.dist.validate("vapor_pressure")?;
        self.wind.dist.validate("wind")?;
        self.precip.dist.validate("precip")?;
        self.cloud_factor.dist.validate("cloud_factor")?;

        if self.vapor_pressure.dew_point_tolerance <= 0.0 {
            return Err(SmrfError::config("vapor_pressure.dew_point_tolerance must be positive"));
        }
        if self.wind.wind_model == WindModel::WindNinja {
            return Err(SmrfError::config(
                "wind.wind_model wind_ninja needs the external WindNinja adapter, which this build does not include",
            ));
        }
        if self.precip.time_steps_to_end_storms == 0 {
            return Err(SmrfError::config("precip.time_steps_to_end_storms must be at least 1"));
        }
        if self.precip.storm_mass_threshold < 0.0 {
            return Err(SmrfError::config("precip.storm_mass_threshold must not be negative"));
        }

        let a = &self.albedo;
        if !(a.grain_size > 0.0 && a.grain_size <= 500.0) {
            return Err(SmrfError::config("albedo.grain_size must be in (0, 500]"));
        }
        if !(a.max_grain > a.grain_size && a.max_grain <= 2000.0) {
            return Err(SmrfError::config("albedo.max_grain must be in (grain_size, 2000]"));
        }
        if !(1.0..=10.0).contains(&a.dirt) {
            return Err(SmrfError::config("albedo.dirt must be in [1, 10]"));
        }
        if a.decay_method == DecayMethod::DateMethod {
            let tz = parse_tz(&self.time.time_zone)?;
            let (Some(start), Some(end)) = (&a.start_decay, &a.end_decay) else {
                return Err(SmrfError::config("albedo.date_method needs start_decay and end_decay"));
            };
            if parse_local(end, tz)? <= parse_local(start, tz)? {
                return Err(SmrfError::config("albedo.end_decay must follow start_decay"));
            }
            if a.decay_power <= 0.0 {
                return Err(SmrfError::config("albedo.decay_power must be positive"));
            }
        }

        if self.system.max_queue == 0 {
            return Err(SmrfError::config("system.max_queue must be at least 1"));
        }
        if matches!(self.system.time_out, Some(t) if t <= 0.0) {
            return Err(SmrfError::config("system.time_out must be positive"));
        }
        if self.output.frequency == 0 {
            return Err(SmrfError::config("output.frequency must be at least 1"));
        }
        Ok(())
    }
}
