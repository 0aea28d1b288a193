//! Shortwave radiation (W/m²) in the visible and near-infrared bands.
//!
//! Each band runs the same chain: clear-sky irradiance distributed by
//! elevation, the terrain correction, the cloud correction and the canopy
//! correction. Net solar is what the snow absorbs of the canopy-corrected
//! radiation in both bands.

use std::sync::Arc;

use tracing::debug;

use crate::config::{AlbedoConfig, SolarConfig};
use crate::envphys::albedo::{albedo, GrainGrowth};
use crate::envphys::constants::{INFRARED, VISIBLE};
use crate::envphys::irradiance::direct_solar_irradiance;
use crate::envphys::toporad::{cf_cloud, elevrad, toporad, veg_correct, BandRadiation, ClearSky};
use crate::error::Result;
use crate::raster::{clamp_value, Raster};
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::time::water_day;
use crate::topo::Topography;

pub const BOUNDS: (f64, f64) = (0.0, 800.0);

const STAGES: [&str; 3] = ["clear", "cloud", "veg"];
const BANDS: [&str; 2] = ["vis", "ir"];

/// One band's radiation after each correction.
struct BandChain {
    clear: BandRadiation,
    cloud: BandRadiation,
    veg: BandRadiation,
}

pub struct SolarStage {
    topo: Arc<Topography>,
    sky: ClearSky,
    grain: GrainGrowth,
    correct_cloud: bool,
    correct_veg: bool,
    min: f64,
    max: f64,
}

impl SolarStage {
    pub fn new(cfg: &SolarConfig, albedo: &AlbedoConfig, topo: Arc<Topography>) -> Self {
        Self {
            topo,
            sky: ClearSky {
                tau_elevation: cfg.clear_opt_depth,
                tau: cfg.clear_tau,
                omega: cfg.clear_omega,
                gamma: cfg.clear_gamma,
            },
            grain: GrainGrowth {
                grain_size: albedo.grain_size,
                max_grain: albedo.max_grain,
                dirt: albedo.dirt,
            },
            correct_cloud: cfg.correct_cloud,
            correct_veg: cfg.correct_veg,
            min: cfg.min.unwrap_or(BOUNDS.0),
            max: cfg.max.unwrap_or(BOUNDS.1),
        }
    }

    fn band(&self, step: &Step, band: (f64, f64), r0: f64, cosz: f64, illum: &Raster, cf: Option<&Raster>) -> Result<BandChain> {
        let topo = &self.topo;
        let s0 = direct_solar_irradiance(&step.time, band)?;
        let flat = elevrad(&topo.dem, s0, cosz, self.sky, r0)?;
        let clear = toporad(&flat, cosz, illum, &topo.sky_view, &topo.terrain_config, r0);
        let cloud = match cf {
            Some(cf) if self.correct_cloud => cf_cloud(&clear, cf),
            _ => clear.clone(),
        };
        let veg = if self.correct_veg {
            veg_correct(&cloud, &topo.veg_height, illum, &topo.veg_k, &topo.veg_tau)
        } else {
            cloud.clone()
        };
        Ok(BandChain { clear, cloud, veg })
    }

    /// Absorbed shortwave: each band clamped, then the sum clamped.
    fn net(&self, vis: &BandRadiation, ir: &BandRadiation, alb_vis: &Raster, alb_ir: &Raster) -> Raster {
        let absorbed = |b: &BandRadiation, alb: &Raster, i: usize| {
            clamp_value((b.beam.data[i] + b.diffuse.data[i]) * (1.0 - alb.data[i]), self.min, self.max)
        };
        let data = (0..vis.beam.len())
            .map(|i| clamp_value(absorbed(vis, alb_vis, i) + absorbed(ir, alb_ir, i), self.min, self.max))
            .collect();
        Raster {
            data,
            nx: vis.beam.nx,
            ny: vis.beam.ny,
        }
    }
}

fn field_name(stage: &str, band: &str, part: &str) -> String {
    format!("{stage}_{band}_{part}")
}

impl Stage for SolarStage {
    fn name(&self) -> &str {
        "solar"
    }

    fn inputs(&self) -> Vec<String> {
        let mut names: Vec<String> = ["cosz", "illum_ang", "albedo_vis", "albedo_ir", "last_storm_day_basin"]
            .map(String::from)
            .to_vec();
        if self.correct_cloud {
            names.push("cloud_factor".to_string());
        }
        names
    }

    fn outputs(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(13);
        for stage in STAGES {
            for band in BANDS {
                names.push(field_name(stage, band, "beam"));
                names.push(field_name(stage, band, "diffuse"));
            }
        }
        names.push("net_solar".to_string());
        names
    }

    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
        let cosz = inputs.scalar("cosz")?;
        let mut out = Fields::new();
        if cosz <= 0.0 {
            for name in self.outputs() {
                out.insert(name, Field::Empty);
            }
            return Ok(out);
        }

        let illum = inputs.raster("illum_ang")?;
        let cf = if self.correct_cloud {
            Some(inputs.raster("cloud_factor")?)
        } else {
            None
        };
        let (wd, _) = water_day(&step.time);
        let since_storm = wd - inputs.scalar("last_storm_day_basin")?;
        let r0 = albedo(since_storm, cosz, self.grain);
        debug!(step = step.index, cosz, r0_vis = r0.vis, r0_ir = r0.ir, "basin albedo");

        let vis = self.band(step, VISIBLE, r0.vis, cosz, illum, cf)?;
        let ir = self.band(step, INFRARED, r0.ir, cosz, illum, cf)?;
        let net = self.net(&vis.veg, &ir.veg, inputs.raster("albedo_vis")?, inputs.raster("albedo_ir")?);
        debug!(step = step.index, net_solar = net.mean(), "solar distributed");

        for (band, chain) in BANDS.into_iter().zip([vis, ir]) {
            for (stage, rad) in STAGES.into_iter().zip([chain.clear, chain.cloud, chain.veg]) {
                out.insert(field_name(stage, band, "beam"), Field::raster(rad.beam));
                out.insert(field_name(stage, band, "diffuse"), Field::raster(rad.diffuse));
            }
        }
        out.insert("net_solar", Field::raster(net));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::topo;
    use crate::distribute::{IllumStage, SunAngleStage};
    use chrono::TimeZone;

    fn step(hour: u32) -> Step {
        Step {
            index: 0,
            time: chrono_tz::America::Boise.with_ymd_and_hms(1998, 1, 14, hour, 0, 0).unwrap(),
            dt_days: 1.0 / 24.0,
        }
    }

    fn inputs(step: &Step, cf: f64, albedo: f64) -> Fields {
        let topo = topo();
        let mut f = SunAngleStage::new(&topo).step(step, &Fields::new()).unwrap();
        let illum = IllumStage::new(Arc::clone(&topo)).step(step, &f).unwrap();
        f.insert("illum_ang", illum.get("illum_ang").unwrap().clone());
        f.insert("albedo_vis", Field::raster(Raster::filled(4, 4, albedo)));
        f.insert("albedo_ir", Field::raster(Raster::filled(4, 4, albedo)));
        f.insert("cloud_factor", Field::raster(Raster::filled(4, 4, cf)));
        let (wd, _) = water_day(&step.time);
        f.insert("last_storm_day_basin", Field::Scalar(wd - 3.0));
        f
    }

    fn run(cfg: &SolarConfig, step: &Step, cf: f64, albedo: f64) -> Fields {
        let mut stage = SolarStage::new(cfg, &AlbedoConfig::default(), topo());
        stage.step(step, &inputs(step, cf, albedo)).unwrap()
    }

    #[test]
    fn declares_thirteen_outputs() {
        let stage = SolarStage::new(&SolarConfig::default(), &AlbedoConfig::default(), topo());
        let outputs = stage.outputs();
        assert_eq!(outputs.len(), 13);
        assert!(outputs.contains(&"cloud_ir_diffuse".to_string()));
        assert!(outputs.contains(&"veg_vis_beam".to_string()));
    }

    /// Clouds reduce and vegetation further reduces the radiation.
    #[test]
    fn corrections_attenuate() {
        let s = step(12);
        let out = run(&SolarConfig::default(), &s, 0.5, 0.8);
        let global = |stage: &str| {
            out.raster(&field_name(stage, "vis", "beam")).unwrap().sum()
                + out.raster(&field_name(stage, "vis", "diffuse")).unwrap().sum()
        };
        assert!(global("clear") > 0.0);
        assert!(global("cloud") < global("clear"));
        assert!(global("veg") <= global("cloud"));

        let net = out.raster("net_solar").unwrap();
        assert!(net.data.iter().all(|&n| (0.0..=800.0).contains(&n)), "{:?}", net.data);
        assert!(net.max() > 0.0);
    }

    /// A black surface under a clear sky absorbs everything that arrives.
    #[test]
    fn black_surface_absorbs_all() {
        let s = step(12);
        let cfg = SolarConfig {
            correct_cloud: false,
            correct_veg: false,
            ..SolarConfig::default()
        };
        let out = run(&cfg, &s, 1.0, 0.0);
        let total: f64 = ["vis", "ir"]
            .iter()
            .flat_map(|b| ["beam", "diffuse"].map(|p| out.raster(&field_name("clear", b, p)).unwrap().data[5]))
            .sum();
        assert!((out.raster("net_solar").unwrap().data[5] - total.min(800.0)).abs() < 1e-9);
    }

    #[test]
    fn night_outputs_are_empty() {
        let s = step(23);
        let out = run(&SolarConfig::default(), &s, 0.5, 0.8);
        assert!(out.iter().all(|(_, f)| f.is_empty()));
        assert_eq!(out.iter().count(), 13);
    }
}
