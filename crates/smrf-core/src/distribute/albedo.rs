//! Visible and infrared snow albedo from days since the last storm.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::debug;

use crate::config::{AlbedoConfig, DecayMethod, MaxDecay};
use crate::envphys::albedo::{albedo, decay_fraction, decay_hardy, decay_power, GrainGrowth};
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::scheduler::{Field, Fields, Stage, Step};
use crate::time::parse_local;
use crate::topo::Topography;

use super::class_map;

enum Decay {
    None,
    Date {
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        power: f64,
        veg_default: MaxDecay,
        veg: BTreeMap<i64, MaxDecay>,
    },
    Hardy {
        litter_albedo: f64,
        litter_default: f64,
        litter: BTreeMap<i64, f64>,
    },
}

pub struct AlbedoStage {
    topo: Arc<Topography>,
    grain: GrainGrowth,
    decay: Decay,
    min: f64,
    max: f64,
}

impl AlbedoStage {
    pub fn new(cfg: &AlbedoConfig, topo: Arc<Topography>, tz: Tz) -> Result<Self> {
        let decay = match cfg.decay_method {
            DecayMethod::None => Decay::None,
            DecayMethod::DateMethod => {
                let (Some(start), Some(end)) = (&cfg.start_decay, &cfg.end_decay) else {
                    return Err(SmrfError::config("albedo.date_method needs start_decay and end_decay"));
                };
                Decay::Date {
                    start: parse_local(start, tz)?,
                    end: parse_local(end, tz)?,
                    power: cfg.decay_power,
                    veg_default: cfg.veg_default,
                    veg: class_map("albedo.veg", &cfg.veg)?,
                }
            }
            DecayMethod::Hardy2000 => Decay::Hardy {
                litter_albedo: cfg.litter_albedo,
                litter_default: cfg.litter_default,
                litter: class_map("albedo.litter", &cfg.litter)?,
            },
        };
        Ok(Self {
            topo,
            grain: GrainGrowth {
                grain_size: cfg.grain_size,
                max_grain: cfg.max_grain,
                dirt: cfg.dirt,
            },
            decay,
            min: cfg.min.unwrap_or(0.0),
            max: cfg.max.unwrap_or(1.0),
        })
    }

    fn apply_decay(&self, step: &Step, vis: &mut Raster, ir: &mut Raster, storm_days: &Raster) {
        let veg_type = &self.topo.veg_type;
        match &self.decay {
            Decay::None => {}
            Decay::Date {
                start,
                end,
                power,
                veg_default,
                veg,
            } => {
                let fraction = decay_fraction(&step.time, start, end, *power);
                debug!(step = step.index, fraction, "albedo date decay");
                decay_power(vis, ir, veg_type, fraction, |code| {
                    veg.get(&code).copied().unwrap_or(*veg_default).bands()
                });
            }
            Decay::Hardy {
                litter_albedo,
                litter_default,
                litter,
            } => decay_hardy(vis, ir, veg_type, storm_days, *litter_albedo, |code| {
                litter.get(&code).copied().unwrap_or(*litter_default)
            }),
        }
    }
}

impl Stage for AlbedoStage {
    fn name(&self) -> &str {
        "albedo"
    }

    fn inputs(&self) -> Vec<String> {
        vec!["cosz".to_string(), "storm_days".to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["albedo_vis".to_string(), "albedo_ir".to_string()]
    }

    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
        let cosz = inputs.scalar("cosz")?;
        let (ny, nx) = (self.topo.ny(), self.topo.nx());
        let mut out = Fields::new();
        if cosz <= 0.0 {
            out.insert("albedo_vis", Field::raster(Raster::zeros(ny, nx)));
            out.insert("albedo_ir", Field::raster(Raster::zeros(ny, nx)));
            return Ok(out);
        }

        let storm_days = inputs.raster("storm_days")?;
        let mut vis = Raster::zeros(ny, nx);
        let mut ir = Raster::zeros(ny, nx);
        for (i, &days) in storm_days.data.iter().enumerate() {
            let a = albedo(days, cosz, self.grain);
            vis.data[i] = a.vis;
            ir.data[i] = a.ir;
        }
        self.apply_decay(step, &mut vis, &mut ir, storm_days);
        vis.clamp_in_place(self.min, self.max);
        ir.clamp_in_place(self.min, self.max);

        out.insert("albedo_vis", Field::raster(vis));
        out.insert("albedo_ir", Field::raster(ir));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::topo;
    use chrono::TimeZone;

    fn step(hour: u32) -> Step {
        Step {
            index: 0,
            time: chrono_tz::UTC.with_ymd_and_hms(1998, 1, 14, hour, 0, 0).unwrap(),
            dt_days: 1.0 / 24.0,
        }
    }

    fn inputs(cosz: f64, days: f64) -> Fields {
        let mut f = Fields::new();
        f.insert("cosz", Field::Scalar(cosz));
        f.insert("storm_days", Field::raster(Raster::filled(4, 4, days)));
        f
    }

    fn run(cfg: &AlbedoConfig, cosz: f64, days: f64) -> (Raster, Raster) {
        let mut stage = AlbedoStage::new(cfg, topo(), chrono_tz::UTC).unwrap();
        let out = stage.step(&step(19), &inputs(cosz, days)).unwrap();
        (out.raster("albedo_vis").unwrap().clone(), out.raster("albedo_ir").unwrap().clone())
    }

    #[test]
    fn fresh_snow_is_bright_and_ages() {
        let (vis0, ir0) = run(&AlbedoConfig::default(), 0.5, 0.0);
        let (vis10, ir10) = run(&AlbedoConfig::default(), 0.5, 10.0);
        assert!(vis0.data[0] > 0.9, "fresh visible albedo {}", vis0.data[0]);
        assert!(vis10.data[0] < vis0.data[0]);
        assert!(ir10.data[0] < ir0.data[0]);
        assert!(vis0.data.iter().chain(&ir0.data).all(|a| (0.0..=1.0).contains(a)));
    }

    #[test]
    fn night_is_zero() {
        let (vis, ir) = run(&AlbedoConfig::default(), -0.2, 1.0);
        assert_eq!(vis.sum() + ir.sum(), 0.0);
    }

    /// After `end_decay` the full per-class decay applies.
    #[test]
    fn date_method_subtracts_full_decay() {
        let (vis, _) = run(&AlbedoConfig::default(), 0.5, 2.0);
        let cfg = AlbedoConfig {
            decay_method: DecayMethod::DateMethod,
            start_decay: Some("1998-01-01".into()),
            end_decay: Some("1998-01-10".into()),
            veg: BTreeMap::from([("41".to_string(), MaxDecay::Bands([0.2, 0.1]))]),
            ..AlbedoConfig::default()
        };
        let (decayed, _) = run(&cfg, 0.5, 2.0);
        assert!((vis.data[0] - decayed.data[0] - 0.2).abs() < 1e-12);
    }

    /// A scalar decay is subtracted from both bands.
    #[test]
    fn scalar_decay_applies_to_both_bands() {
        let (vis, ir) = run(&AlbedoConfig::default(), 0.5, 2.0);
        let cfg: AlbedoConfig = serde_json::from_str(
            r#"{"decay_method": "date_method", "start_decay": "1998-01-01", "end_decay": "1998-01-10",
                "veg_default": 0.1, "veg": {"veg_41": 0.2}}"#,
        )
        .unwrap();
        assert_eq!(cfg.veg_default, MaxDecay::Both(0.1));
        let (dv, di) = run(&cfg, 0.5, 2.0);
        assert!((vis.data[0] - dv.data[0] - 0.2).abs() < 1e-12);
        assert!((ir.data[0] - di.data[0] - 0.2).abs() < 1e-12);
    }

    /// Hardy litter pulls albedo toward the litter albedo with time.
    #[test]
    fn hardy_litter_darkens() {
        let cfg = AlbedoConfig {
            decay_method: DecayMethod::Hardy2000,
            litter: BTreeMap::from([("veg_41".to_string(), 0.2)]),
            ..AlbedoConfig::default()
        };
        let (clean, _) = run(&AlbedoConfig::default(), 0.5, 5.0);
        let (litter, _) = run(&cfg, 0.5, 5.0);
        assert!(litter.data[0] < clean.data[0]);
        assert!(litter.data[0] > 0.2);
    }

    #[test]
    fn bad_class_key_is_config_error() {
        let cfg = AlbedoConfig {
            decay_method: DecayMethod::Hardy2000,
            litter: BTreeMap::from([("conifer".to_string(), 0.2)]),
            ..AlbedoConfig::default()
        };
        let err = AlbedoStage::new(&cfg, topo(), chrono_tz::UTC).err().unwrap();
        assert_eq!(err.kind(), "config");
    }
}
