//! Run orchestrator: builds every distributor from the configuration, orders
//! them into a pipeline and drives it over the time axis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::SmrfConfig;
use crate::distribute::{
    AirTempStage, AlbedoStage, CloudFactorStage, IllumStage, Maxus, PrecipStage, SoilTempStage, SolarStage,
    SunAngleStage, ThermalStage, VaporPressureStage, WindStage,
};
use crate::error::Result;
use crate::output::{OutputPlan, OutputSink};
use crate::raster::Raster;
use crate::scheduler::{serial, threaded, Pipeline, Stage, Step};
use crate::stations::StationData;
use crate::time::TimeAxis;
use crate::topo::Topography;

/// Everything a run reads besides the configuration.
pub struct ModelInputs {
    pub topo: Topography,
    pub stations: StationData,
    pub maxus: Option<Maxus>,
    pub storm_days_restart: Option<Raster>,
}

pub struct Smrf {
    config: SmrfConfig,
    topo: Arc<Topography>,
    axis: TimeAxis,
    pipeline: Pipeline,
}

impl Smrf {
    pub fn new(config: SmrfConfig, inputs: ModelInputs) -> Result<Self> {
        config.validate()?;
        let axis = config.time_axis()?;
        let topo = Arc::new(inputs.topo);
        let data = &inputs.stations;
        info!(
            start = %axis.steps[0],
            steps = axis.len(),
            ny = topo.ny(),
            nx = topo.nx(),
            "initializing distribution"
        );

        let c = &config;
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(SunAngleStage::new(&topo)),
            Box::new(IllumStage::new(Arc::clone(&topo))),
            Box::new(AirTempStage::new(&c.air_temp, Arc::clone(&topo), data, &axis)?),
            Box::new(VaporPressureStage::new(
                &c.vapor_pressure,
                c.precip.precip_temp_method,
                Arc::clone(&topo),
                data,
                &axis,
            )?),
            Box::new(WindStage::new(&c.wind, Arc::clone(&topo), data, &axis, inputs.maxus.map(Arc::new))?),
            Box::new(PrecipStage::new(&c.precip, Arc::clone(&topo), data, &axis, inputs.storm_days_restart)?),
            Box::new(AlbedoStage::new(&c.albedo, Arc::clone(&topo), axis.tz)?),
            Box::new(CloudFactorStage::new(&c.cloud_factor, Arc::clone(&topo), data, &axis)?),
            Box::new(SolarStage::new(&c.solar, &c.albedo, Arc::clone(&topo))),
            Box::new(ThermalStage::new(&c.thermal, Arc::clone(&topo))?),
            Box::new(SoilTempStage::new(&c.soil_temp, topo.ny(), topo.nx())),
        ];
        let pipeline = Pipeline::new(stages)?;
        info!(order = ?pipeline.order(), "pipeline built");

        Ok(Self {
            config,
            topo,
            axis,
            pipeline,
        })
    }

    pub fn stage_order(&self) -> Vec<&str> {
        self.pipeline.order()
    }

    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn steps(&self) -> Vec<Step> {
        let dt_days = self.axis.step_days();
        self.axis
            .steps
            .iter()
            .enumerate()
            .map(|(index, &time)| Step { index, time, dt_days })
            .collect()
    }

    /// Configured output variables the pipeline actually produces.
    pub fn output_plan(&self) -> OutputPlan {
        let produced = self.pipeline.fields();
        let variables = self
            .config
            .output
            .variables
            .iter()
            .filter(|v| {
                let known = produced.contains(v);
                if !known {
                    warn!(variable = %v, "output variable is not produced by any stage, skipping");
                }
                known
            })
            .cloned()
            .collect();
        OutputPlan {
            variables,
            frequency: self.config.output.frequency,
            ny: self.topo.ny(),
            nx: self.topo.nx(),
        }
    }

    /// Distribute every step, writing the planned outputs to `sink`.
    pub fn run(&mut self, sink: &mut dyn OutputSink) -> Result<()> {
        let steps = self.steps();
        let plan = self.output_plan();
        let system = &self.config.system;
        let started = Instant::now();
        if system.threading {
            let timeout = system.time_out.map(Duration::from_secs_f64);
            threaded::run(&mut self.pipeline, &steps, &plan, sink, system.max_queue, timeout)?;
        } else {
            serial::run(&mut self.pipeline, &steps, &plan, sink)?;
        }
        info!(
            steps = steps.len(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "distribution complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::testing::station_data;
    use crate::output::MemorySink;
    use crate::topo::testing::tilted_basin;

    const STEPS: usize = 6;

    fn config(threading: bool) -> SmrfConfig {
        let mut cfg = SmrfConfig::from_json_str(
            r#"{"time": {"start_date": "1998-01-14 15:00", "end_date": "1998-01-14 20:00", "time_zone": "UTC"}}"#,
        )
        .unwrap();
        cfg.system.threading = threading;
        cfg.system.max_queue = 2;
        cfg.output.variables.extend(["storm_days".to_string(), "albedo_vis".to_string()]);
        cfg
    }

    fn model(threading: bool) -> Smrf {
        let inputs = ModelInputs {
            topo: tilted_basin(4, 4),
            stations: station_data(STEPS),
            maxus: None,
            storm_days_restart: None,
        };
        Smrf::new(config(threading), inputs).unwrap()
    }

    fn run(threading: bool) -> MemorySink {
        let mut sink = MemorySink::new();
        model(threading).run(&mut sink).unwrap();
        sink
    }

    #[test]
    fn producers_precede_consumers() {
        let m = model(false);
        let order = m.stage_order();
        let pos = |name: &str| order.iter().position(|s| *s == name).unwrap();
        assert_eq!(order.len(), 11);
        assert!(pos("sun_angle") < pos("illum_angle"));
        assert!(pos("air_temp") < pos("vapor_pressure"));
        assert!(pos("vapor_pressure") < pos("precip"));
        assert!(pos("precip") < pos("albedo"));
        assert!(pos("albedo") < pos("solar"));
        assert!(pos("cloud_factor") < pos("thermal"));
    }

    #[test]
    fn unknown_output_variables_are_dropped() {
        let mut m = model(false);
        m.config.output.variables.push("snow_depth".into());
        let plan = m.output_plan();
        assert!(!plan.variables.contains(&"snow_depth".to_string()));
        assert!(plan.variables.contains(&"net_solar".to_string()));
    }

    /// The sun is still down at 15:00 UTC over Idaho in January.
    #[test]
    fn night_solar_is_written_as_zeros() {
        let sink = run(false);
        let net = sink.series("net_solar");
        assert_eq!(net.len(), STEPS);
        assert!(net[0].1.data.iter().all(|&v| v == 0.0));
        assert!(net[4].1.max() > 0.0, "midday net solar");
        assert!(sink.finished);
    }

    #[test]
    fn serial_run_is_repeatable() {
        assert_eq!(run(false).written, run(false).written);
    }

    /// The threaded driver writes exactly what the serial driver writes.
    #[test]
    fn threaded_matches_serial() {
        let serial = run(false);
        let threaded = run(true);
        assert_eq!(serial.written.keys().collect::<Vec<_>>(), threaded.written.keys().collect::<Vec<_>>());
        assert_eq!(serial.written, threaded.written);
    }

    /// Storm days restart under the snow storm and grow after it.
    #[test]
    fn storm_days_follow_the_storm() {
        let sink = run(false);
        let days = sink.series("storm_days");
        let precip = sink.series("precip");
        assert!(precip[1].1.sum() > 0.0);
        assert!(days[2].1.data.iter().all(|&d| d == 0.0), "{:?}", days[2].1.data);
        assert!(days[5].1.data.iter().all(|&d| d > 0.0));
    }
}
