//! Concurrent driver: one thread per stage, one queue per field.
//!
//! Stages run ahead of each other by at most `max_queue` steps. An output
//! thread writes each step and a cleaner thread drops a step from every
//! queue once all consumers have read it. The first failure closes every
//! queue, which cancels the remaining workers.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::serial::{complete, write_step};
use super::{is_output_step, DateQueue, Field, Fields, Pipeline, Stage, Step};
use crate::error::{Result, SmrfError};
use crate::output::{OutputPlan, OutputSink};

const OUTPUT_DONE: &str = "__output__";

struct Shared {
    queues: BTreeMap<String, DateQueue>,
    done: DateQueue,
    error: Mutex<Option<SmrfError>>,
}

impl Shared {
    fn fail(&self, worker: &str, err: SmrfError) {
        let mut slot = self.error.lock();
        if slot.is_none() && !matches!(err, SmrfError::Cancelled) {
            error!(worker, kind = err.kind(), "{err}");
            *slot = Some(err);
        }
        drop(slot);
        self.close_all();
    }

    fn close_all(&self) {
        for q in self.queues.values() {
            q.close();
        }
        self.done.close();
    }

    fn queue(&self, name: &str) -> Result<&DateQueue> {
        self.queues
            .get(name)
            .ok_or_else(|| SmrfError::config(format!("no queue for field {name}")))
    }
}

fn run_stage(shared: &Shared, stage: &mut dyn Stage, steps: &[Step]) -> Result<()> {
    let inputs = stage.inputs();
    let outputs = stage.outputs();
    for step in steps {
        let mut fields = Fields::new();
        for name in &inputs {
            fields.insert(name.clone(), shared.queue(name)?.get(step)?);
        }
        let out = stage
            .step(step, &fields)
            .map_err(|e| e.at(stage.name(), &step.label()))?;
        for (name, field) in complete(out, &outputs).iter() {
            shared.queue(name)?.put(step, field.clone())?;
        }
        debug!(stage = stage.name(), step = step.index, "stage done");
    }
    Ok(())
}

fn run_output(shared: &Shared, steps: &[Step], plan: &OutputPlan, sink: &mut dyn OutputSink) -> Result<()> {
    for step in steps {
        if is_output_step(step.index, steps.len(), plan.frequency) {
            let mut fields = Fields::new();
            for var in &plan.variables {
                if let Some(q) = shared.queues.get(var) {
                    fields.insert(var.clone(), q.get(step)?);
                }
            }
            write_step(sink, plan, step, &fields)?;
        }
        shared.done.put(step, Field::Empty)?;
        info!(step = step.index, time = %step.label(), "distributed");
    }
    sink.finish()
}

fn run_cleaner(shared: &Shared, steps: &[Step]) -> Result<()> {
    for step in steps {
        for q in shared.queues.values() {
            q.get(step)?;
        }
        shared.done.get(step)?;
        for q in shared.queues.values() {
            q.clean(step.index);
        }
        shared.done.clean(step.index);
    }
    Ok(())
}

pub fn run(
    pipeline: &mut Pipeline,
    steps: &[Step],
    plan: &OutputPlan,
    sink: &mut dyn OutputSink,
    max_queue: usize,
    timeout: Option<Duration>,
) -> Result<()> {
    let queues = pipeline
        .fields()
        .into_iter()
        .map(|f| {
            let q = DateQueue::new(f.clone(), max_queue, timeout);
            (f, q)
        })
        .collect();
    let shared = Shared {
        queues,
        done: DateQueue::new(OUTPUT_DONE, max_queue, timeout),
        error: Mutex::new(None),
    };
    info!(stages = pipeline.len(), max_queue, "starting threaded run");

    thread::scope(|s| {
        let shared = &shared;
        for stage in pipeline.stages_mut() {
            let name = stage.name().to_string();
            let spawned = thread::Builder::new().name(name.clone()).spawn_scoped(s, move || {
                if let Err(e) = run_stage(shared, stage.as_mut(), steps) {
                    shared.fail(&name, e);
                }
            });
            if let Err(e) = spawned {
                shared.fail("spawn", e.into());
            }
        }

        s.spawn(move || {
            if let Err(e) = run_output(shared, steps, plan, sink) {
                shared.fail("output", e);
            }
        });
        s.spawn(move || {
            if let Err(e) = run_cleaner(shared, steps) {
                shared.fail("cleaner", e);
            }
        });
    });

    match shared.error.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::raster::Raster;
    use crate::scheduler::testing::stage;
    use chrono::TimeZone;

    fn steps(n: usize) -> Vec<Step> {
        (0..n)
            .map(|i| Step {
                index: i,
                time: chrono_tz::UTC.with_ymd_and_hms(2020, 1, 1, i as u32, 0, 0).unwrap(),
                dt_days: 1.0 / 24.0,
            })
            .collect()
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(vec![
            stage("sum", &["a", "b"], |_, f| {
                let a = f.raster("a")?;
                let b = f.scalar("b")?;
                Ok(Field::raster(a.map(|v| v + b)))
            }),
            stage("a", &[], |s, _| Ok(Field::raster(Raster::filled(2, 2, s.index as f64)))),
            stage("b", &[], |s, _| {
                Ok(if s.index % 2 == 0 { Field::Scalar(10.0) } else { Field::Scalar(-1.0) })
            }),
        ])
        .unwrap()
    }

    fn plan() -> OutputPlan {
        OutputPlan {
            variables: vec!["a".into(), "sum".into()],
            frequency: 1,
            ny: 2,
            nx: 2,
        }
    }

    /// Both drivers produce identical output.
    #[test]
    fn threaded_matches_serial() {
        let steps = steps(6);
        let mut serial = MemorySink::new();
        super::super::serial::run(&mut pipeline(), &steps, &plan(), &mut serial).unwrap();

        let mut threaded = MemorySink::new();
        run(&mut pipeline(), &steps, &plan(), &mut threaded, 1, Some(Duration::from_secs(10))).unwrap();

        assert_eq!(serial.written, threaded.written);
        assert!(threaded.finished);
        assert_eq!(threaded.series("sum")[3].1, Raster::filled(2, 2, 2.0));
    }

    /// A failing stage stops the run with its own error, not a cancellation.
    #[test]
    fn failure_cancels_run() {
        let mut p = Pipeline::new(vec![
            stage("a", &[], |s, _| Ok(Field::Scalar(s.index as f64))),
            stage("bad", &["a"], |s, _| {
                if s.index == 2 {
                    Err(SmrfError::numeric("bad", "singular"))
                } else {
                    Ok(Field::Empty)
                }
            }),
        ])
        .unwrap();
        let mut sink = MemorySink::new();
        let plan = OutputPlan {
            variables: vec!["bad".into()],
            frequency: 1,
            ny: 1,
            nx: 1,
        };
        let err = run(&mut p, &steps(5), &plan, &mut sink, 2, Some(Duration::from_secs(10))).unwrap_err();
        assert_eq!(err.kind(), "numeric");
        assert!(!sink.finished);
    }
}
