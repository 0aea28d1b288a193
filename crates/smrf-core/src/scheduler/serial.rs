//! Single-threaded driver: every stage in order for each step.

use tracing::{debug, info};

use super::{is_output_step, Field, Fields, Pipeline, Step};
use crate::error::Result;
use crate::output::{OutputPlan, OutputSink};

/// Inputs of one stage, drawn from what earlier stages published this step.
pub(crate) fn gather(published: &Fields, inputs: &[String]) -> Fields {
    let mut f = Fields::new();
    for name in inputs {
        f.insert(name.clone(), published.get(name).cloned().unwrap_or(Field::Empty));
    }
    f
}

/// Fill any declared output the stage left out with [`Field::Empty`].
pub(crate) fn complete(mut out: Fields, outputs: &[String]) -> Fields {
    for name in outputs {
        if out.get(name).is_none() {
            out.insert(name.clone(), Field::Empty);
        }
    }
    out
}

pub(crate) fn write_step(sink: &mut dyn OutputSink, plan: &OutputPlan, step: &Step, fields: &Fields) -> Result<()> {
    for var in &plan.variables {
        let field = fields.get(var).cloned().unwrap_or(Field::Empty);
        sink.write(var, &field.materialize(plan.ny, plan.nx), &step.time)?;
    }
    debug!(step = step.index, time = %step.label(), "output written");
    Ok(())
}

pub fn run(pipeline: &mut Pipeline, steps: &[Step], plan: &OutputPlan, sink: &mut dyn OutputSink) -> Result<()> {
    for step in steps {
        let mut published = Fields::new();
        for stage in pipeline.stages_mut() {
            let inputs = gather(&published, &stage.inputs());
            let label = step.label();
            let out = stage.step(step, &inputs).map_err(|e| e.at(stage.name(), &label))?;
            for (name, field) in complete(out, &stage.outputs()).iter() {
                published.insert(name.clone(), field.clone());
            }
        }
        if is_output_step(step.index, steps.len(), plan.frequency) {
            write_step(sink, plan, step, &published)?;
        }
        info!(step = step.index, time = %step.label(), "distributed");
    }
    sink.finish()
}
