//! Time-stepped execution of the distribution stages.
//!
//! Every stage declares the fields it consumes and publishes. The pipeline
//! orders stages by those declarations and runs them either serially, one
//! step at a time, or concurrently with one thread per stage exchanging
//! fields through time-keyed queues.

pub mod dag;
pub mod queue;
pub mod serial;
pub mod threaded;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::error::{Result, SmrfError};
use crate::raster::Raster;

pub use dag::Pipeline;
pub use queue::DateQueue;

// ── Fields ───────────────────────────────────────────────────────────────────

/// A value published by a stage for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Raster(Arc<Raster>),
    Scalar(f64),
    /// Nothing to publish this step, e.g. solar at night. Written as zeros.
    Empty,
}

impl Field {
    pub fn raster(r: Raster) -> Self {
        Self::Raster(Arc::new(r))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The field as a full grid of shape `(ny, nx)`.
    pub fn materialize(&self, ny: usize, nx: usize) -> Raster {
        match self {
            Self::Raster(r) => r.as_ref().clone(),
            Self::Scalar(v) => Raster::filled(ny, nx, *v),
            Self::Empty => Raster::zeros(ny, nx),
        }
    }
}

/// Named fields for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Field>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        self.0.insert(name.into(), field);
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.0.iter()
    }

    fn require(&self, name: &str) -> Result<&Field> {
        self.0
            .get(name)
            .ok_or_else(|| SmrfError::config(format!("field {name} was not provided to the stage")))
    }

    /// A raster input; an empty field is an error.
    pub fn raster(&self, name: &str) -> Result<&Raster> {
        match self.require(name)? {
            Field::Raster(r) => Ok(r),
            other => Err(SmrfError::numeric(name, format!("expected a raster, got {other:?}"))),
        }
    }

    /// A raster input that may be empty this step.
    pub fn optional_raster(&self, name: &str) -> Result<Option<&Raster>> {
        match self.require(name)? {
            Field::Raster(r) => Ok(Some(r)),
            Field::Empty => Ok(None),
            Field::Scalar(_) => Err(SmrfError::numeric(name, "expected a raster, got a scalar")),
        }
    }

    pub fn scalar(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            Field::Scalar(v) => Ok(*v),
            other => Err(SmrfError::numeric(name, format!("expected a scalar, got {other:?}"))),
        }
    }
}

// ── Stages ───────────────────────────────────────────────────────────────────

/// One time step of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub index: usize,
    pub time: DateTime<Tz>,
    /// Step length in decimal days.
    pub dt_days: f64,
}

impl Step {
    pub fn label(&self) -> String {
        self.time.to_rfc3339()
    }
}

/// A distributor driven by the scheduler.
///
/// `step` is called once per time step, in time order, with every field
/// named by `inputs`. It must return every field named by `outputs`.
pub trait Stage: Send {
    fn name(&self) -> &str;
    fn inputs(&self) -> Vec<String>;
    fn outputs(&self) -> Vec<String>;
    fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields>;
}

/// Whether a step is written: every `frequency`-th step and the last one.
pub fn is_output_step(index: usize, len: usize, frequency: usize) -> bool {
    index % frequency.max(1) == 0 || index + 1 == len
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A stage that publishes `f(step index, inputs)` under one name.
    pub struct FnStage<F> {
        pub name: String,
        pub inputs: Vec<String>,
        pub f: F,
    }

    impl<F> Stage for FnStage<F>
    where
        F: FnMut(&Step, &Fields) -> Result<Field> + Send,
    {
        fn name(&self) -> &str {
            &self.name
        }

        fn inputs(&self) -> Vec<String> {
            self.inputs.clone()
        }

        fn outputs(&self) -> Vec<String> {
            vec![self.name.clone()]
        }

        fn step(&mut self, step: &Step, inputs: &Fields) -> Result<Fields> {
            let mut out = Fields::new();
            out.insert(self.name.clone(), (self.f)(step, inputs)?);
            Ok(out)
        }
    }

    pub fn stage<F>(name: &str, inputs: &[&str], f: F) -> Box<dyn Stage>
    where
        F: FnMut(&Step, &Fields) -> Result<Field> + Send + 'static,
    {
        Box::new(FnStage {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            f,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_steps_include_last() {
        let written: Vec<usize> = (0..7).filter(|&i| is_output_step(i, 7, 3)).collect();
        assert_eq!(written, vec![0, 3, 6]);
        let written: Vec<usize> = (0..5).filter(|&i| is_output_step(i, 5, 3)).collect();
        assert_eq!(written, vec![0, 3, 4]);
    }

    #[test]
    fn empty_materializes_as_zeros() {
        assert_eq!(Field::Empty.materialize(2, 2), Raster::zeros(2, 2));
        assert_eq!(Field::Scalar(3.0).materialize(1, 2), Raster::filled(1, 2, 3.0));
    }

    #[test]
    fn typed_access() {
        let mut f = Fields::new();
        f.insert("cosz", Field::Scalar(0.5));
        f.insert("illum_ang", Field::Empty);
        assert_eq!(f.scalar("cosz").unwrap(), 0.5);
        assert!(f.optional_raster("illum_ang").unwrap().is_none());
        assert!(f.raster("illum_ang").is_err());
        assert!(f.raster("missing").is_err());
    }
}
