//! Spatial modeling for resources framework: distributes point weather
//! station observations onto a gridded basin and derives the energy and
//! mass forcing a snow model needs, one time step at a time.

pub mod config;
pub mod distribute;
pub mod envphys;
pub mod error;
pub mod model;
pub mod output;
pub mod raster;
pub mod scheduler;
pub mod spatial;
pub mod stations;
pub mod time;
pub mod topo;
pub mod utm;

pub use config::SmrfConfig;
pub use error::{Result, SmrfError};
pub use model::{ModelInputs, Smrf};
pub use output::{MemorySink, OutputPlan, OutputSink};
pub use raster::Raster;
