//! Station-to-grid interpolation kernels.
//!
//! Every kernel takes one value per selected station (NaN for a station that
//! did not report) and returns a full raster over the basin grid.

pub mod delaunay;
pub mod detrend;
pub mod dk;
pub mod grid;
pub mod idw;
pub mod krige;

use std::sync::Arc;

use tracing::debug;

use crate::config::{DistributionConfig, DistributionMethod};
use crate::error::Result;
use crate::raster::Raster;
use crate::stations::StationSet;
use crate::topo::Topography;

pub use detrend::Trend;
pub use dk::Dk;
pub use grid::{Grid, GridOptions};
pub use idw::Idw;
pub use krige::{Krige, KrigeOptions, Variogram};

/// Kernel result; `variance` is only produced by kriging.
#[derive(Debug, Clone)]
pub struct KernelOutput {
    pub field: Raster,
    pub variance: Option<Raster>,
}

/// The configured interpolation method for one variable.
pub enum Kernel {
    Idw(Idw),
    Dk(Dk),
    Grid(Grid),
    Krige(Krige),
}

impl Kernel {
    pub fn new(topo: Arc<Topography>, stations: &StationSet, cfg: &DistributionConfig) -> Result<Self> {
        debug!(method = ?cfg.distribution, stations = stations.len(), "building interpolation kernel");
        Ok(match cfg.distribution {
            DistributionMethod::Idw => {
                Self::Idw(Idw::new(topo, stations, cfg.idw_power, cfg.detrend, cfg.detrend_slope))
            }
            DistributionMethod::Dk => Self::Dk(Dk::new(topo, stations, cfg.detrend_slope, cfg.dk_ncores)?),
            DistributionMethod::Grid => Self::Grid(Grid::new(
                topo,
                stations,
                GridOptions {
                    method: cfg.grid_method,
                    detrend: cfg.detrend,
                    sign: cfg.detrend_slope,
                    mask: cfg.grid_mask,
                    local: cfg.grid_local,
                    local_n: cfg.grid_local_n,
                },
            )),
            DistributionMethod::Kriging => Self::Krige(Krige::new(
                topo,
                stations,
                KrigeOptions {
                    model: cfg.krig_variogram_model,
                    nlags: cfg.krig_nlags,
                    weight: cfg.krig_weight,
                    anisotropy_scaling: cfg.krig_anisotropy_scaling,
                    anisotropy_angle: cfg.krig_anisotropy_angle,
                    detrend: cfg.detrend,
                    sign: cfg.detrend_slope,
                },
            )),
        })
    }

    pub fn distribute(&mut self, values: &[f64]) -> Result<KernelOutput> {
        let (field, variance) = match self {
            Self::Idw(k) => (k.distribute(values)?, None),
            Self::Dk(k) => (k.distribute(values)?, None),
            Self::Grid(k) => (k.distribute(values)?, None),
            Self::Krige(k) => {
                let (f, v) = k.distribute(values)?;
                (f, Some(v))
            }
        };
        Ok(KernelOutput { field, variance })
    }
}
