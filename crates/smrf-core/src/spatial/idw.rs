//! Inverse distance weighting, plain or detrended.

use std::sync::Arc;

use rayon::prelude::*;

use super::detrend::Trend;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::stations::StationSet;
use crate::topo::Topography;

pub struct Idw {
    topo: Arc<Topography>,
    mz: Vec<f64>,
    n: usize,
    /// `1/d^p`, cell-major: `weights[cell * n + station]`.
    weights: Vec<f64>,
    detrend: bool,
    sign: i32,
}

impl Idw {
    pub fn new(topo: Arc<Topography>, stations: &StationSet, power: f64, detrend: bool, sign: i32) -> Self {
        let (ny, nx) = (topo.ny(), topo.nx());
        let n = stations.len();
        let mut dist = Vec::with_capacity(nx * ny * n);
        for r in 0..ny {
            for c in 0..nx {
                for s in 0..n {
                    dist.push((topo.x[c] - stations.mx[s]).hypot(topo.y[r] - stations.my[s]));
                }
            }
        }
        // A station sitting on a cell center would get infinite weight.
        let dmin = dist.iter().copied().filter(|d| *d > 0.0).fold(f64::INFINITY, f64::min);
        let dmin = if dmin.is_finite() { dmin } else { 1.0 };
        let weights = dist
            .into_iter()
            .map(|d| {
                let d = if d > 0.0 { d } else { dmin };
                1.0 / d.powf(power)
            })
            .collect();

        Self {
            topo,
            mz: stations.mz.clone(),
            n,
            weights,
            detrend,
            sign,
        }
    }

    pub fn distribute(&self, values: &[f64]) -> Result<Raster> {
        if values.iter().all(|v| v.is_nan()) {
            return Err(SmrfError::AllNaN {
                variable: String::new(),
                time: String::new(),
            });
        }
        if !self.detrend {
            return Ok(self.weighted(values));
        }
        let trend = Trend::fit(&self.mz, values, self.sign)?;
        let residual = trend.detrend(&self.mz, values);
        Ok(trend.retrend(&self.weighted(&residual), &self.topo.dem))
    }

    /// `Σ w·x / Σ w` over the stations that are not NaN.
    fn weighted(&self, values: &[f64]) -> Raster {
        let n = self.n;
        let data = self
            .weights
            .par_chunks(n)
            .map(|w| {
                let (num, den) = w
                    .iter()
                    .zip(values)
                    .filter(|(_, v)| !v.is_nan())
                    .fold((0.0, 0.0), |(num, den), (w, v)| (num + w * v, den + w));
                num / den
            })
            .collect();
        Raster {
            data,
            nx: self.topo.nx(),
            ny: self.topo.ny(),
        }
    }
}

/// Inverse-distance estimate at a single point, used to fill cells that an
/// interpolant leaves undefined.
pub(crate) fn idw_point(x: f64, y: f64, mx: &[f64], my: &[f64], values: &[f64], power: f64) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for ((&sx, &sy), &v) in mx.iter().zip(my).zip(values) {
        if v.is_nan() {
            continue;
        }
        let d = (x - sx).hypot(y - sy);
        if d < 1e-9 {
            return v;
        }
        let w = 1.0 / d.powf(power);
        num += w * v;
        den += w;
    }
    num / den
}
