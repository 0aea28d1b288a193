//! Detrended kriging (Garen 1994).
//!
//! Weights come from the distance-based kriging system with a Lagrange
//! border. Stations with negative weight are removed, highest elevation
//! first, until every weight is non-negative. The solve is per cell and
//! cached until the set of reporting stations changes. With `ncores > 1`
//! the solve runs on a dedicated rayon pool of that size.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use super::detrend::Trend;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::stations::StationSet;
use crate::topo::Topography;

pub struct Dk {
    topo: Arc<Topography>,
    mx: Vec<f64>,
    my: Vec<f64>,
    mz: Vec<f64>,
    sign: i32,
    /// Reporting pattern the cached weights belong to.
    pattern: Option<Vec<bool>>,
    /// Indices of reporting stations.
    active: Vec<usize>,
    /// Cell-major weights over `active`.
    weights: Vec<f64>,
    pool: Option<rayon::ThreadPool>,
}

impl Dk {
    pub fn new(topo: Arc<Topography>, stations: &StationSet, sign: i32, ncores: usize) -> Result<Self> {
        let pool = if ncores > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(ncores)
                .build()
                .map_err(|e| SmrfError::config(format!("detrended kriging thread pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            topo,
            mx: stations.mx.clone(),
            my: stations.my.clone(),
            mz: stations.mz.clone(),
            sign,
            pattern: None,
            active: Vec::new(),
            weights: Vec::new(),
            pool,
        })
    }

    pub fn distribute(&mut self, values: &[f64]) -> Result<Raster> {
        let pattern: Vec<bool> = values.iter().map(|v| !v.is_nan()).collect();
        if !pattern.iter().any(|&p| p) {
            return Err(SmrfError::AllNaN {
                variable: String::new(),
                time: String::new(),
            });
        }
        if self.pattern.as_ref() != Some(&pattern) {
            self.active = (0..pattern.len()).filter(|&i| pattern[i]).collect();
            debug!(stations = self.active.len(), "recalculating detrended kriging weights");
            self.weights = match &self.pool {
                Some(pool) => pool.install(|| self.solve_weights())?,
                None => self.solve_weights()?,
            };
            self.pattern = Some(pattern);
        }

        let trend = Trend::fit(&self.mz, values, self.sign)?;
        let residual: Vec<f64> = self
            .active
            .iter()
            .map(|&i| values[i] - trend.at(self.mz[i]))
            .collect();

        let n = self.active.len();
        let data: Vec<f64> = self
            .weights
            .chunks(n)
            .map(|w| w.iter().zip(&residual).map(|(w, r)| w * r).sum())
            .collect();
        let r = Raster {
            data,
            nx: self.topo.nx(),
            ny: self.topo.ny(),
        };
        Ok(trend.retrend(&r, &self.topo.dem))
    }

    fn solve_weights(&self) -> Result<Vec<f64>> {
        let n = self.active.len();
        let mx: Vec<f64> = self.active.iter().map(|&i| self.mx[i]).collect();
        let my: Vec<f64> = self.active.iter().map(|&i| self.my[i]).collect();
        let mz: Vec<f64> = self.active.iter().map(|&i| self.mz[i]).collect();

        let ad = DMatrix::from_fn(n, n, |i, j| (mx[i] - mx[j]).hypot(my[i] - my[j]));

        let (ny, nx) = (self.topo.ny(), self.topo.nx());
        let topo = &self.topo;
        let per_cell: Vec<Vec<f64>> = (0..ny * nx)
            .into_par_iter()
            .map(|cell| {
                let (r, c) = (cell / nx, cell % nx);
                let dgrid: Vec<f64> = (0..n).map(|s| (topo.x[c] - mx[s]).hypot(topo.y[r] - my[s])).collect();
                cell_weights(&ad, &dgrid, &mz)
            })
            .collect::<Result<_>>()?;
        Ok(per_cell.into_iter().flatten().collect())
    }
}

/// Kriging weights for one cell, dropping negative-weight stations.
fn cell_weights(ad: &DMatrix<f64>, dgrid: &[f64], elevations: &[f64]) -> Result<Vec<f64>> {
    let nsta = dgrid.len();
    let mut used = vec![true; nsta];
    loop {
        let idx: Vec<usize> = (0..nsta).filter(|&i| used[i]).collect();
        let ns = idx.len();
        let mut a = DMatrix::zeros(ns + 1, ns + 1);
        let mut b = DVector::zeros(ns + 1);
        for (m, &im) in idx.iter().enumerate() {
            for (k, &ik) in idx.iter().enumerate() {
                a[(m, k)] = ad[(im, ik)];
            }
            a[(m, ns)] = 1.0;
            a[(ns, m)] = 1.0;
            b[m] = dgrid[im];
        }
        b[ns] = 1.0;

        let w = a
            .lu()
            .solve(&b)
            .ok_or_else(|| SmrfError::numeric("", "singular detrended kriging system"))?;

        let drop = idx
            .iter()
            .enumerate()
            .filter(|(m, _)| w[*m] < 0.0)
            .max_by(|a, b| elevations[*a.1].total_cmp(&elevations[*b.1]))
            .map(|(_, &i)| i);

        match drop {
            Some(i) if ns > 1 => used[i] = false,
            _ => {
                let mut out = vec![0.0; nsta];
                for (m, &i) in idx.iter().enumerate() {
                    out[i] = w[m];
                }
                return Ok(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::testing::tilted_basin;
    use approx::assert_relative_eq;

    fn stations(topo: &Topography) -> StationSet {
        StationSet {
            ids: vec!["A".into(), "B".into(), "C".into()],
            mx: vec![topo.x[0], topo.x[3], topo.x[0]],
            my: vec![topo.y[0], topo.y[0], topo.y[3]],
            mz: vec![2015.0, 2045.0, 2000.0],
            xi: vec![0, 3, 0],
            yi: vec![0, 0, 3],
        }
    }

    /// Weights are non-negative and sum to one in every cell.
    #[test]
    fn weights_are_convex() {
        let topo = Arc::new(tilted_basin(4, 4));
        let mut dk = Dk::new(topo, &stations(&tilted_basin(4, 4)), 0, 1).unwrap();
        dk.distribute(&[1.0, 2.0, 3.0]).unwrap();
        for w in dk.weights.chunks(3) {
            assert!(w.iter().all(|v| *v >= 0.0), "negative weight in {w:?}");
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }
    }

    /// Values lying exactly on the elevation trend are reproduced by it.
    #[test]
    fn pure_trend_is_reproduced() {
        let base = tilted_basin(4, 4);
        let st = stations(&base);
        let topo = Arc::new(base);
        let mut dk = Dk::new(topo.clone(), &st, 0, 1).unwrap();
        let values: Vec<f64> = st.mz.iter().map(|z| 0.01 * z - 5.0).collect();
        let r = dk.distribute(&values).unwrap();
        for (v, z) in r.data.iter().zip(&topo.dem.data) {
            assert_relative_eq!(*v, 0.01 * z - 5.0, epsilon = 1e-9);
        }
    }

    /// A change in the reporting pattern rebuilds the cache.
    #[test]
    fn cache_follows_nan_pattern() {
        let base = tilted_basin(4, 4);
        let st = stations(&base);
        let mut dk = Dk::new(Arc::new(base), &st, 0, 1).unwrap();
        dk.distribute(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(dk.active.len(), 3);
        let r = dk.distribute(&[1.0, f64::NAN, 3.0]).unwrap();
        assert_eq!(dk.active, vec![0, 2]);
        assert!(r.data.iter().all(|v| v.is_finite()));
    }

    /// A dedicated pool gives the same field as the global one.
    #[test]
    fn dedicated_pool_matches_global() {
        let base = tilted_basin(6, 5);
        let st = stations(&base);
        let topo = Arc::new(base);
        let values = [1.0, 2.5, 0.5];
        let mut single = Dk::new(topo.clone(), &st, 0, 1).unwrap();
        let mut pooled = Dk::new(topo, &st, 0, 4).unwrap();
        assert!(single.pool.is_none());
        assert_eq!(pooled.pool.as_ref().map(|p| p.current_num_threads()), Some(4));
        assert_eq!(single.distribute(&values).unwrap().data, pooled.distribute(&values).unwrap().data);
        assert_eq!(single.weights, pooled.weights);
    }

    #[test]
    fn single_station_gets_full_weight() {
        let ad = DMatrix::zeros(1, 1);
        let w = cell_weights(&ad, &[250.0], &[2000.0]).unwrap();
        assert_relative_eq!(w[0], 1.0);
    }
}
