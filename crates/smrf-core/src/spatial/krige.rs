//! Ordinary kriging with a fitted variogram.
//!
//! The experimental variogram is binned into equal-width lags between the
//! shortest and longest station separation, a model is fitted by (optionally
//! weighted) least squares and the kriging system is inverted once per call.
//! Returns the estimate and the kriging variance.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use super::detrend::Trend;
use crate::config::VariogramKind;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::stations::StationSet;
use crate::topo::Topography;

/// Fitted semivariogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variogram {
    Linear { slope: f64, nugget: f64 },
    Power { scale: f64, exponent: f64, nugget: f64 },
    Gaussian { psill: f64, range: f64, nugget: f64 },
    Spherical { psill: f64, range: f64, nugget: f64 },
    Exponential { psill: f64, range: f64, nugget: f64 },
}

impl Variogram {
    /// γ(h); zero at the origin.
    pub fn gamma(&self, h: f64) -> f64 {
        if h < 1e-10 {
            return 0.0;
        }
        match *self {
            Self::Linear { slope, nugget } => slope * h + nugget,
            Self::Power { scale, exponent, nugget } => scale * h.powf(exponent) + nugget,
            Self::Gaussian { psill, range, nugget } => psill * shape(VariogramKind::Gaussian, h, range) + nugget,
            Self::Spherical { psill, range, nugget } => psill * shape(VariogramKind::Spherical, h, range) + nugget,
            Self::Exponential { psill, range, nugget } => {
                psill * shape(VariogramKind::Exponential, h, range) + nugget
            }
        }
    }

    /// A variogram that is identically zero cannot be kriged with.
    fn is_flat(&self) -> bool {
        match *self {
            Self::Linear { slope, nugget } => slope <= 0.0 && nugget <= 0.0,
            Self::Power { scale, nugget, .. } => scale <= 0.0 && nugget <= 0.0,
            Self::Gaussian { psill, nugget, .. }
            | Self::Spherical { psill, nugget, .. }
            | Self::Exponential { psill, nugget, .. } => psill <= 0.0 && nugget <= 0.0,
        }
    }
}

/// Unit-sill shape of the bounded models.
fn shape(kind: VariogramKind, h: f64, range: f64) -> f64 {
    match kind {
        VariogramKind::Gaussian => 1.0 - (-(h * h) / (range * 4.0 / 7.0).powi(2)).exp(),
        VariogramKind::Exponential => 1.0 - (-h / (range / 3.0)).exp(),
        VariogramKind::Spherical => {
            if h >= range {
                1.0
            } else {
                1.5 * h / range - 0.5 * (h / range).powi(3)
            }
        }
        VariogramKind::Linear | VariogramKind::Power => h,
    }
}

#[derive(Debug, Clone)]
pub struct KrigeOptions {
    pub model: VariogramKind,
    pub nlags: usize,
    pub weight: bool,
    pub anisotropy_scaling: f64,
    /// Degrees counter-clockwise.
    pub anisotropy_angle: f64,
    pub detrend: bool,
    pub sign: i32,
}

pub struct Krige {
    topo: Arc<Topography>,
    mx: Vec<f64>,
    my: Vec<f64>,
    mz: Vec<f64>,
    opts: KrigeOptions,
}

impl Krige {
    pub fn new(topo: Arc<Topography>, stations: &StationSet, opts: KrigeOptions) -> Self {
        Self {
            topo,
            mx: stations.mx.clone(),
            my: stations.my.clone(),
            mz: stations.mz.clone(),
            opts,
        }
    }

    /// Estimate and kriging variance.
    pub fn distribute(&self, values: &[f64]) -> Result<(Raster, Raster)> {
        let active: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
        if active.is_empty() {
            return Err(SmrfError::AllNaN {
                variable: String::new(),
                time: String::new(),
            });
        }

        let trend = if self.opts.detrend {
            Trend::fit(&self.mz, values, self.opts.sign)?
        } else {
            Trend::default()
        };
        let z: Vec<f64> = active.iter().map(|&i| values[i] - trend.at(self.mz[i])).collect();

        // Anisotropy about the station centroid.
        let n = active.len();
        let cx = active.iter().map(|&i| self.mx[i]).sum::<f64>() / n as f64;
        let cy = active.iter().map(|&i| self.my[i]).sum::<f64>() / n as f64;
        let (sin, cos) = self.opts.anisotropy_angle.to_radians().sin_cos();
        let scale = self.opts.anisotropy_scaling;
        let adjust = |x: f64, y: f64| {
            let (dx, dy) = (x - cx, y - cy);
            [cos * dx + sin * dy, (-sin * dx + cos * dy) * scale]
        };
        let pts: Vec<[f64; 2]> = active.iter().map(|&i| adjust(self.mx[i], self.my[i])).collect();

        let (ny, nx) = (self.topo.ny(), self.topo.nx());
        if n == 1 {
            let est = Raster::filled(ny, nx, z[0]);
            return Ok((trend.retrend(&est, &self.topo.dem), Raster::zeros(ny, nx)));
        }

        let mut vgm = fit_variogram(&pts, &z, self.opts.model, self.opts.nlags, self.opts.weight);
        if vgm.is_flat() {
            vgm = Variogram::Linear { slope: 1.0, nugget: 0.0 };
        }
        debug!(?vgm, stations = n, "variogram fitted");

        let mut k = DMatrix::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..n {
                k[(i, j)] = vgm.gamma(dist(pts[i], pts[j]));
            }
            k[(i, n)] = 1.0;
            k[(n, i)] = 1.0;
        }
        let k_inv = k
            .try_inverse()
            .ok_or_else(|| SmrfError::numeric("", "singular kriging system"))?;

        let cells: Vec<(f64, f64)> = (0..ny * nx)
            .into_par_iter()
            .map(|cell| {
                let p = adjust(self.topo.x[cell % nx], self.topo.y[cell / nx]);
                let mut k0 = DVector::zeros(n + 1);
                for i in 0..n {
                    k0[i] = vgm.gamma(dist(pts[i], p));
                }
                k0[n] = 1.0;
                let w = &k_inv * &k0;
                let est: f64 = (0..n).map(|i| w[i] * z[i]).sum();
                (est, k0.dot(&w).max(0.0))
            })
            .collect();

        let (est, var): (Vec<f64>, Vec<f64>) = cells.into_iter().unzip();
        let est = Raster { data: est, nx, ny };
        let var = Raster { data: var, nx, ny };
        Ok((trend.retrend(&est, &self.topo.dem), var))
    }
}

fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}

/// Binned experimental semivariogram `(lag, semivariance)`.
pub fn experimental_variogram(pts: &[[f64; 2]], z: &[f64], nlags: usize) -> Vec<(f64, f64)> {
    let mut pairs = Vec::new();
    for i in 0..pts.len() {
        for j in i + 1..pts.len() {
            pairs.push((dist(pts[i], pts[j]), 0.5 * (z[i] - z[j]).powi(2)));
        }
    }
    if pairs.is_empty() {
        return Vec::new();
    }
    let dmin = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let dmax = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let width = (dmax - dmin) / nlags as f64;

    (0..nlags)
        .filter_map(|b| {
            let lo = dmin + b as f64 * width;
            let hi = if b + 1 == nlags { dmax + 1e-3 } else { lo + width };
            let in_bin: Vec<&(f64, f64)> = pairs.iter().filter(|p| p.0 >= lo && p.0 < hi).collect();
            if in_bin.is_empty() {
                return None;
            }
            let m = in_bin.len() as f64;
            Some((
                in_bin.iter().map(|p| p.0).sum::<f64>() / m,
                in_bin.iter().map(|p| p.1).sum::<f64>() / m,
            ))
        })
        .collect()
}

/// Logistic weights emphasising the short lags.
fn lag_weights(lags: &[f64], weighted: bool) -> Vec<f64> {
    if !weighted || lags.len() < 2 {
        return vec![1.0; lags.len()];
    }
    let lo = lags.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = lags.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let drange = (hi - lo).max(f64::MIN_POSITIVE);
    let k = 2.1972 / (0.1 * drange);
    let x0 = 0.7 * drange + lo;
    let w: Vec<f64> = lags.iter().map(|&l| 1.0 / (1.0 + (-k * (x0 - l)).exp())).collect();
    let s: f64 = w.iter().sum();
    w.into_iter().map(|v| v / s).collect()
}

/// Weighted least squares for `γ = a·f + c` with `a, c ≥ 0`.
fn fit_two(f: &[f64], g: &[f64], w: &[f64]) -> (f64, f64, f64) {
    let sse = |a: f64, c: f64| -> f64 {
        f.iter().zip(g).zip(w).map(|((f, g), w)| w * (a * f + c - g).powi(2)).sum()
    };
    let sw: f64 = w.iter().sum();
    let sf: f64 = f.iter().zip(w).map(|(f, w)| w * f).sum();
    let sg: f64 = g.iter().zip(w).map(|(g, w)| w * g).sum();
    let sff: f64 = f.iter().zip(w).map(|(f, w)| w * f * f).sum();
    let sfg: f64 = f.iter().zip(g).zip(w).map(|((f, g), w)| w * f * g).sum();

    let det = sw * sff - sf * sf;
    let mut candidates = Vec::new();
    if det.abs() > 1e-300 {
        let a = (sw * sfg - sf * sg) / det;
        let c = (sff * sg - sf * sfg) / det;
        if a >= 0.0 && c >= 0.0 {
            candidates.push((a, c));
        }
    }
    // Boundary solutions.
    if sff > 0.0 {
        candidates.push(((sfg / sff).max(0.0), 0.0));
    }
    if sw > 0.0 {
        candidates.push((0.0, (sg / sw).max(0.0)));
    }
    candidates
        .into_iter()
        .map(|(a, c)| (a, c, sse(a, c)))
        .min_by(|x, y| x.2.total_cmp(&y.2))
        .unwrap_or((0.0, 0.0, f64::INFINITY))
}

pub fn fit_variogram(pts: &[[f64; 2]], z: &[f64], model: VariogramKind, nlags: usize, weighted: bool) -> Variogram {
    let exp = experimental_variogram(pts, z, nlags);
    let lags: Vec<f64> = exp.iter().map(|e| e.0).collect();
    let gam: Vec<f64> = exp.iter().map(|e| e.1).collect();
    let w = lag_weights(&lags, weighted);
    let max_lag = lags.iter().copied().fold(0.0, f64::max).max(1.0);

    match model {
        VariogramKind::Linear => {
            let (slope, nugget, _) = fit_two(&lags, &gam, &w);
            Variogram::Linear { slope, nugget }
        }
        VariogramKind::Power => {
            let mut best = (f64::INFINITY, Variogram::Power { scale: 0.0, exponent: 1.0, nugget: 0.0 });
            for k in 1..200 {
                let exponent = k as f64 * 0.01;
                let f: Vec<f64> = lags.iter().map(|h| h.powf(exponent)).collect();
                let (scale, nugget, sse) = fit_two(&f, &gam, &w);
                if sse < best.0 {
                    best = (sse, Variogram::Power { scale, exponent, nugget });
                }
            }
            best.1
        }
        kind => {
            let mut best = (f64::INFINITY, (0.0, max_lag, 0.0));
            for k in 1..=200 {
                let range = max_lag * 2.0 * k as f64 / 200.0;
                let f: Vec<f64> = lags.iter().map(|&h| shape(kind, h, range)).collect();
                let (psill, nugget, sse) = fit_two(&f, &gam, &w);
                if sse < best.0 {
                    best = (sse, (psill, range, nugget));
                }
            }
            let (psill, range, nugget) = best.1;
            match kind {
                VariogramKind::Gaussian => Variogram::Gaussian { psill, range, nugget },
                VariogramKind::Spherical => Variogram::Spherical { psill, range, nugget },
                _ => Variogram::Exponential { psill, range, nugget },
            }
        }
    }
}
