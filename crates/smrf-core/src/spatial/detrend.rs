//! Linear elevation trend shared by every kernel.

use crate::error::{Result, SmrfError};
use crate::raster::Raster;

/// `value = slope·z + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
}

impl Trend {
    /// Least-squares fit over the stations whose value is not NaN.
    ///
    /// `sign` constrains the slope: `1` requires it positive, `-1` negative,
    /// `0` accepts either. A violating fit becomes the zero trend. Fewer than
    /// two distinct elevations give a flat trend through the mean.
    pub fn fit(z: &[f64], values: &[f64], sign: i32) -> Result<Self> {
        let pts: Vec<(f64, f64)> = z
            .iter()
            .zip(values)
            .filter(|(_, v)| !v.is_nan())
            .map(|(&z, &v)| (z, v))
            .collect();
        if pts.is_empty() {
            return Err(SmrfError::AllNaN {
                variable: String::new(),
                time: String::new(),
            });
        }

        let n = pts.len() as f64;
        let zm = pts.iter().map(|p| p.0).sum::<f64>() / n;
        let vm = pts.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = pts.iter().map(|p| (p.0 - zm).powi(2)).sum();
        if sxx <= f64::EPSILON * zm.abs().max(1.0) {
            return Ok(Self {
                slope: 0.0,
                intercept: vm,
            });
        }
        let sxy: f64 = pts.iter().map(|p| (p.0 - zm) * (p.1 - vm)).sum();
        let slope = sxy / sxx;

        if (sign == 1 && slope < 0.0) || (sign == -1 && slope > 0.0) {
            return Ok(Self::default());
        }
        Ok(Self {
            slope,
            intercept: vm - slope * zm,
        })
    }

    #[inline]
    pub fn at(&self, z: f64) -> f64 {
        self.slope * z + self.intercept
    }

    /// Residuals `v − trend(z)`; NaN stays NaN.
    pub fn detrend(&self, z: &[f64], values: &[f64]) -> Vec<f64> {
        z.iter().zip(values).map(|(&z, &v)| v - self.at(z)).collect()
    }

    /// Add the trend back over the DEM.
    pub fn retrend(&self, field: &Raster, dem: &Raster) -> Raster {
        field.zip_map(dem, |r, z| r + self.at(z))
    }
}
