use serde::{Deserialize, Serialize};

use crate::error::{Result, SmrfError};

/// A 2D grid of f64 values aligned with the topography, row-major.
/// Row 0 is the first element of the topo `y` vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    /// Row-major values, length = `nx × ny`.
    pub data: Vec<f64>,
    pub nx: usize,
    pub ny: usize,
}

impl Raster {
    /// Create a raster filled with the given value.
    pub fn filled(ny: usize, nx: usize, fill: f64) -> Self {
        Self {
            data: vec![fill; nx * ny],
            nx,
            ny,
        }
    }

    pub fn zeros(ny: usize, nx: usize) -> Self {
        Self::filled(ny, nx, 0.0)
    }

    /// Wrap an existing row-major buffer. Fails if the length does not match.
    pub fn from_vec(ny: usize, nx: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != nx * ny {
            return Err(SmrfError::config(format!(
                "raster buffer has {} values, expected {ny}x{nx}",
                data.len()
            )));
        }
        Ok(Self { data, nx, ny })
    }

    /// Build from nested rows as found in JSON documents.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let ny = rows.len();
        let nx = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != nx) {
            return Err(SmrfError::config("ragged raster rows"));
        }
        Ok(Self {
            data: rows.iter().flatten().copied().collect(),
            nx,
            ny,
        })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.nx + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        self.data[row * self.nx + col] = val;
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Raster) -> bool {
        self.shape() == other.shape()
    }

    /// Apply `f` to every cell, producing a new raster.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Raster {
        Raster {
            data: self.data.iter().map(|&v| f(v)).collect(),
            nx: self.nx,
            ny: self.ny,
        }
    }

    /// Combine two rasters of the same shape cell by cell.
    pub fn zip_map(&self, other: &Raster, f: impl Fn(f64, f64) -> f64) -> Raster {
        debug_assert!(self.same_shape(other));
        Raster {
            data: self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect(),
            nx: self.nx,
            ny: self.ny,
        }
    }

    /// Minimum ignoring NaN. Returns NaN for an all-NaN raster.
    pub fn min(&self) -> f64 {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
    }

    /// Maximum ignoring NaN. Returns NaN for an all-NaN raster.
    pub fn max(&self) -> f64 {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
    }

    /// Mean ignoring NaN.
    pub fn mean(&self) -> f64 {
        let (sum, n) = self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
        if n == 0 { f64::NAN } else { sum / n as f64 }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().filter(|v| !v.is_nan()).sum()
    }

    pub fn count_nan(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }

    /// Clamp every value into `[min, max]`; NaN passes through.
    pub fn clamp_in_place(&mut self, min: f64, max: f64) {
        for v in &mut self.data {
            *v = clamp_value(*v, min, max);
        }
    }

    pub fn clamped(mut self, min: f64, max: f64) -> Raster {
        self.clamp_in_place(min, max);
        self
    }

    /// Replace NaN cells by 1-D linear interpolation over the flattened
    /// buffer. Leading and trailing NaN take the nearest valid value.
    /// Returns the number of cells filled.
    pub fn fill_nan_linear(&mut self) -> usize {
        let valid: Vec<usize> = (0..self.data.len()).filter(|&i| !self.data[i].is_nan()).collect();
        if valid.is_empty() || valid.len() == self.data.len() {
            return 0;
        }
        let mut filled = 0;
        let mut next = 0usize;
        for i in 0..self.data.len() {
            if !self.data[i].is_nan() {
                continue;
            }
            while next < valid.len() && valid[next] < i {
                next += 1;
            }
            let v = if next == 0 {
                self.data[valid[0]]
            } else if next == valid.len() {
                self.data[valid[valid.len() - 1]]
            } else {
                let (i0, i1) = (valid[next - 1], valid[next]);
                let f = (i - i0) as f64 / (i1 - i0) as f64;
                self.data[i0] + f * (self.data[i1] - self.data[i0])
            };
            self.data[i] = v;
            filled += 1;
        }
        filled
    }
}

/// Clamp a single value; values at or beyond a bound snap to it, NaN is kept.
#[inline]
pub fn clamp_value(v: f64, min: f64, max: f64) -> f64 {
    if v.is_nan() {
        v
    } else if v <= min {
        min
    } else if v >= max {
        max
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_row_major() {
        let mut r = Raster::zeros(2, 3);
        r.set(1, 2, 5.0);
        assert_eq!(r.data[5], 5.0);
        assert_eq!(r.get(1, 2), 5.0);
    }

    #[test]
    fn clamp_keeps_nan() {
        let r = Raster::from_vec(1, 4, vec![-5.0, 0.5, f64::NAN, 9.0]).unwrap();
        let c = r.clamped(0.0, 1.0);
        assert_eq!(c.data[0], 0.0);
        assert_eq!(c.data[1], 0.5);
        assert!(c.data[2].is_nan());
        assert_eq!(c.data[3], 1.0);
    }

    #[test]
    fn fill_nan_interpolates_and_holds_edges() {
        let mut r = Raster::from_vec(1, 6, vec![f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN, f64::NAN]).unwrap();
        let n = r.fill_nan_linear();
        assert_eq!(n, 4);
        assert_eq!(r.data, vec![1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn min_max_ignore_nan() {
        let r = Raster::from_vec(1, 3, vec![f64::NAN, -2.0, 4.0]).unwrap();
        assert_eq!(r.min(), -2.0);
        assert_eq!(r.max(), 4.0);
        assert_eq!(r.mean(), 1.0);
    }

    #[test]
    fn from_vec_rejects_bad_length() {
        assert!(Raster::from_vec(2, 2, vec![0.0; 3]).is_err());
    }
}
