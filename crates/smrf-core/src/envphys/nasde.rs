//! New-snow density and precipitation phase from precipitation temperature.
//!
//! Temperatures are °C, densities kg/m³, snow fraction in `[0, 1]`. Every
//! model returns zero fraction and density where no precipitation fell.

use crate::config::NasdeModel;
use crate::raster::Raster;

/// Snow fraction and density of the precipitation at one cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phase {
    pub percent_snow: f64,
    pub density: f64,
}

/// Gridded [`Phase`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseField {
    pub percent_snow: Raster,
    pub snow_density: Raster,
}

// ── Susong (1999) table ──────────────────────────────────────────────────────

/// `(upper bound, percent snow, density)`, each row covering `[previous, upper)`.
const SUSONG_TABLE: [(f64, f64, f64); 7] = [
    (-5.0, 1.0, 75.0),
    (-3.0, 1.0, 100.0),
    (-1.5, 1.0, 150.0),
    (-0.5, 1.0, 175.0),
    (0.0, 0.75, 200.0),
    (0.5, 0.25, 250.0),
    (f64::INFINITY, 0.0, 0.0),
];

pub fn susong1999(tpp: f64) -> Phase {
    SUSONG_TABLE
        .iter()
        .find(|(upper, _, _)| tpp < *upper)
        .map(|&(_, percent_snow, density)| Phase { percent_snow, density })
        .unwrap_or_default()
}

// ── Piecewise Susong (1999) ──────────────────────────────────────────────────

const T_MAX: f64 = 0.0;
const T_MIN: f64 = -10.0;
const T_RANGE: f64 = T_MAX - T_MIN;
const EX_MAX: f64 = 1.75;
const EX_MIN: f64 = 1.0;
const EXR: f64 = 0.75;
const TR0: f64 = 0.5;
const PCR0: f64 = 0.25;
const PC0: f64 = 0.75;
const RHO_WATER: f64 = 1000.0;

/// Snow fraction: all snow at or below −0.5 °C, tapering to none at
/// `T_MAX + 1`.
pub fn percent_snow(tpp: f64) -> f64 {
    if tpp <= -0.5 {
        1.0
    } else if tpp <= 0.0 {
        (-tpp / TR0) * PCR0 + PC0
    } else if tpp <= T_MAX + 1.0 {
        (-tpp / (T_MAX + 1.0)) * PC0 + PC0
    } else {
        0.0
    }
}

/// Floor the precipitation temperature at `T_MIN`; the snow temperature is
/// additionally capped at `T_MAX`.
fn check_temperature(tpp: f64) -> (f64, f64) {
    let tpp = tpp.max(T_MIN);
    (tpp, tpp.min(T_MAX))
}

pub fn piecewise_susong1999(tpp: f64) -> Phase {
    let (tpp, tsnow) = check_temperature(tpp);
    let ex = (EX_MIN + ((T_RANGE + (tsnow - T_MAX)) / T_RANGE) * EXR).min(EX_MAX);
    Phase {
        percent_snow: percent_snow(tpp),
        density: 50.0 + 1.7 * (tpp + 15.0).powf(ex),
    }
}

// ── Marks (2017) ─────────────────────────────────────────────────────────────

/// Piecewise-Susong density compacted by overburden (from the deposited
/// `precip`, mm) and destructive metamorphism.
pub fn marks2017(tpp: f64, precip: f64) -> Phase {
    let (_, tsnow) = check_temperature(tpp);
    let base = piecewise_susong1999(tpp);
    let swe = precip * base.percent_snow;
    if !(swe > 0.0) {
        return Phase {
            percent_snow: base.percent_snow,
            density: 0.0,
        };
    }

    let rho_ns = base.density / RHO_WATER;
    let d_rho_c = 0.026 * (-0.08 * (T_MAX - tsnow)).exp() * swe * (-21.0 * rho_ns).exp();
    let c11 = if rho_ns * RHO_WATER >= 100.0 {
        (-0.046 * (rho_ns * RHO_WATER - 100.0)).exp()
    } else {
        1.0
    };
    let d_rho_m = 0.01 * c11 * (-0.04 * (T_MAX - tsnow)).exp();
    Phase {
        percent_snow: base.percent_snow,
        density: (rho_ns + (d_rho_c + d_rho_m) * rho_ns) * RHO_WATER,
    }
}

// ── Grid ─────────────────────────────────────────────────────────────────────

/// Phase and density over the grid for the configured model.
pub fn phase_and_density(model: NasdeModel, tpp: &Raster, precip: &Raster) -> PhaseField {
    let mut percent_snow = Raster::zeros(tpp.ny, tpp.nx);
    let mut snow_density = Raster::zeros(tpp.ny, tpp.nx);
    if precip.sum() == 0.0 {
        return PhaseField { percent_snow, snow_density };
    }
    for i in 0..tpp.len() {
        let pp = precip.data[i];
        if !(pp > 0.0) {
            continue;
        }
        let p = match model {
            NasdeModel::Susong1999 => susong1999(tpp.data[i]),
            NasdeModel::PiecewiseSusong1999 => piecewise_susong1999(tpp.data[i]),
            NasdeModel::Marks2017 => marks2017(tpp.data[i], pp),
        };
        percent_snow.data[i] = p.percent_snow;
        snow_density.data[i] = p.density;
    }
    PhaseField { percent_snow, snow_density }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Deep cold, freezing and warm storms of 100 mm.
    #[test]
    fn marks2017_reference_densities() {
        let expect = [(-10.0, 78.9), (-5.0, 114.7), (0.0, 247.2), (1.0, 0.0)];
        for (t, rho) in expect {
            let p = marks2017(t, 100.0);
            assert_abs_diff_eq!(p.density, rho, epsilon = 0.1);
        }
    }

    #[test]
    fn susong_table_rows() {
        let rho: Vec<f64> = [-5.0, -3.0, 0.0].iter().map(|&t| susong1999(t).density).collect();
        assert_eq!(rho, vec![100.0, 150.0, 250.0]);
        assert_eq!(susong1999(-20.0), Phase { percent_snow: 1.0, density: 75.0 });
        assert_eq!(susong1999(0.5), Phase::default());
    }

    /// Snow fraction stays in [0, 1] and never increases with temperature.
    #[test]
    fn percent_snow_is_bounded_and_monotone() {
        let mut prev = 1.0;
        for k in 0..400 {
            let t = -10.0 + 0.05 * k as f64;
            let p = percent_snow(t);
            assert!((0.0..=1.0).contains(&p), "percent snow {p} at {t}");
            assert!(p <= prev + 1e-12, "increased at {t}");
            prev = p;
        }
    }

    #[test]
    fn piecewise_density_caps_exponent() {
        // At and above 0 °C the exponent saturates at 1.75.
        let p = piecewise_susong1999(0.0);
        assert_abs_diff_eq!(p.density, 50.0 + 1.7 * 15f64.powf(1.75), epsilon = 1e-9);
        // Below T_MIN the temperature is floored.
        assert_eq!(piecewise_susong1999(-30.0), piecewise_susong1999(-10.0));
    }

    #[test]
    fn dry_cells_are_zero() {
        let tpp = Raster::filled(1, 3, -4.0);
        let precip = Raster::from_vec(1, 3, vec![0.0, 2.0, 0.0]).unwrap();
        for model in [NasdeModel::Susong1999, NasdeModel::PiecewiseSusong1999, NasdeModel::Marks2017] {
            let f = phase_and_density(model, &tpp, &precip);
            assert_eq!(f.percent_snow.data[0], 0.0);
            assert_eq!(f.snow_density.data[2], 0.0);
            assert_eq!(f.percent_snow.data[1], 1.0, "{model:?}");
            assert!(f.snow_density.data[1] > 0.0);
        }
        let none = phase_and_density(NasdeModel::Marks2017, &tpp, &Raster::zeros(1, 3));
        assert_eq!(none.snow_density.sum(), 0.0);
    }
}
