//! Incoming longwave radiation: clear-sky models, cloud corrections and the
//! terrain and canopy adjustments.
//!
//! Air temperatures are °C at the API and converted to K internally. Vapor
//! pressure is kPa for the empirical models and Pa for the topographic
//! integrator.

use rayon::prelude::*;

use super::constants::*;
use super::phys::{brutsaert, hysat, sati};
use crate::config::{ClearSkyMethod, CloudMethod};
use crate::raster::Raster;

/// Canopy taller than this (m) emits at air temperature.
pub const VEG_HEIGHT_THRESHOLD: f64 = 2.0;

#[inline]
fn long_wave(emissivity: f64, tk: f64) -> f64 {
    emissivity * STEF_BOLTZ * tk.powi(4)
}

/// Precipitable water (Prata 1996), `ea` kPa, `tk` K.
#[inline]
fn precipitable_water(tk: f64, ea: f64) -> f64 {
    4650.0 * ea / tk
}

// ── Clear sky ────────────────────────────────────────────────────────────────

/// Dilley & O'Brien (1998).
pub fn dilley1998(ta: f64, ea: f64) -> f64 {
    let tk = ta + FREEZE;
    let w = precipitable_water(tk, ea);
    59.38 + 113.7 * (tk / 273.16).powi(6) + 96.96 * (w / 25.0).sqrt()
}

/// Prata (1996).
pub fn prata1996(ta: f64, ea: f64) -> f64 {
    let tk = ta + FREEZE;
    let w = precipitable_water(tk, ea);
    let ec = 1.0 - (1.0 + w) * (-(1.2 + 3.0 * w).sqrt()).exp();
    long_wave(ec, tk)
}

/// Angstrom (1918).
pub fn angstrom1918(ta: f64, ea: f64) -> f64 {
    let tk = ta + FREEZE;
    long_wave(0.83 - 0.18 * 10f64.powf(-0.067 * ea), tk)
}

/// Marks & Dozier (1979) clear-sky longwave for one cell.
///
/// `ta`, `tw` air and dew point (°C), `z` elevation (m), `sky_view` the sky
/// view factor. The Brutsaert emissivity is reduced to sea level, corrected
/// for the pressure at `z` and weighted by the visible sky.
pub fn topotherm_cell(ta: f64, tw: f64, z: f64, sky_view: f64) -> f64 {
    let ta = ta + FREEZE;
    let tw = (tw + FREEZE).min(ta);
    let ea = sati(tw);
    let mut emiss = brutsaert(ta, STD_LAPSE_M, ea, z, SEA_LEVEL);
    let t0 = ta - z * STD_LAPSE_M;
    let press = hysat(SEA_LEVEL, t0, STD_LAPSE, z / 1000.0, GRAVITY, MOL_AIR);
    emiss *= press / SEA_LEVEL;
    emiss = (emiss * sky_view + (1.0 - sky_view)).min(1.0);
    long_wave(emiss, ta)
}

/// [`topotherm_cell`] over the grid, parallel over cells.
pub fn topotherm(ta: &Raster, dew_point: &Raster, dem: &Raster, sky_view: &Raster) -> Raster {
    let data: Vec<f64> = (0..ta.len())
        .into_par_iter()
        .map(|i| topotherm_cell(ta.data[i], dew_point.data[i], dem.data[i], sky_view.data[i]))
        .collect();
    Raster { data, nx: ta.nx, ny: ta.ny }
}

/// Replace the sky hidden by terrain with terrain emitting at air
/// temperature.
pub fn correct_terrain(th: f64, ta: f64, sky_view: f64) -> f64 {
    let terrain = STEF_BOLTZ * EMISS_TERRAIN * (ta + 273.15).powi(4);
    sky_view * th + (1.0 - sky_view) * terrain
}

/// Canopy emits at air temperature where it is taller than
/// [`VEG_HEIGHT_THRESHOLD`].
pub fn correct_canopy(th: f64, ta: f64, tau: f64, veg_height: f64) -> f64 {
    if veg_height > VEG_HEIGHT_THRESHOLD {
        let veg = STEF_BOLTZ * EMISS_VEG * (ta + FREEZE).powi(4);
        tau * th + (1.0 - tau) * veg
    } else {
        th
    }
}

// ── Clouds ───────────────────────────────────────────────────────────────────

/// Garen & Marks (2005).
pub fn garen2005(th: f64, cf: f64) -> f64 {
    th * (1.485 - 0.488 * cf)
}

/// Unsworth & Monteith (1975): blend the clear emissivity toward 1.
pub fn unsworth1975(th: f64, ta: f64, cf: f64) -> f64 {
    let tk = ta + FREEZE;
    let c = 1.0 - cf;
    let ec = th / (STEF_BOLTZ * tk.powi(4));
    let ea = (1.0 - 0.84 * c) * ec + 0.84 * c;
    long_wave(ea, tk)
}

/// Kimball et al. (1982), single cloud layer 11 K below air temperature.
/// `ea` kPa.
pub fn kimball1982(th: f64, ta: f64, ea: f64, cf: f64) -> f64 {
    let tk = ta + FREEZE;
    let tc = tk - 11.0;
    let c = 1.0 - cf;
    let e8z = 0.24 + 2.98e-6 * ea * ea * (3000.0 / tk).exp();
    let t8 = 1.0 - e8z * (1.4 - 0.4 * e8z);
    th + long_wave(t8 * e8z * c, tc)
}

/// Crawford & Duchon (1999).
pub fn crawford1999(th: f64, ta: f64, cf: f64) -> f64 {
    let tk = ta + FREEZE;
    (1.0 - cf) * long_wave(1.0, tk) + cf * th
}

// ── Raster level ─────────────────────────────────────────────────────────────

/// Clear-sky longwave for the configured method. `vapor_pressure` is Pa.
pub fn clear_sky(
    method: ClearSkyMethod,
    ta: &Raster,
    vapor_pressure: &Raster,
    dew_point: &Raster,
    dem: &Raster,
    sky_view: &Raster,
    terrain: bool,
) -> Raster {
    let empirical = |f: fn(f64, f64) -> f64| {
        let mut out = ta.zip_map(vapor_pressure, |t, e| f(t, e / 1000.0));
        if terrain {
            for (i, v) in out.data.iter_mut().enumerate() {
                *v = correct_terrain(*v, ta.data[i], sky_view.data[i]);
            }
        }
        out
    };
    match method {
        ClearSkyMethod::Marks1979 => topotherm(ta, dew_point, dem, sky_view),
        ClearSkyMethod::Dilley1998 => empirical(dilley1998),
        ClearSkyMethod::Prata1996 => empirical(prata1996),
        ClearSkyMethod::Angstrom1918 => empirical(angstrom1918),
    }
}

/// Cloud correction for the configured method. `vapor_pressure` is Pa.
pub fn cloud(method: CloudMethod, clear: &Raster, ta: &Raster, vapor_pressure: &Raster, cloud_factor: &Raster) -> Raster {
    let data = (0..clear.len())
        .map(|i| {
            let (th, t, cf) = (clear.data[i], ta.data[i], cloud_factor.data[i]);
            match method {
                CloudMethod::Garen2005 => garen2005(th, cf),
                CloudMethod::Unsworth1975 => unsworth1975(th, t, cf),
                CloudMethod::Kimball1982 => kimball1982(th, t, vapor_pressure.data[i] / 1000.0, cf),
                CloudMethod::Crawford1999 => crawford1999(th, t, cf),
            }
        })
        .collect();
    Raster { data, nx: clear.nx, ny: clear.ny }
}

pub fn canopy(th: &Raster, ta: &Raster, tau: &Raster, veg_height: &Raster) -> Raster {
    let data = (0..th.len())
        .map(|i| correct_canopy(th.data[i], ta.data[i], tau.data[i], veg_height.data[i]))
        .collect();
    Raster { data, nx: th.nx, ny: th.ny }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Clear-sky longwave in a cold dry mountain atmosphere is a few hundred
    /// W/m² for every model.
    #[test]
    fn clear_sky_models_are_plausible() {
        for (name, l) in [
            ("dilley", dilley1998(-5.0, 0.3)),
            ("prata", prata1996(-5.0, 0.3)),
            ("angstrom", angstrom1918(-5.0, 0.3)),
            ("topotherm", topotherm_cell(-5.0, -10.0, 2000.0, 1.0)),
        ] {
            assert!(l > 150.0 && l < 320.0, "{name} gave {l}");
        }
    }

    /// A fully blocked sky sees only the terrain.
    #[test]
    fn topotherm_without_sky_is_blackbody() {
        let l = topotherm_cell(0.0, -5.0, 1500.0, 0.0);
        assert_relative_eq!(l, STEF_BOLTZ * FREEZE.powi(4), max_relative = 1e-12);
    }

    #[test]
    fn warmer_dew_point_is_capped_at_air_temperature() {
        let a = topotherm_cell(2.0, 5.0, 1500.0, 0.9);
        let b = topotherm_cell(2.0, 2.0, 1500.0, 0.9);
        assert_relative_eq!(a, b);
    }

    /// Every cloud model returns the clear-sky value (or more) and clear skies
    /// leave the emissivity-based models unchanged.
    #[test]
    fn cloud_models_add_longwave() {
        let (th, ta, ea) = (230.0, -3.0, 0.4);
        assert_relative_eq!(unsworth1975(th, ta, 1.0), th, max_relative = 1e-12);
        assert_relative_eq!(crawford1999(th, ta, 1.0), th);
        assert_relative_eq!(kimball1982(th, ta, ea, 1.0), th);
        for cf in [0.2, 0.5, 0.8] {
            assert!(unsworth1975(th, ta, cf) > th);
            assert!(kimball1982(th, ta, ea, cf) > th);
            assert!(crawford1999(th, ta, cf) > th);
        }
        assert_relative_eq!(garen2005(th, 1.0), th * 0.997, max_relative = 1e-12);
    }

    #[test]
    fn canopy_only_applies_to_tall_vegetation() {
        assert_eq!(correct_canopy(250.0, 0.0, 0.5, 1.0), 250.0);
        let expect = 0.5 * 250.0 + 0.5 * STEF_BOLTZ * EMISS_VEG * FREEZE.powi(4);
        assert_relative_eq!(correct_canopy(250.0, 0.0, 0.5, 10.0), expect);
    }

    #[test]
    fn terrain_correction_with_open_sky_is_identity() {
        assert_relative_eq!(correct_terrain(240.0, -2.0, 1.0), 240.0);
        assert!(correct_terrain(240.0, -2.0, 0.5) > 240.0);
    }
}
