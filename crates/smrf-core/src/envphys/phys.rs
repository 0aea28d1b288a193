//! Standard-atmosphere and humidity relations.
//!
//! Temperatures are Kelvin unless a function says otherwise; pressures are Pa.

use super::constants::*;
use crate::error::{Result, SmrfError};

/// Integral of the hydrostatic equation over a layer with a linear
/// temperature profile.
///
/// `pb` base pressure, `tb` base temperature (K), `lapse` (K/km), `h` layer
/// thickness (km), `g` (m/s²), `m` molecular weight (kg/kmole).
pub fn hysat(pb: f64, tb: f64, lapse: f64, h: f64, g: f64, m: f64) -> f64 {
    if lapse == 0.0 {
        pb * (-g * m * h * 1e3 / (RGAS * tb)).exp()
    } else {
        pb * (tb / (tb + lapse * h)).powf(g * m / (RGAS * lapse * 1e-3))
    }
}

/// Standard-atmosphere pressure at elevation `z` metres.
pub fn std_pressure(z: f64) -> f64 {
    hysat(SEA_LEVEL, STD_AIRTMP, STD_LAPSE, z / 1000.0, GRAVITY, MOL_AIR)
}

/// Saturation vapor pressure over water (Goff–Gratch).
pub fn satw(tk: f64) -> f64 {
    if tk <= 0.0 {
        return f64::NAN;
    }
    let btk = BOIL / tk;
    let x = -7.90298 * (btk - 1.0) + 5.02808 * btk.log10()
        - 1.3816e-7 * (10f64.powf(1.1344e1 * (1.0 - tk / BOIL)) - 1.0)
        + 8.1328e-3 * (10f64.powf(-3.49149 * (btk - 1.0)) - 1.0)
        + SEA_LEVEL.log10();
    10f64.powf(x)
}

/// Saturation vapor pressure over ice below freezing, over water above.
pub fn sati(tk: f64) -> f64 {
    if tk <= 0.0 {
        return f64::NAN;
    }
    if tk > FREEZE {
        return satw(tk);
    }
    let r = FREEZE / tk;
    100.0 * 10f64.powf(-9.09718 * (r - 1.0) - 3.56654 * r.log10() + 8.76793e-1 * (1.0 - tk / FREEZE) + 6.1071f64.log10())
}

/// Latent heat of vaporization, J/kg.
pub fn lh_vap(tk: f64) -> f64 {
    2.5e6 - 2.95573e3 * (tk - FREEZE)
}

/// Latent heat of fusion, J/kg.
pub fn lh_fus(tk: f64) -> f64 {
    3.336e5 + 1.6667e2 * (FREEZE - tk)
}

/// Atmospheric emissivity after Brutsaert, reduced to a reference level.
///
/// `lapse` K/m, `ea` vapor pressure (Pa), `z` elevation (m), `pa` pressure (Pa).
pub fn brutsaert(ta: f64, lapse: f64, ea: f64, z: f64, pa: f64) -> f64 {
    let t_prime = ta - lapse * z;
    let rh = (ea / sati(ta)).min(1.0);
    let e_prime = rh * sati(t_prime) / 100.0;
    (1.24 * (e_prime / t_prime).powf(1.0 / 7.0) * pa / SEA_LEVEL).min(1.0)
}

// ── Dew point ────────────────────────────────────────────────────────────────

/// Dew point (K) for vapor pressure `e` (Pa), inverting [`sati`] with a
/// bracketed Brent search to tolerance `tol`.
pub fn dew_point(e: f64, tol: f64) -> Result<f64> {
    if !(e > 0.0) || e > 1.5 * SEA_LEVEL {
        return Err(SmrfError::numeric(
            "dew_point",
            format!("vapor pressure {e} outside (0, 1.5 atm]"),
        ));
    }

    let mut a = FREEZE;
    while e < sati(a) {
        a *= 0.75;
    }
    let mut b = FREEZE + 15.0;
    while e > sati(b) {
        b *= 1.25;
    }
    brent(|t| e - sati(t), a, b, tol)
}

/// Brent root search on `[a, b]`; the evaluation budget is
/// `log2(|b − a| / tol)² + 1`.
pub fn brent(f: impl Fn(f64) -> f64, mut a: f64, mut b: f64, t: f64) -> Result<f64> {
    if a == b {
        return Ok(a);
    }
    let eps = f64::EPSILON;
    let tol0 = 0.5 * t + 2.0 * eps * a.abs().max(b.abs());
    let s0 = ((b - a).abs() / tol0).log2();
    let mut maxfun = (s0 * s0 + 1.0) as usize;

    let mut fa = f(a);
    let mut fb = f(b);
    if fb.abs() <= tol0 {
        return Ok(b);
    }
    if fa.abs() <= tol0 {
        return Ok(a);
    }
    if fa * fb > 0.0 {
        return Err(SmrfError::Convergence {
            message: format!("root not bracketed on [{a}, {b}]"),
        });
    }

    let (mut c, mut fc) = (b, fb);
    let (mut d, mut e) = (0.0, 0.0);
    while maxfun > 0 {
        maxfun -= 1;
        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = eps * b.abs() + t;
        let m = (c - b) / 2.0;
        if m.abs() < tol || fb == 0.0 {
            return Ok(b);
        }

        if e.abs() < tol || fa.abs() <= fb.abs() {
            d = m;
            e = m;
        } else {
            let s = fb / fa;
            let mut p;
            let mut q;
            if a == c {
                p = 2.0 * m * s;
                q = 1.0 - s;
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * m * qa * (qa - r) - (b - a) * (r - 1.0));
                q = (qa - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            } else {
                p = -p;
            }
            let prev_e = e;
            e = d;
            if 2.0 * p < 3.0 * m * q - (tol * q).abs() && p < (prev_e * q / 2.0).abs() {
                d = p / q;
            } else {
                d = m;
                e = m;
            }
        }

        a = b;
        fa = fb;
        if d.abs() > tol {
            b += d;
        } else if m > 0.0 {
            b += tol;
        } else {
            b -= tol;
        }
        fb = f(b);
    }
    Err(SmrfError::Convergence {
        message: "Brent search exhausted its evaluation budget".to_string(),
    })
}

// ── Wet bulb ─────────────────────────────────────────────────────────────────

/// Wet- or ice-bulb temperature (K) from air and dew point temperature (K)
/// and pressure (Pa). Newton iteration on the psychrometric equation.
pub fn wet_bulb(ta: f64, dpt: f64, press: f64) -> Result<f64> {
    const CONVERGE: f64 = 1e-4;
    const MAX_ITER: usize = 10;

    let xlh = if ta <= FREEZE {
        lh_vap((ta + dpt) / 2.0) + lh_fus((ta + dpt) / 2.0)
    } else if dpt <= FREEZE {
        let fu_fac = (FREEZE - dpt) / (ta - dpt);
        lh_vap((ta + dpt) / 2.0) + fu_fac * lh_fus((FREEZE + dpt) / 2.0)
    } else {
        lh_vap((ta + dpt) / 2.0)
    };

    let ea = sati(dpt);
    let psyc = (MOL_H2O / MOL_AIR) * xlh / (CP_AIR * press);

    let mut ti = ta;
    for _ in 0..MAX_ITER {
        let esat = sati(ti);
        let dedt = xlh * esat / (RH2O * ti * ti);
        let pf = (ti - ta) + psyc * (esat - ea);
        let next = ti - pf / (1.0 + psyc * dedt);
        let delta = (ti - next).abs();
        ti = next;
        if delta <= CONVERGE {
            return Ok(ti);
        }
    }
    Err(SmrfError::Convergence {
        message: format!("wet bulb did not converge in {MAX_ITER} iterations (ta {ta}, dpt {dpt})"),
    })
}

/// Pressure used by the wet-bulb solve; sea level exactly at `z == 0`.
pub fn wet_bulb_pressure(z: f64) -> f64 {
    if z == 0.0 {
        SEA_LEVEL
    } else {
        std_pressure(z)
    }
}
