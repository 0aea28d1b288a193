//! Two-stream solution for a single-layer atmosphere over a horizontal
//! surface, after Meador & Weaver (1980), hybrid method.

use crate::error::{Result, SmrfError};

/// Twostream output. Irradiances are W/m².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TwoStream {
    pub reflectance: f64,
    pub transmittance: f64,
    pub direct_transmittance: f64,
    pub upwelling: f64,
    pub irradiance_at_bottom: f64,
    pub irradiance_normal_to_beam: f64,
}

/// Optical properties of the layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    /// Optical depth; zero means infinite.
    pub tau: f64,
    /// Single-scattering albedo.
    pub omega: f64,
    /// Asymmetry factor.
    pub g: f64,
    /// Substrate reflectance; negative values are taken as zero.
    pub r0: f64,
}

/// Solve for incidence `cosz` and top-of-atmosphere beam `s0`. A sun at or
/// below the horizon returns all zeros.
pub fn twostream(cosz: f64, s0: f64, layer: Layer) -> Result<TwoStream> {
    if cosz <= 0.0 {
        return Ok(TwoStream::default());
    }
    if s0 <= 0.0 {
        return Err(SmrfError::numeric("twostream", format!("beam irradiance {s0} is not positive")));
    }
    let Layer { tau, omega, g, r0 } = layer;
    let tau = if tau == 0.0 { 1e15 } else { tau };
    let r0 = r0.max(0.0);

    let [mut gam1, gam2, gam3, gam4] = mw_gamma(cosz, omega, g)?;
    let alph1 = gam1 * gam4 + gam2 * gam3;
    let alph2 = gam2 * gam4 + gam1 * gam3;
    if gam1 < gam2 {
        return Err(SmrfError::numeric("twostream", format!("gamma1 {gam1} < gamma2 {gam2}")));
    }
    if gam1 == gam2 {
        gam1 += f64::EPSILON;
    }

    let xi = ((gam1 - gam2) * (gam2 + gam1)).sqrt();
    let em = (-tau * xi).exp();
    let et = (-tau / cosz).exp();
    let ep = (tau * xi).exp();
    let gpx = xi + gam1;
    let opx = cosz * xi + 1.0;
    let omx = 1.0 - cosz * xi;
    let gmx = gam1 - xi;
    let rm = gam2 - gmx * r0;
    let rp = gam2 - gpx * r0;
    let denrt = ep * gpx * rm - em * gmx * rp;

    let (refl, trans, btrans) = if (em == 0.0 && et == 0.0) || ep >= 1e15 {
        // Semi-infinite layer.
        (omega * (gam3 * xi + alph2) / (gpx * opx), 0.0, 0.0)
    } else {
        let refl = (omega * (ep * rm * (gam3 * xi + alph2) / opx - em * rp * (alph2 - gam3 * xi) / omx)
            + 2.0
                * et
                * gam2
                * (r0 - ((alph1 * r0 - alph2) * cosz + gam4 * r0 + gam3) * omega / (omx * opx))
                * xi)
            / denrt;
        let trans = (et
            * (ep * gpx * (gam2 - omega * (alph2 - gam3 * xi) / omx)
                - em * gmx * (gam2 - omega * (gam3 * xi + alph2) / opx))
            + 2.0 * gam2 * (alph1 * cosz + gam4) * omega * xi / (omx * opx))
            / denrt;
        (refl, trans, et)
    };

    if refl < 0.0 || trans < 0.0 || trans < btrans * cosz - 1e-12 {
        return Err(SmrfError::numeric(
            "twostream",
            format!("non-physical solution R={refl} T={trans} Tb={btrans}"),
        ));
    }

    Ok(TwoStream {
        reflectance: refl,
        transmittance: trans,
        direct_transmittance: btrans,
        upwelling: refl * cosz * s0,
        irradiance_at_bottom: trans * cosz * s0,
        irradiance_normal_to_beam: btrans * s0,
    })
}

/// Meador–Weaver hybrid gammas.
fn mw_gamma(cosz: f64, omega: f64, g: f64) -> Result<[f64; 4]> {
    let b0 = beta_naught(cosz, g)?;
    let hd = 4.0 * (1.0 - g * g * (1.0 - cosz));
    let (g1, g2) = if g == 1.0 {
        let v = (g * ((3.0 * (g - 1.0) + 4.0 * b0) * g - 3.0) + 3.0) / hd;
        (v, v)
    } else {
        (
            (g * (g * ((3.0 * g + 4.0 * b0) * omega - 3.0) - 3.0 * omega) - 4.0 * omega + 7.0) / hd,
            (g * (g * ((3.0 * g + 4.0 * (b0 - 1.0)) * omega + 1.0) - 3.0 * omega) + 4.0 * omega - 1.0) / hd,
        )
    };
    Ok([g1, g2, b0, 1.0 - b0])
}

/// Backscatter fraction of the direct beam from the Legendre expansion of the
/// Henyey–Greenstein phase function.
fn beta_naught(cosz: f64, g: f64) -> Result<f64> {
    const MAXNO: usize = 2048;
    const TOL: f64 = 1e-9;

    if !(cosz > 0.0 && cosz <= 1.0) || !(0.0..=1.0).contains(&g) {
        return Err(SmrfError::numeric("twostream", format!("beta0 needs 0 < cosz <= 1 and 0 <= g <= 1, got {cosz}, {g}")));
    }
    if g == 0.0 {
        return Ok(0.5);
    }

    let (mut pnm2, mut pnm1) = (1.0, cosz);
    let mut fm = -1.0 / 8.0;
    let mut gn = 7.0 * g * g * g;
    let mut sum = 3.0 * g * cosz / 2.0;
    for n in 2..MAXNO {
        let nf = n as f64;
        let pn = ((2.0 * nf - 1.0) * cosz * pnm1 + (1.0 - nf) * pnm2) / nf;
        // Even terms vanish.
        if n % 2 == 1 {
            let last = sum;
            sum = last + gn * fm * pn;
            if ((sum - last) / sum).abs() < TOL && sum <= 1.0 {
                break;
            }
            let m = (nf - 1.0) / 2.0;
            fm *= -(2.0 * m + 1.0) / (2.0 * (m + 2.0));
            gn *= g * g * (4.0 * m + 7.0) / (4.0 * m + 3.0);
        }
        pnm2 = pnm1;
        pnm1 = pn;
    }
    Ok((1.0 - sum.min(1.0)) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Cases from the twostream manual page.
    #[test]
    fn reference_cases() {
        let cases = [
            // cosz, s0, tau, omega, g, r0 -> R, T, Tb, up, bottom, normal
            (0.68, 159.0, 0.2, 0.85, 0.3, 0.5, [0.472814, 0.912634, 0.745189, 51.1207, 98.674, 118.485]),
            (0.05, 60.0, 0.3, 0.8, 0.35, 0.6, [0.577519, 0.365645, 0.00247875, 1.73256, 1.09694, 0.148725]),
            (0.88, 1200.0, 0.2, 0.7, 0.3, 0.55, [0.465302, 0.912601, 0.796703, 491.359, 963.707, 956.044]),
        ];
        for (cosz, s0, tau, omega, g, r0, want) in cases {
            let r = twostream(cosz, s0, Layer { tau, omega, g, r0 }).unwrap();
            let got = [
                r.reflectance,
                r.transmittance,
                r.direct_transmittance,
                r.upwelling,
                r.irradiance_at_bottom,
                r.irradiance_normal_to_beam,
            ];
            for (g, w) in got.iter().zip(want) {
                assert_relative_eq!(*g, w, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn sun_down_is_zero() {
        let r = twostream(0.0, 1000.0, Layer { tau: 0.2, omega: 0.85, g: 0.3, r0: 0.5 }).unwrap();
        assert_eq!(r, TwoStream::default());
    }

    #[test]
    fn isotropic_scattering_backscatters_half() {
        assert_relative_eq!(beta_naught(0.5, 0.0).unwrap(), 0.5);
    }
}
