//! Clear-sky shortwave over terrain, and its cloud and canopy corrections.
//!
//! `elevrad` runs the two-stream model per pixel with an optical depth
//! scaled by the standard-atmosphere pressure at the cell elevation.
//! `toporad` then adds the terrain-reflected diffuse and projects the beam
//! onto the local slope.

use rayon::prelude::*;

use super::phys::std_pressure;
use super::twostream::{twostream, Layer};
use crate::error::Result;
use crate::raster::Raster;

/// Beam and diffuse irradiance for one band, W/m².
#[derive(Debug, Clone, PartialEq)]
pub struct BandRadiation {
    pub beam: Raster,
    pub diffuse: Raster,
}

/// Atmosphere for the clear-sky solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearSky {
    /// Elevation (m) at which `tau` applies.
    pub tau_elevation: f64,
    pub tau: f64,
    pub omega: f64,
    pub gamma: f64,
}

/// Elevation-distributed clear-sky beam (normal to the sun) and diffuse
/// (on a horizontal surface) irradiance.
///
/// `s0` is the exo-atmospheric band irradiance, `r0` the substrate albedo.
pub fn elevrad(dem: &Raster, s0: f64, cosz: f64, sky: ClearSky, r0: f64) -> Result<BandRadiation> {
    let p_ref = std_pressure(sky.tau_elevation);
    let cells: Vec<(f64, f64)> = dem
        .data
        .par_iter()
        .map(|&z| {
            let layer = Layer {
                tau: sky.tau * std_pressure(z) / p_ref,
                omega: sky.omega,
                g: sky.gamma,
                r0,
            };
            let r = twostream(cosz, s0, layer)?;
            let beam = s0 * r.direct_transmittance;
            let diffuse = s0 * cosz * (r.transmittance - r.direct_transmittance);
            Ok((beam, diffuse))
        })
        .collect::<Result<_>>()?;

    let (beam, diffuse): (Vec<f64>, Vec<f64>) = cells.into_iter().unzip();
    Ok(BandRadiation {
        beam: Raster::from_vec(dem.ny, dem.nx, beam)?,
        diffuse: Raster::from_vec(dem.ny, dem.nx, diffuse)?,
    })
}

/// Terrain correction of [`elevrad`] output.
///
/// Diffuse on the slope is the sky-view share of the sky diffuse plus the
/// radiation reflected from surrounding terrain; the beam is scaled by the
/// illumination angle.
pub fn toporad(
    clear: &BandRadiation,
    cosz: f64,
    illum: &Raster,
    sky_view: &Raster,
    terrain_config: &Raster,
    albedo: f64,
) -> BandRadiation {
    let n = clear.beam.len();
    let mut beam = Vec::with_capacity(n);
    let mut diffuse = Vec::with_capacity(n);
    for i in 0..n {
        let (b, d) = (clear.beam.data[i], clear.diffuse.data[i]);
        let svf = sky_view.data[i];
        diffuse.push(d * svf + (d * (1.0 - svf) + b * cosz) * terrain_config.data[i] * albedo);
        beam.push(b * illum.data[i]);
    }
    BandRadiation {
        beam: Raster { data: beam, nx: clear.beam.nx, ny: clear.beam.ny },
        diffuse: Raster { data: diffuse, nx: clear.beam.nx, ny: clear.beam.ny },
    }
}

// ── Cloud correction ─────────────────────────────────────────────────────────

const CRAT1: f64 = 0.15;
const CRAT2: f64 = 0.99;
const CCOEF: f64 = 1.38;

/// Split a cloud-attenuated global irradiance back into beam and diffuse.
///
/// Below `CRAT1` everything is diffuse; above `CRAT2` the clear diffuse is
/// kept and the rest goes to the beam.
pub fn cf_cloud_cell(beam: f64, diffuse: f64, cf: f64) -> (f64, f64) {
    let c_grad = (beam + diffuse) * cf;
    if cf > CRAT2 {
        let d = diffuse * cf;
        return (c_grad - d, d);
    }
    if cf <= CRAT1 {
        return (0.0, c_grad);
    }
    let bf_c = CCOEF * (cf - CRAT1) * (cf - CRAT1);
    let c_brad = c_grad * bf_c;
    (c_brad, c_grad - c_brad)
}

pub fn cf_cloud(clear: &BandRadiation, cloud_factor: &Raster) -> BandRadiation {
    let mut beam = clear.beam.clone();
    let mut diffuse = clear.diffuse.clone();
    for i in 0..beam.len() {
        let (b, d) = cf_cloud_cell(clear.beam.data[i], clear.diffuse.data[i], cloud_factor.data[i]);
        beam.data[i] = b;
        diffuse.data[i] = d;
    }
    BandRadiation { beam, diffuse }
}

// ── Canopy ───────────────────────────────────────────────────────────────────

/// Beam through a canopy of `height` with extinction `k`. The illumination
/// cosine is floored at 0.01.
pub fn veg_beam(beam: &Raster, height: &Raster, illum: &Raster, k: &Raster) -> Raster {
    let mut out = beam.clone();
    for (i, v) in out.data.iter_mut().enumerate() {
        let mu = illum.data[i].max(0.01);
        *v *= (-k.data[i] * height.data[i] / mu).exp();
    }
    out
}

pub fn veg_diffuse(diffuse: &Raster, tau: &Raster) -> Raster {
    diffuse.zip_map(tau, |d, t| d * t)
}

pub fn veg_correct(rad: &BandRadiation, height: &Raster, illum: &Raster, k: &Raster, tau: &Raster) -> BandRadiation {
    BandRadiation {
        beam: veg_beam(&rad.beam, height, illum, k),
        diffuse: veg_diffuse(&rad.diffuse, tau),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SKY: ClearSky = ClearSky {
        tau_elevation: 100.0,
        tau: 0.2,
        omega: 0.85,
        gamma: 0.3,
    };

    /// Thinner air above the reference elevation lets more beam through.
    #[test]
    fn beam_increases_with_elevation() {
        let dem = Raster::from_vec(1, 3, vec![100.0, 1500.0, 3000.0]).unwrap();
        let r = elevrad(&dem, 600.0, 0.7, SKY, 0.6).unwrap();
        assert!(r.beam.data[0] < r.beam.data[1] && r.beam.data[1] < r.beam.data[2]);
        assert!(r.diffuse.data.iter().all(|&d| d > 0.0), "diffuse positive in daylight");
        assert!(r.beam.data.iter().all(|&b| b < 600.0));
    }

    #[test]
    fn reference_elevation_matches_twostream() {
        let dem = Raster::filled(1, 1, 100.0);
        let r = elevrad(&dem, 159.0, 0.68, SKY, 0.5).unwrap();
        // Beam normal to the sun is S·Tb from the manual-page case.
        assert_relative_eq!(r.beam.data[0], 118.485, max_relative = 1e-4);
    }

    /// Flat open ground with no terrain reflection keeps the sky diffuse and
    /// sees `beam · μ` on the surface.
    #[test]
    fn toporad_on_open_flat_ground() {
        let clear = BandRadiation {
            beam: Raster::filled(1, 1, 500.0),
            diffuse: Raster::filled(1, 1, 80.0),
        };
        let illum = Raster::filled(1, 1, 0.6);
        let r = toporad(&clear, 0.6, &illum, &Raster::filled(1, 1, 1.0), &Raster::zeros(1, 1), 0.8);
        assert_relative_eq!(r.diffuse.data[0], 80.0);
        assert_relative_eq!(r.beam.data[0], 300.0);

        let r = toporad(&clear, 0.6, &illum, &Raster::filled(1, 1, 0.9), &Raster::filled(1, 1, 0.1), 0.8);
        let expect = 80.0 * 0.9 + (80.0 * 0.1 + 500.0 * 0.6) * 0.1 * 0.8;
        assert_relative_eq!(r.diffuse.data[0], expect, epsilon = 1e-9);
    }

    #[test]
    fn cloud_correction_regimes() {
        // Overcast: all diffuse.
        let (b, d) = cf_cloud_cell(400.0, 100.0, 0.1);
        assert_eq!(b, 0.0);
        assert_relative_eq!(d, 50.0);
        // Clear: diffuse scaled, beam takes the rest.
        let (b, d) = cf_cloud_cell(400.0, 100.0, 1.0);
        assert_relative_eq!(d, 100.0);
        assert_relative_eq!(b, 400.0);
        // Partial cloud conserves the attenuated total.
        let (b, d) = cf_cloud_cell(400.0, 100.0, 0.6);
        assert_relative_eq!(b + d, 300.0, epsilon = 1e-9);
        assert_relative_eq!(b, 300.0 * 1.38 * 0.45 * 0.45, epsilon = 1e-9);
    }

    #[test]
    fn canopy_attenuates() {
        let beam = Raster::filled(1, 2, 100.0);
        let height = Raster::from_vec(1, 2, vec![0.0, 10.0]).unwrap();
        let illum = Raster::filled(1, 2, 0.5);
        let k = Raster::filled(1, 2, 0.033);
        let out = veg_beam(&beam, &height, &illum, &k);
        assert_relative_eq!(out.data[0], 100.0);
        assert_relative_eq!(out.data[1], 100.0 * (-0.66f64).exp(), epsilon = 1e-9);

        let d = veg_diffuse(&Raster::filled(1, 1, 50.0), &Raster::filled(1, 1, 0.8));
        assert_relative_eq!(d.data[0], 40.0);
    }
}
