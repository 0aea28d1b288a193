//! Snow albedo from grain growth since the last storm, with optional
//! litter decay.
//!
//! Grain radius grows from `grain_size` toward `max_grain` with decimal days
//! since the last storm; visible grains are scaled by a contamination factor.

use chrono::{DateTime, TimeZone};

use super::constants::*;
use crate::raster::Raster;

/// Visible and near-infrared albedo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralAlbedo {
    pub vis: f64,
    pub ir: f64,
}

/// Grain-growth parameters, micrometres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainGrowth {
    pub grain_size: f64,
    pub max_grain: f64,
    /// Visible contamination factor, 1 to 10.
    pub dirt: f64,
}

/// Relative grain growth at `t` decimal days, 0 at `t = 0` and tending to 1.
pub fn growth(t: f64) -> f64 {
    const A: f64 = 4.0;
    const B: f64 = 3.0;
    const C: f64 = 2.0;
    const D: f64 = 1.0;
    let factor = (A + B * t + t * t) / (C + D * t + t * t) - 1.0;
    1.0 - factor
}

/// Clean-snow albedo `telapsed` days after the last storm.
///
/// A sun below the horizon removes the zenith enhancement but still
/// returns the base albedo; callers that need zeros at night handle that.
pub fn albedo(telapsed: f64, cosz: f64, g: GrainGrowth) -> SpectralAlbedo {
    let gf = growth(telapsed + 1.0);

    let radius_ir = g.grain_size.sqrt();
    let range_ir = g.max_grain.sqrt() - radius_ir;
    let radius_v = (g.dirt * g.grain_size).sqrt();
    let range_v = (g.dirt * g.max_grain).sqrt() - radius_v;

    let gv = radius_v + range_v * gf;
    let gir = radius_ir + range_ir * gf;

    let mut vis = MAXV - gv / VFAC;
    let mut ir = MAXIR * (IRFAC * gir).exp();

    if cosz > 0.0 {
        vis += gv * VZRG * (1.0 - cosz);
        ir += (gir * IRZRG + IRZ0) * (1.0 - cosz);
    }
    SpectralAlbedo { vis, ir }
}

/// Fraction of `max_decay` removed at `t`: 0 before `start`, 1 after `end`,
/// `((t − start)/(end − start))^power` in between.
pub fn decay_fraction<Tz: TimeZone>(t: &DateTime<Tz>, start: &DateTime<Tz>, end: &DateTime<Tz>, power: f64) -> f64 {
    if t < start {
        return 0.0;
    }
    if t >= end {
        return 1.0;
    }
    let hours = |a: &DateTime<Tz>, b: &DateTime<Tz>| (a.clone() - b.clone()).num_seconds() as f64 / 3600.0;
    (hours(t, start) / hours(end, start)).powf(power)
}

/// Subtract the per-class litter decay. `max_decay(code)` gives the
/// (visible, infrared) maximum for a vegetation class.
pub fn decay_power(
    alb_v: &mut Raster,
    alb_ir: &mut Raster,
    veg_type: &[i64],
    fraction: f64,
    max_decay: impl Fn(i64) -> [f64; 2],
) {
    if fraction == 0.0 {
        return;
    }
    for (i, &code) in veg_type.iter().enumerate() {
        let [dv, dir] = max_decay(code);
        alb_v.data[i] -= fraction * dv;
        alb_ir.data[i] -= fraction * dir;
    }
}

/// Hardy (2000) litter model: the snow surface fraction still clean after
/// `storm_days` is `(1 − rate)^storm_days`, the rest takes `litter_albedo`.
pub fn decay_hardy(
    alb_v: &mut Raster,
    alb_ir: &mut Raster,
    veg_type: &[i64],
    storm_days: &Raster,
    litter_albedo: f64,
    litter_rate: impl Fn(i64) -> f64,
) {
    for (i, &code) in veg_type.iter().enumerate() {
        let sc = (1.0 - litter_rate(code)).powf(storm_days.data[i]);
        alb_v.data[i] = alb_v.data[i] * sc + litter_albedo * (1.0 - sc);
        alb_ir.data[i] = alb_ir.data[i] * sc + litter_albedo * (1.0 - sc);
    }
}
