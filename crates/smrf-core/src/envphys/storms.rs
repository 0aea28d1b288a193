//! Storm definitions: station-level storm tracking over the whole run and
//! per-pixel days-since-storm bookkeeping.

use tracing::{debug, info};

use crate::raster::Raster;

/// Snow fraction at or above which a cell counts as snowing.
pub const SNOW_THRESHOLD: f64 = 0.5;

/// One storm over the run, as step indices into the time axis (inclusive),
/// with the per-station accumulation over the storm.
#[derive(Debug, Clone, PartialEq)]
pub struct Storm {
    pub start: usize,
    pub end: usize,
    pub total: Vec<f64>,
}

impl Storm {
    pub fn contains(&self, step: usize) -> bool {
        (self.start..=self.end).contains(&step)
    }
}

/// Find storms in a station precipitation series, `series[step][station]`.
///
/// A storm starts at the first step where any station exceeds
/// `mass_threshold` and ends at its last wet step once `steps_to_end` dry
/// steps follow, or at the end of the series. Missing values count as dry.
pub fn tracking_by_station(series: &[Vec<f64>], mass_threshold: f64, steps_to_end: usize) -> Vec<Storm> {
    let wet = |row: &Vec<f64>| row.iter().any(|&v| v > mass_threshold);
    let nsta = series.first().map_or(0, Vec::len);

    let mut storms = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut dry_run = 0usize;
    for (step, row) in series.iter().enumerate() {
        if wet(row) {
            dry_run = 0;
            current = Some(match current {
                Some((start, _)) => (start, step),
                None => (step, step),
            });
        } else if let Some((start, end)) = current {
            dry_run += 1;
            if dry_run >= steps_to_end {
                storms.push((start, end));
                current = None;
                dry_run = 0;
            }
        }
    }
    if let Some(s) = current {
        storms.push(s);
    }

    storms
        .into_iter()
        .map(|(start, end)| {
            let mut total = vec![0.0; nsta];
            for row in &series[start..=end] {
                for (t, &v) in total.iter_mut().zip(row) {
                    if !v.is_nan() {
                        *t += v;
                    }
                }
            }
            Storm { start, end, total }
        })
        .collect()
}

/// Zero precipitation outside storms and rescale each station's in-storm
/// values so its total over the run is unchanged.
pub fn clip_and_correct(series: &[Vec<f64>], storms: &[Storm]) -> Vec<Vec<f64>> {
    let nsta = series.first().map_or(0, Vec::len);
    let in_storm: Vec<bool> = (0..series.len()).map(|s| storms.iter().any(|st| st.contains(s))).collect();

    let nansum = |keep: &dyn Fn(usize) -> bool, sta: usize| -> f64 {
        series
            .iter()
            .enumerate()
            .filter(|(s, _)| keep(*s))
            .map(|(_, row)| row[sta])
            .filter(|v| !v.is_nan())
            .sum()
    };

    let factors: Vec<f64> = (0..nsta)
        .map(|sta| {
            let raw = nansum(&|_| true, sta);
            let kept = nansum(&|s| in_storm[s], sta);
            if kept == 0.0 { 1.0 } else { raw / kept }
        })
        .collect();

    let out: Vec<Vec<f64>> = series
        .iter()
        .enumerate()
        .map(|(s, row)| {
            if in_storm[s] {
                row.iter().zip(&factors).map(|(&v, &f)| v * f).collect()
            } else {
                vec![0.0; row.len()]
            }
        })
        .collect();

    let before: f64 = (0..nsta).map(|sta| nansum(&|_| true, sta)).sum();
    let after: f64 = out.iter().flatten().filter(|v| !v.is_nan()).sum();
    info!(before, after, delta = after - before, "precipitation clipped to storms and corrected");
    out
}

// ── Per-pixel storm days ─────────────────────────────────────────────────────

/// Days since the last storm under the accumulated-density model. Cells
/// that are snowing with at least `mass` this step restart the count while
/// a storm is active.
pub fn time_since_storm_pixel(
    storm_days: &mut Raster,
    precip: &Raster,
    percent_snow: &Raster,
    storming: bool,
    dt: f64,
    mass: f64,
) {
    for v in &mut storm_days.data {
        *v += dt;
    }
    if !storming {
        return;
    }
    for i in 0..storm_days.len() {
        if percent_snow.data[i] >= SNOW_THRESHOLD && precip.data[i] >= mass {
            storm_days.data[i] = 0.0;
        }
    }
}

/// Days since the last storm under the per-step density models.
///
/// `storm_precip` accumulates snowfall until it reaches `mass`, which
/// restarts the count; cells idle for `time_threshold` days drop their
/// accumulation.
pub fn time_since_storm(
    storm_days: &mut Raster,
    storm_precip: &mut Raster,
    precip: &Raster,
    percent_snow: &Raster,
    dt: f64,
    mass: f64,
    time_threshold: f64,
) {
    for v in &mut storm_days.data {
        *v += dt;
    }
    if percent_snow.sum() == 0.0 {
        storm_precip.data.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    for i in 0..storm_days.len() {
        if storm_days.data[i] >= time_threshold {
            storm_precip.data[i] = 0.0;
        }
        if percent_snow.data[i] >= SNOW_THRESHOLD {
            storm_precip.data[i] += precip.data[i];
        }
        if storm_precip.data[i] >= mass {
            storm_days.data[i] = 0.0;
        }
    }
    debug!(reset = storm_days.data.iter().filter(|&&d| d == 0.0).count(), "storm days updated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(rows: &[[f64; 2]]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| r.to_vec()).collect()
    }

    /// Two wet spells separated by a long enough dry gap are two storms; a
    /// single dry step inside a spell is not a break.
    #[test]
    fn tracking_splits_on_dry_gap() {
        let s = series(&[
            [0.0, 0.0],
            [1.0, 0.0],
            [0.0, 0.0],
            [0.5, 2.0],
            [0.0, 0.0],
            [0.0, 0.0],
            [0.0, 3.0],
            [0.0, f64::NAN],
        ]);
        let storms = tracking_by_station(&s, 0.01, 2);
        assert_eq!(storms.len(), 2);
        assert_eq!((storms[0].start, storms[0].end), (1, 3));
        assert_eq!(storms[0].total, vec![1.5, 2.0]);
        assert_eq!((storms[1].start, storms[1].end), (6, 6));
    }

    /// A storm still open at the end of the series is kept.
    #[test]
    fn open_storm_runs_to_end() {
        let s = series(&[[0.0, 0.0], [0.2, 0.0], [0.3, 0.0]]);
        let storms = tracking_by_station(&s, 0.01, 2);
        assert_eq!(storms.len(), 1);
        assert_eq!(storms[0].end, 2);
    }

    /// Clipping preserves each station's total.
    #[test]
    fn clip_and_correct_conserves_mass() {
        let s = series(&[[0.005, 0.0], [1.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.008, 0.0], [0.5, 2.0]]);
        let storms = tracking_by_station(&s, 0.01, 2);
        let out = clip_and_correct(&s, &storms);
        for sta in 0..2 {
            let raw: f64 = s.iter().map(|r| r[sta]).sum();
            let cor: f64 = out.iter().map(|r| r[sta]).sum();
            assert_relative_eq!(raw, cor, epsilon = 1e-12);
        }
        assert_eq!(out[0][0], 0.0, "outside storms is zeroed");
    }

    #[test]
    fn storm_days_reset_where_snowing_with_mass() {
        let mut days = Raster::filled(1, 3, 2.0);
        let precip = Raster::from_vec(1, 3, vec![1.0, 1.0, 0.001]).unwrap();
        let pcs = Raster::from_vec(1, 3, vec![1.0, 0.2, 1.0]).unwrap();
        time_since_storm_pixel(&mut days, &precip, &pcs, true, 1.0 / 24.0, 0.01);
        assert_eq!(days.data[0], 0.0);
        assert_relative_eq!(days.data[1], 2.0 + 1.0 / 24.0);
        assert_relative_eq!(days.data[2], 2.0 + 1.0 / 24.0);

        // Outside a storm nothing resets.
        let mut days = Raster::filled(1, 3, 2.0);
        time_since_storm_pixel(&mut days, &precip, &pcs, false, 1.0, 0.01);
        assert!(days.data.iter().all(|&d| d == 3.0));
    }

    #[test]
    fn susong_storm_accumulates_then_resets() {
        let dt = 1.0 / 24.0;
        let mut days = Raster::filled(1, 2, 5.0);
        let mut total = Raster::filled(1, 2, 5.0);
        let pcs = Raster::filled(1, 2, 1.0);
        let step = Raster::from_vec(1, 2, vec![0.6, 0.2]).unwrap();

        time_since_storm(&mut days, &mut total, &step, &pcs, dt, 1.0, 2.0 * dt);
        assert_eq!(total.data, vec![0.6, 0.2], "stale accumulation dropped after an idle spell");
        assert!(days.data.iter().all(|&d| d > 5.0), "mass not reached, no reset");

        let mut days = Raster::zeros(1, 2);
        time_since_storm(&mut days, &mut total, &step, &pcs, dt, 1.0, 2.0 * dt);
        assert_relative_eq!(total.data[0], 1.2, epsilon = 1e-12);
        assert_eq!(days.data[0], 0.0, "mass reached resets the count");
        assert_relative_eq!(days.data[1], dt);

        // No snow anywhere clears the accumulation.
        time_since_storm(&mut days, &mut total, &step, &Raster::zeros(1, 2), dt, 1.0, 2.0 * dt);
        assert_eq!(total.sum(), 0.0);
    }
}
