//! Simulation time axis and water-year helpers.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SmrfError};

/// Ordered, timezone-aware instants covering `[start, end]` at a fixed step.
#[derive(Debug, Clone)]
pub struct TimeAxis {
    pub steps: Vec<DateTime<Tz>>,
    pub step_minutes: i64,
    pub tz: Tz,
}

impl TimeAxis {
    /// Build the axis; `end` is inclusive when it falls on a step.
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>, step_minutes: i64) -> Result<Self> {
        if step_minutes <= 0 {
            return Err(SmrfError::config("time_step must be positive"));
        }
        if end < start {
            return Err(SmrfError::config(format!("end_date {end} precedes start_date {start}")));
        }
        let step = Duration::minutes(step_minutes);
        let mut steps = Vec::new();
        let mut t = start;
        while t <= end {
            steps.push(t);
            t += step;
        }
        Ok(Self {
            steps,
            step_minutes,
            tz: start.timezone(),
        })
    }

    /// Parse start/end strings in the configured zone.
    pub fn from_config(start: &str, end: &str, step_minutes: i64, time_zone: &str) -> Result<Self> {
        let tz = parse_tz(time_zone)?;
        Self::new(parse_local(start, tz)?, parse_local(end, tz)?, step_minutes)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step length in decimal days.
    pub fn step_days(&self) -> f64 {
        self.step_minutes as f64 / 60.0 / 24.0
    }

    pub fn utc(&self, i: usize) -> DateTime<Utc> {
        self.steps[i].with_timezone(&Utc)
    }
}

pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| SmrfError::config(format!("unknown time zone {name}: {e}")))
}

/// Parse a timestamp. Strings carrying an offset keep it; naive strings are
/// read in `tz`.
pub fn parse_local(s: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&tz));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.with_timezone(&tz));
    }
    let naive = parse_naive(s)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| SmrfError::Parse(format!("{s} does not exist in {tz}")))
}

fn parse_naive(s: &str) -> Result<NaiveDateTime> {
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];
    for f in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, f) {
            return Ok(dt);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    date.and_hms_opt(0, 0, 0)
        .ok_or_else(|| SmrfError::Parse(format!("bad date {s}")))
}

/// Decimal days since 1 October 00:00 (local) of the current water year,
/// plus the water year itself.
pub fn water_day<T: TimeZone>(t: &DateTime<T>) -> (f64, i32) {
    let local = t.naive_local();
    let oct1 = |y: i32| {
        NaiveDate::from_ymd_opt(y, 10, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    };
    let wy = if local < oct1(local.year()) { local.year() } else { local.year() + 1 };
    let d = local - oct1(wy - 1);
    (d.num_seconds() as f64 / 86_400.0, wy)
}

/// Day of year, 1-based.
pub fn yearday<T: TimeZone>(t: &DateTime<T>) -> u32 {
    t.ordinal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn axis_is_inclusive() {
        let axis = TimeAxis::from_config("1998-01-14 15:00", "1998-01-14 19:00", 60, "UTC").unwrap();
        assert_eq!(axis.len(), 5);
        assert_abs_diff_eq!(axis.step_days(), 1.0 / 24.0, epsilon = 1e-12);
    }

    #[test]
    fn water_day_counts_from_october() {
        let tz = parse_tz("UTC").unwrap();
        let t = parse_local("1998-01-14 12:00", tz).unwrap();
        let (wd, wy) = water_day(&t);
        assert_eq!(wy, 1998);
        // Oct (31) + Nov (30) + Dec (31) + 13.5 days.
        assert_abs_diff_eq!(wd, 105.5, epsilon = 1e-9);

        let t = parse_local("1997-10-01 06:00", tz).unwrap();
        let (wd, wy) = water_day(&t);
        assert_eq!(wy, 1998);
        assert_abs_diff_eq!(wd, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn offsets_are_respected() {
        let tz = parse_tz("America/Boise").unwrap();
        let t = parse_local("1998-01-14T15:00:00+00:00", tz).unwrap();
        assert_eq!(t.with_timezone(&Utc).to_rfc3339(), "1998-01-14T15:00:00+00:00");
    }

    #[test]
    fn rejects_reversed_window() {
        assert!(TimeAxis::from_config("1998-01-15", "1998-01-14", 60, "UTC").is_err());
        assert!(parse_tz("Mars/Olympus").is_err());
    }
}
