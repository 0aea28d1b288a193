//! Solar ephemeris and sun position.
//!
//! The ephemeris follows Wilson (1980), Solar ephemeris algorithm, Scripps
//! Institution of Oceanography reference 80-13. Angles are radians unless a
//! name says otherwise.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::{Result, SmrfError};

const JULIAN_CENTURY: f64 = 36525.0;
const DEGS_IN_CIRCLE: f64 = 360.0;
const TOLERANCE: f64 = 1.1920928955e-7;

/// Sun geometry for one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ephemeris {
    pub declination: f64,
    /// Longitude where the sun is overhead.
    pub omega: f64,
    /// Earth–sun distance in AU.
    pub radius_vector: f64,
}

/// Sun position seen from a point on the ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunAngle {
    pub cosz: f64,
    /// Degrees, 0 south, positive east.
    pub azimuth: f64,
    pub radius_vector: f64,
}

fn sign(a: f64, b: f64) -> f64 {
    if b >= 0.0 {
        a.abs()
    } else {
        -a.abs()
    }
}

pub fn ephemeris(t: &DateTime<Utc>) -> Ephemeris {
    let degrd = 1f64.atan() / 45.0;
    let rad = |d: f64| d * degrd;

    let gmts = 3600.0 * t.hour() as f64 + 60.0 * t.minute() as f64 + t.second() as f64;
    let p51 = gmts / 10.0 / 24.0;
    let p22 = (((t.year() - 1900) as f64 * JULIAN_CENTURY - 25.0) / 100.0).trunc() + t.ordinal() as f64 - 0.5;
    let p23 = (p51 / DEGS_IN_CIRCLE + p22) / JULIAN_CENTURY;
    let p22 = p23 * JULIAN_CENTURY;

    // Mean longitude.
    let p24 = (279.69668 + (0.9856473354 * p22) % DEGS_IN_CIRCLE + 3.03e-4 * p23 * p23) % DEGS_IN_CIRCLE;
    // Mean anomaly.
    let p25 = (358.47583 + (0.985600267 * p22) % DEGS_IN_CIRCLE + p23 * p23 * (-1.5e-4 - 3.0e-6 * p23))
        % DEGS_IN_CIRCLE;
    // Eccentricity.
    let p26 = 0.01675104 + p23 * (-4.18e-5 - 1.26e-7 * p23);

    // Eccentric anomaly by fixed point.
    let p11 = rad(p25);
    let mut p12 = p11;
    loop {
        let prev = p12;
        p12 = p11 + p26 * prev.sin();
        if ((p12 - prev) / p12).abs() < TOLERANCE {
            break;
        }
    }
    let p13 = p12 / degrd;

    // True anomaly.
    let mut p27 = 2.0 * (((1.0 + p26) / (1.0 - p26)).sqrt() * (p13 / 2.0 * degrd).tan()).atan() / degrd;
    if sign(1.0, p27) != sign(1.0, rad(p13).sin()) {
        p27 += 180.0;
    }
    if p27 < 0.0 {
        p27 += DEGS_IN_CIRCLE;
    }

    let r = 1.0 - p26 * rad(p13).cos();
    // Aberration.
    let p29 = -20.47 / r / 3600.0;
    // Mean obliquity.
    let mut p43 = 23.452294 + p23 * (-0.0130125 + p23 * (-1.64e-6 + 5.03e-7 * p23));
    // Mean ascension.
    let p45 = (279.6909832 + (0.98564734 * p22) % DEGS_IN_CIRCLE + 3.8708e-4 * p23 * p23) % DEGS_IN_CIRCLE;

    let lunar = |base: f64, revs: f64, c1: f64, c2: f64, c3: f64| {
        (base + (revs * DEGS_IN_CIRCLE * p23) % DEGS_IN_CIRCLE + p23 * (c1 + p23 * (c2 + c3 * p23))) % DEGS_IN_CIRCLE
    };
    let p28 = lunar(296.104608, 1325.0, 198.8491083, 0.00919167, 1.4388e-5);
    let p30 = lunar(350.737486, 1236.0, 307.1142167, 1.436e-3, 0.0);
    let p31 = lunar(259.183275, -5.0, -134.142008, 2.0778e-3, 0.0);
    let p32 = lunar(270.434164, 1336.0, 307.8831417, -1.1333e-3, 0.0);

    // Moon perturbation of the sun's longitude.
    let p33 = (6.454 * rad(p30).sin() + 0.013 * rad(3.0 * p30).sin() + 0.177 * rad(p30 + p28).sin()
        - 0.424 * rad(p30 - p28).sin())
        / 3600.0;
    // Nutation of longitude.
    let p34 = (-(17.234 - 0.017 * p23) * rad(p31).sin() + 0.209 * rad(2.0 * p31).sin()
        - 0.204 * rad(2.0 * p32).sin()
        - 1.257 * rad(2.0 * p24).sin()
        + 0.127 * rad(p28).sin())
        / 3600.0;
    // Nutation in obliquity.
    let p35 = (9.214 * rad(p31).cos() + 0.546 * rad(2.0 * p24).cos() - 0.09 * rad(2.0 * p31).cos()
        + 0.088 * rad(2.0 * p32).cos())
        / 3600.0;
    // Long-period inequalities.
    let p36 = (0.266 * rad(31.8 + 119.0 * p23).sin()
        + rad(1.882 - 0.016 * p23) * rad(57.24 + 150.27 * p23).sin()
        + 0.202 * rad(315.6 + 893.3 * p23).sin()
        + 1.089 * p23 * p23
        + 6.4 * rad(231.19 + 20.2 * p23).sin())
        / 3600.0;

    // Apparent longitude.
    let p41 = p27 - p25 + p24 + p29 + p33 + p36 + p34;
    p43 += p35;

    // Apparent right ascension.
    let mut p44 = (rad(p41).tan() * rad(p43).cos()).atan() / degrd;
    if sign(1.0, p44) != sign(1.0, rad(p41).sin()) {
        p44 += 180.0;
    }
    if p44 < 0.0 {
        p44 += DEGS_IN_CIRCLE;
    }

    // Equation of time.
    let mut p46 = p45 - p44;
    if p46 > 180.0 {
        p46 -= DEGS_IN_CIRCLE;
    }

    let declination = (rad(p41).sin() * rad(p43).sin()).asin();

    // Hour angle.
    let mut p48 = p51 + p46 - 180.0;
    if p48 > 180.0 {
        p48 -= DEGS_IN_CIRCLE;
    } else if p48 < -180.0 {
        p48 += DEGS_IN_CIRCLE;
    }

    Ephemeris {
        declination,
        omega: -p48 * degrd,
        radius_vector: r,
    }
}

/// Spherical coordinates after rotating the axis system.
///
/// `mu`/`azm` are the cosine of the polar angle and the azimuth in the old
/// system, `mu_r`/`lam_r` the rotation of the z and x axes. Returns the new
/// cosine and azimuth.
pub fn rotate(mu: f64, azm: f64, mu_r: f64, lam_r: f64) -> (f64, f64) {
    let omega = lam_r - azm;
    let sin_theta = ((1.0 - mu) * (1.0 + mu)).sqrt();
    let sin_thr = ((1.0 - mu_r) * (1.0 + mu_r)).sqrt();
    let cos_omega = omega.cos();
    let a_prime = -(sin_theta * omega.sin()).atan2(mu_r * sin_theta * cos_omega - mu * sin_thr);
    let mu_prime = sin_theta * sin_thr * cos_omega + mu * mu_r;
    (mu_prime, a_prime)
}

/// Cosine of the solar zenith and the azimuth at `latitude`/`longitude`
/// (degrees).
pub fn sunang(t: &DateTime<Utc>, latitude: f64, longitude: f64) -> Result<SunAngle> {
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return Err(SmrfError::config(format!(
            "sun angle requested for invalid position {latitude}, {longitude}"
        )));
    }
    let eph = ephemeris(t);
    let (cosz, azimuth) = rotate(
        eph.declination.sin(),
        eph.omega,
        latitude.to_radians().sin(),
        longitude.to_radians(),
    );
    Ok(SunAngle {
        cosz,
        azimuth: azimuth.to_degrees(),
        radius_vector: eph.radius_vector,
    })
}

/// Cosine of the local illumination angle on a slope, clipped to `[0, 1]`.
///
/// `sin_slope` is sin(S); `aspect` is radians from south, positive east;
/// `azimuth` is the sun azimuth in degrees on the same convention.
#[inline]
pub fn illumination(cosz: f64, azimuth: f64, sin_slope: f64, aspect: f64) -> f64 {
    let sinz = (1.0 - cosz * cosz).max(0.0).sqrt();
    let cos_slope = ((1.0 - sin_slope) * (1.0 + sin_slope)).sqrt();
    (cosz * cos_slope + sinz * sin_slope * (azimuth.to_radians() - aspect).cos()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    /// Santa Barbara, 15 Feb 1990 20:30 UTC.
    fn santa_barbara() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1990, 2, 15, 20, 30, 0).unwrap()
    }

    #[test]
    fn ephemeris_matches_reference() {
        let e = ephemeris(&santa_barbara());
        assert_relative_eq!(e.declination, -0.218992538, epsilon = 1e-8);
        assert_relative_eq!(e.omega, -2.163529935, epsilon = 1e-8);
        assert_relative_eq!(e.radius_vector, 0.987871247, epsilon = 1e-8);
    }

    #[test]
    fn sun_angle_matches_reference() {
        let s = sunang(&santa_barbara(), 34.4166667, -119.9).unwrap();
        assert_relative_eq!(s.cosz, 0.680436, epsilon = 1e-5);
        assert_relative_eq!(s.azimuth, -5.413, epsilon = 1e-3);
    }

    #[test]
    fn night_has_negative_cosz() {
        let t = Utc.with_ymd_and_hms(1998, 1, 14, 6, 0, 0).unwrap();
        let s = sunang(&t, 43.0665, -116.7592).unwrap();
        assert!(s.cosz < 0.0, "sun below the horizon at local night");
    }

    #[test]
    fn flat_ground_sees_cosz() {
        assert_relative_eq!(illumination(0.6, 20.0, 0.0, 1.0), 0.6, epsilon = 1e-12);
        // A slope facing the sun is lit more than flat ground.
        let facing = illumination(0.6, 0.0, 0.3, 0.0);
        assert!(facing > 0.6);
        assert!(illumination(0.1, 0.0, 0.9, std::f64::consts::PI) == 0.0);
    }
}
