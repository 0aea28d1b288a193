//! Geographic ⇄ UTM conversion (WGS84, Krüger series).
//!
//! Station metadata and gridded sources may only carry latitude/longitude;
//! the kernels work in UTM metres on the topography's zone.

use std::f64::consts::PI;

/// A point in geographic coordinates, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Easting/northing in metres within a given zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utm {
    pub easting: f64,
    pub northing: f64,
    pub zone: u32,
    pub northern: bool,
}

// ── WGS84 series coefficients ────────────────────────────────────────────────

const K0: f64 = 0.9996;
const E: f64 = 0.006_694_38;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);
const R: f64 = 6_378_137.0;

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

fn footprint_coefficients() -> (f64, f64, f64, f64) {
    let sqrt_e = (1.0 - E).sqrt();
    let e1 = (1.0 - sqrt_e) / (1.0 + sqrt_e);
    let (e2, e3, e4, e5) = (e1.powi(2), e1.powi(3), e1.powi(4), e1.powi(5));
    let p2 = 3.0 / 2.0 * e1 - 27.0 / 32.0 * e3 + 269.0 / 512.0 * e5;
    let p3 = 21.0 / 16.0 * e2 - 55.0 / 32.0 * e4;
    let p4 = 151.0 / 96.0 * e3 - 417.0 / 128.0 * e5;
    let p5 = 1097.0 / 512.0 * e4;
    (p2, p3, p4, p5)
}

fn mod_angle(value: f64) -> f64 {
    (value + PI).rem_euclid(2.0 * PI) - PI
}

/// Central meridian of a UTM zone in degrees.
pub fn central_longitude(zone: u32) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// Standard zone number for a longitude (no Norway/Svalbard exceptions).
pub fn zone_number(lon: f64) -> u32 {
    (((lon + 180.0) / 6.0).floor() as i64 % 60 + 1) as u32
}

/// Project a geographic point into the given UTM zone.
pub fn from_latlon(ll: LatLon, zone: u32) -> Utm {
    let lat_rad = ll.lat.to_radians();
    let lat_sin = lat_rad.sin();
    let lat_cos = lat_rad.cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let lon_rad = ll.lon.to_radians();
    let central = central_longitude(zone).to_radians();

    let n = R / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;
    let a = lat_cos * mod_angle(lon_rad - central);
    let (a2, a3, a4, a5, a6) = (a.powi(2), a.powi(3), a.powi(4), a.powi(5), a.powi(6));

    let m = R
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + 500_000.0;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));
    if ll.lat < 0.0 {
        northing += 10_000_000.0;
    }

    Utm {
        easting,
        northing,
        zone,
        northern: ll.lat >= 0.0,
    }
}

/// Inverse projection back to geographic coordinates.
pub fn to_latlon(utm: Utm) -> LatLon {
    let (p2, p3, p4, p5) = footprint_coefficients();
    let x = utm.easting - 500_000.0;
    let y = if utm.northern { utm.northing } else { utm.northing - 10_000_000.0 };

    let m = y / K0;
    let mu = m / (R * M1);
    let p_rad = mu
        + p2 * (2.0 * mu).sin()
        + p3 * (4.0 * mu).sin()
        + p4 * (6.0 * mu).sin()
        + p5 * (8.0 * mu).sin();

    let p_sin = p_rad.sin();
    let p_cos = p_rad.cos();
    let p_tan = p_sin / p_cos;
    let p_tan2 = p_tan * p_tan;
    let p_tan4 = p_tan2 * p_tan2;

    let ep_sin = 1.0 - E * p_sin * p_sin;
    let n = R / ep_sin.sqrt();
    let r = (1.0 - E) / ep_sin;
    let c = E_P2 * p_cos * p_cos;
    let c2 = c * c;

    let d = x / (n * K0);
    let (d2, d3, d4, d5, d6) = (d.powi(2), d.powi(3), d.powi(4), d.powi(5), d.powi(6));

    let lat = p_rad
        - (p_tan / r) * (d2 / 2.0 - d4 / 24.0 * (5.0 + 3.0 * p_tan2 + 10.0 * c - 4.0 * c2 - 9.0 * E_P2))
        + d6 / 720.0 * (61.0 + 90.0 * p_tan2 + 298.0 * c + 45.0 * p_tan4 - 252.0 * E_P2 - 3.0 * c2);
    let lon = (d - d3 / 6.0 * (1.0 + 2.0 * p_tan2 + c)
        + d5 / 120.0 * (5.0 - 2.0 * c + 28.0 * p_tan2 - 3.0 * c2 + 8.0 * E_P2 + 24.0 * p_tan4))
        / p_cos;
    let lon = mod_angle(lon + central_longitude(utm.zone).to_radians());

    LatLon::new(lat.to_degrees(), lon.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Reynolds Mountain East, Idaho (zone 11N).
    #[test]
    fn known_point_zone_11() {
        let utm = from_latlon(LatLon::new(43.0667, -116.7500), 11);
        assert_abs_diff_eq!(utm.easting, 520_355.04, epsilon = 0.1);
        assert_abs_diff_eq!(utm.northing, 4_768_252.09, epsilon = 0.1);
        assert!(utm.northern);
    }

    #[test]
    fn roundtrip_within_tolerance() {
        let mut state: u64 = 42;
        for _ in 0..500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lat = (state as f64 / u64::MAX as f64) * 140.0 - 70.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lon = (state as f64 / u64::MAX as f64) * 358.0 - 179.0;
            let zone = zone_number(lon);
            let back = to_latlon(from_latlon(LatLon::new(lat, lon), zone));
            assert_abs_diff_eq!(back.lat, lat, epsilon = 1e-5);
            assert_abs_diff_eq!(back.lon, lon, epsilon = 1e-5);
        }
    }

    #[test]
    fn zone_numbers() {
        assert_eq!(zone_number(-116.75), 11);
        assert_eq!(zone_number(3.0), 31);
        assert_eq!(zone_number(-180.0), 1);
    }
}
