//! Precipitation gauge undercatch correction.

use crate::config::GaugeType;

/// Wind speed (m/s) above which the catch ratio is not extrapolated.
const MAX_WIND: f64 = 6.0;
/// Air temperature (°C) below which the gauge is catching snow.
const SNOW_TEMPERATURE: f64 = -0.5;

/// Catch ratio in percent for a gauge at wind speed `ws`. A ratio that
/// cannot be evaluated is taken as a perfect catch.
pub fn catch_ratio(ws: f64, gauge: GaugeType, snowing: bool) -> f64 {
    let cr = match (gauge, snowing) {
        (GaugeType::UsNws8Shielded, true) => (4.61 - 0.04 * ws.powf(1.75)).exp(),
        (GaugeType::UsNws8Shielded, false) => 101.04 - 5.62 * ws,
        (GaugeType::UsNws8Unshielded, true) => (4.61 - 0.16 * ws.powf(1.28)).exp(),
        (GaugeType::UsNws8Unshielded, false) => 100.77 - 8.34 * ws,
    };
    if cr.is_nan() { 100.0 } else { cr }
}

/// Observed precipitation divided by the catch ratio for the station's
/// wind and air temperature.
pub fn adjust(precip: f64, wind: f64, air_temp: f64, gauge: GaugeType) -> f64 {
    let ws = if wind > MAX_WIND { MAX_WIND } else { wind };
    let snowing = air_temp < SNOW_TEMPERATURE;
    precip / (catch_ratio(ws, gauge, snowing) / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn calm_rain_is_nearly_perfect_catch() {
        assert_relative_eq!(catch_ratio(0.0, GaugeType::UsNws8Shielded, false), 101.04);
        assert_relative_eq!(catch_ratio(0.0, GaugeType::UsNws8Unshielded, true), 4.61f64.exp());
    }

    /// Wind lowers the catch, so the adjusted amount grows, and the shield
    /// helps.
    #[test]
    fn windy_snow_is_scaled_up() {
        let shielded = adjust(1.0, 5.0, -5.0, GaugeType::UsNws8Shielded);
        let open = adjust(1.0, 5.0, -5.0, GaugeType::UsNws8Unshielded);
        assert!(shielded > 1.0 && open > shielded, "shielded {shielded}, open {open}");
    }

    #[test]
    fn wind_is_capped() {
        let a = adjust(2.0, 6.0, 3.0, GaugeType::UsNws8Unshielded);
        let b = adjust(2.0, 20.0, 3.0, GaugeType::UsNws8Unshielded);
        assert_relative_eq!(a, b);
    }

    #[test]
    fn missing_wind_leaves_precip_unchanged() {
        assert_relative_eq!(adjust(1.5, f64::NAN, -3.0, GaugeType::UsNws8Shielded), 1.5);
    }
}
