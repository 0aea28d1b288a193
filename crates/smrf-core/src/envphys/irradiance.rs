//! Exoatmospheric solar irradiance integrated over a wavelength band.
//!
//! Spectral data after Thekaekara (1979), NASA TR-R-351, as fractions of the
//! solar constant per µm. Only the 0.2 to 3.5 µm part of the table is kept,
//! which covers both model bands with room for the spline end conditions.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use super::constants::SOLAR_CONSTANT;
use super::sunang::ephemeris;
use crate::error::{Result, SmrfError};

/// `(wavelength µm, fraction of the solar constant per µm)`.
const SPECTRUM: [[f64; 2]; 125] = [
    [0.2, 0.007710923178414352],
    [0.21, 0.016502816895858752],
    [0.22, 0.04143720399615189],
    [0.225, 0.04676999198870013],
    [0.23, 0.04806715663553619],
    [0.235, 0.04273436864298795],
    [0.24, 0.04540076263926207],
    [0.245, 0.052102779981248376],
    [0.25, 0.050733550631810315],
    [0.255, 0.07494729070608343],
    [0.26, 0.09368411338260427],
    [0.265, 0.13331969981370606],
    [0.27, 0.16719011003664763],
    [0.275, 0.1470119933080867],
    [0.28, 0.15998363977644728],
    [0.285, 0.22700381319631036],
    [0.29, 0.34735186654165584],
    [0.295, 0.42085786319569923],
    [0.3, 0.3704125713742969],
    [0.305, 0.4345501566900798],
    [0.31, 0.49652580092780263],
    [0.315, 0.550574327879305],
    [0.32, 0.5981370315966272],
    [0.325, 0.7026308503695321],
    [0.33, 0.7631652005552149],
    [0.335, 0.7790194351276556],
    [0.34, 0.7739749059455153],
    [0.345, 0.7703716708154151],
    [0.35, 0.7876671994398959],
    [0.355, 0.7804607291796956],
    [0.36, 0.7696510237893951],
    [0.365, 0.8157724334546772],
    [0.37, 0.8510841377296589],
    [0.375, 0.833788609105178],
    [0.38, 0.8071246691424367],
    [0.385, 0.7912704345699961],
    [0.39, 0.7912704345699961],
    [0.395, 0.856849313937819],
    [0.4, 1.029804600182627],
    [0.405, 1.184743710776934],
    [0.41, 1.2618529425610776],
    [0.415, 1.2784278241595384],
    [0.42, 1.2589703544569975],
    [0.425, 1.2200554150519156],
    [0.43, 1.181140475646834],
    [0.435, 1.1984360042713147],
    [0.44, 1.3043711170962595],
    [0.445, 1.3850835840105031],
    [0.45, 1.445617934196186],
    [0.455, 1.4823709325232075],
    [0.46, 1.488856755757388],
    [0.465, 1.4758851092890273],
    [0.47, 1.4650754038987266],
    [0.475, 1.4730025211849471],
    [0.48, 1.494621931965548],
    [0.485, 1.423998523415585],
    [0.49, 1.4052617007390642],
    [0.495, 1.4124681709992644],
    [0.5, 1.399496524530904],
    [0.505, 1.383642289958463],
    [0.51, 1.3562577029697018],
    [0.515, 1.3209459986947203],
    [0.52, 1.3209459986947203],
    [0.525, 1.334638292189101],
    [0.53, 1.3274318219289005],
    [0.535, 1.3101362933044196],
    [0.54, 1.2849136473937186],
    [0.545, 1.2640148836391376],
    [0.55, 1.2431161198845568],
    [0.555, 1.2395128847544565],
    [0.56, 1.2214967091039557],
    [0.565, 1.228703179364156],
    [0.57, 1.2337477085462962],
    [0.575, 1.2387922377284366],
    [0.58, 1.2359096496243562],
    [0.585, 1.2337477085462962],
    [0.59, 1.225099944234056],
    [0.595, 1.2121282977656953],
    [0.6, 1.2005979453493747],
    [0.605, 1.186905651854994],
    [0.61, 1.1782578875427536],
    [0.62, 1.1544765356840927],
    [0.63, 1.1314158308514517],
    [0.64, 1.1126790081749307],
    [0.65, 1.0888976563162696],
    [0.66, 1.0708814806657687],
    [0.67, 1.0492620698851678],
    [0.68, 1.0283633061305868],
    [0.69, 1.0103471304800862],
    [0.7, 0.9865657786214249],
    [0.71, 0.9685496029709242],
    [0.72, 0.9469301921903232],
    [0.73, 0.9296346635658423],
    [0.74, 0.9080152527852414],
    [0.75, 0.8899990771347406],
    [0.8, 0.7977562578041764],
    [0.85, 0.7119992617077925],
    [0.9, 0.6406552061318093],
    [0.95, 0.6017402667267274],
    [1.0, 0.5376026814109445],
    [1.1, 0.4266230394038595],
    [1.2, 0.3487931605936959],
    [1.3, 0.285376222303933],
    [1.4, 0.24213740074273105],
    [1.5, 0.20682569646774943],
    [1.6, 0.175837874348888],
    [1.7, 0.14557069925604663],
    [1.8, 0.11458287713718522],
    [1.9, 0.09080152527852414],
    [2.0, 0.07422664368006339],
    [2.1, 0.06485823234180296],
    [2.2, 0.0569311150555826],
    [2.3, 0.049003997769362234],
    [2.4, 0.0461214096652821],
    [2.5, 0.038914939405081776],
    [2.6, 0.034591057248961575],
    [2.7, 0.030987822118861412],
    [2.8, 0.02810523401478128],
    [2.9, 0.02522264591070115],
    [3.0, 0.02234005780662102],
    [3.1, 0.018736822676520857],
    [3.2, 0.01628662278805274],
    [3.3, 0.01383642289958463],
    [3.4, 0.011962740631932546],
    [3.5, 0.01052144657989248],];

/// Akima spline through `(x, y)` with closed-form integration.
struct Akima {
    x: Vec<f64>,
    y: Vec<f64>,
    t: Vec<f64>,
}

impl Akima {
    fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        let m: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / (x[i + 1] - x[i])).collect();
        // Two extrapolated slopes on each end.
        let mut mm = Vec::with_capacity(n + 3);
        mm.push(3.0 * m[0] - 2.0 * m[1]);
        mm.push(2.0 * m[0] - m[1]);
        mm.extend_from_slice(&m);
        mm.push(2.0 * m[n - 2] - m[n - 3]);
        mm.push(3.0 * m[n - 2] - 2.0 * m[n - 3]);

        let t = (0..n)
            .map(|i| {
                let w1 = (mm[i + 3] - mm[i + 2]).abs();
                let w2 = (mm[i + 1] - mm[i]).abs();
                if w1 + w2 == 0.0 {
                    0.5 * (mm[i + 1] + mm[i + 2])
                } else {
                    (w1 * mm[i + 1] + w2 * mm[i + 2]) / (w1 + w2)
                }
            })
            .collect();
        Self { x, y, t }
    }

    fn integrate(&self, a: f64, b: f64) -> f64 {
        let mut total = 0.0;
        for i in 0..self.x.len() - 1 {
            let (x0, x1) = (self.x[i], self.x[i + 1]);
            let lo = a.max(x0);
            let hi = b.min(x1);
            if hi <= lo {
                continue;
            }
            let h = x1 - x0;
            let m = (self.y[i + 1] - self.y[i]) / h;
            let c2 = (3.0 * m - 2.0 * self.t[i] - self.t[i + 1]) / h;
            let c3 = (self.t[i] + self.t[i + 1] - 2.0 * m) / (h * h);
            let f = |s: f64| self.y[i] * s + self.t[i] * s * s / 2.0 + c2 * s.powi(3) / 3.0 + c3 * s.powi(4) / 4.0;
            total += f(hi - x0) - f(lo - x0);
        }
        total
    }
}

/// Band-integrated irradiance at 1 AU, W/m².
pub fn band_irradiance(band: (f64, f64)) -> Result<f64> {
    let (lo, hi) = band;
    let first = SPECTRUM[0][0];
    let last = SPECTRUM[SPECTRUM.len() - 1][0];
    if !(lo < hi) || lo < first || hi > last {
        return Err(SmrfError::config(format!(
            "wavelength band [{lo}, {hi}] outside [{first}, {last}] µm"
        )));
    }
    let spline = Akima::new(
        SPECTRUM.iter().map(|r| r[0]).collect(),
        SPECTRUM.iter().map(|r| r[1]).collect(),
    );
    Ok(spline.integrate(lo, hi) * SOLAR_CONSTANT)
}

/// Band irradiance at the top of the atmosphere for the date of `t`, using
/// the earth–sun distance at solar noon UTC.
pub fn direct_solar_irradiance<T: TimeZone>(t: &DateTime<T>, band: (f64, f64)) -> Result<f64> {
    let utc = t.with_timezone(&Utc);
    let noon = Utc
        .with_ymd_and_hms(utc.year(), utc.month(), utc.day(), 12, 0, 0)
        .single()
        .ok_or_else(|| SmrfError::Parse(format!("no solar noon for {utc}")))?;
    let r = ephemeris(&noon).radius_vector;
    Ok(band_irradiance(band)? / (r * r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envphys::constants::{INFRARED, VISIBLE};
    use approx::assert_relative_eq;

    #[test]
    fn model_bands_at_one_au() {
        assert_relative_eq!(band_irradiance(VISIBLE).unwrap(), 617.80, epsilon = 0.05);
        assert_relative_eq!(band_irradiance(INFRARED).unwrap(), 671.17, epsilon = 0.05);
    }

    /// Reference value for 0.58 to 0.68 µm on 22 June 1990.
    #[test]
    fn narrow_band_on_date() {
        let t = Utc.with_ymd_and_hms(1990, 6, 22, 0, 0, 0).unwrap();
        let s = direct_solar_irradiance(&t, (0.58, 0.68)).unwrap();
        assert_relative_eq!(s, 150.214, epsilon = 0.05);
    }

    #[test]
    fn band_outside_table_is_rejected() {
        assert!(band_irradiance((0.1, 0.5)).is_err());
        assert!(band_irradiance((0.7, 0.5)).is_err());
    }
}
