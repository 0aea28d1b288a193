//! Physical constants shared by the radiation and vapor models.

/// Visible band, µm.
pub const VISIBLE: (f64, f64) = (0.28, 0.7);
/// Near-infrared band, µm.
pub const INFRARED: (f64, f64) = (0.7, 2.8);
/// W/m².
pub const SOLAR_CONSTANT: f64 = 1368.0;

// ── Snow albedo ──────────────────────────────────────────────────────────────

/// Visible albedo at zero grain size.
pub const MAXV: f64 = 1.0;
/// Infrared albedo at zero grain size.
pub const MAXIR: f64 = 0.85447;
pub const IRFAC: f64 = -0.02123;
pub const VFAC: f64 = 500.0;
/// Zenith increase range factors.
pub const VZRG: f64 = 1.375e-3;
pub const IRZRG: f64 = 2.0e-3;
pub const IRZ0: f64 = 0.1;

// ── Thermodynamics ───────────────────────────────────────────────────────────

pub const STEF_BOLTZ: f64 = 5.6697e-8;
pub const EMISS_TERRAIN: f64 = 0.98;
pub const EMISS_VEG: f64 = 0.96;
/// K.
pub const FREEZE: f64 = 273.16;
/// K.
pub const BOIL: f64 = 373.15;
/// K/m.
pub const STD_LAPSE_M: f64 = -0.0065;
/// K/km.
pub const STD_LAPSE: f64 = -6.5;
/// Pa.
pub const SEA_LEVEL: f64 = 1.013246e5;
/// J / kmole / K.
pub const RGAS: f64 = 8.31432e3;
/// m/s².
pub const GRAVITY: f64 = 9.80665;
/// kg / kmole.
pub const MOL_AIR: f64 = 28.9644;
pub const MOL_H2O: f64 = 18.0153;
/// K.
pub const STD_AIRTMP: f64 = 288.0;
/// J / kg / K.
pub const CP_AIR: f64 = 1.005e3;
/// Gas constant for water vapor, J / kg / K.
pub const RH2O: f64 = 461.5;
