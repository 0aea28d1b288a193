//! Environmental physics: radiation, humidity, snow and storm models.
//!
//! Everything here is a pure function of its inputs; state lives in the
//! distributors.

pub mod albedo;
pub mod constants;
pub mod irradiance;
pub mod nasde;
pub mod phys;
pub mod storms;
pub mod sunang;
pub mod thermal;
pub mod toporad;
pub mod twostream;
pub mod undercatch;
