//! Terrain rasters shared read-only by every distributor.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::utm::{self, LatLon, Utm};

/// Immutable topography: DEM, vegetation, terrain-radiation factors and the
/// cell-center coordinate vectors.
#[derive(Debug, Clone)]
pub struct Topography {
    pub dem: Raster,
    pub mask: Raster,
    /// Vegetation class codes, row-major.
    pub veg_type: Vec<i64>,
    pub veg_height: Raster,
    pub veg_k: Raster,
    pub veg_tau: Raster,
    /// Sine of the slope angle.
    pub sin_slope: Raster,
    /// Aspect in radians from south, positive toward east.
    pub aspect: Raster,
    pub sky_view: Raster,
    pub terrain_config: Raster,
    /// Cell-center eastings, length `nx`.
    pub x: Vec<f64>,
    /// Cell-center northings, length `ny`. May be descending.
    pub y: Vec<f64>,
    pub dx: f64,
    pub dy: f64,
    pub zone_number: u32,
    pub northern_hemisphere: bool,
    pub basin_lat: f64,
    pub basin_lon: f64,
}

/// On-disk form of the topography, nested rows as written by the
/// preprocessing tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopoFile {
    pub dem: Vec<Vec<f64>>,
    #[serde(default)]
    pub mask: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub veg_type: Option<Vec<Vec<i64>>>,
    #[serde(default)]
    pub veg_height: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub veg_k: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub veg_tau: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub sin_slope: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub aspect: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub sky_view: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub terrain_config: Option<Vec<Vec<f64>>>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub zone_number: u32,
    #[serde(default = "default_true")]
    pub northern_hemisphere: bool,
    /// Basin centroid; derived from the grid center when absent.
    #[serde(default)]
    pub basin_lat: Option<f64>,
    #[serde(default)]
    pub basin_lon: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl TopoFile {
    /// Convert to the in-memory form, filling absent layers with neutral
    /// values (full mask, no vegetation, flat, open sky).
    pub fn into_topography(self) -> Result<Topography> {
        let dem = Raster::from_rows(&self.dem)?;
        let (ny, nx) = dem.shape();
        let layer = |rows: Option<Vec<Vec<f64>>>, fill: f64, name: &str| -> Result<Raster> {
            match rows {
                Some(r) => {
                    let r = Raster::from_rows(&r)?;
                    if r.shape() != (ny, nx) {
                        return Err(SmrfError::config(format!(
                            "topo layer {name} is {:?}, dem is {:?}",
                            r.shape(),
                            (ny, nx)
                        )));
                    }
                    Ok(r)
                }
                None => Ok(Raster::filled(ny, nx, fill)),
            }
        };
        let mask = layer(self.mask, 1.0, "mask")?;
        let veg_height = layer(self.veg_height, 0.0, "veg_height")?;
        let veg_k = layer(self.veg_k, 0.0, "veg_k")?;
        let veg_tau = layer(self.veg_tau, 1.0, "veg_tau")?;
        let sin_slope = layer(self.sin_slope, 0.0, "sin_slope")?;
        let aspect = layer(self.aspect, 0.0, "aspect")?;
        let sky_view = layer(self.sky_view, 1.0, "sky_view")?;
        let terrain_config = layer(self.terrain_config, 0.0, "terrain_config")?;
        let veg_type = match self.veg_type {
            Some(rows) => {
                if rows.len() != ny || rows.iter().any(|r| r.len() != nx) {
                    return Err(SmrfError::config("topo layer veg_type does not match dem"));
                }
                rows.into_iter().flatten().collect()
            }
            None => vec![0; nx * ny],
        };
        Topography::new(TopographyParts {
            dem,
            mask,
            veg_type,
            veg_height,
            veg_k,
            veg_tau,
            sin_slope,
            aspect,
            sky_view,
            terrain_config,
            x: self.x,
            y: self.y,
            zone_number: self.zone_number,
            northern_hemisphere: self.northern_hemisphere,
            basin_lat: self.basin_lat,
            basin_lon: self.basin_lon,
        })
    }
}

/// Constructor arguments for [`Topography::new`].
pub struct TopographyParts {
    pub dem: Raster,
    pub mask: Raster,
    pub veg_type: Vec<i64>,
    pub veg_height: Raster,
    pub veg_k: Raster,
    pub veg_tau: Raster,
    pub sin_slope: Raster,
    pub aspect: Raster,
    pub sky_view: Raster,
    pub terrain_config: Raster,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub zone_number: u32,
    pub northern_hemisphere: bool,
    pub basin_lat: Option<f64>,
    pub basin_lon: Option<f64>,
}

impl Topography {
    /// Validate shapes and derive spacing and the basin centroid.
    pub fn new(p: TopographyParts) -> Result<Self> {
        let (ny, nx) = p.dem.shape();
        if ny == 0 || nx == 0 {
            return Err(SmrfError::config("topography dem is empty"));
        }
        if p.x.len() != nx || p.y.len() != ny {
            return Err(SmrfError::config(format!(
                "coordinate vectors x[{}], y[{}] do not match dem {ny}x{nx}",
                p.x.len(),
                p.y.len()
            )));
        }
        for (name, r) in [
            ("mask", &p.mask),
            ("veg_height", &p.veg_height),
            ("veg_k", &p.veg_k),
            ("veg_tau", &p.veg_tau),
            ("sin_slope", &p.sin_slope),
            ("aspect", &p.aspect),
            ("sky_view", &p.sky_view),
            ("terrain_config", &p.terrain_config),
        ] {
            if r.shape() != (ny, nx) {
                return Err(SmrfError::config(format!("topo layer {name} does not match dem")));
            }
        }
        if p.veg_type.len() != nx * ny {
            return Err(SmrfError::config("topo layer veg_type does not match dem"));
        }

        let dx = mean_spacing(&p.x);
        let dy = mean_spacing(&p.y);
        if nx > 1 && dx <= 0.0 || ny > 1 && dy <= 0.0 {
            return Err(SmrfError::config("topography coordinates must be strictly monotonic"));
        }

        let (basin_lat, basin_lon) = match (p.basin_lat, p.basin_lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                let cx = (p.x[0] + p.x[nx - 1]) / 2.0;
                let cy = (p.y[0] + p.y[ny - 1]) / 2.0;
                let ll = utm::to_latlon(Utm {
                    easting: cx,
                    northing: cy,
                    zone: p.zone_number,
                    northern: p.northern_hemisphere,
                });
                (ll.lat, ll.lon)
            }
        };

        Ok(Self {
            dem: p.dem,
            mask: p.mask,
            veg_type: p.veg_type,
            veg_height: p.veg_height,
            veg_k: p.veg_k,
            veg_tau: p.veg_tau,
            sin_slope: p.sin_slope,
            aspect: p.aspect,
            sky_view: p.sky_view,
            terrain_config: p.terrain_config,
            x: p.x,
            y: p.y,
            dx,
            dy,
            zone_number: p.zone_number,
            northern_hemisphere: p.northern_hemisphere,
            basin_lat,
            basin_lon,
        })
    }

    pub fn ny(&self) -> usize {
        self.dem.ny
    }

    pub fn nx(&self) -> usize {
        self.dem.nx
    }

    /// Nearest cell `(xi, yi)` to a UTM location.
    pub fn nearest_pixel(&self, mx: f64, my: f64) -> (usize, usize) {
        (argmin_abs(&self.x, mx), argmin_abs(&self.y, my))
    }

    /// Geographic bounding box `(min_lat, min_lon, max_lat, max_lon)` of the
    /// grid corners.
    pub fn latlon_bounds(&self) -> (f64, f64, f64, f64) {
        let xs = [self.x[0], self.x[self.nx() - 1]];
        let ys = [self.y[0], self.y[self.ny() - 1]];
        let mut b = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &e in &xs {
            for &n in &ys {
                let ll: LatLon = utm::to_latlon(Utm {
                    easting: e,
                    northing: n,
                    zone: self.zone_number,
                    northern: self.northern_hemisphere,
                });
                b.0 = b.0.min(ll.lat);
                b.1 = b.1.min(ll.lon);
                b.2 = b.2.max(ll.lat);
                b.3 = b.3.max(ll.lon);
            }
        }
        b
    }

    /// Project a geographic point into the topography's zone.
    pub fn to_utm(&self, lat: f64, lon: f64) -> (f64, f64) {
        let u = utm::from_latlon(LatLon::new(lat, lon), self.zone_number);
        (u.easting, u.northing)
    }
}

fn mean_spacing(v: &[f64]) -> f64 {
    if v.len() < 2 {
        return 1.0;
    }
    let steps: Vec<f64> = v.windows(2).map(|w| w[1] - w[0]).collect();
    let same_sign = steps.iter().all(|s| *s > 0.0) || steps.iter().all(|s| *s < 0.0);
    if !same_sign {
        return -1.0;
    }
    (steps.iter().sum::<f64>() / steps.len() as f64).abs()
}

fn argmin_abs(v: &[f64], target: f64) -> usize {
    v.iter()
        .enumerate()
        .fold((0usize, f64::INFINITY), |(bi, bd), (i, &x)| {
            let d = (x - target).abs();
            if d < bd { (i, d) } else { (bi, bd) }
        })
        .0
}


#[cfg(test)]
mod tests {
    use super::testing::tilted_basin;
    use super::*;

    #[test]
    fn spacing_uses_absolute_mean() {
        let t = tilted_basin(4, 4);
        assert_eq!(t.dx, 100.0);
        assert_eq!(t.dy, 100.0, "descending y must still give positive dy");
    }

    #[test]
    fn nearest_pixel_picks_closest_center() {
        let t = tilted_basin(4, 4);
        assert_eq!(t.nearest_pixel(520_160.0, 4_768_760.0), (1, 2));
    }

    #[test]
    fn mismatched_layer_is_config_error() {
        let file = TopoFile {
            dem: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            mask: Some(vec![vec![1.0]]),
            veg_type: None,
            veg_height: None,
            veg_k: None,
            veg_tau: None,
            sin_slope: None,
            aspect: None,
            sky_view: None,
            terrain_config: None,
            x: vec![0.0, 1.0],
            y: vec![1.0, 0.0],
            zone_number: 11,
            northern_hemisphere: true,
            basin_lat: None,
            basin_lon: None,
        };
        assert!(matches!(file.into_topography(), Err(SmrfError::Config(_))));
    }

    #[test]
    fn bounds_contain_centroid() {
        let t = tilted_basin(4, 4);
        let (lat0, lon0, lat1, lon1) = t.latlon_bounds();
        assert!(lat0 < lat1 && lon0 < lon1);
        assert!((42.9..43.2).contains(&lat0));
    }
}
