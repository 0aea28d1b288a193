//! Scattered-data interpolation over the station triangulation.
//!
//! `linear` is barycentric within each Delaunay triangle. `cubic` is a
//! Clough–Tocher split with vertex gradients estimated by least squares over
//! the neighbouring stations. Cells outside the convex hull are filled by
//! inverse distance.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use super::delaunay::{barycentric, Triangulation};
use super::detrend::Trend;
use super::idw::idw_point;
use crate::config::GridMethod;
use crate::error::{Result, SmrfError};
use crate::raster::Raster;
use crate::stations::StationSet;
use crate::topo::Topography;

/// Power of the inverse-distance fill outside the hull.
const FILL_POWER: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct GridOptions {
    pub method: GridMethod,
    pub detrend: bool,
    pub sign: i32,
    /// Fit the trend only on stations inside the basin mask.
    pub mask: bool,
    /// Fit a trend per station over its nearest neighbours.
    pub local: bool,
    pub local_n: usize,
}

/// Triangulation of one reporting pattern and where every cell falls in it.
struct GridCache {
    pattern: Vec<bool>,
    active: Vec<usize>,
    tri: Triangulation,
    neighbors: Vec<[Option<usize>; 3]>,
    vertex_adj: Vec<Vec<usize>>,
    cells: Vec<Option<(usize, [f64; 3])>>,
}

pub struct Grid {
    topo: Arc<Topography>,
    mx: Vec<f64>,
    my: Vec<f64>,
    mz: Vec<f64>,
    in_mask: Vec<bool>,
    opts: GridOptions,
    cache: Option<GridCache>,
}

impl Grid {
    pub fn new(topo: Arc<Topography>, stations: &StationSet, opts: GridOptions) -> Self {
        let in_mask = if opts.mask {
            stations
                .xi
                .iter()
                .zip(&stations.yi)
                .map(|(&x, &y)| topo.mask.get(y, x) > 0.5)
                .collect()
        } else {
            vec![true; stations.len()]
        };
        Self {
            topo,
            mx: stations.mx.clone(),
            my: stations.my.clone(),
            mz: stations.mz.clone(),
            in_mask,
            opts,
            cache: None,
        }
    }

    pub fn distribute(&mut self, values: &[f64]) -> Result<Raster> {
        let pattern: Vec<bool> = values.iter().map(|v| !v.is_nan()).collect();
        if !pattern.iter().any(|&p| p) {
            return Err(SmrfError::AllNaN {
                variable: String::new(),
                time: String::new(),
            });
        }
        if self.cache.as_ref().map(|c| &c.pattern) != Some(&pattern) {
            self.cache = Some(self.build_cache(pattern));
        }
        let Some(cache) = self.cache.as_ref() else {
            return Err(SmrfError::numeric("", "grid cache missing"));
        };
        let active_vals: Vec<f64> = cache.active.iter().map(|&i| values[i]).collect();
        let active_z: Vec<f64> = cache.active.iter().map(|&i| self.mz[i]).collect();

        if self.opts.local {
            return self.local_trend(cache, &active_vals, &active_z);
        }
        if !self.opts.detrend {
            return Ok(self.interpolate(cache, &active_vals));
        }

        let masked: Vec<f64> = values
            .iter()
            .zip(&self.in_mask)
            .map(|(&v, &m)| if m { v } else { f64::NAN })
            .collect();
        let trend = match Trend::fit(&self.mz, &masked, self.opts.sign) {
            Ok(t) => t,
            // No reporting station inside the mask, fall back to all of them.
            Err(SmrfError::AllNaN { .. }) => Trend::fit(&self.mz, values, self.opts.sign)?,
            Err(e) => return Err(e),
        };
        let residual = trend.detrend(&active_z, &active_vals);
        Ok(trend.retrend(&self.interpolate(cache, &residual), &self.topo.dem))
    }

    fn build_cache(&self, pattern: Vec<bool>) -> GridCache {
        let active: Vec<usize> = (0..pattern.len()).filter(|&i| pattern[i]).collect();
        let points: Vec<[f64; 2]> = active.iter().map(|&i| [self.mx[i], self.my[i]]).collect();
        let tri = Triangulation::new(&points);
        debug!(stations = active.len(), triangles = tri.triangles.len(), "station triangulation rebuilt");

        let (ny, nx) = (self.topo.ny(), self.topo.nx());
        let topo = &self.topo;
        let cells = (0..ny * nx)
            .into_par_iter()
            .map(|cell| tri.locate([topo.x[cell % nx], topo.y[cell / nx]]))
            .collect();
        GridCache {
            pattern,
            neighbors: tri.neighbors(),
            vertex_adj: tri.vertex_neighbors(),
            active,
            tri,
            cells,
        }
    }

    /// Interpolate values given on the active stations over the grid.
    fn interpolate(&self, cache: &GridCache, vals: &[f64]) -> Raster {
        let grads = match self.opts.method {
            GridMethod::Linear => Vec::new(),
            GridMethod::Cubic => estimate_gradients(&cache.tri, &cache.vertex_adj, vals),
        };
        let (ny, nx) = (self.topo.ny(), self.topo.nx());
        let ax: Vec<f64> = cache.active.iter().map(|&i| self.mx[i]).collect();
        let ay: Vec<f64> = cache.active.iter().map(|&i| self.my[i]).collect();

        let data = (0..ny * nx)
            .into_par_iter()
            .map(|cell| {
                let p = [self.topo.x[cell % nx], self.topo.y[cell / nx]];
                match cache.cells[cell] {
                    Some((t, b)) => {
                        let tri = cache.tri.triangles[t];
                        match self.opts.method {
                            GridMethod::Linear => b[0] * vals[tri[0]] + b[1] * vals[tri[1]] + b[2] * vals[tri[2]],
                            GridMethod::Cubic => {
                                clough_tocher(&cache.tri, &cache.neighbors, t, b, vals, &grads)
                            }
                        }
                    }
                    None => idw_point(p[0], p[1], &ax, &ay, vals, FILL_POWER),
                }
            })
            .collect();
        Raster { data, nx, ny }
    }

    /// Per-station trends over the nearest neighbours, interpolated as
    /// slope and intercept grids.
    fn local_trend(&self, cache: &GridCache, vals: &[f64], z: &[f64]) -> Result<Raster> {
        let n = cache.active.len();
        let k = self.opts.local_n.min(n);
        let ax: Vec<f64> = cache.active.iter().map(|&i| self.mx[i]).collect();
        let ay: Vec<f64> = cache.active.iter().map(|&i| self.my[i]).collect();

        let mut slopes = Vec::with_capacity(n);
        let mut intercepts = Vec::with_capacity(n);
        for i in 0..n {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| {
                let da = (ax[a] - ax[i]).hypot(ay[a] - ay[i]);
                let db = (ax[b] - ax[i]).hypot(ay[b] - ay[i]);
                da.total_cmp(&db)
            });
            let near = &order[..k];
            let nz: Vec<f64> = near.iter().map(|&j| z[j]).collect();
            let nv: Vec<f64> = near.iter().map(|&j| vals[j]).collect();
            let t = Trend::fit(&nz, &nv, self.opts.sign)?;
            slopes.push(t.slope);
            intercepts.push(t.intercept);
        }
        let residual: Vec<f64> = (0..n).map(|i| vals[i] - (slopes[i] * z[i] + intercepts[i])).collect();

        let slope = self.interpolate(cache, &slopes);
        let intercept = self.interpolate(cache, &intercepts);
        let res = self.interpolate(cache, &residual);
        let data = (0..res.len())
            .map(|i| res.data[i] + slope.data[i] * self.topo.dem.data[i] + intercept.data[i])
            .collect();
        Ok(Raster {
            data,
            nx: res.nx,
            ny: res.ny,
        })
    }
}

// ── Cubic ────────────────────────────────────────────────────────────────────

/// Least-squares plane through each vertex and its neighbours.
fn estimate_gradients(tri: &Triangulation, adj: &[Vec<usize>], vals: &[f64]) -> Vec<[f64; 2]> {
    (0..tri.points.len())
        .map(|i| {
            let p = tri.points[i];
            let (mut sxx, mut sxy, mut syy, mut sxf, mut syf) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for &j in &adj[i] {
                let dx = tri.points[j][0] - p[0];
                let dy = tri.points[j][1] - p[1];
                let df = vals[j] - vals[i];
                sxx += dx * dx;
                sxy += dx * dy;
                syy += dy * dy;
                sxf += dx * df;
                syf += dy * df;
            }
            let det = sxx * syy - sxy * sxy;
            if det.abs() <= 1e-12 * (sxx * syy).max(f64::MIN_POSITIVE) {
                [0.0, 0.0]
            } else {
                [(syy * sxf - sxy * syf) / det, (sxx * syf - sxy * sxf) / det]
            }
        })
        .collect()
}

fn dot(g: [f64; 2], e: [f64; 2]) -> f64 {
    g[0] * e[0] + g[1] * e[1]
}

/// Evaluate the Clough–Tocher macro-element of triangle `t` at barycentric `b`.
fn clough_tocher(
    tri: &Triangulation,
    neighbors: &[[Option<usize>; 3]],
    t: usize,
    b: [f64; 3],
    vals: &[f64],
    grads: &[[f64; 2]],
) -> f64 {
    let [i1, i2, i3] = tri.triangles[t];
    let (p1, p2, p3) = (tri.points[i1], tri.points[i2], tri.points[i3]);
    let (f1, f2, f3) = (vals[i1], vals[i2], vals[i3]);
    let (g1, g2, g3) = (grads[i1], grads[i2], grads[i3]);

    let e12 = [p2[0] - p1[0], p2[1] - p1[1]];
    let e23 = [p3[0] - p2[0], p3[1] - p2[1]];
    let e31 = [p1[0] - p3[0], p1[1] - p3[1]];

    let df12 = dot(g1, e12);
    let df21 = -dot(g2, e12);
    let df23 = dot(g2, e23);
    let df32 = -dot(g3, e23);
    let df31 = dot(g3, e31);
    let df13 = -dot(g1, e31);

    let c3000 = f1;
    let c2100 = (df12 + 3.0 * c3000) / 3.0;
    let c2010 = (df13 + 3.0 * c3000) / 3.0;
    let c0300 = f2;
    let c1200 = (df21 + 3.0 * c0300) / 3.0;
    let c0210 = (df23 + 3.0 * c0300) / 3.0;
    let c0030 = f3;
    let c1020 = (df31 + 3.0 * c0030) / 3.0;
    let c0120 = (df32 + 3.0 * c0030) / 3.0;

    let c2001 = (c2100 + c2010 + c3000) / 3.0;
    let c0201 = (c1200 + c0300 + c0210) / 3.0;
    let c0021 = (c1020 + c0120 + c0030) / 3.0;

    // Cross-boundary derivative condition from the neighbour's centroid.
    let mut g = [-0.5; 3];
    for (k, nb) in neighbors[t].iter().enumerate() {
        let Some(u) = *nb else { continue };
        let [a, bb, c] = tri.triangles[u];
        let centroid = [
            (tri.points[a][0] + tri.points[bb][0] + tri.points[c][0]) / 3.0,
            (tri.points[a][1] + tri.points[bb][1] + tri.points[c][1]) / 3.0,
        ];
        let y = barycentric(p1, p2, p3, centroid);
        g[k] = match k {
            0 => (2.0 * y[2] + y[1] - 1.0) / (2.0 - 3.0 * y[2] - 3.0 * y[1]),
            1 => (2.0 * y[0] + y[2] - 1.0) / (2.0 - 3.0 * y[0] - 3.0 * y[2]),
            _ => (2.0 * y[1] + y[0] - 1.0) / (2.0 - 3.0 * y[1] - 3.0 * y[0]),
        };
    }

    let c0111 = (g[0] * (-c0300 + 3.0 * c0210 - 3.0 * c0120 + c0030)
        + (-c0300 + 2.0 * c0210 - c0120 + c0021 + c0201))
        / 2.0;
    let c1011 = (g[1] * (-c0030 + 3.0 * c1020 - 3.0 * c2010 + c3000)
        + (-c0030 + 2.0 * c1020 - c2010 + c2001 + c0021))
        / 2.0;
    let c1101 = (g[2] * (-c3000 + 3.0 * c2100 - 3.0 * c1200 + c0300)
        + (-c3000 + 2.0 * c2100 - c1200 + c2001 + c0201))
        / 2.0;

    let c1002 = (c1101 + c1011 + c2001) / 3.0;
    let c0102 = (c1101 + c0111 + c0201) / 3.0;
    let c0012 = (c1011 + c0111 + c0021) / 3.0;
    let c0003 = (c1002 + c0102 + c0012) / 3.0;

    let minval = b[0].min(b[1]).min(b[2]);
    let (b1, b2, b3, b4) = (b[0] - minval, b[1] - minval, b[2] - minval, 3.0 * minval);

    if b[0] == minval {
        b2.powi(3) * c0300
            + 3.0 * b2 * b2 * b3 * c0210
            + 3.0 * b2 * b3 * b3 * c0120
            + b3.powi(3) * c0030
            + 3.0 * b2 * b2 * b4 * c0201
            + 6.0 * b2 * b3 * b4 * c0111
            + 3.0 * b3 * b3 * b4 * c0021
            + 3.0 * b2 * b4 * b4 * c0102
            + 3.0 * b3 * b4 * b4 * c0012
            + b4.powi(3) * c0003
    } else if b[1] == minval {
        b1.powi(3) * c3000
            + 3.0 * b1 * b1 * b3 * c2010
            + 3.0 * b1 * b3 * b3 * c1020
            + b3.powi(3) * c0030
            + 3.0 * b1 * b1 * b4 * c2001
            + 6.0 * b1 * b3 * b4 * c1011
            + 3.0 * b3 * b3 * b4 * c0021
            + 3.0 * b1 * b4 * b4 * c1002
            + 3.0 * b3 * b4 * b4 * c0012
            + b4.powi(3) * c0003
    } else {
        b1.powi(3) * c3000
            + 3.0 * b1 * b1 * b2 * c2100
            + 3.0 * b1 * b2 * b2 * c1200
            + b2.powi(3) * c0300
            + 3.0 * b1 * b1 * b4 * c2001
            + 6.0 * b1 * b2 * b4 * c1101
            + 3.0 * b2 * b2 * b4 * c0201
            + 3.0 * b1 * b4 * b4 * c1002
            + 3.0 * b2 * b4 * b4 * c0102
            + b4.powi(3) * c0003
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::testing::tilted_basin;
    use approx::assert_relative_eq;

    /// Stations at the four corners plus one inside, so the hull covers the grid.
    fn corner_stations(topo: &Topography) -> StationSet {
        let xs = [0, 3, 3, 0, 1];
        let ys = [0, 0, 3, 3, 2];
        StationSet {
            ids: (0..5).map(|i| format!("S{i}")).collect(),
            mx: xs.iter().map(|&c| topo.x[c]).collect(),
            my: ys.iter().map(|&r| topo.y[r]).collect(),
            mz: xs.iter().zip(&ys).map(|(&c, &r)| topo.dem.get(r, c)).collect(),
            xi: xs.to_vec(),
            yi: ys.to_vec(),
        }
    }

    fn opts(method: GridMethod) -> GridOptions {
        GridOptions {
            method,
            detrend: false,
            sign: 0,
            mask: false,
            local: false,
            local_n: 25,
        }
    }

    /// A linear field is reproduced exactly by both methods.
    #[test]
    fn linear_field_is_exact() {
        let topo = Arc::new(tilted_basin(4, 4));
        let st = corner_stations(&topo);
        let f = |x: f64, y: f64| 0.002 * (x - 520_000.0) - 0.001 * (y - 4_768_000.0) + 3.0;
        let vals: Vec<f64> = st.mx.iter().zip(&st.my).map(|(&x, &y)| f(x, y)).collect();
        for method in [GridMethod::Linear, GridMethod::Cubic] {
            let mut g = Grid::new(topo.clone(), &st, opts(method));
            let r = g.distribute(&vals).unwrap();
            for row in 0..4 {
                for col in 0..4 {
                    assert_relative_eq!(r.get(row, col), f(topo.x[col], topo.y[row]), epsilon = 1e-6);
                }
            }
        }
    }

    /// Station cells take the station value.
    #[test]
    fn honours_station_values() {
        let topo = Arc::new(tilted_basin(4, 4));
        let st = corner_stations(&topo);
        let vals = [1.0, 5.0, 2.0, 7.0, 4.0];
        let mut g = Grid::new(topo, &st, opts(GridMethod::Cubic));
        let r = g.distribute(&vals).unwrap();
        for i in 0..5 {
            assert_relative_eq!(r.get(st.yi[i], st.xi[i]), vals[i], epsilon = 1e-9);
        }
    }

    /// Cells outside the hull of the reporting stations are still filled.
    #[test]
    fn outside_hull_is_filled() {
        let topo = Arc::new(tilted_basin(4, 4));
        let st = corner_stations(&topo);
        let mut g = Grid::new(topo, &st, opts(GridMethod::Linear));
        let r = g.distribute(&[1.0, f64::NAN, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(r.count_nan(), 0);
    }

    /// Local trends recover a field that is linear in elevation.
    #[test]
    fn local_trend_follows_elevation() {
        let topo = Arc::new(tilted_basin(4, 4));
        let st = corner_stations(&topo);
        let vals: Vec<f64> = st.mz.iter().map(|z| 20.0 - 0.0065 * z).collect();
        let mut o = opts(GridMethod::Linear);
        o.local = true;
        o.local_n = 4;
        let mut g = Grid::new(topo.clone(), &st, o);
        let r = g.distribute(&vals).unwrap();
        for (v, z) in r.data.iter().zip(&topo.dem.data) {
            assert_relative_eq!(*v, 20.0 - 0.0065 * z, epsilon = 1e-6);
        }
    }
}
