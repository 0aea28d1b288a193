//! Bowyer–Watson Delaunay triangulation and point location for scattered
//! station interpolation.

/// Triangles index into `points`; every triangle is counter-clockwise.
#[derive(Debug, Clone)]
pub struct Triangulation {
    pub points: Vec<[f64; 2]>,
    pub triangles: Vec<[usize; 3]>,
}

impl Triangulation {
    /// Triangulate `points`. Fewer than three points, or all points on a
    /// line, give no triangles.
    pub fn new(points: &[[f64; 2]]) -> Self {
        let n = points.len();
        if n < 3 {
            return Self {
                points: points.to_vec(),
                triangles: Vec::new(),
            };
        }

        // Work in a normalised frame to keep the circumcircle test stable.
        let (mut xmin, mut ymin, mut xmax, mut ymax) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            xmin = xmin.min(p[0]);
            ymin = ymin.min(p[1]);
            xmax = xmax.max(p[0]);
            ymax = ymax.max(p[1]);
        }
        let scale = (xmax - xmin).max(ymax - ymin).max(f64::MIN_POSITIVE);
        let mut pts: Vec<[f64; 2]> = points
            .iter()
            .map(|p| [(p[0] - xmin) / scale, (p[1] - ymin) / scale])
            .collect();

        // Super triangle enclosing the unit square.
        pts.push([-100.0, -100.0]);
        pts.push([100.0, -100.0]);
        pts.push([0.0, 100.0]);
        let mut tris: Vec<[usize; 3]> = vec![[n, n + 1, n + 2]];

        for i in 0..n {
            let p = pts[i];
            let mut bad = Vec::new();
            tris.retain(|t| {
                if in_circumcircle(&pts, t, p) {
                    bad.push(*t);
                    false
                } else {
                    true
                }
            });

            // Boundary of the cavity: edges used by exactly one bad triangle.
            let mut edges: Vec<[usize; 2]> = Vec::new();
            for t in &bad {
                for e in [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]] {
                    if let Some(k) = edges.iter().position(|f| f[0] == e[1] && f[1] == e[0]) {
                        edges.swap_remove(k);
                    } else {
                        edges.push(e);
                    }
                }
            }
            for e in edges {
                tris.push(ccw(&pts, [e[0], e[1], i]));
            }
        }

        tris.retain(|t| t.iter().all(|&v| v < n));
        tris.retain(|t| orient(pts[t[0]], pts[t[1]], pts[t[2]]).abs() > 1e-12);

        Self {
            points: points.to_vec(),
            triangles: tris,
        }
    }

    /// Barycentric coordinates of `p` in triangle `t`.
    pub fn barycentric(&self, t: usize, p: [f64; 2]) -> [f64; 3] {
        barycentric(
            self.points[self.triangles[t][0]],
            self.points[self.triangles[t][1]],
            self.points[self.triangles[t][2]],
            p,
        )
    }

    /// Triangle containing `p` and its barycentric coordinates.
    pub fn locate(&self, p: [f64; 2]) -> Option<(usize, [f64; 3])> {
        const EPS: f64 = -1e-9;
        (0..self.triangles.len())
            .map(|t| (t, self.barycentric(t, p)))
            .find(|(_, b)| b.iter().all(|&v| v >= EPS))
    }

    /// Triangles sharing an edge, `neighbors[t][k]` is opposite vertex `k`.
    pub fn neighbors(&self) -> Vec<[Option<usize>; 3]> {
        let mut out = vec![[None; 3]; self.triangles.len()];
        for (t, tri) in self.triangles.iter().enumerate() {
            for k in 0..3 {
                let (a, b) = (tri[(k + 1) % 3], tri[(k + 2) % 3]);
                out[t][k] = self.triangles.iter().enumerate().find_map(|(u, other)| {
                    (u != t && other.contains(&a) && other.contains(&b)).then_some(u)
                });
            }
        }
        out
    }

    /// Vertices joined to each vertex by a triangle edge.
    pub fn vertex_neighbors(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.points.len()];
        for t in &self.triangles {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                if !adj[a].contains(&b) {
                    adj[a].push(b);
                }
                if !adj[b].contains(&a) {
                    adj[b].push(a);
                }
            }
        }
        adj
    }
}

fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn ccw(pts: &[[f64; 2]], t: [usize; 3]) -> [usize; 3] {
    if orient(pts[t[0]], pts[t[1]], pts[t[2]]) < 0.0 {
        [t[0], t[2], t[1]]
    } else {
        t
    }
}

fn in_circumcircle(pts: &[[f64; 2]], t: &[usize; 3], p: [f64; 2]) -> bool {
    let [a, b, c] = [pts[t[0]], pts[t[1]], pts[t[2]]];
    let (ax, ay) = (a[0] - p[0], a[1] - p[1]);
    let (bx, by) = (b[0] - p[0], b[1] - p[1]);
    let (cx, cy) = (c[0] - p[0], c[1] - p[1]);
    let det = (ax * ax + ay * ay) * (bx * cy - cx * by) - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);
    // Counter-clockwise triangles have a positive determinant for interior points.
    det > 0.0
}

pub fn barycentric(a: [f64; 2], b: [f64; 2], c: [f64; 2], p: [f64; 2]) -> [f64; 3] {
    let det = orient(a, b, c);
    let l0 = orient(p, b, c) / det;
    let l1 = orient(a, p, c) / det;
    [l0, l1, 1.0 - l0 - l1]
}
