use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use ndarray::Array2;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{Result, ShadowError};
use crate::lines::{cluster_length, LineCluster, LineSegment};

#[derive(Debug, Clone)]
pub struct VanishingConfig {
    /// EM refinement iteration budget; 0 disables refinement entirely.
    pub max_em_iter: usize,
    pub min_cluster_size: usize,
    pub min_line_len2: f64,
    pub residual_stdev: f64,
    pub max_clusters: usize,
    pub outlier_weight: f64,
    pub weight_clamp: f64,
    pub lambda_perp: f64,
    /// Assumed field of view (degrees) used only to lift normalized
    /// vanishing points into camera-space unit vectors.
    pub fov_degrees: f64,
}

impl Default for VanishingConfig {
    fn default() -> Self {
        Self {
            max_em_iter: 0,
            min_cluster_size: 10,
            min_line_len2: 4.0,
            residual_stdev: 0.75,
            max_clusters: 8,
            outlier_weight: 0.2,
            weight_clamp: 0.1,
            lambda_perp: 1.0,
            fov_degrees: 60.0,
        }
    }
}

/// Result of the vanishing point estimation: up to 3 unit directions with
/// their image-space (pixel) projections, ordered by cluster length.
#[derive(Debug, Clone)]
pub struct VanishingEstimate {
    pub directions: Vec<Vector3<f64>>,
    pub points: Vec<Vector2<f64>>,
    pub clusters: Vec<LineCluster>,
    /// How many leading entries were measured from line clusters; any
    /// remaining entry was synthesized to complete the orthonormal triple
    /// and carries no image evidence of its own.
    pub measured: usize,
}

pub struct VanishingPointEstimator {
    config: VanishingConfig,
    width: f64,
    height: f64,
}

impl VanishingPointEstimator {
    pub fn new(width: u32, height: u32, config: VanishingConfig) -> Self {
        Self {
            config,
            width: width as f64,
            height: height as f64,
        }
    }

    fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    fn focal_y(&self) -> f64 {
        let dim = self.width.max(self.height);
        0.5 * dim / (self.height * (self.config.fov_degrees.to_radians() / 2.0).tan())
    }

    /// 3-D unit direction corresponding to a vanishing point in normalized
    /// image coordinates (pinhole model with the assumed field of view).
    pub fn point_to_vector(&self, p: Vector2<f64>) -> Vector3<f64> {
        Vector3::new(
            (p.x - 0.5) * self.aspect_ratio(),
            0.5 - p.y, // flip y coordinate
            -self.focal_y(),
        )
        .normalize()
    }

    /// Normalized-coordinate vanishing point for a 3-D direction.
    pub fn vector_to_point(&self, v: &Vector3<f64>) -> Vector2<f64> {
        let focal_y = self.focal_y();
        if v.z.abs() < 1e-10 {
            Vector2::new(
                0.5 + v.x * (focal_y / self.aspect_ratio()) * 1e10,
                0.5 - v.y * focal_y * 1e10,
            )
        } else {
            Vector2::new(
                0.5 + v.x * (focal_y / self.aspect_ratio()) / (-v.z),
                0.5 - v.y * focal_y / (-v.z),
            )
        }
    }

    fn vector_to_pixel(&self, v: &Vector3<f64>) -> Vector2<f64> {
        let p = self.vector_to_point(v);
        Vector2::new(p.x * self.width, p.y * self.height)
    }

    /// Runs the estimation over pre-clustered segments.
    pub fn estimate(&self, input_clusters: &[LineCluster]) -> Result<VanishingEstimate> {
        let cfg = &self.config;

        let mut clusters: Vec<LineCluster> = input_clusters
            .iter()
            .map(|cluster| {
                cluster
                    .iter()
                    .filter(|l| l.length_squared() >= cfg.min_line_len2)
                    .copied()
                    .collect::<Vec<_>>()
            })
            .collect();

        // a looser threshold when EM will re-filter later
        let threshold = if cfg.max_em_iter > 0 {
            3
        } else {
            cfg.min_cluster_size
        };
        clusters.retain(|c| c.len() >= threshold);
        clusters.sort_by(|a, b| cluster_length(b).total_cmp(&cluster_length(a)));
        if cfg.max_em_iter > 0 && clusters.len() > cfg.max_clusters {
            clusters.truncate(cfg.max_clusters);
        }

        if clusters.is_empty() {
            return Err(ShadowError::InsufficientGeometry(
                "no usable line clusters".into(),
            ));
        }
        debug!(
            "vanishing: {} clusters, {} lines",
            clusters.len(),
            clusters.iter().map(Vec::len).sum::<usize>()
        );

        // algebraic least-squares initialization, one solve per cluster
        let initial: Vec<Option<Vector3<f64>>> = clusters
            .par_iter()
            .map(|cluster| {
                algebraic_vanishing_point(cluster).map(|p| {
                    self.point_to_vector(Vector2::new(p.x / self.width, p.y / self.height))
                })
            })
            .collect();

        let mut vectors = Vec::new();
        let mut kept_clusters = Vec::new();
        for (cluster, vector) in clusters.into_iter().zip(initial) {
            match vector {
                Some(v) => {
                    vectors.push(v);
                    kept_clusters.push(cluster);
                }
                None => warn!("vanishing: dropping cluster with degenerate algebraic solve"),
            }
        }
        if vectors.is_empty() {
            return Err(ShadowError::InsufficientGeometry(
                "all cluster solves degenerate".into(),
            ));
        }

        let (mut directions, mut points, mut final_clusters) = if cfg.max_em_iter > 0 {
            self.refine_em(vectors, kept_clusters)?
        } else {
            self.refine_per_cluster(vectors, kept_clusters)
        };

        // complete the orthonormal triple when only two directions survive
        let measured = directions.len().min(3);
        if directions.len() == 2 {
            if let Some(third) = normalized_cross(&directions[0], &directions[1]) {
                points.push(self.vector_to_pixel(&third));
                directions.push(third);
                final_clusters.push(Vec::new());
            }
        }

        directions.truncate(3);
        points.truncate(3);
        final_clusters.truncate(3);

        debug!(
            "vanishing: retained {} directions ({} measured)",
            directions.len(),
            measured
        );
        Ok(VanishingEstimate {
            directions,
            points,
            clusters: final_clusters,
            measured,
        })
    }

    /// Default path: refine each cluster's direction independently, then merge
    /// near-duplicates and clamp the cluster count.
    fn refine_per_cluster(
        &self,
        mut vectors: Vec<Vector3<f64>>,
        clusters: Vec<LineCluster>,
    ) -> (Vec<Vector3<f64>>, Vec<Vector2<f64>>, Vec<LineCluster>) {
        let cfg = &self.config;

        for (vector, cluster) in vectors.iter_mut().zip(clusters.iter()) {
            let lines = cluster.clone();
            let x0 = pack_spherical(std::slice::from_ref(vector));
            let x_opt = refine_least_squares(
                &x0,
                |x| {
                    let v = unpack_spherical(x);
                    let p = self.vector_to_pixel(&v[0]);
                    lines.iter().map(|l| line_residual(l, &p)).collect()
                },
                1e-8,
                20,
            );
            *vector = unpack_spherical(&x_opt)[0];
        }

        // delete near-duplicate directions
        let merge_dot = 20.0f64.to_radians().cos();
        let mut merged_vectors: Vec<Vector3<f64>> = Vec::new();
        let mut merged_clusters = Vec::new();
        for (vector, cluster) in vectors.into_iter().zip(clusters) {
            if merged_vectors
                .iter()
                .all(|w| vector.dot(w).abs() < merge_dot)
            {
                merged_vectors.push(vector);
                merged_clusters.push(cluster);
            }
        }

        if merged_clusters.len() > cfg.max_clusters {
            merged_vectors.truncate(cfg.max_clusters);
            merged_clusters.truncate(cfg.max_clusters);
        }

        let points = merged_vectors
            .iter()
            .map(|v| self.vector_to_pixel(v))
            .collect();
        (merged_vectors, points, merged_clusters)
    }

    /// Optional EM mode: iterative Gaussian re-weighting of segment
    /// membership, joint weighted re-estimation with an orthogonality
    /// penalty, and merging of converging directions.
    fn refine_em(
        &self,
        mut vectors: Vec<Vector3<f64>>,
        clusters: Vec<LineCluster>,
    ) -> Result<(Vec<Vector3<f64>>, Vec<Vector2<f64>>, Vec<LineCluster>)> {
        let cfg = &self.config;
        let all_lines: Vec<LineSegment> = clusters.iter().flatten().copied().collect();

        if vectors.len() >= 2 {
            if let Some(third) = normalized_cross(&vectors[0], &vectors[1]) {
                vectors.push(third);
            }
        }

        let exp_coeff = 0.5 / (cfg.residual_stdev * cfg.residual_stdev);
        let mut x_prev: Option<Vec<f64>> = None;
        let mut x_opt: Option<Vec<f64>> = None;
        let mut weights = Array2::<f64>::zeros((all_lines.len(), vectors.len() + 1));
        let mut converged = false;

        for em_iter in 0..cfg.max_em_iter {
            // E step: soft membership from Gaussian kernel on line residuals,
            // plus a fixed-weight outlier bucket
            let points: Vec<Vector2<f64>> =
                vectors.iter().map(|v| self.vector_to_pixel(v)).collect();

            weights = Array2::zeros((all_lines.len(), vectors.len() + 1));
            for (i_p, p) in points.iter().enumerate() {
                for (i_l, line) in all_lines.iter().enumerate() {
                    let r = line_residual(line, p);
                    weights[[i_l, i_p]] = (-exp_coeff * r * r).exp();
                }
            }
            for i_l in 0..all_lines.len() {
                weights[[i_l, points.len()]] = cfg.outlier_weight;
            }
            for mut row in weights.rows_mut() {
                let total: f64 = row.sum();
                if total > 0.0 {
                    row.mapv_inplace(|w| w / total);
                }
            }
            weights.mapv_inplace(|w| if w < cfg.weight_clamp { 0.0 } else { w });

            if em_iter >= 10 {
                if let (Some(a), Some(b)) = (&x_prev, &x_opt) {
                    if a.len() == b.len() {
                        let delta: f64 = a
                            .iter()
                            .zip(b.iter())
                            .map(|(x, y)| (x - y) * (x - y))
                            .sum::<f64>()
                            .sqrt();
                        if delta <= 1e-5 {
                            converged = true;
                            break;
                        }
                    }
                }
            }

            // reorder by total supporting weight
            if vectors.len() > 1 {
                let mut order: Vec<usize> = (0..vectors.len()).collect();
                order.sort_by(|&a, &b| {
                    let wa: f64 = weights.column(a).sum();
                    let wb: f64 = weights.column(b).sum();
                    wb.total_cmp(&wa)
                });
                vectors = order.iter().map(|&i| vectors[i]).collect();
                let reordered = Array2::from_shape_fn(weights.dim(), |(r, c)| {
                    if c < order.len() {
                        weights[[r, order[c]]]
                    } else {
                        weights[[r, c]]
                    }
                });
                weights = reordered;
            }

            // M step: weighted residuals plus the orthogonality penalty,
            // solved over (theta, phi) sphere parameters
            let t = (em_iter as f64 / 20.0).min(1.0);
            let tol = ((1e-2f64).ln() * (1.0 - t) + (1e-6f64).ln() * t).exp();

            let weights_snapshot = weights.clone();
            let lines_ref = &all_lines;
            let lambda_perp = cfg.lambda_perp;
            let x0 = pack_spherical(&vectors);
            let solution = refine_least_squares(
                &x0,
                move |x| {
                    let cur_vectors = unpack_spherical(x);
                    let cur_points: Vec<Vector2<f64>> =
                        cur_vectors.iter().map(|v| self.vector_to_pixel(v)).collect();

                    let mut residuals = Vec::new();
                    for (i_p, p) in cur_points.iter().enumerate() {
                        for (i_l, line) in lines_ref.iter().enumerate() {
                            let w = weights_snapshot[[i_l, i_p]];
                            if w > 0.0 {
                                residuals.push(w * line_residual(line, p));
                            }
                        }
                    }

                    if lambda_perp > 0.0 {
                        for (i_v, v) in cur_vectors.iter().enumerate() {
                            for w in cur_vectors[..i_v].iter() {
                                let dot = v.dot(w).abs().clamp(0.0, 1.0);
                                residuals.push(lambda_perp * (4.0 * dot.acos()).sin());
                            }
                        }
                    }

                    residuals
                },
                tol,
                30,
            );
            x_prev = Some(x0);
            x_opt = Some(solution.clone());
            vectors = unpack_spherical(&solution);

            if vectors.len() == 2 {
                if let Some(third) = normalized_cross(&vectors[0], &vectors[1]) {
                    vectors.push(third);
                }
            }

            // merge directions that converged together; the threshold
            // tightens as iterations progress
            let merge_dot = (t * 20.0f64).to_radians().cos();
            let mut merged: Vec<Vector3<f64>> = Vec::new();
            for v in vectors {
                if merged.iter().all(|w| v.dot(w).abs() < merge_dot) {
                    merged.push(v);
                }
            }
            vectors = merged;
        }

        if !converged {
            warn!(
                "vanishing: EM budget of {} iterations exhausted without convergence; using last iterate",
                cfg.max_em_iter
            );
        }

        // re-assign segments to their strongest direction and re-filter
        let points: Vec<Vector2<f64>> = vectors.iter().map(|v| self.vector_to_pixel(v)).collect();
        let mut assigned: Vec<LineCluster> = vec![Vec::new(); points.len()];
        for (i_l, line) in all_lines.iter().enumerate() {
            if weights.ncols() == 0 {
                break;
            }
            let row = weights.row(i_l.min(weights.nrows().saturating_sub(1)));
            let mut best = 0;
            for c in 0..row.len() {
                if row[c] > row[best] {
                    best = c;
                }
            }
            if best < assigned.len() {
                assigned[best].push(*line);
            }
        }

        let mut triples: Vec<(Vector3<f64>, Vector2<f64>, LineCluster)> = vectors
            .into_iter()
            .zip(points)
            .zip(assigned)
            .map(|((v, p), c)| (v, p, c))
            .filter(|(_, _, c)| c.len() >= cfg.min_cluster_size)
            .collect();
        triples.sort_by(|a, b| cluster_length(&b.2).total_cmp(&cluster_length(&a.2)));

        if triples.is_empty() {
            return Err(ShadowError::InsufficientGeometry(
                "EM refinement discarded all clusters".into(),
            ));
        }

        let mut directions = Vec::with_capacity(triples.len());
        let mut out_points = Vec::with_capacity(triples.len());
        let mut out_clusters = Vec::with_capacity(triples.len());
        for (v, p, c) in triples {
            directions.push(v);
            out_points.push(p);
            out_clusters.push(c);
        }
        Ok((directions, out_points, out_clusters))
    }
}

/// Algebraic least-squares intersection of a cluster's homogeneous lines:
/// the right singular vector of smallest singular value, normalized by its
/// homogeneous coordinate.
fn algebraic_vanishing_point(cluster: &[LineSegment]) -> Option<Vector2<f64>> {
    let mut a = DMatrix::zeros(cluster.len(), 3);
    for (i, segment) in cluster.iter().enumerate() {
        let [la, lb, lc] = segment.homogeneous();
        a[(i, 0)] = la;
        a[(i, 1)] = lb;
        a[(i, 2)] = lc;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.as_ref()?;
    let mut smallest = 0;
    for i in 0..svd.singular_values.len() {
        if svd.singular_values[i] < svd.singular_values[smallest] {
            smallest = i;
        }
    }

    let row = v_t.row(smallest);
    let w = row[2];
    if w.abs() < 1e-12 {
        return None;
    }
    Some(Vector2::new(row[0] / w, row[1] / w))
}

/// Distance between an endpoint of the segment and the line joining the
/// candidate point to the segment midpoint (Tardif's residual).
pub(crate) fn line_residual(segment: &LineSegment, p: &Vector2<f64>) -> f64 {
    let (mx, my) = segment.midpoint();
    let e = homogeneous_line(p.x, p.y, mx, my);
    let d = (e[0] * e[0] + e[1] * e[1]).max(1e-4);
    (e[0] * segment.x1 + e[1] * segment.y1 + e[2]) / d.sqrt()
}

fn homogeneous_line(ax: f64, ay: f64, bx: f64, by: f64) -> [f64; 3] {
    [ay - by, bx - ax, ax * by - ay * bx]
}

fn normalized_cross(a: &Vector3<f64>, b: &Vector3<f64>) -> Option<Vector3<f64>> {
    let c = a.cross(b);
    let norm = c.norm();
    if norm < 1e-12 {
        return None;
    }
    Some(c / norm)
}

fn unit_to_sphere(v: &Vector3<f64>) -> (f64, f64) {
    (v.z.clamp(-1.0, 1.0).acos(), v.y.atan2(v.x))
}

fn sphere_to_unit(theta: f64, phi: f64) -> Vector3<f64> {
    let (sin_theta, cos_theta) = theta.sin_cos();
    Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

fn pack_spherical(vectors: &[Vector3<f64>]) -> Vec<f64> {
    let mut x = Vec::with_capacity(vectors.len() * 2);
    for v in vectors {
        let (theta, phi) = unit_to_sphere(v);
        x.push(theta);
        x.push(phi);
    }
    x
}

fn unpack_spherical(x: &[f64]) -> Vec<Vector3<f64>> {
    x.chunks_exact(2)
        .map(|pair| sphere_to_unit(pair[0], pair[1]))
        .collect()
}

/// Damped Gauss-Newton over a numeric central-difference Jacobian. Returns
/// the best iterate found; callers accept approximate convergence.
fn refine_least_squares<F>(x0: &[f64], residuals: F, tol: f64, max_iter: usize) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut x = DVector::from_column_slice(x0);
    let mut r = DVector::from_vec(residuals(x.as_slice()));
    if r.is_empty() {
        return x0.to_vec();
    }
    let mut cost = r.norm_squared();
    let mut mu = 1e-3;
    let n = x.len();
    let m = r.len();
    let eps = 1e-6;

    for _ in 0..max_iter {
        let mut jacobian = DMatrix::zeros(m, n);
        for col in 0..n {
            let mut xp = x.clone();
            xp[col] += eps;
            let mut xm = x.clone();
            xm[col] -= eps;
            let rp = residuals(xp.as_slice());
            let rm = residuals(xm.as_slice());
            if rp.len() != m || rm.len() != m {
                return x.as_slice().to_vec();
            }
            for row in 0..m {
                jacobian[(row, col)] = (rp[row] - rm[row]) / (2.0 * eps);
            }
        }

        let jt = jacobian.transpose();
        let jtj = &jt * &jacobian;
        let jtr = &jt * &r;

        let mut stepped = false;
        for _ in 0..8 {
            let mut damped = jtj.clone();
            for d in 0..n {
                damped[(d, d)] += mu * (1.0 + jtj[(d, d)].abs());
            }
            let delta = match damped.lu().solve(&(-&jtr)) {
                Some(delta) => delta,
                None => {
                    mu *= 10.0;
                    continue;
                }
            };
            let x_new = &x + &delta;
            let r_new = DVector::from_vec(residuals(x_new.as_slice()));
            if r_new.len() == m && r_new.norm_squared() < cost {
                let step = delta.norm();
                x = x_new;
                r = r_new;
                cost = r.norm_squared();
                mu = (mu * 0.3).max(1e-12);
                stepped = true;
                if step <= tol {
                    return x.as_slice().to_vec();
                }
                break;
            }
            mu *= 10.0;
        }

        if !stepped {
            break;
        }
    }

    x.as_slice().to_vec()
}
