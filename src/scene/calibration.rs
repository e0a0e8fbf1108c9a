use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShadowError};

/// Pinhole camera intrinsics recovered from the scene's vanishing points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focal_length: f64,
    pub principal_point: Vector2<f64>,
}

impl CameraIntrinsics {
    /// The 3x3 intrinsic matrix mapping camera space to pixel space:
    /// upper-triangular, focal terms on the diagonal, unit bottom-right.
    pub fn matrix(&self) -> Matrix3<f64> {
        let mut k = Matrix3::zeros();
        k[(0, 0)] = self.focal_length;
        k[(1, 1)] = self.focal_length;
        k[(0, 2)] = self.principal_point.x;
        k[(1, 2)] = self.principal_point.y;
        k[(2, 2)] = 1.0;
        k
    }

    /// Derives the focal length from the two vanishing points nearest the
    /// principal point, using the orthogonality of the three camera-space
    /// vanishing directions.
    pub fn from_vanishing_points(
        points: &[Vector2<f64>],
        principal_point: Vector2<f64>,
    ) -> Result<Self> {
        if points.len() < 2 {
            return Err(ShadowError::InsufficientGeometry(format!(
                "camera calibration needs at least 2 vanishing points, got {}",
                points.len()
            )));
        }

        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| {
            let da = (points[a] - principal_point).norm();
            let db = (points[b] - principal_point).norm();
            da.total_cmp(&db)
        });
        let p_min = points[order[0]];
        let p_second = points[order[1]];

        let focal_sq = (principal_point - p_min).dot(&(p_second - principal_point));
        if focal_sq < 0.0 {
            warn!("calibration: vanishing points on the same side of the principal point");
        }
        let focal_length = focal_sq.abs().sqrt();

        if !focal_length.is_finite() || focal_length < 1e-6 {
            return Err(ShadowError::InsufficientGeometry(
                "degenerate focal length from vanishing points".into(),
            ));
        }

        debug!("calibration: focal length {focal_length:.2}");
        Ok(Self {
            focal_length,
            principal_point,
        })
    }
}

/// Solves for the world-to-camera rotation and translation given three
/// image-space vanishing points and an image-space origin. The three scale
/// factors come from a least-squares solve of the orthogonality and
/// unit-norm constraints on the camera axes.
pub fn solve_world_to_camera(
    intrinsics: &CameraIntrinsics,
    points: &[Vector2<f64>],
    origin: (f64, f64),
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    if points.len() < 3 {
        return Err(ShadowError::InsufficientGeometry(format!(
            "world-to-camera solve needs 3 vanishing points, got {}",
            points.len()
        )));
    }

    let f = intrinsics.focal_length;
    let u0 = intrinsics.principal_point.x;
    let v0 = intrinsics.principal_point.y;
    let (u1, v1) = (points[0].x, points[0].y);
    let (u2, v2) = (points[1].x, points[1].y);
    let (u3, v3) = (points[2].x, points[2].y);

    let a = DMatrix::from_row_slice(
        5,
        3,
        &[
            u1,
            u2,
            u3,
            v1,
            v2,
            v3,
            u1 * u1,
            u2 * u2,
            u3 * u3,
            v1 * v1,
            v2 * v2,
            v3 * v3,
            u1 * v1,
            u2 * v2,
            u3 * v3,
        ],
    );
    let b = DVector::from_row_slice(&[
        u0,
        v0,
        f * f + u0 * u0,
        f * f + v0 * v0,
        u0 * v0,
    ]);

    let svd = a.svd(true, true);
    let x = svd
        .solve(&b, 1e-12)
        .map_err(|e| ShadowError::InsufficientGeometry(format!("scale solve failed: {e}")))?;

    let l1 = x[0].abs().sqrt();
    let l2 = x[1].abs().sqrt();
    let l3 = x[2].abs().sqrt();

    let rotation = Matrix3::new(
        l1 * (u1 - u0) / f,
        l2 * (u2 - u0) / f,
        l3 * (u3 - u0) / f,
        l1 * (v1 - v0) / f,
        l2 * (v2 - v0) / f,
        l3 * (v3 - v0) / f,
        l1,
        l2,
        l3,
    );

    // the chosen image-space origin, mapped through (K R)^-1, becomes the
    // camera-space position of the world origin
    let k = intrinsics.matrix();
    let kr = k * rotation;
    let kr_inv = kr.try_inverse().ok_or_else(|| {
        ShadowError::InsufficientGeometry("ill-conditioned camera transform".into())
    })?;
    let translation = kr_inv * Vector3::new(origin.0, origin.1, 1.0);

    Ok((rotation, translation))
}
