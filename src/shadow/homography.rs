use log::debug;
use nalgebra::{DMatrix, Matrix3, Matrix4, Vector2, Vector3, Vector4};

use crate::error::{Result, ShadowError};
use crate::image_utils::AlphaBounds;
use crate::scene::SceneDescription;
use crate::shadow::ShadowConfig;

/// Computes the 3x3 perspective transform that maps the un-warped silhouette
/// to its ground-projected shadow, for a heuristically placed light.
pub fn compute_shadow_homography(
    dimensions: (u32, u32),
    scene: &SceneDescription,
    bounds: &AlphaBounds,
    config: &ShadowConfig,
) -> Result<Matrix3<f64>> {
    let (width, height) = (dimensions.0 as f64, dimensions.1 as f64);
    let x0 = bounds.left as f64;
    let x1 = bounds.right as f64;
    let y0 = bounds.bottom as f64; // assumed ground-contact row
    let y1 = bounds.top as f64;

    // world axes are recovered relative to the object's bottom-left corner
    let (rotation, translation) = scene.world_to_camera((x0, y0))?;
    let k = scene.camera_matrix();
    let world_to_im = k * rotation;
    let im_to_world = world_to_im.try_inverse().ok_or_else(|| {
        ShadowError::DegenerateHomography("camera transform not invertible".into())
    })?;

    // discover empirically which world axis is vertical and which lateral,
    // instead of assuming anything about the axis ordering
    let world_top = im_to_world * Vector3::new(width / 2.0, 0.0, 1.0);
    let world_bottom = im_to_world * Vector3::new(width / 2.0, height - 1.0, 1.0);
    let (up_index, up_flipped) = dominant_axis(&(world_top - world_bottom));

    let world_left = im_to_world * Vector3::new(0.0, height / 2.0, 1.0);
    let world_right = im_to_world * Vector3::new(width - 1.0, height / 2.0, 1.0);
    let (right_index, right_flipped) = dominant_axis(&(world_right - world_left));

    if up_index == right_index {
        return Err(ShadowError::DegenerateHomography(
            "vertical and lateral world axes coincide".into(),
        ));
    }
    let cam_index = 3 - up_index - right_index;

    // object height in world units, measured along the vertical axis
    let object_top = im_to_world * Vector3::new(x0, y1, 1.0);
    let object_height = (object_top[up_index] - translation[up_index]).abs();

    // heuristic point light: partway along the camera-to-object line,
    // nudged sideways, and raised above the ground plane
    let along = config.light_along;
    let mut light = Vector4::zeros();
    light[right_index] = if right_flipped {
        translation[right_index] * along + object_height / 4.0
    } else {
        translation[right_index] * along - object_height / 4.0
    };
    light[cam_index] = translation[cam_index] * along;
    light[up_index] = if up_flipped {
        -config.light_height * object_height
    } else {
        config.light_height * object_height
    };
    light[3] = 1.0;

    // ground plane through the contact point's vertical coordinate
    let mut plane = Vector4::zeros();
    plane[up_index] = 1.0;
    plane[3] = -translation[up_index];

    // projection onto the plane from the light: lambda*I - light*plane^T
    let lambda = plane.dot(&light);
    let world_to_ground = Matrix4::identity() * lambda - light * plane.transpose();

    // project the 4 bounding-box corners onto the ground and back to image
    // space; these correspondences pin down the homography
    let corners = [
        Vector2::new(x0, y0),
        Vector2::new(x0, y1),
        Vector2::new(x1, y0),
        Vector2::new(x1, y1),
    ];
    let mut ground_corners = [Vector2::zeros(); 4];
    for (i, corner) in corners.iter().enumerate() {
        let world = im_to_world * Vector3::new(corner.x, corner.y, 1.0);
        let ground = world_to_ground * Vector4::new(world.x, world.y, world.z, 1.0);
        let image = world_to_im * Vector3::new(ground.x, ground.y, ground.z);
        if image.z.abs() < 1e-12 {
            return Err(ShadowError::DegenerateHomography(
                "ground projection at infinity".into(),
            ));
        }
        ground_corners[i] = Vector2::new(image.x / image.z, image.y / image.z);
    }

    let homography = fit_homography(&corners, &ground_corners)?;
    if homography.iter().any(|v| !v.is_finite()) {
        return Err(ShadowError::DegenerateHomography(
            "non-finite homography entries".into(),
        ));
    }

    debug!(
        "shadow homography: corners {:?} -> {:?}",
        corners, ground_corners
    );
    Ok(homography)
}

/// Index and sign of the component with the largest absolute value.
fn dominant_axis(delta: &Vector3<f64>) -> (usize, bool) {
    let mut index = 0;
    for i in 1..3 {
        if delta[i].abs() > delta[index].abs() {
            index = i;
        }
    }
    (index, delta[index] < 0.0)
}

/// Fits the planar projective transform taking `src` to `dst` via the
/// normalized direct linear transform.
pub fn fit_homography(src: &[Vector2<f64>; 4], dst: &[Vector2<f64>; 4]) -> Result<Matrix3<f64>> {
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    // square system (extra zero row) so the thin SVD's v_t spans all of R^9,
    // including the null-space vector holding the solution
    let mut a = DMatrix::zeros(9, 9);
    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .as_ref()
        .ok_or_else(|| ShadowError::DegenerateHomography("homography SVD failed".into()))?;
    let mut smallest = 0;
    for i in 0..svd.singular_values.len() {
        if svd.singular_values[i] < svd.singular_values[smallest] {
            smallest = i;
        }
    }
    let h = v_t.row(smallest);
    let h_normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| ShadowError::DegenerateHomography("degenerate normalization".into()))?;
    let mut homography = t_dst_inv * h_normalized * t_src;

    if homography[(2, 2)].abs() < 1e-12 {
        return Err(ShadowError::DegenerateHomography(
            "vanishing homogeneous scale".into(),
        ));
    }
    homography /= homography[(2, 2)];

    // collinear or coincident correspondences leave the system rank-deficient
    if homography.determinant().abs() < 1e-12 {
        return Err(ShadowError::DegenerateHomography(
            "rank-deficient correspondences".into(),
        ));
    }

    Ok(homography)
}

/// Hartley normalization: translate to the centroid, scale so the mean
/// distance is sqrt(2).
fn normalize_points(pts: &[Vector2<f64>; 4]) -> ([Vector2<f64>; 4], Matrix3<f64>) {
    let n = pts.len() as f64;
    let mut centroid = Vector2::zeros();
    for p in pts {
        centroid += p;
    }
    centroid /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        mean_dist += (p - centroid).norm();
    }
    mean_dist /= n;
    let s = if mean_dist > 1e-12 {
        2f64.sqrt() / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    );

    let mut out = [Vector2::zeros(); 4];
    for (i, p) in pts.iter().enumerate() {
        let v = t * Vector3::new(p.x, p.y, 1.0);
        out[i] = Vector2::new(v.x, v.y);
    }
    (out, t)
}
