pub mod calibration;
pub mod vanishing;

use std::path::Path;
use std::sync::OnceLock;

use image::RgbaImage;
use log::debug;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShadowError};
use crate::lines::{LineClusterer, LineExtractor, OrientationClusterer};
use crate::lines::hough::HoughLineExtractor;

pub use calibration::{solve_world_to_camera, CameraIntrinsics};
pub use vanishing::{VanishingConfig, VanishingEstimate, VanishingPointEstimator};

/// Everything we were able to infer about the 3-D scene behind an image:
/// calibrated intrinsics plus the vanishing geometry. Immutable after
/// construction; callers own caching and invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDescription {
    intrinsics: CameraIntrinsics,
    vanishing_points: Vec<Vector2<f64>>,
    vanishing_directions: Vec<Vector3<f64>>,
    #[serde(skip)]
    camera_matrix: OnceLock<Matrix3<f64>>,
}

impl SceneDescription {
    pub fn from_parts(
        intrinsics: CameraIntrinsics,
        vanishing_points: Vec<Vector2<f64>>,
        vanishing_directions: Vec<Vector3<f64>>,
    ) -> Self {
        Self {
            intrinsics,
            vanishing_points,
            vanishing_directions,
            camera_matrix: OnceLock::new(),
        }
    }

    pub fn focal_length(&self) -> f64 {
        self.intrinsics.focal_length
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Image-space coordinates of the (up to 3) vanishing points.
    pub fn vanishing_points(&self) -> &[Vector2<f64>] {
        &self.vanishing_points
    }

    /// Camera-space unit vanishing directions.
    pub fn vanishing_directions(&self) -> &[Vector3<f64>] {
        &self.vanishing_directions
    }

    /// The intrinsic camera matrix, computed once and memoized. Recomputing
    /// from the same inputs is bit-identical, so the memoization race is
    /// benign.
    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        self.camera_matrix.get_or_init(|| self.intrinsics.matrix())
    }

    /// World-to-camera rotation and translation for a caller-chosen
    /// image-space origin. Origin-dependent, so not memoized.
    pub fn world_to_camera(&self, origin: (f64, f64)) -> Result<(Matrix3<f64>, Vector3<f64>)> {
        solve_world_to_camera(&self.intrinsics, &self.vanishing_points, origin)
    }

    /// The same scene expressed in a frame whose pixel origin is shifted by
    /// the given offset; used when the working canvas is padded beyond the
    /// background. The world geometry is unchanged, only the image frame.
    pub(crate) fn translated(&self, offset: Vector2<f64>) -> Self {
        Self::from_parts(
            CameraIntrinsics {
                focal_length: self.intrinsics.focal_length,
                principal_point: self.intrinsics.principal_point + offset,
            },
            self.vanishing_points.iter().map(|p| p + offset).collect(),
            self.vanishing_directions.clone(),
        )
    }

    /// Persists the description so later insertions against the same
    /// background can skip re-estimation.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Composes a line extractor and a line clusterer (both injectable
/// strategies) with the vanishing point estimator and camera calibrator.
pub struct SceneEstimator<E: LineExtractor, C: LineClusterer> {
    extractor: E,
    clusterer: C,
    config: VanishingConfig,
}

impl SceneEstimator<HoughLineExtractor, OrientationClusterer> {
    /// Estimator with the default Hough extraction and orientation
    /// clustering strategies.
    pub fn with_defaults() -> Self {
        Self::new(
            HoughLineExtractor::new(),
            OrientationClusterer::new(),
            VanishingConfig::default(),
        )
    }
}

impl<E: LineExtractor, C: LineClusterer> SceneEstimator<E, C> {
    pub fn new(extractor: E, clusterer: C, config: VanishingConfig) -> Self {
        Self {
            extractor,
            clusterer,
            config,
        }
    }

    pub fn estimate(&self, image: &RgbaImage) -> Result<SceneDescription> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ShadowError::InvalidInput("empty image".into()));
        }

        let lines = self.extractor.extract_lines(image)?;
        let clusters = self.clusterer.cluster(&lines)?;
        debug!(
            "scene: {} lines in {} clusters on {}x{}",
            lines.len(),
            clusters.len(),
            width,
            height
        );

        let estimator = VanishingPointEstimator::new(width, height, self.config.clone());
        let estimate = estimator.estimate(&clusters)?;

        // calibrate from measured points only; a synthesized completion point
        // reflects the assumed field of view, not the image
        let principal_point = Vector2::new(width as f64 / 2.0, height as f64 / 2.0);
        let measured = &estimate.points[..estimate.measured.min(estimate.points.len())];
        let intrinsics = CameraIntrinsics::from_vanishing_points(measured, principal_point)?;

        debug!(
            "scene: {} vanishing points, focal length {:.2}",
            estimate.points.len(),
            intrinsics.focal_length
        );
        Ok(SceneDescription::from_parts(
            intrinsics,
            estimate.points,
            estimate.directions,
        ))
    }
}

/// Estimates the scene description for an image with the default strategies.
/// Returns `Ok(None)` when the image does not expose enough geometry, which
/// callers must treat as "no shadow computable".
pub fn estimate_scene_description(image: &RgbaImage) -> Result<Option<SceneDescription>> {
    match SceneEstimator::with_defaults().estimate(image) {
        Ok(description) => Ok(Some(description)),
        Err(ShadowError::InsufficientGeometry(reason)) => {
            debug!("scene: no description available ({reason})");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn description() -> SceneDescription {
        let intrinsics = CameraIntrinsics {
            focal_length: 450.0,
            principal_point: Vector2::new(200.0, 200.0),
        };
        SceneDescription::from_parts(
            intrinsics,
            vec![
                Vector2::new(900.0, 180.0),
                Vector2::new(-350.0, 260.0),
                Vector2::new(210.0, 1400.0),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn camera_matrix_is_memoized_and_stable() {
        let scene = description();
        let first = *scene.camera_matrix();
        let second = *scene.camera_matrix();
        assert_eq!(first, second);
        assert_eq!(first[(2, 2)], 1.0);
    }

    #[test]
    fn scene_cache_round_trips_through_json() {
        let scene = description();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");

        scene.save_json(&path).unwrap();
        let loaded = SceneDescription::load_json(&path).unwrap();

        assert_relative_eq!(loaded.focal_length(), scene.focal_length());
        assert_eq!(loaded.vanishing_points(), scene.vanishing_points());
        assert_eq!(*loaded.camera_matrix(), *scene.camera_matrix());
    }

    #[test]
    fn translated_scene_preserves_world_geometry() {
        // projections of a true orthonormal axis triple, so the
        // world-to-camera solve is consistent across frame shifts
        let axis1 = Vector3::new(0.8, 0.15, -0.3).normalize();
        let axis2 = {
            let raw = Vector3::new(-0.2, 0.9, 0.25);
            (raw - axis1 * raw.dot(&axis1)).normalize()
        };
        let axis3 = axis1.cross(&axis2);

        let focal = 420.0;
        let principal_point = Vector2::new(210.0, 190.0);
        let project = |d: &Vector3<f64>| {
            principal_point + Vector2::new(d.x / d.z, d.y / d.z) * focal
        };
        let scene = SceneDescription::from_parts(
            CameraIntrinsics {
                focal_length: focal,
                principal_point,
            },
            vec![project(&axis1), project(&axis2), project(&axis3)],
            vec![axis1, axis2, axis3],
        );

        let offset = Vector2::new(60.0, 25.0);
        let shifted = scene.translated(offset);

        let (rotation, translation) = scene.world_to_camera((120.0, 280.0)).unwrap();
        let (rotation_s, translation_s) = shifted
            .world_to_camera((120.0 + offset.x, 280.0 + offset.y))
            .unwrap();

        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rotation_s[(i, j)], rotation[(i, j)], epsilon = 1e-9);
            }
            assert_relative_eq!(translation_s[i], translation[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn featureless_image_yields_no_description() {
        let image = RgbaImage::from_pixel(96, 96, image::Rgba([128, 128, 128, 255]));
        let result = estimate_scene_description(&image).unwrap();
        assert!(result.is_none());
    }
}
