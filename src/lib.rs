use std::path::Path;

use image::RgbaImage;

use crate::error::Result;

pub mod error;
pub mod image_utils;
pub mod lines;
pub mod scene;
pub mod shadow;

pub use error::ShadowError;
pub use image_utils::AlphaBounds;
pub use lines::{
    cluster_length, LineCluster, LineClusterer, LineExtractor, LineSegment, OrientationClusterer,
};
pub use lines::hough::HoughLineExtractor;
pub use scene::{
    estimate_scene_description, CameraIntrinsics, SceneDescription, SceneEstimator,
    VanishingConfig, VanishingPointEstimator,
};
pub use shadow::{create_shadow, ShadowConfig};

/// A background image bundled with its lazily estimated scene description.
///
/// Scene estimation is the expensive part of shadow synthesis, so the
/// description is computed at most once per background and reused across
/// insertions; invalidation is explicit and caller-driven.
pub struct BackgroundScene {
    image: RgbaImage,
    description: Option<SceneDescription>,
    estimated: bool,
}

impl BackgroundScene {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::open(path)?.to_rgba8();
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image,
            description: None,
            estimated: false,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// The cached scene description, estimating it on first use. `None`
    /// means the image does not expose enough geometry for a shadow.
    pub fn scene_description(&mut self) -> Result<Option<&SceneDescription>> {
        if !self.estimated {
            self.description = estimate_scene_description(&self.image)?;
            self.estimated = true;
        }
        Ok(self.description.as_ref())
    }

    /// Attaches a previously computed (e.g. deserialized) description.
    pub fn set_scene_description(&mut self, description: SceneDescription) {
        self.description = Some(description);
        self.estimated = true;
    }

    /// Discards the cached description so the next use re-estimates it.
    pub fn invalidate_scene_description(&mut self) {
        self.description = None;
        self.estimated = false;
    }

    /// Synthesizes the cast shadow for a foreground silhouette inserted at
    /// the given (row, column) offset. Returns `Ok(None)` when no scene
    /// geometry is available, which callers should treat as "composite
    /// without a shadow".
    pub fn cast_shadow(
        &mut self,
        foreground: &RgbaImage,
        offset: (i64, i64),
        config: &ShadowConfig,
    ) -> Result<Option<RgbaImage>> {
        if !self.estimated {
            self.description = estimate_scene_description(&self.image)?;
            self.estimated = true;
        }
        let Some(description) = self.description.as_ref() else {
            return Ok(None);
        };

        match create_shadow(foreground, &self.image, offset, Some(description), config) {
            Ok(shadow) => Ok(Some(shadow)),
            Err(err) if err.is_recoverable() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
