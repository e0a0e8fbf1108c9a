pub mod homography;
pub mod soften;

use image::imageops::crop_imm;
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use log::debug;
use nalgebra::Vector2;

use crate::error::{Result, ShadowError};
use crate::image_utils::{alpha_bounding_box, blacken_image, place_into};
use crate::scene::{SceneDescription, SceneEstimator};

pub use homography::{compute_shadow_homography, fit_homography};
pub use soften::temper_shadow;

#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Nominal Gaussian blur for softening, before resolution scaling.
    pub blur: f64,
    /// Baseline opacity of the softened shadow in [0, 1].
    pub opacity: f64,
    /// Number of slices for the spatially varying blur.
    pub segments: usize,
    pub skip_soften: bool,
    /// Fraction of the camera-to-object line where the light sits.
    pub light_along: f64,
    /// Light elevation in multiples of the object height.
    pub light_height: f64,
    /// Pixel width at which `blur` applies unscaled.
    pub reference_width: f64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            blur: 15.0,
            opacity: 0.45,
            segments: 10,
            skip_soften: false,
            light_along: 0.2,
            light_height: 1.6,
            reference_width: 400.0,
        }
    }
}

/// Generates a plausible cast shadow for the foreground silhouette placed on
/// the background at the given (row, column) offset. The result is an RGBA
/// layer with the background's dimensions, ready for compositing underneath
/// the inserted object. Silhouette parts outside the background still
/// contribute: the shadow is computed on a padded canvas and cropped back.
pub fn create_shadow(
    foreground: &RgbaImage,
    background: &RgbaImage,
    offset: (i64, i64),
    scene: Option<&SceneDescription>,
    config: &ShadowConfig,
) -> Result<RgbaImage> {
    let (fg_width, fg_height) = foreground.dimensions();
    let (bg_width, bg_height) = background.dimensions();
    if fg_width == 0 || fg_height == 0 || bg_width == 0 || bg_height == 0 {
        return Err(ShadowError::InvalidInput(
            "zero-sized foreground or background".into(),
        ));
    }

    let estimated;
    let scene = match scene {
        Some(scene) => scene,
        None => {
            estimated = SceneEstimator::with_defaults().estimate(background)?;
            &estimated
        }
    };

    // pad the working canvas so silhouette parts outside the background
    // still cast into the visible frame; the pad is cropped after the warp
    let pad_left = (-offset.1).max(0) as u32;
    let pad_top = (-offset.0).max(0) as u32;
    let pad_right = (offset.1 + fg_width as i64 - bg_width as i64).max(0) as u32;
    let pad_bottom = (offset.0 + fg_height as i64 - bg_height as i64).max(0) as u32;
    let canvas_width = bg_width + pad_left + pad_right;
    let canvas_height = bg_height + pad_top + pad_bottom;

    let shifted;
    let scene = if pad_left > 0 || pad_top > 0 {
        shifted = scene.translated(Vector2::new(pad_left as f64, pad_top as f64));
        &shifted
    } else {
        scene
    };

    // silhouette placed on the working canvas, then blackened
    let canvas = place_into(
        foreground,
        canvas_width,
        canvas_height,
        (offset.0 + pad_top as i64, offset.1 + pad_left as i64),
    );
    let mut shadow = blacken_image(&canvas);

    let bounds = alpha_bounding_box(&shadow).ok_or_else(|| {
        ShadowError::InvalidInput("empty silhouette: no nonzero alpha".into())
    })?;
    debug!(
        "shadow: silhouette bounds x [{}, {}], y [{}, {}]",
        bounds.left, bounds.right, bounds.top, bounds.bottom
    );

    if !config.skip_soften {
        temper_shadow(&mut shadow, &bounds, config)?;
    }

    let homography =
        compute_shadow_homography((canvas_width, canvas_height), scene, &bounds, config)?;
    let matrix = [
        homography[(0, 0)] as f32,
        homography[(0, 1)] as f32,
        homography[(0, 2)] as f32,
        homography[(1, 0)] as f32,
        homography[(1, 1)] as f32,
        homography[(1, 2)] as f32,
        homography[(2, 0)] as f32,
        homography[(2, 1)] as f32,
        homography[(2, 2)] as f32,
    ];
    let projection = Projection::from_matrix(matrix).ok_or_else(|| {
        ShadowError::DegenerateHomography("perspective warp not invertible".into())
    })?;

    let warped = warp(&shadow, &projection, Interpolation::Bilinear, Rgba([0, 0, 0, 0]));
    Ok(crop_imm(&warped, pad_left, pad_top, bg_width, bg_height).to_image())
}
