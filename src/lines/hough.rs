use image::RgbaImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use log::debug;

use crate::error::Result;
use crate::image_utils::rgba_to_gray;
use crate::lines::{LineExtractor, LineSegment};

#[derive(Debug, Clone)]
pub struct HoughConfig {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub vote_threshold: u32,
    pub suppression_radius: u32,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 20.0,
            canny_high: 70.0,
            vote_threshold: 40,
            suppression_radius: 8,
        }
    }
}

/// Canny edge detection followed by a Hough line transform; detected polar
/// lines are clipped against the image rectangle to produce segments.
pub struct HoughLineExtractor {
    config: HoughConfig,
}

impl HoughLineExtractor {
    pub fn new() -> Self {
        Self::with_config(HoughConfig::default())
    }

    pub fn with_config(config: HoughConfig) -> Self {
        Self { config }
    }
}

impl Default for HoughLineExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineExtractor for HoughLineExtractor {
    fn extract_lines(&self, image: &RgbaImage) -> Result<Vec<LineSegment>> {
        let gray = rgba_to_gray(image);
        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        let options = LineDetectionOptions {
            vote_threshold: self.config.vote_threshold,
            suppression_radius: self.config.suppression_radius,
        };
        let polar_lines = detect_lines(&edges, options);

        let (width, height) = image.dimensions();
        let segments = polar_lines
            .iter()
            .filter_map(|line| {
                clip_polar_line(
                    line.r as f64,
                    (line.angle_in_degrees as f64).to_radians(),
                    width as f64,
                    height as f64,
                )
            })
            .collect::<Vec<_>>();

        debug!(
            "hough: {} polar lines, {} clipped segments on {}x{}",
            polar_lines.len(),
            segments.len(),
            width,
            height
        );

        Ok(segments)
    }
}

/// Clips the line `x cos(theta) + y sin(theta) = r` against the rectangle
/// [0, width-1] x [0, height-1]; returns None when it misses the image.
fn clip_polar_line(r: f64, theta: f64, width: f64, height: f64) -> Option<LineSegment> {
    let (sin_t, cos_t) = theta.sin_cos();

    // point on the line plus its direction
    let px = r * cos_t;
    let py = r * sin_t;
    let dx = -sin_t;
    let dy = cos_t;

    let mut t_min = f64::NEG_INFINITY;
    let mut t_max = f64::INFINITY;

    for (p, d, hi) in [(px, dx, width - 1.0), (py, dy, height - 1.0)] {
        if d.abs() < 1e-12 {
            if p < 0.0 || p > hi {
                return None;
            }
            continue;
        }
        let t0 = (0.0 - p) / d;
        let t1 = (hi - p) / d;
        t_min = t_min.max(t0.min(t1));
        t_max = t_max.min(t0.max(t1));
    }

    if t_min >= t_max {
        return None;
    }

    Some(LineSegment::new(
        px + t_min * dx,
        py + t_min * dy,
        px + t_max * dx,
        py + t_max * dy,
    ))
}
