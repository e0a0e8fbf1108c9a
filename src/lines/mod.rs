pub mod cluster;
pub mod hough;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cluster::OrientationClusterer;
pub use hough::HoughLineExtractor;

/// A 2-D line segment in image pixel coordinates, immutable once extracted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: Option<f64>,
}

impl LineSegment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            width: None,
        }
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        let dx = self.x2 - self.x1;
        let dy = self.y2 - self.y1;
        dx * dx + dy * dy
    }

    pub fn midpoint(&self) -> (f64, f64) {
        (0.5 * (self.x1 + self.x2), 0.5 * (self.y1 + self.y2))
    }

    /// Homogeneous line coefficients through the two endpoints,
    /// i.e. [x1,y1,1] cross [x2,y2,1].
    pub fn homogeneous(&self) -> [f64; 3] {
        [
            self.y1 - self.y2,
            self.x2 - self.x1,
            self.x1 * self.y2 - self.y1 * self.x2,
        ]
    }

    /// Unsigned orientation in [0, pi).
    pub fn orientation(&self) -> f64 {
        let mut a = (self.y2 - self.y1).atan2(self.x2 - self.x1);
        if a < 0.0 {
            a += std::f64::consts::PI;
        }
        if a >= std::f64::consts::PI {
            a -= std::f64::consts::PI;
        }
        a
    }
}

/// A group of segments assumed to converge at one vanishing point.
pub type LineCluster = Vec<LineSegment>;

/// Total Euclidean length of a cluster, used for ranking.
pub fn cluster_length(cluster: &[LineSegment]) -> f64 {
    cluster.iter().map(LineSegment::length).sum()
}

/// Pluggable line-detection strategy.
pub trait LineExtractor {
    fn extract_lines(&self, image: &RgbaImage) -> Result<Vec<LineSegment>>;
}

/// Pluggable line-clustering strategy. Implementations partition the input
/// into groups that plausibly converge to a common vanishing point; an empty
/// result is valid and must be tolerated by callers.
pub trait LineClusterer {
    fn cluster(&self, lines: &[LineSegment]) -> Result<Vec<LineCluster>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homogeneous_coefficients_vanish_on_endpoints() {
        let segment = LineSegment::new(1.0, 2.0, 5.0, 7.0);
        let [a, b, c] = segment.homogeneous();

        assert!((a * segment.x1 + b * segment.y1 + c).abs() < 1e-12);
        assert!((a * segment.x2 + b * segment.y2 + c).abs() < 1e-12);
    }

    #[test]
    fn cluster_length_sums_segment_lengths() {
        let cluster = vec![
            LineSegment::new(0.0, 0.0, 3.0, 4.0),
            LineSegment::new(0.0, 0.0, 0.0, 2.0),
        ];
        assert!((cluster_length(&cluster) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn orientation_is_mod_pi() {
        let a = LineSegment::new(0.0, 0.0, 1.0, 1.0);
        let b = LineSegment::new(1.0, 1.0, 0.0, 0.0);
        assert!((a.orientation() - b.orientation()).abs() < 1e-12);
    }
}
