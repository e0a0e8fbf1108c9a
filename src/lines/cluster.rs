use std::f64::consts::PI;

use log::debug;

use crate::error::Result;
use crate::lines::{LineCluster, LineClusterer, LineSegment};

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub bins: usize,
    pub angle_tol_deg: f64,
    pub max_families: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bins: 36,
            angle_tol_deg: 22.5,
            max_families: 3,
        }
    }
}

/// Groups segments by dominant orientation-histogram peaks. A native stand-in
/// for an external J-linkage clustering tool: segments sharing an orientation
/// family plausibly converge toward a common vanishing point.
pub struct OrientationClusterer {
    config: ClusterConfig,
}

impl OrientationClusterer {
    pub fn new() -> Self {
        Self::with_config(ClusterConfig::default())
    }

    pub fn with_config(config: ClusterConfig) -> Self {
        Self { config }
    }
}

impl Default for OrientationClusterer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineClusterer for OrientationClusterer {
    fn cluster(&self, lines: &[LineSegment]) -> Result<Vec<LineCluster>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let bins = self.config.bins.max(4);
        let bin_width = PI / bins as f64;

        // orientation histogram weighted by segment length
        let mut histogram = vec![0.0f64; bins];
        let angles = lines
            .iter()
            .map(|segment| {
                let a = segment.orientation();
                let b = ((a / bin_width) as usize).min(bins - 1);
                histogram[b] += segment.length().max(1.0);
                a
            })
            .collect::<Vec<_>>();

        // pick up to max_families peaks, suppressing neighbors of each pick
        let tol = self.config.angle_tol_deg.to_radians();
        let sep_bins = ((2.0 * self.config.angle_tol_deg) * bins as f64 / 180.0).ceil() as isize;
        let mut remaining = histogram.clone();
        let mut peaks = Vec::new();

        for _ in 0..self.config.max_families {
            let (peak, &weight) = match remaining
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
            {
                Some(best) => best,
                None => break,
            };
            if weight <= 0.0 {
                break;
            }

            peaks.push((peak as f64 + 0.5) * bin_width);
            for di in -sep_bins..=sep_bins {
                let j = ((peak as isize + di).rem_euclid(bins as isize)) as usize;
                remaining[j] = 0.0;
            }
        }

        // assign each segment to its nearest peak within tolerance; segments
        // outside every family are discarded, so families never overlap
        let mut clusters: Vec<LineCluster> = vec![Vec::new(); peaks.len()];
        for (segment, &angle) in lines.iter().zip(angles.iter()) {
            let mut best = None;
            for (i, &peak) in peaks.iter().enumerate() {
                let d = angle_separation(angle, peak);
                if d <= tol && best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((i, d));
                }
            }
            if let Some((i, _)) = best {
                clusters[i].push(*segment);
            }
        }

        clusters.retain(|c| !c.is_empty());
        debug!(
            "orientation clustering: {} segments into {} families",
            lines.len(),
            clusters.len()
        );

        Ok(clusters)
    }
}

fn angle_separation(a: f64, b: f64) -> f64 {
    let mut d = (a - b).abs();
    if d > PI * 0.5 {
        d = PI - d;
    }
    d
}
