use image::RgbaImage;
use log::debug;
use ndarray::{s, Array1, Array2};

use crate::error::{Result, ShadowError};
use crate::image_utils::{alpha_to_array, gaussian_filter, set_alpha_from_array, AlphaBounds};
use crate::shadow::ShadowConfig;

/// Softens a raw silhouette shadow in place: a vertical opacity ramp toward
/// the contact point, spatially varying slice blurs, and a final seam-hiding
/// blur over the whole alpha channel.
pub fn temper_shadow(
    shadow: &mut RgbaImage,
    bounds: &AlphaBounds,
    config: &ShadowConfig,
) -> Result<()> {
    if config.segments < 3 {
        return Err(ShadowError::InvalidInput(format!(
            "shadow softening needs at least 3 segments, got {}",
            config.segments
        )));
    }

    let mut alpha = alpha_to_array(shadow);
    let (rows, cols) = alpha.dim();

    let left = bounds.left as usize;
    let right = bounds.right as usize;
    let top = bounds.top as usize;
    let bottom = bounds.bottom as usize;

    // keep the qualitative blur amount independent of resolution
    let blur = config.blur * bounds.width() as f64 / config.reference_width;

    apply_opacity_ramp(&mut alpha, left, right, top, bottom, config.opacity);
    apply_slice_blurs(&mut alpha, left, right, top, bottom, blur, config.segments);

    // one full-image pass to hide the seams between slices
    alpha = gaussian_filter(&alpha, blur);
    debug!(
        "soften: blur {:.2}, {} segments over {}x{} shadow",
        blur, config.segments, cols, rows
    );

    set_alpha_from_array(shadow, &alpha);
    Ok(())
}

/// Per-row opacity multiplier: ramps up from the object's top toward the
/// ground, then tapers over the bottom hinge (last ~1/6 of the height).
fn apply_opacity_ramp(
    alpha: &mut Array2<f64>,
    left: usize,
    right: usize,
    top: usize,
    bottom: usize,
    opacity: f64,
) {
    let min_opacity = (opacity / 3.0).max(0.0);
    let max_opacity = (opacity * 1.5).min(1.0);
    let min_opacity_hinge = (opacity / 2.0).max(0.0);

    let height = bottom - top + 1;
    let hinge = height / 6;
    let main = height - hinge;

    let ramp_main = Array1::linspace(0.0, 1.0, main);
    let ramp_hinge = if hinge > 0 {
        Array1::linspace(1.0, 0.0, hinge)
    } else {
        Array1::zeros(0)
    };

    for (i, &t) in ramp_main.iter().enumerate() {
        let mult = smoothstep(min_opacity, max_opacity, t);
        for x in left..=right {
            alpha[[top + i, x]] *= mult;
        }
    }
    for (i, &t) in ramp_hinge.iter().enumerate() {
        let mult = smoothstep(min_opacity_hinge, max_opacity, t);
        for x in left..=right {
            alpha[[top + main + i, x]] *= mult;
        }
    }
}

/// Overlapping horizontal slices with geometrically increasing blur moving
/// away from the contact point; each slice is blurred over a window padded
/// by its own radius so seams fall on blended pixels.
fn apply_slice_blurs(
    alpha: &mut Array2<f64>,
    left: usize,
    right: usize,
    top: usize,
    bottom: usize,
    blur: f64,
    segments: usize,
) {
    let (rows, cols) = alpha.dim();
    let slice_size = ((bottom - top) as f64 / segments as f64).ceil() as i64;

    let min_blur = blur / 2.0;
    let max_blur = blur * 4.0;
    let blur_step = (max_blur / min_blur).powf(1.0 / (segments as f64 - 2.0));

    for i in 0..segments - 1 {
        let blur_amount = min_blur * blur_step.powi(i as i32);
        if blur_amount <= 0.0 {
            continue;
        }
        let pad = blur_amount.ceil() as i64;

        let c0 = (left as i64 - pad).max(0) as usize;
        let c1 = ((right as i64 + 1 + pad) as usize).min(cols);
        let r0 = (top as i64 + (segments - i - 1) as i64 * slice_size - slice_size - pad).max(0)
            as usize;
        let r1 = ((top as i64 + (segments - i) as i64 * slice_size + 1 + pad) as usize).min(rows);
        if r0 >= r1 || c0 >= c1 {
            continue;
        }

        let window = alpha.slice(s![r0..r1, c0..c1]).to_owned();
        let blurred = gaussian_filter(&window, blur_amount);
        alpha.slice_mut(s![r0..r1, c0..c1]).assign(&blurred);
    }
}

fn smoothstep(min_value: f64, max_value: f64, t: f64) -> f64 {
    let t = t * t * (3.0 - 2.0 * t);
    min_value + (max_value - min_value) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_utils::alpha_bounding_box;
    use image::Rgba;

    fn boxed_shadow() -> (RgbaImage, AlphaBounds) {
        let mut shadow = RgbaImage::new(200, 200);
        for y in 40..=160 {
            for x in 60..=140 {
                shadow.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let bounds = alpha_bounding_box(&shadow).unwrap();
        (shadow, bounds)
    }

    fn alpha_energy(reference: &RgbaImage, softened: &RgbaImage) -> f64 {
        reference
            .pixels()
            .zip(softened.pixels())
            .map(|(a, b)| {
                let d = a[3] as f64 - b[3] as f64;
                d * d
            })
            .sum()
    }

    #[test]
    fn rejects_too_few_segments() {
        let (mut shadow, bounds) = boxed_shadow();
        let config = ShadowConfig {
            segments: 2,
            ..ShadowConfig::default()
        };

        assert!(matches!(
            temper_shadow(&mut shadow, &bounds, &config),
            Err(ShadowError::InvalidInput(_))
        ));
    }

    #[test]
    fn softening_energy_is_monotonic_in_blur() {
        let (reference, bounds) = boxed_shadow();

        let mut previous = 0.0;
        for blur in [2.0, 6.0, 12.0, 20.0] {
            let mut shadow = reference.clone();
            let config = ShadowConfig {
                blur,
                ..ShadowConfig::default()
            };
            temper_shadow(&mut shadow, &bounds, &config).unwrap();

            let energy = alpha_energy(&reference, &shadow);
            assert!(
                energy >= previous,
                "energy decreased: blur={blur} energy={energy} previous={previous}"
            );
            previous = energy;
        }
    }

    #[test]
    fn contact_rows_stay_more_opaque_than_distal_rows() {
        let (mut shadow, bounds) = boxed_shadow();
        temper_shadow(&mut shadow, &bounds, &ShadowConfig::default()).unwrap();

        let distal = shadow.get_pixel(100, 45)[3];
        let near_contact = shadow.get_pixel(100, 140)[3];
        assert!(near_contact > distal);
    }

    #[test]
    fn dimensions_are_preserved() {
        let (mut shadow, bounds) = boxed_shadow();
        temper_shadow(&mut shadow, &bounds, &ShadowConfig::default()).unwrap();
        assert_eq!(shadow.dimensions(), (200, 200));
    }
}
