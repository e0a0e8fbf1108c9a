use image::{GrayImage, Luma, Rgba, RgbaImage};
use ndarray::Array2;

/// Inclusive tight bounding box around the nonzero alpha of a silhouette.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaBounds {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl AlphaBounds {
    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }
}

pub fn rgba_to_gray(image: &RgbaImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let lum =
            (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64) as u8;
        gray.put_pixel(x, y, Luma([lum]));
    }

    gray
}

/// Extracts the alpha channel as a row-major array normalized to [0,1].
pub fn alpha_to_array(image: &RgbaImage) -> Array2<f64> {
    let (width, height) = image.dimensions();
    let mut arr = Array2::zeros((height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        arr[[y as usize, x as usize]] = pixel[3] as f64 / 255.0;
    }

    arr
}

/// Writes a [0,1] alpha array back into the image's alpha channel.
pub fn set_alpha_from_array(image: &mut RgbaImage, alpha: &Array2<f64>) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let value = alpha[[y as usize, x as usize]].clamp(0.0, 1.0);
        pixel[3] = (value * 255.0).round() as u8;
    }
}

/// Creates an all-black copy of the image, preserving the alpha channel.
pub fn blacken_image(image: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut result = RgbaImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        result.put_pixel(x, y, Rgba([0, 0, 0, pixel[3]]));
    }

    result
}

/// Places the foreground into a background-sized canvas at a (row, column)
/// offset, clipping anything that falls outside the canvas.
pub fn place_into(foreground: &RgbaImage, width: u32, height: u32, offset: (i64, i64)) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    let (row_off, col_off) = offset;

    for (x, y, pixel) in foreground.enumerate_pixels() {
        let tx = x as i64 + col_off;
        let ty = y as i64 + row_off;

        if tx >= 0 && tx < width as i64 && ty >= 0 && ty < height as i64 {
            canvas.put_pixel(tx as u32, ty as u32, *pixel);
        }
    }

    canvas
}

/// Tight bounding box of nonzero alpha, or None for an empty silhouette.
pub fn alpha_bounding_box(image: &RgbaImage) -> Option<AlphaBounds> {
    let mut bounds: Option<AlphaBounds> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }

        bounds = Some(match bounds {
            None => AlphaBounds {
                left: x,
                right: x,
                top: y,
                bottom: y,
            },
            Some(b) => AlphaBounds {
                left: b.left.min(x),
                right: b.right.max(x),
                top: b.top.min(y),
                bottom: b.bottom.max(y),
            },
        });
    }

    bounds
}

/// Separable Gaussian filter with reflected boundaries.
pub fn gaussian_filter(arr: &Array2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return arr.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (height, width) = arr.dim();

    let mut horizontal = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_index(x as i64 + k as i64 - radius, width);
                sum += arr[[y, sx]] * weight;
            }
            horizontal[[y, x]] = sum;
        }
    }

    let mut result = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_index(y as i64 + k as i64 - radius, height);
                sum += horizontal[[sy, x]] * weight;
            }
            result[[y, x]] = sum;
        }
    }

    result
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;

    for i in 0..=(2 * radius) {
        let d = i as f64 - radius as f64;
        kernel.push((-d * d / denom).exp());
    }

    let total: f64 = kernel.iter().sum();
    for v in kernel.iter_mut() {
        *v /= total;
    }

    kernel
}

fn reflect_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let mut i = index;

    while i < 0 || i >= len {
        if i < 0 {
            i = -i - 1;
        }
        if i >= len {
            i = 2 * len - i - 1;
        }
    }

    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn silhouette(width: u32, height: u32, bounds: AlphaBounds) -> RgbaImage {
        let mut image = RgbaImage::new(width, height);
        for y in bounds.top..=bounds.bottom {
            for x in bounds.left..=bounds.right {
                image.put_pixel(x, y, Rgba([200, 100, 50, 255]));
            }
        }
        image
    }

    #[test]
    fn bounding_box_is_tight() {
        let bounds = AlphaBounds {
            left: 3,
            right: 9,
            top: 2,
            bottom: 7,
        };
        let image = silhouette(16, 12, bounds);

        assert_eq!(alpha_bounding_box(&image), Some(bounds));
    }

    #[test]
    fn bounding_box_of_empty_silhouette_is_none() {
        let image = RgbaImage::new(8, 8);
        assert_eq!(alpha_bounding_box(&image), None);
    }

    #[test]
    fn blacken_preserves_alpha_only() {
        let bounds = AlphaBounds {
            left: 1,
            right: 2,
            top: 1,
            bottom: 2,
        };
        let image = silhouette(4, 4, bounds);
        let black = blacken_image(&image);

        assert_eq!(black.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
        assert_eq!(black.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn place_into_clips_negative_offsets() {
        let bounds = AlphaBounds {
            left: 0,
            right: 3,
            top: 0,
            bottom: 3,
        };
        let image = silhouette(4, 4, bounds);
        let canvas = place_into(&image, 8, 8, (-2, -2));

        assert_eq!(canvas.dimensions(), (8, 8));
        assert_eq!(canvas.get_pixel(0, 0)[3], 255);
        assert_eq!(canvas.get_pixel(2, 2)[3], 0);
    }

    #[test]
    fn gaussian_preserves_total_mass_away_from_borders() {
        let mut arr = Array2::zeros((41, 41));
        arr[[20, 20]] = 1.0;

        let blurred = gaussian_filter(&arr, 2.0);
        assert_relative_eq!(blurred.sum(), 1.0, epsilon = 1e-9);
        assert!(blurred[[20, 20]] < 1.0);
    }

    #[test]
    fn zero_sigma_is_identity() {
        let mut arr = Array2::zeros((5, 5));
        arr[[2, 2]] = 3.0;
        assert_eq!(gaussian_filter(&arr, 0.0), arr);
    }
}
