//! End-to-end shadow synthesis against a known synthetic camera.

use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, Vector2, Vector3};
use shadowcast::shadow::compute_shadow_homography;
use shadowcast::{create_shadow, AlphaBounds, CameraIntrinsics, SceneDescription, ShadowConfig};

const WIDTH: u32 = 400;
const HEIGHT: u32 = 400;
const FOCAL: f64 = 400.0;

fn principal_point() -> Vector2<f64> {
    Vector2::new(WIDTH as f64 / 2.0, HEIGHT as f64 / 2.0)
}

/// Camera-space images of the world axes for a camera pitched and yawed 6
/// degrees off the world frame. All three vanishing points are finite.
fn world_axes() -> [Vector3<f64>; 3] {
    let (s, c) = 6f64.to_radians().sin_cos();
    [
        Vector3::new(c, 0.0, -s),
        Vector3::new(s * s, c, s * c),
        Vector3::new(c * s, -s, c * c),
    ]
}

fn project(axis: &Vector3<f64>) -> Vector2<f64> {
    principal_point() + Vector2::new(axis.x / axis.z, axis.y / axis.z) * FOCAL
}

fn synthetic_scene() -> SceneDescription {
    let axes = world_axes();
    let intrinsics = CameraIntrinsics {
        focal_length: FOCAL,
        principal_point: principal_point(),
    };
    SceneDescription::from_parts(
        intrinsics,
        axes.iter().map(project).collect(),
        axes.to_vec(),
    )
}

/// Fully opaque foreground that lands on the bounding box (100,100)-(200,300)
/// when placed at row/column offset (100, 100).
fn foreground() -> RgbaImage {
    RgbaImage::from_pixel(101, 201, Rgba([90, 60, 30, 255]))
}

fn background() -> RgbaImage {
    RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([200, 200, 200, 255]))
}

fn silhouette_bounds() -> AlphaBounds {
    AlphaBounds {
        left: 100,
        right: 200,
        top: 100,
        bottom: 300,
    }
}

fn apply(h: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let v = h * Vector3::new(x, y, 1.0);
    (v.x / v.z, v.y / v.z)
}

#[test]
fn shadow_layer_matches_background_dimensions() {
    let shadow = create_shadow(
        &foreground(),
        &background(),
        (100, 100),
        Some(&synthetic_scene()),
        &ShadowConfig::default(),
    )
    .unwrap();

    assert_eq!(shadow.dimensions(), (WIDTH, HEIGHT));
    assert!(shadow.pixels().any(|p| p[3] > 0), "no shadow was cast");
}

#[test]
fn unsoftened_shadow_stays_inside_projected_footprint() {
    let scene = synthetic_scene();
    let config = ShadowConfig {
        skip_soften: true,
        ..ShadowConfig::default()
    };
    let shadow = create_shadow(
        &foreground(),
        &background(),
        (100, 100),
        Some(&scene),
        &config,
    )
    .unwrap();

    let h = compute_shadow_homography(
        (WIDTH, HEIGHT),
        &scene,
        &silhouette_bounds(),
        &config,
    )
    .unwrap();

    // bounding box of the projected silhouette corners, with bilinear slack
    let mut min_x = f64::MAX;
    let mut max_x = f64::MIN;
    let mut min_y = f64::MAX;
    let mut max_y = f64::MIN;
    for &(x, y) in &[
        (100.0, 100.0),
        (100.0, 300.0),
        (200.0, 100.0),
        (200.0, 300.0),
    ] {
        let (u, v) = apply(&h, x, y);
        min_x = min_x.min(u);
        max_x = max_x.max(u);
        min_y = min_y.min(v);
        max_y = max_y.max(v);
    }

    let mut seen = false;
    for (x, y, p) in shadow.enumerate_pixels() {
        if p[3] == 0 {
            continue;
        }
        seen = true;
        let (x, y) = (x as f64, y as f64);
        assert!(
            x >= min_x - 2.0 && x <= max_x + 2.0 && y >= min_y - 2.0 && y <= max_y + 2.0,
            "alpha outside footprint at ({x}, {y})"
        );
    }
    assert!(seen, "no shadow was cast");
}

#[test]
fn shadow_never_rises_above_object_top() {
    let shadow = create_shadow(
        &foreground(),
        &background(),
        (100, 100),
        Some(&synthetic_scene()),
        &ShadowConfig::default(),
    )
    .unwrap();

    for (_, y, p) in shadow.enumerate_pixels() {
        if y < 100 {
            assert_eq!(p[3], 0, "shadow alpha above the object top at row {y}");
        }
    }
}

#[test]
fn ground_contact_corner_is_a_fixed_point() {
    let h = compute_shadow_homography(
        (WIDTH, HEIGHT),
        &synthetic_scene(),
        &silhouette_bounds(),
        &ShadowConfig::default(),
    )
    .unwrap();

    // the bottom-left corner sits on the recovered ground plane, so the
    // light projection leaves it in place
    let (x, y) = apply(&h, 100.0, 300.0);
    assert!((x - 100.0).abs() < 1e-6, "contact corner drifted to x={x}");
    assert!((y - 300.0).abs() < 1e-6, "contact corner drifted to y={y}");
}

#[test]
fn softening_can_be_disabled_independently() {
    let scene = synthetic_scene();
    let soft = create_shadow(
        &foreground(),
        &background(),
        (100, 100),
        Some(&scene),
        &ShadowConfig::default(),
    )
    .unwrap();
    let hard = create_shadow(
        &foreground(),
        &background(),
        (100, 100),
        Some(&scene),
        &ShadowConfig {
            skip_soften: true,
            ..ShadowConfig::default()
        },
    )
    .unwrap();

    // the unsoftened warp keeps hard binary-ish edges, so its peak alpha
    // must be at least as high as the softened one
    let peak = |img: &RgbaImage| img.pixels().map(|p| p[3]).max().unwrap_or(0);
    assert!(peak(&hard) >= peak(&soft));
    assert_ne!(soft, hard);
}

#[test]
fn off_frame_silhouette_casts_like_a_wider_frame() {
    let config = ShadowConfig {
        skip_soften: true,
        ..ShadowConfig::default()
    };

    // part of the silhouette hangs off the left edge of the background
    let narrow = create_shadow(
        &foreground(),
        &background(),
        (100, -60),
        Some(&synthetic_scene()),
        &config,
    )
    .unwrap();

    // the same placement on a background wide enough to hold everything,
    // with the scene expressed in the wider frame
    let shift = Vector2::new(60.0, 0.0);
    let axes = world_axes();
    let wide_scene = SceneDescription::from_parts(
        CameraIntrinsics {
            focal_length: FOCAL,
            principal_point: principal_point() + shift,
        },
        axes.iter().map(|a| project(a) + shift).collect(),
        axes.to_vec(),
    );
    let wide_background = RgbaImage::from_pixel(WIDTH + 60, HEIGHT, Rgba([200, 200, 200, 255]));
    let wide = create_shadow(
        &foreground(),
        &wide_background,
        (100, 0),
        Some(&wide_scene),
        &config,
    )
    .unwrap();

    assert_eq!(narrow.dimensions(), (WIDTH, HEIGHT));
    assert!(narrow.pixels().any(|p| p[3] > 0), "no shadow was cast");
    for (x, y, p) in narrow.enumerate_pixels() {
        assert_eq!(
            *p,
            *wide.get_pixel(x + 60, y),
            "mismatch at ({x}, {y}) against the wider frame"
        );
    }
}

#[test]
fn empty_silhouette_is_rejected() {
    let transparent = RgbaImage::new(50, 50);
    let result = create_shadow(
        &transparent,
        &background(),
        (10, 10),
        Some(&synthetic_scene()),
        &ShadowConfig::default(),
    );
    assert!(result.is_err());
}
