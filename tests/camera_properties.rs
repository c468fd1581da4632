//! Property tests for the camera math

use foliocanvas::camera::{Camera, CameraConstraints};
use foliocanvas::geometry::{Point, Rect, Size};
use proptest::prelude::*;

fn arb_camera() -> impl Strategy<Value = Camera> {
    (-5000.0..5000.0f64, -5000.0..5000.0f64, 0.1..5.0f64).prop_map(|(x, y, z)| Camera::new(x, y, z))
}

fn arb_point() -> impl Strategy<Value = Point> {
    (-4000.0..4000.0f64, -4000.0..4000.0f64).prop_map(|(x, y)| Point::new(x, y))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()))
}

proptest! {
    #[test]
    fn screen_canvas_round_trip(cam in arb_camera(), p in arb_point()) {
        let back = cam.screen_to_canvas(cam.canvas_to_screen(p));
        prop_assert!(close(back.x, p.x));
        prop_assert!(close(back.y, p.y));
    }

    #[test]
    fn zoom_keeps_point_under_cursor(
        cam in arb_camera(),
        point in (0.0..1600.0f64, 0.0..1000.0f64).prop_map(|(x, y)| Point::new(x, y)),
        delta in -0.9..0.9f64,
    ) {
        let constraints = CameraConstraints::zoom_only(0.1, 5.0);
        let zoomed = cam.zoom_to_point(point, delta, &constraints);
        let before = cam.screen_to_canvas(point);
        let after = zoomed.screen_to_canvas(point);
        prop_assert!(close(before.x, after.x));
        prop_assert!(close(before.y, after.y));
        prop_assert!(zoomed.z >= 0.1 && zoomed.z <= 5.0);
    }

    #[test]
    fn constrained_pan_keeps_large_content_on_screen(
        cam in arb_camera(),
        dx in -20_000.0..20_000.0f64,
        dy in -20_000.0..20_000.0f64,
    ) {
        let viewport = Size::new(1000.0, 800.0);
        // big enough to cover the viewport at every zoom in range
        let content = Rect::new(0.0, 0.0, 12_000.0, 9_000.0);
        let constraints = CameraConstraints {
            min_zoom: 0.1,
            max_zoom: 5.0,
            content,
            viewport,
            padding: 0.0,
        };
        let cam = cam.pan(dx, dy).constrain(&constraints);
        let visible = cam.visible_bounds(viewport);
        prop_assert!(visible.x >= content.x - 1e-6);
        prop_assert!(visible.y >= content.y - 1e-6);
        prop_assert!(visible.right() <= content.right() + 1e-6);
        prop_assert!(visible.bottom() <= content.bottom() + 1e-6);
    }
}
