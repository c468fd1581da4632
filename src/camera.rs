//! Affine camera over the virtual canvas
//!
//! The camera maps canvas coordinates to screen coordinates with
//! `screen = (canvas + offset) * z`. Every operation takes the camera by value
//! and returns a new one; nothing here holds state.

use crate::geometry::{Point, Rect, Size};

/// Camera state: canvas offset plus zoom (1.0 = 100%)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 1.0,
        }
    }
}

/// Limits applied by [`Camera::constrain`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraConstraints {
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Bounding box of all pages in canvas coordinates
    pub content: Rect,
    /// Viewport size in screen pixels
    pub viewport: Size,
    /// Screen pixels the content edge may sit inside the viewport edge
    pub padding: f64,
}

impl CameraConstraints {
    /// Zoom limits only, no content clamping
    #[must_use]
    pub fn zoom_only(min_zoom: f64, max_zoom: f64) -> Self {
        Self {
            min_zoom,
            max_zoom,
            content: Rect::default(),
            viewport: Size::default(),
            padding: 0.0,
        }
    }

    /// Constraints that freeze zoom at `z`
    #[must_use]
    pub fn pinned(self, z: f64) -> Self {
        Self {
            min_zoom: z,
            max_zoom: z,
            ..self
        }
    }

    #[must_use]
    pub fn clamp_zoom(&self, z: f64) -> f64 {
        clamp_zoom(z, self.min_zoom, self.max_zoom)
    }
}

/// Clamp a zoom factor, mapping NaN/Inf to 1.0 first
#[must_use]
pub fn clamp_zoom(z: f64, min_zoom: f64, max_zoom: f64) -> f64 {
    let z = if z.is_finite() { z } else { 1.0 };
    z.max(min_zoom).min(max_zoom)
}

/// Zoom values closer than this are treated as equal
pub const ZOOM_EPSILON: f64 = 1e-9;

/// Cubic ease-out on `[0, 1]`
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

impl Camera {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn canvas_to_screen(self, p: Point) -> Point {
        Point::new((p.x + self.x) * self.z, (p.y + self.y) * self.z)
    }

    #[must_use]
    pub fn screen_to_canvas(self, p: Point) -> Point {
        Point::new(p.x / self.z - self.x, p.y / self.z - self.y)
    }

    /// Canvas rectangle currently on screen
    #[must_use]
    pub fn visible_bounds(self, viewport: Size) -> Rect {
        let origin = self.screen_to_canvas(Point::new(0.0, 0.0));
        Rect::new(
            origin.x,
            origin.y,
            viewport.width / self.z,
            viewport.height / self.z,
        )
    }

    /// Pan by a screen-space delta. Positive deltas scroll content towards
    /// the origin, the same sense as a wheel event.
    #[must_use]
    pub fn pan(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x - dx / self.z,
            y: self.y - dy / self.z,
            z: self.z,
        }
    }

    /// Zoom by `delta` (positive zooms out) keeping the canvas point under
    /// `screen_point` fixed. Returns `self` unchanged when the clamped zoom
    /// does not move.
    #[must_use]
    pub fn zoom_to_point(
        self,
        screen_point: Point,
        delta: f64,
        constraints: &CameraConstraints,
    ) -> Self {
        let new_z = constraints.clamp_zoom(self.z * (1.0 - delta));
        if (new_z - self.z).abs() < ZOOM_EPSILON {
            return self;
        }
        self.zoom_to_point_absolute(screen_point, new_z)
    }

    /// Set zoom to exactly `new_z` keeping the canvas point under
    /// `screen_point` fixed. No clamping.
    #[must_use]
    pub fn zoom_to_point_absolute(self, screen_point: Point, new_z: f64) -> Self {
        let before = self.screen_to_canvas(screen_point);
        let zoomed = Self { z: new_z, ..self };
        let after = zoomed.screen_to_canvas(screen_point);
        Self {
            x: self.x + (after.x - before.x),
            y: self.y + (after.y - before.y),
            z: new_z,
        }
    }

    /// Camera that centres `target` and fits it inside the padded viewport
    #[must_use]
    pub fn fit_box_in_view(
        target: &Rect,
        viewport: Size,
        padding: f64,
        constraints: &CameraConstraints,
    ) -> Self {
        let avail_w = (viewport.width - 2.0 * padding).max(1.0);
        let avail_h = (viewport.height - 2.0 * padding).max(1.0);
        let fit = if target.width > 0.0 && target.height > 0.0 {
            (avail_w / target.width).min(avail_h / target.height)
        } else {
            1.0
        };
        let z = constraints.clamp_zoom(fit);
        Self::centered_on(target.center(), viewport, z)
    }

    /// Camera at zoom `z` with canvas point `center` in the middle of the viewport
    #[must_use]
    pub fn centered_on(center: Point, viewport: Size, z: f64) -> Self {
        Self {
            x: viewport.width / (2.0 * z) - center.x,
            y: viewport.height / (2.0 * z) - center.y,
            z,
        }
    }

    /// Interpolate between cameras. Offsets move linearly along the eased
    /// curve; zoom moves geometrically so perceived zoom speed is constant.
    #[must_use]
    pub fn lerp(from: Camera, to: Camera, t: f64) -> Camera {
        let e = ease_out_cubic(t);
        let z = if from.z > 0.0 && to.z > 0.0 {
            from.z * (to.z / from.z).powf(e)
        } else {
            from.z + (to.z - from.z) * e
        };
        Camera {
            x: from.x + (to.x - from.x) * e,
            y: from.y + (to.y - from.y) * e,
            z,
        }
    }

    /// Clamp zoom, then keep content from leaving the viewport. An axis where
    /// the content is smaller than the viewport is centred instead.
    #[must_use]
    pub fn constrain(self, constraints: &CameraConstraints) -> Self {
        let z = constraints.clamp_zoom(self.z);
        let content = constraints.content;
        let viewport = constraints.viewport;
        if viewport.is_empty() || content.width <= 0.0 || content.height <= 0.0 {
            return Self { z, ..self };
        }
        let content = content.expand(constraints.padding.max(0.0) / z);
        Self {
            x: constrain_axis(self.x, z, content.x, content.width, viewport.width),
            y: constrain_axis(self.y, z, content.y, content.height, viewport.height),
            z,
        }
    }
}

fn constrain_axis(offset: f64, z: f64, start: f64, length: f64, viewport: f64) -> f64 {
    let visible = viewport / z;
    if length <= visible {
        visible / 2.0 - (start + length / 2.0)
    } else {
        // content's leading edge may not pass the viewport start, trailing edge
        // may not pass the viewport end
        offset.clamp(visible - (start + length), -start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn loose() -> CameraConstraints {
        CameraConstraints::zoom_only(0.1, 5.0)
    }

    #[test]
    fn screen_canvas_round_trip() {
        let cam = Camera::new(-120.5, 33.0, 1.75);
        let p = Point::new(321.0, -12.25);
        let back = cam.screen_to_canvas(cam.canvas_to_screen(p));
        assert!((back.x - p.x).abs() < EPS);
        assert!((back.y - p.y).abs() < EPS);
    }

    #[test]
    fn pan_is_zoom_compensated() {
        let cam = Camera::new(0.0, 0.0, 2.0);
        let moved = cam.pan(100.0, 0.0);
        assert!(approx(moved.x, -50.0));
        let probe = Point::new(10.0, 0.0);
        let before = cam.canvas_to_screen(probe);
        let after = moved.canvas_to_screen(probe);
        assert!(approx(before.x - after.x, 100.0));
    }

    #[test]
    fn zoom_to_point_keeps_cursor_anchor() {
        let cam = Camera::default();
        let point = Point::new(500.0, 400.0);
        let anchor = cam.screen_to_canvas(point);

        let zoomed = cam.zoom_to_point(point, 0.1, &loose());

        assert!(approx(zoomed.z, 0.9));
        let after = zoomed.screen_to_canvas(point);
        assert!(approx(after.x, anchor.x));
        assert!(approx(after.y, anchor.y));
        let screen = zoomed.canvas_to_screen(anchor);
        assert!(approx(screen.x, 500.0));
        assert!(approx(screen.y, 400.0));
    }

    #[test]
    fn zoom_to_point_no_op_when_clamped() {
        let cam = Camera::new(12.0, -4.0, 5.0);
        let zoomed = cam.zoom_to_point(Point::new(10.0, 10.0), -0.5, &loose());
        assert_eq!(zoomed, cam);
    }

    #[test]
    fn fit_box_centres_and_fits() {
        let target = Rect::new(100.0, 200.0, 400.0, 518.0);
        let viewport = Size::new(1000.0, 800.0);
        let cam = Camera::fit_box_in_view(&target, viewport, 24.0, &loose());

        assert!(approx(cam.z, (800.0 - 48.0) / 518.0));
        let center = cam.canvas_to_screen(target.center());
        assert!(approx(center.x, 500.0));
        assert!(approx(center.y, 400.0));
    }

    #[test]
    fn fit_box_respects_zoom_limits() {
        let tiny = Rect::new(0.0, 0.0, 1.0, 1.0);
        let cam = Camera::fit_box_in_view(&tiny, Size::new(800.0, 600.0), 0.0, &loose());
        assert!(approx(cam.z, 5.0));
    }

    #[test]
    fn lerp_endpoints_and_log_zoom() {
        let from = Camera::new(0.0, 0.0, 1.0);
        let to = Camera::new(100.0, -50.0, 4.0);
        assert_eq!(Camera::lerp(from, to, 0.0), from);
        let end = Camera::lerp(from, to, 1.0);
        assert!(approx(end.x, 100.0) && approx(end.y, -50.0) && approx(end.z, 4.0));

        // geometric midpoint of the eased parameter
        let e = ease_out_cubic(0.5);
        let mid = Camera::lerp(from, to, 0.5);
        assert!(approx(mid.z, 4.0_f64.powf(e)));
    }

    #[test]
    fn constrain_centres_small_content() {
        let constraints = CameraConstraints {
            min_zoom: 0.1,
            max_zoom: 5.0,
            content: Rect::new(0.0, 0.0, 400.0, 3000.0),
            viewport: Size::new(1000.0, 800.0),
            padding: 0.0,
        };
        let cam = Camera::new(999.0, 50.0, 1.0).constrain(&constraints);
        // 400 wide content centred in a 1000 wide viewport
        assert!(approx(cam.canvas_to_screen(Point::new(200.0, 0.0)).x, 500.0));
        // tall axis clamped so the top edge cannot move below the viewport top
        assert!(approx(cam.y, 0.0));
    }

    #[test]
    fn constrain_keeps_large_content_covering_viewport() {
        let constraints = CameraConstraints {
            min_zoom: 0.1,
            max_zoom: 5.0,
            content: Rect::new(0.0, 0.0, 400.0, 3000.0),
            viewport: Size::new(1000.0, 800.0),
            padding: 0.0,
        };
        let cam = Camera::new(0.0, -100_000.0, 1.0).constrain(&constraints);
        let bottom = cam.canvas_to_screen(Point::new(0.0, 3000.0));
        assert!(approx(bottom.y, 800.0));
    }

    #[test]
    fn constrain_leaves_padding_at_leading_edge() {
        let constraints = CameraConstraints {
            min_zoom: 0.1,
            max_zoom: 5.0,
            content: Rect::new(0.0, 0.0, 400.0, 3000.0),
            viewport: Size::new(1000.0, 800.0),
            padding: 24.0,
        };
        let cam = Camera::new(0.0, 500.0, 2.0).constrain(&constraints);
        let top = cam.canvas_to_screen(Point::new(0.0, 0.0));
        assert!(approx(top.y, 24.0));
    }

    #[test]
    fn clamp_zoom_handles_nan() {
        assert!(approx(clamp_zoom(f64::NAN, 0.1, 5.0), 1.0));
        assert!(approx(clamp_zoom(0.01, 0.1, 5.0), 0.1));
        assert!(approx(clamp_zoom(50.0, 0.1, f64::INFINITY), 50.0));
    }
}
