//! Camera, layout and display mode for one open document
//!
//! All camera writes go through here so the per-mode rules (pinned zoom in
//! paginated mode, cross-axis minimum zoom in scroll modes, auto-grid
//! relayout on zoom) are applied in one place.

use log::debug;

use crate::camera::{Camera, CameraConstraints, ZOOM_EPSILON};
use crate::geometry::{Point, Rect, Size};
use crate::layout::{DisplayMode, FocusAnchor, Layout, LayoutEngine, PaginatedFit};
use crate::settings::ViewerSettings;

/// Zoom range and padding that do not depend on the document
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomLimits {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub padding: f64,
}

impl ZoomLimits {
    #[must_use]
    pub fn from_settings(settings: &ViewerSettings) -> Self {
        Self {
            min_zoom: settings.min_zoom,
            max_zoom: settings.max_zoom,
            padding: settings.viewport_padding,
        }
    }
}

/// What a state update touched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateChange {
    pub camera: bool,
    pub zoom: bool,
    /// Page positions were recomputed
    pub layout: bool,
}

impl StateChange {
    fn merge(self, other: StateChange) -> StateChange {
        StateChange {
            camera: self.camera || other.camera,
            zoom: self.zoom || other.zoom,
            layout: self.layout || other.layout,
        }
    }

    /// Anything that makes in-flight renders obsolete
    #[must_use]
    pub fn invalidates_renders(&self) -> bool {
        self.zoom || self.layout
    }
}

pub struct ViewState {
    engine: LayoutEngine,
    limits: ZoomLimits,
    mode: DisplayMode,
    viewport: Size,
    layout: Layout,
    camera: Camera,
    constraints: CameraConstraints,
    paginated: Option<PaginatedFit>,
    /// First page of the visible spread in paginated mode
    spread_start: usize,
}

impl ViewState {
    #[must_use]
    pub fn new(
        engine: LayoutEngine,
        mode: DisplayMode,
        viewport: Size,
        limits: ZoomLimits,
    ) -> Self {
        let mut state = Self {
            engine,
            limits,
            mode,
            viewport,
            layout: Layout::default(),
            camera: Camera::default(),
            constraints: CameraConstraints::zoom_only(limits.min_zoom, limits.max_zoom),
            paginated: None,
            spread_start: 1,
        };
        state.relayout_for_mode(1, 1.0);
        state
    }

    #[must_use]
    pub fn camera(&self) -> Camera {
        self.camera
    }

    #[must_use]
    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn constraints(&self) -> &CameraConstraints {
        &self.constraints
    }

    #[must_use]
    pub fn viewport(&self) -> Size {
        self.viewport
    }

    #[must_use]
    pub fn padding(&self) -> f64 {
        self.limits.padding
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.engine.page_count()
    }

    #[must_use]
    pub fn columns(&self) -> usize {
        self.layout.columns
    }

    fn viewport_center(&self) -> Point {
        Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0)
    }

    fn clamp_page(&self, page: usize) -> usize {
        page.clamp(1, self.page_count().max(1))
    }

    /// Pages shown at once in paginated mode
    #[must_use]
    pub fn spread_size(&self) -> usize {
        self.paginated.map_or(1, |f| f.pages_per_view())
    }

    fn spread_start_for(&self, page: usize) -> usize {
        let size = self.spread_size();
        (self.clamp_page(page) - 1) / size * size + 1
    }

    fn spread_rect(&self, start: usize) -> Rect {
        let end = (start + self.spread_size() - 1).min(self.page_count());
        (start..=end)
            .filter_map(|p| self.layout.page(p).map(|l| l.rect()))
            .reduce(|a, b| a.union(&b))
            .unwrap_or(self.layout.bounds)
    }

    fn rebuild_constraints(&mut self) {
        let base = CameraConstraints {
            min_zoom: self.limits.min_zoom,
            max_zoom: self.limits.max_zoom,
            content: self.layout.bounds,
            viewport: self.viewport,
            padding: self.limits.padding,
        };
        self.constraints = match self.mode {
            DisplayMode::Paginated => {
                let z = self.paginated.map_or(1.0, |f| f.zoom);
                CameraConstraints {
                    content: self.spread_rect(self.spread_start),
                    ..base.pinned(z)
                }
            }
            DisplayMode::VerticalScroll | DisplayMode::HorizontalScroll => CameraConstraints {
                min_zoom: self.engine.scroll_min_zoom(self.mode, self.viewport),
                max_zoom: f64::INFINITY,
                ..base
            },
            DisplayMode::AutoGrid | DisplayMode::Canvas => base,
        };
    }

    /// Recompute layout for the current mode and put `page` in view at
    /// roughly `zoom`
    fn relayout_for_mode(&mut self, page: usize, zoom: f64) {
        self.paginated = None;
        let columns = match self.mode {
            DisplayMode::Paginated => {
                let fit =
                    self.engine
                        .paginated_fit(self.viewport, self.limits.min_zoom, self.limits.max_zoom);
                self.paginated = Some(fit);
                fit.columns
            }
            DisplayMode::AutoGrid => {
                let z = crate::camera::clamp_zoom(zoom, self.limits.min_zoom, self.limits.max_zoom);
                self.engine.auto_grid_columns(z, self.viewport)
            }
            DisplayMode::Canvas => self.engine.canvas_columns(),
            DisplayMode::VerticalScroll | DisplayMode::HorizontalScroll => 1,
        };
        self.layout = self.engine.compute(self.mode, columns);
        self.spread_start = self.spread_start_for(page);
        self.rebuild_constraints();
        let z = self.constraints.clamp_zoom(zoom);
        self.camera = self.page_camera(page, z);
    }

    /// Camera that brings `page` into view at zoom `z`
    #[must_use]
    pub fn page_camera(&self, page: usize, z: f64) -> Camera {
        let page = self.clamp_page(page);
        let Some(rect) = self.layout.page(page).map(|l| l.rect()) else {
            return self.camera;
        };
        let pad = self.limits.padding;
        let camera = match self.mode {
            DisplayMode::Paginated => {
                let start = self.spread_start_for(page);
                Camera::centered_on(self.spread_rect(start).center(), self.viewport, z)
            }
            // leading edge of the page just inside the padding
            DisplayMode::VerticalScroll => Camera {
                x: self.camera.x,
                y: pad / z - rect.y,
                z,
            },
            DisplayMode::HorizontalScroll => Camera {
                x: pad / z - rect.x,
                y: self.camera.y,
                z,
            },
            DisplayMode::AutoGrid | DisplayMode::Canvas => {
                let centered = Camera::centered_on(rect.center(), self.viewport, z);
                if rect.height * z + 2.0 * pad > self.viewport.height {
                    Camera {
                        y: pad / z - rect.y,
                        ..centered
                    }
                } else {
                    centered
                }
            }
        };
        camera.constrain(&self.constraints)
    }

    /// Page under the viewport centre, or the nearest one
    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        if self.page_count() == 0 {
            return None;
        }
        if self.mode == DisplayMode::Paginated {
            return Some(self.spread_start);
        }
        let center = self.camera.screen_to_canvas(self.viewport_center());
        self.layout
            .page_at(center)
            .or_else(|| self.layout.nearest_page(center))
    }

    fn set_camera(&mut self, camera: Camera) -> StateChange {
        let camera = camera.constrain(&self.constraints);
        let change = StateChange {
            camera: camera != self.camera,
            zoom: (camera.z - self.camera.z).abs() > ZOOM_EPSILON,
            layout: false,
        };
        self.camera = camera;
        change
    }

    /// Apply a camera that only moved
    pub fn pan_to(&mut self, camera: Camera) -> StateChange {
        self.set_camera(camera)
    }

    /// Apply a zoomed camera; auto-grid may relayout around `anchor`
    pub fn zoom_to(&mut self, camera: Camera, anchor: Point) -> StateChange {
        let change = self.set_camera(camera);
        if change.zoom {
            change.merge(self.check_auto_grid_columns(anchor))
        } else {
            change
        }
    }

    /// Mid-animation camera; column checks wait for the animation to land
    pub fn animate_to(&mut self, camera: Camera) -> StateChange {
        self.set_camera(camera)
    }

    /// Multiply zoom by `factor` around `anchor` (screen point)
    pub fn zoom_by(&mut self, factor: f64, anchor: Point) -> StateChange {
        let next = self
            .camera
            .zoom_to_point(anchor, 1.0 - factor, &self.constraints);
        self.zoom_to(next, anchor)
    }

    /// Set an absolute zoom around the viewport centre
    pub fn set_zoom(&mut self, z: f64) -> StateChange {
        let z = self.constraints.clamp_zoom(z);
        if (z - self.camera.z).abs() < ZOOM_EPSILON {
            return StateChange::default();
        }
        let anchor = self.viewport_center();
        let next = self.camera.zoom_to_point_absolute(anchor, z);
        self.zoom_to(next, anchor)
    }

    fn check_auto_grid_columns(&mut self, anchor: Point) -> StateChange {
        if self.mode != DisplayMode::AutoGrid {
            return StateChange::default();
        }
        let columns = self.engine.auto_grid_columns(self.camera.z, self.viewport);
        if columns == self.layout.columns {
            return StateChange::default();
        }
        debug!(
            "auto-grid columns {} -> {columns} at zoom {:.3}",
            self.layout.columns, self.camera.z
        );
        let focus = FocusAnchor::capture(&self.layout, self.camera, anchor);
        self.layout = self.engine.compute(self.mode, columns);
        self.rebuild_constraints();
        let camera = focus.map_or(self.camera, |f| f.restore(&self.layout, self.camera));
        self.camera = camera.constrain(&self.constraints);
        StateChange {
            camera: true,
            zoom: false,
            layout: true,
        }
    }

    /// Switch display mode, keeping the current page in view
    pub fn set_mode(&mut self, mode: DisplayMode) -> StateChange {
        if mode == self.mode {
            return StateChange::default();
        }
        let page = self.current_page().unwrap_or(1);
        let zoom = self.camera.z;
        self.mode = mode;
        self.relayout_for_mode(page, zoom);
        StateChange {
            camera: true,
            zoom: (self.camera.z - zoom).abs() > ZOOM_EPSILON,
            layout: true,
        }
    }

    /// Viewport size changed
    pub fn resize(&mut self, viewport: Size) -> StateChange {
        if viewport == self.viewport || viewport.is_empty() {
            return StateChange::default();
        }
        let zoom = self.camera.z;
        let page = self.current_page().unwrap_or(1);
        let center = self.viewport_center();
        let focus = FocusAnchor::capture(&self.layout, self.camera, center);
        self.viewport = viewport;

        let before_columns = self.layout.columns;
        match self.mode {
            DisplayMode::Paginated => self.relayout_for_mode(page, zoom),
            DisplayMode::AutoGrid => {
                let columns = self.engine.auto_grid_columns(zoom, viewport);
                if columns != before_columns {
                    self.layout = self.engine.compute(self.mode, columns);
                }
                self.rebuild_constraints();
            }
            _ => self.rebuild_constraints(),
        }

        if self.mode != DisplayMode::Paginated {
            let z = self.constraints.clamp_zoom(zoom);
            let camera = Camera { z, ..self.camera };
            let anchor = FocusAnchor {
                screen: self.viewport_center(),
                ..focus.unwrap_or(FocusAnchor {
                    page,
                    relative: Point::new(0.5, 0.5),
                    screen: center,
                })
            };
            self.camera = anchor.restore(&self.layout, camera).constrain(&self.constraints);
        }
        StateChange {
            camera: true,
            zoom: (self.camera.z - zoom).abs() > ZOOM_EPSILON,
            layout: self.layout.columns != before_columns || self.mode == DisplayMode::Paginated,
        }
    }

    /// Jump to `page` (clamped) at the current zoom
    pub fn go_to_page(&mut self, page: usize) -> StateChange {
        let page = self.clamp_page(page);
        if self.mode == DisplayMode::Paginated {
            let start = self.spread_start_for(page);
            if start == self.spread_start {
                return StateChange::default();
            }
            self.spread_start = start;
            self.rebuild_constraints();
        }
        let target = self.page_camera(page, self.camera.z);
        self.set_camera(target)
    }

    /// Page `next_page` would go to
    #[must_use]
    pub fn next_page_target(&self) -> Option<usize> {
        let current = self.current_page()?;
        let step = if self.mode == DisplayMode::Paginated {
            self.spread_size()
        } else {
            1
        };
        let next = current + step;
        (next <= self.page_count()).then_some(next)
    }

    /// Page `prev_page` would go to
    #[must_use]
    pub fn prev_page_target(&self) -> Option<usize> {
        let current = self.current_page()?;
        let step = if self.mode == DisplayMode::Paginated {
            self.spread_size()
        } else {
            1
        };
        (current > 1).then(|| current.saturating_sub(step).max(1))
    }

    /// Camera that fits the whole of `page` in the viewport
    #[must_use]
    pub fn fit_page_camera(&self, page: usize) -> Option<Camera> {
        let rect = self.layout.page(self.clamp_page(page))?.rect();
        Some(
            Camera::fit_box_in_view(&rect, self.viewport, self.limits.padding, &self.constraints)
                .constrain(&self.constraints),
        )
    }

    /// Camera whose zoom makes `page` span the padded viewport width
    #[must_use]
    pub fn fit_width_camera(&self, page: usize) -> Option<Camera> {
        let rect = self.layout.page(self.clamp_page(page))?.rect();
        let avail = (self.viewport.width - 2.0 * self.limits.padding).max(1.0);
        let z = self.constraints.clamp_zoom(avail / rect.width);
        let centered = Camera::centered_on(rect.center(), self.viewport, z);
        // keep the top of the page in view
        let camera = if rect.height * z + 2.0 * self.limits.padding > self.viewport.height {
            Camera {
                y: self.limits.padding / z - rect.y,
                ..centered
            }
        } else {
            centered
        };
        Some(camera.constrain(&self.constraints))
    }

    /// Apply a fitted camera; auto-grid may relayout afterwards
    pub fn apply_fit(&mut self, camera: Camera) -> StateChange {
        self.zoom_to(camera, self.viewport_center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutParams;

    fn state(mode: DisplayMode, pages: usize, viewport: Size) -> ViewState {
        let settings = ViewerSettings::default();
        let engine = LayoutEngine::uniform(LayoutParams::from_settings(&settings), pages);
        ViewState::new(engine, mode, viewport, ZoomLimits::from_settings(&settings))
    }

    #[test]
    fn auto_grid_relayouts_when_zooming_out() {
        let mut s = state(DisplayMode::AutoGrid, 50, Size::new(1000.0, 800.0));
        let initial = s.columns();
        assert_eq!(initial, 2);

        let change = s.set_zoom(0.5);
        assert!(change.zoom);
        assert!(change.layout);
        assert!(s.columns() >= initial);
        assert_eq!(s.columns(), 4);
    }

    #[test]
    fn auto_grid_keeps_columns_on_small_zoom_change() {
        let mut s = state(DisplayMode::AutoGrid, 50, Size::new(1000.0, 800.0));
        let change = s.set_zoom(1.05);
        assert!(change.zoom);
        assert!(!change.layout);
    }

    #[test]
    fn paginated_zoom_is_frozen() {
        let mut s = state(DisplayMode::Paginated, 10, Size::new(1000.0, 800.0));
        let before = s.camera();
        let change = s.zoom_by(1.2, Point::new(500.0, 400.0));
        assert_eq!(change, StateChange::default());
        assert_eq!(s.camera(), before);
    }

    #[test]
    fn paginated_steps_by_spread() {
        let mut s = state(DisplayMode::Paginated, 10, Size::new(2000.0, 800.0));
        assert_eq!(s.spread_size(), 3);
        assert_eq!(s.current_page(), Some(1));
        assert_eq!(s.next_page_target(), Some(4));
        s.go_to_page(5);
        assert_eq!(s.current_page(), Some(4));
        assert_eq!(s.prev_page_target(), Some(1));
    }

    #[test]
    fn vertical_scroll_cannot_zoom_below_page_width() {
        let mut s = state(DisplayMode::VerticalScroll, 10, Size::new(1000.0, 800.0));
        let min = (1000.0 - 48.0) / 400.0;
        assert!((s.camera().z - min).abs() < 1e-9);
        s.set_zoom(0.2);
        assert!((s.camera().z - min).abs() < 1e-9);
        s.set_zoom(12.0);
        assert!((s.camera().z - 12.0).abs() < 1e-9);
    }

    #[test]
    fn horizontal_scroll_cannot_zoom_below_page_height() {
        let mut s = state(DisplayMode::HorizontalScroll, 10, Size::new(1000.0, 800.0));
        let min = (800.0 - 48.0) / 518.0;
        assert!((s.camera().z - min).abs() < 1e-9);
        s.set_zoom(0.2);
        assert!((s.camera().z - min).abs() < 1e-9);
        s.set_zoom(12.0);
        assert!((s.camera().z - 12.0).abs() < 1e-9);
    }

    #[test]
    fn go_to_page_puts_page_in_view() {
        let mut s = state(DisplayMode::VerticalScroll, 30, Size::new(1000.0, 800.0));
        s.go_to_page(7);
        assert_eq!(s.current_page(), Some(7));
        // out of range is clamped
        s.go_to_page(99);
        assert_eq!(s.current_page(), Some(30));
    }

    #[test]
    fn mode_switch_keeps_current_page() {
        let mut s = state(DisplayMode::Canvas, 30, Size::new(1000.0, 800.0));
        s.go_to_page(14);
        let page = s.current_page();
        let change = s.set_mode(DisplayMode::VerticalScroll);
        assert!(change.layout);
        assert_eq!(s.current_page(), page);
        assert_eq!(s.columns(), 1);
    }

    #[test]
    fn resize_refits_paginated() {
        let mut s = state(DisplayMode::Paginated, 10, Size::new(1000.0, 800.0));
        assert_eq!(s.spread_size(), 1);
        let change = s.resize(Size::new(2000.0, 800.0));
        assert!(change.layout);
        assert_eq!(s.spread_size(), 3);
    }

    #[test]
    fn fit_to_page_shows_whole_page() {
        let mut s = state(DisplayMode::Canvas, 9, Size::new(1000.0, 800.0));
        let camera = s.fit_page_camera(5).unwrap();
        s.apply_fit(camera);
        let rect = s.layout().page(5).unwrap().rect();
        let visible = s.camera().visible_bounds(s.viewport());
        assert!(visible.x <= rect.x && visible.right() >= rect.right());
        assert!(visible.y <= rect.y && visible.bottom() >= rect.bottom());
    }
}
