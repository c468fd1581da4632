//! Public control surface
//!
//! [`CanvasViewer`] owns one document session: the view state, page objects,
//! image cache, render queue and worker pool. Every public call runs on the
//! host's UI thread; only provider calls happen on the workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use log::{debug, info, trace};
use thiserror::Error;

use crate::cache::{ImageCache, QualityPolicy};
use crate::camera::Camera;
use crate::events::{EventFilter, EventHub, ViewerEvent};
use crate::geometry::{Point, Size};
use crate::gesture::{
    GestureAction, GestureConfig, GestureContext, GestureController, KeyInput, Navigation,
    PinchInput, WheelInput,
};
use crate::layout::{DisplayMode, LayoutEngine, LayoutParams, PageLayout};
use crate::prefetch::Prefetcher;
use crate::provider::PageProvider;
use crate::render::{FetchPool, FetchResponse, RenderPipeline, RenderVersion};
use crate::scheduler::{Scheduler, TimerKind};
use crate::settings::ViewerSettings;
use crate::state::{StateChange, ViewState, ZoomLimits};
use crate::virtualizer::{PageObject, Virtualizer, VirtualizerConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewerError {
    #[error("No document loaded; call initialize first")]
    NotInitialized,
    #[error("Viewer has been destroyed")]
    Destroyed,
    #[error("Document has no pages")]
    EmptyDocument,
    #[error("Page {page} is outside 1..={page_count}")]
    PageOutOfRange { page: usize, page_count: usize },
}

struct Session {
    state: ViewState,
    objects: Virtualizer,
    cache: ImageCache,
    pipeline: RenderPipeline,
    pool: FetchPool,
    prefetcher: Prefetcher,
    last_page: Option<usize>,
}

impl Session {
    fn gesture_context(&self) -> GestureContext<'_> {
        GestureContext {
            camera: self.state.camera(),
            mode: self.state.mode(),
            constraints: self.state.constraints(),
            layout: self.state.layout(),
            viewport: self.state.viewport(),
            padding: self.state.padding(),
        }
    }
}

pub struct CanvasViewer<S: Scheduler> {
    settings: ViewerSettings,
    provider: Arc<dyn PageProvider>,
    scheduler: S,
    viewport: Size,
    mode: DisplayMode,
    events: EventHub,
    gestures: GestureController,
    session: Option<Session>,
    destroyed: bool,
}

impl<S: Scheduler> CanvasViewer<S> {
    pub fn new(
        settings: ViewerSettings,
        provider: Arc<dyn PageProvider>,
        scheduler: S,
        viewport: Size,
    ) -> Self {
        let settings = settings.sanitized();
        let gestures = GestureController::new(GestureConfig::from_settings(&settings));
        Self {
            mode: settings.default_mode,
            settings,
            provider,
            scheduler,
            viewport,
            events: EventHub::new(),
            gestures,
            session: None,
            destroyed: false,
        }
    }

    /// Open a document of `page_count` uniformly sized pages
    pub fn initialize(&mut self, page_count: usize) -> Result<(), ViewerError> {
        let params = LayoutParams::from_settings(&self.settings);
        self.start_session(LayoutEngine::uniform(params, page_count))
    }

    /// Open a document whose pages have their own aspect ratios
    pub fn initialize_with_sizes(&mut self, sizes: &[Size]) -> Result<(), ViewerError> {
        let params = LayoutParams::from_settings(&self.settings);
        self.start_session(LayoutEngine::with_page_sizes(params, sizes))
    }

    fn start_session(&mut self, engine: LayoutEngine) -> Result<(), ViewerError> {
        if self.destroyed {
            return Err(ViewerError::Destroyed);
        }
        if engine.page_count() == 0 {
            return Err(ViewerError::EmptyDocument);
        }
        info!(
            "Opening {} pages in {} mode",
            engine.page_count(),
            self.mode
        );

        // the old pool shuts down when its session drops
        self.session = None;
        self.stop_animation();

        let s = &self.settings;
        let version = RenderVersion::new();
        let state = ViewState::new(engine, self.mode, self.viewport, ZoomLimits::from_settings(s));
        let session = Session {
            state,
            objects: Virtualizer::new(VirtualizerConfig {
                create_buffer: s.create_buffer,
                keep_buffer: s.keep_buffer,
            }),
            cache: ImageCache::new(s.page_cache_size, QualityPolicy::from_settings(s)),
            pipeline: RenderPipeline::new(
                version.clone(),
                s.render_batch_size,
                s.prefetch_batch_size,
            ),
            pool: FetchPool::new(
                Arc::clone(&self.provider),
                s.workers,
                version,
                s.load_text_layer,
            ),
            prefetcher: Prefetcher::new(s.prefetch_radius),
            last_page: None,
        };
        let zoom = session.state.camera().z;
        self.session = Some(session);
        self.events.emit(ViewerEvent::ZoomChanged { zoom });
        self.refresh(true);
        Ok(())
    }

    /// Stop workers and drop every page object, cached image and subscriber
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        info!("Destroying viewer");
        self.stop_animation();
        self.session = None;
        self.events.clear();
        self.destroyed = true;
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    #[must_use]
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> Receiver<ViewerEvent> {
        self.events.subscribe(filter)
    }

    fn target_scale(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(1.0, |s| s.state.camera().z * self.settings.device_pixel_ratio)
    }

    /// Virtualize, show placeholders, queue visible renders, prefetch and
    /// report page changes
    fn refresh(&mut self, invalidate: bool) {
        let target = self.target_scale();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if invalidate {
            session.pipeline.invalidate();
        }

        let update = session.objects.update(
            session.state.camera(),
            session.state.viewport(),
            session.state.layout(),
        );
        let policy = *session.cache.policy();
        for &page in &update.created {
            let placeholder = session.cache.peek(page).cloned();
            if let (Some(image), Some(object)) = (placeholder, session.objects.get_mut(page)) {
                object.apply(image, target, &policy);
            }
        }

        session.pipeline.enqueue(&update.render_order);
        session.pipeline.pump(
            &mut session.cache,
            &mut session.pool,
            &mut session.objects,
            target,
        );

        let current = session.state.current_page();
        if let Some(page) = current {
            self.prefetch(page, &update.render_order);
        }
        self.report_page_change(current);
    }

    fn prefetch(&mut self, current: usize, visible: &[usize]) {
        let target = self.target_scale();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mode = session.state.mode();
        if mode.is_spatial() && !session.pipeline.is_idle() {
            return;
        }
        let pages = session.prefetcher.run(
            mode,
            current,
            session.state.columns(),
            session.state.page_count(),
            visible,
            self.provider.as_ref(),
        );
        session
            .pipeline
            .prefetch(&pages, &mut session.cache, &mut session.pool, target);
    }

    fn report_page_change(&mut self, current: Option<usize>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if current.is_none() || current == session.last_page {
            return;
        }
        session.last_page = current;
        if let Some(page) = current {
            let page_count = session.state.page_count();
            debug!("current page {page}/{page_count}");
            self.events.emit(ViewerEvent::PageChanged { page, page_count });
        }
    }

    fn after_change(&mut self, change: StateChange) {
        if !change.camera && !change.layout {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if change.layout {
                session.objects.sync_layout(session.state.layout());
            }
            if change.zoom {
                let zoom = session.state.camera().z;
                self.events.emit(ViewerEvent::ZoomChanged { zoom });
            }
        }
        self.refresh(change.invalidates_renders());
    }

    fn update_state(&mut self, f: impl FnOnce(&mut ViewState) -> StateChange) {
        let Some(session) = self.session.as_mut() else {
            trace!("ignoring camera update with no document");
            return;
        };
        let change = f(&mut session.state);
        self.after_change(change);
    }

    fn with_gestures(
        &mut self,
        f: impl FnOnce(&mut GestureController, &GestureContext<'_>) -> Vec<GestureAction>,
    ) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let ctx = session.gesture_context();
        let actions = f(&mut self.gestures, &ctx);
        self.apply_gesture_actions(actions);
    }

    fn apply_gesture_actions(&mut self, actions: Vec<GestureAction>) {
        for action in actions {
            match action {
                GestureAction::Pan(camera) => self.update_state(|s| s.pan_to(camera)),
                GestureAction::Zoom { camera, anchor } => {
                    self.update_state(|s| s.zoom_to(camera, anchor));
                }
                GestureAction::Animate(camera) => self.update_state(|s| s.animate_to(camera)),
                GestureAction::RequestFrame => self.scheduler.schedule_frame(),
                GestureAction::ArmTimer(timer, delay) => {
                    self.scheduler.schedule_after(delay, timer);
                }
                GestureAction::CancelTimer(timer) => self.scheduler.cancel(timer),
                GestureAction::Navigate(Navigation::Next) => self.next_page(),
                GestureAction::Navigate(Navigation::Previous) => self.prev_page(),
                GestureAction::Navigate(Navigation::First) => self.go_to_page(1),
                GestureAction::Navigate(Navigation::Last) => {
                    let last = self.page_count();
                    self.go_to_page(last);
                }
                GestureAction::ZoomIn => self.zoom_in(),
                GestureAction::ZoomOut => self.zoom_out(),
                GestureAction::ResetZoom => self.reset_zoom(),
            }
        }
    }

    fn stop_animation(&mut self) {
        let actions = self.gestures.cancel_animation();
        self.apply_gesture_actions(actions);
    }

    fn viewport_center(&self) -> Point {
        Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0)
    }

    // Display mode

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if self.destroyed || mode == self.mode {
            return;
        }
        self.stop_animation();
        info!("Display mode {} -> {mode}", self.mode);
        self.mode = mode;
        if let Some(session) = self.session.as_mut() {
            let zoom_before = session.state.camera().z;
            session.state.set_mode(mode);
            // mode switches rebuild every page object
            session.objects.reset();
            session.prefetcher.reset();
            let zoom = session.state.camera().z;
            if (zoom - zoom_before).abs() > f64::EPSILON {
                self.events.emit(ViewerEvent::ZoomChanged { zoom });
            }
        }
        self.events.emit(ViewerEvent::DisplayModeChanged { mode });
        self.refresh(true);
    }

    #[must_use]
    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn handle_resize(&mut self, viewport: Size) {
        if self.destroyed || viewport.is_empty() {
            return;
        }
        self.viewport = viewport;
        self.update_state(|s| s.resize(viewport));
    }

    #[must_use]
    pub fn viewport(&self) -> Size {
        self.viewport
    }

    // Zoom

    pub fn set_zoom(&mut self, zoom: f64) {
        self.stop_animation();
        self.update_state(|s| s.set_zoom(zoom));
    }

    #[must_use]
    pub fn zoom(&self) -> f64 {
        self.session.as_ref().map_or(1.0, |s| s.state.camera().z)
    }

    pub fn zoom_in(&mut self) {
        self.stop_animation();
        let (step, anchor) = (self.settings.zoom_step, self.viewport_center());
        self.update_state(|s| s.zoom_by(step, anchor));
    }

    pub fn zoom_out(&mut self) {
        self.stop_animation();
        let (step, anchor) = (self.settings.zoom_step, self.viewport_center());
        self.update_state(|s| s.zoom_by(1.0 / step, anchor));
    }

    pub fn reset_zoom(&mut self) {
        self.set_zoom(1.0);
    }

    /// Zoom so the current page fits entirely in the viewport
    pub fn fit_to_page(&mut self) {
        self.stop_animation();
        self.update_state(|s| {
            let fitted = s.current_page().and_then(|p| s.fit_page_camera(p));
            fitted.map_or_else(StateChange::default, |camera| s.apply_fit(camera))
        });
    }

    /// Zoom so the current page spans the viewport width
    pub fn fit_to_width(&mut self) {
        self.stop_animation();
        self.update_state(|s| {
            let fitted = s.current_page().and_then(|p| s.fit_width_camera(p));
            fitted.map_or_else(StateChange::default, |camera| s.apply_fit(camera))
        });
    }

    // Navigation

    /// Jump to `page`, clamped to the document
    pub fn go_to_page(&mut self, page: usize) {
        self.stop_animation();
        self.update_state(|s| s.go_to_page(page));
    }

    /// Glide to `page` with the focus animation. Paginated mode jumps.
    pub fn go_to_page_animated(&mut self, page: usize) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.state.mode() == DisplayMode::Paginated {
            self.go_to_page(page);
            return;
        }
        let from = session.state.camera();
        let to = session.state.page_camera(page, from.z);
        let viewport = session.state.viewport();
        let actions = self.gestures.animate_to(from, to, viewport);
        self.apply_gesture_actions(actions);
    }

    pub fn next_page(&mut self) {
        let target = self.session.as_ref().and_then(|s| s.state.next_page_target());
        if let Some(page) = target {
            self.go_to_page(page);
        }
    }

    pub fn prev_page(&mut self) {
        let target = self.session.as_ref().and_then(|s| s.state.prev_page_target());
        if let Some(page) = target {
            self.go_to_page(page);
        }
    }

    /// Page under the viewport centre; `None` before `initialize`
    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        self.session.as_ref().and_then(|s| s.state.current_page())
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.state.page_count())
    }

    // Queries

    #[must_use]
    pub fn camera(&self) -> Option<Camera> {
        self.session.as_ref().map(|s| s.state.camera())
    }

    #[must_use]
    pub fn columns(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.state.columns())
    }

    /// Pages whose rectangle is on screen, ascending
    #[must_use]
    pub fn visible_pages(&self) -> Vec<usize> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let bounds = session.state.camera().visible_bounds(session.state.viewport());
        session
            .state
            .layout()
            .pages
            .iter()
            .filter(|l| l.rect().intersects(&bounds))
            .map(|l| l.page)
            .collect()
    }

    /// Pages that currently have a page object
    #[must_use]
    pub fn materialized_pages(&self) -> Vec<usize> {
        self.session
            .as_ref()
            .map_or_else(Vec::new, |s| s.objects.pages())
    }

    fn checked_page(&self, page: usize) -> Result<&Session, ViewerError> {
        if self.destroyed {
            return Err(ViewerError::Destroyed);
        }
        let session = self.session.as_ref().ok_or(ViewerError::NotInitialized)?;
        let page_count = session.state.page_count();
        if page == 0 || page > page_count {
            return Err(ViewerError::PageOutOfRange { page, page_count });
        }
        Ok(session)
    }

    /// Live page object, `Ok(None)` when the page is not materialized
    pub fn page_object(&self, page: usize) -> Result<Option<&PageObject>, ViewerError> {
        Ok(self.checked_page(page)?.objects.get(page))
    }

    pub fn page_layout(&self, page: usize) -> Result<PageLayout, ViewerError> {
        let session = self.checked_page(page)?;
        session
            .state
            .layout()
            .page(page)
            .copied()
            .ok_or(ViewerError::PageOutOfRange {
                page,
                page_count: session.state.page_count(),
            })
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.cache.len())
    }

    /// No visible render queued or in flight and no fetch outstanding
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.session
            .as_ref()
            .is_none_or(|s| s.pipeline.is_idle() && s.cache.pending_count() == 0)
    }

    // Cache

    /// Drop every cached image. Pages on screen keep what they show; pages
    /// still loading are fetched again once their running fetch lands.
    pub fn clear_cache(&mut self) {
        if let Some(session) = self.session.as_mut() {
            info!("Clearing {} cached pages", session.cache.len());
            session.cache.clear();
            session.pipeline.clear();
        }
        self.refresh(false);
    }

    /// Forget the render of one page, e.g. after its content changed
    pub fn invalidate_page(&mut self, page: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.cache.invalidate_page(page);
        session.pipeline.forget(page);
        if let Some(object) = session.objects.get_mut(page) {
            object.content = None;
            object.loading = true;
        }
        self.refresh(false);
    }

    // Worker responses

    fn handle_response(&mut self, response: FetchResponse) {
        let target = self.target_scale();
        if let Some(session) = self.session.as_mut() {
            session
                .pipeline
                .on_response(&response, &mut session.cache, &mut session.objects, target);
        }
    }

    fn pump(&mut self) {
        let target = self.target_scale();
        let current = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.pipeline.pump(
                &mut session.cache,
                &mut session.pool,
                &mut session.objects,
                target,
            );
            if !session.pipeline.is_idle() {
                return;
            }
            session.state.current_page()
        };
        if let Some(page) = current {
            let visible = self.materialized_pages();
            self.prefetch(page, &visible);
        }
    }

    /// Apply every finished fetch without blocking. Returns how many were
    /// handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(response) = self.session.as_ref().and_then(|s| s.pool.try_recv()) {
            self.handle_response(response);
            handled += 1;
        }
        if handled > 0 {
            self.pump();
        }
        handled
    }

    /// Block until [`Self::is_idle`] or `timeout` passes. Returns whether the
    /// viewer went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let response = self
                .session
                .as_ref()
                .and_then(|s| s.pool.recv_timeout(deadline - now));
            match response {
                Some(response) => {
                    self.handle_response(response);
                    self.poll();
                    self.pump();
                }
                None => return self.is_idle(),
            }
        }
        true
    }

    // Input

    pub fn pointer_down(&mut self, position: Point) {
        let actions = self.gestures.pointer_down(position);
        self.apply_gesture_actions(actions);
    }

    pub fn pointer_move(&mut self, position: Point) {
        self.with_gestures(|g, ctx| g.pointer_move(ctx, position));
    }

    pub fn pointer_up(&mut self) {
        self.gestures.pointer_up();
    }

    pub fn wheel(&mut self, input: WheelInput) {
        self.with_gestures(|g, ctx| g.wheel(ctx, input));
    }

    pub fn pinch(&mut self, input: PinchInput) {
        self.with_gestures(|g, ctx| g.pinch(ctx, input));
    }

    pub fn key(&mut self, input: KeyInput) {
        self.with_gestures(|g, ctx| g.key(ctx, input));
    }

    pub fn double_click(&mut self, position: Point) {
        self.with_gestures(|g, ctx| g.double_click(ctx, position));
    }

    /// Host frame callback: applies finished fetches and steps animations
    pub fn on_frame(&mut self, now_ms: f64) {
        self.poll();
        self.with_gestures(|g, ctx| g.on_frame(ctx, now_ms));
    }

    /// Host timer callback
    pub fn on_timer(&mut self, timer: TimerKind) {
        let actions = self.gestures.on_timer(timer);
        self.apply_gesture_actions(actions);
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.gestures.is_animating()
    }

    // Overlay events

    /// Forward a text selection made in the external overlay
    pub fn report_text_selection(&mut self, page: usize, text: impl Into<String>) {
        self.events.emit(ViewerEvent::TextSelected {
            page,
            text: text.into(),
        });
    }

    /// Forward a highlight click from the external overlay
    pub fn report_highlight_click(&mut self, page: usize, highlight_id: impl Into<String>) {
        self.events.emit(ViewerEvent::HighlightClicked {
            page,
            highlight_id: highlight_id.into(),
        });
    }
}
