//! Pointer, wheel, pinch and keyboard input turned into camera motion
//!
//! The controller never owns the camera. Each handler receives the current
//! camera and constraints in a [`GestureContext`] and returns the actions the
//! viewer should apply, including frame and timer requests for the inertia
//! and focus animations. At most one animation runs at a time.

use std::time::Duration;

use log::trace;

use crate::camera::{Camera, CameraConstraints, ZOOM_EPSILON};
use crate::geometry::{Point, Size};
use crate::layout::{DisplayMode, Layout};
use crate::scheduler::TimerKind;
use crate::settings::ViewerSettings;

/// Nominal frame length the per-frame decay is defined against
const FRAME_MS: f64 = 1000.0 / 60.0;

/// Wheel samples further apart than this restart the velocity estimate
const VELOCITY_RESET_MS: f64 = 100.0;

/// Weight of the newest wheel sample in the velocity estimate
const VELOCITY_SMOOTHING: f64 = 0.8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        meta: false,
        shift: false,
        alt: false,
    };

    /// Ctrl on most platforms, Cmd on macOS
    #[must_use]
    pub fn zoom(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// One wheel event in screen pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelInput {
    pub position: Point,
    pub dx: f64,
    pub dy: f64,
    pub modifiers: Modifiers,
    pub timestamp_ms: f64,
}

/// Pinch gesture step; `scale > 1` means the fingers moved apart
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinchInput {
    pub center: Point,
    pub scale: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Plus,
    Minus,
    Zero,
    Char(char),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyInput {
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::NONE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    First,
    Last,
}

/// What the viewer should do in response to input
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GestureAction {
    /// Move the camera without changing zoom
    Pan(Camera),
    /// Camera after a zoom around `anchor` (screen point)
    Zoom { camera: Camera, anchor: Point },
    /// Intermediate step of a focus animation
    Animate(Camera),
    RequestFrame,
    ArmTimer(TimerKind, Duration),
    CancelTimer(TimerKind),
    Navigate(Navigation),
    ZoomIn,
    ZoomOut,
    ResetZoom,
}

/// Read-only view of the viewer state a handler needs
#[derive(Clone, Copy, Debug)]
pub struct GestureContext<'a> {
    pub camera: Camera,
    pub mode: DisplayMode,
    pub constraints: &'a CameraConstraints,
    pub layout: &'a Layout,
    pub viewport: Size,
    pub padding: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureConfig {
    pub wheel_zoom_sensitivity: f64,
    pub inertia_decay: f64,
    /// px/ms
    pub fling_threshold: f64,
    /// px/ms
    pub min_inertia_velocity: f64,
    pub wheel_idle: Duration,
    pub focus_duration_ms: f64,
    pub keyboard_pan_step: f64,
}

impl GestureConfig {
    #[must_use]
    pub fn from_settings(settings: &ViewerSettings) -> Self {
        Self {
            wheel_zoom_sensitivity: settings.wheel_zoom_sensitivity,
            inertia_decay: settings.inertia_decay,
            fling_threshold: settings.fling_threshold,
            min_inertia_velocity: settings.min_inertia_velocity,
            wheel_idle: Duration::from_millis(settings.wheel_idle_ms),
            focus_duration_ms: settings.focus_animation_ms as f64,
            keyboard_pan_step: settings.keyboard_pan_step,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Animation {
    Idle,
    Inertia {
        velocity: Point,
        last_ms: Option<f64>,
    },
    Focus {
        from: Camera,
        to: Camera,
        start_ms: Option<f64>,
        duration_ms: f64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct WheelTracker {
    velocity: Point,
    last_ms: Option<f64>,
}

impl WheelTracker {
    fn record(&mut self, dx: f64, dy: f64, now: f64) {
        let instant = match self.last_ms {
            Some(last) if now - last < VELOCITY_RESET_MS => {
                let dt = (now - last).max(1.0);
                Point::new(dx / dt, dy / dt)
            }
            _ => {
                // first sample of a burst: assume one nominal frame
                self.velocity = Point::default();
                Point::new(dx / FRAME_MS, dy / FRAME_MS)
            }
        };
        let k = VELOCITY_SMOOTHING;
        self.velocity = Point::new(
            k * instant.x + (1.0 - k) * self.velocity.x,
            k * instant.y + (1.0 - k) * self.velocity.y,
        );
        self.last_ms = Some(now);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn speed(&self) -> f64 {
        self.velocity.x.hypot(self.velocity.y)
    }
}

/// Restrict a screen delta to the axes `mode` may pan on
fn filter_pan(mode: DisplayMode, dx: f64, dy: f64) -> Option<(f64, f64)> {
    if mode == DisplayMode::Paginated {
        return None;
    }
    let dx = if mode.pans_horizontally() { dx } else { 0.0 };
    let dy = if mode.pans_vertically() { dy } else { 0.0 };
    Some((dx, dy))
}

fn same_camera(a: Camera, b: Camera) -> bool {
    (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < ZOOM_EPSILON
}

pub struct GestureController {
    config: GestureConfig,
    drag: Option<Point>,
    wheel: WheelTracker,
    animation: Animation,
}

impl GestureController {
    #[must_use]
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            drag: None,
            wheel: WheelTracker::default(),
            animation: Animation::Idle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.animation != Animation::Idle
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Stop any running animation and forget wheel velocity
    pub fn cancel_animation(&mut self) -> Vec<GestureAction> {
        if self.animation != Animation::Idle {
            trace!("cancelling camera animation");
        }
        self.animation = Animation::Idle;
        self.wheel.reset();
        vec![GestureAction::CancelTimer(TimerKind::WheelIdle)]
    }

    fn pan(&self, ctx: &GestureContext<'_>, dx: f64, dy: f64) -> Option<Camera> {
        let (dx, dy) = filter_pan(ctx.mode, dx, dy)?;
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let next = ctx.camera.pan(dx, dy).constrain(ctx.constraints);
        (!same_camera(next, ctx.camera)).then_some(next)
    }

    fn zoom(&self, ctx: &GestureContext<'_>, anchor: Point, delta: f64) -> Option<GestureAction> {
        let next = ctx
            .camera
            .zoom_to_point(anchor, delta, ctx.constraints)
            .constrain(ctx.constraints);
        (!same_camera(next, ctx.camera)).then_some(GestureAction::Zoom {
            camera: next,
            anchor,
        })
    }

    pub fn pointer_down(&mut self, position: Point) -> Vec<GestureAction> {
        let actions = self.cancel_animation();
        self.drag = Some(position);
        actions
    }

    pub fn pointer_move(
        &mut self,
        ctx: &GestureContext<'_>,
        position: Point,
    ) -> Vec<GestureAction> {
        let Some(last) = self.drag else {
            return Vec::new();
        };
        self.drag = Some(position);
        // dragging content right moves the camera left
        self.pan(ctx, last.x - position.x, last.y - position.y)
            .map(GestureAction::Pan)
            .into_iter()
            .collect()
    }

    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    pub fn wheel(&mut self, ctx: &GestureContext<'_>, input: WheelInput) -> Vec<GestureAction> {
        if input.modifiers.zoom() {
            let mut actions = self.cancel_animation();
            let delta = input.dy * self.config.wheel_zoom_sensitivity;
            actions.extend(self.zoom(ctx, input.position, delta));
            return actions;
        }

        let (dx, dy) = if input.modifiers.shift {
            (input.dy, input.dx)
        } else {
            (input.dx, input.dy)
        };
        let Some((dx, dy)) = filter_pan(ctx.mode, dx, dy) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        self.animation = Animation::Idle;
        self.wheel.record(dx, dy, input.timestamp_ms);
        if let Some(camera) = self.pan(ctx, dx, dy) {
            actions.push(GestureAction::Pan(camera));
        }
        actions.push(GestureAction::ArmTimer(
            TimerKind::WheelIdle,
            self.config.wheel_idle,
        ));
        actions
    }

    pub fn pinch(&mut self, ctx: &GestureContext<'_>, input: PinchInput) -> Vec<GestureAction> {
        let mut actions = self.cancel_animation();
        if input.scale.is_finite() && input.scale > 0.0 {
            actions.extend(self.zoom(ctx, input.center, 1.0 - input.scale));
        }
        actions
    }

    pub fn key(&mut self, ctx: &GestureContext<'_>, input: KeyInput) -> Vec<GestureAction> {
        let step = self.config.keyboard_pan_step;
        let pan = |dx: f64, dy: f64| {
            self.pan(ctx, dx, dy)
                .map(GestureAction::Pan)
                .into_iter()
                .collect::<Vec<_>>()
        };
        match input.key {
            Key::Left => pan(-step, 0.0),
            Key::Right => pan(step, 0.0),
            Key::Up => pan(0.0, -step),
            Key::Down => pan(0.0, step),
            Key::PageUp => vec![GestureAction::Navigate(Navigation::Previous)],
            Key::PageDown => vec![GestureAction::Navigate(Navigation::Next)],
            Key::Home => vec![GestureAction::Navigate(Navigation::First)],
            Key::End => vec![GestureAction::Navigate(Navigation::Last)],
            Key::Plus | Key::Char('=') => vec![GestureAction::ZoomIn],
            Key::Minus => vec![GestureAction::ZoomOut],
            Key::Zero => vec![GestureAction::ResetZoom],
            Key::Char(_) => Vec::new(),
        }
    }

    /// Focus the page under `position`; spatial modes only
    pub fn double_click(
        &mut self,
        ctx: &GestureContext<'_>,
        position: Point,
    ) -> Vec<GestureAction> {
        if !ctx.mode.is_spatial() {
            return Vec::new();
        }
        let canvas = ctx.camera.screen_to_canvas(position);
        let Some(rect) = ctx
            .layout
            .page_at(canvas)
            .and_then(|p| ctx.layout.page(p))
            .map(|l| l.rect())
        else {
            return Vec::new();
        };
        let target = Camera::fit_box_in_view(&rect, ctx.viewport, ctx.padding, ctx.constraints)
            .constrain(ctx.constraints);
        self.animate_to(ctx.camera, target, ctx.viewport)
    }

    /// Start a focus animation from `from` to `to`. A zero duration jumps.
    pub fn animate_to(&mut self, from: Camera, to: Camera, viewport: Size) -> Vec<GestureAction> {
        let mut actions = self.cancel_animation();
        if same_camera(from, to) {
            return actions;
        }
        if self.config.focus_duration_ms <= 0.0 {
            actions.push(GestureAction::Zoom {
                camera: to,
                anchor: Point::new(viewport.width / 2.0, viewport.height / 2.0),
            });
            return actions;
        }
        self.animation = Animation::Focus {
            from,
            to,
            start_ms: None,
            duration_ms: self.config.focus_duration_ms,
        };
        actions.push(GestureAction::RequestFrame);
        actions
    }

    /// Wheel went quiet: fling if it was moving fast enough
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<GestureAction> {
        match timer {
            TimerKind::WheelIdle => {
                let speed = self.wheel.speed();
                let velocity = self.wheel.velocity;
                self.wheel.reset();
                if speed <= self.config.fling_threshold || self.animation != Animation::Idle {
                    return Vec::new();
                }
                trace!("fling at {speed:.3} px/ms");
                self.animation = Animation::Inertia {
                    velocity,
                    last_ms: None,
                };
                vec![GestureAction::RequestFrame]
            }
        }
    }

    /// Advance the running animation to `now_ms`
    pub fn on_frame(&mut self, ctx: &GestureContext<'_>, now_ms: f64) -> Vec<GestureAction> {
        match self.animation {
            Animation::Idle => Vec::new(),
            Animation::Inertia { velocity, last_ms } => {
                self.inertia_step(ctx, velocity, last_ms, now_ms)
            }
            Animation::Focus {
                from,
                to,
                start_ms,
                duration_ms,
            } => {
                let start = start_ms.unwrap_or(now_ms);
                let t = ((now_ms - start) / duration_ms).clamp(0.0, 1.0);
                if t >= 1.0 {
                    self.animation = Animation::Idle;
                    return vec![GestureAction::Zoom {
                        camera: to,
                        anchor: Point::new(ctx.viewport.width / 2.0, ctx.viewport.height / 2.0),
                    }];
                }
                self.animation = Animation::Focus {
                    from,
                    to,
                    start_ms: Some(start),
                    duration_ms,
                };
                vec![
                    GestureAction::Animate(Camera::lerp(from, to, t)),
                    GestureAction::RequestFrame,
                ]
            }
        }
    }

    fn inertia_step(
        &mut self,
        ctx: &GestureContext<'_>,
        velocity: Point,
        last_ms: Option<f64>,
        now_ms: f64,
    ) -> Vec<GestureAction> {
        let Some(last) = last_ms else {
            // first frame only records the clock
            self.animation = Animation::Inertia {
                velocity,
                last_ms: Some(now_ms),
            };
            return vec![GestureAction::RequestFrame];
        };
        let dt = (now_ms - last).max(0.0);
        if dt == 0.0 {
            return vec![GestureAction::RequestFrame];
        }

        let moved = self.pan(ctx, velocity.x * dt, velocity.y * dt);
        let decay = self.config.inertia_decay.powf(dt / FRAME_MS);
        let velocity = Point::new(velocity.x * decay, velocity.y * decay);
        let speed = velocity.x.hypot(velocity.y);

        let mut actions: Vec<GestureAction> = moved.map(GestureAction::Pan).into_iter().collect();
        if moved.is_none() || speed < self.config.min_inertia_velocity {
            trace!("inertia settled");
            self.animation = Animation::Idle;
            return actions;
        }
        self.animation = Animation::Inertia {
            velocity,
            last_ms: Some(now_ms),
        };
        actions.push(GestureAction::RequestFrame);
        actions
    }
}
