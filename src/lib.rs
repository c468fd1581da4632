// Export modules for use in tests
pub mod cache;
pub mod camera;
pub mod events;
pub mod geometry;
pub mod gesture;
pub mod layout;
pub mod panic_handler;
pub mod prefetch;
pub mod provider;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod viewer;
pub mod virtualizer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the control surface
pub use camera::{Camera, CameraConstraints};
pub use events::{EventFilter, EventKind, ViewerEvent};
pub use geometry::{Point, Rect, Size};
pub use gesture::{Key, KeyInput, Modifiers, PinchInput, WheelInput};
pub use layout::{DisplayMode, PageLayout};
pub use provider::{ImageFormat, ImageRequest, PageImage, PageProvider, ProviderError, TextLayer};
pub use scheduler::{ManualScheduler, Scheduler, TimerKind};
pub use settings::ViewerSettings;
pub use viewer::{CanvasViewer, ViewerError};
