//! Page fetching: worker pool, request types and the visible-page render queue

pub mod pipeline;
pub mod request;
pub mod worker;

pub use pipeline::{PumpReport, RenderPipeline};
pub use request::{FetchJob, FetchResponse, FetchSink, RenderVersion, RequestId};
pub use worker::FetchPool;
