//! Fetch request and response types

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::provider::{PageImage, ProviderError, TextLayer};

/// Unique identifier for fetch requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Monotonic render version shared between the controller and workers.
///
/// Bumped on every zoom change and every layout/mode change. Work tagged with
/// an older version is abandoned at its next check.
#[derive(Clone, Debug, Default)]
pub struct RenderVersion(Arc<AtomicU64>);

impl RenderVersion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Start a new render cycle, returning its version
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// `None` (unversioned work) is always current
    #[must_use]
    pub fn is_current(&self, version: Option<u64>) -> bool {
        version.is_none_or(|v| v == self.current())
    }
}

/// One page fetch handed to a worker
#[derive(Clone, Debug, PartialEq)]
pub struct FetchJob {
    pub id: RequestId,
    /// 1-based page number
    pub page: usize,
    pub scale: f64,
    /// Render version of a visible-page render; `None` for prefetch
    pub version: Option<u64>,
}

/// Request sent to fetch workers
#[derive(Debug)]
pub enum FetchRequest {
    Fetch(FetchJob),
    Shutdown,
}

/// Response from fetch workers
#[derive(Debug)]
pub enum FetchResponse {
    /// Image fetched; text layer attached when available
    Fetched {
        id: RequestId,
        page: usize,
        scale: f64,
        image: Arc<PageImage>,
        text: Option<Arc<TextLayer>>,
    },

    /// A newer render version started before the job finished. `image` is
    /// set when the abort happened after the image arrived.
    Aborted {
        id: RequestId,
        page: usize,
        scale: f64,
        image: Option<Arc<PageImage>>,
    },

    /// Provider failed to produce the image
    Failed {
        id: RequestId,
        page: usize,
        error: ProviderError,
    },
}

impl FetchResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            FetchResponse::Fetched { id, .. }
            | FetchResponse::Aborted { id, .. }
            | FetchResponse::Failed { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn page(&self) -> usize {
        match self {
            FetchResponse::Fetched { page, .. }
            | FetchResponse::Aborted { page, .. }
            | FetchResponse::Failed { page, .. } => *page,
        }
    }
}

/// Somewhere fetch jobs can be submitted
pub trait FetchSink {
    fn submit(&mut self, page: usize, scale: f64, version: Option<u64>) -> RequestId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bump_invalidates_older() {
        let version = RenderVersion::new();
        let shared = version.clone();
        let v1 = version.bump();
        assert!(shared.is_current(Some(v1)));
        version.bump();
        assert!(!shared.is_current(Some(v1)));
        assert!(shared.is_current(None));
    }
}
