//! LRU page image cache with scale-aware lookups and fetch deduplication

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use log::{debug, trace, warn};
use lru::LruCache;

use crate::provider::{PageImage, TextLayer};
use crate::render::request::{FetchResponse, FetchSink, RequestId};
use crate::settings::ViewerSettings;

/// One cached page render
#[derive(Clone, Debug, PartialEq)]
pub struct CachedImage {
    pub page: usize,
    /// Scale the provider rendered at
    pub scale: f64,
    pub image: Arc<PageImage>,
    pub text: Option<Arc<TextLayer>>,
}

/// Handle on an in-flight fetch. Every caller asking for the same page while
/// it is in flight gets the same ticket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FetchTicket {
    pub id: RequestId,
    pub page: usize,
    pub scale: f64,
}

/// Scale rules shared by the cache and the render pipeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityPolicy {
    /// A render satisfies a target when `rendered >= target * tolerance`.
    /// Targets above the fetch ceiling are measured against the ceiling.
    pub tolerance: f64,
    /// Fetches never go below this scale
    pub min_fetch_scale: f64,
    /// Fetches never go above this scale
    pub max_fetch_scale: f64,
}

impl QualityPolicy {
    #[must_use]
    pub fn from_settings(settings: &ViewerSettings) -> Self {
        Self {
            tolerance: settings.quality_tolerance,
            min_fetch_scale: settings.min_fetch_scale,
            max_fetch_scale: settings.max_fetch_scale.max(settings.min_fetch_scale),
        }
    }

    #[must_use]
    pub fn satisfies(&self, rendered: f64, target: f64) -> bool {
        rendered >= target.min(self.max_fetch_scale) * self.tolerance
    }

    /// Scale actually requested from the provider for `target`
    #[must_use]
    pub fn fetch_scale(&self, target: f64) -> f64 {
        target.max(self.min_fetch_scale).min(self.max_fetch_scale)
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingFetch {
    ticket: FetchTicket,
    /// Set once the page was invalidated or the cache cleared while the fetch
    /// ran. The slot still blocks a second fetch; the result is dropped.
    superseded: bool,
}

/// Page images keyed by page number, evicted least-recently-used
pub struct ImageCache {
    entries: LruCache<usize, Arc<CachedImage>>,
    pending: HashMap<usize, PendingFetch>,
    policy: QualityPolicy,
}

impl ImageCache {
    #[must_use]
    pub fn new(capacity: usize, policy: QualityPolicy) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            pending: HashMap::new(),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Cached image good enough for `target_scale`, promoting it in LRU order
    pub fn get(&mut self, page: usize, target_scale: f64) -> Option<Arc<CachedImage>> {
        let good = self
            .entries
            .peek(&page)
            .is_some_and(|e| self.policy.satisfies(e.scale, target_scale));
        if good {
            self.entries.get(&page).cloned()
        } else {
            None
        }
    }

    /// Whatever is cached for `page`, without touching LRU order
    #[must_use]
    pub fn peek(&self, page: usize) -> Option<&Arc<CachedImage>> {
        self.entries.peek(&page)
    }

    /// Whether a cached image satisfies `target_scale`, without promoting it
    #[must_use]
    pub fn is_satisfied(&self, page: usize, target_scale: f64) -> bool {
        self.entries
            .peek(&page)
            .is_some_and(|e| self.policy.satisfies(e.scale, target_scale))
    }

    #[must_use]
    pub fn pending(&self, page: usize) -> Option<FetchTicket> {
        self.pending.get(&page).map(|p| p.ticket)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start a fetch for `page` unless one is already in flight, in which
    /// case the existing ticket is returned
    pub fn fetch(
        &mut self,
        page: usize,
        target_scale: f64,
        sink: &mut dyn FetchSink,
        version: Option<u64>,
    ) -> FetchTicket {
        if let Some(pending) = self.pending.get(&page) {
            trace!("page {page} already in flight as {:?}", pending.ticket.id);
            return pending.ticket;
        }

        let scale = self.policy.fetch_scale(target_scale);
        let id = sink.submit(page, scale, version);
        let ticket = FetchTicket { id, page, scale };
        self.pending.insert(
            page,
            PendingFetch {
                ticket,
                superseded: false,
            },
        );
        debug!("fetching page {page} at {scale:.2}x ({id:?})");
        ticket
    }

    /// Insert a render, moving it to the most-recent end. A lower scale never
    /// replaces a higher one.
    pub fn insert(
        &mut self,
        page: usize,
        scale: f64,
        image: Arc<PageImage>,
        text: Option<Arc<TextLayer>>,
    ) -> Arc<CachedImage> {
        if let Some(existing) = self.entries.get(&page) {
            if existing.scale > scale {
                trace!(
                    "keeping page {page} at {:.2}x over {scale:.2}x",
                    existing.scale
                );
                return Arc::clone(existing);
            }
        }

        let entry = Arc::new(CachedImage {
            page,
            scale,
            image,
            text,
        });
        if let Some((evicted, _)) = self.entries.push(page, Arc::clone(&entry)) {
            if evicted != page {
                trace!("evicted page {evicted}");
            }
        }
        entry
    }

    /// Record a worker response: clears the pending slot and stores any image.
    /// Responses that no longer own a live pending slot are dropped.
    pub fn complete(&mut self, response: &FetchResponse) -> Option<Arc<CachedImage>> {
        let page = response.page();
        let owned = match self.pending.get(&page) {
            Some(p) if p.ticket.id == response.id() => {
                let live = !p.superseded;
                self.pending.remove(&page);
                live
            }
            _ => false,
        };
        if !owned {
            trace!("dropping superseded response for page {page} ({:?})", response.id());
            return None;
        }

        match response {
            FetchResponse::Fetched {
                page,
                scale,
                image,
                text,
                ..
            } => Some(self.insert(*page, *scale, Arc::clone(image), text.clone())),
            FetchResponse::Aborted {
                page,
                scale,
                image: Some(image),
                ..
            } => Some(self.insert(*page, *scale, Arc::clone(image), None)),
            FetchResponse::Aborted { .. } => None,
            FetchResponse::Failed { page, error, .. } => {
                warn!("Failed to fetch page {page}: {error}");
                None
            }
        }
    }

    /// Drop every cached render of `page`. A fetch already running for it
    /// keeps its slot but its result is thrown away.
    pub fn invalidate_page(&mut self, page: usize) {
        self.entries.pop(&page);
        if let Some(pending) = self.pending.get_mut(&page) {
            pending.superseded = true;
        }
    }

    /// Drop all cached renders. Running fetches keep their slots until they
    /// land, and their results are thrown away.
    pub fn clear(&mut self) {
        self.entries.clear();
        for pending in self.pending.values_mut() {
            pending.superseded = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ImageFormat;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Vec<(usize, f64, Option<u64>)>,
    }

    impl FetchSink for RecordingSink {
        fn submit(&mut self, page: usize, scale: f64, version: Option<u64>) -> RequestId {
            self.submitted.push((page, scale, version));
            RequestId::new(self.submitted.len() as u64)
        }
    }

    fn policy() -> QualityPolicy {
        QualityPolicy::from_settings(&ViewerSettings::default())
    }

    fn image() -> Arc<PageImage> {
        Arc::new(PageImage {
            bytes: vec![1, 2, 3],
            format: ImageFormat::Png,
            width_px: 1,
            height_px: 1,
        })
    }

    #[test]
    fn oldest_page_evicted_first() {
        let mut cache = ImageCache::new(3, policy());
        for page in 1..=4 {
            cache.insert(page, 1.5, image(), None);
        }
        assert!(!cache.contains(1));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn access_protects_from_eviction() {
        let mut cache = ImageCache::new(3, policy());
        for page in 1..=3 {
            cache.insert(page, 1.5, image(), None);
        }
        assert!(cache.get(1, 1.0).is_some());
        cache.insert(4, 1.5, image(), None);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn tolerance_allows_minor_upscale() {
        let mut cache = ImageCache::new(10, policy());
        cache.insert(5, 1.0, image(), None);
        assert!(cache.get(5, 1.2).is_some());
        assert!(cache.get(5, 1.3).is_none());
    }

    #[test]
    fn under_resolved_hit_refetches_at_floor() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        cache.insert(5, 1.0, image(), None);

        // 1.0 >= 1.15 * 0.8
        assert!(cache.get(5, 1.15).is_some());
        // 1.0 < 1.3 * 0.8
        assert!(cache.get(5, 1.3).is_none());
        let ticket = cache.fetch(5, 1.3, &mut sink, None);
        assert_eq!(ticket.scale, 1.5);
        assert_eq!(sink.submitted, vec![(5, 1.5, None)]);
    }

    #[test]
    fn targets_above_ceiling_use_ceiling() {
        let mut cache = ImageCache::new(10, policy());
        cache.insert(3, 4.0, image(), None);
        assert!(cache.get(3, 12.0).is_some());
    }

    #[test]
    fn clear_keeps_running_fetches_deduplicated() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        cache.insert(1, 2.0, image(), None);
        let ticket = cache.fetch(2, 2.0, &mut sink, None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.pending(2), Some(ticket));
        assert_eq!(cache.fetch(2, 2.0, &mut sink, None), ticket);
        assert_eq!(sink.submitted.len(), 1);

        // the running fetch lands but its image predates the clear
        let stored = cache.complete(&FetchResponse::Fetched {
            id: ticket.id,
            page: 2,
            scale: ticket.scale,
            image: image(),
            text: None,
        });
        assert!(stored.is_none());
        assert!(cache.pending(2).is_none());
        assert!(!cache.contains(2));
    }

    #[test]
    fn invalidated_page_drops_running_fetch_result() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        let ticket = cache.fetch(4, 2.0, &mut sink, None);
        cache.invalidate_page(4);

        let stored = cache.complete(&FetchResponse::Fetched {
            id: ticket.id,
            page: 4,
            scale: ticket.scale,
            image: image(),
            text: None,
        });
        assert!(stored.is_none());
        assert_eq!(cache.pending_count(), 0);
        assert!(!cache.contains(4));
    }

    #[test]
    fn unknown_response_is_not_cached() {
        let mut cache = ImageCache::new(10, policy());
        let stored = cache.complete(&FetchResponse::Fetched {
            id: RequestId::new(77),
            page: 6,
            scale: 2.0,
            image: image(),
            text: None,
        });
        assert!(stored.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_fetches_share_ticket() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        let a = cache.fetch(9, 2.0, &mut sink, Some(1));
        let b = cache.fetch(9, 3.0, &mut sink, None);
        assert_eq!(a, b);
        assert_eq!(sink.submitted.len(), 1);
    }

    #[test]
    fn completion_clears_pending_and_stores() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        let ticket = cache.fetch(2, 2.0, &mut sink, None);

        let stored = cache.complete(&FetchResponse::Fetched {
            id: ticket.id,
            page: 2,
            scale: ticket.scale,
            image: image(),
            text: None,
        });

        assert!(stored.is_some());
        assert!(cache.pending(2).is_none());
        assert!(cache.get(2, 2.0).is_some());
    }

    #[test]
    fn failure_clears_pending_only() {
        let mut cache = ImageCache::new(10, policy());
        let mut sink = RecordingSink::default();
        let ticket = cache.fetch(2, 2.0, &mut sink, None);
        let stored = cache.complete(&FetchResponse::Failed {
            id: ticket.id,
            page: 2,
            error: crate::provider::ProviderError::generic("boom"),
        });
        assert!(stored.is_none());
        assert!(cache.pending(2).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lower_scale_never_replaces_higher() {
        let mut cache = ImageCache::new(10, policy());
        cache.insert(1, 3.0, image(), None);
        let kept = cache.insert(1, 1.5, image(), None);
        assert_eq!(kept.scale, 3.0);
    }

    #[test]
    fn fetch_scale_is_capped() {
        let p = policy();
        assert_eq!(p.fetch_scale(0.2), 1.5);
        assert_eq!(p.fetch_scale(2.5), 2.5);
        assert_eq!(p.fetch_scale(40.0), 4.0);
    }
}
