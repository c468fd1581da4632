//! Visible-page render queue
//!
//! Pages are fetched in batches of `batch_size`. A batch is only started once
//! the previous one has drained, and every queued job carries the render
//! version it was enqueued under. Bumping the version drops the queue and
//! forgets the in-flight batch; late responses from that batch still feed the
//! cache but never reach a page object. A page whose fetch is still pending
//! from an older cycle waits in the queue until that fetch lands.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace};

use super::request::{FetchResponse, FetchSink, RenderVersion};
use crate::cache::ImageCache;
use crate::virtualizer::Virtualizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RenderJob {
    page: usize,
    version: u64,
}

/// What one `pump` call did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PumpReport {
    /// Pages served straight from the cache
    pub applied_from_cache: Vec<usize>,
    /// Pages handed to the fetch workers
    pub fetched: Vec<usize>,
}

pub struct RenderPipeline {
    version: RenderVersion,
    batch_size: usize,
    prefetch_batch_size: usize,
    queue: VecDeque<RenderJob>,
    /// page -> version of the render waiting on it
    in_flight: HashMap<usize, u64>,
    prefetch_in_flight: HashSet<usize>,
}

impl RenderPipeline {
    #[must_use]
    pub fn new(version: RenderVersion, batch_size: usize, prefetch_batch_size: usize) -> Self {
        Self {
            version,
            batch_size: batch_size.max(1),
            prefetch_batch_size,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            prefetch_in_flight: HashSet::new(),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.current()
    }

    /// Start a new render cycle. Everything queued or in flight becomes stale.
    pub fn invalidate(&mut self) -> u64 {
        let v = self.version.bump();
        trace!(
            "render version -> {v}, dropping {} queued / {} in flight",
            self.queue.len(),
            self.in_flight.len()
        );
        self.queue.clear();
        self.in_flight.clear();
        v
    }

    /// Replace the queue with `pages` (already sorted nearest first), tagged
    /// with the current version
    pub fn enqueue(&mut self, pages: &[usize]) {
        let version = self.version.current();
        self.queue = pages
            .iter()
            .filter(|p| self.in_flight.get(p) != Some(&version))
            .map(|&page| RenderJob { page, version })
            .collect();
    }

    /// No visible-page work queued or in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn prefetch_in_flight(&self) -> usize {
        self.prefetch_in_flight.len()
    }

    /// Start the next batch if the previous one has drained
    pub fn pump(
        &mut self,
        cache: &mut ImageCache,
        sink: &mut dyn FetchSink,
        objects: &mut Virtualizer,
        target_scale: f64,
    ) -> PumpReport {
        let mut report = PumpReport::default();
        if !self.in_flight.is_empty() {
            return report;
        }

        let current = self.version.current();
        let policy = *cache.policy();
        let mut waiting = Vec::new();

        while self.in_flight.len() < self.batch_size {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            if job.version != current {
                trace!("dropping stale job for page {}", job.page);
                continue;
            }
            let Some(object) = objects.get_mut(job.page) else {
                continue;
            };
            if object.has_quality(target_scale, &policy) {
                continue;
            }
            if let Some(hit) = cache.get(job.page, target_scale) {
                object.apply(hit, target_scale, &policy);
                report.applied_from_cache.push(job.page);
                continue;
            }
            if cache.pending(job.page).is_some() {
                // an older render or a prefetch owns this page; retry once it lands
                waiting.push(job);
                continue;
            }
            cache.fetch(job.page, target_scale, sink, Some(job.version));
            self.in_flight.insert(job.page, job.version);
            report.fetched.push(job.page);
        }
        for job in waiting.into_iter().rev() {
            self.queue.push_front(job);
        }

        if !report.fetched.is_empty() {
            debug!("render batch v{current}: {:?}", report.fetched);
        }
        report
    }

    /// Feed a worker response through the cache and, if its render is still
    /// current, onto the page object
    pub fn on_response(
        &mut self,
        response: &FetchResponse,
        cache: &mut ImageCache,
        objects: &mut Virtualizer,
        target_scale: f64,
    ) {
        let page = response.page();
        self.prefetch_in_flight.remove(&page);
        let stored = cache.complete(response);
        let policy = *cache.policy();

        let Some(version) = self.in_flight.remove(&page) else {
            return;
        };
        if !self.version.is_current(Some(version)) {
            trace!("discarding stale render of page {page} (v{version})");
            return;
        }
        match (response, stored) {
            (FetchResponse::Fetched { .. }, Some(image)) => {
                if let Some(object) = objects.get_mut(page) {
                    object.apply(image, target_scale, &policy);
                }
            }
            _ => {
                // failure or abort: keep whatever the page shows now
            }
        }
    }

    /// Warm the cache for `pages` at low priority. Only runs while no
    /// visible-page work is pending.
    pub fn prefetch(
        &mut self,
        pages: &[usize],
        cache: &mut ImageCache,
        sink: &mut dyn FetchSink,
        target_scale: f64,
    ) -> Vec<usize> {
        let mut started = Vec::new();
        if !self.is_idle() {
            return started;
        }
        for &page in pages {
            if self.prefetch_in_flight.len() >= self.prefetch_batch_size {
                break;
            }
            if cache.is_satisfied(page, target_scale) || cache.pending(page).is_some() {
                continue;
            }
            cache.fetch(page, target_scale, sink, None);
            self.prefetch_in_flight.insert(page);
            started.push(page);
        }
        if !started.is_empty() {
            trace!("prefetching {started:?}");
        }
        started
    }

    /// Stop waiting on `page` so a late response never reaches its object
    pub fn forget(&mut self, page: usize) {
        self.in_flight.remove(&page);
        self.prefetch_in_flight.remove(&page);
    }

    /// Forget all bookkeeping without bumping the version
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
        self.prefetch_in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QualityPolicy;
    use crate::camera::Camera;
    use crate::geometry::Size;
    use crate::layout::{DisplayMode, LayoutEngine, LayoutParams};
    use crate::provider::{ImageFormat, PageImage};
    use crate::render::request::RequestId;
    use crate::settings::ViewerSettings;
    use crate::virtualizer::VirtualizerConfig;
    use std::sync::Arc;

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

    struct Fixture {
        pipeline: RenderPipeline,
        cache: ImageCache,
        sink: RecordingSink,
        objects: Virtualizer,
        order: Vec<usize>,
    }

    fn fixture(batch: usize) -> Fixture {
        let settings = ViewerSettings::default();
        let layout = LayoutEngine::uniform(LayoutParams::from_settings(&settings), 40)
            .compute(DisplayMode::Canvas, 8);
        let mut objects = Virtualizer::new(VirtualizerConfig {
            create_buffer: 200.0,
            keep_buffer: 500.0,
        });
        let update = objects.update(Camera::default(), Size::new(1600.0, 1200.0), &layout);
        let mut pipeline = RenderPipeline::new(RenderVersion::new(), batch, 2);
        pipeline.invalidate();
        Fixture {
            pipeline,
            cache: ImageCache::new(50, QualityPolicy::from_settings(&settings)),
            sink: RecordingSink::default(),
            objects,
            order: update.render_order,
        }
    }

    fn fetched(id: u64, page: usize, scale: f64) -> FetchResponse {
        FetchResponse::Fetched {
            id: RequestId::new(id),
            page,
            scale,
            image: Arc::new(PageImage {
                bytes: vec![0],
                format: ImageFormat::Png,
                width_px: 1,
                height_px: 1,
            }),
            text: None,
        }
    }

    #[test]
    fn batches_are_sequential() {
        let mut f = fixture(2);
        assert!(f.order.len() > 2);
        f.pipeline.enqueue(&f.order);

        let first = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert_eq!(first.fetched, f.order[..2].to_vec());

        // still waiting on the first batch
        let again = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert!(again.fetched.is_empty());

        for (i, page) in first.fetched.iter().enumerate() {
            let r = fetched(i as u64 + 1, *page, 1.5);
            f.pipeline.on_response(&r, &mut f.cache, &mut f.objects, 1.0);
        }
        let second = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert_eq!(second.fetched, f.order[2..4].to_vec());
    }

    #[test]
    fn stale_response_leaves_object_untouched() {
        let mut f = fixture(4);
        let page = f.order[0];
        f.pipeline.enqueue(&[page]);
        f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        let before = f.objects.get(page).cloned();

        f.pipeline.invalidate();
        f.pipeline.on_response(&fetched(1, page, 1.5), &mut f.cache, &mut f.objects, 1.0);

        assert_eq!(f.objects.get(page).cloned(), before);
        // the image itself is still a valid render of that page
        assert!(f.cache.contains(page));
    }

    #[test]
    fn current_response_is_applied() {
        let mut f = fixture(4);
        let page = f.order[0];
        f.pipeline.enqueue(&[page]);
        f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        f.pipeline.on_response(&fetched(1, page, 1.5), &mut f.cache, &mut f.objects, 1.0);

        let object = f.objects.get(page).unwrap();
        assert!(!object.loading);
        assert_eq!(object.rendered_scale(), Some(1.5));
        assert!(f.pipeline.is_idle());
    }

    #[test]
    fn new_cycle_waits_for_stale_fetch() {
        let mut f = fixture(4);
        let page = f.order[0];
        f.pipeline.enqueue(&[page]);
        f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);

        f.pipeline.invalidate();
        f.pipeline.enqueue(&[page]);
        let report = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 2.0);
        assert!(report.fetched.is_empty());
        assert!(!f.pipeline.is_idle());

        f.pipeline.on_response(&fetched(1, page, 1.5), &mut f.cache, &mut f.objects, 2.0);
        assert!(f.objects.get(page).unwrap().content.is_none());

        // 1.5 does not satisfy 2.0, so the new cycle fetches its own render
        let report = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 2.0);
        assert_eq!(report.fetched, vec![page]);
        let version = f.pipeline.version();
        assert_eq!(f.sink.submitted.last(), Some(&(page, 2.0, Some(version))));
    }

    #[test]
    fn cached_pages_skip_the_fetch() {
        let mut f = fixture(4);
        let page = f.order[0];
        if let FetchResponse::Fetched { image, .. } = fetched(99, page, 2.0) {
            f.cache.insert(page, 2.0, image, None);
        }
        f.pipeline.enqueue(&[page]);
        let report = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert_eq!(report.applied_from_cache, vec![page]);
        assert!(f.sink.submitted.is_empty());
    }

    #[test]
    fn prefetch_waits_for_visible_work() {
        let mut f = fixture(4);
        f.pipeline.enqueue(&f.order[..1]);
        f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        let started = f.pipeline.prefetch(&[30, 31], &mut f.cache, &mut f.sink, 1.0);
        assert!(started.is_empty());

        let first = fetched(1, f.order[0], 1.5);
        f.pipeline.on_response(&first, &mut f.cache, &mut f.objects, 1.0);
        let started = f.pipeline.prefetch(&[30, 31, 32], &mut f.cache, &mut f.sink, 1.0);
        assert_eq!(started, vec![30, 31]);
        assert!(f.sink.submitted.iter().any(|s| s == &(30, 1.5, None)));
    }

    #[test]
    fn forgotten_page_ignores_late_response() {
        let mut f = fixture(4);
        let page = f.order[0];
        f.pipeline.enqueue(&[page]);
        f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);

        f.cache.invalidate_page(page);
        f.pipeline.forget(page);
        f.pipeline.enqueue(&[page]);
        let report = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert!(report.fetched.is_empty());

        f.pipeline.on_response(&fetched(1, page, 1.5), &mut f.cache, &mut f.objects, 1.0);
        assert!(f.objects.get(page).unwrap().content.is_none());
        assert!(!f.cache.contains(page));

        let report = f.pipeline.pump(&mut f.cache, &mut f.sink, &mut f.objects, 1.0);
        assert_eq!(report.fetched, vec![page]);
        assert_eq!(f.sink.submitted.len(), 2);
    }
}
