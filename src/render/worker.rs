//! Fetch workers - run provider calls in separate thread(s)

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use log::{debug, trace, warn};

use super::request::{FetchJob, FetchRequest, FetchResponse, FetchSink, RenderVersion, RequestId};
use crate::provider::{ImageFormat, ImageRequest, PageProvider};

/// Pool of worker threads pulling fetch jobs from one shared queue
pub struct FetchPool {
    request_tx: Sender<FetchRequest>,
    response_rx: Receiver<FetchResponse>,
    next_request_id: u64,
    num_workers: usize,
}

impl FetchPool {
    /// Spawn `num_workers` threads calling `provider`
    #[must_use]
    pub fn new(
        provider: Arc<dyn PageProvider>,
        num_workers: usize,
        version: RenderVersion,
        load_text_layer: bool,
    ) -> Self {
        // flume gives MPMC: every worker clones the one request receiver
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        for n in 0..num_workers.max(1) {
            let rx = request_rx.clone();
            let tx = response_tx.clone();
            let provider = Arc::clone(&provider);
            let version = version.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("page-fetch-{n}"))
                .spawn(move || {
                    fetch_worker(provider.as_ref(), &rx, &tx, &version, load_text_layer);
                });
            if let Err(e) = spawned {
                warn!("Failed to spawn fetch worker {n}: {e}");
            }
        }

        Self {
            request_tx,
            response_rx,
            next_request_id: 1,
            num_workers: num_workers.max(1),
        }
    }

    /// Non-blocking poll for one finished job
    #[must_use]
    pub fn try_recv(&self) -> Option<FetchResponse> {
        self.response_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for one finished job
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchResponse> {
        self.response_rx.recv_timeout(timeout).ok()
    }

    /// Stop all workers once they finish their current job
    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(FetchRequest::Shutdown);
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl FetchSink for FetchPool {
    fn submit(&mut self, page: usize, scale: f64, version: Option<u64>) -> RequestId {
        let id = self.next_id();
        let job = FetchJob {
            id,
            page,
            scale,
            version,
        };
        if self.request_tx.send(FetchRequest::Fetch(job)).is_err() {
            warn!("Fetch workers are gone, page {page} will not load");
        }
        id
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker loop: runs until `Shutdown` or until the pool is dropped
pub fn fetch_worker(
    provider: &dyn PageProvider,
    requests: &Receiver<FetchRequest>,
    responses: &Sender<FetchResponse>,
    version: &RenderVersion,
    load_text_layer: bool,
) {
    for request in requests.iter() {
        match request {
            FetchRequest::Fetch(job) => {
                let response = handle_fetch(provider, &job, version, load_text_layer);
                if responses.send(response).is_err() {
                    break;
                }
            }
            FetchRequest::Shutdown => break,
        }
    }
}

fn handle_fetch(
    provider: &dyn PageProvider,
    job: &FetchJob,
    version: &RenderVersion,
    load_text_layer: bool,
) -> FetchResponse {
    if !version.is_current(job.version) {
        trace!("page {} render v{:?} stale before fetch", job.page, job.version);
        return FetchResponse::Aborted {
            id: job.id,
            page: job.page,
            scale: job.scale,
            image: None,
        };
    }

    let request = ImageRequest::new(job.scale, ImageFormat::Png);
    let image = match provider.page_image(job.page, &request) {
        Ok(image) => Arc::new(image),
        Err(error) => {
            return FetchResponse::Failed {
                id: job.id,
                page: job.page,
                error,
            };
        }
    };

    if !load_text_layer {
        return FetchResponse::Fetched {
            id: job.id,
            page: job.page,
            scale: job.scale,
            image,
            text: None,
        };
    }

    if !version.is_current(job.version) {
        trace!("page {} render v{:?} stale before text", job.page, job.version);
        return FetchResponse::Aborted {
            id: job.id,
            page: job.page,
            scale: job.scale,
            image: Some(image),
        };
    }

    let text = match provider.page_text_layer(job.page) {
        Ok(text) => text.map(Arc::new),
        Err(e) => {
            debug!("Text layer for page {} unavailable: {e}", job.page);
            None
        }
    };

    FetchResponse::Fetched {
        id: job.id,
        page: job.page,
        scale: job.scale,
        image,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{PageImage, ProviderError, TextLayer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        images: AtomicUsize,
        fail_text: bool,
    }

    impl CountingProvider {
        fn new(fail_text: bool) -> Self {
            Self {
                images: AtomicUsize::new(0),
                fail_text,
            }
        }
    }

    impl PageProvider for CountingProvider {
        fn page_image(
            &self,
            page: usize,
            request: &ImageRequest,
        ) -> Result<PageImage, ProviderError> {
            self.images.fetch_add(1, Ordering::SeqCst);
            if page == 13 {
                return Err(ProviderError::unavailable(page, "unlucky"));
            }
            Ok(PageImage {
                bytes: vec![0; 4],
                format: request.format,
                width_px: 1,
                height_px: 1,
            })
        }

        fn page_text_layer(&self, _page: usize) -> Result<Option<TextLayer>, ProviderError> {
            if self.fail_text {
                Err(ProviderError::generic("no text"))
            } else {
                Ok(Some(TextLayer::default()))
            }
        }
    }

    fn job(page: usize, version: Option<u64>) -> FetchJob {
        FetchJob {
            id: RequestId::new(7),
            page,
            scale: 1.5,
            version,
        }
    }

    #[test]
    fn stale_job_never_calls_provider() {
        let provider = CountingProvider::new(false);
        let version = RenderVersion::new();
        let v = version.bump();
        version.bump();

        let response = handle_fetch(&provider, &job(1, Some(v)), &version, true);
        assert!(matches!(
            response,
            FetchResponse::Aborted { image: None, .. }
        ));
        assert_eq!(provider.images.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn text_failure_is_not_fatal() {
        let provider = CountingProvider::new(true);
        let version = RenderVersion::new();
        let response = handle_fetch(&provider, &job(2, None), &version, true);
        match response {
            FetchResponse::Fetched { text, page, .. } => {
                assert_eq!(page, 2);
                assert!(text.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_failure_is_reported() {
        let provider = CountingProvider::new(false);
        let version = RenderVersion::new();
        let response = handle_fetch(&provider, &job(13, None), &version, true);
        assert!(matches!(response, FetchResponse::Failed { page: 13, .. }));
    }

    #[test]
    fn pool_round_trip() {
        let version = RenderVersion::new();
        let mut pool = FetchPool::new(Arc::new(CountingProvider::new(false)), 2, version, true);
        let id = pool.submit(3, 2.0, None);
        let response = pool
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should answer");
        assert_eq!(response.id(), id);
        assert_eq!(response.page(), 3);
    }
}
