//! Page provider doubles shared by unit and integration tests

pub mod test_helpers {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use flume::{Receiver, Sender};

    use crate::provider::{ImageRequest, PageImage, PageProvider, ProviderError, TextLayer};

    fn blank_image(request: &ImageRequest) -> PageImage {
        PageImage {
            bytes: vec![0xAB; 16],
            format: request.format,
            width_px: (100.0 * request.scale).round() as u32,
            height_px: (130.0 * request.scale).round() as u32,
        }
    }

    /// Provider whose image calls block until the test hands out a permit
    pub struct GatedProvider {
        permits: Receiver<()>,
        started: Sender<(usize, f64)>,
        calls: AtomicUsize,
    }

    /// Test side of a [`GatedProvider`]
    pub struct Gate {
        permits: Sender<()>,
        started: Receiver<(usize, f64)>,
    }

    impl GatedProvider {
        pub fn new() -> (Self, Gate) {
            let (permit_tx, permit_rx) = flume::unbounded();
            let (started_tx, started_rx) = flume::unbounded();
            (
                Self {
                    permits: permit_rx,
                    started: started_tx,
                    calls: AtomicUsize::new(0),
                },
                Gate {
                    permits: permit_tx,
                    started: started_rx,
                },
            )
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Gate {
        /// Let `n` blocked (or future) image calls finish
        pub fn release(&self, n: usize) {
            for _ in 0..n {
                let _ = self.permits.send(());
            }
        }

        /// Wait for the next image call to start; returns its page and scale
        pub fn next_started(&self, timeout: Duration) -> Option<(usize, f64)> {
            self.started.recv_timeout(timeout).ok()
        }
    }

    impl PageProvider for GatedProvider {
        fn page_image(
            &self,
            page: usize,
            request: &ImageRequest,
        ) -> Result<PageImage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.started.send((page, request.scale));
            self.permits
                .recv()
                .map_err(|_| ProviderError::unavailable(page, "gate closed"))?;
            Ok(blank_image(request))
        }
    }

    /// Provider that answers at once and remembers every call
    #[derive(Default)]
    pub struct RecordingProvider {
        images: Mutex<Vec<(usize, f64)>>,
        notified: Mutex<Vec<usize>>,
        prefetched: Mutex<Vec<Vec<usize>>>,
        failing: HashSet<usize>,
        fail_text: bool,
    }

    impl RecordingProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Image calls for these pages fail
        pub fn failing_pages(mut self, pages: &[usize]) -> Self {
            self.failing = pages.iter().copied().collect();
            self
        }

        /// Every text layer call fails
        pub fn failing_text(mut self) -> Self {
            self.fail_text = true;
            self
        }

        pub fn image_calls(&self) -> Vec<(usize, f64)> {
            self.images
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn notified(&self) -> Vec<usize> {
            self.notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn prefetch_hints(&self) -> Vec<Vec<usize>> {
            self.prefetched
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl PageProvider for RecordingProvider {
        fn page_image(
            &self,
            page: usize,
            request: &ImageRequest,
        ) -> Result<PageImage, ProviderError> {
            self.images
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((page, request.scale));
            if self.failing.contains(&page) {
                return Err(ProviderError::unavailable(page, "render failed"));
            }
            Ok(blank_image(request))
        }

        fn page_text_layer(&self, _page: usize) -> Result<Option<TextLayer>, ProviderError> {
            if self.fail_text {
                Err(ProviderError::generic("text extraction failed"))
            } else {
                Ok(Some(TextLayer::default()))
            }
        }

        fn notify_page_change(&self, page: usize) {
            self.notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(page);
        }

        fn prefetch_pages(&self, pages: &[usize]) -> Result<(), ProviderError> {
            self.prefetched
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(pages.to_vec());
            Ok(())
        }
    }
}
