//! Page-data provider contract
//!
//! The provider produces page pixels and text geometry. It lives outside this
//! crate; calls are made from background worker threads, so implementations
//! must be `Send + Sync`.

use std::io::Cursor;
use std::time::Duration;

use crate::geometry::Size;

/// Resolution of a page rendered at scale 1.0
pub const BASE_DPI: f64 = 72.0;

/// Encoded image format requested from the provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

/// Parameters for one page image
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageRequest {
    pub scale: f64,
    pub dpi: u32,
    pub format: ImageFormat,
}

impl ImageRequest {
    #[must_use]
    pub fn new(scale: f64, format: ImageFormat) -> Self {
        Self {
            scale,
            dpi: (BASE_DPI * scale).round().max(1.0) as u32,
            format,
        }
    }
}

/// Encoded page image as returned by the provider
#[derive(Clone, PartialEq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width_px: u32,
    pub height_px: u32,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("format", &self.format)
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// One line of selectable text, in page units at scale 1.0
#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub text: String,
}

/// Text geometry for a page, consumed by the selection overlay
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextLayer {
    pub lines: Vec<TextLine>,
}

/// Errors reported by a page provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("page {page} unavailable: {detail}")]
    Unavailable { page: usize, detail: String },

    #[error("{detail}")]
    Generic { detail: String },
}

impl ProviderError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    pub fn unavailable(page: usize, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            page,
            detail: msg.into(),
        }
    }
}

/// Source of page images and text geometry
pub trait PageProvider: Send + Sync {
    /// Render `page` (1-based) at the requested scale. Must accept repeated
    /// requests for the same page at any scale.
    fn page_image(&self, page: usize, request: &ImageRequest) -> Result<PageImage, ProviderError>;

    /// Text geometry for `page`. Failures never block page display.
    fn page_text_layer(&self, _page: usize) -> Result<Option<TextLayer>, ProviderError> {
        Ok(None)
    }

    /// Hint that the reader moved to `page`; linear modes delegate prefetch here
    fn notify_page_change(&self, _page: usize) {}

    /// Hint that `pages` are likely to become visible soon
    fn prefetch_pages(&self, _pages: &[usize]) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Provider that paints each page a flat colour and encodes it as PNG.
/// Used by the headless runner.
#[derive(Clone, Debug)]
pub struct SyntheticProvider {
    page_size: Size,
    page_count: usize,
    latency: Duration,
}

impl SyntheticProvider {
    #[must_use]
    pub fn new(page_count: usize, page_size: Size) -> Self {
        Self {
            page_size,
            page_count,
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long before every image, to mimic a slow backend
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn page_color(page: usize) -> image::Rgb<u8> {
        let shade = 200 + (page * 7 % 55) as u8;
        image::Rgb([shade, shade, 255 - (page * 13 % 40) as u8])
    }
}

impl PageProvider for SyntheticProvider {
    fn page_image(&self, page: usize, request: &ImageRequest) -> Result<PageImage, ProviderError> {
        if page == 0 || page > self.page_count {
            return Err(ProviderError::unavailable(page, "no such page"));
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let width_px = (self.page_size.width * request.scale).round().max(1.0) as u32;
        let height_px = (self.page_size.height * request.scale).round().max(1.0) as u32;
        let img = image::RgbImage::from_pixel(width_px, height_px, Self::page_color(page));

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| ProviderError::generic(format!("PNG encode failed: {e}")))?;

        Ok(PageImage {
            bytes,
            format: ImageFormat::Png,
            width_px,
            height_px,
        })
    }

    fn page_text_layer(&self, page: usize) -> Result<Option<TextLayer>, ProviderError> {
        Ok(Some(TextLayer {
            lines: vec![TextLine {
                x0: 20.0,
                y0: 20.0,
                x1: self.page_size.width - 20.0,
                y1: 40.0,
                text: format!("Page {page}"),
            }],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_dpi_tracks_scale() {
        assert_eq!(ImageRequest::new(1.0, ImageFormat::Png).dpi, 72);
        assert_eq!(ImageRequest::new(1.5, ImageFormat::Png).dpi, 108);
    }

    #[test]
    fn synthetic_provider_encodes_png() {
        let provider = SyntheticProvider::new(3, Size::new(40.0, 50.0));
        let image = provider
            .page_image(2, &ImageRequest::new(2.0, ImageFormat::Png))
            .unwrap();
        assert_eq!((image.width_px, image.height_px), (80, 100));
        assert_eq!(&image.bytes[1..4], b"PNG");
    }

    #[test]
    fn synthetic_provider_rejects_out_of_range() {
        let provider = SyntheticProvider::new(3, Size::new(40.0, 50.0));
        let err = provider
            .page_image(4, &ImageRequest::new(1.0, ImageFormat::Png))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { page: 4, .. }));
    }
}
