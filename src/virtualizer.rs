//! Visibility-driven page object lifecycle
//!
//! Objects are created for pages inside the viewport plus a small buffer and
//! destroyed only once outside a larger keep buffer, so a camera hovering near
//! a page edge does not create and destroy the same page every frame.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::trace;

use crate::cache::{CachedImage, QualityPolicy};
use crate::camera::Camera;
use crate::geometry::{Point, Rect, Size};
use crate::layout::Layout;

/// Live representation of one materialised page
#[derive(Clone, Debug, PartialEq)]
pub struct PageObject {
    pub page: usize,
    /// Canvas rectangle, follows the current layout
    pub rect: Rect,
    pub content: Option<Arc<CachedImage>>,
    /// True until an image at the required quality has been applied
    pub loading: bool,
}

impl PageObject {
    #[must_use]
    pub fn new(page: usize, rect: Rect) -> Self {
        Self {
            page,
            rect,
            content: None,
            loading: true,
        }
    }

    #[must_use]
    pub fn rendered_scale(&self) -> Option<f64> {
        self.content.as_ref().map(|c| c.scale)
    }

    /// Whether the current image is good enough for `target_scale`
    #[must_use]
    pub fn has_quality(&self, target_scale: f64, policy: &QualityPolicy) -> bool {
        self.rendered_scale()
            .is_some_and(|s| policy.satisfies(s, target_scale))
    }

    /// Show `image`. A sharper image already on screen is kept.
    pub fn apply(&mut self, image: Arc<CachedImage>, target_scale: f64, policy: &QualityPolicy) {
        if self.rendered_scale().is_some_and(|s| s > image.scale) {
            return;
        }
        self.loading = !policy.satisfies(image.scale, target_scale);
        self.content = Some(image);
    }
}

/// Buffers in canvas units at 100% zoom; divided by zoom so they stay
/// constant in screen pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VirtualizerConfig {
    pub create_buffer: f64,
    pub keep_buffer: f64,
}

/// Outcome of one visibility pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityUpdate {
    pub created: Vec<usize>,
    pub destroyed: Vec<usize>,
    /// Pages inside the create region, nearest to the viewport centre first
    pub render_order: Vec<usize>,
}

pub struct Virtualizer {
    config: VirtualizerConfig,
    objects: BTreeMap<usize, PageObject>,
}

impl Virtualizer {
    #[must_use]
    pub fn new(config: VirtualizerConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
        }
    }

    /// Recompute the visible set and create/destroy objects to match
    pub fn update(&mut self, camera: Camera, viewport: Size, layout: &Layout) -> VisibilityUpdate {
        let visible = camera.visible_bounds(viewport);
        let create_region = visible.expand(self.config.create_buffer / camera.z);
        let keep_region = visible.expand(self.config.keep_buffer / camera.z);

        let mut update = VisibilityUpdate::default();

        self.objects.retain(|&page, _| {
            let keep = layout
                .page(page)
                .is_some_and(|l| l.rect().intersects(&keep_region));
            if !keep {
                trace!("destroying page object {page}");
                update.destroyed.push(page);
            }
            keep
        });

        let center = Point::new(viewport.width / 2.0, viewport.height / 2.0);
        let mut in_view: Vec<(f64, usize)> = Vec::new();

        for l in &layout.pages {
            let rect = l.rect();
            if !rect.intersects(&create_region) {
                continue;
            }
            self.objects.entry(l.page).or_insert_with(|| {
                trace!("creating page object {}", l.page);
                update.created.push(l.page);
                PageObject::new(l.page, rect)
            });
            let distance = camera.canvas_to_screen(rect.center()).distance_to(center);
            in_view.push((distance, l.page));
        }

        in_view.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        update.render_order = in_view.into_iter().map(|(_, page)| page).collect();
        update
    }

    /// Move existing objects to their positions in a new layout
    pub fn sync_layout(&mut self, layout: &Layout) {
        self.objects.retain(|&page, object| match layout.page(page) {
            Some(l) => {
                object.rect = l.rect();
                true
            }
            None => false,
        });
    }

    /// Destroy every object
    pub fn reset(&mut self) -> Vec<usize> {
        let pages = self.objects.keys().copied().collect();
        self.objects.clear();
        pages
    }

    #[must_use]
    pub fn get(&self, page: usize) -> Option<&PageObject> {
        self.objects.get(&page)
    }

    pub fn get_mut(&mut self, page: usize) -> Option<&mut PageObject> {
        self.objects.get_mut(&page)
    }

    /// Pages with a live object, ascending
    #[must_use]
    pub fn pages(&self) -> Vec<usize> {
        self.objects.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DisplayMode, LayoutEngine, LayoutParams};
    use crate::provider::{ImageFormat, PageImage};
    use crate::settings::ViewerSettings;

    fn layout(pages: usize) -> Layout {
        let params = LayoutParams::from_settings(&ViewerSettings::default());
        LayoutEngine::uniform(params, pages).compute(DisplayMode::VerticalScroll, 1)
    }

    fn virtualizer() -> Virtualizer {
        Virtualizer::new(VirtualizerConfig {
            create_buffer: 200.0,
            keep_buffer: 500.0,
        })
    }

    fn viewport() -> Size {
        Size::new(400.0, 600.0)
    }

    #[test]
    fn creates_only_nearby_pages() {
        let layout = layout(100);
        let mut v = virtualizer();
        let update = v.update(Camera::default(), viewport(), &layout);
        // viewport covers y 0..600, buffer extends to 800: pages 1 and 2
        assert_eq!(update.created, vec![1, 2]);
        assert_eq!(v.len(), 2);
        assert_eq!(update.render_order[0], 1);
    }

    #[test]
    fn hysteresis_keeps_recently_visible_pages() {
        let layout = layout(100);
        let mut v = virtualizer();
        v.update(Camera::default(), viewport(), &layout);

        // move down so page 1 leaves the create region but stays in keep region
        let cam = Camera::new(0.0, -800.0, 1.0);
        let update = v.update(cam, viewport(), &layout);
        assert!(update.destroyed.is_empty());
        assert!(v.get(1).is_some());
        assert!(!update.render_order.contains(&1));

        // far away: page 1 goes
        let cam = Camera::new(0.0, -5000.0, 1.0);
        let update = v.update(cam, viewport(), &layout);
        assert!(update.destroyed.contains(&1));
        assert!(v.get(1).is_none());
    }

    #[test]
    fn buffer_is_constant_in_screen_pixels() {
        let layout = layout(100);
        let mut v = virtualizer();
        // at 4x zoom the create buffer is 50 canvas units
        let update = v.update(Camera::new(0.0, 0.0, 4.0), viewport(), &layout);
        assert_eq!(update.created, vec![1]);
    }

    #[test]
    fn render_order_is_nearest_first() {
        let layout = layout(100);
        let mut v = virtualizer();
        let cam = Camera::new(0.0, -1000.0, 1.0);
        let update = v.update(cam, viewport(), &layout);
        let first = update.render_order[0];
        let l = layout.page(first).unwrap();
        let center = cam.screen_to_canvas(Point::new(200.0, 300.0));
        assert!(l.rect().contains(center));
    }

    #[test]
    fn sharper_image_is_not_downgraded() {
        let policy = QualityPolicy::from_settings(&ViewerSettings::default());
        let img = |scale| {
            Arc::new(CachedImage {
                page: 1,
                scale,
                image: Arc::new(PageImage {
                    bytes: vec![],
                    format: ImageFormat::Png,
                    width_px: 1,
                    height_px: 1,
                }),
                text: None,
            })
        };
        let mut object = PageObject::new(1, Rect::default());
        object.apply(img(3.0), 2.0, &policy);
        assert!(!object.loading);
        object.apply(img(1.5), 2.0, &policy);
        assert_eq!(object.rendered_scale(), Some(3.0));

        let mut placeholder = PageObject::new(2, Rect::default());
        placeholder.apply(img(1.0), 3.0, &policy);
        assert!(placeholder.loading);
    }
}
