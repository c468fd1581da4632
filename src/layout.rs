//! Page placement on the virtual canvas
//!
//! Every display mode reduces to one of three arrangements: a column
//! (vertical scroll), a row (horizontal scroll) or a wrapped grid (paginated,
//! auto-grid, canvas). Layouts are computed in full and replaced in bulk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::geometry::{Point, Rect, Size};
use crate::settings::ViewerSettings;

/// Small bias so exact fits are not lost to floating point error
const FIT_EPSILON: f64 = 1e-9;

/// How pages are arranged and which camera motions are allowed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// Whole spreads that fit the viewport; camera is frozen
    Paginated,
    /// One row of pages, horizontal panning only
    HorizontalScroll,
    /// One column of pages, vertical panning only
    #[default]
    VerticalScroll,
    /// Grid whose column count follows the zoom level
    AutoGrid,
    /// Fixed grid with free two-axis panning
    Canvas,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 5] = [
        DisplayMode::Paginated,
        DisplayMode::HorizontalScroll,
        DisplayMode::VerticalScroll,
        DisplayMode::AutoGrid,
        DisplayMode::Canvas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Paginated => "paginated",
            DisplayMode::HorizontalScroll => "horizontal-scroll",
            DisplayMode::VerticalScroll => "vertical-scroll",
            DisplayMode::AutoGrid => "auto-grid",
            DisplayMode::Canvas => "canvas",
        }
    }

    /// Modes laid out as a 2D grid with ripple prefetch and double-click focus
    pub fn is_spatial(&self) -> bool {
        matches!(self, DisplayMode::AutoGrid | DisplayMode::Canvas)
    }

    pub fn pans_horizontally(&self) -> bool {
        matches!(self, DisplayMode::HorizontalScroll | DisplayMode::Canvas)
    }

    pub fn pans_vertically(&self) -> bool {
        matches!(
            self,
            DisplayMode::VerticalScroll | DisplayMode::AutoGrid | DisplayMode::Canvas
        )
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown display mode '{s}', expected one of: {}",
                    DisplayMode::ALL.map(|m| m.as_str()).join(", ")
                )
            })
    }
}

/// Fixed position and size of one page at 100% zoom
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageLayout {
    /// 1-based page number
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageLayout {
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Result of a full layout pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    pub mode: DisplayMode,
    /// Pages per row; 1 for vertical scroll, page count for horizontal scroll
    pub columns: usize,
    /// Indexed by `page - 1`
    pub pages: Vec<PageLayout>,
    pub bounds: Rect,
}

impl Layout {
    #[must_use]
    pub fn page(&self, page: usize) -> Option<&PageLayout> {
        page.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page whose rectangle contains the canvas point
    #[must_use]
    pub fn page_at(&self, p: Point) -> Option<usize> {
        self.pages
            .iter()
            .find(|l| l.rect().contains(p))
            .map(|l| l.page)
    }

    /// Page whose centre is closest to the canvas point
    #[must_use]
    pub fn nearest_page(&self, p: Point) -> Option<usize> {
        self.pages
            .iter()
            .min_by(|a, b| {
                let da = a.rect().center().distance_to(p);
                let db = b.rect().center().distance_to(p);
                da.total_cmp(&db)
            })
            .map(|l| l.page)
    }
}

/// Geometry inputs for layout
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutParams {
    pub base_page_width: f64,
    pub base_page_height: f64,
    pub page_gap: f64,
    pub viewport_padding: f64,
    pub canvas_pages_per_row: Option<usize>,
}

impl LayoutParams {
    #[must_use]
    pub fn from_settings(settings: &ViewerSettings) -> Self {
        Self {
            base_page_width: settings.base_page_width,
            base_page_height: settings.base_page_height,
            page_gap: settings.page_gap,
            viewport_padding: settings.viewport_padding,
            canvas_pages_per_row: settings.canvas_pages_per_row,
        }
    }
}

/// Zoom and grid shape for paginated mode
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaginatedFit {
    pub zoom: f64,
    pub columns: usize,
    pub rows: usize,
}

impl PaginatedFit {
    #[must_use]
    pub fn pages_per_view(&self) -> usize {
        (self.columns * self.rows).max(1)
    }
}

/// Computes page placement for a document
#[derive(Clone, Debug)]
pub struct LayoutEngine {
    params: LayoutParams,
    /// Normalised to `base_page_width`, indexed by `page - 1`
    sizes: Vec<Size>,
}

impl LayoutEngine {
    /// All pages share the base page size
    #[must_use]
    pub fn uniform(params: LayoutParams, page_count: usize) -> Self {
        let size = Size::new(params.base_page_width, params.base_page_height);
        Self {
            params,
            sizes: vec![size; page_count],
        }
    }

    /// Pages keep their aspect ratio; widths are normalised to the base width
    #[must_use]
    pub fn with_page_sizes(params: LayoutParams, sizes: &[Size]) -> Self {
        let base = Size::new(params.base_page_width, params.base_page_height);
        let sizes = sizes
            .iter()
            .map(|s| {
                if s.is_empty() || !s.width.is_finite() || !s.height.is_finite() {
                    base
                } else {
                    Size::new(base.width, base.width * s.height / s.width)
                }
            })
            .collect();
        Self { params, sizes }
    }

    #[must_use]
    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn widest(&self) -> f64 {
        self.sizes
            .iter()
            .map(|s| s.width)
            .fold(self.params.base_page_width, f64::max)
    }

    fn tallest(&self) -> f64 {
        self.sizes.iter().map(|s| s.height).fold(0.0, f64::max)
    }

    fn available(&self, viewport: Size) -> Size {
        Size::new(
            (viewport.width - 2.0 * self.params.viewport_padding).max(1.0),
            (viewport.height - 2.0 * self.params.viewport_padding).max(1.0),
        )
    }

    /// How many cells of `cell` canvas units (plus gap) fit in `avail` screen
    /// pixels at zoom `z`
    fn fitting_cells(&self, avail: f64, cell: f64, z: f64) -> usize {
        let gap = self.params.page_gap * z;
        let n = ((avail + gap) / (cell * z + gap) + FIT_EPSILON).floor();
        if n.is_finite() && n >= 1.0 {
            n as usize
        } else {
            1
        }
    }

    /// Column count for auto-grid at zoom `z`
    #[must_use]
    pub fn auto_grid_columns(&self, z: f64, viewport: Size) -> usize {
        let avail = self.available(viewport);
        self.fitting_cells(avail.width, self.widest(), z)
            .clamp(1, self.page_count().max(1))
    }

    /// Column count for canvas mode
    #[must_use]
    pub fn canvas_columns(&self) -> usize {
        let n = self.page_count().max(1);
        self.params
            .canvas_pages_per_row
            .unwrap_or_else(|| (n as f64).sqrt().ceil() as usize)
            .clamp(1, n)
    }

    /// Zoom that fits a whole page, and how many pages then fit in the view
    #[must_use]
    pub fn paginated_fit(&self, viewport: Size, min_zoom: f64, max_zoom: f64) -> PaginatedFit {
        let avail = self.available(viewport);
        let tallest = self.tallest().max(1.0);
        let zoom = crate::camera::clamp_zoom(
            (avail.height / tallest).min(avail.width / self.widest()),
            min_zoom,
            max_zoom,
        );
        let columns = self
            .fitting_cells(avail.width, self.widest(), zoom)
            .clamp(1, self.page_count().max(1));
        let rows = self.fitting_cells(avail.height, tallest, zoom).max(1);
        PaginatedFit {
            zoom,
            columns,
            rows,
        }
    }

    /// Smallest zoom that shows a full page edge to edge on the cross axis
    #[must_use]
    pub fn scroll_min_zoom(&self, mode: DisplayMode, viewport: Size) -> f64 {
        let avail = self.available(viewport);
        match mode {
            DisplayMode::HorizontalScroll => avail.height / self.tallest().max(1.0),
            _ => avail.width / self.widest(),
        }
    }

    /// Place every page for `mode` using `columns` for grid modes
    #[must_use]
    pub fn compute(&self, mode: DisplayMode, columns: usize) -> Layout {
        let (columns, pages) = match mode {
            DisplayMode::VerticalScroll => (1, self.column_layout()),
            DisplayMode::HorizontalScroll => (self.page_count().max(1), self.row_layout()),
            DisplayMode::Paginated | DisplayMode::AutoGrid | DisplayMode::Canvas => {
                let columns = columns.clamp(1, self.page_count().max(1));
                (columns, self.grid_layout(columns))
            }
        };

        let bounds = pages
            .iter()
            .map(PageLayout::rect)
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default();

        Layout {
            mode,
            columns,
            pages,
            bounds,
        }
    }

    fn column_layout(&self) -> Vec<PageLayout> {
        let width = self.widest();
        let mut y = 0.0;
        self.sizes
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let l = PageLayout {
                    page: i + 1,
                    x: (width - s.width) / 2.0,
                    y,
                    width: s.width,
                    height: s.height,
                };
                y += s.height + self.params.page_gap;
                l
            })
            .collect()
    }

    fn row_layout(&self) -> Vec<PageLayout> {
        let height = self.tallest();
        let mut x = 0.0;
        self.sizes
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let l = PageLayout {
                    page: i + 1,
                    x,
                    y: (height - s.height) / 2.0,
                    width: s.width,
                    height: s.height,
                };
                x += s.width + self.params.page_gap;
                l
            })
            .collect()
    }

    fn grid_layout(&self, columns: usize) -> Vec<PageLayout> {
        let cell_w = self.widest();
        let gap = self.params.page_gap;
        let mut pages = Vec::with_capacity(self.sizes.len());
        let mut y = 0.0;

        for (row, chunk) in self.sizes.chunks(columns).enumerate() {
            let row_height = chunk.iter().map(|s| s.height).fold(0.0, f64::max);
            for (col, s) in chunk.iter().enumerate() {
                pages.push(PageLayout {
                    page: row * columns + col + 1,
                    x: col as f64 * (cell_w + gap) + (cell_w - s.width) / 2.0,
                    y,
                    width: s.width,
                    height: s.height,
                });
            }
            y += row_height + gap;
        }
        pages
    }
}

/// A page-relative position recorded under a screen point, used to keep
/// content stationary across a relayout
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FocusAnchor {
    pub page: usize,
    /// Position inside the page, each axis in `[0, 1]`
    pub relative: Point,
    pub screen: Point,
}

impl FocusAnchor {
    /// Record the page under `screen`, or the nearest page's centre when the
    /// point falls between pages
    #[must_use]
    pub fn capture(layout: &Layout, camera: Camera, screen: Point) -> Option<Self> {
        let canvas = camera.screen_to_canvas(screen);
        if let Some(page) = layout.page_at(canvas) {
            let rect = layout.page(page)?.rect();
            let relative = Point::new(
                ((canvas.x - rect.x) / rect.width).clamp(0.0, 1.0),
                ((canvas.y - rect.y) / rect.height).clamp(0.0, 1.0),
            );
            return Some(Self {
                page,
                relative,
                screen,
            });
        }
        layout.nearest_page(canvas).map(|page| Self {
            page,
            relative: Point::new(0.5, 0.5),
            screen,
        })
    }

    /// Camera at the same zoom that puts the anchored position back under
    /// the recorded screen point
    #[must_use]
    pub fn restore(&self, layout: &Layout, camera: Camera) -> Camera {
        let Some(l) = layout.page(self.page) else {
            return camera;
        };
        let target = Point::new(
            l.x + self.relative.x * l.width,
            l.y + self.relative.y * l.height,
        );
        Camera {
            x: self.screen.x / camera.z - target.x,
            y: self.screen.y / camera.z - target.y,
            z: camera.z,
        }
    }
}
