//! Which off-screen pages to warm next
//!
//! Grid modes expand outward from the focus page in square rings. Linear
//! modes leave the choice to the provider and only tell it where the reader is.

use std::collections::HashSet;

use log::{trace, warn};

use crate::layout::DisplayMode;
use crate::provider::PageProvider;

/// One page picked for prefetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefetchTarget {
    pub page: usize,
    /// Chebyshev distance from the focus cell
    pub ring: usize,
    /// Higher runs first
    pub priority: u8,
}

/// Outermost ring whose priority is still below the ring before it
pub const MAX_PREFETCH_RADIUS: usize = 4;

/// Priority for a ring: 100 at the centre, 20 less per ring, never below 20
#[must_use]
pub fn ring_priority(ring: usize) -> u8 {
    let p = 100usize.saturating_sub(ring.saturating_mul(20)).max(20);
    p as u8
}

/// Pages around `center` in a grid of `columns`, ring by ring up to `radius`.
/// Cells outside the grid or in `exclude` are skipped.
#[must_use]
pub fn ripple(
    center: usize,
    columns: usize,
    page_count: usize,
    radius: usize,
    exclude: &HashSet<usize>,
) -> Vec<PrefetchTarget> {
    if center == 0 || center > page_count || columns == 0 {
        return Vec::new();
    }
    let columns = columns as i64;
    let idx = (center - 1) as i64;
    let (row, col) = (idx / columns, idx % columns);
    let mut out = Vec::new();

    for ring in 0..=radius {
        let r = ring as i64;
        for dr in -r..=r {
            for dc in -r..=r {
                if dr.abs().max(dc.abs()) != r {
                    continue;
                }
                let (rr, cc) = (row + dr, col + dc);
                if rr < 0 || cc < 0 || cc >= columns {
                    continue;
                }
                let page = (rr * columns + cc + 1) as usize;
                if page > page_count || exclude.contains(&page) {
                    continue;
                }
                out.push(PrefetchTarget {
                    page,
                    ring,
                    priority: ring_priority(ring),
                });
            }
        }
    }
    out
}

/// Tracks what was last hinted so repeated refreshes stay quiet
#[derive(Debug, Default)]
pub struct Prefetcher {
    radius: usize,
    last_notified: Option<usize>,
    last_hint: Vec<usize>,
}

impl Prefetcher {
    #[must_use]
    pub fn new(radius: usize) -> Self {
        Self {
            radius: radius.min(MAX_PREFETCH_RADIUS),
            ..Self::default()
        }
    }

    /// Hint the provider and return the pages the cache should warm,
    /// highest priority first
    pub fn run(
        &mut self,
        mode: DisplayMode,
        current_page: usize,
        columns: usize,
        page_count: usize,
        visible: &[usize],
        provider: &dyn PageProvider,
    ) -> Vec<usize> {
        if !mode.is_spatial() {
            if self.last_notified != Some(current_page) {
                trace!("notifying provider of page {current_page}");
                provider.notify_page_change(current_page);
                self.last_notified = Some(current_page);
            }
            return Vec::new();
        }

        let exclude: HashSet<usize> = visible.iter().copied().collect();
        let targets = ripple(current_page, columns, page_count, self.radius, &exclude);
        let pages: Vec<usize> = targets.iter().map(|t| t.page).collect();

        if !pages.is_empty() && pages != self.last_hint {
            if let Err(e) = provider.prefetch_pages(&pages) {
                warn!("Prefetch hint for {} pages failed: {e}", pages.len());
            }
            self.last_hint.clone_from(&pages);
        }
        pages
    }

    /// Forget hint history, e.g. after a new document or mode
    pub fn reset(&mut self) {
        self.last_notified = None;
        self.last_hint.clear();
    }
}
