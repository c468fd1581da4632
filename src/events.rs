//! Outbound viewer events
//!
//! Hosts subscribe with a filter and drain a `flume` receiver. Each matching
//! subscriber gets its own copy of every event.

use flume::{Receiver, Sender};
use log::trace;

use crate::layout::DisplayMode;

#[derive(Clone, Debug, PartialEq)]
pub enum ViewerEvent {
    PageChanged { page: usize, page_count: usize },
    ZoomChanged { zoom: f64 },
    DisplayModeChanged { mode: DisplayMode },
    /// Forwarded from the text-selection overlay
    TextSelected { page: usize, text: String },
    /// Forwarded from the highlight overlay
    HighlightClicked { page: usize, highlight_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PageChanged,
    ZoomChanged,
    DisplayModeChanged,
    TextSelected,
    HighlightClicked,
}

impl ViewerEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ViewerEvent::PageChanged { .. } => EventKind::PageChanged,
            ViewerEvent::ZoomChanged { .. } => EventKind::ZoomChanged,
            ViewerEvent::DisplayModeChanged { .. } => EventKind::DisplayModeChanged,
            ViewerEvent::TextSelected { .. } => EventKind::TextSelected,
            ViewerEvent::HighlightClicked { .. } => EventKind::HighlightClicked,
        }
    }
}

/// Which event kinds a subscriber wants; `None` means all
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter(Option<Vec<EventKind>>);

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn only(kinds: &[EventKind]) -> Self {
        Self(Some(kinds.to_vec()))
    }

    #[must_use]
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.0.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

struct Subscriber {
    filter: EventFilter,
    tx: Sender<ViewerEvent>,
}

#[derive(Default)]
pub struct EventHub {
    subscribers: Vec<Subscriber>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> Receiver<ViewerEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(Subscriber { filter, tx });
        rx
    }

    /// Deliver to every matching subscriber; drops subscribers whose
    /// receiver is gone
    pub fn emit(&mut self, event: ViewerEvent) {
        trace!("event {event:?}");
        let kind = event.kind();
        self.subscribers.retain(|sub| {
            if !sub.filter.accepts(kind) {
                return !sub.tx.is_disconnected();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_fan_out() {
        let mut hub = EventHub::new();
        let all = hub.subscribe(EventFilter::all());
        let zoom_only = hub.subscribe(EventFilter::only(&[EventKind::ZoomChanged]));

        hub.emit(ViewerEvent::PageChanged {
            page: 2,
            page_count: 9,
        });
        hub.emit(ViewerEvent::ZoomChanged { zoom: 1.5 });

        assert_eq!(all.drain().count(), 2);
        let got: Vec<_> = zoom_only.drain().collect();
        assert_eq!(got, vec![ViewerEvent::ZoomChanged { zoom: 1.5 }]);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut hub = EventHub::new();
        let keep = hub.subscribe(EventFilter::all());
        drop(hub.subscribe(EventFilter::all()));
        hub.emit(ViewerEvent::ZoomChanged { zoom: 2.0 });
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(keep.len(), 1);
    }
}
