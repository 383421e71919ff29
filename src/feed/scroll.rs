use crate::feed::store::FeedDelta;

pub const DEFAULT_NEAR_BOTTOM_PX: f64 = 48.0;

/// Scroll geometry of the feed container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// Distance between the bottom of the visible area and the end of the
    /// content.
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    fn offset_from_end(&self) -> f64 {
        self.scroll_height - self.scroll_top
    }

    pub fn bottom(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollAction {
    Keep,
    RestoreTo(f64),
    ScrollToBottom,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    offset_from_end: f64,
    at_bottom: bool,
}

/// Decides where the viewport goes after the feed changes. Call
/// [`capture`](Self::capture) with the geometry before a mutation is
/// applied and [`resolve`](Self::resolve) with the geometry after it.
#[derive(Debug, Clone)]
pub struct ScrollAnchorController {
    near_bottom_px: f64,
    anchor: Option<Anchor>,
}

impl Default for ScrollAnchorController {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_BOTTOM_PX)
    }
}

impl ScrollAnchorController {
    pub fn new(near_bottom_px: f64) -> Self {
        Self {
            near_bottom_px: near_bottom_px.max(0.0),
            anchor: None,
        }
    }

    pub fn capture(&mut self, before: Viewport) {
        self.anchor = Some(Anchor {
            offset_from_end: before.offset_from_end(),
            at_bottom: before.distance_from_bottom() <= self.near_bottom_px,
        });
    }

    /// `changes` may cover several store transitions; everything the
    /// renderer has not drawn yet must be folded into it.
    pub fn resolve(&mut self, changes: impl Into<FeedDelta>, after: Viewport) -> ScrollAction {
        let changes = changes.into();
        let anchor = self.anchor.take();
        if changes.reset {
            return ScrollAction::ScrollToBottom;
        }
        let Some(anchor) = anchor else {
            return ScrollAction::Keep;
        };
        let touched_end = changes.appended || changes.removed || changes.reprojected;
        if touched_end && anchor.at_bottom {
            ScrollAction::ScrollToBottom
        } else if changes.prepended > 0 {
            ScrollAction::RestoreTo((after.scroll_height - anchor.offset_from_end).max(0.0))
        } else {
            ScrollAction::Keep
        }
    }
}
