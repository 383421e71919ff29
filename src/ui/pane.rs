//! Fixed-height window over the rendered rows for the terminal front end.
//! Geometry is kept in pixels, one line being [`LINE_PX`], so the same
//! scroll thresholds apply as in a graphical list.

use crate::feed::scroll::{ScrollAction, Viewport};

pub const LINE_PX: f64 = 16.0;

#[derive(Debug, Clone)]
pub struct TerminalPane {
    scroll_top: f64,
    content_height: f64,
    height: f64,
}

impl TerminalPane {
    pub fn new(visible_lines: usize) -> Self {
        Self {
            scroll_top: 0.0,
            content_height: 0.0,
            height: visible_lines.max(1) as f64 * LINE_PX,
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.scroll_top, self.content_height, self.height)
    }

    pub fn set_line_count(&mut self, lines: usize) {
        self.content_height = lines as f64 * LINE_PX;
        self.clamp();
    }

    pub fn apply(&mut self, action: ScrollAction) {
        match action {
            ScrollAction::Keep => {}
            ScrollAction::RestoreTo(top) => self.scroll_top = top,
            ScrollAction::ScrollToBottom => self.scroll_top = self.viewport().bottom(),
        }
        self.clamp();
    }

    /// Move by whole pages; negative is towards older messages.
    pub fn scroll_pages(&mut self, pages: i32) {
        self.scroll_top += f64::from(pages) * self.height;
        self.clamp();
    }

    pub fn at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }

    /// Lines of `lines` currently inside the window.
    pub fn window<'a>(&self, lines: &'a [String]) -> &'a [String] {
        let first = ((self.scroll_top / LINE_PX).round() as usize).min(lines.len());
        let count = (self.height / LINE_PX) as usize;
        &lines[first..(first + count).min(lines.len())]
    }

    fn clamp(&mut self) {
        self.scroll_top = self.scroll_top.clamp(0.0, self.viewport().bottom());
    }
}
