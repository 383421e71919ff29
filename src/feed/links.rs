//! Video link detection for message bodies.
//!
//! Detection and id extraction are separate steps. The default extractor
//! takes whatever follows the first `=` of the matched URL, which is only
//! right for the `watch?v=` form; short links are detected but yield no id.
//! `PathAware` reads the id from the URL itself and can be swapped in through
//! [`VideoIdStrategy`] without touching callers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VIDEO_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?youtu(?:be\.com/watch\?v=|\.be/)([\w-]*)(&(?:amp;)?[\w?=]*)?")
        .expect("video link regex is valid")
});

const EMBED_BASE: &str = "https://www.youtube.com/embed/";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoLink {
    pub found: bool,
    pub url: String,
}

/// First recognised video URL in `text`, if any.
pub fn detect_video_link(text: &str) -> VideoLink {
    match VIDEO_LINK.find(text) {
        Some(m) => VideoLink {
            found: true,
            url: m.as_str().to_string(),
        },
        None => VideoLink::default(),
    }
}

pub trait VideoIdExtractor: Send + Sync {
    fn video_id(&self, url: &str) -> Option<String>;
}

/// Substring between the first and second `=` of the link.
pub struct QueryDelimited;

impl VideoIdExtractor for QueryDelimited {
    fn video_id(&self, url: &str) -> Option<String> {
        url.split('=').nth(1).map(str::to_string)
    }
}

/// Id taken from the `v=` parameter or the short-link path segment.
pub struct PathAware;

impl VideoIdExtractor for PathAware {
    fn video_id(&self, url: &str) -> Option<String> {
        VIDEO_LINK
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoIdStrategy {
    #[default]
    Query,
    Path,
}

impl VideoIdStrategy {
    pub fn extractor(self) -> Box<dyn VideoIdExtractor> {
        match self {
            VideoIdStrategy::Query => Box::new(QueryDelimited),
            VideoIdStrategy::Path => Box::new(PathAware),
        }
    }
}

pub fn embed_url(video_id: &str) -> String {
    format!("{EMBED_BASE}{video_id}")
}
