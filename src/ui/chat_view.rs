//! Turns a [`FeedSnapshot`] into rows ready for display. Layout decisions
//! (alignment, labels, which affordances show) live here; drawing them is
//! up to the front end.

use crate::api::models::{Message, UserDirectory, UserProfile};
use crate::feed::links::{self, VideoIdExtractor, VideoIdStrategy};
use crate::feed::scroll::{ScrollAction, ScrollAnchorController, Viewport};
use crate::feed::store::{ChangeLog, FeedSnapshot, LoadPhase};
use crate::feed::time::format_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEmbed {
    pub source_url: String,
    /// `None` when the link was found but no id could be extracted from it.
    pub embed_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRow {
    pub message_id: String,
    pub align: Align,
    /// "name  time" for others, just the time for own messages.
    pub label: String,
    pub avatar_url: Option<String>,
    pub text: Option<String>,
    pub images: Vec<String>,
    pub video: Option<VideoEmbed>,
    pub show_undo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Loading,
    Failed(String),
    Empty,
    LoadingMore,
    /// Older history could not be loaded; the list itself is intact.
    LoadMoreFailed(String),
    HasMore,
    Exhausted,
}

impl FeedStatus {
    pub fn label(&self) -> String {
        match self {
            FeedStatus::Idle => String::new(),
            FeedStatus::Loading | FeedStatus::LoadingMore => "loading...".to_string(),
            FeedStatus::Failed(e) => format!("Could not load messages ({e}), /retry to try again"),
            FeedStatus::Empty => "No messages".to_string(),
            FeedStatus::LoadMoreFailed(e) => format!("Could not load older messages ({e})"),
            FeedStatus::HasMore => "scroll up for more".to_string(),
            FeedStatus::Exhausted => "No more messages".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub status: FeedStatus,
    pub rows: Vec<FeedRow>,
}

impl FeedView {
    /// Message rows as terminal lines, without the status line.
    pub fn row_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for row in &self.rows {
            let indent = match row.align {
                Align::Start => "",
                Align::End => "                    ",
            };
            out.push(format!("{indent}[{}]", row.label));
            for image in &row.images {
                out.push(format!("{indent}  <image {image}>"));
            }
            if let Some(video) = &row.video {
                let target = video.embed_url.as_deref().unwrap_or(&video.source_url);
                out.push(format!("{indent}  <video {target}>"));
            }
            if let Some(text) = &row.text {
                out.push(format!("{indent}  {text}"));
            }
            if row.show_undo {
                out.push(format!("{indent}  (/undo)"));
            }
        }
        out
    }

    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        let status = self.status.label();
        if !status.is_empty() {
            out.push_str(&format!("-- {status} --\n"));
        }
        for line in self.row_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

pub struct ChatView {
    me: UserProfile,
    directory: UserDirectory,
    video_ids: Box<dyn VideoIdExtractor>,
    scroll: ScrollAnchorController,
    drawn: ChangeLog,
}

impl ChatView {
    pub fn new(me: UserProfile, directory: UserDirectory) -> Self {
        Self::with_strategy(me, directory, VideoIdStrategy::default())
    }

    pub fn with_strategy(me: UserProfile, directory: UserDirectory, strategy: VideoIdStrategy) -> Self {
        Self {
            me,
            directory,
            video_ids: strategy.extractor(),
            scroll: ScrollAnchorController::default(),
            drawn: ChangeLog::default(),
        }
    }

    pub fn with_scroll(mut self, scroll: ScrollAnchorController) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut UserDirectory {
        &mut self.directory
    }

    pub fn render(&self, snapshot: &FeedSnapshot, now_ms: i64) -> FeedView {
        FeedView {
            status: Self::status(snapshot),
            rows: snapshot
                .messages
                .iter()
                .map(|m| self.row(m, snapshot.pending_undo.as_deref(), now_ms))
                .collect(),
        }
    }

    /// Geometry of the list before the next snapshot is laid out.
    pub fn capture_viewport(&mut self, before: Viewport) {
        self.scroll.capture(before);
    }

    /// Where the viewport goes once `snapshot` has been laid out at `after`.
    /// Folds in every transition since the last snapshot placed here, so
    /// snapshots the front end never drew still count.
    pub fn place(&mut self, snapshot: &FeedSnapshot, after: Viewport) -> ScrollAction {
        let changes = snapshot.changes.since(&self.drawn);
        self.drawn = snapshot.changes;
        self.scroll.resolve(changes, after)
    }

    fn status(snapshot: &FeedSnapshot) -> FeedStatus {
        let Some(phase) = snapshot.phase else {
            return FeedStatus::Idle;
        };
        match phase {
            LoadPhase::Loading => FeedStatus::Loading,
            LoadPhase::Failed => FeedStatus::Failed(
                snapshot.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            ),
            LoadPhase::Ready if snapshot.loading_more => FeedStatus::LoadingMore,
            LoadPhase::Ready => match &snapshot.last_error {
                Some(e) => FeedStatus::LoadMoreFailed(e.to_string()),
                None if snapshot.messages.is_empty() => FeedStatus::Empty,
                None if snapshot.has_more => FeedStatus::HasMore,
                None => FeedStatus::Exhausted,
            },
        }
    }

    fn row(&self, message: &Message, pending_undo: Option<&str>, now_ms: i64) -> FeedRow {
        let own = message.sender == self.me.id;
        let time = format_timestamp(message.created_at, now_ms);
        let text = message.text();
        let link = links::detect_video_link(text);
        let video = link.found.then(|| VideoEmbed {
            embed_url: self.video_ids.video_id(&link.url).map(|id| links::embed_url(&id)),
            source_url: link.url,
        });

        FeedRow {
            message_id: message.id.clone(),
            align: if own { Align::End } else { Align::Start },
            label: if own {
                time
            } else {
                format!("{}  {}", self.directory.display_name(&message.sender), time)
            },
            avatar_url: (!own).then(|| self.directory.avatar_url(&message.sender)),
            text: (!text.is_empty()).then(|| text.to_string()),
            images: message.attachments.clone(),
            video,
            show_undo: own && pending_undo == Some(message.id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;

    fn me() -> UserProfile {
        UserProfile {
            id: "me".into(),
            display_name: "Me".into(),
            avatar_url: None,
            primary_language: "en".into(),
        }
    }

    fn view() -> ChatView {
        ChatView::new(
            me(),
            UserDirectory::new([UserProfile {
                id: "ana".into(),
                display_name: "Ana".into(),
                avatar_url: None,
                primary_language: "es".into(),
            }]),
        )
    }

    fn ready(messages: Vec<Message>) -> FeedSnapshot {
        FeedSnapshot {
            conversation_id: Some("c1".into()),
            phase: Some(LoadPhase::Ready),
            messages,
            has_more: true,
            ..FeedSnapshot::default()
        }
    }

    #[test]
    fn own_and_other_rows_differ() {
        let now = 1_000_000;
        let snap = FeedSnapshot {
            pending_undo: Some("m2".into()),
            ..ready(vec![
                Message::new("m1", "c1", "ana", "hola", now - 1000),
                Message::new("m2", "c1", "me", "hi", now),
            ])
        };
        let rendered = view().render(&snap, now);
        let other = &rendered.rows[0];
        assert_eq!(other.align, Align::Start);
        assert!(other.label.starts_with("Ana  "));
        assert_eq!(other.avatar_url.as_deref(), Some("https://robohash.org/ana"));
        assert!(!other.show_undo);

        let own = &rendered.rows[1];
        assert_eq!(own.align, Align::End);
        assert_eq!(own.avatar_url, None);
        assert!(own.show_undo);
        assert_eq!(rendered.status, FeedStatus::HasMore);
    }

    #[test]
    fn video_links_become_embeds() {
        let snap = ready(vec![
            Message::new("m1", "c1", "ana", "https://www.youtube.com/watch?v=abc", 0),
            Message::new("m2", "c1", "ana", "check this https://youtu.be/abc123", 0),
        ]);
        let rows = view().render(&snap, 0).rows;
        assert_eq!(
            rows[0].video.as_ref().unwrap().embed_url.as_deref(),
            Some("https://www.youtube.com/embed/abc")
        );
        let short = rows[1].video.as_ref().unwrap();
        assert_eq!(short.source_url, "https://youtu.be/abc123");
        assert_eq!(short.embed_url, None);
    }

    #[test]
    fn path_strategy_embeds_short_links() {
        let view = ChatView::with_strategy(me(), UserDirectory::default(), VideoIdStrategy::Path);
        let snap = ready(vec![Message::new("m1", "c1", "ana", "https://youtu.be/abc123", 0)]);
        let row = &view.render(&snap, 0).rows[0];
        assert_eq!(
            row.video.as_ref().unwrap().embed_url.as_deref(),
            Some("https://www.youtube.com/embed/abc123")
        );
    }

    #[test]
    fn image_only_message_has_no_text() {
        let mut m = Message::new("m1", "c1", "ana", "", 0).with_attachments(vec!["https://img/1".into()]);
        m.body = None;
        let row = &view().render(&ready(vec![m]), 0).rows[0];
        assert_eq!(row.text, None);
        assert_eq!(row.images, vec!["https://img/1".to_string()]);
    }

    #[test]
    fn status_follows_store_state() {
        let mut snap = ready(Vec::new());
        assert_eq!(ChatView::status(&snap), FeedStatus::Empty);

        snap.messages = vec![Message::new("m1", "c1", "ana", "x", 0)];
        snap.has_more = false;
        assert_eq!(ChatView::status(&snap), FeedStatus::Exhausted);
        assert_eq!(ChatView::status(&snap).label(), "No more messages");

        snap.loading_more = true;
        assert_eq!(ChatView::status(&snap), FeedStatus::LoadingMore);

        snap.phase = Some(LoadPhase::Failed);
        snap.last_error = Some(FeedError::FetchFailure("down".into()));
        assert_eq!(ChatView::status(&snap), FeedStatus::Failed("fetch failed: down".into()));

        assert_eq!(ChatView::status(&FeedSnapshot::default()), FeedStatus::Idle);
    }

    #[test]
    fn prepends_in_skipped_snapshots_still_anchor() {
        let mut store = crate::feed::MessageStore::new("me", "en", 2);
        let ticket = store.open("c1");
        let newest = vec![
            Message::new("m4", "c1", "ana", "d", 4),
            Message::new("m3", "c1", "ana", "c", 3),
        ];
        store.on_initial_load(&ticket, Ok(newest)).unwrap();
        let mut view = view();
        view.capture_viewport(Viewport::new(0.0, 0.0, 400.0));
        assert_eq!(
            view.place(&store.snapshot(), Viewport::new(0.0, 200.0, 400.0)),
            ScrollAction::ScrollToBottom
        );

        // an older page lands and the next request goes out before anything is drawn
        let older = store.request_load_more().unwrap();
        let page = vec![
            Message::new("m2", "c1", "ana", "b", 2),
            Message::new("m1", "c1", "ana", "a", 1),
        ];
        store.on_load_more(&older, Ok(page)).unwrap();
        store.request_load_more().unwrap();

        view.capture_viewport(Viewport::new(0.0, 200.0, 100.0));
        assert_eq!(
            view.place(&store.snapshot(), Viewport::new(0.0, 400.0, 100.0)),
            ScrollAction::RestoreTo(200.0)
        );
    }

    #[test]
    fn plain_text_lists_rows() {
        let snap = ready(vec![Message::new("m1", "c1", "ana", "hola", 0)]);
        let text = view().render(&snap, 0).to_plain_text();
        assert!(text.contains("hola"));
        assert!(text.contains("-- scroll up for more --"));
    }
}
