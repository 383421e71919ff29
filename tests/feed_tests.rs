use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatfeed::api::models::Message;
use chatfeed::feed::scroll::{ScrollAction, ScrollAnchorController, Viewport};
use chatfeed::feed::{Feed, FeedChange, FeedOptions, FeedSnapshot, LoadPhase, MessageSource, Retractor};
use chatfeed::{FeedError, FeedResult};

/// Serves fixed histories, newest first, with an optional per-conversation delay.
#[derive(Default)]
struct History {
    conversations: HashMap<String, Vec<Message>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    failing: Mutex<bool>,
}

impl History {
    fn with(mut self, conversation: &str, count: i64) -> Self {
        let messages = (0..count)
            .map(|i| {
                Message::new(format!("{conversation}-{i}"), conversation, "ana", format!("hola {i}"), i * 1000)
                    .with_translation("en", format!("hello {i}"))
            })
            .collect();
        self.conversations.insert(conversation.to_string(), messages);
        self
    }

    fn delayed(mut self, conversation: &str, delay: Duration) -> Self {
        self.delays.insert(conversation.to_string(), delay);
        self
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MessageSource for History {
    async fn fetch_messages(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Vec<Message>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.get(conversation_id).copied().unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;
        if *self.failing.lock().unwrap() {
            return Err(FeedError::FetchFailure("server unavailable".into()));
        }
        Ok(self
            .conversations
            .get(conversation_id)
            .map(|all| all.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct Recorder {
    retracted: Mutex<Vec<String>>,
}

#[async_trait]
impl Retractor for Recorder {
    async fn retract(&self, message_id: &str) -> FeedResult<()> {
        self.retracted.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

fn start(history: History) -> (Feed, Arc<History>, Arc<Recorder>) {
    let history = Arc::new(history);
    let recorder = Arc::new(Recorder::default());
    let feed = Feed::spawn(FeedOptions::new("me", "en"), history.clone(), recorder.clone());
    (feed, history, recorder)
}

async fn wait_until(feed: &Feed, done: impl Fn(&FeedSnapshot) -> bool) -> FeedSnapshot {
    let mut rx = feed.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| done(s)))
        .await
        .expect("feed never reached the expected state")
        .expect("feed stopped");
    snapshot.clone()
}

fn ready(s: &FeedSnapshot) -> bool {
    s.phase == Some(LoadPhase::Ready)
}

fn ids(snapshot: &FeedSnapshot) -> Vec<&str> {
    snapshot.messages.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn initial_page_is_newest_fifteen_ascending() {
    let (feed, _, _) = start(History::default().with("c1", 25));
    feed.open("c1").unwrap();
    let snap = wait_until(&feed, ready).await;

    assert_eq!(snap.messages.len(), 15);
    assert_eq!(snap.messages.first().unwrap().id, "c1-10");
    assert_eq!(snap.messages.last().unwrap().id, "c1-24");
    assert!(snap.messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(snap.cursor, 15);
    assert!(snap.has_more);
    assert_eq!(snap.change, FeedChange::Reset);
}

#[tokio::test(start_paused = true)]
async fn short_older_page_exhausts_history() {
    let (feed, _, _) = start(History::default().with("c1", 25));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    feed.load_more().unwrap();
    let snap = wait_until(&feed, |s| s.cursor == 25).await;
    assert_eq!(snap.messages.len(), 25);
    assert_eq!(snap.messages.first().unwrap().id, "c1-0");
    assert!(!snap.has_more);
    assert!(!snap.loading_more);
    assert_eq!(snap.change, FeedChange::Prepended(10));

    // Exhausted history is never fetched again.
    feed.load_more().unwrap();
    let after = feed.settled().await.unwrap();
    assert_eq!(after.cursor, 25);
    assert!(!after.loading_more);
}

#[tokio::test(start_paused = true)]
async fn repeated_load_more_fetches_once() {
    let (feed, history, _) = start(History::default().with("c1", 40));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;
    let before = history.calls.load(Ordering::SeqCst);

    feed.load_more().unwrap();
    feed.load_more().unwrap();
    feed.load_more().unwrap();
    let snap = wait_until(&feed, |s| s.cursor == 30).await;

    assert_eq!(history.calls.load(Ordering::SeqCst) - before, 1);
    assert_eq!(snap.messages.len(), 30);
    let unique: std::collections::HashSet<_> = ids(&snap).into_iter().collect();
    assert_eq!(unique.len(), 30);
}

#[tokio::test(start_paused = true)]
async fn prepend_survives_a_following_load_more() {
    let (feed, _, _) = start(History::default().with("c1", 40));
    feed.open("c1").unwrap();
    let drawn = wait_until(&feed, ready).await;

    feed.load_more().unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    // next request goes out before the front end draws the landed page
    feed.load_more().unwrap();
    let latest = feed.settled().await.unwrap();

    assert_eq!(latest.cursor, 30);
    assert!(latest.loading_more);
    let changes = latest.changes.since(&drawn.changes);
    assert_eq!(changes.prepended, 15);
    assert!(!changes.reset);

    let mut scroll = ScrollAnchorController::default();
    scroll.capture(Viewport::new(0.0, 15.0 * 40.0, 400.0));
    assert_eq!(
        scroll.resolve(changes, Viewport::new(0.0, 30.0 * 40.0, 400.0)),
        ScrollAction::RestoreTo(600.0)
    );
}

#[tokio::test(start_paused = true)]
async fn response_for_previous_conversation_is_dropped() {
    let history = History::default()
        .with("slow", 15)
        .with("fast", 3)
        .delayed("slow", Duration::from_secs(5));
    let (feed, _, _) = start(history);

    feed.open("slow").unwrap();
    feed.open("fast").unwrap();
    let snap = wait_until(&feed, ready).await;
    assert_eq!(snap.conversation_id.as_deref(), Some("fast"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let later = feed.settled().await.unwrap();
    assert_eq!(later.conversation_id.as_deref(), Some("fast"));
    assert_eq!(ids(&later), vec!["fast-0", "fast-1", "fast-2"]);
    assert!(!later.has_more);
}

#[tokio::test(start_paused = true)]
async fn live_messages_append_and_dedupe() {
    let (feed, _, _) = start(History::default().with("c1", 3));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    let live = Message::new("new", "c1", "ana", "hey", 10_000);
    feed.push_live(live.clone()).unwrap();
    feed.push_live(live).unwrap();
    feed.push_live(Message::new("elsewhere", "c2", "ana", "x", 11_000)).unwrap();
    let snap = feed.settled().await.unwrap();

    assert_eq!(ids(&snap), vec!["c1-0", "c1-1", "c1-2", "new"]);
    assert_eq!(snap.pending_undo, None);
}

#[tokio::test(start_paused = true)]
async fn undo_window_closes_after_grace_period() {
    let (feed, _, recorder) = start(History::default().with("c1", 3));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    feed.push_live(Message::new("mine", "c1", "me", "oops", 10_000)).unwrap();
    let snap = feed.settled().await.unwrap();
    assert_eq!(snap.pending_undo.as_deref(), Some("mine"));

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert_eq!(feed.settled().await.unwrap().pending_undo.as_deref(), Some("mine"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snap = feed.settled().await.unwrap();
    assert_eq!(snap.pending_undo, None);
    assert_eq!(snap.messages.len(), 4);

    let err = feed.undo("mine").await.unwrap_err();
    assert_eq!(err, FeedError::InvalidUndo("mine".into()));
    assert!(recorder.retracted.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn undo_within_grace_retracts_upstream() {
    let (feed, _, recorder) = start(History::default().with("c1", 3));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    feed.push_live(Message::new("mine", "c1", "me", "oops", 10_000)).unwrap();
    feed.settled().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let retraction = feed.undo("mine").await.unwrap();
    assert_eq!(retraction.body, "oops");

    let snap = feed.settled().await.unwrap();
    assert_eq!(snap.pending_undo, None);
    assert!(!ids(&snap).contains(&"mine"));
    assert_eq!(snap.change, FeedChange::Removed);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*recorder.retracted.lock().unwrap(), vec!["mine".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn newer_message_ends_undo_window() {
    let (feed, _, _) = start(History::default().with("c1", 1));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    feed.push_live(Message::new("mine", "c1", "me", "first", 10_000)).unwrap();
    feed.push_live(Message::new("reply", "c1", "ana", "second", 11_000)).unwrap();
    let snap = feed.settled().await.unwrap();
    assert_eq!(snap.pending_undo, None);
    assert!(feed.undo("mine").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn translate_toggle_round_trips() {
    let (feed, _, _) = start(History::default().with("c1", 2));
    feed.open("c1").unwrap();
    let original = wait_until(&feed, ready).await;
    assert_eq!(original.messages[0].text(), "hola 0");

    feed.set_translate(true).unwrap();
    let translated = feed.settled().await.unwrap();
    assert_eq!(translated.messages[0].text(), "hello 0");
    assert_eq!(translated.change, FeedChange::Reprojected);

    feed.set_language("fr").unwrap();
    let fallback = feed.settled().await.unwrap();
    assert_eq!(fallback.messages[0].text(), "hola 0");

    feed.set_language("en").unwrap();
    feed.set_translate(false).unwrap();
    let back = feed.settled().await.unwrap();
    assert_eq!(back.messages, original.messages);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_load_can_be_retried() {
    let history = History::default().with("c1", 5);
    history.set_failing(true);
    let (feed, history, _) = start(history);

    feed.open("c1").unwrap();
    let failed = wait_until(&feed, |s| s.phase == Some(LoadPhase::Failed)).await;
    assert!(failed.messages.is_empty());
    assert_eq!(failed.last_error, Some(FeedError::FetchFailure("server unavailable".into())));

    history.set_failing(false);
    feed.retry().unwrap();
    let snap = wait_until(&feed, ready).await;
    assert_eq!(snap.messages.len(), 5);
    assert_eq!(snap.last_error, None);
    assert!(!snap.has_more);
}

#[tokio::test(start_paused = true)]
async fn close_resets_and_shutdown_stops_the_task() {
    let (feed, _, _) = start(History::default().with("c1", 2));
    feed.open("c1").unwrap();
    wait_until(&feed, ready).await;

    feed.close().unwrap();
    let snap = feed.settled().await.unwrap();
    assert_eq!(snap.conversation_id, None);
    assert!(snap.messages.is_empty());

    feed.shutdown();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(feed.settled().await.unwrap_err(), FeedError::Closed);
}
