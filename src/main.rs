use std::collections::HashSet;
use std::sync::Arc;

use chatfeed::api::client::ApiClient;
use chatfeed::api::models::{UserDirectory, UserProfile};
use chatfeed::app::FeedConfig;
use chatfeed::feed::{Feed, FeedSnapshot, MessageSource, Retractor};
use chatfeed::storage::{CachingSource, MessageCache};
use chatfeed::ui::chat_view::ChatView;
use chatfeed::ui::pane::TerminalPane;
use chatfeed::utils::now_millis;
use chatfeed::{FeedError, FeedResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: /up /down /more /undo /translate on|off /lang <code> /retry /quit";
const DEFAULT_VISIBLE_LINES: usize = 20;

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = run().await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn visible_lines() -> usize {
    std::env::var("LINES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .map(|lines| lines.saturating_sub(2))
        .unwrap_or(DEFAULT_VISIBLE_LINES)
}

struct Screen {
    view: ChatView,
    pane: TerminalPane,
    lines: Vec<String>,
    status: String,
}

impl Screen {
    fn show(&mut self, snapshot: &FeedSnapshot) {
        self.view.capture_viewport(self.pane.viewport());
        let rendered = self.view.render(snapshot, now_millis());
        self.status = rendered.status.label();
        self.lines = rendered.row_lines();
        self.pane.set_line_count(self.lines.len());
        let action = self.view.place(snapshot, self.pane.viewport());
        self.pane.apply(action);
        self.draw();
    }

    fn draw(&self) {
        if !self.status.is_empty() {
            println!("-- {} --", self.status);
        }
        for line in self.pane.window(&self.lines) {
            println!("{line}");
        }
        println!();
    }
}

async fn run() -> FeedResult<()> {
    let conversation_id = std::env::args()
        .nth(1)
        .ok_or_else(|| FeedError::Config("usage: chatfeed <conversation-id>".into()))?;
    let config = FeedConfig::load();
    if !config.is_configured() {
        return Err(FeedError::Config("set base_url and [user] id in chatfeed.toml".into()));
    }

    let client = Arc::new(ApiClient::from_config(&config));
    let (source, retractor): (Arc<dyn MessageSource>, Arc<dyn Retractor>) = if config.cache {
        let cache = Arc::new(MessageCache::open_default()?);
        let caching = Arc::new(CachingSource::new(Arc::clone(&client), cache));
        (caching.clone() as Arc<dyn MessageSource>, caching as Arc<dyn Retractor>)
    } else {
        (client.clone() as Arc<dyn MessageSource>, client.clone() as Arc<dyn Retractor>)
    };

    let feed = Feed::spawn(config.feed_options(), source, retractor);
    feed.open(conversation_id)?;

    if let Some(ws_url) = config.ws_url.clone() {
        let client = Arc::clone(&client);
        let feed = feed.clone();
        tokio::spawn(async move {
            if let Err(e) = client.listen(&ws_url, &feed).await {
                log::warn!("live transport stopped: {e}");
            }
        });
    }

    let directory = UserDirectory::new(config.contacts.iter().cloned());
    let mut screen = Screen {
        view: ChatView::with_strategy(config.user.clone(), directory, config.video_id_strategy)
            .with_scroll(config.scroll_controller()),
        pane: TerminalPane::new(visible_lines()),
        lines: Vec::new(),
        status: String::new(),
    };
    let (profiles_tx, mut profiles_rx) = mpsc::unbounded_channel();
    let mut looked_up = HashSet::new();
    let mut snapshots = feed.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                request_profiles(&client, &screen.view, &snapshot, &mut looked_up, &profiles_tx);
                screen.show(&snapshot);
            }
            Some(user) = profiles_rx.recv() => {
                screen.view.directory_mut().insert(user);
                let snapshot = snapshots.borrow_and_update().clone();
                screen.show(&snapshot);
            }
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| FeedError::Transport(e.to_string()))? else {
                    break;
                };
                if !handle_command(&feed, &mut screen, line.trim()).await? {
                    break;
                }
            }
        }
    }

    feed.shutdown();
    Ok(())
}

async fn handle_command(feed: &Feed, screen: &mut Screen, line: &str) -> FeedResult<bool> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("/quit"), _) => return Ok(false),
        (Some("/up"), _) => {
            screen.pane.scroll_pages(-1);
            screen.draw();
            // reaching the top pulls in older history, like scrolling a list
            if screen.pane.at_top() && feed.snapshot().has_more {
                feed.load_more()?;
            }
        }
        (Some("/down"), _) => {
            screen.pane.scroll_pages(1);
            screen.draw();
        }
        (Some("/more"), _) => feed.load_more()?,
        (Some("/retry"), _) => feed.retry()?,
        (Some("/translate"), Some("on")) => feed.set_translate(true)?,
        (Some("/translate"), Some("off")) => feed.set_translate(false)?,
        (Some("/lang"), Some(code)) => feed.set_language(code)?,
        (Some("/undo"), _) => match feed.snapshot().pending_undo {
            Some(id) => match feed.undo(id).await {
                Ok(retraction) => println!("retracted: {}", retraction.body),
                // the window closed between reading the snapshot and undoing
                Err(FeedError::InvalidUndo(_)) => println!("nothing to undo"),
                Err(e) => println!("{e}"),
            },
            None => println!("nothing to undo"),
        },
        _ => println!("{HELP}"),
    }
    Ok(true)
}

// Look up names and avatars for senders the config did not list. Each
// lookup runs on its own task; results come back through `found`.
fn request_profiles(
    client: &Arc<ApiClient>,
    view: &ChatView,
    snapshot: &FeedSnapshot,
    looked_up: &mut HashSet<String>,
    found: &mpsc::UnboundedSender<UserProfile>,
) {
    for message in &snapshot.messages {
        let sender = &message.sender;
        if view.directory().get(sender).is_some() || !looked_up.insert(sender.clone()) {
            continue;
        }
        let client = Arc::clone(client);
        let found = found.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            match client.fetch_user(&sender).await {
                Ok(user) => {
                    let _ = found.send(user);
                }
                Err(e) => log::debug!("no profile for {sender}: {e}"),
            }
        });
    }
}
