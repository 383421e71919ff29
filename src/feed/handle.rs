//! Task that owns a [`MessageStore`] and applies commands to it one at a
//! time. Fetch completions and undo-timer expiries come back through the
//! same queue, so no two mutations ever interleave.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::api::models::Message;
use crate::error::{FeedError, FeedResult};
use crate::feed::source::{MessageSource, Retractor};
use crate::feed::store::{
    DEFAULT_PAGE_SIZE, DEFAULT_UNDO_GRACE, FeedSnapshot, FetchTicket, MessageStore, Retraction,
};

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub local_user: String,
    pub language: String,
    pub page_size: usize,
    pub undo_grace: Duration,
}

impl FeedOptions {
    pub fn new(local_user: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            language: language.into(),
            page_size: DEFAULT_PAGE_SIZE,
            undo_grace: DEFAULT_UNDO_GRACE,
        }
    }
}

enum Command {
    Open(String),
    Close,
    LoadMore,
    Live(Message),
    Undo {
        message_id: String,
        reply: oneshot::Sender<FeedResult<Retraction>>,
    },
    Translate(bool),
    Language(String),
    Retry,
    Fetched {
        ticket: FetchTicket,
        result: FeedResult<Vec<Message>>,
    },
    UndoExpired(u64),
    Flush(oneshot::Sender<FeedSnapshot>),
    Shutdown,
}

/// Cheap handle to a running feed task.
#[derive(Clone)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<FeedSnapshot>,
}

impl Feed {
    /// Start the feed task on the current tokio runtime.
    pub fn spawn(
        options: FeedOptions,
        source: Arc<dyn MessageSource>,
        retractor: Arc<dyn Retractor>,
    ) -> Self {
        let store = MessageStore::new(options.local_user, options.language, options.page_size);
        let (tx, rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(store.snapshot());
        let task = FeedTask {
            store,
            source,
            retractor,
            undo_grace: options.undo_grace,
            undo_timer: None,
            tx: tx.downgrade(),
            snapshots: snap_tx,
        };
        tokio::spawn(task.run(rx));
        Self {
            tx,
            snapshots: snap_rx,
        }
    }

    fn send(&self, command: Command) -> FeedResult<()> {
        self.tx.send(command).map_err(|_| FeedError::Closed)
    }

    pub fn open(&self, conversation_id: impl Into<String>) -> FeedResult<()> {
        self.send(Command::Open(conversation_id.into()))
    }

    pub fn close(&self) -> FeedResult<()> {
        self.send(Command::Close)
    }

    /// Ask for the next older page. Ignored while one is in flight.
    pub fn load_more(&self) -> FeedResult<()> {
        self.send(Command::LoadMore)
    }

    pub fn push_live(&self, message: Message) -> FeedResult<()> {
        self.send(Command::Live(message))
    }

    pub async fn undo(&self, message_id: impl Into<String>) -> FeedResult<Retraction> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Undo {
            message_id: message_id.into(),
            reply,
        })?;
        rx.await.map_err(|_| FeedError::Closed)?
    }

    pub fn set_translate(&self, on: bool) -> FeedResult<()> {
        self.send(Command::Translate(on))
    }

    pub fn set_language(&self, language: impl Into<String>) -> FeedResult<()> {
        self.send(Command::Language(language.into()))
    }

    pub fn retry(&self) -> FeedResult<()> {
        self.send(Command::Retry)
    }

    /// Snapshot taken after every command queued before this call.
    pub async fn settled(&self) -> FeedResult<FeedSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshots.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }
}

struct FeedTask {
    store: MessageStore,
    source: Arc<dyn MessageSource>,
    retractor: Arc<dyn Retractor>,
    undo_grace: Duration,
    undo_timer: Option<(u64, JoinHandle<()>)>,
    tx: mpsc::WeakUnboundedSender<Command>,
    snapshots: watch::Sender<FeedSnapshot>,
}

impl FeedTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if !self.handle(command) {
                break;
            }
            self.snapshots.send_replace(self.store.snapshot());
        }
        self.cancel_undo_timer();
        debug!("feed task stopped");
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Open(conversation_id) => {
                self.cancel_undo_timer();
                let ticket = self.store.open(conversation_id);
                self.fetch(ticket);
            }
            Command::Close => {
                self.cancel_undo_timer();
                self.store.close();
            }
            Command::LoadMore => match self.store.request_load_more() {
                Some(ticket) => self.fetch(ticket),
                None => debug!("load more ignored"),
            },
            Command::Live(message) => match self.store.append_live(message) {
                Ok(_) => self.sync_undo_timer(),
                Err(e) => debug!("live message ignored: {e}"),
            },
            Command::Undo { message_id, reply } => {
                let result = self.store.undo_send(&message_id);
                if let Ok(retraction) = &result {
                    self.cancel_undo_timer();
                    self.retract(retraction.message_id.clone());
                }
                let _ = reply.send(result);
            }
            Command::Translate(on) => {
                self.store.toggle_translate(on);
            }
            Command::Language(language) => {
                self.store.set_language(language);
            }
            Command::Retry => {
                if let Some(ticket) = self.store.retry() {
                    self.fetch(ticket);
                }
            }
            Command::Fetched { ticket, result } => {
                if let Err(e) = self.store.on_fetched(&ticket, result) {
                    debug!("fetch for {} not applied: {e}", ticket.conversation_id);
                }
            }
            Command::UndoExpired(token) => {
                self.store.expire_undo(token);
                if matches!(self.undo_timer, Some((t, _)) if t == token) {
                    self.undo_timer = None;
                }
            }
            Command::Flush(reply) => {
                let _ = reply.send(self.store.snapshot());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn fetch(&self, ticket: FetchTicket) {
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = source
                .fetch_messages(&ticket.conversation_id, ticket.offset, ticket.limit)
                .await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Fetched { ticket, result });
            }
        });
    }

    fn retract(&self, message_id: String) {
        let retractor = Arc::clone(&self.retractor);
        tokio::spawn(async move {
            if let Err(e) = retractor.retract(&message_id).await {
                warn!("retracting {message_id} failed: {e}");
            }
        });
    }

    /// Make the running timer match the store's pending undo.
    fn sync_undo_timer(&mut self) {
        let Some(token) = self.store.pending_undo().map(|p| p.token) else {
            self.cancel_undo_timer();
            return;
        };
        if matches!(self.undo_timer, Some((t, _)) if t == token) {
            return;
        }
        self.cancel_undo_timer();
        let tx = self.tx.clone();
        let grace = self.undo_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::UndoExpired(token));
            }
        });
        self.undo_timer = Some((token, handle));
    }

    fn cancel_undo_timer(&mut self) {
        if let Some((_, handle)) = self.undo_timer.take() {
            handle.abort();
        }
    }
}
