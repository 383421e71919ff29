//! Conversation view state and the transitions applied to it.
//!
//! The store is plain synchronous state. Network fetches happen elsewhere:
//! the store hands out a [`FetchTicket`] when a page is needed and the
//! caller feeds the result back with the same ticket. A ticket whose
//! generation no longer matches the open conversation is rejected as stale.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::models::Message;
use crate::error::{FeedError, FeedResult};
use crate::feed::translate;

pub const DEFAULT_PAGE_SIZE: usize = 15;
pub const DEFAULT_UNDO_GRACE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Initial page in flight.
    Loading,
    Ready,
    /// Initial page failed; empty but retryable.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    Older,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub conversation_id: String,
    pub generation: u64,
    pub kind: FetchKind,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUndo {
    pub message_id: String,
    pub token: u64,
}

/// Result of a successful undo. `body` lets the composer restore the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retraction {
    pub message_id: String,
    pub body: String,
}

/// What the last transition did to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedChange {
    #[default]
    None,
    Reset,
    Prepended(usize),
    Appended,
    Removed,
    Reprojected,
}

/// Running totals of every transition since the store was created.
///
/// Snapshots travel over a channel that keeps only the newest value, so a
/// reader can miss intermediate ones. Comparing the log of the last snapshot
/// it drew with the current one via [`since`](Self::since) still yields
/// everything that happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeLog {
    resets: u64,
    prepended: u64,
    appended: u64,
    removed: u64,
    reprojected: u64,
}

impl ChangeLog {
    fn record(&mut self, change: FeedChange) {
        match change {
            FeedChange::None => {}
            FeedChange::Reset => self.resets += 1,
            FeedChange::Prepended(n) => self.prepended += n as u64,
            FeedChange::Appended => self.appended += 1,
            FeedChange::Removed => self.removed += 1,
            FeedChange::Reprojected => self.reprojected += 1,
        }
    }

    pub fn since(&self, earlier: &ChangeLog) -> FeedDelta {
        let reset = self.resets != earlier.resets;
        FeedDelta {
            reset,
            // rows prepended before a reset belong to a list that is gone
            prepended: if reset {
                0
            } else {
                self.prepended.saturating_sub(earlier.prepended) as usize
            },
            appended: self.appended != earlier.appended,
            removed: self.removed != earlier.removed,
            reprojected: self.reprojected != earlier.reprojected,
        }
    }
}

/// Coalesced transitions between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedDelta {
    pub reset: bool,
    pub prepended: usize,
    pub appended: bool,
    pub removed: bool,
    pub reprojected: bool,
}

impl FeedDelta {
    pub fn is_empty(&self) -> bool {
        *self == FeedDelta::default()
    }
}

impl From<FeedChange> for FeedDelta {
    fn from(change: FeedChange) -> Self {
        let mut log = ChangeLog::default();
        log.record(change);
        log.since(&ChangeLog::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedSnapshot {
    pub conversation_id: Option<String>,
    pub phase: Option<LoadPhase>,
    pub messages: Vec<Message>,
    pub translate: bool,
    pub cursor: usize,
    pub has_more: bool,
    pub loading_more: bool,
    pub pending_undo: Option<String>,
    pub last_error: Option<FeedError>,
    /// The most recent transition only.
    pub change: FeedChange,
    pub changes: ChangeLog,
}

#[derive(Debug, Clone)]
struct Entry {
    original: Message,
    translated: Message,
}

impl Entry {
    fn new(message: Message, language: &str) -> Self {
        let translated = translate::translated(&message, language);
        Self {
            original: message,
            translated,
        }
    }
}

/// State of the one open conversation.
#[derive(Debug, Clone)]
pub struct ConversationViewState {
    conversation_id: String,
    generation: u64,
    entries: Vec<Entry>,
    ids: HashSet<String>,
    /// Undone messages. A page fetched before the upstream delete landed
    /// may still carry them.
    retracted: HashSet<String>,
    cursor: usize,
    has_more: bool,
    phase: LoadPhase,
    loading_more: bool,
    pending_undo: Option<PendingUndo>,
    last_error: Option<FeedError>,
}

impl ConversationViewState {
    fn new(conversation_id: String, generation: u64) -> Self {
        Self {
            conversation_id,
            generation,
            entries: Vec::new(),
            ids: HashSet::new(),
            retracted: HashSet::new(),
            cursor: 0,
            has_more: true,
            phase: LoadPhase::Loading,
            loading_more: false,
            pending_undo: None,
            last_error: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn pending_undo(&self) -> Option<&PendingUndo> {
        self.pending_undo.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a newest-first page ahead of what is held. Returns how many
    /// messages were new.
    fn merge_page(&mut self, newest_first: Vec<Message>, language: &str) -> usize {
        let mut fresh = Vec::with_capacity(newest_first.len());
        for message in newest_first.into_iter().rev() {
            if self.retracted.contains(&message.id) {
                debug!("dropping retracted message {} from page", message.id);
            } else if self.ids.insert(message.id.clone()) {
                fresh.push(Entry::new(message, language));
            } else {
                debug!("dropping duplicate message {} from page", message.id);
            }
        }
        let inserted = fresh.len();
        if inserted > 0 {
            fresh.append(&mut self.entries);
            self.entries = fresh;
            self.sort();
        }
        inserted
    }

    fn sort(&mut self) {
        // stable: equal timestamps keep insertion order
        self.entries.sort_by_key(|e| e.original.created_at);
    }

    fn check_ticket(&self, ticket: &FetchTicket) -> FeedResult<()> {
        if ticket.generation != self.generation {
            return Err(FeedError::StaleResponse {
                conversation_id: ticket.conversation_id.clone(),
            });
        }
        let expected = match ticket.kind {
            FetchKind::Initial => self.phase == LoadPhase::Loading,
            FetchKind::Older => self.loading_more,
        };
        if expected {
            Ok(())
        } else {
            Err(FeedError::StaleResponse {
                conversation_id: ticket.conversation_id.clone(),
            })
        }
    }
}

/// Owns the view state for the open conversation and applies every
/// transition to it.
#[derive(Debug, Clone)]
pub struct MessageStore {
    local_user: String,
    language: String,
    page_size: usize,
    translate: bool,
    view: Option<ConversationViewState>,
    generations: u64,
    undo_tokens: u64,
    last_change: FeedChange,
    changes: ChangeLog,
}

impl MessageStore {
    pub fn new(local_user: impl Into<String>, language: impl Into<String>, page_size: usize) -> Self {
        Self {
            local_user: local_user.into(),
            language: language.into(),
            page_size: page_size.max(1),
            translate: false,
            view: None,
            generations: 0,
            undo_tokens: 0,
            last_change: FeedChange::None,
            changes: ChangeLog::default(),
        }
    }

    fn note(&mut self, change: FeedChange) {
        self.last_change = change;
        self.changes.record(change);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn translate(&self) -> bool {
        self.translate
    }

    pub fn view(&self) -> Option<&ConversationViewState> {
        self.view.as_ref()
    }

    pub fn pending_undo(&self) -> Option<&PendingUndo> {
        self.view.as_ref().and_then(|v| v.pending_undo.as_ref())
    }

    /// Open a conversation, discarding any previous view, and return the
    /// ticket for its newest page.
    pub fn open(&mut self, conversation_id: impl Into<String>) -> FetchTicket {
        let conversation_id = conversation_id.into();
        self.generations += 1;
        if let Some(prev) = self.view.take() {
            debug!("replacing open conversation {}", prev.conversation_id);
        }
        info!("opening conversation {conversation_id}");
        self.view = Some(ConversationViewState::new(conversation_id, self.generations));
        self.note(FeedChange::Reset);
        self.initial_ticket()
    }

    pub fn close(&mut self) {
        if let Some(view) = self.view.take() {
            info!("closing conversation {}", view.conversation_id);
            self.note(FeedChange::Reset);
        }
    }

    fn initial_ticket(&self) -> FetchTicket {
        let view = self.view.as_ref();
        FetchTicket {
            conversation_id: view.map(|v| v.conversation_id.clone()).unwrap_or_default(),
            generation: view.map(|v| v.generation).unwrap_or_default(),
            kind: FetchKind::Initial,
            offset: 0,
            limit: self.page_size,
        }
    }

    /// Re-issue whichever fetch failed last.
    pub fn retry(&mut self) -> Option<FetchTicket> {
        let view = self.view.as_mut()?;
        let failed_more = view.last_error.is_some();
        match view.phase {
            LoadPhase::Failed => {
                view.phase = LoadPhase::Loading;
                self.note(FeedChange::None);
                Some(self.initial_ticket())
            }
            LoadPhase::Ready if failed_more => self.request_load_more(),
            _ => None,
        }
    }

    /// Dispatch a completed fetch to the matching handler.
    pub fn on_fetched(
        &mut self,
        ticket: &FetchTicket,
        result: FeedResult<Vec<Message>>,
    ) -> FeedResult<Vec<Message>> {
        match ticket.kind {
            FetchKind::Initial => self.on_initial_load(ticket, result),
            FetchKind::Older => self.on_load_more(ticket, result),
        }
    }

    pub fn on_initial_load(
        &mut self,
        ticket: &FetchTicket,
        result: FeedResult<Vec<Message>>,
    ) -> FeedResult<Vec<Message>> {
        let page_size = self.page_size;
        let view = Self::checked_view(&mut self.view, ticket)?;
        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!("initial load of {} failed: {e}", view.conversation_id);
                view.phase = LoadPhase::Failed;
                view.last_error = Some(e.clone());
                self.note(FeedChange::None);
                return Err(e);
            }
        };

        let returned = messages.len();
        view.phase = LoadPhase::Ready;
        view.last_error = None;
        view.cursor = page_size;
        view.has_more = returned == page_size;
        view.merge_page(messages, &self.language);
        debug!(
            "initial page for {}: {returned} messages, has_more={}",
            view.conversation_id, view.has_more
        );
        self.note(FeedChange::Reset);
        Ok(self.display_sequence())
    }

    /// Ticket for the next older page, or `None` when nothing should be
    /// fetched: no open conversation, initial page pending, history
    /// exhausted, or a page already in flight.
    pub fn request_load_more(&mut self) -> Option<FetchTicket> {
        let page_size = self.page_size;
        let view = self.view.as_mut()?;
        if view.phase != LoadPhase::Ready || !view.has_more || view.loading_more {
            return None;
        }
        view.loading_more = true;
        let ticket = FetchTicket {
            conversation_id: view.conversation_id.clone(),
            generation: view.generation,
            kind: FetchKind::Older,
            offset: view.cursor,
            limit: page_size,
        };
        self.note(FeedChange::None);
        Some(ticket)
    }

    pub fn on_load_more(
        &mut self,
        ticket: &FetchTicket,
        result: FeedResult<Vec<Message>>,
    ) -> FeedResult<Vec<Message>> {
        let page_size = self.page_size;
        let view = Self::checked_view(&mut self.view, ticket)?;
        view.loading_more = false;
        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!("loading older messages of {} failed: {e}", view.conversation_id);
                view.last_error = Some(e.clone());
                self.note(FeedChange::None);
                return Err(e);
            }
        };

        view.last_error = None;
        if messages.is_empty() {
            view.has_more = false;
            self.note(FeedChange::None);
            return Ok(self.display_sequence());
        }

        let returned = messages.len();
        view.cursor += returned;
        view.has_more = returned == page_size;
        let inserted = view.merge_page(messages, &self.language);
        debug!(
            "older page for {}: {returned} returned, {inserted} new, cursor={}",
            view.conversation_id, view.cursor
        );
        self.note(FeedChange::Prepended(inserted));
        Ok(self.display_sequence())
    }

    fn checked_view<'a>(
        view: &'a mut Option<ConversationViewState>,
        ticket: &FetchTicket,
    ) -> FeedResult<&'a mut ConversationViewState> {
        let Some(view) = view.as_mut() else {
            debug!("dropping response for {}, no open conversation", ticket.conversation_id);
            return Err(FeedError::StaleResponse {
                conversation_id: ticket.conversation_id.clone(),
            });
        };
        if let Err(e) = view.check_ticket(ticket) {
            debug!("dropping stale response for {}", ticket.conversation_id);
            return Err(e);
        }
        Ok(view)
    }

    /// Add a message delivered by the live transport. A message sent by the
    /// local user becomes the pending undo; any newer message ends the
    /// previous undo window.
    pub fn append_live(&mut self, message: Message) -> FeedResult<Vec<Message>> {
        let Some(view) = self.view.as_mut() else {
            return Err(FeedError::NoConversation);
        };
        if !message.conversation_id.is_empty() && message.conversation_id != view.conversation_id {
            return Err(FeedError::ForeignMessage {
                message_id: message.id,
                conversation_id: message.conversation_id,
            });
        }
        if view.retracted.contains(&message.id) || !view.ids.insert(message.id.clone()) {
            debug!("dropping duplicate live message {}", message.id);
            self.note(FeedChange::None);
            return Ok(self.display_sequence());
        }

        let own = message.sender == self.local_user;
        let message_id = message.id.clone();
        view.entries.push(Entry::new(message, &self.language));
        view.sort();
        view.pending_undo = if own {
            self.undo_tokens += 1;
            Some(PendingUndo {
                message_id,
                token: self.undo_tokens,
            })
        } else {
            None
        };
        self.note(FeedChange::Appended);
        Ok(self.display_sequence())
    }

    /// Remove the pending message. Anything but the current pending id is
    /// rejected with `InvalidUndo` and leaves state untouched.
    pub fn undo_send(&mut self, message_id: &str) -> FeedResult<Retraction> {
        let view = self.view.as_mut().ok_or(FeedError::NoConversation)?;
        match &view.pending_undo {
            Some(p) if p.message_id == message_id => {}
            _ => return Err(FeedError::InvalidUndo(message_id.to_string())),
        }
        view.pending_undo = None;
        let body = match view.entries.iter().position(|e| e.original.id == message_id) {
            Some(idx) => view.entries.remove(idx).original.body.unwrap_or_default(),
            None => String::new(),
        };
        view.ids.remove(message_id);
        view.retracted.insert(message_id.to_string());
        debug!("message {message_id} retracted");
        self.note(FeedChange::Removed);
        Ok(Retraction {
            message_id: message_id.to_string(),
            body,
        })
    }

    /// Grace period elapsed for `token`. Only clears the pending undo if it is
    /// still the one the timer was started for.
    pub fn expire_undo(&mut self, token: u64) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        match &view.pending_undo {
            Some(p) if p.token == token => {
                debug!("undo window for {} closed", p.message_id);
                view.pending_undo = None;
                self.note(FeedChange::None);
                true
            }
            _ => false,
        }
    }

    pub fn toggle_translate(&mut self, on: bool) -> Vec<Message> {
        if self.translate != on {
            self.translate = on;
            self.note(FeedChange::Reprojected);
        } else {
            self.note(FeedChange::None);
        }
        self.display_sequence()
    }

    /// Switch the target language and rebuild the translated projection.
    pub fn set_language(&mut self, language: impl Into<String>) -> Vec<Message> {
        self.language = language.into();
        if let Some(view) = self.view.as_mut() {
            for entry in &mut view.entries {
                entry.translated = translate::translated(&entry.original, &self.language);
            }
        }
        self.note(if self.translate {
            FeedChange::Reprojected
        } else {
            FeedChange::None
        });
        self.display_sequence()
    }

    pub fn display_sequence(&self) -> Vec<Message> {
        let Some(view) = &self.view else {
            return Vec::new();
        };
        view.entries
            .iter()
            .map(|e| if self.translate { e.translated.clone() } else { e.original.clone() })
            .collect()
    }

    pub fn original_sequence(&self) -> Vec<Message> {
        self.view
            .as_ref()
            .map(|v| v.entries.iter().map(|e| e.original.clone()).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let Some(view) = &self.view else {
            return FeedSnapshot {
                translate: self.translate,
                change: self.last_change,
                changes: self.changes,
                ..FeedSnapshot::default()
            };
        };
        FeedSnapshot {
            conversation_id: Some(view.conversation_id.clone()),
            phase: Some(view.phase),
            messages: self.display_sequence(),
            translate: self.translate,
            cursor: view.cursor,
            has_more: view.has_more,
            loading_more: view.loading_more,
            pending_undo: view.pending_undo.as_ref().map(|p| p.message_id.clone()),
            last_error: view.last_error.clone(),
            change: self.last_change,
            changes: self.changes,
        }
    }
}
