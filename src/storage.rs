use async_trait::async_trait;
use directories::ProjectDirs;
use log::warn;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::models::Message;
use crate::error::{FeedError, FeedResult};
use crate::feed::{MessageSource, Retractor};
use crate::utils::now_millis;

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "ChatFeed")?;
    let dir = proj.data_dir().to_path_buf();
    Some(dir.join("cache.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn storage_err(e: impl std::fmt::Display) -> FeedError {
    FeedError::Storage(e.to_string())
}

// Caching messages lets a conversation open while the server is unreachable.
// Only messages are stored; feed view state is rebuilt on every open.
pub struct MessageCache {
    conn: Mutex<Connection>,
}

impl MessageCache {
    pub fn open_default() -> FeedResult<Self> {
        let path = db_path().ok_or_else(|| FeedError::Storage("no data dir".into()))?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> FeedResult<Self> {
        ensure_dir(path).map_err(storage_err)?;
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> FeedResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> FeedResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                body TEXT,
                attachments TEXT NOT NULL,
                translations TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                cached_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_by_conversation
                ON messages (conversation_id, created_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> FeedResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| FeedError::Storage("cache lock poisoned".into()))
    }

    pub fn upsert_messages(&self, messages: &[Message]) -> FeedResult<()> {
        let now = now_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for m in messages {
            let attachments = serde_json::to_string(&m.attachments).map_err(storage_err)?;
            let translations = serde_json::to_string(&m.translations).map_err(storage_err)?;
            tx.execute(
                r#"
                INSERT INTO messages (id, conversation_id, sender, body, attachments, translations, created_at, cached_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    body=excluded.body,
                    attachments=excluded.attachments,
                    translations=excluded.translations,
                    cached_at=excluded.cached_at
                "#,
                params![m.id, m.conversation_id, m.sender, m.body, attachments, translations, m.created_at, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Same paging contract as the server: newest first.
    pub fn fetch_page(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, conversation_id, sender, body, attachments, translations, created_at
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(params![conversation_id, limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (id, conversation_id, sender, body, attachments, translations, created_at) = r?;
            out.push(Message {
                id,
                conversation_id,
                sender,
                body,
                attachments: serde_json::from_str(&attachments).map_err(storage_err)?,
                translations: serde_json::from_str::<BTreeMap<String, String>>(&translations)
                    .map_err(storage_err)?,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn remove_message(&self, message_id: &str) -> FeedResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
        Ok(removed > 0)
    }

    pub fn count(&self, conversation_id: &str) -> FeedResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[async_trait]
impl MessageSource for MessageCache {
    async fn fetch_messages(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Vec<Message>> {
        self.fetch_page(conversation_id, offset, limit)
    }
}

#[async_trait]
impl Retractor for MessageCache {
    async fn retract(&self, message_id: &str) -> FeedResult<()> {
        self.remove_message(message_id).map(|_| ())
    }
}

/// Remote source that writes every page it gets into the cache and serves
/// cached pages while the remote is failing.
pub struct CachingSource<S> {
    remote: S,
    cache: Arc<MessageCache>,
}

impl<S> CachingSource<S> {
    pub fn new(remote: S, cache: Arc<MessageCache>) -> Self {
        Self { remote, cache }
    }
}

#[async_trait]
impl<S: MessageSource> MessageSource for CachingSource<S> {
    async fn fetch_messages(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Vec<Message>> {
        match self.remote.fetch_messages(conversation_id, offset, limit).await {
            Ok(messages) => {
                if let Err(e) = self.cache.upsert_messages(&messages) {
                    warn!("could not cache page of {conversation_id}: {e}");
                }
                Ok(messages)
            }
            Err(e) => {
                warn!("remote fetch of {conversation_id} failed, trying cache: {e}");
                match self.cache.fetch_page(conversation_id, offset, limit) {
                    Ok(cached) if !cached.is_empty() => Ok(cached),
                    _ => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl<S: Retractor> Retractor for CachingSource<S> {
    async fn retract(&self, message_id: &str) -> FeedResult<()> {
        if let Err(e) = self.cache.remove_message(message_id) {
            warn!("could not drop {message_id} from cache: {e}");
        }
        self.remote.retract(message_id).await
    }
}
