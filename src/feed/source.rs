use std::sync::Arc;

use async_trait::async_trait;

use crate::api::models::Message;
use crate::error::FeedResult;

/// Paged access to a conversation's stored history.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `limit` messages starting `offset` back from the newest,
    /// newest first. A short page means the history is exhausted.
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> FeedResult<Vec<Message>>;
}

/// Upstream retraction of a message the local user already sent.
#[async_trait]
pub trait Retractor: Send + Sync {
    async fn retract(&self, message_id: &str) -> FeedResult<()>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> FeedResult<Vec<Message>> {
        (**self).fetch_messages(conversation_id, offset, limit).await
    }
}

#[async_trait]
impl<T: Retractor + ?Sized> Retractor for Arc<T> {
    async fn retract(&self, message_id: &str) -> FeedResult<()> {
        (**self).retract(message_id).await
    }
}
