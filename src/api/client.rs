use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::Client as HttpClient;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::api::events::{self, LiveEvent};
use crate::api::models::{self, Message, UserProfile};
use crate::app::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::feed::{Feed, MessageSource, Retractor};
use crate::utils::normalize_url;

pub struct ApiClient {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
    password: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: normalize_url(base_url),
            token: None,
            password: None,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            token: config.token.clone(),
            password: config.password.clone(),
            ..Self::new(&config.base_url)
        }
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn with_auth<'a>(mut req: reqwest::RequestBuilder, token: Option<&'a str>, password: Option<&'a str>) -> reqwest::RequestBuilder {
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        if let Some(p) = password {
            req = req.header("password", p);
        }
        req
    }

    fn endpoint(&self, segments: &[&str]) -> FeedResult<Url> {
        let mut url = Url::parse(&Self::base_api(&self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| FeedError::Config(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn messages_endpoint(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Url> {
        let mut url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    pub fn message_endpoint(&self, message_id: &str) -> FeedResult<Url> {
        self.endpoint(&["messages", message_id])
    }

    async fn get_json(&self, url: Url) -> FeedResult<Value> {
        let req = Self::with_auth(self.http.get(url), self.token.as_deref(), self.password.as_deref());
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(FeedError::FetchFailure(format!("HTTP {}", resp.status())));
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Look up one user for the directory.
    pub async fn fetch_user(&self, user_id: &str) -> FeedResult<UserProfile> {
        let json = self.get_json(self.endpoint(&["users", user_id])?).await?;
        let user = json.get("user").cloned().unwrap_or(json);
        serde_json::from_value(user).map_err(|e| FeedError::FetchFailure(e.to_string()))
    }

    /// Read live events from the websocket until the server closes it,
    /// forwarding new messages to `feed`.
    pub async fn listen(&self, ws_url: &str, feed: &Feed) -> FeedResult<()> {
        let url = Url::parse(ws_url)?;
        let (mut ws_stream, _) = connect_async(url.as_str()).await?;
        info!("websocket connected to {url}");
        while let Some(frame) = ws_stream.next().await {
            match frame? {
                WsMessage::Text(text) => match events::parse_live_event(&text) {
                    Ok(LiveEvent::NewMessage(message)) => feed.push_live(message)?,
                    Ok(LiveEvent::Other(kind)) => debug!("ignoring {kind} event"),
                    Err(e) => warn!("unreadable websocket frame: {e}"),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        info!("websocket closed");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for ApiClient {
    async fn fetch_messages(&self, conversation_id: &str, offset: usize, limit: usize) -> FeedResult<Vec<Message>> {
        let url = self.messages_endpoint(conversation_id, offset, limit)?;
        let json = self.get_json(url).await?;
        models::messages_from_json(json)
    }
}

#[async_trait]
impl Retractor for ApiClient {
    async fn retract(&self, message_id: &str) -> FeedResult<()> {
        let url = self.message_endpoint(message_id)?;
        let req = Self::with_auth(self.http.delete(url), self.token.as_deref(), self.password.as_deref());
        let resp = req.send().await.map_err(|e| FeedError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FeedError::Transport(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}
