use serde::{Deserialize, Serialize};

use crate::api::models::Message;
use crate::error::FeedResult;

/// Frame pushed by the realtime transport.
#[derive(Debug, Serialize, Deserialize)]
pub struct IncomingEvent {
    #[serde(alias = "type", alias = "event")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    NewMessage(Message),
    Other(String),
}

fn is_new_message(kind: &str) -> bool {
    matches!(
        kind,
        "new-message" | "newMessage" | "new_message" | "message" | "message.created"
    )
}

pub fn parse_live_event(text: &str) -> FeedResult<LiveEvent> {
    let event: IncomingEvent = serde_json::from_str(text)?;
    if is_new_message(&event.event_type) {
        let message = serde_json::from_value(event.data)?;
        Ok(LiveEvent::NewMessage(message))
    } else {
        Ok(LiveEvent::Other(event.event_type))
    }
}
