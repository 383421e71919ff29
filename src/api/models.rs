use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{FeedError, FeedResult};

/// A chat message as delivered by the persistence service or the live
/// transport. `id` is the only deduplication key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "conversation")]
    pub conversation_id: String,
    #[serde(alias = "senderId")]
    pub sender: String,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub attachments: Vec<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: i64,
    #[serde(default, with = "translation_list")]
    pub translations: BTreeMap<String, String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            body: Some(body.into()),
            attachments: Vec::new(),
            created_at,
            translations: BTreeMap::new(),
        }
    }

    /// Adds a translation unless one already exists for `language`.
    pub fn with_translation(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.translations.entry(language.into()).or_insert_with(|| text.into());
        self
    }

    pub fn with_attachments(mut self, urls: Vec<String>) -> Self {
        self.attachments = urls;
        self
    }

    /// Body text, empty when the message only carries attachments.
    pub fn text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

// createdAt arrives either as epoch millis or as an RFC 3339 string.
mod timestamp {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(ms),
            Raw::Float(ms) => Ok(ms as i64),
            Raw::Text(text) => chrono::DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.timestamp_millis())
                .or_else(|_| text.parse::<i64>())
                .map_err(|_| serde::de::Error::custom(format!("bad timestamp: {text}"))),
        }
    }
}

// translations travel as [{language, translation}]; the first entry per
// language wins.
mod translation_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Deserialize)]
    struct Entry {
        language: String,
        #[serde(default)]
        translation: String,
    }

    #[derive(Serialize)]
    struct EntryRef<'a> {
        language: &'a str,
        translation: &'a str,
    }

    pub fn serialize<S>(map: &BTreeMap<String, String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.iter().map(|(language, translation)| EntryRef {
            language,
            translation,
        }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for entry in entries {
            map.entry(entry.language).or_insert(entry.translation);
        }
        Ok(map)
    }
}

/// Pull a message list out of whatever envelope the server used.
pub fn messages_from_json(json: Value) -> FeedResult<Vec<Message>> {
    let items = if json.is_array() {
        json
    } else if let Some(arr) = json.get("messages").filter(|v| v.is_array()) {
        arr.clone()
    } else if let Some(arr) = json.get("data").filter(|v| v.is_array()) {
        arr.clone()
    } else {
        return Err(FeedError::FetchFailure("response carries no message list".into()));
    };
    serde_json::from_value(items).map_err(|e| FeedError::FetchFailure(e.to_string()))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "displayName", alias = "username")]
    pub display_name: String,
    #[serde(default, alias = "avatarUrl", alias = "profileImageUrl")]
    pub avatar_url: Option<String>,
    #[serde(default, alias = "primaryLanguage")]
    pub primary_language: String,
}

/// Read-only lookup of the people taking part in a conversation.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserProfile>,
}

impl UserDirectory {
    pub fn new(users: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    pub fn insert(&mut self, user: UserProfile) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<&UserProfile> {
        self.users.get(id)
    }

    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        match self.users.get(id) {
            Some(u) if !u.display_name.is_empty() => &u.display_name,
            _ => id,
        }
    }

    pub fn avatar_url(&self, id: &str) -> String {
        self.users
            .get(id)
            .and_then(|u| u.avatar_url.clone())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("https://robohash.org/{id}"))
    }
}
