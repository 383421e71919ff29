use crate::api::models::Message;

/// Text to show for `message` in `language`: the stored translation when
/// there is a non-empty one, the original body otherwise.
pub fn resolve_text<'a>(message: &'a Message, language: &str) -> &'a str {
    message
        .translations
        .get(language)
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| message.text())
}

/// Copy of `message` whose body carries the resolved text.
pub fn translated(message: &Message, language: &str) -> Message {
    let text = resolve_text(message, language);
    let mut out = message.clone();
    out.body = match (&message.body, text.is_empty()) {
        (None, true) => None,
        _ => Some(text.to_string()),
    };
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_translation_for_target_language() {
        let msg = Message::new("m1", "c1", "u1", "hola", 1).with_translation("en", "hello");
        assert_eq!(resolve_text(&msg, "en"), "hello");
        assert_eq!(translated(&msg, "en").text(), "hello");
    }

    #[test]
    fn falls_back_to_body_when_missing() {
        let msg = Message::new("m1", "c1", "u1", "hola", 1).with_translation("fr", "salut");
        assert_eq!(resolve_text(&msg, "en"), "hola");
    }

    #[test]
    fn empty_translation_counts_as_missing() {
        let msg = Message::new("m1", "c1", "u1", "hola", 1).with_translation("en", "");
        assert_eq!(resolve_text(&msg, "en"), "hola");
    }

    #[test]
    fn attachment_only_message_stays_without_body() {
        let mut msg = Message::new("m1", "c1", "u1", "", 1);
        msg.body = None;
        assert_eq!(resolve_text(&msg, "en"), "");
        assert_eq!(translated(&msg, "en").body, None);
    }
}
