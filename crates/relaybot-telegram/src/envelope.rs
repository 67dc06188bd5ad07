// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw update envelope parsing.
//!
//! Ingest stores the verbatim JSON envelope; workers re-parse it here.
//! Only the two update kinds the bridge acts on are recognized: chat
//! messages and inline button callbacks. Anything else parses to `None`
//! and is ignored.

use serde_json::Value;

/// The fields the update worker acts on, pulled out of a raw envelope.
#[derive(Debug, Clone)]
pub struct ParsedUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: Option<i64>,
    pub text: Option<String>,
    pub callback_query_id: Option<String>,
    pub callback_data: Option<String>,
}

/// Chat id of an envelope, for either update kind. Used at ingest time
/// to index the stored row.
pub fn extract_chat_id(payload: &Value) -> Option<String> {
    let message_chat = payload.pointer("/message/chat/id");
    let callback_chat = payload.pointer("/callback_query/message/chat/id");
    for candidate in [message_chat, callback_chat].into_iter().flatten() {
        if let Some(id) = candidate.as_i64() {
            return Some(id.to_string());
        }
        if let Some(id) = candidate.as_str() {
            return Some(id.to_string());
        }
    }
    None
}

/// Parse an envelope into an actionable update, or `None` for update
/// kinds the bridge ignores.
pub fn parse_incoming_update(payload: &Value) -> Option<ParsedUpdate> {
    let update_id = payload.get("update_id")?.as_i64()?;

    if let Some(message) = payload.get("message") {
        let chat_id = message.pointer("/chat/id")?.as_i64()?;
        let user_id = message.pointer("/from/id")?.as_i64()?;
        return Some(ParsedUpdate {
            update_id,
            chat_id,
            user_id,
            message_id: message.get("message_id").and_then(Value::as_i64),
            text: message
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            callback_query_id: None,
            callback_data: None,
        });
    }

    if let Some(callback) = payload.get("callback_query") {
        let callback_id = callback.get("id")?.as_str()?;
        let chat_id = callback.pointer("/message/chat/id")?.as_i64()?;
        let user_id = callback.pointer("/from/id")?.as_i64()?;
        return Some(ParsedUpdate {
            update_id,
            chat_id,
            user_id,
            message_id: callback.pointer("/message/message_id").and_then(Value::as_i64),
            text: None,
            callback_query_id: Some(callback_id.to_string()),
            callback_data: callback
                .get("data")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_message() {
        let payload = json!({
            "update_id": 7,
            "message": {
                "message_id": 55,
                "chat": { "id": 1001 },
                "from": { "id": 9001 },
                "text": "hello"
            }
        });
        let parsed = parse_incoming_update(&payload).unwrap();
        assert_eq!(parsed.update_id, 7);
        assert_eq!(parsed.chat_id, 1001);
        assert_eq!(parsed.user_id, 9001);
        assert_eq!(parsed.text.as_deref(), Some("hello"));
        assert!(parsed.callback_query_id.is_none());
        assert_eq!(extract_chat_id(&payload).as_deref(), Some("1001"));
    }

    #[test]
    fn parses_callback_query() {
        let payload = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cbq-1",
                "from": { "id": 9001 },
                "data": "act:tok",
                "message": { "message_id": 3, "chat": { "id": 1001 } }
            }
        });
        let parsed = parse_incoming_update(&payload).unwrap();
        assert_eq!(parsed.callback_query_id.as_deref(), Some("cbq-1"));
        assert_eq!(parsed.callback_data.as_deref(), Some("act:tok"));
        assert_eq!(parsed.chat_id, 1001);
        assert_eq!(extract_chat_id(&payload).as_deref(), Some("1001"));
    }

    #[test]
    fn ignores_unactionable_updates() {
        assert!(parse_incoming_update(&json!({"update_id": 1})).is_none());
        assert!(parse_incoming_update(&json!({"message": {"chat": {"id": 1}}})).is_none());
        // update_id must be an integer.
        assert!(
            parse_incoming_update(&json!({
                "update_id": "nope",
                "message": {"chat": {"id": 1}, "from": {"id": 2}}
            }))
            .is_none()
        );
    }
}
