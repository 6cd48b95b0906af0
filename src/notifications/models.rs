use serde::{Deserialize, Serialize};
use tracing::warn;

/// A delivery target attached to a monitor. Stored as a JSON array in
/// `monitors.alert_channels`, already normalized to the tagged form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertChannel {
    Email {
        address: String,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
}

impl AlertChannel {
    /// Short channel-type label for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AlertChannel::Email { .. } => "email",
            AlertChannel::Telegram { .. } => "telegram",
        }
    }

    /// Reads the normalized channel list off a monitor row. Entries that no
    /// longer deserialize are skipped with a warning rather than poisoning
    /// the whole list.
    pub fn list_from_json(raw: Option<&serde_json::Value>) -> Vec<AlertChannel> {
        let Some(serde_json::Value::Array(entries)) = raw else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(channel) => Some(channel),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable alert channel entry");
                    None
                }
            })
            .collect()
    }
}

/// Normalizes a raw channel list as supplied at configuration time.
///
/// Accepts the tagged form produced by [`AlertChannel`] serialization as well
/// as the legacy descriptor form `{"type": "...", "value": "..."}`, where a
/// telegram value packs bot token and chat id into one string. Malformed
/// entries are logged and dropped; channel typing is decided here, never at
/// send time.
pub fn normalize_channels(raw: &serde_json::Value) -> Vec<AlertChannel> {
    let Some(entries) = raw.as_array() else {
        warn!("alert channel payload is not an array, ignoring");
        return Vec::new();
    };
    entries.iter().filter_map(parse_channel_entry).collect()
}

fn parse_channel_entry(entry: &serde_json::Value) -> Option<AlertChannel> {
    if let Ok(channel) = serde_json::from_value::<AlertChannel>(entry.clone()) {
        return Some(channel);
    }

    let kind = entry.get("type").and_then(|v| v.as_str());
    let value = entry.get("value").and_then(|v| v.as_str());
    match (kind, value) {
        (Some("email"), Some(address)) if address.contains('@') => Some(AlertChannel::Email {
            address: address.trim().to_string(),
        }),
        (Some("telegram"), Some(descriptor)) => parse_telegram_descriptor(descriptor),
        _ => {
            warn!(entry = %entry, "skipping malformed alert channel entry");
            None
        }
    }
}

/// Splits a legacy telegram descriptor into bot token and chat id. The usual
/// form is `"<bot_token> <chat_id>"`; older rows packed them as
/// `"<bot_token>:<chat_id>"`, where the token itself contains a colon, so
/// the split happens on the last one.
fn parse_telegram_descriptor(descriptor: &str) -> Option<AlertChannel> {
    let trimmed = descriptor.trim();

    let (bot_token, chat_id) = if let Some((token, chat)) = trimmed.split_once(char::is_whitespace)
    {
        (token, chat.trim_start())
    } else if let Some((token, chat)) = trimmed.rsplit_once(':') {
        (token, chat)
    } else {
        warn!("skipping telegram channel with undecodable descriptor");
        return None;
    };

    if bot_token.is_empty() || chat_id.is_empty() {
        warn!("skipping telegram channel with empty token or chat id");
        return None;
    }

    Some(AlertChannel::Telegram {
        bot_token: bot_token.to_string(),
        chat_id: chat_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_entries() {
        let raw = json!([
            {"type": "email", "address": "alerts@example.com"},
            {"type": "telegram", "bot_token": "12345:ABC", "chat_id": "-100200300"},
        ]);

        let channels = normalize_channels(&raw);

        assert_eq!(
            channels,
            vec![
                AlertChannel::Email {
                    address: "alerts@example.com".to_string()
                },
                AlertChannel::Telegram {
                    bot_token: "12345:ABC".to_string(),
                    chat_id: "-100200300".to_string()
                },
            ]
        );
    }

    #[test]
    fn parses_legacy_space_separated_telegram_descriptor() {
        let raw = json!([{"type": "telegram", "value": "12345:ABC-def 987654"}]);

        let channels = normalize_channels(&raw);

        assert_eq!(
            channels,
            vec![AlertChannel::Telegram {
                bot_token: "12345:ABC-def".to_string(),
                chat_id: "987654".to_string()
            }]
        );
    }

    #[test]
    fn parses_legacy_colon_packed_telegram_descriptor() {
        // The bot token contains a colon itself, so only the last one splits.
        let raw = json!([{"type": "telegram", "value": "12345:ABC-def:987654"}]);

        let channels = normalize_channels(&raw);

        assert_eq!(
            channels,
            vec![AlertChannel::Telegram {
                bot_token: "12345:ABC-def".to_string(),
                chat_id: "987654".to_string()
            }]
        );
    }

    #[test]
    fn parses_legacy_email_descriptor() {
        let raw = json!([{"type": "email", "value": "ops@example.com"}]);

        let channels = normalize_channels(&raw);

        assert_eq!(
            channels,
            vec![AlertChannel::Email {
                address: "ops@example.com".to_string()
            }]
        );
    }

    #[test]
    fn drops_malformed_entries_and_keeps_the_rest() {
        let raw = json!([
            {"type": "telegram", "value": "tokenwithoutchat"},
            {"type": "email", "value": "not-an-address"},
            {"type": "pager"},
            {"type": "email", "address": "alerts@example.com"},
        ]);

        let channels = normalize_channels(&raw);

        assert_eq!(
            channels,
            vec![AlertChannel::Email {
                address: "alerts@example.com".to_string()
            }]
        );
    }

    #[test]
    fn non_array_payload_yields_no_channels() {
        assert!(normalize_channels(&json!({"type": "email"})).is_empty());
        assert!(AlertChannel::list_from_json(None).is_empty());
    }

    #[test]
    fn list_from_json_skips_unreadable_rows() {
        let stored = json!([
            {"type": "email", "address": "alerts@example.com"},
            {"type": "carrier-pigeon"},
        ]);

        let channels = AlertChannel::list_from_json(Some(&stored));

        assert_eq!(channels.len(), 1);
    }
}
