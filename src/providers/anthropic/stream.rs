//! Anthropic SSE event interpretation.
//!
//! Text arrives as `content_block_delta` events carrying a `text_delta`;
//! `message_stop` ends the message. An `error` event aborts the stream.

use serde::Deserialize;

use crate::{
    models::VendorKind,
    providers::{ProviderError, sse::EventParser},
};

/// Anthropic streaming event types
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockDelta { delta: ContentDelta },
    MessageStop,
    Error { error: AnthropicStreamError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    #[serde(rename = "type", default)]
    type_: Option<String>,
    message: String,
}

#[derive(Default)]
pub(super) struct MessageEventParser {
    done: bool,
}

impl EventParser for MessageEventParser {
    fn vendor(&self) -> VendorKind {
        VendorKind::Anthropic
    }

    fn parse(&mut self, data: &str) -> Result<Option<String>, ProviderError> {
        let event: AnthropicStreamEvent = serde_json::from_str(data).map_err(|e| {
            ProviderError::stream(VendorKind::Anthropic, format!("malformed event: {e}"))
        })?;

        match event {
            AnthropicStreamEvent::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
            } => Ok(Some(text)),
            AnthropicStreamEvent::MessageStop => {
                self.done = true;
                Ok(None)
            }
            AnthropicStreamEvent::Error { error } => {
                let message = match error.type_ {
                    Some(kind) => format!("{kind}: {}", error.message),
                    None => error.message,
                };
                Err(ProviderError::stream(VendorKind::Anthropic, message))
            }
            _ => Ok(None),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_delta_and_stop() {
        let mut parser = MessageEventParser::default();
        let text = parser
            .parse(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#)
            .unwrap();
        assert_eq!(text.as_deref(), Some("Hi"));
        assert!(!parser.is_done());

        assert!(parser.parse(r#"{"type":"message_stop"}"#).unwrap().is_none());
        assert!(parser.is_done());
    }

    #[test]
    fn test_bookkeeping_events_are_ignored() {
        let mut parser = MessageEventParser::default();
        for event in [
            r#"{"type":"message_start","message":{"id":"msg_1","model":"claude"}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        ] {
            assert!(parser.parse(event).unwrap().is_none(), "{event}");
        }
    }

    #[test]
    fn test_error_event_fails_stream() {
        let mut parser = MessageEventParser::default();
        let err = parser
            .parse(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("overloaded_error: Overloaded"));
    }
}
