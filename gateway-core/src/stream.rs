//! # Stream Parser (C8)
//!
//! Turns an SSE byte stream into the provider-agnostic [`crate::models::Chunk`]
//! sequence (spec.md §4.8). Line-buffered: partial bytes across reads are
//! retained and prepended to the next read, so feeding the parser
//! byte-by-byte or all-at-once produces the same chunk sequence (spec.md
//! §8's round-trip invariant).
//!
//! Two vendor wire shapes are recognized at the chunk boundary — an
//! OpenAI-style `delta`/`finish_reason` object, and an Anthropic-style
//! typed `event:`/`data:` pair. Decode errors are logged and skipped rather
//! than aborting the stream, matching the teacher's "log and continue"
//! idiom in its own provider stream parsers.

use crate::models::{Chunk, Role, Usage};
use serde::Deserialize;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStart {
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlockDelta {
    #[serde(default)]
    delta: AnthropicTextDelta,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicTextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

/// Parses one SSE byte stream into a sequence of [`Chunk`]s. Create one per
/// stream; feed it bytes as they arrive via [`Self::feed`].
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    current_event: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next slice of bytes. Returns chunks produced from any
    /// complete lines now available; incomplete trailing bytes are buffered
    /// for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Chunk> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut chunks = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_pos);
            if let Some(chunk) = self.process_line(&line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Signal end of stream; flushes any remaining buffered line (a stream
    /// not terminated by a trailing newline).
    pub fn finish(&mut self) -> Vec<Chunk> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(line.trim_end_matches('\r'))
            .into_iter()
            .collect()
    }

    fn process_line(&mut self, line: &str) -> Option<Chunk> {
        if line.is_empty() {
            return None;
        }

        if let Some(event) = line.strip_prefix("event:") {
            self.current_event = Some(event.trim().to_string());
            return None;
        }

        let data = line.strip_prefix("data:")?.trim();
        if data == DONE_SENTINEL {
            return None;
        }

        let event = self.current_event.take();
        match event.as_deref() {
            Some("message_start") | Some("content_block_delta") | Some("message_delta")
            | Some("message_stop") => self.parse_anthropic(event.as_deref().unwrap(), data),
            _ => self.parse_openai(data),
        }
    }

    fn parse_openai(&self, data: &str) -> Option<Chunk> {
        match serde_json::from_str::<OpenAiChunk>(data) {
            Ok(parsed) => {
                let choice = parsed.choices.into_iter().next()?;
                Some(Chunk {
                    content: choice.delta.content,
                    role: choice.delta.role,
                    finish_reason: choice.finish_reason,
                    usage: parsed.usage.map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
                    metadata: Default::default(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable SSE chunk");
                None
            }
        }
    }

    fn parse_anthropic(&self, event: &str, data: &str) -> Option<Chunk> {
        match event {
            "message_start" => match serde_json::from_str::<AnthropicMessageStart>(data) {
                Ok(parsed) => Some(Chunk {
                    role: parsed.role,
                    ..Default::default()
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable message_start");
                    None
                }
            },
            "content_block_delta" => {
                match serde_json::from_str::<AnthropicContentBlockDelta>(data) {
                    Ok(parsed) => Some(Chunk {
                        content: parsed.delta.text,
                        ..Default::default()
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping undecodable content_block_delta");
                        None
                    }
                }
            }
            "message_delta" => match serde_json::from_str::<AnthropicMessageDelta>(data) {
                Ok(parsed) => Some(Chunk {
                    finish_reason: parsed.stop_reason,
                    usage: parsed
                        .usage
                        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
                    ..Default::default()
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable message_delta");
                    None
                }
            },
            "message_stop" => Some(Chunk {
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::accumulate;

    const SCENARIO_4: &str = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}, \"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";

    #[test]
    fn scenario_4_all_at_once() {
        let mut parser = SseParser::new();
        let chunks = parser.feed(SCENARIO_4.as_bytes());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].role, Some(Role::Assistant));
        assert_eq!(chunks[1].content.as_deref(), Some("Hel"));
        assert_eq!(chunks[2].content.as_deref(), Some("lo"));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));

        let acc = accumulate(&chunks);
        assert_eq!(acc.content, "Hello");
        assert_eq!(acc.role, Some(Role::Assistant));
        assert_eq!(acc.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn scenario_4_byte_by_byte_matches_all_at_once() {
        let mut parser = SseParser::new();
        let mut chunks = Vec::new();
        for byte in SCENARIO_4.as_bytes() {
            chunks.extend(parser.feed(&[*byte]));
        }
        chunks.extend(parser.finish());

        let mut whole_parser = SseParser::new();
        let whole_chunks = whole_parser.feed(SCENARIO_4.as_bytes());

        assert_eq!(
            accumulate(&chunks).content,
            accumulate(&whole_chunks).content
        );
    }

    #[test]
    fn anthropic_style_event_frames() {
        let input = "event: message_start\ndata: {\"role\":\"assistant\"}\n\n\
event: content_block_delta\ndata: {\"delta\":{\"text\":\"Hi\"}}\n\n\
event: message_stop\ndata: {}\n\n";
        let mut parser = SseParser::new();
        let chunks = parser.feed(input.as_bytes());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].role, Some(Role::Assistant));
        assert_eq!(chunks[1].content.as_deref(), Some("Hi"));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn malformed_chunk_is_skipped_not_fatal() {
        let input = "data: {not valid json}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n";
        let mut parser = SseParser::new();
        let chunks = parser.feed(input.as_bytes());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("ok"));
    }
}
