//! Incremental Server-Sent Events parsing for streamed responses.
//!
//! The service streams one JSON document per `data:` event:
//!
//! ```text
//! data: {"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]}
//!
//! data: {"candidates":[{"content":{"parts":[{"text":" there"}]}}]}
//! ```

/// A parsed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:` field), if any.
    pub event_type: Option<String>,
    /// The data payload. Multiple `data:` lines are joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Debug, Default)]
struct EventBuilder {
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl EventBuilder {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn build(&mut self) -> SseEvent {
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        event
    }

    /// Feed one line; an empty line closes the pending event.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.has_data().then(|| self.build());
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some((field, value)) = parse_field(line) {
            match field {
                "data" => self.data_lines.push(value.to_string()),
                "event" => self.event_type = Some(value.to_string()),
                _ => {}
            }
        }
        None
    }
}

/// Split `field: value`, dropping one leading space from the value.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    Some((field, value.strip_prefix(' ').unwrap_or(value)))
}

/// Byte-chunk fed SSE parser.
///
/// Network chunks split anywhere, including inside a multi-byte UTF-8
/// sequence; bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseLineParser {
    pending: Vec<u8>,
    builder: EventBuilder,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.builder.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.builder.process_line(line);
        }
        self.builder.has_data().then(|| self.builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_variants() {
        assert_eq!(parse_field("data: hello"), Some(("data", "hello")));
        assert_eq!(parse_field("data:hello"), Some(("data", "hello")));
        assert_eq!(parse_field("data: {\"a\":1}"), Some(("data", "{\"a\":1}")));
        assert_eq!(parse_field("nodata"), None);
    }

    #[test]
    fn events_split_on_blank_lines() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn event_split_across_chunks() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: {\"te").is_empty());
        assert!(parser.push(b"xt\":1}\r\n").is_empty());
        let events = parser.push(b"\r\n");
        assert_eq!(events[0].data, "{\"text\":1}");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut parser = SseLineParser::new();
        assert!(parser.push(&bytes[..split]).is_empty());
        let events = parser.push(&bytes[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn comments_ignored_and_multiline_joined() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b": keepalive\nevent: delta\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn flush_emits_trailing_event() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: last").is_empty());
        let event = parser.flush().unwrap();
        assert_eq!(event.data, "last");
        assert!(parser.flush().is_none());
    }

    #[test]
    fn done_sentinel() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }
}
