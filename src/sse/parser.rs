//! `text/event-stream` wire parser.
//!
//! Pure state machines with no I/O: `LineSplitter` re-chunks arbitrary byte
//! slices into lines, `EventParser` folds lines into complete events. The
//! manager drives both over the response body stream.

/// A fully assembled server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `"message"` unless the stream set an `event:` field.
    pub event_type: String,
    /// All `data:` field values joined with `\n`.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// Payload as shown in the stream view: the data verbatim for plain
    /// `message` events, otherwise tagged with the event type.
    pub fn display_payload(&self) -> String {
        if self.event_type == "message" {
            self.data.clone()
        } else {
            format!("[Event: {}] {}", self.event_type, self.data)
        }
    }
}

/// Splits an incoming byte stream into lines.
///
/// Handles LF and CRLF terminators and lines that span chunk boundaries.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete line it finishes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if self.pending.last() == Some(&b'\r') {
                    self.pending.pop();
                }
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }
}

/// Outcome of feeding one line to the parser.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Line consumed; event still accumulating.
    Pending,
    /// Blank line closed an event that carried data.
    Event(SseEvent),
    /// The stream requested a new reconnection delay via `retry:`.
    Retry(u64),
}

/// Line-oriented SSE field accumulator.
#[derive(Debug)]
pub struct EventParser {
    event_type: String,
    data: String,
    id: String,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventParser {
    pub fn new() -> Self {
        Self {
            event_type: "message".to_string(),
            data: String::new(),
            id: String::new(),
        }
    }

    /// Feed one line (without its terminator).
    pub fn push_line(&mut self, line: &str) -> ParseOutcome {
        if line.is_empty() {
            return self.finish_event();
        }

        // Comment line.
        if line.starts_with(':') {
            return ParseOutcome::Pending;
        }

        let Some(colon) = line.find(':') else {
            // Field with no value: ignored.
            return ParseOutcome::Pending;
        };

        let field = &line[..colon];
        let mut value = &line[colon + 1..];
        if let Some(stripped) = value.strip_prefix(' ') {
            value = stripped;
        }

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "id" => self.id = value.to_string(),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    if ms > 0 {
                        return ParseOutcome::Retry(ms);
                    }
                }
            }
            _ => {}
        }

        ParseOutcome::Pending
    }

    fn finish_event(&mut self) -> ParseOutcome {
        let outcome = if self.data.is_empty() {
            ParseOutcome::Pending
        } else {
            ParseOutcome::Event(SseEvent {
                event_type: self.event_type.clone(),
                data: std::mem::take(&mut self.data),
                id: if self.id.is_empty() {
                    None
                } else {
                    Some(self.id.clone())
                },
            })
        };

        self.event_type = "message".to_string();
        self.data.clear();
        self.id.clear();
        outcome
    }
}

/// Apply the event-type allowlist: empty list accepts everything.
pub fn event_passes_filter(event: &SseEvent, filter: &[String]) -> bool {
    filter.is_empty() || filter.iter().any(|allowed| allowed == &event.event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut EventParser, lines: &[&str]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in lines {
            if let ParseOutcome::Event(event) = parser.push_line(line) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_simple_message_event() {
        let mut parser = EventParser::new();
        let events = feed(&mut parser, &["data: hello", ""]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "message");
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].display_payload(), "hello");
    }

    #[test]
    fn test_typed_event_and_multiline_data() {
        let mut parser = EventParser::new();
        let events = feed(
            &mut parser,
            &[
                "event: ping",
                "data: hi",
                "",
                "id: 7",
                "data: line1",
                "data: line2",
                "",
            ],
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].display_payload(), "[Event: ping] hi");
        assert_eq!(events[0].id, None);
        assert_eq!(events[1].data, "line1\nline2");
        assert_eq!(events[1].display_payload(), "line1\nline2");
        assert_eq!(events[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_event_type_resets_between_events() {
        let mut parser = EventParser::new();
        let events = feed(&mut parser, &["event: custom", "data: a", "", "data: b", ""]);
        assert_eq!(events[0].event_type, "custom");
        assert_eq!(events[1].event_type, "message");
    }

    #[test]
    fn test_comment_and_valueless_lines_ignored() {
        let mut parser = EventParser::new();
        let events = feed(
            &mut parser,
            &[": keep-alive", "noise", "data: real", ""],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_blank_line_without_data_emits_nothing() {
        let mut parser = EventParser::new();
        assert_eq!(parser.push_line(""), ParseOutcome::Pending);
        assert_eq!(parser.push_line("id: 3"), ParseOutcome::Pending);
        assert_eq!(parser.push_line(""), ParseOutcome::Pending);
    }

    #[test]
    fn test_only_one_leading_space_stripped() {
        let mut parser = EventParser::new();
        let events = feed(&mut parser, &["data:  two spaces", "data:no space", ""]);
        assert_eq!(events[0].data, " two spaces\nno space");
    }

    #[test]
    fn test_retry_field() {
        let mut parser = EventParser::new();
        assert_eq!(parser.push_line("retry: 2500"), ParseOutcome::Retry(2500));
        assert_eq!(parser.push_line("retry: 0"), ParseOutcome::Pending);
        assert_eq!(parser.push_line("retry: nope"), ParseOutcome::Pending);
    }

    #[test]
    fn test_line_splitter_handles_crlf_and_partial_chunks() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"data: he"), Vec::<String>::new());
        assert_eq!(splitter.push(b"llo\r\n\n"), vec!["data: hello", ""]);
        assert_eq!(splitter.push(b"data: x\ndata:"), vec!["data: x"]);
        assert_eq!(splitter.push(b" y\n"), vec!["data: y"]);
    }

    #[test]
    fn test_event_filter() {
        let event = SseEvent {
            event_type: "ping".to_string(),
            data: "hi".to_string(),
            id: None,
        };
        assert!(event_passes_filter(&event, &[]));
        assert!(event_passes_filter(&event, &["ping".to_string()]));
        assert!(!event_passes_filter(&event, &["pong".to_string()]));
    }
}
