use bytes::Bytes;
use serde_json::Value;

/// One completed Server-Sent-Events event.
///
/// `data` is the joined value of every `data:` line seen before the blank
/// separator line; `event`, `id` and `retry` carry the last value of their
/// respective fields, when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

/// The `data` field of an event, tagged by whether it decodes as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload<'a> {
    Json(Value),
    Raw(&'a str),
}

impl SseEvent {
    pub fn data_payload(&self) -> DataPayload<'_> {
        match serde_json::from_str(&self.data) {
            Ok(value) => DataPayload::Json(value),
            Err(_) => DataPayload::Raw(&self.data),
        }
    }
}

/// Incremental SSE reader.
///
/// Bytes are pushed in whatever chunk sizes the transport produces; lines
/// and events are re-assembled across chunk boundaries. Comment lines are
/// dropped, unknown fields are ignored, and a malformed `retry` value is
/// skipped without aborting the stream.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }

            self.take_line(&line);
        }

        events
    }

    /// Flushes a trailing event whose stream ended without the blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.take_line(&line);
        }
        let mut events = Vec::new();
        self.finish_event(&mut events);
        events
    }

    fn take_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // A bare field name is a field with an empty value.
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => {
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "id" => {
                self.id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none()
            && self.id.is_none()
            && self.retry.is_none()
            && self.data_lines.is_empty()
        {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            id: self.id.take(),
            retry: self.retry.take(),
            data,
        });
        self.data_lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&str]) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(parser.push_str(chunk));
        }
        out.extend(parser.finish());
        out
    }

    #[test]
    fn event_split_across_arbitrary_chunks() {
        let frame = "data: {\"phase\":\"answer\"}\n\n";
        for cut in 1..frame.len() {
            let events = collect(&[&frame[..cut], &frame[cut..]]);
            assert_eq!(events.len(), 1, "cut at {cut}");
            assert_eq!(events[0].data, "{\"phase\":\"answer\"}");
        }
    }

    #[test]
    fn comment_lines_and_unknown_fields_are_dropped() {
        let events = collect(&[": keep-alive\n", "x-custom: 1\n", "data: hello\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn multi_line_data_joined_with_newline() {
        let events = collect(&["data: a\ndata: b\n\n"]);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn id_retry_and_event_fields() {
        let events = collect(&["event: ping\nid: 7\nretry: 250\ndata: x\n\n"]);
        let ev = &events[0];
        assert_eq!(ev.event.as_deref(), Some("ping"));
        assert_eq!(ev.id.as_deref(), Some("7"));
        assert_eq!(ev.retry, Some(250));
    }

    #[test]
    fn malformed_retry_is_skipped() {
        let events = collect(&["retry: soon\ndata: x\n\n"]);
        assert_eq!(events[0].retry, None);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn crlf_line_endings() {
        let events = collect(&["data: one\r\n\r\n"]);
        assert_eq!(events[0].data, "one");
    }

    #[test]
    fn trailing_event_without_separator_is_flushed() {
        let events = collect(&["data: tail"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn data_payload_tags_json() {
        let events = collect(&["data: {\"a\":1}\n\ndata: not json\n\n"]);
        assert!(matches!(events[0].data_payload(), DataPayload::Json(_)));
        assert!(matches!(events[1].data_payload(), DataPayload::Raw(_)));
    }
}
