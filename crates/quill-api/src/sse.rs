//! Server-Sent Events (SSE) parser.
//!
//! Turns an arbitrarily chunked text stream into events. Line endings may be
//! `\n`, `\r\n` or `\r`; an empty line terminates an event.

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

/// Incremental SSE parser that processes text into events.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    /// A chunk ended on `\r`; a leading `\n` in the next chunk belongs to it.
    pending_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut chunk = chunk;
        if self.pending_cr {
            chunk = chunk.strip_prefix('\n').unwrap_or(chunk);
            self.pending_cr = false;
        }
        if chunk.ends_with('\r') {
            self.pending_cr = true;
        }
        self.buffer
            .push_str(&chunk.replace("\r\n", "\n").replace('\r', "\n"));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }
}

/// Parse one block (the lines of a single event) into an event.
fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
    })
}
