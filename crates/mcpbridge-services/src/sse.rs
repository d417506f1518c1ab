/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE decoder.
///
/// Bytes may arrive split anywhere (including inside a UTF-8 sequence);
/// only complete lines are decoded. Comments and unknown fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(ev) = self.dispatch() {
                    out.push(ev);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            self.push(b"\n");
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Decode a complete SSE body.
pub fn decode_all(body: &[u8]) -> Vec<SseEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(body);
    events.extend(decoder.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let ev = decode_all(b"event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(
            ev,
            vec![SseEvent {
                event: "message".into(),
                data: "{\"jsonrpc\":\"2.0\"}".into()
            }]
        );
    }

    #[test]
    fn joins_multiline_data() {
        let ev = decode_all(b"data: a\ndata: b\n\n");
        assert_eq!(ev[0].data, "a\nb");
        assert_eq!(ev[0].event, "message");
    }

    #[test]
    fn handles_chunks_split_mid_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: endpo").is_empty());
        assert!(decoder.push(b"int\r\ndata: /mcp?sessionId=").is_empty());
        let events = decoder.push(b"abc\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/mcp?sessionId=abc");
    }

    #[test]
    fn handles_utf8_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        // Split inside the two-byte 'é'.
        assert!(decoder.push(&bytes[..8]).is_empty());
        let events = decoder.push(&bytes[8..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn ignores_comments_and_empty_events() {
        let ev = decode_all(b": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let ev = decode_all(b"data: tail");
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].data, "tail");
    }
}
