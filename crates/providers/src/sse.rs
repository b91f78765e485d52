//! Server-sent events frame decoder.
//!
//! Bytes arrive in arbitrary pieces; a frame is dispatched on a blank line
//! and carries the last `event:` name plus all `data:` lines joined by `\n`.
//! Partial lines (including split UTF-8 sequences) stay buffered until the
//! next push.

/// One decoded SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parse the data as JSON. `None` for empty or non-JSON payloads.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.data).ok()
    }

    /// The event name: the `event:` field, else the data's `type`.
    pub fn name(&self, data: Option<&serde_json::Value>) -> Option<String> {
        self.event.clone().or_else(|| {
            data.and_then(|d| d.get("type"))
                .and_then(|t| t.as_str())
                .map(String::from)
        })
    }
}

/// Incremental decoder over a byte stream.
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

    /// Feed bytes, returning every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush at end of stream: a trailing line and any undispatched frame.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.trim().to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // id, retry
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            // An event name with no data is not a frame
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: message.delta\ndata: {\"content\":\"hi\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message.delta"));
        assert_eq!(frames[0].json().unwrap()["content"], "hi");
    }

    #[test]
    fn frames_split_across_pushes() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\r\n").is_empty());
        let frames = decoder.push(b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn split_utf8_sequence_is_preserved() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keepalive\ndata: one\ndata: two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "[DONE]");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn name_falls_back_to_data_type() {
        let frame = SseFrame {
            event: None,
            data: r#"{"type":"content_block_stop","index":0}"#.into(),
        };
        let json = frame.json();
        assert_eq!(frame.name(json.as_ref()).as_deref(), Some("content_block_stop"));
    }
}
