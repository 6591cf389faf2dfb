use shared::protocol::{FramePayload, SseFrame};

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = strip_line_ending(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Feeds raw bytes; a multi-byte character split across chunks is held
    /// back until the rest of it arrives.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending_bytes.extend_from_slice(bytes);
        let cut = complete_utf8_prefix(&self.pending_bytes);
        let tail = self.pending_bytes.split_off(cut);
        let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
        self.pending_bytes = tail;
        self.push(&text)
    }

    /// Ends the stream: the retained partial line is processed and a frame
    /// still waiting for its blank line is emitted.
    pub fn flush(&mut self) -> Option<SseFrame> {
        if !self.pending_bytes.is_empty() {
            let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.buffer.push_str(&text);
        }
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = strip_line_ending(&line);
            if let Some(frame) = self.process_line(line) {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None;
        }
        let Some((field, value)) = line.split_once(':') else {
            return None;
        };
        let value = value.trim();
        match field {
            "event" => {
                self.event = Some(value.to_string());
            }
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        let event = self.event.take().filter(|event| !event.is_empty());
        let data = self.data.take().filter(|data| !data.is_empty());
        let (event, data) = event.zip(data)?;
        Some(SseFrame::new(event, FramePayload::parse(&data)))
    }
}

pub fn decode_all(input: &str) -> Vec<SseFrame> {
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.push(input);
    frames.extend(decoder.flush());
    frames
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Length of the longest prefix that does not end inside a multi-byte sequence.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let index = len - back;
        let byte = bytes[index];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return len,
        };
        return if back < needed { index } else { len };
    }
    len
}

#[cfg(test)]
#[path = "tests/sse_tests.rs"]
mod tests;
