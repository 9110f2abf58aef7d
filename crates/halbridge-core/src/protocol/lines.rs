//! Byte accumulator that yields complete lines.

/// Raw output bytes not yet terminated by `\n`.
///
/// Lines are decoded only once complete, so a UTF-8 sequence split across
/// two reads is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the first complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Number of buffered bytes still waiting for a terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<String> {
        std::iter::from_fn(|| buffer.next_line()).collect()
    }

    #[test]
    fn partial_line_stays_buffered() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"hello wor");
        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.pending_bytes(), 9);

        buffer.push(b"ld\nnext");
        assert_eq!(drain(&mut buffer), vec!["hello world"]);
        assert_eq!(buffer.pending_bytes(), 4);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let stream = "first reply\r\nsecond\n\nthird æøå\npartial".as_bytes();

        let mut whole = LineBuffer::new();
        whole.push(stream);
        let expected = drain(&mut whole);

        for chunk_size in 1..stream.len() {
            let mut chunked = LineBuffer::new();
            let mut lines = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                chunked.push(chunk);
                lines.extend(drain(&mut chunked));
            }
            assert_eq!(lines, expected, "chunk size {chunk_size}");
        }
        assert_eq!(expected.len(), 4);
    }
}
