use bytes::BytesMut;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("line is not valid UTF-8: {lossy:?}")]
pub struct InvalidUtf8 {
    /// The line with invalid sequences replaced, for logging only.
    pub lossy: String,
}

/// Incremental newline splitter for a worker's output stream.
///
/// Chunks arrive with arbitrary boundaries. `feed` returns every line completed by the
/// chunk, in arrival order, and keeps at most one unterminated tail for the next call.
/// Bytes are accumulated before decoding, so a multi-byte character split across two
/// chunks is decoded once both halves have arrived. A completed line that is still not
/// valid UTF-8 comes back as an error rather than being repaired.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain the complete lines it finishes (without the `\n`).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, InvalidUtf8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(pos + 1);
            lines.push(String::from_utf8(line[..pos].to_vec()).map_err(|e| InvalidUtf8 {
                lossy: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            }));
        }
        lines
    }

    /// The unterminated tail currently held back.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Take the unterminated tail, leaving the buffer empty. Used at end of stream, where
    /// the tail is only logged.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
