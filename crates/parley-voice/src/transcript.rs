//! Bounded, append-only transcript of serialized event records.

/// Separator placed between consecutive records.
const RECORD_SEPARATOR: char = '\n';

/// A sliding window over serialized event records.
///
/// Records are appended newest-last and joined by newlines. Once the joined
/// text exceeds the byte cap, the oldest bytes are dropped so that only the
/// most recent cap-sized suffix remains. Cuts are moved forward to the next
/// UTF-8 character boundary, so the retained text can be slightly shorter
/// than the cap but never longer.
#[derive(Debug, Clone)]
pub struct TranscriptBuffer {
    text: String,
    cap_bytes: usize,
}

impl TranscriptBuffer {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            text: String::new(),
            cap_bytes,
        }
    }

    pub fn cap_bytes(&self) -> usize {
        self.cap_bytes
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Appends one record, evicting the oldest content beyond the cap.
    pub fn append(&mut self, record: &str) {
        if !self.text.is_empty() {
            self.text.push(RECORD_SEPARATOR);
        }
        self.text.push_str(record);
        self.evict();
    }

    fn evict(&mut self) {
        if self.text.len() <= self.cap_bytes {
            return;
        }
        let mut cut = self.text.len() - self.cap_bytes;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
    }
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TRANSCRIPT_CAP_BYTES)
    }
}
