//! Bounded, append-only terminal output buffer.
//!
//! Output is kept as whole chunks and evicted oldest-first once the total
//! length exceeds the budget. The newest chunk is never evicted, so a single
//! oversized chunk stays in the buffer on its own.

use std::collections::VecDeque;

/// Default total length budget per tab, in bytes.
pub const DEFAULT_BUFFER_BUDGET: usize = 1_000_000;

/// One unit of buffered output. Ids come from a process-wide counter and
/// only increase within a single tab's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: u64,
    pub data: String,
}

#[derive(Debug, Clone, Default)]
pub struct TerminalBuffer {
    chunks: VecDeque<Chunk>,
    len: usize,
}

impl TerminalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk`, then evict from the front while over `budget`.
    ///
    /// Returns the number of chunks evicted.
    pub fn push(&mut self, chunk: Chunk, budget: usize) -> usize {
        self.len += chunk.data.len();
        self.chunks.push_back(chunk);

        let mut evicted = 0;
        while self.len > budget && self.chunks.len() > 1 {
            if let Some(oldest) = self.chunks.pop_front() {
                self.len -= oldest.data.len();
                evicted += 1;
            }
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Total length of all buffered chunk data.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Chunks newer than `last_seen`, for incremental consumers.
    pub fn chunks_after(&self, last_seen: Option<u64>) -> impl Iterator<Item = &Chunk> {
        self.chunks
            .iter()
            .filter(move |chunk| last_seen.map_or(true, |id| chunk.id > id))
    }

    /// The buffered output concatenated, oldest first.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.len);
        for chunk in &self.chunks {
            text.push_str(&chunk.data);
        }
        text
    }
}
