use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range covering a whole object of `size` bytes
    pub fn whole(size: u64) -> Self {
        Self { start: 0, end: size }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Check that the range lies inside an object of `total_size` bytes
    pub fn fits(&self, total_size: u64) -> bool {
        self.is_valid() && self.end <= total_size
    }

    /// Split into consecutive blocks of at most `block_size` bytes.
    ///
    /// An empty range yields no blocks; only the last block may be short.
    pub fn split(&self, block_size: u64) -> Vec<ByteRange> {
        let block_size = block_size.max(1);
        let mut blocks = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = start.saturating_add(block_size).min(self.end);
            blocks.push(ByteRange::new(start, end));
            start = end;
        }
        blocks
    }

    /// Value for an HTTP `Range` header (inclusive end)
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
