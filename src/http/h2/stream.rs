//! HTTP/2 stream identifiers
//!
//! Client-initiated streams use odd identifiers (RFC 7540 Section 5.1.1) that
//! increase monotonically and are never reused on a connection.

use super::MAX_STREAM_ID;

/// Stream ID type
pub type StreamId = u32;

/// Issues client stream identifiers for one connection
#[derive(Debug, Clone)]
pub struct StreamIdAllocator {
    next_id: StreamId,
    exhausted: bool,
}

impl StreamIdAllocator {
    /// Allocator whose first identifier is 1
    pub fn new() -> Self {
        StreamIdAllocator {
            next_id: 1,
            exhausted: false,
        }
    }

    /// Identifier the next call would hand out first
    pub fn peek(&self) -> Option<StreamId> {
        if self.exhausted {
            None
        } else {
            Some(self.next_id)
        }
    }

    /// Allocate `count` identifiers in increasing order
    ///
    /// Fewer than `count` are returned once the 31-bit space is used up.
    pub fn next(&mut self, count: usize) -> Vec<StreamId> {
        let mut ids = Vec::with_capacity(count.min(1024));
        while ids.len() < count && !self.exhausted {
            ids.push(self.next_id);
            if self.next_id >= MAX_STREAM_ID - 1 {
                self.exhausted = true;
            } else {
                self.next_id += 2;
            }
        }
        ids
    }

    /// Identifiers issued so far
    pub fn issued(&self) -> usize {
        if self.exhausted {
            (MAX_STREAM_ID as usize + 1) / 2
        } else {
            (self.next_id as usize - 1) / 2
        }
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
