//! Process-wide call-id pool.
//!
//! Every live channel, on every control connection, holds a distinct 16-bit
//! call id. Allocation scans forward from the last id handed out, wrapping
//! around, so a just-released id is not immediately handed out again unless
//! the space is exhausted.

use crate::core::constants::CALL_ID_SPACE;
use crate::core::error::EngineError;

const WORDS: usize = CALL_ID_SPACE / 64;

/// Bitmap of call ids in use.
#[derive(Debug, Clone)]
pub struct CallIdPool {
    bits: Box<[u64; WORDS]>,
    cursor: u16,
    in_use: usize,
}

impl Default for CallIdPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CallIdPool {
    /// Create an empty pool whose first scan starts at `start`.
    pub fn new(start: u16) -> Self {
        Self {
            bits: Box::new([0; WORDS]),
            cursor: start,
            in_use: 0,
        }
    }

    /// Create an empty pool with a random starting point.
    pub fn randomized() -> Self {
        Self::new(rand::random())
    }

    fn test(&self, id: u16) -> bool {
        self.bits[usize::from(id) / 64] & (1 << (id % 64)) != 0
    }

    /// Whether `id` is currently allocated.
    #[cfg(test)]
    pub fn is_allocated(&self, id: u16) -> bool {
        self.test(id)
    }

    /// Number of ids in use.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Allocate the next free id at or after the cursor.
    pub fn allocate(&mut self) -> Result<u16, EngineError> {
        if self.in_use == CALL_ID_SPACE {
            return Err(EngineError::NoCallId);
        }
        let mut id = self.cursor;
        while self.test(id) {
            id = id.wrapping_add(1);
        }
        self.bits[usize::from(id) / 64] |= 1 << (id % 64);
        self.in_use += 1;
        self.cursor = id;
        Ok(id)
    }

    /// Return an id to the pool. Releasing a free id is a no-op.
    pub fn release(&mut self, id: u16) {
        if self.test(id) {
            self.bits[usize::from(id) / 64] &= !(1 << (id % 64));
            self.in_use -= 1;
        }
    }
}
