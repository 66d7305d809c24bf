//! First-fit, splitting pool allocator backing [`super::MemoryBridge`]'s
//! `alloc_shared`/`free_shared` primitives (spec §4.2).

use crate::error::{CoreError, ErrorKind, PolyResult};

/// Minimum remainder (bytes) a free block must retain after a split,
/// below which the whole block is handed out instead of fragmenting.
const MIN_BLOCK_SIZE: usize = 16;

const BLOCK_MAGIC: u32 = 0x504F_4C43; // "POLC"

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct AllocatedBlock {
    offset: usize,
    len: usize,
    magic: u32,
}

/// A single contiguous byte arena with a first-fit free list. Tokens
/// returned by [`Pool::alloc`] are offsets into the arena plus one (so
/// that `0` is never a valid token), matching the convention used
/// elsewhere in this crate that `0` means "invalid".
pub struct Pool {
    capacity: usize,
    buffer: Vec<u8>,
    free_list: Vec<FreeBlock>,
    allocated: std::collections::HashMap<usize, AllocatedBlock>,
    used: usize,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: vec![0u8; capacity],
            free_list: vec![FreeBlock { offset: 0, len: capacity }],
            allocated: std::collections::HashMap::new(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Allocate `size` bytes, first-fit, splitting the chosen free block
    /// when the remainder is at least [`MIN_BLOCK_SIZE`]. Returns the
    /// token (`offset + 1`) identifying the block.
    pub fn alloc(&mut self, size: usize, zero_init: bool) -> PolyResult<usize> {
        if size == 0 {
            return Err(CoreError::invalid_parameter("allocation size must be non-zero"));
        }
        let idx = self
            .free_list
            .iter()
            .position(|b| b.len >= size)
            .ok_or_else(|| CoreError::out_of_memory("pool exhausted: no free block large enough"))?;
        let block = self.free_list.remove(idx);
        let remainder = block.len - size;
        if remainder >= MIN_BLOCK_SIZE {
            self.free_list.push(FreeBlock {
                offset: block.offset + size,
                len: remainder,
            });
        }
        let allocated_len = if remainder >= MIN_BLOCK_SIZE { size } else { block.len };
        if zero_init {
            self.buffer[block.offset..block.offset + allocated_len].fill(0);
        }
        let token = block.offset + 1;
        self.allocated.insert(
            token,
            AllocatedBlock {
                offset: block.offset,
                len: allocated_len,
                magic: BLOCK_MAGIC,
            },
        );
        self.used += allocated_len;
        Ok(token)
    }

    /// Free a previously allocated token, coalescing with adjacent free
    /// blocks. A corrupted header (bad magic) is fatal (spec §4.2).
    pub fn free(&mut self, token: usize) -> PolyResult<()> {
        let block = self
            .allocated
            .remove(&token)
            .ok_or_else(|| CoreError::not_found("token is not a live allocation"))?;
        if block.magic != BLOCK_MAGIC {
            return Err(CoreError::integrity_check_failed(
                "corrupted block header detected on free",
            ));
        }
        self.used -= block.len;
        self.free_list.push(FreeBlock { offset: block.offset, len: block.len });
        self.coalesce();
        Ok(())
    }

    pub fn write(&mut self, token: usize, bytes: &[u8]) -> PolyResult<()> {
        let block = *self
            .allocated
            .get(&token)
            .ok_or_else(|| CoreError::not_found("token is not a live allocation"))?;
        if bytes.len() > block.len {
            return Err(CoreError::invalid_parameter("write exceeds block length"));
        }
        self.buffer[block.offset..block.offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, token: usize) -> PolyResult<&[u8]> {
        let block = self
            .allocated
            .get(&token)
            .ok_or_else(|| CoreError::not_found("token is not a live allocation"))?;
        Ok(&self.buffer[block.offset..block.offset + block.len])
    }

    /// Test-only hook used to simulate a corrupted header; production code
    /// paths never produce this state from safe-Rust operations alone.
    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self, token: usize) {
        if let Some(block) = self.allocated.get_mut(&token) {
            block.magic = 0xDEAD_BEEF;
        }
    }

    fn coalesce(&mut self) {
        self.free_list.sort_by_key(|b| b.offset);
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(self.free_list.len());
        for block in self.free_list.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.offset + last.len == block.offset {
                    last.len += block.len;
                    continue;
                }
            }
            merged.push(block);
        }
        self.free_list = merged;
    }
}
