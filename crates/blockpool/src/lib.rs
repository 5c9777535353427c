//! Fixed-block buffer pools
//!
//! A [`BufferPool`] carves a caller supplied byte region into `N` blocks of
//! equal size and hands them out one at a time. There is no heap involved:
//! the free list is threaded through the free blocks themselves, each free
//! block holding the index of the next free block in its first two bytes.
//!
//! Blocks are handed out as [`Block`] handles. A handle can only be obtained
//! from [`BufferPool::get()`] and is consumed by [`BufferPool::put()`], so a
//! block can not be returned twice. Every handle also remembers which pool
//! it came from, returning it to a different pool is rejected.
//!
//! The pool state lives behind a [`BlockingMutex`], so one pool may be
//! shared between a task and interrupt context. With a critical section
//! based raw mutex the locked region is a handful of loads and stores.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::{cell::Cell, ops::DerefMut};

use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

/// Link value marking the end of the free list
const END_OF_LIST: u16 = u16::MAX;

/// Bytes of each free block used to hold the free list link
pub const LINK_SIZE: usize = core::mem::size_of::<u16>();

static NEXT_POOL_TAG: critical_section::Mutex<Cell<u16>> =
    critical_section::Mutex::new(Cell::new(0));

/// Errors returned by pool operations
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum PoolError {
    /// A zero or out of range argument, or a block from another pool
    InvalidParam,
    /// Every block is currently handed out
    NoFreeBlocks,
    /// A block was returned to a pool that has no outstanding blocks
    BufferFull,
}

/// An owned block of a [`BufferPool`]
///
/// Blocks are not `Clone`. Dropping a block without returning it with
/// [`BufferPool::put()`] leaks it for the lifetime of the pool.
#[must_use = "a dropped block is lost to its pool"]
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    tag: u16,
    index: u16,
}

impl Block {
    /// Position of this block inside its pool
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Object safe access to a pool of fixed size blocks
///
/// This lets users hold pools of differing backing storage or mutex kinds
/// as `&dyn BlockPool`.
pub trait BlockPool {
    /// Take a block out of the pool
    fn get(&self) -> Result<Block, PoolError>;

    /// Return a block to the pool
    fn put(&self, block: Block) -> Result<(), PoolError>;

    /// Copy `out.len()` bytes starting at `offset` out of `block`
    fn read(&self, block: &Block, offset: usize, out: &mut [u8]) -> Result<(), PoolError>;

    /// Copy `data` into `block`, starting at `offset`
    fn write(&self, block: &mut Block, offset: usize, data: &[u8]) -> Result<(), PoolError>;

    /// Blocks currently available
    fn num_free(&self) -> usize;

    /// Total blocks managed by the pool
    fn num_blocks(&self) -> usize;

    /// Size in bytes of each block
    fn block_size(&self) -> usize;
}

/// A fixed-block memory partition
pub struct BufferPool<R: ScopedRawMutex, B: DerefMut<Target = [u8]>> {
    inner: BlockingMutex<R, Partition<B>>,
    tag: u16,
    num_blocks: u16,
    block_size: usize,
}

struct Partition<B: DerefMut<Target = [u8]>> {
    storage: B,
    block_size: usize,
    num_blocks: u16,
    num_free: u16,
    free_head: u16,
}

// ---- impl BufferPool ----

#[cfg(any(feature = "std", test))]
impl<R: ScopedRawMutex + ConstInit> BufferPool<R, Box<[u8]>> {
    /// Create a pool backed by a freshly allocated boxed slice
    pub fn new_boxslice(num_blocks: usize, block_size: usize) -> Result<Self, PoolError> {
        let len = num_blocks
            .checked_mul(block_size)
            .ok_or(PoolError::InvalidParam)?;
        Self::create(vec![0u8; len].into_boxed_slice(), num_blocks, block_size)
    }
}

impl<R, B> BufferPool<R, B>
where
    R: ScopedRawMutex + ConstInit,
    B: DerefMut<Target = [u8]>,
{
    /// Partition `storage` into `num_blocks` blocks of `block_size` bytes.
    ///
    /// Fails with [`PoolError::InvalidParam`] if either count is zero, if a
    /// block can not hold a free list link, or if `storage` is too small.
    pub fn create(storage: B, num_blocks: usize, block_size: usize) -> Result<Self, PoolError> {
        Self::create_with_mutex(R::INIT, storage, num_blocks, block_size)
    }
}

impl<R, B> BufferPool<R, B>
where
    R: ScopedRawMutex,
    B: DerefMut<Target = [u8]>,
{
    /// Like [`BufferPool::create()`], with an explicitly provided raw mutex
    pub fn create_with_mutex(
        r: R,
        mut storage: B,
        num_blocks: usize,
        block_size: usize,
    ) -> Result<Self, PoolError> {
        if num_blocks == 0 || num_blocks >= END_OF_LIST as usize || block_size < LINK_SIZE {
            return Err(PoolError::InvalidParam);
        }
        let needed = num_blocks
            .checked_mul(block_size)
            .ok_or(PoolError::InvalidParam)?;
        if storage.len() < needed {
            return Err(PoolError::InvalidParam);
        }

        // Thread every block onto the free list, lowest index first
        for (i, chunk) in storage[..needed].chunks_exact_mut(block_size).enumerate() {
            let next = if i + 1 == num_blocks {
                END_OF_LIST
            } else {
                (i + 1) as u16
            };
            chunk[..LINK_SIZE].copy_from_slice(&next.to_le_bytes());
        }

        let num_blocks = num_blocks as u16;
        let tag = critical_section::with(|cs| {
            let ctr = NEXT_POOL_TAG.borrow(cs);
            let tag = ctr.get();
            ctr.set(tag.wrapping_add(1));
            tag
        });

        Ok(Self {
            inner: BlockingMutex::const_new(
                r,
                Partition {
                    storage,
                    block_size,
                    num_blocks,
                    num_free: num_blocks,
                    free_head: 0,
                },
            ),
            tag,
            num_blocks,
            block_size,
        })
    }

    /// Take the block at the head of the free list
    pub fn get(&self) -> Result<Block, PoolError> {
        let index = self.inner.with_lock(|p| p.pop())?;
        Ok(Block {
            tag: self.tag,
            index,
        })
    }

    /// Push `block` back onto the free list
    pub fn put(&self, block: Block) -> Result<(), PoolError> {
        if !self.owns(&block) {
            log::error!("block {} returned to a pool it did not come from", block.index);
            return Err(PoolError::InvalidParam);
        }
        self.inner.with_lock(|p| p.push(block.index)).inspect_err(|_| {
            log::error!("block {} returned to a full pool", block.index);
        })
    }

    /// Run `f` with shared access to the contents of `block`
    pub fn with_block<U>(&self, block: &Block, f: impl FnOnce(&[u8]) -> U) -> Result<U, PoolError> {
        if !self.owns(block) {
            return Err(PoolError::InvalidParam);
        }
        Ok(self.inner.with_lock(|p| {
            let span = p.span(block.index);
            f(&p.storage[span])
        }))
    }

    /// Run `f` with exclusive access to the contents of `block`
    pub fn with_block_mut<U>(
        &self,
        block: &mut Block,
        f: impl FnOnce(&mut [u8]) -> U,
    ) -> Result<U, PoolError> {
        if !self.owns(block) {
            return Err(PoolError::InvalidParam);
        }
        Ok(self.inner.with_lock(|p| {
            let span = p.span(block.index);
            f(&mut p.storage[span])
        }))
    }

    /// Blocks currently on the free list
    pub fn num_free(&self) -> usize {
        self.inner.with_lock(|p| p.num_free as usize)
    }

    /// Total blocks in the partition
    pub fn num_blocks(&self) -> usize {
        self.num_blocks as usize
    }

    /// Size of each block in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn owns(&self, block: &Block) -> bool {
        block.tag == self.tag && block.index < self.num_blocks
    }
}

impl<R, B> BlockPool for BufferPool<R, B>
where
    R: ScopedRawMutex,
    B: DerefMut<Target = [u8]>,
{
    fn get(&self) -> Result<Block, PoolError> {
        BufferPool::get(self)
    }

    fn put(&self, block: Block) -> Result<(), PoolError> {
        BufferPool::put(self, block)
    }

    fn read(&self, block: &Block, offset: usize, out: &mut [u8]) -> Result<(), PoolError> {
        self.with_block(block, |data| {
            let src = offset
                .checked_add(out.len())
                .and_then(|end| data.get(offset..end))
                .ok_or(PoolError::InvalidParam)?;
            out.copy_from_slice(src);
            Ok(())
        })?
    }

    fn write(&self, block: &mut Block, offset: usize, data: &[u8]) -> Result<(), PoolError> {
        self.with_block_mut(block, |buf| {
            let dst = offset
                .checked_add(data.len())
                .and_then(|end| buf.get_mut(offset..end))
                .ok_or(PoolError::InvalidParam)?;
            dst.copy_from_slice(data);
            Ok(())
        })?
    }

    fn num_free(&self) -> usize {
        BufferPool::num_free(self)
    }

    fn num_blocks(&self) -> usize {
        BufferPool::num_blocks(self)
    }

    fn block_size(&self) -> usize {
        BufferPool::block_size(self)
    }
}

// ---- impl Partition ----

impl<B: DerefMut<Target = [u8]>> Partition<B> {
    fn span(&self, index: u16) -> core::ops::Range<usize> {
        let start = index as usize * self.block_size;
        start..start + self.block_size
    }

    fn link(&self, index: u16) -> u16 {
        let start = index as usize * self.block_size;
        u16::from_le_bytes([self.storage[start], self.storage[start + 1]])
    }

    fn set_link(&mut self, index: u16, next: u16) {
        let start = index as usize * self.block_size;
        self.storage[start..start + LINK_SIZE].copy_from_slice(&next.to_le_bytes());
    }

    fn pop(&mut self) -> Result<u16, PoolError> {
        if self.num_free == 0 || self.free_head == END_OF_LIST {
            return Err(PoolError::NoFreeBlocks);
        }
        let index = self.free_head;
        self.free_head = self.link(index);
        self.num_free -= 1;
        Ok(index)
    }

    fn push(&mut self, index: u16) -> Result<(), PoolError> {
        if self.num_free >= self.num_blocks {
            return Err(PoolError::BufferFull);
        }
        let head = self.free_head;
        self.set_link(index, head);
        self.free_head = index;
        self.num_free += 1;
        Ok(())
    }
}
