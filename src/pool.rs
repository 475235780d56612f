//! Register Pool
//!
//! The planner talks to the register file only through [`RegisterPool`].
//! [`LinearPool`] is a contiguous, alignment-aware allocator over a growable
//! range of register indices; [`RegisterFile`] pairs a vector pool with a
//! scalar pool and answers the scalar-capacity query.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::error::{Result, StoreError};
use crate::registers::{Sgpr, Vgpr};

/// A checkout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOut {
    /// Number of contiguous registers
    pub count: u32,
    /// Start index alignment
    pub align: u32,
    /// Purpose, kept for diagnostics
    pub tag: String,
    /// Refuse to grow the pool past its limit
    pub prevent_overflow: bool,
}

impl CheckOut {
    /// Request `count` registers aligned to `align`
    pub fn new(count: u32, align: u32, tag: impl Into<String>) -> Self {
        Self {
            count,
            align,
            tag: tag.into(),
            prevent_overflow: true,
        }
    }

    /// Set overflow protection
    #[must_use]
    pub fn prevent_overflow(mut self, prevent: bool) -> Self {
        self.prevent_overflow = prevent;
        self
    }
}

/// Register pool used by the store planner
pub trait RegisterPool {
    /// Check out a contiguous, aligned block of vector registers
    fn check_out(&mut self, request: CheckOut) -> Result<Vgpr>;

    /// Return a block previously handed out by [`check_out`](Self::check_out)
    fn check_in(&mut self, reg: Vgpr) -> Result<()>;

    /// Scalar registers still available to the kernel
    fn scalar_capacity(&self) -> u32;
}

/// Checked-out block metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Number of registers
    pub count: u32,
    /// Purpose tag
    pub tag: String,
}

/// Contiguous register allocator with a soft limit
#[derive(Debug, Clone)]
pub struct LinearPool {
    /// Occupancy per register (true = free); length is the current pool size
    free: Vec<bool>,
    /// Registers available before the pool overflows
    limit: u32,
    /// Checked-out blocks keyed by start index
    blocks: HashMap<u32, Block>,
    /// Pool grew past `limit`
    overflowed: bool,
    /// Total checkouts made
    total_checkouts: u64,
}

impl LinearPool {
    /// Create an empty pool that may grow up to `limit` registers
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            free: Vec::new(),
            limit,
            blocks: HashMap::new(),
            overflowed: false,
            total_checkouts: 0,
        }
    }

    /// Allocate `count` registers aligned to `align`
    pub fn allocate(&mut self, count: u32, align: u32, tag: &str, prevent_overflow: bool) -> Result<u32> {
        if count == 0 {
            return Err(StoreError::contract(format!("zero-sized checkout for '{tag}'")));
        }
        let align = align.max(1);

        let start = match self.find_free_run(count, align) {
            Some(start) => start,
            None => self.grow(count, align, tag, prevent_overflow)?,
        };

        for i in start..start + count {
            self.free[i as usize] = false;
        }
        self.blocks.insert(
            start,
            Block {
                count,
                tag: tag.to_string(),
            },
        );
        self.total_checkouts += 1;
        trace!(start, count, align, tag, "register checkout");

        Ok(start)
    }

    /// Free the block starting at `start`
    pub fn free(&mut self, start: u32) -> Result<()> {
        let block = self
            .blocks
            .remove(&start)
            .ok_or(StoreError::NotCheckedOut(start))?;
        for i in start..start + block.count {
            self.free[i as usize] = true;
        }
        trace!(start, count = block.count, tag = %block.tag, "register check-in");
        Ok(())
    }

    /// First aligned run of `count` free registers inside the current size
    fn find_free_run(&self, count: u32, align: u32) -> Option<u32> {
        let size = self.size();
        let mut start = 0u32;
        while start + count <= size {
            let run = start as usize..(start + count) as usize;
            if self.free[run].iter().all(|&f| f) {
                return Some(start);
            }
            start += align;
        }
        None
    }

    /// Extend the pool so an aligned block fits at its end
    fn grow(&mut self, count: u32, align: u32, tag: &str, prevent_overflow: bool) -> Result<u32> {
        let tail_start = self.size() - self.available_block_at_end();
        let start = tail_start.div_ceil(align) * align;
        let new_size = start + count;

        if new_size > self.limit {
            if prevent_overflow {
                return Err(StoreError::PoolExhausted {
                    requested: count,
                    align,
                    tag: tag.to_string(),
                });
            }
            if !self.overflowed {
                warn!(limit = self.limit, new_size, tag, "register pool overflowed its limit");
            }
            self.overflowed = true;
        }

        self.free.resize(new_size as usize, true);
        Ok(start)
    }

    /// Current pool size (highest index ever handed out, plus one)
    #[must_use]
    pub fn size(&self) -> u32 {
        self.free.len() as u32
    }

    /// Soft limit
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Free registers at the end of the pool
    #[must_use]
    pub fn available_block_at_end(&self) -> u32 {
        self.free.iter().rev().take_while(|&&f| f).count() as u32
    }

    /// Check if `start` begins a checked-out block
    #[must_use]
    pub fn is_checked_out(&self, start: u32) -> bool {
        self.blocks.contains_key(&start)
    }

    /// Tag of the block starting at `start`
    #[must_use]
    pub fn tag_of(&self, start: u32) -> Option<&str> {
        self.blocks.get(&start).map(|b| b.tag.as_str())
    }

    /// Check if the pool ever grew past its limit
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let in_use = self.free.iter().filter(|&&f| !f).count() as u32;
        PoolStats {
            size: self.size(),
            limit: self.limit,
            in_use,
            active_blocks: self.blocks.len(),
            total_checkouts: self.total_checkouts,
            overflowed: self.overflowed,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Current pool size
    pub size: u32,
    /// Soft limit
    pub limit: u32,
    /// Registers currently checked out
    pub in_use: u32,
    /// Blocks currently checked out
    pub active_blocks: usize,
    /// Total checkouts made
    pub total_checkouts: u64,
    /// Pool grew past its limit
    pub overflowed: bool,
}

/// Vector and scalar register pools of one kernel
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Vector registers
    pub vgprs: LinearPool,
    /// Scalar registers
    pub sgprs: LinearPool,
}

impl RegisterFile {
    /// Create a register file with the given hardware limits
    #[must_use]
    pub fn new(max_vgprs: u32, max_sgprs: u32) -> Self {
        Self {
            vgprs: LinearPool::new(max_vgprs),
            sgprs: LinearPool::new(max_sgprs),
        }
    }

    /// Check out scalar registers (mask bases, descriptors)
    pub fn check_out_sgprs(&mut self, count: u32, align: u32, tag: &str) -> Result<Sgpr> {
        self.sgprs.allocate(count, align, tag, true).map(Sgpr)
    }

    /// Return scalar registers
    pub fn check_in_sgprs(&mut self, reg: Sgpr) -> Result<()> {
        self.sgprs.free(reg.0)
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new(256, 104)
    }
}

impl RegisterPool for RegisterFile {
    fn check_out(&mut self, request: CheckOut) -> Result<Vgpr> {
        self.vgprs
            .allocate(request.count, request.align, &request.tag, request.prevent_overflow)
            .map(Vgpr)
    }

    fn check_in(&mut self, reg: Vgpr) -> Result<()> {
        self.vgprs.free(reg.0)
    }

    fn scalar_capacity(&self) -> u32 {
        (self.sgprs.limit() + self.sgprs.available_block_at_end()).saturating_sub(self.sgprs.size())
    }
}
