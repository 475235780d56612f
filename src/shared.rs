//! Long-lived shared address registers
//!
//! For the shared strategies the address registers of every stream are
//! checked out once, when the store state is built, and held until
//! teardown. Elements only ever borrow them.

use tracing::{trace, warn};

use crate::config::KernelConfig;
use crate::error::{Result, StoreError};
use crate::plan::Element;
use crate::pool::{CheckOut, RegisterPool};
use crate::registers::{RegRef, Stream, StreamRegs, Vgpr};
use crate::strategy::AddressStrategy;

/// Address registers shared by all elements of a store configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharedRegisters {
    regs: StreamRegs<Option<Vgpr>>,
    /// Registers per stream block (column count, 1, or 0)
    num_addr_vgpr: u32,
}

impl SharedRegisters {
    /// Acquire the shared registers `strategy` needs for `elements`
    ///
    /// Nothing is held if any checkout fails.
    pub fn acquire<P: RegisterPool + ?Sized>(
        pool: &mut P,
        kernel: &KernelConfig,
        strategy: AddressStrategy,
        elements: &[Element],
    ) -> Result<Self> {
        let (num_addr_vgpr, suffix) = match strategy {
            AddressStrategy::PerElement => return Ok(Self::default()),
            AddressStrategy::PerColumnShared => {
                let columns = elements.iter().filter(|e| e.is_first_row()).count() as u32;
                if columns == 0 {
                    return Err(StoreError::contract(
                        "per-column shared addressing needs at least one first-row element, none were supplied",
                    ));
                }
                (columns, " for packed elements")
            }
            AddressStrategy::SingleShared => (1, ""),
        };

        let mut shared = Self {
            regs: StreamRegs::default(),
            num_addr_vgpr,
        };
        if let Err(err) = shared.fill(pool, kernel, suffix) {
            if let Err(release_err) = shared.release(pool) {
                warn!(%release_err, "failed to release partially acquired shared registers");
            }
            return Err(err);
        }
        Ok(shared)
    }

    fn fill<P: RegisterPool + ?Sized>(&mut self, pool: &mut P, kernel: &KernelConfig, suffix: &str) -> Result<()> {
        let count = self.num_addr_vgpr;
        let mut take = |name: &str| -> Result<Vgpr> {
            let reg = pool.check_out(CheckOut::new(count, 1, format!("sharedCol{name}Vgprs{suffix}")))?;
            trace!(%reg, count, stream = name, "acquired shared address registers");
            Ok(reg)
        };

        let output = take("D")?;
        self.regs.output = Some(output);
        self.regs.source = Some(if kernel.separate_source_addr() {
            take("C")?
        } else {
            output
        });
        if kernel.bias_enabled() {
            self.regs.bias = Some(take("Bias")?);
        }
        if kernel.aux_enabled() {
            self.regs.aux = Some(take("E")?);
        }
        if kernel.scale_enabled() {
            self.regs.scale = Some(take("ScaleAlphaVec")?);
        }
        Ok(())
    }

    /// Borrowed address registers for the element in `column`
    #[must_use]
    pub fn resolve(&self, column: u32) -> StreamRegs<Option<RegRef>> {
        self.regs.map(|r| r.map(|v| RegRef::Borrowed(v.offset(column))))
    }

    /// Return every held register; each handle is cleared once released
    pub fn release<P: RegisterPool + ?Sized>(&mut self, pool: &mut P) -> Result<()> {
        if let Some(aux) = self.regs.aux.take() {
            pool.check_in(aux)?;
        }
        if let Some(output) = self.regs.output.take() {
            pool.check_in(output)?;
            if let Some(source) = self.regs.source.take() {
                if source != output {
                    pool.check_in(source)?;
                }
            }
        }
        for stream in [Stream::Bias, Stream::Scale] {
            if let Some(reg) = self.regs.get_mut(stream).take() {
                pool.check_in(reg)?;
            }
        }
        trace!("released shared address registers");
        Ok(())
    }

    /// Held registers per stream
    #[must_use]
    pub const fn regs(&self) -> &StreamRegs<Option<Vgpr>> {
        &self.regs
    }

    /// Registers per stream block
    #[must_use]
    pub const fn num_addr_vgpr(&self) -> u32 {
        self.num_addr_vgpr
    }

    /// Check if any register is still held
    #[must_use]
    pub fn is_held(&self) -> bool {
        !self.regs.is_empty()
    }
}

/// Per-stream "address already updated this batch" flags of single-shared addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrUpdated {
    /// Output address updated
    pub output: bool,
    /// Source address updated
    pub source: bool,
    /// Bias address updated
    pub bias: bool,
    /// Auxiliary-output address updated
    pub aux: bool,
}
