//! Address strategy selection
//!
//! Picks how column addresses are kept in registers for one store
//! configuration:
//!
//! - **SingleShared**: data is written row by row; one register per stream
//!   holds the address, horizontal offsets go into the instruction offset
//!   field and the descriptor is bumped on each new row.
//! - **PerColumnShared**: each output column gets its own register; elements
//!   in later rows of that column reuse it. Columns may be non-adjacent.
//! - **PerElement**: every element computes its own address. Required for
//!   boundary tiles (each element is bounds-checked individually) and for
//!   atomics (retry loops need the address preserved).

use serde::{Deserialize, Serialize};

use crate::config::{KernelConfig, StoreConfig};
use crate::error::{Result, StoreError};

/// Column addressing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressStrategy {
    /// One address register per stream for the whole tile
    SingleShared,
    /// One address register per distinct output column
    PerColumnShared,
    /// Fresh address registers for every element
    PerElement,
}

impl AddressStrategy {
    /// Build from the two optimisation flags; both set is a contract violation
    pub fn from_flags(single_shared: bool, per_column_shared: bool) -> Result<Self> {
        match (single_shared, per_column_shared) {
            (true, true) => Err(StoreError::contract(
                "single-shared and per-column-shared addressing are mutually exclusive",
            )),
            (true, false) => Ok(Self::SingleShared),
            (false, true) => Ok(Self::PerColumnShared),
            (false, false) => Ok(Self::PerElement),
        }
    }

    /// Check if address registers are acquired once at construction
    #[must_use]
    pub const fn is_shared(self) -> bool {
        !matches!(self, Self::PerElement)
    }
}

/// Scalar-register usage optimisation for boundary masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SgprUsage {
    /// Buffer stores clamp out-of-bounds writes; no mask is kept
    BufferMask,
    /// One mask per batch, shared by all elements
    BufferEdgeMask,
}

/// Addressing decisions for one store configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingPlan {
    /// Column addressing strategy
    pub strategy: AddressStrategy,
    /// Move the buffer descriptor between rows instead of recomputing addresses
    pub srd_inc_for_row: bool,
    /// Mask scalar-register optimisation, if any
    pub sgpr_usage: Option<SgprUsage>,
}

impl AddressingPlan {
    /// Select the addressing plan for `store` under `kernel`
    pub fn select(kernel: &KernelConfig, store: &StoreConfig) -> Result<Self> {
        let mut single_shared = false;
        let mut per_column_shared = false;
        let mut srd_inc_for_row = false;

        if kernel.buffer_store && !store.edge && !store.atomic {
            if kernel.packed_c0_indices > 1 {
                per_column_shared = true;
            } else if kernel.packed_c1_indices > 1 {
                // each packed row index needs independent bounds tracking
            } else {
                single_shared = true;
            }

            if kernel.packed_c1_indices == 1 {
                srd_inc_for_row = true;
            }
        }

        if kernel.store_remap_vector_width != 0 {
            srd_inc_for_row = true;
        }

        if kernel.problem_type.use_initial_strides_cd {
            single_shared = false;
            per_column_shared = false;
        }

        let sgpr_usage = (kernel.buffer_store && !store.atomic).then_some(if store.edge {
            SgprUsage::BufferEdgeMask
        } else {
            SgprUsage::BufferMask
        });

        Ok(Self {
            strategy: AddressStrategy::from_flags(single_shared, per_column_shared)?,
            srd_inc_for_row,
            sgpr_usage,
        })
    }
}
