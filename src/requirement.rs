//! Register requirement model
//!
//! Derives, once per store configuration, how many scalar and vector
//! registers each element of a write batch needs. The numbers do not change
//! while store code for that configuration is generated.

use num_rational::Ratio;
use serde::Serialize;
use tracing::warn;

use crate::config::{DataDirection, KernelConfig, RegCount, StoreConfig, WriterState};
use crate::strategy::{AddressingPlan, SgprUsage};

/// Element ceiling reported when masks cost no per-element scalar registers
pub const UNLIMITED_ELEMENTS: u32 = 9999;

/// Per-element register requirements of one store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequirement {
    /// Global write vector width the counts were derived for
    pub gwvw: u32,
    /// Address registers per element and stream (0 when addressing is shared)
    pub num_vgprs_per_addr: u32,
    /// Mask scalar registers per element
    pub num_mask_sgpr_per_element: u32,
    /// Mask scalar registers per batch
    pub num_mask_sgpr_per_batch: u32,
    /// Temporary scalar registers per batch
    pub num_temp_sgpr_per_batch: u32,
    /// Largest batch the scalar budget allows
    pub num_elements_per_batch_limited_by_sgprs: u32,
    /// Scalar budget could not fit a single element
    pub sgpr_overflow: bool,
    /// Data-staging registers per vector-width unit (may be 1/2 or 1/4)
    pub num_vgprs_per_data_per_vi: RegCount,
    /// Accumulator registers per output value (0 when results are not staged)
    pub num_vgpr_per_value: u32,
    /// Two adjacent elements pack into one data register
    pub half_data_reg_per_vi: bool,
    /// Total vector registers one element needs
    pub num_vgprs_per_element: u32,
    /// Alignment of the per-element register block
    pub align: u32,
}

impl RegisterRequirement {
    /// Derive requirements for `store` given the scalar registers still available
    pub fn compute(
        kernel: &KernelConfig,
        writer: &WriterState,
        store: &StoreConfig,
        plan: &AddressingPlan,
        available_sgprs: u32,
    ) -> Self {
        let gwvw = store.gwvw;

        let num_vgprs_per_addr = if plan.strategy.is_shared() {
            0
        } else if kernel.buffer_store {
            writer.rpgo
        } else {
            writer.rpga
        };

        let lane = writer.lane_sgpr_count;
        let (num_mask_sgpr_per_element, num_mask_sgpr_per_batch, num_temp_sgpr_per_batch) =
            match plan.sgpr_usage {
                Some(SgprUsage::BufferMask) => (0, 0, lane),
                Some(SgprUsage::BufferEdgeMask) => (0, lane, 2 * lane),
                None => (lane, 0, 2 * lane),
            };

        let (num_elements_per_batch_limited_by_sgprs, sgpr_overflow) = element_ceiling(
            available_sgprs,
            num_temp_sgpr_per_batch,
            num_mask_sgpr_per_batch,
            num_mask_sgpr_per_element,
        );
        if sgpr_overflow {
            warn!(
                available_sgprs,
                num_temp_sgpr_per_batch,
                num_mask_sgpr_per_batch,
                num_mask_sgpr_per_element,
                "scalar registers cannot hold one store element; kernel needs more sgprs"
            );
        }

        let num_vgprs_per_data_per_vi = if store.atomic {
            // flat atomics keep a separate return register, plus one for alignment
            let regs_per_element = if kernel.buffer_store { 2 } else { 4 };
            Ratio::new(regs_per_element * writer.bpe_c_external, writer.bpr)
        } else if store.beta {
            Ratio::new(writer.bpe_c_external, writer.bpr)
        } else {
            Ratio::from_integer(0)
        };

        let num_vgpr_per_value = if writer.serialized_store {
            writer.bpe_c_internal / writer.bpr
        } else {
            0
        };

        // 16-bit buffer loads zero the other half on ECC parts, so a shared
        // data register would be clobbered when strides are non-default.
        let data_per_element = num_vgprs_per_data_per_vi * gwvw;
        let half_data_reg_per_vi = data_per_element == Ratio::new(1, 2)
            && !(kernel.problem_type.use_initial_strides_cd && writer.has_ecc_half)
            && kernel.problem_type.dest_data_type.num_registers() != Ratio::new(1, 4);

        let data_regs = data_per_element.ceil().to_integer();
        let accumulator_regs = num_vgpr_per_value * gwvw;

        let mut num_vgprs_per_element = accumulator_regs + num_vgprs_per_addr + data_regs;
        if kernel.separate_source_addr() {
            num_vgprs_per_element += num_vgprs_per_addr;
        }
        if kernel.aux_enabled() {
            num_vgprs_per_element += num_vgprs_per_addr;
            if kernel.loads_aux_data() {
                num_vgprs_per_element += kernel.problem_type.compute_data_type.whole_registers() * gwvw;
            }
        }
        if kernel.bias_enabled() {
            num_vgprs_per_element += num_vgprs_per_addr;
            if kernel.problem_type.bias == DataDirection::Read {
                num_vgprs_per_element += kernel.problem_type.compute_data_type.whole_registers() * gwvw;
            }
        }
        if kernel.scale_enabled() {
            num_vgprs_per_element += num_vgprs_per_addr;
            num_vgprs_per_element += kernel.problem_type.data_type.whole_registers() * gwvw;
        }

        let align = [num_vgprs_per_addr, accumulator_regs, data_regs]
            .into_iter()
            .filter(|&n| n > 1)
            .fold(1, u32::max);

        Self {
            gwvw,
            num_vgprs_per_addr,
            num_mask_sgpr_per_element,
            num_mask_sgpr_per_batch,
            num_temp_sgpr_per_batch,
            num_elements_per_batch_limited_by_sgprs,
            sgpr_overflow,
            num_vgprs_per_data_per_vi,
            num_vgpr_per_value,
            half_data_reg_per_vi,
            num_vgprs_per_element,
            align,
        }
    }

    /// Data-staging registers per element (per-unit count times vector width)
    #[must_use]
    pub fn data_regs_per_element(&self) -> RegCount {
        self.num_vgprs_per_data_per_vi * self.gwvw
    }

    /// Data-staging registers per element, rounded up to whole registers
    #[must_use]
    pub fn whole_data_regs_per_element(&self) -> u32 {
        self.data_regs_per_element().ceil().to_integer()
    }

    /// Check if elements need a data-staging register at all
    #[must_use]
    pub fn needs_data_regs(&self) -> bool {
        self.num_vgprs_per_data_per_vi != Ratio::from_integer(0)
    }
}

/// Element-count ceiling imposed by the scalar budget, and the overflow flag
fn element_ceiling(available: u32, temp_per_batch: u32, mask_per_batch: u32, mask_per_element: u32) -> (u32, bool) {
    if mask_per_element == 0 {
        return (UNLIMITED_ELEMENTS, false);
    }
    // scalar blocks are allocated in pairs
    let available = i64::from(available & !1);
    let raw = (available - i64::from(temp_per_batch) - i64::from(mask_per_batch))
        .div_euclid(i64::from(mask_per_element));
    if raw <= 0 {
        (1, true)
    } else {
        (u32::try_from(raw).unwrap_or(u32::MAX), false)
    }
}
