//! Report builders
//!
//! Runs the planner over a synthetic output tile and collects what it
//! decided, so the result can be printed as text or JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tilestore::{
    AddressStrategy, BatchPlan, BiasAxis, Element, KernelConfig, RegisterFile, RegisterRequirement, SgprUsage,
    StoreConfig, StoreState, StoreStateGuard, WriterState,
};
use tracing::debug;

use crate::error::{ExplainError, Result};

/// Kernel description file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Kernel fields consumed by the store path
    pub kernel: KernelConfig,
    /// Register widths; derived from the kernel when absent
    pub writer: Option<WriterState>,
}

impl ConfigFile {
    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writer state to plan with
    #[must_use]
    pub fn writer(&self) -> WriterState {
        self.writer
            .clone()
            .unwrap_or_else(|| WriterState::for_kernel(&self.kernel))
    }
}

/// Everything needed to plan one store configuration
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Kernel and writer description
    pub config: ConfigFile,
    /// Store configuration
    pub store: StoreConfig,
    /// Tile rows
    pub rows: u32,
    /// Tile columns, in units of gwvw
    pub cols: u32,
    /// Elements per batch (capped by the scalar budget)
    pub batch: usize,
    /// Vector register limit
    pub max_vgprs: u32,
    /// Scalar register limit
    pub max_sgprs: u32,
}

/// Strategy and register requirements of one store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementsReport {
    /// Store configuration
    pub store: StoreConfig,
    /// Column addressing strategy
    pub strategy: AddressStrategy,
    /// Descriptor moves between rows
    pub srd_inc_for_row: bool,
    /// Mask scalar-register optimisation
    pub sgpr_usage: Option<SgprUsage>,
    /// Registers held for the lifetime of the state
    pub shared_vgprs: u32,
    /// Per-element requirements
    pub requirement: RegisterRequirement,
}

impl RequirementsReport {
    /// Snapshot the decisions of `state`
    #[must_use]
    pub fn from_state(state: &StoreState) -> Self {
        let shared = state.shared();
        let regs = shared.regs();
        // an aliased source block is not a separate checkout
        let source_block = regs.source.filter(|&source| Some(source) != regs.output);
        let distinct = [regs.output, source_block, regs.bias, regs.aux, regs.scale]
            .into_iter()
            .flatten()
            .count() as u32;

        Self {
            store: *state.store_config(),
            strategy: state.strategy(),
            srd_inc_for_row: state.addressing().srd_inc_for_row,
            sgpr_usage: state.addressing().sgpr_usage,
            shared_vgprs: distinct * shared.num_addr_vgpr(),
            requirement: state.requirement().clone(),
        }
    }
}

/// Vector pool usage after planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    /// Highest register count the pool reached
    pub peak: u32,
    /// Soft limit
    pub limit: u32,
    /// Pool grew past its limit
    pub overflowed: bool,
    /// Checkouts made
    pub checkouts: u64,
    /// Registers still checked out (0 after a clean teardown)
    pub leaked: u32,
}

/// Full plan of a synthetic tile
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Strategy and requirements
    pub requirements: RequirementsReport,
    /// Elements per batch actually used
    pub batch_len: usize,
    /// Planned batches in order
    pub batches: Vec<BatchPlan>,
    /// Pool usage
    pub pool: PoolSummary,
}

/// Elements of a `rows` by `cols` output tile, columns stepping by gwvw
#[must_use]
pub fn tile_elements(kernel: &KernelConfig, store: &StoreConfig, rows: u32, cols: u32) -> Vec<Element> {
    let col_width = if kernel.enable_matrix_instruction {
        kernel.mi_output_vector_width
    } else {
        kernel.vector_width_a
    }
    .max(1);
    let row_width = kernel.vector_width_b.max(1);

    (0..rows)
        .flat_map(|r| {
            (0..cols).map(move |c| {
                let linear = c * store.gwvw;
                Element::new(r / row_width, linear / col_width, r % row_width, linear % col_width)
            })
        })
        .collect()
}

/// Select the strategy and requirements for `store` without planning a tile
pub fn requirements(config: &ConfigFile, store: StoreConfig, max_vgprs: u32, max_sgprs: u32) -> Result<RequirementsReport> {
    let mut pool = RegisterFile::new(max_vgprs, max_sgprs);
    let elements = tile_elements(&config.kernel, &store, 1, 1);
    let mut state = StoreState::new(&mut pool, &config.kernel, &config.writer(), store, &elements)?;
    let report = RequirementsReport::from_state(&state);
    state.teardown(&mut pool)?;
    Ok(report)
}

/// Plan a whole synthetic tile
pub fn plan(request: &PlanRequest) -> Result<PlanReport> {
    if request.batch == 0 {
        return Err(ExplainError::InvalidArgument("--batch must be positive".to_string()));
    }
    if request.rows == 0 || request.cols == 0 {
        return Err(ExplainError::InvalidArgument("tile must have at least one element".to_string()));
    }

    let kernel = &request.config.kernel;
    let elements = tile_elements(kernel, &request.store, request.rows, request.cols);
    let mut pool = RegisterFile::new(request.max_vgprs, request.max_sgprs);

    let (requirements, batch_len, batches) = {
        let mut guard = StoreStateGuard::new(&mut pool, kernel, &request.config.writer(), request.store, &elements)?;
        let requirements = RequirementsReport::from_state(guard.state());
        let req = &requirements.requirement;
        let batch_len = request
            .batch
            .min(req.num_elements_per_batch_limited_by_sgprs as usize)
            .max(1);
        debug!(batch_len, elements = elements.len(), "planning tile");

        let mask_count = req.num_mask_sgpr_per_batch + batch_len as u32 * req.num_mask_sgpr_per_element;
        let mask_base = if mask_count > 0 {
            Some(guard.pool().check_out_sgprs(mask_count, 2, "store masks")?)
        } else {
            None
        };

        let mut batches = Vec::new();
        for chunk in elements.chunks(batch_len) {
            let batch = guard.plan_batch(chunk, mask_base, false, BiasAxis::Coord0)?;
            batches.push(batch.clone());
            guard.retire_batch(batch)?;
        }

        if let Some(base) = mask_base {
            guard.pool().check_in_sgprs(base)?;
        }
        guard.finish()?;
        (requirements, batch_len, batches)
    };

    let stats = pool.vgprs.stats();
    Ok(PlanReport {
        requirements,
        batch_len,
        batches,
        pool: PoolSummary {
            peak: stats.size,
            limit: stats.limit,
            overflowed: stats.overflowed,
            checkouts: stats.total_checkouts,
            leaked: stats.in_use,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestore::{DataDirection, StoreError};

    fn request(store: StoreConfig) -> PlanRequest {
        PlanRequest {
            config: ConfigFile::default(),
            store,
            rows: 2,
            cols: 4,
            batch: 4,
            max_vgprs: 256,
            max_sgprs: 104,
        }
    }

    #[test]
    fn test_tile_elements_matrix_instruction() {
        let kernel = KernelConfig::default();
        let elements = tile_elements(&kernel, &StoreConfig::default(), 2, 5);
        assert_eq!(elements.len(), 10);
        // mi_output_vector_width 4: the fifth column starts the next tile index
        assert_eq!(elements[4], Element::new(0, 1, 0, 0));
        assert_eq!(elements[5], Element::new(1, 0, 0, 0));
    }

    #[test]
    fn test_tile_elements_step_by_gwvw() {
        let kernel = KernelConfig {
            enable_matrix_instruction: false,
            vector_width_a: 4,
            ..KernelConfig::default()
        };
        let elements = tile_elements(&kernel, &StoreConfig::new(2, false, false, false), 1, 3);
        assert_eq!(
            elements,
            vec![Element::new(0, 0, 0, 0), Element::new(0, 0, 0, 2), Element::new(0, 1, 0, 0)]
        );
    }

    #[test]
    fn test_requirements_interior() {
        let report = requirements(&ConfigFile::default(), StoreConfig::default(), 256, 104).unwrap();
        assert_eq!(report.strategy, AddressStrategy::SingleShared);
        assert_eq!(report.shared_vgprs, 1);
        assert_eq!(report.requirement.num_vgprs_per_addr, 0);
    }

    #[test]
    fn test_plan_clean_teardown() {
        let report = plan(&request(StoreConfig::new(1, true, true, false))).unwrap();
        assert_eq!(report.requirements.strategy, AddressStrategy::PerElement);
        assert_eq!(report.batches.iter().map(BatchPlan::len).sum::<usize>(), 8);
        assert_eq!(report.pool.leaked, 0);
        assert!(report.pool.checkouts > 0);
    }

    #[test]
    fn test_plan_masks_for_flat_stores() {
        let mut req = request(StoreConfig::new(1, true, false, false));
        req.config.kernel.buffer_store = false;
        let report = plan(&req).unwrap();
        let first = &report.batches[0].elements;
        assert!(first.iter().all(|p| p.mask.is_some()));
        assert_ne!(first[0].mask, first[1].mask);
    }

    #[test]
    fn test_plan_batch_capped_by_scalar_budget() {
        let mut req = request(StoreConfig::new(1, false, false, true));
        req.batch = 64;
        req.max_sgprs = 10;
        let report = plan(&req).unwrap();
        // (10 - 4) / 2 elements fit the scalar budget
        assert_eq!(report.batch_len, 3);
    }

    #[test]
    fn test_plan_rejects_zero_batch() {
        let mut req = request(StoreConfig::default());
        req.batch = 0;
        assert!(matches!(plan(&req), Err(ExplainError::InvalidArgument(_))));
    }

    #[test]
    fn test_plan_reports_pool_exhaustion() {
        let mut req = request(StoreConfig::default());
        req.config.kernel.problem_type.bias = DataDirection::Read;
        req.max_vgprs = 1;
        assert!(matches!(
            plan(&req),
            Err(ExplainError::Store(StoreError::PoolExhausted { .. }))
        ));
    }

    #[test]
    fn test_config_file_partial_json() {
        let config: ConfigFile = serde_json::from_str(r#"{"kernel": {"packed_c0_indices": 2}}"#).unwrap();
        assert_eq!(config.kernel.packed_c0_indices, 2);
        assert_eq!(config.writer(), WriterState::for_kernel(&config.kernel));
    }
}
