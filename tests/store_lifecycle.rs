//! Store lifecycle integration tests
//!
//! Drives whole store configurations through construction, batch planning,
//! check-in and teardown against a pool that records every checkout, and
//! verifies that every register comes back exactly once.

use std::collections::HashMap;

use proptest::prelude::*;
use tilestore::{
    AddressStrategy, BatchPlan, BiasAxis, CheckOut, DataDirection, DataType, Element, KernelConfig, RegRef,
    RegisterFile, RegisterPool, Result, Sgpr, StoreConfig, StoreError, StoreState, StoreStateGuard, Vgpr,
    WriterState,
};

// ============================================================================
// RECORDING POOL
// ============================================================================

/// Register file that tracks outstanding blocks and rejected check-ins
#[derive(Debug)]
struct RecordingPool {
    inner: RegisterFile,
    outstanding: HashMap<Vgpr, u32>,
    rejected_check_ins: u32,
    check_outs: u32,
}

impl RecordingPool {
    fn new(max_vgprs: u32) -> Self {
        Self {
            inner: RegisterFile::new(max_vgprs, 104),
            outstanding: HashMap::new(),
            rejected_check_ins: 0,
            check_outs: 0,
        }
    }

    fn outstanding(&self) -> u32 {
        self.outstanding.values().sum()
    }
}

impl RegisterPool for RecordingPool {
    fn check_out(&mut self, request: CheckOut) -> Result<Vgpr> {
        let reg = self.inner.check_out(request)?;
        *self.outstanding.entry(reg).or_default() += 1;
        self.check_outs += 1;
        Ok(reg)
    }

    fn check_in(&mut self, reg: Vgpr) -> Result<()> {
        match self.outstanding.get_mut(&reg) {
            Some(n) if *n > 0 => *n -= 1,
            _ => {
                self.rejected_check_ins += 1;
                return Err(StoreError::NotCheckedOut(reg.index()));
            }
        }
        self.inner.check_in(reg)
    }

    fn scalar_capacity(&self) -> u32 {
        self.inner.scalar_capacity()
    }
}

fn grid(kernel: &KernelConfig, rows: u32, cols: u32) -> Vec<Element> {
    (0..rows)
        .flat_map(|r| {
            (0..cols).map(move |c| {
                if kernel.enable_matrix_instruction {
                    Element::new(r, 0, 0, c)
                } else {
                    Element::new(r, c, 0, 0)
                }
            })
        })
        .collect()
}

fn run_store(
    pool: &mut RecordingPool,
    kernel: &KernelConfig,
    store: StoreConfig,
    elements: &[Element],
    batch_len: usize,
) -> Result<Vec<BatchPlan>> {
    let writer = WriterState::for_kernel(kernel);
    let mut state = StoreState::new(pool, kernel, &writer, store, elements)?;
    let mut plans = Vec::new();
    for chunk in elements.chunks(batch_len) {
        let batch = state.plan_batch(pool, chunk, Some(Sgpr(0)), false, BiasAxis::Coord0)?;
        plans.push(batch.clone());
        batch.check_in(pool)?;
        state.check_in_accumulators(pool)?;
    }
    state.teardown(pool)?;
    state.teardown(pool)?;
    Ok(plans)
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_interior_tile_returns_everything() {
    let kernel = KernelConfig::default();
    let elements = grid(&kernel, 4, 4);
    let mut pool = RecordingPool::new(256);

    let plans = run_store(&mut pool, &kernel, StoreConfig::default(), &elements, 4).unwrap();
    assert_eq!(plans.len(), 4);
    assert!(pool.check_outs > 0);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.rejected_check_ins, 0);
    assert_eq!(pool.inner.vgprs.stats().in_use, 0);
}

#[test]
fn test_edge_beta_tile_returns_everything() {
    let mut kernel = KernelConfig {
        group_load_store: true,
        ..KernelConfig::default()
    };
    kernel.problem_type.bias = DataDirection::Read;
    kernel.problem_type.use_scale_alpha_vec = true;
    let elements = grid(&kernel, 3, 4);
    let mut pool = RecordingPool::new(512);

    let plans = run_store(&mut pool, &kernel, StoreConfig::new(1, true, true, false), &elements, 5).unwrap();
    let first = &plans[0].elements[0];
    assert!(first.addr.output.unwrap().is_owned());
    assert!(first.addr.source.unwrap().is_owned());
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.rejected_check_ins, 0);
}

#[test]
fn test_half_output_pairs_across_batches() {
    let mut kernel = KernelConfig {
        enable_matrix_instruction: false,
        ..KernelConfig::default()
    };
    kernel.problem_type.dest_data_type = DataType::Half;
    let elements = grid(&kernel, 1, 4);
    let mut pool = RecordingPool::new(256);

    let plans = run_store(&mut pool, &kernel, StoreConfig::new(1, false, true, false), &elements, 4).unwrap();
    let data: Vec<RegRef> = plans[0].elements.iter().map(|p| p.data.unwrap()).collect();
    assert_eq!(data[1], data[0].borrow());
    assert_eq!(data[3], data[2].borrow());
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_packed_columns_share_per_column() {
    let kernel = KernelConfig {
        packed_c0_indices: 2,
        enable_matrix_instruction: false,
        ..KernelConfig::default()
    };
    let elements = grid(&kernel, 2, 2);
    let mut pool = RecordingPool::new(256);
    let writer = WriterState::for_kernel(&kernel);

    let mut state = StoreState::new(&mut pool, &kernel, &writer, StoreConfig::default(), &elements).unwrap();
    assert_eq!(state.strategy(), AddressStrategy::PerColumnShared);
    // two columns, one register each for the output stream
    assert_eq!(pool.check_outs, 1);
    assert_eq!(pool.inner.vgprs.stats().in_use, 2);

    let batch = state
        .plan_batch(&mut pool, &elements, None, false, BiasAxis::Coord0)
        .unwrap();
    let output = |i: usize| batch.elements[i].addr.output.unwrap().reg();
    assert_eq!(output(0), output(2));
    assert_eq!(output(1), output(3));
    assert_eq!(output(1), output(0).offset(1));

    state.teardown(&mut pool).unwrap();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_guard_releases_on_early_return() {
    fn plan_then_fail(pool: &mut RecordingPool, kernel: &KernelConfig, elements: &[Element]) -> Result<()> {
        let writer = WriterState::for_kernel(kernel);
        let mut guard = StoreStateGuard::new(pool, kernel, &writer, StoreConfig::default(), elements)?;
        guard.plan_batch(elements, None, false, BiasAxis::Coord0)?;
        Err(StoreError::contract("emission failed"))
    }

    let kernel = KernelConfig::default();
    let elements = grid(&kernel, 1, 2);
    let mut pool = RecordingPool::new(256);
    assert!(plan_then_fail(&mut pool, &kernel, &elements).is_err());

    // shared registers and accumulator blocks are back; nothing else was owned
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.rejected_check_ins, 0);
}

#[test]
fn test_construction_failure_leaves_pool_clean() {
    let mut kernel = KernelConfig {
        group_load_store: true,
        ..KernelConfig::default()
    };
    kernel.problem_type.bias = DataDirection::Read;
    let elements = grid(&kernel, 1, 1);
    // output and source fit, the bias block does not
    let mut pool = RecordingPool::new(2);
    let writer = WriterState::for_kernel(&kernel);

    let err = StoreState::new(&mut pool, &kernel, &writer, StoreConfig::default(), &elements).unwrap_err();
    assert!(matches!(err, StoreError::PoolExhausted { .. }));
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_scalar_budget_overflow_is_reported_not_fatal() {
    let kernel = KernelConfig::default();
    let elements = grid(&kernel, 1, 1);
    let mut pool = RecordingPool::new(256);
    pool.inner = RegisterFile::new(256, 4);
    let writer = WriterState::for_kernel(&kernel);

    let mut state =
        StoreState::new(&mut pool, &kernel, &writer, StoreConfig::new(1, false, false, true), &elements).unwrap();
    assert!(state.overflowed());
    assert_eq!(state.requirement().num_elements_per_batch_limited_by_sgprs, 1);
    state.teardown(&mut pool).unwrap();
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn kernel_strategy() -> impl Strategy<Value = KernelConfig> {
    (
        any::<bool>(),
        any::<bool>(),
        prop::sample::select(vec![1usize, 2]),
        any::<bool>(),
        prop::sample::select(vec![DataDirection::None, DataDirection::Read, DataDirection::Write]),
        any::<bool>(),
        any::<bool>(),
        prop::sample::select(vec![DataType::Single, DataType::Half, DataType::Double]),
    )
        .prop_map(
            |(mi, buffer_store, packed_c0, group_load_store, bias, use_e, scale, dest)| {
                let mut kernel = KernelConfig {
                    enable_matrix_instruction: mi,
                    buffer_store,
                    packed_c0_indices: packed_c0,
                    group_load_store,
                    ..KernelConfig::default()
                };
                kernel.problem_type.bias = bias;
                kernel.problem_type.use_e = use_e;
                kernel.problem_type.use_scale_alpha_vec = scale;
                kernel.problem_type.dest_data_type = dest;
                kernel
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every checkout is returned exactly once, whatever the configuration
    #[test]
    fn prop_checkouts_balance(
        kernel in kernel_strategy(),
        rows in 1u32..4,
        cols in 1u32..5,
        wide in any::<bool>(),
        edge in any::<bool>(),
        beta in any::<bool>(),
        atomic in any::<bool>(),
        batch_len in 1usize..6,
    ) {
        // fractional shared columns are rejected; keep packed tiles at width 1
        let gwvw = if wide && kernel.packed_c0_indices == 1 { 2 } else { 1 };
        let cols = if kernel.enable_matrix_instruction { cols.min(4) } else { cols };
        let elements = grid(&kernel, rows, cols);
        let mut pool = RecordingPool::new(2048);

        let plans = run_store(&mut pool, &kernel, StoreConfig::new(gwvw, edge, beta, atomic), &elements, batch_len);
        prop_assert!(plans.is_ok(), "{:?}", plans.err());
        prop_assert_eq!(pool.outstanding(), 0);
        prop_assert_eq!(pool.rejected_check_ins, 0);
        prop_assert_eq!(pool.inner.vgprs.stats().in_use, 0);
    }

    /// Property: new rows are flagged exactly where the row offset changes
    #[test]
    fn prop_new_row_tracks_row_offset(
        rows in 1u32..5,
        cols in 1u32..5,
        batch_len in 1usize..8,
    ) {
        let kernel = KernelConfig { enable_matrix_instruction: false, ..KernelConfig::default() };
        let elements = grid(&kernel, rows, cols);
        let mut pool = RecordingPool::new(256);

        let plans = run_store(&mut pool, &kernel, StoreConfig::default(), &elements, batch_len).unwrap();
        let flat: Vec<_> = plans.iter().flat_map(|b| b.elements.iter()).collect();
        for (i, plan) in flat.iter().enumerate() {
            let expected = i == 0 || flat[i - 1].coord1 != plan.coord1;
            prop_assert_eq!(plan.new_row, expected);
        }
    }

    /// Property: owned registers of one batch never overlap
    #[test]
    fn prop_owned_registers_distinct(
        kernel in kernel_strategy(),
        rows in 1u32..4,
        cols in 1u32..4,
        beta in any::<bool>(),
    ) {
        let elements = grid(&kernel, rows, cols);
        let mut pool = RecordingPool::new(2048);
        let writer = WriterState::for_kernel(&kernel);
        let store = StoreConfig::new(1, true, beta, false);

        let mut state = StoreState::new(&mut pool, &kernel, &writer, store, &elements).unwrap();
        let batch = state.plan_batch(&mut pool, &elements, None, false, BiasAxis::Coord0).unwrap();
        let owned: Vec<Vgpr> = batch
            .elements
            .iter()
            .flat_map(|p| p.registers())
            .filter(|r| r.is_owned())
            .map(RegRef::reg)
            .collect();
        let unique: std::collections::HashSet<_> = owned.iter().collect();
        prop_assert_eq!(unique.len(), owned.len());

        batch.check_in(&mut pool).unwrap();
        state.teardown(&mut pool).unwrap();
        prop_assert_eq!(pool.outstanding(), 0);
    }
}
