//! Store state
//!
//! [`StoreState`] is built once per (gwvw, edge, beta, atomic) store
//! configuration and reused for every write batch of that configuration.
//! Construction selects the addressing plan, models register requirements
//! and acquires the shared address registers. [`StoreState::plan_batch`]
//! then assigns registers and coordinate offsets to each element of a batch.
//!
//! Registers checked out here must all come back:
//! - per-element registers through [`BatchPlan::check_in`] (the emission layer),
//! - accumulator blocks through [`StoreState::check_in_accumulators`],
//! - shared registers through [`StoreState::teardown`].
//!
//! [`StoreStateGuard`] runs the teardown on every exit path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::{DataDirection, KernelConfig, StoreConfig, WriterState};
use crate::coord::coord_offsets;
use crate::error::{Result, StoreError};
use crate::plan::{BatchPlan, Element, ElementPlan};
use crate::pool::{CheckOut, RegisterPool};
use crate::registers::{RegRef, Sgpr, Stream, StreamRegs, Vgpr};
use crate::requirement::RegisterRequirement;
use crate::shared::{AddrUpdated, SharedRegisters};
use crate::strategy::{AddressStrategy, AddressingPlan};

/// Coordinate the bias vector is indexed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BiasAxis {
    /// Bias varies along columns (coord0)
    #[default]
    Coord0,
    /// Bias varies along rows (coord1)
    Coord1,
}

/// Register planning state for one store configuration
#[derive(Debug)]
pub struct StoreState {
    kernel: KernelConfig,
    writer: WriterState,
    store: StoreConfig,
    addressing: AddressingPlan,
    requirement: RegisterRequirement,
    shared: SharedRegisters,
    updated: AddrUpdated,
    /// Row offset of the last planned element
    last_coord1: u32,
    first_batch: bool,
    is_reset: bool,
    /// Accumulator blocks checked out of the pool and not yet returned
    held_accumulators: Vec<Vgpr>,
}

impl StoreState {
    /// Build the store state for `store`
    ///
    /// `elements` is every element the configuration will write; it sizes the
    /// per-column shared blocks.
    pub fn new<P: RegisterPool + ?Sized>(
        pool: &mut P,
        kernel: &KernelConfig,
        writer: &WriterState,
        store: StoreConfig,
        elements: &[Element],
    ) -> Result<Self> {
        kernel.validate()?;
        if store.gwvw == 0 {
            return Err(StoreError::invalid_config("gwvw must be non-zero"));
        }
        if writer.bpr == 0 {
            return Err(StoreError::invalid_config("bytes per register must be non-zero"));
        }

        let addressing = AddressingPlan::select(kernel, &store)?;
        let requirement =
            RegisterRequirement::compute(kernel, writer, &store, &addressing, pool.scalar_capacity());
        let shared = SharedRegisters::acquire(pool, kernel, addressing.strategy, elements)?;

        debug!(
            gwvw = store.gwvw,
            edge = store.edge,
            beta = store.beta,
            atomic = store.atomic,
            strategy = ?addressing.strategy,
            srd_inc_for_row = addressing.srd_inc_for_row,
            vgprs_per_element = requirement.num_vgprs_per_element,
            align = requirement.align,
            sgpr_ceiling = requirement.num_elements_per_batch_limited_by_sgprs,
            "store state created"
        );

        Ok(Self {
            kernel: kernel.clone(),
            writer: writer.clone(),
            store,
            addressing,
            requirement,
            shared,
            updated: AddrUpdated::default(),
            last_coord1: 0,
            first_batch: true,
            is_reset: false,
            held_accumulators: Vec::new(),
        })
    }

    /// Assign registers and offsets to every element of one write batch
    ///
    /// `mask_base` is the first scalar register reserved for boundary masks,
    /// if the batch uses them. `optimized_no_load_loop` lifts the pool's
    /// overflow protection for address and paired data registers. On error
    /// every register checked out during this call is returned to the pool.
    #[instrument(level = "debug", skip(self, pool, elements), fields(batch = elements.len()))]
    pub fn plan_batch<P: RegisterPool + ?Sized>(
        &mut self,
        pool: &mut P,
        elements: &[Element],
        mask_base: Option<Sgpr>,
        optimized_no_load_loop: bool,
        bias_axis: BiasAxis,
    ) -> Result<BatchPlan> {
        let held_before = self.held_accumulators.len();
        let coord1_before = self.last_coord1;
        let mut batch = BatchContext {
            pool,
            prevent_overflow: !optimized_no_load_loop,
            acquired: Vec::new(),
            bias_regs: HashMap::new(),
            scale_regs: HashMap::new(),
            last_data: None,
        };

        let mut plans = Vec::with_capacity(elements.len());
        for (ei, element) in elements.iter().enumerate() {
            match self.plan_element(&mut batch, ei as u32, element, mask_base, bias_axis) {
                Ok(plan) => plans.push(plan),
                Err(err) => {
                    self.held_accumulators.truncate(held_before);
                    self.last_coord1 = coord1_before;
                    batch.roll_back();
                    return Err(err);
                }
            }
        }

        self.first_batch = false;
        self.is_reset = false;
        Ok(BatchPlan { elements: plans })
    }

    fn plan_element<P: RegisterPool + ?Sized>(
        &mut self,
        batch: &mut BatchContext<'_, P>,
        ei: u32,
        element: &Element,
        mask_base: Option<Sgpr>,
        bias_axis: BiasAxis,
    ) -> Result<ElementPlan> {
        let gwvw = self.store.gwvw;
        let offsets = coord_offsets(&self.kernel, element);
        let new_row = (self.first_batch && ei == 0) || offsets.coord1 != self.last_coord1;
        let row_delta = i64::from(offsets.coord1) - i64::from(self.last_coord1);

        let addr = match self.addressing.strategy {
            AddressStrategy::SingleShared => self.shared.resolve(0),
            AddressStrategy::PerColumnShared => self.shared.resolve(self.column_index(element)?),
            AddressStrategy::PerElement => self.element_addr_regs(batch, ei)?,
        };

        let data = self.data_reg(batch, ei)?;

        let problem = &self.kernel.problem_type;
        let value_regs = problem.compute_data_type.whole_registers() * gwvw;

        let bias_data = if problem.bias == DataDirection::Read {
            let key = match bias_axis {
                BiasAxis::Coord0 => offsets.coord0,
                BiasAxis::Coord1 => offsets.coord1,
            };
            Some(batch.memoized(MemoMap::Bias, key, value_regs, format!("bias data for ei={ei}"))?)
        } else {
            None
        };

        let aux_data = if self.kernel.loads_aux_data() {
            let req = CheckOut::new(value_regs, value_regs, format!("e data for ei={ei}")).prevent_overflow(false);
            Some(RegRef::Owned(batch.check_out(req)?))
        } else {
            None
        };

        let scale_data = if self.kernel.scale_enabled() {
            Some(batch.memoized(
                MemoMap::Scale,
                offsets.coord0,
                value_regs,
                format!("scaleAlphaVec data for ei={ei}"),
            )?)
        } else {
            None
        };

        let mask = mask_base.map(|base| {
            if self.addressing.sgpr_usage.is_some() {
                base
            } else {
                base.offset(
                    self.requirement.num_mask_sgpr_per_batch + ei * self.requirement.num_mask_sgpr_per_element,
                )
            }
        });

        let accumulator = self.accumulator_index(batch, element)?;

        self.last_coord1 = offsets.coord1;

        Ok(ElementPlan {
            element: *element,
            coord0: offsets.coord0,
            coord1: offsets.coord1,
            row_delta,
            new_row,
            addr,
            data,
            bias_data,
            aux_data,
            scale_data,
            mask,
            accumulator,
        })
    }

    /// Shared column register an element addresses through
    fn column_index(&self, element: &Element) -> Result<u32> {
        let width = if self.kernel.enable_matrix_instruction {
            self.kernel.mi_output_vector_width
        } else {
            self.kernel.vector_width_a
        };
        let linear = element.d0 * width + element.vc0;
        let gwvw = self.store.gwvw;
        if linear % gwvw != 0 {
            return Err(StoreError::contract(format!(
                "column {linear} of element {element:?} is not a multiple of gwvw {gwvw}"
            )));
        }
        let column = linear / gwvw;
        if column >= self.shared.num_addr_vgpr() {
            return Err(StoreError::contract(format!(
                "column {column} of element {element:?} outside the {} shared column registers",
                self.shared.num_addr_vgpr()
            )));
        }
        Ok(column)
    }

    fn element_addr_regs<P: RegisterPool + ?Sized>(
        &self,
        batch: &mut BatchContext<'_, P>,
        ei: u32,
    ) -> Result<StreamRegs<Option<RegRef>>> {
        let count = self.requirement.num_vgprs_per_addr;
        let prevent_overflow = batch.prevent_overflow;
        let mut take = |stream: Stream| -> Result<Option<RegRef>> {
            let req = CheckOut::new(count, count, format!("{}Batch-addr for ei={ei}", stream.tag()))
                .prevent_overflow(prevent_overflow);
            Ok(Some(RegRef::Owned(batch.check_out(req)?)))
        };

        let output = take(Stream::Output)?;
        let source = if self.kernel.separate_source_addr() {
            take(Stream::Source)?
        } else {
            output.map(RegRef::borrow)
        };
        let bias = if self.kernel.bias_enabled() { take(Stream::Bias)? } else { None };
        let aux = if self.kernel.aux_enabled() { take(Stream::Aux)? } else { None };
        let scale = if self.kernel.scale_enabled() { take(Stream::Scale)? } else { None };

        Ok(StreamRegs {
            output,
            source,
            bias,
            aux,
            scale,
        })
    }

    fn data_reg<P: RegisterPool + ?Sized>(&self, batch: &mut BatchContext<'_, P>, ei: u32) -> Result<Option<RegRef>> {
        let req = &self.requirement;
        if !req.needs_data_regs() {
            return Ok(None);
        }

        if req.half_data_reg_per_vi {
            let count = (req.data_regs_per_element() * 2).to_integer();
            let prevent_overflow = batch.prevent_overflow;
            let pair = move || {
                CheckOut::new(count, count, format!("writeBatch-data for ei={ei} and ei={}", ei + 1))
                    .prevent_overflow(prevent_overflow)
            };
            let problem = &self.kernel.problem_type;
            if problem.high_precision_accumulate && problem.dest_data_type.is_half_or_bf16() {
                return Ok(Some(RegRef::Owned(batch.check_out(pair())?)));
            }
            if ei % 2 == 0 {
                let reg = batch.check_out(pair())?;
                batch.last_data = Some(reg);
                return Ok(Some(RegRef::Owned(reg)));
            }
            return match batch.last_data.take() {
                Some(reg) => Ok(Some(RegRef::Borrowed(reg))),
                None => Err(StoreError::contract(format!(
                    "element {ei} has no even partner to share a data register with"
                ))),
            };
        }

        let count = req.whole_data_regs_per_element();
        let request = CheckOut::new(count, count, format!("writeBatch-data for ei={ei}")).prevent_overflow(false);
        Ok(Some(RegRef::Owned(batch.check_out(request)?)))
    }

    fn accumulator_index<P: RegisterPool + ?Sized>(
        &mut self,
        batch: &mut BatchContext<'_, P>,
        element: &Element,
    ) -> Result<u32> {
        let kernel = &self.kernel;
        let start = self.writer.start_vgpr_valu;

        if kernel.local_split_u > 1 {
            return Ok(start + element.vc0 + element.d1 * kernel.vector_width_a);
        }

        if kernel.enable_matrix_instruction {
            let per_value = self.requirement.num_vgpr_per_value;
            if per_value == 0 {
                return Err(StoreError::contract(
                    "matrix-instruction stores need staged accumulator registers",
                ));
            }
            let count = per_value * self.store.gwvw;
            let reg = batch.check_out(CheckOut::new(count, count, "vgprValuC"))?;
            self.held_accumulators.push(reg);
            return Ok(reg.index() / per_value);
        }

        let vw = kernel.vector_width_a;
        let tt0 = kernel.thread_tile0;
        Ok(start + element.vc0 + element.d0 * vw + element.vc1 * tt0 + element.d1 * vw * tt0)
    }

    /// Return the accumulator blocks checked out by previous batches
    pub fn check_in_accumulators<P: RegisterPool + ?Sized>(&mut self, pool: &mut P) -> Result<()> {
        if !self.writer.serialized_store {
            return Ok(());
        }
        if self.kernel.local_split_u == 1 {
            while let Some(reg) = self.held_accumulators.pop() {
                if let Err(err) = pool.check_in(reg) {
                    self.held_accumulators.push(reg);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Clear per-batch derived state; shared registers stay held
    pub fn reset(&mut self) {
        if self.is_reset {
            return;
        }
        if self.addressing.strategy == AddressStrategy::SingleShared {
            self.updated = AddrUpdated::default();
        }
        self.last_coord1 = 0;
        self.is_reset = true;
    }

    /// Release all shared and accumulator registers, then reset
    ///
    /// Safe to call more than once.
    pub fn teardown<P: RegisterPool + ?Sized>(&mut self, pool: &mut P) -> Result<()> {
        self.shared.release(pool)?;
        self.check_in_accumulators(pool)?;
        self.reset();
        Ok(())
    }

    /// Addressing decisions
    #[must_use]
    pub const fn addressing(&self) -> &AddressingPlan {
        &self.addressing
    }

    /// Column addressing strategy
    #[must_use]
    pub const fn strategy(&self) -> AddressStrategy {
        self.addressing.strategy
    }

    /// Register requirements
    #[must_use]
    pub const fn requirement(&self) -> &RegisterRequirement {
        &self.requirement
    }

    /// Store configuration this state was built for
    #[must_use]
    pub const fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    /// Shared address registers
    #[must_use]
    pub const fn shared(&self) -> &SharedRegisters {
        &self.shared
    }

    /// Scalar registers could not fit one element
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.requirement.sgpr_overflow
    }

    /// Single-shared "address updated" flags
    #[must_use]
    pub const fn addr_updated(&self) -> &AddrUpdated {
        &self.updated
    }

    /// Mutable single-shared "address updated" flags, set by the emission layer
    pub fn addr_updated_mut(&mut self) -> &mut AddrUpdated {
        &mut self.updated
    }

    /// Row offset of the last planned element
    #[must_use]
    pub const fn last_row_offset(&self) -> u32 {
        self.last_coord1
    }

    /// Check if no batch has been planned yet
    #[must_use]
    pub const fn is_first_batch(&self) -> bool {
        self.first_batch
    }

    /// Accumulator blocks awaiting check-in
    #[must_use]
    pub fn held_accumulators(&self) -> &[Vgpr] {
        &self.held_accumulators
    }
}

#[derive(Debug, Clone, Copy)]
enum MemoMap {
    Bias,
    Scale,
}

/// Per-call bookkeeping of one `plan_batch`
struct BatchContext<'p, P: RegisterPool + ?Sized> {
    pool: &'p mut P,
    prevent_overflow: bool,
    /// Every block checked out during this call, for roll-back
    acquired: Vec<Vgpr>,
    bias_regs: HashMap<u32, Vgpr>,
    scale_regs: HashMap<u32, Vgpr>,
    /// Data register of the last even element, for half packing
    last_data: Option<Vgpr>,
}

impl<P: RegisterPool + ?Sized> BatchContext<'_, P> {
    fn check_out(&mut self, request: CheckOut) -> Result<Vgpr> {
        let reg = self.pool.check_out(request)?;
        self.acquired.push(reg);
        Ok(reg)
    }

    /// Register for `key`, checked out on first use and borrowed afterwards
    fn memoized(&mut self, map: MemoMap, key: u32, count: u32, tag: String) -> Result<RegRef> {
        let existing = match map {
            MemoMap::Bias => self.bias_regs.get(&key),
            MemoMap::Scale => self.scale_regs.get(&key),
        };
        if let Some(reg) = existing {
            return Ok(RegRef::Borrowed(*reg));
        }

        let reg = self.check_out(CheckOut::new(count, count, tag).prevent_overflow(false))?;
        match map {
            MemoMap::Bias => self.bias_regs.insert(key, reg),
            MemoMap::Scale => self.scale_regs.insert(key, reg),
        };
        Ok(RegRef::Owned(reg))
    }

    fn roll_back(self) {
        for reg in self.acquired {
            if let Err(err) = self.pool.check_in(reg) {
                error!(%reg, %err, "failed to return register while rolling back a batch");
            }
        }
    }
}

/// Owns a [`StoreState`] and tears it down on every exit path
pub struct StoreStateGuard<'p, P: RegisterPool + ?Sized> {
    pool: &'p mut P,
    state: StoreState,
    finished: bool,
}

impl<'p, P: RegisterPool + ?Sized> StoreStateGuard<'p, P> {
    /// Build a store state whose teardown is guaranteed
    pub fn new(
        pool: &'p mut P,
        kernel: &KernelConfig,
        writer: &WriterState,
        store: StoreConfig,
        elements: &[Element],
    ) -> Result<Self> {
        let state = StoreState::new(pool, kernel, writer, store, elements)?;
        Ok(Self {
            pool,
            state,
            finished: false,
        })
    }

    /// Plan one write batch
    pub fn plan_batch(
        &mut self,
        elements: &[Element],
        mask_base: Option<Sgpr>,
        optimized_no_load_loop: bool,
        bias_axis: BiasAxis,
    ) -> Result<BatchPlan> {
        self.state
            .plan_batch(self.pool, elements, mask_base, optimized_no_load_loop, bias_axis)
    }

    /// Return a batch's per-element registers and its accumulators
    pub fn retire_batch(&mut self, batch: BatchPlan) -> Result<()> {
        batch.check_in(self.pool)?;
        self.state.check_in_accumulators(self.pool)
    }

    /// The guarded state
    #[must_use]
    pub const fn state(&self) -> &StoreState {
        &self.state
    }

    /// The guarded state, mutably
    pub fn state_mut(&mut self) -> &mut StoreState {
        &mut self.state
    }

    /// The register pool
    pub fn pool(&mut self) -> &mut P {
        &mut *self.pool
    }

    /// Tear down now and report any failure
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.state.teardown(self.pool)
    }
}

impl<P: RegisterPool + ?Sized> Drop for StoreStateGuard<'_, P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.state.teardown(self.pool) {
            error!(%err, "store state teardown failed");
        }
    }
}
