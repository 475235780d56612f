//! Store elements and their per-batch register plans

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pool::RegisterPool;
use crate::registers::{RegRef, Sgpr, StreamRegs, Vgpr};

/// One unit of output, identified by its tile indices
///
/// `d1`/`d0` index vector groups along the row and column dimensions of the
/// thread's tile; `vc1`/`vc0` index the component within that vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    /// Row-dimension tile index
    pub d1: u32,
    /// Column-dimension tile index
    pub d0: u32,
    /// Row-dimension vector component
    pub vc1: u32,
    /// Column-dimension vector component
    pub vc0: u32,
}

impl Element {
    /// Create an element
    #[must_use]
    pub const fn new(d1: u32, d0: u32, vc1: u32, vc0: u32) -> Self {
        Self { d1, d0, vc1, vc0 }
    }

    /// Check if the element lies in the first row of its tile
    #[must_use]
    pub const fn is_first_row(&self) -> bool {
        self.d1 == 0 && self.vc1 == 0
    }
}

impl From<(u32, u32, u32, u32)> for Element {
    fn from((d1, d0, vc1, vc0): (u32, u32, u32, u32)) -> Self {
        Self::new(d1, d0, vc1, vc0)
    }
}

/// Registers and offsets assigned to one element of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementPlan {
    /// The element planned
    pub element: Element,
    /// Column offset in the output tile
    pub coord0: u32,
    /// Row offset in the output tile
    pub coord1: u32,
    /// Row offset minus the previous element's row offset
    pub row_delta: i64,
    /// Element starts a new output row
    pub new_row: bool,
    /// Address register per stream
    pub addr: StreamRegs<Option<RegRef>>,
    /// Data-staging register (beta or atomic)
    pub data: Option<RegRef>,
    /// Loaded bias value
    pub bias_data: Option<RegRef>,
    /// Loaded auxiliary value (gradient activation)
    pub aux_data: Option<RegRef>,
    /// Loaded scale-vector value
    pub scale_data: Option<RegRef>,
    /// Boundary mask scalar register
    pub mask: Option<Sgpr>,
    /// Accumulator element index
    pub accumulator: u32,
}

impl ElementPlan {
    /// Every register reference held by this plan
    pub fn registers(&self) -> impl Iterator<Item = RegRef> + '_ {
        [
            self.addr.output,
            self.addr.source,
            self.addr.bias,
            self.addr.aux,
            self.addr.scale,
            self.data,
            self.bias_data,
            self.aux_data,
            self.scale_data,
        ]
        .into_iter()
        .flatten()
    }
}

/// Ordered plans for one write batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    /// One plan per element, in input order
    pub elements: Vec<ElementPlan>,
}

impl BatchPlan {
    /// Number of planned elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Registers checked out for this batch (each once, in plan order)
    #[must_use]
    pub fn owned_registers(&self) -> Vec<Vgpr> {
        let mut seen = HashSet::new();
        self.elements
            .iter()
            .flat_map(ElementPlan::registers)
            .filter(|r| r.is_owned())
            .map(RegRef::reg)
            .filter(|r| seen.insert(*r))
            .collect()
    }

    /// Return every register this batch owns to `pool`
    ///
    /// Accumulator registers are not included; they are released by
    /// [`StoreState::check_in_accumulators`](crate::StoreState::check_in_accumulators).
    pub fn check_in<P: RegisterPool + ?Sized>(self, pool: &mut P) -> Result<()> {
        for reg in self.owned_registers() {
            pool.check_in(reg)?;
        }
        Ok(())
    }
}
