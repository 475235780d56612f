//! # tilestore: Store-path register planning for tiled GEMM kernels
//!
//! Plans how the epilogue of a tiled matrix-multiply kernel writes its output
//! tile: which address strategy to use, how many vector and scalar registers
//! each element of a write batch needs, and which concrete registers every
//! element gets. Instruction emission is left to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use tilestore::{BiasAxis, Element, KernelConfig, RegisterFile, StoreConfig, StoreState, WriterState};
//!
//! let kernel = KernelConfig::default();
//! let writer = WriterState::for_kernel(&kernel);
//! let mut pool = RegisterFile::default();
//!
//! let elements: Vec<Element> = (0..2).map(|d0| Element::new(0, d0, 0, 0)).collect();
//! let mut state = StoreState::new(&mut pool, &kernel, &writer, StoreConfig::default(), &elements)?;
//!
//! let batch = state.plan_batch(&mut pool, &elements, None, false, BiasAxis::Coord0)?;
//! assert_eq!(batch.len(), 2);
//!
//! batch.check_in(&mut pool)?;
//! state.teardown(&mut pool)?;
//! # Ok::<(), tilestore::StoreError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Kernel, writer and store configuration records
//! - [`strategy`] - Address strategy selection
//! - [`requirement`] - Per-element register requirements
//! - [`pool`] - Register pool interface and a linear allocator
//! - [`shared`] - Long-lived shared address registers
//! - [`coord`] - Output coordinate offsets
//! - [`plan`] - Elements and batch plans
//! - [`state`] - Store state lifecycle and batch planning

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow possible truncation - element counts fit in u32
#![allow(clippy::cast_possible_truncation)]
// Allow missing errors doc - every fallible operation returns StoreError
#![allow(clippy::missing_errors_doc)]
// Allow doc markdown for register names
#![allow(clippy::doc_markdown)]
// Allow unwrap_used in tests
#![allow(clippy::unwrap_used)]
// Allow module name repetitions - StoreState in state, StoreError in error
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coord;
pub mod error;
pub mod plan;
pub mod pool;
pub mod registers;
pub mod requirement;
pub mod shared;
pub mod state;
pub mod strategy;

pub use config::{
    Activation, DataDirection, DataType, KernelConfig, ProblemType, RegCount, StoreConfig, WriterState,
};
pub use error::{Result, StoreError};
pub use plan::{BatchPlan, Element, ElementPlan};
pub use pool::{CheckOut, LinearPool, RegisterFile, RegisterPool};
pub use registers::{RegRef, Sgpr, Stream, StreamRegs, Vgpr};
pub use requirement::RegisterRequirement;
pub use state::{BiasAxis, StoreState, StoreStateGuard};
pub use strategy::{AddressStrategy, AddressingPlan, SgprUsage};
