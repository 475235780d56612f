//! tilestore-explain: inspect store-path register plans
//!
//! Builds a [`tilestore::StoreState`] for one store configuration, plans a
//! synthetic output tile through it and reports what the planner decided:
//! the addressing strategy, per-element register requirements, the registers
//! every element received and how the pool fared.
//!
//! # Example
//!
//! ```rust
//! use tilestore::StoreConfig;
//! use tilestore_explain::{plan, ConfigFile, PlanRequest};
//!
//! let report = plan(&PlanRequest {
//!     config: ConfigFile::default(),
//!     store: StoreConfig::new(1, true, true, false),
//!     rows: 2,
//!     cols: 4,
//!     batch: 4,
//!     max_vgprs: 256,
//!     max_sgprs: 104,
//! })
//! .unwrap();
//! assert_eq!(report.pool.leaked, 0);
//! ```

#![allow(clippy::cast_possible_truncation)] // Tile sizes fit in u32
#![allow(clippy::format_push_string)] // Performance not critical for CLI
#![allow(clippy::unwrap_used)] // Tests only

pub mod error;
pub mod output;
pub mod report;

pub use error::{ExplainError, Result};
pub use output::{format_json, format_plan_text, format_requirements_text, OutputFormat};
pub use report::{plan, requirements, tile_elements, ConfigFile, PlanReport, PlanRequest, RequirementsReport};
