//! Kernel and store configuration records
//!
//! These are read-only inputs to the planner. `KernelConfig` mirrors the
//! fields of the generator's kernel description the store path depends on;
//! `WriterState` carries the target-dependent register widths; `StoreConfig`
//! is the (width, edge, beta, atomic) tuple one `StoreState` is built for.

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::coord::MiLayout;
use crate::error::{Result, StoreError};

/// Exact register count. Fractions denote several values packed into one register.
pub type RegCount = Ratio<u32>;

/// Bytes held by one vector register
pub const BYTES_PER_REGISTER: u32 = 4;

/// Element data types of the matrix operands and output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// IEEE half precision
    Half,
    /// Brain floating point
    BFloat16,
    /// IEEE single precision
    #[default]
    Single,
    /// IEEE double precision
    Double,
    /// 8-bit float
    Float8,
    /// 8-bit integer
    Int8,
    /// 32-bit integer
    Int32,
}

impl DataType {
    /// Size in bytes
    #[must_use]
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::Float8 | Self::Int8 => 1,
            Self::Half | Self::BFloat16 => 2,
            Self::Single | Self::Int32 => 4,
            Self::Double => 8,
        }
    }

    /// Registers needed for one value: 1/4, 1/2, 1 or 2
    #[must_use]
    pub fn num_registers(self) -> RegCount {
        Ratio::new(self.size_bytes(), BYTES_PER_REGISTER)
    }

    /// Whole registers needed for one value
    #[must_use]
    pub fn whole_registers(self) -> u32 {
        self.num_registers().ceil().to_integer()
    }

    /// Check if this is a 16-bit float type
    #[must_use]
    pub const fn is_half_or_bf16(self) -> bool {
        matches!(self, Self::Half | Self::BFloat16)
    }
}

/// Direction of an optional epilogue tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDirection {
    /// Feature disabled
    #[default]
    None,
    /// Tensor is loaded by the epilogue
    Read,
    /// Tensor is written by the epilogue
    Write,
}

/// Epilogue activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// No activation (identity)
    #[default]
    None,
    /// ReLU: max(0, x)
    ReLU,
    /// GELU approximation
    GELU,
    /// SiLU: x * sigmoid(x)
    SiLU,
}

/// Problem-level feature flags and data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemType {
    /// Operand data type
    pub data_type: DataType,
    /// Output data type
    pub dest_data_type: DataType,
    /// Epilogue compute data type
    pub compute_data_type: DataType,
    /// Accumulate into existing output (beta != 0 supported)
    pub use_beta: bool,
    /// Auxiliary output tensor ("E") enabled
    pub use_e: bool,
    /// Gradient (backward) epilogue
    pub gradient: bool,
    /// Epilogue activation
    pub activation: Activation,
    /// Per-row alpha scale vector enabled
    pub use_scale_alpha_vec: bool,
    /// Bias tensor direction
    pub bias: DataDirection,
    /// Accumulate in higher precision than the output type
    pub high_precision_accumulate: bool,
    /// Output strides are non-default
    pub use_initial_strides_cd: bool,
}

impl Default for ProblemType {
    fn default() -> Self {
        Self {
            data_type: DataType::Single,
            dest_data_type: DataType::Single,
            compute_data_type: DataType::Single,
            use_beta: true,
            use_e: false,
            gradient: false,
            activation: Activation::None,
            use_scale_alpha_vec: false,
            bias: DataDirection::None,
            high_precision_accumulate: false,
            use_initial_strides_cd: false,
        }
    }
}

/// Kernel description fields consumed by the store path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Stores go through a buffer descriptor (otherwise raw pointers)
    pub buffer_store: bool,
    /// Number of packed free indices in the column (coord0) dimension
    pub packed_c0_indices: usize,
    /// Number of packed free indices in the row (coord1) dimension
    pub packed_c1_indices: usize,
    /// Store remap vector width (0 = disabled)
    pub store_remap_vector_width: u32,
    /// Loads of C and stores of D are grouped
    pub group_load_store: bool,
    /// Global split-K factor
    pub global_split_u: u32,
    /// Local (in-workgroup) split-K factor
    pub local_split_u: u32,
    /// Matrix-instruction (MFMA/WMMA) compute path
    pub enable_matrix_instruction: bool,
    /// Matrix instruction M
    pub matrix_inst_m: u32,
    /// Matrix instruction N
    pub matrix_inst_n: u32,
    /// Matrix instruction blocks in M
    pub matrix_inst_bm: u32,
    /// Matrix instruction blocks in N
    pub matrix_inst_bn: u32,
    /// Contiguous outputs per matrix instruction lane
    pub mi_output_vector_width: u32,
    /// A/B operands swapped for the matrix instruction
    pub source_swap: bool,
    /// Threads per wavefront
    pub wavefront_size: u32,
    /// Matrix-instruction tiles per wave in (coord0, coord1)
    pub mi_wave_tile: [u32; 2],
    /// Waves per workgroup in (coord0, coord1)
    pub mi_wave_group: [u32; 2],
    /// Vector width along coord0
    pub vector_width_a: u32,
    /// Vector width along coord1
    pub vector_width_b: u32,
    /// Global write vectors per thread
    pub num_global_write_vectors_per_thread: u32,
    /// Thread tile along coord0 (non-matrix-instruction path)
    pub thread_tile0: u32,
    /// Problem feature flags
    pub problem_type: ProblemType,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            buffer_store: true,
            packed_c0_indices: 1,
            packed_c1_indices: 1,
            store_remap_vector_width: 0,
            group_load_store: false,
            global_split_u: 1,
            local_split_u: 1,
            enable_matrix_instruction: true,
            matrix_inst_m: 16,
            matrix_inst_n: 16,
            matrix_inst_bm: 1,
            matrix_inst_bn: 1,
            mi_output_vector_width: 4,
            source_swap: false,
            wavefront_size: 64,
            mi_wave_tile: [2, 2],
            mi_wave_group: [2, 2],
            vector_width_a: 1,
            vector_width_b: 1,
            num_global_write_vectors_per_thread: 4,
            thread_tile0: 4,
            problem_type: ProblemType::default(),
        }
    }
}

impl KernelConfig {
    /// Auxiliary-output ("E") stream is active
    #[must_use]
    pub fn aux_enabled(&self) -> bool {
        self.problem_type.use_e && self.global_split_u == 1
    }

    /// Scale-vector stream is active
    #[must_use]
    pub fn scale_enabled(&self) -> bool {
        self.problem_type.use_scale_alpha_vec && self.global_split_u == 1
    }

    /// Bias stream is active
    #[must_use]
    pub fn bias_enabled(&self) -> bool {
        self.problem_type.bias != DataDirection::None
    }

    /// Accumulate-source stream needs its own address register
    #[must_use]
    pub fn separate_source_addr(&self) -> bool {
        self.group_load_store && self.problem_type.use_beta
    }

    /// Gradient activation loads an auxiliary value per element
    #[must_use]
    pub fn loads_aux_data(&self) -> bool {
        self.problem_type.gradient
            && self.problem_type.activation != Activation::None
            && self.aux_enabled()
    }

    /// Validate every divisor the planner relies on
    pub fn validate(&self) -> Result<()> {
        if self.local_split_u == 0 || self.global_split_u == 0 {
            return Err(StoreError::invalid_config("split factors must be non-zero"));
        }
        if self.vector_width_a == 0 || self.vector_width_b == 0 {
            return Err(StoreError::invalid_config("vector widths must be non-zero"));
        }
        if !self.enable_matrix_instruction {
            return Ok(());
        }

        let nonzero = [
            ("wavefront_size", self.wavefront_size),
            ("matrix_inst_m", self.matrix_inst_m),
            ("matrix_inst_n", self.matrix_inst_n),
            ("matrix_inst_bm", self.matrix_inst_bm),
            ("matrix_inst_bn", self.matrix_inst_bn),
            ("mi_output_vector_width", self.mi_output_vector_width),
            ("mi_wave_tile[0]", self.mi_wave_tile[0]),
            ("mi_wave_tile[1]", self.mi_wave_tile[1]),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(StoreError::invalid_config(format!("{name} must be non-zero")));
        }

        // Both axes split the per-lane outputs into groups of contiguous outputs.
        // 4-wide instructions are folded before counting.
        let mi = MiLayout::from_kernel(self);
        let outputs_per_mimn = mi.m * mi.n / self.wavefront_size;
        if outputs_per_mimn / self.mi_output_vector_width == 0 {
            return Err(StoreError::invalid_config(format!(
                "{}x{} matrix instruction yields {} outputs per lane, fewer than mi_output_vector_width {}",
                mi.m,
                mi.n,
                outputs_per_mimn,
                self.mi_output_vector_width
            )));
        }

        Ok(())
    }
}

/// Target- and writer-dependent register facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterState {
    /// Registers per buffer-descriptor offset
    pub rpgo: u32,
    /// Registers per raw global address
    pub rpga: u32,
    /// Scalar registers holding one lane mask (1 for wave32, 2 for wave64)
    pub lane_sgpr_count: u32,
    /// Bytes per external (memory) output element
    pub bpe_c_external: u32,
    /// Bytes per internal (accumulator) output element
    pub bpe_c_internal: u32,
    /// Bytes per register
    pub bpr: u32,
    /// Results are staged through pool-allocated accumulator registers
    pub serialized_store: bool,
    /// Hardware zeroes the undefined half on 16-bit buffer loads
    pub has_ecc_half: bool,
    /// First register of the per-thread accumulator tile
    pub start_vgpr_valu: u32,
}

impl Default for WriterState {
    fn default() -> Self {
        Self {
            rpgo: 1,
            rpga: 2,
            lane_sgpr_count: 2,
            bpe_c_external: 4,
            bpe_c_internal: 4,
            bpr: BYTES_PER_REGISTER,
            serialized_store: true,
            has_ecc_half: false,
            start_vgpr_valu: 0,
        }
    }
}

impl WriterState {
    /// Derive register widths from a kernel description
    #[must_use]
    pub fn for_kernel(kernel: &KernelConfig) -> Self {
        Self {
            lane_sgpr_count: if kernel.wavefront_size == 32 { 1 } else { 2 },
            bpe_c_external: kernel.problem_type.dest_data_type.size_bytes(),
            bpe_c_internal: kernel.problem_type.compute_data_type.size_bytes(),
            serialized_store: kernel.enable_matrix_instruction,
            ..Self::default()
        }
    }
}

/// The (width, edge, beta, atomic) tuple one store state is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Global write vector width per element
    pub gwvw: u32,
    /// Boundary tile: every element is bounds-checked
    pub edge: bool,
    /// Existing output is read and accumulated
    pub beta: bool,
    /// Writes are atomic
    pub atomic: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gwvw: 1,
            edge: false,
            beta: false,
            atomic: false,
        }
    }
}

impl StoreConfig {
    /// Create a store configuration
    #[must_use]
    pub const fn new(gwvw: u32, edge: bool, beta: bool, atomic: bool) -> Self {
        Self {
            gwvw,
            edge,
            beta,
            atomic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_registers_exact() {
        assert_eq!(DataType::Half.num_registers(), Ratio::new(1, 2));
        assert_eq!(DataType::Int8.num_registers(), Ratio::new(1, 4));
        assert_eq!(DataType::Single.num_registers(), Ratio::from_integer(1));
        assert_eq!(DataType::Double.num_registers(), Ratio::from_integer(2));
    }

    #[test]
    fn test_whole_registers_rounds_up() {
        assert_eq!(DataType::Half.whole_registers(), 1);
        assert_eq!(DataType::Float8.whole_registers(), 1);
        assert_eq!(DataType::Double.whole_registers(), 2);
    }

    #[test]
    fn test_feature_gates_follow_global_split() {
        let mut kernel = KernelConfig::default();
        kernel.problem_type.use_e = true;
        kernel.problem_type.use_scale_alpha_vec = true;
        assert!(kernel.aux_enabled());
        assert!(kernel.scale_enabled());

        kernel.global_split_u = 2;
        assert!(!kernel.aux_enabled());
        assert!(!kernel.scale_enabled());
    }

    #[test]
    fn test_loads_aux_data_needs_activation() {
        let mut kernel = KernelConfig::default();
        kernel.problem_type.use_e = true;
        kernel.problem_type.gradient = true;
        assert!(!kernel.loads_aux_data());

        kernel.problem_type.activation = Activation::ReLU;
        assert!(kernel.loads_aux_data());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(KernelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_wavefront() {
        let mut kernel = KernelConfig::default();
        kernel.wavefront_size = 0;
        let err = kernel.validate().unwrap_err();
        assert!(err.to_string().contains("wavefront_size"));
    }

    #[test]
    fn test_validate_rejects_wide_output_vector() {
        let mut kernel = KernelConfig::default();
        // 16x16 over 64 lanes gives 4 outputs per lane
        kernel.mi_output_vector_width = 8;
        assert!(matches!(
            kernel.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_folds_four_wide_instructions() {
        // 4x4 with 16 blocks in M folds to 64x4: 4 outputs per lane
        let kernel = KernelConfig {
            matrix_inst_m: 4,
            matrix_inst_bm: 16,
            matrix_inst_n: 4,
            matrix_inst_bn: 1,
            ..KernelConfig::default()
        };
        assert!(kernel.validate().is_ok());

        // a lone 4x4 block still cannot fill one output vector
        let kernel = KernelConfig {
            matrix_inst_bm: 1,
            ..kernel
        };
        let err = kernel.validate().unwrap_err();
        assert!(err.to_string().contains("4x4"), "{err}");
    }

    #[test]
    fn test_validate_skips_mi_fields_without_matrix_instructions() {
        let mut kernel = KernelConfig::default();
        kernel.enable_matrix_instruction = false;
        kernel.wavefront_size = 0;
        assert!(kernel.validate().is_ok());
    }

    #[test]
    fn test_writer_state_for_half_output() {
        let mut kernel = KernelConfig::default();
        kernel.wavefront_size = 32;
        kernel.problem_type.dest_data_type = DataType::Half;
        let writer = WriterState::for_kernel(&kernel);
        assert_eq!(writer.lane_sgpr_count, 1);
        assert_eq!(writer.bpe_c_external, 2);
        assert_eq!(writer.bpe_c_internal, 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let kernel: KernelConfig =
            serde_json::from_str(r#"{"packed_c0_indices": 2, "problem_type": {"bias": "read"}}"#)
                .unwrap();
        assert_eq!(kernel.packed_c0_indices, 2);
        assert_eq!(kernel.problem_type.bias, DataDirection::Read);
        assert_eq!(kernel.wavefront_size, 64);
    }
}
