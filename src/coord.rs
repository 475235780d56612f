//! Output coordinate offsets
//!
//! Maps an element's tile indices back to its position in the output tile.
//! With matrix instructions the accumulator layout is fixed by the compute
//! stage: each tile index is split into (output within instruction, block
//! within wave, wave tile) and recombined into a linear offset so store
//! addresses land where the data actually lives.

use crate::config::KernelConfig;
use crate::plan::Element;

/// Row and column offsets of one element in the output tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CoordOffsets {
    /// Column offset (coord0)
    pub coord0: u32,
    /// Row offset (coord1)
    pub coord1: u32,
}

/// Matrix-instruction shape after folding 4-wide instructions into their blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiLayout {
    /// Effective M
    pub m: u32,
    /// Effective N
    pub n: u32,
    /// Effective blocks in M
    pub bm: u32,
    /// Effective blocks in N
    pub bn: u32,
}

impl MiLayout {
    /// Fold 4-wide matrix instructions into a single wider block
    #[must_use]
    pub fn from_kernel(kernel: &KernelConfig) -> Self {
        let (m, bm) = fold_four(kernel.matrix_inst_m, kernel.matrix_inst_bm);
        let (n, bn) = fold_four(kernel.matrix_inst_n, kernel.matrix_inst_bn);
        Self { m, n, bm, bn }
    }
}

fn fold_four(dim: u32, blocks: u32) -> (u32, u32) {
    if dim == 4 {
        (dim * blocks, 1)
    } else {
        (dim, blocks)
    }
}

/// One axis of the matrix-instruction decomposition
struct Axis {
    inst: u32,
    blocks: u32,
    wave_tile: u32,
    wave_group: u32,
    vector_width: u32,
    continuous: u32,
    outputs_per_mimn: u32,
}

impl Axis {
    fn offset(&self, tile: u32, lane: u32, wavefront: u32) -> u32 {
        let per_group = self.outputs_per_mimn / self.continuous;
        let e_idx = tile % per_group;
        let remain = tile / per_group;
        let b_idx = remain % self.blocks;
        let wt_idx = (remain / self.blocks) % self.wave_tile;

        let offset = e_idx * (wavefront / self.inst) * self.continuous
            + b_idx * self.inst
            + wt_idx * self.inst * self.blocks * self.wave_group;
        offset * self.vector_width + lane
    }
}

/// Compute the output offsets of `element`
///
/// The kernel must have passed [`KernelConfig::validate`].
#[must_use]
pub fn coord_offsets(kernel: &KernelConfig, element: &Element) -> CoordOffsets {
    if !kernel.enable_matrix_instruction {
        return CoordOffsets {
            coord0: element.d0 * kernel.vector_width_a + element.vc0,
            coord1: element.d1 * kernel.vector_width_b + element.vc1,
        };
    }

    let mi = MiLayout::from_kernel(kernel);
    let wavefront = kernel.wavefront_size;
    let outputs = mi.m * mi.n / wavefront;
    let mi_vw = kernel.mi_output_vector_width;
    let swap = kernel.source_swap;

    // Swapped sources lay contiguous outputs along rows instead of columns.
    let row_axis = Axis {
        inst: mi.n,
        blocks: mi.bn,
        wave_tile: kernel.mi_wave_tile[1],
        wave_group: kernel.mi_wave_group[1],
        vector_width: kernel.vector_width_b,
        continuous: if swap { mi_vw } else { 1 },
        outputs_per_mimn: if swap { outputs } else { 1 },
    };
    let col_axis = Axis {
        inst: mi.m,
        blocks: mi.bm,
        wave_tile: kernel.mi_wave_tile[0],
        wave_group: kernel.mi_wave_group[0],
        vector_width: kernel.vector_width_a,
        continuous: if swap { 1 } else { mi_vw },
        outputs_per_mimn: if swap { 1 } else { outputs },
    };

    let mut coord1 = row_axis.offset(element.d1, element.vc1, wavefront);
    let mut coord0 = col_axis.offset(element.d0, element.vc0, wavefront);

    // With a local split of 4 every group covers a whole instruction output.
    let lsu = kernel.local_split_u;
    let vectors = kernel.num_global_write_vectors_per_thread;
    if lsu == 2 && vectors >= lsu {
        let step = |axis: &Axis, tile: u32| (tile / (vectors / lsu)) * (axis.outputs_per_mimn / lsu);
        if swap {
            coord1 += step(&row_axis, element.d1);
        } else {
            coord0 += step(&col_axis, element.d0);
        }
    }

    CoordOffsets { coord0, coord1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(d1: u32, d0: u32, vc1: u32, vc0: u32) -> Element {
        Element::new(d1, d0, vc1, vc0)
    }

    #[test]
    fn test_fold_four_wide_instructions() {
        let kernel = KernelConfig {
            matrix_inst_m: 4,
            matrix_inst_bm: 16,
            matrix_inst_n: 4,
            matrix_inst_bn: 16,
            ..KernelConfig::default()
        };
        let mi = MiLayout::from_kernel(&kernel);
        assert_eq!(mi, MiLayout { m: 64, n: 64, bm: 1, bn: 1 });
    }

    #[test]
    fn test_four_wide_instruction_offsets() {
        // 4x4 x16 blocks in M folds to one 64-wide block
        let kernel = KernelConfig {
            matrix_inst_m: 4,
            matrix_inst_bm: 16,
            matrix_inst_n: 4,
            matrix_inst_bn: 1,
            ..KernelConfig::default()
        };
        assert!(kernel.validate().is_ok());

        // d0 = 1 is the next wave tile: 64 * 1 * 2, plus lane 2
        let off = coord_offsets(&kernel, &element(0, 1, 0, 2));
        assert_eq!(off, CoordOffsets { coord0: 130, coord1: 0 });

        // rows keep the 4-wide instruction: 4 * 1 * 2
        assert_eq!(coord_offsets(&kernel, &element(1, 0, 0, 0)).coord1, 8);
    }

    #[test]
    fn test_non_matrix_instruction_offsets() {
        let kernel = KernelConfig {
            enable_matrix_instruction: false,
            vector_width_a: 4,
            vector_width_b: 2,
            ..KernelConfig::default()
        };
        let off = coord_offsets(&kernel, &element(3, 2, 1, 3));
        assert_eq!(off, CoordOffsets { coord0: 11, coord1: 7 });
    }

    #[test]
    fn test_mfma_column_decomposition() {
        // 16x16 over 64 lanes: 4 outputs per lane, all contiguous along coord0
        let kernel = KernelConfig::default();
        assert_eq!(coord_offsets(&kernel, &element(0, 0, 0, 0)), CoordOffsets::default());

        // d0 = 1 moves to the next wave tile: 1 * 16 * 1 * 2
        let off = coord_offsets(&kernel, &element(0, 1, 0, 2));
        assert_eq!(off.coord0, 32 + 2);
        assert_eq!(off.coord1, 0);
    }

    #[test]
    fn test_mfma_row_decomposition() {
        let kernel = KernelConfig::default();
        // rows: one output per lane group, d1 walks wave tiles: 16 * 1 * 2
        let off = coord_offsets(&kernel, &element(1, 0, 0, 0));
        assert_eq!(off.coord1, 32);

        let kernel = KernelConfig {
            vector_width_b: 2,
            ..KernelConfig::default()
        };
        let off = coord_offsets(&kernel, &element(1, 0, 1, 0));
        assert_eq!(off.coord1, 32 * 2 + 1);
    }

    #[test]
    fn test_source_swap_moves_contiguous_outputs_to_rows() {
        let kernel = KernelConfig {
            source_swap: true,
            ..KernelConfig::default()
        };
        // outputs 4 / continuous 4 = 1 group, so d1 = 1 is the next wave tile
        let off = coord_offsets(&kernel, &element(1, 1, 0, 0));
        assert_eq!(off.coord1, 32);
        assert_eq!(off.coord0, 32);
    }

    #[test]
    fn test_multiple_output_groups_per_lane() {
        // 32x32 over 64 lanes: 16 outputs per lane in groups of 4
        let kernel = KernelConfig {
            matrix_inst_m: 32,
            matrix_inst_n: 32,
            mi_wave_tile: [1, 1],
            ..KernelConfig::default()
        };
        // e_idx 1: 1 * (64 / 32) * 4 = 8
        assert_eq!(coord_offsets(&kernel, &element(0, 1, 0, 0)).coord0, 8);
        // e_idx 3
        assert_eq!(coord_offsets(&kernel, &element(0, 3, 0, 1)).coord0, 25);
    }

    #[test]
    fn test_local_split_two_offset() {
        let kernel = KernelConfig {
            matrix_inst_m: 32,
            matrix_inst_n: 32,
            mi_wave_tile: [1, 1],
            local_split_u: 2,
            num_global_write_vectors_per_thread: 4,
            ..KernelConfig::default()
        };
        // d0 = 2: e_idx 2 -> 16, lsu step (2 / 2) * (16 / 2) = 8
        assert_eq!(coord_offsets(&kernel, &element(0, 2, 0, 0)).coord0, 24);
        // rows are untouched without source swap
        assert_eq!(coord_offsets(&kernel, &element(2, 0, 0, 0)).coord1, 0);
    }
}
