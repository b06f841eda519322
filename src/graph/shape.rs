//! Layout-aware shape helpers shared by the rewrite passes.

use crate::types::{DataFormat, FilterFormat};

pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];

/// Permute `values` in place so that slot `i` receives the old
/// `values[perm[i]]`.
pub fn transpose_in_place<T: Copy>(values: &mut Vec<T>, perm: &[usize]) {
    let permuted: Vec<T> = perm.iter().map(|&i| values[i]).collect();
    *values = permuted;
}

/// Permute a flat list of per-axis (lo, hi) pairs, moving each pair as a
/// unit. Used for the `paddings` argument of Pad ops.
pub fn transpose_pairs_in_place(values: &mut Vec<i64>, perm: &[usize]) {
    let permuted: Vec<i64> = perm
        .iter()
        .flat_map(|&i| [values[2 * i], values[2 * i + 1]])
        .collect();
    *values = permuted;
}

/// Read a 4-D feature-map shape as (batch, height, width, channels)
/// regardless of its stored layout.
pub fn feature_map_nhwc(shape: &[usize], format: DataFormat) -> (usize, usize, usize, usize) {
    match format {
        DataFormat::Nhwc => (shape[0], shape[1], shape[2], shape[3]),
        DataFormat::Nchw => (shape[0], shape[2], shape[3], shape[1]),
    }
}

/// Read a filter shape as (height, width, in_channels, out_channels)
/// regardless of its stored layout.
pub fn filter_hwio(shape: &[usize], format: FilterFormat) -> (usize, usize, usize, usize) {
    match format {
        FilterFormat::Hwio => (shape[0], shape[1], shape[2], shape[3]),
        FilterFormat::Oihw => (shape[2], shape[3], shape[1], shape[0]),
        FilterFormat::Hwoi => (shape[0], shape[1], shape[3], shape[2]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_in_place_nhwc_to_nchw() {
        let mut dims = vec![1, 56, 48, 3];
        transpose_in_place(&mut dims, &NHWC_TO_NCHW);
        assert_eq!(dims, vec![1, 3, 56, 48]);
        transpose_in_place(&mut dims, &NCHW_TO_NHWC);
        assert_eq!(dims, vec![1, 56, 48, 3]);
    }

    #[test]
    fn transpose_pairs_moves_each_pair_as_a_unit() {
        let mut paddings = vec![0, 0, 2, 2, 3, 3, 0, 0];
        transpose_pairs_in_place(&mut paddings, &NHWC_TO_NCHW);
        assert_eq!(paddings, vec![0, 0, 0, 0, 2, 2, 3, 3]);
    }

    #[test]
    fn feature_map_accessor_honors_layout() {
        assert_eq!(
            feature_map_nhwc(&[2, 8, 9, 16], DataFormat::Nhwc),
            (2, 8, 9, 16)
        );
        assert_eq!(
            feature_map_nhwc(&[2, 16, 8, 9], DataFormat::Nchw),
            (2, 8, 9, 16)
        );
    }

    #[test]
    fn filter_accessor_honors_layout() {
        assert_eq!(
            filter_hwio(&[3, 5, 16, 32], FilterFormat::Hwio),
            (3, 5, 16, 32)
        );
        assert_eq!(
            filter_hwio(&[32, 16, 3, 5], FilterFormat::Oihw),
            (3, 5, 16, 32)
        );
        assert_eq!(
            filter_hwio(&[3, 5, 32, 16], FilterFormat::Hwoi),
            (3, 5, 16, 32)
        );
    }
}
