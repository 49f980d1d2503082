// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dimension algebra.
//!
//! Dimensions are plain `u32` lists. A `0` entry means "unspecified" and an
//! empty list means "unknown rank" for tensors (or "no dimensions" for
//! scalars). The helpers here never allocate unless they return a new list.

/// Merges two dimension lists.
///
/// - If either side is empty (unknown rank), the other side wins.
/// - Otherwise the ranks must agree, and on each axis a `0` takes the other
///   side's value; two different non-zero values fail.
///
/// Returns `None` when the lists cannot describe the same shape.
///
/// # Examples
/// ```
/// use nn_core::combine_dimensions;
///
/// assert_eq!(combine_dimensions(&[2, 0], &[0, 3]), Some(vec![2, 3]));
/// assert_eq!(combine_dimensions(&[2, 3], &[]), Some(vec![2, 3]));
/// assert_eq!(combine_dimensions(&[2, 3], &[2, 4]), None);
/// ```
pub fn combine_dimensions(lhs: &[u32], rhs: &[u32]) -> Option<Vec<u32>> {
    if rhs.is_empty() {
        return Some(lhs.to_vec());
    }
    if lhs.is_empty() {
        return Some(rhs.to_vec());
    }
    if lhs.len() != rhs.len() {
        return None;
    }
    lhs.iter()
        .zip(rhs)
        .map(|(&a, &b)| match (a, b) {
            (0, b) => Some(b),
            (a, 0) => Some(a),
            (a, b) if a == b => Some(a),
            _ => None,
        })
        .collect()
}

/// Returns `true` if every axis is known and the rank is known.
///
/// An empty list is fully specified only for scalars, so callers pass
/// `is_tensor` to distinguish the two.
pub fn is_fully_specified(is_tensor: bool, dims: &[u32]) -> bool {
    if is_tensor && dims.is_empty() {
        return false;
    }
    dims.iter().all(|&d| d != 0)
}

/// Returns the number of elements described by `dims`.
///
/// An empty list (scalar) has one element. Returns `None` on `u64` overflow.
pub fn element_count(dims: &[u32]) -> Option<u64> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(u64::from(d)))
}

/// Computes the byte size of a tensor, or of a scalar when `is_scalar`.
///
/// Tensors with an empty dimension list report `0` (size unknown), as do
/// tensors with any unspecified axis. Returns `None` if the size does not
/// fit in `u32`.
pub fn byte_size(element_size: u32, is_scalar: bool, dims: &[u32]) -> Option<u32> {
    if is_scalar {
        return Some(element_size);
    }
    if dims.is_empty() {
        return Some(0);
    }
    let mut size = u64::from(element_size);
    for &d in dims {
        size *= u64::from(d);
        if size > u64::from(u32::MAX) {
            return None;
        }
    }
    Some(size as u32)
}

/// Returns `true` if the byte size of the *specified* axes overflows `u32`.
///
/// Unspecified (`0`) axes are skipped, so this is usable on partially
/// specified shapes.
pub fn specified_size_overflows(element_size: u32, dims: &[u32]) -> bool {
    let mut size = u64::from(element_size);
    for &d in dims.iter().filter(|&&d| d != 0) {
        size = size.saturating_mul(u64::from(d));
        if size > u64::from(u32::MAX) {
            return true;
        }
    }
    false
}

/// Formats a dimension list as `[2, 0, 3]`.
pub fn format_dimensions(dims: &[u32]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_identity() {
        let dims = [2, 3, 4];
        assert_eq!(combine_dimensions(&dims, &[]), Some(dims.to_vec()));
        assert_eq!(combine_dimensions(&[], &dims), Some(dims.to_vec()));
        assert_eq!(combine_dimensions(&dims, &dims), Some(dims.to_vec()));
    }

    #[test]
    fn test_combine_fills_unknown_axes() {
        assert_eq!(combine_dimensions(&[0, 3], &[2, 0]), Some(vec![2, 3]));
        assert_eq!(combine_dimensions(&[0, 0], &[0, 5]), Some(vec![0, 5]));
    }

    #[test]
    fn test_combine_conflicts() {
        assert_eq!(combine_dimensions(&[2, 3], &[2, 4]), None);
        assert_eq!(combine_dimensions(&[2, 3], &[2, 3, 1]), None);
    }

    #[test]
    fn test_fully_specified() {
        assert!(is_fully_specified(false, &[]));
        assert!(!is_fully_specified(true, &[]));
        assert!(!is_fully_specified(true, &[2, 0]));
        assert!(is_fully_specified(true, &[2, 1]));
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(byte_size(4, true, &[]), Some(4));
        assert_eq!(byte_size(4, false, &[]), Some(0));
        assert_eq!(byte_size(4, false, &[2, 3]), Some(24));
        assert_eq!(byte_size(4, false, &[2, 0]), Some(0));
        assert_eq!(byte_size(4, false, &[u32::MAX, 2]), None);
    }

    #[test]
    fn test_specified_size_overflow() {
        assert!(!specified_size_overflows(4, &[0, 1024, 1024]));
        assert!(specified_size_overflows(4, &[0, 65536, 65536]));
    }

    #[test]
    fn test_element_count() {
        assert_eq!(element_count(&[]), Some(1));
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_dimensions(&[2, 0, 3]), "[2, 0, 3]");
        assert_eq!(format_dimensions(&[]), "[]");
    }
}
