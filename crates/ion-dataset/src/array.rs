// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded arrays: dense blocks covering a contiguous index range per axis.
//!
//! Values are stored flat in row-major order over the bounds. A variable's
//! content is a list of such blocks; blocks need not be contiguous or sorted.

// Index math mixes u64 origins with usize offsets into flat value vectors; we
// don't support 32-bit targets.
#![allow(clippy::cast_possible_truncation)]

use serde::{Deserialize, Serialize};

use crate::{DataType, DatasetError};

/// One axis of a bounded array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bound {
    /// Absolute index of the first element along the axis.
    pub origin: u64,
    /// Number of elements along the axis.
    pub size: u64,
    /// Carried through transposition; not used in index arithmetic.
    pub stride: u64,
}

impl Bound {
    /// Unit-stride bound covering `[origin, origin + size)`.
    pub fn new(origin: u64, size: u64) -> Self {
        Self {
            origin,
            size,
            stride: 1,
        }
    }

    /// Exclusive end index.
    pub fn end(&self) -> u64 {
        self.origin.saturating_add(self.size)
    }

}

/// Flat typed storage for the values of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValues {
    /// 64-bit floats.
    Float64(Vec<f64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit signed integers.
    Int64(Vec<i64>),
    /// 32-bit signed integers.
    Int32(Vec<i32>),
    /// Strings.
    Text(Vec<String>),
}

impl ArrayValues {
    /// Number of scalars stored.
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float64(v) => v.len(),
            ArrayValues::Float32(v) => v.len(),
            ArrayValues::Int64(v) => v.len(),
            ArrayValues::Int32(v) => v.len(),
            ArrayValues::Text(v) => v.len(),
        }
    }

    /// True when no scalars are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type.
    pub fn data_type(&self) -> DataType {
        match self {
            ArrayValues::Float64(_) => DataType::Float64,
            ArrayValues::Float32(_) => DataType::Float32,
            ArrayValues::Int64(_) => DataType::Int64,
            ArrayValues::Int32(_) => DataType::Int32,
            ArrayValues::Text(_) => DataType::Text,
        }
    }

    /// Select the scalars at `indices` (flat positions, caller guarantees range).
    pub fn gather(&self, indices: &[usize]) -> Self {
        fn pick<T: Clone>(v: &[T], idx: &[usize]) -> Vec<T> {
            idx.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            ArrayValues::Float64(v) => ArrayValues::Float64(pick(v, indices)),
            ArrayValues::Float32(v) => ArrayValues::Float32(pick(v, indices)),
            ArrayValues::Int64(v) => ArrayValues::Int64(pick(v, indices)),
            ArrayValues::Int32(v) => ArrayValues::Int32(pick(v, indices)),
            ArrayValues::Text(v) => ArrayValues::Text(pick(v, indices)),
        }
    }

    /// Add `delta` to every value. Used to move time coordinates onto another
    /// epoch; integer storage only accepts whole deltas.
    pub fn shift_by(&mut self, delta: f64) -> Result<(), DatasetError> {
        if delta == 0.0 {
            return Ok(());
        }
        match self {
            ArrayValues::Float64(v) => v.iter_mut().for_each(|x| *x += delta),
            ArrayValues::Float32(v) => v.iter_mut().for_each(|x| *x += delta as f32),
            ArrayValues::Int64(v) if delta.fract() == 0.0 => {
                let d = delta as i64;
                v.iter_mut().for_each(|x| *x += d);
            }
            ArrayValues::Int32(v) if delta.fract() == 0.0 => {
                let d = delta as i32;
                v.iter_mut().for_each(|x| *x += d);
            }
            other => {
                return Err(DatasetError::TypeMismatch {
                    expected: DataType::Float64,
                    got: other.data_type(),
                })
            }
        }
        Ok(())
    }

    /// Numeric read-back. `None` for text storage.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ArrayValues::Float64(v) => Some(v.clone()),
            ArrayValues::Float32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            ArrayValues::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ArrayValues::Int32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            ArrayValues::Text(_) => None,
        }
    }

    /// Scalar at flat position `i` as `f64` (`None` for text or out of range).
    #[allow(clippy::cast_precision_loss)]
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        match self {
            ArrayValues::Float64(v) => v.get(i).copied(),
            ArrayValues::Float32(v) => v.get(i).map(|&x| f64::from(x)),
            ArrayValues::Int64(v) => v.get(i).map(|&x| x as f64),
            ArrayValues::Int32(v) => v.get(i).map(|&x| f64::from(x)),
            ArrayValues::Text(_) => None,
        }
    }

    /// Element-wise equality with an absolute tolerance for numeric storage.
    /// NaN equals NaN (both cells are "missing").
    pub fn value_eq_within(&self, other: &Self, tolerance: f64) -> bool {
        if self.data_type() != other.data_type() || self.len() != other.len() {
            return false;
        }
        match (self, other) {
            (ArrayValues::Text(a), ArrayValues::Text(b)) => a == b,
            _ => match (self.to_f64(), other.to_f64()) {
                (Some(a), Some(b)) => a
                    .iter()
                    .zip(&b)
                    .all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() <= tolerance),
                _ => false,
            },
        }
    }
}

/// A dense block of values covering one contiguous index range per axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedArray {
    /// One bound per axis.
    pub bounds: Vec<Bound>,
    /// Row-major values; `len == Π bounds[i].size`.
    pub values: ArrayValues,
}

impl BoundedArray {
    /// Build a block, rejecting a value count that disagrees with the bounds.
    pub fn new(bounds: Vec<Bound>, values: ArrayValues) -> Result<Self, DatasetError> {
        let array = Self { bounds, values };
        array.validate()?;
        Ok(array)
    }

    /// Product of all bound sizes, `None` when it does not fit in a `u64`.
    pub fn element_count(bounds: &[Bound]) -> Option<u64> {
        bounds.iter().try_fold(1u64, |acc, b| acc.checked_mul(b.size))
    }

    /// Element count of `bounds`, rejecting an axis end or a product that
    /// does not fit in a `u64`.
    pub fn checked_len(bounds: &[Bound]) -> Result<u64, DatasetError> {
        if let Some(axis) = bounds.iter().position(|b| b.origin.checked_add(b.size).is_none()) {
            return Err(DatasetError::IndexOverflow { axis });
        }
        Self::element_count(bounds).ok_or(DatasetError::ElementCountOverflow)
    }

    /// Check the value-count invariant.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let expected = Self::checked_len(&self.bounds)?;
        let got = self.values.len() as u64;
        if expected != got {
            return Err(DatasetError::ValueCountMismatch { expected, got });
        }
        Ok(())
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.bounds.len()
    }

    fn bound(&self, axis: usize) -> Result<&Bound, DatasetError> {
        self.bounds.get(axis).ok_or(DatasetError::AxisOutOfRange {
            axis,
            rank: self.rank(),
        })
    }

    /// `(origin, end)` along `axis`.
    pub fn axis_range(&self, axis: usize) -> Result<(u64, u64), DatasetError> {
        let b = self.bound(axis)?;
        Ok((b.origin, b.end()))
    }

    /// Move the block along `axis` by a signed number of indices.
    pub fn shift_axis(&mut self, axis: usize, delta: i64) -> Result<(), DatasetError> {
        let rank = self.rank();
        let b = self
            .bounds
            .get_mut(axis)
            .ok_or(DatasetError::AxisOutOfRange { axis, rank })?;
        let origin = b
            .origin
            .checked_add_signed(delta)
            .filter(|o| o.checked_add(b.size).is_some())
            .ok_or(DatasetError::IndexOverflow { axis })?;
        b.origin = origin;
        Ok(())
    }

    /// The part of this block whose `axis` index lies in `[start, end)`
    /// (absolute indices). `None` when the intersection is empty.
    pub fn slice_axis(
        &self,
        axis: usize,
        start: u64,
        end: u64,
    ) -> Result<Option<BoundedArray>, DatasetError> {
        let b = *self.bound(axis)?;
        let lo = start.max(b.origin);
        let hi = end.min(b.end());
        if lo >= hi {
            return Ok(None);
        }
        if lo == b.origin && hi == b.end() {
            return Ok(Some(self.clone()));
        }
        let outer = Self::element_count(&self.bounds[..axis])
            .ok_or(DatasetError::ElementCountOverflow)?;
        let inner = Self::element_count(&self.bounds[axis + 1..])
            .ok_or(DatasetError::ElementCountOverflow)?;
        let (local_lo, local_hi) = (lo - b.origin, hi - b.origin);
        let mut indices = Vec::with_capacity(((local_hi - local_lo) * outer * inner) as usize);
        for o in 0..outer {
            for i in local_lo..local_hi {
                let row = (o * b.size + i) * inner;
                indices.extend((row..row + inner).map(|x| x as usize));
            }
        }
        let mut bounds = self.bounds.clone();
        bounds[axis] = Bound {
            origin: lo,
            size: hi - lo,
            stride: b.stride,
        };
        Ok(Some(BoundedArray {
            bounds,
            values: self.values.gather(&indices),
        }))
    }

    /// Visit every element with its absolute multi-index and flat position.
    /// Walks `values.len()` positions, so a block that would fail
    /// [`Self::validate`] cannot index past its storage.
    pub fn for_each_index(&self, mut visit: impl FnMut(&[u64], usize)) {
        let rank = self.rank();
        let total = self.values.len();
        let mut local = vec![0u64; rank];
        let mut absolute: Vec<u64> = self.bounds.iter().map(|b| b.origin).collect();
        for flat in 0..total {
            visit(&absolute, flat);
            // odometer increment, last axis fastest
            for axis in (0..rank).rev() {
                local[axis] += 1;
                if local[axis] < self.bounds[axis].size {
                    absolute[axis] = self.bounds[axis].origin + local[axis];
                    break;
                }
                local[axis] = 0;
                absolute[axis] = self.bounds[axis].origin;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn grid() -> BoundedArray {
        // 3 (time, origin 10) x 2 (depth, origin 0)
        BoundedArray::new(
            vec![Bound::new(10, 3), Bound::new(0, 2)],
            ArrayValues::Float64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_wrong_value_count() {
        let err = BoundedArray::new(vec![Bound::new(0, 3)], ArrayValues::Int32(vec![1, 2]))
            .unwrap_err();
        assert_eq!(
            err,
            DatasetError::ValueCountMismatch {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn new_rejects_bounds_whose_product_overflows() {
        let huge = vec![Bound::new(0, 1 << 33), Bound::new(0, 1 << 33)];
        assert_eq!(
            BoundedArray::new(huge, ArrayValues::Float64(Vec::new())),
            Err(DatasetError::ElementCountOverflow)
        );
        assert_eq!(BoundedArray::element_count(&[Bound::new(0, 3), Bound::new(0, 2)]), Some(6));
    }

    #[test]
    fn new_rejects_axis_end_past_u64() {
        let err = BoundedArray::new(
            vec![Bound::new(0, 1), Bound::new(u64::MAX, 1)],
            ArrayValues::Int32(vec![7]),
        )
        .unwrap_err();
        assert_eq!(err, DatasetError::IndexOverflow { axis: 1 });
    }

    #[test]
    fn slice_axis_keeps_row_major_rows() {
        let head = grid().slice_axis(0, 0, 11).unwrap().unwrap();
        assert_eq!(head.bounds[0], Bound::new(10, 1));
        assert_eq!(head.values, ArrayValues::Float64(vec![1.0, 2.0]));

        let tail = grid().slice_axis(0, 12, 100).unwrap().unwrap();
        assert_eq!(tail.bounds[0], Bound::new(12, 1));
        assert_eq!(tail.values, ArrayValues::Float64(vec![5.0, 6.0]));

        let col = grid().slice_axis(1, 1, 2).unwrap().unwrap();
        assert_eq!(col.values, ArrayValues::Float64(vec![2.0, 4.0, 6.0]));
    }

    #[test]
    fn slice_axis_outside_block_is_none() {
        assert!(grid().slice_axis(0, 0, 10).unwrap().is_none());
        assert!(grid().slice_axis(0, 13, 20).unwrap().is_none());
        assert!(grid().slice_axis(2, 0, 1).is_err());
    }

    #[test]
    fn shift_axis_rejects_underflow() {
        let mut a = grid();
        a.shift_axis(0, -4).unwrap();
        assert_eq!(a.bounds[0].origin, 6);
        assert_eq!(
            a.shift_axis(0, -7),
            Err(DatasetError::IndexOverflow { axis: 0 })
        );
    }

    #[test]
    fn for_each_index_walks_row_major() {
        let mut seen = Vec::new();
        grid().for_each_index(|idx, flat| seen.push((idx.to_vec(), flat)));
        assert_eq!(seen[0], (vec![10, 0], 0));
        assert_eq!(seen[1], (vec![10, 1], 1));
        assert_eq!(seen[5], (vec![12, 1], 5));
    }

    #[test]
    fn shift_by_rejects_fractional_integer_delta() {
        let mut ints = ArrayValues::Int64(vec![1, 2]);
        ints.shift_by(24.0).unwrap();
        assert_eq!(ints, ArrayValues::Int64(vec![25, 26]));
        assert!(ints.shift_by(0.5).is_err());
        assert!(ArrayValues::Text(vec!["a".into()]).shift_by(1.0).is_err());
    }

    #[test]
    fn value_eq_within_treats_nan_as_equal() {
        let a = ArrayValues::Float64(vec![1.0, f64::NAN]);
        let b = ArrayValues::Float64(vec![1.0 + 1e-9, f64::NAN]);
        assert!(a.value_eq_within(&b, 1e-6));
        assert!(!a.value_eq_within(&ArrayValues::Float64(vec![1.1, f64::NAN]), 1e-6));
    }
}
