// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Groups, dimensions and variables.

#![allow(clippy::cast_possible_truncation)]

use serde::{Deserialize, Serialize};

use crate::{Attribute, BoundedArray, DataType, DatasetError};

/// A named axis of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension name (unique within its group).
    pub name: String,
    /// Logical extent along the axis.
    pub length: u64,
    /// Smallest valid index currently represented.
    pub min_offset: u64,
}

impl Dimension {
    /// Dimension starting at index 0.
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
            min_offset: 0,
        }
    }

    /// `(min_offset, min_offset + length)`.
    pub fn extent(&self) -> (u64, u64) {
        (self.min_offset, self.min_offset.saturating_add(self.length))
    }
}

/// A typed, shaped variable whose content is a list of bounded arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Element type shared by every block.
    pub data_type: DataType,
    /// Ordered dimension names; empty for scalars.
    pub shape: Vec<String>,
    /// Variable attributes.
    pub attributes: Vec<Attribute>,
    /// Blocks; not necessarily contiguous or sorted.
    pub content: Vec<BoundedArray>,
}

impl Variable {
    /// Variable without attributes or content.
    pub fn new(name: impl Into<String>, data_type: DataType, shape: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape,
            attributes: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Axis position of `dimension` in the shape.
    pub fn axis_of(&self, dimension: &str) -> Option<usize> {
        self.shape.iter().position(|d| d == dimension)
    }

    /// Attribute lookup by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Insert or replace an attribute.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(slot) => *slot = attribute,
            None => self.attributes.push(attribute),
        }
    }

    /// Append a block after checking rank, type and value count.
    pub fn push_array(&mut self, array: BoundedArray) -> Result<(), DatasetError> {
        self.check_array(&array)?;
        self.content.push(array);
        Ok(())
    }

    /// Validate a block against this variable without storing it.
    pub fn check_array(&self, array: &BoundedArray) -> Result<(), DatasetError> {
        if array.rank() != self.shape.len() {
            return Err(DatasetError::RankMismatch {
                variable: self.name.clone(),
                expected: self.shape.len(),
                got: array.rank(),
            });
        }
        if array.values.data_type() != self.data_type {
            return Err(DatasetError::TypeMismatch {
                expected: self.data_type,
                got: array.values.data_type(),
            });
        }
        array.validate()
    }

    /// Smallest origin and largest end along `axis` across all blocks.
    pub fn origin_range(&self, axis: usize) -> Option<(u64, u64)> {
        self.content
            .iter()
            .filter_map(|a| a.axis_range(axis).ok())
            .fold(None, |acc, (lo, hi)| match acc {
                None => Some((lo, hi)),
                Some((a, b)) => Some((a.min(lo), b.max(hi))),
            })
    }

    /// Same variable with its content dropped (header descriptor form).
    pub fn without_content(&self) -> Self {
        Self {
            content: Vec::new(),
            ..self.clone()
        }
    }
}

/// Ordered dimensions, variables and attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Group {
    /// Dimensions (names unique).
    pub dimensions: Vec<Dimension>,
    /// Variables.
    pub variables: Vec<Variable>,
    /// Group attributes.
    pub attributes: Vec<Attribute>,
}

impl Group {
    /// Dimension lookup.
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Mutable dimension lookup.
    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut Dimension> {
        self.dimensions.iter_mut().find(|d| d.name == name)
    }

    /// Add a dimension; names must be unique.
    pub fn add_dimension(&mut self, dimension: Dimension) -> Result<(), DatasetError> {
        if self.dimension(&dimension.name).is_some() {
            return Err(DatasetError::DuplicateDimension(dimension.name));
        }
        self.dimensions.push(dimension);
        Ok(())
    }

    /// Variable lookup.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Mutable variable lookup.
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    /// Add a variable; every shape entry must name a declared dimension.
    pub fn add_variable(&mut self, variable: Variable) -> Result<(), DatasetError> {
        if self.variable(&variable.name).is_some() {
            return Err(DatasetError::DuplicateVariable(variable.name));
        }
        if let Some(missing) = variable
            .shape
            .iter()
            .find(|d| self.dimension(d.as_str()).is_none())
        {
            return Err(DatasetError::UnknownDimension(missing.clone()));
        }
        for array in &variable.content {
            variable.check_array(array)?;
        }
        self.variables.push(variable);
        Ok(())
    }

    /// Group attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Insert or replace a group attribute.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(slot) => *slot = attribute,
            None => self.attributes.push(attribute),
        }
    }

    /// Copy of the group with every variable's content dropped, rebuilt
    /// through [`Self::add_dimension`] and [`Self::add_variable`] so duplicate
    /// names and shapes naming undeclared dimensions are rejected.
    pub fn shape_only(&self) -> Result<Group, DatasetError> {
        let mut shape = Group {
            attributes: self.attributes.clone(),
            ..Group::default()
        };
        for dimension in &self.dimensions {
            shape.add_dimension(dimension.clone())?;
        }
        for variable in &self.variables {
            shape.add_variable(variable.without_content())?;
        }
        Ok(shape)
    }

    /// Per-axis `[lo, hi)` logical extent of a variable.
    pub fn extent(&self, variable: &Variable) -> Result<Vec<(u64, u64)>, DatasetError> {
        variable
            .shape
            .iter()
            .map(|d| {
                self.dimension(d)
                    .map(Dimension::extent)
                    .ok_or_else(|| DatasetError::UnknownDimension(d.clone()))
            })
            .collect()
    }

    /// Dense row-major read of a numeric variable over its full extent.
    /// Cells not covered by any block read as NaN.
    pub fn read_dense(&self, name: &str) -> Result<Vec<f64>, DatasetError> {
        let var = self.lookup(name)?;
        let region = self.extent(var)?;
        read_region(var, &region)
    }

    /// Dense read of `count` indices along `axis` starting at absolute index
    /// `start`; every other axis spans its full extent.
    pub fn read_hyperslab(
        &self,
        name: &str,
        axis: usize,
        start: u64,
        count: u64,
    ) -> Result<Vec<f64>, DatasetError> {
        let var = self.lookup(name)?;
        let mut region = self.extent(var)?;
        let rank = region.len();
        let slot = region
            .get_mut(axis)
            .ok_or(DatasetError::AxisOutOfRange { axis, rank })?;
        *slot = (start, start.saturating_add(count));
        read_region(var, &region)
    }

    fn lookup(&self, name: &str) -> Result<&Variable, DatasetError> {
        self.variable(name)
            .ok_or_else(|| DatasetError::UnknownVariable(name.to_string()))
    }
}

fn read_region(var: &Variable, region: &[(u64, u64)]) -> Result<Vec<f64>, DatasetError> {
    if !var.data_type.is_numeric() {
        return Err(DatasetError::TypeMismatch {
            expected: DataType::Float64,
            got: var.data_type,
        });
    }
    let sizes: Vec<u64> = region.iter().map(|(lo, hi)| hi.saturating_sub(*lo)).collect();
    let total = sizes
        .iter()
        .try_fold(1u64, |acc, &s| acc.checked_mul(s))
        .and_then(|t| usize::try_from(t).ok())
        .ok_or(DatasetError::ElementCountOverflow)?;
    let mut out = vec![f64::NAN; total];
    for array in &var.content {
        array.for_each_index(|index, flat| {
            let mut pos = 0u64;
            for (axis, &i) in index.iter().enumerate() {
                let (lo, hi) = region[axis];
                if i < lo || i >= hi {
                    return;
                }
                pos = pos * sizes[axis] + (i - lo);
            }
            if let Some(v) = array.values.get_f64(flat) {
                out[pos as usize] = v;
            }
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::{ArrayValues, Bound};

    fn series() -> Group {
        let mut g = Group::default();
        g.add_dimension(Dimension::new("time", 4)).unwrap();
        g.add_dimension(Dimension::new("depth", 2)).unwrap();
        let mut temp = Variable::new(
            "temp",
            DataType::Float32,
            vec!["time".into(), "depth".into()],
        );
        temp.push_array(
            BoundedArray::new(
                vec![Bound::new(2, 2), Bound::new(0, 2)],
                ArrayValues::Float32(vec![5.0, 6.0, 7.0, 8.0]),
            )
            .unwrap(),
        )
        .unwrap();
        temp.push_array(
            BoundedArray::new(
                vec![Bound::new(0, 1), Bound::new(0, 2)],
                ArrayValues::Float32(vec![1.0, 2.0]),
            )
            .unwrap(),
        )
        .unwrap();
        g.add_variable(temp).unwrap();
        g
    }

    #[test]
    fn duplicate_dimension_is_rejected() {
        let mut g = series();
        assert_eq!(
            g.add_dimension(Dimension::new("time", 1)),
            Err(DatasetError::DuplicateDimension("time".into()))
        );
    }

    #[test]
    fn variable_with_unknown_dimension_is_rejected() {
        let mut g = series();
        let v = Variable::new("lat", DataType::Float64, vec!["lat".into()]);
        assert_eq!(
            g.add_variable(v),
            Err(DatasetError::UnknownDimension("lat".into()))
        );
    }

    #[test]
    fn shape_only_rejects_hand_built_duplicates() {
        let mut g = series();
        g.dimensions.push(Dimension::new("depth", 5));
        assert_eq!(
            g.shape_only(),
            Err(DatasetError::DuplicateDimension("depth".into()))
        );

        let mut g = series();
        g.variables
            .push(Variable::new("salt", DataType::Float32, vec!["range".into()]));
        assert_eq!(
            g.shape_only(),
            Err(DatasetError::UnknownDimension("range".into()))
        );
    }

    #[test]
    fn read_region_rejects_unrepresentable_extent() {
        let mut g = Group::default();
        g.add_dimension(Dimension::new("a", 1 << 33)).unwrap();
        g.add_dimension(Dimension::new("b", 1 << 33)).unwrap();
        g.add_variable(Variable::new(
            "v",
            DataType::Float64,
            vec!["a".into(), "b".into()],
        ))
        .unwrap();
        assert_eq!(g.read_dense("v"), Err(DatasetError::ElementCountOverflow));
    }

    #[test]
    fn push_array_checks_rank() {
        let mut v = Variable::new("x", DataType::Float64, vec!["time".into()]);
        let scalar = BoundedArray::new(vec![], ArrayValues::Float64(vec![1.0])).unwrap();
        assert!(matches!(
            v.push_array(scalar),
            Err(DatasetError::RankMismatch { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn read_dense_fills_gaps_with_nan() {
        let g = series();
        let dense = g.read_dense("temp").unwrap();
        assert_eq!(dense.len(), 8);
        assert_eq!(&dense[0..2], &[1.0, 2.0]);
        assert!(dense[2].is_nan() && dense[3].is_nan());
        assert_eq!(&dense[4..8], &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn read_hyperslab_selects_axis_window() {
        let g = series();
        assert_eq!(g.read_hyperslab("temp", 0, 3, 1).unwrap(), vec![7.0, 8.0]);
        assert_eq!(g.read_hyperslab("temp", 1, 1, 1).unwrap().len(), 4);
    }

    #[test]
    fn origin_range_spans_all_blocks() {
        let g = series();
        let temp = g.variable("temp").unwrap();
        assert_eq!(temp.origin_range(0), Some((0, 4)));
        assert_eq!(temp.axis_of("depth"), Some(1));
    }
}
