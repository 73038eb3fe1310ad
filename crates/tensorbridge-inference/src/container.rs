//! Caller-owned output containers.
//!
//! A container is tagged with its element type once, when it is converted
//! into an [`OutputContainer`]. Filling it is then a single match on
//! `(container type, decoded buffer type)` followed by a row-major copy.

use ndarray::{ArrayD, ArrayViewMutD};

use crate::codec::{TensorElement, TypedBuffer};
use crate::error::InferenceError;
use crate::tensor::TensorDataType;
use crate::Result;

/// Arbitrarily nested rows of elements.
///
/// Only rectangular nestings (every row at a level has the same shape) can
/// receive tensor data.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedArray<T> {
    Leaves(Vec<T>),
    Rows(Vec<NestedArray<T>>),
}

impl<T> NestedArray<T> {
    /// Build a rectangular nesting of `shape`, every leaf set to `T::default()`.
    ///
    /// A rank-0 shape yields a single leaf.
    pub fn zeros(shape: &[usize]) -> Self
    where
        T: Default + Clone,
    {
        match shape {
            [] => NestedArray::Leaves(vec![T::default()]),
            [n] => NestedArray::Leaves(vec![T::default(); *n]),
            [n, rest @ ..] => NestedArray::Rows((0..*n).map(|_| Self::zeros(rest)).collect()),
        }
    }

    /// Shape of the nesting, or `None` when rows disagree in length or depth.
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            NestedArray::Leaves(values) => Some(vec![values.len()]),
            NestedArray::Rows(rows) => {
                let mut iter = rows.iter();
                let inner = match iter.next() {
                    Some(first) => first.shape()?,
                    None => return Some(vec![0]),
                };
                for row in iter {
                    if row.shape()? != inner {
                        return None;
                    }
                }
                let mut shape = Vec::with_capacity(inner.len() + 1);
                shape.push(rows.len());
                shape.extend(inner);
                Some(shape)
            }
        }
    }

    /// Total number of leaves, rectangular or not.
    pub fn leaf_count(&self) -> usize {
        match self {
            NestedArray::Leaves(values) => values.len(),
            NestedArray::Rows(rows) => rows.iter().map(NestedArray::leaf_count).sum(),
        }
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        match (self, index) {
            (NestedArray::Leaves(values), [i]) => values.get(*i),
            (NestedArray::Rows(rows), [i, rest @ ..]) => rows.get(*i)?.get(rest),
            _ => None,
        }
    }

    /// Leaves in row-major order.
    pub fn flatten(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut Vec<T>)
    where
        T: Clone,
    {
        match self {
            NestedArray::Leaves(values) => out.extend_from_slice(values),
            NestedArray::Rows(rows) => rows.iter().for_each(|row| row.collect_into(out)),
        }
    }

    /// Overwrite leaves in row-major order; returns how many were consumed.
    fn fill_from(&mut self, values: &[T]) -> usize
    where
        T: Copy,
    {
        match self {
            NestedArray::Leaves(leaves) => {
                let n = leaves.len().min(values.len());
                leaves[..n].copy_from_slice(&values[..n]);
                n
            }
            NestedArray::Rows(rows) => {
                let mut offset = 0;
                for row in rows {
                    offset += row.fill_from(&values[offset..]);
                }
                offset
            }
        }
    }
}

impl<T> From<Vec<T>> for NestedArray<T> {
    fn from(values: Vec<T>) -> Self {
        NestedArray::Leaves(values)
    }
}

impl<T> From<Vec<Vec<T>>> for NestedArray<T> {
    fn from(rows: Vec<Vec<T>>) -> Self {
        NestedArray::Rows(rows.into_iter().map(NestedArray::from).collect())
    }
}

impl<T> From<Vec<Vec<Vec<T>>>> for NestedArray<T> {
    fn from(rows: Vec<Vec<Vec<T>>>) -> Self {
        NestedArray::Rows(rows.into_iter().map(NestedArray::from).collect())
    }
}

/// Storage behind an output container.
#[derive(Debug)]
pub enum Slot<'a, T> {
    /// Flat sequence; must hold exactly the tensor's element count.
    Flat(&'a mut [T]),
    /// Nested rows; must be rectangular with the tensor's element count.
    Nested(&'a mut NestedArray<T>),
    /// ndarray view of any shape with the tensor's element count.
    Array(ArrayViewMutD<'a, T>),
}

impl<T: TensorElement> Slot<'_, T> {
    fn fill(&mut self, index: usize, values: &[T]) -> Result<()> {
        match self {
            Slot::Flat(slice) => {
                if slice.len() != values.len() {
                    return Err(InferenceError::OutputSizeMismatch {
                        index,
                        expected: values.len(),
                        actual: slice.len(),
                    });
                }
                slice.copy_from_slice(values);
            }
            Slot::Nested(nested) => {
                let shape = nested.shape().ok_or_else(|| {
                    InferenceError::UnsupportedContainerShape(format!(
                        "output {index}: nested {} container is not rectangular",
                        T::DATA_TYPE
                    ))
                })?;
                let total: usize = shape.iter().product();
                if total != values.len() {
                    return Err(InferenceError::OutputShapeMismatch {
                        index,
                        expected: values.len(),
                        actual: total,
                    });
                }
                nested.fill_from(values);
            }
            Slot::Array(view) => {
                if view.len() != values.len() {
                    return Err(InferenceError::OutputShapeMismatch {
                        index,
                        expected: values.len(),
                        actual: view.len(),
                    });
                }
                // iter_mut walks logical row-major order whatever the strides.
                view.iter_mut().zip(values).for_each(|(dst, src)| *dst = *src);
            }
        }
        Ok(())
    }
}

/// Output container tagged with its element type.
#[derive(Debug)]
pub enum OutputContainer<'a> {
    Float32(Slot<'a, f32>),
    Int32(Slot<'a, i32>),
    Uint8(Slot<'a, u8>),
    Int64(Slot<'a, i64>),
}

impl OutputContainer<'_> {
    pub fn dtype(&self) -> TensorDataType {
        match self {
            OutputContainer::Float32(_) => TensorDataType::Float32,
            OutputContainer::Int32(_) => TensorDataType::Int32,
            OutputContainer::Uint8(_) => TensorDataType::Uint8,
            OutputContainer::Int64(_) => TensorDataType::Int64,
        }
    }

    /// Distribute a decoded output buffer into this container.
    pub fn fill(&mut self, index: usize, buffer: &TypedBuffer) -> Result<()> {
        match (&mut *self, buffer) {
            (OutputContainer::Float32(slot), TypedBuffer::Float32(values)) => slot.fill(index, values),
            (OutputContainer::Int32(slot), TypedBuffer::Int32(values)) => slot.fill(index, values),
            (OutputContainer::Uint8(slot), TypedBuffer::Uint8(values)) => slot.fill(index, values),
            (OutputContainer::Int64(slot), TypedBuffer::Int64(values)) => slot.fill(index, values),
            (container, buffer) => Err(InferenceError::OutputTypeMismatch {
                index,
                expected: buffer.dtype(),
                actual: container.dtype(),
            }),
        }
    }
}

/// Element types that can back an [`OutputContainer`].
pub trait ContainerElement: TensorElement {
    fn wrap(slot: Slot<'_, Self>) -> OutputContainer<'_>;
}

macro_rules! impl_container_element {
    ($ty:ty, $variant:ident) => {
        impl ContainerElement for $ty {
            fn wrap(slot: Slot<'_, Self>) -> OutputContainer<'_> {
                OutputContainer::$variant(slot)
            }
        }
    };
}

impl_container_element!(f32, Float32);
impl_container_element!(i32, Int32);
impl_container_element!(u8, Uint8);
impl_container_element!(i64, Int64);

impl<'a, T: ContainerElement> From<&'a mut [T]> for OutputContainer<'a> {
    fn from(slice: &'a mut [T]) -> Self {
        T::wrap(Slot::Flat(slice))
    }
}

impl<'a, T: ContainerElement, const N: usize> From<&'a mut [T; N]> for OutputContainer<'a> {
    fn from(array: &'a mut [T; N]) -> Self {
        T::wrap(Slot::Flat(array.as_mut_slice()))
    }
}

impl<'a, T: ContainerElement> From<&'a mut Vec<T>> for OutputContainer<'a> {
    fn from(values: &'a mut Vec<T>) -> Self {
        T::wrap(Slot::Flat(values.as_mut_slice()))
    }
}

impl<'a, T: ContainerElement> From<&'a mut NestedArray<T>> for OutputContainer<'a> {
    fn from(nested: &'a mut NestedArray<T>) -> Self {
        T::wrap(Slot::Nested(nested))
    }
}

impl<'a, T: ContainerElement> From<ArrayViewMutD<'a, T>> for OutputContainer<'a> {
    fn from(view: ArrayViewMutD<'a, T>) -> Self {
        T::wrap(Slot::Array(view))
    }
}

impl<'a, T: ContainerElement> From<&'a mut ArrayD<T>> for OutputContainer<'a> {
    fn from(array: &'a mut ArrayD<T>) -> Self {
        T::wrap(Slot::Array(array.view_mut()))
    }
}
