//! Tensor metadata and owned tensor values.

use std::borrow::Cow;

use ndarray::{ArrayD, IxDyn};
use serde::Serialize;

use crate::codec::TensorElement;
use crate::error::InferenceError;
use crate::Result;

/// Supported tensor data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDataType {
    Float32,
    Int32,
    Uint8,
    Int64,
}

impl TensorDataType {
    /// Width in bytes of one element.
    pub const fn byte_width(self) -> usize {
        match self {
            TensorDataType::Float32 | TensorDataType::Int32 => 4,
            TensorDataType::Uint8 => 1,
            TensorDataType::Int64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TensorDataType::Float32 => "float32",
            TensorDataType::Int32 => "int32",
            TensorDataType::Uint8 => "uint8",
            TensorDataType::Int64 => "int64",
        }
    }
}

impl std::fmt::Display for TensorDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Data type tag as reported by an engine, before translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeDataType {
    Float32,
    Int32,
    Uint8,
    Int64,
    Int8,
    Int16,
    Bool,
    String,
    Float16,
    Float64,
    /// Anything the adapter has no dedicated tag for.
    Other(std::string::String),
}

impl NativeDataType {
    pub fn name(&self) -> &str {
        match self {
            NativeDataType::Float32 => "FLOAT32",
            NativeDataType::Int32 => "INT32",
            NativeDataType::Uint8 => "UINT8",
            NativeDataType::Int64 => "INT64",
            NativeDataType::Int8 => "INT8",
            NativeDataType::Int16 => "INT16",
            NativeDataType::Bool => "BOOL",
            NativeDataType::String => "STRING",
            NativeDataType::Float16 => "FLOAT16",
            NativeDataType::Float64 => "FLOAT64",
            NativeDataType::Other(name) => name,
        }
    }
}

impl TryFrom<&NativeDataType> for TensorDataType {
    type Error = InferenceError;

    fn try_from(native: &NativeDataType) -> Result<Self> {
        match native {
            NativeDataType::Float32 => Ok(TensorDataType::Float32),
            NativeDataType::Int32 => Ok(TensorDataType::Int32),
            NativeDataType::Uint8 => Ok(TensorDataType::Uint8),
            NativeDataType::Int64 => Ok(TensorDataType::Int64),
            other => Err(InferenceError::UnsupportedTensorType(other.name().to_string())),
        }
    }
}

/// Ordered dimension sizes of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// Translate engine-reported dimensions, rejecting negative (unresolved) ones.
    pub fn from_native(name: &str, dims: &[i64]) -> Result<Self> {
        dims.iter()
            .map(|&d| usize::try_from(d).ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
            .ok_or_else(|| InferenceError::InvalidShape {
                name: name.to_string(),
                dims: dims.to_vec(),
            })
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of all dimensions; a rank-0 shape holds one element.
    /// `None` if the product overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn byte_len(&self, dtype: TensorDataType) -> Option<usize> {
        self.element_count()?.checked_mul(dtype.byte_width())
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Raw tensor metadata exactly as an engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTensorInfo {
    pub name: String,
    pub data_type: NativeDataType,
    pub shape: Vec<i64>,
}

/// Read-only view of a tensor's name, data type and current shape.
///
/// Descriptors are snapshots: after a resize they go stale and must be
/// queried again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorDescriptor {
    name: String,
    data_type: TensorDataType,
    shape: TensorShape,
    #[serde(skip)]
    byte_len: usize,
}

impl TensorDescriptor {
    /// Translate engine metadata. The data type is checked before anything else.
    ///
    /// Shapes whose byte length does not fit in `usize` are rejected as
    /// [`InferenceError::InvalidShape`].
    pub fn from_native(info: NativeTensorInfo) -> Result<Self> {
        let data_type = TensorDataType::try_from(&info.data_type)?;
        let shape = TensorShape::from_native(&info.name, &info.shape)?;
        let byte_len = shape.byte_len(data_type).ok_or_else(|| InferenceError::InvalidShape {
            name: info.name.clone(),
            dims: info.shape.clone(),
        })?;
        Ok(Self {
            name: info.name,
            data_type,
            shape,
            byte_len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> TensorDataType {
        self.data_type
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    /// Byte length of the tensor's backing memory at its current shape.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

/// Input value for inference.
///
/// Whatever the variant, the bytes handed to the engine are the
/// little-endian element bytes in row-major order; no numeric conversion
/// is applied.
#[derive(Debug, Clone)]
pub enum InputTensor {
    Bytes(Vec<u8>),
    Float32(ArrayD<f32>),
    Int32(ArrayD<i32>),
    Uint8(ArrayD<u8>),
    Int64(ArrayD<i64>),
}

impl InputTensor {
    /// Data type implied by a typed variant; `None` for raw bytes.
    pub fn dtype(&self) -> Option<TensorDataType> {
        match self {
            InputTensor::Bytes(_) => None,
            InputTensor::Float32(_) => Some(TensorDataType::Float32),
            InputTensor::Int32(_) => Some(TensorDataType::Int32),
            InputTensor::Uint8(_) => Some(TensorDataType::Uint8),
            InputTensor::Int64(_) => Some(TensorDataType::Int64),
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            InputTensor::Bytes(bytes) => bytes.len(),
            InputTensor::Float32(arr) => arr.len() * 4,
            InputTensor::Int32(arr) => arr.len() * 4,
            InputTensor::Uint8(arr) => arr.len(),
            InputTensor::Int64(arr) => arr.len() * 8,
        }
    }

    /// Little-endian element bytes in logical row-major order.
    pub fn le_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            InputTensor::Bytes(bytes) => Cow::Borrowed(bytes),
            InputTensor::Float32(arr) => Cow::Owned(encode_array(arr)),
            InputTensor::Int32(arr) => Cow::Owned(encode_array(arr)),
            InputTensor::Uint8(arr) => match arr.as_slice() {
                Some(slice) => Cow::Borrowed(slice),
                None => Cow::Owned(arr.iter().copied().collect()),
            },
            InputTensor::Int64(arr) => Cow::Owned(encode_array(arr)),
        }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.le_bytes().into_owned()
    }

    /// Create a Float32 tensor from raw data and shape.
    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(InputTensor::Float32)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }

    /// Create an Int32 tensor from raw data and shape.
    pub fn from_i32(data: Vec<i32>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(InputTensor::Int32)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }

    /// Create a Uint8 tensor from raw data and shape.
    pub fn from_u8(data: Vec<u8>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(InputTensor::Uint8)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }

    /// Create an Int64 tensor from raw data and shape.
    pub fn from_i64(data: Vec<i64>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(InputTensor::Int64)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }
}

impl From<Vec<u8>> for InputTensor {
    fn from(bytes: Vec<u8>) -> Self {
        InputTensor::Bytes(bytes)
    }
}

fn encode_array<T: TensorElement>(arr: &ArrayD<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(arr.len() * T::DATA_TYPE.byte_width());
    for value in arr.iter() {
        value.extend_le_bytes(&mut out);
    }
    out
}

/// Owned output tensor in its post-invocation shape.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTensor {
    Float32(ArrayD<f32>),
    Int32(ArrayD<i32>),
    Uint8(ArrayD<u8>),
    Int64(ArrayD<i64>),
}

impl OutputTensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            OutputTensor::Float32(arr) => arr.shape(),
            OutputTensor::Int32(arr) => arr.shape(),
            OutputTensor::Uint8(arr) => arr.shape(),
            OutputTensor::Int64(arr) => arr.shape(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorDataType {
        match self {
            OutputTensor::Float32(_) => TensorDataType::Float32,
            OutputTensor::Int32(_) => TensorDataType::Int32,
            OutputTensor::Uint8(_) => TensorDataType::Uint8,
            OutputTensor::Int64(_) => TensorDataType::Int64,
        }
    }

    /// Try to get the inner Float32 array.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            OutputTensor::Float32(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Int32 array.
    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            OutputTensor::Int32(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Uint8 array.
    pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
        match self {
            OutputTensor::Uint8(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get the inner Int64 array.
    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            OutputTensor::Int64(arr) => Some(arr),
            _ => None,
        }
    }
}
