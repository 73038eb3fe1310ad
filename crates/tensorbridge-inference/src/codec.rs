//! Conversion between raw little-endian tensor bytes and typed element buffers.
//!
//! Every conversion here is a bounds-checked reassembly of byte groups.
//! A 4-byte group becomes one `f32` by bit pattern, never by numeric cast,
//! and no engine memory is ever reinterpreted in place.

use crate::error::InferenceError;
use crate::tensor::TensorDataType;
use crate::Result;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for i32 {}
    impl Sealed for u8 {}
    impl Sealed for i64 {}
}

/// Rust element type backing one of the supported tensor data types.
pub trait TensorElement: sealed::Sealed + Copy + Default + Send + 'static {
    const DATA_TYPE: TensorDataType;

    /// Build one element from exactly `DATA_TYPE.byte_width()` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn extend_le_bytes(&self, out: &mut Vec<u8>);
}

macro_rules! impl_tensor_element {
    ($ty:ty, $dtype:expr, $width:literal) => {
        impl TensorElement for $ty {
            const DATA_TYPE: TensorDataType = $dtype;

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $width];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn extend_le_bytes(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_tensor_element!(f32, TensorDataType::Float32, 4);
impl_tensor_element!(i32, TensorDataType::Int32, 4);
impl_tensor_element!(u8, TensorDataType::Uint8, 1);
impl_tensor_element!(i64, TensorDataType::Int64, 8);

/// Decode a little-endian byte buffer into typed elements.
pub fn decode_le<T: TensorElement>(bytes: &[u8]) -> Result<Vec<T>> {
    let width = T::DATA_TYPE.byte_width();
    if bytes.len() % width != 0 {
        return Err(InferenceError::ByteLengthMisaligned {
            dtype: T::DATA_TYPE,
            width,
            len: bytes.len(),
        });
    }
    Ok(bytes.chunks_exact(width).map(T::from_le_slice).collect())
}

/// Encode typed elements as little-endian bytes.
pub fn encode_le<T: TensorElement>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DATA_TYPE.byte_width());
    for value in values {
        value.extend_le_bytes(&mut out);
    }
    out
}

/// Typed flat sequence decoded from an output tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Uint8(Vec<u8>),
    Int64(Vec<i64>),
}

impl TypedBuffer {
    /// Decode `bytes` according to `dtype`.
    pub fn decode(dtype: TensorDataType, bytes: &[u8]) -> Result<Self> {
        Ok(match dtype {
            TensorDataType::Float32 => TypedBuffer::Float32(decode_le(bytes)?),
            TensorDataType::Int32 => TypedBuffer::Int32(decode_le(bytes)?),
            TensorDataType::Uint8 => TypedBuffer::Uint8(bytes.to_vec()),
            TensorDataType::Int64 => TypedBuffer::Int64(decode_le(bytes)?),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            TypedBuffer::Float32(values) => encode_le(values),
            TypedBuffer::Int32(values) => encode_le(values),
            TypedBuffer::Uint8(values) => values.clone(),
            TypedBuffer::Int64(values) => encode_le(values),
        }
    }

    pub fn dtype(&self) -> TensorDataType {
        match self {
            TypedBuffer::Float32(_) => TensorDataType::Float32,
            TypedBuffer::Int32(_) => TensorDataType::Int32,
            TypedBuffer::Uint8(_) => TensorDataType::Uint8,
            TypedBuffer::Int64(_) => TensorDataType::Int64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::Float32(values) => values.len(),
            TypedBuffer::Int32(values) => values.len(),
            TypedBuffer::Uint8(values) => values.len(),
            TypedBuffer::Int64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
