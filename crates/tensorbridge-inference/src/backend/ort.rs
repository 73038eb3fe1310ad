//! ONNX Runtime (ort) engine for native platforms with XNNPACK.
//!
//! ort has no persistent input tensors, so this adapter keeps one byte
//! arena per input and per output. `invoke` wraps the input arenas in ort
//! tensors, runs the session and copies every output back into its arena.

use ort::ep::XNNPACK;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor, ValueType};
use tracing::{debug, warn};

use crate::backend::NativeEngine;
use crate::codec::{decode_le, encode_le};
use crate::error::InferenceError;
use crate::options::{InterpreterOptions, OptimizationLevel};
use crate::tensor::{NativeDataType, NativeTensorInfo, TensorDataType};
use crate::Result;

/// One input or output of the model plus its backing bytes.
struct Port {
    name: String,
    data_type: NativeDataType,
    /// Shape declared by the model; negative entries are dynamic.
    declared: Vec<i64>,
    /// Current shape: declared, resized, or produced by the last run.
    shape: Vec<i64>,
    data: Vec<u8>,
    /// Why the last run left no bytes for this output.
    fault: Option<String>,
}

impl Port {
    fn from_value_type(name: &str, value_type: &ValueType) -> Self {
        let (data_type, declared) = match value_type {
            ValueType::Tensor { ty, shape, .. } => (native_type(*ty), shape.iter().copied().collect()),
            other => (NativeDataType::Other(format!("{other:?}")), Vec::new()),
        };
        Self {
            name: name.to_string(),
            data_type,
            shape: declared.clone(),
            declared,
            data: Vec::new(),
            fault: None,
        }
    }

    fn info(&self) -> NativeTensorInfo {
        NativeTensorInfo {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            shape: self.shape.clone(),
        }
    }

    /// Bytes needed at the current shape, if the shape and type are concrete.
    fn byte_len(&self) -> Result<Option<usize>> {
        let Ok(dtype) = TensorDataType::try_from(&self.data_type) else {
            return Ok(None);
        };
        let mut len = dtype.byte_width();
        for &dim in &self.shape {
            let Ok(dim) = usize::try_from(dim) else {
                return Ok(None);
            };
            len = len.checked_mul(dim).ok_or_else(|| {
                InferenceError::TensorAllocation(format!("'{}' {:?} overflows", self.name, self.shape))
            })?;
        }
        Ok(Some(len))
    }
}

fn native_type(ty: TensorElementType) -> NativeDataType {
    match ty {
        TensorElementType::Float32 => NativeDataType::Float32,
        TensorElementType::Int32 => NativeDataType::Int32,
        TensorElementType::Uint8 => NativeDataType::Uint8,
        TensorElementType::Int64 => NativeDataType::Int64,
        TensorElementType::Int8 => NativeDataType::Int8,
        TensorElementType::Int16 => NativeDataType::Int16,
        TensorElementType::Bool => NativeDataType::Bool,
        TensorElementType::String => NativeDataType::String,
        TensorElementType::Float16 => NativeDataType::Float16,
        TensorElementType::Float64 => NativeDataType::Float64,
        other => NativeDataType::Other(format!("{other:?}")),
    }
}

fn optimization_level(level: OptimizationLevel) -> GraphOptimizationLevel {
    match level {
        OptimizationLevel::Disabled => GraphOptimizationLevel::Disable,
        OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
        OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
        OptimizationLevel::All => GraphOptimizationLevel::Level3,
    }
}

/// Engine backed by ONNX Runtime.
pub struct OrtEngine {
    session: Session,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    /// Input shapes replaced since the last successful allocation.
    pending: Vec<(usize, Vec<i64>)>,
}

impl OrtEngine {
    fn build_input(port: &Port) -> Result<SessionInputValue<'static>> {
        let dtype = TensorDataType::try_from(&port.data_type)?;
        let shape = port.shape.clone();
        let value: ort::Result<SessionInputValue<'static>> = match dtype {
            TensorDataType::Float32 => {
                Tensor::from_array((shape, decode_le::<f32>(&port.data)?)).map(Into::into)
            }
            TensorDataType::Int32 => {
                Tensor::from_array((shape, decode_le::<i32>(&port.data)?)).map(Into::into)
            }
            TensorDataType::Uint8 => Tensor::from_array((shape, port.data.clone())).map(Into::into),
            TensorDataType::Int64 => {
                Tensor::from_array((shape, decode_le::<i64>(&port.data)?)).map(Into::into)
            }
        };
        value.map_err(|e| InferenceError::InferenceFailed(format!("input '{}': {}", port.name, e)))
    }

    /// Shape and little-endian bytes of one produced output.
    fn extract_output(dtype: TensorDataType, value: &DynValue) -> ort::Result<(Vec<i64>, Vec<u8>)> {
        Ok(match dtype {
            TensorDataType::Float32 => {
                let (shape, data) = value.try_extract_tensor::<f32>()?;
                (shape.iter().copied().collect(), encode_le(data))
            }
            TensorDataType::Int32 => {
                let (shape, data) = value.try_extract_tensor::<i32>()?;
                (shape.iter().copied().collect(), encode_le(data))
            }
            TensorDataType::Uint8 => {
                let (shape, data) = value.try_extract_tensor::<u8>()?;
                (shape.iter().copied().collect(), data.to_vec())
            }
            TensorDataType::Int64 => {
                let (shape, data) = value.try_extract_tensor::<i64>()?;
                (shape.iter().copied().collect(), encode_le(data))
            }
        })
    }
}

impl NativeEngine for OrtEngine {
    fn load(model: &[u8], options: &InterpreterOptions) -> Result<Self> {
        debug!("Loading ONNX model into ort from {} bytes", model.len());

        let mut builder = Session::builder()
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?
            .with_optimization_level(optimization_level(options.optimization))
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?
            .with_intra_threads(options.num_threads)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        if options.use_xnnpack {
            builder = builder
                .with_execution_providers([XNNPACK::default().build()])
                .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        }

        let session = builder
            .commit_from_memory(model)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        let inputs: Vec<Port> = session
            .inputs()
            .iter()
            .map(|i| Port::from_value_type(i.name(), i.dtype()))
            .collect();

        let outputs: Vec<Port> = session
            .outputs()
            .iter()
            .map(|o| Port::from_value_type(o.name(), o.dtype()))
            .collect();

        debug!(
            "Model inputs: {:?}",
            inputs.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
        debug!(
            "Model outputs: {:?}",
            outputs.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            session,
            inputs,
            outputs,
            pending: Vec::new(),
        })
    }

    fn allocate_tensors(&mut self) -> Result<()> {
        let lens = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(Port::byte_len)
            .collect::<Result<Vec<_>>>();
        let lens = match lens {
            Ok(lens) => lens,
            Err(e) => {
                for (index, shape) in self.pending.drain(..) {
                    debug!("Restoring input {} to {:?}", index, shape);
                    self.inputs[index].shape = shape;
                }
                return Err(e);
            }
        };
        for (port, len) in self.inputs.iter_mut().chain(self.outputs.iter_mut()).zip(lens) {
            port.data = vec![0u8; len.unwrap_or(0)];
            port.fault = None;
        }
        self.pending.clear();
        Ok(())
    }

    fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn input_info(&self, index: usize) -> Result<NativeTensorInfo> {
        Ok(self.inputs[index].info())
    }

    fn output_info(&self, index: usize) -> Result<NativeTensorInfo> {
        Ok(self.outputs[index].info())
    }

    fn resize_input(&mut self, index: usize, dims: &[usize]) -> Result<()> {
        let port = &mut self.inputs[index];
        if port.declared.len() != dims.len() {
            return Err(InferenceError::ResizeFailure {
                index,
                reason: format!("'{}' has rank {}, got {:?}", port.name, port.declared.len(), dims),
            });
        }
        for (&declared, &dim) in port.declared.iter().zip(dims) {
            if declared >= 0 && declared as usize != dim {
                return Err(InferenceError::ResizeFailure {
                    index,
                    reason: format!("'{}' has static shape {:?}, got {:?}", port.name, port.declared, dims),
                });
            }
        }
        let shape = dims.iter().map(|&d| d as i64).collect();
        let prior = std::mem::replace(&mut port.shape, shape);
        if !self.pending.iter().any(|(pending, _)| *pending == index) {
            self.pending.push((index, prior));
        }
        Ok(())
    }

    fn write_input(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        let port = &mut self.inputs[index];
        if port.data.len() != bytes.len() {
            return Err(InferenceError::InputSizeMismatch {
                index,
                expected: port.data.len(),
                actual: bytes.len(),
            });
        }
        port.data.copy_from_slice(bytes);
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let ort_inputs: Vec<(&str, SessionInputValue<'static>)> = self
            .inputs
            .iter()
            .map(|port| Ok((port.name.as_str(), Self::build_input(port)?)))
            .collect::<Result<Vec<_>>>()?;

        let outputs = self
            .session
            .run(ort_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        // Outputs are stored untranslated; only the ones read are checked.
        for (name, value) in outputs.iter() {
            let Some(port) = self.outputs.iter_mut().find(|p| p.name == name) else {
                continue;
            };
            port.data.clear();
            port.fault = None;
            let Ok(dtype) = TensorDataType::try_from(&port.data_type) else {
                if let ValueType::Tensor { shape, .. } = value.dtype() {
                    port.shape = shape.iter().copied().collect();
                }
                continue;
            };
            match Self::extract_output(dtype, &value) {
                Ok((shape, data)) => {
                    port.shape = shape;
                    port.data = data;
                }
                Err(e) => {
                    warn!("Could not extract output '{}': {}", port.name, e);
                    port.fault = Some(e.to_string());
                }
            }
        }

        Ok(())
    }

    fn read_output(&self, index: usize) -> Result<Vec<u8>> {
        let port = &self.outputs[index];
        match &port.fault {
            Some(fault) => Err(InferenceError::InferenceFailed(format!("output '{}': {}", port.name, fault))),
            None => Ok(port.data.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InferenceSession;
    use crate::tensor::InputTensor;
    use crate::testing::onnx::{self, OnnxGraph};
    use pretty_assertions::assert_eq;

    type Session = InferenceSession<OrtEngine>;

    fn open(model: &[u8]) -> Session {
        let options = InterpreterOptions::default().with_xnnpack(false).with_num_threads(1);
        Session::new(model, &options).unwrap()
    }

    #[test]
    fn test_identity_passthrough() {
        let mut session = open(&onnx::identity(onnx::FLOAT, &[("x", "y")], &[1, 2, 2]));
        assert_eq!(session.input_tensor(0).unwrap().shape().dims(), &[1, 2, 2]);
        assert_eq!(session.output_index("y").unwrap(), Some(0));

        let mut out = [0.0f32; 4];
        session
            .run(
                &[InputTensor::from_f32(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2]).unwrap()],
                [(0, (&mut out).into())],
            )
            .unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(session.output_tensor(0).unwrap().shape().dims(), &[1, 2, 2]);
    }

    #[test]
    fn test_integer_round_trip() {
        let model = OnnxGraph::new()
            .input("i", onnx::INT32, &[2])
            .input("u", onnx::UINT8, &[3])
            .input("l", onnx::INT64, &[2])
            .output("i_out", onnx::INT32)
            .output("u_out", onnx::UINT8)
            .output("l_out", onnx::INT64)
            .node("Identity", &["i"], &["i_out"])
            .node("Identity", &["u"], &["u_out"])
            .node("Identity", &["l"], &["l_out"])
            .to_bytes();
        let mut session = open(&model);
        let inputs = [
            InputTensor::from_i32(vec![i32::MIN, 9], &[2]).unwrap(),
            InputTensor::from_u8(vec![0, 128, 255], &[3]).unwrap(),
            InputTensor::from_i64(vec![-1, i64::MAX], &[2]).unwrap(),
        ];
        let (mut i, mut u, mut l) = ([0i32; 2], [0u8; 3], [0i64; 2]);
        session
            .run(&inputs, [(0, (&mut i).into()), (1, (&mut u).into()), (2, (&mut l).into())])
            .unwrap();
        assert_eq!(i, [i32::MIN, 9]);
        assert_eq!(u, [0, 128, 255]);
        assert_eq!(l, [-1, i64::MAX]);
    }

    #[test]
    fn test_resize_dynamic_input_and_roll_back_overflow() {
        let mut session = open(&onnx::identity(onnx::FLOAT, &[("x", "y")], &[-1]));
        assert!(matches!(session.input_tensor(0), Err(InferenceError::InvalidShape { .. })));

        let err = session.resize_input(0, vec![1usize << 62]).unwrap_err();
        assert!(matches!(err, InferenceError::ResizeFailure { index: 0, .. }));
        assert!(matches!(session.input_tensor(0), Err(InferenceError::InvalidShape { .. })));

        session.resize_input(0, vec![3]).unwrap();
        let mut out = [0.0f32; 3];
        session
            .run(&[InputTensor::from_f32(vec![1.0, 2.0, 3.0], &[3]).unwrap()], [(0, (&mut out).into())])
            .unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_static_dimension_refuses_resize() {
        let model = OnnxGraph::new()
            .input("x", onnx::FLOAT, &[2])
            .output("y", onnx::FLOAT)
            .float_initializer("c", &[2], &[10.0, 20.0])
            .node("Add", &["x", "c"], &["y"])
            .to_bytes();
        let mut session = open(&model);
        let err = session.resize_input(0, vec![3]).unwrap_err();
        assert!(matches!(err, InferenceError::ResizeFailure { index: 0, .. }));
        assert_eq!(session.input_tensor(0).unwrap().shape().dims(), &[2]);

        let mut out = [0.0f32; 2];
        session
            .run(&[InputTensor::from_f32(vec![1.0, 2.0], &[2]).unwrap()], [(0, (&mut out).into())])
            .unwrap();
        assert_eq!(out, [11.0, 22.0]);
    }

    #[test]
    fn test_unsupported_output_only_fails_when_read() {
        let model = OnnxGraph::new()
            .input("x", onnx::FLOAT, &[2])
            .output("y", onnx::FLOAT)
            .output("mask", onnx::BOOL)
            .node("Identity", &["x"], &["y"])
            .cast("x", "mask", onnx::BOOL)
            .to_bytes();
        let mut session = open(&model);

        let mut out = [0.0f32; 2];
        session
            .run(&[InputTensor::from_f32(vec![5.0, 0.0], &[2]).unwrap()], [(0, (&mut out).into())])
            .unwrap();
        assert_eq!(out, [5.0, 0.0]);
        match session.read_output(1) {
            Err(InferenceError::UnsupportedTensorType(name)) => assert_eq!(name, "BOOL"),
            other => panic!("expected UnsupportedTensorType, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_model_is_load_error() {
        let result = Session::new(b"\x0a\xffnot onnx", &InterpreterOptions::default());
        assert!(matches!(result, Err(InferenceError::ModelLoad(_))));
    }

    #[test]
    fn test_port_byte_len_overflow() {
        let port = Port {
            name: "x".to_string(),
            data_type: NativeDataType::Int64,
            declared: vec![-1, 2],
            shape: vec![1 << 61, 2],
            data: Vec::new(),
            fault: None,
        };
        assert!(matches!(port.byte_len(), Err(InferenceError::TensorAllocation(_))));
    }
}
