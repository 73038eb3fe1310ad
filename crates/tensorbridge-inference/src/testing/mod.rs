//! In-memory engine for exercising the session without a native runtime.
//!
//! The "model bytes" are a JSON [`ScriptedModel`]. Invocation copies input
//! `k` verbatim into output `k` (truncated or zero-padded to the output's
//! byte length), and a single `-1` output dimension is resolved from the
//! input's element count, so dynamic output shapes can be simulated.

#[cfg(any(feature = "native", feature = "portable"))]
pub mod onnx;

use serde::{Deserialize, Serialize};

use crate::backend::NativeEngine;
use crate::error::InferenceError;
use crate::options::InterpreterOptions;
use crate::tensor::{NativeDataType, NativeTensorInfo, TensorDataType};
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedTensor {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<i64>,
}

impl ScriptedTensor {
    pub fn new(name: &str, dtype: &str, shape: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            dtype: dtype.to_string(),
            shape: shape.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedModel {
    pub inputs: Vec<ScriptedTensor>,
    pub outputs: Vec<ScriptedTensor>,
    pub fail_allocation: bool,
    pub fail_invoke: bool,
    /// Resizes with any dimension above this are refused.
    pub max_dim: Option<usize>,
    /// Reallocation after a resize to more elements than this fails.
    pub max_elements: Option<usize>,
    /// A failed reallocation leaves resized shapes in place instead of
    /// reverting them.
    pub keep_rejected_shape: bool,
}

impl ScriptedModel {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("scripted model serializes")
    }
}

pub struct ScriptedEngine {
    model: ScriptedModel,
    inputs: Vec<Vec<u8>>,
    outputs: Vec<Vec<u8>>,
    output_shapes: Vec<Vec<i64>>,
    /// Shapes of inputs resized since the last successful allocation.
    pending: Vec<(usize, Vec<i64>)>,
    pub writes: usize,
    pub invocations: usize,
    pub allocations: usize,
}

fn native_type(name: &str) -> NativeDataType {
    match name {
        "FLOAT32" => NativeDataType::Float32,
        "INT32" => NativeDataType::Int32,
        "UINT8" => NativeDataType::Uint8,
        "INT64" => NativeDataType::Int64,
        "INT8" => NativeDataType::Int8,
        "INT16" => NativeDataType::Int16,
        "BOOL" => NativeDataType::Bool,
        "STRING" => NativeDataType::String,
        other => NativeDataType::Other(other.to_string()),
    }
}

fn width(dtype: &str) -> usize {
    TensorDataType::try_from(&native_type(dtype))
        .map(TensorDataType::byte_width)
        .unwrap_or(1)
}

fn element_count(shape: &[i64]) -> usize {
    if shape.iter().any(|&d| d < 0) {
        0
    } else {
        shape.iter().map(|&d| d as usize).product()
    }
}

impl ScriptedEngine {
    pub fn input_bytes(&self, index: usize) -> &[u8] {
        &self.inputs[index]
    }
}

impl NativeEngine for ScriptedEngine {
    fn load(model: &[u8], _options: &InterpreterOptions) -> Result<Self> {
        let model: ScriptedModel =
            serde_json::from_slice(model).map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        let output_shapes = model.outputs.iter().map(|t| t.shape.clone()).collect();
        Ok(Self {
            inputs: vec![Vec::new(); model.inputs.len()],
            outputs: vec![Vec::new(); model.outputs.len()],
            output_shapes,
            pending: Vec::new(),
            model,
            writes: 0,
            invocations: 0,
            allocations: 0,
        })
    }

    fn allocate_tensors(&mut self) -> Result<()> {
        if self.model.fail_allocation {
            return Err(InferenceError::TensorAllocation("scripted failure".to_string()));
        }
        let counts: Vec<usize> = self.model.inputs.iter().map(|t| element_count(&t.shape)).collect();
        let max = self.model.max_elements.unwrap_or(usize::MAX);
        if let Some(&elements) = counts.iter().find(|&&n| n > max) {
            if !self.model.keep_rejected_shape {
                for (index, shape) in self.pending.drain(..) {
                    self.model.inputs[index].shape = shape;
                }
            }
            return Err(InferenceError::TensorAllocation(format!(
                "{} elements exceed the arena",
                elements
            )));
        }
        self.inputs = counts
            .iter()
            .zip(&self.model.inputs)
            .map(|(&elements, tensor)| vec![0u8; elements * width(&tensor.dtype)])
            .collect();
        self.pending.clear();
        self.allocations += 1;
        Ok(())
    }

    fn input_count(&self) -> usize {
        self.model.inputs.len()
    }

    fn output_count(&self) -> usize {
        self.model.outputs.len()
    }

    fn input_info(&self, index: usize) -> Result<NativeTensorInfo> {
        let tensor = &self.model.inputs[index];
        Ok(NativeTensorInfo {
            name: tensor.name.clone(),
            data_type: native_type(&tensor.dtype),
            shape: tensor.shape.clone(),
        })
    }

    fn output_info(&self, index: usize) -> Result<NativeTensorInfo> {
        let tensor = &self.model.outputs[index];
        Ok(NativeTensorInfo {
            name: tensor.name.clone(),
            data_type: native_type(&tensor.dtype),
            shape: self.output_shapes[index].clone(),
        })
    }

    fn resize_input(&mut self, index: usize, dims: &[usize]) -> Result<()> {
        if let Some(max) = self.model.max_dim {
            if dims.iter().any(|&d| d > max) {
                return Err(InferenceError::ResizeFailure {
                    index,
                    reason: format!("dimension above {}", max),
                });
            }
        }
        let shape = &mut self.model.inputs[index].shape;
        if !self.pending.iter().any(|(pending, _)| *pending == index) {
            self.pending.push((index, shape.clone()));
        }
        *shape = dims.iter().map(|&d| d as i64).collect();
        Ok(())
    }

    fn write_input(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        let buffer = &mut self.inputs[index];
        if buffer.len() != bytes.len() {
            return Err(InferenceError::InferenceFailed("write outside tensor arena".to_string()));
        }
        buffer.copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        if self.model.fail_invoke {
            return Err(InferenceError::InferenceFailed("scripted failure".to_string()));
        }
        for (k, tensor) in self.model.outputs.iter().enumerate() {
            let source = self.inputs.get(k).cloned().unwrap_or_default();
            let out_width = width(&tensor.dtype);
            let mut shape = tensor.shape.clone();
            if let Some(pos) = shape.iter().position(|&d| d < 0) {
                let known: i64 = shape.iter().filter(|&&d| d >= 0).product();
                let source_elements = self
                    .model
                    .inputs
                    .get(k)
                    .map(|t| element_count(&t.shape))
                    .unwrap_or(0) as i64;
                shape[pos] = if known == 0 { 0 } else { source_elements / known };
            }
            let mut bytes = source;
            bytes.resize(element_count(&shape) * out_width, 0);
            self.outputs[k] = bytes;
            self.output_shapes[k] = shape;
        }
        self.invocations += 1;
        Ok(())
    }

    fn read_output(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self.outputs[index].clone())
    }
}
