//! Tract engine for portable pure-Rust inference.

use tract_onnx::prelude::*;
use tracing::{debug, warn};

use crate::backend::staging::StagedModel;
use crate::backend::NativeEngine;
use crate::codec::{decode_le, encode_le};
use crate::error::InferenceError;
use crate::options::{InterpreterOptions, OptimizationLevel};
use crate::tensor::{NativeDataType, NativeTensorInfo};
use crate::Result;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// One input or output of the runnable plan plus its backing bytes.
struct Port {
    name: String,
    datum_type: DatumType,
    /// Symbolic dimensions are reported as -1.
    shape: Vec<i64>,
    data: Vec<u8>,
}

impl Port {
    fn from_fact(name: String, fact: &TypedFact) -> Self {
        Self {
            name,
            datum_type: fact.datum_type,
            shape: fact.shape.iter().map(|d| d.to_i64().unwrap_or(-1)).collect(),
            data: Vec::new(),
        }
    }

    fn info(&self) -> NativeTensorInfo {
        NativeTensorInfo {
            name: self.name.clone(),
            data_type: native_type(self.datum_type),
            shape: self.shape.clone(),
        }
    }

    fn concrete_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(|&d| usize::try_from(d).ok()).collect()
    }

    fn allocate(&mut self) -> Result<()> {
        let Some(shape) = self.concrete_shape() else {
            self.data = Vec::new();
            return Ok(());
        };
        let len = shape
            .iter()
            .try_fold(self.datum_type.size_of(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| InferenceError::TensorAllocation(format!("'{}' {:?} overflows", self.name, self.shape)))?;
        self.data = vec![0u8; len];
        Ok(())
    }
}

fn native_type(dt: DatumType) -> NativeDataType {
    match dt {
        DatumType::F32 => NativeDataType::Float32,
        DatumType::I32 => NativeDataType::Int32,
        DatumType::U8 => NativeDataType::Uint8,
        DatumType::I64 => NativeDataType::Int64,
        DatumType::I8 => NativeDataType::Int8,
        DatumType::I16 => NativeDataType::Int16,
        DatumType::Bool => NativeDataType::Bool,
        DatumType::String => NativeDataType::String,
        DatumType::F16 => NativeDataType::Float16,
        DatumType::F64 => NativeDataType::Float64,
        other => NativeDataType::Other(format!("{other:?}")),
    }
}

/// Engine backed by Tract.
///
/// The model arrives as bytes but is loaded from a staged temporary file,
/// which is removed once parsing is done.
pub struct TractEngine {
    model: InferenceModel,
    optimize: bool,
    plan: Option<Plan>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    /// Input facts replaced since the last successful allocation.
    pending: Vec<(usize, InferenceFact)>,
}

impl TractEngine {
    fn outlet_names(model: &InferenceModel, outlets: &[OutletId]) -> Vec<String> {
        outlets
            .iter()
            .map(|&outlet| match model.outlet_label(outlet) {
                Some(label) => label.to_string(),
                None => model.node(outlet.node).name.clone(),
            })
            .collect()
    }

    fn build(&self) -> Result<(Plan, Vec<Port>, Vec<Port>)> {
        let alloc = |e: TractError| InferenceError::TensorAllocation(e.to_string());

        let typed = self.model.clone().into_typed().map_err(alloc)?;
        let typed = if self.optimize {
            typed.into_optimized().map_err(alloc)?
        } else {
            typed
        };
        let plan = typed.into_runnable().map_err(alloc)?;

        let graph = plan.model();
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (i, old) in self.inputs.iter().enumerate() {
            let fact = graph.input_fact(i).map_err(alloc)?;
            inputs.push(Port::from_fact(old.name.clone(), fact));
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (i, old) in self.outputs.iter().enumerate() {
            let fact = graph.output_fact(i).map_err(alloc)?;
            outputs.push(Port::from_fact(old.name.clone(), fact));
        }
        for port in inputs.iter_mut().chain(outputs.iter_mut()) {
            port.allocate()?;
        }
        Ok((plan, inputs, outputs))
    }

    fn convert_input(port: &Port) -> Result<TValue> {
        let shape = port.concrete_shape().ok_or_else(|| {
            InferenceError::InferenceFailed(format!("input '{}' has unresolved shape {:?}", port.name, port.shape))
        })?;
        let array = match port.datum_type {
            DatumType::F32 => {
                tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&shape), decode_le::<f32>(&port.data)?)
                    .map(|array| array.into_tvalue())
            }
            DatumType::I32 => {
                tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&shape), decode_le::<i32>(&port.data)?)
                    .map(|array| array.into_tvalue())
            }
            DatumType::U8 => {
                tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&shape), port.data.clone())
                    .map(|array| array.into_tvalue())
            }
            DatumType::I64 => {
                tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&shape), decode_le::<i64>(&port.data)?)
                    .map(|array| array.into_tvalue())
            }
            other => {
                return Err(InferenceError::UnsupportedTensorType(native_type(other).name().to_string()));
            }
        };
        array.map_err(|e| InferenceError::InferenceFailed(e.to_string()))
    }

    /// Little-endian bytes of a produced tensor. Types that are not plain
    /// data (strings, blobs) keep no bytes.
    fn output_bytes(value: &Tensor) -> Result<Vec<u8>> {
        let failed = |e: TractError| InferenceError::InferenceFailed(e.to_string());
        Ok(match value.datum_type() {
            DatumType::F32 => {
                let values: Vec<f32> = value.to_array_view::<f32>().map_err(failed)?.iter().copied().collect();
                encode_le(&values)
            }
            DatumType::I32 => {
                let values: Vec<i32> = value.to_array_view::<i32>().map_err(failed)?.iter().copied().collect();
                encode_le(&values)
            }
            DatumType::U8 => value.to_array_view::<u8>().map_err(failed)?.iter().copied().collect(),
            DatumType::I64 => {
                let values: Vec<i64> = value.to_array_view::<i64>().map_err(failed)?.iter().copied().collect();
                encode_le(&values)
            }
            dt if dt.is_copy() => value.as_bytes().to_vec(),
            _ => Vec::new(),
        })
    }
}

impl NativeEngine for TractEngine {
    fn load(model: &[u8], options: &InterpreterOptions) -> Result<Self> {
        debug!("Loading ONNX model into tract from {} bytes", model.len());

        let staged = StagedModel::new(model)?;
        let model = tract_onnx::onnx()
            .model_for_path(staged.path())
            .map_err(|e| InferenceError::ModelLoad(format!("Failed to load model: {}", e)))?;
        drop(staged);

        let input_names = model
            .input_outlets()
            .map(|outlets| Self::outlet_names(&model, outlets))
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;
        let output_names = model
            .output_outlets()
            .map(|outlets| Self::outlet_names(&model, outlets))
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        debug!("Model inputs: {:?}", input_names);
        debug!("Model outputs: {:?}", output_names);

        // Ports are filled in from typed facts by allocate_tensors.
        let port = |name: String| Port {
            name,
            datum_type: DatumType::F32,
            shape: Vec::new(),
            data: Vec::new(),
        };

        Ok(Self {
            model,
            optimize: options.optimization != OptimizationLevel::Disabled,
            plan: None,
            inputs: input_names.into_iter().map(port).collect(),
            outputs: output_names.into_iter().map(port).collect(),
            pending: Vec::new(),
        })
    }

    fn allocate_tensors(&mut self) -> Result<()> {
        match self.build() {
            Ok((plan, inputs, outputs)) => {
                self.inputs = inputs;
                self.outputs = outputs;
                self.plan = Some(plan);
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                for (index, fact) in std::mem::take(&mut self.pending) {
                    debug!("Restoring input {} to {:?}", index, fact);
                    if let Err(restore_err) = self.model.set_input_fact(index, fact) {
                        warn!("Could not restore input {}: {}", index, restore_err);
                    }
                }
                Err(e)
            }
        }
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
        let failure = |e: TractError| InferenceError::ResizeFailure {
            index,
            reason: e.to_string(),
        };
        let datum_type = self.inputs[index].datum_type;
        let prior = self.model.input_fact(index).map_err(failure)?.clone();
        self.model
            .set_input_fact(index, InferenceFact::dt_shape(datum_type, dims))
            .map_err(failure)?;
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
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| InferenceError::InferenceFailed("tensors are not allocated".to_string()))?;

        let tract_inputs: TVec<TValue> = self
            .inputs
            .iter()
            .map(Self::convert_input)
            .collect::<Result<TVec<_>>>()?;

        let results = plan
            .run(tract_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        // Outputs are stored untranslated; only the ones read are checked.
        for (port, value) in self.outputs.iter_mut().zip(results.iter()) {
            port.data = Self::output_bytes(value)?;
            port.datum_type = value.datum_type();
            port.shape = value.shape().iter().map(|&d| d as i64).collect();
        }

        Ok(())
    }

    fn read_output(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self.outputs[index].data.clone())
    }
}
