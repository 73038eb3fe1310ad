//! Inference session: owns one engine and marshals tensors in and out of it.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, trace, warn};

use crate::backend::NativeEngine;
use crate::codec::TypedBuffer;
use crate::container::OutputContainer;
use crate::error::{InferenceError, TensorKind};
use crate::options::InterpreterOptions;
use crate::tensor::{InputTensor, NativeTensorInfo, OutputTensor, TensorDescriptor, TensorShape};
use crate::Result;

/// A loaded model with allocated tensors.
///
/// The session exclusively owns its engine until [`close`](Self::close) or
/// drop. It is not meant to be shared between threads; run one session per
/// worker or guard it with a mutex.
pub struct InferenceSession<E: NativeEngine> {
    engine: Option<E>,
    input_count: usize,
    output_count: usize,
}

fn check_index(kind: TensorKind, index: usize, count: usize) -> Result<()> {
    if index < count {
        Ok(())
    } else {
        Err(InferenceError::IndexOutOfRange { kind, index, count })
    }
}

impl<E: NativeEngine> InferenceSession<E> {
    /// Load a model and allocate its tensors.
    ///
    /// If allocation fails the engine is dropped before the error is returned.
    pub fn new(model: &[u8], options: &InterpreterOptions) -> Result<Self> {
        debug!("Loading model from {} bytes", model.len());

        let mut engine = E::load(model, options)?;
        engine.allocate_tensors()?;

        let input_count = engine.input_count();
        let output_count = engine.output_count();
        debug!("Model has {} inputs and {} outputs", input_count, output_count);

        Ok(Self {
            engine: Some(engine),
            input_count,
            output_count,
        })
    }

    /// Load a model from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P, options: &InterpreterOptions) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading model from: {}", path.display());
        let bytes = std::fs::read(path)?;
        Self::new(&bytes, options)
    }

    fn engine(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(InferenceError::SessionClosed)
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        self.engine.as_mut().ok_or(InferenceError::SessionClosed)
    }

    pub fn input_tensor_count(&self) -> Result<usize> {
        self.engine()?;
        Ok(self.input_count)
    }

    pub fn output_tensor_count(&self) -> Result<usize> {
        self.engine()?;
        Ok(self.output_count)
    }

    /// Descriptor of input `index` at its current shape.
    pub fn input_tensor(&self, index: usize) -> Result<TensorDescriptor> {
        let engine = self.engine()?;
        check_index(TensorKind::Input, index, self.input_count)?;
        TensorDescriptor::from_native(engine.input_info(index)?)
    }

    /// Descriptor of output `index`; after `run` this reflects the produced shape.
    pub fn output_tensor(&self, index: usize) -> Result<TensorDescriptor> {
        let engine = self.engine()?;
        check_index(TensorKind::Output, index, self.output_count)?;
        TensorDescriptor::from_native(engine.output_info(index)?)
    }

    pub fn input_tensors(&self) -> Result<Vec<TensorDescriptor>> {
        (0..self.input_tensor_count()?)
            .map(|i| self.input_tensor(i))
            .collect()
    }

    pub fn output_tensors(&self) -> Result<Vec<TensorDescriptor>> {
        (0..self.output_tensor_count()?)
            .map(|i| self.output_tensor(i))
            .collect()
    }

    /// Position of the input called `name`.
    ///
    /// Matches on raw engine metadata, so inputs of unsupported types can
    /// still be located.
    pub fn input_index(&self, name: &str) -> Result<Option<usize>> {
        let engine = self.engine()?;
        for index in 0..self.input_count {
            if engine.input_info(index)?.name == name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Position of the output called `name`.
    pub fn output_index(&self, name: &str) -> Result<Option<usize>> {
        let engine = self.engine()?;
        for index in 0..self.output_count {
            if engine.output_info(index)?.name == name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Resize input `index` and reallocate the tensor graph.
    ///
    /// Descriptors obtained before the call are stale afterwards. On failure
    /// the previous shape is restored.
    pub fn resize_input(&mut self, index: usize, shape: impl Into<TensorShape>) -> Result<()> {
        let shape = shape.into();
        let count = self.input_count;
        let engine = self.engine_mut()?;
        check_index(TensorKind::Input, index, count)?;

        let previous = engine.input_info(index)?;
        debug!("Resizing input {} from {:?} to {}", index, previous.shape, shape);

        engine
            .resize_input(index, shape.dims())
            .map_err(|e| as_resize_failure(index, e))?;

        if let Err(e) = engine.allocate_tensors() {
            warn!("Reallocation after resizing input {} failed: {}", index, e);
            restore_input(engine, index, &previous);
            return Err(as_resize_failure(index, e));
        }

        Ok(())
    }

    /// Run inference.
    ///
    /// `inputs[i]` is copied byte for byte into input tensor `i`. Each
    /// `(index, container)` in `outputs` is then filled, in the order
    /// given, from output tensor `index`. Every input is validated before
    /// any engine memory is written.
    pub fn run<'a, I>(&mut self, inputs: &[InputTensor], outputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, OutputContainer<'a>)>,
    {
        let (input_count, output_count) = (self.input_count, self.output_count);
        let engine = self.engine_mut()?;

        if inputs.len() > input_count {
            return Err(InferenceError::InputCountMismatch {
                expected: input_count,
                actual: inputs.len(),
            });
        }

        let mut outputs: Vec<(usize, OutputContainer<'a>)> = outputs.into_iter().collect();
        for (index, _) in &outputs {
            check_index(TensorKind::Output, *index, output_count)?;
        }

        let mut staged = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let descriptor = TensorDescriptor::from_native(engine.input_info(index)?)?;
            let expected = descriptor.byte_len();
            let actual = input.byte_len();
            if expected != actual {
                return Err(InferenceError::InputSizeMismatch {
                    index,
                    expected,
                    actual,
                });
            }
            staged.push(input.le_bytes());
        }

        for (index, bytes) in staged.iter().enumerate() {
            trace!("Copying {} bytes into input {}", bytes.len(), index);
            engine.write_input(index, bytes)?;
        }

        debug!("Invoking engine with {} inputs", inputs.len());
        engine.invoke()?;

        for (index, container) in outputs.iter_mut() {
            let buffer = read_typed(engine, *index)?.1;
            trace!("Filling output {} with {} {} elements", index, buffer.len(), buffer.dtype());
            container.fill(*index, &buffer)?;
        }

        Ok(())
    }

    /// Run with one input (index 0) and one output container (index 0).
    pub fn run_single<'a>(
        &mut self,
        input: &InputTensor,
        output: impl Into<OutputContainer<'a>>,
    ) -> Result<()> {
        self.run(std::slice::from_ref(input), [(0, output.into())])
    }

    /// Copy output `index` into an owned array in its current shape.
    pub fn read_output(&self, index: usize) -> Result<OutputTensor> {
        let engine = self.engine()?;
        check_index(TensorKind::Output, index, self.output_count)?;

        let (descriptor, buffer) = read_typed(engine, index)?;
        let shape = IxDyn(descriptor.shape().dims());
        let tensor = match buffer {
            TypedBuffer::Float32(values) => ArrayD::from_shape_vec(shape, values).map(OutputTensor::Float32),
            TypedBuffer::Int32(values) => ArrayD::from_shape_vec(shape, values).map(OutputTensor::Int32),
            TypedBuffer::Uint8(values) => ArrayD::from_shape_vec(shape, values).map(OutputTensor::Uint8),
            TypedBuffer::Int64(values) => ArrayD::from_shape_vec(shape, values).map(OutputTensor::Int64),
        };
        tensor.map_err(|e| InferenceError::InferenceFailed(e.to_string()))
    }

    /// Release the engine. Calling this again is a no-op.
    pub fn close(&mut self) {
        if self.engine.take().is_some() {
            debug!("Released inference session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_none()
    }
}

/// Descriptor and decoded contents of output `index`.
fn read_typed<E: NativeEngine>(engine: &E, index: usize) -> Result<(TensorDescriptor, TypedBuffer)> {
    let descriptor = TensorDescriptor::from_native(engine.output_info(index)?)?;
    let bytes = engine.read_output(index)?;
    if bytes.len() != descriptor.byte_len() {
        return Err(InferenceError::InferenceFailed(format!(
            "output {} holds {} bytes but '{}' {} {} needs {}",
            index,
            bytes.len(),
            descriptor.name(),
            descriptor.data_type(),
            descriptor.shape(),
            descriptor.byte_len()
        )));
    }
    let buffer = TypedBuffer::decode(descriptor.data_type(), &bytes)?;
    Ok((descriptor, buffer))
}

/// Put input `index` back to `previous` after a failed reallocation.
///
/// Engines revert pending resizes themselves; this only acts when one did not.
fn restore_input<E: NativeEngine>(engine: &mut E, index: usize, previous: &NativeTensorInfo) {
    if engine.input_info(index).is_ok_and(|info| info.shape == previous.shape) {
        return;
    }
    let prior = match TensorShape::from_native(&previous.name, &previous.shape) {
        Ok(prior) => prior,
        Err(_) => {
            warn!("Input {} had no concrete shape to restore", index);
            return;
        }
    };
    let restored = engine
        .resize_input(index, prior.dims())
        .and_then(|_| engine.allocate_tensors());
    if let Err(e) = restored {
        warn!("Could not restore input {} to {}: {}", index, prior, e);
    }
}

fn as_resize_failure(index: usize, err: InferenceError) -> InferenceError {
    match err {
        InferenceError::ResizeFailure { .. } => err,
        other => InferenceError::ResizeFailure {
            index,
            reason: other.to_string(),
        },
    }
}
