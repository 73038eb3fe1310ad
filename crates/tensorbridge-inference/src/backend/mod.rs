//! Native engine adapters.

#[cfg(feature = "native")]
pub mod ort;

#[cfg(feature = "portable")]
pub mod tract;

#[cfg(feature = "portable")]
mod staging;

use crate::options::InterpreterOptions;
use crate::tensor::NativeTensorInfo;
use crate::Result;

/// Capability contract every native inference engine adapter provides.
///
/// This abstracts over different runtimes so the marshaling in
/// [`InferenceSession`](crate::InferenceSession) runs unchanged on native
/// platforms (via ort) and on portable targets (via tract). Adapters report
/// failures with the matching [`InferenceError`](crate::InferenceError)
/// variant; indices are already range-checked by the session.
pub trait NativeEngine: Send + Sized {
    /// Construct the interpreter from opaque model bytes.
    fn load(model: &[u8], options: &InterpreterOptions) -> Result<Self>;

    /// Allocate (or reallocate) the tensor graph for the current input shapes.
    ///
    /// On failure the engine stays as it was after the last successful
    /// allocation, and inputs resized since then get their old shapes back.
    fn allocate_tensors(&mut self) -> Result<()>;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Metadata of an input tensor at its current shape.
    fn input_info(&self, index: usize) -> Result<NativeTensorInfo>;

    /// Metadata of an output tensor; after `invoke` this is the produced shape.
    fn output_info(&self, index: usize) -> Result<NativeTensorInfo>;

    /// Change an input's shape. On failure the previous shape stays in effect.
    fn resize_input(&mut self, index: usize, dims: &[usize]) -> Result<()>;

    /// Copy raw little-endian bytes into an input tensor's backing memory.
    fn write_input(&mut self, index: usize, bytes: &[u8]) -> Result<()>;

    /// Run one synchronous inference pass.
    fn invoke(&mut self) -> Result<()>;

    /// Raw little-endian bytes of an output tensor.
    fn read_output(&self, index: usize) -> Result<Vec<u8>>;
}
