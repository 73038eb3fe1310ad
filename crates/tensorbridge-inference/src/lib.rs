//! Typed tensor marshaling over native inference engines.
//!
//! This crate provides one platform-neutral contract for loading a model,
//! introspecting its tensors, feeding typed data in, running inference and
//! reading typed results out. Engines plug in through [`NativeEngine`]:
//! - `ort` (ONNX Runtime with XNNPACK) for native platforms
//! - `tract` for portable pure-Rust targets
//!
//! ```no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> tensorbridge_inference::Result<()> {
//! use tensorbridge_inference::{InferenceSession, InputTensor, InterpreterOptions, OrtEngine};
//!
//! let mut session =
//!     InferenceSession::<OrtEngine>::from_file("model.onnx", &InterpreterOptions::default())?;
//! let input = InputTensor::from_f32(vec![1.0, 2.0, 3.0, 4.0], &[1, 2, 2])?;
//! let mut output = [0.0f32; 4];
//! session.run(&[input], [(0, (&mut output).into())])?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

mod backend;
mod codec;
mod container;
mod error;
mod options;
mod session;
mod tensor;

#[cfg(test)]
mod testing;

pub use backend::NativeEngine;
pub use codec::{decode_le, encode_le, TensorElement, TypedBuffer};
pub use container::{ContainerElement, NestedArray, OutputContainer, Slot};
pub use error::{InferenceError, TensorKind};
pub use options::{InterpreterOptions, OptimizationLevel};
pub use session::InferenceSession;
pub use tensor::{
    InputTensor, NativeDataType, NativeTensorInfo, OutputTensor, TensorDataType, TensorDescriptor,
    TensorShape,
};

#[cfg(feature = "native")]
pub use backend::ort::OrtEngine;

#[cfg(feature = "portable")]
pub use backend::tract::TractEngine;

/// Result type for marshaling operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
