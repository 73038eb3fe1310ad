//! Run command - feed raw input files through a model.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use tensorbridge_inference::{
    InferenceSession, InputTensor, InterpreterOptions, NativeEngine, OutputTensor, TensorDataType,
};

use super::{load_options, with_engine, EngineKind};

/// Arguments for the run command.
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Model file (ONNX)
    model: PathBuf,

    /// Raw little-endian input file, one per model input in order
    #[arg(short, long = "input")]
    inputs: Vec<PathBuf>,

    /// Resize an input before running, as INDEX:D0,D1,...
    #[arg(long = "resize")]
    resizes: Vec<ResizeSpec>,

    /// Output index to print (repeatable; defaults to all outputs)
    #[arg(short, long = "output")]
    outputs: Vec<usize>,

    /// Engine used to load the model
    #[arg(short, long, value_enum, default_value = "ort")]
    engine: EngineKind,
}

/// Parsed `--resize` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeSpec {
    index: usize,
    dims: Vec<usize>,
}

impl FromStr for ResizeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, dims) = s
            .split_once(':')
            .ok_or_else(|| format!("expected INDEX:D0,D1,..., got '{s}'"))?;
        let index = index
            .trim()
            .parse()
            .map_err(|e| format!("bad input index '{index}': {e}"))?;
        let dims = if dims.trim().is_empty() {
            Vec::new()
        } else {
            dims.split(',')
                .map(|d| d.trim().parse().map_err(|e| format!("bad dimension '{d}': {e}")))
                .collect::<Result<Vec<usize>, String>>()?
        };
        Ok(Self { index, dims })
    }
}

#[derive(Debug, Serialize)]
struct OutputReport {
    index: usize,
    name: String,
    dtype: TensorDataType,
    shape: Vec<usize>,
    values: Value,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let options = load_options(config_path)?;
    info!(
        "Running {} with {} input file(s)",
        args.model.display(),
        args.inputs.len()
    );

    let kind = args.engine;
    let reports = tokio::task::spawn_blocking(move || {
        with_engine!(kind, |E| run_model::<E>(&args, &options))
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn run_model<E: NativeEngine>(args: &RunArgs, options: &InterpreterOptions) -> anyhow::Result<Vec<OutputReport>> {
    let mut session = InferenceSession::<E>::from_file(&args.model, options)?;

    for resize in &args.resizes {
        debug!("Resizing input {} to {:?}", resize.index, resize.dims);
        session
            .resize_input(resize.index, resize.dims.clone())
            .with_context(|| format!("Failed to resize input {}", resize.index))?;
    }

    let inputs = args
        .inputs
        .iter()
        .map(|path| {
            fs::read(path)
                .map(InputTensor::Bytes)
                .with_context(|| format!("Failed to read input file: {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    session.run(&inputs, [])?;

    let indices: Vec<usize> = if args.outputs.is_empty() {
        (0..session.output_tensor_count()?).collect()
    } else {
        args.outputs.clone()
    };

    let reports = indices
        .into_iter()
        .map(|index| {
            let descriptor = session.output_tensor(index)?;
            let tensor = session.read_output(index)?;
            Ok(OutputReport {
                index,
                name: descriptor.name().to_string(),
                dtype: tensor.dtype(),
                shape: tensor.shape().to_vec(),
                values: tensor_values(&tensor)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    session.close();
    Ok(reports)
}

/// Flat values in logical order; non-finite floats serialize as null.
fn tensor_values(tensor: &OutputTensor) -> serde_json::Result<Value> {
    match tensor {
        OutputTensor::Float32(array) => serde_json::to_value(array.iter().collect::<Vec<_>>()),
        OutputTensor::Int32(array) => serde_json::to_value(array.iter().collect::<Vec<_>>()),
        OutputTensor::Uint8(array) => serde_json::to_value(array.iter().collect::<Vec<_>>()),
        OutputTensor::Int64(array) => serde_json::to_value(array.iter().collect::<Vec<_>>()),
    }
}
